//! Filesystem-backed document store. Uploads and generated artifacts
//! live under the configured media directory and are addressed through
//! opaque URL-style locators, never raw paths.

use std::path::{Path, PathBuf};

use procura_core::DocumentLocator;
use thiserror::Error;
use uuid::Uuid;

const PROFORMA_DIR: &str = "proformas";
const PURCHASE_ORDER_DIR: &str = "purchase_orders";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("locator `{0}` does not belong to this store")]
    ForeignLocator(String),
}

pub struct FsDocumentStore {
    media_dir: PathBuf,
    base_url: String,
}

impl FsDocumentStore {
    pub fn new(media_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { media_dir: media_dir.into(), base_url }
    }

    /// Persist an uploaded supporting document and return its locator.
    pub async fn store_proforma(
        &self,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<DocumentLocator, StorageError> {
        let file_name = format!("{}_{}", Uuid::new_v4(), sanitize_file_name(original_name));
        self.write(PROFORMA_DIR, &file_name, bytes).await
    }

    /// Persist a generated purchase-order document under its given name.
    pub async fn store_purchase_order(
        &self,
        file_name: &str,
        contents: &str,
    ) -> Result<DocumentLocator, StorageError> {
        self.write(PURCHASE_ORDER_DIR, &sanitize_file_name(file_name), contents.as_bytes()).await
    }

    /// Delete a stored document. Lets the create path back out an
    /// upload whose request never came into existence.
    pub async fn remove(&self, locator: &DocumentLocator) -> Result<(), StorageError> {
        let path = self.resolve(locator)?;
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    /// Map a locator issued by this store back to a filesystem path.
    pub fn resolve(&self, locator: &DocumentLocator) -> Result<PathBuf, StorageError> {
        let relative = locator
            .0
            .strip_prefix(&self.base_url)
            .map(|rest| rest.trim_start_matches('/'))
            .ok_or_else(|| StorageError::ForeignLocator(locator.0.clone()))?;

        // Locators are minted from sanitized names; a traversal segment
        // means the locator was not issued by this store.
        if relative.split('/').any(|segment| segment == ".." || segment.is_empty()) {
            return Err(StorageError::ForeignLocator(locator.0.clone()));
        }

        Ok(self.media_dir.join(relative))
    }

    async fn write(
        &self,
        subdir: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<DocumentLocator, StorageError> {
        let dir = self.media_dir.join(subdir);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(file_name), bytes).await?;

        Ok(DocumentLocator(format!("{}/{subdir}/{file_name}", self.base_url)))
    }
}

fn sanitize_file_name(name: &str) -> String {
    let name = Path::new(name)
        .file_name()
        .map(|os| os.to_string_lossy().into_owned())
        .unwrap_or_default();

    let cleaned: String = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') { ch } else { '_' })
        .collect();

    if cleaned.trim_matches(['.', '_']).is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}
