//! Best-effort field extraction from uploaded documents. Scans the
//! stored bytes as text and guesses vendor and total; results feed
//! `extracted_fields` and are advisory only.

use std::sync::Arc;

use async_trait::async_trait;
use procura_core::{DocumentLocator, ExtractError, FieldExtractor};
use regex::Regex;

use crate::storage::FsDocumentStore;

const PREVIEW_CHARS: usize = 200;

pub struct HeuristicExtractor {
    store: Arc<FsDocumentStore>,
    money_pattern: Regex,
}

impl HeuristicExtractor {
    pub fn new(store: Arc<FsDocumentStore>) -> Self {
        let money_pattern = Regex::new(r"(?:\$|USD)?\s?\d{1,3}(?:,\d{3})*(?:\.\d{2})?")
            .expect("money pattern is a valid regex");
        Self { store, money_pattern }
    }

    fn scan(&self, text: &str) -> serde_json::Value {
        let preview: String = text.chars().take(PREVIEW_CHARS).collect();

        let vendor = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("Unknown Vendor");

        // Prefer a match that looks like a price over a bare quantity.
        let candidates: Vec<&str> = self
            .money_pattern
            .find_iter(text)
            .map(|m| m.as_str().trim())
            .filter(|m| m.chars().any(|ch| ch.is_ascii_digit()))
            .collect();
        let total_detected = candidates
            .iter()
            .find(|m| m.contains('$') || m.contains("USD") || m.contains('.') || m.contains(','))
            .or_else(|| candidates.first())
            .copied()
            .unwrap_or("");

        serde_json::json!({
            "vendor": vendor,
            "total_detected": total_detected,
            "raw_text_preview": preview,
        })
    }
}

#[async_trait]
impl FieldExtractor for HeuristicExtractor {
    async fn extract(
        &self,
        document: &DocumentLocator,
    ) -> Result<serde_json::Value, ExtractError> {
        let path =
            self.store.resolve(document).map_err(|error| ExtractError(error.to_string()))?;
        let bytes =
            tokio::fs::read(&path).await.map_err(|error| ExtractError(error.to_string()))?;

        let text = String::from_utf8_lossy(&bytes);
        Ok(self.scan(&text))
    }
}
