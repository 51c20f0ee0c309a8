//! Purchase-order document generation. Renders an HTML purchase order
//! through Tera and hands it to the document store; the resulting
//! locator is committed together with the final approval.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use procura_core::{ArtifactError, ArtifactGenerator, DocumentLocator, PurchaseRequest};
use tera::{Context, Tera};

use crate::storage::FsDocumentStore;

const TEMPLATE_NAME: &str = "purchase_order.html";

pub struct PoGenerator {
    store: Arc<FsDocumentStore>,
    templates: Tera,
}

impl PoGenerator {
    pub fn new(store: Arc<FsDocumentStore>) -> Result<Self, tera::Error> {
        let mut templates = Tera::default();
        templates
            .add_raw_template(TEMPLATE_NAME, include_str!("../templates/purchase_order.html"))?;
        Ok(Self { store, templates })
    }

    fn render(&self, request: &PurchaseRequest) -> Result<String, tera::Error> {
        let po_number = format!(
            "PO-{}",
            request.id.0.get(..8).unwrap_or(&request.id.0).to_ascii_uppercase()
        );
        let vendor = request
            .extracted_fields
            .as_ref()
            .and_then(|fields| fields.get("vendor"))
            .and_then(|value| value.as_str())
            .unwrap_or("General Vendor");

        let mut context = Context::new();
        context.insert("po_number", &po_number);
        context.insert("date", &Utc::now().format("%Y-%m-%d").to_string());
        context.insert("vendor", vendor);
        context.insert("title", &request.title);
        context.insert("description", &request.description);
        context.insert("amount", &request.amount.to_string());
        context.insert("currency", &request.currency);
        context.insert("requester", &request.requester);

        self.templates.render(TEMPLATE_NAME, &context)
    }
}

#[async_trait]
impl ArtifactGenerator for PoGenerator {
    async fn generate(&self, request: &PurchaseRequest) -> Result<DocumentLocator, ArtifactError> {
        let html = self.render(request).map_err(|error| ArtifactError(error.to_string()))?;

        let file_name = format!("PO_{}_{}.html", request.id, Utc::now().format("%Y%m%d"));
        self.store
            .store_purchase_order(&file_name, &html)
            .await
            .map_err(|error| ArtifactError(error.to_string()))
    }
}
