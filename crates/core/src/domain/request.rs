use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::actor::ApprovalLevel;
use crate::errors::EngineError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque locator for a stored document (upload or generated artifact).
/// The engine never inspects its contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLocator(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "APPROVED_L1")]
    ApprovedL1,
    #[serde(rename = "APPROVED_L2")]
    ApprovedL2,
    #[serde(rename = "REJECTED")]
    Rejected,
}

impl RequestStatus {
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (RequestStatus::Pending, RequestStatus::ApprovedL1)
                | (RequestStatus::ApprovedL1, RequestStatus::ApprovedL2)
                | (RequestStatus::Pending, RequestStatus::Rejected)
                | (RequestStatus::ApprovedL1, RequestStatus::Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::ApprovedL2 | RequestStatus::Rejected)
    }

    /// The approval level a request in this status is waiting on, if any.
    pub fn pending_level(self) -> Option<ApprovalLevel> {
        match self {
            RequestStatus::Pending => Some(ApprovalLevel::L1),
            RequestStatus::ApprovedL1 => Some(ApprovalLevel::L2),
            RequestStatus::ApprovedL2 | RequestStatus::Rejected => None,
        }
    }

    /// Total mapping from status to presentation metadata. Owned by
    /// callers that render state; the engine never reads this.
    pub fn display(self) -> StatusDisplay {
        match self {
            RequestStatus::Pending => StatusDisplay { label: "Pending", color: "warning" },
            RequestStatus::ApprovedL1 => {
                StatusDisplay { label: "Approved by Manager", color: "info" }
            }
            RequestStatus::ApprovedL2 => {
                StatusDisplay { label: "Approved by Director", color: "success" }
            }
            RequestStatus::Rejected => StatusDisplay { label: "Rejected", color: "error" },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StatusDisplay {
    pub label: &'static str,
    pub color: &'static str,
}

/// Input for request creation, before an id or status is assigned.
#[derive(Clone, Debug, Deserialize)]
pub struct NewRequest {
    pub title: String,
    pub description: String,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub source_document: DocumentLocator,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub id: RequestId,
    pub title: String,
    pub description: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: RequestStatus,
    pub requester: String,
    pub approver_l1: Option<String>,
    pub approver_l2: Option<String>,
    pub source_document: DocumentLocator,
    pub extracted_fields: Option<serde_json::Value>,
    pub rejection_reason: Option<String>,
    pub output_artifact: Option<DocumentLocator>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseRequest {
    /// Validate creation input and build a `Pending` record.
    pub fn create(input: NewRequest, requester: &str) -> Result<Self, EngineError> {
        if input.title.trim().is_empty() {
            return Err(EngineError::Validation("title must not be empty".to_string()));
        }
        if input.description.trim().is_empty() {
            return Err(EngineError::Validation("description must not be empty".to_string()));
        }
        if input.amount <= Decimal::ZERO {
            return Err(EngineError::Validation("amount must be positive".to_string()));
        }
        if input.source_document.0.trim().is_empty() {
            return Err(EngineError::Validation("source document is required".to_string()));
        }

        let currency = match input.currency {
            Some(code) => {
                let code = code.trim().to_ascii_uppercase();
                if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
                    return Err(EngineError::Validation(format!(
                        "currency must be a 3-letter code, got `{code}`"
                    )));
                }
                code
            }
            None => "USD".to_string(),
        };

        let now = Utc::now();
        Ok(Self {
            id: RequestId::generate(),
            title: input.title,
            description: input.description,
            amount: input.amount,
            currency,
            status: RequestStatus::Pending,
            requester: requester.to_string(),
            approver_l1: None,
            approver_l2: None,
            source_document: input.source_document,
            extracted_fields: None,
            rejection_reason: None,
            output_artifact: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn transition_to(&mut self, next: RequestStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition { from: self.status });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}
