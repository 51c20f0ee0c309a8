//! Approval engine: the authoritative rules for request lifecycle
//! transitions. Decides legality and authorization, then applies each
//! transition through a status-conditioned repository write so that
//! concurrent attempts resolve to exactly one winner.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::actor::{Actor, ApprovalLevel};
use crate::domain::request::{
    DocumentLocator, NewRequest, PurchaseRequest, RequestId, RequestStatus,
};
use crate::errors::EngineError;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("persisted status changed since read")]
    Conflict,
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Durable store of request records. The repository owns persistence
/// only; whether a mutation is allowed is decided by the engine.
#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn insert(&self, request: PurchaseRequest) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &RequestId)
        -> Result<Option<PurchaseRequest>, RepositoryError>;

    /// All requests visible to the actor, newest first: the actor's own
    /// requests, plus every request awaiting the actor's approval level.
    async fn list_visible(&self, actor: &Actor) -> Result<Vec<PurchaseRequest>, RepositoryError>;

    /// Sole write path for transitions. Must succeed only if the
    /// persisted status still equals `expected` at the moment of write,
    /// and signal `Conflict` otherwise.
    async fn update_with_expected_status(
        &self,
        expected: RequestStatus,
        request: PurchaseRequest,
    ) -> Result<(), RepositoryError>;
}

#[derive(Debug, Error)]
#[error("artifact generation failed: {0}")]
pub struct ArtifactError(pub String);

/// Produces the purchase-order document for a finally-approved request
/// and stores it, returning a retrievable locator.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn generate(&self, request: &PurchaseRequest) -> Result<DocumentLocator, ArtifactError>;
}

#[derive(Debug, Error)]
#[error("field extraction failed: {0}")]
pub struct ExtractError(pub String);

/// Best-effort structured field extraction from an uploaded document.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract(&self, document: &DocumentLocator)
        -> Result<serde_json::Value, ExtractError>;
}

pub struct ApprovalEngine {
    repository: Arc<dyn RequestRepository>,
    artifacts: Arc<dyn ArtifactGenerator>,
    extractor: Arc<dyn FieldExtractor>,
}

impl ApprovalEngine {
    pub fn new(
        repository: Arc<dyn RequestRepository>,
        artifacts: Arc<dyn ArtifactGenerator>,
        extractor: Arc<dyn FieldExtractor>,
    ) -> Self {
        Self { repository, artifacts, extractor }
    }

    pub async fn create(
        &self,
        input: NewRequest,
        actor: &Actor,
    ) -> Result<PurchaseRequest, EngineError> {
        let request = PurchaseRequest::create(input, &actor.username)?;
        self.repository.insert(request.clone()).await.map_err(map_write_error)?;

        info!(
            event_name = "engine.request.created",
            request_id = %request.id,
            requester = %request.requester,
            "purchase request created"
        );
        Ok(request)
    }

    /// Run field extraction for a created request and persist the result.
    ///
    /// Intended to be spawned after `create` returns; completion order
    /// relative to the creation response is unspecified. Every failure
    /// path is logged and swallowed: extraction never fails a request.
    pub async fn apply_extraction(&self, id: RequestId) {
        let request = match self.repository.find_by_id(&id).await {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(error) => {
                warn!(
                    event_name = "engine.extraction.read_failed",
                    request_id = %id,
                    error = %error,
                    "skipping extraction, request could not be read"
                );
                return;
            }
        };

        let fields = match self.extractor.extract(&request.source_document).await {
            Ok(fields) => fields,
            Err(error) => {
                warn!(
                    event_name = "engine.extraction.failed",
                    request_id = %id,
                    error = %error,
                    "field extraction failed, request left without extracted fields"
                );
                return;
            }
        };

        let expected = request.status;
        let mut updated = request;
        updated.extracted_fields = Some(fields);

        // A lost race here means the request moved on; the extraction
        // result is dropped rather than overwriting a newer record.
        if let Err(error) = self.repository.update_with_expected_status(expected, updated).await {
            warn!(
                event_name = "engine.extraction.write_dropped",
                request_id = %id,
                error = %error,
                "extracted fields not persisted"
            );
        }
    }

    pub async fn approve(
        &self,
        id: &RequestId,
        actor: &Actor,
    ) -> Result<PurchaseRequest, EngineError> {
        let request = self.load(id).await?;
        let level = request
            .status
            .pending_level()
            .ok_or(EngineError::InvalidTransition { from: request.status })?;
        ensure_level(actor, level)?;

        let expected = request.status;
        let mut updated = request;
        match level {
            ApprovalLevel::L1 => {
                updated.transition_to(RequestStatus::ApprovedL1)?;
                updated.approver_l1 = Some(actor.username.clone());
            }
            ApprovalLevel::L2 => {
                // Generate before the conditional write so the status
                // change and the locator are committed together.
                let artifact = self
                    .artifacts
                    .generate(&updated)
                    .await
                    .map_err(|error| EngineError::Dependency(error.to_string()))?;
                updated.transition_to(RequestStatus::ApprovedL2)?;
                updated.approver_l2 = Some(actor.username.clone());
                updated.output_artifact = Some(artifact);
            }
        }

        let committed = self.commit(expected, updated).await?;
        info!(
            event_name = "engine.request.approved",
            request_id = %committed.id,
            status = ?committed.status,
            approver = %actor.username,
            "approval applied"
        );
        Ok(committed)
    }

    pub async fn reject(
        &self,
        id: &RequestId,
        actor: &Actor,
        reason: &str,
    ) -> Result<PurchaseRequest, EngineError> {
        // Validated before any read or write.
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::Validation("rejection reason must not be empty".to_string()));
        }

        let request = self.load(id).await?;
        let level = request
            .status
            .pending_level()
            .ok_or(EngineError::InvalidTransition { from: request.status })?;
        ensure_level(actor, level)?;

        let expected = request.status;
        let mut updated = request;
        updated.transition_to(RequestStatus::Rejected)?;
        updated.rejection_reason = Some(reason.to_string());

        let committed = self.commit(expected, updated).await?;
        info!(
            event_name = "engine.request.rejected",
            request_id = %committed.id,
            approver = %actor.username,
            "rejection applied"
        );
        Ok(committed)
    }

    pub async fn get(&self, id: &RequestId, actor: &Actor) -> Result<PurchaseRequest, EngineError> {
        let request = self.load(id).await?;
        if request.requester != actor.username && !actor.role.is_approver() {
            return Err(EngineError::Authorization(format!(
                "`{}` may not view request `{}`",
                actor.username, request.id
            )));
        }
        Ok(request)
    }

    pub async fn list(&self, actor: &Actor) -> Result<Vec<PurchaseRequest>, EngineError> {
        self.repository
            .list_visible(actor)
            .await
            .map_err(|error| EngineError::Dependency(error.to_string()))
    }

    async fn load(&self, id: &RequestId) -> Result<PurchaseRequest, EngineError> {
        self.repository
            .find_by_id(id)
            .await
            .map_err(|error| EngineError::Dependency(error.to_string()))?
            .ok_or_else(|| EngineError::NotFound(id.clone()))
    }

    async fn commit(
        &self,
        expected: RequestStatus,
        updated: PurchaseRequest,
    ) -> Result<PurchaseRequest, EngineError> {
        match self.repository.update_with_expected_status(expected, updated.clone()).await {
            Ok(()) => Ok(updated),
            // A lost race means someone already transitioned this
            // request; reported exactly like a stale transition attempt.
            Err(RepositoryError::Conflict) => {
                Err(EngineError::InvalidTransition { from: expected })
            }
            Err(RepositoryError::NotFound) => Err(EngineError::NotFound(updated.id)),
            Err(RepositoryError::Storage(message)) => Err(EngineError::Dependency(message)),
        }
    }
}

fn ensure_level(actor: &Actor, level: ApprovalLevel) -> Result<(), EngineError> {
    if actor.role.can_approve(level) {
        return Ok(());
    }
    Err(EngineError::Authorization(format!(
        "role `{}` may not decide level {:?} approvals",
        actor.role.as_str(),
        level
    )))
}

fn map_write_error(error: RepositoryError) -> EngineError {
    match error {
        RepositoryError::Conflict => EngineError::Dependency("write conflict on insert".to_string()),
        RepositoryError::NotFound => EngineError::Dependency("record vanished".to_string()),
        RepositoryError::Storage(message) => EngineError::Dependency(message),
    }
}
