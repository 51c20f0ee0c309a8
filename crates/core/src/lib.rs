pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;

pub use domain::actor::{Actor, ApprovalLevel, Role};
pub use domain::request::{
    DocumentLocator, NewRequest, PurchaseRequest, RequestId, RequestStatus, StatusDisplay,
};
pub use engine::{
    ApprovalEngine, ArtifactError, ArtifactGenerator, ExtractError, FieldExtractor,
    RepositoryError, RequestRepository,
};
pub use errors::EngineError;
