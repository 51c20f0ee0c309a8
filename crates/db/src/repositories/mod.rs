use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod request;
pub mod user;

pub use memory::{InMemoryRequestRepository, InMemoryUserRepository};
pub use request::SqlRequestRepository;
pub use user::{SqlUserRepository, UserAccount};

#[derive(Debug, Error)]
pub enum UserRepositoryError {
    #[error("username `{0}` is already taken")]
    UsernameTaken(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn insert(&self, account: UserAccount) -> Result<(), UserRepositoryError>;
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserAccount>, UserRepositoryError>;
}
