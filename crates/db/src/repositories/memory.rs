use std::collections::HashMap;

use tokio::sync::RwLock;

use procura_core::{
    Actor, PurchaseRequest, RepositoryError, RequestId, RequestRepository, RequestStatus,
};

use super::{UserAccount, UserRepository, UserRepositoryError};

/// Map-backed request store with the same status-conditioned write rule
/// as the sql repository. Used by tests and local tooling.
#[derive(Default)]
pub struct InMemoryRequestRepository {
    requests: RwLock<HashMap<String, PurchaseRequest>>,
}

#[async_trait::async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn insert(&self, request: PurchaseRequest) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        requests.insert(request.id.0.clone(), request);
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &RequestId,
    ) -> Result<Option<PurchaseRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id.0).cloned())
    }

    async fn list_visible(&self, actor: &Actor) -> Result<Vec<PurchaseRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut visible: Vec<PurchaseRequest> = requests
            .values()
            .filter(|request| {
                request.requester == actor.username
                    || request
                        .status
                        .pending_level()
                        .is_some_and(|level| actor.role.can_approve(level))
            })
            .cloned()
            .collect();
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(visible)
    }

    async fn update_with_expected_status(
        &self,
        expected: RequestStatus,
        request: PurchaseRequest,
    ) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        let current = requests.get(&request.id.0).ok_or(RepositoryError::NotFound)?;
        if current.status != expected {
            return Err(RepositoryError::Conflict);
        }
        requests.insert(request.id.0.clone(), request);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    accounts: RwLock<HashMap<String, UserAccount>>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn insert(&self, account: UserAccount) -> Result<(), UserRepositoryError> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.username) {
            return Err(UserRepositoryError::UsernameTaken(account.username));
        }
        accounts.insert(account.username.clone(), account);
        Ok(())
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserAccount>, UserRepositoryError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(username).cloned())
    }
}
