//! HTTP boundary for the approval engine.
//!
//! Endpoints:
//! - `POST  /token/`                   — exchange credentials for a token pair
//! - `POST  /register/`                — create an identity
//! - `POST  /requests/`                — create a purchase request (multipart)
//! - `GET   /requests/`                — list requests visible to the caller
//! - `GET   /requests/{id}/`           — fetch one request
//! - `PATCH /requests/{id}/approve/`   — apply the pending approval level
//! - `PATCH /requests/{id}/reject/`    — reject with a mandatory reason
//!
//! Every domain error maps to a distinct status code so clients can
//! branch on cause: 400 validation, 401 unauthenticated, 403 forbidden,
//! 404 unknown id, 409 invalid transition (including lost races), 503
//! dependency failure.

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use procura_core::{Actor, ApprovalEngine, EngineError, NewRequest, RequestId, Role};
use procura_db::repositories::{UserAccount, UserRepository, UserRepositoryError};

use crate::auth::{self, AuthError, TokenService};
use crate::storage::FsDocumentStore;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ApprovalEngine>,
    pub users: Arc<dyn UserRepository>,
    pub tokens: Arc<TokenService>,
    pub store: Arc<FsDocumentStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/token/", post(issue_token))
        .route("/register/", post(register))
        .route("/requests/", post(create_request).get(list_requests))
        .route("/requests/{id}/", get(get_request))
        .route("/requests/{id}/approve/", patch(approve_request))
        .route("/requests/{id}/reject/", patch(reject_request))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthenticated(String),
    Engine(EngineError),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        Self::Engine(error)
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::InvalidCredentials | AuthError::InvalidToken => {
                Self::Unauthenticated(error.to_string())
            }
            AuthError::Encoding(_) => Self::Internal(error.to_string()),
        }
    }
}

impl From<UserRepositoryError> for ApiError {
    fn from(error: UserRepositoryError) -> Self {
        match error {
            UserRepositoryError::UsernameTaken(_) => Self::BadRequest(error.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthenticated(message) => (StatusCode::UNAUTHORIZED, message),
            ApiError::Engine(error) => {
                let status = match &error {
                    EngineError::Validation(_) => StatusCode::BAD_REQUEST,
                    EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                    EngineError::Authorization(_) => StatusCode::FORBIDDEN,
                    EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
                    EngineError::Dependency(_) => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, error.to_string())
            }
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

fn actor_from_headers(state: &AppState, headers: &HeaderMap) -> Result<Actor, ApiError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Unauthenticated("missing bearer token".to_string()))?;
    let token = auth::bearer_token(header)
        .ok_or_else(|| ApiError::Unauthenticated("missing bearer token".to_string()))?;
    Ok(state.tokens.verify_access(token)?)
}

// ---------------------------------------------------------------------------
// Identity endpoints
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RegisterBody {
    username: String,
    password: String,
    role: Option<String>,
}

#[derive(Deserialize)]
struct CredentialsBody {
    username: String,
    password: String,
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<Response, ApiError> {
    let username = body.username.trim().to_string();
    if username.is_empty() {
        return Err(ApiError::BadRequest("username must not be empty".to_string()));
    }
    if body.password.len() < 8 {
        return Err(ApiError::BadRequest("password must be at least 8 characters".to_string()));
    }

    let role = match body.role {
        Some(raw) => raw.parse::<Role>().map_err(ApiError::BadRequest)?,
        None => Role::Staff,
    };

    let salt = auth::generate_salt();
    let account = UserAccount {
        username: username.clone(),
        password_digest: auth::hash_password(&body.password, &salt),
        salt,
        role,
        created_at: Utc::now(),
    };
    state.users.insert(account).await?;

    info!(event_name = "api.identity.registered", username = %username, "identity created");
    let body = serde_json::json!({ "username": username, "role": role.as_str() });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

async fn issue_token(
    State(state): State<AppState>,
    Json(body): Json<CredentialsBody>,
) -> Result<Response, ApiError> {
    let account = state
        .users
        .find_by_username(body.username.trim())
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    if !auth::verify_password(&body.password, &account.salt, &account.password_digest) {
        return Err(AuthError::InvalidCredentials.into());
    }

    let pair = state.tokens.issue_pair(&account.username, account.role)?;
    Ok(Json(pair).into_response())
}

// ---------------------------------------------------------------------------
// Request endpoints
// ---------------------------------------------------------------------------

async fn create_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let actor = actor_from_headers(&state, &headers)?;

    let mut title = None;
    let mut description = None;
    let mut amount = None;
    let mut currency = None;
    let mut document: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| ApiError::BadRequest(format!("malformed multipart body: {error}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => title = Some(read_text(field).await?),
            "description" => description = Some(read_text(field).await?),
            "amount" => amount = Some(read_text(field).await?),
            "currency" => currency = Some(read_text(field).await?),
            "document" => {
                let file_name = field.file_name().unwrap_or("document").to_string();
                let bytes = field.bytes().await.map_err(|error| {
                    ApiError::BadRequest(format!("unreadable document upload: {error}"))
                })?;
                document = Some((file_name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let amount = amount
        .ok_or_else(|| ApiError::BadRequest("amount is required".to_string()))?
        .parse::<Decimal>()
        .map_err(|_| ApiError::BadRequest("amount must be a decimal number".to_string()))?;
    let (file_name, bytes) = document
        .ok_or_else(|| ApiError::BadRequest("a supporting document is required".to_string()))?;

    let source_document = state
        .store
        .store_proforma(&file_name, &bytes)
        .await
        .map_err(|error| ApiError::Engine(EngineError::Dependency(error.to_string())))?;

    let input = NewRequest {
        title: title.unwrap_or_default(),
        description: description.unwrap_or_default(),
        amount,
        currency: currency.filter(|code| !code.trim().is_empty()),
        source_document: source_document.clone(),
    };
    let request = match state.engine.create(input, &actor).await {
        Ok(request) => request,
        Err(error) => {
            // The upload has no owning request; drop it so malformed
            // retries cannot accumulate files under the media dir.
            if let Err(cleanup) = state.store.remove(&source_document).await {
                warn!(
                    event_name = "api.request.upload_cleanup_failed",
                    locator = %source_document.0,
                    error = %cleanup,
                    "orphaned upload left behind"
                );
            }
            return Err(error.into());
        }
    };

    // Fire-and-forget: extraction completes on its own schedule and
    // never affects the creation response.
    let engine = state.engine.clone();
    let request_id = request.id.clone();
    tokio::spawn(async move { engine.apply_extraction(request_id).await });

    Ok((StatusCode::CREATED, Json(request)).into_response())
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|error| ApiError::BadRequest(format!("unreadable form field: {error}")))
}

async fn list_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let actor = actor_from_headers(&state, &headers)?;
    let requests = state.engine.list(&actor).await?;
    Ok(Json(requests).into_response())
}

async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let actor = actor_from_headers(&state, &headers)?;
    let request = state.engine.get(&RequestId(id), &actor).await?;
    Ok(Json(request).into_response())
}

async fn approve_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let actor = actor_from_headers(&state, &headers)?;
    let request = state.engine.approve(&RequestId(id), &actor).await?;
    Ok(Json(request).into_response())
}

#[derive(Deserialize)]
struct RejectBody {
    reason: Option<String>,
}

async fn reject_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RejectBody>,
) -> Result<Response, ApiError> {
    let actor = actor_from_headers(&state, &headers)?;
    let reason = body.reason.unwrap_or_default();
    let request = state.engine.reject(&RequestId(id), &actor, &reason).await?;
    Ok(Json(request).into_response())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use chrono::Utc;
    use tower::util::ServiceExt;

    use procura_core::{ApprovalEngine, Role};
    use procura_db::repositories::{
        InMemoryRequestRepository, InMemoryUserRepository, UserAccount, UserRepository,
    };

    use super::{router, AppState};
    use crate::artifact::PoGenerator;
    use crate::auth::{self, TokenService};
    use crate::extraction::HeuristicExtractor;
    use crate::storage::FsDocumentStore;

    const BOUNDARY: &str = "X-PROCURA-TEST-BOUNDARY";

    async fn test_router() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(FsDocumentStore::new(dir.path(), "/media"));
        let generator = Arc::new(PoGenerator::new(store.clone()).expect("templates parse"));
        let extractor = Arc::new(HeuristicExtractor::new(store.clone()));
        let repository = Arc::new(InMemoryRequestRepository::default());
        let engine = Arc::new(ApprovalEngine::new(repository, generator, extractor));

        let users = Arc::new(InMemoryUserRepository::default());
        for (username, role) in
            [("alice", Role::Staff), ("bob", Role::Staff), ("meg", Role::Manager), ("dana", Role::Director)]
        {
            let salt = auth::generate_salt();
            users
                .insert(UserAccount {
                    username: username.to_string(),
                    password_digest: auth::hash_password("password123", &salt),
                    salt,
                    role,
                    created_at: Utc::now(),
                })
                .await
                .expect("seed user");
        }

        let tokens = Arc::new(TokenService::new(
            &"a-long-enough-test-secret".to_string().into(),
            900,
            86_400,
        ));

        (router(AppState { engine, users, tokens, store }), dir)
    }

    async fn send(
        router: &Router,
        request: Request<Body>,
    ) -> (StatusCode, serde_json::Value) {
        let response = router.clone().oneshot(request).await.expect("route");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, body)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn with_bearer(request: Request<Body>, token: &str) -> Request<Body> {
        let (mut parts, body) = request.into_parts();
        parts.headers.insert(
            "authorization",
            format!("Bearer {token}").parse().expect("header value"),
        );
        Request::from_parts(parts, body)
    }

    async fn token_for(router: &Router, username: &str) -> String {
        let (status, body) = send(
            router,
            json_request(
                "POST",
                "/token/",
                serde_json::json!({ "username": username, "password": "password123" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["access"].as_str().expect("access token").to_string()
    }

    fn multipart_create(token: &str, title: &str, amount: &str) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n{title}\r\n\
             --{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"description\"\r\n\r\nFive developer laptops\r\n\
             --{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"amount\"\r\n\r\n{amount}\r\n\
             --{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"currency\"\r\n\r\nUSD\r\n\
             --{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"document\"; filename=\"laptops.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             Acme Supplies\nTotal: USD 1,500.00\r\n\
             --{BOUNDARY}--\r\n"
        );
        with_bearer(
            Request::builder()
                .method("POST")
                .uri("/requests/")
                .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
                .body(Body::from(body))
                .expect("request"),
            token,
        )
    }

    #[tokio::test]
    async fn register_validates_and_rejects_duplicates() {
        let (router, _dir) = test_router().await;

        let (status, body) = send(
            &router,
            json_request(
                "POST",
                "/register/",
                serde_json::json!({ "username": "newbie", "password": "password123" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["role"], "staff");

        let (status, _) = send(
            &router,
            json_request(
                "POST",
                "/register/",
                serde_json::json!({ "username": "newbie", "password": "password123" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &router,
            json_request(
                "POST",
                "/register/",
                serde_json::json!({ "username": "shorty", "password": "short" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn token_endpoint_rejects_bad_credentials() {
        let (router, _dir) = test_router().await;

        let (status, _) = send(
            &router,
            json_request(
                "POST",
                "/token/",
                serde_json::json!({ "username": "alice", "password": "wrong-password" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(
            &router,
            json_request(
                "POST",
                "/token/",
                serde_json::json!({ "username": "alice", "password": "password123" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["access"].is_string());
        assert!(body["refresh"].is_string());
    }

    #[tokio::test]
    async fn requests_require_a_bearer_token() {
        let (router, _dir) = test_router().await;

        let request =
            Request::builder().method("GET").uri("/requests/").body(Body::empty()).expect("request");
        let (status, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn full_approval_lifecycle_over_http() {
        let (router, _dir) = test_router().await;
        let alice = token_for(&router, "alice").await;
        let meg = token_for(&router, "meg").await;
        let dana = token_for(&router, "dana").await;

        let (status, created) =
            send(&router, multipart_create(&alice, "Laptops", "1500")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "PENDING");
        assert!(created["output_artifact"].is_null());
        assert!(created["rejection_reason"].is_null());
        let id = created["id"].as_str().expect("id");

        let approve_uri = format!("/requests/{id}/approve/");
        let approve = |token: &str| {
            with_bearer(
                Request::builder()
                    .method("PATCH")
                    .uri(approve_uri.clone())
                    .body(Body::empty())
                    .expect("request"),
                token,
            )
        };

        let (status, body) = send(&router, approve(&meg)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "APPROVED_L1");
        assert_eq!(body["approver_l1"], "meg");

        // Wrong level now: the same manager cannot apply L2.
        let (status, _) = send(&router, approve(&meg)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&router, approve(&dana)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "APPROVED_L2");
        let artifact = body["output_artifact"].as_str().expect("artifact locator");
        assert!(artifact.contains("purchase_orders/"));

        // Terminal: repeat attempts are idempotent failures.
        let (status, _) = send(&router, approve(&dana)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn reject_requires_a_reason_and_is_terminal() {
        let (router, _dir) = test_router().await;
        let alice = token_for(&router, "alice").await;
        let meg = token_for(&router, "meg").await;

        let (_, created) = send(&router, multipart_create(&alice, "Laptops", "1500")).await;
        let id = created["id"].as_str().expect("id");

        let reject_uri = format!("/requests/{id}/reject/");
        let reject = |token: &str, reason: &str| {
            with_bearer(
                json_request("PATCH", &reject_uri, serde_json::json!({ "reason": reason })),
                token,
            )
        };

        let (status, _) = send(&router, reject(&meg, "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&router, reject(&meg, "over budget")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "REJECTED");
        assert_eq!(body["rejection_reason"], "over budget");

        let (status, _) = send(
            &router,
            with_bearer(
                Request::builder()
                    .method("PATCH")
                    .uri(format!("/requests/{id}/approve/"))
                    .body(Body::empty())
                    .expect("request"),
                &meg,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn visibility_rules_apply_to_reads() {
        let (router, _dir) = test_router().await;
        let alice = token_for(&router, "alice").await;
        let bob = token_for(&router, "bob").await;
        let meg = token_for(&router, "meg").await;

        let (_, created) = send(&router, multipart_create(&alice, "Laptops", "1500")).await;
        let id = created["id"].as_str().expect("id");

        let get = |token: &str, id: &str| {
            with_bearer(
                Request::builder()
                    .method("GET")
                    .uri(format!("/requests/{id}/"))
                    .body(Body::empty())
                    .expect("request"),
                token,
            )
        };

        let (status, _) = send(&router, get(&alice, id)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&router, get(&bob, id)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&router, get(&meg, "no-such-id")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let list = |token: &str| {
            with_bearer(
                Request::builder()
                    .method("GET")
                    .uri("/requests/")
                    .body(Body::empty())
                    .expect("request"),
                token,
            )
        };
        let (status, body) = send(&router, list(&bob)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().expect("list").len(), 0);

        let (status, body) = send(&router, list(&alice)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().expect("list").len(), 1);
    }

    #[tokio::test]
    async fn failed_validation_does_not_leave_uploads_behind() {
        let (router, dir) = test_router().await;
        let alice = token_for(&router, "alice").await;

        let (status, _) = send(&router, multipart_create(&alice, "", "1500")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut leftovers = 0;
        if let Ok(mut entries) = tokio::fs::read_dir(dir.path().join("proformas")).await {
            while entries.next_entry().await.expect("read dir").is_some() {
                leftovers += 1;
            }
        }
        assert_eq!(leftovers, 0, "rejected create must not orphan its upload");
    }

    #[tokio::test]
    async fn malformed_amount_is_a_validation_failure() {
        let (router, _dir) = test_router().await;
        let alice = token_for(&router, "alice").await;

        let (status, body) =
            send(&router, multipart_create(&alice, "Laptops", "not-a-number")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("error").contains("decimal"));
    }
}
