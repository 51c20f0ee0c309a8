use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;

use procura_core::{
    Actor, DocumentLocator, PurchaseRequest, RepositoryError, RequestId, RequestRepository,
    RequestStatus, Role,
};

use crate::DbPool;

pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub fn status_as_str(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Pending => "PENDING",
        RequestStatus::ApprovedL1 => "APPROVED_L1",
        RequestStatus::ApprovedL2 => "APPROVED_L2",
        RequestStatus::Rejected => "REJECTED",
    }
}

fn parse_status(value: &str) -> Result<RequestStatus, RepositoryError> {
    match value {
        "PENDING" => Ok(RequestStatus::Pending),
        "APPROVED_L1" => Ok(RequestStatus::ApprovedL1),
        "APPROVED_L2" => Ok(RequestStatus::ApprovedL2),
        "REJECTED" => Ok(RequestStatus::Rejected),
        other => Err(decode(format!("unknown status `{other}`"))),
    }
}

fn decode(message: impl Into<String>) -> RepositoryError {
    RepositoryError::Storage(message.into())
}

fn storage(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Storage(error.to_string())
}

fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| decode(format!("bad timestamp in `{column}`: {error}")))
}

const SELECT_COLUMNS: &str = "id, title, description, amount, currency, status, requester, \
     approver_l1, approver_l2, source_document, extracted_fields, rejection_reason, \
     output_artifact, created_at, updated_at";

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<PurchaseRequest, RepositoryError> {
    let get = |column: &str| -> Result<String, RepositoryError> {
        row.try_get::<String, _>(column).map_err(|e| decode(e.to_string()))
    };
    let get_opt = |column: &str| -> Result<Option<String>, RepositoryError> {
        row.try_get::<Option<String>, _>(column).map_err(|e| decode(e.to_string()))
    };

    let amount_str = get("amount")?;
    let amount = Decimal::from_str(&amount_str)
        .map_err(|error| decode(format!("bad amount `{amount_str}`: {error}")))?;

    let extracted_fields = get_opt("extracted_fields")?
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|error| decode(format!("bad extracted_fields json: {error}")))
        })
        .transpose()?;

    Ok(PurchaseRequest {
        id: RequestId(get("id")?),
        title: get("title")?,
        description: get("description")?,
        amount,
        currency: get("currency")?,
        status: parse_status(&get("status")?)?,
        requester: get("requester")?,
        approver_l1: get_opt("approver_l1")?,
        approver_l2: get_opt("approver_l2")?,
        source_document: DocumentLocator(get("source_document")?),
        extracted_fields,
        rejection_reason: get_opt("rejection_reason")?,
        output_artifact: get_opt("output_artifact")?.map(DocumentLocator),
        created_at: parse_timestamp(&get("created_at")?, "created_at")?,
        updated_at: parse_timestamp(&get("updated_at")?, "updated_at")?,
    })
}

fn extracted_fields_as_text(
    request: &PurchaseRequest,
) -> Result<Option<String>, RepositoryError> {
    request
        .extracted_fields
        .as_ref()
        .map(|fields| {
            serde_json::to_string(fields)
                .map_err(|error| decode(format!("unserializable extracted_fields: {error}")))
        })
        .transpose()
}

#[async_trait::async_trait]
impl RequestRepository for SqlRequestRepository {
    async fn insert(&self, request: PurchaseRequest) -> Result<(), RepositoryError> {
        let extracted = extracted_fields_as_text(&request)?;

        sqlx::query(
            "INSERT INTO purchase_request (id, title, description, amount, currency, status,
                                           requester, approver_l1, approver_l2, source_document,
                                           extracted_fields, rejection_reason, output_artifact,
                                           created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.title)
        .bind(&request.description)
        .bind(request.amount.to_string())
        .bind(&request.currency)
        .bind(status_as_str(request.status))
        .bind(&request.requester)
        .bind(&request.approver_l1)
        .bind(&request.approver_l2)
        .bind(&request.source_document.0)
        .bind(&extracted)
        .bind(&request.rejection_reason)
        .bind(request.output_artifact.as_ref().map(|locator| locator.0.clone()))
        .bind(request.created_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &RequestId,
    ) -> Result<Option<PurchaseRequest>, RepositoryError> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM purchase_request WHERE id = ?");
        let row = sqlx::query(&query)
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        match row {
            Some(ref row) => Ok(Some(row_to_request(row)?)),
            None => Ok(None),
        }
    }

    async fn list_visible(&self, actor: &Actor) -> Result<Vec<PurchaseRequest>, RepositoryError> {
        // Requesters see their own records; approvers additionally see
        // everything awaiting their level.
        let rows: Vec<sqlx::sqlite::SqliteRow> = match actor.role {
            Role::Staff => {
                let query = format!(
                    "SELECT {SELECT_COLUMNS} FROM purchase_request
                     WHERE requester = ?
                     ORDER BY created_at DESC"
                );
                sqlx::query(&query).bind(&actor.username).fetch_all(&self.pool).await
            }
            Role::Manager | Role::Director => {
                let awaiting = if actor.role == Role::Manager { "PENDING" } else { "APPROVED_L1" };
                let query = format!(
                    "SELECT {SELECT_COLUMNS} FROM purchase_request
                     WHERE requester = ? OR status = ?
                     ORDER BY created_at DESC"
                );
                sqlx::query(&query)
                    .bind(&actor.username)
                    .bind(awaiting)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(storage)?;

        rows.iter().map(row_to_request).collect()
    }

    async fn update_with_expected_status(
        &self,
        expected: RequestStatus,
        request: PurchaseRequest,
    ) -> Result<(), RepositoryError> {
        let extracted = extracted_fields_as_text(&request)?;

        let result = sqlx::query(
            "UPDATE purchase_request
             SET title = ?, description = ?, amount = ?, currency = ?, status = ?,
                 approver_l1 = ?, approver_l2 = ?, extracted_fields = ?,
                 rejection_reason = ?, output_artifact = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(&request.title)
        .bind(&request.description)
        .bind(request.amount.to_string())
        .bind(&request.currency)
        .bind(status_as_str(request.status))
        .bind(&request.approver_l1)
        .bind(&request.approver_l2)
        .bind(&extracted)
        .bind(&request.rejection_reason)
        .bind(request.output_artifact.as_ref().map(|locator| locator.0.clone()))
        .bind(request.updated_at.to_rfc3339())
        .bind(&request.id.0)
        .bind(status_as_str(expected))
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        // Nothing matched: either the row vanished or its status moved
        // on since the caller's read.
        let exists: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM purchase_request WHERE id = ?")
                .bind(&request.id.0)
                .fetch_one(&self.pool)
                .await
                .map_err(storage)?;

        if exists == 0 {
            Err(RepositoryError::NotFound)
        } else {
            Err(RepositoryError::Conflict)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use procura_core::{
        Actor, DocumentLocator, NewRequest, PurchaseRequest, RepositoryError, RequestId,
        RequestRepository, RequestStatus, Role,
    };

    use super::SqlRequestRepository;
    use crate::{connect_single, migrations};

    async fn setup() -> SqlRequestRepository {
        let pool = connect_single("sqlite::memory:").await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlRequestRepository::new(pool)
    }

    fn sample(requester: &str) -> PurchaseRequest {
        PurchaseRequest::create(
            NewRequest {
                title: "Laptops".to_string(),
                description: "Five developer laptops".to_string(),
                amount: Decimal::new(150000, 2),
                currency: Some("USD".to_string()),
                source_document: DocumentLocator("/media/proformas/laptops.pdf".to_string()),
            },
            requester,
        )
        .expect("valid input")
    }

    #[tokio::test]
    async fn insert_and_find_round_trip() {
        let repo = setup().await;
        let request = sample("alice");

        repo.insert(request.clone()).await.expect("insert");
        let found = repo.find_by_id(&request.id).await.expect("find").expect("exists");

        assert_eq!(found.id, request.id);
        assert_eq!(found.title, "Laptops");
        assert_eq!(found.amount, Decimal::new(150000, 2));
        assert_eq!(found.status, RequestStatus::Pending);
        assert!(found.extracted_fields.is_none());
        // RFC 3339 storage keeps ordering but may lose sub-microsecond
        // precision, so compare to the second.
        assert_eq!(found.created_at.timestamp(), request.created_at.timestamp());
    }

    #[tokio::test]
    async fn find_unknown_id_returns_none() {
        let repo = setup().await;
        let found =
            repo.find_by_id(&RequestId("missing".to_string())).await.expect("query runs");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn conditional_update_applies_when_status_matches() {
        let repo = setup().await;
        let request = sample("alice");
        repo.insert(request.clone()).await.expect("insert");

        let mut updated = request.clone();
        updated.transition_to(RequestStatus::ApprovedL1).expect("legal edge");
        updated.approver_l1 = Some("meg".to_string());

        repo.update_with_expected_status(RequestStatus::Pending, updated)
            .await
            .expect("conditional write");

        let found = repo.find_by_id(&request.id).await.expect("find").expect("exists");
        assert_eq!(found.status, RequestStatus::ApprovedL1);
        assert_eq!(found.approver_l1.as_deref(), Some("meg"));
    }

    #[tokio::test]
    async fn conditional_update_conflicts_when_status_moved() {
        let repo = setup().await;
        let request = sample("alice");
        repo.insert(request.clone()).await.expect("insert");

        let mut first = request.clone();
        first.transition_to(RequestStatus::ApprovedL1).expect("legal edge");
        repo.update_with_expected_status(RequestStatus::Pending, first)
            .await
            .expect("first write wins");

        let mut second = request.clone();
        second.transition_to(RequestStatus::Rejected).expect("legal edge");
        second.rejection_reason = Some("duplicate".to_string());
        let error = repo
            .update_with_expected_status(RequestStatus::Pending, second)
            .await
            .expect_err("stale write");

        assert!(matches!(error, RepositoryError::Conflict));

        let found = repo.find_by_id(&request.id).await.expect("find").expect("exists");
        assert_eq!(found.status, RequestStatus::ApprovedL1);
        assert!(found.rejection_reason.is_none());
    }

    #[tokio::test]
    async fn conditional_update_of_missing_row_is_not_found() {
        let repo = setup().await;
        let request = sample("alice");

        let error = repo
            .update_with_expected_status(RequestStatus::Pending, request)
            .await
            .expect_err("row never inserted");
        assert!(matches!(error, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn extracted_fields_round_trip_as_json() {
        let repo = setup().await;
        let request = sample("alice");
        repo.insert(request.clone()).await.expect("insert");

        let mut updated = request.clone();
        updated.extracted_fields =
            Some(serde_json::json!({ "vendor": "Acme Supplies", "total_detected": "1,500.00" }));
        repo.update_with_expected_status(RequestStatus::Pending, updated)
            .await
            .expect("write fields");

        let found = repo.find_by_id(&request.id).await.expect("find").expect("exists");
        let fields = found.extracted_fields.expect("fields present");
        assert_eq!(fields["vendor"], "Acme Supplies");
    }

    #[tokio::test]
    async fn list_visible_scopes_by_role_and_orders_newest_first() {
        let repo = setup().await;

        let mut own = sample("alice");
        own.created_at = Utc::now() - Duration::minutes(10);
        let mut other_pending = sample("bob");
        other_pending.created_at = Utc::now() - Duration::minutes(5);
        let mut other_l1 = sample("bob");
        other_l1.status = RequestStatus::ApprovedL1;
        other_l1.created_at = Utc::now();

        for request in [own.clone(), other_pending.clone(), other_l1.clone()] {
            repo.insert(request).await.expect("insert");
        }

        let alice = Actor { username: "alice".to_string(), role: Role::Staff };
        let visible = repo.list_visible(&alice).await.expect("staff list");
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, own.id);

        let manager = Actor { username: "meg".to_string(), role: Role::Manager };
        let visible = repo.list_visible(&manager).await.expect("manager list");
        assert_eq!(visible.len(), 2, "both pending requests await L1");
        assert_eq!(visible[0].id, other_pending.id, "newest first");
        assert_eq!(visible[1].id, own.id);

        let director = Actor { username: "dana".to_string(), role: Role::Director };
        let visible = repo.list_visible(&director).await.expect("director list");
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, other_l1.id);
    }
}
