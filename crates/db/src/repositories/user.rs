use chrono::{DateTime, Utc};
use sqlx::Row;

use procura_core::Role;

use super::{UserRepository, UserRepositoryError};
use crate::DbPool;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserAccount {
    pub username: String,
    pub password_digest: String,
    pub salt: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> Result<UserAccount, UserRepositoryError> {
    let username: String =
        row.try_get("username").map_err(|e| UserRepositoryError::Decode(e.to_string()))?;
    let password_digest: String =
        row.try_get("password_digest").map_err(|e| UserRepositoryError::Decode(e.to_string()))?;
    let salt: String =
        row.try_get("salt").map_err(|e| UserRepositoryError::Decode(e.to_string()))?;
    let role_str: String =
        row.try_get("role").map_err(|e| UserRepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| UserRepositoryError::Decode(e.to_string()))?;

    let role = role_str.parse::<Role>().map_err(UserRepositoryError::Decode)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| UserRepositoryError::Decode(e.to_string()))?;

    Ok(UserAccount { username, password_digest, salt, role, created_at })
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn insert(&self, account: UserAccount) -> Result<(), UserRepositoryError> {
        let result = sqlx::query(
            "INSERT INTO user_account (username, password_digest, salt, role, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&account.username)
        .bind(&account.password_digest)
        .bind(&account.salt)
        .bind(account.role.as_str())
        .bind(account.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                Err(UserRepositoryError::UsernameTaken(account.username))
            }
            Err(error) => Err(UserRepositoryError::Database(error)),
        }
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserAccount>, UserRepositoryError> {
        let row = sqlx::query(
            "SELECT username, password_digest, salt, role, created_at
             FROM user_account WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref row) => Ok(Some(row_to_account(row)?)),
            None => Ok(None),
        }
    }
}
