//! User database operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{is_unique_violation, PgStore, StoreError, UserStore};
use crate::auth::lockout::LockoutState;
use crate::auth::model::User;
use crate::config::LockoutConfig;

const USER_COLUMNS: &str = "id, username, email, password_hash, role, refresh_token, \
     refresh_token_expires_at, failed_login_attempts, lockout_end, created_at";

#[async_trait]
impl UserStore for PgStore {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {} FROM users WHERE username = $1", USER_COLUMNS);
        Ok(sqlx::query_as::<_, User>(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_refresh_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {} FROM users WHERE refresh_token = $1", USER_COLUMNS);
        Ok(sqlx::query_as::<_, User>(&query)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn username_exists(&self, username: &str) -> Result<bool, StoreError> {
        Ok(
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
                .bind(username)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        Ok(
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
                .bind(email)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, role, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.role)
        .bind(user.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict(e.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_lockout(&self, user_id: Uuid, state: &LockoutState) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE users SET failed_login_attempts = $2, lockout_end = $3 WHERE id = $1",
        )
        .bind(user_id)
        .bind(state.failed_attempts)
        .bind(state.lockout_end)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failed_login(
        &self,
        user_id: Uuid,
        policy: &LockoutConfig,
        now: DateTime<Utc>,
    ) -> Result<LockoutState, StoreError> {
        // Mirrors LockoutState::record_failure; every right-hand side reads the old row.
        let (failed_attempts, lockout_end): (i32, Option<DateTime<Utc>>) = sqlx::query_as(
            r#"
            UPDATE users SET
                failed_login_attempts = CASE
                    WHEN lockout_end IS NOT NULL AND lockout_end <= $2 THEN 1
                    ELSE failed_login_attempts + 1
                END,
                lockout_end = CASE
                    WHEN lockout_end > $2 THEN lockout_end
                    WHEN lockout_end IS NOT NULL THEN CASE WHEN 1 >= $3 THEN $4 ELSE NULL END
                    WHEN failed_login_attempts + 1 >= $3 THEN $4
                    ELSE NULL
                END
            WHERE id = $1
            RETURNING failed_login_attempts, lockout_end
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(policy.threshold)
        .bind(now + policy.duration)
        .fetch_one(&self.pool)
        .await?;

        Ok(LockoutState {
            failed_attempts,
            lockout_end,
        })
    }

    async fn save_refresh_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE users SET refresh_token = $2, refresh_token_expires_at = $3 WHERE id = $1",
        )
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
