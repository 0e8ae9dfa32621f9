//! PostgreSQL user store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::user::{NewUser, User},
};

use super::UserStore;

const USER_COLUMNS: &str = "id, name, email, password, role, mailing, \
    refresh_token, refresh_token_expires_at, created_at";

#[derive(Clone)]
pub struct PgUserStore {
    pool: Pool<Postgres>,
}

impl PgUserStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(&self, predicate: &str, value: &str) -> AppResult<Option<User>> {
        let query = format!("SELECT {} FROM users WHERE {} = $1", USER_COLUMNS, predicate);
        let user = sqlx::query_as::<_, User>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: &NewUser) -> AppResult<User> {
        let query = format!(
            r#"
            INSERT INTO users (name, email, password, role, mailing)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&query)
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.role)
            .bind(user.mailing)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    AppError::Conflict("Email is already registered".to_string())
                }
                e => AppError::Database(e),
            })
    }

    async fn get_by_id(&self, id: i32) -> AppResult<Option<User>> {
        let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_by_email(&self, email: &str) -> AppResult<Option<User>> {
        self.fetch_one_where("email", email).await
    }

    async fn get_by_refresh_token(&self, token: &str) -> AppResult<Option<User>> {
        self.fetch_one_where("refresh_token", token).await
    }

    async fn start_session(
        &self,
        user_id: i32,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET refresh_token = $2, refresh_token_expires_at = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        user_id: i32,
        current: &str,
        next: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET refresh_token = $3, refresh_token_expires_at = $4, updated_at = NOW()
            WHERE id = $1 AND refresh_token = $2
            "#,
        )
        .bind(user_id)
        .bind(current)
        .bind(next)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn clear_refresh_token(&self, token: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET refresh_token = NULL, refresh_token_expires_at = NULL, updated_at = NOW()
            WHERE refresh_token = $1
            "#,
        )
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_mailing(&self, user_id: i32, mailing: bool) -> AppResult<Option<User>> {
        let query = format!(
            "UPDATE users SET mailing = $2, updated_at = NOW() \
             WHERE id = $1 AND mailing IS DISTINCT FROM $2 RETURNING {}",
            USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(user_id)
            .bind(mailing)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn mailing_subscribers(&self) -> AppResult<Vec<String>> {
        let emails = sqlx::query_scalar::<_, String>(
            "SELECT email FROM users WHERE mailing = TRUE ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(emails)
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
