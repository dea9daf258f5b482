use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::{ImagesLimit, PlanTier, User};

const USER_COLUMNS: &str =
    "id, name, email, password_hash, subscription_plan, images_processed, images_limit, created_at";

/// A `users` row as Postgres stores it. `images_limit` uses `-1` for unlimited.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub subscription_plan: String,
    pub images_processed: i32,
    pub images_limit: i32,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self> {
        let plan: PlanTier = row
            .subscription_plan
            .parse()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("user {}: {}", row.id, e)))?;
        let images_limit = ImagesLimit::try_from(i64::from(row.images_limit))
            .map_err(|e| AppError::Internal(anyhow::anyhow!("user {}: {}", row.id, e)))?;
        let images_processed = u32::try_from(row.images_processed)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("user {}: negative usage", row.id)))?;

        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            plan,
            images_processed,
            images_limit,
            created_at: row.created_at,
        })
    }
}

pub fn limit_column(limit: ImagesLimit) -> Result<i32> {
    i32::try_from(i64::from(limit))
        .map_err(|_| AppError::Validation(format!("images limit {} does not fit the account store", limit)))
}

pub fn usage_column(processed: u32) -> Result<i32> {
    i32::try_from(processed)
        .map_err(|_| AppError::Validation(format!("usage {} does not fit the account store", processed)))
}

pub struct UserQueries;

impl UserQueries {
    pub async fn create_user(pool: &PgPool, user: &User) -> Result<User> {
        let sql = format!(
            r#"
            INSERT INTO users (id, name, email, password_hash, subscription_plan, images_processed, images_limit, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user.id)
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.plan.as_str())
            .bind(usage_column(user.images_processed)?)
            .bind(limit_column(user.images_limit)?)
            .bind(user.created_at)
            .fetch_one(pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    AppError::Validation("An account with this email already exists".to_string())
                }
                other => AppError::Database(other),
            })?;

        row.try_into()
    }

    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(pool)
            .await?;

        row.map(User::try_from).transpose()
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?;

        row.map(User::try_from).transpose()
    }

    /// Writes plan, limit and usage. Last writer wins.
    pub async fn update_subscription(pool: &PgPool, user: &User) -> Result<User> {
        let sql = format!(
            r#"
            UPDATE users
            SET subscription_plan = $2, images_processed = $3, images_limit = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user.id)
            .bind(user.plan.as_str())
            .bind(usage_column(user.images_processed)?)
            .bind(limit_column(user.images_limit)?)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::Auth("account no longer exists".to_string()))?;

        row.try_into()
    }

    /// Writes name and email only. A taken email is a conflict.
    pub async fn update_profile(pool: &PgPool, id: Uuid, name: &str, email: &str) -> Result<User> {
        let sql = format!(
            r#"
            UPDATE users
            SET name = $2, email = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(name)
            .bind(email)
            .fetch_optional(pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    AppError::Conflict("Email is already in use".to_string())
                }
                other => AppError::Database(other),
            })?
            .ok_or_else(|| AppError::Auth("account no longer exists".to_string()))?;

        row.try_into()
    }
}
