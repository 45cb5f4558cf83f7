//! Postgres implementation of UserRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{Role, User};
use crate::ports::{RepositoryError, RepositoryResult, UserRepository};

const USER_COLUMNS: &str = "id, email, name, photo_url, role, is_fraud, created_at, updated_at";

#[derive(Clone)]
pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn upsert(&self, user: &User) -> RepositoryResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, email, name, photo_url, role, is_fraud, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                name = EXCLUDED.name,
                photo_url = COALESCE(EXCLUDED.photo_url, users.photo_url),
                updated_at = NOW()
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.photo_url)
        .bind(user.role.as_str())
        .bind(user.is_fraud)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await?;

        row.into_domain()
    }

    async fn get_by_id(&self, id: &str) -> RepositoryResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| RepositoryError::user_not_found(id))?
            .into_domain()
    }

    async fn list(&self) -> RepositoryResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users ORDER BY created_at DESC",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UserRow::into_domain).collect()
    }

    async fn set_role(&self, id: &str, role: Role) -> RepositoryResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| RepositoryError::user_not_found(id))?
            .into_domain()
    }

    async fn set_fraud(&self, id: &str, is_fraud: bool) -> RepositoryResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET is_fraud = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(id)
        .bind(is_fraud)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| RepositoryError::user_not_found(id))?
            .into_domain()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    name: String,
    photo_url: Option<String>,
    role: String,
    is_fraud: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_domain(self) -> RepositoryResult<User> {
        Ok(User {
            id: self.id,
            email: self.email,
            name: self.name,
            photo_url: self.photo_url,
            role: self.role.parse::<Role>()?,
            is_fraud: self.is_fraud,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
