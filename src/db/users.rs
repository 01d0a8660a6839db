//! Database queries for users and sessions.
//!
//! Accounts and sessions are issued by the surrounding application; this
//! service only reads them, apart from the upsert helpers used to seed a
//! deployment or a test database.

use crate::db::pool::DbPool;
use crate::models::User;

/// Get a user by ID.
pub async fn get_user(pool: &DbPool, user_id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT id, name, email FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Insert or update a user record.
pub async fn upsert_user(pool: &DbPool, user: &User) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO users (id, name, email) VALUES (?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET name = excluded.name, email = excluded.email
        "#,
    )
    .bind(&user.id)
    .bind(&user.name)
    .bind(&user.email)
    .execute(pool)
    .await?;

    Ok(())
}

/// Register a session token for a user.
///
/// # Arguments
/// * `expires_at` - Unix timestamp after which the token is rejected; `None` never expires
pub async fn insert_session(
    pool: &DbPool,
    token: &str,
    user_id: &str,
    expires_at: Option<i64>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES (?, ?, ?)")
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(())
}

/// Resolve a session token to its user ID.
///
/// Returns `None` for unknown or expired tokens.
pub async fn resolve_session(
    pool: &DbPool,
    token: &str,
    now: i64,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT user_id FROM sessions WHERE token = ? AND (expires_at IS NULL OR expires_at > ?)",
    )
    .bind(token)
    .bind(now)
    .fetch_optional(pool)
    .await
}
