//! Database queries for in-app notifications.

use crate::db::pool::DbPool;
use crate::models::Notification;

/// Insert a notification unless one already exists for (user, link).
///
/// The existence check skips the write for the common retry case; the
/// `UNIQUE(user_id, link)` constraint settles two inserts racing past it.
///
/// # Returns
/// `true` if a row was inserted, `false` if it already existed
pub async fn insert_if_absent(
    pool: &DbPool,
    user_id: &str,
    message: &str,
    link: &str,
) -> Result<bool, sqlx::Error> {
    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM notifications WHERE user_id = ? AND link = ?")
            .bind(user_id)
            .bind(link)
            .fetch_optional(pool)
            .await?;

    if existing.is_some() {
        return Ok(false);
    }

    let result = sqlx::query(
        r#"
        INSERT INTO notifications (user_id, message, link, is_read, created_at)
        VALUES (?, ?, ?, 0, ?)
        ON CONFLICT(user_id, link) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(message)
    .bind(link)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// List a user's notifications, newest first.
pub async fn list_for_user(
    pool: &DbPool,
    user_id: &str,
) -> Result<Vec<Notification>, sqlx::Error> {
    sqlx::query_as::<_, Notification>(
        r#"
        SELECT id, user_id, message, link, is_read, created_at
        FROM notifications
        WHERE user_id = ?
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Count notifications for (user, link).
pub async fn count_for_link(pool: &DbPool, user_id: &str, link: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND link = ?")
        .bind(user_id)
        .bind(link)
        .fetch_one(pool)
        .await
}

/// Mark a notification read. Only the recipient's own rows match.
///
/// # Returns
/// `true` if the notification exists and belongs to `user_id`
pub async fn mark_read(pool: &DbPool, notification_id: i64, user_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?")
        .bind(notification_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}
