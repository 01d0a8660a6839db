//! In-app notification model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One-way message addressed to a user, deduplicated per (user, link).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,

    /// Recipient user ID.
    pub user_id: String,

    pub message: String,

    /// Semantic link; unique per recipient.
    pub link: String,

    pub is_read: bool,

    /// Creation timestamp (Unix).
    pub created_at: i64,
}
