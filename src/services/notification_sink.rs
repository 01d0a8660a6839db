//! In-app notification sink.

use crate::db::notifications;
use crate::db::pool::DbPool;
use crate::error::AppError;
use async_trait::async_trait;

/// Records one-way messages addressed to a user.
///
/// Delivery is at-least-once from the caller's side; implementations
/// dedupe on (recipient, link).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Record a notification.
    ///
    /// # Returns
    /// `true` if newly recorded, `false` if (user, link) already existed
    async fn notify(&self, user_id: &str, message: &str, link: &str) -> Result<bool, AppError>;
}

/// Sink backed by the `notifications` table.
#[derive(Debug, Clone)]
pub struct SqliteNotificationSink {
    db: DbPool,
}

impl SqliteNotificationSink {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NotificationSink for SqliteNotificationSink {
    async fn notify(&self, user_id: &str, message: &str, link: &str) -> Result<bool, AppError> {
        let inserted = notifications::insert_if_absent(&self.db, user_id, message, link).await?;
        if !inserted {
            log::debug!("[notifier] Skipping duplicate notification {} for {}", link, user_id);
        }
        Ok(inserted)
    }
}
