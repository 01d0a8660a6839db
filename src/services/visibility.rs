//! Read-side access rules for review requests.
//!
//! A single request, and its audit trail, is visible to its requester and
//! to whoever is bound or pending as reviewer. Soft-deleted requests are
//! invisible to everyone.

use crate::db::pool::DbPool;
use crate::db::review_requests;
use crate::error::AppError;
use crate::models::{RequestEvent, ReviewRequest};

/// Whether `user_id` participates in `request`.
pub fn can_view(request: &ReviewRequest, user_id: &str) -> bool {
    !request.is_deleted
        && (request.is_requester(user_id)
            || request.is_reviewer(user_id)
            || request.is_pending_reviewer(user_id))
}

/// Fetch a request for display to `caller_id`.
///
/// # Errors
/// * `NotFound` - request missing or soft-deleted
/// * `Forbidden` - the caller does not participate in the request
pub async fn get_visible_request(
    db: &DbPool,
    request_id: &str,
    caller_id: &str,
) -> Result<ReviewRequest, AppError> {
    let request = review_requests::get_request(db, request_id)
        .await?
        .ok_or_else(|| AppError::not_found_with_id("ReviewRequest", request_id))?;

    if !can_view(&request, caller_id) {
        log::debug!("[visibility] {} may not view {}", caller_id, request_id);
        return Err(AppError::forbidden(
            "You do not have access to this request",
        ));
    }

    Ok(request)
}

/// Requests `caller_id` may claim: open, live and not their own.
pub async fn open_pool(db: &DbPool, caller_id: &str) -> Result<Vec<ReviewRequest>, AppError> {
    review_requests::list_open_pool(db, caller_id).await
}

/// Requests `caller_id` created or reviews.
pub async fn my_requests(db: &DbPool, caller_id: &str) -> Result<Vec<ReviewRequest>, AppError> {
    review_requests::list_for_participant(db, caller_id).await
}

/// Audit trail of a request, under the same rule as [`get_visible_request`].
pub async fn request_events(
    db: &DbPool,
    request_id: &str,
    caller_id: &str,
) -> Result<Vec<RequestEvent>, AppError> {
    get_visible_request(db, request_id, caller_id).await?;
    review_requests::list_events(db, request_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::users;
    use crate::models::{NewReviewRequest, User};
    use tempfile::tempdir;

    async fn setup() -> (tempfile::TempDir, DbPool) {
        let dir = tempdir().unwrap();
        let db = crate::db::initialize(&dir.path().join("test.db"))
            .await
            .unwrap();
        for id in ["alice", "bob", "carol"] {
            users::upsert_user(
                &db,
                &User {
                    id: id.to_string(),
                    name: id.to_string(),
                    email: format!("{}@example.com", id),
                },
            )
            .await
            .unwrap();
        }
        (dir, db)
    }

    async fn post(db: &DbPool, requester: &str) -> ReviewRequest {
        review_requests::insert_request(
            db,
            requester,
            &NewReviewRequest {
                tier: "basic".to_string(),
                cost: 5,
                external_link: "https://example.com/a".to_string(),
                questions: vec!["Is the intro clear?".to_string()],
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_participants_can_view() {
        let (_dir, db) = setup().await;
        let request = post(&db, "alice").await;
        review_requests::try_claim(&db, &request.id, "bob")
            .await
            .unwrap()
            .unwrap();

        assert!(get_visible_request(&db, &request.id, "alice").await.is_ok());
        assert!(get_visible_request(&db, &request.id, "bob").await.is_ok());

        let err = get_visible_request(&db, &request.id, "carol")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_missing_request_is_not_found() {
        let (_dir, db) = setup().await;
        let err = get_visible_request(&db, "nope", "alice").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_withdrawn_request_is_not_found_even_for_requester() {
        let (_dir, db) = setup().await;
        let request = post(&db, "alice").await;
        review_requests::try_withdraw(&db, &request.id, "alice")
            .await
            .unwrap()
            .unwrap();

        let err = get_visible_request(&db, &request.id, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
        assert!(open_pool(&db, "bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_pool_excludes_own_requests() {
        let (_dir, db) = setup().await;
        let mine = post(&db, "alice").await;
        let theirs = post(&db, "bob").await;

        let pool = open_pool(&db, "alice").await.unwrap();
        let ids: Vec<_> = pool.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![theirs.id.as_str()]);
        assert!(!ids.contains(&mine.id.as_str()));
    }

    #[tokio::test]
    async fn test_events_follow_visibility() {
        let (_dir, db) = setup().await;
        let request = post(&db, "alice").await;

        let events = request_events(&db, &request.id, "alice").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "created");

        assert!(request_events(&db, &request.id, "carol").await.is_err());
    }

    #[tokio::test]
    async fn test_my_requests_includes_pending_reviewer() {
        let (_dir, db) = setup().await;
        let request = post(&db, "alice").await;
        review_requests::try_claim(&db, &request.id, "bob")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(my_requests(&db, "bob").await.unwrap().len(), 1);
        assert!(my_requests(&db, "carol").await.unwrap().is_empty());
    }
}
