//! Review request store.
//!
//! Every state change is a single conditional `UPDATE ... WHERE <guard>
//! RETURNING` statement. A guard that no longer holds matches zero rows and
//! the function returns `None`; callers never read, check and then write.
//! The audit row for a transition is written in the same transaction as
//! the conditional update, so both commit or neither does.
//!
//! `RETURNING` statements inside a transaction are drained with `fetch_all`
//! so the statement has finished stepping before `COMMIT`.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::{EventKind, NewReviewRequest, RequestEvent, Resolution, ReviewRequest};
use sqlx::{Sqlite, Transaction};

/// Column list shared by every query returning a `ReviewRequest`.
const COLUMNS: &str = "id, requester_id, reviewer_id, pending_reviewer_id, status, claim_seq, \
     tier, cost, external_link, questions, is_deleted, created_at, updated_at";

/// Get the current Unix timestamp.
fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Record a committed transition in the audit trail.
async fn insert_event(
    tx: &mut Transaction<'_, Sqlite>,
    request_id: &str,
    actor_id: &str,
    kind: EventKind,
    reviewer_id: Option<&str>,
    at: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO request_events (request_id, actor_id, kind, reviewer_id, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(request_id)
    .bind(actor_id)
    .bind(kind.as_str())
    .bind(reviewer_id)
    .bind(at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Create a new request in `OPEN`.
///
/// # Arguments
/// * `pool` - Database connection pool
/// * `requester_id` - Owner of the new request
/// * `input` - Display attributes
pub async fn insert_request(
    pool: &DbPool,
    requester_id: &str,
    input: &NewReviewRequest,
) -> Result<ReviewRequest, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let questions = serde_json::to_string(&input.questions)?;
    let created_at = now();

    let mut tx = pool.begin().await?;

    let request = sqlx::query_as::<_, ReviewRequest>(&format!(
        r#"
        INSERT INTO review_requests
            (id, requester_id, status, claim_seq, tier, cost, external_link, questions, is_deleted, created_at, updated_at)
        VALUES (?, ?, 'OPEN', 0, ?, ?, ?, ?, 0, ?, ?)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(&id)
    .bind(requester_id)
    .bind(&input.tier)
    .bind(input.cost)
    .bind(&input.external_link)
    .bind(&questions)
    .bind(created_at)
    .bind(created_at)
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .next()
    .ok_or_else(|| AppError::internal("Insert returned no row"))?;

    insert_event(&mut tx, &id, requester_id, EventKind::Created, None, created_at).await?;
    tx.commit().await?;

    Ok(request)
}

/// Get a live (not soft-deleted) request by ID.
pub async fn get_request(
    pool: &DbPool,
    request_id: &str,
) -> Result<Option<ReviewRequest>, AppError> {
    let request = sqlx::query_as::<_, ReviewRequest>(&format!(
        "SELECT {COLUMNS} FROM review_requests WHERE id = ? AND is_deleted = 0"
    ))
    .bind(request_id)
    .fetch_optional(pool)
    .await?;

    Ok(request)
}

/// Conditionally move a request from `OPEN` to `PENDING` for `reviewer_id`.
///
/// Guard: `status = 'OPEN'`, not deleted, and `reviewer_id` is not the
/// requester. Of several concurrent callers exactly one matches the row.
///
/// # Returns
/// The updated request, or `None` if the guard did not hold
pub async fn try_claim(
    pool: &DbPool,
    request_id: &str,
    reviewer_id: &str,
) -> Result<Option<ReviewRequest>, AppError> {
    let at = now();
    let mut tx = pool.begin().await?;

    let claimed = sqlx::query_as::<_, ReviewRequest>(&format!(
        r#"
        UPDATE review_requests
        SET status = 'PENDING',
            pending_reviewer_id = ?,
            claim_seq = claim_seq + 1,
            updated_at = ?
        WHERE id = ?
          AND status = 'OPEN'
          AND is_deleted = 0
          AND requester_id <> ?
        RETURNING {COLUMNS}
        "#
    ))
    .bind(reviewer_id)
    .bind(at)
    .bind(request_id)
    .bind(reviewer_id)
    .fetch_all(&mut *tx)
    .await?;

    let Some(request) = claimed.into_iter().next() else {
        return Ok(None);
    };

    insert_event(
        &mut tx,
        request_id,
        reviewer_id,
        EventKind::Claimed,
        Some(reviewer_id),
        at,
    )
    .await?;
    tx.commit().await?;

    Ok(Some(request))
}

/// Conditionally resolve an outstanding claim.
///
/// Guard: `status = 'PENDING'`, `pending_reviewer_id = reviewer_id`,
/// `requester_id = requester_id`, not deleted. A second resolution of the
/// same claim matches zero rows.
///
/// # Returns
/// The updated request, or `None` if the guard did not hold
pub async fn try_resolve(
    pool: &DbPool,
    request_id: &str,
    requester_id: &str,
    reviewer_id: &str,
    resolution: Resolution,
) -> Result<Option<ReviewRequest>, AppError> {
    let assignment = match resolution {
        Resolution::Approve => {
            "status = 'CLAIMED', reviewer_id = pending_reviewer_id, pending_reviewer_id = NULL"
        }
        Resolution::Reject | Resolution::Cancel => "status = 'OPEN', pending_reviewer_id = NULL",
    };

    let at = now();
    let mut tx = pool.begin().await?;

    let resolved = sqlx::query_as::<_, ReviewRequest>(&format!(
        r#"
        UPDATE review_requests
        SET {assignment}, updated_at = ?
        WHERE id = ?
          AND requester_id = ?
          AND status = 'PENDING'
          AND pending_reviewer_id = ?
          AND is_deleted = 0
        RETURNING {COLUMNS}
        "#
    ))
    .bind(at)
    .bind(request_id)
    .bind(requester_id)
    .bind(reviewer_id)
    .fetch_all(&mut *tx)
    .await?;

    let Some(request) = resolved.into_iter().next() else {
        return Ok(None);
    };

    insert_event(
        &mut tx,
        request_id,
        requester_id,
        EventKind::from(resolution),
        Some(reviewer_id),
        at,
    )
    .await?;
    tx.commit().await?;

    Ok(Some(request))
}

/// Conditionally withdraw (soft-delete) an unclaimed request.
///
/// Guard: `status = 'OPEN'`, not deleted, owned by `requester_id`.
///
/// # Returns
/// The withdrawn request, or `None` if the guard did not hold
pub async fn try_withdraw(
    pool: &DbPool,
    request_id: &str,
    requester_id: &str,
) -> Result<Option<ReviewRequest>, AppError> {
    let at = now();
    let mut tx = pool.begin().await?;

    let withdrawn = sqlx::query_as::<_, ReviewRequest>(&format!(
        r#"
        UPDATE review_requests
        SET status = 'CLOSED', is_deleted = 1, updated_at = ?
        WHERE id = ?
          AND requester_id = ?
          AND status = 'OPEN'
          AND is_deleted = 0
        RETURNING {COLUMNS}
        "#
    ))
    .bind(at)
    .bind(request_id)
    .bind(requester_id)
    .fetch_all(&mut *tx)
    .await?;

    let Some(request) = withdrawn.into_iter().next() else {
        return Ok(None);
    };

    insert_event(
        &mut tx,
        request_id,
        requester_id,
        EventKind::Withdrawn,
        None,
        at,
    )
    .await?;
    tx.commit().await?;

    Ok(Some(request))
}

/// List claimable requests for `caller_id`, oldest first.
///
/// Excludes soft-deleted requests and the caller's own requests.
pub async fn list_open_pool(
    pool: &DbPool,
    caller_id: &str,
) -> Result<Vec<ReviewRequest>, AppError> {
    let requests = sqlx::query_as::<_, ReviewRequest>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM review_requests
        WHERE status = 'OPEN'
          AND is_deleted = 0
          AND requester_id <> ?
        ORDER BY created_at ASC, id ASC
        "#
    ))
    .bind(caller_id)
    .fetch_all(pool)
    .await?;

    Ok(requests)
}

/// List live requests `user_id` created or reviews, newest first.
pub async fn list_for_participant(
    pool: &DbPool,
    user_id: &str,
) -> Result<Vec<ReviewRequest>, AppError> {
    let requests = sqlx::query_as::<_, ReviewRequest>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM review_requests
        WHERE is_deleted = 0
          AND (requester_id = ? OR reviewer_id = ? OR pending_reviewer_id = ?)
        ORDER BY updated_at DESC, id ASC
        "#
    ))
    .bind(user_id)
    .bind(user_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(requests)
}

/// Get the audit trail of a request, oldest first.
pub async fn list_events(pool: &DbPool, request_id: &str) -> Result<Vec<RequestEvent>, AppError> {
    let events = sqlx::query_as::<_, RequestEvent>(
        r#"
        SELECT id, request_id, actor_id, kind, reviewer_id, created_at
        FROM request_events
        WHERE request_id = ?
        ORDER BY id ASC
        "#,
    )
    .bind(request_id)
    .fetch_all(pool)
    .await?;

    Ok(events)
}
