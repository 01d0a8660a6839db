//! Claim arbiter: the review request state machine.
//!
//! ```text
//! OPEN ──claim()──> PENDING ──approve()──> CLAIMED
//!  ^                   │
//!  └───reject()────────┤
//!  └───cancel()────────┘
//! OPEN ──withdraw()──> CLOSED (soft-deleted)
//! ```
//!
//! Each operation checks the immutable facts (existence, who owns the
//! request), then performs exactly one guarded conditional write. A claim
//! is provisional and announces nothing; only resolutions notify. Whether
//! the transition happened is decided by that write alone: a guard that
//! matches no row is reported as `InvalidState`, never retried and never
//! turned into a success. Side effects are dispatched only after the write
//! has committed.

use crate::db::pool::DbPool;
use crate::db::{review_requests, users};
use crate::error::AppError;
use crate::models::{NewReviewRequest, RequestStatus, Resolution, ReviewRequest, User};
use crate::services::notifier::{Notifier, Transition};
use serde::Deserialize;
use std::sync::Arc;

/// A requester's decision on an outstanding claim.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveInput {
    pub request_id: String,
    /// Must equal the caller and the stored requester.
    pub requester_id: String,
    /// Must equal the stored pending reviewer.
    pub reviewer_id: String,
    pub decision: Resolution,
}

/// Result of a successful resolution.
#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    /// Request state as committed.
    pub request: ReviewRequest,
    /// Whether the reviewer e-mail went out. `false` for cancellations,
    /// which are not mailed.
    pub email_sent: bool,
}

/// Governs the review request lifecycle.
#[derive(Clone)]
pub struct ClaimArbiter {
    db: DbPool,
    notifier: Arc<Notifier>,
}

impl ClaimArbiter {
    pub fn new(db: DbPool, notifier: Arc<Notifier>) -> Self {
        Self { db, notifier }
    }

    /// Post a new request in `OPEN`.
    pub async fn create_request(
        &self,
        requester_id: &str,
        input: NewReviewRequest,
    ) -> Result<ReviewRequest, AppError> {
        if input.tier.trim().is_empty() {
            return Err(AppError::invalid_input_field("Tier is required", "tier"));
        }
        if input.external_link.trim().is_empty() {
            return Err(AppError::invalid_input_field(
                "External link is required",
                "externalLink",
            ));
        }
        if input.cost < 0 {
            return Err(AppError::invalid_input_field(
                "Cost cannot be negative",
                "cost",
            ));
        }

        self.require_user(requester_id).await?;

        let request = review_requests::insert_request(&self.db, requester_id, &input).await?;
        log::info!("[arbiter] Request {} posted by {}", request.id, requester_id);
        Ok(request)
    }

    /// Claim an open request for `reviewer_id`.
    ///
    /// # Errors
    /// * `NotFound` - request missing or soft-deleted, or unknown reviewer
    /// * `Forbidden` - the reviewer is the requester
    /// * `InvalidState` - the request is no longer `OPEN` (including a lost race)
    pub async fn claim(&self, request_id: &str, reviewer_id: &str) -> Result<ReviewRequest, AppError> {
        let current = self.load_live(request_id).await?;
        if current.is_requester(reviewer_id) {
            return Err(AppError::forbidden("You cannot claim your own request"));
        }
        self.require_user(reviewer_id).await?;

        let Some(claimed) = review_requests::try_claim(&self.db, request_id, reviewer_id).await?
        else {
            return Err(self.classify_claim_miss(request_id).await?);
        };

        log::info!(
            "[arbiter] Request {} claimed by {} (claim #{})",
            request_id,
            reviewer_id,
            claimed.claim_seq
        );

        Ok(claimed)
    }

    /// Resolve an outstanding claim on behalf of `caller_id`.
    ///
    /// # Errors
    /// * `Forbidden` - the caller is not the payload requester or not the stored requester
    /// * `NotFound` - request missing or soft-deleted
    /// * `InvalidState` - no matching `PENDING` claim (stale, superseded or already resolved)
    pub async fn resolve(
        &self,
        caller_id: &str,
        input: &ResolveInput,
    ) -> Result<ResolveOutcome, AppError> {
        if input.requester_id != caller_id {
            return Err(AppError::forbidden(
                "Only the requester can resolve a claim",
            ));
        }

        let current = self.load_live(&input.request_id).await?;
        if !current.is_requester(caller_id) {
            return Err(AppError::forbidden(
                "Only the requester can resolve a claim",
            ));
        }

        let Some(resolved) = review_requests::try_resolve(
            &self.db,
            &input.request_id,
            caller_id,
            &input.reviewer_id,
            input.decision,
        )
        .await?
        else {
            return Err(self.classify_resolve_miss(&input.request_id).await?);
        };

        log::info!(
            "[arbiter] Claim #{} on {} by {} {}",
            resolved.claim_seq,
            input.request_id,
            input.reviewer_id,
            input.decision.past_tense()
        );

        let email_sent = self
            .announce_resolution(&resolved, &input.reviewer_id, input.decision)
            .await;

        Ok(ResolveOutcome {
            request: resolved,
            email_sent,
        })
    }

    /// Approve `reviewer_id`'s claim; `caller_id` acts as requester.
    pub async fn approve(
        &self,
        request_id: &str,
        caller_id: &str,
        reviewer_id: &str,
    ) -> Result<ResolveOutcome, AppError> {
        self.resolve(
            caller_id,
            &ResolveInput {
                request_id: request_id.to_string(),
                requester_id: caller_id.to_string(),
                reviewer_id: reviewer_id.to_string(),
                decision: Resolution::Approve,
            },
        )
        .await
    }

    /// Reject `reviewer_id`'s claim; the request returns to the pool.
    pub async fn reject(
        &self,
        request_id: &str,
        caller_id: &str,
        reviewer_id: &str,
    ) -> Result<ResolveOutcome, AppError> {
        self.resolve(
            caller_id,
            &ResolveInput {
                request_id: request_id.to_string(),
                requester_id: caller_id.to_string(),
                reviewer_id: reviewer_id.to_string(),
                decision: Resolution::Reject,
            },
        )
        .await
    }

    /// Cancel `reviewer_id`'s claim; the request returns to the pool.
    pub async fn cancel(
        &self,
        request_id: &str,
        caller_id: &str,
        reviewer_id: &str,
    ) -> Result<ReviewRequest, AppError> {
        self.resolve(
            caller_id,
            &ResolveInput {
                request_id: request_id.to_string(),
                requester_id: caller_id.to_string(),
                reviewer_id: reviewer_id.to_string(),
                decision: Resolution::Cancel,
            },
        )
        .await
        .map(|outcome| outcome.request)
    }

    /// Withdraw an unclaimed request. Requester only.
    pub async fn withdraw(&self, request_id: &str, caller_id: &str) -> Result<ReviewRequest, AppError> {
        let current = self.load_live(request_id).await?;
        if !current.is_requester(caller_id) {
            return Err(AppError::forbidden(
                "Only the requester can withdraw a request",
            ));
        }

        match review_requests::try_withdraw(&self.db, request_id, caller_id).await? {
            Some(withdrawn) => {
                log::info!("[arbiter] Request {} withdrawn", request_id);
                Ok(withdrawn)
            }
            None => match review_requests::get_request(&self.db, request_id).await? {
                None => Err(AppError::not_found_with_id("ReviewRequest", request_id)),
                Some(_) => Err(AppError::invalid_state_for(
                    "Only an unclaimed request can be withdrawn",
                    request_id,
                )),
            },
        }
    }

    /// Notify the reviewer of a committed resolution.
    ///
    /// # Returns
    /// Whether the e-mail went out
    async fn announce_resolution(
        &self,
        resolved: &ReviewRequest,
        reviewer_id: &str,
        decision: Resolution,
    ) -> bool {
        let (requester, reviewer) = match self.participants(&resolved.requester_id, reviewer_id).await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!(
                    "[arbiter] Could not load participants of {}; skipping notification: {}",
                    resolved.id,
                    e
                );
                return false;
            }
        };

        let report = self
            .notifier
            .dispatch(&Transition {
                resolution: decision,
                request: resolved,
                requester: &requester,
                reviewer: &reviewer,
            })
            .await;

        report.email_sent.unwrap_or(false)
    }

    async fn participants(&self, requester_id: &str, reviewer_id: &str) -> Result<(User, User), AppError> {
        let requester = self.require_user(requester_id).await?;
        let reviewer = self.require_user(reviewer_id).await?;
        Ok((requester, reviewer))
    }

    async fn load_live(&self, request_id: &str) -> Result<ReviewRequest, AppError> {
        review_requests::get_request(&self.db, request_id)
            .await?
            .ok_or_else(|| AppError::not_found_with_id("ReviewRequest", request_id))
    }

    async fn require_user(&self, user_id: &str) -> Result<User, AppError> {
        users::get_user(&self.db, user_id)
            .await?
            .ok_or_else(|| AppError::not_found_with_id("User", user_id))
    }

    /// Explain a claim whose conditional write matched nothing.
    async fn classify_claim_miss(&self, request_id: &str) -> Result<AppError, AppError> {
        let Some(current) = review_requests::get_request(&self.db, request_id).await? else {
            return Ok(AppError::not_found_with_id("ReviewRequest", request_id));
        };

        log::debug!(
            "[arbiter] Claim on {} lost; request is {}",
            request_id,
            current.status
        );

        let message = match current.status_enum() {
            RequestStatus::Pending | RequestStatus::Claimed => "This request was already claimed",
            RequestStatus::Open | RequestStatus::Closed => "This request is no longer open",
        };
        Ok(AppError::invalid_state_for(message, request_id))
    }

    /// Explain a resolution whose conditional write matched nothing.
    async fn classify_resolve_miss(&self, request_id: &str) -> Result<AppError, AppError> {
        if review_requests::get_request(&self.db, request_id)
            .await?
            .is_none()
        {
            return Ok(AppError::not_found_with_id("ReviewRequest", request_id));
        }

        log::debug!("[arbiter] Stale resolution on {}", request_id);
        Ok(AppError::invalid_state_for(
            "This claim is no longer pending",
            request_id,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::notifications;
    use crate::services::mailer::RecordingMailTransport;
    use crate::services::notification_sink::SqliteNotificationSink;
    use std::time::Duration;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        db: DbPool,
        mail: RecordingMailTransport,
        arbiter: ClaimArbiter,
    }

    async fn fixture_with_mail(mail: RecordingMailTransport) -> Fixture {
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

        let notifier = Notifier::new(
            Arc::new(SqliteNotificationSink::new(db.clone())),
            Arc::new(mail.clone()),
            "http://localhost:8080",
            Duration::from_millis(200),
        );

        Fixture {
            _dir: dir,
            arbiter: ClaimArbiter::new(db.clone(), Arc::new(notifier)),
            db,
            mail,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with_mail(RecordingMailTransport::new()).await
    }

    fn new_request() -> NewReviewRequest {
        NewReviewRequest {
            tier: "basic".to_string(),
            cost: 10,
            external_link: "https://example.com/post".to_string(),
            questions: vec![],
        }
    }

    async fn open_request(f: &Fixture) -> ReviewRequest {
        f.arbiter.create_request("alice", new_request()).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let f = fixture().await;

        let mut input = new_request();
        input.external_link = "  ".to_string();
        let err = f.arbiter.create_request("alice", input).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput { .. }));

        let mut input = new_request();
        input.cost = -1;
        assert!(f.arbiter.create_request("alice", input).await.is_err());

        let err = f
            .arbiter
            .create_request("nobody", new_request())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_self_claim_is_forbidden() {
        let f = fixture().await;
        let request = open_request(&f).await;

        let err = f.arbiter.claim(&request.id, "alice").await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_claim_missing_request_is_not_found() {
        let f = fixture().await;
        let err = f.arbiter.claim("missing", "bob").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_second_claim_reports_already_claimed() {
        let f = fixture().await;
        let request = open_request(&f).await;

        let claimed = f.arbiter.claim(&request.id, "bob").await.unwrap();
        assert_eq!(claimed.status_enum(), RequestStatus::Pending);
        assert_eq!(claimed.pending_reviewer_id.as_deref(), Some("bob"));

        let err = f.arbiter.claim(&request.id, "carol").await.unwrap_err();
        match err {
            AppError::InvalidState { message, .. } => {
                assert_eq!(message, "This request was already claimed")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_claim_has_no_side_effects() {
        let f = fixture().await;
        let request = open_request(&f).await;
        f.arbiter.claim(&request.id, "bob").await.unwrap();

        for user in ["alice", "bob", "carol"] {
            let inbox = notifications::list_for_user(&f.db, user).await.unwrap();
            assert!(inbox.is_empty(), "{} was notified of a claim", user);
        }
        assert!(f.mail.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_approve_binds_reviewer_and_mails() {
        let f = fixture().await;
        let request = open_request(&f).await;
        f.arbiter.claim(&request.id, "bob").await.unwrap();

        let outcome = f.arbiter.approve(&request.id, "alice", "bob").await.unwrap();
        assert!(outcome.email_sent);
        assert_eq!(outcome.request.status_enum(), RequestStatus::Claimed);
        assert_eq!(outcome.request.reviewer_id.as_deref(), Some("bob"));
        assert!(outcome.request.pending_reviewer_id.is_none());

        let inbox = notifications::list_for_user(&f.db, "bob").await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(f.mail.attempts_to("bob@example.com").len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_requires_payload_requester_to_be_caller() {
        let f = fixture().await;
        let request = open_request(&f).await;
        f.arbiter.claim(&request.id, "bob").await.unwrap();

        let input = ResolveInput {
            request_id: request.id.clone(),
            requester_id: "alice".to_string(),
            reviewer_id: "bob".to_string(),
            decision: Resolution::Approve,
        };
        let err = f.arbiter.resolve("carol", &input).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));

        // A non-requester naming themselves in the payload is also refused
        let err = f.arbiter.approve(&request.id, "carol", "bob").await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));

        let stored = review_requests::get_request(&f.db, &request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status_enum(), RequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_wrong_reviewer_is_invalid_state() {
        let f = fixture().await;
        let request = open_request(&f).await;
        f.arbiter.claim(&request.id, "bob").await.unwrap();

        let err = f
            .arbiter
            .approve(&request.id, "alice", "carol")
            .await
            .unwrap_err();
        assert!(err.is_invalid_state());
    }

    #[tokio::test]
    async fn test_mail_failure_keeps_transition() {
        let f = fixture_with_mail(RecordingMailTransport::failing(2)).await;
        let request = open_request(&f).await;
        f.arbiter.claim(&request.id, "bob").await.unwrap();

        let outcome = f.arbiter.reject(&request.id, "alice", "bob").await.unwrap();
        assert!(!outcome.email_sent);
        assert_eq!(outcome.request.status_enum(), RequestStatus::Open);
        assert_eq!(f.mail.attempts().len(), 2);

        let stored = review_requests::get_request(&f.db, &request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status_enum(), RequestStatus::Open);
    }

    #[tokio::test]
    async fn test_cancel_returns_to_pool_without_mail() {
        let f = fixture().await;
        let request = open_request(&f).await;
        f.arbiter.claim(&request.id, "bob").await.unwrap();

        let cancelled = f.arbiter.cancel(&request.id, "alice", "bob").await.unwrap();
        assert_eq!(cancelled.status_enum(), RequestStatus::Open);
        assert!(cancelled.pending_reviewer_id.is_none());
        assert!(f.mail.attempts().is_empty());

        let inbox = notifications::list_for_user(&f.db, "bob").await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert!(inbox[0].link.ends_with("event=cancelled"));
    }

    #[tokio::test]
    async fn test_withdraw_rules() {
        let f = fixture().await;
        let request = open_request(&f).await;

        let err = f.arbiter.withdraw(&request.id, "bob").await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));

        f.arbiter.claim(&request.id, "bob").await.unwrap();
        let err = f.arbiter.withdraw(&request.id, "alice").await.unwrap_err();
        assert!(err.is_invalid_state());

        f.arbiter.reject(&request.id, "alice", "bob").await.unwrap();
        f.arbiter.withdraw(&request.id, "alice").await.unwrap();

        let err = f.arbiter.claim(&request.id, "bob").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }
}
