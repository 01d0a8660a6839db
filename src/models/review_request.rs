//! Review request model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle status of a review request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    /// In the open pool; any eligible reviewer may claim it.
    Open,
    /// A claim awaits the requester's decision.
    Pending,
    /// A reviewer is bound to the request.
    Claimed,
    /// Terminal.
    Closed,
}

impl RequestStatus {
    /// Column value as stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Pending => "PENDING",
            Self::Claimed => "CLAIMED",
            Self::Closed => "CLOSED",
        }
    }
}

impl From<&str> for RequestStatus {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "OPEN" => Self::Open,
            "PENDING" => Self::Pending,
            "CLAIMED" => Self::Claimed,
            // Unknown values are treated as terminal so nothing can act on them
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requester decision on an outstanding claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Bind the pending reviewer to the request.
    Approve,
    /// Decline the claim; the request returns to the pool.
    Reject,
    /// Withdraw the claim; the request returns to the pool.
    Cancel,
}

impl Resolution {
    /// Status the request holds after this resolution commits.
    pub fn target_status(&self) -> RequestStatus {
        match self {
            Self::Approve => RequestStatus::Claimed,
            Self::Reject | Self::Cancel => RequestStatus::Open,
        }
    }

    /// Past-tense label used in links, audit rows and messages.
    pub fn past_tense(&self) -> &'static str {
        match self {
            Self::Approve => "approved",
            Self::Reject => "rejected",
            Self::Cancel => "cancelled",
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::Reject => write!(f, "reject"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

/// A unit of reviewable work posted by a requester.
///
/// `questions` is stored as a JSON array string in SQLite.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReviewRequest {
    /// Opaque unique id (UUID v4).
    pub id: String,

    /// Owner; immutable after creation.
    pub requester_id: String,

    /// Reviewer bound by an approved claim.
    pub reviewer_id: Option<String>,

    /// Reviewer holding an unresolved claim.
    pub pending_reviewer_id: Option<String>,

    /// `OPEN`, `PENDING`, `CLAIMED` or `CLOSED`.
    pub status: String,

    /// Number of claims made so far; scopes resolution notification links.
    pub claim_seq: i64,

    pub tier: String,

    /// Cost in points.
    pub cost: i64,

    pub external_link: String,

    /// JSON array of questions for the reviewer.
    pub questions: String,

    pub is_deleted: bool,

    /// Creation timestamp (Unix).
    pub created_at: i64,

    /// Last transition timestamp (Unix).
    pub updated_at: i64,
}

impl ReviewRequest {
    /// Parse the status string into an enum.
    pub fn status_enum(&self) -> RequestStatus {
        RequestStatus::from(self.status.as_str())
    }

    /// Parse questions from JSON string.
    pub fn questions_vec(&self) -> Vec<String> {
        serde_json::from_str(&self.questions).unwrap_or_default()
    }

    /// Whether `user_id` created this request.
    pub fn is_requester(&self, user_id: &str) -> bool {
        self.requester_id == user_id
    }

    /// Whether `user_id` holds the outstanding claim.
    pub fn is_pending_reviewer(&self, user_id: &str) -> bool {
        self.pending_reviewer_id.as_deref() == Some(user_id)
    }

    /// Whether `user_id` is the bound reviewer.
    pub fn is_reviewer(&self, user_id: &str) -> bool {
        self.reviewer_id.as_deref() == Some(user_id)
    }

    /// Check the reviewer/status invariants of the stored record.
    pub fn is_consistent(&self) -> bool {
        let status = self.status_enum();
        let pending_ok = self.pending_reviewer_id.is_some() == (status == RequestStatus::Pending);
        let reviewer_ok = match status {
            RequestStatus::Claimed => self.reviewer_id.is_some(),
            RequestStatus::Closed => true,
            RequestStatus::Open | RequestStatus::Pending => self.reviewer_id.is_none(),
        };
        pending_ok && reviewer_ok
    }
}

/// Input for posting a new review request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReviewRequest {
    pub tier: String,
    #[serde(default)]
    pub cost: i64,
    pub external_link: String,
    #[serde(default)]
    pub questions: Vec<String>,
}

/// Review request as returned to API callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequestView {
    pub id: String,
    pub requester_id: String,
    pub reviewer_id: Option<String>,
    pub pending_reviewer_id: Option<String>,
    pub status: RequestStatus,
    pub tier: String,
    pub cost: i64,
    pub external_link: String,
    pub questions: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<ReviewRequest> for ReviewRequestView {
    fn from(req: ReviewRequest) -> Self {
        let status = req.status_enum();
        let questions = req.questions_vec();
        Self {
            id: req.id,
            requester_id: req.requester_id,
            reviewer_id: req.reviewer_id,
            pending_reviewer_id: req.pending_reviewer_id,
            status,
            tier: req.tier,
            cost: req.cost,
            external_link: req.external_link,
            questions,
            created_at: req.created_at,
            updated_at: req.updated_at,
        }
    }
}
