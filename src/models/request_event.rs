//! Audit trail of committed review request transitions.

use super::review_request::Resolution;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Kind of committed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Claimed,
    Approved,
    Rejected,
    Cancelled,
    Withdrawn,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Claimed => "claimed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Withdrawn => "withdrawn",
        }
    }
}

impl From<Resolution> for EventKind {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Approve => Self::Approved,
            Resolution::Reject => Self::Rejected,
            Resolution::Cancel => Self::Cancelled,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One committed transition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    pub id: i64,
    pub request_id: String,

    /// User whose call produced the transition.
    pub actor_id: String,

    /// `created`, `claimed`, `approved`, `rejected`, `cancelled`, `withdrawn`.
    pub kind: String,

    /// Reviewer the transition concerned, if any.
    pub reviewer_id: Option<String>,

    /// Commit timestamp (Unix).
    pub created_at: i64,
}
