//! Data models for the application.
//!
//! These models represent the entities stored in the SQLite request store
//! and the shapes returned over the HTTP API.
//!
//! Stored models derive FromRow for SQLx queries.

pub mod notification;
pub mod request_event;
pub mod review_request;
pub mod user;

// Re-exports for convenient access
pub use notification::Notification;
pub use request_event::{EventKind, RequestEvent};
pub use review_request::{
    NewReviewRequest, RequestStatus, Resolution, ReviewRequest, ReviewRequestView,
};
pub use user::User;
