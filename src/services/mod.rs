//! Business logic services.
//!
//! The claim arbiter owns every review request transition; the notifier
//! announces committed transitions; the remaining modules expose both over
//! HTTP.

pub mod api;
pub mod auth;
pub mod claim_arbiter;
pub mod mailer;
pub mod notification_sink;
pub mod notifier;
pub mod server;
pub mod visibility;

pub use claim_arbiter::{ClaimArbiter, ResolveInput, ResolveOutcome};
pub use notifier::Notifier;
pub use server::{build_router, start_server, AppState, ServerHandle};
