//! Post-commit side effects of review request transitions.
//!
//! The dispatcher runs only after a transition has committed. Nothing here
//! touches `review_requests`, and every failure is logged and folded into
//! the [`DispatchReport`] rather than returned, so a delivery problem can
//! never undo or repeat a state change.

use crate::error::AppError;
use crate::models::{Resolution, ReviewRequest, User};
use crate::services::mailer::{MailTransport, OutboundEmail};
use crate::services::notification_sink::NotificationSink;
use std::sync::Arc;
use std::time::Duration;

/// A committed resolution with the display fields needed to describe it.
///
/// Only resolutions are announced; a claim stays provisional and silent
/// until the requester decides.
#[derive(Debug, Clone, Copy)]
pub struct Transition<'a> {
    pub resolution: Resolution,
    /// Request state as committed.
    pub request: &'a ReviewRequest,
    pub requester: &'a User,
    pub reviewer: &'a User,
}

/// Outcome of a dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// A new in-app notification was recorded.
    pub notified: bool,
    /// `Some(sent)` when the transition carries an e-mail, `None` otherwise.
    pub email_sent: Option<bool>,
}

/// Composes and delivers notifications and e-mails for transitions.
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
    mail: Arc<dyn MailTransport>,
    base_url: String,
    mail_timeout: Duration,
}

impl Notifier {
    /// Create a dispatcher.
    ///
    /// # Arguments
    /// * `base_url` - Prefix for absolute links in e-mails
    /// * `mail_timeout` - Bound on each e-mail attempt
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        mail: Arc<dyn MailTransport>,
        base_url: impl Into<String>,
        mail_timeout: Duration,
    ) -> Self {
        Self {
            sink,
            mail,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mail_timeout,
        }
    }

    /// Semantic link identifying one announcement.
    ///
    /// Scoped by `claim_seq` so a retried dispatch for the same claim
    /// dedupes while a later claim cycle gets its own notification.
    pub fn link_for(resolution: Resolution, request: &ReviewRequest) -> String {
        format!(
            "/buddy-lens/requests/{}?claim={}&event={}",
            request.id,
            request.claim_seq,
            resolution.past_tense()
        )
    }

    /// Deliver everything appropriate to `transition`.
    pub async fn dispatch(&self, transition: &Transition<'_>) -> DispatchReport {
        let link = Self::link_for(transition.resolution, transition.request);
        let (recipient, message) = compose_message(transition);

        let notified = match self.sink.notify(&recipient.id, &message, &link).await {
            Ok(inserted) => inserted,
            Err(e) => {
                log::warn!(
                    "[notifier] Failed to record notification {} for {}: {}",
                    link,
                    recipient.id,
                    e
                );
                false
            }
        };

        let email_sent = match compose_email(transition, &format!("{}{}", self.base_url, link)) {
            Some(email) => Some(self.deliver_email(&email).await),
            None => None,
        };

        DispatchReport {
            notified,
            email_sent,
        }
    }

    /// Send `email`, retrying once on failure.
    ///
    /// # Returns
    /// Whether either attempt succeeded
    async fn deliver_email(&self, email: &OutboundEmail) -> bool {
        match self.attempt_email(email).await {
            Ok(()) => return true,
            Err(e) => log::warn!("[notifier] E-mail to {} failed, retrying: {}", email.to, e),
        }

        match self.attempt_email(email).await {
            Ok(()) => true,
            Err(e) => {
                log::error!(
                    "[notifier] E-mail '{}' to {} failed after retry: {}",
                    email.subject,
                    email.to,
                    e
                );
                false
            }
        }
    }

    async fn attempt_email(&self, email: &OutboundEmail) -> Result<(), AppError> {
        tokio::time::timeout(self.mail_timeout, self.mail.send(email))
            .await
            .map_err(|_| {
                AppError::mail(format!(
                    "Delivery timed out after {}ms",
                    self.mail_timeout.as_millis()
                ))
            })?
    }
}

/// Recipient and in-app message text for a transition.
///
/// Every resolution is addressed to the reviewer whose claim it settles.
fn compose_message<'a>(transition: &Transition<'a>) -> (&'a User, String) {
    let verb = match transition.resolution {
        Resolution::Approve => "approved",
        Resolution::Reject => "declined",
        Resolution::Cancel => "cancelled",
    };
    (
        transition.reviewer,
        format!(
            "{} {} your claim on their {} request",
            transition.requester.name, verb, transition.request.tier
        ),
    )
}

/// E-mail for a transition, if it carries one.
///
/// Approvals and rejections are mailed to the reviewer; cancellations are
/// in-app only.
fn compose_email(transition: &Transition<'_>, url: &str) -> Option<OutboundEmail> {
    let (subject, headline) = match transition.resolution {
        Resolution::Approve => (
            "Your BuddyLens claim was approved",
            "approved your claim. The review is yours.",
        ),
        Resolution::Reject => (
            "Your BuddyLens claim was declined",
            "declined your claim. The request is back in the open pool.",
        ),
        Resolution::Cancel => return None,
    };

    let request = transition.request;
    let html = format!(
        "<p>Hi {reviewer},</p>\
         <p>{requester} {headline}</p>\
         <ul><li>Tier: {tier}</li><li>Points: {cost}</li><li>Link: <a href=\"{link}\">{link}</a></li></ul>\
         <p><a href=\"{url}\">Open the request</a></p>",
        reviewer = escape_html(&transition.reviewer.name),
        requester = escape_html(&transition.requester.name),
        headline = headline,
        tier = escape_html(&request.tier),
        cost = request.cost,
        link = escape_html(&request.external_link),
        url = escape_html(url),
    );

    Some(OutboundEmail {
        to: transition.reviewer.email.clone(),
        subject: subject.to_string(),
        html,
    })
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
