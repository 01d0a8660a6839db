//! Outbound e-mail transports.
//!
//! Delivery is best-effort. Transports report failure through `AppError::Mail`
//! and never retry on their own; the notifier owns the retry policy.

use crate::config::MailConfig;
use crate::error::AppError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A composed e-mail ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Something that can deliver an e-mail.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Attempt one delivery.
    async fn send(&self, email: &OutboundEmail) -> Result<(), AppError>;
}

/// Request body for the HTTP mail API.
#[derive(Serialize)]
struct SendEmailBody<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Mail transport that posts JSON to an HTTP mail API.
#[derive(Debug, Clone)]
pub struct HttpMailTransport {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    from: String,
}

impl HttpMailTransport {
    /// Create a transport for `api_url`.
    pub fn new(
        api_url: impl Into<String>,
        api_key: Option<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build mail client: {}", e)))?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key,
            from: from.into(),
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<(), AppError> {
        let body = SendEmailBody {
            from: &self.from,
            to: [&email.to],
            subject: &email.subject,
            html: &email.html,
        };

        let mut request = self.client.post(&self.api_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            log::debug!("[mailer] Delivered '{}' to {}", email.subject, email.to);
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => AppError::mail("Mail API rate limited"),
            _ => AppError::mail(format!("Mail API returned {}: {}", status, detail)),
        })
    }
}

/// Transport used when no mail API is configured: logs and succeeds.
#[derive(Debug, Clone, Default)]
pub struct LogMailTransport;

#[async_trait]
impl MailTransport for LogMailTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<(), AppError> {
        log::info!(
            "[mailer] No mail API configured; would send '{}' to {}",
            email.subject,
            email.to
        );
        Ok(())
    }
}

/// Build the transport described by `config`.
pub fn transport_from_config(config: &MailConfig) -> Result<Arc<dyn MailTransport>, AppError> {
    match &config.api_url {
        Some(url) => Ok(Arc::new(HttpMailTransport::new(
            url.clone(),
            config.api_key.clone(),
            config.from.clone(),
            Duration::from_millis(config.timeout_ms),
        )?)),
        None => Ok(Arc::new(LogMailTransport)),
    }
}

/// In-memory transport that records every attempt.
///
/// Can be told to fail the first N attempts or to stall each attempt, for
/// exercising the notifier's retry and timeout handling.
#[derive(Debug, Clone, Default)]
pub struct RecordingMailTransport {
    attempts: Arc<Mutex<Vec<OutboundEmail>>>,
    failures_remaining: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl RecordingMailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` attempts.
    pub fn failing(count: usize) -> Self {
        let transport = Self::default();
        transport.failures_remaining.store(count, Ordering::SeqCst);
        transport
    }

    /// Sleep for `delay` before each attempt completes.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every attempt made so far, successful or not.
    pub fn attempts(&self) -> Vec<OutboundEmail> {
        self.attempts
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    /// Attempts addressed to `to`.
    pub fn attempts_to(&self, to: &str) -> Vec<OutboundEmail> {
        self.attempts()
            .into_iter()
            .filter(|email| email.to == to)
            .collect()
    }
}

#[async_trait]
impl MailTransport for RecordingMailTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<(), AppError> {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push(email.clone());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if should_fail {
            Err(AppError::mail("simulated delivery failure"))
        } else {
            Ok(())
        }
    }
}
