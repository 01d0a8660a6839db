//! Application error types.
//!
//! These errors are serializable so the HTTP layer can return them as
//! structured JSON, and carry the distinction between expected outcomes
//! (`Forbidden`, `InvalidState`) and dependency failures (`Database`).

use serde::Serialize;
use thiserror::Error;

/// Application-level errors returned from store and arbiter operations.
///
/// All variants serialize to a structured JSON object for API consumers.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// No valid caller identity.
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Caller identity is valid but not entitled to the action.
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Requested resource missing or soft-deleted.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// A guarded conditional write matched no row: stale claim, lost race,
    /// already resolved, or wrong reviewer.
    #[error("Invalid state: {message}")]
    InvalidState {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Invalid input provided.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// Store unreachable or a query failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
    },

    /// Outbound e-mail failed.
    #[error("Mail error: {message}")]
    Mail { message: String },

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create an unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create a forbidden error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
            request_id: None,
        }
    }

    /// Create an invalid state error for a specific review request.
    pub fn invalid_state_for(message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
            request_id: Some(request_id.into()),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: None,
        }
    }

    /// Create an invalid input error with field name.
    pub fn invalid_input_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: None,
        }
    }

    /// Create a database error with operation context.
    pub fn database_with_op(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: Some(operation.into()),
        }
    }

    /// Create a mail error.
    pub fn mail(message: impl Into<String>) -> Self {
        Self::Mail {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this is an expected, user-facing outcome rather than a failure.
    ///
    /// Expected outcomes are not logged as errors.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. }
                | Self::Forbidden { .. }
                | Self::NotFound { .. }
                | Self::InvalidState { .. }
                | Self::InvalidInput { .. }
        )
    }

    /// Check if this is an invalid state error.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}

// Conversions from common error types

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::mail("Mail API request timed out")
        } else if err.is_connect() {
            Self::mail("Failed to connect to mail API")
        } else {
            Self::mail(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err))
    }
}

impl From<crate::db::DbError> for AppError {
    fn from(err: crate::db::DbError) -> Self {
        match err {
            crate::db::DbError::Migration(_) => Self::database_with_op(err.to_string(), "migrate"),
            crate::db::DbError::Sqlite(_) => Self::database(err.to_string()),
        }
    }
}
