//! REST API routes for the review request workflow.
//!
//! Handlers resolve the caller from [`CurrentUser`], check that any identity
//! named in the payload is the caller, and delegate to the arbiter or the
//! visibility rules.

use crate::db::notifications;
use crate::error::AppError;
use crate::models::{NewReviewRequest, Notification, RequestEvent, Resolution, ReviewRequestView};
use crate::services::auth::CurrentUser;
use crate::services::claim_arbiter::ResolveInput;
use crate::services::server::AppState;
use crate::services::visibility;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

// ── Error handling ───────────────────────────────────────────────────────────

/// JSON error response body.
#[derive(Serialize)]
struct ApiError {
    code: String,
    message: String,
}

/// Wrapper to make AppError usable as an axum error response.
pub struct ApiErr(pub AppError);

impl ApiErr {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            AppError::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::Forbidden { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::InvalidState { .. } => (StatusCode::CONFLICT, "INVALID_STATE"),
            AppError::InvalidInput { .. } => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if self.0.is_expected() {
            log::debug!("[server] {}", self.0);
            self.0.to_string()
        } else {
            log::error!("[server] Request failed: {}", self.0);
            "An internal error occurred".to_string()
        };

        (
            status,
            Json(ApiError {
                code: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

impl From<AppError> for ApiErr {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<sqlx::Error> for ApiErr {
    fn from(err: sqlx::Error) -> Self {
        Self(AppError::from(err))
    }
}

// ── DTOs ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestResponse {
    pub request: ReviewRequestView,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    pub request: ReviewRequestView,
    pub email_sent: bool,
}

/// Body of `POST` and `DELETE /api/buddy-lens/claim`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimInput {
    pub request_id: String,
    pub reviewer_id: String,
}

// ── Route builder ────────────────────────────────────────────────────────────

/// Build the review request API routes.
///
/// All routes require authentication (the auth middleware is applied
/// in server.rs at the router level).
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/buddy-lens/requests",
            post(create_request),
        )
        .route("/api/buddy-lens/requests/open", get(get_open_pool))
        .route("/api/buddy-lens/requests/mine", get(get_my_requests))
        .route(
            "/api/buddy-lens/requests/{id}",
            get(get_request).delete(withdraw_request),
        )
        .route(
            "/api/buddy-lens/requests/{id}/events",
            get(get_request_events),
        )
        .route(
            "/api/buddy-lens/claim",
            post(claim_request)
                .patch(resolve_claim)
                .delete(cancel_claim),
        )
        .route("/api/notifications", get(get_notifications))
        .route("/api/notifications/{id}/read", post(mark_notification_read))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /api/buddy-lens/requests: post a new request.
async fn create_request(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(input): Json<NewReviewRequest>,
) -> Result<(StatusCode, Json<RequestResponse>), ApiErr> {
    let request = state.arbiter.create_request(user.id(), input).await?;
    Ok((
        StatusCode::CREATED,
        Json(RequestResponse {
            request: request.into(),
        }),
    ))
}

/// GET /api/buddy-lens/requests/open: claimable requests for the caller.
async fn get_open_pool(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<ReviewRequestView>>, ApiErr> {
    let requests = visibility::open_pool(&state.db, user.id()).await?;
    Ok(Json(requests.into_iter().map(ReviewRequestView::from).collect()))
}

/// GET /api/buddy-lens/requests/mine: requests the caller takes part in.
async fn get_my_requests(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<ReviewRequestView>>, ApiErr> {
    let requests = visibility::my_requests(&state.db, user.id()).await?;
    Ok(Json(requests.into_iter().map(ReviewRequestView::from).collect()))
}

/// GET /api/buddy-lens/requests/:id
async fn get_request(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<RequestResponse>, ApiErr> {
    let request = visibility::get_visible_request(&state.db, &id, user.id()).await?;
    Ok(Json(RequestResponse {
        request: request.into(),
    }))
}

/// DELETE /api/buddy-lens/requests/:id: withdraw an unclaimed request.
async fn withdraw_request(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<RequestResponse>, ApiErr> {
    let request = state.arbiter.withdraw(&id, user.id()).await?;
    Ok(Json(RequestResponse {
        request: request.into(),
    }))
}

/// GET /api/buddy-lens/requests/:id/events: audit trail.
async fn get_request_events(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<Vec<RequestEvent>>, ApiErr> {
    let events = visibility::request_events(&state.db, &id, user.id()).await?;
    Ok(Json(events))
}

/// POST /api/buddy-lens/claim: claim an open request.
async fn claim_request(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(input): Json<ClaimInput>,
) -> Result<Json<RequestResponse>, ApiErr> {
    if input.reviewer_id != user.id() {
        return Err(AppError::forbidden("You can only claim as yourself").into());
    }

    let request = state
        .arbiter
        .claim(&input.request_id, &input.reviewer_id)
        .await?;
    Ok(Json(RequestResponse {
        request: request.into(),
    }))
}

/// PATCH /api/buddy-lens/claim: approve or reject a pending claim.
async fn resolve_claim(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(input): Json<ResolveInput>,
) -> Result<Json<ResolveResponse>, ApiErr> {
    if input.decision == Resolution::Cancel {
        return Err(AppError::invalid_input_field(
            "Decision must be approve or reject",
            "decision",
        )
        .into());
    }

    let outcome = state.arbiter.resolve(user.id(), &input).await?;
    Ok(Json(ResolveResponse {
        request: outcome.request.into(),
        email_sent: outcome.email_sent,
    }))
}

/// DELETE /api/buddy-lens/claim: cancel a pending claim. Requester only.
async fn cancel_claim(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(input): Json<ClaimInput>,
) -> Result<Json<RequestResponse>, ApiErr> {
    let request = state
        .arbiter
        .cancel(&input.request_id, user.id(), &input.reviewer_id)
        .await?;
    Ok(Json(RequestResponse {
        request: request.into(),
    }))
}

/// GET /api/notifications: the caller's inbox, newest first.
async fn get_notifications(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<Notification>>, ApiErr> {
    let items = notifications::list_for_user(&state.db, user.id()).await?;
    Ok(Json(items))
}

/// POST /api/notifications/:id/read
async fn mark_notification_read(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiErr> {
    if notifications::mark_read(&state.db, id, user.id()).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found_with_id("Notification", id.to_string()).into())
    }
}
