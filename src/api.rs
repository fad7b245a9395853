//! HTTP surface — a thin axum layer over `AdherenceService`.
//!
//! Authentication is out of scope; the owner is identified by an `owner`
//! query parameter (or field). All domain logic lives in the service.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::error::{DoseError, Error, ReminderError, StoreError};
use crate::meds::NewMedication;
use crate::service::AdherenceService;

/// Shared handler state.
type AppState = State<Arc<AdherenceService>>;

/// Build the application router.
pub fn routes(service: Arc<AdherenceService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/medications", post(create_medication).get(list_medications))
        .route("/api/medications/{id}", delete(delete_medication))
        .route(
            "/api/medications/{id}/doses/{date}/{index}/take",
            post(take_dose),
        )
        .route(
            "/api/medications/{id}/doses/{date}/{index}/undo",
            post(undo_dose),
        )
        .route(
            "/api/medications/{id}/doses/{date}/{index}/status",
            get(dose_status),
        )
        .route("/api/reminders", post(upsert_reminder).get(list_reminders))
        .route("/api/reminders/{id}", delete(delete_reminder))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

/// Error wrapper mapping domain errors onto HTTP statuses.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Dose(DoseError::MedicationNotFound { .. })
            | Error::Reminder(ReminderError::NotFound { .. })
            | Error::Reminder(ReminderError::MedicationNotFound { .. })
            | Error::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,

            Error::Dose(DoseError::Validation(_))
            | Error::Dose(DoseError::IndexOutOfRange { .. })
            | Error::Reminder(ReminderError::InvalidFormat { .. })
            | Error::Reminder(ReminderError::IndexOutOfRange { .. }) => StatusCode::BAD_REQUEST,

            Error::Dose(DoseError::OutOfWindow { .. })
            | Error::Dose(DoseError::NotScheduled { .. })
            | Error::Reminder(ReminderError::PastReminder)
            | Error::Reminder(ReminderError::WindowViolation { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            Error::Reminder(ReminderError::TypeConflict { .. }) => StatusCode::CONFLICT,

            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

#[derive(Deserialize)]
struct OwnerQuery {
    owner: String,
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn create_medication(
    State(service): AppState,
    Json(input): Json<NewMedication>,
) -> ApiResult {
    let med = service.create_medication(input).await?;
    Ok((StatusCode::CREATED, Json(med)).into_response())
}

async fn list_medications(
    State(service): AppState,
    Query(query): Query<OwnerQuery>,
) -> ApiResult {
    let meds = service.list_medications(&query.owner).await?;
    Ok(Json(meds).into_response())
}

async fn delete_medication(
    State(service): AppState,
    Path(id): Path<Uuid>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult {
    service.delete_medication(&query.owner, id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn take_dose(
    State(service): AppState,
    Path((id, date, index)): Path<(Uuid, String, usize)>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult {
    let record = service.take_dose(&query.owner, id, &date, index).await?;
    Ok(Json(record).into_response())
}

async fn undo_dose(
    State(service): AppState,
    Path((id, date, index)): Path<(Uuid, String, usize)>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult {
    let record = service.undo_dose(&query.owner, id, &date, index).await?;
    Ok(Json(record).into_response())
}

async fn dose_status(
    State(service): AppState,
    Path((id, date, index)): Path<(Uuid, String, usize)>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult {
    let status = service.dose_status(&query.owner, id, &date, index).await?;
    Ok(Json(status).into_response())
}

#[derive(Deserialize)]
struct UpsertReminderRequest {
    owner_id: String,
    medication_id: Uuid,
    dose_index: usize,
    reminder_time: String,
    date: String,
    #[serde(rename = "type")]
    kind: String,
}

async fn upsert_reminder(
    State(service): AppState,
    Json(request): Json<UpsertReminderRequest>,
) -> ApiResult {
    let outcome = service
        .upsert_reminder(
            &request.owner_id,
            request.medication_id,
            request.dose_index,
            &request.reminder_time,
            &request.date,
            &request.kind,
        )
        .await?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(serde_json::json!({
            "created": outcome.created,
            "reminder": outcome.reminder,
        })),
    )
        .into_response())
}

async fn list_reminders(State(service): AppState, Query(query): Query<OwnerQuery>) -> ApiResult {
    let reminders = service.list_reminders(&query.owner).await?;
    Ok(Json(reminders).into_response())
}

async fn delete_reminder(
    State(service): AppState,
    Path(id): Path<Uuid>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult {
    service.delete_reminder(&query.owner, id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
