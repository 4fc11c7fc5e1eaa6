//! HTTP API handlers for Tourguard.
//!
//! # Privacy
//!
//! Registration bodies carry names, passport and phone numbers. Handlers
//! never record request bodies in their spans or log lines; tourists are
//! referred to by identity id only.
//!
//! # Errors
//!
//! | Error | Status |
//! |---|---|
//! | `Validation` | 422 |
//! | `NotFound` | 404 |
//! | `InvalidState`, `Precondition` | 409 |
//! | `Issuance`, `Persistence` | 503 |

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::alerts::AlertFilter;
use crate::error::Error;
use crate::model::{
    Alert, AlertsQuery, AlertsResponse, DashboardStats, GeoPoint, IncidentReport,
    IncidentsResponse, PositionRequest, RegistrationResponse, SignalRequest, Tourist,
    TouristProfile, TouristUpdate, TouristsResponse, ZonesResponse,
};
use crate::monitor::Monitor;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
}

/// All routes, without middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tourists", post(register_tourist).get(list_tourists))
        .route("/tourists/:id", get(get_tourist))
        .route("/tourists/:id/position", post(post_position))
        .route("/tourists/:id/panic", post(post_panic))
        .route("/tourists/:id/check-in", post(post_check_in))
        .route("/zones", get(list_zones))
        .route("/alerts", get(list_alerts))
        .route("/alerts/:id/resolve", post(resolve_alert))
        .route("/alerts/:id/escalate", post(escalate_alert))
        .route("/incidents", get(list_incidents))
        .route("/incidents/:id", get(get_incident))
        .route("/stats", get(get_stats))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Status code for a domain error.
pub fn error_status(error: &Error) -> StatusCode {
    match error {
        Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidState(_) | Error::Precondition(_) => StatusCode::CONFLICT,
        Error::Issuance(_) | Error::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn reject(operation: &'static str, error: Error) -> StatusCode {
    let status = error_status(&error);
    if status.is_server_error() {
        warn!(operation, error = %error, "Request failed");
    } else {
        info!(operation, error = %error, "Request rejected");
    }
    status
}

/// POST /tourists - Register a tourist and issue their digital identity.
///
/// # Request Body
///
/// ```json
/// {
///     "full_name": "Asha Verma",
///     "nationality": "Indian",
///     "passport_number": "P1234567",
///     "phone": "+91-98765-43210",
///     "emergency_contact": "+91-91234-56789",
///     "planned_route": "Guwahati -> Kaziranga -> Shillong"
/// }
/// ```
///
/// # Response
///
/// `201 Created` with the tourist and the QR payload of their credential.
#[instrument(skip(state, profile))]
pub async fn register_tourist(
    State(state): State<AppState>,
    Json(profile): Json<TouristProfile>,
) -> Result<(StatusCode, Json<RegistrationResponse>), StatusCode> {
    let response = state
        .monitor
        .register_tourist(profile, Utc::now())
        .await
        .map_err(|e| reject("register_tourist", e))?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /tourists - The roster.
#[instrument(skip(state))]
pub async fn list_tourists(State(state): State<AppState>) -> Json<TouristsResponse> {
    Json(TouristsResponse {
        tourists: state.monitor.tourists().await,
    })
}

/// GET /tourists/:id
#[instrument(skip(state))]
pub async fn get_tourist(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Tourist>, StatusCode> {
    state
        .monitor
        .tourist(&id)
        .await
        .map(Json)
        .map_err(|e| reject("get_tourist", e))
}

/// POST /tourists/:id/position - Location feed.
///
/// ```json
/// { "lat": 26.1445, "lng": 91.7362, "timestamp": "2024-01-20T10:30:00Z" }
/// ```
///
/// `timestamp` is optional and defaults to the server clock. A fix older
/// than the tourist's last update is rejected with 422.
#[instrument(skip(state, request))]
pub async fn post_position(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PositionRequest>,
) -> Result<Json<TouristUpdate>, StatusCode> {
    let position = GeoPoint::new(request.lat, request.lng);
    let timestamp = request.timestamp.unwrap_or_else(Utc::now);

    state
        .monitor
        .update_position(&id, position, timestamp)
        .await
        .map(Json)
        .map_err(|e| reject("update_position", e))
}

/// POST /tourists/:id/panic - Panic button.
///
/// The body is optional; it may carry a `timestamp` and a `location`.
#[instrument(skip(state, request))]
pub async fn post_panic(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Option<Json<SignalRequest>>,
) -> Result<Json<TouristUpdate>, StatusCode> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let timestamp = request.timestamp.unwrap_or_else(Utc::now);

    let update = state
        .monitor
        .report_panic(&id, request.location, timestamp)
        .await
        .map_err(|e| reject("report_panic", e))?;

    warn!(tourist_id = %id, "Panic signal received");
    Ok(Json(update))
}

/// POST /tourists/:id/check-in - "I'm fine" signal. Ends inactivity.
#[instrument(skip(state, request))]
pub async fn post_check_in(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Option<Json<SignalRequest>>,
) -> Result<Json<TouristUpdate>, StatusCode> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let timestamp = request.timestamp.unwrap_or_else(Utc::now);

    state
        .monitor
        .check_in(&id, request.location, timestamp)
        .await
        .map(Json)
        .map_err(|e| reject("check_in", e))
}

/// GET /zones - The geofence catalog.
#[instrument(skip(state))]
pub async fn list_zones(State(state): State<AppState>) -> Json<ZonesResponse> {
    Json(ZonesResponse {
        zones: state.monitor.zones().to_vec(),
    })
}

/// GET /alerts - Alerts, newest first.
///
/// # Query Parameters
///
/// - `tourist_id` (optional): Only alerts of this tourist
/// - `open_only` (optional): Only unresolved alerts (default: false)
/// - `type` (optional): `geofence`, `panic`, `inactive` or `route_deviation`
#[instrument(skip(state))]
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Json<AlertsResponse> {
    let filter = AlertFilter {
        tourist_id: query.tourist_id,
        open_only: query.open_only,
        alert_type: query.alert_type,
    };
    let alerts = state.monitor.alerts(&filter).await;

    info!(count = alerts.len(), "Alerts queried");
    Json(AlertsResponse { alerts })
}

/// POST /alerts/:id/resolve - Operator resolution. Idempotent.
#[instrument(skip(state))]
pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Alert>, StatusCode> {
    state
        .monitor
        .resolve_alert(id, Utc::now())
        .await
        .map(Json)
        .map_err(|e| reject("resolve_alert", e))
}

/// POST /alerts/:id/escalate - Generate the E-FIR for a critical open alert.
///
/// Returns the existing report if the alert was escalated before. Resolved
/// and non-critical alerts are rejected with 409.
#[instrument(skip(state))]
pub async fn escalate_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<IncidentReport>, StatusCode> {
    state
        .monitor
        .escalate_to_incident(id, Utc::now())
        .await
        .map(Json)
        .map_err(|e| reject("escalate_to_incident", e))
}

/// GET /incidents
#[instrument(skip(state))]
pub async fn list_incidents(State(state): State<AppState>) -> Json<IncidentsResponse> {
    Json(IncidentsResponse {
        incidents: state.monitor.incidents().await,
    })
}

/// GET /incidents/:id
#[instrument(skip(state))]
pub async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<IncidentReport>, StatusCode> {
    state
        .monitor
        .incident(id)
        .await
        .map(Json)
        .map_err(|e| reject("get_incident", e))
}

/// GET /stats - Authority dashboard counters.
#[instrument(skip(state))]
pub async fn get_stats(State(state): State<AppState>) -> Json<DashboardStats> {
    Json(state.monitor.stats().await)
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
