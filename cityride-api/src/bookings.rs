use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

use cityride_bookings::NewBooking;
use cityride_core::{BookingView, Principal};

use crate::error::AppError;
use crate::middleware::auth_middleware;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub verification_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub payment_method: Option<String>,
}

/// Transition endpoints accept an empty body
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::ValidationError(format!("Invalid request body: {}", e)))
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking))
        .route("/v1/bookings/mine", get(my_bookings))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/accept", put(accept_booking))
        .route("/v1/bookings/{id}/verify", put(verify_booking))
        .route("/v1/bookings/{id}/complete", put(complete_booking))
        .route("/v1/bookings/{id}/finalize", put(finalize_booking))
        .route("/v1/bookings/{id}/cancel", put(cancel_booking))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/bookings
/// Register a booking; the response carries the pickup verification code
pub async fn create_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<NewBooking>, JsonRejection>,
) -> Result<(StatusCode, Json<BookingView>), AppError> {
    let Json(draft) = payload?;
    let booking = state.coordinator.create_booking(&principal, draft).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// GET /v1/bookings/mine
pub async fn my_bookings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<BookingView>>, AppError> {
    Ok(Json(state.coordinator.my_bookings(&principal).await?))
}

/// GET /v1/bookings/{id}
pub async fn get_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<BookingView>, AppError> {
    let Path(booking_id) = id?;
    Ok(Json(state.coordinator.get_booking(&principal, booking_id).await?))
}

/// PUT /v1/bookings/{id}/accept
pub async fn accept_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<BookingView>, AppError> {
    let Path(booking_id) = id?;
    Ok(Json(state.coordinator.accept_booking(&principal, booking_id).await?))
}

/// PUT /v1/bookings/{id}/verify
pub async fn verify_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    id: Result<Path<Uuid>, PathRejection>,
    body: Bytes,
) -> Result<Json<BookingView>, AppError> {
    let Path(booking_id) = id?;
    let req: VerifyRequest = optional_body(&body)?;
    let booking = state
        .coordinator
        .verify_booking(&principal, booking_id, req.verification_code)
        .await?;
    Ok(Json(booking))
}

/// PUT /v1/bookings/{id}/complete
/// Passenger side: moves the booking to payment processing
pub async fn complete_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    id: Result<Path<Uuid>, PathRejection>,
    body: Bytes,
) -> Result<Json<BookingView>, AppError> {
    let Path(booking_id) = id?;
    let req: CompleteRequest = optional_body(&body)?;
    let booking = state
        .coordinator
        .begin_payment(&principal, booking_id, req.payment_method)
        .await?;
    Ok(Json(booking))
}

/// PUT /v1/bookings/{id}/finalize
pub async fn finalize_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<BookingView>, AppError> {
    let Path(booking_id) = id?;
    Ok(Json(state.coordinator.finalize_booking(&principal, booking_id).await?))
}

/// PUT /v1/bookings/{id}/cancel
pub async fn cancel_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<BookingView>, AppError> {
    let Path(booking_id) = id?;
    Ok(Json(state.coordinator.cancel_booking(&principal, booking_id).await?))
}
