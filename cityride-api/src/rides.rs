use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Extension, Json, Router,
};
use uuid::Uuid;

use cityride_core::{BookingView, Principal, RideCancellation, RideQuery, RideView};
use cityride_rides::{NewRide, RidePatch};

use crate::error::AppError;
use crate::middleware::auth_middleware;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/v1/rides", get(list_rides))
        .route("/v1/rides/{id}", get(get_ride));

    let protected = Router::new()
        .route("/v1/rides", post(post_ride))
        .route("/v1/rides/mine", get(my_rides))
        .route("/v1/rides/{id}", put(update_ride).delete(cancel_ride))
        .route("/v1/rides/{id}/complete", put(complete_ride))
        .route("/v1/rides/{id}/bookings", get(ride_bookings))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    public.merge(protected)
}

// ============================================================================
// Public Handlers
// ============================================================================

/// GET /v1/rides
/// Search active rides, earliest departure first
pub async fn list_rides(
    State(state): State<AppState>,
    query: Result<Query<RideQuery>, QueryRejection>,
) -> Result<Json<Vec<RideView>>, AppError> {
    let Query(query) = query?;
    let rides = state.coordinator.list_rides(&query).await?;
    Ok(Json(rides))
}

/// GET /v1/rides/{id}
pub async fn get_ride(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<RideView>, AppError> {
    let Path(ride_id) = id?;
    Ok(Json(state.coordinator.get_ride(ride_id).await?))
}

// ============================================================================
// Driver Handlers
// ============================================================================

/// POST /v1/rides
pub async fn post_ride(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<NewRide>, JsonRejection>,
) -> Result<(StatusCode, Json<RideView>), AppError> {
    let Json(draft) = payload?;
    let ride = state.coordinator.post_ride(&principal, draft).await?;
    Ok((StatusCode::CREATED, Json(ride)))
}

/// GET /v1/rides/mine
pub async fn my_rides(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<RideView>>, AppError> {
    Ok(Json(state.coordinator.my_rides(&principal).await?))
}

/// PUT /v1/rides/{id}
/// Partial edit; refused while any booking on the ride is confirmed
pub async fn update_ride(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<RidePatch>, JsonRejection>,
) -> Result<Json<RideView>, AppError> {
    let Path(ride_id) = id?;
    let Json(patch) = payload?;
    let ride = state.coordinator.update_ride(&principal, ride_id, patch).await?;
    Ok(Json(ride))
}

/// DELETE /v1/rides/{id}
/// Cancel the ride; its confirmed bookings are canceled with it
pub async fn cancel_ride(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<RideCancellation>, AppError> {
    let Path(ride_id) = id?;
    Ok(Json(state.coordinator.cancel_ride(&principal, ride_id).await?))
}

/// PUT /v1/rides/{id}/complete
pub async fn complete_ride(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<RideView>, AppError> {
    let Path(ride_id) = id?;
    Ok(Json(state.coordinator.complete_ride(&principal, ride_id).await?))
}

/// GET /v1/rides/{id}/bookings
pub async fn ride_bookings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Vec<BookingView>>, AppError> {
    let Path(ride_id) = id?;
    Ok(Json(state.coordinator.ride_bookings(&principal, ride_id).await?))
}
