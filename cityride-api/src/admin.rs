use axum::{
    extract::State,
    middleware,
    routing::get,
    Extension, Json, Router,
};

use cityride_core::{BookingView, Principal, RideView};

use crate::error::AppError;
use crate::middleware::{admin_middleware, auth_middleware};
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/admin/rides", get(list_rides))
        .route("/v1/admin/bookings", get(list_bookings))
        .route_layer(middleware::from_fn(admin_middleware))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

// ============================================================================
// Admin Handlers
// ============================================================================

/// GET /v1/admin/rides
pub async fn list_rides(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<RideView>>, AppError> {
    Ok(Json(state.coordinator.all_rides(&principal).await?))
}

/// GET /v1/admin/bookings
pub async fn list_bookings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<BookingView>>, AppError> {
    Ok(Json(state.coordinator.all_bookings(&principal).await?))
}
