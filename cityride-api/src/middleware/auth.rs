use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use cityride_core::{Principal, Role};

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserClaims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

fn bearer_token(req: &Request) -> Result<&str, AppError> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::AuthenticationError("Missing bearer token".to_string()))
}

// ============================================================================
// Authentication Middleware
// ============================================================================

/// Verifies the bearer token and makes the caller available to handlers as
/// an `Extension<Principal>`.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req)?;

    let token_data = decode::<UserClaims>(
        token,
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        tracing::debug!("Rejected bearer token: {}", e);
        AppError::AuthenticationError("Invalid or expired token".to_string())
    })?;

    let role: Role = token_data
        .claims
        .role
        .parse()
        .map_err(|_| AppError::AuthenticationError("Invalid or expired token".to_string()))?;

    req.extensions_mut()
        .insert(Principal::new(token_data.claims.sub, role));

    Ok(next.run(req).await)
}

// ============================================================================
// Admin Middleware
// ============================================================================

/// Must run after `auth_middleware`.
pub async fn admin_middleware(req: Request, next: Next) -> Result<Response, AppError> {
    let principal = req
        .extensions()
        .get::<Principal>()
        .ok_or_else(|| AppError::AuthenticationError("Missing bearer token".to_string()))?;

    if principal.role != Role::Admin {
        return Err(AppError::AuthorizationError("Admin access required".to_string()));
    }

    Ok(next.run(req).await)
}
