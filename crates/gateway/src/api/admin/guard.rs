//! `AdminGuard` Axum extractor. Handlers opt in by adding
//! `_guard: AdminGuard` to their parameter list.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::Json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Enforces `Authorization: Bearer <admin token>`.
///
/// The provided token is hashed to a fixed-length digest and compared in
/// constant time, so neither its content nor its length leaks through
/// timing. Without a configured token (dev mode) every request passes.
pub struct AdminGuard;

#[async_trait]
impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected_hash) = &state.admin_token_hash else {
            return Ok(AdminGuard);
        };

        let provided = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");
        let provided_hash = Sha256::digest(provided.as_bytes());

        if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "invalid admin token" })),
            ));
        }
        Ok(AdminGuard)
    }
}
