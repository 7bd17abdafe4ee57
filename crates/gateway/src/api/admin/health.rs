use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/health: lightweight health probe (public, no auth)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let conversations = match state.conversations.count_conversations().await {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!(error = %e, "health: conversation count unavailable");
            None
        }
    };

    Json(serde_json::json!({
        "status": "ok",
        "service": state.config.observability.service_name,
        "version": env!("CARGO_PKG_VERSION"),
        "conversations": conversations,
    }))
}
