pub mod admin;
pub mod agent;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// The agent relay and health probe are public. Conversation history sits
/// behind [`admin::AdminGuard`], applied per handler.
pub fn router() -> Router<AppState> {
    let public = Router::new()
        .route("/v1/health", get(admin::health))
        .route("/v1/agent", post(agent::agent));

    let admin = Router::new()
        .route("/v1/admin/conversations", get(admin::list_conversations))
        .route(
            "/v1/admin/conversations/:id",
            get(admin::get_conversation).delete(admin::delete_conversation),
        )
        .route("/v1/admin/conversations/:id/turns", get(admin::list_turns));

    public.merge(admin)
}
