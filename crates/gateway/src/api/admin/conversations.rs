//! Conversation history for operators.
//!
//! - `GET    /v1/admin/conversations`            filtered, newest first
//! - `GET    /v1/admin/conversations/:id`        one aggregate
//! - `GET    /v1/admin/conversations/:id/turns`  turns in replay order
//! - `DELETE /v1/admin/conversations/:id`        aggregate and all turns

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};

use pr_conversations::{ListConversations, ListTurns};
use pr_domain::conversation::{ActorType, ConversationStatus};
use pr_domain::error::Error;

use super::guard::AdminGuard;
use crate::state::AppState;

type Params = HashMap<String, String>;

fn param<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Non-numeric values are ignored, like absent ones.
fn int_param(params: &Params, key: &str) -> Option<i64> {
    param(params, key).and_then(|v| v.parse().ok())
}

fn time_param(params: &Params, key: &str) -> Option<DateTime<Utc>> {
    param(params, key)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn store_error(e: Error) -> Response {
    tracing::error!(error = %e, "conversation query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": e.to_string() })),
    )
        .into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "detail": "Not found" })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/admin/conversations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_conversations(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Response {
    let query = ListConversations {
        start: time_param(&params, "start"),
        end: time_param(&params, "end"),
        actor_type: param(&params, "actor_type").and_then(ActorType::parse),
        status: param(&params, "status").and_then(ConversationStatus::parse),
        session_id: param(&params, "session_id").map(str::to_owned),
        q: param(&params, "q").map(str::to_owned),
        limit: int_param(&params, "limit"),
        skip: int_param(&params, "skip"),
    };

    match state.conversations.list_conversations(query).await {
        Ok(page) => Json(serde_json::json!({
            "ok": true,
            "total": page.total,
            "items": page.items,
        }))
        .into_response(),
        Err(e) => store_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/admin/conversations/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_conversation(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Response {
    match state.conversations.get_conversation(&conversation_id).await {
        Ok(Some(item)) => Json(serde_json::json!({ "ok": true, "item": item })).into_response(),
        Ok(None) => not_found(),
        Err(e) => store_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/admin/conversations/:id/turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_turns(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(params): Query<Params>,
) -> Response {
    let query = ListTurns {
        q: param(&params, "q").map(str::to_owned),
        limit: int_param(&params, "limit"),
        skip: int_param(&params, "skip"),
    };

    match state.conversations.list_turns(&conversation_id, query).await {
        Ok(page) => Json(serde_json::json!({
            "ok": true,
            "total": page.total,
            "items": page.items,
        }))
        .into_response(),
        Err(e) => store_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/admin/conversations/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_conversation(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Response {
    match state.conversations.delete_conversation(&conversation_id).await {
        Ok(removed) => {
            tracing::info!(
                conversation_id = %conversation_id,
                turns_deleted = removed.turns,
                "conversation deleted"
            );
            Json(serde_json::json!({ "ok": true })).into_response()
        }
        Err(e) => store_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn bad_numbers_and_dates_are_ignored() {
        let p = params(&[("limit", "ten"), ("skip", "5"), ("start", "yesterday")]);
        assert_eq!(int_param(&p, "limit"), None);
        assert_eq!(int_param(&p, "skip"), Some(5));
        assert_eq!(time_param(&p, "start"), None);
    }

    #[test]
    fn rfc3339_dates_are_normalized_to_utc() {
        let p = params(&[("end", "2025-03-01T12:00:00+02:00")]);
        let end = time_param(&p, "end").unwrap();
        assert_eq!(end.to_rfc3339(), "2025-03-01T10:00:00+00:00");
    }

    #[test]
    fn blank_values_count_as_absent() {
        let p = params(&[("q", "   ")]);
        assert_eq!(param(&p, "q"), None);
    }
}
