mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use common::*;

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn seed(state: &pr_gateway::state::AppState, conversation_id: &str, turns: usize) {
    let body = json!({
        "messages": [{"role": "user", "content": "What do you do?"}],
        "stream": false,
        "conversationId": conversation_id,
    });
    for _ in 0..turns {
        let resp = app(state).oneshot(post_agent(body.clone())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn delete_cascades_to_every_turn() {
    let state = state_with(ScriptedBackend::new(Script::Json(response("ok"))));
    seed(&state, "conv-1", 3).await;
    seed(&state, "conv-2", 1).await;

    let resp = app(&state)
        .oneshot(get("/v1/admin/conversations/conv-1/turns"))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["total"], 3);
    let indices: Vec<u64> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["turnIndex"].as_u64().unwrap())
        .collect();
    assert_eq!(indices, vec![0, 1, 2]);

    let resp = app(&state)
        .oneshot(
            Request::delete("/v1/admin/conversations/conv-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({"ok": true}));

    let resp = app(&state)
        .oneshot(get("/v1/admin/conversations/conv-1/turns"))
        .await
        .unwrap();
    assert_eq!(
        body_json(resp).await,
        json!({"ok": true, "total": 0, "items": []})
    );

    let resp = app(&state)
        .oneshot(get("/v1/admin/conversations/conv-1"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await, json!({"detail": "Not found"}));

    // The other conversation is untouched.
    let resp = app(&state)
        .oneshot(get("/v1/admin/conversations/conv-2"))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["item"]["turnCount"], 1);
}

#[tokio::test]
async fn list_filters_and_ignores_bad_params() {
    let state = state_with(ScriptedBackend::new(Script::Json(response("I build AI systems."))));
    seed(&state, "conv-a", 1).await;
    seed(&state, "conv-b", 2).await;

    let resp = app(&state)
        .oneshot(get("/v1/admin/conversations?limit=nope&skip=-1&status=bogus"))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["total"], 2);
    // Newest activity first.
    assert_eq!(body["items"][0]["conversationId"], "conv-b");

    let resp = app(&state)
        .oneshot(get("/v1/admin/conversations?q=CONV-A"))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["conversationId"], "conv-a");

    let resp = app(&state)
        .oneshot(get("/v1/admin/conversations?status=errored"))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["total"], 0);

    let resp = app(&state)
        .oneshot(get("/v1/admin/conversations?limit=1"))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn admin_token_is_enforced_when_configured() {
    let state = state_with(ScriptedBackend::new(Script::Json(response("ok"))))
        .with_admin_token("s3cret");

    let resp = app(&state)
        .oneshot(get("/v1/admin/conversations"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await, json!({"error": "invalid admin token"}));

    let resp = app(&state)
        .oneshot(
            Request::get("/v1/admin/conversations")
                .header(header::AUTHORIZATION, "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app(&state)
        .oneshot(
            Request::get("/v1/admin/conversations")
                .header(header::AUTHORIZATION, "Bearer s3cret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // The relay itself stays public.
    let resp = app(&state)
        .oneshot(post_agent(json!({"messages": [{"role": "user", "content": "hi"}]})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_reports_conversation_count() {
    let state = state_with(ScriptedBackend::new(Script::Json(response("ok"))));
    seed(&state, "conv-h", 2).await;

    let resp = app(&state).oneshot(get("/v1/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "persona-relay");
    assert_eq!(body["conversations"], 1);
}
