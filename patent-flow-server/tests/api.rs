use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use patent_flow::{
    CompletenessPolicy, Embedder, FlowError, InMemoryCorpus, InMemorySessionStorage,
    PatentFinder, RawRow, Result, SessionRunner, TextGenerator, Turn,
};
use patent_flow_server::{AppState, build_router};
use serde_json::{Value, json};
use tower::ServiceExt;

/// Answers every extraction with one IPC code and every other call with a fixed summary.
struct CannedGenerator {
    calls: Mutex<usize>,
}

#[async_trait]
impl TextGenerator for CannedGenerator {
    async fn complete(&self, instruction: &str, _turns: &[Turn]) -> Result<String> {
        *self.calls.lock().unwrap() += 1;
        if instruction.contains("ALREADY COLLECTED") {
            Ok(r#"{"ipc_codes": ["C02F1/44"]}"#.to_string())
        } else if instruction.contains("unexplainable") {
            Err(FlowError::GenerationFailure("quota exceeded".into()))
        } else {
            Ok("A membrane that filters water.".to_string())
        }
    }
}

struct LengthEmbedder;

#[async_trait]
impl Embedder for LengthEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| vec![1.0, t.len() as f32 / 100.0])
            .collect())
    }
}

fn row(id: &str, abstract_text: &str) -> RawRow {
    RawRow {
        id: id.to_string(),
        title: Some(format!("Patent {id}")),
        abstract_text: Some(abstract_text.to_string()),
        publication_date: Some("2022-01-01".to_string()),
        country_code: Some("JP".to_string()),
        ipc_codes: vec!["C02F1/44".to_string()],
        assignees: vec!["Sony".to_string()],
    }
}

fn app() -> Router {
    let corpus = InMemoryCorpus::new(vec![
        row("JP-1", "A reverse osmosis membrane."),
        row("JP-2", "An unexplainable membrane fouling sensor."),
    ]);
    let finder = PatentFinder::new(
        Arc::new(CannedGenerator {
            calls: Mutex::new(0),
        }),
        Arc::new(LengthEmbedder),
        Arc::new(corpus),
        CompletenessPolicy::ipc_only(),
    );
    let runner = SessionRunner::new(Arc::new(finder), Arc::new(InMemorySessionStorage::new()));
    build_router(AppState::new(runner))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-correlation-id"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_chat_session_round_trip() {
    let app = app();

    let (status, body) = send(&app, Method::POST, "/chat", Some(json!({ "content": "RO membranes" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "COMPLETE");
    assert!(body["message"].as_str().unwrap().contains("Found 2 patents"));
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::GET, &format!("/session/{session_id}/results"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, body) = send(
        &app,
        Method::POST,
        "/chat",
        Some(json!({ "session_id": session_id, "content": "membrane fouling" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "RANKING");

    let (status, body) = send(&app, Method::GET, &format!("/session/{session_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["record_count"], 2);
    assert_eq!(body["params"]["ipc_codes"], json!(["C02F1/44"]));
    assert_eq!(body["turns"][0]["role"], "user");

    let (status, body) = send(&app, Method::GET, &format!("/session/{session_id}/results"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"].as_array().unwrap().len(), 2);
    assert_eq!(body["results"][0]["rank"], 1);
    assert_eq!(body["has_signal"], true);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/session/{session_id}/explanations"),
        Some(json!({ "n": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let explanations = body.as_array().unwrap();
    assert_eq!(explanations.len(), 2);
    assert_eq!(
        explanations.iter().filter(|e| e["failed"] == true).count(),
        1
    );

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/session/{session_id}/explanations"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, _) = send(&app, Method::DELETE, &format!("/session/{session_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, Method::GET, &format!("/session/{session_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["session_id"], session_id);
}

#[tokio::test]
async fn test_invalid_session_ids() {
    let app = app();

    let (status, _) = send(&app, Method::GET, "/session/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/chat",
        Some(json!({ "session_id": "not-a-uuid", "content": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unknown = uuid_like();
    let (status, _) = send(
        &app,
        Method::POST,
        "/chat",
        Some(json!({ "session_id": unknown, "content": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::POST, "/chat", Some(json!({ "content": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

fn uuid_like() -> &'static str {
    "6f1c2a9e-3b7d-4c1e-9f0a-2d5e8b7c4a10"
}
