use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::{Json, Response},
    routing::{get, post},
};
use patent_flow::{
    Explanation, FlowError, Phase, Ranking, SearchParameters, SessionRunner, Turn,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info};
use uuid::Uuid;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

const DEFAULT_EXPLANATIONS: usize = 3;

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "session_id": id
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn flow_error(e: FlowError, session_id: &str) -> ApiError {
    match e {
        FlowError::SessionNotFound(_) => not_found_error("Session not found", session_id),
        other => {
            error!(session_id = %session_id, error = %other, kind = other.kind(), "Request failed");
            internal_error("Request failed", &other.to_string())
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub runner: SessionRunner,
}

impl AppState {
    pub fn new(runner: SessionRunner) -> Self {
        Self { runner }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub message: String,
    pub phase: Phase,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub phase: Phase,
    pub params: SearchParameters,
    pub turns: Vec<Turn>,
    pub record_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct ExplanationsRequest {
    #[serde(default = "default_explanations")]
    pub n: usize,
}

fn default_explanations() -> usize {
    DEFAULT_EXPLANATIONS
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/chat", post(chat))
        .route("/session/{session_id}", get(get_session).delete(end_session))
        .route("/session/{session_id}/results", get(get_results))
        .route("/session/{session_id}/explanations", post(create_explanations))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(mut request: Request<axum::body::Body>, next: Next) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    let header = HeaderValue::from_str(&correlation_id).ok();

    if let Some(value) = &header {
        request.headers_mut().insert("x-correlation-id", value.clone());
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    let mut response = next.run(request).instrument(span).await;

    if let Some(value) = header {
        response.headers_mut().insert("x-correlation-id", value);
    }
    response
}

async fn health_check() -> &'static str {
    "OK"
}

/// Session ids are v4 UUIDs; anything else is rejected before lookup.
fn validate_session_id(session_id: &str) -> Result<(), ApiError> {
    Uuid::parse_str(session_id)
        .map(|_| ())
        .map_err(|_| bad_request_error("Malformed session id"))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    if request.content.trim().is_empty() {
        return Err(bad_request_error("Message content is required"));
    }

    let session_id = match request.session_id {
        Some(id) => {
            validate_session_id(&id)?;
            id
        }
        None => state.runner.create().await.map_err(|e| {
            error!("Failed to create session: {}", e);
            internal_error("Failed to create session", &e.to_string())
        })?,
    };

    info!(session_id = %session_id, "Chat message received");

    let reply = state
        .runner
        .submit(&session_id, &request.content)
        .await
        .map_err(|e| flow_error(e, &session_id))?;

    Ok(Json(ChatResponse {
        session_id,
        message: reply.message,
        phase: reply.phase,
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    validate_session_id(&session_id)?;

    let handle = state
        .runner
        .session(&session_id)
        .await
        .map_err(|e| flow_error(e, &session_id))?;
    let session = handle.lock().await;

    Ok(Json(SessionResponse {
        session_id: session.id().to_string(),
        phase: session.phase(),
        params: session.state().params.clone(),
        turns: session.state().turns().to_vec(),
        record_count: session.records().len(),
    }))
}

async fn get_results(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Ranking> {
    validate_session_id(&session_id)?;

    state
        .runner
        .ranked_results(&session_id)
        .await
        .map_err(|e| flow_error(e, &session_id))?
        .map(Json)
        .ok_or_else(|| not_found_error("No ranking for this session yet", &session_id))
}

async fn create_explanations(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    request: Option<Json<ExplanationsRequest>>,
) -> ApiResult<Vec<Explanation>> {
    validate_session_id(&session_id)?;
    // A bodyless POST asks for the default count
    let n = request.map_or(DEFAULT_EXPLANATIONS, |Json(request)| request.n);
    info!(session_id = %session_id, n = n, "Explanations requested");

    state
        .runner
        .explanations(&session_id, n)
        .await
        .map_err(|e| flow_error(e, &session_id))?
        .map(Json)
        .ok_or_else(|| not_found_error("No ranking for this session yet", &session_id))
}

async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    validate_session_id(&session_id)?;

    state
        .runner
        .end(&session_id)
        .await
        .map_err(|e| flow_error(e, &session_id))?;
    Ok(StatusCode::NO_CONTENT)
}
