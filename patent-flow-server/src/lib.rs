pub mod service;
pub mod workflow;

pub use service::{AppState, ChatRequest, ChatResponse, SessionResponse, build_router};
pub use workflow::create_session_runner;
