use std::sync::Arc;

use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status, the configured model and the registered tools.
pub fn health_handler(state: &Arc<AppState>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "toolstream is running",
        "model": config.upstream.model,
        "default_mode": config.features.default_mode,
        "tools": state.tools.tool_names(),
    }))
}
