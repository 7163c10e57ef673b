//! AppView fixture: just enough to resolve handles

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{FixtureServer, FIXTURE_DID, FIXTURE_HANDLE};

#[derive(Clone)]
pub struct AppViewState {
    handles: Arc<Mutex<HashMap<String, String>>>,
}

impl Default for AppViewState {
    fn default() -> Self {
        let state = Self {
            handles: Arc::new(Mutex::new(HashMap::new())),
        };
        state.register(FIXTURE_HANDLE, FIXTURE_DID);
        state
    }
}

impl AppViewState {
    pub fn register(&self, handle: &str, did: &str) {
        self.handles
            .lock()
            .unwrap()
            .insert(handle.to_string(), did.to_string());
    }
}

#[derive(Debug, Deserialize)]
struct HandleResolveParams {
    handle: String,
}

pub async fn spawn() -> anyhow::Result<(FixtureServer, AppViewState)> {
    let state = AppViewState::default();
    let server = FixtureServer::spawn(|_| router(state.clone())).await?;
    Ok((server, state))
}

pub fn router(state: AppViewState) -> Router {
    Router::new()
        .route(
            "/xrpc/com.atproto.identity.resolveHandle",
            get(resolve_handle),
        )
        .with_state(state)
}

async fn resolve_handle(
    State(state): State<AppViewState>,
    Query(params): Query<HandleResolveParams>,
) -> Response {
    match state.handles.lock().unwrap().get(&params.handle) {
        Some(did) => Json(json!({ "did": did })).into_response(),
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "InvalidRequest",
                "message": "Unable to resolve handle"
            })),
        )
            .into_response(),
    }
}
