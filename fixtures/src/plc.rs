//! PLC directory fixture: serves DID documents for registered DIDs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

use crate::{did_document, FixtureServer, FIXTURE_DID, FIXTURE_HANDLE};

#[derive(Clone, Default)]
pub struct PlcState {
    documents: Arc<Mutex<HashMap<String, Value>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl PlcState {
    /// A directory that knows the fixture account, hosted on `pds_url`
    pub fn new(pds_url: &str) -> Self {
        let state = Self::default();
        state.register(FIXTURE_DID, did_document(FIXTURE_DID, FIXTURE_HANDLE, pds_url));
        state
    }

    pub fn register(&self, did: &str, document: Value) {
        self.documents
            .lock()
            .unwrap()
            .insert(did.to_string(), document);
    }

    /// Hold every lookup for `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

pub async fn spawn(pds_url: &str) -> anyhow::Result<(FixtureServer, PlcState)> {
    let state = PlcState::new(pds_url);
    let server = FixtureServer::spawn(|_| router(state.clone())).await?;
    Ok((server, state))
}

pub fn router(state: PlcState) -> Router {
    Router::new()
        .route("/:did", get(resolve_did))
        .route("/", get(|| async { "PLC Directory Fixture Server" }))
        .with_state(state)
}

async fn resolve_did(State(state): State<PlcState>, Path(did): Path<String>) -> Response {
    info!("PLC DIRECTORY: Resolving DID: {}", did);

    let delay = *state.delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    match state.documents.lock().unwrap().get(&did) {
        Some(document) => Json(document.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": format!("DID not registered: {did}") })),
        )
            .into_response(),
    }
}
