//! A personal data server that only knows how to log in and save bookmarks

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::{did_document, FixtureServer, FIXTURE_DID, FIXTURE_HANDLE, FIXTURE_PASSWORD};

/// Proxy target the PDS expects bookmark writes to name
pub const APPVIEW_PROXY: &str = "did:web:api.bsky.app#bsky_appview";

#[derive(Debug, Clone)]
pub struct FixtureAccount {
    pub did: String,
    pub handle: String,
    pub password: String,
}

impl FixtureAccount {
    pub fn new(did: &str, handle: &str, password: &str) -> Self {
        Self {
            did: did.to_string(),
            handle: handle.to_string(),
            password: password.to_string(),
        }
    }

    fn access_jwt(&self) -> String {
        format!("fixture-access-{}", self.did)
    }
}

/// One `createBookmark` call as the PDS received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookmarkCall {
    pub did: String,
    pub cid: String,
    pub uri: String,
    pub proxy: String,
}

#[derive(Debug, Default)]
struct PdsData {
    accounts: Vec<FixtureAccount>,
    bookmarks: Vec<BookmarkCall>,
    fail_on_uri: Option<String>,
    login_attempts: usize,
}

/// Shared state of the fixture PDS; clones see the same data
#[derive(Clone)]
pub struct PdsState {
    base_url: String,
    data: Arc<Mutex<PdsData>>,
}

impl PdsState {
    /// A PDS at `base_url` with the default fixture account
    pub fn new(base_url: &str) -> Self {
        let state = Self {
            base_url: base_url.to_string(),
            data: Arc::new(Mutex::new(PdsData::default())),
        };
        state.add_account(FixtureAccount::new(
            FIXTURE_DID,
            FIXTURE_HANDLE,
            FIXTURE_PASSWORD,
        ));
        state
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The `did:web` this server hosts a document for
    ///
    /// Always spelled with `localhost`, since did:web resolvers only fall back
    /// to plain http for that host.
    pub fn web_did(&self) -> String {
        let port = self.base_url.rsplit(':').next().unwrap_or("80");
        format!("did:web:localhost%3A{port}")
    }

    pub fn add_account(&self, account: FixtureAccount) {
        self.data.lock().unwrap().accounts.push(account);
    }

    /// Make `createBookmark` fail for this uri
    pub fn fail_on(&self, uri: &str) {
        self.data.lock().unwrap().fail_on_uri = Some(uri.to_string());
    }

    pub fn bookmarks(&self) -> Vec<BookmarkCall> {
        self.data.lock().unwrap().bookmarks.clone()
    }

    pub fn login_attempts(&self) -> usize {
        self.data.lock().unwrap().login_attempts
    }

    fn account_for_token(&self, token: &str) -> Option<FixtureAccount> {
        self.data
            .lock()
            .unwrap()
            .accounts
            .iter()
            .find(|a| a.access_jwt() == token)
            .cloned()
    }
}

/// Spawn a PDS on an ephemeral port, handing back its state for inspection
pub async fn spawn() -> anyhow::Result<(FixtureServer, PdsState)> {
    let mut captured = None;
    let server = FixtureServer::spawn(|url| {
        let state = PdsState::new(url);
        captured = Some(state.clone());
        router(state)
    })
    .await?;

    let state = captured.ok_or_else(|| anyhow::anyhow!("PDS app was never built"))?;
    Ok((server, state))
}

pub fn router(state: PdsState) -> Router {
    Router::new()
        .route(
            "/xrpc/com.atproto.server.createSession",
            post(create_session),
        )
        .route(
            "/xrpc/app.bsky.bookmark.createBookmark",
            post(create_bookmark),
        )
        .route("/.well-known/did.json", get(did_json))
        .route("/.well-known/atproto-did", get(atproto_did))
        .with_state(state)
}

fn xrpc_error(status: StatusCode, error: &str, message: &str) -> Response {
    (status, Json(json!({ "error": error, "message": message }))).into_response()
}

#[derive(Debug, Deserialize)]
struct CreateSessionInput {
    identifier: String,
    password: String,
}

async fn create_session(
    State(state): State<PdsState>,
    Json(input): Json<CreateSessionInput>,
) -> Response {
    let account = {
        let mut data = state.data.lock().unwrap();
        data.login_attempts += 1;
        data.accounts
            .iter()
            .find(|a| a.handle == input.identifier || a.did == input.identifier)
            .filter(|a| a.password == input.password)
            .cloned()
    };

    match account {
        Some(account) => {
            info!("PDS: Logged in {}", account.handle);
            Json(json!({
                "accessJwt": account.access_jwt(),
                "refreshJwt": format!("fixture-refresh-{}", account.did),
                "handle": account.handle,
                "did": account.did,
                "active": true
            }))
            .into_response()
        }
        None => xrpc_error(
            StatusCode::UNAUTHORIZED,
            "AuthenticationRequired",
            "Invalid identifier or password",
        ),
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateBookmarkInput {
    cid: String,
    uri: String,
}

async fn create_bookmark(
    State(state): State<PdsState>,
    headers: HeaderMap,
    Json(input): Json<CreateBookmarkInput>,
) -> Response {
    let Some(account) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|token| state.account_for_token(token))
    else {
        return xrpc_error(
            StatusCode::UNAUTHORIZED,
            "AuthenticationRequired",
            "Missing or invalid access token",
        );
    };

    let proxy = headers
        .get("atproto-proxy")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if proxy != APPVIEW_PROXY {
        return xrpc_error(
            StatusCode::BAD_REQUEST,
            "InvalidRequest",
            "app.bsky.bookmark.createBookmark has to be proxied to the AppView",
        );
    }

    let mut data = state.data.lock().unwrap();
    if data.fail_on_uri.as_deref() == Some(input.uri.as_str()) {
        return xrpc_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "InternalServerError",
            "Internal Server Error",
        );
    }

    info!("PDS: Bookmarked {} for {}", input.uri, account.did);
    data.bookmarks.push(BookmarkCall {
        did: account.did,
        cid: input.cid,
        uri: input.uri,
        proxy,
    });

    StatusCode::OK.into_response()
}

async fn did_json(State(state): State<PdsState>) -> impl IntoResponse {
    Json(did_document(
        &state.web_did(),
        FIXTURE_HANDLE,
        state.base_url(),
    ))
}

async fn atproto_did() -> impl IntoResponse {
    FIXTURE_DID
}
