use std::fmt;

use async_trait::async_trait;
use atrium_api::com::atproto::server::create_session;
use color_eyre::eyre::eyre;
use reqwest::Client;
use tracing::{error, info};
use url::Url;

use crate::api::{self, CallAuth};
use crate::errors::{ErrorKind, FlowResult, WithKind};

/// Handle and app password, held for a single run
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An authenticated session against one PDS
#[derive(Clone)]
pub struct Session {
    pub endpoint: Url,
    pub did: String,
    pub handle: String,
    pub(crate) access_jwt: String,
}

impl Session {
    pub fn new(endpoint: Url, did: String, handle: String, access_jwt: String) -> Self {
        Self {
            endpoint,
            did,
            handle,
            access_jwt,
        }
    }

    /// Route calls from this session through `service` (an `atproto-proxy` target)
    pub fn with_proxy(self, service: impl Into<String>) -> ProxiedSession {
        ProxiedSession {
            session: self,
            service: service.into(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint.as_str())
            .field("did", &self.did)
            .field("handle", &self.handle)
            .field("access_jwt", &"<redacted>")
            .finish()
    }
}

/// A session bound to a proxy target; the only way to reach the remote API
#[derive(Debug, Clone)]
pub struct ProxiedSession {
    session: Session,
    service: String,
}

impl ProxiedSession {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub(crate) fn call_auth(&self) -> CallAuth<'_> {
        CallAuth {
            bearer: Some(&self.session.access_jwt),
            proxy: Some(&self.service),
        }
    }
}

/// Exchanges credentials for a session
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, endpoint: &Url, credentials: &Credentials) -> FlowResult<Session>;
}

/// Logs in with `com.atproto.server.createSession`
pub struct XrpcAuthenticator {
    client: Client,
}

impl XrpcAuthenticator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn create_session(
        &self,
        endpoint: &Url,
        credentials: &Credentials,
    ) -> color_eyre::Result<Session> {
        if !credentials.is_complete() {
            return Err(eyre!("Username and password are both required"));
        }

        let input = create_session::InputData {
            allow_takendown: None,
            auth_factor_token: None,
            identifier: credentials.username.trim().to_string(),
            password: credentials.password.clone(),
        };

        // One attempt only: a failure here is almost always a bad password
        let output = api::procedure(
            &self.client,
            endpoint,
            create_session::NSID,
            &input,
            CallAuth::default(),
        )
        .await?;

        let output: create_session::OutputData = serde_json::from_value(output)
            .map_err(|e| eyre!("Failed to decode createSession response: {}", e))?;

        Ok(Session::new(
            endpoint.clone(),
            output.did.as_str().to_string(),
            output.handle.as_str().to_string(),
            output.access_jwt,
        ))
    }
}

#[async_trait]
impl Authenticator for XrpcAuthenticator {
    #[tracing::instrument(skip(self, credentials), fields(endpoint = endpoint.as_str(), username = credentials.username.as_str()))]
    async fn login(&self, endpoint: &Url, credentials: &Credentials) -> FlowResult<Session> {
        let session = self
            .create_session(endpoint, credentials)
            .await
            .with_kind(ErrorKind::Auth)
            .inspect_err(|e| error!("Login failed: {}", e))?;

        info!("Logged in as {} ({})", session.handle, session.did);
        Ok(session)
    }
}
