use axum::Router;
use clap::Parser;
use serde_json::{json, Value};
use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub mod appview;
pub mod pds;
pub mod plc;

/// The account every fixture server knows about out of the box
pub const FIXTURE_DID: &str = "did:plc:abcdefg";
pub const FIXTURE_HANDLE: &str = "fixture-user.test";
pub const FIXTURE_PASSWORD: &str = "fixture-app-password";

/// Common CLI arguments for all fixture servers
#[derive(Parser, Debug, Clone)]
pub struct FixtureArgs {
    /// The port to listen on
    #[arg(short, long, default_value = "0")]
    pub port: u16,

    /// The host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,

    /// Force allow running without required environment variables (for development)
    #[arg(long)]
    pub force: bool,
}

/// Helper to get a required environment variable or return an error
pub fn require_env_var(name: &str, force: bool) -> anyhow::Result<String> {
    match env::var(name) {
        Ok(value) => Ok(value),
        Err(_) => {
            if force {
                error!("WARNING: Required environment variable {} not set. Using placeholder value because --force was specified.", name);
                Ok("http://localhost:3000".to_string())
            } else {
                anyhow::bail!(
                    "Required environment variable {} not set. Use --force to bypass this check.",
                    name
                )
            }
        }
    }
}

/// A DID document with a single PDS service
pub fn did_document(did: &str, handle: &str, pds_url: &str) -> Value {
    json!({
        "@context": ["https://w3id.org/did/v1"],
        "id": did,
        "alsoKnownAs": [format!("at://{handle}")],
        "verificationMethod": [
            {
                "id": format!("{did}#atproto"),
                "type": "Multikey",
                "controller": did,
                "publicKeyMultibase": "zQ3shokFTS3brHcDQrn82RUDfCZESWL1ZdCEJwekUDPQiYBme"
            }
        ],
        "service": [
            {
                "id": "#atproto_pds",
                "type": "AtprotoPersonalDataServer",
                "serviceEndpoint": pds_url
            }
        ]
    })
}

/// Common function to run a fixture server
///
/// The app is built once the listener is bound, so it can know its own URL.
pub async fn run_server<F>(args: FixtureArgs, make_app: F) -> anyhow::Result<()>
where
    F: FnOnce(&str) -> Router,
{
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let addr = format!("{}:{}", args.host, args.port).parse::<SocketAddr>()?;
    let listener = TcpListener::bind(addr).await?;
    let base_url = base_url(&listener)?;

    let app = make_app(&base_url).layer(TraceLayer::new_for_http());

    info!("Fixture server listening on {}", base_url);
    axum::serve(listener, app).await?;

    Ok(())
}

fn base_url(listener: &TcpListener) -> anyhow::Result<String> {
    let addr = listener.local_addr()?;
    Ok(format!("http://{}:{}", addr.ip(), addr.port()))
}

/// A fixture server running inside the current tokio runtime
///
/// The server is aborted when this is dropped.
pub struct FixtureServer {
    pub url: String,
    pub port: u16,
    handle: JoinHandle<()>,
}

impl FixtureServer {
    /// Bind an ephemeral port on localhost and serve the app built for it
    pub async fn spawn<F>(make_app: F) -> anyhow::Result<Self>
    where
        F: FnOnce(&str) -> Router,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = base_url(&listener)?;
        let port = listener.local_addr()?.port();
        let app = make_app(&url);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Fixture server stopped: {}", e);
            }
        });

        Ok(Self { url, port, handle })
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_did_document_points_at_pds() {
        let doc = did_document(FIXTURE_DID, FIXTURE_HANDLE, "http://127.0.0.1:3001");

        assert_eq!(doc["id"], FIXTURE_DID);
        assert_eq!(doc["alsoKnownAs"][0], "at://fixture-user.test");
        assert_eq!(doc["service"][0]["type"], "AtprotoPersonalDataServer");
        assert_eq!(doc["service"][0]["serviceEndpoint"], "http://127.0.0.1:3001");
    }

    #[test]
    fn test_require_env_var_with_force() -> anyhow::Result<()> {
        env::remove_var("FIXTURE_TEST_UNSET_VAR");

        assert!(require_env_var("FIXTURE_TEST_UNSET_VAR", false).is_err());
        assert_eq!(
            require_env_var("FIXTURE_TEST_UNSET_VAR", true)?,
            "http://localhost:3000"
        );

        Ok(())
    }
}
