use color_eyre::eyre::{eyre, WrapErr};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};
use url::Url;

/// Header the PDS reads to forward a call to another service
pub const PROXY_HEADER: &str = "atproto-proxy";

/// Error body returned by XRPC endpoints
#[derive(Debug, Deserialize)]
pub struct XrpcErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
}

/// Build `<base>/xrpc/<nsid>`, tolerating a trailing slash on the base
pub fn xrpc_url(base: &str, nsid: &str) -> String {
    format!("{}/xrpc/{}", base.trim_end_matches('/'), nsid)
}

/// Headers that go on an authenticated call
#[derive(Debug, Clone, Copy, Default)]
pub struct CallAuth<'a> {
    pub bearer: Option<&'a str>,
    pub proxy: Option<&'a str>,
}

/// Call an XRPC query (GET) and decode the JSON response
pub async fn query<T: DeserializeOwned>(
    client: &Client,
    base: &str,
    nsid: &str,
    params: &[(&str, &str)],
) -> color_eyre::Result<T> {
    let url = xrpc_url(base, nsid);
    debug!("XRPC query {}", url);

    let response = client
        .get(&url)
        .query(params)
        .send()
        .await
        .wrap_err_with(|| format!("Failed to call {nsid}"))?;

    let body = success_body(nsid, response).await?;
    serde_json::from_str::<T>(&body)
        .wrap_err_with(|| format!("Failed to decode {nsid} response: {body}"))
}

/// Call an XRPC procedure (POST with a JSON body)
///
/// Procedures with no output return `Value::Null`.
pub async fn procedure<B: Serialize + ?Sized>(
    client: &Client,
    base: &Url,
    nsid: &str,
    body: &B,
    auth: CallAuth<'_>,
) -> color_eyre::Result<Value> {
    let url = xrpc_url(base.as_str(), nsid);
    debug!("XRPC procedure {}", url);

    let mut request = client.post(&url).json(body);
    if let Some(token) = auth.bearer {
        request = request.bearer_auth(token);
    }
    if let Some(proxy) = auth.proxy {
        request = request.header(PROXY_HEADER, proxy);
    }

    let response = request
        .send()
        .await
        .wrap_err_with(|| format!("Failed to call {nsid}"))?;

    let body = success_body(nsid, response).await?;
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&body).wrap_err_with(|| format!("Failed to decode {nsid} response"))
}

/// Turn a non-2xx response into an error carrying the XRPC error name
async fn success_body(nsid: &str, response: reqwest::Response) -> color_eyre::Result<String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .wrap_err_with(|| format!("Failed to read {nsid} response"))?;

    if status.is_success() {
        return Ok(body);
    }

    let err = match serde_json::from_str::<XrpcErrorBody>(&body) {
        Ok(XrpcErrorBody { error, message }) => eyre!(
            "{} failed: HTTP {} {}: {}",
            nsid,
            status,
            error.unwrap_or_else(|| "UnknownError".to_string()),
            message.unwrap_or_default()
        ),
        Err(_) => eyre!("{} failed: HTTP {} - {}", nsid, status, body),
    };
    error!("{}", err);

    Err(err)
}
