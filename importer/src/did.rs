use async_trait::async_trait;
use atrium_api::types::string::Did;
use color_eyre::eyre::{eyre, WrapErr};
use reqwest::Client;
use serde_json::Value;
use tracing::{error, info, warn};
use url::Url;

use crate::errors::{ErrorKind, FlowResult, ResolutionTarget, WithKind};

/// Service type of the personal data server entry in a DID document
pub const PDS_SERVICE_TYPE: &str = "AtprotoPersonalDataServer";

/// A way of fetching the DID document for one DID method
#[async_trait]
pub trait DocumentMethod: Send + Sync {
    /// Method prefix this handles, e.g. `did:plc:`
    fn prefix(&self) -> &'static str;

    async fn fetch(&self, did: &Did) -> color_eyre::Result<Value>;
}

/// Fetches `did:plc` documents from a PLC directory
pub struct PlcMethod {
    client: Client,
    plc_directory_url: String,
}

impl PlcMethod {
    pub fn new(client: Client, plc_directory_url: impl Into<String>) -> Self {
        Self {
            client,
            plc_directory_url: plc_directory_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl DocumentMethod for PlcMethod {
    fn prefix(&self) -> &'static str {
        "did:plc:"
    }

    async fn fetch(&self, did: &Did) -> color_eyre::Result<Value> {
        let url = format!("{}/{}", self.plc_directory_url, did.as_str());
        info!(
            "Resolving DID document for {} via PLC directory at {}",
            did.as_str(),
            self.plc_directory_url
        );

        fetch_document(&self.client, &url).await
    }
}

/// Fetches `did:web` documents from the domain itself
pub struct WebMethod {
    client: Client,
}

impl WebMethod {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Where the document for a `did:web` lives
///
/// Only host-level identifiers are accepted; a port is percent-encoded as
/// `%3A`. Localhost is served over plain http.
pub fn did_web_url(did: &Did) -> color_eyre::Result<String> {
    let id = did
        .as_str()
        .strip_prefix("did:web:")
        .ok_or_else(|| eyre!("{} is not a did:web", did.as_str()))?;

    if id.contains(':') {
        return Err(eyre!("Path based did:web is not supported: {}", did.as_str()));
    }

    let host = urlencoding::decode(id)
        .wrap_err_with(|| format!("Invalid percent encoding in {}", did.as_str()))?;

    let scheme = if host == "localhost" || host.starts_with("localhost:") {
        "http"
    } else {
        "https"
    };

    Ok(format!("{scheme}://{host}/.well-known/did.json"))
}

#[async_trait]
impl DocumentMethod for WebMethod {
    fn prefix(&self) -> &'static str {
        "did:web:"
    }

    async fn fetch(&self, did: &Did) -> color_eyre::Result<Value> {
        let url = did_web_url(did)?;
        info!("Resolving DID document for {} from {}", did.as_str(), url);

        fetch_document(&self.client, &url).await
    }
}

async fn fetch_document(client: &Client, url: &str) -> color_eyre::Result<Value> {
    let response = client
        .get(url)
        .send()
        .await
        .wrap_err_with(|| format!("Failed to request DID document from {url}"))?;

    if !response.status().is_success() {
        error!("Failed to get DID document: HTTP {}", response.status());
        return Err(eyre!(
            "Failed to get DID document from {}: HTTP {}",
            url,
            response.status()
        ));
    }

    let body = response.text().await?;
    let document = serde_json::from_str::<Value>(&body)
        .wrap_err_with(|| format!("Failed to decode DID document from {url}"))?;

    if !document.is_object() {
        return Err(eyre!("DID document from {} is not a JSON object", url));
    }

    Ok(document)
}

/// Find the PDS endpoint in a DID document
///
/// Takes the first service of the PDS type whose endpoint is a string. A
/// document without a service list just has no endpoint.
pub fn extract_pds_endpoint(document: &Value) -> color_eyre::Result<Url> {
    let Some(services) = document.get("service").and_then(Value::as_array) else {
        warn!("DID document has no service list");
        return Err(eyre!("No ATProto PDS service endpoint found"));
    };

    let endpoint = services
        .iter()
        .filter(|service| service.get("type").and_then(Value::as_str) == Some(PDS_SERVICE_TYPE))
        .find_map(|service| service.get("serviceEndpoint").and_then(Value::as_str))
        .ok_or_else(|| eyre!("No ATProto PDS service endpoint found"))?;

    let url = Url::parse(endpoint).wrap_err_with(|| format!("Invalid PDS endpoint {endpoint:?}"))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(eyre!("PDS endpoint {} is not an http(s) URL", endpoint));
    }

    Ok(url)
}

/// Turns a DID into the URL of its personal data server
pub struct DocumentResolver {
    methods: Vec<Box<dyn DocumentMethod>>,
}

impl DocumentResolver {
    pub fn new(methods: Vec<Box<dyn DocumentMethod>>) -> Self {
        Self { methods }
    }

    #[tracing::instrument(skip(self), fields(did = did.as_str()))]
    pub async fn resolve_endpoint(&self, did: &Did) -> FlowResult<Url> {
        self.find_endpoint(did)
            .await
            .with_kind(ErrorKind::Resolution(ResolutionTarget::Endpoint))
    }

    async fn find_endpoint(&self, did: &Did) -> color_eyre::Result<Url> {
        let method = self
            .methods
            .iter()
            .find(|m| did.as_str().starts_with(m.prefix()))
            .ok_or_else(|| eyre!("Unsupported DID method for {}", did.as_str()))?;

        let document = method.fetch(did).await?;
        let endpoint = extract_pds_endpoint(&document)
            .wrap_err_with(|| format!("No PDS for {}", did.as_str()))?;

        info!("Found PDS endpoint for DID {}: {}", did.as_str(), endpoint);
        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::parse_did;
    use serde_json::json;

    #[test]
    fn test_extract_pds_endpoint_takes_first_string_match() -> color_eyre::Result<()> {
        let doc = json!({
            "id": "did:plc:abcdefg",
            "service": [
                { "id": "#atproto_labeler", "type": "AtprotoLabeler", "serviceEndpoint": "https://labeler.example" },
                { "id": "#atproto_pds", "type": "AtprotoPersonalDataServer", "serviceEndpoint": { "uri": "https://object.example" } },
                { "id": "#atproto_pds", "type": "AtprotoPersonalDataServer", "serviceEndpoint": "https://pds.example.com" },
                { "id": "#backup", "type": "AtprotoPersonalDataServer", "serviceEndpoint": "https://second.example.com" }
            ]
        });

        let url = extract_pds_endpoint(&doc)?;
        assert_eq!(url.as_str(), "https://pds.example.com/");

        Ok(())
    }

    #[test]
    fn test_extract_pds_endpoint_without_service_list() {
        let doc = json!({ "id": "did:plc:abcdefg" });
        assert!(extract_pds_endpoint(&doc).is_err());

        let doc = json!({ "id": "did:plc:abcdefg", "service": [] });
        assert!(extract_pds_endpoint(&doc).is_err());
    }

    #[test]
    fn test_extract_pds_endpoint_rejects_non_urls() {
        let doc = json!({
            "service": [
                { "type": "AtprotoPersonalDataServer", "serviceEndpoint": "not a url" }
            ]
        });
        assert!(extract_pds_endpoint(&doc).is_err());

        let doc = json!({
            "service": [
                { "type": "AtprotoPersonalDataServer", "serviceEndpoint": "mailto:someone@example.com" }
            ]
        });
        assert!(extract_pds_endpoint(&doc).is_err());
    }

    #[test]
    fn test_did_web_url() -> color_eyre::Result<()> {
        assert_eq!(
            did_web_url(&parse_did("did:web:example.com")?)?,
            "https://example.com/.well-known/did.json"
        );
        assert_eq!(
            did_web_url(&parse_did("did:web:localhost%3A3001")?)?,
            "http://localhost:3001/.well-known/did.json"
        );
        assert!(did_web_url(&parse_did("did:web:example.com:user:alice")?).is_err());
        assert!(did_web_url(&parse_did("did:plc:abcdefg")?).is_err());

        Ok(())
    }

    struct StaticMethod(Value);

    #[async_trait]
    impl DocumentMethod for StaticMethod {
        fn prefix(&self) -> &'static str {
            "did:plc:"
        }

        async fn fetch(&self, _did: &Did) -> color_eyre::Result<Value> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_unknown_method_is_an_endpoint_error() -> color_eyre::Result<()> {
        let resolver = DocumentResolver::new(vec![Box::new(StaticMethod(json!({})))]);

        let err = resolver
            .resolve_endpoint(&parse_did("did:key:zQ3shokFTS3brHcDQrn82RUDfCZESWL1ZdCEJwekUDPQiYBme")?)
            .await
            .unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::Resolution(ResolutionTarget::Endpoint)
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_resolver_dispatches_by_prefix() -> color_eyre::Result<()> {
        let resolver = DocumentResolver::new(vec![Box::new(StaticMethod(json!({
            "service": [
                { "type": "AtprotoPersonalDataServer", "serviceEndpoint": "https://pds.example.com" }
            ]
        })))]);

        let url = resolver
            .resolve_endpoint(&parse_did("did:plc:abcdefg")?)
            .await?;
        assert_eq!(url.host_str(), Some("pds.example.com"));

        Ok(())
    }
}
