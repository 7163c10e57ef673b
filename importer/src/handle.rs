use std::time::Duration;

use async_trait::async_trait;
use atrium_api::types::string::{Did, Handle};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Report;
use futures::stream::{FuturesUnordered, StreamExt};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::api;
use crate::errors::{ErrorKind, FlowResult, ResolutionTarget, WithKind};

/// What the user typed into the handle field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountInput {
    Handle(Handle),
    /// Already a DID, handle resolution can be skipped
    Did(Did),
}

impl AccountInput {
    pub fn parse(input: &str) -> color_eyre::Result<Self> {
        let trimmed = input.trim();
        if trimmed.starts_with("did:") {
            return parse_did(trimmed).map(Self::Did);
        }

        parse_handle(trimmed).map(Self::Handle)
    }
}

/// Normalize and validate a handle as typed by a user
pub fn parse_handle(input: &str) -> color_eyre::Result<Handle> {
    let normalized = input.trim().trim_start_matches('@').to_lowercase();
    if normalized.is_empty() {
        return Err(eyre!("Handle is empty"));
    }

    Handle::new(normalized.clone()).map_err(|e| eyre!("Invalid handle {:?}: {}", normalized, e))
}

pub fn parse_did(input: &str) -> color_eyre::Result<Did> {
    Did::new(input.trim().to_string()).map_err(|e| eyre!("Invalid DID format {:?}: {}", input, e))
}

/// One way of turning a handle into a DID
///
/// `Ok(None)` means the strategy ran but had nothing to say about the handle.
#[async_trait]
pub trait HandleStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, handle: &Handle) -> color_eyre::Result<Option<Did>>;
}

const DNS_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Looks up the `_atproto.<handle>` TXT record
///
/// Each query is bounded by the resolver's own timeout; the race around all
/// strategies bounds the lookup as a whole.
pub struct DnsTxtStrategy {
    resolver: TokioAsyncResolver,
}

impl DnsTxtStrategy {
    pub fn new() -> Self {
        let mut options = ResolverOpts::default();
        options.timeout = DNS_QUERY_TIMEOUT;
        options.attempts = 2;
        options.try_tcp_on_error = true;
        options.use_hosts_file = false;

        let resolver = TokioAsyncResolver::tokio(ResolverConfig::cloudflare(), options);

        Self { resolver }
    }
}

impl Default for DnsTxtStrategy {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull the DID out of a `did=...` TXT value
pub fn parse_dns_txt(value: &str) -> Option<Did> {
    let did = value.trim().strip_prefix("did=")?;
    Did::new(did.trim().to_string()).ok()
}

#[async_trait]
impl HandleStrategy for DnsTxtStrategy {
    fn name(&self) -> &'static str {
        "dns"
    }

    async fn resolve(&self, handle: &Handle) -> color_eyre::Result<Option<Did>> {
        let name = format!("_atproto.{}", handle.as_str());
        debug!("Looking up TXT record {}", name);

        let lookup = self
            .resolver
            .txt_lookup(name.as_str())
            .await
            .wrap_err_with(|| format!("TXT lookup failed for {name}"))?;

        for record in lookup.iter() {
            let txt_data: String = record
                .txt_data()
                .iter()
                .map(|data| String::from_utf8_lossy(data).to_string())
                .collect();

            if let Some(did) = parse_dns_txt(&txt_data) {
                return Ok(Some(did));
            }
            debug!("Ignoring TXT record {:?} for {}", txt_data, name);
        }

        Ok(None)
    }
}

/// Fetches `https://<handle>/.well-known/atproto-did`
pub struct WellKnownStrategy {
    client: Client,
}

impl WellKnownStrategy {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

pub fn well_known_url(handle: &Handle) -> String {
    format!("https://{}/.well-known/atproto-did", handle.as_str())
}

#[async_trait]
impl HandleStrategy for WellKnownStrategy {
    fn name(&self) -> &'static str {
        "well-known"
    }

    async fn resolve(&self, handle: &Handle) -> color_eyre::Result<Option<Did>> {
        let url = well_known_url(handle);
        debug!("Fetching {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .wrap_err_with(|| format!("Failed to fetch {url}"))?;

        if !response.status().is_success() {
            return Err(eyre!("{} returned HTTP {}", url, response.status()));
        }

        let body = response.text().await?;
        let body = body.trim();
        if body.is_empty() {
            return Ok(None);
        }

        parse_did(body).map(Some)
    }
}

#[derive(Debug, Deserialize)]
struct ResolveHandleOutput {
    did: String,
}

/// Asks an AppView via `com.atproto.identity.resolveHandle`
pub struct AppViewStrategy {
    client: Client,
    appview_url: String,
}

impl AppViewStrategy {
    pub fn new(client: Client, appview_url: impl Into<String>) -> Self {
        Self {
            client,
            appview_url: appview_url.into(),
        }
    }
}

#[async_trait]
impl HandleStrategy for AppViewStrategy {
    fn name(&self) -> &'static str {
        "appview"
    }

    async fn resolve(&self, handle: &Handle) -> color_eyre::Result<Option<Did>> {
        let output: ResolveHandleOutput = api::query(
            &self.client,
            &self.appview_url,
            "com.atproto.identity.resolveHandle",
            &[("handle", handle.as_str())],
        )
        .await?;

        if output.did.trim().is_empty() {
            return Ok(None);
        }

        parse_did(&output.did).map(Some)
    }
}

/// Races every configured strategy; the first one to come back with a DID
/// wins and the rest are dropped.
pub struct HandleResolver {
    strategies: Vec<Box<dyn HandleStrategy>>,
    timeout: Duration,
}

impl HandleResolver {
    pub fn new(strategies: Vec<Box<dyn HandleStrategy>>, timeout: Duration) -> Self {
        Self {
            strategies,
            timeout,
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    #[tracing::instrument(skip(self), fields(handle = handle.as_str()))]
    pub async fn resolve(&self, handle: &Handle) -> FlowResult<Did> {
        let race = self.race(handle);

        let result = match tokio::time::timeout(self.timeout, race).await {
            Ok(result) => result,
            Err(elapsed) => Err(Report::new(elapsed)
                .wrap_err(format!("Timed out resolving handle {}", handle.as_str()))),
        };

        result.with_kind(ErrorKind::Resolution(ResolutionTarget::Handle))
    }

    async fn race(&self, handle: &Handle) -> color_eyre::Result<Did> {
        if self.strategies.is_empty() {
            return Err(eyre!("No handle resolution strategies are enabled"));
        }

        let mut attempts: FuturesUnordered<_> = self
            .strategies
            .iter()
            .map(|strategy| async move { (strategy.name(), strategy.resolve(handle).await) })
            .collect();

        let mut failures = Vec::new();
        while let Some((name, result)) = attempts.next().await {
            match result {
                Ok(Some(did)) => {
                    info!(
                        "Resolved handle {} to {} via {}",
                        handle.as_str(),
                        did.as_str(),
                        name
                    );
                    // Whatever is still in flight gets dropped with `attempts`
                    return Ok(did);
                }
                Ok(None) => {
                    debug!("Strategy {} found nothing for {}", name, handle.as_str());
                    failures.push(format!("{name}: no result"));
                }
                Err(e) => {
                    debug!("Strategy {} failed for {}: {}", name, handle.as_str(), e);
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        warn!("Every strategy failed for {}", handle.as_str());
        Err(eyre!(
            "Could not resolve handle {}: {}",
            handle.as_str(),
            failures.join("; ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        name: &'static str,
        delay: Duration,
        outcome: Result<Option<&'static str>, &'static str>,
    }

    #[async_trait]
    impl HandleStrategy for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn resolve(&self, _handle: &Handle) -> color_eyre::Result<Option<Did>> {
            tokio::time::sleep(self.delay).await;
            match self.outcome {
                Ok(Some(did)) => Ok(Some(parse_did(did)?)),
                Ok(None) => Ok(None),
                Err(msg) => Err(eyre!(msg)),
            }
        }
    }

    fn scripted(
        name: &'static str,
        delay_ms: u64,
        outcome: Result<Option<&'static str>, &'static str>,
    ) -> Box<dyn HandleStrategy> {
        Box::new(Scripted {
            name,
            delay: Duration::from_millis(delay_ms),
            outcome,
        })
    }

    fn handle() -> Handle {
        parse_handle("alice.example.com").unwrap()
    }

    #[test]
    fn test_parse_handle_normalizes_input() -> color_eyre::Result<()> {
        let handle = parse_handle("  @Alice.Example.COM ")?;
        assert_eq!(handle.as_str(), "alice.example.com");

        Ok(())
    }

    #[test]
    fn test_parse_handle_rejects_garbage() {
        assert!(parse_handle("").is_err());
        assert!(parse_handle("not a handle").is_err());
        assert!(parse_handle("nodots").is_err());
    }

    #[test]
    fn test_account_input_accepts_a_did() -> color_eyre::Result<()> {
        let input = AccountInput::parse("did:plc:abcdefg")?;
        assert!(matches!(input, AccountInput::Did(did) if did.as_str() == "did:plc:abcdefg"));

        let input = AccountInput::parse("alice.example.com")?;
        assert!(matches!(input, AccountInput::Handle(_)));

        Ok(())
    }

    #[test]
    fn test_parse_dns_txt() {
        assert_eq!(
            parse_dns_txt("did=did:plc:abcdefg").map(|d| d.as_str().to_string()),
            Some("did:plc:abcdefg".to_string())
        );
        assert!(parse_dns_txt("v=spf1 -all").is_none());
        assert!(parse_dns_txt("did=not-a-did").is_none());
    }

    #[test]
    fn test_well_known_url() {
        assert_eq!(
            well_known_url(&handle()),
            "https://alice.example.com/.well-known/atproto-did"
        );
    }

    #[tokio::test]
    async fn test_slow_success_wins_over_fast_failures() {
        let resolver = HandleResolver::new(
            vec![
                scripted("fails", 0, Err("nxdomain")),
                scripted("empty", 5, Ok(None)),
                scripted("slow", 30, Ok(Some("did:plc:winner"))),
            ],
            Duration::from_secs(5),
        );

        let did = resolver.resolve(&handle()).await.unwrap();
        assert_eq!(did.as_str(), "did:plc:winner");
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let resolver = HandleResolver::new(
            vec![
                scripted("late", 200, Ok(Some("did:plc:late"))),
                scripted("early", 10, Ok(Some("did:plc:early"))),
            ],
            Duration::from_secs(5),
        );

        let did = resolver.resolve(&handle()).await.unwrap();
        assert_eq!(did.as_str(), "did:plc:early");
    }

    #[tokio::test]
    async fn test_all_strategies_failing_is_a_handle_resolution_error() {
        let resolver = HandleResolver::new(
            vec![
                scripted("dns", 0, Err("nxdomain")),
                scripted("well-known", 0, Ok(None)),
            ],
            Duration::from_secs(5),
        );

        let err = resolver.resolve(&handle()).await.unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::Resolution(ResolutionTarget::Handle)
        );
    }

    #[tokio::test]
    async fn test_no_strategies_fails() {
        let resolver = HandleResolver::new(vec![], Duration::from_secs(5));

        let err = resolver.resolve(&handle()).await.unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::Resolution(ResolutionTarget::Handle)
        );
    }

    #[tokio::test]
    async fn test_hanging_strategies_time_out() {
        let resolver = HandleResolver::new(
            vec![scripted("stuck", 60_000, Ok(Some("did:plc:never")))],
            Duration::from_millis(20),
        );

        let err = resolver.resolve(&handle()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
