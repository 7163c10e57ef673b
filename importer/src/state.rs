use color_eyre::eyre::WrapErr;
use reqwest::Client;
use tracing::info;

use crate::auth::XrpcAuthenticator;
use crate::config::Config;
use crate::did::{DocumentMethod, DocumentResolver, PlcMethod, WebMethod};
use crate::handle::{AppViewStrategy, DnsTxtStrategy, HandleResolver, HandleStrategy, WellKnownStrategy};
use crate::pipeline::Importer;

/// Everything a run needs: configuration and the shared HTTP client
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub http: Client,
}

impl AppState {
    pub fn from_env() -> color_eyre::Result<Self> {
        Self::from_config(Config::from_env()?)
    }

    pub fn from_config(config: Config) -> color_eyre::Result<Self> {
        info!("APPVIEW_URL: {}", config.appview_url);
        info!("PLC_DIRECTORY_URL: {}", config.plc_directory_url);

        // Every request gets the same timeout so no single call can hang the run
        let http = reqwest::ClientBuilder::new()
            .timeout(config.request_timeout)
            .use_rustls_tls()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .wrap_err("Failed to build HTTP client")?;

        Ok(Self { config, http })
    }

    pub fn handle_resolver(&self) -> HandleResolver {
        let mut strategies: Vec<Box<dyn HandleStrategy>> = vec![];

        if self.config.dns_resolution {
            strategies.push(Box::new(DnsTxtStrategy::new()));
        }
        if self.config.well_known_resolution {
            strategies.push(Box::new(WellKnownStrategy::new(self.http.clone())));
        }
        if self.config.appview_resolution {
            strategies.push(Box::new(AppViewStrategy::new(
                self.http.clone(),
                self.config.appview_url.clone(),
            )));
        }

        HandleResolver::new(strategies, self.config.resolve_timeout)
    }

    pub fn document_resolver(&self) -> DocumentResolver {
        let methods: Vec<Box<dyn DocumentMethod>> = vec![
            Box::new(PlcMethod::new(
                self.http.clone(),
                self.config.plc_directory_url.clone(),
            )),
            Box::new(WebMethod::new(self.http.clone())),
        ];

        DocumentResolver::new(methods)
    }

    pub fn importer(&self) -> Importer {
        Importer::new(
            self.http.clone(),
            self.handle_resolver(),
            self.document_resolver(),
            Box::new(XrpcAuthenticator::new(self.http.clone())),
            self.config.bookmark_proxy.clone(),
        )
    }
}
