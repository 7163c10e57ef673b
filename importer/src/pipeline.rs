//! Drives the flow through resolution, login and import.
//!
//! Everything between "next" on the credentials step and a session in hand is
//! one gate: any failure in there sends the flow back to handle entry.

use reqwest::Client;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::auth::{Authenticator, Credentials, Session};
use crate::bookmarks::ImportBatch;
use crate::did::DocumentResolver;
use crate::errors::{ErrorKind, FlowError, FlowResult, FormatProblem, ResolutionTarget, WithKind};
use crate::flow::Flow;
use crate::handle::{AccountInput, HandleResolver};
use crate::import::{self, BookmarkWriter, ImportProgress, ImportSummary, XrpcBookmarkWriter};

pub struct Importer {
    client: Client,
    handles: HandleResolver,
    documents: DocumentResolver,
    authenticator: Box<dyn Authenticator>,
    bookmark_proxy: String,
}

impl Importer {
    pub fn new(
        client: Client,
        handles: HandleResolver,
        documents: DocumentResolver,
        authenticator: Box<dyn Authenticator>,
        bookmark_proxy: String,
    ) -> Self {
        Self {
            client,
            handles,
            documents,
            authenticator,
            bookmark_proxy,
        }
    }

    /// Resolve the account behind the credentials and log in to its PDS
    #[tracing::instrument(skip_all, fields(username = credentials.username.as_str()))]
    pub async fn sign_in(&self, flow: &mut Flow, credentials: &Credentials) -> FlowResult<Session> {
        flow.enter_credentials(credentials);
        flow.start_resolving().with_kind(ErrorKind::Auth)?;

        match self.resolve_and_login(credentials).await {
            Ok(session) => {
                flow.authenticated().with_kind(ErrorKind::Auth)?;
                Ok(session)
            }
            Err(err) => Err(send_back(flow, err)),
        }
    }

    async fn resolve_and_login(&self, credentials: &Credentials) -> FlowResult<Session> {
        let did = match AccountInput::parse(&credentials.username)
            .with_kind(ErrorKind::Resolution(ResolutionTarget::Handle))?
        {
            AccountInput::Did(did) => did,
            AccountInput::Handle(handle) => self.handles.resolve(&handle).await?,
        };

        let endpoint = self.documents.resolve_endpoint(&did).await?;

        // Log in as the account that was resolved, not as whatever was typed
        let login = Credentials::new(did.as_str(), credentials.password.as_str());
        self.authenticator.login(&endpoint, &login).await
    }

    /// Hand a loaded backup to the flow
    ///
    /// A rejected backup leaves the flow on the file picker.
    pub fn accept_backup(
        &self,
        flow: &mut Flow,
        loaded: FlowResult<ImportBatch>,
    ) -> FlowResult<ImportBatch> {
        match loaded {
            Ok(batch) => {
                flow.file_selected()
                    .with_kind(ErrorKind::Format(FormatProblem::FileType))?;
                Ok(batch)
            }
            Err(err) => {
                flow.file_rejected(&err);
                Err(err)
            }
        }
    }

    /// Replay the batch through the session's proxied writer
    pub async fn import(
        &self,
        flow: &mut Flow,
        session: Session,
        batch: &ImportBatch,
        progress: &watch::Sender<ImportProgress>,
    ) -> FlowResult<ImportSummary> {
        info!(
            "Importing {} bookmarks for {} via {}",
            batch.len(),
            session.handle,
            self.bookmark_proxy
        );
        let writer = XrpcBookmarkWriter::new(
            self.client.clone(),
            session.with_proxy(self.bookmark_proxy.clone()),
        );

        run_import(flow, &writer, batch, progress).await
    }
}

/// Runs the import step of the flow with any writer
pub async fn run_import<W: BookmarkWriter + ?Sized>(
    flow: &mut Flow,
    writer: &W,
    batch: &ImportBatch,
    progress: &watch::Sender<ImportProgress>,
) -> FlowResult<ImportSummary> {
    flow.start_import().with_kind(ErrorKind::RemoteWrite)?;

    match import::replay(writer, batch, progress).await {
        Ok(summary) => {
            flow.finish().with_kind(ErrorKind::RemoteWrite)?;
            Ok(summary)
        }
        Err(err) => Err(send_back(flow, err)),
    }
}

/// Fail the flow and force it back to handle entry
fn send_back(flow: &mut Flow, err: FlowError) -> FlowError {
    flow.fail(&err);
    if let Err(recover_err) = flow.recover() {
        warn!("Could not reset the flow: {}", recover_err);
    }
    err
}
