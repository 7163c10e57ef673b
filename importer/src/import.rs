use async_trait::async_trait;
use color_eyre::eyre::WrapErr;
use reqwest::Client;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::api;
use crate::auth::ProxiedSession;
use crate::bookmarks::{BookmarkRecord, ImportBatch};
use crate::errors::{ErrorKind, FlowResult, WithKind};

/// How far the replay has got
///
/// `imported` counts records attempted, including skipped ones, and only
/// ever goes up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportProgress {
    pub imported: usize,
    pub total: usize,
}

impl ImportProgress {
    pub fn is_complete(&self) -> bool {
        self.imported == self.total
    }
}

/// Result of a batch that ran to the end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub written: usize,
    pub skipped: usize,
    pub total: usize,
}

/// Sends one bookmark to the remote API
#[async_trait]
pub trait BookmarkWriter: Send + Sync {
    async fn create_bookmark(&self, record: &BookmarkRecord) -> color_eyre::Result<()>;
}

/// Writes bookmarks with `app.bsky.bookmark.createBookmark` through the
/// session's proxy target
pub struct XrpcBookmarkWriter {
    client: Client,
    session: ProxiedSession,
}

impl XrpcBookmarkWriter {
    pub fn new(client: Client, session: ProxiedSession) -> Self {
        Self { client, session }
    }
}

#[async_trait]
impl BookmarkWriter for XrpcBookmarkWriter {
    async fn create_bookmark(&self, record: &BookmarkRecord) -> color_eyre::Result<()> {
        api::procedure(
            &self.client,
            &self.session.session().endpoint,
            "app.bsky.bookmark.createBookmark",
            &record.subject(),
            self.session.call_auth(),
        )
        .await?;

        Ok(())
    }
}

/// Create a progress channel for a batch of `total` records
pub fn progress_channel(total: usize) -> (watch::Sender<ImportProgress>, watch::Receiver<ImportProgress>) {
    watch::channel(ImportProgress { imported: 0, total })
}

/// Replay a batch, one record at a time, in batch order
///
/// Each record bumps the progress before its call goes out. Records that are
/// not feed posts are counted but never sent. The first failed write stops
/// the batch; nothing after it is attempted and progress stays where it was.
#[tracing::instrument(skip_all, fields(total = batch.len()))]
pub async fn replay<W: BookmarkWriter + ?Sized>(
    writer: &W,
    batch: &ImportBatch,
    progress: &watch::Sender<ImportProgress>,
) -> FlowResult<ImportSummary> {
    let total = batch.len();
    progress.send_modify(|p| {
        p.total = total;
    });

    let mut written = 0;
    let mut skipped = 0;

    for (index, record) in batch.iter().enumerate() {
        progress.send_modify(|p| {
            p.imported = (p.imported + 1).min(total);
        });

        if !record.is_feed_post() {
            debug!("Skipping {}, not a feed post", record.uri);
            skipped += 1;
            continue;
        }

        writer
            .create_bookmark(record)
            .await
            .wrap_err_with(|| {
                format!(
                    "Failed to bookmark {} ({} of {})",
                    record.uri,
                    index + 1,
                    total
                )
            })
            .with_kind(ErrorKind::RemoteWrite)
            .inspect_err(|e| error!("Import aborted: {}", e))?;

        written += 1;
        debug!("Bookmarked {} ({}/{})", record.uri, index + 1, total);
    }

    info!(
        "Import finished: {} bookmarked, {} skipped of {}",
        written, skipped, total
    );

    Ok(ImportSummary {
        written,
        skipped,
        total,
    })
}
