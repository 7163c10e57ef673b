use std::path::PathBuf;

use bookmark_importer::{
    auth::Credentials,
    bookmarks,
    import::{progress_channel, ImportProgress},
    setup::setup_tracing,
    AppState, Flow, FlowError, Recovery,
};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

/// Import bookmarks from a backup file into a Bluesky account
#[derive(Parser, Debug)]
#[clap(name = "bookmark-importer", version)]
struct Cli {
    /// Your handle (e.g. alice.bsky.social) or DID
    #[arg(short = 'u', long, env = "BSKY_HANDLE")]
    handle: String,

    /// An app password for the account
    #[arg(short, long, env = "BSKY_APP_PASSWORD", hide_env_values = true)]
    password: String,

    /// The backup file, a .json export with a `posts` array
    backup: PathBuf,

    /// Log more
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    // One thread is plenty: every step but handle resolution runs one call at a time
    let ok = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(async { run(cli).await })?;

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Returns whether the import went through
async fn run(cli: Cli) -> color_eyre::Result<bool> {
    setup_tracing("bookmark_importer", cli.verbose)?;

    let app_state = AppState::from_env()?;
    let importer = app_state.importer();
    let mut flow = Flow::new();

    // The backup does not need the network, so check it before logging in
    let loaded = bookmarks::load_backup(&cli.backup);
    if let Err(err) = &loaded {
        report(err);
        return Ok(false);
    }

    let credentials = Credentials::new(cli.handle, cli.password);
    let session = match importer.sign_in(&mut flow, &credentials).await {
        Ok(session) => session,
        Err(err) => {
            report(&err);
            return Ok(false);
        }
    };
    drop(credentials);
    println!("Welcome, {}!", session.handle);

    let batch = match importer.accept_backup(&mut flow, loaded) {
        Ok(batch) => batch,
        Err(err) => {
            report(&err);
            return Ok(false);
        }
    };

    let (progress_tx, progress_rx) = progress_channel(batch.len());
    let printer = tokio::spawn(print_progress(progress_rx));

    let outcome = importer
        .import(&mut flow, session, &batch, &progress_tx)
        .await;
    drop(progress_tx);
    printer.await?;

    match outcome {
        Ok(summary) => {
            info!(?summary, "Import done");
            println!("Done! {} bookmarks imported.", summary.written);
            if summary.skipped > 0 {
                println!("{} records were not posts and were skipped.", summary.skipped);
            }
            println!("See them at {}", app_state.config.saved_posts_url);
            Ok(true)
        }
        Err(err) => {
            report(&err);
            Ok(false)
        }
    }
}

fn report(err: &FlowError) {
    error!(error = ?err, "Flow failed");
    eprintln!("{}", err.user_message());
    match err.recovery() {
        Recovery::ReselectFile => eprintln!("Pick another backup file and try again."),
        Recovery::RestartFromHandleEntry => {
            eprintln!("Nothing more will be imported; run the tool again to start over.")
        }
    }
}

async fn print_progress(mut rx: watch::Receiver<ImportProgress>) {
    while rx.changed().await.is_ok() {
        let ImportProgress { imported, total } = *rx.borrow_and_update();
        eprintln!("Importing bookmarks... {imported}/{total}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "bookmark-importer",
            "--handle",
            "alice.bsky.social",
            "--password",
            "abcd-efgh-ijkl-mnop",
            "backup.json",
        ])
        .unwrap();

        assert_eq!(cli.handle, "alice.bsky.social");
        assert_eq!(cli.backup, PathBuf::from("backup.json"));
        assert!(!cli.verbose);
    }
}
