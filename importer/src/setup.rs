use color_eyre::eyre::WrapErr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracing_tree::HierarchicalLayer;

/// Install the tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise `verbose` picks between info and debug
/// for this crate. Everything goes to stderr so stdout stays for the user.
pub fn setup_tracing(crate_name: &str, verbose: bool) -> color_eyre::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("warn,{crate_name}={default_level}")))
        .wrap_err("Invalid log filter")?;

    let tree = HierarchicalLayer::new(2)
        .with_writer(std::io::stderr)
        .with_targets(verbose)
        .with_bracketed_fields(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(tree)
        .try_init()
        .wrap_err("Failed to initialize tracing")?;

    Ok(())
}
