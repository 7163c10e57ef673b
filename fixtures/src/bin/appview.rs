use clap::Parser;
use fixtures::{
    appview::{router, AppViewState},
    run_server, FixtureArgs,
};

/// AppView fixture server
#[derive(Parser, Debug)]
#[clap(name = "appview-fixture")]
struct Cli {
    #[clap(flatten)]
    common: FixtureArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    run_server(args.common, |_| router(AppViewState::default())).await
}
