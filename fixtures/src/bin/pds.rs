use clap::Parser;
use fixtures::{
    pds::{router, PdsState},
    run_server, FixtureArgs,
};

/// PDS (Personal Data Server) fixture server
#[derive(Parser, Debug)]
#[clap(name = "pds-fixture")]
struct Cli {
    #[clap(flatten)]
    common: FixtureArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    run_server(args.common, |url| router(PdsState::new(url))).await
}
