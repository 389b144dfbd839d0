use clap::Parser;
use fixtures::{authz, run_server, FixtureArgs};

/// Authorization server fixture
#[derive(Parser, Debug)]
#[clap(name = "authz-fixture")]
struct Cli {
    #[clap(flatten)]
    common: FixtureArgs,

    /// Client id the token endpoint accepts
    #[arg(long, env = "OAUTH_CLIENT_ID", default_value = "fixture-client")]
    client_id: String,

    /// Client secret the token endpoint accepts
    #[arg(long, env = "OAUTH_CLIENT_SECRET", default_value = "fixture-secret")]
    client_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let state = authz::AuthzState::with_client(&args.client_id, &args.client_secret);

    run_server(args.common, authz::router(state)).await
}
