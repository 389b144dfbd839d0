use oauth_callback::{
    config::ListenConfig,
    routes,
    server::run_server,
    setup::{setup_sentry, setup_tracing},
    AppState,
};
use tracing::info;

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    // Initialize Sentry for error tracking
    let _sentry_guard = setup_sentry();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { run_application().await })
}

async fn run_application() -> color_eyre::Result<()> {
    setup_tracing("oauth_callback")?;

    let app_state = AppState::from_env().await?;
    let listen = ListenConfig::from_env()?;

    info!("Spawning application tasks");
    let futures = spawn_application_tasks(app_state, listen);

    for result in futures::future::try_join_all(futures).await? {
        result?;
    }

    Ok(())
}

/// Spawn the public and internal listeners
fn spawn_application_tasks(
    app_state: AppState,
    listen: ListenConfig,
) -> Vec<tokio::task::JoinHandle<color_eyre::Result<()>>> {
    let mut futures = vec![];

    if is_feature_enabled("SERVER") {
        info!("Server Enabled");
        futures.push(tokio::spawn(run_server(
            listen.public,
            routes::routes(app_state.clone()),
        )));
    } else {
        info!("Server Disabled");
    }

    if is_feature_enabled("INTERNAL") {
        info!("Internal Server Enabled");
        futures.push(tokio::spawn(run_server(
            listen.internal,
            routes::internal_routes(app_state.clone()),
        )));
    } else {
        info!("Internal Server Disabled");
    }

    info!("All application tasks spawned successfully");
    futures
}

/// Check if a feature is enabled based on environment variables
fn is_feature_enabled(feature: &str) -> bool {
    std::env::var(format!("{}_DISABLED", feature)).unwrap_or_else(|_| "false".to_string()) != "true"
}
