use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

/// Serve `app` on `addr` until the listener fails
pub async fn run_server(addr: SocketAddr, app: axum::Router) -> color_eyre::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
