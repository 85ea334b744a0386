use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;

use frasertickets_server::config::{init_tracing, load_env, Config};
use frasertickets_server::routes::create_app;
use frasertickets_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let environment = load_env();
    init_tracing(environment);

    let config = Config::from_env();
    tracing::info!(environment = environment.as_str(), "Starting FraserTickets API");

    let state = AppState::from_config(&config).await?;
    let app = create_app(state, &config);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Server running at http://{}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("server failed")
}
