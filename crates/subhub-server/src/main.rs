//! subhub — a Pusher-protocol-compatible realtime messaging hub.
//!
//! WebSocket gateway + REST event-injection surface, backed by a Redis
//! PUB/SUB bus for cross-node fan-out.

mod api;
mod channels;
mod cli;
mod core;
mod services;
mod state;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use subhub_common::config::AppConfig;

use crate::core::bus::PubSubBus;
use crate::core::index::SubscriptionIndex;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = cli::Cli::parse();
    let defaults = args.into_defaults();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(defaults.server.log_level.clone())),
        )
        .json()
        .init();

    tracing::info!("starting subhub server");

    let config = AppConfig::load(defaults).expect("failed to load configuration");

    let index = Arc::new(SubscriptionIndex::new());
    let (bus, _reader_handle) =
        PubSubBus::connect(&config.pubsub, config.redis.slave_url(), index.clone())
            .await
            .expect("failed to connect to redis");
    tracing::info!(node_id = %bus.node_id(), mode = ?config.pubsub.mode, "pubsub bus connected");

    let state = Arc::new(AppState {
        bus,
        index,
        config: config.clone(),
    });

    let app = Router::new()
        .merge(ws::router(state.clone()))
        .merge(api::router(state.clone()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config
        .server
        .http_addr
        .parse()
        .expect("SUBHUB__SERVER__HTTP_ADDR must be a valid socket address");
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C handler");
    tracing::info!("shutdown signal received");
}
