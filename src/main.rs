use std::sync::Arc;

use warp::Filter;

use interview_rtc::api;
use interview_rtc::collab::{CollabHub, StorageClient};
use interview_rtc::config::Config;
use interview_rtc::judge::JudgeClient;
use interview_rtc::signal::RoomRegistry;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let registry = RoomRegistry::new();
    let hub = CollabHub::new(config.collab.code_template.clone(), StorageClient::from_env());
    let judge = Arc::new(JudgeClient::from_env());

    let routes = api::signal_route(registry)
        .or(api::collab_route(hub))
        .or(api::execute_route(judge))
        .or(api::health_route())
        .or(api::config_route());

    let bind_address = config.bind_address();
    tracing::info!(address = %format!("{}:{}", config.server.host, config.server.port), "Starting server");

    warp::serve(routes).run(bind_address).await;
}
