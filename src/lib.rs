pub mod bot;
pub mod completion;
pub mod config;
pub mod connections;
pub mod conversations;
pub mod db;
pub mod presence;
pub mod relay;
pub mod store;

mod appresult;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    extract::FromRef,
    http::{HeaderValue, Method, header},
    routing::get,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub use appresult::{AppError, AppResult};

use bot::BotAdapter;
use completion::OpenRouterClient;
use config::Config;
use connections::ConnectionHub;
use relay::Relay;
use store::SqliteStore;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub relay: Arc<Relay>,
}

pub fn router(app_state: AppState, client_origin: &str) -> anyhow::Result<Router> {
    let cors = CorsLayer::new()
        .allow_origin(
            HeaderValue::from_str(client_origin)
                .with_context(|| format!("CLIENT_ORIGIN {client_origin:?} is not a header value"))?,
        )
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Ok(Router::new()
        .route("/ws", get(relay::relay_ws))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = SqliteStore::connect(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;
    let db_pool = store.pool().clone();

    let bot = BotAdapter::new(
        Arc::new(OpenRouterClient::new(config.completion.clone())),
        config.bot.clone(),
    );
    let relay = Relay::start(Arc::new(store), ConnectionHub::new(), Some(bot)).await?;

    let app = router(
        AppState {
            relay: relay.clone(),
        },
        &config.client_origin,
    )?;

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("relay listening on http://localhost:{}", config.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    relay.shutdown().await?;
    db_pool.close().await;
    Ok(())
}
