mod board;
mod config;
mod envelope;
mod hub;
mod registry;
mod routes;
mod state;
mod store;

use std::sync::Arc;

use crate::store::{BoardStore, MemoryStore, PgBoardStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::HubConfig::from_env();
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()
        .expect("invalid PORT");

    // Postgres when configured, otherwise serve from memory (non-fatal:
    // boards just won't survive a restart).
    let store: Arc<dyn BoardStore> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let store = PgBoardStore::connect(&url, config.db_max_connections)
                .await
                .expect("database init failed");
            tracing::info!("postgres board store initialized");
            Arc::new(store)
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set — boards will not survive restarts");
            Arc::new(MemoryStore::new())
        }
    };

    let state = state::AppState::new(store, config);
    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "retrohub listening");
    axum::serve(listener, app).await.expect("server failed");
}
