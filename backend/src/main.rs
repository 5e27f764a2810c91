use clap::Parser;
use std::sync::Arc;

use calendar_backend::{
    config::Config,
    router,
    store::{MemoryStore, PgStore, Store},
    AppData,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Config::parse();

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, config.max_connections).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            log::warn!("DATABASE_URL not set, using in-memory store; data will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let backend = store.kind();
    let app = router(AppData::new(store, config.bcrypt_cost).await?);

    log::info!("Calendar server starting on {} ({} store)", config.bind, backend);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
