mod coap;
mod config;
mod error;
mod logging;
mod models;
mod sensor;

use std::sync::Arc;

use config::CONFIG;
use models::{CorrelationStore, MemoryStore, PgStore};
use tracing::{info, warn};

async fn build_store() -> Result<Arc<dyn CorrelationStore>, error::DBError> {
    match CONFIG.database_url() {
        Some(database_url) => {
            let conn =
                models::establish_db_connection(&database_url, CONFIG.database_max_connections())
                    .await?;
            models::migrate(&conn).await?;
            let store = PgStore::new(conn);
            models::check_schema(store.pool()).await?;
            info!("Connected to database");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, readings are kept in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_tracing(CONFIG.trace_stdout());
    info!("Starting grape, core version {}", grape_core::CORE_VERSION);

    let store = build_store().await?;
    let server = coap::CoapServer::bind(
        &CONFIG.coap_bind_addr(),
        store,
        coap::ServerOptions::from(&*CONFIG),
    )
    .await?;

    tokio::select! {
        _ = Arc::new(server).run() => {}
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Received interrupt, shutting down");
        }
    }
    Ok(())
}
