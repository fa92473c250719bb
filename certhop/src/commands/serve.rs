use std::path::PathBuf;
use std::sync::Arc;

use certhop_core::WebrootStore;
use certhop_core::responder;
use tokio::net::TcpListener;
use tracing::info;

pub async fn run(webroot: PathBuf, listen: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|e| format!("Failed to listen on {}: {}", listen, e))?;
    let store = Arc::new(WebrootStore::new(webroot));

    tokio::select! {
        result = responder::serve(listener, store) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
