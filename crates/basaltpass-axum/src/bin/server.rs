// Development server over the in-memory store.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use basaltpass::AppContext;
use basaltpass_core::options::BasaltOptions;
use basaltpass_memory::MemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = BasaltOptions::default();
    let addr = std::env::var("BASALTPASS_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".into());
    let ctx = AppContext::new(options, Arc::new(MemoryStore::new()));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "basaltpass listening");
    axum::serve(listener, basaltpass_axum::router(ctx)).await?;
    Ok(())
}
