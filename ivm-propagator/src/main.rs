use std::sync::Arc;

use anyhow::Result;
use ivm_models::SinkRule;
use ivm_observability::{TracingConfig, setup_tracing};
use ivm_propagator::{
    MemorySearchSink, StaticContractLoader, build_service, config::AppConfig,
    sinks::SinkShipper,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load_from_env()?;

    let tracing_config = TracingConfig::new(
        "ivm-propagator",
        &config.log_level,
        config.log_format.to_lowercase() == "json",
    );
    setup_tracing(tracing_config).expect("Failed to setup tracing");

    info!("Starting change propagator with environment-based config");

    // Contract loading and sink wiring are deployment seams; the defaults
    // below give a self-contained in-memory composition.
    let loader = Arc::new(StaticContractLoader::new());
    let search_sink: Arc<dyn SinkShipper> =
        Arc::new(MemorySearchSink::new("search"));
    let rules: Vec<SinkRule> = Vec::new();

    let (server, pool) =
        build_service(&config, loader, vec![search_sink], rules)?;

    info!("Starting propagator API server...");
    tokio::select! {
        result = server.serve() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }
    pool.shutdown().await;

    Ok(())
}
