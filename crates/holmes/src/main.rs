//! Holmes - self-monitoring diagnostics agent
//!
//! Samples this process against its container limits and writes a
//! diagnostic dump whenever usage spikes, without operator involvement.

use anyhow::Result;
use holmes_lib::{CountingAllocator, EngineBuilder};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting holmes");

    let config = config::AgentConfig::load()?;
    let engine_config = config.engine_config()?;
    info!(
        instance = %config.instance,
        interval_secs = engine_config.interval.as_secs_f64(),
        dump_path = %engine_config.dump_path.display(),
        "Agent configured"
    );

    let engine = EngineBuilder::new()
        .config(engine_config)
        .instance(config.instance.clone())
        .build()?
        .start();

    let app_state = Arc::new(api::AppState::new(
        engine.config().clone(),
        engine.status_receiver(),
    ));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let reason = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            "SIGINT received"
        }
        served = api_handle => {
            match served {
                Ok(Ok(())) => "API server exited",
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    "API server failed"
                }
                Err(e) => {
                    error!(error = %e, "API server task panicked");
                    "API server failed"
                }
            }
        }
    };

    engine.shutdown(reason).await?;
    info!("Shutdown complete");

    Ok(())
}
