//! Image Cache Proxy - HTTP front end for the disk-backed image cache
//!
//! Downloads images on request, keeps them in a size-bounded directory and
//! purges it under memory pressure.

mod error;
mod server;
mod types;

use crate::error::Result;
use crate::server::{spawn_pressure_logger, start_server, ServerState, SharedState};
use crate::types::ProxyConfig;
use image_cache::{CacheConfig, HttpImageSource};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("image_cache_proxy=info".parse()?)
        .add_directive("image_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting Image Cache Proxy...");

    let config = load_config();
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache.cache_dir);
    info!(
        "Max cache size: {} MB",
        config.cache.max_cache_size / (1024 * 1024)
    );
    info!("Request timeout: {} seconds", config.cache.request_timeout_secs);
    info!("Pressure threshold: {}", config.cache.pressure_threshold);

    let source = HttpImageSource::new(config.cache.request_timeout())?;
    let state: SharedState = Arc::new(ServerState::from_config(&config.cache, Arc::new(source)));
    state.store().init().await?;

    // Drop anything left over from a previous run that is already too big
    state.evictor.enforce().await;

    state.monitor.start();
    state.monitor.log_memory_usage();
    let _pressure_logger = spawn_pressure_logger(&state);

    // Start HTTP server (blocking)
    start_server(state.clone(), config.port).await?;

    state.monitor.stop();
    Ok(())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse::<T>().ok())
}

fn load_config() -> ProxyConfig {
    let defaults = ProxyConfig::default();
    let cache_defaults = defaults.cache;

    let port = env_parse("PORT").unwrap_or(defaults.port);

    let cache_dir = std::env::var("CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or(cache_defaults.cache_dir);

    let max_cache_size = env_parse("MAX_CACHE_SIZE").unwrap_or(cache_defaults.max_cache_size);

    let request_timeout_secs =
        env_parse("REQUEST_TIMEOUT_SECS").unwrap_or(cache_defaults.request_timeout_secs);

    let pressure_threshold = env_parse::<f64>("PRESSURE_THRESHOLD")
        .filter(|t| (0.0..=1.0).contains(t))
        .unwrap_or(cache_defaults.pressure_threshold);

    let pressure_poll_interval_secs =
        env_parse("PRESSURE_POLL_SECS").unwrap_or(cache_defaults.pressure_poll_interval_secs);

    ProxyConfig {
        port,
        cache: CacheConfig {
            cache_dir,
            max_cache_size,
            request_timeout_secs,
            pressure_threshold,
            pressure_poll_interval_secs,
            ..cache_defaults
        },
    }
}
