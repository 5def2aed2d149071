//! Structured logging setup.
//!
//! Environment variables:
//! - RUST_LOG: standard EnvFilter directives (default: info with noisy
//!   dependency targets turned down)
//! - LOG_FORMAT: "json" for machine-readable output, anything else for the
//!   human-readable formatter

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber for the whole process.
///
/// Safe to call once at startup; a second call returns an error from the
/// global-default registration, which callers may ignore in tests.
pub fn init_telemetry() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,actix_web=info,actix_server=info,diesel=warn,reqwest=warn".into());

    let json_output = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    if json_output {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to init telemetry: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to init telemetry: {e}"))?;
    }

    Ok(())
}
