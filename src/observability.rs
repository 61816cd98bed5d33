//! Logging initialization
//!
//! Structured logging via `tracing`, filtered through `RUST_LOG`. Call once
//! at application startup; repeated calls are harmless no-ops so tests can
//! initialize freely.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging and tracing infrastructure.
pub fn init_logging() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vaultgraph=debug,info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    // try_init so a second initialization (tests, embedders with their own
    // subscriber) is not an error.
    if tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
    {
        info!("vaultgraph observability initialized");
    }
    Ok(())
}
