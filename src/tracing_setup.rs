//! Logging setup for processes embedding the engine
//!
//! The engine itself only emits `tracing` events; hosts call [`init_tracing`]
//! once at startup to get a formatted subscriber.
//!
//! Configuration via environment variables:
//! - RUST_LOG: Log level filter (default: info)
//! - LUCID_LOG_FORMAT: `json` for structured output, anything else for text

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global subscriber. Returns an error if one is already set.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LUCID_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .try_init()?;
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent_safe() {
        // First call may or may not win depending on test ordering; the
        // second must fail cleanly instead of panicking.
        let _ = init_tracing();
        assert!(init_tracing().is_err());
    }
}
