//! Tracing subscriber setup

use crate::error::{HybridError, HybridResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Install a global fmt subscriber filtered by `filter`
///
/// `RUST_LOG` takes precedence when set. An invalid filter falls back to
/// `info`.
///
/// # Errors
/// `Config` if a global subscriber is already installed
pub fn init_tracing(filter: &str, format: LogFormat) -> HybridResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };

    installed.map_err(|e| HybridError::Config(format!("tracing already initialised: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_error() {
        let _ = init_tracing("debug", LogFormat::Text);
        let second = init_tracing("debug", LogFormat::Json);
        assert!(matches!(second, Err(HybridError::Config(_))));
    }
}
