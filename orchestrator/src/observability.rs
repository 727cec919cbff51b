//! Tracing subscriber setup for binaries embedding the orchestrator.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the host process.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

const DEFAULT_FILTER: &str = "orchestrator=info";

/// Install a global subscriber filtered by `RUST_LOG` (default
/// `orchestrator=info`).
///
/// Returns `false` when a global subscriber was already installed, which
/// makes repeated calls from tests harmless.
pub fn init_tracing(format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
    };
    installed.is_ok()
}
