//! Process-wide tracing setup.
//!
//! Protocol-level log messages sent to clients live in
//! [`crate::routes::LoggingRoute`]; this module only configures the
//! server's own diagnostics.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CRATE_TARGET: &str = "streamable_rpc";
const DEFAULT_LEVEL: &str = "info";

/// Expand a bare level into a crate-scoped directive.
fn directives(filter: &str) -> String {
    if filter.contains('=') || filter.contains(',') {
        filter.to_string()
    } else {
        format!("{CRATE_TARGET}={filter}")
    }
}

fn install(filter: EnvFilter) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
}

/// Install the subscriber using `RUST_LOG`, falling back to
/// `streamable_rpc=info`.
///
/// Fails if a global subscriber is already set.
pub fn try_init() -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(DEFAULT_LEVEL)));
    install(filter)
}

/// Install the subscriber with an explicit filter such as `debug` or
/// `streamable_rpc=trace,tower_http=debug`.
///
/// A bare level applies to this crate only. An unparsable filter falls back
/// to the default level.
pub fn init_with_filter(filter: &str) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_new(directives(filter))
        .unwrap_or_else(|_| EnvFilter::new(directives(DEFAULT_LEVEL)));
    install(filter)
}
