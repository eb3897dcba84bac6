// rust/bsp-core/src/telemetry.rs

//! Logging setup for binaries and tests that embed the coordination core.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a global `fmt` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` (e.g. `"info"` or
/// `"bsp_core=debug"`) is used. Returns false if a global subscriber was
/// already installed, which leaves that subscriber in place.
pub fn init_logging(default_level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
