//! Logging setup for applications and tests
//!
//! The library itself only emits `tracing` events under the per-connection
//! `isotope` span. Installing a subscriber is left to the application; this
//! helper covers the common case.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is not set
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "isotope_core=debug"
    } else {
        "isotope_core=info"
    }
}

fn filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(debug)))
}

/// Install a console subscriber. `RUST_LOG` wins over `debug`.
///
/// Returns false if a global subscriber was already installed.
pub fn init(debug: bool) -> bool {
    tracing_subscriber::registry()
        .with(filter(debug))
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

/// Subscriber writing to the test harness output; safe to call from every test
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(filter(true))
        .with(fmt::layer().with_test_writer())
        .try_init();
}
