//! Tracing subscriber setup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directives applied when `RUST_LOG` is not set.
pub const DEFAULT_DIRECTIVES: &str = "tfscratch=info,warn";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install the global subscriber.
///
/// Emits JSON lines when `CI` is set, human-readable output otherwise.
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let registry = tracing_subscriber::registry().with(filter());

    let result = if std::env::var_os("CI").is_some() {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };

    if result.is_err() {
        // Logging already initialized, continue
    }
}

/// Like [`init`], but writes through the test harness so output is
/// captured per test.
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_target(false).with_test_writer())
        .try_init();
}
