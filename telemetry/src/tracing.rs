use std::sync::Once;

use tracing_subscriber::EnvFilter;

static TEST_TRACING: Once = Once::new();

/// Initializes the global tracing subscriber for binaries.
///
/// Reads the `RUST_LOG` environment variable for filtering and defaults to
/// `info` when unset. Panics if a global subscriber is already installed,
/// since that indicates a double initialization bug in the caller.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Initializes tracing for tests.
///
/// Safe to call from every test. Initialization happens only once per process
/// and output is routed through the test writer so it interleaves correctly
/// with the test harness.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .with_test_writer()
            .init();
    });
}
