use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Default filter directive used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

/// Guards against double initialization of the global subscriber.
static INIT: Once = Once::new();

/// Initializes structured logging for the process.
///
/// Honors the `RUST_LOG` environment variable if set, otherwise logs at `info`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    });
}

/// Initializes tracing for tests.
///
/// Safe to call from every test; only the first call installs the subscriber.
/// Output is captured by the test harness and shown only on failure.
pub fn init_test_tracing() {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_test_writer()
            .init();
    });
}
