use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// The `SLUICE_LOG` environment variable takes precedence over the
/// level passed on the command line and accepts full filter directives.
pub fn init(color: bool, level: &str) {
    let filter = EnvFilter::try_from_env("SLUICE_LOG").unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(color)
        .init();
}

/// Subscriber for tests, safe to call more than once.
pub fn test_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
