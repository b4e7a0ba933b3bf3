use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Environment variable holding the filter directives, e.g. `ptrmemo=debug`.
pub const LOG_ENV: &str = "PTRMEMO_LOG";

const DEFAULT_DIRECTIVES: &str = "info";

/// Installs the global fmt subscriber.
///
/// Safe to call more than once: later calls are ignored, which lets tests and
/// binaries share the same entry point.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| filter_for(None));
    install(filter);
}

/// Installs the subscriber with explicit directives, ignoring the environment.
pub fn init_logging_with(directives: &str) {
    install(filter_for(Some(directives)));
}

fn filter_for(directives: Option<&str>) -> EnvFilter {
    EnvFilter::try_new(directives.unwrap_or(DEFAULT_DIRECTIVES))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

fn install(filter: EnvFilter) {
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init();
}
