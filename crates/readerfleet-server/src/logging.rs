//! Tracing subscriber setup.

use readerfleet_core::config::env_vars;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "readerfleet=debug" } else { "readerfleet=info" }
}

/// Install the global subscriber.
///
/// JSON output when `READERFLEET_LOG_JSON=true` (containers), compact text
/// otherwise.
pub fn init(verbose: bool) {
    let json_logging = env_vars::parsed::<bool>(env_vars::LOG_JSON).unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(default_directive(verbose)).add_directive(tracing::Level::WARN.into())
    });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init();
    }
}
