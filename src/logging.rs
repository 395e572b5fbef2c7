//! Process-wide `tracing` subscriber.

use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber that writes to stderr.
///
/// `RUST_LOG` takes precedence; otherwise `debug` selects the `debug` level
/// and everything else logs at `info`. A second call is a no-op.
pub fn init(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}
