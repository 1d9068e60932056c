// logging.rs - Diagnostic logging setup
// Purpose: Route `tracing` diagnostics (swallowed network errors, retries,
//          skipped records) to stderr, filtered by RUST_LOG, while the
//          colored [*]/[+]/[!] lines stay on stdout
//          e.g. RUST_LOG=osintrust=debug

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global subscriber on stderr.
///
/// Falls back to `warn` (or `debug` when `verbose`) when `RUST_LOG` is unset.
/// A second call is a no-op.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init()
    {
        tracing::debug!("logging already initialized: {}", e);
    }
}
