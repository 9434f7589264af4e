// ABOUTME: Tracing subscriber setup for processes embedding gangway.
// ABOUTME: Honours RUST_LOG, otherwise warn (debug when verbose) with access log lines at info.

use tracing_subscriber::EnvFilter;

/// Default directives when `RUST_LOG` is unset.
fn default_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn,gangway::access=info")
    }
}

/// Install a global fmt subscriber. Fails if one is already installed.
pub fn init(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
}
