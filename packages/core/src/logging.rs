//! Logging initialization
//!
//! The core only emits `tracing` events; embedders and tests call
//! [`init_tracing`] once to route them to stdout.

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter` (e.g. `"datamodel_core=debug"`)
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing("datamodel_core=debug");
        init_tracing("datamodel_core=debug");
    }
}
