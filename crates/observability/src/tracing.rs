//! Tracing/logging initialization.
//!
//! Repository operation records are emitted under the `idrepo::repository`
//! target, so `RUST_LOG=idrepo::repository=debug` surfaces them without
//! raising the level everywhere else.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install(filter);
}

/// Initialize with explicit filter directives, ignoring `RUST_LOG`.
///
/// Returns `false` if the directives do not parse or a global subscriber is
/// already installed.
pub fn init_with_filter(directives: &str) -> bool {
    match EnvFilter::try_new(directives) {
        Ok(filter) => install(filter),
        Err(_) => false,
    }
}

fn install(filter: EnvFilter) -> bool {
    // JSON logs + timestamps; targets kept so repository records stay filterable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_directives_are_rejected() {
        assert!(!init_with_filter("idrepo=verbose"));
    }

    #[test]
    fn repeated_init_is_harmless() {
        init();
        init();
        assert!(!init_with_filter("idrepo::repository=debug"));
    }
}
