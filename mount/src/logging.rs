//! Console logging setup for hosts embedding the mount

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Install a console subscriber. `RUST_LOG` overrides `default_level`.
///
/// Returns false when a global subscriber was already set, which leaves the
/// existing one in place.
pub fn init_logging(default_level: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init_logging("debug");
        assert!(!init_logging("info"));
    }
}
