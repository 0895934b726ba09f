//! Tracing subscriber setup
//!
//! Logs go to stderr so reports on stdout stay machine-readable.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins; otherwise `debug` when requested, else `level`
pub fn filter_directive(level: &str, debug: bool) -> String {
    if debug {
        "debug".to_string()
    } else {
        level.to_string()
    }
}

pub fn init(level: &str, debug: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(level, debug)))
        .map_err(|e| anyhow!("invalid log level '{level}': {e}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flag_overrides_level() {
        assert_eq!(filter_directive("warn", true), "debug");
        assert_eq!(filter_directive("warn", false), "warn");
    }
}
