//! Logging setup for the `uniqfield` binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the binary.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::{Result, UniquenessError};

/// `RUST_LOG` wins over `level` when set.
fn build_env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut directives = vec![level.to_string()];
    // Keep dependency chatter down
    for (target, lvl) in [("rusqlite", "warn"), ("tokio", "warn")] {
        directives.push(format!("{}={}", target, lvl));
    }

    let filter_str = directives.join(",");
    EnvFilter::try_new(&filter_str).map_err(|e| {
        UniquenessError::config(format!("Invalid tracing filter '{}': {}", filter_str, e))
    })
}

/// Install a stderr fmt subscriber. Fails if one is already installed.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = build_env_filter(level)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .try_init()
        .map_err(|e| UniquenessError::config(format!("Logging already initialized: {}", e)))?;

    tracing::trace!("Logging initialized: level={}", level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_levels() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(build_env_filter("debug").is_ok());
        assert!(build_env_filter("uniqfield_orchestration=trace").is_ok());
        assert!(build_env_filter("uniqfield=notalevel").is_err());
    }
}
