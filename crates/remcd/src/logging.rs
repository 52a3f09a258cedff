//! Tracing subscriber setup.

use remc_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `[logging].level`.
///
/// Logs go to stderr so one-shot commands keep stdout for their output.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)));

    if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn default_directives(level: &str) -> String {
    format!("{level},remcd=debug,remc=debug")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_keep_remc_at_debug() {
        assert_eq!(default_directives("info"), "info,remcd=debug,remc=debug");
        assert_eq!(default_directives("warn"), "warn,remcd=debug,remc=debug");
    }
}
