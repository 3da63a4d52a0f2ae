/// Tracing subscriber setup
///
/// Installs the global fmt subscriber the same way for tests, tools and
/// embedding services. Safe to call more than once; only the first call wins.

use crate::config::LoggingConfig;
use tracing::level_filters::LevelFilter;

/// Initialize the global tracing subscriber from `config`
///
/// Returns false when a global subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let parsed = config.level.parse::<LevelFilter>();
    let level = parsed.as_ref().map_or(LevelFilter::INFO, |level| *level);

    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(config.with_target)
        .with_thread_ids(config.thread_ids)
        .with_level(true)
        .try_init()
        .is_ok();

    if installed {
        if parsed.is_err() {
            tracing::warn!("⚠️ Unknown log level '{}', using {}", config.level, level);
        }
        tracing::debug!("📝 Tracing initialized at level {}", level);
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        let config = LoggingConfig {
            level: "not-a-level".into(),
            thread_ids: false,
            with_target: false,
        };
        init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
