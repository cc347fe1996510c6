//! Runtime Configuration
//!
//! Knobs for the per-thread reactive runtime. The defaults suit UI-style
//! workloads; tests and tools can tighten them.

use std::env;

/// Environment variable overriding [`RuntimeConfig::max_flush_passes`].
pub const MAX_FLUSH_PASSES_ENV: &str = "TRELLIS_MAX_FLUSH_PASSES";

/// Environment variable overriding [`RuntimeConfig::catch_panics`].
pub const CATCH_PANICS_ENV: &str = "TRELLIS_CATCH_PANICS";

/// Configuration for the reactive runtime of the current thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Upper bound on flush passes before the flush fails with
    /// [`ReactiveError::FlushLimit`](crate::ReactiveError::FlushLimit).
    pub max_flush_passes: usize,

    /// Convert panics inside computations into
    /// [`ReactiveError::Computation`](crate::ReactiveError::Computation).
    /// When disabled, panics unwind through the flush.
    pub catch_panics: bool,
}

impl RuntimeConfig {
    /// Default pass limit.
    pub const DEFAULT_MAX_FLUSH_PASSES: usize = 10_000;

    /// Create the default configuration.
    pub fn new() -> Self {
        Self {
            max_flush_passes: Self::DEFAULT_MAX_FLUSH_PASSES,
            catch_panics: true,
        }
    }

    /// Build a configuration from environment variables, falling back to
    /// defaults for anything missing or malformed.
    pub fn from_env() -> Self {
        let mut config = Self::new();

        if let Ok(raw) = env::var(MAX_FLUSH_PASSES_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(passes) if passes > 0 => config.max_flush_passes = passes,
                _ => tracing::warn!(
                    value = %raw,
                    "ignoring invalid {MAX_FLUSH_PASSES_ENV}, using default"
                ),
            }
        }

        if let Ok(raw) = env::var(CATCH_PANICS_ENV) {
            match parse_bool(&raw) {
                Some(flag) => config.catch_panics = flag,
                None => tracing::warn!(
                    value = %raw,
                    "ignoring invalid {CATCH_PANICS_ENV}, using default"
                ),
            }
        }

        config
    }

    /// Set the flush pass limit. Zero is clamped to one.
    pub fn with_max_flush_passes(mut self, passes: usize) -> Self {
        self.max_flush_passes = passes.max(1);
        self
    }

    /// Enable or disable panic capture in computations.
    pub fn with_catch_panics(mut self, catch_panics: bool) -> Self {
        self.catch_panics = catch_panics;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_flush_passes, RuntimeConfig::DEFAULT_MAX_FLUSH_PASSES);
        assert!(config.catch_panics);
    }

    #[test]
    fn builder_clamps_pass_limit() {
        let config = RuntimeConfig::new()
            .with_max_flush_passes(0)
            .with_catch_panics(false);
        assert_eq!(config.max_flush_passes, 1);
        assert!(!config.catch_panics);
    }

    #[test]
    fn parses_boolean_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
