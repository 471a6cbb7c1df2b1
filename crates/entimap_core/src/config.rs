//! Database configuration.

use std::time::Duration;

/// How indexed writes are applied to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// One atomic program per save: uniqueness guards and all key
    /// updates succeed or fail together.
    #[default]
    Atomic,
    /// Individual commands with best-effort compensation, for backends
    /// that cannot run atomic programs.
    Fallback,
}

/// Word splitting for full-text indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenizerConfig {
    /// Lowercase words before indexing and matching.
    pub lowercase: bool,
    /// Words shorter than this are not indexed.
    pub min_word_len: usize,
}

impl TokenizerConfig {
    /// Creates the default tokenizer configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lowercase: true,
            min_word_len: 1,
        }
    }

    /// Sets case handling.
    #[must_use]
    pub const fn with_lowercase(mut self, lowercase: bool) -> Self {
        self.lowercase = lowercase;
        self
    }

    /// Sets the minimum indexed word length.
    #[must_use]
    pub const fn with_min_word_len(mut self, min_word_len: usize) -> Self {
        self.min_word_len = min_word_len;
        self
    }
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Tunables for a database instance.
///
/// # Example
///
/// ```
/// use entimap_core::{DatabaseConfig, WriteMode};
/// use std::time::Duration;
///
/// let config = DatabaseConfig::new()
///     .with_write_mode(WriteMode::Fallback)
///     .with_default_result_ttl(Duration::from_secs(60));
/// assert_eq!(config.write_mode, WriteMode::Fallback);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// How indexed writes reach the store.
    pub write_mode: WriteMode,
    /// Upper bound on cascade chain depth; deeper chains abort the
    /// delete before anything is removed.
    pub max_cascade_depth: u32,
    /// Lifetime of cached result sets when none is given explicitly.
    pub default_result_ttl: Duration,
    /// Whether sessions keep an identity map. When off, every lookup
    /// reads the store.
    pub session_caching: bool,
    /// Word splitting for full-text indexes.
    pub tokenizer: TokenizerConfig,
}

impl DatabaseConfig {
    /// Creates the default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            write_mode: WriteMode::Atomic,
            max_cascade_depth: 100,
            default_result_ttl: Duration::from_secs(30),
            session_caching: true,
            tokenizer: TokenizerConfig::new(),
        }
    }

    /// Sets the write mode.
    #[must_use]
    pub const fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Sets the cascade depth bound.
    #[must_use]
    pub const fn with_max_cascade_depth(mut self, depth: u32) -> Self {
        self.max_cascade_depth = depth;
        self
    }

    /// Sets the default cached-result lifetime.
    #[must_use]
    pub const fn with_default_result_ttl(mut self, ttl: Duration) -> Self {
        self.default_result_ttl = ttl;
        self
    }

    /// Enables or disables the session identity map.
    #[must_use]
    pub const fn with_session_caching(mut self, caching: bool) -> Self {
        self.session_caching = caching;
        self
    }

    /// Sets the tokenizer configuration.
    #[must_use]
    pub const fn with_tokenizer(mut self, tokenizer: TokenizerConfig) -> Self {
        self.tokenizer = tokenizer;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = DatabaseConfig::default();
        assert_eq!(config.write_mode, WriteMode::Atomic);
        assert_eq!(config.max_cascade_depth, 100);
        assert_eq!(config.default_result_ttl, Duration::from_secs(30));
        assert!(config.session_caching);
        assert!(config.tokenizer.lowercase);
        assert_eq!(config.tokenizer.min_word_len, 1);
    }

    #[test]
    fn builders_override_fields() {
        let config = DatabaseConfig::new()
            .with_write_mode(WriteMode::Fallback)
            .with_max_cascade_depth(3)
            .with_session_caching(false)
            .with_tokenizer(TokenizerConfig::new().with_min_word_len(2));
        assert_eq!(config.write_mode, WriteMode::Fallback);
        assert_eq!(config.max_cascade_depth, 3);
        assert!(!config.session_caching);
        assert_eq!(config.tokenizer.min_word_len, 2);
    }
}
