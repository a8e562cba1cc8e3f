//! Cache configuration and statistics.

use std::time::Duration;

use crate::error::{OptimizerError, OptimizerResult};

/// Default maximum number of cached payloads.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Default minimal estimated cost of a subtree worth caching.
pub const DEFAULT_MIN_COMPLEXITY_THRESHOLD: u64 = 10_000;

/// Configuration of the formula cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaCacheConfig {
    /// Maximum number of cached payloads.
    pub max_entries: usize,
    /// Payloads older than this are recomputed; None keeps them until evicted.
    pub ttl: Option<Duration>,
    /// Subtrees with a lower estimated cost are never cached.
    pub min_complexity_threshold: u64,
    /// Whether to cache at all.
    pub enabled: bool,
}

impl Default for FormulaCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            ttl: None,
            min_complexity_threshold: DEFAULT_MIN_COMPLEXITY_THRESHOLD,
            enabled: true,
        }
    }
}

impl FormulaCacheConfig {
    /// Creates a config with caching switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the maximum number of entries.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Sets the time to live of a payload.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the minimal estimated cost of cached subtrees.
    pub fn with_min_complexity_threshold(mut self, threshold: u64) -> Self {
        self.min_complexity_threshold = threshold;
        self
    }

    pub(crate) fn validate(&self) -> OptimizerResult<()> {
        if self.max_entries == 0 {
            return Err(OptimizerError::invalid_cache_config("max_entries must be positive"));
        }
        if self.ttl == Some(Duration::ZERO) {
            return Err(OptimizerError::invalid_cache_config("ttl must be positive"));
        }
        Ok(())
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered by a fresh payload.
    pub hits: usize,
    /// Lookups that found nothing.
    pub misses: usize,
    /// Lookups that found an outdated payload.
    pub stale: usize,
    /// Payloads computed and stored.
    pub computations: usize,
    /// Payloads currently stored.
    pub entries: usize,
}

impl CacheStats {
    /// Returns the hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.stale;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Formula Cache Statistics:")?;
        writeln!(f, "  Hits:            {}", self.hits)?;
        writeln!(f, "  Misses:          {}", self.misses)?;
        writeln!(f, "  Stale:           {}", self.stale)?;
        writeln!(f, "  Hit rate:        {:.1}%", self.hit_rate())?;
        writeln!(f, "  Computations:    {}", self.computations)?;
        writeln!(f, "  Entries:         {}", self.entries)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = FormulaCacheConfig::default();
        assert!(config.enabled);
        assert!(config.validate().is_ok());
        assert!(!FormulaCacheConfig::disabled().enabled);
    }

    #[test]
    fn test_invalid_config() {
        assert!(FormulaCacheConfig::default().with_max_entries(0).validate().is_err());
        assert!(FormulaCacheConfig::default()
            .with_ttl(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        assert!(stats.to_string().contains("Hit rate:        75.0%"));
    }
}
