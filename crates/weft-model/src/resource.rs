//! Resource requirement values.
//!
//! Role resource options are either a literal amount or the sentinel
//! `"max"`, meaning "use the maximum the cluster offers". The sentinel is
//! parsed once at the document boundary; everywhere else the request is
//! an explicit `ResourceValue`, resolved against the cluster ceiling when
//! that ceiling is known.

use std::fmt;

use crate::error::{ConfigError, ConfigResult};
use crate::keys;

/// A resource requirement: a fixed amount, or whatever the cluster allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceValue {
    /// Request exactly this much (clamped to the cluster ceiling).
    Fixed(u32),
    /// Request the cluster maximum, whatever it turns out to be.
    UseMaximum,
}

impl ResourceValue {
    /// Parse an option string. `"max"` selects the cluster maximum.
    pub fn parse(key: &str, raw: &str) -> ConfigResult<Self> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case(keys::RESOURCE_MAX) {
            return Ok(ResourceValue::UseMaximum);
        }
        trimmed
            .parse::<u32>()
            .map(ResourceValue::Fixed)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
                reason: e.to_string(),
            })
    }

    /// Resolve against a known cluster ceiling. Fixed values are clamped.
    pub fn resolve(self, max: u32) -> u32 {
        match self {
            ResourceValue::Fixed(v) => v.min(max),
            ResourceValue::UseMaximum => max,
        }
    }

    /// True if this value can only be resolved once the ceiling is known.
    pub fn needs_maximum(self) -> bool {
        matches!(self, ResourceValue::UseMaximum)
    }
}

impl fmt::Display for ResourceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceValue::Fixed(v) => write!(f, "{v}"),
            ResourceValue::UseMaximum => f.write_str(keys::RESOURCE_MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixed_values() {
        assert_eq!(
            ResourceValue::parse("yarn.memory", "1024").unwrap(),
            ResourceValue::Fixed(1024)
        );
        assert_eq!(
            ResourceValue::parse("yarn.vcores", " 2 ").unwrap(),
            ResourceValue::Fixed(2)
        );
    }

    #[test]
    fn parses_max_sentinel_case_insensitively() {
        assert_eq!(
            ResourceValue::parse("yarn.memory", "max").unwrap(),
            ResourceValue::UseMaximum
        );
        assert_eq!(
            ResourceValue::parse("yarn.memory", "MAX").unwrap(),
            ResourceValue::UseMaximum
        );
    }

    #[test]
    fn rejects_garbage() {
        let err = ResourceValue::parse("yarn.memory", "lots").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn fixed_clamps_to_ceiling() {
        assert_eq!(ResourceValue::Fixed(8192).resolve(4096), 4096);
        assert_eq!(ResourceValue::Fixed(512).resolve(4096), 512);
    }

    #[test]
    fn use_maximum_resolves_to_ceiling() {
        assert_eq!(ResourceValue::UseMaximum.resolve(4096), 4096);
        assert!(ResourceValue::UseMaximum.needs_maximum());
        assert!(!ResourceValue::Fixed(1).needs_maximum());
    }
}
