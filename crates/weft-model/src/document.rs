//! The cluster document — desired state as a value.
//!
//! A `ClusterDocument` is sendable over the wire and persisted as JSON;
//! one schema serves both so the code paths are shared. The `options` and
//! `roles` maps define desired state. The `info` and `statistics` maps
//! carry status data and are only populated when reporting, never when
//! defining what the cluster should look like.
//!
//! Documents are values: they are mutated only by replacing fields, and
//! never concurrently with being read by the allocation engine.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::keys;
use crate::resource::ResourceValue;

/// Option map for a single role.
pub type RoleOptions = BTreeMap<String, String>;

/// Lifecycle state of a cluster. Ordered so that destroyed follows
/// stopped; some states only ever appear in persisted documents.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ClusterLifecycle {
    /// Document is incomplete and cannot be used.
    #[default]
    Incomplete,
    /// Document has been submitted.
    Submitted,
    /// Cluster created.
    Created,
    /// Cluster is live.
    Live,
    /// Cluster stopped; may be started again.
    Stopped,
    /// Cluster destroyed.
    Destroyed,
}

/// A cluster specification document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterDocument {
    /// Schema version.
    pub version: String,
    /// Name of the cluster.
    pub name: String,
    /// Lifecycle state.
    pub state: ClusterLifecycle,
    /// When the document was created, epoch millis.
    pub create_time: u64,
    /// When the document was last updated, epoch millis.
    pub update_time: u64,
    /// Cluster-wide options.
    pub options: BTreeMap<String, String>,
    /// Role name → role option map.
    pub roles: BTreeMap<String, RoleOptions>,
    /// Cluster information. Only valid in status reports.
    pub info: BTreeMap<String, String>,
    /// Per-role statistics. Only valid in status reports.
    pub statistics: BTreeMap<String, BTreeMap<String, i64>>,
}

impl ClusterDocument {
    /// Create an empty document for the named cluster.
    pub fn new(name: &str) -> Self {
        let now = epoch_millis();
        Self {
            version: "1.0".to_string(),
            name: name.to_string(),
            state: ClusterLifecycle::Incomplete,
            create_time: now,
            update_time: now,
            ..Self::default()
        }
    }

    /// Bump the update timestamp.
    pub fn touch(&mut self) {
        self.update_time = epoch_millis();
    }

    // ── Cluster options ────────────────────────────────────────────

    /// Get a cluster option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Get a cluster option, falling back to a default.
    pub fn option_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.option(key).unwrap_or(default)
    }

    /// Get a cluster option that must be present.
    pub fn mandatory_option(&self, key: &str) -> ConfigResult<&str> {
        self.option(key)
            .ok_or_else(|| ConfigError::MissingOption(key.to_string()))
    }

    /// Get a cluster option as an integer.
    pub fn option_u32(&self, key: &str, default: u32) -> ConfigResult<u32> {
        match self.option(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw.to_string(),
                    reason: e.to_string(),
                }
            }),
        }
    }

    /// Get a cluster option as a boolean. Anything other than `"true"`
    /// (case-insensitive) is false.
    pub fn option_bool(&self, key: &str, default: bool) -> bool {
        match self.option(key) {
            None => default,
            Some(raw) => raw.eq_ignore_ascii_case("true"),
        }
    }

    /// Set a cluster option.
    pub fn set_option(&mut self, key: &str, value: impl ToString) {
        self.options.insert(key.to_string(), value.to_string());
    }

    /// Set a cluster option only if it is currently unset.
    pub fn set_option_if_unset(&mut self, key: &str, value: impl ToString) {
        self.options
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }

    /// Verify an option is defined and non-empty.
    pub fn verify_option_set(&self, key: &str) -> ConfigResult<()> {
        match self.option(key) {
            Some(v) if !v.trim().is_empty() => Ok(()),
            _ => Err(ConfigError::MissingOption(key.to_string())),
        }
    }

    // ── Roles ──────────────────────────────────────────────────────

    /// Look up a role's option map.
    pub fn role(&self, role: &str) -> Option<&RoleOptions> {
        self.roles.get(role)
    }

    /// Look up a role that must be present.
    pub fn mandatory_role(&self, role: &str) -> ConfigResult<&RoleOptions> {
        self.role(role)
            .ok_or_else(|| ConfigError::UnknownRole(role.to_string()))
    }

    /// Get a role's option map, creating an empty one if absent.
    pub fn get_or_add_role(&mut self, role: &str) -> &mut RoleOptions {
        self.roles.entry(role.to_string()).or_default()
    }

    /// Names of all declared roles.
    pub fn role_names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    /// Get a role option.
    pub fn role_opt(&self, role: &str, key: &str) -> Option<&str> {
        self.role(role).and_then(|opts| opts.get(key)).map(String::as_str)
    }

    /// Get a role option as an integer, falling back to a default when the
    /// role or the option is absent.
    pub fn role_opt_u32(&self, role: &str, key: &str, default: u32) -> ConfigResult<u32> {
        match self.role_opt(role, key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    key: format!("{role}/{key}"),
                    value: raw.to_string(),
                    reason: e.to_string(),
                }
            }),
        }
    }

    /// Set a role option, creating the role if necessary.
    pub fn set_role_opt(&mut self, role: &str, key: &str, value: impl ToString) {
        self.get_or_add_role(role)
            .insert(key.to_string(), value.to_string());
    }

    /// Get a role resource requirement. The `"max"` sentinel maps to
    /// [`ResourceValue::UseMaximum`].
    pub fn role_resource(
        &self,
        role: &str,
        key: &str,
        default: u32,
    ) -> ConfigResult<ResourceValue> {
        match self.role_opt(role, key) {
            None => Ok(ResourceValue::Fixed(default)),
            Some(raw) => ResourceValue::parse(key, raw),
        }
    }

    /// Desired instance count for a role.
    pub fn desired_instances(&self, role: &str, default: u32) -> ConfigResult<u32> {
        self.role_opt_u32(role, keys::ROLE_INSTANCES, default)
    }

    /// Set the desired instance count for a role.
    pub fn set_desired_instances(&mut self, role: &str, count: u32) {
        self.set_role_opt(role, keys::ROLE_INSTANCES, count);
    }

    /// Actual instance count for a role. Status reports only.
    pub fn actual_instances(&self, role: &str) -> ConfigResult<u32> {
        self.role_opt_u32(role, keys::ROLE_ACTUAL_INSTANCES, 0)
    }

    /// Record the actual instance count for a role. Status reports only.
    pub fn set_actual_instances(&mut self, role: &str, count: u32) {
        self.set_role_opt(role, keys::ROLE_ACTUAL_INSTANCES, count);
    }

    /// Set an information string. Status reports only.
    pub fn set_info(&mut self, key: &str, value: impl ToString) {
        self.info.insert(key.to_string(), value.to_string());
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Parse a document from JSON. Unknown fields are tolerated for
    /// forward compatibility.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Render the document as pretty-printed JSON.
    pub fn to_json_string(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a document from a filesystem path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.is_file() {
            return Err(ConfigError::DocumentNotFound(path.display().to_string()));
        }
        let json = fs::read_to_string(path)?;
        let doc = Self::from_json(&json)?;
        debug!(path = %path.display(), cluster = %doc.name, "cluster document loaded");
        Ok(doc)
    }

    /// Save the document to a filesystem path, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json_string()?)?;
        debug!(path = %path.display(), cluster = %self.name, "cluster document saved");
        Ok(())
    }

    /// Deep copy via a serialization round trip.
    pub fn duplicate(&self) -> ConfigResult<Self> {
        Self::from_json(&self.to_json_string()?)
    }
}

impl fmt::Display for ClusterDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_json_string() {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "ClusterDocument[{}]", self.name),
        }
    }
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
