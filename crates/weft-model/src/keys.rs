//! Stable option keys used in cluster documents.
//!
//! Global options live in the document's `options` map; role options in
//! the per-role maps under `roles`. Status-only keys are written into
//! `info` when reporting.

/// Desired instance count for a role.
pub const ROLE_INSTANCES: &str = "role.instances";
/// Actual instance count for a role. Status reports only.
pub const ROLE_ACTUAL_INSTANCES: &str = "role.actual.instances";
/// Memory to request per instance, in MB.
pub const YARN_MEMORY: &str = "yarn.memory";
/// Virtual cores to request per instance.
pub const YARN_VCORES: &str = "yarn.vcores";
/// Sentinel resource value: request the maximum the cluster allows.
pub const RESOURCE_MAX: &str = "max";

/// Path to the application image to deploy into containers.
pub const APP_IMAGE_PATH: &str = "application.image.path";
/// Home directory of a pre-installed application, if any.
pub const APP_HOME: &str = "application.home";
/// Directory holding the persisted cluster documents.
pub const CLUSTER_DIRECTORY: &str = "cluster.directory";
/// Whether security is enabled when talking to this cluster.
pub const SECURITY_ENABLED: &str = "security.enabled";

/// Creation time of the document, epoch millis. Status reports only.
pub const INFO_CREATE_TIME_MILLIS: &str = "create.time.millis";
/// Time the status snapshot was taken, epoch millis. Status reports only.
pub const INFO_STATUS_TIME_MILLIS: &str = "status.time.millis";

/// Per-role statistics names written into the `statistics` map.
pub const STAT_DESIRED: &str = "desired";
pub const STAT_ACTUAL: &str = "actual";
pub const STAT_REQUESTED: &str = "requested";
pub const STAT_RELEASING: &str = "releasing";
pub const STAT_FAILED: &str = "failed";
pub const STAT_STARTED: &str = "started";
pub const STAT_COMPLETED: &str = "completed";
