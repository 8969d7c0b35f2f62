//! weft-model — the cluster document and its option vocabulary.
//!
//! A weft cluster is described by a single JSON document: global options,
//! a map of roles (each with its own option map), and status-only
//! `info`/`statistics` sections that are populated when reporting, never
//! when defining desired state. The same schema is used on the wire and
//! on disk, so the code paths are shared.
//!
//! # Components
//!
//! - **`document`** — `ClusterDocument`, typed option accessors, JSON
//!   load/save
//! - **`keys`** — stable option-key constants
//! - **`resource`** — `ResourceValue` (fixed amount or "use the maximum")
//! - **`error`** — `ConfigError` and client exit codes

pub mod document;
pub mod error;
pub mod keys;
pub mod resource;

pub use document::{ClusterDocument, ClusterLifecycle, RoleOptions};
pub use error::{ConfigError, ConfigResult};
pub use resource::ResourceValue;
