//! weft-state — the application-master allocation engine.
//!
//! Turns a declarative cluster document into a converging set of
//! container allocations: per-role and per-node bookkeeping, request and
//! release planning, offer matching, operator flexing, and restart
//! reconciliation.
//!
//! # Architecture
//!
//! ```text
//! AllocationEngine (one lock, whole operations only)
//!   ├── RoleTable         desired/actual/requested/releasing per role
//!   ├── NodeMap           per-(host, role) placement state
//!   └── InstanceRegistry  ground truth for running containers
//!
//! tick ──▶ ReviewOutcome { requests, releases } ──▶ RM client
//! RM client ──▶ RmEvent { Allocated | Completed } ──▶ engine
//! ```
//!
//! The engine itself holds no wall-clock state and never calls the
//! resource manager: intents go out as values and responses come back as
//! events, so everything is deterministic and testable in-process.

pub mod client;
pub mod engine;
pub mod error;
pub mod node_map;
pub mod registry;
pub mod role_status;
pub mod types;

pub use client::{ResourceManagerClient, RmEvent};
pub use engine::{AllocationEngine, SharedEngine, DEFAULT_MEMORY_MB, DEFAULT_VCORES};
pub use error::{StateError, StateResult};
pub use node_map::{NodeEntry, NodeMap, RELEASE_NEWEST_FIRST};
pub use registry::{InstanceRegistry, InstanceState, RoleInstance};
pub use role_status::{RoleResource, RoleStatus, RoleTable};
pub use types::*;
