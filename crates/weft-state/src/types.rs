//! Identifiers, intents, events, and snapshot types for the engine.
//!
//! The engine never talks to the resource manager directly: a scheduling
//! tick produces *intents* ([`AllocationRequest`], [`ReleaseIntent`])
//! that the caller dispatches outside the engine lock, and RM responses
//! re-enter as *events* ([`ContainerOffer`], [`ContainerCompletion`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::registry::InstanceState;

/// Stable role identifier, doubling as the RM request priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoleId(pub u32);

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource-manager-assigned container identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Locally generated instance identity, unique within one AM lifetime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance-{:08}", self.0)
    }
}

/// A role the deployment provider supports, with its stable priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDefinition {
    pub name: String,
    pub id: RoleId,
}

impl RoleDefinition {
    pub fn new(name: &str, id: u32) -> Self {
        Self {
            name: name.to_string(),
            id: RoleId(id),
        }
    }
}

/// Cluster-wide resource ceilings reported by the resource manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLimits {
    pub max_memory_mb: u32,
    pub max_vcores: u32,
}

// ── Intents ───────────────────────────────────────────────────────

/// Intent to request one container for a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    /// Role the container is for; sent to the RM as the request priority.
    pub role: RoleId,
    /// Memory to request, MB, already resolved and clamped.
    pub memory_mb: u32,
    /// Virtual cores to request, already resolved and clamped.
    pub vcores: u32,
    /// Preferred host, if placement found one.
    pub host_hint: Option<String>,
}

/// Intent to release one running container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseIntent {
    pub instance: InstanceId,
    pub container_id: ContainerId,
    pub role: RoleId,
    pub host: String,
}

/// Everything one scheduling tick decided.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub requests: Vec<AllocationRequest>,
    pub releases: Vec<ReleaseIntent>,
}

impl ReviewOutcome {
    /// True when the tick decided nothing needs to change.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.releases.is_empty()
    }
}

// ── Events ────────────────────────────────────────────────────────

/// A container the resource manager has granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOffer {
    pub container_id: ContainerId,
    pub host: String,
    /// Request priority the grant was made against.
    pub priority: RoleId,
    pub memory_mb: u32,
    pub vcores: u32,
}

/// A container the resource manager reports as finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerCompletion {
    pub container_id: ContainerId,
    /// Process exit status; informational only — whether the exit was
    /// requested is decided from the engine's own records.
    pub exit_status: i32,
    /// Request priority, when the RM report carries one.
    pub priority: Option<RoleId>,
}

/// A container the resource manager reports as still running at AM
/// re-registration. Input to restart recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerReport {
    pub container_id: ContainerId,
    pub host: String,
    pub priority: RoleId,
}

// ── Outcomes ──────────────────────────────────────────────────────

/// Pairing of a granted container with the role that wanted it.
/// Consumed immediately to launch the role inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerAssignment {
    pub offer: ContainerOffer,
    pub role: RoleId,
    pub instance: InstanceId,
}

/// What the engine decided about an incoming container grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationOutcome {
    /// The grant matched an outstanding request; launch the role in it.
    Assigned(ContainerAssignment),
    /// Nobody asked for this container (or nobody still wants it);
    /// the caller must release it back immediately.
    SurplusRelease(ContainerId),
    /// Grant for a container already registered; no state changed.
    Duplicate(ContainerId),
}

/// What the engine decided about an incoming container completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// An operator-requested release was confirmed.
    Released { instance: InstanceId, role: RoleId },
    /// A container exited without being asked to; the role's delta now
    /// covers its replacement.
    Failed { instance: InstanceId, role: RoleId },
    /// A container this process never knew about disappeared; counted
    /// as a failure against the attributed role.
    UnknownFailed { role: RoleId },
    /// A completion that could not be attributed to any role.
    Unattributed,
    /// A repeat of a completion already processed; no state changed.
    DuplicateCompletion,
}

// ── Status snapshots ──────────────────────────────────────────────

/// Per-role counters at a single consistent point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleStatusSnapshot {
    pub name: String,
    pub priority: RoleId,
    pub desired: u32,
    pub actual: u32,
    pub requested: u32,
    pub releasing: u32,
    pub failed: u32,
    pub started: u32,
    pub completed: u32,
}

/// One live instance in the status listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub instance: InstanceId,
    pub container_id: ContainerId,
    pub host: String,
    pub role: RoleId,
    pub state: InstanceState,
}

/// Per-(host, role) counters in the status listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub host: String,
    pub role: RoleId,
    pub active: u32,
    pub requested: u32,
    pub releasing: u32,
}

/// A consistent snapshot of the whole engine, taken under its lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub cluster: String,
    pub roles: Vec<RoleStatusSnapshot>,
    pub instances: Vec<InstanceSnapshot>,
    pub nodes: Vec<NodeSnapshot>,
    /// Containers released because nobody asked for them.
    pub surplus_released: u64,
    /// Completions that could not be attributed to any role.
    pub unattributed_completions: u64,
}

impl ClusterStatus {
    /// True when every role is at its desired count with nothing in flight.
    pub fn converged(&self) -> bool {
        self.roles
            .iter()
            .all(|r| r.actual == r.desired && r.requested == 0 && r.releasing == 0)
    }
}
