//! Live instance registry — the ground truth for what is running.
//!
//! Each granted container is tracked as a `RoleInstance` with a strict
//! lifecycle. The registry owns instances exclusively; the role and node
//! tables refer to them only through role ids and host lookups.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::types::{ContainerId, InstanceId, RoleId};

/// Lifecycle of a role instance.
///
/// `Requested` is the pre-grant phase: it is tracked by the role and node
/// counters, so the registry admits instances at `Starting` once a
/// container has actually been granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Requested,
    Starting,
    Live,
    Releasing,
    Released,
    Failed,
}

impl InstanceState {
    /// The only legal paths are `Requested → Starting → Live → Releasing
    /// → Released` and `Starting|Live → Failed`.
    pub fn can_transition(self, next: InstanceState) -> bool {
        use InstanceState::*;
        matches!(
            (self, next),
            (Requested, Starting)
                | (Starting, Live)
                | (Starting, Failed)
                | (Live, Releasing)
                | (Live, Failed)
                | (Releasing, Released)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceState::Released | InstanceState::Failed)
    }
}

/// One allocated, running or starting container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInstance {
    pub id: InstanceId,
    pub container_id: ContainerId,
    pub host: String,
    pub role: RoleId,
    pub state: InstanceState,
}

/// Registry of live instances, with container-id and host lookups.
///
/// Retired container ids are remembered for the AM's lifetime so a
/// duplicate completion is recognized as such rather than misread as an
/// unknown container.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: BTreeMap<InstanceId, RoleInstance>,
    by_container: BTreeMap<ContainerId, InstanceId>,
    retired: BTreeSet<ContainerId>,
    next_id: u64,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly granted container as a `Starting` instance.
    pub fn register(&mut self, container_id: ContainerId, host: &str, role: RoleId) -> InstanceId {
        self.next_id += 1;
        let id = InstanceId(self.next_id);
        let instance = RoleInstance {
            id,
            container_id: container_id.clone(),
            host: host.to_string(),
            role,
            state: InstanceState::Starting,
        };
        self.by_container.insert(container_id, id);
        self.instances.insert(id, instance);
        debug!(instance = %id, host, role = %role, "instance registered");
        id
    }

    pub fn get(&self, id: InstanceId) -> StateResult<&RoleInstance> {
        self.instances.get(&id).ok_or(StateError::UnknownInstance(id))
    }

    /// Move an instance to a new lifecycle state.
    pub fn transition(&mut self, id: InstanceId, next: InstanceState) -> StateResult<()> {
        let instance = self
            .instances
            .get_mut(&id)
            .ok_or(StateError::UnknownInstance(id))?;
        if !instance.state.can_transition(next) {
            return Err(StateError::InvalidTransition {
                from: instance.state,
                to: next,
            });
        }
        debug!(instance = %id, from = ?instance.state, to = ?next, "instance transition");
        instance.state = next;
        Ok(())
    }

    /// Ask for an instance to be released. Idempotent: repeating the call
    /// on an already-releasing instance is a no-op, because release
    /// confirmations may race with retries. Returns whether the release
    /// was newly started.
    pub fn begin_release(&mut self, id: InstanceId) -> StateResult<bool> {
        let state = self.get(id)?.state;
        if state == InstanceState::Releasing {
            return Ok(false);
        }
        self.transition(id, InstanceState::Releasing)?;
        Ok(true)
    }

    /// Drop an instance in a terminal state, remembering its container id.
    pub fn retire(&mut self, id: InstanceId) -> StateResult<RoleInstance> {
        let state = self.get(id)?.state;
        if !state.is_terminal() {
            return Err(StateError::InvalidTransition {
                from: state,
                to: state,
            });
        }
        let instance = self
            .instances
            .remove(&id)
            .ok_or(StateError::UnknownInstance(id))?;
        self.by_container.remove(&instance.container_id);
        self.retired.insert(instance.container_id.clone());
        Ok(instance)
    }

    /// Find the live instance backed by a container, if any.
    pub fn find_by_container(&self, container_id: &ContainerId) -> Option<&RoleInstance> {
        self.by_container
            .get(container_id)
            .and_then(|id| self.instances.get(id))
    }

    /// Has this container already completed and been retired?
    pub fn is_retired(&self, container_id: &ContainerId) -> bool {
        self.retired.contains(container_id)
    }

    /// Instances currently on a host, in registration order.
    pub fn instances_on_host(&self, host: &str) -> Vec<InstanceId> {
        self.instances
            .values()
            .filter(|i| i.host == host)
            .map(|i| i.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoleInstance> {
        self.instances.values()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
