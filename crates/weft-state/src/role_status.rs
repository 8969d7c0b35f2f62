//! Role status table — desired/actual/outstanding counters per role.
//!
//! Counters only ever change through the guarded methods here. Decrements
//! clamp at zero and log an anomaly instead of wrapping, because a
//! duplicate or late RM response must never corrupt the table.

use tracing::warn;

use weft_model::ResourceValue;

use crate::error::{StateError, StateResult};
use crate::types::RoleId;

/// Resource shape to request for one instance of a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleResource {
    pub memory_mb: ResourceValue,
    pub vcores: ResourceValue,
}

/// Counters and requirements for one role.
#[derive(Debug, Clone)]
pub struct RoleStatus {
    id: RoleId,
    name: String,
    desired: u32,
    actual: u32,
    requested: u32,
    releasing: u32,
    failed: u32,
    started: u32,
    completed: u32,
    resource: RoleResource,
}

impl RoleStatus {
    pub fn new(id: RoleId, name: &str, desired: u32, resource: RoleResource) -> Self {
        Self {
            id,
            name: name.to_string(),
            desired,
            actual: 0,
            requested: 0,
            releasing: 0,
            failed: 0,
            started: 0,
            completed: 0,
            resource,
        }
    }

    pub fn id(&self) -> RoleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desired(&self) -> u32 {
        self.desired
    }

    pub fn actual(&self) -> u32 {
        self.actual
    }

    pub fn requested(&self) -> u32 {
        self.requested
    }

    pub fn releasing(&self) -> u32 {
        self.releasing
    }

    pub fn failed(&self) -> u32 {
        self.failed
    }

    pub fn started(&self) -> u32 {
        self.started
    }

    pub fn completed(&self) -> u32 {
        self.completed
    }

    pub fn resource(&self) -> RoleResource {
        self.resource
    }

    /// How far the role is from its target: positive means more
    /// instances are needed, negative means excess to release.
    pub fn desired_delta(&self) -> i64 {
        i64::from(self.desired)
            - (i64::from(self.actual) + i64::from(self.requested) - i64::from(self.releasing))
    }

    /// True when outstanding work will bring the role exactly to target.
    pub fn is_satisfied(&self) -> bool {
        self.desired_delta() == 0
    }

    pub(crate) fn set_desired(&mut self, desired: u32) {
        self.desired = desired;
    }

    pub(crate) fn increment_requested(&mut self) {
        self.requested += 1;
    }

    pub(crate) fn decrement_requested(&mut self) {
        self.requested = clamped_decrement(self.requested, "requested", &self.name);
    }

    pub(crate) fn increment_actual(&mut self) {
        self.actual += 1;
        self.started += 1;
    }

    pub(crate) fn decrement_actual(&mut self) {
        self.actual = clamped_decrement(self.actual, "actual", &self.name);
    }

    pub(crate) fn increment_releasing(&mut self) {
        self.releasing += 1;
    }

    pub(crate) fn decrement_releasing(&mut self) {
        self.releasing = clamped_decrement(self.releasing, "releasing", &self.name);
    }

    pub(crate) fn increment_failed(&mut self) {
        self.failed += 1;
    }

    pub(crate) fn increment_completed(&mut self) {
        self.completed += 1;
    }
}

/// Decrement a counter, clamping at zero. Hitting the clamp means a
/// response was processed twice; that is logged, never propagated.
fn clamped_decrement(value: u32, counter: &str, role: &str) -> u32 {
    match value.checked_sub(1) {
        Some(v) => v,
        None => {
            warn!(role, counter, "decrement of zero counter ignored");
            0
        }
    }
}

/// All roles, keyed by priority, with name lookup.
#[derive(Debug, Default)]
pub struct RoleTable {
    roles: std::collections::BTreeMap<RoleId, RoleStatus>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, status: RoleStatus) {
        self.roles.insert(status.id(), status);
    }

    /// Look up a role by priority.
    pub fn get(&self, id: RoleId) -> StateResult<&RoleStatus> {
        self.roles.get(&id).ok_or(StateError::UnknownPriority(id))
    }

    pub(crate) fn get_mut(&mut self, id: RoleId) -> StateResult<&mut RoleStatus> {
        self.roles
            .get_mut(&id)
            .ok_or(StateError::UnknownPriority(id))
    }

    /// Look up a role by name.
    pub fn lookup(&self, name: &str) -> StateResult<RoleId> {
        self.roles
            .values()
            .find(|r| r.name() == name)
            .map(RoleStatus::id)
            .ok_or_else(|| StateError::UnknownRole(name.to_string()))
    }

    pub fn ids(&self) -> Vec<RoleId> {
        self.roles.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoleStatus> {
        self.roles.values()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> RoleStatus {
        RoleStatus::new(
            RoleId(1),
            "worker",
            3,
            RoleResource {
                memory_mb: ResourceValue::Fixed(512),
                vcores: ResourceValue::Fixed(1),
            },
        )
    }

    #[test]
    fn delta_counts_outstanding_work() {
        let mut role = worker();
        assert_eq!(role.desired_delta(), 3);

        role.increment_requested();
        role.increment_requested();
        assert_eq!(role.desired_delta(), 1);

        role.decrement_requested();
        role.increment_actual();
        assert_eq!(role.desired_delta(), 1);

        role.increment_requested();
        assert_eq!(role.desired_delta(), 0);
        assert!(role.is_satisfied());
    }

    #[test]
    fn releasing_raises_the_delta() {
        let mut role = worker();
        for _ in 0..3 {
            role.increment_actual();
        }
        assert!(role.is_satisfied());

        role.increment_releasing();
        assert_eq!(role.desired_delta(), 1);

        role.decrement_releasing();
        role.decrement_actual();
        assert_eq!(role.desired_delta(), 1);
    }

    #[test]
    fn decrements_clamp_instead_of_wrapping() {
        let mut role = worker();
        role.decrement_requested();
        role.decrement_actual();
        role.decrement_releasing();
        assert_eq!(role.requested(), 0);
        assert_eq!(role.actual(), 0);
        assert_eq!(role.releasing(), 0);
    }

    #[test]
    fn actual_tracks_cumulative_starts() {
        let mut role = worker();
        role.increment_actual();
        role.increment_actual();
        role.decrement_actual();
        assert_eq!(role.actual(), 1);
        assert_eq!(role.started(), 2);
    }

    #[test]
    fn table_lookup_by_name_and_priority() {
        let mut table = RoleTable::new();
        table.insert(worker());

        assert_eq!(table.lookup("worker").unwrap(), RoleId(1));
        assert!(matches!(
            table.lookup("ghost"),
            Err(StateError::UnknownRole(_))
        ));
        assert!(table.get(RoleId(1)).is_ok());
        assert!(matches!(
            table.get(RoleId(9)),
            Err(StateError::UnknownPriority(_))
        ));
    }
}
