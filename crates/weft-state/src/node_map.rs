//! Node status table — per-(host, role) placement state.
//!
//! The `requested` and `releasing` counters track in-flight RM work and
//! are meaningless across an AM restart: pre-restart requests cannot be
//! told apart from unrelated ones, so recovery resets them to zero and
//! rebuilds them from newly issued requests only. `active` is decremented
//! only once a container completion has been received.

use std::collections::BTreeMap;

use tracing::warn;

use crate::types::{NodeSnapshot, RoleId};

/// Scale-down picks the most recently used host first, minimizing
/// disruption to long-lived instances. Flipping this constant (and the
/// scale-down test) selects oldest-first instead.
pub const RELEASE_NEWEST_FIRST: bool = true;

/// State of one role on one host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeEntry {
    active: u32,
    requested: u32,
    releasing: u32,
    last_used: u64,
}

impl NodeEntry {
    /// Instances running or starting on this host.
    pub fn active(&self) -> u32 {
        self.active
    }

    /// Outstanding requests targeted at this host.
    pub fn requested(&self) -> u32 {
        self.requested
    }

    /// Instances on this host pending release.
    pub fn releasing(&self) -> u32 {
        self.releasing
    }

    /// Assignment sequence number of the most recent use.
    pub fn last_used(&self) -> u64 {
        self.last_used
    }

    /// Is the host free of this role? True when there are no instances
    /// here other than some already being released, and no outstanding
    /// requests.
    pub fn available(&self) -> bool {
        self.active.saturating_sub(self.releasing) == 0 && self.requested == 0
    }
}

/// Host → role → entry, plus a monotonic assignment clock for
/// `last_used` ranking. Deliberately free of wall-clock time.
#[derive(Debug, Default)]
pub struct NodeMap {
    hosts: BTreeMap<String, BTreeMap<RoleId, NodeEntry>>,
    clock: u64,
}

impl NodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for a (host, role) pair, created zeroed on first access.
    pub(crate) fn entry(&mut self, host: &str, role: RoleId) -> &mut NodeEntry {
        self.hosts
            .entry(host.to_string())
            .or_default()
            .entry(role)
            .or_default()
    }

    /// Read a (host, role) entry if one exists.
    pub fn get(&self, host: &str, role: RoleId) -> Option<&NodeEntry> {
        self.hosts.get(host).and_then(|roles| roles.get(&role))
    }

    /// Record an outstanding request targeted at this host.
    pub(crate) fn record_request(&mut self, host: &str, role: RoleId) {
        self.entry(host, role).requested += 1;
    }

    /// Record a container of this role assigned to this host. Consumes a
    /// host-targeted request if one is outstanding and bumps `last_used`.
    pub(crate) fn record_assignment(&mut self, host: &str, role: RoleId) {
        self.clock += 1;
        let clock = self.clock;
        let entry = self.entry(host, role);
        entry.active += 1;
        entry.requested = entry.requested.saturating_sub(1);
        entry.last_used = clock;
    }

    /// Record a release being requested for an instance on this host.
    pub(crate) fn record_release_started(&mut self, host: &str, role: RoleId) {
        self.entry(host, role).releasing += 1;
    }

    /// Record a confirmed release on this host.
    pub(crate) fn record_release_completed(&mut self, host: &str, role: RoleId) {
        let entry = self.entry(host, role);
        entry.active = checked_down(entry.active, "active", host);
        entry.releasing = checked_down(entry.releasing, "releasing", host);
    }

    /// Record an instance on this host failing.
    pub(crate) fn record_failure(&mut self, host: &str, role: RoleId) {
        let entry = self.entry(host, role);
        entry.active = checked_down(entry.active, "active", host);
    }

    /// Hosts to release this role from, ranked for scale-down: hosts with
    /// the role live and not already fully releasing, most recently used
    /// first (see [`RELEASE_NEWEST_FIRST`]).
    pub fn release_candidates(&self, role: RoleId) -> Vec<String> {
        let mut candidates: Vec<(&String, &NodeEntry)> = self
            .hosts
            .iter()
            .filter_map(|(host, roles)| roles.get(&role).map(|entry| (host, entry)))
            .filter(|(_, entry)| entry.active > entry.releasing)
            .collect();
        candidates.sort_by(|(host_a, a), (host_b, b)| {
            b.last_used
                .cmp(&a.last_used)
                .then_with(|| host_a.cmp(host_b))
        });
        candidates
            .into_iter()
            .map(|(host, _)| host.clone())
            .collect()
    }

    /// Hosts to hint new requests at, ranked for spreading: only hosts
    /// where the role is `available()`, preferring hosts with fewer
    /// active instances of any role.
    pub fn placement_candidates(&self, role: RoleId) -> Vec<String> {
        let mut candidates: Vec<(&String, u32)> = self
            .hosts
            .iter()
            .filter(|(_, roles)| roles.get(&role).copied().unwrap_or_default().available())
            .map(|(host, roles)| {
                let total: u32 = roles.values().map(|e| e.active).sum();
                (host, total)
            })
            .collect();
        candidates.sort_by(|(host_a, total_a), (host_b, total_b)| {
            total_a.cmp(total_b).then_with(|| host_a.cmp(host_b))
        });
        candidates.into_iter().map(|(host, _)| host.clone()).collect()
    }

    /// Zero every transient counter. Called on restart recovery, where
    /// pre-restart requests and releases carry no meaning.
    pub(crate) fn reset_transients(&mut self) {
        for roles in self.hosts.values_mut() {
            for entry in roles.values_mut() {
                entry.requested = 0;
                entry.releasing = 0;
            }
        }
    }

    /// Snapshot every non-empty (host, role) entry.
    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        self.hosts
            .iter()
            .flat_map(|(host, roles)| {
                roles
                    .iter()
                    .filter(|(_, e)| e.active > 0 || e.requested > 0 || e.releasing > 0)
                    .map(move |(role, e)| NodeSnapshot {
                        host: host.clone(),
                        role: *role,
                        active: e.active,
                        requested: e.requested,
                        releasing: e.releasing,
                    })
            })
            .collect()
    }
}

fn checked_down(value: u32, counter: &str, host: &str) -> u32 {
    match value.checked_sub(1) {
        Some(v) => v,
        None => {
            warn!(host, counter, "decrement of zero node counter ignored");
            0
        }
    }
}
