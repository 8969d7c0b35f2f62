//! The allocation engine — converges desired role counts onto actual
//! container allocations.
//!
//! The engine owns the role table, the node map, and the instance
//! registry, and exposes only whole operations over them: a scheduling
//! tick that turns desired/actual deltas into request and release
//! intents, event handlers for RM allocation and completion responses,
//! flexing, and consistent status snapshots. Intents are returned as
//! values; callers dispatch them to the resource manager outside the
//! engine lock.
//!
//! Reconciliation policy across AM restart is asymmetric: an allocation
//! nobody asked for is released back (accepting it could double-count
//! running work), while a completion for a container this process never
//! knew about is counted as a failure needing replacement (a container
//! only disappears if it was genuinely running).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use weft_model::{keys, ClusterDocument, ResourceValue};

use crate::error::{StateError, StateResult};
use crate::node_map::NodeMap;
use crate::registry::{InstanceRegistry, InstanceState};
use crate::role_status::{RoleResource, RoleStatus, RoleTable};
use crate::types::{
    AllocationOutcome, AllocationRequest, ClusterStatus, CompletionOutcome,
    ContainerAssignment, ContainerCompletion, ContainerId, ContainerLimits, ContainerOffer,
    ContainerReport, InstanceId, InstanceSnapshot, ReleaseIntent, ReviewOutcome,
    RoleDefinition, RoleStatusSnapshot,
};

/// Memory requested per instance when a role does not say, MB.
pub const DEFAULT_MEMORY_MB: u32 = 256;
/// Vcores requested per instance when a role does not say.
pub const DEFAULT_VCORES: u32 = 1;

/// The cluster role-allocation state engine.
///
/// Not internally synchronized: wrap it in [`SharedEngine`] when more
/// than one event source mutates it.
#[derive(Debug)]
pub struct AllocationEngine {
    document: ClusterDocument,
    roles: RoleTable,
    nodes: NodeMap,
    registry: InstanceRegistry,
    limits: Option<ContainerLimits>,
    surplus_released: u64,
    unattributed_completions: u64,
}

impl AllocationEngine {
    /// Build the engine from a cluster document on a fresh AM start.
    ///
    /// Every role the document declares must be in `supported`; the role
    /// table is seeded with the document's desired counts and resource
    /// options.
    pub fn build(
        document: ClusterDocument,
        supported: &[RoleDefinition],
    ) -> StateResult<Self> {
        let mut names = std::collections::BTreeSet::new();
        let mut ids = std::collections::BTreeSet::new();
        for def in supported {
            if !names.insert(def.name.as_str()) {
                return Err(StateError::BadConfiguration(format!(
                    "role {} defined twice",
                    def.name
                )));
            }
            if !ids.insert(def.id) {
                return Err(StateError::BadConfiguration(format!(
                    "priority {} assigned twice",
                    def.id
                )));
            }
        }
        for role in document.role_names() {
            if !names.contains(role) {
                return Err(StateError::BadConfiguration(format!(
                    "role {role} is not supported by this provider"
                )));
            }
        }

        let mut roles = RoleTable::new();
        for def in supported {
            let desired = document.desired_instances(&def.name, 0)?;
            let memory_mb =
                document.role_resource(&def.name, keys::YARN_MEMORY, DEFAULT_MEMORY_MB)?;
            let vcores =
                document.role_resource(&def.name, keys::YARN_VCORES, DEFAULT_VCORES)?;
            roles.insert(RoleStatus::new(
                def.id,
                &def.name,
                desired,
                RoleResource { memory_mb, vcores },
            ));
        }

        info!(
            cluster = %document.name,
            roles = roles.len(),
            "allocation engine built"
        );
        Ok(Self {
            document,
            roles,
            nodes: NodeMap::new(),
            registry: InstanceRegistry::new(),
            limits: None,
            surplus_released: 0,
            unattributed_completions: 0,
        })
    }

    /// Build the engine after an AM restart.
    ///
    /// `running` is what the RM reports as still alive at re-registration;
    /// those containers are re-adopted into the tables. Transient
    /// request/release counters start from zero — pre-restart requests
    /// cannot be told apart from unrelated ones. Containers whose
    /// priority resolves to no supported role cannot be owned by this
    /// process and are returned for immediate release.
    pub fn build_recovered(
        document: ClusterDocument,
        supported: &[RoleDefinition],
        running: &[ContainerReport],
    ) -> StateResult<(Self, Vec<ContainerId>)> {
        let mut engine = Self::build(document, supported)?;
        let mut surplus = Vec::new();

        for report in running {
            match engine.roles.get_mut(report.priority) {
                Ok(role) => {
                    role.increment_actual();
                    let name = role.name().to_string();
                    engine.nodes.record_assignment(&report.host, report.priority);
                    let id = engine.registry.register(
                        report.container_id.clone(),
                        &report.host,
                        report.priority,
                    );
                    engine.registry.transition(id, InstanceState::Live)?;
                    info!(
                        container = %report.container_id,
                        role = %name,
                        host = %report.host,
                        "re-adopted running container"
                    );
                }
                Err(_) => {
                    warn!(
                        container = %report.container_id,
                        priority = %report.priority,
                        "recovered container matches no role; releasing"
                    );
                    engine.surplus_released += 1;
                    surplus.push(report.container_id.clone());
                }
            }
        }
        engine.nodes.reset_transients();

        Ok((engine, surplus))
    }

    /// Record the cluster-wide resource ceilings. Role requirements are
    /// resolved and clamped against these at request-issue time.
    pub fn set_container_limits(&mut self, max_memory_mb: u32, max_vcores: u32) {
        info!(max_memory_mb, max_vcores, "container limits set");
        self.limits = Some(ContainerLimits {
            max_memory_mb,
            max_vcores,
        });
    }

    /// The cluster document as the engine currently sees it.
    pub fn document(&self) -> &ClusterDocument {
        &self.document
    }

    /// Role table, for read-only queries.
    pub fn roles(&self) -> &RoleTable {
        &self.roles
    }

    /// Node map, for read-only queries.
    pub fn nodes(&self) -> &NodeMap {
        &self.nodes
    }

    // ── Scheduling tick ────────────────────────────────────────────

    /// The core scheduling tick: for every role, compute the delta
    /// between desired and outstanding work and turn it into request or
    /// release intents. Idempotent — acting only on the current delta,
    /// a repeat invocation with no intervening events emits nothing.
    pub fn review_request_state(&mut self) -> ReviewOutcome {
        let mut outcome = ReviewOutcome::default();

        for id in self.roles.ids() {
            let (delta, resource, name) = match self.roles.get(id) {
                Ok(role) => (role.desired_delta(), role.resource(), role.name().to_string()),
                Err(_) => continue,
            };

            if delta > 0 {
                let Some((memory_mb, vcores)) = self.resolve_resource(resource, &name) else {
                    continue;
                };
                let hints = self.nodes.placement_candidates(id);
                let needed = delta as usize;
                for i in 0..needed {
                    // One hinted request per host; the rest go unhinted
                    // and the RM places them freely.
                    let host_hint = hints.get(i).cloned();
                    if let Some(host) = &host_hint {
                        self.nodes.record_request(host, id);
                    }
                    if let Ok(role) = self.roles.get_mut(id) {
                        role.increment_requested();
                    }
                    outcome.requests.push(AllocationRequest {
                        role: id,
                        memory_mb,
                        vcores,
                        host_hint,
                    });
                }
                info!(role = %name, count = needed, memory_mb, vcores, "requesting containers");
            } else if delta < 0 {
                let excess = (-delta) as u32;
                let mut chosen = 0u32;
                for host in self.nodes.release_candidates(id) {
                    if chosen == excess {
                        break;
                    }
                    // Newest instance on the host goes first.
                    let mut on_host: Vec<InstanceId> = self
                        .registry
                        .instances_on_host(&host)
                        .into_iter()
                        .filter(|iid| {
                            self.registry
                                .get(*iid)
                                .map(|inst| inst.role == id && inst.state == InstanceState::Live)
                                .unwrap_or(false)
                        })
                        .collect();
                    on_host.reverse();

                    for iid in on_host {
                        if chosen == excess {
                            break;
                        }
                        if !matches!(self.registry.begin_release(iid), Ok(true)) {
                            continue;
                        }
                        let Ok(instance) = self.registry.get(iid) else {
                            continue;
                        };
                        let container_id = instance.container_id.clone();
                        self.nodes.record_release_started(&host, id);
                        if let Ok(role) = self.roles.get_mut(id) {
                            role.increment_releasing();
                        }
                        outcome.releases.push(ReleaseIntent {
                            instance: iid,
                            container_id,
                            role: id,
                            host: host.clone(),
                        });
                        chosen += 1;
                    }
                }
                if chosen < excess {
                    debug!(
                        role = %name,
                        excess,
                        chosen,
                        "not enough live instances to release; remainder deferred"
                    );
                }
                if chosen > 0 {
                    info!(role = %name, count = chosen, "releasing containers");
                }
            }
        }

        outcome
    }

    /// Resolve a role's resource requirement against the known limits.
    /// Requirements needing the cluster maximum are deferred until the
    /// limits have been reported.
    fn resolve_resource(&self, resource: RoleResource, role: &str) -> Option<(u32, u32)> {
        match self.limits {
            Some(limits) => Some((
                resource.memory_mb.resolve(limits.max_memory_mb),
                resource.vcores.resolve(limits.max_vcores),
            )),
            None => match (resource.memory_mb, resource.vcores) {
                (ResourceValue::Fixed(memory_mb), ResourceValue::Fixed(vcores)) => {
                    Some((memory_mb, vcores))
                }
                _ => {
                    debug!(role, "container limits not yet known; deferring requests");
                    None
                }
            },
        }
    }

    // ── RM responses ───────────────────────────────────────────────

    /// Match an incoming container grant against outstanding requests.
    ///
    /// A grant that matches nothing — unknown priority, no outstanding
    /// request, too small, or no longer needed after a scale-down — is
    /// surfaced as surplus for the caller to release immediately, never
    /// silently accepted.
    pub fn on_container_allocated(&mut self, offer: ContainerOffer) -> AllocationOutcome {
        if self.registry.find_by_container(&offer.container_id).is_some() {
            warn!(
                container = %offer.container_id,
                "duplicate grant for a live container ignored"
            );
            return AllocationOutcome::Duplicate(offer.container_id);
        }

        let (name, requested, resource) = match self.roles.get(offer.priority) {
            Ok(role) => (role.name().to_string(), role.requested(), role.resource()),
            Err(_) => {
                warn!(
                    container = %offer.container_id,
                    priority = %offer.priority,
                    "grant at unknown priority; releasing"
                );
                self.surplus_released += 1;
                return AllocationOutcome::SurplusRelease(offer.container_id);
            }
        };

        if requested == 0 {
            warn!(
                container = %offer.container_id,
                role = %name,
                "grant with no outstanding request; releasing"
            );
            self.surplus_released += 1;
            return AllocationOutcome::SurplusRelease(offer.container_id);
        }

        if let Some((memory_mb, vcores)) = self.resolve_resource(resource, &name)
            && (offer.memory_mb < memory_mb || offer.vcores < vcores)
        {
            // The request stays outstanding; the RM owes a usable grant.
            warn!(
                container = %offer.container_id,
                role = %name,
                offered_memory = offer.memory_mb,
                needed_memory = memory_mb,
                "grant smaller than requirement; releasing"
            );
            self.surplus_released += 1;
            return AllocationOutcome::SurplusRelease(offer.container_id);
        }

        let Ok(role) = self.roles.get_mut(offer.priority) else {
            self.surplus_released += 1;
            return AllocationOutcome::SurplusRelease(offer.container_id);
        };
        role.decrement_requested();

        if role.desired_delta() <= 0 {
            // A scale-down raced this in-flight request; release rather
            // than keep.
            warn!(
                container = %offer.container_id,
                role = %name,
                "grant no longer needed after scale-down; releasing"
            );
            self.surplus_released += 1;
            return AllocationOutcome::SurplusRelease(offer.container_id);
        }

        role.increment_actual();
        self.nodes.record_assignment(&offer.host, offer.priority);
        let instance =
            self.registry
                .register(offer.container_id.clone(), &offer.host, offer.priority);
        info!(
            container = %offer.container_id,
            role = %name,
            host = %offer.host,
            instance = %instance,
            "container assigned"
        );
        AllocationOutcome::Assigned(ContainerAssignment {
            role: offer.priority,
            instance,
            offer,
        })
    }

    /// Record that an assigned container's role process is up.
    pub fn on_container_started(&mut self, instance: InstanceId) -> StateResult<()> {
        self.registry.transition(instance, InstanceState::Live)?;
        debug!(instance = %instance, "instance live");
        Ok(())
    }

    /// Process a container completion report.
    ///
    /// Known containers resolve to a confirmed release or a failure from
    /// the engine's own records; the exit status is informational only.
    /// Unknown containers are reclassified per the restart policy rather
    /// than rejected.
    pub fn on_container_completed(
        &mut self,
        completion: &ContainerCompletion,
    ) -> StateResult<CompletionOutcome> {
        if self.registry.is_retired(&completion.container_id) {
            debug!(
                container = %completion.container_id,
                "duplicate completion ignored"
            );
            return Ok(CompletionOutcome::DuplicateCompletion);
        }

        let known = self
            .registry
            .find_by_container(&completion.container_id)
            .map(|i| (i.id, i.role, i.host.clone(), i.state));

        match known {
            Some((instance, role_id, host, InstanceState::Releasing)) => {
                self.registry.transition(instance, InstanceState::Released)?;
                self.registry.retire(instance)?;
                let role = self.roles.get_mut(role_id)?;
                role.decrement_actual();
                role.decrement_releasing();
                role.increment_completed();
                let name = role.name().to_string();
                self.nodes.record_release_completed(&host, role_id);
                info!(
                    container = %completion.container_id,
                    role = %name,
                    host = %host,
                    "release confirmed"
                );
                Ok(CompletionOutcome::Released {
                    instance,
                    role: role_id,
                })
            }
            Some((instance, role_id, host, _)) => {
                self.registry.transition(instance, InstanceState::Failed)?;
                self.registry.retire(instance)?;
                let role = self.roles.get_mut(role_id)?;
                role.decrement_actual();
                role.increment_failed();
                let name = role.name().to_string();
                self.nodes.record_failure(&host, role_id);
                warn!(
                    container = %completion.container_id,
                    role = %name,
                    host = %host,
                    exit_status = completion.exit_status,
                    "container failed; delta now covers its replacement"
                );
                Ok(CompletionOutcome::Failed {
                    instance,
                    role: role_id,
                })
            }
            None => {
                match completion
                    .priority
                    .and_then(|p| self.roles.get_mut(p).ok())
                {
                    Some(role) => {
                        // Assume one of our own in-flight requests was
                        // granted and lost before the grant callback; the
                        // next tick's delta rises by one to replace it.
                        role.increment_failed();
                        role.decrement_requested();
                        let role_id = role.id();
                        let name = role.name().to_string();
                        warn!(
                            container = %completion.container_id,
                            role = %name,
                            exit_status = completion.exit_status,
                            "unknown container completed; counted as failure"
                        );
                        Ok(CompletionOutcome::UnknownFailed { role: role_id })
                    }
                    None => {
                        self.unattributed_completions += 1;
                        warn!(
                            container = %completion.container_id,
                            "completion with no attributable role"
                        );
                        Ok(CompletionOutcome::Unattributed)
                    }
                }
            }
        }
    }

    // ── Flex ───────────────────────────────────────────────────────

    /// Apply an operator rescale: role name → new desired count.
    ///
    /// Every named role is validated before anything is applied; the
    /// change takes effect on the next scheduling tick, never here.
    pub fn flex(&mut self, targets: &BTreeMap<String, u32>) -> StateResult<bool> {
        let mut resolved = Vec::with_capacity(targets.len());
        for (name, count) in targets {
            let id = self.roles.lookup(name)?;
            resolved.push((id, name.clone(), *count));
        }

        let mut changed = false;
        for (id, name, count) in resolved {
            let desired = self.roles.get(id)?.desired();
            if desired != count {
                info!(role = %name, from = desired, to = count, "flexing role");
                self.roles.get_mut(id)?.set_desired(count);
                self.document.set_desired_instances(&name, count);
                changed = true;
            }
        }
        Ok(changed)
    }

    // ── Status ─────────────────────────────────────────────────────

    /// One consistent snapshot of every table.
    pub fn status_snapshot(&self) -> ClusterStatus {
        ClusterStatus {
            cluster: self.document.name.clone(),
            roles: self
                .roles
                .iter()
                .map(|r| RoleStatusSnapshot {
                    name: r.name().to_string(),
                    priority: r.id(),
                    desired: r.desired(),
                    actual: r.actual(),
                    requested: r.requested(),
                    releasing: r.releasing(),
                    failed: r.failed(),
                    started: r.started(),
                    completed: r.completed(),
                })
                .collect(),
            instances: self
                .registry
                .iter()
                .map(|i| InstanceSnapshot {
                    instance: i.id,
                    container_id: i.container_id.clone(),
                    host: i.host.clone(),
                    role: i.role,
                    state: i.state,
                })
                .collect(),
            nodes: self.nodes.snapshot(),
            surplus_released: self.surplus_released,
            unattributed_completions: self.unattributed_completions,
        }
    }

    /// Write current actuals and per-role statistics into the document's
    /// status-only sections, for reporting and persistence.
    pub fn refresh_document_status(&mut self, now_millis: u64) {
        let stats: Vec<(String, BTreeMap<String, i64>)> = self
            .roles
            .iter()
            .map(|r| {
                let mut map = BTreeMap::new();
                map.insert(keys::STAT_DESIRED.to_string(), i64::from(r.desired()));
                map.insert(keys::STAT_ACTUAL.to_string(), i64::from(r.actual()));
                map.insert(keys::STAT_REQUESTED.to_string(), i64::from(r.requested()));
                map.insert(keys::STAT_RELEASING.to_string(), i64::from(r.releasing()));
                map.insert(keys::STAT_FAILED.to_string(), i64::from(r.failed()));
                map.insert(keys::STAT_STARTED.to_string(), i64::from(r.started()));
                map.insert(keys::STAT_COMPLETED.to_string(), i64::from(r.completed()));
                (r.name().to_string(), map)
            })
            .collect();

        for (name, map) in stats {
            let actual = map.get(keys::STAT_ACTUAL).copied().unwrap_or(0) as u32;
            self.document.set_actual_instances(&name, actual);
            self.document.statistics.insert(name, map);
        }
        self.document
            .set_info(keys::INFO_CREATE_TIME_MILLIS, self.document.create_time);
        self.document
            .set_info(keys::INFO_STATUS_TIME_MILLIS, now_millis);
    }
}

/// The engine behind its whole-engine critical section.
///
/// Every operation locks, mutates, and unlocks; intents come back as
/// values so the RM client is never called under the lock.
#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<AllocationEngine>>,
}

impl SharedEngine {
    pub fn new(engine: AllocationEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AllocationEngine> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_container_limits(&self, max_memory_mb: u32, max_vcores: u32) {
        self.lock().set_container_limits(max_memory_mb, max_vcores);
    }

    pub fn review_request_state(&self) -> ReviewOutcome {
        self.lock().review_request_state()
    }

    pub fn on_container_allocated(&self, offer: ContainerOffer) -> AllocationOutcome {
        self.lock().on_container_allocated(offer)
    }

    pub fn on_container_started(&self, instance: InstanceId) -> StateResult<()> {
        self.lock().on_container_started(instance)
    }

    pub fn on_container_completed(
        &self,
        completion: &ContainerCompletion,
    ) -> StateResult<CompletionOutcome> {
        self.lock().on_container_completed(completion)
    }

    pub fn flex(&self, targets: &BTreeMap<String, u32>) -> StateResult<bool> {
        self.lock().flex(targets)
    }

    pub fn status_snapshot(&self) -> ClusterStatus {
        self.lock().status_snapshot()
    }

    /// Refresh the document's status sections and return a copy for
    /// persistence outside the lock.
    pub fn refresh_document(&self, now_millis: u64) -> ClusterDocument {
        let mut engine = self.lock();
        engine.refresh_document_status(now_millis);
        engine.document.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoleId;

    fn supported() -> Vec<RoleDefinition> {
        vec![
            RoleDefinition::new("master", 1),
            RoleDefinition::new("worker", 2),
        ]
    }

    fn document(workers: u32) -> ClusterDocument {
        let mut doc = ClusterDocument::new("test");
        doc.set_desired_instances("master", 1);
        doc.set_desired_instances("worker", workers);
        doc.set_role_opt("worker", keys::YARN_MEMORY, 512);
        doc
    }

    fn engine(workers: u32) -> AllocationEngine {
        AllocationEngine::build(document(workers), &supported()).unwrap()
    }

    fn offer_for(request: &AllocationRequest, n: u32, host: &str) -> ContainerOffer {
        ContainerOffer {
            container_id: ContainerId::new(format!("container_{n:04}")),
            host: host.to_string(),
            priority: request.role,
            memory_mb: request.memory_mb,
            vcores: request.vcores,
        }
    }

    fn assign(engine: &mut AllocationEngine, request: &AllocationRequest, n: u32, host: &str) -> ContainerAssignment {
        match engine.on_container_allocated(offer_for(request, n, host)) {
            AllocationOutcome::Assigned(assignment) => assignment,
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn build_rejects_unsupported_roles() {
        let mut doc = document(2);
        doc.set_desired_instances("ghost", 1);
        let err = AllocationEngine::build(doc, &supported()).unwrap_err();
        assert!(matches!(err, StateError::BadConfiguration(_)));
    }

    #[test]
    fn build_rejects_duplicate_priorities() {
        let defs = vec![
            RoleDefinition::new("master", 1),
            RoleDefinition::new("worker", 1),
        ];
        let err = AllocationEngine::build(document(1), &defs).unwrap_err();
        assert!(matches!(err, StateError::BadConfiguration(_)));
    }

    #[test]
    fn tick_requests_up_to_desired_and_is_idempotent() {
        let mut engine = engine(3);
        let outcome = engine.review_request_state();
        assert_eq!(outcome.requests.len(), 4); // 1 master + 3 workers
        assert!(outcome.releases.is_empty());

        // No intervening events: the second tick must decide nothing.
        assert!(engine.review_request_state().is_empty());
    }

    #[test]
    fn requests_carry_resolved_resources() {
        let mut engine = engine(1);
        engine.set_container_limits(400, 8);
        let outcome = engine.review_request_state();

        let worker = outcome
            .requests
            .iter()
            .find(|r| r.role == RoleId(2))
            .unwrap();
        // Worker asked for 512 MB; the cluster ceiling clamps it.
        assert_eq!(worker.memory_mb, 400);
        assert_eq!(worker.vcores, 1);
    }

    #[test]
    fn use_maximum_defers_until_limits_known() {
        let mut doc = document(1);
        doc.set_role_opt("worker", keys::YARN_MEMORY, keys::RESOURCE_MAX);
        let mut engine = AllocationEngine::build(doc, &supported()).unwrap();

        let outcome = engine.review_request_state();
        assert!(outcome.requests.iter().all(|r| r.role == RoleId(1)));

        engine.set_container_limits(8192, 16);
        let outcome = engine.review_request_state();
        let worker = outcome
            .requests
            .iter()
            .find(|r| r.role == RoleId(2))
            .unwrap();
        assert_eq!(worker.memory_mb, 8192);
    }

    #[test]
    fn allocation_matches_outstanding_request() {
        let mut engine = engine(1);
        let outcome = engine.review_request_state();
        let request = outcome.requests[0].clone();

        let assignment = assign(&mut engine, &request, 1, "host1");
        assert_eq!(assignment.role, request.role);

        let role = engine.roles().get(request.role).unwrap();
        assert_eq!(role.actual(), 1);
        assert_eq!(role.requested(), 0);
    }

    #[test]
    fn grant_with_no_outstanding_request_is_surplus() {
        let mut engine = engine(1);
        let offer = ContainerOffer {
            container_id: ContainerId::new("container_9999"),
            host: "host1".to_string(),
            priority: RoleId(2),
            memory_mb: 512,
            vcores: 1,
        };
        let outcome = engine.on_container_allocated(offer);
        assert!(matches!(outcome, AllocationOutcome::SurplusRelease(_)));
        assert_eq!(engine.roles().get(RoleId(2)).unwrap().actual(), 0);
        assert_eq!(engine.status_snapshot().surplus_released, 1);
    }

    #[test]
    fn grant_at_unknown_priority_is_surplus() {
        let mut engine = engine(1);
        engine.review_request_state();
        let offer = ContainerOffer {
            container_id: ContainerId::new("container_9999"),
            host: "host1".to_string(),
            priority: RoleId(42),
            memory_mb: 512,
            vcores: 1,
        };
        assert!(matches!(
            engine.on_container_allocated(offer),
            AllocationOutcome::SurplusRelease(_)
        ));
    }

    #[test]
    fn undersized_grant_is_released_and_request_stays_outstanding() {
        let mut engine = engine(1);
        let outcome = engine.review_request_state();
        let request = outcome
            .requests
            .iter()
            .find(|r| r.role == RoleId(2))
            .unwrap()
            .clone();

        let mut offer = offer_for(&request, 1, "host1");
        offer.memory_mb = 128; // Worker needs 512.
        assert!(matches!(
            engine.on_container_allocated(offer),
            AllocationOutcome::SurplusRelease(_)
        ));
        assert_eq!(engine.roles().get(RoleId(2)).unwrap().requested(), 1);
    }

    #[test]
    fn duplicate_grant_for_live_container_changes_nothing() {
        let mut engine = engine(1);
        let outcome = engine.review_request_state();
        let request = outcome.requests[0].clone();
        assign(&mut engine, &request, 1, "host1");

        let repeat = offer_for(&request, 1, "host1");
        assert!(matches!(
            engine.on_container_allocated(repeat),
            AllocationOutcome::Duplicate(_)
        ));
        assert_eq!(engine.roles().get(request.role).unwrap().actual(), 1);
    }

    #[test]
    fn scale_down_racing_a_grant_releases_it() {
        let mut engine = engine(3);
        let outcome = engine.review_request_state();
        let workers: Vec<AllocationRequest> = outcome
            .requests
            .iter()
            .filter(|r| r.role == RoleId(2))
            .cloned()
            .collect();
        assert_eq!(workers.len(), 3);

        // Operator flexes workers down to one while three requests are
        // in flight.
        let targets = BTreeMap::from([("worker".to_string(), 1u32)]);
        assert!(engine.flex(&targets).unwrap());

        // First two grants are no longer needed; the third lands.
        assert!(matches!(
            engine.on_container_allocated(offer_for(&workers[0], 1, "host1")),
            AllocationOutcome::SurplusRelease(_)
        ));
        assert!(matches!(
            engine.on_container_allocated(offer_for(&workers[1], 2, "host2")),
            AllocationOutcome::SurplusRelease(_)
        ));
        assert!(matches!(
            engine.on_container_allocated(offer_for(&workers[2], 3, "host3")),
            AllocationOutcome::Assigned(_)
        ));

        let role = engine.roles().get(RoleId(2)).unwrap();
        assert_eq!(role.actual(), 1);
        assert_eq!(role.requested(), 0);
        assert!(role.is_satisfied());
    }

    #[test]
    fn failed_container_raises_the_delta() {
        let mut engine = engine(2);
        let outcome = engine.review_request_state();
        let requests: Vec<AllocationRequest> = outcome
            .requests
            .iter()
            .filter(|r| r.role == RoleId(2))
            .cloned()
            .collect();
        let a = assign(&mut engine, &requests[0], 1, "host1");
        assign(&mut engine, &requests[1], 2, "host2");
        engine.on_container_started(a.instance).unwrap();

        let completion = ContainerCompletion {
            container_id: a.offer.container_id.clone(),
            exit_status: 137,
            priority: None,
        };
        let outcome = engine.on_container_completed(&completion).unwrap();
        assert!(matches!(outcome, CompletionOutcome::Failed { .. }));

        let role = engine.roles().get(RoleId(2)).unwrap();
        assert_eq!(role.actual(), 1);
        assert_eq!(role.failed(), 1);
        assert_eq!(role.desired_delta(), 1);

        // The next tick replaces the lost capacity.
        let outcome = engine.review_request_state();
        assert_eq!(outcome.requests.len(), 1);
        assert_eq!(outcome.requests[0].role, RoleId(2));
    }

    #[test]
    fn flex_validates_every_role_before_applying() {
        let mut engine = engine(2);
        let targets = BTreeMap::from([
            ("worker".to_string(), 5u32),
            ("ghost".to_string(), 1u32),
        ]);
        assert!(matches!(
            engine.flex(&targets),
            Err(StateError::UnknownRole(_))
        ));
        // Nothing applied.
        assert_eq!(engine.roles().get(RoleId(2)).unwrap().desired(), 2);
    }

    #[test]
    fn flex_updates_document_desired_counts() {
        let mut engine = engine(2);
        let targets = BTreeMap::from([("worker".to_string(), 4u32)]);
        assert!(engine.flex(&targets).unwrap());
        assert!(!engine.flex(&targets).unwrap());
        assert_eq!(engine.document().desired_instances("worker", 0).unwrap(), 4);
    }

    #[test]
    fn recovery_readopts_reported_containers() {
        let running = vec![
            ContainerReport {
                container_id: ContainerId::new("container_0001"),
                host: "host1".to_string(),
                priority: RoleId(2),
            },
            ContainerReport {
                container_id: ContainerId::new("container_0002"),
                host: "host2".to_string(),
                priority: RoleId(2),
            },
            ContainerReport {
                container_id: ContainerId::new("container_0003"),
                host: "host3".to_string(),
                priority: RoleId(9), // No such role anymore.
            },
        ];
        let (engine, surplus) =
            AllocationEngine::build_recovered(document(3), &supported(), &running).unwrap();

        let role = engine.roles().get(RoleId(2)).unwrap();
        assert_eq!(role.actual(), 2);
        assert_eq!(role.requested(), 0);
        assert_eq!(role.desired_delta(), 1);
        assert_eq!(surplus, vec![ContainerId::new("container_0003")]);
    }

    #[test]
    fn refresh_document_status_populates_reporting_sections() {
        let mut engine = engine(1);
        let outcome = engine.review_request_state();
        let request = outcome
            .requests
            .iter()
            .find(|r| r.role == RoleId(2))
            .unwrap()
            .clone();
        assign(&mut engine, &request, 1, "host1");

        engine.refresh_document_status(1_234);
        let doc = engine.document();
        assert_eq!(doc.actual_instances("worker").unwrap(), 1);
        assert_eq!(
            doc.statistics.get("worker").unwrap().get(keys::STAT_ACTUAL),
            Some(&1)
        );
        assert_eq!(doc.info.get(keys::INFO_STATUS_TIME_MILLIS).unwrap(), "1234");
    }

    #[test]
    fn shared_engine_serializes_whole_operations() {
        let shared = SharedEngine::new(engine(2));
        let outcome = shared.review_request_state();
        assert_eq!(outcome.requests.len(), 3);

        let snapshot = shared.status_snapshot();
        assert_eq!(snapshot.roles.len(), 2);
        assert!(!snapshot.converged());
    }
}
