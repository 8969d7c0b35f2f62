//! In-process convergence simulator.
//!
//! A grant-everything resource-manager double plus a driver loop, used
//! by `weftd simulate` as a dry run: requests are granted on synthetic
//! hosts, releases are confirmed, and optional mid-run flexing and
//! container kills exercise rescaling and self-healing without a real
//! cluster.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use tracing::{debug, info};

use weft_state::{
    AllocationOutcome, AllocationRequest, ContainerCompletion, ContainerId, ContainerOffer,
    ClusterStatus, ResourceManagerClient, RmEvent, RoleId, SharedEngine,
};

/// What the simulation should put the cluster through.
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Number of synthetic hosts offers are spread over.
    pub hosts: u32,
    /// Give up after this many scheduling ticks.
    pub max_ticks: u32,
    /// Flex to apply once the cluster first converges.
    pub flex: Option<BTreeMap<String, u32>>,
    /// Containers to kill once the cluster first converges.
    pub kill: u32,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            hosts: 4,
            max_ticks: 50,
            flex: None,
            kill: 0,
        }
    }
}

/// The simulated resource manager: grants every request, confirms every
/// release, and queues its responses for in-order delivery.
pub struct SimResourceManager {
    hosts: Vec<String>,
    next_container: u64,
    next_host: usize,
    /// The world's truth: containers actually running out there.
    containers: BTreeMap<ContainerId, (String, RoleId)>,
    inbox: VecDeque<RmEvent>,
}

impl SimResourceManager {
    pub fn new(hosts: u32) -> Self {
        Self {
            hosts: (1..=hosts.max(1)).map(|i| format!("host{i}")).collect(),
            next_container: 0,
            next_host: 0,
            containers: BTreeMap::new(),
            inbox: VecDeque::new(),
        }
    }

    /// Responses queued since the last drain, in arrival order.
    pub fn drain(&mut self) -> Vec<RmEvent> {
        self.inbox.drain(..).collect()
    }

    /// No responses pending delivery.
    pub fn is_idle(&self) -> bool {
        self.inbox.is_empty()
    }

    /// Running containers in the simulated world.
    pub fn running(&self) -> usize {
        self.containers.len()
    }

    /// Kill up to `count` running containers, oldest first, reporting
    /// them as unrequested exits.
    pub fn kill(&mut self, count: u32) {
        let victims: Vec<ContainerId> = self
            .containers
            .keys()
            .take(count as usize)
            .cloned()
            .collect();
        for container_id in victims {
            if let Some((_, role)) = self.containers.remove(&container_id) {
                info!(container = %container_id, "simulated container kill");
                self.inbox.push_back(RmEvent::Completed(ContainerCompletion {
                    container_id,
                    exit_status: 137,
                    priority: Some(role),
                }));
            }
        }
    }

    fn place(&mut self, hint: Option<&str>) -> String {
        match hint {
            Some(host) => host.to_string(),
            None => {
                let host = self.hosts[self.next_host % self.hosts.len()].clone();
                self.next_host += 1;
                host
            }
        }
    }
}

impl ResourceManagerClient for SimResourceManager {
    fn allocate(&mut self, requests: &[AllocationRequest]) -> anyhow::Result<()> {
        for request in requests {
            self.next_container += 1;
            let host = self.place(request.host_hint.as_deref());
            let container_id = ContainerId::new(format!("container_{:06}", self.next_container));
            self.containers
                .insert(container_id.clone(), (host.clone(), request.role));
            debug!(container = %container_id, host = %host, "simulated grant");
            self.inbox.push_back(RmEvent::Allocated(ContainerOffer {
                container_id,
                host,
                priority: request.role,
                memory_mb: request.memory_mb,
                vcores: request.vcores,
            }));
        }
        Ok(())
    }

    fn release(&mut self, container_id: &ContainerId) -> anyhow::Result<()> {
        if let Some((_, role)) = self.containers.remove(container_id) {
            debug!(container = %container_id, "simulated release");
            self.inbox.push_back(RmEvent::Completed(ContainerCompletion {
                container_id: container_id.clone(),
                exit_status: 0,
                priority: Some(role),
            }));
        }
        Ok(())
    }
}

/// Drive the engine against the simulated RM until the cluster has
/// converged and every scripted disturbance has been absorbed.
pub async fn run(
    engine: &SharedEngine,
    rm: &mut SimResourceManager,
    opts: &SimOptions,
) -> anyhow::Result<ClusterStatus> {
    let mut flex_pending = opts.flex.clone();
    let mut kills_pending = opts.kill;

    for tick in 0..opts.max_ticks {
        // Deliver responses in arrival order; intents dispatched below
        // happen outside the engine lock.
        for event in rm.drain() {
            match event {
                RmEvent::Allocated(offer) => match engine.on_container_allocated(offer) {
                    AllocationOutcome::Assigned(assignment) => {
                        engine.on_container_started(assignment.instance)?;
                    }
                    AllocationOutcome::SurplusRelease(container_id) => {
                        rm.release(&container_id)?;
                    }
                    AllocationOutcome::Duplicate(_) => {}
                },
                RmEvent::Completed(completion) => {
                    engine.on_container_completed(&completion)?;
                }
            }
        }

        let outcome = engine.review_request_state();
        if !outcome.requests.is_empty() {
            rm.allocate(&outcome.requests)?;
        }
        for release in &outcome.releases {
            rm.release(&release.container_id)?;
        }

        let status = engine.status_snapshot();
        if outcome.is_empty() && rm.is_idle() && status.converged() {
            if let Some(targets) = flex_pending.take() {
                info!(tick, "converged; applying flex");
                engine.flex(&targets)?;
                continue;
            }
            if kills_pending > 0 {
                info!(tick, count = kills_pending, "converged; killing containers");
                rm.kill(kills_pending);
                kills_pending = 0;
                continue;
            }
            info!(tick, instances = status.instances.len(), "cluster converged");
            return Ok(status);
        }

        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    anyhow::bail!("cluster failed to converge within {} ticks", opts.max_ticks)
}

#[cfg(test)]
mod tests {
    use super::*;

    use weft_model::ClusterDocument;
    use weft_state::{AllocationEngine, RoleDefinition};

    fn shared_engine(masters: u32, workers: u32) -> SharedEngine {
        let mut doc = ClusterDocument::new("sim-test");
        doc.set_desired_instances("master", masters);
        doc.set_desired_instances("worker", workers);
        let supported = vec![
            RoleDefinition::new("master", 1),
            RoleDefinition::new("worker", 2),
        ];
        SharedEngine::new(AllocationEngine::build(doc, &supported).unwrap())
    }

    #[tokio::test]
    async fn simulation_converges_a_fresh_cluster() {
        let engine = shared_engine(1, 3);
        let mut rm = SimResourceManager::new(4);
        let status = run(&engine, &mut rm, &SimOptions::default()).await.unwrap();

        assert!(status.converged());
        assert_eq!(status.instances.len(), 4);
        assert_eq!(rm.running(), 4);
    }

    #[tokio::test]
    async fn simulation_applies_a_flex_after_convergence() {
        let engine = shared_engine(1, 3);
        let mut rm = SimResourceManager::new(4);
        let opts = SimOptions {
            flex: Some(BTreeMap::from([("worker".to_string(), 1u32)])),
            ..SimOptions::default()
        };
        let status = run(&engine, &mut rm, &opts).await.unwrap();

        assert!(status.converged());
        let worker = status.roles.iter().find(|r| r.name == "worker").unwrap();
        assert_eq!(worker.desired, 1);
        assert_eq!(worker.actual, 1);
        assert_eq!(rm.running(), 2);
    }

    #[tokio::test]
    async fn simulation_replaces_killed_containers() {
        let engine = shared_engine(0, 3);
        let mut rm = SimResourceManager::new(3);
        let opts = SimOptions {
            kill: 2,
            ..SimOptions::default()
        };
        let status = run(&engine, &mut rm, &opts).await.unwrap();

        assert!(status.converged());
        let worker = status.roles.iter().find(|r| r.name == "worker").unwrap();
        assert_eq!(worker.actual, 3);
        assert_eq!(worker.failed, 2);
        assert_eq!(rm.running(), 3);
    }

    #[tokio::test]
    async fn simulation_times_out_when_limits_never_arrive() {
        // A role asking for the cluster maximum cannot be requested
        // until limits are known; the simulation must give up, not hang.
        let mut doc = ClusterDocument::new("sim-test");
        doc.set_desired_instances("worker", 1);
        doc.set_role_opt("worker", weft_model::keys::YARN_MEMORY, weft_model::keys::RESOURCE_MAX);
        let supported = vec![RoleDefinition::new("worker", 1)];
        let engine =
            SharedEngine::new(AllocationEngine::build(doc, &supported).unwrap());

        let mut rm = SimResourceManager::new(2);
        let opts = SimOptions {
            max_ticks: 5,
            ..SimOptions::default()
        };
        assert!(run(&engine, &mut rm, &opts).await.is_err());
    }
}
