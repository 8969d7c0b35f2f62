//! The consumed resource-manager interface.
//!
//! The engine never blocks on the RM: ticks produce intents, the caller
//! dispatches them through a [`ResourceManagerClient`] outside the engine
//! lock, and responses come back as [`RmEvent`] values fed into the
//! engine in arrival order.

use crate::types::{AllocationRequest, ContainerCompletion, ContainerId, ContainerOffer};

/// A response from the resource manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RmEvent {
    /// A container was granted.
    Allocated(ContainerOffer),
    /// A container finished.
    Completed(ContainerCompletion),
}

/// Dispatch seam to the real resource-manager protocol client.
///
/// A failed dispatch means the intent was not issued; the engine
/// recomputes deltas from current state each tick, so the intent is
/// simply re-derived on the next one.
pub trait ResourceManagerClient {
    /// Send container requests to the resource manager.
    fn allocate(&mut self, requests: &[AllocationRequest]) -> anyhow::Result<()>;

    /// Ask the resource manager to release a container.
    fn release(&mut self, container_id: &ContainerId) -> anyhow::Result<()>;
}
