use std::sync::Arc;

use hb_db::{Host, HostStatus, HostStore};
use hb_infra::types::RuntimeState;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{LifecycleError, Result};
use crate::outcome::VmCreationOutcome;

/// Status a host should move to after the hypervisor reports `observed`.
///
/// `CREATING` belongs to its pipeline and is left alone. `ERROR` is not
/// cleared by a running VM: the guest may be up but misconfigured.
pub fn next_status(current: HostStatus, observed: RuntimeState) -> HostStatus {
    match (current, observed) {
        (HostStatus::Creating, _) => HostStatus::Creating,
        (HostStatus::Error, RuntimeState::Running) => HostStatus::Error,
        (_, RuntimeState::Running) => HostStatus::Running,
        (_, RuntimeState::Stopped) => HostStatus::Stopped,
        (_, RuntimeState::Unknown) => HostStatus::Error,
    }
}

/// Writes pipeline results and observed VM state to the host record.
///
/// Every call re-reads the host by id and commits on its own; callers never
/// hand in a record they loaded earlier.
#[derive(Clone)]
pub struct StatusReconciler {
    store: Arc<dyn HostStore>,
}

impl StatusReconciler {
    pub fn new(store: Arc<dyn HostStore>) -> Self {
        Self { store }
    }

    async fn fetch(&self, host_id: Uuid) -> Result<Host> {
        self.store
            .get(host_id)
            .await?
            .ok_or(LifecycleError::HostNotFound(host_id))
    }

    pub async fn apply_outcome(&self, host_id: Uuid, outcome: &VmCreationOutcome) -> Result<Host> {
        self.fetch(host_id).await?;
        let host = self
            .store
            .update_record(host_id, &outcome.record_update())
            .await?;

        match outcome {
            VmCreationOutcome::Created {
                address_is_fallback: true,
                ..
            } => warn!(host_id = %host_id, address = ?host.address, "reconcile: host running with fallback address"),
            VmCreationOutcome::Created { .. } => {
                info!(host_id = %host_id, vm_id = ?host.vm_id, "reconcile: host running")
            }
            VmCreationOutcome::Failed { error } => {
                warn!(host_id = %host_id, error = %error, "reconcile: host creation failed")
            }
        }
        Ok(host)
    }

    /// Hosts without a VM have no runtime state and are returned unchanged.
    pub async fn apply_runtime_state(&self, host_id: Uuid, observed: RuntimeState) -> Result<Host> {
        let host = self.fetch(host_id).await?;
        if host.vm_id.is_none() {
            return Ok(host);
        }
        let next = next_status(host.status, observed);
        if next == host.status {
            return Ok(host);
        }

        let updated = self.store.set_status(host_id, next).await?;
        info!(host_id = %host_id, from = %host.status, to = %next, observed = ?observed, "reconcile: status changed");
        Ok(updated)
    }

    /// Post-creation failure, e.g. provisioning.
    pub async fn mark_error(&self, host_id: Uuid, reason: &str) -> Result<Host> {
        let host = self.fetch(host_id).await?;
        if host.status == HostStatus::Error {
            return Ok(host);
        }

        let updated = self.store.set_status(host_id, HostStatus::Error).await?;
        warn!(host_id = %host_id, from = %host.status, reason, "reconcile: host marked error");
        Ok(updated)
    }
}
