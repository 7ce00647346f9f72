use std::sync::Arc;

use chrono::Utc;
use hb_db::{Host, HostStatus, HostStore, NewHost};
use hb_infra::provision::{GuestProvisioner, ProvisionReport, ProvisionTarget};
use hb_infra::readiness::{Polled, wait_for_address};
use hb_infra::types::{PortPair, VmHandle, VmId};
use hb_infra::{HypervisorDriver, PortAllocator};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{LifecycleError, Result};
use crate::name::validate_host_name;
use crate::outcome::VmCreationOutcome;
use crate::reconciler::StatusReconciler;
use crate::settings::LifecycleSettings;

/// A spawned pipeline. Dropping it detaches the task; awaiting is optional.
#[derive(Debug)]
pub struct PipelineHandle<T> {
    host_id: Uuid,
    task: JoinHandle<T>,
}

impl<T> PipelineHandle<T> {
    pub fn host_id(&self) -> Uuid {
        self.host_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the pipeline to finish.
    pub async fn join(self) -> Result<T> {
        Ok(self.task.await?)
    }
}

/// What the create pipeline did, for callers that wait on it.
#[derive(Debug)]
pub struct CreateReport {
    pub outcome: VmCreationOutcome,
    /// Present once the host reached `RUNNING`.
    pub provisioning: Option<PipelineHandle<Result<ProvisionReport>>>,
}

/// A create request that passed validation. `host` is the `CREATING` record.
#[derive(Debug)]
pub struct CreateAccepted {
    pub host: Host,
    pub pipeline: PipelineHandle<CreateReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Nothing to delete for this owner.
    AlreadyAbsent,
    /// The host never got a VM; only the record was removed.
    RecordOnly,
    /// VM unregistered and record removed.
    Removed,
}

struct Inner {
    driver: Arc<dyn HypervisorDriver>,
    ports: Arc<PortAllocator>,
    store: Arc<dyn HostStore>,
    reconciler: StatusReconciler,
    provisioner: Arc<GuestProvisioner>,
    settings: LifecycleSettings,
}

/// Runs host create and delete pipelines as background tasks.
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

impl Lifecycle {
    pub fn new(
        driver: Arc<dyn HypervisorDriver>,
        ports: Arc<PortAllocator>,
        store: Arc<dyn HostStore>,
        provisioner: Arc<GuestProvisioner>,
        settings: LifecycleSettings,
    ) -> Self {
        let reconciler = StatusReconciler::new(store.clone());
        Self {
            inner: Arc::new(Inner {
                driver,
                ports,
                store,
                reconciler,
                provisioner,
                settings,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn HostStore> {
        &self.inner.store
    }

    pub fn reconciler(&self) -> &StatusReconciler {
        &self.inner.reconciler
    }

    pub fn driver(&self) -> &Arc<dyn HypervisorDriver> {
        &self.inner.driver
    }

    /// Move the port cursors past every pair existing records hold.
    pub async fn restore_port_cursors(&self) -> Result<()> {
        let held: Vec<PortPair> = self
            .inner
            .store
            .held_ports()
            .await?
            .into_iter()
            .filter_map(|(web, ssh)| {
                Some(PortPair {
                    web: u16::try_from(web).ok()?,
                    ssh: u16::try_from(ssh).ok()?,
                })
            })
            .collect();
        info!(hosts = held.len(), "lifecycle: restoring port cursors");
        self.inner.ports.advance_past(held);
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn list_hosts(&self, owner_id: Uuid) -> Result<Vec<Host>> {
        Ok(self.inner.store.list_for_owner(owner_id).await?)
    }

    pub async fn get_host(&self, owner_id: Uuid, host_id: Uuid) -> Result<Host> {
        self.inner
            .store
            .get_for_owner(owner_id, host_id)
            .await?
            .ok_or(LifecycleError::HostNotFound(host_id))
    }

    /// Current status, refreshed from the hypervisor when the host has a VM.
    /// A failed hypervisor query is returned as an error and writes nothing.
    pub async fn host_status(&self, owner_id: Uuid, host_id: Uuid) -> Result<HostStatus> {
        let host = self.get_host(owner_id, host_id).await?;
        let Some(vm_id) = host.vm_id.clone() else {
            return Ok(host.status);
        };
        if host.status == HostStatus::Creating {
            return Ok(host.status);
        }

        let observed = self.inner.driver.runtime_state(&VmId(vm_id)).await?;
        let host = self
            .inner
            .reconciler
            .apply_runtime_state(host.id, observed)
            .await?;
        Ok(host.status)
    }

    // ── Start / stop ────────────────────────────────────────────────

    pub async fn start_host(&self, owner_id: Uuid, host_id: Uuid) -> Result<Host> {
        let (host, vm_id) = self
            .host_with_vm(owner_id, host_id, "start", &[HostStatus::Stopped])
            .await?;
        self.inner.driver.start(&vm_id).await?;
        info!(host_id = %host.id, vm_id = %vm_id, "lifecycle: host started");
        self.inner
            .reconciler
            .apply_runtime_state(host.id, hb_infra::types::RuntimeState::Running)
            .await
    }

    pub async fn stop_host(&self, owner_id: Uuid, host_id: Uuid) -> Result<Host> {
        let (host, vm_id) = self
            .host_with_vm(
                owner_id,
                host_id,
                "stop",
                &[HostStatus::Running, HostStatus::Error],
            )
            .await?;
        self.inner.driver.stop(&vm_id).await?;
        info!(host_id = %host.id, vm_id = %vm_id, "lifecycle: host stopped");
        self.inner
            .reconciler
            .apply_runtime_state(host.id, hb_infra::types::RuntimeState::Stopped)
            .await
    }

    async fn host_with_vm(
        &self,
        owner_id: Uuid,
        host_id: Uuid,
        action: &'static str,
        allowed: &[HostStatus],
    ) -> Result<(Host, VmId)> {
        let host = self.get_host(owner_id, host_id).await?;
        match host.vm_id.clone() {
            Some(vm_id) if allowed.contains(&host.status) => Ok((host, VmId(vm_id))),
            _ => Err(LifecycleError::InvalidState {
                id: host.id,
                status: host.status,
                action,
            }),
        }
    }

    // ── Create ──────────────────────────────────────────────────────

    /// Validate and record the host, then build it in the background.
    ///
    /// Only validation errors are returned here. Everything after acceptance
    /// ends up in the host record.
    pub async fn create_host(&self, owner_id: Uuid, name: &str) -> Result<CreateAccepted> {
        validate_host_name(name)?;
        if self.inner.store.exists_for_owner(owner_id, name).await? {
            return Err(LifecycleError::DuplicateHostName(name.to_string()));
        }
        // The unique constraint decides races between concurrent requests.
        let host = self.inner.store.insert(NewHost { owner_id, name }).await?;
        info!(host_id = %host.id, owner_id = %owner_id, name, "lifecycle: host accepted");

        let this = self.clone();
        let host_id = host.id;
        let host_name = host.name.clone();
        let task = tokio::spawn(async move { this.run_create(host_id, host_name).await });

        Ok(CreateAccepted {
            host,
            pipeline: PipelineHandle { host_id, task },
        })
    }

    async fn run_create(&self, host_id: Uuid, name: String) -> CreateReport {
        let outcome = self.build_vm(host_id, &name).await;

        match self.inner.reconciler.apply_outcome(host_id, &outcome).await {
            Ok(_) => {}
            Err(LifecycleError::HostNotFound(_)) => {
                // deleted while creating; the VM has no record left to own it
                if let VmCreationOutcome::Created { vm, .. } = &outcome {
                    warn!(host_id = %host_id, vm_id = %vm.id, "lifecycle: host removed during creation, discarding vm");
                    self.discard_vm(&vm.id).await;
                }
                return CreateReport {
                    outcome,
                    provisioning: None,
                };
            }
            Err(e) => {
                error!(host_id = %host_id, error = %e, "lifecycle: failed to record creation outcome");
                return CreateReport {
                    outcome,
                    provisioning: None,
                };
            }
        }

        let provisioning = match &outcome {
            VmCreationOutcome::Created { address, ports, .. } => Some(self.spawn_provisioning(
                host_id,
                ProvisionTarget {
                    site_name: name,
                    address: address.clone(),
                    ports: *ports,
                },
            )),
            VmCreationOutcome::Failed { .. } => None,
        };

        CreateReport {
            outcome,
            provisioning,
        }
    }

    /// create/configure → ports → forwarding → start → address.
    async fn build_vm(&self, host_id: Uuid, name: &str) -> VmCreationOutcome {
        let inner = &self.inner;
        let vm_name = inner
            .settings
            .vm_name(name, Utc::now().timestamp_millis());
        let spec = inner.settings.vm_spec(vm_name);

        let vm = match inner.driver.create_and_configure(&spec).await {
            Ok(vm) => vm,
            Err(e) => {
                warn!(host_id = %host_id, vm_name = %spec.name, error = %e, "lifecycle: vm creation failed");
                return VmCreationOutcome::failed(e);
            }
        };

        let ports = match self.wire_and_start(&vm).await {
            Ok(ports) => ports,
            Err(e) => {
                warn!(host_id = %host_id, vm_id = %vm.id, error = %e, "lifecycle: vm setup failed, removing vm");
                self.discard_vm(&vm.id).await;
                return VmCreationOutcome::failed(e);
            }
        };

        let (address, address_is_fallback) =
            match wait_for_address(inner.driver.as_ref(), &vm.id, &inner.settings.address_retry)
                .await
            {
                Polled::Ready { value, .. } => (value, false),
                Polled::TimedOut { attempts } => {
                    warn!(
                        host_id = %host_id,
                        vm_id = %vm.id,
                        attempts,
                        fallback = %inner.settings.fallback_address,
                        "lifecycle: guest address unknown, using fallback"
                    );
                    (inner.settings.fallback_address.clone(), true)
                }
            };

        VmCreationOutcome::Created {
            vm,
            address,
            address_is_fallback,
            ports,
        }
    }

    async fn wire_and_start(&self, vm: &VmHandle) -> hb_infra::Result<PortPair> {
        let ports = self.inner.ports.allocate_pair()?;
        self.inner.driver.set_port_forwarding(&vm.id, ports).await?;
        self.inner.driver.start(&vm.id).await?;
        Ok(ports)
    }

    /// Best-effort removal of a VM nothing will own.
    async fn discard_vm(&self, vm_id: &VmId) {
        let driver = &self.inner.driver;
        if let Err(e) = driver.stop(vm_id).await {
            tracing::debug!(vm_id = %vm_id, error = %e, "lifecycle: power off before discard failed");
        }
        if let Err(e) = driver.unregister_and_delete(vm_id).await {
            error!(vm_id = %vm_id, error = %e, "lifecycle: failed to discard vm");
        }
    }

    fn spawn_provisioning(
        &self,
        host_id: Uuid,
        target: ProvisionTarget,
    ) -> PipelineHandle<Result<ProvisionReport>> {
        let this = self.clone();
        let task = tokio::spawn(async move {
            let provisioner = this.inner.provisioner.clone();
            tokio::time::sleep(provisioner.boot_delay()).await;

            let site = target.site_name.clone();
            let result = tokio::task::spawn_blocking(move || provisioner.setup_web_server(&target))
                .await
                .map_err(LifecycleError::from)
                .and_then(|r| r.map_err(LifecycleError::from));

            match &result {
                Ok(report) => {
                    info!(host_id = %host_id, site = %site, account = %report.account, warnings = report.warnings.len(), "lifecycle: provisioning finished");
                }
                Err(e) => {
                    error!(host_id = %host_id, site = %site, error = %e, "lifecycle: provisioning failed");
                    if let Err(write) = this.inner.reconciler.mark_error(host_id, &e.to_string()).await {
                        error!(host_id = %host_id, error = %write, "lifecycle: failed to record provisioning failure");
                    }
                }
            }
            result
        });
        PipelineHandle { host_id, task }
    }

    // ── Delete ──────────────────────────────────────────────────────

    /// Remove the host's VM, then its record. Deleting a missing host succeeds.
    pub fn delete_host(&self, owner_id: Uuid, host_id: Uuid) -> PipelineHandle<Result<DeleteOutcome>> {
        let this = self.clone();
        let task = tokio::spawn(async move { this.run_delete(owner_id, host_id).await });
        PipelineHandle { host_id, task }
    }

    async fn run_delete(&self, owner_id: Uuid, host_id: Uuid) -> Result<DeleteOutcome> {
        let inner = &self.inner;
        let Some(host) = inner.store.get_for_owner(owner_id, host_id).await? else {
            info!(host_id = %host_id, "lifecycle: delete of absent host");
            return Ok(DeleteOutcome::AlreadyAbsent);
        };

        let Some(vm_id) = host.vm_id.map(VmId) else {
            inner.store.delete(host_id).await?;
            info!(host_id = %host_id, "lifecycle: host without vm deleted");
            return Ok(DeleteOutcome::RecordOnly);
        };

        if let Err(e) = inner.driver.stop(&vm_id).await {
            warn!(host_id = %host_id, vm_id = %vm_id, error = %e, "lifecycle: power off failed, unregistering anyway");
        }
        tokio::time::sleep(inner.settings.poweroff_settle).await;

        if let Err(e) = inner.driver.unregister_and_delete(&vm_id).await {
            error!(host_id = %host_id, vm_id = %vm_id, error = %e, "lifecycle: unregister failed, keeping record");
            return Err(e.into());
        }

        inner.store.delete(host_id).await?;
        info!(host_id = %host_id, vm_id = %vm_id, "lifecycle: host deleted");
        Ok(DeleteOutcome::Removed)
    }
}
