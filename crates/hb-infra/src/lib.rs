pub mod env;
pub mod ports;
pub mod provision;
pub mod readiness;
pub mod types;
pub mod virtualbox;

use async_trait::async_trait;
use types::{PortPair, RuntimeState, VmHandle, VmId, VmSpec};

pub use ports::{PortAllocator, PortKind, PortRange};
pub use provision::{GuestProvisioner, ProvisionConfig};
pub use readiness::{Polled, Retry, wait_for_address};
pub use virtualbox::{VirtualBoxConfig, VirtualBoxDriver};
pub use vbox_manage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("hypervisor command failed: {0}")]
    Hypervisor(#[from] vbox_manage::Error),

    #[error("hypervisor reported no {field} for {vm}")]
    MissingField { vm: String, field: &'static str },

    #[error("{kind} port range {range} exhausted")]
    PortsExhausted { kind: PortKind, range: PortRange },

    #[error("invalid port configuration: {0}")]
    InvalidPorts(String),

    #[error("invalid env var {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Lifecycle operations against the local hypervisor.
///
/// Every call blocks on an external process for at most the driver's
/// configured timeout. Identifiers passed back in are the [`VmId`] returned
/// by `create_and_configure`, never the caller's host name.
#[async_trait]
pub trait HypervisorDriver: Send + Sync + 'static {
    /// Register a VM, attach a fresh disk and the base image, boot from
    /// removable media first, attach a NAT interface.
    async fn create_and_configure(&self, spec: &VmSpec) -> Result<VmHandle>;

    /// Forward guest port 80 to `ports.web` and guest port 22 to `ports.ssh`.
    async fn set_port_forwarding(&self, id: &VmId, ports: PortPair) -> Result<()>;

    /// Boot without an attached console.
    async fn start(&self, id: &VmId) -> Result<()>;

    /// Single-shot query; `None` while the guest has not reported an address.
    async fn resolve_guest_address(&self, id: &VmId) -> Result<Option<String>>;

    /// Power the VM off.
    async fn stop(&self, id: &VmId) -> Result<()>;

    /// Deregister and delete the VM's storage.
    async fn unregister_and_delete(&self, id: &VmId) -> Result<()>;

    async fn runtime_state(&self, id: &VmId) -> Result<RuntimeState>;

    /// Driver identifier for logs.
    fn name(&self) -> &'static str;
}
