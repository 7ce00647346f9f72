use hb_db::{HostRecordUpdate, HostStatus};
use hb_infra::types::{PortPair, VmHandle};

/// What one create pipeline produced. Consumed once by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmCreationOutcome {
    Created {
        vm: VmHandle,
        address: String,
        /// The guest never reported an address; `address` is the configured fallback.
        address_is_fallback: bool,
        ports: PortPair,
    },
    Failed {
        error: String,
    },
}

impl VmCreationOutcome {
    pub fn failed(error: impl ToString) -> Self {
        Self::Failed {
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Created { .. })
    }

    /// Row contents after the outcome is applied. A failure clears every
    /// hypervisor reference and port.
    pub fn record_update(&self) -> HostRecordUpdate {
        match self {
            Self::Created {
                vm, address, ports, ..
            } => HostRecordUpdate {
                status: Some(HostStatus::Running),
                vm_id: Some(vm.id.0.clone()),
                vm_name: Some(vm.name.clone()),
                address: Some(address.clone()),
                web_port: Some(i32::from(ports.web)),
                ssh_port: Some(i32::from(ports.ssh)),
            },
            Self::Failed { .. } => HostRecordUpdate {
                status: Some(HostStatus::Error),
                ..Default::default()
            },
        }
    }
}
