use std::fmt;

use serde::{Deserialize, Serialize};

/// Hypervisor-assigned VM identifier (the VirtualBox machine UUID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmId(pub String);

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What to build for one host.
#[derive(Debug, Clone)]
pub struct VmSpec {
    pub name: String,
    pub memory_mb: u32,
    pub disk_mb: u32,
    pub base_image: String,
}

/// A registered VM: its stable id plus the name it was registered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmHandle {
    pub id: VmId,
    pub name: String,
}

/// Host-side forwarding ports for one VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortPair {
    pub web: u16,
    pub ssh: u16,
}

/// Guest port the web forward targets.
pub const GUEST_WEB_PORT: u16 = 80;
/// Guest port the SSH forward targets.
pub const GUEST_SSH_PORT: u16 = 22;

/// Hypervisor-reported VM state, coarsened to what host status needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuntimeState {
    Running,
    Stopped,
    Unknown,
}

impl RuntimeState {
    /// Map a raw VirtualBox `VMState` value.
    pub fn from_vm_state(state: Option<&str>) -> Self {
        match state {
            Some("running") => Self::Running,
            Some("poweroff" | "aborted" | "saved" | "paused" | "stopping") => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vm_state_mapping() {
        assert_eq!(RuntimeState::from_vm_state(Some("running")), RuntimeState::Running);
        assert_eq!(RuntimeState::from_vm_state(Some("poweroff")), RuntimeState::Stopped);
        assert_eq!(RuntimeState::from_vm_state(Some("aborted")), RuntimeState::Stopped);
        assert_eq!(RuntimeState::from_vm_state(Some("gurumeditation")), RuntimeState::Unknown);
        assert_eq!(RuntimeState::from_vm_state(None), RuntimeState::Unknown);
    }
}
