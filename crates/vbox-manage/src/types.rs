use std::collections::HashMap;
use std::fmt;

/// One `modifyvm` option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModifyVm {
    /// `--memory <mb>`
    Memory(u32),
    /// `--boot<slot> <device>`
    Boot(u8, BootDevice),
    /// `--nic<slot> <kind>`
    Nic(u8, NicKind),
    /// `--natpf<nic> <rule>`
    NatPortForward { nic: u8, rule: PortForward },
}

impl ModifyVm {
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Self::Memory(mb) => vec!["--memory".into(), mb.to_string()],
            Self::Boot(slot, device) => vec![format!("--boot{slot}"), device.as_str().into()],
            Self::Nic(slot, kind) => vec![format!("--nic{slot}"), kind.as_str().into()],
            Self::NatPortForward { nic, rule } => vec![format!("--natpf{nic}"), rule.to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDevice {
    Dvd,
    Disk,
}

impl BootDevice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dvd => "dvd",
            Self::Disk => "disk",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicKind {
    Nat,
}

impl NicKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nat => "nat",
        }
    }
}

/// A NAT port-forwarding rule: host port → guest port, any host/guest IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortForward {
    pub name: String,
    pub protocol: Protocol,
    pub host_port: u16,
    pub guest_port: u16,
}

impl PortForward {
    pub fn tcp(name: impl Into<String>, host_port: u16, guest_port: u16) -> Self {
        Self {
            name: name.into(),
            protocol: Protocol::Tcp,
            host_port,
            guest_port,
        }
    }
}

impl fmt::Display for PortForward {
    /// `<name>,<proto>,<host ip>,<host port>,<guest ip>,<guest port>` with both IPs left empty.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},,{},,{}",
            self.name,
            self.protocol.as_str(),
            self.host_port,
            self.guest_port
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBus {
    Sata,
    Ide,
}

impl StorageBus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sata => "sata",
            Self::Ide => "ide",
        }
    }
}

/// A storage controller to add with `storagectl`.
#[derive(Debug, Clone)]
pub struct StorageController {
    pub name: String,
    pub bus: StorageBus,
    pub chipset: Option<String>,
}

impl StorageController {
    pub fn sata() -> Self {
        Self {
            name: "SATA".into(),
            bus: StorageBus::Sata,
            chipset: Some("IntelAhci".into()),
        }
    }

    pub fn ide() -> Self {
        Self {
            name: "IDE".into(),
            bus: StorageBus::Ide,
            chipset: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumKind {
    Hdd,
    DvdDrive,
}

impl MediumKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hdd => "hdd",
            Self::DvdDrive => "dvddrive",
        }
    }
}

/// A medium to attach with `storageattach`.
#[derive(Debug, Clone)]
pub struct StorageAttachment {
    pub controller: String,
    pub port: u32,
    pub device: u32,
    pub kind: MediumKind,
    pub medium: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartType {
    Headless,
    Gui,
}

impl StartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Headless => "headless",
            Self::Gui => "gui",
        }
    }
}

/// Parsed `showvminfo --machinereadable` output.
///
/// Lines look like `key="value"` or `"quoted key"="value"`; numbers are unquoted.
#[derive(Debug, Clone, Default)]
pub struct MachineInfo {
    fields: HashMap<String, String>,
}

impl MachineInfo {
    pub fn parse(text: &str) -> Self {
        let fields = text
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (unquote(k).to_string(), unquote(v).to_string()))
            .collect();
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn uuid(&self) -> Option<&str> {
        self.get("UUID")
    }

    pub fn name(&self) -> Option<&str> {
        self.get("name")
    }

    /// Raw `VMState` value, e.g. `running`, `poweroff`, `aborted`, `saved`.
    pub fn state(&self) -> Option<&str> {
        self.get("VMState")
    }
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}
