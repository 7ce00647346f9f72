use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};
use vbox_manage::{
    BootDevice, CommandRunner, MediumKind, ModifyVm, NicKind, PortForward, StartType,
    StorageAttachment, StorageController, VBoxManage,
};

use crate::types::{GUEST_SSH_PORT, GUEST_WEB_PORT, PortPair, RuntimeState, VmHandle, VmId, VmSpec};
use crate::{Error, HypervisorDriver, Result, env};

/// Guest property the guest additions publish the first NIC's IPv4 under.
const GUEST_IP_PROPERTY: &str = "/VirtualBox/GuestInfo/Net/0/V4/IP";

#[derive(Debug, Clone)]
pub struct VirtualBoxConfig {
    pub program: String,
    pub command_timeout: Duration,
    pub os_type: String,
    pub disk_dir: String,
}

impl Default for VirtualBoxConfig {
    fn default() -> Self {
        Self {
            program: "VBoxManage".into(),
            command_timeout: Duration::from_secs(120),
            os_type: "Ubuntu_64".into(),
            disk_dir: "/tmp".into(),
        }
    }
}

impl VirtualBoxConfig {
    /// Create from env vars:
    ///
    /// - `VBOXMANAGE_BIN` (default: `"VBoxManage"`)
    /// - `VBOX_COMMAND_TIMEOUT_SECS` (default: `120`)
    /// - `VM_OS_TYPE` (default: `"Ubuntu_64"`)
    /// - `VM_DISK_DIR` (default: `"/tmp"`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            program: env::string_or("VBOXMANAGE_BIN", "VBoxManage"),
            command_timeout: env::secs_or("VBOX_COMMAND_TIMEOUT_SECS", 120)?,
            os_type: env::string_or("VM_OS_TYPE", "Ubuntu_64"),
            disk_dir: env::string_or("VM_DISK_DIR", "/tmp"),
        })
    }

    fn disk_path(&self, vm_name: &str) -> String {
        format!("{}/{vm_name}.vdi", self.disk_dir.trim_end_matches('/'))
    }
}

/// Local VirtualBox driven through `VBoxManage`.
pub struct VirtualBoxDriver {
    vbox: VBoxManage,
    config: VirtualBoxConfig,
}

impl VirtualBoxDriver {
    pub fn new(config: VirtualBoxConfig) -> Self {
        let vbox = VBoxManage::new(config.program.clone()).with_timeout(config.command_timeout);
        Self { vbox, config }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(VirtualBoxConfig::from_env()?))
    }

    /// Use a custom process runner (tests, remote execution).
    pub fn with_runner(config: VirtualBoxConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let vbox = VBoxManage::with_runner(config.program.clone(), runner)
            .with_timeout(config.command_timeout);
        Self { vbox, config }
    }

    /// Everything after `createvm`: memory, disk, media, boot order, NIC.
    async fn configure(&self, spec: &VmSpec) -> Result<()> {
        let vm = spec.name.as_str();
        let disk = self.config.disk_path(vm);

        self.vbox
            .modify_vm(vm, &[ModifyVm::Memory(spec.memory_mb)])
            .await?;
        self.vbox.create_disk(&disk, spec.disk_mb).await?;

        // `unregistervm --delete` only removes attached media.
        if let Err(e) = self.attach_disk(vm, &disk).await {
            if let Err(cleanup) = self.vbox.close_disk(&disk, true).await {
                warn!(vm_name = %vm, disk = %disk, error = %cleanup, "virtualbox: failed to delete unattached disk");
            }
            return Err(e);
        }

        let ide = StorageController::ide();
        self.vbox.add_storage_controller(vm, &ide).await?;
        self.vbox
            .attach_storage(
                vm,
                &StorageAttachment {
                    controller: ide.name.clone(),
                    port: 0,
                    device: 0,
                    kind: MediumKind::DvdDrive,
                    medium: spec.base_image.clone(),
                },
            )
            .await?;

        self.vbox
            .modify_vm(
                vm,
                &[
                    ModifyVm::Boot(1, BootDevice::Dvd),
                    ModifyVm::Boot(2, BootDevice::Disk),
                    ModifyVm::Nic(1, NicKind::Nat),
                ],
            )
            .await?;
        Ok(())
    }

    async fn attach_disk(&self, vm: &str, disk: &str) -> Result<()> {
        let sata = StorageController::sata();
        self.vbox.add_storage_controller(vm, &sata).await?;
        self.vbox
            .attach_storage(
                vm,
                &StorageAttachment {
                    controller: sata.name.clone(),
                    port: 0,
                    device: 0,
                    kind: MediumKind::Hdd,
                    medium: disk.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    async fn registered_id(&self, vm_name: &str) -> Result<VmId> {
        let info = self.vbox.show_vm_info(vm_name).await?;
        info.uuid()
            .map(|uuid| VmId(uuid.to_string()))
            .ok_or_else(|| Error::MissingField {
                vm: vm_name.to_string(),
                field: "UUID",
            })
    }
}

#[async_trait]
impl HypervisorDriver for VirtualBoxDriver {
    async fn create_and_configure(&self, spec: &VmSpec) -> Result<VmHandle> {
        self.vbox.create_vm(&spec.name, &self.config.os_type).await?;
        info!(vm_name = %spec.name, "virtualbox: vm registered");

        let configured = match self.configure(spec).await {
            Ok(()) => self.registered_id(&spec.name).await,
            Err(e) => Err(e),
        };

        match configured {
            Ok(id) => {
                info!(vm_name = %spec.name, vm_id = %id, "virtualbox: vm configured");
                Ok(VmHandle {
                    id,
                    name: spec.name.clone(),
                })
            }
            Err(e) => {
                warn!(vm_name = %spec.name, error = %e, "virtualbox: configuration failed, unregistering");
                if let Err(cleanup) = self.vbox.unregister_vm(&spec.name, true).await {
                    warn!(vm_name = %spec.name, error = %cleanup, "virtualbox: cleanup after failed configuration failed");
                }
                Err(e)
            }
        }
    }

    async fn set_port_forwarding(&self, id: &VmId, ports: PortPair) -> Result<()> {
        self.vbox
            .modify_vm(
                &id.0,
                &[
                    ModifyVm::NatPortForward {
                        nic: 1,
                        rule: PortForward::tcp("web", ports.web, GUEST_WEB_PORT),
                    },
                    ModifyVm::NatPortForward {
                        nic: 1,
                        rule: PortForward::tcp("ssh", ports.ssh, GUEST_SSH_PORT),
                    },
                ],
            )
            .await?;

        info!(vm_id = %id, web_port = ports.web, ssh_port = ports.ssh, "virtualbox: port forwarding set");
        Ok(())
    }

    async fn start(&self, id: &VmId) -> Result<()> {
        self.vbox.start_vm(&id.0, StartType::Headless).await?;
        info!(vm_id = %id, "virtualbox: vm started");
        Ok(())
    }

    async fn resolve_guest_address(&self, id: &VmId) -> Result<Option<String>> {
        Ok(self.vbox.guest_property(&id.0, GUEST_IP_PROPERTY).await?)
    }

    async fn stop(&self, id: &VmId) -> Result<()> {
        self.vbox.power_off(&id.0).await?;
        info!(vm_id = %id, "virtualbox: vm powered off");
        Ok(())
    }

    async fn unregister_and_delete(&self, id: &VmId) -> Result<()> {
        if let Err(e) = self.vbox.unregister_vm(&id.0, true).await {
            if e.is_not_registered() {
                warn!(vm_id = %id, "virtualbox: vm already unregistered");
                return Ok(());
            }
            return Err(e.into());
        }

        info!(vm_id = %id, "virtualbox: vm unregistered and deleted");
        Ok(())
    }

    async fn runtime_state(&self, id: &VmId) -> Result<RuntimeState> {
        let info = self.vbox.show_vm_info(&id.0).await?;
        Ok(RuntimeState::from_vm_state(info.state()))
    }

    fn name(&self) -> &'static str {
        "virtualbox"
    }
}
