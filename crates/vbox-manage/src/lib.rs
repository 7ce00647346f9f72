//! Typed async client for the `VBoxManage` command-line tool.
//!
//! Covers the subset needed for hosting VMs: registration, storage and NIC
//! configuration, NAT port forwarding, start, power-off, unregistration, and
//! the two read paths (`showvminfo --machinereadable`, `guestproperty get`).
//!
//! Every invocation runs through a [`CommandRunner`] with a per-call timeout.
//! A non-zero exit is reported as [`Error::Command`] carrying the captured
//! stderr, never as a bare failure.

mod runner;
mod types;

use std::sync::Arc;
use std::time::Duration;

pub use runner::{CommandOutput, CommandRunner, ProcessRunner};
pub use types::*;

const DEFAULT_PROGRAM: &str = "VBoxManage";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Printed by `guestproperty get` when the guest has not reported the key.
const NO_VALUE_SET: &str = "No value set";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("VBoxManage {subcommand} exited with {code}: {stderr}")]
    Command {
        subcommand: String,
        code: i32,
        stderr: String,
    },

    #[error("VBoxManage {subcommand} timed out after {secs}s")]
    Timeout { subcommand: String, secs: u64 },

    #[error("unexpected VBoxManage {subcommand} output: {detail}")]
    Parse {
        subcommand: &'static str,
        detail: String,
    },
}

impl Error {
    /// Whether the failure means the VM is not (or no longer) registered.
    pub fn is_not_registered(&self) -> bool {
        match self {
            Self::Command { stderr, .. } => {
                stderr.contains("Could not find a registered machine")
                    || stderr.contains("VBOX_E_OBJECT_NOT_FOUND")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for the `VBoxManage` CLI.
#[derive(Clone)]
pub struct VBoxManage {
    program: String,
    timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl Default for VBoxManage {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl VBoxManage {
    pub fn new(program: impl Into<String>) -> Self {
        Self::with_runner(program, Arc::new(ProcessRunner))
    }

    pub fn with_runner(program: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_TIMEOUT,
            runner,
        }
    }

    /// Upper bound for a single invocation. The child is killed when it elapses.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, args: Vec<String>) -> Result<CommandOutput> {
        self.runner.run(&self.program, &args, self.timeout).await
    }

    /// Run and fail on a non-zero exit, returning stdout.
    async fn run_checked(&self, args: Vec<String>) -> Result<String> {
        let subcommand = args.first().cloned().unwrap_or_default();
        let output = self.run(args).await?;
        if !output.success() {
            return Err(Error::Command {
                subcommand,
                code: output.code.unwrap_or(-1),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    // ── Registration ────────────────────────────────────────────────

    /// `createvm --name <name> --ostype <os_type> --register`
    pub async fn create_vm(&self, name: &str, os_type: &str) -> Result<()> {
        self.run_checked(args(&[
            "createvm", "--name", name, "--ostype", os_type, "--register",
        ]))
        .await?;
        Ok(())
    }

    /// `unregistervm <vm> [--delete]`
    pub async fn unregister_vm(&self, vm: &str, delete_files: bool) -> Result<()> {
        let mut argv = args(&["unregistervm", vm]);
        if delete_files {
            argv.push("--delete".into());
        }
        self.run_checked(argv).await?;
        Ok(())
    }

    // ── Configuration ───────────────────────────────────────────────

    /// `modifyvm <vm> <options...>`
    pub async fn modify_vm(&self, vm: &str, options: &[ModifyVm]) -> Result<()> {
        let mut argv = args(&["modifyvm", vm]);
        for option in options {
            argv.extend(option.to_args());
        }
        self.run_checked(argv).await?;
        Ok(())
    }

    /// `createhd --filename <path> --size <mb>`
    pub async fn create_disk(&self, path: &str, size_mb: u32) -> Result<()> {
        self.run_checked(args(&[
            "createhd",
            "--filename",
            path,
            "--size",
            &size_mb.to_string(),
        ]))
        .await?;
        Ok(())
    }

    /// `closemedium disk <path> [--delete]`
    pub async fn close_disk(&self, path: &str, delete_file: bool) -> Result<()> {
        let mut argv = args(&["closemedium", "disk", path]);
        if delete_file {
            argv.push("--delete".into());
        }
        self.run_checked(argv).await?;
        Ok(())
    }

    /// `storagectl <vm> --name <name> --add <bus> [--controller <chipset>]`
    pub async fn add_storage_controller(&self, vm: &str, ctl: &StorageController) -> Result<()> {
        let mut argv = args(&["storagectl", vm, "--name", &ctl.name, "--add", ctl.bus.as_str()]);
        if let Some(chipset) = &ctl.chipset {
            argv.push("--controller".into());
            argv.push(chipset.clone());
        }
        self.run_checked(argv).await?;
        Ok(())
    }

    /// `storageattach <vm> --storagectl <ctl> --port <p> --device <d> --type <t> --medium <m>`
    pub async fn attach_storage(&self, vm: &str, attachment: &StorageAttachment) -> Result<()> {
        self.run_checked(args(&[
            "storageattach",
            vm,
            "--storagectl",
            &attachment.controller,
            "--port",
            &attachment.port.to_string(),
            "--device",
            &attachment.device.to_string(),
            "--type",
            attachment.kind.as_str(),
            "--medium",
            &attachment.medium,
        ]))
        .await?;
        Ok(())
    }

    // ── Power ───────────────────────────────────────────────────────

    /// `startvm <vm> --type <type>`
    pub async fn start_vm(&self, vm: &str, start_type: StartType) -> Result<()> {
        self.run_checked(args(&["startvm", vm, "--type", start_type.as_str()]))
            .await?;
        Ok(())
    }

    /// `controlvm <vm> poweroff`
    pub async fn power_off(&self, vm: &str) -> Result<()> {
        self.run_checked(args(&["controlvm", vm, "poweroff"]))
            .await?;
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// `showvminfo <vm> --machinereadable`
    pub async fn show_vm_info(&self, vm: &str) -> Result<MachineInfo> {
        let stdout = self
            .run_checked(args(&["showvminfo", vm, "--machinereadable"]))
            .await?;
        Ok(MachineInfo::parse(&stdout))
    }

    /// `guestproperty get <vm> <key>`, `None` while the guest has not set it.
    pub async fn guest_property(&self, vm: &str, key: &str) -> Result<Option<String>> {
        let stdout = self
            .run_checked(args(&["guestproperty", "get", vm, key]))
            .await?;
        parse_guest_property(&stdout)
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn parse_guest_property(stdout: &str) -> Result<Option<String>> {
    if stdout.contains(NO_VALUE_SET) {
        return Ok(None);
    }
    let line = stdout.lines().next().unwrap_or_default();
    match line.split_once("Value: ") {
        Some((_, value)) if !value.trim().is_empty() => Ok(Some(value.trim().to_string())),
        Some(_) => Ok(None),
        None => Err(Error::Parse {
            subcommand: "guestproperty",
            detail: line.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    /// Replays canned outputs and records every argv it was asked to run.
    #[derive(Default)]
    struct ScriptedRunner {
        replies: Mutex<VecDeque<Result<CommandOutput>>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        fn reply(self, output: CommandOutput) -> Self {
            self.replies.lock().unwrap().push_back(Ok(output));
            self
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(
            &self,
            _program: &str,
            args: &[String],
            _timeout: Duration,
        ) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(args.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(CommandOutput::ok("")))
        }
    }

    fn client(runner: &Arc<ScriptedRunner>) -> VBoxManage {
        VBoxManage::with_runner("VBoxManage", runner.clone())
    }

    #[tokio::test]
    async fn port_forwarding_renders_natpf_rules() {
        let runner = Arc::new(ScriptedRunner::default());
        client(&runner)
            .modify_vm(
                "vm-1",
                &[
                    ModifyVm::NatPortForward {
                        nic: 1,
                        rule: PortForward::tcp("web", 8000, 80),
                    },
                    ModifyVm::NatPortForward {
                        nic: 1,
                        rule: PortForward::tcp("ssh", 2200, 22),
                    },
                ],
            )
            .await
            .unwrap();

        assert_eq!(
            runner.calls()[0],
            args(&[
                "modifyvm",
                "vm-1",
                "--natpf1",
                "web,tcp,,8000,,80",
                "--natpf1",
                "ssh,tcp,,2200,,22",
            ])
        );
    }

    #[tokio::test]
    async fn boot_order_and_nic_share_one_invocation() {
        let runner = Arc::new(ScriptedRunner::default());
        client(&runner)
            .modify_vm(
                "vm-1",
                &[
                    ModifyVm::Boot(1, BootDevice::Dvd),
                    ModifyVm::Boot(2, BootDevice::Disk),
                    ModifyVm::Nic(1, NicKind::Nat),
                ],
            )
            .await
            .unwrap();

        assert_eq!(
            runner.calls()[0],
            args(&["modifyvm", "vm-1", "--boot1", "dvd", "--boot2", "disk", "--nic1", "nat"])
        );
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let runner = Arc::new(ScriptedRunner::default().reply(CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "VBoxManage: error: Machine settings file already exists\n".into(),
        }));

        let err = client(&runner).create_vm("dup", "Ubuntu_64").await.unwrap_err();
        match err {
            Error::Command {
                subcommand,
                code,
                stderr,
            } => {
                assert_eq!(subcommand, "createvm");
                assert_eq!(code, 1);
                assert_eq!(stderr, "VBoxManage: error: Machine settings file already exists");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn killed_process_reports_minus_one() {
        let runner = Arc::new(ScriptedRunner::default().reply(CommandOutput {
            code: None,
            stdout: String::new(),
            stderr: String::new(),
        }));

        let err = client(&runner).power_off("vm-1").await.unwrap_err();
        assert!(matches!(err, Error::Command { code: -1, .. }));
    }

    #[tokio::test]
    async fn guest_property_absent_until_reported() {
        let runner = Arc::new(
            ScriptedRunner::default()
                .reply(CommandOutput::ok("No value set!\n"))
                .reply(CommandOutput::ok("Value: 10.0.2.15\n")),
        );
        let vbox = client(&runner);
        let key = "/VirtualBox/GuestInfo/Net/0/V4/IP";

        assert_eq!(vbox.guest_property("vm-1", key).await.unwrap(), None);
        assert_eq!(
            vbox.guest_property("vm-1", key).await.unwrap().as_deref(),
            Some("10.0.2.15")
        );
        assert_eq!(runner.calls()[0], args(&["guestproperty", "get", "vm-1", key]));
    }

    #[tokio::test]
    async fn close_disk_deletes_the_file() {
        let runner = Arc::new(ScriptedRunner::default());
        client(&runner)
            .close_disk("/var/lib/vms/site.vdi", true)
            .await
            .unwrap();
        assert_eq!(
            runner.calls()[0],
            args(&["closemedium", "disk", "/var/lib/vms/site.vdi", "--delete"])
        );
    }

    #[test]
    fn guest_property_garbage_is_a_parse_error() {
        let err = parse_guest_property("something unexpected").unwrap_err();
        assert!(matches!(err, Error::Parse { subcommand: "guestproperty", .. }));
    }

    #[tokio::test]
    async fn show_vm_info_parses_machine_readable_output() {
        let runner = Arc::new(ScriptedRunner::default().reply(CommandOutput::ok(
            "name=\"webhosting-demo-1\"\nUUID=\"6f1c2a4e-0d7b-4c39-9b53-2c3f1a0e9d11\"\nVMState=\"running\"\n",
        )));

        let info = client(&runner).show_vm_info("webhosting-demo-1").await.unwrap();
        assert_eq!(info.uuid(), Some("6f1c2a4e-0d7b-4c39-9b53-2c3f1a0e9d11"));
        assert_eq!(info.state(), Some("running"));
    }

    #[test]
    fn not_registered_detection() {
        let err = Error::Command {
            subcommand: "unregistervm".into(),
            code: 1,
            stderr: "VBoxManage: error: Could not find a registered machine named 'x'".into(),
        };
        assert!(err.is_not_registered());

        let err = Error::Timeout {
            subcommand: "unregistervm".into(),
            secs: 1,
        };
        assert!(!err.is_not_registered());
    }
}
