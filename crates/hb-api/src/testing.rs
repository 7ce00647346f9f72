//! Router fixtures backed by in-memory fakes.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::Request;
use hb_db::MemoryHostStore;
use hb_infra::provision::{
    Credential, ExecOutput, GuestProvisioner, ProvisionConfig, ShellConnector, ShellError,
    ShellSession,
};
use hb_infra::readiness::Retry;
use hb_infra::types::{PortPair, RuntimeState, VmHandle, VmId, VmSpec};
use hb_infra::{HypervisorDriver, PortAllocator};
use hb_lifecycle::{Lifecycle, LifecycleSettings};
use serde_json::Value;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::routes::api_router;
use crate::state::AppState;

pub const API_KEY: &str = "test-key";

/// Always reports an address. `state` of `None` makes state queries fail.
pub struct FakeDriver {
    created: AtomicU32,
    fail_unregister: AtomicBool,
    state: Mutex<Option<RuntimeState>>,
}

impl FakeDriver {
    pub fn set_state(&self, state: Option<RuntimeState>) {
        *self.state.lock().unwrap() = state;
    }

    pub fn fail_unregister(&self) {
        self.fail_unregister.store(true, Ordering::SeqCst);
    }

    fn failure(subcommand: &str) -> hb_infra::Error {
        hb_infra::Error::Hypervisor(hb_infra::vbox_manage::Error::Command {
            subcommand: subcommand.into(),
            code: 1,
            stderr: format!("VBoxManage: error: {subcommand} failed"),
        })
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self {
            created: AtomicU32::new(0),
            fail_unregister: AtomicBool::new(false),
            state: Mutex::new(Some(RuntimeState::Running)),
        }
    }
}

#[async_trait]
impl HypervisorDriver for FakeDriver {
    async fn create_and_configure(&self, spec: &VmSpec) -> hb_infra::Result<VmHandle> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(VmHandle {
            id: VmId(format!("vm-{n}")),
            name: spec.name.clone(),
        })
    }

    async fn set_port_forwarding(&self, _id: &VmId, _ports: PortPair) -> hb_infra::Result<()> {
        Ok(())
    }

    async fn start(&self, _id: &VmId) -> hb_infra::Result<()> {
        Ok(())
    }

    async fn resolve_guest_address(&self, _id: &VmId) -> hb_infra::Result<Option<String>> {
        Ok(Some("10.0.2.15".into()))
    }

    async fn stop(&self, _id: &VmId) -> hb_infra::Result<()> {
        Ok(())
    }

    async fn unregister_and_delete(&self, _id: &VmId) -> hb_infra::Result<()> {
        if self.fail_unregister.load(Ordering::SeqCst) {
            return Err(Self::failure("unregistervm"));
        }
        Ok(())
    }

    async fn runtime_state(&self, _id: &VmId) -> hb_infra::Result<RuntimeState> {
        self.state
            .lock()
            .unwrap()
            .ok_or_else(|| Self::failure("showvminfo"))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Every login and command succeeds.
struct FakeShell;

struct FakeSession;

impl ShellConnector for FakeShell {
    fn connect(
        &self,
        _host: &str,
        _port: u16,
        _credential: &Credential,
        _timeout: Duration,
    ) -> Result<Box<dyn ShellSession>, ShellError> {
        Ok(Box::new(FakeSession))
    }
}

impl ShellSession for FakeSession {
    fn exec(&mut self, _command: &str, _timeout: Duration) -> Result<ExecOutput, ShellError> {
        Ok(ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

pub struct TestApp {
    pub lifecycle: Lifecycle,
    pub driver: Arc<FakeDriver>,
    pub owner: Uuid,
    state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        let driver = Arc::new(FakeDriver::default());
        let provisioner = GuestProvisioner::new(
            Arc::new(FakeShell),
            ProvisionConfig {
                boot_delay: Duration::ZERO,
                ..Default::default()
            },
        );
        let settings = LifecycleSettings {
            address_retry: Retry::new(Duration::from_millis(1), 3),
            poweroff_settle: Duration::ZERO,
            ..Default::default()
        };
        let lifecycle = Lifecycle::new(
            driver.clone(),
            Arc::new(PortAllocator::default()),
            Arc::new(MemoryHostStore::new()),
            Arc::new(provisioner),
            settings,
        );

        let config = AppConfig {
            database_url: "postgres://unused".into(),
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            control_plane_api_key: API_KEY.into(),
            monitor_interval_secs: 60,
            public_host: "localhost".into(),
        };
        let state = AppState {
            lifecycle: lifecycle.clone(),
            config,
            ssh_user: "webuser".into(),
        };

        Self {
            lifecycle,
            driver,
            owner: Uuid::new_v4(),
            state,
        }
    }

    pub fn router(&self) -> Router {
        api_router(self.state.clone())
    }

    /// Create a host and wait until it is `RUNNING` and provisioned.
    pub async fn running_host(&self, name: &str) -> Uuid {
        let accepted = self.lifecycle.create_host(self.owner, name).await.unwrap();
        let report = accepted.pipeline.join().await.unwrap();
        assert!(report.outcome.is_success());
        if let Some(provisioning) = report.provisioning {
            provisioning.join().await.unwrap().unwrap();
        }
        accepted.host.id
    }

    fn authed(&self, method: &str, uri: &str) -> axum::http::request::Builder {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {API_KEY}"))
            .header("x-user-id", self.owner.to_string())
    }

    pub fn get(&self, uri: &str) -> Request<Body> {
        self.authed("GET", uri).body(Body::empty()).unwrap()
    }

    pub fn delete(&self, uri: &str) -> Request<Body> {
        self.authed("DELETE", uri).body(Body::empty()).unwrap()
    }

    pub fn post(&self, uri: &str, body: Value) -> Request<Body> {
        self.authed("POST", uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }
}
