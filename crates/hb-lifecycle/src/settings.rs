use std::time::Duration;

use hb_infra::readiness::Retry;
use hb_infra::types::VmSpec;
use hb_infra::env;

/// VM template and pipeline timings.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub base_name: String,
    pub memory_mb: u32,
    pub disk_mb: u32,
    pub base_image: String,
    pub address_retry: Retry,
    pub fallback_address: String,
    pub poweroff_settle: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            base_name: "webhosting".into(),
            memory_mb: 1024,
            disk_mb: 8192,
            base_image: "/opt/ubuntu-20.04-server.iso".into(),
            address_retry: Retry::default(),
            fallback_address: "10.0.2.15".into(),
            poweroff_settle: Duration::from_secs(5),
        }
    }
}

impl LifecycleSettings {
    /// Create from env vars:
    ///
    /// - `VM_BASE_NAME` (default: `"webhosting"`)
    /// - `VM_MEMORY_MB` (default: `1024`)
    /// - `VM_DISK_MB` (default: `8192`)
    /// - `VM_BASE_IMAGE` (default: `"/opt/ubuntu-20.04-server.iso"`)
    /// - `VM_FALLBACK_ADDRESS` (default: `"10.0.2.15"`)
    /// - `VM_POWEROFF_SETTLE_SECS` (default: `5`)
    /// - `ADDRESS_POLL_INTERVAL_SECS`, `ADDRESS_MAX_ATTEMPTS` (see [`Retry::from_env`])
    pub fn from_env() -> hb_infra::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            base_name: env::string_or("VM_BASE_NAME", &defaults.base_name),
            memory_mb: env::parse_or("VM_MEMORY_MB", defaults.memory_mb)?,
            disk_mb: env::parse_or("VM_DISK_MB", defaults.disk_mb)?,
            base_image: env::string_or("VM_BASE_IMAGE", &defaults.base_image),
            address_retry: Retry::from_env()?,
            fallback_address: env::string_or("VM_FALLBACK_ADDRESS", &defaults.fallback_address),
            poweroff_settle: env::secs_or("VM_POWEROFF_SETTLE_SECS", 5)?,
        })
    }

    /// `<base>-<host name>-<unix millis>`.
    pub fn vm_name(&self, host_name: &str, millis: i64) -> String {
        format!("{}-{host_name}-{millis}", self.base_name)
    }

    pub fn vm_spec(&self, vm_name: String) -> VmSpec {
        VmSpec {
            name: vm_name,
            memory_mb: self.memory_mb,
            disk_mb: self.disk_mb,
            base_image: self.base_image.clone(),
        }
    }
}
