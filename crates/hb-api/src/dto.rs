use chrono::{DateTime, Utc};
use hb_db::{Host, HostStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Requests ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateHostRequest {
    pub name: String,
}

// ── Responses ──────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HostResponse {
    pub id: Uuid,
    pub name: String,
    pub status: HostStatus,
    pub vm_name: Option<String>,
    pub address: Option<String>,
    pub web_port: Option<i32>,
    pub ssh_port: Option<i32>,
    /// Only while `RUNNING`.
    pub web_url: Option<String>,
    pub ssh_command: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HostResponse {
    pub fn new(host: Host, public_host: &str, ssh_user: &str) -> Self {
        let web_url = match (host.status, host.web_port) {
            (HostStatus::Running, Some(port)) => Some(format!("http://{public_host}:{port}")),
            _ => None,
        };
        let ssh_command = match (host.ssh_port, &host.address) {
            (Some(port), Some(_)) => Some(format!("ssh -p {port} {ssh_user}@{public_host}")),
            _ => None,
        };

        Self {
            id: host.id,
            name: host.name,
            status: host.status,
            vm_name: host.vm_name,
            address: host.address,
            web_port: host.web_port,
            ssh_port: host.ssh_port,
            web_url,
            ssh_command,
            created_at: host.created_at,
            updated_at: host.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub id: Uuid,
    pub status: HostStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(status: HostStatus) -> Host {
        let now = Utc::now();
        Host {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "demo-site".into(),
            vm_id: Some("5f1c".into()),
            vm_name: Some("webhosting-demo-site-1".into()),
            address: Some("10.0.2.15".into()),
            web_port: Some(8000),
            ssh_port: Some(2200),
            status,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn links_for_running_host() {
        let resp = HostResponse::new(host(HostStatus::Running), "localhost", "webuser");
        assert_eq!(resp.web_url.as_deref(), Some("http://localhost:8000"));
        assert_eq!(resp.ssh_command.as_deref(), Some("ssh -p 2200 webuser@localhost"));
    }

    #[test]
    fn no_web_url_unless_running() {
        let resp = HostResponse::new(host(HostStatus::Error), "hosts.example", "webuser");
        assert_eq!(resp.web_url, None);
        assert_eq!(resp.ssh_command.as_deref(), Some("ssh -p 2200 webuser@hosts.example"));

        let mut creating = host(HostStatus::Creating);
        creating.ssh_port = None;
        creating.address = None;
        let resp = HostResponse::new(creating, "localhost", "webuser");
        assert_eq!((resp.web_url, resp.ssh_command), (None, None));
    }
}
