//! Guest provisioning over SSH.
//!
//! [`GuestProvisioner::setup_web_server`] negotiates a login from an ordered
//! candidate list, then runs [`steps::web_server_steps`] one exec channel at a
//! time. The whole call is blocking; callers run it on the blocking pool.

pub mod ssh;
pub mod steps;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::types::PortPair;
use crate::{Error, Result, env};

pub use ssh::SshConnector;
pub use steps::Step;

/// One `(account, secret)` login candidate.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credential {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Parse `user:pass,user2:pass2`. Passwords may contain `:`.
    pub fn parse_list(raw: &str) -> Result<Vec<Credential>> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .enumerate()
            .map(|(i, entry)| match entry.split_once(':') {
                Some((user, password)) if !user.is_empty() => Ok(Credential::new(user, password)),
                // never echo the entry itself, it carries a secret
                _ => Err(Error::InvalidEnv {
                    name: "GUEST_CREDENTIALS",
                    value: format!("entry {} is not user:password", i + 1),
                }),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub credentials: Vec<Credential>,
    pub service_account: Option<String>,
    pub ssh_host: String,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub boot_delay: Duration,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            credentials: vec![Credential::new("webuser", "webuser123")],
            service_account: None,
            ssh_host: "127.0.0.1".into(),
            connect_timeout: Duration::from_secs(15),
            command_timeout: Duration::from_secs(300),
            boot_delay: Duration::from_secs(60),
        }
    }
}

impl ProvisionConfig {
    /// Create from env vars:
    ///
    /// - `GUEST_CREDENTIALS` (default: `"webuser:webuser123"`)
    /// - `GUEST_SERVICE_ACCOUNT` (optional)
    /// - `GUEST_SSH_HOST` (default: `"127.0.0.1"`)
    /// - `SSH_CONNECT_TIMEOUT_SECS` (default: `15`)
    /// - `SSH_COMMAND_TIMEOUT_SECS` (default: `300`)
    /// - `PROVISION_DELAY_SECS` (default: `60`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let credentials = match env::optional("GUEST_CREDENTIALS") {
            Some(raw) => Credential::parse_list(&raw)?,
            None => defaults.credentials,
        };

        Ok(Self {
            credentials,
            service_account: env::optional("GUEST_SERVICE_ACCOUNT"),
            ssh_host: env::string_or("GUEST_SSH_HOST", &defaults.ssh_host),
            connect_timeout: env::secs_or("SSH_CONNECT_TIMEOUT_SECS", 15)?,
            command_timeout: env::secs_or("SSH_COMMAND_TIMEOUT_SECS", 300)?,
            boot_delay: env::secs_or("PROVISION_DELAY_SECS", 60)?,
        })
    }
}

/// What to provision: a site on a guest reachable through forwarded ports.
#[derive(Debug, Clone)]
pub struct ProvisionTarget {
    pub site_name: String,
    pub address: String,
    pub ports: PortPair,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("authentication rejected for {user}")]
    AuthRejected { user: String },

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("ssh: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens authenticated shell sessions. Blocking.
pub trait ShellConnector: Send + Sync + 'static {
    fn connect(
        &self,
        host: &str,
        port: u16,
        credential: &Credential,
        timeout: Duration,
    ) -> std::result::Result<Box<dyn ShellSession>, ShellError>;
}

/// An authenticated session; each `exec` gets a fresh channel.
pub trait ShellSession {
    fn exec(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> std::result::Result<ExecOutput, ShellError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("no guest credentials configured")]
    NoCandidates,

    #[error("no credential accepted by {host}:{port}: {}", .failures.join("; "))]
    CredentialNegotiation {
        host: String,
        port: u16,
        failures: Vec<String>,
    },

    #[error("critical step '{step}' exited with {exit_code}: {stderr}")]
    CriticalStep {
        step: &'static str,
        exit_code: i32,
        stderr: String,
    },

    #[error("session lost during '{step}': {source}")]
    Session {
        step: &'static str,
        #[source]
        source: ShellError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepWarning {
    pub step: &'static str,
    pub exit_code: i32,
    pub stderr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Account the session authenticated as.
    pub account: String,
    pub completed: Vec<&'static str>,
    pub warnings: Vec<StepWarning>,
    /// Steps that ran past their wait budget.
    pub skipped: Vec<&'static str>,
}

pub struct GuestProvisioner {
    connector: Arc<dyn ShellConnector>,
    config: ProvisionConfig,
}

impl GuestProvisioner {
    pub fn new(connector: Arc<dyn ShellConnector>, config: ProvisionConfig) -> Self {
        Self { connector, config }
    }

    /// Provisioner backed by real SSH.
    pub fn ssh(config: ProvisionConfig) -> Self {
        Self::new(Arc::new(SshConnector), config)
    }

    /// Grace period between VM start and the first login attempt.
    pub fn boot_delay(&self) -> Duration {
        self.config.boot_delay
    }

    /// Install nginx, deploy the site, open the firewall. Blocking.
    pub fn setup_web_server(
        &self,
        target: &ProvisionTarget,
    ) -> std::result::Result<ProvisionReport, ProvisionError> {
        let port = target.ports.ssh;
        let (mut session, account) = self.negotiate(port)?;
        info!(site = %target.site_name, ssh_port = port, account = %account, "provision: session established");

        let mut report = ProvisionReport {
            account,
            ..Default::default()
        };

        let steps = steps::web_server_steps(target, self.config.service_account.as_deref());
        for step in &steps {
            match session.exec(&step.command, self.config.command_timeout) {
                Ok(out) if out.exit_code == 0 => {
                    info!(site = %target.site_name, step = step.name, "provision: step done");
                    report.completed.push(step.name);
                }
                Ok(out) if step.critical => {
                    warn!(site = %target.site_name, step = step.name, exit_code = out.exit_code, stderr = %out.stderr.trim(), "provision: critical step failed");
                    return Err(ProvisionError::CriticalStep {
                        step: step.name,
                        exit_code: out.exit_code,
                        stderr: out.stderr.trim().to_string(),
                    });
                }
                Ok(out) => {
                    warn!(site = %target.site_name, step = step.name, exit_code = out.exit_code, stderr = %out.stderr.trim(), "provision: step failed, continuing");
                    report.warnings.push(StepWarning {
                        step: step.name,
                        exit_code: out.exit_code,
                        stderr: out.stderr.trim().to_string(),
                    });
                }
                Err(ShellError::Timeout(after)) => {
                    warn!(site = %target.site_name, step = step.name, timeout_secs = after.as_secs(), "provision: step timed out, skipping");
                    report.skipped.push(step.name);
                }
                Err(source) => {
                    return Err(ProvisionError::Session {
                        step: step.name,
                        source,
                    });
                }
            }
        }

        info!(
            site = %target.site_name,
            completed = report.completed.len(),
            warnings = report.warnings.len(),
            skipped = report.skipped.len(),
            "provision: web server ready"
        );
        Ok(report)
    }

    /// First candidate that authenticates wins.
    fn negotiate(
        &self,
        port: u16,
    ) -> std::result::Result<(Box<dyn ShellSession>, String), ProvisionError> {
        if self.config.credentials.is_empty() {
            return Err(ProvisionError::NoCandidates);
        }

        let host = self.config.ssh_host.as_str();
        let mut failures = Vec::new();
        for credential in &self.config.credentials {
            match self
                .connector
                .connect(host, port, credential, self.config.connect_timeout)
            {
                Ok(session) => return Ok((session, credential.user.clone())),
                Err(e) => {
                    warn!(host, port, user = %credential.user, error = %e, "provision: login attempt failed");
                    failures.push(format!("{}: {e}", credential.user));
                }
            }
        }

        Err(ProvisionError::CredentialNegotiation {
            host: host.to_string(),
            port,
            failures,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeShell;
    use super::*;

    fn target() -> ProvisionTarget {
        ProvisionTarget {
            site_name: "demo-site".into(),
            address: "10.0.2.15".into(),
            ports: PortPair { web: 8000, ssh: 2200 },
        }
    }

    fn provisioner(shell: &Arc<FakeShell>, credentials: Vec<Credential>) -> GuestProvisioner {
        GuestProvisioner::new(
            shell.clone(),
            ProvisionConfig {
                credentials,
                ..Default::default()
            },
        )
    }

    #[test]
    fn all_steps_succeed() {
        let shell = Arc::new(FakeShell::accepting("webuser"));
        let report = provisioner(&shell, vec![Credential::new("webuser", "pw")])
            .setup_web_server(&target())
            .unwrap();

        assert_eq!(report.account, "webuser");
        assert_eq!(report.completed.len(), steps::web_server_steps(&target(), None).len());
        assert!(report.warnings.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn critical_install_failure_stops_sequence() {
        let shell = Arc::new(FakeShell::accepting("webuser").reply("apt-get install", Some(100)));
        let err = provisioner(&shell, vec![Credential::new("webuser", "pw")])
            .setup_web_server(&target())
            .unwrap_err();

        match err {
            ProvisionError::CriticalStep {
                step, exit_code, ..
            } => {
                assert_eq!(step, "install nginx");
                assert_eq!(exit_code, 100);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let executed = shell.executed();
        assert_eq!(executed.len(), 2);
        assert!(!executed.iter().any(|c| c.contains("systemctl start nginx")));
    }

    #[test]
    fn firewall_failure_is_a_warning_and_status_check_runs() {
        let shell = Arc::new(FakeShell::accepting("webuser").reply("ufw allow 80", Some(1)));
        let report = provisioner(&shell, vec![Credential::new("webuser", "pw")])
            .setup_web_server(&target())
            .unwrap();

        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].step, "allow http through firewall");
        assert_eq!(report.completed.last(), Some(&"check nginx status"));
        assert!(shell.executed().last().unwrap().contains("systemctl is-active nginx"));
    }

    #[test]
    fn timed_out_step_is_skipped_not_retried() {
        let shell = Arc::new(FakeShell::accepting("webuser").reply("apt-get update", None));
        let report = provisioner(&shell, vec![Credential::new("webuser", "pw")])
            .setup_web_server(&target())
            .unwrap();

        assert_eq!(report.skipped, ["update package index"]);
        let updates = shell
            .executed()
            .iter()
            .filter(|c| c.contains("apt-get update"))
            .count();
        assert_eq!(updates, 1);
    }

    #[test]
    fn falls_back_to_second_credential() {
        let shell = Arc::new(FakeShell::accepting("ubuntu"));
        let report = provisioner(
            &shell,
            vec![Credential::new("webuser", "a"), Credential::new("ubuntu", "b")],
        )
        .setup_web_server(&target())
        .unwrap();

        assert_eq!(report.account, "ubuntu");
        assert_eq!(*shell.login_attempts.lock().unwrap(), ["webuser", "ubuntu"]);
    }

    #[test]
    fn every_credential_rejected() {
        let shell = Arc::new(FakeShell::accepting("nobody"));
        let err = provisioner(
            &shell,
            vec![Credential::new("webuser", "a"), Credential::new("ubuntu", "b")],
        )
        .setup_web_server(&target())
        .unwrap_err();

        match err {
            ProvisionError::CredentialNegotiation { port, failures, .. } => {
                assert_eq!(port, 2200);
                assert_eq!(failures.len(), 2);
                assert!(failures[0].starts_with("webuser:"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(shell.executed().is_empty());
    }

    #[test]
    fn no_candidates() {
        let shell = Arc::new(FakeShell::accepting("webuser"));
        let err = provisioner(&shell, vec![]).setup_web_server(&target()).unwrap_err();
        assert!(matches!(err, ProvisionError::NoCandidates));
    }

    #[test]
    fn credential_list_parsing() {
        let creds = Credential::parse_list("webuser:webuser123, ubuntu:p:w ,").unwrap();
        assert_eq!(
            creds,
            [Credential::new("webuser", "webuser123"), Credential::new("ubuntu", "p:w")]
        );

        let err = Credential::parse_list("webuser:ok,secret-without-user").unwrap_err();
        assert!(!err.to_string().contains("secret"));

        let debug = format!("{:?}", Credential::new("u", "hunter2"));
        assert!(!debug.contains("hunter2"));
    }
}
