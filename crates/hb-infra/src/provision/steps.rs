//! The command sequence that turns a fresh guest into a static web host.
//!
//! Site names are restricted to `[A-Za-z0-9-]` before they get here, so they
//! are interpolated into paths and heredocs unquoted.

use super::ProvisionTarget;

/// Root under which each site gets its own directory.
const WEB_ROOT: &str = "/var/www/html";

/// One remote command. A failing critical step aborts provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: &'static str,
    pub command: String,
    pub critical: bool,
}

impl Step {
    fn new(name: &'static str, command: impl Into<String>) -> Self {
        Self {
            name,
            command: command.into(),
            critical: false,
        }
    }

    fn critical(name: &'static str, command: impl Into<String>) -> Self {
        Self {
            critical: true,
            ..Self::new(name, command)
        }
    }
}

/// `sudo` that fails instead of prompting; there is no tty to answer on.
fn sudo(command: &str) -> String {
    format!("sudo -n {command}")
}

/// Write `body` to `path` as root via a quoted heredoc.
fn write_file(path: &str, body: &str) -> String {
    format!("sudo -n tee {path} > /dev/null <<'HOSTBOX_EOF'\n{body}\nHOSTBOX_EOF")
}

pub fn site_dir(site_name: &str) -> String {
    format!("{WEB_ROOT}/{site_name}")
}

pub fn greeting_page(target: &ProvisionTarget) -> String {
    let site = &target.site_name;
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>{site}</title></head>
<body>
<h1>Welcome to {site}!</h1>
<p>This site is served by hostbox.</p>
<p>VM address: {address}</p>
<p>Web port: {web} / SSH port: {ssh}</p>
</body>
</html>"#,
        address = target.address,
        web = target.ports.web,
        ssh = target.ports.ssh,
    )
}

pub fn nginx_site_config(site_name: &str) -> String {
    let root = site_dir(site_name);
    format!(
        r#"server {{
    listen 80 default_server;
    listen [::]:80 default_server;
    server_name _;
    root {root};
    index index.html;
    location / {{
        try_files $uri $uri/ =404;
    }}
}}"#
    )
}

/// Ordered provisioning steps for `target`.
pub fn web_server_steps(target: &ProvisionTarget, service_account: Option<&str>) -> Vec<Step> {
    let site = target.site_name.as_str();
    let dir = site_dir(site);
    let available = format!("/etc/nginx/sites-available/{site}");
    let enabled = format!("/etc/nginx/sites-enabled/{site}");

    let mut steps = Vec::with_capacity(17);
    if let Some(account) = service_account {
        steps.push(Step::new(
            "create service account",
            format!(
                "id -u {account} > /dev/null 2>&1 || {}",
                sudo(&format!("useradd -m -s /bin/bash {account}"))
            ),
        ));
    }

    steps.extend([
        Step::new("update package index", sudo("apt-get update")),
        Step::critical(
            "install nginx",
            sudo("env DEBIAN_FRONTEND=noninteractive apt-get install -y nginx"),
        ),
        Step::new("enable nginx", sudo("systemctl enable nginx")),
        Step::critical("start nginx", sudo("systemctl start nginx")),
        Step::new("create site directory", sudo(&format!("mkdir -p {dir}"))),
        Step::new(
            "set site ownership",
            sudo(&format!("chown -R www-data:www-data {dir}")),
        ),
        Step::new("set site permissions", sudo(&format!("chmod -R 755 {dir}"))),
        Step::new(
            "deploy greeting page",
            write_file(&format!("{dir}/index.html"), &greeting_page(target)),
        ),
        Step::new(
            "write nginx site config",
            write_file(&available, &nginx_site_config(site)),
        ),
        Step::new(
            "enable nginx site",
            format!(
                "{} && {}",
                sudo(&format!("ln -sf {available} {enabled}")),
                sudo("rm -f /etc/nginx/sites-enabled/default")
            ),
        ),
        Step::critical("check nginx config", sudo("nginx -t")),
        Step::new("reload nginx", sudo("systemctl reload nginx")),
        Step::new("allow ssh through firewall", sudo("ufw allow 22")),
        Step::new("allow http through firewall", sudo("ufw allow 80")),
        Step::new("enable firewall", sudo("ufw --force enable")),
        Step::new("check nginx status", "systemctl is-active nginx"),
    ]);
    steps
}
