use hb_lifecycle::Lifecycle;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Lifecycle,
    pub config: AppConfig,
    /// Account shown in `ssh_command`.
    pub ssh_user: String,
}
