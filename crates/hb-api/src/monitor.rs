use std::time::Duration;

use hb_infra::types::VmId;
use hb_lifecycle::Lifecycle;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Spawn the background status monitor task.
pub fn spawn_monitor(lifecycle: Lifecycle, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            if let Err(e) = reconcile_hosts(&lifecycle).await {
                tracing::error!(error = %e, "status poll failed");
            }
        }
    });
}

/// One sweep over every host with a VM. Returns how many records changed.
pub async fn reconcile_hosts(lifecycle: &Lifecycle) -> Result<usize, BoxError> {
    let hosts = lifecycle.store().list_reconcilable().await?;
    let mut changed = 0;

    for host in &hosts {
        let Some(vm_id) = host.vm_id.clone() else {
            continue;
        };

        let observed = match lifecycle.driver().runtime_state(&VmId(vm_id)).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(host_id = %host.id, error = %e, "monitor: runtime state query failed");
                continue;
            }
        };

        match lifecycle
            .reconciler()
            .apply_runtime_state(host.id, observed)
            .await
        {
            Ok(updated) if updated.status != host.status => {
                tracing::info!(
                    host_id = %host.id,
                    from = %host.status,
                    to = %updated.status,
                    "monitor: status changed"
                );
                changed += 1;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(host_id = %host.id, error = %e, "monitor: reconcile failed");
            }
        }
    }

    Ok(changed)
}

#[cfg(test)]
mod tests {
    use hb_db::HostStatus;
    use hb_infra::types::RuntimeState;

    use super::*;
    use crate::testing::TestApp;

    #[tokio::test]
    async fn sweep_applies_observed_state() {
        let app = TestApp::new();
        let host = app.running_host("monitored").await;

        app.driver.set_state(Some(RuntimeState::Stopped));
        assert_eq!(reconcile_hosts(&app.lifecycle).await.unwrap(), 1);

        let stored = app.lifecycle.get_host(app.owner, host).await.unwrap();
        assert_eq!(stored.status, HostStatus::Stopped);

        // Nothing left to change on the second pass.
        assert_eq!(reconcile_hosts(&app.lifecycle).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn query_failure_skips_host() {
        let app = TestApp::new();
        let host = app.running_host("flaky").await;

        app.driver.set_state(None);
        assert_eq!(reconcile_hosts(&app.lifecycle).await.unwrap(), 0);

        let stored = app.lifecycle.get_host(app.owner, host).await.unwrap();
        assert_eq!(stored.status, HostStatus::Running);
    }
}
