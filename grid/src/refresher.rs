//! The group→role cache refresher task.
//!
//! One background task owns all cache writes: a periodic tick plus, on
//! Unix, SIGHUP for operational immediacy. The signal-triggered refresh
//! is bounded; on timeout or failure the published snapshot stays live
//! and the error is only logged. Request handling never observes a
//! refresh failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use grid_core::config::MANUAL_REFRESH_TIMEOUT_SECS;
use grid_iam::IamService;

pub fn spawn_refresher(iam: Arc<IamService>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The initial load happened at startup; skip the immediate tick.
        ticker.tick().await;

        #[cfg(unix)]
        {
            let mut hangups =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(error = %err, "SIGHUP handler unavailable; periodic refresh only");
                        run_periodic(iam, ticker).await;
                        return;
                    }
                };
            loop {
                tokio::select! {
                    _ = ticker.tick() => periodic_refresh(&iam).await,
                    _ = hangups.recv() => manual_refresh(&iam).await,
                }
            }
        }

        #[cfg(not(unix))]
        run_periodic(iam, ticker).await;
    })
}

async fn run_periodic(iam: Arc<IamService>, mut ticker: tokio::time::Interval) {
    loop {
        ticker.tick().await;
        periodic_refresh(&iam).await;
    }
}

async fn periodic_refresh(iam: &IamService) {
    match iam.refresh_group_role_cache().await {
        Ok(version) => debug!(version, "group-role cache refreshed"),
        Err(err) => warn!(error = %err, "periodic cache refresh failed; keeping current snapshot"),
    }
    match iam.purge_expired().await {
        Ok((sessions, jtis)) if sessions + jtis > 0 => {
            debug!(sessions, jtis, "purged expired rows")
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "expiry purge failed"),
    }
}

async fn manual_refresh(iam: &IamService) {
    let bounded = tokio::time::timeout(
        Duration::from_secs(MANUAL_REFRESH_TIMEOUT_SECS),
        iam.refresh_group_role_cache(),
    );
    match bounded.await {
        Ok(Ok(version)) => debug!(version, "group-role cache refreshed on SIGHUP"),
        Ok(Err(err)) => warn!(error = %err, "SIGHUP cache refresh failed; keeping current snapshot"),
        Err(_) => warn!("SIGHUP cache refresh timed out; keeping current snapshot"),
    }
}
