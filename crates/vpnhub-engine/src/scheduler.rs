//! Engine loops.
//!
//! Two independent tokio tasks drive the engine: the reconciliation loop
//! and the expiry sweep. A failing or panicking pass is logged and the
//! loop carries on. The stop flag is only observed between passes, so a
//! pass that has started always runs to completion.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use vpnhub_core::config::EngineConfig;
use vpnhub_core::result::AppResult;

use crate::pass::{PassReport, ReconciliationPass};

/// Spawns and owns the engine loops.
#[derive(Debug)]
pub struct EngineScheduler {
    pass: Arc<ReconciliationPass>,
    poll_interval: Duration,
    sweep_interval: Duration,
}

impl EngineScheduler {
    /// Create a scheduler with explicit periods.
    pub fn new(
        pass: Arc<ReconciliationPass>,
        poll_interval: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            pass,
            poll_interval,
            sweep_interval,
        }
    }

    /// Create a scheduler from the `[engine]` configuration section.
    pub fn from_config(pass: Arc<ReconciliationPass>, config: &EngineConfig) -> Self {
        Self::new(pass, config.poll_interval(), config.expiry_sweep_interval())
    }

    /// Spawn both loops. They run until `stop` becomes `true`.
    pub fn start(&self, stop: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            sweep_interval_secs = self.sweep_interval.as_secs(),
            "Starting engine loops"
        );

        let full = Arc::clone(&self.pass);
        let sweep = Arc::clone(&self.pass);
        vec![
            tokio::spawn(run_loop(
                "reconciliation",
                self.poll_interval,
                stop.clone(),
                move || {
                    let pass = Arc::clone(&full);
                    async move { pass.run_full().await }
                },
            )),
            tokio::spawn(run_loop(
                "expiry_sweep",
                self.sweep_interval,
                stop,
                move || {
                    let pass = Arc::clone(&sweep);
                    async move { pass.run_expiry_sweep().await }
                },
            )),
        ]
    }
}

/// Run `job` every `period` until the stop flag is raised.
async fn run_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut stop: watch::Receiver<bool>,
    job: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = AppResult<PassReport>>,
{
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *stop.borrow() {
            break;
        }
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                run_guarded(name, &job).await;
            }
        }
    }

    info!(job = name, "Engine loop stopped");
}

/// Run one pass, containing its errors and panics.
async fn run_guarded<F, Fut>(name: &'static str, job: &F) -> Option<PassReport>
where
    F: Fn() -> Fut,
    Fut: Future<Output = AppResult<PassReport>>,
{
    match AssertUnwindSafe(job()).catch_unwind().await {
        Ok(Ok(report)) => Some(report),
        Ok(Err(e)) if e.is_transient() => {
            warn!(job = name, error = %e, "Engine pass failed, retrying next tick");
            None
        }
        Ok(Err(e)) => {
            error!(job = name, error = %e, "Engine pass failed");
            None
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(job = name, panic = %message, "Engine pass panicked");
            None
        }
    }
}
