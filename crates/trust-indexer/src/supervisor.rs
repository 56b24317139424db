//! Keeps one poller task alive per contract.
//!
//! A worker that panics is restarted after an exponential delay. The delay
//! resets once the restarted worker completes a cycle.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::metrics;
use crate::poller::{ContractPoller, WorkerSnapshot, WorkerState};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub restart_base: Duration,
    pub restart_max: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_base: Duration::from_secs(1),
            restart_max: Duration::from_secs(60),
        }
    }
}

impl SupervisorConfig {
    /// Delay before the `consecutive`-th restart in a row (1-based).
    pub fn restart_delay(&self, consecutive: u32) -> Duration {
        let factor = 2u32.saturating_pow(consecutive.saturating_sub(1));
        self.restart_base
            .saturating_mul(factor)
            .min(self.restart_max)
    }
}

#[derive(Clone)]
pub struct PollerHandle {
    contract: String,
    state: Arc<Mutex<WorkerState>>,
    stop: Arc<watch::Sender<bool>>,
}

impl PollerHandle {
    pub fn contract(&self) -> &str {
        &self.contract
    }

    pub async fn snapshot(&self) -> WorkerSnapshot {
        self.state.lock().await.snapshot(&self.contract)
    }

    /// Stops the worker. Dropping every handle does not.
    pub fn shutdown(&self) {
        let _ = self.stop.send(true);
    }
}

pub fn spawn_supervised(poller: ContractPoller) -> PollerHandle {
    spawn_supervised_with(poller, SupervisorConfig::default())
}

pub fn spawn_supervised_with(poller: ContractPoller, config: SupervisorConfig) -> PollerHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = PollerHandle {
        contract: poller.contract().name.clone(),
        state: poller.state(),
        stop: Arc::new(stop_tx),
    };
    tokio::spawn(supervise(poller, config, stop_rx));
    handle
}

async fn supervise(poller: ContractPoller, config: SupervisorConfig, mut stop: watch::Receiver<bool>) {
    let contract = poller.contract().name.clone();
    let mut consecutive: u32 = 0;
    loop {
        let ok_before = poller.cycles_ok().await;
        let worker = poller.clone();
        let mut task = tokio::spawn(async move { worker.run().await });

        let joined = tokio::select! {
            joined = &mut task => joined,
            Ok(()) = stop.changed() => {
                task.abort();
                info!(contract = %contract, "poller stopped");
                return;
            }
        };

        match joined {
            Err(err) if err.is_panic() => {
                consecutive = if poller.cycles_ok().await > ok_before {
                    1
                } else {
                    consecutive.saturating_add(1)
                };
                let reason = format!("worker panicked: {}", panic_message(err.into_panic()));
                let restarts = poller.record_restart(reason.clone()).await;
                metrics::WORKER_RESTARTS_TOTAL
                    .with_label_values(&[contract.as_str()])
                    .inc();
                let delay = config.restart_delay(consecutive);
                error!(
                    contract = %contract,
                    restarts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %reason,
                    "restarting poller"
                );
                tokio::select! {
                    _ = sleep(delay) => {}
                    Ok(()) = stop.changed() => {
                        info!(contract = %contract, "poller stopped");
                        return;
                    }
                }
            }
            Err(err) => {
                warn!(contract = %contract, error = %err, "poller task cancelled");
                return;
            }
            Ok(()) => {
                warn!(contract = %contract, "poller exited");
                return;
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
