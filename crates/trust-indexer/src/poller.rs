//! One contract's fetch, validate, build, publish loop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{error, info, warn};
use trust_core::{build_indices, render, validate_all, RenderError, TokenSelector};

use crate::metrics;
use crate::source::{SourceError, UtxoSource};
use crate::store::{DocumentStore, PublishError, Purpose};

/// A tracked trust contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractSpec {
    pub name: String,
    pub address: String,
    pub selector: TokenSelector,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Fetching,
    Validating,
    Building,
    Publishing,
    Sleeping,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub utxos: usize,
    pub accepted: usize,
    pub rejected: BTreeMap<&'static str, usize>,
    pub subjects: usize,
    pub signers: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("fetch failed: {0}")]
    Source(#[from] SourceError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("publishing {purpose} failed: {source}")]
    Publish {
        purpose: Purpose,
        #[source]
        source: PublishError,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

/// Point-in-time view of a worker, served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    pub contract: String,
    pub phase: Phase,
    pub cycles_ok: u64,
    pub cycles_failed: u64,
    pub restarts: u64,
    pub last_success_ms: Option<u64>,
    pub last_error: Option<String>,
    pub last_report: Option<CycleReport>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct WorkerState {
    phase: Phase,
    cycles_ok: u64,
    cycles_failed: u64,
    restarts: u64,
    last_success_ms: Option<u64>,
    last_error: Option<String>,
    last_report: Option<CycleReport>,
}

impl WorkerState {
    pub(crate) fn snapshot(&self, contract: &str) -> WorkerSnapshot {
        WorkerSnapshot {
            contract: contract.to_string(),
            phase: self.phase,
            cycles_ok: self.cycles_ok,
            cycles_failed: self.cycles_failed,
            restarts: self.restarts,
            last_success_ms: self.last_success_ms,
            last_error: self.last_error.clone(),
            last_report: self.last_report.clone(),
        }
    }
}

/// Owns everything one contract's worker needs. Cloning shares the status.
#[derive(Clone)]
pub struct ContractPoller {
    contract: Arc<ContractSpec>,
    source: Arc<dyn UtxoSource>,
    store: DocumentStore,
    interval: Duration,
    state: Arc<Mutex<WorkerState>>,
}

impl ContractPoller {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(20);

    pub fn new(
        contract: ContractSpec,
        source: Arc<dyn UtxoSource>,
        store: DocumentStore,
        interval: Duration,
    ) -> Self {
        Self {
            contract: Arc::new(contract),
            source,
            store,
            interval,
            state: Arc::new(Mutex::new(WorkerState::default())),
        }
    }

    pub fn contract(&self) -> &ContractSpec {
        &self.contract
    }

    pub fn source(&self) -> &Arc<dyn UtxoSource> {
        &self.source
    }

    pub async fn snapshot(&self) -> WorkerSnapshot {
        self.state.lock().await.snapshot(&self.contract.name)
    }

    pub(crate) fn state(&self) -> Arc<Mutex<WorkerState>> {
        Arc::clone(&self.state)
    }

    /// One full cycle. Nothing is published unless both documents rendered.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let started = Instant::now();
        let name = self.contract.name.as_str();

        self.set_phase(Phase::Fetching).await;
        let utxos = self.source.utxos(&self.contract.address).await?;

        self.set_phase(Phase::Validating).await;
        let report = validate_all(&utxos, &self.contract.selector);
        for (reason, count) in &report.rejected {
            metrics::REJECTIONS_TOTAL
                .with_label_values(&[name, *reason])
                .inc_by(metrics::saturating_u64(*count));
        }

        self.set_phase(Phase::Building).await;
        let indices = build_indices(&report.accepted);
        let subjects = render(&indices.subjects)?;
        let signers = render(&indices.signers)?;

        self.set_phase(Phase::Publishing).await;
        let store = self.store.clone();
        let contract = name.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), CycleError> {
            for (purpose, body) in [(Purpose::Subjects, &subjects), (Purpose::Signers, &signers)] {
                store
                    .publish(&contract, purpose, body)
                    .map_err(|source| CycleError::Publish { purpose, source })?;
            }
            Ok(())
        })
        .await
        .map_err(|e| CycleError::Internal(format!("publish task failed: {e}")))??;

        metrics::REGISTRATIONS
            .with_label_values(&[name])
            .set(metrics::saturating_i64(indices.registrations()));

        Ok(CycleReport {
            utxos: utxos.len(),
            accepted: report.accepted.len(),
            rejected: report.rejected,
            subjects: indices.subjects.len(),
            signers: indices.signers.len(),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Runs one cycle and records its outcome in the status and metrics.
    pub async fn run_once(&self) -> Result<CycleReport, CycleError> {
        let result = self.run_cycle().await;
        self.record(&result).await;
        result
    }

    /// Cycles forever, sleeping `interval` after each one.
    pub async fn run(&self) {
        info!(
            contract = %self.contract.name,
            address = %self.contract.address,
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "poller started"
        );
        loop {
            // Failures are already logged and recorded; the next tick retries.
            let _ = self.run_once().await;
            self.wait_for_next_cycle().await;
        }
    }

    async fn wait_for_next_cycle(&self) {
        self.set_phase(Phase::Sleeping).await;
        sleep(self.interval).await;
        self.set_phase(Phase::Idle).await;
    }

    pub(crate) async fn record_restart(&self, reason: String) -> u64 {
        let mut state = self.state.lock().await;
        state.restarts = state.restarts.saturating_add(1);
        state.phase = Phase::Idle;
        state.last_error = Some(reason);
        state.restarts
    }

    pub(crate) async fn cycles_ok(&self) -> u64 {
        self.state.lock().await.cycles_ok
    }

    async fn set_phase(&self, phase: Phase) {
        self.state.lock().await.phase = phase;
    }

    async fn record(&self, result: &Result<CycleReport, CycleError>) {
        let name = self.contract.name.as_str();
        let mut state = self.state.lock().await;
        match result {
            Ok(report) => {
                state.cycles_ok = state.cycles_ok.saturating_add(1);
                state.last_success_ms = Some(now_ms());
                state.last_error = None;
                state.last_report = Some(report.clone());
                metrics::CYCLES_TOTAL.with_label_values(&[name, "ok"]).inc();
                info!(
                    contract = name,
                    utxos = report.utxos,
                    accepted = report.accepted,
                    rejected = report.rejected.values().sum::<usize>(),
                    subjects = report.subjects,
                    signers = report.signers,
                    elapsed_ms = report.elapsed_ms,
                    "cycle complete"
                );
            }
            Err(err) => {
                state.cycles_failed = state.cycles_failed.saturating_add(1);
                state.last_error = Some(err.to_string());
                metrics::CYCLES_TOTAL.with_label_values(&[name, "error"]).inc();
                match err {
                    CycleError::Internal(_) => {
                        error!(contract = name, error = %err, "cycle failed")
                    }
                    _ => warn!(contract = name, error = %err, "cycle failed"),
                }
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
