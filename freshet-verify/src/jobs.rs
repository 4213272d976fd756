//! Verification Resume Background Task
//!
//! Periodically asks the store for subjects that still need verifying and
//! makes sure each one has a running state machine. After a restart this is
//! what picks the schedules back up; each machine resumes from its stored
//! position.
//!
//! # Usage
//!
//! ```ignore
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let job = Arc::new(ResumeJob::new(machine, VerificationConfig::from_env()));
//! let handle = tokio::spawn(Arc::clone(&job).run(shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashSet;
use freshet_core::VerificationConfig;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

use crate::machine::VerificationMachine;
use crate::runtime::StepRuntime;
use crate::schedule::VerificationState;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for resume activity since startup.
#[derive(Debug, Default)]
pub struct ResumeMetrics {
    pub scan_cycles: AtomicU64,
    pub runs_started: AtomicU64,
    pub verified: AtomicU64,
    pub cancelled: AtomicU64,
    pub exhausted: AtomicU64,
    /// Runs that ended in a step error
    pub failed: AtomicU64,
    pub scan_errors: AtomicU64,
}

impl ResumeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ResumeSnapshot {
        ResumeSnapshot {
            scan_cycles: self.scan_cycles.load(Ordering::Relaxed),
            runs_started: self.runs_started.load(Ordering::Relaxed),
            verified: self.verified.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            scan_errors: self.scan_errors.load(Ordering::Relaxed),
        }
    }

    fn record(&self, state: &VerificationState) {
        let counter = match state {
            VerificationState::Verified { .. } => &self.verified,
            VerificationState::Cancelled { .. } => &self.cancelled,
            VerificationState::Exhausted => &self.exhausted,
            VerificationState::Failed { .. } => &self.failed,
            VerificationState::Pending => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of resume metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeSnapshot {
    pub scan_cycles: u64,
    pub runs_started: u64,
    pub verified: u64,
    pub cancelled: u64,
    pub exhausted: u64,
    pub failed: u64,
    pub scan_errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Keeps one state machine running per pending subject.
pub struct ResumeJob<R: StepRuntime + 'static> {
    machine: Arc<VerificationMachine<R>>,
    config: VerificationConfig,
    running: Arc<DashSet<Uuid>>,
    /// Subjects whose run failed fatally; never restarted by a scan.
    abandoned: Arc<DashSet<Uuid>>,
    metrics: Arc<ResumeMetrics>,
}

impl<R: StepRuntime + 'static> ResumeJob<R> {
    pub fn new(machine: Arc<VerificationMachine<R>>, config: VerificationConfig) -> Self {
        Self {
            machine,
            config,
            running: Arc::new(DashSet::new()),
            abandoned: Arc::new(DashSet::new()),
            metrics: Arc::new(ResumeMetrics::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<ResumeMetrics> {
        &self.metrics
    }

    /// Subjects with a machine currently running.
    pub fn running(&self) -> usize {
        self.running.len()
    }

    pub fn is_running(&self, subject_id: &Uuid) -> bool {
        self.running.contains(subject_id)
    }

    pub fn is_abandoned(&self, subject_id: &Uuid) -> bool {
        self.abandoned.contains(subject_id)
    }

    /// Scan until the shutdown signal. Spawned machines keep running.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> Arc<ResumeMetrics> {
        let mut scan_interval = interval(self.config.scan_interval);
        scan_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Verification resume task started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Verification resume task shutting down");
                        break;
                    }
                }

                _ = scan_interval.tick() => {
                    self.scan_once().await;
                }
            }
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            scan_cycles = snapshot.scan_cycles,
            runs_started = snapshot.runs_started,
            verified = snapshot.verified,
            cancelled = snapshot.cancelled,
            exhausted = snapshot.exhausted,
            failed = snapshot.failed,
            "Verification resume task completed"
        );

        Arc::clone(&self.metrics)
    }

    /// One scan: start a machine for every pending subject without one.
    /// Returns how many were started.
    pub async fn scan_once(&self) -> usize {
        self.metrics.scan_cycles.fetch_add(1, Ordering::Relaxed);

        let pending = match self.machine.store().pending_subjects(self.config.batch_size).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list pending verifications");
                self.metrics.scan_errors.fetch_add(1, Ordering::Relaxed);
                return 0;
            }
        };

        let mut started = 0;
        for subject_id in pending {
            if self.abandoned.contains(&subject_id) || !self.running.insert(subject_id) {
                continue;
            }
            started += 1;
            self.metrics.runs_started.fetch_add(1, Ordering::Relaxed);

            let machine = Arc::clone(&self.machine);
            let running = Arc::clone(&self.running);
            let abandoned = Arc::clone(&self.abandoned);
            let metrics = Arc::clone(&self.metrics);
            tokio::spawn(async move {
                match machine.run(subject_id).await {
                    Ok(state) => metrics.record(&state),
                    Err(e) => {
                        tracing::error!(subject_id = %subject_id, error = %e, "Verification run failed");
                        metrics.failed.fetch_add(1, Ordering::Relaxed);
                        if e.is_fatal() {
                            abandoned.insert(subject_id);
                        }
                    }
                }
                running.remove(&subject_id);
            });
        }

        if started > 0 {
            tracing::info!(started, "Resumed verifications");
        } else {
            tracing::trace!("Resume scan found nothing new");
        }
        started
    }
}
