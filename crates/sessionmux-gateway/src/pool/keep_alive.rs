//! Keep-alive scheduler
//!
//! Periodically touches every connector so idle sessions are not reaped by
//! the server. The sweep mutex guards a running sweep, not the timer:
//! `stop` returns only once any in-progress sweep has finished.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::service::{ConnectionPool, KeepAliveReport};

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct KeepAliveScheduler {
    pool: Arc<ConnectionPool>,
    interval: Duration,
    running: Mutex<Option<Running>>,
    sweep_lock: Arc<tokio::sync::Mutex<()>>,
}

impl KeepAliveScheduler {
    pub fn new(pool: Arc<ConnectionPool>, interval: Duration) -> Self {
        Self {
            pool,
            interval,
            running: Mutex::new(None),
            sweep_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Start the periodic sweep. False if it was already running.
    ///
    /// The first sweep happens one interval after start.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let pool = self.pool.clone();
        let sweep_lock = self.sweep_lock.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval() fires immediately; skip that tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let _sweep = sweep_lock.lock().await;
                        if token.is_cancelled() {
                            break;
                        }
                        log_report(&pool.keep_alive().await);
                    }
                }
            }
            debug!("[KeepAlive] Sweep loop exited");
        });

        *running = Some(Running { cancel, handle });
        info!(interval_secs = period.as_secs(), "[KeepAlive] Started");
        true
    }

    /// Stop the sweep, waiting for one in progress. Idempotent and callable
    /// from any task.
    pub async fn stop(&self) {
        let Some(Running { cancel, handle }) = self.running.lock().take() else {
            return;
        };
        cancel.cancel();
        // Wait out a sweep that already started
        drop(self.sweep_lock.lock().await);
        if let Err(e) = handle.await {
            if !e.is_cancelled() {
                warn!(error = %e, "[KeepAlive] Sweep task ended abnormally");
            }
        }
        info!("[KeepAlive] Stopped");
    }

    /// Run one sweep now, serialized with the periodic ones.
    pub async fn sweep_now(&self) -> KeepAliveReport {
        let _sweep = self.sweep_lock.lock().await;
        let report = self.pool.keep_alive().await;
        log_report(&report);
        report
    }
}

impl Drop for KeepAliveScheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

fn log_report(report: &KeepAliveReport) {
    if report.total() == 0 {
        return;
    }
    if report.all_ok() {
        debug!(touched = report.touched.len(), "[KeepAlive] Sweep complete");
    } else {
        warn!(
            touched = report.touched.len(),
            failed = report.failed.len(),
            "[KeepAlive] Sweep complete with failures"
        );
    }
}
