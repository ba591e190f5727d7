//! Background reflection scheduler
//!
//! A tokio task that reflects over the trailing window on a fixed interval.
//! Each cycle runs on the blocking pool since it reads RocksDB. A failed
//! cycle is logged and skipped; the next tick tries again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::CancellationToken;
use crate::errors::EngineError;
use crate::memory::types::TimeRange;
use crate::memory::MemoryEngine;

pub struct ReflectionScheduler {
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
    cancel: CancellationToken,
    completed: Arc<AtomicU64>,
}

impl ReflectionScheduler {
    /// Start with the engine's configured interval and window
    pub fn from_config(engine: Arc<MemoryEngine>) -> Self {
        let reflection = &engine.config().reflection;
        let interval = Duration::from_secs(reflection.interval_secs.max(1));
        let window = chrono::Duration::hours(reflection.window_hours.max(1));
        Self::spawn(engine, interval, window)
    }

    /// Must be called from within a tokio runtime
    pub fn spawn(engine: Arc<MemoryEngine>, interval: Duration, window: chrono::Duration) -> Self {
        let (stop, mut stop_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let completed = Arc::new(AtomicU64::new(0));

        let task_cancel = cancel.clone();
        let task_completed = completed.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                interval_secs = interval.as_secs_f64(),
                window_hours = window.num_hours(),
                "Reflection scheduler started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let engine = engine.clone();
                let token = task_cancel.clone();
                let range = TimeRange::last(window);
                let outcome =
                    tokio::task::spawn_blocking(move || engine.reflect_with_cancel(range, &token))
                        .await;

                match outcome {
                    Ok(Ok(report)) => {
                        task_completed.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(report_id = %report.id, kind = %report.kind, "Scheduled reflection done");
                    }
                    Ok(Err(EngineError::Cancelled)) => {
                        tracing::info!("Scheduled reflection cancelled");
                        break;
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(
                            code = e.code(),
                            transient = e.is_transient(),
                            "Scheduled reflection failed, skipping: {}",
                            e
                        );
                    }
                    Err(e) => {
                        tracing::warn!("Reflection task panicked or was aborted: {}", e);
                    }
                }
            }

            tracing::info!("Reflection scheduler stopped");
        });

        Self {
            handle,
            stop,
            cancel,
            completed,
        }
    }

    /// Cycles that persisted a report
    pub fn completed_cycles(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Cancel any in-flight cycle and wait for the task to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!("Reflection scheduler join failed: {}", e);
        }
    }
}
