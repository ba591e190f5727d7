//! Temporal Reflection Engine
//!
//! Periodically (or on demand) reads the fragments in a time window, looks
//! for drift, contradictions and blind spots, and persists one immutable
//! [`ReflectionReport`] per cycle.
//!
//! ```text
//! Idle ──► Collecting ──► Analyzing ──► Reporting ──► Idle
//!              │               │              │
//!              └── cancel ─────┴──────────────┴──► Idle (nothing persisted)
//! ```
//!
//! Collection reads the store's lazy iterator in batches; the cancellation
//! token is checked between batches and between analyses.

pub mod blind_spot;
pub mod contradiction;
pub mod drift;
pub mod scheduler;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::storage::FragmentStore;
use super::types::{Finding, MemoryFragment, ReflectionReport, ReportKind, TimeRange};
use crate::config::ReflectionConfig;
use crate::errors::{EngineError, Result};

pub use scheduler::ReflectionScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionState {
    Idle,
    Collecting,
    Analyzing,
    Reporting,
}

impl fmt::Display for ReflectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Collecting => "collecting",
            Self::Analyzing => "analyzing",
            Self::Reporting => "reporting",
        };
        f.write_str(s)
    }
}

/// Cooperative cancellation flag shared between a caller and a cycle
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Returns the engine to `Idle` however a cycle ends
struct StateGuard<'a>(&'a Mutex<ReflectionState>);

impl<'a> StateGuard<'a> {
    fn enter(state: &'a Mutex<ReflectionState>) -> Self {
        *state.lock() = ReflectionState::Collecting;
        Self(state)
    }

    fn set(&self, next: ReflectionState) {
        *self.0.lock() = next;
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = ReflectionState::Idle;
    }
}

/// Kind of a report given its findings
pub fn report_kind(findings: &[Finding]) -> ReportKind {
    let kinds: HashSet<ReportKind> = findings.iter().map(|f| f.kind).collect();
    if kinds.len() == 1 {
        findings[0].kind
    } else {
        ReportKind::Summary
    }
}

pub struct ReflectionEngine {
    config: ReflectionConfig,
    state: Mutex<ReflectionState>,
    /// One cycle at a time
    cycle: Mutex<()>,
}

impl ReflectionEngine {
    pub fn new(config: ReflectionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ReflectionState::Idle),
            cycle: Mutex::new(()),
        }
    }

    pub fn state(&self) -> ReflectionState {
        *self.state.lock()
    }

    pub fn config(&self) -> &ReflectionConfig {
        &self.config
    }

    fn collect(
        &self,
        store: &FragmentStore,
        range: TimeRange,
        cancel: &CancellationToken,
    ) -> Result<Vec<MemoryFragment>> {
        let batch_size = self.config.batch_size.max(1);
        let mut iter = store.scan(Some(range))?;
        let mut fragments = Vec::new();
        loop {
            cancel.check()?;
            let before = fragments.len();
            fragments.extend(iter.by_ref().take(batch_size));
            if fragments.len() - before < batch_size {
                break;
            }
        }
        Ok(fragments)
    }

    /// Run one reflection cycle over `range` and persist its report
    pub fn reflect(
        &self,
        store: &FragmentStore,
        range: TimeRange,
        cancel: &CancellationToken,
    ) -> Result<ReflectionReport> {
        let _cycle = self.cycle.lock();
        let guard = StateGuard::enter(&self.state);
        let started = std::time::Instant::now();

        let fragments = self.collect(store, range, cancel)?;
        cancel.check()?;

        if fragments.len() < self.config.min_fragments {
            guard.set(ReflectionState::Reporting);
            let report = ReflectionReport::empty_summary(range, fragments.len());
            store.append_report(&report)?;
            let reason = EngineError::InsufficientData {
                found: fragments.len(),
                required: self.config.min_fragments,
            };
            tracing::info!(
                range = %range,
                code = reason.code(),
                "Reflection: {}, empty summary persisted",
                reason
            );
            return Ok(report);
        }

        let baseline = store.tag_histogram()?;
        let total_all_time = store.count()?;

        guard.set(ReflectionState::Analyzing);
        let mut findings = drift::detect(&fragments, range, self.config.drift_threshold);
        cancel.check()?;
        findings.extend(contradiction::detect(
            &fragments,
            self.config.contradiction_similarity_threshold,
            self.config.max_pairs,
        ));
        cancel.check()?;
        findings.extend(blind_spot::detect(
            &fragments,
            &baseline,
            total_all_time,
            self.config.blind_spot_ratio,
        ));
        cancel.check()?;

        guard.set(ReflectionState::Reporting);
        findings.sort_by(|a, b| b.severity.total_cmp(&a.severity));
        let report = ReflectionReport {
            id: Uuid::new_v4(),
            time_range: range,
            generated_at: Utc::now(),
            kind: report_kind(&findings),
            findings,
            fragments_analyzed: fragments.len(),
        };
        cancel.check()?;
        store.append_report(&report)?;

        tracing::info!(
            report_id = %report.id,
            kind = %report.kind,
            findings = report.findings.len(),
            fragments = report.fragments_analyzed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Reflection cycle complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::memory::types::{FragmentId, FragmentType};
    use chrono::Duration;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FragmentStore {
        FragmentStore::open(&StoreConfig {
            storage_path: dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap()
    }

    fn finding(kind: ReportKind, severity: f32) -> Finding {
        Finding {
            kind,
            description: String::new(),
            severity,
            related_fragment_ids: vec![FragmentId::new()],
        }
    }

    #[test]
    fn test_report_kind_rule() {
        assert_eq!(report_kind(&[]), ReportKind::Summary);
        assert_eq!(
            report_kind(&[finding(ReportKind::Drift, 0.5), finding(ReportKind::Drift, 0.4)]),
            ReportKind::Drift
        );
        assert_eq!(
            report_kind(&[finding(ReportKind::Drift, 0.5), finding(ReportKind::BlindSpot, 0.4)]),
            ReportKind::Summary
        );
    }

    #[test]
    fn test_empty_range_yields_persisted_summary() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let engine = ReflectionEngine::new(ReflectionConfig::default());

        let report = engine
            .reflect(&store, TimeRange::last(Duration::hours(1)), &CancellationToken::new())
            .unwrap();
        assert_eq!(report.kind, ReportKind::Summary);
        assert!(report.findings.is_empty());
        assert_eq!(report.fragments_analyzed, 0);
        assert_eq!(engine.state(), ReflectionState::Idle);
        assert_eq!(store.get_report(&report.id).unwrap(), Some(report));
    }

    #[test]
    fn test_cancelled_cycle_persists_nothing() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for i in 0..5 {
            store
                .put(MemoryFragment::new(format!("fragment {i}"), FragmentType::Event).with_tags(["t"]))
                .unwrap();
        }
        let engine = ReflectionEngine::new(ReflectionConfig {
            batch_size: 2,
            ..Default::default()
        });
        let token = CancellationToken::new();
        token.cancel();

        let range = TimeRange::last(Duration::hours(1));
        assert!(matches!(
            engine.reflect(&store, range, &token),
            Err(EngineError::Cancelled)
        ));
        assert_eq!(engine.state(), ReflectionState::Idle);
        assert!(store.reports(TimeRange::all()).unwrap().is_empty());
    }

    #[test]
    fn test_batched_collection_reads_everything() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for i in 0..7 {
            store
                .put(MemoryFragment::new(format!("item {i}"), FragmentType::Event))
                .unwrap();
        }
        let engine = ReflectionEngine::new(ReflectionConfig {
            batch_size: 3,
            ..Default::default()
        });
        let collected = engine
            .collect(&store, TimeRange::last(Duration::hours(1)), &CancellationToken::new())
            .unwrap();
        assert_eq!(collected.len(), 7);
    }

    #[test]
    fn test_findings_sorted_by_severity() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for content in [
            "deploy pipeline failed overnight",
            "team lunch ordered pizza",
            "kubernetes cluster upgraded",
        ] {
            store
                .put(MemoryFragment::new(content, FragmentType::Event).with_tags(["work"]))
                .unwrap();
        }
        let engine = ReflectionEngine::new(ReflectionConfig::default());
        let report = engine
            .reflect(&store, TimeRange::last(Duration::hours(1)), &CancellationToken::new())
            .unwrap();
        assert_eq!(report.fragments_analyzed, 3);
        assert!(!report.findings.is_empty());
        assert!(report
            .findings
            .windows(2)
            .all(|w| w[0].severity >= w[1].severity));
    }
}
