//! Drift detection: compare the two halves of a reflection window
//!
//! Two measures, each reported when it exceeds the threshold:
//! - tag distribution shift, as total-variation distance
//!   `½ Σ |p_early(t) − p_late(t)|`
//! - mean confidence shift, as relative change `|m_late − m_early| / m_early`

use std::collections::{BTreeSet, HashMap};

use crate::memory::types::{Finding, FragmentId, MemoryFragment, ReportKind, TimeRange};

/// Fragments referenced per drift finding
const MAX_RELATED: usize = 20;

/// Tags named in a tag-drift description
const TOP_SHIFTED_TAGS: usize = 3;

fn tag_distribution(fragments: &[&MemoryFragment]) -> HashMap<&str, f32> {
    let mut counts: HashMap<&str, f32> = HashMap::new();
    let mut total = 0.0f32;
    for f in fragments {
        for tag in &f.tags {
            *counts.entry(tag.as_str()).or_insert(0.0) += 1.0;
            total += 1.0;
        }
    }
    if total > 0.0 {
        for v in counts.values_mut() {
            *v /= total;
        }
    }
    counts
}

/// Total-variation distance between two discrete distributions
pub fn total_variation(p: &HashMap<&str, f32>, q: &HashMap<&str, f32>) -> f32 {
    let keys: BTreeSet<&str> = p.keys().chain(q.keys()).copied().collect();
    let sum: f32 = keys
        .iter()
        .map(|k| (p.get(k).copied().unwrap_or(0.0) - q.get(k).copied().unwrap_or(0.0)).abs())
        .sum();
    (0.5 * sum).clamp(0.0, 1.0)
}

fn mean_confidence(fragments: &[&MemoryFragment]) -> f32 {
    if fragments.is_empty() {
        return 0.0;
    }
    fragments.iter().map(|f| f.confidence).sum::<f32>() / fragments.len() as f32
}

/// Relative change from `before` to `after`; 0 when both are 0
pub fn relative_change(before: f32, after: f32) -> f32 {
    if before <= f32::EPSILON {
        return if after <= f32::EPSILON { 0.0 } else { 1.0 };
    }
    (after - before).abs() / before
}

fn related_ids<'a>(fragments: impl Iterator<Item = &'a MemoryFragment>) -> Vec<FragmentId> {
    fragments.map(|f| f.id).take(MAX_RELATED).collect()
}

pub fn detect(fragments: &[MemoryFragment], range: TimeRange, threshold: f32) -> Vec<Finding> {
    let (early_range, late_range) = range.split_at_midpoint();
    let early: Vec<&MemoryFragment> = fragments
        .iter()
        .filter(|f| early_range.contains(f.created_at))
        .collect();
    let late: Vec<&MemoryFragment> = fragments
        .iter()
        .filter(|f| late_range.contains(f.created_at))
        .collect();

    if early.is_empty() || late.is_empty() {
        tracing::debug!(
            early = early.len(),
            late = late.len(),
            "Drift skipped: a window is empty"
        );
        return Vec::new();
    }

    let mut findings = Vec::new();

    let p = tag_distribution(&early);
    let q = tag_distribution(&late);
    if !p.is_empty() || !q.is_empty() {
        let distance = total_variation(&p, &q);
        if distance > threshold {
            let mut shifts: Vec<(&str, f32)> = p
                .keys()
                .chain(q.keys())
                .copied()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(|t| {
                    let delta = q.get(t).copied().unwrap_or(0.0) - p.get(t).copied().unwrap_or(0.0);
                    (t, delta)
                })
                .collect();
            shifts.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()).then_with(|| a.0.cmp(&b.0)));
            let top: Vec<&str> = shifts.iter().take(TOP_SHIFTED_TAGS).map(|(t, _)| *t).collect();
            let described: Vec<String> = shifts
                .iter()
                .take(TOP_SHIFTED_TAGS)
                .map(|(t, d)| format!("{t} {:+.0}%", d * 100.0))
                .collect();

            findings.push(Finding {
                kind: ReportKind::Drift,
                description: format!(
                    "Tag distribution shifted by {distance:.2} (total variation) between {early_range} and {late_range}: {}",
                    described.join(", ")
                ),
                severity: distance,
                related_fragment_ids: related_ids(
                    early
                        .iter()
                        .chain(late.iter())
                        .copied()
                        .filter(|f| top.iter().any(|t| f.tags.contains(*t))),
                ),
            });
        }
    }

    let before = mean_confidence(&early);
    let after = mean_confidence(&late);
    let change = relative_change(before, after);
    if change > threshold {
        findings.push(Finding {
            kind: ReportKind::Drift,
            description: format!(
                "Mean confidence moved from {before:.2} to {after:.2} ({:+.0}%) between {early_range} and {late_range}",
                (after - before) / before.max(f32::EPSILON) * 100.0
            ),
            severity: change.min(1.0),
            related_fragment_ids: related_ids(late.iter().copied()),
        });
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::FragmentType;
    use chrono::{Duration, Utc};

    fn at(hours_ago: i64, tags: &[&str], confidence: f32) -> MemoryFragment {
        MemoryFragment::new(format!("note {hours_ago}"), FragmentType::Event)
            .with_tags(tags.iter().copied())
            .with_confidence(confidence)
            .with_created_at(Utc::now() - Duration::hours(hours_ago))
    }

    #[test]
    fn test_total_variation_bounds() {
        let p: HashMap<&str, f32> = [("a", 1.0)].into_iter().collect();
        let q: HashMap<&str, f32> = [("b", 1.0)].into_iter().collect();
        assert!((total_variation(&p, &q) - 1.0).abs() < 1e-6);
        assert_eq!(total_variation(&p, &p), 0.0);
    }

    #[test]
    fn test_detects_topic_shift() {
        let range = TimeRange::last(Duration::hours(10));
        let fragments = vec![
            at(9, &["rust"], 0.8),
            at(8, &["rust"], 0.8),
            at(2, &["cooking"], 0.8),
            at(1, &["cooking"], 0.8),
        ];
        let findings = detect(&fragments, range, 0.3);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, ReportKind::Drift);
        assert!((findings[0].severity - 1.0).abs() < 1e-6);
        assert_eq!(findings[0].related_fragment_ids.len(), 4);
    }

    #[test]
    fn test_detects_confidence_shift() {
        let range = TimeRange::last(Duration::hours(10));
        let fragments = vec![at(9, &["x"], 0.9), at(2, &["x"], 0.3)];
        let findings = detect(&fragments, range, 0.3);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].description.contains("Mean confidence"));
    }

    #[test]
    fn test_stable_window_has_no_drift() {
        let range = TimeRange::last(Duration::hours(10));
        let fragments = vec![at(9, &["x"], 0.7), at(2, &["x"], 0.72)];
        assert!(detect(&fragments, range, 0.3).is_empty());
    }

    #[test]
    fn test_empty_half_skips() {
        let range = TimeRange::last(Duration::hours(10));
        let fragments = vec![at(2, &["x"], 0.9), at(1, &["y"], 0.1)];
        assert!(detect(&fragments, range, 0.3).is_empty());
    }
}
