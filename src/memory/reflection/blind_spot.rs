//! Blind spot detection against the all-time tag baseline
//!
//! For each historically used tag, the expected in-window count is
//! `share_all_time × fragments_in_window`. A tag seen fewer than
//! `ratio × expected` times (with `expected ≥ 1`) is a blind spot.

use std::collections::HashMap;

use crate::memory::types::{Finding, MemoryFragment, ReportKind};

pub fn detect(
    fragments: &[MemoryFragment],
    baseline: &HashMap<String, usize>,
    total_all_time: usize,
    ratio: f32,
) -> Vec<Finding> {
    if total_all_time == 0 || fragments.is_empty() {
        return Vec::new();
    }

    let mut observed: HashMap<&str, usize> = HashMap::new();
    for f in fragments {
        for tag in &f.tags {
            *observed.entry(tag.as_str()).or_insert(0) += 1;
        }
    }

    let in_range = fragments.len() as f32;
    let mut tags: Vec<(&String, &usize)> = baseline.iter().collect();
    tags.sort_by(|a, b| a.0.cmp(b.0));

    let mut findings = Vec::new();
    for (tag, &count) in tags {
        let share = count as f32 / total_all_time as f32;
        let expected = share * in_range;
        if expected < 1.0 {
            continue;
        }
        let seen = observed.get(tag.as_str()).copied().unwrap_or(0);
        if (seen as f32) < ratio * expected {
            findings.push(Finding {
                kind: ReportKind::BlindSpot,
                description: format!(
                    "Tag '{tag}' is under-represented: {seen} fragment(s) in window, {expected:.1} expected from its {:.0}% all-time share",
                    share * 100.0
                ),
                severity: (1.0 - seen as f32 / expected).clamp(0.0, 1.0),
                related_fragment_ids: fragments
                    .iter()
                    .filter(|f| f.tags.contains(tag.as_str()))
                    .map(|f| f.id)
                    .collect(),
            });
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::FragmentType;

    fn tagged(tag: &str) -> MemoryFragment {
        MemoryFragment::new(format!("about {tag}"), FragmentType::Knowledge).with_tags([tag])
    }

    #[test]
    fn test_flags_missing_tag() {
        let baseline: HashMap<String, usize> =
            [("health".to_string(), 50), ("work".to_string(), 50)].into_iter().collect();
        let window: Vec<_> = (0..10).map(|_| tagged("work")).collect();
        let findings = detect(&window, &baseline, 100, 0.5);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].description.contains("health"));
        assert_eq!(findings[0].severity, 1.0);
        assert!(findings[0].related_fragment_ids.is_empty());
    }

    #[test]
    fn test_rare_tags_are_not_expected() {
        let baseline: HashMap<String, usize> =
            [("rare".to_string(), 1), ("work".to_string(), 99)].into_iter().collect();
        let window: Vec<_> = (0..10).map(|_| tagged("work")).collect();
        // expected("rare") = 0.1 < 1
        assert!(detect(&window, &baseline, 100, 0.5).is_empty());
    }

    #[test]
    fn test_empty_inputs() {
        assert!(detect(&[], &HashMap::new(), 0, 0.5).is_empty());
        assert!(detect(&[tagged("x")], &HashMap::new(), 0, 0.5).is_empty());
    }
}
