//! Core data types for the memory engine

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::constants::DEFAULT_FRAGMENT_CONFIDENCE;
use crate::validation::normalize_tags;

/// Unique identifier for memory fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(pub Uuid);

impl FragmentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(Self)
    }
}

impl Default for FragmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FragmentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Kind of knowledge a fragment holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentType {
    Knowledge,
    Preference,
    Event,
    Insight,
}

impl FragmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Knowledge => "knowledge",
            Self::Preference => "preference",
            Self::Event => "event",
            Self::Insight => "insight",
        }
    }
}

impl fmt::Display for FragmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FragmentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "knowledge" => Ok(Self::Knowledge),
            "preference" => Ok(Self::Preference),
            "event" => Ok(Self::Event),
            "insight" => Ok(Self::Insight),
            other => Err(format!("unknown fragment type '{other}'")),
        }
    }
}

/// A single stored unit of memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFragment {
    pub id: FragmentId,
    pub content: String,
    pub fragment_type: FragmentType,
    /// Normalized (trimmed, lowercase) tags
    pub tags: BTreeSet<String>,
    /// Always within [0, 1]
    pub confidence: f32,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u32,
    /// Opaque to the engine
    pub metadata: BTreeMap<String, String>,
}

impl MemoryFragment {
    /// New fragment with a fresh id, default confidence and no tags
    pub fn new(content: impl Into<String>, fragment_type: FragmentType) -> Self {
        let now = Utc::now();
        Self {
            id: FragmentId::new(),
            content: content.into(),
            fragment_type,
            tags: BTreeSet::new(),
            confidence: DEFAULT_FRAGMENT_CONFIDENCE,
            embedding: None,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Backdate (or postdate) creation. `last_accessed` follows.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.last_accessed = created_at;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn shares_tag_with(&self, other: &MemoryFragment) -> bool {
        self.tags.intersection(&other.tags).next().is_some()
    }

    /// True when the two fragments have no tag in common
    pub fn is_tag_disjoint(&self, other: &MemoryFragment) -> bool {
        !self.shares_tag_with(other)
    }

    /// Equality ignoring access bookkeeping (`access_count`, `last_accessed`)
    pub fn same_payload(&self, other: &MemoryFragment) -> bool {
        self.id == other.id
            && self.content == other.content
            && self.fragment_type == other.fragment_type
            && self.tags == other.tags
            && self.confidence == other.confidence
            && self.embedding == other.embedding
            && self.created_at == other.created_at
            && self.metadata == other.metadata
    }

    /// First 80 characters of the content, for logs and descriptions
    pub fn preview(&self) -> String {
        let mut preview: String = self.content.chars().take(80).collect();
        if preview.len() < self.content.len() {
            preview.push('…');
        }
        preview
    }
}

/// Half-open UTC interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range; reversed bounds are swapped
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if end < start {
            Self {
                start: end,
                end: start,
            }
        } else {
            Self { start, end }
        }
    }

    /// Everything from the epoch up to (and including) now
    pub fn all() -> Self {
        Self {
            start: DateTime::<Utc>::default(),
            end: Utc::now() + Duration::milliseconds(1),
        }
    }

    /// Trailing window ending now (inclusive of this instant)
    pub fn last(duration: Duration) -> Self {
        let end = Utc::now() + Duration::milliseconds(1);
        Self::new(end - duration, end)
    }

    /// The UTC calendar day containing `instant`
    pub fn day_of(instant: DateTime<Utc>) -> Self {
        let midnight = instant.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default();
        let start = Utc.from_utc_datetime(&midnight);
        Self::new(start, start + Duration::days(1))
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Split into two adjacent half-open windows at the midpoint
    pub fn split_at_midpoint(&self) -> (TimeRange, TimeRange) {
        let mid = self.start + self.duration() / 2;
        (
            TimeRange::new(self.start, mid),
            TimeRange::new(mid, self.end),
        )
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Named temporal filters, resolved in UTC as half-open ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFilter {
    #[default]
    All,
    /// The current UTC calendar day
    Today,
    /// The trailing 24 hours, including now
    Last24Hours,
    /// The trailing `n` days, including now
    LastDays(u32),
    Range(TimeRange),
}

impl TimeFilter {
    /// Resolve against `now`. `All` resolves to `None` (no time bound).
    pub fn resolve(&self, now: DateTime<Utc>) -> Option<TimeRange> {
        let inclusive_now = now + Duration::milliseconds(1);
        match self {
            Self::All => None,
            Self::Today => Some(TimeRange::day_of(now)),
            Self::Last24Hours => Some(TimeRange::new(
                inclusive_now - Duration::hours(24),
                inclusive_now,
            )),
            Self::LastDays(days) => Some(TimeRange::new(
                inclusive_now - Duration::days(i64::from(*days)),
                inclusive_now,
            )),
            Self::Range(range) => Some(*range),
        }
    }
}

/// Selection criteria for `recall` and store queries
///
/// Tags match if the fragment carries **any** of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FragmentFilter {
    pub tags: Option<BTreeSet<String>>,
    pub fragment_type: Option<FragmentType>,
    pub time: TimeFilter,
    /// Stop after this many fragments
    pub limit: Option<usize>,
}

impl FragmentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = Some(normalize_tags(tags));
        self
    }

    pub fn with_type(mut self, fragment_type: FragmentType) -> Self {
        self.fragment_type = Some(fragment_type);
        self
    }

    pub fn with_time(mut self, time: TimeFilter) -> Self {
        self.time = time;
        self
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.time = TimeFilter::Range(range);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Tag and type predicate (time bounds are applied by the store scan)
    pub fn matches(&self, fragment: &MemoryFragment) -> bool {
        if let Some(t) = self.fragment_type {
            if fragment.fragment_type != t {
                return false;
            }
        }
        if let Some(tags) = &self.tags {
            if !tags.is_empty() && fragment.tags.intersection(tags).next().is_none() {
                return false;
            }
        }
        true
    }
}

/// Category of a reflection report or finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Drift,
    Contradiction,
    BlindSpot,
    Summary,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Drift => "drift",
            Self::Contradiction => "contradiction",
            Self::BlindSpot => "blind_spot",
            Self::Summary => "summary",
        };
        f.write_str(s)
    }
}

/// One observation produced by a reflection analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: ReportKind,
    pub description: String,
    /// In [0, 1]
    pub severity: f32,
    pub related_fragment_ids: Vec<FragmentId>,
}

/// Immutable output of one reflection cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionReport {
    pub id: Uuid,
    pub time_range: TimeRange,
    pub generated_at: DateTime<Utc>,
    pub kind: ReportKind,
    /// Ordered by severity, highest first
    pub findings: Vec<Finding>,
    pub fragments_analyzed: usize,
}

impl ReflectionReport {
    /// Empty summary report (insufficient data or nothing found)
    pub fn empty_summary(time_range: TimeRange, fragments_analyzed: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            time_range,
            generated_at: Utc::now(),
            kind: ReportKind::Summary,
            findings: Vec::new(),
            fragments_analyzed,
        }
    }

    pub fn findings_of(&self, kind: ReportKind) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.kind == kind)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_builder_normalizes_tags() {
        let f = MemoryFragment::new("deploy on fridays", FragmentType::Preference)
            .with_tags(["Work", "  OPS "])
            .with_confidence(0.8);
        assert!(f.tags.contains("work"));
        assert!(f.tags.contains("ops"));
        assert_eq!(f.access_count, 0);
        assert_eq!(f.created_at, f.last_accessed);
    }

    #[test]
    fn test_tag_disjointness() {
        let a = MemoryFragment::new("a", FragmentType::Knowledge).with_tags(["x", "y"]);
        let b = MemoryFragment::new("b", FragmentType::Knowledge).with_tags(["y"]);
        let c = MemoryFragment::new("c", FragmentType::Knowledge).with_tags(["z"]);
        assert!(a.shares_tag_with(&b));
        assert!(a.is_tag_disjoint(&c));
    }

    #[test]
    fn test_time_range_is_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let range = TimeRange::new(start, end);
        assert!(range.contains(start));
        assert!(!range.contains(end));

        let (first, second) = range.split_at_midpoint();
        assert_eq!(first.end, second.start);
        assert_eq!(first.duration(), second.duration());
    }

    #[test]
    fn test_reversed_range_is_swapped() {
        let a = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let range = TimeRange::new(a, b);
        assert_eq!(range.start, b);
        assert_eq!(range.end, a);
    }

    #[test]
    fn test_today_filter_is_utc_day() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 13, 45, 0).unwrap();
        let range = TimeFilter::Today.resolve(now).unwrap();
        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        assert_eq!(range.end, Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap());
        assert!(TimeFilter::All.resolve(now).is_none());
    }

    #[test]
    fn test_last_24_hours_includes_now() {
        let now = Utc::now();
        let range = TimeFilter::Last24Hours.resolve(now).unwrap();
        assert!(range.contains(now));
        assert!(range.contains(now - Duration::hours(23)));
        assert!(!range.contains(now - Duration::hours(25)));
    }

    #[test]
    fn test_filter_matches_any_tag() {
        let f = MemoryFragment::new("standup at 9", FragmentType::Event).with_tags(["work", "daily"]);
        assert!(FragmentFilter::new().with_tags(["work"]).matches(&f));
        assert!(FragmentFilter::new().with_tags(["home", "daily"]).matches(&f));
        assert!(!FragmentFilter::new().with_tags(["home"]).matches(&f));
        assert!(!FragmentFilter::new().with_type(FragmentType::Insight).matches(&f));
    }
}
