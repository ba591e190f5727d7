//! Fragment store: durable CRUD over memory fragments
//!
//! RocksDB with one column family per concern:
//!
//! | CF | Key | Value |
//! |----|-----|-------|
//! | `fragments` | fragment UUID (16 bytes) | versioned bincode record |
//! | `fragments_by_time` | created_at millis (u64 BE) ++ UUID | empty |
//! | `unindexed` | fragment UUID | reason (UTF-8) |
//! | `reflection_reports` | generated_at millis (u64 BE) ++ UUID | bincode report |
//! | `engine_meta` | key string | value bytes |
//!
//! Every mutation is a single `WriteBatch`, so a failed write never leaves a
//! partial fragment behind. Read-modify-write cycles on one fragment are
//! serialized by a per-id lock.

use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamily, ColumnFamilyDescriptor, DBIteratorWithThreadMode,
    Direction, ErrorKind, IteratorMode, Options, WriteBatch, WriteOptions, DB,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use super::types::*;
use crate::config::{RetentionConfig, StoreConfig, WriteMode};
use crate::constants::{MAX_DECOMPRESSED_SIZE, STORAGE_RETRY_MAX_EXPONENT};
use crate::decay::ReinforcementPolicy;
use crate::errors::{EngineError, Result, ValidationErrorExt};
use crate::validation::{
    normalize_tags, validate_confidence, validate_content, validate_embedding, validate_tags,
    MAX_METADATA_ENTRIES,
};

const CF_FRAGMENTS: &str = "fragments";
const CF_BY_TIME: &str = "fragments_by_time";
const CF_UNINDEXED: &str = "unindexed";
const CF_REPORTS: &str = "reflection_reports";
const CF_META: &str = "engine_meta";

const ALL_CFS: [&str; 5] = [CF_FRAGMENTS, CF_BY_TIME, CF_UNINDEXED, CF_REPORTS, CF_META];

const META_INDEX_DIMENSION: &str = "index_dimension";
const META_INDEX_GENERATION: &str = "index_generation";

const RECORD_MAGIC: &[u8; 3] = b"LMF";
const RECORD_VERSION: u8 = 1;

// ============================================================================
// PERSISTED RECORD FORMAT
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
enum StoredContent {
    Plain(String),
    Lz4 { original_len: u32, bytes: Vec<u8> },
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredFragment {
    id: FragmentId,
    content: StoredContent,
    fragment_type: FragmentType,
    tags: BTreeSet<String>,
    confidence: f32,
    embedding: Option<Vec<f32>>,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    access_count: u32,
    metadata: BTreeMap<String, String>,
}

fn compress_content(content: &str, threshold: usize) -> anyhow::Result<StoredContent> {
    if content.len() <= threshold {
        return Ok(StoredContent::Plain(content.to_string()));
    }
    let bytes = lz4::block::compress(content.as_bytes(), None, false)
        .context("LZ4 compression failed")?;
    // Incompressible content stays plain
    if bytes.len() >= content.len() {
        return Ok(StoredContent::Plain(content.to_string()));
    }
    Ok(StoredContent::Lz4 {
        original_len: content.len() as u32,
        bytes,
    })
}

fn decompress_content(stored: StoredContent) -> anyhow::Result<String> {
    match stored {
        StoredContent::Plain(s) => Ok(s),
        StoredContent::Lz4 {
            original_len,
            bytes,
        } => {
            if original_len as i64 > MAX_DECOMPRESSED_SIZE as i64 {
                return Err(anyhow!(
                    "declared content size {original_len} exceeds limit {MAX_DECOMPRESSED_SIZE}"
                ));
            }
            let raw = lz4::block::decompress(&bytes, Some(original_len as i32))
                .context("LZ4 decompression failed")?;
            String::from_utf8(raw).context("decompressed content is not UTF-8")
        }
    }
}

fn encode_fragment(fragment: &MemoryFragment, threshold: usize) -> anyhow::Result<Vec<u8>> {
    let record = StoredFragment {
        id: fragment.id,
        content: compress_content(&fragment.content, threshold)?,
        fragment_type: fragment.fragment_type,
        tags: fragment.tags.clone(),
        confidence: fragment.confidence,
        embedding: fragment.embedding.clone(),
        created_at: fragment.created_at,
        last_accessed: fragment.last_accessed,
        access_count: fragment.access_count,
        metadata: fragment.metadata.clone(),
    };
    let body = bincode::serde::encode_to_vec(&record, bincode::config::standard())
        .with_context(|| format!("Failed to serialize fragment {}", fragment.id))?;

    let mut out = Vec::with_capacity(body.len() + 4);
    out.extend_from_slice(RECORD_MAGIC);
    out.push(RECORD_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

fn decode_fragment(data: &[u8]) -> anyhow::Result<MemoryFragment> {
    if data.len() < 4 || &data[..3] != RECORD_MAGIC {
        return Err(anyhow!("unrecognized fragment record ({} bytes)", data.len()));
    }
    if data[3] != RECORD_VERSION {
        return Err(anyhow!("unsupported fragment record version {}", data[3]));
    }
    let (record, _): (StoredFragment, usize) =
        bincode::serde::decode_from_slice(&data[4..], bincode::config::standard())
            .context("Failed to deserialize fragment record")?;

    Ok(MemoryFragment {
        id: record.id,
        content: decompress_content(record.content)?,
        fragment_type: record.fragment_type,
        tags: record.tags,
        confidence: record.confidence,
        embedding: record.embedding,
        created_at: record.created_at,
        last_accessed: record.last_accessed,
        access_count: record.access_count,
        metadata: record.metadata,
    })
}

/// Milliseconds since the epoch; pre-epoch instants sort as the epoch
fn millis(ts: DateTime<Utc>) -> u64 {
    ts.timestamp_millis().max(0) as u64
}

fn time_key(ts: DateTime<Utc>, id: &[u8; 16]) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&millis(ts).to_be_bytes());
    key[8..].copy_from_slice(id);
    key
}

fn split_time_key(key: &[u8]) -> Option<(u64, &[u8])> {
    if key.len() != 24 {
        return None;
    }
    let mut ms = [0u8; 8];
    ms.copy_from_slice(&key[..8]);
    Some((u64::from_be_bytes(ms), &key[8..]))
}

/// Whether a RocksDB failure is worth retrying
fn is_transient(err: &rocksdb::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::IOError
            | ErrorKind::Busy
            | ErrorKind::TimedOut
            | ErrorKind::TryAgain
            | ErrorKind::Incomplete
    )
}

// ============================================================================
// STORE
// ============================================================================

/// Durable fragment storage. The single source of truth for the engine.
pub struct FragmentStore {
    db: Arc<DB>,
    storage_path: PathBuf,
    config: StoreConfig,
    /// Per-id write locks
    id_locks: DashMap<FragmentId, Arc<Mutex<()>>>,
}

impl FragmentStore {
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let path = config.storage_path.as_path();
        std::fs::create_dir_all(path).map_err(|e| {
            EngineError::Storage(format!("Failed to create storage dir {path:?}: {e}"))
        })?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_max_background_jobs(2);

        let cache = Cache::new_lru_cache(64 * 1024 * 1024);
        let descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                let mut block_opts = BlockBasedOptions::default();
                block_opts.set_block_cache(&cache);
                if *name == CF_FRAGMENTS {
                    block_opts.set_bloom_filter(10.0, false); // ~1% FPR on point lookups
                }
                cf_opts.set_block_based_table_factory(&block_opts);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&opts, path.join("fragments_db"), descriptors)
            .map_err(|e| EngineError::Storage(format!("Failed to open {path:?}: {e}")))?;

        tracing::info!(
            path = ?path,
            write_mode = ?config.write_mode,
            "Fragment store opened"
        );

        Ok(Self {
            db: Arc::new(db),
            storage_path: path.to_path_buf(),
            config: config.clone(),
            id_locks: DashMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.storage_path
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| EngineError::Storage(format!("column family '{name}' missing")))
    }

    fn write_opts(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.write_mode == WriteMode::Sync);
        write_opts
    }

    /// Run a RocksDB operation, retrying transient failures with bounded
    /// exponential backoff.
    fn with_retry<T>(
        &self,
        op: &str,
        mut f: impl FnMut() -> std::result::Result<T, rocksdb::Error>,
    ) -> Result<T> {
        let mut attempt: u32 = 0;
        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) if is_transient(&e) && attempt < self.config.max_retries => {
                    let delay = self.config.retry_base_delay_ms
                        * (1u64 << attempt.min(STORAGE_RETRY_MAX_EXPONENT));
                    tracing::warn!(
                        op,
                        attempt = attempt + 1,
                        delay_ms = delay,
                        "Transient storage failure, retrying: {}",
                        e
                    );
                    std::thread::sleep(std::time::Duration::from_millis(delay));
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(op, attempts = attempt + 1, "Storage operation failed: {}", e);
                    return Err(EngineError::Storage(format!("{op}: {e}")));
                }
            }
        }
    }

    /// Run `f` holding the write lock for `id`. The lock entry is dropped
    /// afterwards unless another caller is holding or waiting on it.
    pub(crate) fn with_id_lock<T>(&self, id: &FragmentId, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self
            .id_locks
            .entry(*id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.id_locks
            .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    #[cfg(test)]
    pub(crate) fn lock_entries(&self) -> usize {
        self.id_locks.len()
    }

    fn read_raw(&self, id: &FragmentId) -> Result<Option<MemoryFragment>> {
        let cf = self.cf(CF_FRAGMENTS)?;
        let bytes = self.with_retry("get", || self.db.get_cf(cf, id.as_bytes()))?;
        match bytes {
            Some(data) => decode_fragment(&data)
                .map(Some)
                .map_err(|e| EngineError::Storage(format!("corrupted fragment {id}: {e:#}"))),
            None => Ok(None),
        }
    }

    fn write_record(&self, batch: &mut WriteBatch, fragment: &MemoryFragment) -> Result<()> {
        let cf = self.cf(CF_FRAGMENTS)?;
        let value = encode_fragment(fragment, self.config.compression_threshold_bytes)?;
        batch.put_cf(cf, fragment.id.as_bytes(), value);
        Ok(())
    }

    fn commit(&self, op: &str, batch: WriteBatch) -> Result<()> {
        let opts = self.write_opts();
        // WriteBatch is consumed by write_opt; rebuild it per attempt from its bytes
        let data = batch.data().to_vec();
        self.with_retry(op, || {
            self.db
                .write_opt(WriteBatch::from_data(&data), &opts)
        })
    }

    /// Validate and normalize a fragment prior to storage
    /// Validate a fragment and normalize its tags in place
    pub(crate) fn validate(fragment: &mut MemoryFragment) -> Result<()> {
        validate_content(&fragment.content).map_validation_err("content")?;
        validate_confidence(fragment.confidence).map_validation_err("confidence")?;
        fragment.tags = normalize_tags(fragment.tags.iter());
        validate_tags(&fragment.tags).map_validation_err("tags")?;
        if let Some(embedding) = &fragment.embedding {
            validate_embedding(embedding).map_validation_err("embedding")?;
        }
        if fragment.metadata.len() > MAX_METADATA_ENTRIES {
            return Err(EngineError::rejected(
                "metadata",
                format!(
                    "too many entries: {} (max: {MAX_METADATA_ENTRIES})",
                    fragment.metadata.len()
                ),
            ));
        }
        Ok(())
    }

    /// Store a new fragment.
    ///
    /// Rejects malformed input and ids that already exist; stored fragments
    /// are only mutated through the dedicated update operations.
    pub fn put(&self, fragment: MemoryFragment) -> Result<FragmentId> {
        self.put_marked(fragment, None)
    }

    /// Store a new fragment already flagged for embedding backfill
    pub fn put_unindexed(&self, fragment: MemoryFragment, reason: &str) -> Result<FragmentId> {
        self.put_marked(fragment, Some(reason))
    }

    fn put_marked(&self, mut fragment: MemoryFragment, unindexed: Option<&str>) -> Result<FragmentId> {
        Self::validate(&mut fragment)?;
        let id = fragment.id;

        self.with_id_lock(&id, || {
            let cf = self.cf(CF_FRAGMENTS)?;
            if self.with_retry("exists", || self.db.get_pinned_cf(cf, id.as_bytes()))?.is_some() {
                return Err(EngineError::rejected("id", format!("fragment {id} already exists")));
            }

            let mut batch = WriteBatch::default();
            self.write_record(&mut batch, &fragment)?;
            batch.put_cf(
                self.cf(CF_BY_TIME)?,
                time_key(fragment.created_at, id.as_bytes()),
                b"",
            );
            if let Some(reason) = unindexed {
                batch.put_cf(self.cf(CF_UNINDEXED)?, id.as_bytes(), reason.as_bytes());
            }
            self.commit("put", batch)
        })?;

        tracing::debug!(
            fragment_id = %id,
            fragment_type = %fragment.fragment_type,
            tags = fragment.tags.len(),
            "Fragment stored"
        );
        Ok(id)
    }

    /// Fetch a fragment. A miss is `Ok(None)`.
    pub fn get(&self, id: &FragmentId) -> Result<Option<MemoryFragment>> {
        self.read_raw(id)
    }

    pub fn contains(&self, id: &FragmentId) -> Result<bool> {
        let cf = self.cf(CF_FRAGMENTS)?;
        Ok(self
            .with_retry("exists", || self.db.get_pinned_cf(cf, id.as_bytes()))?
            .is_some())
    }

    /// Delete a fragment, its time index entry and any unindexed marker in
    /// one batch. Returns whether the fragment existed.
    pub fn delete(&self, id: &FragmentId) -> Result<bool> {
        self.with_id_lock(id, || self.delete_locked(id))
    }

    /// Delete with the caller already inside [`Self::with_id_lock`]
    pub(crate) fn delete_locked(&self, id: &FragmentId) -> Result<bool> {
        let Some(existing) = self.read_raw(id)? else {
            return Ok(false);
        };

        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_FRAGMENTS)?, id.as_bytes());
        batch.delete_cf(
            self.cf(CF_BY_TIME)?,
            time_key(existing.created_at, id.as_bytes()),
        );
        batch.delete_cf(self.cf(CF_UNINDEXED)?, id.as_bytes());
        self.commit("delete", batch)?;

        tracing::debug!(fragment_id = %id, "Fragment deleted");
        Ok(true)
    }

    /// Record an access: bump `access_count`, set `last_accessed`, and apply
    /// the reinforcement policy to the stored confidence.
    pub fn update_access(
        &self,
        id: &FragmentId,
        policy: &ReinforcementPolicy,
    ) -> Result<Option<MemoryFragment>> {
        self.with_id_lock(id, || {
            let Some(mut fragment) = self.read_raw(id)? else {
                return Ok(None);
            };
            fragment.access_count = fragment.access_count.saturating_add(1);
            fragment.last_accessed = Utc::now();
            fragment.confidence = policy.reinforce(fragment.confidence);

            let mut batch = WriteBatch::default();
            self.write_record(&mut batch, &fragment)?;
            self.commit("update_access", batch)?;
            Ok(Some(fragment))
        })
    }

    /// Replace a fragment's embedding and clear its unindexed marker
    pub fn set_embedding(&self, id: &FragmentId, embedding: Vec<f32>) -> Result<bool> {
        validate_embedding(&embedding).map_validation_err("embedding")?;

        self.with_id_lock(id, || {
            let Some(mut fragment) = self.read_raw(id)? else {
                return Ok(false);
            };
            fragment.embedding = Some(embedding);

            let mut batch = WriteBatch::default();
            self.write_record(&mut batch, &fragment)?;
            batch.delete_cf(self.cf(CF_UNINDEXED)?, id.as_bytes());
            self.commit("set_embedding", batch)?;
            Ok(true)
        })
    }

    /// Flag a stored fragment for later embedding backfill
    pub fn mark_unindexed(&self, id: &FragmentId, reason: &str) -> Result<()> {
        let cf = self.cf(CF_UNINDEXED)?;
        let opts = self.write_opts();
        self.with_retry("mark_unindexed", || {
            self.db.put_cf_opt(cf, id.as_bytes(), reason.as_bytes(), &opts)
        })?;
        tracing::debug!(fragment_id = %id, reason, "Fragment marked unindexed");
        Ok(())
    }

    pub fn is_unindexed(&self, id: &FragmentId) -> Result<bool> {
        let cf = self.cf(CF_UNINDEXED)?;
        Ok(self
            .with_retry("is_unindexed", || self.db.get_pinned_cf(cf, id.as_bytes()))?
            .is_some())
    }

    /// Ids of fragments awaiting embedding backfill
    pub fn unindexed_ids(&self) -> Result<Vec<FragmentId>> {
        let cf = self.cf(CF_UNINDEXED)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            match item {
                Ok((key, _)) => {
                    if let Some(id) = FragmentId::from_slice(&key) {
                        ids.push(id);
                    }
                }
                Err(e) => {
                    return Err(EngineError::Storage(format!("unindexed scan: {e}")));
                }
            }
        }
        Ok(ids)
    }

    /// Lazily iterate fragments matching `filter`, newest first
    pub fn query(&self, filter: &FragmentFilter) -> Result<FragmentIter<'_>> {
        let range = filter.time.resolve(Utc::now());
        let mut iter = self.scan(range)?;
        iter.filter = filter.clone();
        iter.remaining = filter.limit;
        Ok(iter)
    }

    /// Lazily iterate all fragments in `range` (or all), newest first
    pub fn scan(&self, range: Option<TimeRange>) -> Result<FragmentIter<'_>> {
        let cf = self.cf(CF_BY_TIME)?;
        let inner = match range {
            Some(r) => {
                let mut upper = [0xFFu8; 24];
                upper[..8].copy_from_slice(&millis(r.end).to_be_bytes());
                self.db
                    .iterator_cf(cf, IteratorMode::From(&upper, Direction::Reverse))
            }
            None => self.db.iterator_cf(cf, IteratorMode::End),
        };
        Ok(FragmentIter {
            store: self,
            inner,
            range,
            start_millis: range.map(|r| millis(r.start)).unwrap_or(0),
            filter: FragmentFilter::default(),
            remaining: None,
            done: range.map(|r| r.is_empty()).unwrap_or(false),
        })
    }

    /// Number of stored fragments
    pub fn count(&self) -> Result<usize> {
        let cf = self.cf(CF_BY_TIME)?;
        let mut n = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item.map_err(|e| EngineError::Storage(format!("count: {e}")))?;
            n += 1;
        }
        Ok(n)
    }

    /// Tag frequencies across every stored fragment
    pub fn tag_histogram(&self) -> Result<HashMap<String, usize>> {
        let mut histogram = HashMap::new();
        for fragment in self.scan(None)? {
            for tag in fragment.tags {
                *histogram.entry(tag).or_insert(0) += 1;
            }
        }
        Ok(histogram)
    }

    /// Ids of fragments the retention policy removes at `now`
    pub fn retention_candidates(
        &self,
        retention: &RetentionConfig,
        now: DateTime<Utc>,
    ) -> Result<Vec<FragmentId>> {
        if !retention.is_enabled() {
            return Ok(Vec::new());
        }
        let cutoff = retention
            .max_age_days
            .map(|days| now - Duration::days(i64::from(days)));

        Ok(self
            .scan(None)?
            .filter(|f| {
                let too_old = cutoff.map(|c| f.created_at < c).unwrap_or(false);
                let too_weak = retention
                    .min_confidence
                    .map(|min| f.confidence < min)
                    .unwrap_or(false);
                too_old || too_weak
            })
            .map(|f| f.id)
            .collect())
    }

    /// Apply the retention policy, returning the ids actually removed
    pub fn purge(&self, retention: &RetentionConfig) -> Result<Vec<FragmentId>> {
        let candidates = self.retention_candidates(retention, Utc::now())?;
        let mut removed = Vec::with_capacity(candidates.len());
        for id in candidates {
            if self.delete(&id)? {
                removed.push(id);
            }
        }
        if !removed.is_empty() {
            tracing::info!(removed = removed.len(), "Retention purge complete");
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Reflection reports (append-only)
    // ------------------------------------------------------------------------

    /// Persist a report. Existing report keys are never overwritten.
    pub fn append_report(&self, report: &ReflectionReport) -> Result<()> {
        let cf = self.cf(CF_REPORTS)?;
        let key = time_key(report.generated_at, report.id.as_bytes());
        if self.with_retry("report_exists", || self.db.get_pinned_cf(cf, key))?.is_some() {
            return Err(EngineError::rejected(
                "report",
                format!("report {} already persisted", report.id),
            ));
        }
        let value = bincode::serde::encode_to_vec(report, bincode::config::standard())
            .map_err(|e| EngineError::Storage(format!("Failed to serialize report: {e}")))?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf, key, value);
        self.commit("append_report", batch)?;

        tracing::debug!(report_id = %report.id, kind = %report.kind, "Reflection report persisted");
        Ok(())
    }

    fn decode_report(data: &[u8]) -> Option<ReflectionReport> {
        match bincode::serde::decode_from_slice::<ReflectionReport, _>(
            data,
            bincode::config::standard(),
        ) {
            Ok((report, _)) => Some(report),
            Err(e) => {
                tracing::warn!("Skipping undecodable reflection report: {}", e);
                None
            }
        }
    }

    /// Reports generated within `range`, oldest first
    pub fn reports(&self, range: TimeRange) -> Result<Vec<ReflectionReport>> {
        let cf = self.cf(CF_REPORTS)?;
        let mut lower = [0u8; 24];
        lower[..8].copy_from_slice(&millis(range.start).to_be_bytes());

        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&lower, Direction::Forward))
        {
            let (key, value) = item.map_err(|e| EngineError::Storage(format!("reports: {e}")))?;
            let Some((ms, _)) = split_time_key(&key) else {
                continue;
            };
            if ms > millis(range.end) {
                break;
            }
            if let Some(report) = Self::decode_report(&value) {
                if range.contains(report.generated_at) {
                    out.push(report);
                }
            }
        }
        Ok(out)
    }

    pub fn get_report(&self, id: &Uuid) -> Result<Option<ReflectionReport>> {
        let cf = self.cf(CF_REPORTS)?;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| EngineError::Storage(format!("reports: {e}")))?;
            if let Some((_, id_bytes)) = split_time_key(&key) {
                if id_bytes == id.as_bytes() {
                    return Ok(Self::decode_report(&value));
                }
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------------
    // Index generation metadata
    // ------------------------------------------------------------------------

    fn get_meta_u64(&self, key: &str) -> Result<Option<u64>> {
        let cf = self.cf(CF_META)?;
        let value = self.with_retry("get_meta", || self.db.get_cf(cf, key.as_bytes()))?;
        Ok(value.and_then(|v| {
            let bytes: [u8; 8] = v.as_slice().try_into().ok()?;
            Some(u64::from_be_bytes(bytes))
        }))
    }

    /// Dimension and generation of the persisted embedding index, if any
    pub fn index_generation(&self) -> Result<Option<(usize, u64)>> {
        let dim = self.get_meta_u64(META_INDEX_DIMENSION)?;
        let generation = self.get_meta_u64(META_INDEX_GENERATION)?.unwrap_or(0);
        Ok(dim.map(|d| (d as usize, generation)))
    }

    pub fn index_dimension(&self) -> Result<Option<usize>> {
        Ok(self.index_generation()?.map(|(dim, _)| dim))
    }

    pub fn set_index_generation(&self, dimension: usize, generation: u64) -> Result<()> {
        let cf = self.cf(CF_META)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, META_INDEX_DIMENSION, (dimension as u64).to_be_bytes());
        batch.put_cf(cf, META_INDEX_GENERATION, generation.to_be_bytes());
        self.commit("set_index_generation", batch)
    }

    /// Flush memtables to disk
    pub fn flush(&self) -> Result<()> {
        for name in ALL_CFS {
            let cf = self.cf(name)?;
            self.with_retry("flush", || self.db.flush_cf(cf))?;
        }
        tracing::info!(path = ?self.storage_path, "Fragment store flushed");
        Ok(())
    }
}

/// Lazy, newest-first iterator over stored fragments
///
/// Reads one fragment per step from a RocksDB snapshot-consistent iterator.
/// Records that fail to decode are logged and skipped.
pub struct FragmentIter<'a> {
    store: &'a FragmentStore,
    inner: DBIteratorWithThreadMode<'a, DB>,
    range: Option<TimeRange>,
    start_millis: u64,
    filter: FragmentFilter,
    remaining: Option<usize>,
    done: bool,
}

impl Iterator for FragmentIter<'_> {
    type Item = MemoryFragment;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining == Some(0) {
            return None;
        }
        loop {
            let (key, _) = match self.inner.next()? {
                Ok(kv) => kv,
                Err(e) => {
                    tracing::warn!("Time index iterator error (stopping scan): {}", e);
                    self.done = true;
                    return None;
                }
            };
            let Some((ms, id_bytes)) = split_time_key(&key) else {
                continue;
            };
            if ms < self.start_millis {
                self.done = true;
                return None;
            }
            let Some(id) = FragmentId::from_slice(id_bytes) else {
                continue;
            };
            let fragment = match self.store.read_raw(&id) {
                Ok(Some(f)) => f,
                // Deleted after the iterator was created
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(fragment_id = %id, "Skipping unreadable fragment: {}", e);
                    continue;
                }
            };
            if let Some(range) = &self.range {
                if !range.contains(fragment.created_at) {
                    continue;
                }
            }
            if !self.filter.matches(&fragment) {
                continue;
            }
            if let Some(n) = self.remaining.as_mut() {
                *n -= 1;
            }
            return Some(fragment);
        }
    }
}
