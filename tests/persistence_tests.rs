//! Persistence across engine restarts
//!
//! - Fragments, reports and access bookkeeping survive close/reopen
//! - The index is rebuilt from the store on open
//! - A new embedding dimension starts a new index generation

use tempfile::TempDir;

use lucid_memory::config::EngineConfig;
use lucid_memory::memory::{FragmentFilter, FragmentType, MemoryEngine, QueryContext, TimeRange};

fn open(dir: &TempDir) -> MemoryEngine {
    MemoryEngine::open(EngineConfig::with_storage_path(dir.path())).expect("Failed to open engine")
}

fn open_with_dimension(dir: &TempDir, dimension: usize) -> MemoryEngine {
    let mut config = EngineConfig::with_storage_path(dir.path());
    config.embedding.local_dimension = dimension;
    MemoryEngine::open(config).expect("Failed to open engine")
}

#[test]
fn test_fragments_survive_restart() {
    let dir = TempDir::new().unwrap();
    let long_content = "incident timeline entry ".repeat(400);

    let (short_id, long_id, original) = {
        let engine = open(&dir);
        let short_id = engine
            .remember("Backups run nightly at 02:00 UTC", ["ops"], FragmentType::Knowledge, Some(0.8))
            .unwrap();
        let long_id = engine
            .remember(long_content.clone(), ["incident"], FragmentType::Event, None)
            .unwrap();
        let original = engine.get(&short_id).unwrap().unwrap();
        engine.close().unwrap();
        (short_id, long_id, original)
    };

    let engine = open(&dir);
    let restored = engine.get(&short_id).unwrap().expect("fragment persisted");
    assert_eq!(restored, original);
    assert_eq!(engine.get(&long_id).unwrap().unwrap().content, long_content);

    let stats = engine.stats();
    assert_eq!(stats.indexed_vectors, 2);
    assert_eq!(stats.lexical_documents, 2);

    let answer = engine.answer("when do backups run", &QueryContext::default());
    assert!(answer.sources.contains(&short_id));
}

#[test]
fn test_access_bookkeeping_survives_restart() {
    let dir = TempDir::new().unwrap();
    let id = {
        let engine = open(&dir);
        let id = engine
            .remember("Use feature flags for risky launches", ["launch"], FragmentType::Preference, Some(0.5))
            .unwrap();
        engine.recall(&FragmentFilter::new().with_tags(["launch"])).unwrap();
        engine.recall(&FragmentFilter::new().with_tags(["launch"])).unwrap();
        engine.close().unwrap();
        id
    };

    let engine = open(&dir);
    let fragment = engine.get(&id).unwrap().unwrap();
    assert_eq!(fragment.access_count, 2);
    assert!(fragment.confidence > 0.5);
}

#[test]
fn test_reports_survive_restart() {
    let dir = TempDir::new().unwrap();
    let report = {
        let engine = open(&dir);
        let report = engine.reflect(TimeRange::last(chrono::Duration::hours(1))).unwrap();
        engine.close().unwrap();
        report
    };

    let engine = open(&dir);
    assert_eq!(engine.reports(TimeRange::all()).unwrap(), vec![report]);
}

#[test]
fn test_forgotten_fragment_stays_gone() {
    let dir = TempDir::new().unwrap();
    let id = {
        let engine = open(&dir);
        let id = engine
            .remember("Obsolete VPN instructions", ["it"], FragmentType::Knowledge, None)
            .unwrap();
        assert!(engine.forget(&id).unwrap());
        engine.close().unwrap();
        id
    };

    let engine = open(&dir);
    assert!(engine.get(&id).unwrap().is_none());
    assert_eq!(engine.stats().lexical_documents, 0);
}

#[test]
fn test_same_dimension_keeps_generation() {
    let dir = TempDir::new().unwrap();
    let generation = {
        let engine = open_with_dimension(&dir, 64);
        engine
            .remember("Stable generation check", ["meta"], FragmentType::Knowledge, None)
            .unwrap();
        let generation = engine.stats().index_generation;
        engine.close().unwrap();
        generation
    };

    let engine = open_with_dimension(&dir, 64);
    assert_eq!(engine.stats().index_generation, generation);
    assert_eq!(engine.stats().indexed_vectors, 1);
}

#[test]
fn test_dimension_change_starts_new_generation() {
    let dir = TempDir::new().unwrap();
    let (id, generation) = {
        let engine = open_with_dimension(&dir, 64);
        let id = engine
            .remember("Embedded with the small model", ["meta"], FragmentType::Knowledge, None)
            .unwrap();
        let generation = engine.stats().index_generation;
        engine.close().unwrap();
        (id, generation)
    };

    let engine = open_with_dimension(&dir, 128);
    let stats = engine.stats();
    assert!(stats.index_generation > generation);
    assert_eq!(stats.indexed_vectors, 0);
    assert!(engine.store().is_unindexed(&id).unwrap());

    let summary = engine.run_maintenance().unwrap();
    assert_eq!(summary.backfilled, 1);
    assert_eq!(summary.purged, 0);
    assert_eq!(engine.stats().indexed_vectors, 1);
    assert_eq!(engine.get(&id).unwrap().unwrap().embedding.map(|v| v.len()), Some(128));
    assert_eq!(engine.store().index_dimension().unwrap(), Some(128));
}
