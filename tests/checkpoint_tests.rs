//! Integration tests for checkpoint creation, retention and restore

use safechunk_core::{ChunkEngine, ChunkPayload, EngineOptions};
use serde_json::{json, Value};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn obj(value: Value) -> ChunkPayload {
    match value {
        Value::Object(map) => map,
        _ => panic!("test payload must be an object"),
    }
}

fn options(temp: &TempDir) -> EngineOptions {
    EngineOptions {
        debounce_delay: Duration::from_millis(100),
        ..EngineOptions::at_root(temp.path())
    }
}

#[test]
fn test_retention_keeps_only_most_recent_archives() {
    let temp = TempDir::new().unwrap();
    let (mut engine, _) = ChunkEngine::create("p", options(&temp)).unwrap();
    engine.stage_update(&obj(json!({"v": 1})), "k").unwrap();

    let first = engine.create_checkpoint("a", "", Some(2)).unwrap();
    let second = engine.create_checkpoint("a", "", Some(2)).unwrap();
    let third = engine.create_checkpoint("a", "", Some(2)).unwrap();

    let zips: Vec<String> = fs::read_dir(temp.path().join("p/checkpoints"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.ends_with(".zip"))
        .collect();

    assert_eq!(zips.len(), 2);
    assert!(zips.contains(&second));
    assert!(zips.contains(&third));
    assert!(!zips.contains(&first));

    engine.detach().unwrap();
}

#[test]
fn test_checkpoint_then_restore_is_identity() {
    let temp = TempDir::new().unwrap();
    let (mut engine, _) = ChunkEngine::create("p", options(&temp)).unwrap();

    engine
        .stage_update(&obj(json!({"name": "Alice", "level": 3})), "profile")
        .unwrap();
    engine
        .stage_update(&obj(json!({"theme": "dark"})), "settings")
        .unwrap();
    engine.force_sync().unwrap();

    let name = engine.create_checkpoint("baseline", "pre-restore", None).unwrap();

    let before_profile = fs::read_to_string(temp.path().join("p/chunks/profile.json")).unwrap();
    let before_settings = fs::read_to_string(temp.path().join("p/chunks/settings.json")).unwrap();

    engine.restore_checkpoint(&name).unwrap();

    let after_profile = fs::read_to_string(temp.path().join("p/chunks/profile.json")).unwrap();
    let after_settings = fs::read_to_string(temp.path().join("p/chunks/settings.json")).unwrap();
    assert_eq!(before_profile, after_profile);
    assert_eq!(before_settings, after_settings);

    engine.detach().unwrap();
}

#[test]
fn test_restore_rolls_back_later_writes() {
    let temp = TempDir::new().unwrap();
    let (mut engine, _) = ChunkEngine::create("p", options(&temp)).unwrap();

    engine.stage_update(&obj(json!({"v": 1})), "k").unwrap();
    let name = engine.create_checkpoint("v1", "", None).unwrap();

    engine.stage_update(&obj(json!({"v": 2})), "k").unwrap();
    engine.force_sync().unwrap();
    assert_eq!(Value::Object(engine.fetch_chunk("k").unwrap()), json!({"v": 2}));

    engine.restore_checkpoint(&name).unwrap();
    assert_eq!(Value::Object(engine.fetch_chunk("k").unwrap()), json!({"v": 1}));
    assert!(engine.is_active());

    engine.detach().unwrap();
}

#[test]
fn test_create_checkpoint_flushes_staged_data_first() {
    let temp = TempDir::new().unwrap();
    let mut opts = options(&temp);
    opts.debounce_delay = Duration::from_secs(3600);

    let (mut engine, _) = ChunkEngine::create("p", opts).unwrap();
    engine.stage_update(&obj(json!({"pending": true})), "k").unwrap();

    // the checkpoint must contain the staged-but-unsynced chunk
    let name = engine.create_checkpoint("snap", "", None).unwrap();

    engine.stage_update(&obj(json!({"pending": false})), "k").unwrap();
    engine.force_sync().unwrap();
    engine.restore_checkpoint(&name).unwrap();

    assert_eq!(
        Value::Object(engine.fetch_chunk("k").unwrap()),
        json!({"pending": true})
    );
    engine.detach().unwrap();
}

#[test]
fn test_listing_reports_manifest_fields() {
    let temp = TempDir::new().unwrap();
    let (mut engine, _) = ChunkEngine::create("p", options(&temp)).unwrap();
    engine.stage_update(&obj(json!({"v": 1})), "k").unwrap();

    let older = engine.create_checkpoint("older", "first", None).unwrap();
    let newer = engine.create_checkpoint("newer", "second", None).unwrap();

    let listed = engine.list_checkpoints().unwrap();
    assert_eq!(listed.len(), 2);

    // newest first
    assert_eq!(listed[0].name, newer);
    assert_eq!(listed[0].label, "newer");
    assert_eq!(listed[1].name, older);
    assert_eq!(listed[1].label, "older");
    assert!(listed.iter().all(|c| c.bytes > 0));

    engine.detach().unwrap();
}

#[test]
fn test_backups_travel_with_the_archive() {
    let temp = TempDir::new().unwrap();
    let (mut engine, _) = ChunkEngine::create("p", options(&temp)).unwrap();

    engine.stage_update(&obj(json!({"v": 1})), "k").unwrap();
    engine.force_sync().unwrap();
    engine.stage_update(&obj(json!({"v": 2})), "k").unwrap();
    engine.force_sync().unwrap();

    let name = engine.create_checkpoint("full", "", None).unwrap();

    // wipe both trees by restoring; the backup file must come back too
    engine.restore_checkpoint(&name).unwrap();
    let bak = temp.path().join("p/chunks_bak/k.bak");
    assert!(bak.exists());

    let bak_value: Value = serde_json::from_str(&fs::read_to_string(&bak).unwrap()).unwrap();
    assert_eq!(bak_value, json!({"v": 1}));

    engine.detach().unwrap();
}
