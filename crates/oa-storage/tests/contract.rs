//! Behaviour every backend must share, checked against each adapter.

use std::sync::Arc;
use std::thread;

use oa_storage::{
    ChangeKind, EncryptedJsonStorage, JsonFileStorage, KvStorage, KvStorageWithHistory,
    MemoryKvClient, MemoryStorage, SqliteStorage, SqliteStorageWithHistory, StorageBackend,
};
use serde_json::{json, Value};
use tempfile::TempDir;

fn all_backends(dir: &TempDir) -> Vec<Arc<dyn StorageBackend>> {
    let kv = Arc::new(MemoryKvClient::new());
    vec![
        Arc::new(MemoryStorage::new()),
        Arc::new(JsonFileStorage::new(dir.path().join("state.json"))),
        Arc::new(SqliteStorage::open(dir.path().join("plain.db")).unwrap()),
        Arc::new(SqliteStorageWithHistory::open(dir.path().join("history.db")).unwrap()),
        Arc::new(KvStorage::new(kv.clone(), "plain:")),
        Arc::new(KvStorageWithHistory::new(kv, "hist:", 50)),
        Arc::new(
            EncryptedJsonStorage::with_iterations(dir.path().join("state.enc"), "pw", 1_000)
                .unwrap(),
        ),
    ]
}

fn history_backends(dir: &TempDir) -> Vec<Arc<dyn StorageBackend>> {
    all_backends(dir)
        .into_iter()
        .filter(|b| b.supports_history())
        .collect()
}

fn sample_document() -> Value {
    json!({
        "version": 1,
        "plan": {
            "goal": "Build a REST API",
            "phases": [
                {"name": "Design", "status": "completed", "notes": [], "started_at": null, "completed_at": null},
                {"name": "Implement", "status": "in_progress", "notes": [], "started_at": null, "completed_at": null}
            ],
            "status": "active",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        },
        "notes": [{"content": "Unicode ✓ 日本語", "section": "general", "timestamp": "2026-01-01T00:00:00Z"}],
        "decisions": [],
        "errors": []
    })
}

#[test]
fn every_backend_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    for backend in all_backends(&dir) {
        assert!(!backend.exists().unwrap(), "{} starts empty", backend.name());
        assert!(backend.load().unwrap().is_none(), "{}", backend.name());

        backend.save(&sample_document()).unwrap();
        assert!(backend.exists().unwrap(), "{}", backend.name());
        assert_eq!(
            backend.load().unwrap(),
            Some(sample_document()),
            "{} round trip",
            backend.name()
        );

        backend.save(&json!({"version": 1, "notes": []})).unwrap();
        assert_eq!(
            backend.load().unwrap(),
            Some(json!({"version": 1, "notes": []})),
            "{} overwrite",
            backend.name()
        );

        backend.clear().unwrap();
        assert!(!backend.exists().unwrap(), "{} cleared", backend.name());
        assert!(backend.load().unwrap().is_none(), "{}", backend.name());
        backend.clear().unwrap();
    }
}

#[test]
fn concurrent_saves_leave_one_complete_document() {
    let dir = tempfile::tempdir().unwrap();
    for backend in all_backends(&dir) {
        let handles: Vec<_> = (0..4)
            .map(|writer| {
                let backend = Arc::clone(&backend);
                thread::spawn(move || {
                    for i in 0..10 {
                        backend
                            .save(&json!({"writer": writer, "i": i, "pad": "x".repeat(256)}))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let loaded = backend.load().unwrap().expect("document present");
        let writer = loaded["writer"].as_u64().unwrap();
        let i = loaded["i"].as_u64().unwrap();
        assert!(writer < 4 && i < 10, "{} loaded {loaded}", backend.name());
        assert_eq!(loaded["pad"].as_str().unwrap().len(), 256);
    }
}

#[test]
fn history_tags_create_update_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    for backend in history_backends(&dir) {
        backend.save(&json!({"step": 1})).unwrap();
        backend.save(&json!({"step": 2})).unwrap();
        backend.save(&json!({})).unwrap();

        let history = backend.history(10).unwrap();
        let kinds: Vec<_> = history.iter().map(|e| e.change_kind).collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Clear, ChangeKind::Update, ChangeKind::Create],
            "{}",
            backend.name()
        );
        assert_eq!(history[1].old_data, Some(json!({"step": 1})));
        assert_eq!(history[2].old_data, None);
        assert!(history[0].version > history[1].version);
    }
}

#[test]
fn clear_resets_history_and_next_save_is_create() {
    let dir = tempfile::tempdir().unwrap();
    for backend in history_backends(&dir) {
        backend.save(&json!({"a": 1})).unwrap();
        backend.save(&json!({"a": 2})).unwrap();
        backend.clear().unwrap();
        assert!(backend.history(10).unwrap().is_empty(), "{}", backend.name());

        backend.save(&json!({"a": 3})).unwrap();
        let history = backend.history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change_kind, ChangeKind::Create, "{}", backend.name());
    }
}

#[test]
fn rollback_zero_restores_first_document() {
    let dir = tempfile::tempdir().unwrap();
    for backend in history_backends(&dir) {
        backend.save(&json!({"doc": "first"})).unwrap();
        backend.save(&json!({"doc": "second"})).unwrap();

        let restored = backend.rollback(0).unwrap();
        assert_eq!(restored, Some(json!({"doc": "first"})), "{}", backend.name());
        assert_eq!(backend.load().unwrap(), Some(json!({"doc": "first"})));

        let history = backend.history(10).unwrap();
        assert_eq!(history.len(), 3, "{}", backend.name());
        assert_eq!(history[0].data, json!({"doc": "first"}));
        assert_eq!(history[0].old_data, Some(json!({"doc": "second"})));
    }
}

#[test]
fn backends_without_history_refuse_rollback() {
    let dir = tempfile::tempdir().unwrap();
    for backend in all_backends(&dir)
        .into_iter()
        .filter(|b| !b.supports_history())
    {
        backend.save(&json!({"a": 1})).unwrap();
        assert!(backend.history(10).unwrap().is_empty());
        assert!(backend.rollback(0).is_err(), "{}", backend.name());
    }
}
