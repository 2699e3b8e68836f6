//! Integration tests for the journey recorder
//!
//! Each test records into its own temporary log directory.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};

use journey_telemetry::config::RecorderConfig;
use journey_telemetry::error::{StorageError, StorageResult};
use journey_telemetry::journey::{Journey, JourneyStatus, StageKind};
use journey_telemetry::recorder::{JourneyRecorder, RecordOutcome, ToolOutcome};
use journey_telemetry::storage::{ArtifactKind, AuditEntry, FileJourneyStore, JourneyStore};
use journey_telemetry::JourneyAnalyzer;

fn setup(config: RecorderConfig) -> (TempDir, Arc<FileJourneyStore>, JourneyRecorder) {
    let dir = tempdir().expect("Failed to create temp dir");
    let store = Arc::new(FileJourneyStore::new(dir.path()));
    let recorder = JourneyRecorder::new(store.clone(), config);
    (dir, store, recorder)
}

fn count_files(dir: &std::path::Path, prefix: &str) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
                .count()
        })
        .unwrap_or(0)
}

/// Delegates to a real store but can be told to fail journey writes.
struct FailingStore {
    inner: FileJourneyStore,
    fail_saves: AtomicBool,
}

#[async_trait]
impl JourneyStore for FailingStore {
    async fn initialize(&self) -> StorageResult<()> {
        self.inner.initialize().await
    }

    async fn save_journey(&self, journey: &Journey) -> StorageResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Io {
                path: "requests".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.save_journey(journey).await
    }

    async fn load_journey(&self, id: &str) -> StorageResult<Option<Journey>> {
        self.inner.load_journey(id).await
    }

    async fn journey_ids(&self) -> StorageResult<Vec<String>> {
        self.inner.journey_ids().await
    }

    async fn save_artifact(&self, kind: ArtifactKind, name: &str, body: &Value) -> StorageResult<()> {
        self.inner.save_artifact(kind, name, body).await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> StorageResult<()> {
        self.inner.append_audit(entry).await
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        self.inner.prune_before(cutoff).await
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_persists_in_progress_journey() {
    let (_dir, store, recorder) = setup(RecorderConfig::default());

    let started = recorder.start_journey("Show my leave balance").await;
    assert_eq!(started.outcome, RecordOutcome::Persisted);
    let id = started.journey_id;
    assert!(id.starts_with("JOURNEY_"));

    let journey = store.load_journey(&id).await.unwrap().unwrap();
    assert_eq!(journey.query, "Show my leave balance");
    assert_eq!(journey.status, JourneyStatus::InProgress);
    assert!(journey.ended_at.is_none());
    assert!(journey.total_time.is_none());
    assert!(journey.stages.is_empty());
    assert_eq!(recorder.in_flight_count().await, 1);
}

#[tokio::test]
async fn test_stages_appended_in_call_order() {
    let (_dir, store, recorder) = setup(RecorderConfig::default());
    let id = recorder.start_journey("q").await.journey_id;

    assert!(recorder
        .log_intent_detection(&id, "LEAVE_BALANCE", Some(0.75))
        .await
        .is_persisted());
    assert!(recorder
        .log_rag_retrieval(&id, "q", vec![json!({"name": "leave_api"})], 0.25)
        .await
        .is_persisted());
    assert!(recorder
        .log_tool_execution_start(&id, "leave_api", &json!({"year": 2024}))
        .await
        .is_persisted());

    let journey = store.load_journey(&id).await.unwrap().unwrap();
    let kinds: Vec<StageKind> = journey.stages.iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![
            StageKind::IntentDetected,
            StageKind::RagRetrieval,
            StageKind::ToolExecutionStart
        ]
    );
    assert_eq!(journey.stages[0].str_field("intent"), Some("LEAVE_BALANCE"));
    assert_eq!(journey.stages[1].field("retrieved_docs_count"), Some(&json!(1)));
    assert_eq!(journey.status, JourneyStatus::InProgress);
}

#[tokio::test]
async fn test_full_journey_round_trip_through_analyzer() {
    let (_dir, store, recorder) = setup(RecorderConfig::default());
    let id = recorder.start_journey("Create a ticket for printer").await.journey_id;

    let plan = json!({"tool": "create_ticket", "method": "POST", "body": {"title": "printer"}});
    let _ = recorder.log_intent_detection(&id, "CREATE_TICKET", Some(0.5)).await;
    let _ = recorder.log_rag_retrieval(&id, "printer", vec![], 0.25).await;
    let _ = recorder.log_action_plan(&id, &plan, Some(1.5)).await;
    let _ = recorder
        .log_tool_execution_start(&id, "create_ticket", &json!({"title": "printer"}))
        .await;
    let _ = recorder
        .log_tool_execution_result(
            &id,
            "create_ticket",
            &ToolOutcome::Success(json!({"ticket": 42})),
            0.5,
        )
        .await;
    let outcome = recorder
        .log_journey_completion(&id, &json!({"message": "created"}), 2.5, true)
        .await;
    assert_eq!(outcome, RecordOutcome::Persisted);
    assert_eq!(recorder.in_flight_count().await, 0);

    let from_recorder = recorder.get_journey_log(&id).await.unwrap();
    let from_analyzer = JourneyAnalyzer::new(store.clone())
        .get_journey(&id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from_recorder, from_analyzer);

    assert_eq!(from_analyzer.status, JourneyStatus::Completed);
    assert_eq!(from_analyzer.total_time, Some(2.5));
    assert_eq!(from_analyzer.stages.len(), 6);
    let last = from_analyzer.stages.last().unwrap();
    assert_eq!(last.kind, StageKind::JourneyCompleted);
    assert_eq!(from_analyzer.ended_at, Some(last.timestamp));
}

#[tokio::test]
async fn test_failed_completion_marks_journey_failed() {
    let (_dir, store, recorder) = setup(RecorderConfig::default());
    let id = recorder.start_journey("q").await.journey_id;

    let _ = recorder
        .log_journey_completion(&id, &json!({"error": "no tool"}), 0.5, false)
        .await;

    let journey = store.load_journey(&id).await.unwrap().unwrap();
    assert_eq!(journey.status, JourneyStatus::Failed);
    assert_eq!(
        journey.stages[0].str_field("status"),
        Some("failed")
    );
}

#[tokio::test]
async fn test_stage_after_completion_is_rejected() {
    let (_dir, store, recorder) = setup(RecorderConfig::default());
    let id = recorder.start_journey("q").await.journey_id;
    let _ = recorder.log_journey_completion(&id, &json!({}), 1.0, true).await;

    let outcome = recorder.log_intent_detection(&id, "LATE", None).await;
    assert_eq!(outcome, RecordOutcome::JourneyClosed);

    let again = recorder.log_journey_completion(&id, &json!({}), 1.0, true).await;
    assert_eq!(again, RecordOutcome::JourneyClosed);

    let journey = store.load_journey(&id).await.unwrap().unwrap();
    assert_eq!(journey.stages.len(), 1);
}

#[tokio::test]
async fn test_unknown_journey_is_reported() {
    let (_dir, _store, recorder) = setup(RecorderConfig::default());

    let outcome = recorder
        .log_intent_detection("JOURNEY_20240101_000000_000000_deadbeef", "X", None)
        .await;
    assert_eq!(outcome, RecordOutcome::UnknownJourney);
    assert!(recorder
        .get_journey_log("JOURNEY_20240101_000000_000000_deadbeef")
        .await
        .is_none());
}

// ============================================================================
// Artifacts
// ============================================================================

#[tokio::test]
async fn test_action_plan_and_tool_call_artifacts() {
    let (dir, _store, recorder) = setup(RecorderConfig::default());
    let id = recorder.start_journey("q").await.journey_id;

    let plan = json!({"tool": "search_records", "method": "GET"});
    assert!(recorder.log_action_plan(&id, &plan, None).await.is_persisted());
    let _ = recorder
        .log_tool_execution_result(&id, "search records", &ToolOutcome::Failure("timeout".into()), 3.0)
        .await;
    let _ = recorder
        .log_tool_execution_result(&id, "search records", &ToolOutcome::Success(json!([])), 1.0)
        .await;

    let plan_path = dir
        .path()
        .join("action_plans")
        .join(format!("{}_plan.json", id));
    let saved: Value = serde_json::from_str(&std::fs::read_to_string(plan_path).unwrap()).unwrap();
    assert_eq!(saved, plan);

    let tool_dir = dir.path().join("tool_calls");
    let first = tool_dir.join(format!("{}_01_search_records.json", id));
    let second = tool_dir.join(format!("{}_02_search_records.json", id));
    let first: Value = serde_json::from_str(&std::fs::read_to_string(first).unwrap()).unwrap();
    assert_eq!(first["success"], json!(false));
    assert_eq!(first["error"], json!("timeout"));
    assert!(second.exists());
}

#[tokio::test]
async fn test_log_error_after_completion_still_writes_artifact() {
    let (dir, store, recorder) = setup(RecorderConfig::default());
    let id = recorder.start_journey("q").await.journey_id;
    let _ = recorder.log_journey_completion(&id, &json!({}), 1.0, true).await;

    let outcome = recorder
        .log_error(&id, "ToolError", "late failure", "tool_execution", Some("at line 1"))
        .await;
    assert_eq!(outcome, RecordOutcome::JourneyClosed);

    assert_eq!(count_files(&dir.path().join("errors"), &id), 1);
    let journey = store.load_journey(&id).await.unwrap().unwrap();
    assert_eq!(journey.count_kind(StageKind::Error), 0);
}

#[tokio::test]
async fn test_log_error_records_stage_and_artifact() {
    let (dir, store, recorder) = setup(RecorderConfig::default());
    let id = recorder.start_journey("q").await.journey_id;

    let outcome = recorder
        .log_error(&id, "LLMError", "model timeout", "action_planning", None)
        .await;
    assert!(outcome.is_persisted());

    let journey = store.load_journey(&id).await.unwrap().unwrap();
    let errors = journey.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_type, "LLMError");
    assert_eq!(errors[0].stage, "action_planning");
    assert!(errors[0].stack_trace.is_none());
    assert_eq!(count_files(&dir.path().join("errors"), &format!("{}_action_planning_", id)), 1);
}

#[tokio::test]
async fn test_each_error_on_same_stage_gets_its_own_artifact() {
    let (dir, _store, recorder) = setup(RecorderConfig::default());
    let id = recorder.start_journey("q").await.journey_id;

    for message in ["first", "second", "third"] {
        let _ = recorder
            .log_error(&id, "ToolError", message, "tool_execution", None)
            .await;
    }

    let mut messages: Vec<String> = std::fs::read_dir(dir.path().join("errors"))
        .unwrap()
        .filter_map(Result::ok)
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            assert!(
                name.starts_with(&format!("{}_tool_execution_", id)),
                "unexpected name: {}",
                name
            );
            assert!(name.ends_with("_error.json"), "unexpected name: {}", name);
            let body: Value =
                serde_json::from_str(&std::fs::read_to_string(entry.path()).unwrap()).unwrap();
            body["error_message"].as_str().unwrap().to_string()
        })
        .collect();
    messages.sort();
    assert_eq!(messages, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_log_error_at_stage_limit_keeps_artifact() {
    let config = RecorderConfig {
        max_stages_per_journey: 2,
        ..RecorderConfig::default()
    };
    let (dir, store, recorder) = setup(config);
    let id = recorder.start_journey("q").await.journey_id;
    assert!(recorder.log_intent_detection(&id, "X", None).await.is_persisted());

    let outcome = recorder
        .log_error(&id, "ToolError", "over the limit", "tool_execution", None)
        .await;
    assert_eq!(outcome, RecordOutcome::StageLimitReached { limit: 2 });

    assert_eq!(count_files(&dir.path().join("errors"), &id), 1);
    let journey = store.load_journey(&id).await.unwrap().unwrap();
    assert_eq!(journey.count_kind(StageKind::Error), 0);
}

// ============================================================================
// Bounds
// ============================================================================

#[tokio::test]
async fn test_stage_limit_keeps_room_for_completion() {
    let config = RecorderConfig {
        max_stages_per_journey: 4,
        ..RecorderConfig::default()
    };
    let (_dir, store, recorder) = setup(config);
    let id = recorder.start_journey("q").await.journey_id;

    for _ in 0..3 {
        assert!(recorder.log_intent_detection(&id, "X", None).await.is_persisted());
    }
    let refused = recorder.log_intent_detection(&id, "X", None).await;
    assert_eq!(refused, RecordOutcome::StageLimitReached { limit: 4 });

    assert!(recorder
        .log_journey_completion(&id, &json!({}), 1.0, true)
        .await
        .is_persisted());

    let journey = store.load_journey(&id).await.unwrap().unwrap();
    assert_eq!(journey.stages.len(), 4);
    assert_eq!(journey.status, JourneyStatus::Completed);
}

#[tokio::test]
async fn test_oversized_payload_is_truncated() {
    let config = RecorderConfig {
        max_payload_bytes: 1024,
        ..RecorderConfig::default()
    };
    let (_dir, store, recorder) = setup(config);
    let id = recorder.start_journey("q").await.journey_id;

    let documents: Vec<Value> = (0..100)
        .map(|i| json!({"name": format!("tool_{}", i), "description": "x".repeat(100)}))
        .collect();
    assert!(recorder
        .log_rag_retrieval(&id, "q", documents, 0.25)
        .await
        .is_persisted());

    let journey = store.load_journey(&id).await.unwrap().unwrap();
    let stage = &journey.stages[0];
    assert_eq!(stage.field("retrieved_docs_count"), Some(&json!(100)));
    assert_eq!(stage.field("documents").unwrap()["truncated"], json!(true));
    assert!(serde_json::to_vec(&stage.payload).unwrap().len() <= 1024);
}

#[tokio::test]
async fn test_registry_evicts_oldest_in_progress() {
    let config = RecorderConfig {
        max_in_flight: 2,
        ..RecorderConfig::default()
    };
    let (_dir, store, recorder) = setup(config);

    let first = recorder.start_journey("one").await.journey_id;
    let second = recorder.start_journey("two").await.journey_id;
    let third = recorder.start_journey("three").await.journey_id;
    assert_eq!(recorder.in_flight_count().await, 2);

    let outcome = recorder.log_intent_detection(&first, "X", None).await;
    assert_eq!(outcome, RecordOutcome::UnknownJourney);
    assert!(recorder.log_intent_detection(&second, "X", None).await.is_persisted());
    assert!(recorder.log_intent_detection(&third, "X", None).await.is_persisted());

    let evicted = store.load_journey(&first).await.unwrap().unwrap();
    assert_eq!(evicted.status, JourneyStatus::InProgress);
}

// ============================================================================
// Persistence faults
// ============================================================================

#[tokio::test]
async fn test_persist_failure_keeps_in_memory_state() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FailingStore {
        inner: FileJourneyStore::new(dir.path()),
        fail_saves: AtomicBool::new(false),
    });
    let recorder = JourneyRecorder::new(store.clone(), RecorderConfig::default());

    let id = recorder.start_journey("q").await.journey_id;
    store.fail_saves.store(true, Ordering::SeqCst);
    let outcome = recorder.log_intent_detection(&id, "X", Some(0.5)).await;
    assert!(matches!(outcome, RecordOutcome::PersistFailed { .. }));

    let in_memory = recorder.get_journey_log(&id).await.unwrap();
    assert_eq!(in_memory.stages.len(), 2);
    assert_eq!(in_memory.stages[0].kind, StageKind::IntentDetected);
    let errors = in_memory.errors();
    assert_eq!(errors[0].error_type, "PersistenceError");
    assert_eq!(errors[0].stage, "INTENT_DETECTED");

    store.fail_saves.store(false, Ordering::SeqCst);
    assert!(recorder
        .log_tool_execution_start(&id, "t", &json!({}))
        .await
        .is_persisted());

    let on_disk = store.load_journey(&id).await.unwrap().unwrap();
    assert_eq!(on_disk.stages.len(), 3);
    assert_eq!(on_disk.stages[2].kind, StageKind::ToolExecutionStart);
}

#[tokio::test]
async fn test_start_reports_failed_initial_write() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FailingStore {
        inner: FileJourneyStore::new(dir.path()),
        fail_saves: AtomicBool::new(true),
    });
    let recorder = JourneyRecorder::new(store.clone(), RecorderConfig::default());

    let started = recorder.start_journey("Leave request").await;
    assert!(matches!(started.outcome, RecordOutcome::PersistFailed { .. }));
    let id = started.journey_id;
    assert!(store.load_journey(&id).await.unwrap().is_none());

    let in_memory = recorder.get_journey_log(&id).await.unwrap();
    let errors = in_memory.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_type, "PersistenceError");
    assert_eq!(errors[0].stage, "JOURNEY_START");

    store.fail_saves.store(false, Ordering::SeqCst);
    assert!(recorder
        .log_intent_detection(&id, "LEAVE", Some(0.5))
        .await
        .is_persisted());

    let on_disk = store.load_journey(&id).await.unwrap().unwrap();
    let kinds: Vec<StageKind> = on_disk.stages.iter().map(|s| s.kind).collect();
    assert_eq!(kinds, vec![StageKind::Error, StageKind::IntentDetected]);
}

#[tokio::test]
async fn test_failed_completion_write_keeps_journey_readable() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FailingStore {
        inner: FileJourneyStore::new(dir.path()),
        fail_saves: AtomicBool::new(false),
    });
    let recorder = JourneyRecorder::new(store.clone(), RecorderConfig::default());
    let id = recorder.start_journey("q").await.journey_id;

    store.fail_saves.store(true, Ordering::SeqCst);
    let outcome = recorder.log_journey_completion(&id, &json!({}), 1.0, true).await;
    assert!(matches!(outcome, RecordOutcome::PersistFailed { .. }));
    assert_eq!(recorder.in_flight_count().await, 1);

    let journey = recorder.get_journey_log(&id).await.unwrap();
    assert_eq!(journey.status, JourneyStatus::Completed);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_get_unique_ids() {
    let (_dir, store, recorder) = setup(RecorderConfig::default());

    let handles: Vec<_> = (0..64)
        .map(|i| {
            let recorder = recorder.clone();
            tokio::spawn(async move { recorder.start_journey(format!("query {}", i)).await.journey_id })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap());
    }
    assert_eq!(ids.len(), 64);
    assert_eq!(store.journey_ids().await.unwrap().len(), 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stages_on_one_journey_are_all_kept() {
    let (_dir, store, recorder) = setup(RecorderConfig::default());
    let id = recorder.start_journey("q").await.journey_id;

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let recorder = recorder.clone();
            let id = id.clone();
            tokio::spawn(async move {
                recorder
                    .log_tool_execution_start(&id, &format!("tool_{}", i), &json!({}))
                    .await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_persisted());
    }

    let journey = store.load_journey(&id).await.unwrap().unwrap();
    assert_eq!(journey.stages.len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_action_plans_publish_whole_documents() {
    let (dir, _store, recorder) = setup(RecorderConfig::default());
    let id = recorder.start_journey("q").await.journey_id;

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let recorder = recorder.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let plan = json!({"tool": "search", "attempt": i, "padding": "x".repeat(4096)});
                recorder.log_action_plan(&id, &plan, None).await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_persisted());
    }

    let plan_dir = dir.path().join("action_plans");
    let names: Vec<String> = std::fs::read_dir(&plan_dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![format!("{}_plan.json", id)]);

    let saved: Value =
        serde_json::from_str(&std::fs::read_to_string(plan_dir.join(&names[0])).unwrap()).unwrap();
    assert_eq!(saved["tool"], json!("search"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_audit_lines_are_well_formed() {
    let (dir, _store, recorder) = setup(RecorderConfig::default());

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let recorder = recorder.clone();
            tokio::spawn(async move {
                let id = recorder.start_journey(format!("multi\nline {}", i)).await.journey_id;
                let _ = recorder.log_intent_detection(&id, "X", Some(0.5)).await;
                let _ = recorder.log_journey_completion(&id, &json!({}), 0.5, true).await;
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let audit = std::fs::read_to_string(dir.path().join("audit.log")).unwrap();
    let lines: Vec<&str> = audit.lines().collect();
    assert_eq!(lines.len(), 60);
    for line in lines {
        assert!(line.starts_with('['), "malformed line: {}", line);
        assert!(line.contains("] [INFO] ["), "malformed line: {}", line);
        assert!(line.contains("Journey=JOURNEY_"), "malformed line: {}", line);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_initialize_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileJourneyStore::new(dir.path().join("nested").join("logs")));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.initialize().await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    for sub in ["requests", "action_plans", "tool_calls", "errors"] {
        assert!(store.root().join(sub).is_dir(), "missing {}", sub);
    }
}
