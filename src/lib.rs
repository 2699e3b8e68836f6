//! # Journey Telemetry
//!
//! Per-request journey tracing for a natural-language routing pipeline.
//! Each incoming query gets a correlation ID; every pipeline stage (intent
//! detection, retrieval, action planning, tool execution, errors and
//! completion) is appended to that journey and persisted as it happens.
//!
//! ## Architecture
//!
//! ```text
//! Pipeline → JourneyRecorder → JourneyStore (files)
//!                                   ↑
//!              CLI → JourneyAnalyzer
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use journey_telemetry::{Config, FileJourneyStore, JourneyRecorder};
//!
//! let config = Config::from_env()?;
//! let store = Arc::new(FileJourneyStore::from_config(&config.storage));
//! let recorder = JourneyRecorder::new(store, config.recorder.clone());
//!
//! let id = recorder.start_journey("Show my leave balance").await.journey_id;
//! let _ = recorder.log_intent_detection(&id, "LEAVE_BALANCE", Some(0.93)).await;
//! let _ = recorder
//!     .log_journey_completion(&id, &serde_json::json!({"ok": true}), 1.2, true)
//!     .await;
//! ```

/// Read-only queries and reports over persisted journeys.
pub mod analyzer;
/// Inspection commands for the `journey` binary.
pub mod cli;
/// Configuration loaded from environment variables.
pub mod config;
/// Error types and result aliases.
pub mod error;
/// Journey data model.
pub mod journey;
/// The write path: ID allocation, stage recording and persistence.
pub mod recorder;
/// Storage trait and the filesystem backend.
pub mod storage;

pub use analyzer::{ErrorAggregate, JourneyAnalyzer, JourneyStats, StageDurations, TimelineEntry};
pub use config::Config;
pub use error::{AnalyzerError, AnalyzerResult, AppError, AppResult, StorageError, StorageResult};
pub use journey::{ErrorRecord, Journey, JourneyStatus, JourneySummary, StageEvent, StageKind};
pub use recorder::{JourneyRecorder, RecordOutcome, StartedJourney, ToolOutcome};
pub use storage::{FileJourneyStore, JourneyStore};
