//! Journey analyzer: read-only queries over persisted journeys.
//!
//! Aggregate queries skip records that fail to parse and keep going;
//! direct lookups surface them as [`AnalyzerError::CorruptRecord`].
//! An unknown ID is reported as `Ok(None)`, never as an empty success.

mod csv;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AnalyzerError, AnalyzerResult};
use crate::journey::{ErrorRecord, Journey, JourneyStatus, JourneySummary, StageKind};
use crate::storage::{validate_journey_id, write_atomic, JourneyStore};

/// A stage positioned relative to the start of its journey.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub kind: StageKind,
    pub timestamp: DateTime<Utc>,
    /// Seconds since the journey started.
    pub offset_seconds: f64,
    /// Seconds since the previous stage (or the start, for the first stage).
    pub since_previous_seconds: f64,
}

/// Wall-clock breakdown of a journey.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageDurations {
    /// Span from start to the last recorded stage.
    pub span_seconds: f64,
    /// Duration reported by the caller at completion, if any.
    pub reported_total_seconds: Option<f64>,
    /// Summed gaps per stage kind.
    pub by_kind: BTreeMap<StageKind, f64>,
}

/// Errors across all journeys, grouped by `error_type`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorAggregate {
    pub by_type: BTreeMap<String, Vec<ErrorRecord>>,
    /// Journey files skipped because they could not be parsed.
    pub skipped_records: usize,
}

impl ErrorAggregate {
    /// Total number of error records.
    pub fn total(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }
}

/// Corpus-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JourneyStats {
    pub total: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    /// Mean caller-reported total time of finished journeys.
    pub mean_total_time: Option<f64>,
    pub error_count: usize,
    pub corrupt_records: usize,
}

struct Corpus {
    journeys: Vec<Journey>,
    skipped: usize,
}

/// Read-only query interface over a [`JourneyStore`].
#[derive(Clone)]
pub struct JourneyAnalyzer {
    store: Arc<dyn JourneyStore>,
}

impl JourneyAnalyzer {
    pub fn new(store: Arc<dyn JourneyStore>) -> Self {
        Self { store }
    }

    /// Most recent journeys first, at most `limit`.
    pub async fn list_journeys(&self, limit: usize) -> AnalyzerResult<Vec<JourneySummary>> {
        let corpus = self.load_corpus().await?;
        Ok(corpus
            .journeys
            .iter()
            .take(limit)
            .map(Journey::summary)
            .collect())
    }

    /// Exact lookup.
    pub async fn get_journey(&self, journey_id: &str) -> AnalyzerResult<Option<Journey>> {
        check_id(journey_id)?;
        Ok(self.store.load_journey(journey_id).await?)
    }

    /// Journeys whose query contains `text`, ignoring case, most recent first.
    pub async fn search_journeys(&self, text: &str) -> AnalyzerResult<Vec<JourneySummary>> {
        let needle = text.to_lowercase();
        let corpus = self.load_corpus().await?;
        Ok(corpus
            .journeys
            .iter()
            .filter(|journey| journey.query.to_lowercase().contains(&needle))
            .map(Journey::summary)
            .collect())
    }

    /// Errors of one journey, in the order they were reported.
    pub async fn error_report(&self, journey_id: &str) -> AnalyzerResult<Option<Vec<ErrorRecord>>> {
        Ok(self
            .get_journey(journey_id)
            .await?
            .map(|journey| journey.errors()))
    }

    /// Errors of every readable journey, grouped by type.
    pub async fn error_report_all(&self) -> AnalyzerResult<ErrorAggregate> {
        let corpus = self.load_corpus().await?;
        let mut aggregate = ErrorAggregate {
            skipped_records: corpus.skipped,
            ..Default::default()
        };
        // Oldest journey first so each group reads chronologically.
        for journey in corpus.journeys.iter().rev() {
            for record in journey.errors() {
                aggregate
                    .by_type
                    .entry(record.error_type.clone())
                    .or_default()
                    .push(record);
            }
        }
        Ok(aggregate)
    }

    /// Stages with offsets from the journey start.
    pub async fn timeline(&self, journey_id: &str) -> AnalyzerResult<Option<Vec<TimelineEntry>>> {
        Ok(self
            .get_journey(journey_id)
            .await?
            .map(|journey| build_timeline(&journey)))
    }

    /// Span and per-kind time of one journey.
    pub async fn stage_durations(&self, journey_id: &str) -> AnalyzerResult<Option<StageDurations>> {
        Ok(self.get_journey(journey_id).await?.map(|journey| {
            let timeline = build_timeline(&journey);
            let mut by_kind = BTreeMap::new();
            for entry in &timeline {
                *by_kind.entry(entry.kind).or_insert(0.0) += entry.since_previous_seconds;
            }
            StageDurations {
                span_seconds: timeline.last().map(|e| e.offset_seconds).unwrap_or(0.0),
                reported_total_seconds: journey.total_time,
                by_kind,
            }
        }))
    }

    /// Counters over the whole corpus.
    pub async fn stats(&self) -> AnalyzerResult<JourneyStats> {
        let corpus = self.load_corpus().await?;
        let mut stats = JourneyStats {
            total: corpus.journeys.len(),
            corrupt_records: corpus.skipped,
            ..Default::default()
        };

        let mut times = Vec::new();
        for journey in &corpus.journeys {
            match journey.status {
                JourneyStatus::InProgress => stats.in_progress += 1,
                JourneyStatus::Completed => stats.completed += 1,
                JourneyStatus::Failed => stats.failed += 1,
            }
            stats.error_count += journey.count_kind(StageKind::Error);
            if let Some(total) = journey.total_time {
                times.push(total);
            }
        }
        if !times.is_empty() {
            stats.mean_total_time = Some(times.iter().sum::<f64>() / times.len() as f64);
        }
        Ok(stats)
    }

    /// Write one journey's stages as CSV. The target is replaced atomically.
    ///
    /// Returns the number of data rows written.
    pub async fn export_csv(&self, journey_id: &str, path: impl AsRef<Path>) -> AnalyzerResult<usize> {
        let journey = self
            .get_journey(journey_id)
            .await?
            .ok_or_else(|| AnalyzerError::JourneyNotFound {
                journey_id: journey_id.to_string(),
            })?;

        let contents = csv::render_stages(&journey.stages);
        let target = path.as_ref().to_path_buf();
        let shown = target.display().to_string();

        let written = tokio::task::spawn_blocking(move || write_atomic(&target, contents.as_bytes()))
            .await
            .map_err(|e| AnalyzerError::Export {
                path: shown.clone(),
                message: e.to_string(),
            })?;
        written.map_err(|e| AnalyzerError::Export {
            path: shown.clone(),
            message: e.to_string(),
        })?;

        info!(journey_id, path = %shown, rows = journey.stages.len(), "Journey exported to CSV");
        Ok(journey.stages.len())
    }

    async fn load_corpus(&self) -> AnalyzerResult<Corpus> {
        let mut journeys = Vec::new();
        let mut skipped = 0;

        for id in self.store.journey_ids().await? {
            match self.store.load_journey(&id).await {
                Ok(Some(journey)) => journeys.push(journey),
                Ok(None) => {}
                Err(e) => {
                    warn!(journey_id = %id, error = %e, "Skipping unreadable journey record");
                    skipped += 1;
                }
            }
        }

        journeys.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(Corpus { journeys, skipped })
    }
}

fn check_id(journey_id: &str) -> AnalyzerResult<()> {
    validate_journey_id(journey_id).map_err(AnalyzerError::from)
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(micros) => micros as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

fn build_timeline(journey: &Journey) -> Vec<TimelineEntry> {
    let mut previous = journey.started_at;
    journey
        .stages
        .iter()
        .map(|stage| {
            let entry = TimelineEntry {
                kind: stage.kind,
                timestamp: stage.timestamp,
                offset_seconds: seconds_between(journey.started_at, stage.timestamp),
                since_previous_seconds: seconds_between(previous, stage.timestamp),
            };
            previous = stage.timestamp;
            entry
        })
        .collect()
}
