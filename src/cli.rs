//! CLI commands for inspecting recorded journeys.
//!
//! Every command except `prune` is read-only.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use clap::Subcommand;

use crate::analyzer::JourneyAnalyzer;
use crate::config::Config;
use crate::error::AnalyzerError;
use crate::journey::{ErrorRecord, JourneySummary};
use crate::storage::JourneyStore;

const RULE: &str =
    "═══════════════════════════════════════════════════════════════════════════════\n\n";

/// Journey inspection subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum JourneyCommands {
    /// List the most recent journeys
    List {
        /// Maximum number of journeys to show
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Show every stage of one journey
    Show {
        /// Journey ID
        journey_id: String,
    },

    /// Find journeys whose query contains the given text (case-insensitive)
    Search {
        /// Text to look for
        text: String,
    },

    /// Error report for one journey, or grouped by type across all journeys
    Errors {
        /// Journey ID; omit for the aggregate report
        journey_id: Option<String>,
    },

    /// Export one journey's stages as CSV
    Export {
        /// Journey ID
        journey_id: String,
        /// Output file
        output: PathBuf,
    },

    /// Show stage offsets and gaps for one journey
    Timeline {
        /// Journey ID
        journey_id: String,
    },

    /// Corpus-wide counters
    Stats,

    /// Delete finished journeys older than the retention horizon
    Prune {
        /// Override the configured retention in days
        #[arg(long)]
        older_than_days: Option<u32>,
    },
}

/// Result of CLI command execution.
#[derive(Debug)]
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a journey CLI command.
pub async fn execute_command(
    command: JourneyCommands,
    store: Arc<dyn JourneyStore>,
    config: &Config,
) -> CliResult {
    let analyzer = JourneyAnalyzer::new(Arc::clone(&store));
    match command {
        JourneyCommands::List { limit } => execute_list(&analyzer, limit).await,
        JourneyCommands::Show { journey_id } => execute_show(&analyzer, &journey_id).await,
        JourneyCommands::Search { text } => execute_search(&analyzer, &text).await,
        JourneyCommands::Errors { journey_id: Some(id) } => execute_errors(&analyzer, &id).await,
        JourneyCommands::Errors { journey_id: None } => execute_errors_all(&analyzer).await,
        JourneyCommands::Export { journey_id, output } => {
            execute_export(&analyzer, &journey_id, output).await
        }
        JourneyCommands::Timeline { journey_id } => execute_timeline(&analyzer, &journey_id).await,
        JourneyCommands::Stats => execute_stats(&analyzer).await,
        JourneyCommands::Prune { older_than_days } => {
            let days = older_than_days.unwrap_or(config.retention.retention_days);
            execute_prune(store.as_ref(), days).await
        }
    }
}

fn header(title: &str) -> String {
    format!("\n{}\n{}", title, RULE)
}

fn not_found(journey_id: &str) -> CliResult {
    CliResult::error(format!("Journey not found: {}", journey_id))
}

fn failed(e: AnalyzerError) -> CliResult {
    CliResult::error(format!("Error: {}", e))
}

fn push_summaries(output: &mut String, summaries: &[JourneySummary]) {
    for summary in summaries {
        output.push_str(&format!(
            "{} | {} | {}\n",
            summary.started_at.format("%Y-%m-%d %H:%M:%S"),
            summary.status,
            summary.id
        ));
        output.push_str(&format!("    Query: {}\n", truncate(&summary.query, 70)));
    }
}

fn push_error(output: &mut String, record: &ErrorRecord) {
    output.push_str(&format!(
        "{} | {} | stage={}\n",
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        record.error_type,
        record.stage
    ));
    output.push_str(&format!("    {}\n", record.error_message));
    if let Some(ref trace) = record.stack_trace {
        for line in trace.lines() {
            output.push_str(&format!("      {}\n", line));
        }
    }
}

async fn execute_list(analyzer: &JourneyAnalyzer, limit: usize) -> CliResult {
    let summaries = match analyzer.list_journeys(limit).await {
        Ok(s) => s,
        Err(e) => return failed(e),
    };

    let mut output = header("Recent Journeys");
    if summaries.is_empty() {
        output.push_str("No journeys recorded.\n");
    } else {
        output.push_str(&format!("Showing {} journey(s):\n\n", summaries.len()));
        push_summaries(&mut output, &summaries);
    }
    CliResult::success(output)
}

async fn execute_show(analyzer: &JourneyAnalyzer, journey_id: &str) -> CliResult {
    let journey = match analyzer.get_journey(journey_id).await {
        Ok(Some(j)) => j,
        Ok(None) => return not_found(journey_id),
        Err(e) => return failed(e),
    };

    let mut output = header(&format!("Journey {}", journey.id));
    output.push_str(&format!("Query:   {}\n", journey.query));
    output.push_str(&format!("Status:  {}\n", journey.status));
    output.push_str(&format!(
        "Started: {}\n",
        journey.started_at.format("%Y-%m-%d %H:%M:%S%.3f")
    ));
    if let Some(ended) = journey.ended_at {
        output.push_str(&format!("Ended:   {}\n", ended.format("%Y-%m-%d %H:%M:%S%.3f")));
    }
    if let Some(total) = journey.total_time {
        output.push_str(&format!("Total:   {:.3}s\n", total));
    }

    output.push_str(&format!("\nStages ({}):\n", journey.stages.len()));
    for (index, stage) in journey.stages.iter().enumerate() {
        output.push_str(&format!(
            "  {:>3}. {} {}\n",
            index + 1,
            stage.timestamp.format("%H:%M:%S%.3f"),
            stage.kind
        ));
        let body = serde_json::to_string(&stage.payload).unwrap_or_default();
        output.push_str(&format!("       {}\n", truncate(&body, 120)));
    }
    CliResult::success(output)
}

async fn execute_search(analyzer: &JourneyAnalyzer, text: &str) -> CliResult {
    let matches = match analyzer.search_journeys(text).await {
        Ok(m) => m,
        Err(e) => return failed(e),
    };

    let mut output = header(&format!("Journeys matching \"{}\"", text));
    if matches.is_empty() {
        output.push_str("No matching journeys.\n");
    } else {
        output.push_str(&format!("Found {} journey(s):\n\n", matches.len()));
        push_summaries(&mut output, &matches);
    }
    CliResult::success(output)
}

async fn execute_errors(analyzer: &JourneyAnalyzer, journey_id: &str) -> CliResult {
    let records = match analyzer.error_report(journey_id).await {
        Ok(Some(r)) => r,
        Ok(None) => return not_found(journey_id),
        Err(e) => return failed(e),
    };

    let mut output = header(&format!("Errors for {}", journey_id));
    if records.is_empty() {
        output.push_str("No errors recorded.\n");
    } else {
        for record in &records {
            push_error(&mut output, record);
        }
    }
    CliResult::success(output)
}

async fn execute_errors_all(analyzer: &JourneyAnalyzer) -> CliResult {
    let aggregate = match analyzer.error_report_all().await {
        Ok(a) => a,
        Err(e) => return failed(e),
    };

    let mut output = header("Error Report");
    output.push_str(&format!(
        "{} error(s) across {} type(s)\n",
        aggregate.total(),
        aggregate.by_type.len()
    ));
    if aggregate.skipped_records > 0 {
        output.push_str(&format!(
            "⚠ {} unreadable journey record(s) skipped\n",
            aggregate.skipped_records
        ));
    }

    for (error_type, records) in &aggregate.by_type {
        output.push_str(&format!("\n{} ({})\n", error_type, records.len()));
        for record in records {
            output.push_str(&format!(
                "  {} | {} | stage={} | {}\n",
                record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                record.journey_id,
                record.stage,
                truncate(&record.error_message, 60)
            ));
        }
    }
    CliResult::success(output)
}

async fn execute_export(analyzer: &JourneyAnalyzer, journey_id: &str, output: PathBuf) -> CliResult {
    match analyzer.export_csv(journey_id, &output).await {
        Ok(rows) => CliResult::success(format!(
            "Exported {} stage(s) of {} to {}\n",
            rows,
            journey_id,
            output.display()
        )),
        Err(AnalyzerError::JourneyNotFound { .. }) => not_found(journey_id),
        Err(e) => failed(e),
    }
}

async fn execute_timeline(analyzer: &JourneyAnalyzer, journey_id: &str) -> CliResult {
    let durations = match analyzer.stage_durations(journey_id).await {
        Ok(Some(d)) => d,
        Ok(None) => return not_found(journey_id),
        Err(e) => return failed(e),
    };
    let timeline = match analyzer.timeline(journey_id).await {
        Ok(Some(t)) => t,
        Ok(None) => return not_found(journey_id),
        Err(e) => return failed(e),
    };

    let mut output = header(&format!("Timeline for {}", journey_id));
    for entry in &timeline {
        output.push_str(&format!(
            "  +{:>9.3}s  (Δ {:>8.3}s)  {}\n",
            entry.offset_seconds, entry.since_previous_seconds, entry.kind
        ));
    }

    output.push_str(&format!("\nSpan: {:.3}s\n", durations.span_seconds));
    if let Some(total) = durations.reported_total_seconds {
        output.push_str(&format!("Reported total: {:.3}s\n", total));
    }
    if !durations.by_kind.is_empty() {
        output.push_str("\nTime by stage kind:\n");
        for (kind, seconds) in &durations.by_kind {
            output.push_str(&format!("  {:<22} {:.3}s\n", kind.as_str(), seconds));
        }
    }
    CliResult::success(output)
}

async fn execute_stats(analyzer: &JourneyAnalyzer) -> CliResult {
    let stats = match analyzer.stats().await {
        Ok(s) => s,
        Err(e) => return failed(e),
    };

    let mut output = header("Journey Statistics");
    output.push_str(&format!("Total:       {}\n", stats.total));
    output.push_str(&format!("In progress: {}\n", stats.in_progress));
    output.push_str(&format!("Completed:   {}\n", stats.completed));
    output.push_str(&format!("Failed:      {}\n", stats.failed));
    output.push_str(&format!("Errors:      {}\n", stats.error_count));
    match stats.mean_total_time {
        Some(mean) => output.push_str(&format!("Mean time:   {:.3}s\n", mean)),
        None => output.push_str("Mean time:   -\n"),
    }
    let finished = stats.completed + stats.failed;
    if finished > 0 {
        let rate = (stats.completed as f64 / finished as f64) * 100.0;
        output.push_str(&format!("Success:     {:.1}%\n", rate));
    }
    if stats.corrupt_records > 0 {
        output.push_str(&format!(
            "\n⚠ {} unreadable journey record(s) skipped\n",
            stats.corrupt_records
        ));
    }
    CliResult::success(output)
}

async fn execute_prune(store: &dyn JourneyStore, days: u32) -> CliResult {
    let cutoff = Utc::now() - Duration::days(i64::from(days));
    match store.prune_before(cutoff).await {
        Ok(removed) => CliResult::success(format!(
            "Removed {} finished journey(s) started before {}\n",
            removed,
            cutoff.format("%Y-%m-%d %H:%M:%S")
        )),
        Err(e) => CliResult::error(format!("Prune failed: {}", e)),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}
