//! CLI output formatting

use crate::{
    core::ExecutionStatus,
    execution::ExecutionEvent,
    persistence::{ExecutionSummary, StageSummary},
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "x ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Progress bar counting finished stages
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Horizontal rule as wide as the terminal
pub fn separator() -> String {
    let width = term_size::dimensions_stdout().map(|(w, _)| w).unwrap_or(80);
    style("─".repeat(width.min(120))).dim().to_string()
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

fn status_icon(status: ExecutionStatus) -> &'static Emoji<'static, 'static> {
    match status {
        ExecutionStatus::Succeeded => &CHECK,
        ExecutionStatus::Failed => &CROSS,
        ExecutionStatus::Cancelled => &STOP,
        ExecutionStatus::Running => &SPINNER,
        ExecutionStatus::Pending => &INFO,
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// One-line summary of a recorded run
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    format!(
        "{} {} - {} - {} [{}@{}] ({} ok, {} failed, {} skipped of {}) - {}",
        status_icon(summary.status),
        style(short_id(&summary.execution_id)).dim(),
        style(&summary.workflow_name).bold(),
        format_status(summary.status),
        summary.event,
        summary.branch,
        style(summary.succeeded_stages).green(),
        style(summary.failed_stages).red(),
        summary.skipped_stages,
        summary.total_stages,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

/// One row of the per-stage results table
pub fn format_stage_line(stage: &StageSummary, width: usize) -> String {
    let state = match stage.state.as_str() {
        "succeeded" => style(stage.state.to_uppercase()).green(),
        "failed" => style(stage.state.to_uppercase()).red(),
        "cancelled" => style(stage.state.to_uppercase()).yellow(),
        _ => style(stage.state.to_uppercase()).dim(),
    };
    let mut line = format!("  {:<width$}  {:<10}", stage.stage_id, state, width = width);
    if stage.attempts > 1 {
        line.push_str(&format!("  {} attempts", stage.attempts));
    }
    if let Some(detail) = &stage.detail {
        let first = detail.lines().next().unwrap_or_default();
        line.push_str(&format!("  {}", style(first).dim()));
    }
    line
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
            stage_count,
        } => format!(
            "{} Starting {} ({} stages, {})",
            ROCKET,
            style(pipeline_name).bold(),
            stage_count,
            style(short_id(execution_id)).dim()
        ),
        ExecutionEvent::StageStarted { stage_id } => format!("{} {}", SPINNER, style(stage_id).cyan()),
        ExecutionEvent::StageRetrying {
            stage_id,
            attempt,
            max_attempts,
            error,
        } => format!(
            "{} {} (attempt {}/{} failed: {})",
            WARN,
            style(stage_id).yellow(),
            attempt,
            max_attempts,
            style(error.lines().next().unwrap_or_default()).dim()
        ),
        ExecutionEvent::StageSucceeded {
            stage_id,
            attempts,
            outputs,
        } => {
            let mut line = format!("{} {}", CHECK, style(stage_id).green());
            if *attempts > 1 {
                line.push_str(&format!(" after {} attempts", attempts));
            }
            if !outputs.is_empty() {
                let keys: Vec<&str> = outputs.keys().map(String::as_str).collect();
                line.push_str(&format!(" {}", style(format!("[{}]", keys.join(", "))).dim()));
            }
            line
        }
        ExecutionEvent::StageFailed {
            stage_id,
            error,
            attempts,
        } => format!(
            "{} {} ({} attempts):\n{}",
            CROSS,
            style(stage_id).red(),
            attempts,
            style(format_output(error, 5)).dim()
        ),
        ExecutionEvent::StageSkipped { stage_id, reason } => {
            format!("{} {}: {}", SKIP, style(stage_id).dim(), style(reason).dim())
        }
        ExecutionEvent::StageCancelled { stage_id, reason } => {
            format!("{} {}: {}", STOP, style(stage_id).yellow(), reason)
        }
        ExecutionEvent::RunCancelled { execution_id } => format!(
            "{} Cancelling run {}",
            STOP,
            style(short_id(execution_id)).dim()
        ),
        ExecutionEvent::PipelineCompleted { execution_id, status } => format!(
            "{} Run {} {}",
            status_icon(*status),
            style(short_id(execution_id)).dim(),
            format_status(*status)
        ),
    }
}

/// Truncate multi-line output
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
