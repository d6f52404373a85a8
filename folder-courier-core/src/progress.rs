//! Progress reporters.

use tracing::{debug, info};

use crate::classify::WorkPlan;
use crate::contract::{ProgressReporter, RunState, UploadStep};
use crate::orchestrate::RunSummary;
use crate::stats::RunStatistics;

/// Emits every progress event as a tracing record under the `[PROGRESS]` tag.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn state_changed(&self, state: &RunState) {
        debug!(?state, "[PROGRESS] State changed");
    }

    fn run_started(&self, folder_name: &str, status_line: &str) {
        info!(folder = folder_name, "[PROGRESS] Uploading folder: {}", folder_name);
        info!("[PROGRESS] {}", status_line);
    }

    fn plan_ready(&self, plan: &WorkPlan) {
        info!(
            files = plan.total_items(),
            subfolders = plan.non_empty_buckets(),
            "[PROGRESS] Found {} files in {} subfolders",
            plan.total_items(),
            plan.non_empty_buckets()
        );
    }

    fn step_started(&self, subfolder: &str, step: UploadStep, count: usize, in_topic: bool) {
        let what = match step {
            UploadStep::Images => "images",
            UploadStep::Documents => "documents",
        };
        let target = if in_topic { "topic" } else { "main chat" };
        info!(subfolder, count, "[PROGRESS] {}: {} {} -> {}", subfolder, count, what, target);
    }

    fn stats_updated(&self, stats: &RunStatistics) {
        debug!(
            total = stats.total,
            success = stats.success,
            failed = stats.failed,
            skipped = stats.skipped,
            "[PROGRESS] Stats"
        );
    }

    fn run_finished(&self, summary: &RunSummary) {
        for line in summary.to_string().lines() {
            info!("[PROGRESS] {}", line);
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
