//! High-level pipeline: orchestrates scan → batch → send for one folder tree.
//!
//! The [`Orchestrator`] owns the run's [`RunStatistics`] and drives every subfolder of a
//! [`WorkPlan`] strictly in order:
//!   - optionally opens a topic for the subfolder (never fatal, falls back to the main chat)
//!   - uploads images, as albums or one by one
//!   - uploads documents, grouped or one by one
//!   - paces calls proportionally to the payload just sent
//!
//! # Error Handling
//! Only setup problems ([`SetupError`]) abort a run. Every transport failure is recorded
//! against the smallest unit (an item or a batch) and the run moves on.
//!
//! # Cancellation
//! The [`CancelSignal`] is checked between subfolders, steps and units, and interrupts any
//! wait. A call already handed to the messenger is always awaited.

use std::fmt;
use std::path::Path;

use tracing::{error, info, warn};

use crate::batch::{size_mb, Batched, Batcher};
use crate::cancel::CancelSignal;
use crate::classify::{scan_folder, SetupError, WorkItem, WorkPlan};
use crate::config::{RunConfig, MAX_BATCH_SIZE};
use crate::contract::{
    BatchSend, MediaKind, Messenger, OutgoingMedia, ProgressReporter, RunState, SingleSend,
    TopicId, TransportError, UploadStep,
};
use crate::retry::retry_with_backoff;
use crate::stats::{RunStatistics, UploadOutcome};

/// Maximum topic name length accepted by the destination.
pub const MAX_TOPIC_NAME_CHARS: usize = 128;

/// Final report of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub folder_name: String,
    /// Files found by the scan.
    pub discovered: usize,
    pub stats: RunStatistics,
    pub subfolders_processed: usize,
    pub topics_created: usize,
    pub final_state: RunState,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headline = match self.final_state {
            RunState::Cancelled => "Upload Cancelled",
            _ => "Upload Complete!",
        };
        writeln!(f, "{headline}")?;
        writeln!(f, "Folder: {}", self.folder_name)?;
        writeln!(f, "Stats: {}/{} files", self.stats.success, self.discovered)?;
        write!(
            f,
            "Failed: {} | Skipped: {} | Subfolders: {} | Topics created: {}",
            self.stats.failed, self.stats.skipped, self.subfolders_processed, self.topics_created
        )
    }
}

/// How captions are attached to the items of one upload step.
#[derive(Debug, Clone)]
enum CaptionRule {
    None,
    /// Only the first item of each call carries the text.
    Leading(String),
    /// Name of the directory that contains the file, `Root` at the top level.
    ParentFolder,
    FileName,
}

impl CaptionRule {
    fn caption(&self, item: &WorkItem, index_in_call: usize) -> Option<String> {
        match self {
            CaptionRule::None => None,
            CaptionRule::Leading(text) => (index_in_call == 0).then(|| text.clone()),
            CaptionRule::ParentFolder => {
                Some(item.parent_folder_name().unwrap_or("Root").to_string())
            }
            CaptionRule::FileName => Some(item.file_name()),
        }
    }
}

/// Drives one upload run against a [`Messenger`], reporting through a [`ProgressReporter`].
pub struct Orchestrator<M, R> {
    messenger: M,
    reporter: R,
    config: RunConfig,
    cancel: CancelSignal,
    stats: RunStatistics,
    state: RunState,
}

impl<M, R> Orchestrator<M, R>
where
    M: Messenger,
    R: ProgressReporter,
{
    pub fn new(messenger: M, reporter: R, config: RunConfig) -> Self {
        Self {
            messenger,
            reporter,
            config,
            cancel: CancelSignal::never(),
            stats: RunStatistics::default(),
            state: RunState::Idle,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn stats(&self) -> &RunStatistics {
        &self.stats
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    fn set_state(&mut self, state: RunState) {
        self.reporter.state_changed(&state);
        self.state = state;
    }

    fn abort(&mut self, err: &SetupError) {
        error!(error = %err, "[UPLOAD] Run aborted during setup");
        self.set_state(RunState::FatalAborted {
            reason: err.to_string(),
        });
    }

    /// Scan `root` and upload everything found.
    ///
    /// Fails only when the root is not a directory or contains no files.
    pub async fn run(&mut self, root: &Path) -> Result<RunSummary, SetupError> {
        self.stats.reset();
        self.set_state(RunState::Idle);
        self.set_state(RunState::Scanning);

        let plan = match scan_folder(root) {
            Ok(plan) => plan,
            Err(e) => {
                self.abort(&e);
                return Err(e);
            }
        };
        if plan.total_items() == 0 {
            let e = SetupError::EmptyFolder(root.to_path_buf());
            warn!(path = %root.display(), "[UPLOAD] Folder is empty!");
            self.abort(&e);
            return Err(e);
        }

        Ok(self.upload_plan(&plan).await)
    }

    /// Upload an already scanned plan. Statistics are reset first.
    pub async fn upload_plan(&mut self, plan: &WorkPlan) -> RunSummary {
        self.stats.reset();
        let folder_name = plan.folder_name();
        let settings = self.config.settings.clone();
        let status_line = settings.status_line();

        info!(
            folder = %folder_name,
            path = %plan.root.display(),
            "[UPLOAD] Starting upload for folder"
        );
        info!(settings = %status_line, "[UPLOAD] Settings");
        self.reporter.run_started(&folder_name, &status_line);
        self.reporter.plan_ready(plan);

        let mut subfolders_processed = 0;
        let mut topics_created = 0;

        for (key, bucket) in plan.iter() {
            if self.cancel.is_cancelled() {
                break;
            }
            if bucket.is_empty() {
                continue;
            }
            subfolders_processed += 1;
            let subfolder_label = if key.is_empty() { "Root" } else { key.as_str() };
            info!(
                subfolder = subfolder_label,
                images = bucket.images.len(),
                documents = bucket.documents.len(),
                "[UPLOAD] Processing subfolder"
            );

            let topic = if settings.topics_enabled && !key.is_empty() {
                self.open_topic(key).await
            } else {
                None
            };
            if topic.is_some() {
                topics_created += 1;
            }

            if !bucket.images.is_empty() && !self.cancel.is_cancelled() {
                self.set_state(RunState::UploadingImages {
                    subfolder: key.clone(),
                });
                let count = bucket.images.len();
                self.reporter
                    .step_started(subfolder_label, UploadStep::Images, count, topic.is_some());
                info!(count, "[UPLOAD] Uploading {} images", count);

                let calls = if settings.album_mode {
                    let caption = if settings.album_captions {
                        let name = if key.is_empty() { folder_name.clone() } else { key.clone() };
                        CaptionRule::Leading(name)
                    } else {
                        CaptionRule::None
                    };
                    self.upload_items(&bucket.images, MediaKind::Image, topic, caption, true).await
                } else {
                    let caption = if settings.image_captions {
                        CaptionRule::ParentFolder
                    } else {
                        CaptionRule::None
                    };
                    self.upload_items(&bucket.images, MediaKind::Image, topic, caption, false).await
                };
                info!(subfolder = subfolder_label, "[UPLOAD] Images complete for {}", subfolder_label);
                if calls > 0 {
                    self.cancel.sleep(self.config.pacing.cooldown()).await;
                }
            }

            if !bucket.documents.is_empty() && !self.cancel.is_cancelled() {
                self.set_state(RunState::UploadingDocuments {
                    subfolder: key.clone(),
                });
                let count = bucket.documents.len();
                self.reporter
                    .step_started(subfolder_label, UploadStep::Documents, count, topic.is_some());
                info!(count, "[UPLOAD] Uploading {} documents", count);

                let caption = if settings.doc_captions {
                    CaptionRule::FileName
                } else {
                    CaptionRule::None
                };
                let calls = self
                    .upload_items(
                        &bucket.documents,
                        MediaKind::Document,
                        topic,
                        caption,
                        settings.doc_group,
                    )
                    .await;
                info!(subfolder = subfolder_label, "[UPLOAD] Documents complete for {}", subfolder_label);
                if calls > 0 {
                    self.cancel.sleep(self.config.pacing.cooldown()).await;
                }
            }
        }

        let final_state = if self.cancel.is_cancelled() {
            warn!("[UPLOAD] Run cancelled, stopping at a safe point");
            RunState::Cancelled
        } else {
            RunState::Complete
        };
        self.set_state(final_state.clone());

        let summary = RunSummary {
            folder_name,
            discovered: plan.total_items(),
            stats: self.stats,
            subfolders_processed,
            topics_created,
            final_state,
        };
        info!(
            total = summary.stats.total,
            success = summary.stats.success,
            failed = summary.stats.failed,
            skipped = summary.stats.skipped,
            topics_created,
            "[UPLOAD] All uploads finished"
        );
        self.reporter.run_finished(&summary);
        summary
    }

    /// Create the topic for `key` and post a header into it. `None` means "use the main chat".
    async fn open_topic(&mut self, key: &str) -> Option<TopicId> {
        let name: String = key.chars().take(MAX_TOPIC_NAME_CHARS).collect();
        let messenger = &self.messenger;
        let created = retry_with_backoff(&self.config.retry, &self.cancel, "create_topic", || {
            messenger.create_topic(name.clone())
        })
        .await;

        match created {
            Ok(topic) => {
                info!(subfolder = key, topic_id = topic.0, "[UPLOAD] Created topic for subfolder");
                let header = format!("Uploading to topic: {key}");
                let posted = retry_with_backoff(&self.config.retry, &self.cancel, "send_text", || {
                    messenger.send_text(header.clone(), Some(topic))
                })
                .await;
                if let Err(e) = posted {
                    warn!(subfolder = key, error = %e, "[UPLOAD] Could not post topic header");
                }
                Some(topic)
            }
            Err(e) => {
                error!(
                    subfolder = key,
                    error = %e,
                    "[UPLOAD] Topic creation failed, uploading to main chat"
                );
                None
            }
        }
    }

    /// Upload one ordered item list. Returns the number of transport calls made.
    async fn upload_items(
        &mut self,
        items: &[WorkItem],
        kind: MediaKind,
        topic: Option<TopicId>,
        caption: CaptionRule,
        grouped: bool,
    ) -> usize {
        let per_call = if grouped {
            self.config.limits.max_batch_size.clamp(1, MAX_BATCH_SIZE)
        } else {
            1
        };
        let total_calls = items.len().div_ceil(per_call);
        let mut calls = 0;

        for event in Batcher::new(items, per_call, self.config.limits.max_item_bytes) {
            if self.cancel.is_cancelled() {
                break;
            }
            match event {
                Batched::Skipped { reason, .. } => {
                    self.stats.record(&UploadOutcome::Skipped(reason));
                    self.reporter.stats_updated(&self.stats);
                }
                Batched::Ready(batch) => {
                    calls += 1;
                    let media: Vec<OutgoingMedia> = batch
                        .iter()
                        .enumerate()
                        .map(|(i, item)| OutgoingMedia {
                            path: item.absolute_path.clone(),
                            file_name: item.file_name(),
                            size_bytes: item.size_bytes,
                            caption: caption.caption(item, i),
                        })
                        .collect();
                    if grouped {
                        self.send_batch(kind, media, topic, calls, total_calls).await;
                    } else {
                        let item = batch[0];
                        if let Some(media) = media.into_iter().next() {
                            self.send_single(kind, item, media, topic, calls, total_calls).await;
                        }
                    }
                }
            }
        }
        calls
    }

    async fn send_single(
        &mut self,
        kind: MediaKind,
        item: &WorkItem,
        media: OutgoingMedia,
        topic: Option<TopicId>,
        index: usize,
        total: usize,
    ) {
        info!(
            path = %item.relative_path,
            "[UPLOAD] [{}/{}] Uploading: {} ({:.2}MB)",
            index,
            total,
            item.relative_path,
            size_mb(item.size_bytes)
        );
        let req = SingleSend { kind, media, topic };
        let messenger = &self.messenger;
        let result = retry_with_backoff(&self.config.retry, &self.cancel, &item.relative_path, || {
            messenger.send_single(req.clone())
        })
        .await;

        let outcome = match result {
            Ok(message) => {
                info!(path = %item.relative_path, message_id = message.0, "[UPLOAD] Uploaded");
                UploadOutcome::Success
            }
            Err(e) => {
                error!(path = %item.relative_path, error = %e, "[UPLOAD] Failed after retries");
                UploadOutcome::Failed(e)
            }
        };
        self.stats.record(&outcome);
        self.reporter.stats_updated(&self.stats);

        if !matches!(outcome, UploadOutcome::Failed(TransportError::Cancelled)) {
            self.cancel.sleep(self.config.pacing.single_delay(item.size_bytes)).await;
        }
    }

    async fn send_batch(
        &mut self,
        kind: MediaKind,
        media: Vec<OutgoingMedia>,
        topic: Option<TopicId>,
        batch_no: usize,
        total_batches: usize,
    ) {
        let count = media.len();
        let label = format!("{kind:?} batch {batch_no}");
        info!(
            batch = batch_no,
            files = count,
            "[UPLOAD] Processing {:?} batch {}/{} ({} files)",
            kind,
            batch_no,
            total_batches,
            count
        );
        let req = BatchSend { kind, media, topic };
        let messenger = &self.messenger;
        let result = retry_with_backoff(&self.config.retry, &self.cancel, &label, || {
            messenger.send_batch(req.clone())
        })
        .await;

        let outcome = match result {
            Ok(messages) => {
                info!(
                    batch = batch_no,
                    messages = messages.len(),
                    "[UPLOAD] Batch {} uploaded",
                    batch_no
                );
                UploadOutcome::Success
            }
            Err(e) => {
                error!(batch = batch_no, error = %e, "[UPLOAD] Batch {} failed", batch_no);
                UploadOutcome::Failed(e)
            }
        };
        self.stats.record_batch(&outcome, count, self.config.attribution);
        self.reporter.stats_updated(&self.stats);

        if !matches!(outcome, UploadOutcome::Failed(TransportError::Cancelled)) {
            self.cancel.sleep(self.config.pacing.batch_delay(count)).await;
        }
    }
}
