//! # contract: interfaces between the orchestration core and its collaborators
//!
//! This module defines the trait ([`Messenger`]) and plain data types used to
//! hand files to a remote messaging service, and the [`ProgressReporter`]
//! callback interface used to surface run progress.
//!
//! ## Interface & Extensibility
//! - Implement [`Messenger`] to plug in a destination (Bot API client, dry-run logger, test fake).
//! - All transport methods are async and return the tagged [`TransportError`], which the
//!   retry engine pattern-matches to decide between waiting, backing off, or giving up.
//! - Implementors read file contents inside each call; no handle outlives a call attempt.
//!
//! ## Mocking & Testing
//! - [`Messenger`] is annotated for `mockall` so consumers can generate deterministic mocks.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use serde::Serialize;

use crate::classify::WorkPlan;
use crate::orchestrate::RunSummary;
use crate::stats::RunStatistics;

/// Whether a file travels as a photo or as a generic document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MediaKind {
    Image,
    Document,
}

/// Identifier of a message returned by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub i64);

/// Identifier of a topic (sub-channel) inside the destination chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopicId(pub i64);

/// A single file ready for transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMedia {
    /// Absolute path on the local filesystem; opened by the messenger per attempt.
    pub path: PathBuf,
    /// Bare file name shown to recipients.
    pub file_name: String,
    pub size_bytes: u64,
    /// Plain-text caption; the messenger decides how to format it.
    pub caption: Option<String>,
}

/// Request for a one-file transport call.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleSend {
    pub kind: MediaKind,
    pub media: OutgoingMedia,
    pub topic: Option<TopicId>,
}

/// Request for a grouped transport call (1..=10 files of the same kind).
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSend {
    pub kind: MediaKind,
    pub media: Vec<OutgoingMedia>,
    pub topic: Option<TopicId>,
}

/// Failure signalled by a transport call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The service demands a pause before the next call.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    /// Timeout, connection reset, unreachable network.
    #[error("transient transport failure: {0}")]
    Transient(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not supported by destination: {0}")]
    NotSupported(String),
    /// Malformed request or any other non-retryable rejection.
    #[error("fatal transport failure: {0}")]
    Fatal(String),
    /// A wait was interrupted by the run's cancellation signal.
    #[error("cancelled while waiting to retry")]
    Cancelled,
}

/// How the retry engine treats a [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Wait for the server-specified duration; does not consume retry budget.
    RateLimited(Duration),
    /// Back off exponentially; consumes retry budget.
    Transient,
    /// Give up immediately.
    Fatal,
}

impl TransportError {
    pub fn class(&self) -> FailureClass {
        match self {
            TransportError::RateLimited { retry_after_secs } => {
                FailureClass::RateLimited(Duration::from_secs(*retry_after_secs))
            }
            TransportError::Transient(_) => FailureClass::Transient,
            TransportError::PermissionDenied(_)
            | TransportError::NotSupported(_)
            | TransportError::Fatal(_)
            | TransportError::Cancelled => FailureClass::Fatal,
        }
    }
}

/// Trait for delivering files and topic management calls to a messaging destination.
///
/// The trait is implemented by real clients and by test mocks. It is `Send` + `Sync`
/// and intended for async/await usage.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send one file, optionally captioned, optionally into a topic.
    async fn send_single(&self, req: SingleSend) -> Result<MessageId, TransportError>;

    /// Send a group of files in one call. Captions on individual media are honoured;
    /// for albums only the first item carries one.
    async fn send_batch(&self, req: BatchSend) -> Result<Vec<MessageId>, TransportError>;

    /// Create a named topic in the destination.
    ///
    /// May fail with [`TransportError::PermissionDenied`] or [`TransportError::NotSupported`].
    async fn create_topic(&self, name: String) -> Result<TopicId, TransportError>;

    /// Post a plain text message.
    async fn send_text(
        &self,
        text: String,
        topic: Option<TopicId>,
    ) -> Result<MessageId, TransportError>;
}

/// Which half of a subfolder is being uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStep {
    Images,
    Documents,
}

/// Per-run state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Scanning,
    UploadingImages { subfolder: String },
    UploadingDocuments { subfolder: String },
    Complete,
    Cancelled,
    FatalAborted { reason: String },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Complete | RunState::Cancelled | RunState::FatalAborted { .. }
        )
    }
}

/// Receives human-oriented progress events from the orchestrator.
///
/// All methods have empty defaults so implementors only pick what they display.
pub trait ProgressReporter: Send + Sync {
    fn state_changed(&self, _state: &RunState) {}

    fn run_started(&self, _folder_name: &str, _status_line: &str) {}

    fn plan_ready(&self, _plan: &WorkPlan) {}

    fn step_started(&self, _subfolder: &str, _step: UploadStep, _count: usize, _in_topic: bool) {}

    fn stats_updated(&self, _stats: &RunStatistics) {}

    fn run_finished(&self, _summary: &RunSummary) {}
}
