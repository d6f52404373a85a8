use std::fs::{self, File};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::tempdir;
use tokio::time::Instant;

use folder_courier_core::cancel::cancel_pair;
use folder_courier_core::classify::SetupError;
use folder_courier_core::config::RunConfig;
use folder_courier_core::contract::{
    BatchSend, MediaKind, MessageId, MockMessenger, ProgressReporter, RunState, SingleSend,
    TopicId, TransportError,
};
use folder_courier_core::orchestrate::Orchestrator;
use folder_courier_core::progress::SilentReporter;
use folder_courier_core::stats::{RunStatistics, StatsAttribution};

const MB: u64 = 1024 * 1024;

fn sized_file(path: &Path, bytes: u64) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    File::create(path).unwrap().set_len(bytes).unwrap();
}

#[derive(Default)]
struct RecordingReporter {
    states: Mutex<Vec<RunState>>,
}

impl ProgressReporter for RecordingReporter {
    fn state_changed(&self, state: &RunState) {
        self.states.lock().unwrap().push(state.clone());
    }
}

#[tokio::test(start_paused = true)]
async fn test_mixed_folder_uploads_and_skips_oversized_items() {
    let root = tempdir().unwrap();
    sized_file(&root.path().join("a.jpg"), 2 * MB);
    sized_file(&root.path().join("sub/b.png"), 60 * MB);
    sized_file(&root.path().join("sub/c.txt"), 1024);

    let mut messenger = MockMessenger::new();
    messenger
        .expect_send_batch()
        .times(1)
        .withf(|req: &BatchSend| {
            req.kind == MediaKind::Image
                && req.topic.is_none()
                && req.media.len() == 1
                && req.media[0].file_name == "a.jpg"
                && req.media[0].caption.is_none()
        })
        .returning(|_| Ok(vec![MessageId(1)]));
    messenger
        .expect_send_single()
        .times(1)
        .withf(|req: &SingleSend| {
            req.kind == MediaKind::Document && req.media.caption.as_deref() == Some("c.txt")
        })
        .returning(|_| Ok(MessageId(2)));

    let mut orchestrator =
        Orchestrator::new(messenger, RecordingReporter::default(), RunConfig::default());
    let summary = orchestrator.run(root.path()).await.unwrap();

    assert_eq!(
        summary.stats,
        RunStatistics { total: 3, success: 2, failed: 0, skipped: 1 }
    );
    assert!(summary.stats.is_consistent());
    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.subfolders_processed, 2);
    assert_eq!(summary.final_state, RunState::Complete);

    let states = orchestrator.reporter().states.lock().unwrap().clone();
    assert_eq!(
        states,
        vec![
            RunState::Idle,
            RunState::Scanning,
            RunState::UploadingImages { subfolder: String::new() },
            RunState::UploadingImages { subfolder: "sub".into() },
            RunState::UploadingDocuments { subfolder: "sub".into() },
            RunState::Complete,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_empty_folder_aborts_without_transport() {
    let root = tempdir().unwrap();
    fs::create_dir_all(root.path().join("nested/deeper")).unwrap();

    let messenger = MockMessenger::new();
    let mut orchestrator = Orchestrator::new(messenger, SilentReporter, RunConfig::default());
    let err = orchestrator.run(root.path()).await.unwrap_err();

    assert!(matches!(err, SetupError::EmptyFolder(_)));
    assert!(matches!(orchestrator.state(), RunState::FatalAborted { .. }));
    assert_eq!(orchestrator.stats().total, 0);
}

#[tokio::test(start_paused = true)]
async fn test_topic_permission_denied_falls_back_to_main_chat() {
    let root = tempdir().unwrap();
    sized_file(&root.path().join("reports/q1.pdf"), 10);

    let mut config = RunConfig::default();
    config.settings.topics_enabled = true;

    let mut messenger = MockMessenger::new();
    messenger
        .expect_create_topic()
        .times(1)
        .returning(|_| Err(TransportError::PermissionDenied("not enough rights".into())));
    messenger
        .expect_send_single()
        .times(1)
        .withf(|req: &SingleSend| req.topic.is_none())
        .returning(|_| Ok(MessageId(7)));

    let mut orchestrator = Orchestrator::new(messenger, SilentReporter, config);
    let summary = orchestrator.run(root.path()).await.unwrap();

    assert_eq!(summary.topics_created, 0);
    assert_eq!(summary.stats.failed, 0);
    assert_eq!(summary.stats.success, 1);
}

#[tokio::test(start_paused = true)]
async fn test_topics_route_uploads_and_post_header() {
    let root = tempdir().unwrap();
    sized_file(&root.path().join("top.txt"), 10);
    let long_name = "x".repeat(150);
    sized_file(&root.path().join(&long_name).join("doc.txt"), 10);

    let mut config = RunConfig::default();
    config.settings.topics_enabled = true;

    let mut messenger = MockMessenger::new();
    messenger
        .expect_create_topic()
        .times(1)
        .withf(|name: &String| name.chars().count() == 128)
        .returning(|_| Ok(TopicId(42)));
    messenger
        .expect_send_text()
        .times(1)
        .withf(|text: &String, topic: &Option<TopicId>| {
            text.starts_with("Uploading to topic: ") && *topic == Some(TopicId(42))
        })
        .returning(|_, _| Ok(MessageId(100)));
    // Root never gets a topic.
    messenger
        .expect_send_single()
        .times(1)
        .withf(|req: &SingleSend| req.media.file_name == "top.txt" && req.topic.is_none())
        .returning(|_| Ok(MessageId(1)));
    messenger
        .expect_send_single()
        .times(1)
        .withf(|req: &SingleSend| {
            req.media.file_name == "doc.txt" && req.topic == Some(TopicId(42))
        })
        .returning(|_| Ok(MessageId(2)));

    let mut orchestrator = Orchestrator::new(messenger, SilentReporter, config);
    let summary = orchestrator.run(root.path()).await.unwrap();

    assert_eq!(summary.topics_created, 1);
    assert_eq!(summary.stats.success, 2);
}

#[tokio::test(start_paused = true)]
async fn test_grouped_documents_are_sent_in_batches_of_ten() {
    let root = tempdir().unwrap();
    for i in 0..12 {
        sized_file(&root.path().join(format!("doc{i:02}.txt")), 100);
    }

    let mut config = RunConfig::default();
    config.settings.doc_group = true;

    let sizes = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&sizes);
    let mut messenger = MockMessenger::new();
    messenger
        .expect_send_batch()
        .times(2)
        .withf(|req: &BatchSend| {
            req.kind == MediaKind::Document
                && req
                    .media
                    .iter()
                    .all(|m| m.caption.as_deref() == Some(m.file_name.as_str()))
        })
        .returning(move |req: BatchSend| {
            seen.lock().unwrap().push(req.media.len());
            Ok(req.media.iter().map(|_| MessageId(1)).collect())
        });

    let mut orchestrator = Orchestrator::new(messenger, SilentReporter, config);
    let summary = orchestrator.run(root.path()).await.unwrap();

    assert_eq!(*sizes.lock().unwrap(), vec![10, 2]);
    // One outcome per batch under the default attribution.
    assert_eq!(summary.stats.success, 2);
    assert_eq!(summary.stats.total, 2);
}

#[tokio::test(start_paused = true)]
async fn test_album_caption_only_on_first_item() {
    let root = tempdir().unwrap();
    for name in ["1.jpg", "2.jpg", "3.jpg"] {
        sized_file(&root.path().join("trip").join(name), 100);
    }

    let mut config = RunConfig::default();
    config.settings.album_captions = true;

    let mut messenger = MockMessenger::new();
    messenger
        .expect_send_batch()
        .times(1)
        .withf(|req: &BatchSend| {
            let captions: Vec<Option<&str>> =
                req.media.iter().map(|m| m.caption.as_deref()).collect();
            captions == vec![Some("trip"), None, None]
        })
        .returning(|_| Ok(vec![MessageId(1), MessageId(2), MessageId(3)]));

    let mut orchestrator = Orchestrator::new(messenger, SilentReporter, config);
    orchestrator.run(root.path()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_single_images_carry_parent_folder_caption() {
    let root = tempdir().unwrap();
    sized_file(&root.path().join("cover.png"), 100);
    sized_file(&root.path().join("album/day1/pic.jpg"), 100);

    let mut config = RunConfig::default();
    config.settings.album_mode = false;
    config.settings.image_captions = true;

    let captions = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&captions);
    let mut messenger = MockMessenger::new();
    messenger
        .expect_send_single()
        .times(2)
        .returning(move |req: SingleSend| {
            seen.lock().unwrap().push(req.media.caption.clone());
            Ok(MessageId(1))
        });

    let mut orchestrator = Orchestrator::new(messenger, SilentReporter, config);
    orchestrator.run(root.path()).await.unwrap();

    assert_eq!(
        *captions.lock().unwrap(),
        vec![Some("Root".to_string()), Some("day1".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch_is_recorded_and_run_continues() {
    for (attribution, expected_failed, expected_total) in
        [(StatsAttribution::PerBatch, 1, 2), (StatsAttribution::PerItem, 3, 4)]
    {
        let root = tempdir().unwrap();
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            sized_file(&root.path().join(name), 100);
        }
        sized_file(&root.path().join("notes.txt"), 100);

        let mut config = RunConfig::default();
        config.attribution = attribution;

        let mut messenger = MockMessenger::new();
        messenger
            .expect_send_batch()
            .times(3)
            .returning(|_| Err(TransportError::Transient("connection reset".into())));
        messenger
            .expect_send_single()
            .times(1)
            .returning(|_| Ok(MessageId(9)));

        let mut orchestrator = Orchestrator::new(messenger, SilentReporter, config);
        let summary = orchestrator.run(root.path()).await.unwrap();

        assert_eq!(summary.stats.failed, expected_failed);
        assert_eq!(summary.stats.success, 1);
        assert_eq!(summary.stats.total, expected_total);
        assert_eq!(summary.final_state, RunState::Complete);
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_start_makes_no_calls() {
    let root = tempdir().unwrap();
    sized_file(&root.path().join("a.txt"), 10);
    sized_file(&root.path().join("b.jpg"), 10);

    let (handle, signal) = cancel_pair();
    handle.cancel();

    let messenger = MockMessenger::new();
    let mut orchestrator =
        Orchestrator::new(messenger, SilentReporter, RunConfig::default()).with_cancel(signal);
    let summary = orchestrator.run(root.path()).await.unwrap();

    assert_eq!(summary.final_state, RunState::Cancelled);
    assert_eq!(summary.stats.total, 0);
    assert_eq!(summary.subfolders_processed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_run_stops_after_current_call() {
    let root = tempdir().unwrap();
    for i in 0..5 {
        sized_file(&root.path().join(format!("f{i}.txt")), 10);
    }

    let (handle, signal) = cancel_pair();
    let handle = Arc::new(handle);
    let trip = Arc::clone(&handle);

    let mut messenger = MockMessenger::new();
    messenger
        .expect_send_single()
        .times(1)
        .returning(move |_| {
            trip.cancel();
            Ok(MessageId(1))
        });

    let mut orchestrator =
        Orchestrator::new(messenger, SilentReporter, RunConfig::default()).with_cancel(signal);
    let summary = orchestrator.run(root.path()).await.unwrap();

    assert_eq!(summary.final_state, RunState::Cancelled);
    assert_eq!(summary.stats.success, 1);
    assert_eq!(summary.stats.total, 1);
}

#[tokio::test(start_paused = true)]
async fn test_single_call_is_followed_by_size_delay_and_cooldown() {
    let root = tempdir().unwrap();
    sized_file(&root.path().join("scan.pdf"), 20 * MB);

    let mut messenger = MockMessenger::new();
    messenger
        .expect_send_single()
        .times(1)
        .returning(|_| Ok(MessageId(1)));

    let mut orchestrator = Orchestrator::new(messenger, SilentReporter, RunConfig::default());
    let start = Instant::now();
    orchestrator.run(root.path()).await.unwrap();
    let elapsed = start.elapsed();

    // 1 s base + 20 MB / 10 after the call, then the 1 s step cooldown.
    assert!(elapsed >= Duration::from_secs(4), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(4) + Duration::from_millis(100), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_album_delay_scales_with_batch_length() {
    let root = tempdir().unwrap();
    for name in ["1.jpg", "2.jpg", "3.jpg", "4.jpg"] {
        sized_file(&root.path().join(name), 100);
    }

    let mut messenger = MockMessenger::new();
    messenger
        .expect_send_batch()
        .times(1)
        .returning(|req: BatchSend| Ok(req.media.iter().map(|_| MessageId(1)).collect()));

    let mut orchestrator = Orchestrator::new(messenger, SilentReporter, RunConfig::default());
    let start = Instant::now();
    orchestrator.run(root.path()).await.unwrap();
    let elapsed = start.elapsed();

    // 1 s * 4 items * 0.5, then the cooldown.
    assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3) + Duration::from_millis(100), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_step_without_calls_adds_no_cooldown() {
    let root = tempdir().unwrap();
    sized_file(&root.path().join("huge1.jpg"), 60 * MB);
    sized_file(&root.path().join("huge2.png"), 70 * MB);
    sized_file(&root.path().join("note.txt"), 0);

    let mut messenger = MockMessenger::new();
    messenger.expect_send_batch().times(0);
    messenger
        .expect_send_single()
        .times(1)
        .returning(|_| Ok(MessageId(1)));

    let mut orchestrator = Orchestrator::new(messenger, SilentReporter, RunConfig::default());
    let start = Instant::now();
    let summary = orchestrator.run(root.path()).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(summary.stats.skipped, 2);
    assert_eq!(summary.stats.success, 1);
    // Only the document step paces: 1 s call delay and 1 s cooldown.
    assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");
}
