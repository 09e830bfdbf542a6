mod common;

use common::*;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use image::RgbImage;
use video_indexer::{
    BatchProcessor, ConfigBuilder, ErrorKind, MetadataRecord, MetadataStore, Modality, ProcessingResult,
    ProcessingStatus, Result, TextRecognizer, TranscriptSegment, VideoIndexer,
};

fn texts(records: &[MetadataRecord]) -> Vec<(String, String)> {
    records
        .iter()
        .map(|r| (r.timestamp.clone(), r.text().unwrap_or_default().to_string()))
        .collect()
}

#[tokio::test]
async fn test_video_becomes_searchable_timeline() {
    let harness = Harness::new(ScriptedSpeech::default().with("highway.mp4", highway_transcript())).await;
    let path = harness.video("highway.mp4", &highway_clip());

    let result = harness.indexer.process(&path, "highway.mp4").await;

    assert_eq!(result.status, ProcessingStatus::Completed);
    assert_eq!(result.sampling.frames_read, 450);
    assert_eq!(result.sampling.candidates, 30);
    assert_eq!(result.sampling.keyframes, 2);
    assert_eq!(result.visual.records_written, 2);
    assert_eq!(result.speech.records_written, 2);

    let visual: Vec<MetadataRecord> = harness
        .indexer
        .store()
        .records_for_video("highway.mp4")
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.modality() == Modality::Visual)
        .collect();
    assert_eq!(
        texts(&visual),
        vec![
            ("00:00:00".to_string(), "Welcome".to_string()),
            ("00:00:05".to_string(), "EXIT 12".to_string()),
        ]
    );
    assert_eq!(visual[1].frame_number.as_deref(), Some("150"));

    let hits = harness.indexer.search("EXIT").await;
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().any(|r| r.ocr_text.as_deref() == Some("EXIT 12")));
    assert!(hits.iter().any(|r| r.transcription.as_deref() == Some("Take the next exit.")));
    assert!(harness.indexer.search("tollbooth").await.is_empty());
}

#[tokio::test]
async fn test_timeline_queries() {
    let harness = Harness::new(ScriptedSpeech::default().with("highway.mp4", highway_transcript())).await;
    let path = harness.video("highway.mp4", &highway_clip());
    harness.indexer.process(&path, "highway.mp4").await;

    assert_eq!(harness.indexer.timestamps("highway.mp4").await.unwrap(), vec![0, 5, 6]);

    let near = harness.indexer.records_near("highway.mp4", 5.0, 1.0).await.unwrap();
    assert_eq!(
        texts(&near),
        vec![
            ("00:00:05".to_string(), "EXIT 12".to_string()),
            ("00:00:06".to_string(), "Take the next exit.".to_string()),
        ]
    );

    let stats = harness.indexer.stats("highway.mp4").await.unwrap();
    assert_eq!(stats.total_records, 4);
    assert_eq!(stats.ocr_records, 2);
    assert_eq!(stats.transcription_records, 2);
}

#[tokio::test]
async fn test_two_videos_then_reset() {
    let harness = Harness::new(ScriptedSpeech::default()).await;
    let a = harness.video("a.mp4", &highway_clip());
    let b = harness.video("b.mp4", &frames(&[(SERVICES, 90)]));

    harness.indexer.process(&a, "a.mp4").await;
    harness.indexer.process(&b, "b.mp4").await;

    let videos: Vec<String> = harness.indexer.list_videos().await.unwrap().into_iter().collect();
    assert_eq!(videos, vec!["a.mp4".to_string(), "b.mp4".to_string()]);

    let grouped = harness.indexer.search_by_video("e").await;
    assert_eq!(grouped.keys().cloned().collect::<Vec<_>>(), videos);

    harness.indexer.reset().await.unwrap();
    assert!(harness.indexer.list_videos().await.unwrap().is_empty());
    assert!(harness.indexer.search("EXIT").await.is_empty());
}

#[tokio::test]
async fn test_reset_then_replay_matches_fresh_run() {
    let harness = Harness::new(ScriptedSpeech::default().with("highway.mp4", highway_transcript())).await;
    let path = harness.video("highway.mp4", &highway_clip());

    harness.indexer.process(&path, "highway.mp4").await;
    let mut first = harness.indexer.store().records_for_video("highway.mp4").await.unwrap();

    // Reprocessing without a reset duplicates every record
    harness.indexer.process(&path, "highway.mp4").await;
    assert_eq!(harness.indexer.store().count().await.unwrap(), 2 * first.len() as u64);

    harness.indexer.reset().await.unwrap();
    harness.indexer.process(&path, "highway.mp4").await;
    let mut replayed = harness.indexer.store().records_for_video("highway.mp4").await.unwrap();

    // OCR and speech interleave nondeterministically
    let key = |r: &MetadataRecord| (r.timestamp.clone(), r.text().map(str::to_string));
    first.sort_by_key(key);
    replayed.sort_by_key(key);
    assert_eq!(first, replayed);
}

#[tokio::test]
async fn test_garbled_frames_are_skipped() {
    let harness = Harness::new(ScriptedSpeech::default()).await;
    let path = harness.video("garbled.mp4", &frames(&[(WELCOME, 30), (GARBLED, 30), (EXIT_SIGN, 30)]));

    let result = harness.indexer.process(&path, "garbled.mp4").await;

    assert_eq!(result.status, ProcessingStatus::Completed);
    assert_eq!(result.visual.units, 3);
    assert_eq!(result.visual.unit_failures.len(), 1);
    assert_eq!(result.visual.records_written, 2);
}

#[tokio::test]
async fn test_speech_failure_keeps_visual_records() {
    let harness = Harness::new(ScriptedSpeech::default().broken("silent.mp4")).await;
    let path = harness.video("silent.mp4", &highway_clip());

    let result = harness.indexer.process(&path, "silent.mp4").await;

    assert_eq!(result.status, ProcessingStatus::Partial);
    assert!(result.is_success());
    assert!(result.speech.failure.is_some());
    assert_eq!(result.speech.records_written, 0);
    assert_eq!(result.visual.records_written, 2);
    assert_eq!(harness.indexer.search("exit").await.len(), 1);
}

#[tokio::test]
async fn test_unreadable_video_does_not_stop_batch() {
    let harness = Harness::new(ScriptedSpeech::default()).await;
    let good = harness.video("good.mp4", &highway_clip());
    let broken = harness.video("broken.mp4", &[]);
    let missing = harness.dir.path().join("missing.mp4");

    let processor = BatchProcessor::new(harness.indexer.clone(), 2);
    let summary = processor.process_paths(&[broken, good, missing]).await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.successful, 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.results[0].status, ProcessingStatus::Failed);
    assert_eq!(summary.results[1].status, ProcessingStatus::Completed);
    assert_eq!(summary.results[2].status, ProcessingStatus::Failed);
    assert!(summary.results[0].error_message.is_some());

    let videos: Vec<String> = harness.indexer.list_videos().await.unwrap().into_iter().collect();
    assert_eq!(videos, vec!["good.mp4".to_string()]);
}

#[tokio::test]
async fn test_batch_over_directory_with_summary() {
    let dir = TempDir::new().unwrap();
    let videos = dir.path().join("videos");
    std::fs::create_dir_all(videos.join("nested")).unwrap();
    write_video(&videos, "a.mp4", &highway_clip());
    write_video(&videos.join("nested"), "b.mov", &frames(&[(SERVICES, 60)]));
    std::fs::write(videos.join("notes.txt"), b"not a video").unwrap();

    let summary_path = dir.path().join("out").join("summary.json");
    let mut config = ConfigBuilder::new()
        .with_work_dir(dir.path().join("work"))
        .reset_before_processing(true)
        .build();
    config.processing.summary_path = Some(summary_path.clone());

    let harness = Harness::with_config(dir, config, ScriptedSpeech::default()).await;
    harness
        .indexer
        .store()
        .append("stale.mp4", &video_indexer::Observation::speech(0.0, "from an earlier run"))
        .await
        .unwrap();

    let processor = BatchProcessor::new(harness.indexer.clone(), 4);
    let summary = processor.process_paths(&[videos]).await.unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.successful, 2);
    assert_eq!(summary.total_records, 3);

    let names: Vec<String> = harness.indexer.list_videos().await.unwrap().into_iter().collect();
    assert_eq!(names, vec!["a.mp4".to_string(), "b.mov".to_string()]);

    let saved: ProcessingResult =
        serde_json::from_str(&std::fs::read_to_string(&summary_path).unwrap()).unwrap();
    assert_eq!(saved.total, 2);
    assert_eq!(saved.results[0].video_name, "a.mp4");
}

#[tokio::test]
async fn test_process_uploaded_bytes() {
    let harness = Harness::new(ScriptedSpeech::default()).await;

    let result = harness
        .indexer
        .process_bytes(&highway_clip(), "dashcam.mp4")
        .await
        .unwrap();

    assert_eq!(result.status, ProcessingStatus::Completed);
    assert_eq!(result.video_name, "dashcam.mp4");

    let hits = harness.indexer.search("exit").await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].video_name, "dashcam.mp4");
}

#[tokio::test]
async fn test_cancelled_before_start_writes_nothing() {
    let harness = Harness::new(ScriptedSpeech::default().with("highway.mp4", highway_transcript())).await;
    let path = harness.video("highway.mp4", &highway_clip());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = harness.indexer.process_with_cancel(&path, "highway.mp4", &cancel).await;

    assert_eq!(result.status, ProcessingStatus::Cancelled);
    assert_eq!(result.records_written(), 0);
    assert_eq!(harness.indexer.store().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_blank_segments_and_frames_leave_no_records() {
    let speech = ScriptedSpeech::default().with("quiet.mp4", vec![TranscriptSegment::new(0.0, 1.0, "  ")]);
    let harness = Harness::new(speech).await;
    let path = harness.video("quiet.mp4", &frames(&[(BLANK, 60)]));

    let result = harness.indexer.process(&path, "quiet.mp4").await;

    assert_eq!(result.status, ProcessingStatus::Completed);
    assert_eq!(result.visual.empty_units, 1);
    assert_eq!(result.speech.empty_units, 1);
    assert!(harness.indexer.list_videos().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_search_on_missing_table_is_empty() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("video_metadata.db");

    let store = MetadataStore::open_path(&db_path).await.unwrap();
    store
        .append("a.mp4", &video_indexer::Observation::frame(42, "00:00:01", "EXIT"))
        .await
        .unwrap();

    let indexer = VideoIndexer::new(
        ConfigBuilder::new().with_work_dir(dir.path().join("work")).build(),
        store,
        Arc::new(SyntheticDecoder::default()),
        Arc::new(LabelReader),
        Arc::new(ScriptedSpeech::default()),
    );
    let hits = indexer.search("EXIT").await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].frame_number.as_deref(), Some("42"));

    // Someone else drops the table behind the indexer's back
    let other = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(SqliteConnectOptions::new().filename(&db_path))
        .await
        .unwrap();
    sqlx::query("DROP TABLE video_metadata").execute(&other).await.unwrap();
    other.close().await;

    assert!(indexer.search("EXIT").await.is_empty());
    assert!(indexer.store().verify_schema().await.is_err());
}

/// Reads labels like [`LabelReader`], and fires `cancel` once it has read the exit sign
struct CancelAtExitSign {
    cancel: CancellationToken,
}

impl TextRecognizer for CancelAtExitSign {
    fn name(&self) -> &str {
        "cancel-at-exit-sign"
    }

    fn recognize(&self, image: &RgbImage) -> Result<Vec<String>> {
        if image.get_pixel(0, 0).0[0] == EXIT_SIGN {
            self.cancel.cancel();
        }
        LabelReader.recognize(image)
    }
}

#[tokio::test]
async fn test_cancel_mid_video_keeps_written_records() {
    let dir = TempDir::new().unwrap();
    let config = Harness::config(&dir);
    let cancel = CancellationToken::new();
    let reader = Arc::new(CancelAtExitSign { cancel: cancel.clone() });
    let harness = Harness::with_parts(dir, config, SyntheticDecoder::default(), reader, ScriptedSpeech::default()).await;

    // A cut every half second after the exit sign keeps the sampler busy
    let mut runs = vec![(WELCOME, 30), (EXIT_SIGN, 30)];
    for _ in 0..100 {
        runs.push((SERVICES, 15));
        runs.push((WELCOME, 15));
    }
    let labels = frames(&runs);
    let path = harness.video("long.mp4", &labels);

    let result = harness.indexer.process_with_cancel(&path, "long.mp4", &cancel).await;

    assert_eq!(result.status, ProcessingStatus::Cancelled);
    assert!(result.visual.cancelled);
    assert!(result.sampling.frames_read < labels.len() as u64);

    let stored = harness.indexer.store().records_for_video("long.mp4").await.unwrap();
    assert_eq!(
        texts(&stored),
        vec![
            ("00:00:00".to_string(), "Welcome".to_string()),
            ("00:00:01".to_string(), "EXIT 12".to_string()),
        ]
    );
    assert_eq!(harness.indexer.search("exit").await.len(), 1);
}

#[tokio::test]
async fn test_model_failure_mid_video_fails_only_that_video() {
    let harness = Harness::new(ScriptedSpeech::default()).await;
    let crash = harness.video("crash.mp4", &frames(&[(WELCOME, 30), (POISON, 30), (EXIT_SIGN, 30)]));
    let good = harness.video("good.mp4", &highway_clip());

    let processor = BatchProcessor::new(harness.indexer.clone(), 2);
    let summary = processor.process_paths(&[crash, good]).await.unwrap();

    let crashed = &summary.results[0];
    assert_eq!(crashed.status, ProcessingStatus::Failed);
    assert_eq!(crashed.visual.failure.as_ref().map(|f| f.kind), Some(ErrorKind::ModelInitFailure));
    assert!(crashed.error_message.as_deref().unwrap().contains("model crashed"));

    assert_eq!(summary.results[1].status, ProcessingStatus::Completed);
    assert_eq!(summary.results[1].visual.records_written, 2);
    assert_eq!(summary.successful, 1);
    assert_eq!(summary.failed, 1);

    // Records written before the model went down stay
    let crash_records = harness.indexer.store().records_for_video("crash.mp4").await.unwrap();
    assert_eq!(texts(&crash_records), vec![("00:00:00".to_string(), "Welcome".to_string())]);
    assert_eq!(harness.indexer.search("EXIT").await.len(), 1);
}

#[tokio::test]
async fn test_video_without_audio_skips_transcription() {
    let dir = TempDir::new().unwrap();
    let config = Harness::config(&dir);
    let harness = Harness::with_parts(
        dir,
        config,
        SyntheticDecoder::default().silent("mute.mp4"),
        Arc::new(LabelReader),
        ScriptedSpeech::default().with("mute.mp4", highway_transcript()),
    )
    .await;
    let path = harness.video("mute.mp4", &highway_clip());

    let result = harness.indexer.process(&path, "mute.mp4").await;

    assert_eq!(result.status, ProcessingStatus::Partial);
    assert_eq!(result.speech.failure.as_ref().map(|f| f.kind), Some(ErrorKind::PerUnitExtractionFailure));
    assert_eq!(result.speech.records_written, 0);
    assert_eq!(result.visual.records_written, 2);
}

#[tokio::test]
async fn test_empty_search_lists_every_record() {
    let harness = Harness::new(ScriptedSpeech::default().with("highway.mp4", highway_transcript())).await;
    let path = harness.video("highway.mp4", &highway_clip());
    harness.indexer.process(&path, "highway.mp4").await;

    assert_eq!(harness.indexer.search("").await.len(), 4);
}
