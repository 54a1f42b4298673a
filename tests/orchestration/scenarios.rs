use media_pipeline::messaging::DispatchMessage;
use media_pipeline::models::MediaKind;
use media_pipeline::state_machine::{ItemStep, StageAction, TaskStatus};

use crate::common::TestPipeline;

#[tokio::test]
async fn test_audio_upload_goes_straight_to_denoise() {
    let pipeline = TestPipeline::new();
    let task = pipeline.task().await;
    let item = pipeline.item(task.task_id, MediaKind::Audio).await;

    let receipt = pipeline.dispatch(item.item_id, StageAction::Clear).await.unwrap();

    assert_eq!(receipt.queue_name, "audio_clear_queue");
    assert_eq!(receipt.step, ItemStep::Clearing);
    assert_eq!(pipeline.reload(item.item_id).await.step(), ItemStep::Clearing);
    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Processing);

    let published = pipeline.broker.published_to("audio_clear_queue");
    assert_eq!(published.len(), 1);
    let message = DispatchMessage::from_json(published[0].payload.clone()).unwrap();
    assert_eq!(message.task_info.id, item.item_id);
    assert_eq!(message.task_info.url, "https://files/call.wav");
    assert_eq!(message.task_type, 2);
}

#[tokio::test]
async fn test_video_runs_full_chain_to_transcribed() {
    let pipeline = TestPipeline::new();
    let task = pipeline.task().await;
    let item = pipeline.item(task.task_id, MediaKind::Video).await;

    pipeline.dispatch(item.item_id, StageAction::Extract).await.unwrap();
    assert_eq!(pipeline.reload(item.item_id).await.step(), ItemStep::Extracting);

    pipeline.succeed(item.item_id, StageAction::Extract).await;
    let extracted = pipeline.reload(item.item_id).await;
    assert_eq!(extracted.step(), ItemStep::ExtractCompleted);
    assert_eq!(extracted.voice_url.as_deref(), Some("https://files/meeting.wav"));
    assert_eq!(extracted.total_voice_seconds, Some(62.5));

    pipeline.run_stage(item.item_id, StageAction::Clear).await;
    let cleared = pipeline.reload(item.item_id).await;
    assert_eq!(cleared.step(), ItemStep::ClearCompleted);
    assert_eq!(cleared.clear_url.as_deref(), Some("https://files/meeting.clear.wav"));

    let transcribe = pipeline.dispatch(item.item_id, StageAction::Transcribe).await.unwrap();
    assert_eq!(transcribe.queue_name, "transcribe_queue");
    let published = pipeline.broker.published_to("transcribe_queue");
    assert_eq!(
        published[0].payload["task_info"]["clear_url"],
        "https://files/meeting.clear.wav"
    );

    pipeline.succeed(item.item_id, StageAction::Transcribe).await;
    let done = pipeline.reload(item.item_id).await;
    assert_eq!(done.step(), ItemStep::AllCompleted);
    assert_eq!(done.transcript.as_deref(), Some("hello everyone"));
    assert_eq!(done.language.as_deref(), Some("en"));
    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Transcribed);
    assert_eq!(pipeline.broker.published_count(), 3);
}

#[tokio::test]
async fn test_task_is_checked_once_every_item_is_fast_recognized() {
    let pipeline = TestPipeline::new();
    let task = pipeline.task().await;
    let mut items = Vec::new();
    for _ in 0..3 {
        items.push(pipeline.item(task.task_id, MediaKind::Audio).await);
    }

    for item in &items[..2] {
        pipeline.run_stage(item.item_id, StageAction::Clear).await;
        pipeline.run_stage(item.item_id, StageAction::Fast).await;
        assert_eq!(pipeline.reload(item.item_id).await.step(), ItemStep::FastCompleted);
    }
    pipeline.dispatch(items[2].item_id, StageAction::Clear).await.unwrap();
    assert_eq!(pipeline.reload(items[2].item_id).await.step(), ItemStep::Clearing);

    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Processing);

    pipeline.succeed(items[2].item_id, StageAction::Clear).await;
    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Processing);
    pipeline.run_stage(items[2].item_id, StageAction::Fast).await;
    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Checked);
}

#[tokio::test]
async fn test_retranscription_allowed_after_denoise() {
    let pipeline = TestPipeline::new();
    let task = pipeline.task().await;
    let item = pipeline.item(task.task_id, MediaKind::Audio).await;

    pipeline
        .dispatch_with(
            item.item_id,
            StageAction::Transcribe,
            media_pipeline::DispatchOptions::without_denoise(),
        )
        .await
        .unwrap();
    pipeline.succeed(item.item_id, StageAction::Transcribe).await;
    assert_eq!(
        pipeline.reload(item.item_id).await.step(),
        ItemStep::UnclearTranscribed
    );
    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Transcribed);

    // Same-quality transcription is a duplicate
    let err = pipeline
        .dispatch(item.item_id, StageAction::Transcribe)
        .await
        .unwrap_err();
    assert!(err.is_rejection());

    pipeline.run_stage(item.item_id, StageAction::Clear).await;
    assert_eq!(pipeline.reload(item.item_id).await.step(), ItemStep::ClearCompleted);

    pipeline.run_stage(item.item_id, StageAction::Transcribe).await;
    let item = pipeline.reload(item.item_id).await;
    assert_eq!(item.step(), ItemStep::AllCompleted);
    assert!(item.progress().transcript_is_current());
}
