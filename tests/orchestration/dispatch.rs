use media_pipeline::database::PipelineStore;
use media_pipeline::messaging::DispatchMessage;
use media_pipeline::models::MediaKind;
use media_pipeline::orchestration::{
    compute_status, DispatchOptions, DispatchRequest, DispatchStatus,
};
use media_pipeline::state_machine::{ItemState, ItemStep, StageAction, StageProgress, TaskStatus};
use media_pipeline::PipelineError;
use serde_json::json;

use crate::common::TestPipeline;

#[tokio::test]
async fn test_publish_failure_marks_item_failed() {
    let pipeline = TestPipeline::new();
    let task = pipeline.task().await;
    let item = pipeline.item(task.task_id, MediaKind::Video).await;
    pipeline.broker.fail_next(1);

    let err = pipeline
        .dispatch(item.item_id, StageAction::Extract)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Transport(_)));
    assert!(!err.is_rejection());
    let failed = pipeline.reload(item.item_id).await;
    assert_eq!(failed.step(), ItemStep::Failed);
    assert_eq!(failed.retry_count, 1);
    assert!(failed
        .error_message
        .as_deref()
        .is_some_and(|m| m.starts_with("dispatch to voice_extract_queue failed")));
    assert_eq!(pipeline.broker.published_count(), 0);
    assert_eq!(pipeline.broker.attempt_count(), 1);
    // Nothing left pending for the roll-up
    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Empty);

    let receipt = pipeline.dispatch(item.item_id, StageAction::Extract).await.unwrap();
    assert_eq!(receipt.step, ItemStep::Extracting);
    assert_eq!(pipeline.reload(item.item_id).await.error_message, None);
    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Processing);
}

#[tokio::test]
async fn test_guard_rejections_leave_item_untouched() {
    let pipeline = TestPipeline::new();
    let task = pipeline.task().await;
    let video = pipeline.item(task.task_id, MediaKind::Video).await;

    let err = pipeline.dispatch(video.item_id, StageAction::Clear).await.unwrap_err();
    assert!(matches!(err, PipelineError::Precondition(ref m) if m.contains("cannot clear")));

    pipeline.dispatch(video.item_id, StageAction::Extract).await.unwrap();
    let err = pipeline.dispatch(video.item_id, StageAction::Extract).await.unwrap_err();
    assert!(matches!(err, PipelineError::Precondition(ref m) if m.contains("already processing")));

    let audio = pipeline.item(task.task_id, MediaKind::Audio).await;
    let err = pipeline.dispatch(audio.item_id, StageAction::Transcribe).await.unwrap_err();
    assert!(matches!(err, PipelineError::Precondition(ref m) if m.contains("not denoised")));

    let err = pipeline.dispatch(404, StageAction::Clear).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotFound { entity: "item", id: 404 }));

    assert_eq!(pipeline.reload(audio.item_id).await.step(), ItemStep::Uploaded);
    assert_eq!(pipeline.broker.published_count(), 1);
}

#[tokio::test]
async fn test_rollup_matches_items_after_rejected_dispatch() {
    let pipeline = TestPipeline::new();
    let task = pipeline.task().await;
    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Empty);
    let audio = pipeline.item(task.task_id, MediaKind::Audio).await;
    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Processing);

    // Roll-up drifted behind the task's items, e.g. an item inserted directly
    assert!(pipeline
        .store
        .compare_and_swap_task_status(task.task_id, TaskStatus::Processing, TaskStatus::Empty)
        .await
        .unwrap());

    let err = pipeline
        .dispatch(audio.item_id, StageAction::Transcribe)
        .await
        .unwrap_err();
    assert!(err.is_rejection());

    let items = pipeline.store.items_for_task(task.task_id).await.unwrap();
    assert_eq!(
        pipeline.task_status(task.task_id).await,
        compute_status(&items)
    );
    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Processing);
}

#[tokio::test]
async fn test_paused_item_rejected_unless_forced() {
    let pipeline = TestPipeline::new();
    let task = pipeline.task().await;
    let item = pipeline.item(task.task_id, MediaKind::Audio).await;

    let mut paused = item.clone();
    paused.state = ItemState::from_parts(ItemStep::Paused, StageProgress::default(), false).unwrap();
    pipeline.store.compare_and_swap_item(&paused).await.unwrap().unwrap();

    let err = pipeline.dispatch(item.item_id, StageAction::Clear).await.unwrap_err();
    assert!(matches!(err, PipelineError::Precondition(ref m) if m.contains("paused")));

    let receipt = pipeline
        .dispatch_with(item.item_id, StageAction::Clear, DispatchOptions::forced())
        .await
        .unwrap();
    assert_eq!(receipt.step, ItemStep::Clearing);
}

#[tokio::test]
async fn test_force_redispatches_completed_stage() {
    let pipeline = TestPipeline::new();
    let task = pipeline.task().await;
    let item = pipeline.item(task.task_id, MediaKind::Audio).await;
    pipeline.run_stage(item.item_id, StageAction::Clear).await;

    assert!(pipeline
        .dispatch(item.item_id, StageAction::Clear)
        .await
        .unwrap_err()
        .is_rejection());

    pipeline
        .dispatch_with(item.item_id, StageAction::Clear, DispatchOptions::forced())
        .await
        .unwrap();
    let item = pipeline.reload(item.item_id).await;
    assert_eq!(item.step(), ItemStep::Clearing);
    assert!(item.progress().denoised);
    assert_eq!(pipeline.broker.published_to("audio_clear_queue").len(), 2);
}

#[tokio::test]
async fn test_without_denoise_transcribes_source_audio() {
    let pipeline = TestPipeline::new();
    let task = pipeline.task().await;
    let item = pipeline.item(task.task_id, MediaKind::Audio).await;

    let receipt = pipeline
        .dispatch_with(
            item.item_id,
            StageAction::Transcribe,
            DispatchOptions::without_denoise().with_priority(9),
        )
        .await
        .unwrap();

    assert_eq!(receipt.queue_name, "transcribe_queue");
    let published = pipeline.broker.published_to("transcribe_queue");
    let message = DispatchMessage::from_json(published[0].payload.clone()).unwrap();
    assert_eq!(message.metadata.priority, 9);
    assert_eq!(message.metadata.message_id, receipt.message_id);
    assert_eq!(message.task_info.clear_url, None);
    assert!(pipeline.reload(item.item_id).await.state.transcribe_undenoised());
}

#[tokio::test]
async fn test_batch_dispatch_expands_tasks_and_reports_per_item() {
    let pipeline = TestPipeline::new();
    let task = pipeline.task().await;
    let audio = pipeline.item(task.task_id, MediaKind::Audio).await;
    let busy = pipeline.item(task.task_id, MediaKind::Audio).await;
    let video = pipeline.item(task.task_id, MediaKind::Video).await;
    pipeline.dispatch(busy.item_id, StageAction::Clear).await.unwrap();

    let mut request = DispatchRequest::for_tasks([task.task_id, 77], StageAction::Clear);
    request.item_ids = vec![audio.item_id, 500];

    let summary = pipeline.system.dispatcher().dispatch_batch(request).await.unwrap();

    // audio once despite being named twice, busy, video, missing item, missing task
    assert_eq!(summary.total, 5);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 4);
    assert!(!summary.is_complete_success());

    let result_for = |item_id: i64| {
        summary
            .results
            .iter()
            .find(|r| r.item_id == Some(item_id))
            .unwrap()
    };
    assert_eq!(result_for(audio.item_id).status, DispatchStatus::Success);
    assert_eq!(result_for(audio.item_id).queue_name, Some("audio_clear_queue"));
    assert!(result_for(busy.item_id).message.contains("already processing"));
    assert!(result_for(video.item_id).message.contains("cannot clear"));
    assert!(result_for(500).message.contains("not found"));

    let missing_task = summary
        .results
        .iter()
        .find(|r| r.item_id.is_none())
        .unwrap();
    assert_eq!(missing_task.task_id, Some(77));
    assert_eq!(missing_task.status, DispatchStatus::Failed);

    assert_eq!(pipeline.broker.published_count(), 2);
}

#[tokio::test]
async fn test_batch_dispatch_rejects_malformed_request() {
    let pipeline = TestPipeline::new();
    let dispatcher = pipeline.system.dispatcher();

    let empty = DispatchRequest::for_items(Vec::new(), StageAction::Clear);
    assert!(matches!(
        dispatcher.dispatch_batch(empty).await,
        Err(PipelineError::Validation(_))
    ));

    let unknown: DispatchRequest =
        serde_json::from_value(json!({"item_ids": [1], "task_type": 12})).unwrap();
    let err = dispatcher.dispatch_batch(unknown).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(ref m) if m.contains("'12'")));
    assert_eq!(pipeline.broker.attempt_count(), 0);
}

#[tokio::test]
async fn test_batch_accepts_numeric_task_type() {
    let pipeline = TestPipeline::new();
    let task = pipeline.task().await;
    let item = pipeline.item(task.task_id, MediaKind::Video).await;

    let request: DispatchRequest = serde_json::from_value(json!({
        "item_ids": [item.item_id],
        "task_type": 1,
        "priority": 3
    }))
    .unwrap();
    let summary = pipeline.system.dispatcher().dispatch_batch(request).await.unwrap();

    assert!(summary.is_complete_success());
    assert_eq!(pipeline.reload(item.item_id).await.step(), ItemStep::Extracting);
    let items = pipeline.store.items_for_task(task.task_id).await.unwrap();
    assert_eq!(items.len(), 1);
}
