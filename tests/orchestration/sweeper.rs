use std::time::Duration;

use chrono::Utc;
use media_pipeline::config::{PipelineConfig, SweeperConfig};
use media_pipeline::database::PipelineStore;
use media_pipeline::messaging::{CallbackRequest, DispatchMessage};
use media_pipeline::models::MediaKind;
use media_pipeline::orchestration::{StallAction, SweepReport};
use media_pipeline::state_machine::{CallbackOutcome, ItemStep, StageAction, TaskStatus};
use media_pipeline::PipelineError;

use crate::common::TestPipeline;

const STALL_TIMEOUT_SECONDS: u64 = 60;

fn sweeper_pipeline(sweeper: SweeperConfig) -> TestPipeline {
    TestPipeline::with_config(PipelineConfig {
        sweeper: SweeperConfig {
            stall_timeout_seconds: STALL_TIMEOUT_SECONDS,
            ..sweeper
        },
        ..PipelineConfig::default()
    })
}

fn age(pipeline: &TestPipeline, item_id: i64) {
    pipeline
        .store
        .backdate_item(item_id, Utc::now() - chrono::Duration::minutes(5));
}

#[tokio::test]
async fn test_stalled_item_is_republished() {
    let pipeline = sweeper_pipeline(SweeperConfig::default());
    let task = pipeline.task().await;
    let stalled = pipeline.item(task.task_id, MediaKind::Audio).await;
    let fresh = pipeline.item(task.task_id, MediaKind::Audio).await;
    pipeline.dispatch(stalled.item_id, StageAction::Clear).await.unwrap();
    pipeline.dispatch(fresh.item_id, StageAction::Clear).await.unwrap();
    age(&pipeline, stalled.item_id);

    let report = pipeline.system.sweeper().sweep_once().await.unwrap();

    assert_eq!(
        report,
        SweepReport {
            stalled_found: 1,
            redispatched: 1,
            ..SweepReport::default()
        }
    );
    let item = pipeline.reload(stalled.item_id).await;
    assert_eq!(item.step(), ItemStep::Clearing);
    assert_eq!(item.retry_count, 1);

    let published = pipeline.broker.published_to("audio_clear_queue");
    assert_eq!(published.len(), 3);
    let republished = DispatchMessage::from_json(published[2].payload.clone()).unwrap();
    assert_eq!(republished.task_info.id, stalled.item_id);
    assert_eq!(republished.metadata.retry_count, 1);

    // Re-publish refreshed the item, so the next pass leaves it alone
    let report = pipeline.system.sweeper().sweep_once().await.unwrap();
    assert_eq!(report, SweepReport::default());
}

#[tokio::test]
async fn test_exhausted_redispatch_budget_fails_item() {
    let pipeline = sweeper_pipeline(SweeperConfig {
        max_redispatches: 1,
        ..SweeperConfig::default()
    });
    let task = pipeline.task().await;
    let item = pipeline.item(task.task_id, MediaKind::Audio).await;
    pipeline.dispatch(item.item_id, StageAction::Clear).await.unwrap();

    age(&pipeline, item.item_id);
    let first = pipeline.system.sweeper().sweep_once().await.unwrap();
    assert_eq!(first.redispatched, 1);

    age(&pipeline, item.item_id);
    let second = pipeline.system.sweeper().sweep_once().await.unwrap();
    assert_eq!(second.marked_failed, 1);
    assert_eq!(second.redispatched, 0);

    let failed = pipeline.reload(item.item_id).await;
    assert_eq!(failed.step(), ItemStep::Failed);
    assert_eq!(failed.retry_count, 2);
    let message = failed.error_message.unwrap();
    assert!(message.starts_with("stalled in "));
    assert!(message.ends_with("more than 60s"));
    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Empty);
}

#[tokio::test]
async fn test_republish_failure_keeps_transport_error() {
    let pipeline = sweeper_pipeline(SweeperConfig::default());
    let task = pipeline.task().await;
    let item = pipeline.item(task.task_id, MediaKind::Audio).await;
    pipeline.dispatch(item.item_id, StageAction::Clear).await.unwrap();
    age(&pipeline, item.item_id);
    let stalled = pipeline.reload(item.item_id).await;

    // Roll-up knocked out of line so the recompute is observable
    assert!(pipeline
        .store
        .compare_and_swap_task_status(task.task_id, TaskStatus::Processing, TaskStatus::Empty)
        .await
        .unwrap());
    pipeline.broker.fail_next(1);
    // Retry bump goes through, recording the failure does not
    pipeline.store.limit_item_writes(Some(1));

    let err = pipeline
        .system
        .dispatcher()
        .republish_stalled(&stalled)
        .await
        .unwrap_err();
    pipeline.store.limit_item_writes(None);

    assert!(matches!(err, PipelineError::Transport(_)));
    let item = pipeline.reload(item.item_id).await;
    assert_eq!(item.step(), ItemStep::Clearing);
    assert_eq!(item.retry_count, 1);
    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Processing);
}

#[tokio::test]
async fn test_mark_failed_action_never_republishes() {
    let pipeline = sweeper_pipeline(SweeperConfig {
        stall_action: StallAction::MarkFailed,
        ..SweeperConfig::default()
    });
    let task = pipeline.task().await;
    let done = pipeline.item(task.task_id, MediaKind::Audio).await;
    let stuck = pipeline.item(task.task_id, MediaKind::Video).await;
    pipeline.run_stage(done.item_id, StageAction::Clear).await;
    pipeline.run_stage(done.item_id, StageAction::Fast).await;
    pipeline.run_stage(stuck.item_id, StageAction::Extract).await;
    pipeline.dispatch(stuck.item_id, StageAction::Clear).await.unwrap();
    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Processing);
    let published_before = pipeline.broker.published_count();

    age(&pipeline, stuck.item_id);
    let report = pipeline.system.sweeper().sweep_once().await.unwrap();

    assert_eq!(report.marked_failed, 1);
    assert_eq!(pipeline.broker.published_count(), published_before);
    let stuck = pipeline.reload(stuck.item_id).await;
    assert_eq!(stuck.step(), ItemStep::Failed);
    assert!(stuck.progress().extracted);
    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Checked);
}

#[tokio::test]
async fn test_heartbeat_keeps_item_out_of_sweep() {
    let pipeline = sweeper_pipeline(SweeperConfig::default());
    let task = pipeline.task().await;
    let item = pipeline.item(task.task_id, MediaKind::Audio).await;
    pipeline.dispatch(item.item_id, StageAction::Clear).await.unwrap();
    age(&pipeline, item.item_id);

    pipeline
        .callback(CallbackRequest::new(
            item.item_id,
            StageAction::Clear,
            CallbackOutcome::Processing,
        ))
        .await
        .unwrap();

    let report = pipeline.system.sweeper().sweep_once().await.unwrap();
    assert_eq!(report.stalled_found, 0);
    assert_eq!(pipeline.reload(item.item_id).await.retry_count, 0);
}

#[tokio::test]
async fn test_auto_start_dispatches_uploads_to_first_stage() {
    let pipeline = sweeper_pipeline(SweeperConfig {
        auto_start: true,
        ..SweeperConfig::default()
    });
    let task = pipeline.task().await;
    let audio = pipeline.item(task.task_id, MediaKind::Audio).await;
    let video = pipeline.item(task.task_id, MediaKind::Video).await;

    let report = pipeline.system.sweeper().sweep_once().await.unwrap();

    assert_eq!(report.auto_started, 2);
    assert_eq!(pipeline.reload(audio.item_id).await.step(), ItemStep::Clearing);
    assert_eq!(pipeline.reload(video.item_id).await.step(), ItemStep::Extracting);
    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Processing);

    let report = pipeline.system.sweeper().sweep_once().await.unwrap();
    assert_eq!(report.auto_started, 0);
}

#[tokio::test]
async fn test_sweeper_loop_runs_until_stopped() {
    let pipeline = sweeper_pipeline(SweeperConfig {
        auto_start: true,
        interval_seconds: 1,
        ..SweeperConfig::default()
    });
    let task = pipeline.task().await;
    let item = pipeline.item(task.task_id, MediaKind::Audio).await;

    let mut handle = pipeline.system.start_sweeper();
    assert!(handle.is_running());

    // First tick fires immediately
    for _ in 0..50 {
        if pipeline.reload(item.item_id).await.step() == ItemStep::Clearing {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pipeline.reload(item.item_id).await.step(), ItemStep::Clearing);

    handle.stop().await;
    assert!(!handle.is_running());
}
