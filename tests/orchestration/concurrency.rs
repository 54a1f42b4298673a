use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use media_pipeline::database::PipelineStore;
use media_pipeline::models::MediaKind;
use media_pipeline::orchestration::{compute_status, DispatchOptions};
use media_pipeline::state_machine::{ItemStep, StageAction, TaskStatus};
use media_pipeline::PipelineError;

use crate::common::TestPipeline;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatch_publishes_once() {
    let pipeline = Arc::new(TestPipeline::new());
    let task = pipeline.task().await;
    let item = pipeline.item(task.task_id, MediaKind::Video).await;
    pipeline.run_stage(item.item_id, StageAction::Extract).await;
    assert_eq!(pipeline.reload(item.item_id).await.step(), ItemStep::ExtractCompleted);
    pipeline.broker.clear();
    pipeline.broker.set_publish_delay(Some(Duration::from_millis(20)));

    let first = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.dispatch(item.item_id, StageAction::Clear).await })
    };
    let second = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.dispatch(item.item_id, StageAction::Clear).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    let rejection = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(rejection, PipelineError::Precondition(msg) if msg.contains("already processing")));
    assert_eq!(pipeline.broker.published_count(), 1);
    assert_eq!(pipeline.reload(item.item_id).await.step(), ItemStep::Clearing);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_racing_dispatches_claim_once() {
    let pipeline = Arc::new(TestPipeline::new());
    let task = pipeline.task().await;
    let item = pipeline.item(task.task_id, MediaKind::Audio).await;

    let attempts = (0..16).map(|_| {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline
                .dispatch_with(item.item_id, StageAction::Clear, DispatchOptions::default())
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(PipelineError::is_rejection));
    assert_eq!(pipeline.broker.published_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sibling_callbacks_leave_consistent_rollup() {
    let pipeline = Arc::new(TestPipeline::new());
    let task = pipeline.task().await;
    let mut item_ids = Vec::new();
    for _ in 0..12 {
        let item = pipeline.item(task.task_id, MediaKind::Audio).await;
        pipeline.run_stage(item.item_id, StageAction::Clear).await;
        pipeline.dispatch(item.item_id, StageAction::Fast).await.unwrap();
        item_ids.push(item.item_id);
    }
    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Processing);

    let callbacks = item_ids.iter().map(|&item_id| {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.succeed(item_id, StageAction::Fast).await })
    });
    for joined in join_all(callbacks).await {
        joined.unwrap();
    }

    let items = pipeline.store.items_for_task(task.task_id).await.unwrap();
    assert_eq!(compute_status(&items), TaskStatus::Checked);
    assert_eq!(pipeline.task_status(task.task_id).await, TaskStatus::Checked);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_callback_racing_redelivery_applies_once() {
    let pipeline = Arc::new(TestPipeline::new());
    let task = pipeline.task().await;
    let item = pipeline.item(task.task_id, MediaKind::Audio).await;
    pipeline.dispatch(item.item_id, StageAction::Clear).await.unwrap();

    let deliveries = (0..6).map(|_| {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.succeed(item.item_id, StageAction::Clear).await })
    });
    let acks: Vec<_> = join_all(deliveries)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let applied = acks
        .iter()
        .filter(|ack| ack.disposition == media_pipeline::CallbackDisposition::Applied)
        .count();
    assert_eq!(applied, 1);
    assert_eq!(pipeline.reload(item.item_id).await.step(), ItemStep::ClearCompleted);
}
