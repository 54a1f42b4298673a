//! Pipeline fixture on the in-memory store and broker.

use std::sync::Arc;

use media_pipeline::config::PipelineConfig;
use media_pipeline::database::{InMemoryStore, PipelineStore};
use media_pipeline::messaging::{CallbackRequest, InMemoryBroker};
use media_pipeline::models::{Item, MediaKind, NewItem, NewTask, Task, TaskFlow};
use media_pipeline::orchestration::{CallbackAck, DispatchOptions, DispatchReceipt, PipelineSystem};
use media_pipeline::state_machine::{CallbackOutcome, StageAction, TaskStatus};
use media_pipeline::Result;
use serde_json::{json, Value};

pub struct TestPipeline {
    pub system: PipelineSystem,
    pub store: Arc<InMemoryStore>,
    pub broker: Arc<InMemoryBroker>,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let (system, store, broker) = PipelineSystem::in_memory(config);
        Self {
            system,
            store,
            broker,
        }
    }

    pub async fn task(&self) -> Task {
        self.store
            .insert_task(NewTask::new(1, "interviews"))
            .await
            .unwrap()
    }

    pub async fn task_with_flow(&self, flow: TaskFlow) -> Task {
        self.store
            .insert_task(NewTask::new(1, "interviews").with_flow(flow))
            .await
            .unwrap()
    }

    pub async fn item(&self, task_id: i64, kind: MediaKind) -> Item {
        let (name, url) = match kind {
            MediaKind::Audio => ("call.wav", "https://files/call.wav"),
            MediaKind::Video => ("meeting.mp4", "https://files/meeting.mp4"),
        };
        self.system
            .register_item(NewItem::new(task_id, name, kind, url).with_size(1024))
            .await
            .unwrap()
    }

    pub async fn reload(&self, item_id: i64) -> Item {
        self.store.find_item(item_id).await.unwrap().unwrap()
    }

    pub async fn task_status(&self, task_id: i64) -> TaskStatus {
        self.store.find_task(task_id).await.unwrap().unwrap().status
    }

    pub async fn dispatch(&self, item_id: i64, action: StageAction) -> Result<DispatchReceipt> {
        self.system
            .dispatcher()
            .dispatch(item_id, action, DispatchOptions::default())
            .await
    }

    pub async fn dispatch_with(
        &self,
        item_id: i64,
        action: StageAction,
        options: DispatchOptions,
    ) -> Result<DispatchReceipt> {
        self.system
            .dispatcher()
            .dispatch(item_id, action, options)
            .await
    }

    pub async fn callback(&self, request: CallbackRequest) -> Result<CallbackAck> {
        self.system.callbacks().handle(request).await
    }

    /// Report success for `stage` with typical worker data
    pub async fn succeed(&self, item_id: i64, stage: StageAction) -> CallbackAck {
        self.callback(
            CallbackRequest::new(item_id, stage, CallbackOutcome::Success)
                .with_data(success_data(stage)),
        )
        .await
        .unwrap()
    }

    pub async fn fail(&self, item_id: i64, stage: StageAction, message: &str) -> CallbackAck {
        self.callback(
            CallbackRequest::new(item_id, stage, CallbackOutcome::Failed).with_message(message),
        )
        .await
        .unwrap()
    }

    /// Dispatch and immediately report success
    pub async fn run_stage(&self, item_id: i64, stage: StageAction) -> CallbackAck {
        self.dispatch(item_id, stage).await.unwrap();
        self.succeed(item_id, stage).await
    }
}

/// Result data a worker sends for a successful stage
pub fn success_data(stage: StageAction) -> Value {
    match stage {
        StageAction::Extract => json!({"voice_url": "https://files/meeting.wav", "duration": 62.5}),
        StageAction::Clear => json!({"clear_url": "https://files/meeting.clear.wav"}),
        StageAction::Fast => json!({"effective_voice": "48.0", "text_info": "draft"}),
        StageAction::Transcribe => json!({
            "text_info": "hello everyone",
            "language": "en",
            "effective_voice": 48.0,
            "total_voice": 62.5
        }),
    }
}
