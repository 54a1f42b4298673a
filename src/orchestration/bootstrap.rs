//! # Pipeline Bootstrap
//!
//! Wires the store, broker and configuration into one [`PipelineSystem`].
//!
//! ## Deployment Modes
//!
//! - **Service** - [`PipelineSystem::bootstrap`] connects PostgreSQL, runs
//!   migrations, and provisions the RabbitMQ topology when the broker answers
//! - **Embedded / tests** - [`PipelineSystem::in_memory`] runs the whole
//!   pipeline on the in-memory store and broker
//! - **Custom** - [`PipelineSystem::new`] with any store and broker

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::audit_log::AuditLog;
use super::callback_processor::CallbackProcessor;
use super::dispatcher::ItemDispatcher;
use super::stall_sweeper::StallSweeper;
use super::status_aggregator::StatusAggregator;
use crate::config::PipelineConfig;
use crate::database::{InMemoryStore, PipelineStore};
use crate::error::Result;
use crate::messaging::{InMemoryBroker, QueueBroker};
use crate::models::{Item, NewItem};

/// Fully wired pipeline core
#[derive(Clone)]
pub struct PipelineSystem {
    config: PipelineConfig,
    store: Arc<dyn PipelineStore>,
    broker: Arc<dyn QueueBroker>,
    audit: AuditLog,
    aggregator: StatusAggregator,
    dispatcher: ItemDispatcher,
    callbacks: CallbackProcessor,
    sweeper: StallSweeper,
}

impl std::fmt::Debug for PipelineSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSystem")
            .field("environment", &self.config.environment)
            .field("broker", &self.broker.provider_name())
            .field("continuation", &self.config.continuation)
            .finish()
    }
}

impl PipelineSystem {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn PipelineStore>,
        broker: Arc<dyn QueueBroker>,
    ) -> Self {
        let attempts = config.dispatch.max_cas_attempts;
        let default_priority = u8::try_from(
            config
                .broker
                .default_priority
                .min(config.broker.max_priority),
        )
        .unwrap_or(u8::MAX);

        let audit = AuditLog::new(Arc::clone(&store));
        let aggregator = StatusAggregator::new(Arc::clone(&store), attempts);
        let dispatcher = ItemDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&broker),
            aggregator.clone(),
            config.dispatch.clone(),
            default_priority,
        );
        let callbacks = CallbackProcessor::new(
            Arc::clone(&store),
            audit.clone(),
            aggregator.clone(),
            dispatcher.clone(),
            config.continuation,
            attempts,
        );
        let sweeper = StallSweeper::new(
            Arc::clone(&store),
            dispatcher.clone(),
            aggregator.clone(),
            config.sweeper.clone(),
        );

        info!(
            environment = %config.environment,
            broker = broker.provider_name(),
            continuation = ?config.continuation,
            "🏗️ PIPELINE: System assembled"
        );

        Self {
            config,
            store,
            broker,
            audit,
            aggregator,
            dispatcher,
            callbacks,
            sweeper,
        }
    }

    /// Pipeline on the in-memory store and broker, with handles to both
    pub fn in_memory(config: PipelineConfig) -> (Self, Arc<InMemoryStore>, Arc<InMemoryBroker>) {
        let store = Arc::new(InMemoryStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let system = Self::new(config, store.clone(), broker.clone());
        (system, store, broker)
    }

    /// Connect PostgreSQL and RabbitMQ as configured
    #[cfg(feature = "postgres")]
    pub async fn bootstrap(config: PipelineConfig) -> Result<Self> {
        use crate::database::PgStore;
        use crate::messaging::{QueueTopology, RabbitMqBroker};

        let store = PgStore::connect(&config.database).await?;
        if config.database.run_migrations {
            store.run_migrations().await?;
        }

        let broker = RabbitMqBroker::new(&config.broker)?;
        if config.broker.provision_on_startup {
            if broker.is_alive().await {
                broker
                    .provision(&QueueTopology::from_config(&config.broker))
                    .await?;
            } else {
                warn!(
                    broker_url = %config.sanitized().broker.base_url,
                    "RabbitMQ management API unreachable, skipping queue provisioning"
                );
            }
        }

        Ok(Self::new(config, Arc::new(store), Arc::new(broker)))
    }

    /// Store a freshly uploaded item and bring its task's roll-up in line
    pub async fn register_item(&self, item: NewItem) -> Result<Item> {
        let stored = self.store.insert_item(item).await?;
        info!(
            item_id = stored.item_id,
            task_id = stored.task_id,
            media_kind = ?stored.media_kind,
            "📥 Item registered"
        );
        self.aggregator.recompute(stored.task_id).await?;
        Ok(stored)
    }

    /// Spawn the sweep loop; it runs until the handle is stopped
    pub fn start_sweeper(&self) -> SweeperHandle {
        let (shutdown, receiver) = watch::channel(false);
        let sweeper = self.sweeper.clone();
        let join = tokio::spawn(async move { sweeper.run(receiver).await });
        SweeperHandle {
            shutdown,
            join: Some(join),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn PipelineStore> {
        &self.store
    }

    pub fn broker(&self) -> &Arc<dyn QueueBroker> {
        &self.broker
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn aggregator(&self) -> &StatusAggregator {
        &self.aggregator
    }

    pub fn dispatcher(&self) -> &ItemDispatcher {
        &self.dispatcher
    }

    pub fn callbacks(&self) -> &CallbackProcessor {
        &self.callbacks
    }

    pub fn sweeper(&self) -> &StallSweeper {
        &self.sweeper
    }
}

/// Running sweep loop
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Signal shutdown and wait for the loop to exit
    pub async fn stop(&mut self) {
        let Some(join) = self.join.take() else {
            warn!("Sweeper already stopped");
            return;
        };
        let _ = self.shutdown.send(true);
        if let Err(e) = join.await {
            warn!(error = %e, "Sweeper task ended abnormally");
        }
        info!("🛑 Sweeper stopped");
    }
}
