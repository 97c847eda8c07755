use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use recall_core::{RenderNode, RuleStore, StructuralSelector};
use recall_logging::{recall_info, recall_warn};
use thiserror::Error;

use crate::deliver::{DeliveryError, DeliverySettings, ReqwestDeliveryClient};
use crate::offline::{OfflineError, OfflineStore, DEFAULT_OFFLINE_CAPACITY};
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::queue::{QueueSettings, SubmissionQueue};
use crate::types::{ChannelEventSink, EventSink, PipelineEvent};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub delivery: DeliverySettings,
    pub queue: QueueSettings,
    pub pipeline: PipelineSettings,
    /// Directory holding the offline store.
    pub data_dir: PathBuf,
    pub offline_capacity: usize,
    /// How often a pending user turn is checked for timeout.
    pub sweep_interval: Duration,
    /// How long shutdown waits for the queue before spilling what is left.
    pub shutdown_grace: Duration,
}

impl EngineConfig {
    pub fn default_with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            delivery: DeliverySettings::default(),
            queue: QueueSettings::default(),
            pipeline: PipelineSettings::default(),
            data_dir,
            offline_capacity: DEFAULT_OFFLINE_CAPACITY,
            sweep_interval: Duration::from_secs(15),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start runtime: {0}")]
    Runtime(std::io::Error),
    #[error("failed to start engine thread: {0}")]
    Thread(std::io::Error),
    #[error("delivery client: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("offline store: {0}")]
    Offline(#[from] OfflineError),
}

#[derive(Debug, Clone)]
pub enum EngineCommand {
    UserTurn {
        root: RenderNode,
    },
    AssistantTurn {
        root: RenderNode,
        speaker_id: Option<String>,
    },
    Connectivity {
        connected: bool,
    },
    TeachRule {
        selector: StructuralSelector,
    },
    ForgetRule {
        index: usize,
    },
    ClearRules,
    ListRules,
    Shutdown,
}

/// Cloneable sender half for feeding host notifications to the engine.
#[derive(Debug, Clone)]
pub struct EngineCommands {
    cmd_tx: mpsc::Sender<EngineCommand>,
}

impl EngineCommands {
    /// Returns false once the engine has stopped.
    pub fn send(&self, command: EngineCommand) -> bool {
        self.cmd_tx.send(command).is_ok()
    }
}

/// Runs the pipeline on its own thread and tokio runtime so the host's
/// notification path never waits on extraction or the network.
pub struct EngineHandle {
    commands: EngineCommands,
    event_rx: mpsc::Receiver<PipelineEvent>,
    worker: Option<thread::JoinHandle<()>>,
}

impl EngineHandle {
    pub fn start(config: EngineConfig, rules: RuleStore) -> Result<Self, EngineError> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        let client = Arc::new(ReqwestDeliveryClient::new(config.delivery.clone())?);
        let offline = Arc::new(OfflineStore::open(
            config.data_dir.clone(),
            config.offline_capacity,
        )?);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("recall-delivery")
            .enable_all()
            .build()
            .map_err(EngineError::Runtime)?;
        let sink: Arc<dyn EventSink> = Arc::new(ChannelEventSink::new(event_tx));
        let queue = SubmissionQueue::new(
            client,
            offline.clone(),
            sink.clone(),
            config.queue.clone(),
            runtime.handle().clone(),
        );
        let pipeline = Pipeline::new(config.pipeline.clone(), rules, queue, offline, sink);

        let worker = thread::Builder::new()
            .name("recall-engine".to_string())
            .spawn(move || run(runtime, pipeline, cmd_rx, &config))
            .map_err(EngineError::Thread)?;

        Ok(Self {
            commands: EngineCommands { cmd_tx },
            event_rx,
            worker: Some(worker),
        })
    }

    pub fn commands(&self) -> EngineCommands {
        self.commands.clone()
    }

    pub fn send(&self, command: EngineCommand) -> bool {
        self.commands.send(command)
    }

    pub fn try_recv(&self) -> Option<PipelineEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<PipelineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Blocks for the next event; `None` once the engine has stopped and
    /// every event was consumed.
    pub fn recv(&self) -> Option<PipelineEvent> {
        self.event_rx.recv().ok()
    }

    /// Asks the engine to stop and waits for its thread.
    pub fn shutdown(mut self) {
        self.commands.send(EngineCommand::Shutdown);
        self.join();
    }

    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                recall_warn!("Engine thread panicked");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.commands.send(EngineCommand::Shutdown);
        self.join();
    }
}

fn run(
    runtime: tokio::runtime::Runtime,
    mut pipeline: Pipeline,
    cmd_rx: mpsc::Receiver<EngineCommand>,
    config: &EngineConfig,
) {
    recall_info!("Engine started, offline data in {:?}", config.data_dir);
    loop {
        match cmd_rx.recv_timeout(config.sweep_interval) {
            Ok(EngineCommand::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Ok(command) => handle_command(&mut pipeline, command),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                pipeline.sweep(Utc::now());
            }
        }
    }

    pipeline.flush(Utc::now());
    let queue = pipeline.queue().clone();
    let drained = runtime.block_on(queue.wait_idle(config.shutdown_grace));
    if !drained {
        let spilled = queue.spill_pending();
        recall_warn!("Shutdown grace elapsed, {} jobs kept offline", spilled);
    }
    drop(pipeline);
    runtime.shutdown_timeout(Duration::from_millis(200));
    recall_info!("Engine stopped");
}

fn handle_command(pipeline: &mut Pipeline, command: EngineCommand) {
    match command {
        EngineCommand::UserTurn { root } => {
            pipeline.on_user_turn(&root, Utc::now());
        }
        EngineCommand::AssistantTurn { root, speaker_id } => {
            pipeline.on_assistant_turn(&root, speaker_id, Utc::now());
        }
        EngineCommand::Connectivity { connected } => {
            pipeline.on_connectivity(connected);
        }
        EngineCommand::TeachRule { selector } => {
            if let Err(err) = pipeline.teach_rule(selector) {
                rule_rejected(pipeline, err);
            }
        }
        EngineCommand::ForgetRule { index } => {
            if let Err(err) = pipeline.forget_rule(index) {
                rule_rejected(pipeline, err);
            }
        }
        EngineCommand::ClearRules => {
            if let Err(err) = pipeline.clear_rules() {
                rule_rejected(pipeline, err);
            }
        }
        EngineCommand::ListRules => pipeline.publish_rules(),
        EngineCommand::Shutdown => {}
    }
}

fn rule_rejected(pipeline: &Pipeline, err: recall_core::RuleStoreError) {
    recall_warn!("Rule change rejected: {}", err);
    pipeline.report(PipelineEvent::RuleRejected {
        reason: err.to_string(),
    });
}
