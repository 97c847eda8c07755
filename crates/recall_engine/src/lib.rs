//! Recall engine: extraction, delivery, offline storage and the engine thread.
mod deliver;
mod engine;
mod extract;
mod html;
mod offline;
mod persist;
mod pipeline;
mod queue;
mod reconcile;
mod sanitize;
mod types;

pub use deliver::{
    DeliveryClient, DeliveryError, DeliveryOutcome, DeliverySettings, ReqwestDeliveryClient,
};
pub use engine::{EngineCommand, EngineCommands, EngineConfig, EngineError, EngineHandle};
pub use extract::{ExtractSettings, Extractor, SemanticExtractor};
pub use html::parse_fragment;
pub use offline::{OfflineError, OfflineRecord, OfflineStore, DEFAULT_OFFLINE_CAPACITY};
pub use persist::{ensure_data_dir, read_state_file, AtomicFileWriter, PersistError};
pub use pipeline::{Pipeline, PipelineSettings};
pub use queue::{QueueSettings, SubmissionQueue};
pub use reconcile::{ConnectivityMonitor, Reconciler};
pub use sanitize::{sanitize, sanitize_markup};
pub use types::{AnalyzeRequest, ChannelEventSink, EventSink, JobId, PipelineEvent};
