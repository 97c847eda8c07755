//! Recall core: render tree model, exclusion rules and the turn correlator.
mod correlator;
mod job;
mod rules;
mod tree;
mod turn;

pub use correlator::{
    CorrelationSettings, Correlator, CorrelatorPhase, PendingCorrelation,
    DEFAULT_CORRELATION_TIMEOUT,
};
pub use job::{DeliveryJob, DeliveryResult, JobKind};
pub use rules::{
    ExclusionRule, MemoryRulePersistence, RulePersistence, RuleSet, RuleStore, RuleStoreError,
    SelectorParseError, SelectorStep, StructuralSelector, BUILTIN_KEYWORDS,
};
pub use tree::{RenderNode, TEXT_TAG};
pub use turn::{Role, Turn};
