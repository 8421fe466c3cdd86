//! Pipeline stage engine: stage moves, qualification, temperature and
//! cross-view synchronisation of kanban boards.
//!
//! [`StageTransitionCoordinator`] is the only writer of a lead's stage.
//! [`PipelineBoardViewModel`] projects one pipeline for one viewer and stays
//! in sync with other boards through a shared [`EventBus`].

pub mod board;
pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod drag;
pub mod events;
pub mod memory;
pub mod persistence;
pub mod qualification;
pub mod resolver;
pub mod temperature;
pub mod validation;

pub use board::{
    BoardFilter, BoardSort, BoardSummary, LeadCard, PipelineBoardViewModel, SortDirection,
    SortField, StageColumn, StageSummary, ViewerScope,
};
pub use config::EngineConfig;
pub use coordinator::{LeadDraft, MoveOutcome, MovePhase, StageTransitionCoordinator};
pub use debounce::Debouncer;
pub use drag::{DragGesture, DragOutcome, DropIntent};
pub use events::{
    BoardEvent, EventBus, EventKind, LeadCreated, LeadDataUpdated, LeadStageChanged, Subscription,
};
pub use memory::{Dataset, MemoryPersistence, StageGate};
pub use persistence::Persistence;
pub use qualification::{LifecycleDecision, Qualification, RuleMatch};
pub use resolver::{LeadMasterResolver, MasterStatus, MergedLeadView};
pub use validation::{check_stage_removal, validate, validate_or_raise, Diagnostic, LintRule, Severity};
