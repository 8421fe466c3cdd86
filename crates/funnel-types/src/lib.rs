//! Shared types and errors for the Funnel pipeline stage engine.
//!
//! This crate provides the foundational types used across all other Funnel crates:
//! - `FunnelError`: unified error taxonomy
//! - `Pipeline`, `Stage`, `Lead`, `LeadMaster`: the records the engine works over
//! - `QualificationRule`, `TemperatureConfig`: administrator-authored configuration

pub mod model;
pub mod rules;

pub use model::{
    CustomData, CustomFieldDefinition, FieldKind, FieldValue, Lead, LeadMaster, LifecycleStage,
    Pipeline, Stage, RESERVED_FIELDS,
};
pub use rules::{
    ConditionOperator, QualificationCondition, QualificationRule, QualificationTier, Temperature,
    TemperatureConfig,
};

/// Unified error type for all Funnel subsystems.
#[derive(Debug, thiserror::Error)]
pub enum FunnelError {
    // === Validation Errors ===
    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Lead '{lead_id}' is not loaded")]
    LeadNotLoaded { lead_id: String },

    #[error("Stage '{stage_id}' does not belong to pipeline '{pipeline_id}'")]
    StageNotInPipeline {
        stage_id: String,
        pipeline_id: String,
    },

    // === Concurrency Errors ===
    #[error("Lead '{lead_id}' already has a stage move in flight")]
    ConcurrentMove { lead_id: String },

    // === Persistence Errors ===
    #[error("Persistence call '{operation}' failed: {message}")]
    Persistence { operation: String, message: String },

    #[error("Persistence call '{operation}' timed out after {timeout_ms}ms")]
    PersistenceTimeout { operation: String, timeout_ms: u64 },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    // === Resolution Errors ===
    #[error("Lead master '{lead_master_id}' could not be resolved: {message}")]
    Resolution {
        lead_master_id: String,
        message: String,
    },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl FunnelError {
    /// Shorthand for a backend failure on `operation`.
    pub fn persistence(operation: impl Into<String>, message: impl Into<String>) -> Self {
        FunnelError::Persistence {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if the caller may offer a manual retry.
    ///
    /// Recoverable errors have already been rolled back by the engine; a retry
    /// is a fresh call, never an internal loop.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FunnelError::Persistence { .. } | FunnelError::PersistenceTimeout { .. }
        )
    }

    /// Returns `true` if the request was rejected before any mutation happened.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FunnelError::ValidationError(_)
                | FunnelError::LeadNotLoaded { .. }
                | FunnelError::StageNotInPipeline { .. }
        )
    }

    /// Maps the error to an HTTP status code for server mode.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            FunnelError::ValidationError(_) | FunnelError::StageNotInPipeline { .. } => Some(400),
            FunnelError::LeadNotLoaded { .. } | FunnelError::NotFound { .. } => Some(404),
            FunnelError::ConcurrentMove { .. } => Some(409),
            FunnelError::Persistence { .. } => Some(502),
            FunnelError::PersistenceTimeout { .. } => Some(504),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, FunnelError>`.
pub type Result<T> = std::result::Result<T, FunnelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_stage_not_in_pipeline() {
        let err = FunnelError::StageNotInPipeline {
            stage_id: "won".into(),
            pipeline_id: "sales".into(),
        };
        assert_eq!(
            err.to_string(),
            "Stage 'won' does not belong to pipeline 'sales'"
        );
    }

    #[test]
    fn error_display_concurrent_move() {
        let err = FunnelError::ConcurrentMove {
            lead_id: "lead-1".into(),
        };
        assert_eq!(
            err.to_string(),
            "Lead 'lead-1' already has a stage move in flight"
        );
    }

    #[test]
    fn error_display_persistence() {
        let err = FunnelError::persistence("update_lead_stage", "connection reset");
        assert_eq!(
            err.to_string(),
            "Persistence call 'update_lead_stage' failed: connection reset"
        );
    }

    #[test]
    fn error_display_timeout() {
        let err = FunnelError::PersistenceTimeout {
            operation: "update_lead_stage".into(),
            timeout_ms: 10_000,
        };
        assert_eq!(
            err.to_string(),
            "Persistence call 'update_lead_stage' timed out after 10000ms"
        );
    }

    #[test]
    fn error_display_not_found() {
        let err = FunnelError::NotFound {
            entity: "Pipeline".into(),
            id: "p-9".into(),
        };
        assert_eq!(err.to_string(), "Pipeline 'p-9' not found");
    }

    #[test]
    fn error_display_validation() {
        let err = FunnelError::ValidationError("stage order has a gap".into());
        assert_eq!(err.to_string(), "Validation failed: stage order has a gap");
    }

    // --- classification ---

    #[test]
    fn persistence_failures_are_recoverable() {
        assert!(FunnelError::persistence("x", "y").is_recoverable());
        assert!(FunnelError::PersistenceTimeout {
            operation: "x".into(),
            timeout_ms: 1
        }
        .is_recoverable());
    }

    #[test]
    fn concurrent_move_is_neither_recoverable_nor_validation() {
        let err = FunnelError::ConcurrentMove {
            lead_id: "l".into(),
        };
        assert!(!err.is_recoverable());
        assert!(!err.is_validation());
    }

    #[test]
    fn validation_family() {
        assert!(FunnelError::ValidationError("bad".into()).is_validation());
        assert!(FunnelError::LeadNotLoaded {
            lead_id: "l".into()
        }
        .is_validation());
        assert!(FunnelError::StageNotInPipeline {
            stage_id: "s".into(),
            pipeline_id: "p".into()
        }
        .is_validation());
        assert!(!FunnelError::persistence("x", "y").is_validation());
    }

    // --- http_status ---

    #[test]
    fn http_status_mapping() {
        assert_eq!(
            FunnelError::ConcurrentMove {
                lead_id: "l".into()
            }
            .http_status(),
            Some(409)
        );
        assert_eq!(
            FunnelError::ValidationError("x".into()).http_status(),
            Some(400)
        );
        assert_eq!(FunnelError::persistence("a", "b").http_status(), Some(502));
        assert_eq!(FunnelError::Other("x".into()).http_status(), None);
    }

    // --- From impls ---

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FunnelError = io_err.into();
        assert!(matches!(err, FunnelError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: FunnelError = json_err.into();
        assert!(matches!(err, FunnelError::Json(_)));
    }
}
