//! Pipeline validation: lint rules and diagnostics.
//!
//! The stage list is the only authority on a pipeline's linear order, so a
//! pipeline is checked before any board or coordinator accepts it. Call
//! [`validate`] for advisory diagnostics or [`validate_or_raise`] to fail on
//! `Error`-severity issues.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use funnel_types::{FunnelError, Pipeline, Result, RESERVED_FIELDS};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub stage_id: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Diagnostic {
    fn error(rule: &str, message: String) -> Self {
        Self {
            rule: rule.into(),
            severity: Severity::Error,
            message,
            stage_id: None,
            fix: None,
        }
    }

    fn warning(rule: &str, message: String) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(rule, message)
        }
    }

    fn at_stage(mut self, stage_id: &str) -> Self {
        self.stage_id = Some(stage_id.to_string());
        self
    }

    fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct HasStagesRule;
impl LintRule for HasStagesRule {
    fn name(&self) -> &str { "has_stages" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        if pipeline.stages.is_empty() {
            vec![Diagnostic::error(
                self.name(),
                format!("Pipeline '{}' has no stages", pipeline.id),
            )
            .with_fix("Add at least one stage with order_index 0")]
        } else {
            vec![]
        }
    }
}

struct UniqueStageIdsRule;
impl LintRule for UniqueStageIdsRule {
    fn name(&self) -> &str { "unique_stage_ids" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        let mut seen = HashSet::new();
        pipeline
            .stages
            .iter()
            .filter(|s| !seen.insert(s.id.as_str()))
            .map(|s| {
                Diagnostic::error(self.name(), format!("Stage id '{}' appears more than once", s.id))
                    .at_stage(&s.id)
            })
            .collect()
    }
}

/// Order indices must be unique and run 0..n without gaps.
struct ContiguousOrderRule;
impl LintRule for ContiguousOrderRule {
    fn name(&self) -> &str { "contiguous_order" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        let mut by_index: HashMap<u32, &str> = HashMap::new();
        for stage in &pipeline.stages {
            if let Some(other) = by_index.insert(stage.order_index, &stage.id) {
                diags.push(
                    Diagnostic::error(
                        self.name(),
                        format!(
                            "Stages '{}' and '{}' share order_index {}",
                            other, stage.id, stage.order_index
                        ),
                    )
                    .at_stage(&stage.id),
                );
            }
        }
        if !diags.is_empty() {
            return diags;
        }
        let count = pipeline.stages.len() as u32;
        for stage in &pipeline.stages {
            if stage.order_index >= count {
                diags.push(
                    Diagnostic::error(
                        self.name(),
                        format!(
                            "Stage '{}' has order_index {} but the pipeline only has {} stages",
                            stage.id, stage.order_index, count
                        ),
                    )
                    .at_stage(&stage.id)
                    .with_fix("Renumber stages contiguously from 0"),
                );
            }
        }
        diags
    }
}

/// System stages (Won/Lost) close the pipeline and sit after every user stage.
struct SystemStagesLastRule;
impl LintRule for SystemStagesLastRule {
    fn name(&self) -> &str { "system_stages_last" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        let Some(last_user) = pipeline
            .stages
            .iter()
            .filter(|s| !s.is_system_stage)
            .map(|s| s.order_index)
            .max()
        else {
            return vec![];
        };
        pipeline
            .stages
            .iter()
            .filter(|s| s.is_system_stage && s.order_index < last_user)
            .map(|s| {
                Diagnostic::error(
                    self.name(),
                    format!("System stage '{}' is ordered before a user stage", s.id),
                )
                .at_stage(&s.id)
                .with_fix("Move system stages to the end of the pipeline")
            })
            .collect()
    }
}

struct StageNamesRule;
impl LintRule for StageNamesRule {
    fn name(&self) -> &str { "stage_names" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        let mut seen = HashSet::new();
        for stage in &pipeline.stages {
            let name = stage.name.trim();
            if name.is_empty() {
                diags.push(
                    Diagnostic::error(self.name(), format!("Stage '{}' has an empty name", stage.id))
                        .at_stage(&stage.id),
                );
            } else if !seen.insert(name.to_lowercase()) {
                diags.push(
                    Diagnostic::warning(
                        self.name(),
                        format!("Stage name '{}' is used by more than one stage", name),
                    )
                    .at_stage(&stage.id),
                );
            }
        }
        diags
    }
}

struct CustomFieldsRule;
impl LintRule for CustomFieldsRule {
    fn name(&self) -> &str { "custom_fields" }
    fn apply(&self, pipeline: &Pipeline) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        let mut seen = HashSet::new();
        for field in &pipeline.custom_fields {
            let name = field.name.trim();
            if name.is_empty() {
                diags.push(Diagnostic::error(self.name(), "Custom field with an empty name".into()));
                continue;
            }
            if !seen.insert(name) {
                diags.push(Diagnostic::error(
                    self.name(),
                    format!("Custom field '{}' is defined more than once", name),
                ));
            }
            if RESERVED_FIELDS.contains(&name) {
                diags.push(
                    Diagnostic::warning(
                        self.name(),
                        format!("Custom field '{}' is shadowed by the lead attribute of the same name", name),
                    )
                    .with_fix("Rename the custom field"),
                );
            }
        }
        diags
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in lint rules and return collected diagnostics.
pub fn validate(pipeline: &Pipeline) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(HasStagesRule),
        Box::new(UniqueStageIdsRule),
        Box::new(ContiguousOrderRule),
        Box::new(SystemStagesLastRule),
        Box::new(StageNamesRule),
        Box::new(CustomFieldsRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(pipeline));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(pipeline: &Pipeline) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(pipeline);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect();
    if !errors.is_empty() {
        return Err(FunnelError::ValidationError(errors.join("; ")));
    }
    Ok(diagnostics)
}

/// Check whether `stage_id` may be removed from `pipeline` while it holds
/// `lead_count` leads.
pub fn check_stage_removal(pipeline: &Pipeline, stage_id: &str, lead_count: usize) -> Result<()> {
    let stage = pipeline.stage(stage_id).ok_or_else(|| FunnelError::StageNotInPipeline {
        stage_id: stage_id.to_string(),
        pipeline_id: pipeline.id.clone(),
    })?;
    if stage.is_system_stage {
        return Err(FunnelError::ValidationError(format!(
            "System stage '{}' cannot be removed",
            stage.name
        )));
    }
    if pipeline.stages.len() == 1 {
        return Err(FunnelError::ValidationError(format!(
            "Stage '{}' is the last stage of pipeline '{}'",
            stage.name, pipeline.id
        )));
    }
    if lead_count > 0 {
        return Err(FunnelError::ValidationError(format!(
            "Stage '{}' still holds {} lead(s)",
            stage.name, lead_count
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use funnel_types::{CustomFieldDefinition, FieldKind, Stage};

    fn stage(id: &str, order_index: u32, system: bool) -> Stage {
        Stage {
            id: id.into(),
            name: id.to_uppercase(),
            order_index,
            color: String::new(),
            max_days_allowed: None,
            is_system_stage: system,
        }
    }

    fn pipeline(stages: Vec<Stage>) -> Pipeline {
        Pipeline {
            id: "p1".into(),
            name: "Sales".into(),
            description: String::new(),
            tenant_id: "t1".into(),
            stages,
            members: vec![],
            custom_fields: vec![],
        }
    }

    fn field(name: &str) -> CustomFieldDefinition {
        CustomFieldDefinition {
            name: name.into(),
            label: name.into(),
            field_type: FieldKind::Text,
            is_required: false,
            options: vec![],
        }
    }

    #[test]
    fn valid_pipeline_passes() {
        let p = pipeline(vec![stage("new", 0, false), stage("contacted", 1, false), stage("won", 2, true)]);
        let diags = validate(&p);
        assert!(diags.is_empty(), "Expected no diagnostics, got: {diags:?}");
        assert!(validate_or_raise(&p).is_ok());
    }

    #[test]
    fn empty_pipeline_error() {
        let diags = validate(&pipeline(vec![]));
        assert!(diags.iter().any(|d| d.rule == "has_stages" && d.severity == Severity::Error));
    }

    #[test]
    fn duplicate_stage_id_error() {
        let p = pipeline(vec![stage("new", 0, false), stage("new", 1, false)]);
        let diags = validate(&p);
        assert!(diags.iter().any(|d| d.rule == "unique_stage_ids" && d.stage_id.as_deref() == Some("new")));
    }

    #[test]
    fn shared_order_index_error() {
        let p = pipeline(vec![stage("a", 0, false), stage("b", 0, false)]);
        let diags = validate(&p);
        assert!(diags.iter().any(|d| d.rule == "contiguous_order" && d.message.contains("share")));
    }

    #[test]
    fn gap_in_order_error() {
        let p = pipeline(vec![stage("a", 0, false), stage("b", 2, false)]);
        let diags = validate(&p);
        assert!(
            diags.iter().any(|d| d.rule == "contiguous_order" && d.stage_id.as_deref() == Some("b")),
            "Expected gap diagnostic, got: {diags:?}"
        );
    }

    #[test]
    fn system_stage_before_user_stage_error() {
        let p = pipeline(vec![stage("won", 0, true), stage("new", 1, false)]);
        let diags = validate(&p);
        assert!(diags.iter().any(|d| d.rule == "system_stages_last" && d.severity == Severity::Error));
    }

    #[test]
    fn duplicate_stage_name_is_warning() {
        let mut b = stage("b", 1, false);
        b.name = "a".into();
        let p = pipeline(vec![stage("a", 0, false), b]);
        let diags = validate(&p);
        assert!(diags.iter().any(|d| d.rule == "stage_names" && d.severity == Severity::Warning));
        assert!(validate_or_raise(&p).is_ok());
    }

    #[test]
    fn empty_stage_name_error() {
        let mut a = stage("a", 0, false);
        a.name = "  ".into();
        let diags = validate(&pipeline(vec![a]));
        assert!(diags.iter().any(|d| d.rule == "stage_names" && d.severity == Severity::Error));
    }

    #[test]
    fn reserved_custom_field_is_warning() {
        let mut p = pipeline(vec![stage("new", 0, false)]);
        p.custom_fields = vec![field("stage_id"), field("budget"), field("budget")];
        let diags = validate(&p);
        assert!(diags.iter().any(|d| d.rule == "custom_fields" && d.severity == Severity::Warning));
        assert!(diags.iter().any(|d| d.rule == "custom_fields" && d.severity == Severity::Error));
    }

    #[test]
    fn validate_or_raise_joins_errors() {
        let p = pipeline(vec![stage("a", 0, false), stage("a", 3, false)]);
        let err = validate_or_raise(&p).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn stage_removal_checks() {
        let p = pipeline(vec![stage("new", 0, false), stage("contacted", 1, false), stage("won", 2, true)]);
        assert!(check_stage_removal(&p, "contacted", 0).is_ok());
        assert!(check_stage_removal(&p, "contacted", 2).is_err());
        assert!(check_stage_removal(&p, "won", 0).is_err());
        assert!(matches!(
            check_stage_removal(&p, "ghost", 0),
            Err(FunnelError::StageNotInPipeline { .. })
        ));

        let single = pipeline(vec![stage("only", 0, false)]);
        assert!(check_stage_removal(&single, "only", 0).is_err());
    }
}
