//! Qualification rule evaluation (MQL/SQL tiers).
//!
//! Conditions inside a rule are AND'd, active rules of one tier are OR'd:
//! ```text
//! tier(lead)  ::= any( active rule of tier : rule(lead) )
//! rule(lead)  ::= conditions non-empty && all( condition(lead) )
//! ```
//! Evaluation never fails. A value that cannot be compared makes its
//! condition false; authoring-time problems are reported by [`validate_rule`].

use serde::Serialize;

use funnel_types::{
    ConditionOperator, FieldValue, FunnelError, Lead, LifecycleStage, Pipeline,
    QualificationCondition, QualificationRule, QualificationTier, Result, RESERVED_FIELDS,
};

/// Tier membership of a single lead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Qualification {
    pub is_mql: bool,
    pub is_sql: bool,
}

/// The rule that put a lead into a tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMatch {
    pub tier: QualificationTier,
    pub rule_id: String,
    pub rule_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleDecision {
    pub should_update: bool,
    pub stage: LifecycleStage,
    pub rule_matched: Option<String>,
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate one condition against values provided by `resolve`.
///
/// `resolve` maps a field name to its value, or `None` when the field is absent.
pub fn evaluate_condition(
    condition: &QualificationCondition,
    resolve: &dyn Fn(&str) -> Option<FieldValue>,
) -> bool {
    let actual = resolve(&condition.field);
    let expected = condition.value.as_deref().unwrap_or_default();
    let actual_text = || actual.as_ref().map(FieldValue::as_text).unwrap_or_default();

    match condition.operator {
        ConditionOperator::Equals => actual_text().trim() == expected.trim(),
        ConditionOperator::NotEquals => actual_text().trim() != expected.trim(),
        ConditionOperator::Contains => actual_text().contains(expected),
        ConditionOperator::IsEmpty => actual.as_ref().map_or(true, FieldValue::is_empty),
        ConditionOperator::IsNotEmpty => !actual.as_ref().map_or(true, FieldValue::is_empty),
        ConditionOperator::GreaterThan | ConditionOperator::LessThan => {
            let Some(lhs) = actual.as_ref().and_then(FieldValue::as_number) else {
                return false;
            };
            let Some(rhs) = parse_finite(expected) else {
                return false;
            };
            if condition.operator == ConditionOperator::GreaterThan {
                lhs > rhs
            } else {
                lhs < rhs
            }
        }
    }
}

fn parse_finite(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// A rule matches when it has at least one condition and all of them hold.
pub fn evaluate_rule(rule: &QualificationRule, resolve: &dyn Fn(&str) -> Option<FieldValue>) -> bool {
    !rule.conditions.is_empty()
        && rule
            .conditions
            .iter()
            .all(|c| evaluate_condition(c, resolve))
}

fn first_match<'a>(
    tier: QualificationTier,
    lead: &Lead,
    rules: &'a [QualificationRule],
) -> Option<&'a QualificationRule> {
    let resolve = |field: &str| lead.field(field);
    rules
        .iter()
        .filter(|r| r.is_active && r.tier == tier)
        .find(|r| evaluate_rule(r, &resolve))
}

/// Classify `lead` into the MQL and SQL tiers independently.
pub fn classify(lead: &Lead, rules: &[QualificationRule]) -> Qualification {
    Qualification {
        is_mql: first_match(QualificationTier::Mql, lead, rules).is_some(),
        is_sql: first_match(QualificationTier::Sql, lead, rules).is_some(),
    }
}

/// The first matching rule per tier, in authored order. Display only.
pub fn explain(lead: &Lead, rules: &[QualificationRule]) -> Vec<RuleMatch> {
    [QualificationTier::Mql, QualificationTier::Sql]
        .into_iter()
        .filter_map(|tier| {
            first_match(tier, lead, rules).map(|r| RuleMatch {
                tier,
                rule_id: r.id.clone(),
                rule_name: r.name.clone(),
            })
        })
        .collect()
}

/// Decide whether the lead's lifecycle stage should be promoted.
///
/// SQL rules win over MQL rules; MQL promotion only applies to plain leads.
/// A lead is never demoted.
pub fn next_lifecycle_stage(lead: &Lead, rules: &[QualificationRule]) -> LifecycleDecision {
    let current = lead.lifecycle_stage;
    if current != LifecycleStage::Sql {
        if let Some(rule) = first_match(QualificationTier::Sql, lead, rules) {
            return LifecycleDecision {
                should_update: true,
                stage: LifecycleStage::Sql,
                rule_matched: Some(rule.name.clone()),
            };
        }
    }
    if current == LifecycleStage::Lead {
        if let Some(rule) = first_match(QualificationTier::Mql, lead, rules) {
            return LifecycleDecision {
                should_update: true,
                stage: LifecycleStage::Mql,
                rule_matched: Some(rule.name.clone()),
            };
        }
    }
    LifecycleDecision {
        should_update: false,
        stage: current,
        rule_matched: None,
    }
}

// ---------------------------------------------------------------------------
// Authoring-time validation
// ---------------------------------------------------------------------------

fn invalid(rule: &QualificationRule, msg: String) -> FunnelError {
    FunnelError::ValidationError(format!("rule '{}': {msg}", rule.name))
}

/// Reject rules that could never be evaluated meaningfully.
pub fn validate_rule(rule: &QualificationRule, pipeline: &Pipeline) -> Result<()> {
    if rule.name.trim().is_empty() {
        return Err(FunnelError::ValidationError(format!(
            "rule '{}' has no name",
            rule.id
        )));
    }
    if rule.conditions.is_empty() {
        return Err(invalid(rule, "at least one condition is required".into()));
    }
    for (i, condition) in rule.conditions.iter().enumerate() {
        let n = i + 1;
        let field = condition.field.trim();
        if field.is_empty() {
            return Err(invalid(rule, format!("condition {n} has no field")));
        }
        if pipeline.custom_field(field).is_none() && !RESERVED_FIELDS.contains(&field) {
            return Err(invalid(
                rule,
                format!("condition {n} references unknown field '{field}'"),
            ));
        }
        if !condition.operator.takes_value() {
            continue;
        }
        let value = condition.value.as_deref().unwrap_or_default();
        if value.trim().is_empty() {
            return Err(invalid(rule, format!("condition {n} requires a value")));
        }
        if condition.operator.is_numeric() && parse_finite(value).is_none() {
            return Err(invalid(
                rule,
                format!("condition {n} compares against non-numeric value '{value}'"),
            ));
        }
    }
    Ok(())
}

pub fn validate_rules(rules: &[QualificationRule], pipeline: &Pipeline) -> Result<()> {
    rules.iter().try_for_each(|r| validate_rule(r, pipeline))
}
