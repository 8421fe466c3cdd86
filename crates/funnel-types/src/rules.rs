//! Administrator-authored configuration: qualification rules and temperature thresholds.

use serde::{Deserialize, Serialize};

use crate::FunnelError;

// ---------------------------------------------------------------------------
// Qualification rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualificationTier {
    #[serde(rename = "MQL", alias = "mql")]
    Mql,
    #[serde(rename = "SQL", alias = "sql")]
    Sql,
}

impl QualificationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mql => "MQL",
            Self::Sql => "SQL",
        }
    }
}

/// Comparison operator of a [`QualificationCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    #[serde(alias = "empty")]
    IsEmpty,
    #[serde(alias = "not_empty")]
    IsNotEmpty,
    GreaterThan,
    LessThan,
}

impl ConditionOperator {
    /// Emptiness checks ignore the condition's comparison value.
    pub fn takes_value(&self) -> bool {
        !matches!(self, Self::IsEmpty | Self::IsNotEmpty)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::GreaterThan | Self::LessThan)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualificationCondition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Option<String>,
}

impl QualificationCondition {
    pub fn new(
        field: impl Into<String>,
        operator: ConditionOperator,
        value: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: Some(value.into()),
        }
    }

    /// A condition for the two emptiness operators.
    pub fn presence(field: impl Into<String>, operator: ConditionOperator) -> Self {
        Self {
            field: field.into(),
            operator,
            value: None,
        }
    }
}

/// Conditions are AND'd; active rules of the same tier are OR'd.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualificationRule {
    pub id: String,
    pub tier: QualificationTier,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub conditions: Vec<QualificationCondition>,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Temperature
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Temperature {
    Hot,
    Warm,
    Cold,
}

impl Temperature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
        }
    }
}

/// Per-pipeline dwell thresholds in days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemperatureConfig {
    pub hot_threshold: u32,
    pub warm_threshold: u32,
    pub cold_threshold: u32,
}

impl TemperatureConfig {
    pub fn new(hot_threshold: u32, warm_threshold: u32, cold_threshold: u32) -> Self {
        Self {
            hot_threshold,
            warm_threshold,
            cold_threshold,
        }
    }

    /// Thresholds must be at least one day and strictly increasing.
    pub fn validate(&self) -> crate::Result<()> {
        if self.hot_threshold == 0 {
            return Err(FunnelError::ValidationError(
                "hot_threshold must be at least 1 day".into(),
            ));
        }
        if self.hot_threshold >= self.warm_threshold || self.warm_threshold >= self.cold_threshold
        {
            return Err(FunnelError::ValidationError(format!(
                "temperature thresholds must increase: hot ({}) < warm ({}) < cold ({})",
                self.hot_threshold, self.warm_threshold, self.cold_threshold
            )));
        }
        Ok(())
    }
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self::new(3, 7, 14)
    }
}
