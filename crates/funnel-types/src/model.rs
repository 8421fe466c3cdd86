//! Records the engine works over: pipelines, stages, leads and lead masters.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Field names a qualification condition may target without a matching
/// [`CustomFieldDefinition`]. They resolve against the [`Lead`] itself.
pub const RESERVED_FIELDS: &[&str] = &[
    "stage_id",
    "assigned_to",
    "lead_master_id",
    "lifecycle_stage",
    "created_at",
    "updated_at",
    "moved_at",
];

// ---------------------------------------------------------------------------
// FieldValue: typed custom_data values
// ---------------------------------------------------------------------------

/// A single value in a lead's `custom_data` bag.
///
/// Deserializes from plain JSON: `null`, booleans, numbers and strings.
/// Strings always stay [`FieldValue::Text`], date-like ones included, so the
/// stored text is compared and written back exactly as given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    /// Typed timestamp from a lead attribute such as `moved_at`.
    #[serde(skip_deserializing)]
    Date(DateTime<Utc>),
    Text(String),
}

impl FieldValue {
    /// String-normalized form used by equality and substring checks.
    ///
    /// `Null` becomes the empty string; integral numbers print without a
    /// fractional part.
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Date(d) => d.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            FieldValue::Text(s) => s.clone(),
        }
    }

    /// Numeric form, if the value is (or parses as) a finite number.
    pub fn as_number(&self) -> Option<f64> {
        let n = match self {
            FieldValue::Number(n) => *n,
            FieldValue::Text(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        n.is_finite().then_some(n)
    }

    /// `Null` or a string that is empty after trimming.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Number(n as f64)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(d: DateTime<Utc>) -> Self {
        FieldValue::Date(d)
    }
}

/// Custom field values keyed by [`CustomFieldDefinition::name`].
pub type CustomData = BTreeMap<String, FieldValue>;

// ---------------------------------------------------------------------------
// Pipeline configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Boolean,
    Date,
    Email,
    Phone,
    Select,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldDefinition {
    pub name: String,
    #[serde(default)]
    pub label: String,
    pub field_type: FieldKind,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub name: String,
    pub order_index: u32,
    #[serde(default)]
    pub color: String,
    /// Soft SLA in days; `None` means the stage has no dwell limit.
    #[serde(default)]
    pub max_days_allowed: Option<u32>,
    /// Terminal stages (e.g. Won/Lost) that sit after every user stage.
    #[serde(default)]
    pub is_system_stage: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tenant_id: String,
    pub stages: Vec<Stage>,
    /// Viewers with access to the pipeline's member board.
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub custom_fields: Vec<CustomFieldDefinition>,
}

impl Pipeline {
    pub fn stage(&self, stage_id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == stage_id)
    }

    pub fn contains_stage(&self, stage_id: &str) -> bool {
        self.stage(stage_id).is_some()
    }

    /// Stages in their authoritative linear order.
    pub fn ordered_stages(&self) -> Vec<&Stage> {
        let mut stages: Vec<&Stage> = self.stages.iter().collect();
        stages.sort_by_key(|s| s.order_index);
        stages
    }

    pub fn first_stage(&self) -> Option<&Stage> {
        self.stages.iter().min_by_key(|s| s.order_index)
    }

    pub fn custom_field(&self, name: &str) -> Option<&CustomFieldDefinition> {
        self.custom_fields.iter().find(|f| f.name == name)
    }

    pub fn is_member(&self, viewer_id: &str) -> bool {
        self.members.iter().any(|m| m == viewer_id)
    }
}

// ---------------------------------------------------------------------------
// Lead / LeadMaster
// ---------------------------------------------------------------------------

/// Qualification lifecycle of a lead. Only ever promoted, never demoted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    #[default]
    Lead,
    Mql,
    Sql,
}

impl LifecycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Mql => "mql",
            Self::Sql => "sql",
        }
    }
}

/// A pipeline-local record positioned at exactly one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub pipeline_id: String,
    pub stage_id: String,
    #[serde(default)]
    pub custom_data: CustomData,
    #[serde(default)]
    pub lead_master_id: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub lifecycle_stage: LifecycleStage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Timestamp of the last stage change.
    pub moved_at: DateTime<Utc>,
}

impl Lead {
    /// Resolve a field for rule evaluation: reserved names read the lead's
    /// own attributes, everything else reads `custom_data`.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        let stamp = |d: &DateTime<Utc>| Some(FieldValue::Date(*d));
        match name {
            "stage_id" => Some(FieldValue::Text(self.stage_id.clone())),
            "assigned_to" => self.assigned_to.clone().map(FieldValue::Text),
            "lead_master_id" => self.lead_master_id.clone().map(FieldValue::Text),
            "lifecycle_stage" => Some(FieldValue::Text(self.lifecycle_stage.as_str().into())),
            "created_at" => stamp(&self.created_at),
            "updated_at" => stamp(&self.updated_at),
            "moved_at" => stamp(&self.moved_at),
            _ => self.custom_data.get(name).cloned(),
        }
    }

    /// First non-empty `custom_data` value among `keys`, as text.
    pub fn custom_text(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|k| self.custom_data.get(*k))
            .find(|v| !v.is_empty())
            .map(FieldValue::as_text)
    }

    /// First numeric `custom_data` value among `keys`.
    pub fn custom_number(&self, keys: &[&str]) -> Option<f64> {
        keys.iter()
            .filter_map(|k| self.custom_data.get(*k))
            .find_map(FieldValue::as_number)
    }
}

/// Canonical, pipeline-independent contact record owned by the tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadMaster {
    pub id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub estimated_value: Option<f64>,
}
