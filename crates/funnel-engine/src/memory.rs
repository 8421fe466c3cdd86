//! In-memory [`Persistence`] backend with JSON dataset import/export.
//!
//! Besides backing the CLI, it carries fault injection hooks (failed or slow
//! stage updates, failing lead master lookups, a hold gate) and call counters
//! so engine behavior can be exercised without a real backend.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use funnel_types::{
    CustomData, FunnelError, Lead, LeadMaster, Pipeline, QualificationRule, Result,
    TemperatureConfig,
};

use crate::persistence::Persistence;

// ---------------------------------------------------------------------------
// Dataset: serializable snapshot of every row the engine reads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub pipelines: Vec<Pipeline>,
    #[serde(default)]
    pub leads: Vec<Lead>,
    #[serde(default)]
    pub lead_masters: Vec<LeadMaster>,
    /// Qualification rules keyed by pipeline id.
    #[serde(default)]
    pub qualification_rules: BTreeMap<String, Vec<QualificationRule>>,
    /// Temperature thresholds keyed by pipeline id.
    #[serde(default)]
    pub temperature_configs: BTreeMap<String, TemperatureConfig>,
}

impl Dataset {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save_json_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StageGate: holds stage updates in flight until released
// ---------------------------------------------------------------------------

/// Returned by [`MemoryPersistence::hold_stage_updates`]. Stage updates issued
/// while the gate is held wait until [`release`](StageGate::release) is called.
pub struct StageGate {
    semaphore: Arc<Semaphore>,
}

impl StageGate {
    pub fn release(&self) {
        self.semaphore.close();
    }
}

// ---------------------------------------------------------------------------
// MemoryPersistence
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    pipelines: HashMap<String, Pipeline>,
    leads: HashMap<String, Lead>,
    lead_masters: HashMap<String, LeadMaster>,
    rules: HashMap<String, Vec<QualificationRule>>,
    temperature: HashMap<String, TemperatureConfig>,
}

#[derive(Default)]
struct Faults {
    stage_update_failures: VecDeque<String>,
    failing_masters: HashSet<String>,
    stage_update_delay: Option<Duration>,
    stage_gate: Option<Arc<Semaphore>>,
}

#[derive(Default)]
pub struct MemoryPersistence {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
    load_leads_calls: AtomicUsize,
    lead_master_calls: AtomicUsize,
    stage_update_calls: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dataset(dataset: Dataset) -> Self {
        let store = Self::new();
        {
            let mut t = lock(&store.tables);
            t.pipelines = dataset
                .pipelines
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect();
            t.leads = dataset
                .leads
                .into_iter()
                .map(|l| (l.id.clone(), l))
                .collect();
            t.lead_masters = dataset
                .lead_masters
                .into_iter()
                .map(|m| (m.id.clone(), m))
                .collect();
            t.rules = dataset.qualification_rules.into_iter().collect();
            t.temperature = dataset.temperature_configs.into_iter().collect();
        }
        store
    }

    /// Export every table, rows sorted by id.
    pub fn snapshot(&self) -> Dataset {
        let t = lock(&self.tables);
        let mut pipelines: Vec<Pipeline> = t.pipelines.values().cloned().collect();
        pipelines.sort_by(|a, b| a.id.cmp(&b.id));
        let mut leads: Vec<Lead> = t.leads.values().cloned().collect();
        leads.sort_by(|a, b| a.id.cmp(&b.id));
        let mut lead_masters: Vec<LeadMaster> = t.lead_masters.values().cloned().collect();
        lead_masters.sort_by(|a, b| a.id.cmp(&b.id));
        Dataset {
            pipelines,
            leads,
            lead_masters,
            qualification_rules: t.rules.clone().into_iter().collect(),
            temperature_configs: t.temperature.clone().into_iter().collect(),
        }
    }

    pub fn insert_pipeline(&self, pipeline: Pipeline) {
        lock(&self.tables)
            .pipelines
            .insert(pipeline.id.clone(), pipeline);
    }

    pub fn insert_lead(&self, lead: Lead) {
        lock(&self.tables).leads.insert(lead.id.clone(), lead);
    }

    pub fn insert_lead_master(&self, master: LeadMaster) {
        lock(&self.tables)
            .lead_masters
            .insert(master.id.clone(), master);
    }

    pub fn set_rules(&self, pipeline_id: &str, rules: Vec<QualificationRule>) {
        lock(&self.tables).rules.insert(pipeline_id.into(), rules);
    }

    pub fn set_temperature_config(&self, pipeline_id: &str, config: TemperatureConfig) {
        lock(&self.tables)
            .temperature
            .insert(pipeline_id.into(), config);
    }

    /// The persisted row, as another process would see it.
    pub fn lead(&self, lead_id: &str) -> Option<Lead> {
        lock(&self.tables).leads.get(lead_id).cloned()
    }

    // --- fault injection ---

    /// Make the next `update_lead_stage` call fail with `message`.
    pub fn fail_next_stage_update(&self, message: impl Into<String>) {
        lock(&self.faults)
            .stage_update_failures
            .push_back(message.into());
    }

    /// Make every lookup of `lead_master_id` fail.
    pub fn fail_lead_master(&self, lead_master_id: &str) {
        lock(&self.faults)
            .failing_masters
            .insert(lead_master_id.into());
    }

    pub fn set_stage_update_delay(&self, delay: Option<Duration>) {
        lock(&self.faults).stage_update_delay = delay;
    }

    pub fn hold_stage_updates(&self) -> StageGate {
        let semaphore = Arc::new(Semaphore::new(0));
        lock(&self.faults).stage_gate = Some(semaphore.clone());
        StageGate { semaphore }
    }

    // --- counters ---

    pub fn load_leads_calls(&self) -> usize {
        self.load_leads_calls.load(Ordering::SeqCst)
    }

    pub fn lead_master_calls(&self) -> usize {
        self.lead_master_calls.load(Ordering::SeqCst)
    }

    pub fn stage_update_calls(&self) -> usize {
        self.stage_update_calls.load(Ordering::SeqCst)
    }
}

fn not_found(entity: &str, id: &str) -> FunnelError {
    FunnelError::NotFound {
        entity: entity.into(),
        id: id.into(),
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load_leads(&self, pipeline_id: &str) -> Result<Vec<Lead>> {
        self.load_leads_calls.fetch_add(1, Ordering::SeqCst);
        let t = lock(&self.tables);
        let mut leads: Vec<Lead> = t
            .leads
            .values()
            .filter(|l| l.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        leads.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(leads)
    }

    async fn update_lead_stage(
        &self,
        lead_id: &str,
        stage_id: &str,
        moved_at: DateTime<Utc>,
    ) -> Result<()> {
        self.stage_update_calls.fetch_add(1, Ordering::SeqCst);
        let (failure, delay, gate) = {
            let mut f = lock(&self.faults);
            (
                f.stage_update_failures.pop_front(),
                f.stage_update_delay,
                f.stage_gate.clone(),
            )
        };
        if let Some(gate) = gate {
            // A closed gate means released.
            let _ = gate.acquire().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = failure {
            return Err(FunnelError::persistence("update_lead_stage", message));
        }

        let mut t = lock(&self.tables);
        let lead = t
            .leads
            .get_mut(lead_id)
            .ok_or_else(|| not_found("Lead", lead_id))?;
        lead.stage_id = stage_id.to_string();
        lead.moved_at = moved_at;
        lead.updated_at = moved_at;
        Ok(())
    }

    async fn load_lead_master(&self, id: &str) -> Result<Option<LeadMaster>> {
        self.lead_master_calls.fetch_add(1, Ordering::SeqCst);
        if lock(&self.faults).failing_masters.contains(id) {
            return Err(FunnelError::persistence(
                "load_lead_master",
                format!("backend unavailable for '{id}'"),
            ));
        }
        Ok(lock(&self.tables).lead_masters.get(id).cloned())
    }

    async fn load_pipeline(&self, id: &str) -> Result<Pipeline> {
        lock(&self.tables)
            .pipelines
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("Pipeline", id))
    }

    async fn load_qualification_rules(&self, pipeline_id: &str) -> Result<Vec<QualificationRule>> {
        Ok(lock(&self.tables)
            .rules
            .get(pipeline_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn load_temperature_config(&self, pipeline_id: &str) -> Result<TemperatureConfig> {
        let t = lock(&self.tables);
        if !t.pipelines.contains_key(pipeline_id) {
            return Err(not_found("Pipeline", pipeline_id));
        }
        Ok(t.temperature.get(pipeline_id).copied().unwrap_or_default())
    }

    async fn create_lead(&self, lead: &Lead) -> Result<()> {
        let mut t = lock(&self.tables);
        if t.leads.contains_key(&lead.id) {
            return Err(FunnelError::persistence(
                "create_lead",
                format!("lead '{}' already exists", lead.id),
            ));
        }
        t.leads.insert(lead.id.clone(), lead.clone());
        Ok(())
    }

    async fn update_lead_data(
        &self,
        lead_id: &str,
        fields: &CustomData,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut t = lock(&self.tables);
        let lead = t
            .leads
            .get_mut(lead_id)
            .ok_or_else(|| not_found("Lead", lead_id))?;
        lead.custom_data
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        lead.updated_at = updated_at;
        Ok(())
    }
}
