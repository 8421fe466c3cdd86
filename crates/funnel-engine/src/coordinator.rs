//! Stage transition coordinator.
//!
//! Owns one view's in-memory lead collection and is the only writer of
//! `stage_id` / `moved_at`. A move is applied optimistically, persisted, and
//! then either committed (and announced on the [`EventBus`]) or rolled back
//! to the snapshot taken before the mutation.
//!
//! ```text
//! Idle --move_lead--> Moving --persisted--> Idle
//!                        |
//!                        +--failed/timeout/dropped--> RollingBack --> Idle
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use funnel_types::{CustomData, FunnelError, Lead, Pipeline, Result, RESERVED_FIELDS};

use crate::config::EngineConfig;
use crate::events::{BoardEvent, EventBus, LeadCreated, LeadDataUpdated, LeadStageChanged};
use crate::persistence::Persistence;
use crate::validation::validate_or_raise;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Per-lead move state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum MovePhase {
    Idle,
    Moving { to_stage_id: String },
    RollingBack,
}

/// Result of a successful [`StageTransitionCoordinator::move_lead`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// The target was the lead's current stage; nothing changed.
    Unchanged,
    /// The move was persisted and published.
    Moved(LeadStageChanged),
}

impl MoveOutcome {
    pub fn is_moved(&self) -> bool {
        matches!(self, MoveOutcome::Moved(_))
    }
}

/// Input for [`StageTransitionCoordinator::create_lead`].
#[derive(Debug, Clone, Default)]
pub struct LeadDraft {
    pub pipeline_id: String,
    /// Defaults to the pipeline's first stage.
    pub stage_id: Option<String>,
    pub custom_data: CustomData,
    pub lead_master_id: Option<String>,
    pub assigned_to: Option<String>,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct Tracked {
    lead: Lead,
    phase: MovePhase,
}

#[derive(Default)]
struct State {
    pipelines: HashMap<String, Pipeline>,
    leads: HashMap<String, Tracked>,
}

/// The fields a move touches, captured before the optimistic update.
struct Snapshot {
    stage_id: String,
    moved_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Rolls the optimistic update back unless committed. Dropping the move
/// future mid-flight therefore restores the lead as well.
struct MoveGuard<'a> {
    coordinator: &'a StageTransitionCoordinator,
    lead_id: &'a str,
    snapshot: Option<Snapshot>,
}

impl MoveGuard<'_> {
    fn commit(mut self) {
        self.snapshot = None;
        if let Some(tracked) = self.coordinator.state().leads.get_mut(self.lead_id) {
            tracked.phase = MovePhase::Idle;
        }
    }
}

impl Drop for MoveGuard<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.coordinator.rollback(self.lead_id, snapshot);
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct StageTransitionCoordinator {
    persistence: Arc<dyn Persistence>,
    bus: EventBus,
    config: EngineConfig,
    state: Mutex<State>,
}

impl StageTransitionCoordinator {
    pub fn new(persistence: Arc<dyn Persistence>, bus: EventBus, config: EngineConfig) -> Self {
        Self {
            persistence,
            bus,
            config,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Load (or reload) a pipeline and its leads.
    ///
    /// The pipeline must pass validation. Leads with a move in flight keep
    /// their optimistic in-memory state; every other lead of the pipeline is
    /// replaced by the persisted row.
    pub async fn load_pipeline(&self, pipeline_id: &str) -> Result<Pipeline> {
        let pipeline = self.persistence.load_pipeline(pipeline_id).await?;
        for diag in validate_or_raise(&pipeline)? {
            tracing::debug!(pipeline_id, rule = %diag.rule, "{}", diag.message);
        }
        let rows = self.persistence.load_leads(pipeline_id).await?;

        let mut state = self.state();
        let mut moving: HashMap<String, Tracked> = HashMap::new();
        state.leads.retain(|id, tracked| {
            if tracked.lead.pipeline_id != pipeline_id {
                return true;
            }
            if tracked.phase != MovePhase::Idle {
                moving.insert(id.clone(), Tracked {
                    lead: tracked.lead.clone(),
                    phase: tracked.phase.clone(),
                });
            }
            false
        });
        let count = rows.len();
        for lead in rows {
            if moving.contains_key(&lead.id) {
                continue;
            }
            state.leads.insert(lead.id.clone(), Tracked {
                lead,
                phase: MovePhase::Idle,
            });
        }
        if !moving.is_empty() {
            tracing::debug!(pipeline_id, in_flight = moving.len(), "Kept leads with moves in flight");
        }
        state.leads.extend(moving);
        state.pipelines.insert(pipeline.id.clone(), pipeline.clone());
        tracing::debug!(pipeline_id, leads = count, "Pipeline loaded");
        Ok(pipeline)
    }

    /// Move a lead to `target_stage_id`.
    ///
    /// Rejected before any mutation when the lead is not loaded, already has
    /// a move in flight, or the target belongs to another pipeline. Moving to
    /// the current stage is a no-op. A failed or timed-out persistence call
    /// restores the lead and publishes nothing.
    pub async fn move_lead(&self, lead_id: &str, target_stage_id: &str) -> Result<MoveOutcome> {
        let now = Utc::now();
        let (pipeline_id, snapshot) = {
            let mut guard = self.state();
            let State { pipelines, leads } = &mut *guard;
            let tracked = leads.get_mut(lead_id).ok_or_else(|| FunnelError::LeadNotLoaded {
                lead_id: lead_id.to_string(),
            })?;
            if tracked.phase != MovePhase::Idle {
                return Err(FunnelError::ConcurrentMove {
                    lead_id: lead_id.to_string(),
                });
            }
            let pipeline_id = tracked.lead.pipeline_id.clone();
            let in_pipeline = pipelines
                .get(&pipeline_id)
                .is_some_and(|p| p.contains_stage(target_stage_id));
            if !in_pipeline {
                return Err(FunnelError::StageNotInPipeline {
                    stage_id: target_stage_id.to_string(),
                    pipeline_id,
                });
            }
            if tracked.lead.stage_id == target_stage_id {
                tracing::debug!(lead_id, stage_id = target_stage_id, "Move to current stage ignored");
                return Ok(MoveOutcome::Unchanged);
            }

            let lead = &mut tracked.lead;
            let snapshot = Snapshot {
                stage_id: std::mem::replace(&mut lead.stage_id, target_stage_id.to_string()),
                moved_at: std::mem::replace(&mut lead.moved_at, now),
                updated_at: std::mem::replace(&mut lead.updated_at, now),
            };
            tracked.phase = MovePhase::Moving {
                to_stage_id: target_stage_id.to_string(),
            };
            (pipeline_id, snapshot)
        };

        let from_stage_id = snapshot.stage_id.clone();
        let guard = MoveGuard {
            coordinator: self,
            lead_id,
            snapshot: Some(snapshot),
        };

        let persisted = tokio::time::timeout(
            self.config.move_timeout(),
            self.persistence.update_lead_stage(lead_id, target_stage_id, now),
        )
        .await;

        match persisted {
            Ok(Ok(())) => {
                guard.commit();
                let event = LeadStageChanged {
                    lead_id: lead_id.to_string(),
                    pipeline_id,
                    from_stage_id,
                    to_stage_id: target_stage_id.to_string(),
                    timestamp: now,
                };
                tracing::info!(
                    lead_id,
                    from = %event.from_stage_id,
                    to = %event.to_stage_id,
                    "Lead moved"
                );
                self.bus.publish(BoardEvent::LeadStageChanged(event.clone()));
                Ok(MoveOutcome::Moved(event))
            }
            Ok(Err(e)) => {
                drop(guard);
                tracing::warn!(lead_id, to = target_stage_id, error = %e, "Move failed, rolled back");
                Err(e)
            }
            Err(_elapsed) => {
                drop(guard);
                let e = FunnelError::PersistenceTimeout {
                    operation: "update_lead_stage".into(),
                    timeout_ms: self.config.move_timeout_ms,
                };
                tracing::warn!(lead_id, to = target_stage_id, error = %e, "Move timed out, rolled back");
                Err(e)
            }
        }
    }

    fn rollback(&self, lead_id: &str, snapshot: Snapshot) {
        let mut state = self.state();
        let Some(tracked) = state.leads.get_mut(lead_id) else {
            return;
        };
        tracked.phase = MovePhase::RollingBack;
        // Only the fields the move touched; concurrent data edits survive.
        tracked.lead.stage_id = snapshot.stage_id;
        tracked.lead.moved_at = snapshot.moved_at;
        tracked.lead.updated_at = snapshot.updated_at;
        tracked.phase = MovePhase::Idle;
    }

    /// Create a lead in a loaded pipeline and announce it.
    pub async fn create_lead(&self, draft: LeadDraft) -> Result<Lead> {
        let stage_id = {
            let state = self.state();
            let pipeline = state.pipelines.get(&draft.pipeline_id).ok_or_else(|| {
                FunnelError::NotFound {
                    entity: "Pipeline".into(),
                    id: draft.pipeline_id.clone(),
                }
            })?;
            let stage = match &draft.stage_id {
                Some(id) => pipeline.stage(id),
                None => pipeline.first_stage(),
            };
            match stage {
                Some(s) => s.id.clone(),
                None => {
                    return Err(FunnelError::StageNotInPipeline {
                        stage_id: draft.stage_id.clone().unwrap_or_default(),
                        pipeline_id: draft.pipeline_id.clone(),
                    })
                }
            }
        };
        reject_reserved(&draft.custom_data)?;

        let now = Utc::now();
        let lead = Lead {
            id: uuid::Uuid::new_v4().to_string(),
            pipeline_id: draft.pipeline_id,
            stage_id,
            custom_data: draft.custom_data,
            lead_master_id: draft.lead_master_id,
            assigned_to: draft.assigned_to,
            lifecycle_stage: Default::default(),
            created_at: now,
            updated_at: now,
            moved_at: now,
        };
        self.persistence.create_lead(&lead).await?;

        self.state().leads.insert(lead.id.clone(), Tracked {
            lead: lead.clone(),
            phase: MovePhase::Idle,
        });
        tracing::info!(lead_id = %lead.id, stage_id = %lead.stage_id, "Lead created");
        self.bus.publish(BoardEvent::LeadCreated(LeadCreated {
            lead_id: lead.id.clone(),
            pipeline_id: lead.pipeline_id.clone(),
            stage_id: lead.stage_id.clone(),
            timestamp: now,
        }));
        Ok(lead)
    }

    /// Merge `fields` into a lead's custom data.
    ///
    /// Never touches `stage_id` or `moved_at`, so it is allowed while a move
    /// is in flight.
    pub async fn update_lead_data(&self, lead_id: &str, fields: CustomData) -> Result<Lead> {
        if !self.state().leads.contains_key(lead_id) {
            return Err(FunnelError::LeadNotLoaded {
                lead_id: lead_id.to_string(),
            });
        }
        reject_reserved(&fields)?;
        let updated_fields = match serde_json::to_value(&fields)? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        let now = Utc::now();
        self.persistence.update_lead_data(lead_id, &fields, now).await?;

        let lead = {
            let mut state = self.state();
            let tracked = state.leads.get_mut(lead_id).ok_or_else(|| FunnelError::LeadNotLoaded {
                lead_id: lead_id.to_string(),
            })?;
            tracked.lead.custom_data.extend(fields);
            tracked.lead.updated_at = now;
            tracked.lead.clone()
        };
        tracing::info!(lead_id, fields = updated_fields.len(), "Lead data updated");
        self.bus.publish(BoardEvent::LeadDataUpdated(LeadDataUpdated {
            lead_id: lead_id.to_string(),
            updated_fields,
            timestamp: now,
        }));
        Ok(lead)
    }

    // --- accessors ---

    pub fn lead(&self, lead_id: &str) -> Option<Lead> {
        self.state().leads.get(lead_id).map(|t| t.lead.clone())
    }

    pub fn contains_lead(&self, lead_id: &str) -> bool {
        self.state().leads.contains_key(lead_id)
    }

    /// Loaded leads of a pipeline, oldest first.
    pub fn leads_for_pipeline(&self, pipeline_id: &str) -> Vec<Lead> {
        let mut leads: Vec<Lead> = self
            .state()
            .leads
            .values()
            .filter(|t| t.lead.pipeline_id == pipeline_id)
            .map(|t| t.lead.clone())
            .collect();
        leads.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        leads
    }

    pub fn pipeline(&self, pipeline_id: &str) -> Option<Pipeline> {
        self.state().pipelines.get(pipeline_id).cloned()
    }

    pub fn move_phase(&self, lead_id: &str) -> Option<MovePhase> {
        self.state().leads.get(lead_id).map(|t| t.phase.clone())
    }
}

fn reject_reserved(fields: &CustomData) -> Result<()> {
    if let Some(name) = fields.keys().find(|k| RESERVED_FIELDS.contains(&k.as_str())) {
        return Err(FunnelError::ValidationError(format!(
            "'{name}' is a lead attribute and cannot be set through custom data"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
