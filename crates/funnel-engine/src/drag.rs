//! Drag-and-drop gesture model layered above the coordinator.
//!
//! A gesture picks up one lead, tracks which stage column is hovered (the
//! transient "active" drop target) and resolves on release. Releasing over
//! the lead's own stage or outside every target cancels the gesture without
//! touching the coordinator.

use funnel_types::{Lead, Pipeline, Result};

use crate::coordinator::{MoveOutcome, StageTransitionCoordinator};

/// What a released gesture asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropIntent {
    Cancelled,
    Move { lead_id: String, to_stage_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DragOutcome {
    Cancelled,
    Completed(MoveOutcome),
}

#[derive(Debug, Clone)]
pub struct DragGesture {
    lead_id: String,
    source_stage_id: String,
    targets: Vec<String>,
    hovered: Option<String>,
}

impl DragGesture {
    /// Pick up `lead`; every stage of `pipeline` becomes a drop target.
    pub fn start(lead: &Lead, pipeline: &Pipeline) -> Self {
        Self {
            lead_id: lead.id.clone(),
            source_stage_id: lead.stage_id.clone(),
            targets: pipeline.ordered_stages().iter().map(|s| s.id.clone()).collect(),
            hovered: None,
        }
    }

    pub fn lead_id(&self) -> &str {
        &self.lead_id
    }

    /// Pointer moved over `stage_id`, or left every column when `None`.
    pub fn hover(&mut self, stage_id: Option<&str>) {
        self.hovered = stage_id
            .filter(|id| self.targets.iter().any(|t| t == id))
            .map(str::to_string);
    }

    /// The column to render in its active state.
    pub fn active_target(&self) -> Option<&str> {
        self.hovered.as_deref()
    }

    pub fn is_active(&self, stage_id: &str) -> bool {
        self.hovered.as_deref() == Some(stage_id)
    }

    pub fn release(self) -> DropIntent {
        match self.hovered {
            Some(to) if to != self.source_stage_id => DropIntent::Move {
                lead_id: self.lead_id,
                to_stage_id: to,
            },
            _ => DropIntent::Cancelled,
        }
    }

    /// Release the gesture and, if it targets another stage, run the move.
    pub async fn drop_on(self, coordinator: &StageTransitionCoordinator) -> Result<DragOutcome> {
        match self.release() {
            DropIntent::Cancelled => Ok(DragOutcome::Cancelled),
            DropIntent::Move { lead_id, to_stage_id } => coordinator
                .move_lead(&lead_id, &to_stage_id)
                .await
                .map(DragOutcome::Completed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use funnel_types::{CustomData, Stage};

    use crate::config::EngineConfig;
    use crate::events::EventBus;
    use crate::memory::MemoryPersistence;

    fn pipeline() -> Pipeline {
        let stage = |id: &str, order_index| Stage {
            id: id.into(),
            name: id.into(),
            order_index,
            color: String::new(),
            max_days_allowed: None,
            is_system_stage: false,
        };
        Pipeline {
            id: "p1".into(),
            name: "Sales".into(),
            description: String::new(),
            tenant_id: "t1".into(),
            stages: vec![stage("new", 0), stage("contacted", 1)],
            members: vec![],
            custom_fields: vec![],
        }
    }

    fn lead() -> Lead {
        let t = Utc::now();
        Lead {
            id: "l1".into(),
            pipeline_id: "p1".into(),
            stage_id: "new".into(),
            custom_data: CustomData::new(),
            lead_master_id: None,
            assigned_to: None,
            lifecycle_stage: Default::default(),
            created_at: t,
            updated_at: t,
            moved_at: t,
        }
    }

    #[test]
    fn hover_tracks_active_target() {
        let mut gesture = DragGesture::start(&lead(), &pipeline());
        assert_eq!(gesture.active_target(), None);

        gesture.hover(Some("contacted"));
        assert!(gesture.is_active("contacted"));
        assert!(!gesture.is_active("new"));

        gesture.hover(Some("not-a-column"));
        assert_eq!(gesture.active_target(), None);
    }

    #[test]
    fn release_on_own_stage_or_outside_cancels() {
        let mut gesture = DragGesture::start(&lead(), &pipeline());
        gesture.hover(Some("new"));
        assert_eq!(gesture.release(), DropIntent::Cancelled);

        let mut gesture = DragGesture::start(&lead(), &pipeline());
        gesture.hover(Some("contacted"));
        gesture.hover(None);
        assert_eq!(gesture.release(), DropIntent::Cancelled);
    }

    #[tokio::test]
    async fn cancelled_drop_never_reaches_persistence() {
        let store = Arc::new(MemoryPersistence::new());
        store.insert_pipeline(pipeline());
        store.insert_lead(lead());
        let coordinator =
            StageTransitionCoordinator::new(store.clone(), EventBus::new(4), EngineConfig::default());
        coordinator.load_pipeline("p1").await.unwrap();

        let mut gesture = DragGesture::start(&lead(), &pipeline());
        gesture.hover(Some("new"));
        let outcome = gesture.drop_on(&coordinator).await.unwrap();
        assert_eq!(outcome, DragOutcome::Cancelled);
        assert_eq!(store.stage_update_calls(), 0);

        let mut gesture = DragGesture::start(&lead(), &pipeline());
        gesture.hover(Some("contacted"));
        let outcome = gesture.drop_on(&coordinator).await.unwrap();
        assert!(matches!(outcome, DragOutcome::Completed(MoveOutcome::Moved(_))));
        assert_eq!(store.stage_update_calls(), 1);
    }
}
