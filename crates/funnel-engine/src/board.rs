//! Per-view board projection.
//!
//! Each mounted board owns its own [`StageTransitionCoordinator`] and shares
//! only the persistence backend and the [`EventBus`] with other boards. A
//! board subscribes to every lead event, keeps the ones relevant to the
//! pipeline it displays, and reloads after a trailing-edge debounce window.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use funnel_types::{
    Lead, Pipeline, QualificationRule, Result, Stage, Temperature, TemperatureConfig,
};

use crate::config::EngineConfig;
use crate::coordinator::{MoveOutcome, StageTransitionCoordinator};
use crate::debounce::Debouncer;
use crate::drag::{DragGesture, DragOutcome};
use crate::events::{BoardEvent, EventBus, EventKind, Subscription};
use crate::persistence::Persistence;
use crate::qualification::{self, LifecycleDecision, Qualification, RuleMatch};
use crate::resolver::{LeadMasterResolver, MergedLeadView};
use crate::temperature;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Whose board this is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerScope {
    /// Sees every lead of the pipeline.
    Administrator,
    /// Sees only leads assigned to `viewer_id`.
    Member { viewer_id: String },
}

impl ViewerScope {
    fn admits(&self, lead: &Lead) -> bool {
        match self {
            ViewerScope::Administrator => true,
            ViewerScope::Member { viewer_id } => lead.assigned_to.as_deref() == Some(viewer_id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardFilter {
    /// Case-insensitive match on name, email, phone or company.
    pub search: Option<String>,
    pub stage_id: Option<String>,
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Value,
    Name,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSort {
    pub field: SortField,
    pub direction: SortDirection,
}

/// Everything a board renders for one lead.
#[derive(Debug, Clone, Serialize)]
pub struct LeadCard {
    pub lead: Lead,
    pub view: MergedLeadView,
    pub temperature: Temperature,
    pub qualification: Qualification,
    pub matched_rules: Vec<RuleMatch>,
    pub lifecycle: LifecycleDecision,
    pub days_in_stage: u32,
    pub overdue: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageColumn {
    pub stage: Stage,
    pub cards: Vec<LeadCard>,
    pub total_value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub stage_id: String,
    pub name: String,
    pub count: usize,
    pub value: f64,
}

/// Aggregate board figures, computed from real stage membership.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BoardSummary {
    pub total_leads: usize,
    pub total_value: f64,
    pub won: usize,
    pub lost: usize,
    pub mql: usize,
    pub sql: usize,
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
    pub overdue: usize,
    pub stages: Vec<StageSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageOutcome {
    Won,
    Lost,
}

/// Terminal outcome of a system stage, read from its name.
fn stage_outcome(stage: &Stage) -> Option<StageOutcome> {
    if !stage.is_system_stage {
        return None;
    }
    let name = stage.name.to_lowercase();
    if name.contains("lost") || name.contains("perdido") {
        Some(StageOutcome::Lost)
    } else if name.contains("won") || name.contains("ganho") {
        Some(StageOutcome::Won)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// View model
// ---------------------------------------------------------------------------

struct ViewState {
    rules: Vec<QualificationRule>,
    temperature: TemperatureConfig,
    filter: BoardFilter,
    sort: BoardSort,
}

struct Wiring {
    _subscriptions: Vec<Subscription>,
    debouncer: Debouncer,
}

pub struct PipelineBoardViewModel {
    pipeline_id: String,
    scope: ViewerScope,
    persistence: Arc<dyn Persistence>,
    coordinator: StageTransitionCoordinator,
    resolver: Arc<LeadMasterResolver>,
    view: Mutex<ViewState>,
    wiring: Mutex<Option<Wiring>>,
    refreshes: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PipelineBoardViewModel {
    /// Load the board and start listening for relevant events on `bus`.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn mount(
        pipeline_id: &str,
        scope: ViewerScope,
        persistence: Arc<dyn Persistence>,
        bus: EventBus,
        config: EngineConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let board = Arc::new(Self {
            pipeline_id: pipeline_id.to_string(),
            scope,
            persistence: persistence.clone(),
            coordinator: StageTransitionCoordinator::new(persistence.clone(), bus.clone(), config.clone()),
            resolver: Arc::new(LeadMasterResolver::new(persistence)),
            view: Mutex::new(ViewState {
                rules: Vec::new(),
                temperature: TemperatureConfig::default(),
                filter: BoardFilter::default(),
                sort: BoardSort::default(),
            }),
            wiring: Mutex::new(None),
            refreshes: AtomicUsize::new(0),
        });
        board.refresh().await?;

        let weak = Arc::downgrade(&board);
        let debouncer = Debouncer::spawn(config.refresh_debounce(), move || {
            let weak = weak.clone();
            async move {
                let Some(board) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                if let Err(e) = board.refresh().await {
                    tracing::warn!(pipeline_id = %board.pipeline_id, error = %e, "Board refresh failed");
                }
                ControlFlow::Continue(())
            }
        });
        let subscriptions = [EventKind::LeadStageChanged, EventKind::LeadCreated, EventKind::LeadDataUpdated]
            .into_iter()
            .map(|kind| {
                let weak: Weak<Self> = Arc::downgrade(&board);
                bus.subscribe(kind, move |event| {
                    if let Some(board) = weak.upgrade() {
                        board.on_event(event);
                    }
                })
            })
            .collect();
        *lock(&board.wiring) = Some(Wiring {
            _subscriptions: subscriptions,
            debouncer,
        });
        tracing::info!(pipeline_id, "Board mounted");
        Ok(board)
    }

    fn on_event(&self, event: &BoardEvent) {
        if !self.is_relevant(event) {
            return;
        }
        match lock(&self.wiring).as_ref() {
            Some(wiring) => wiring.debouncer.trigger(),
            None => tracing::debug!(pipeline_id = %self.pipeline_id, "Event after unmount ignored"),
        }
    }

    /// Whether `event` concerns the pipeline this board displays.
    pub fn is_relevant(&self, event: &BoardEvent) -> bool {
        match event.pipeline_id() {
            Some(pipeline_id) => pipeline_id == self.pipeline_id,
            None => self.coordinator.contains_lead(event.lead_id()),
        }
    }

    /// Release the event subscriptions and stop the debouncer.
    pub fn unmount(&self) {
        if lock(&self.wiring).take().is_some() {
            tracing::info!(pipeline_id = %self.pipeline_id, "Board unmounted");
        }
    }

    pub fn is_mounted(&self) -> bool {
        lock(&self.wiring).is_some()
    }

    /// Reload pipeline, leads, rules and thresholds, then resolve every
    /// visible lead's master in a fresh pass.
    pub async fn refresh(&self) -> Result<()> {
        self.coordinator.load_pipeline(&self.pipeline_id).await?;
        let rules = self.persistence.load_qualification_rules(&self.pipeline_id).await?;
        let mut temperature = self.persistence.load_temperature_config(&self.pipeline_id).await?;
        if let Err(e) = temperature.validate() {
            tracing::warn!(pipeline_id = %self.pipeline_id, error = %e, "Invalid temperature config, using defaults");
            temperature = TemperatureConfig::default();
        }
        {
            let mut view = lock(&self.view);
            view.rules = rules;
            view.temperature = temperature;
        }

        self.resolver.begin_pass();
        let mut pending = JoinSet::new();
        for lead in self.scoped_leads() {
            let resolver = self.resolver.clone();
            pending.spawn(async move { resolver.resolve(&lead).await });
        }
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(pipeline_id = %self.pipeline_id, error = %e, "Lead resolution task failed");
            }
        }

        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(pipeline_id = %self.pipeline_id, refresh = n, "Board refreshed");
        Ok(())
    }

    /// Number of completed refreshes, including the one done on mount.
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    pub fn pipeline(&self) -> Option<Pipeline> {
        self.coordinator.pipeline(&self.pipeline_id)
    }

    pub fn coordinator(&self) -> &StageTransitionCoordinator {
        &self.coordinator
    }

    pub fn set_filter(&self, filter: BoardFilter) {
        lock(&self.view).filter = filter;
    }

    pub fn set_sort(&self, sort: BoardSort) {
        lock(&self.view).sort = sort;
    }

    // --- projection ---

    fn scoped_leads(&self) -> Vec<Lead> {
        self.coordinator
            .leads_for_pipeline(&self.pipeline_id)
            .into_iter()
            .filter(|l| self.scope.admits(l))
            .collect()
    }

    /// Scoped leads after the filter, in sort order, paired with their views.
    fn visible(&self) -> Vec<(Lead, MergedLeadView)> {
        let (filter, sort) = {
            let view = lock(&self.view);
            (view.filter.clone(), view.sort)
        };
        let needle = filter
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let mut rows: Vec<(Lead, MergedLeadView)> = self
            .scoped_leads()
            .into_iter()
            .filter(|l| filter.stage_id.as_ref().map_or(true, |s| &l.stage_id == s))
            .filter(|l| {
                filter
                    .assigned_to
                    .as_ref()
                    .map_or(true, |a| l.assigned_to.as_ref() == Some(a))
            })
            .map(|l| {
                let view = self.resolver.peek(&l);
                (l, view)
            })
            .filter(|(_, v)| needle.as_deref().map_or(true, |n| matches_search(v, n)))
            .collect();

        rows.sort_by(|(a, va), (b, vb)| {
            let ord = match sort.field {
                SortField::CreatedAt => a.created_at.cmp(&b.created_at),
                SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                SortField::Value => value_of(va)
                    .partial_cmp(&value_of(vb))
                    .unwrap_or(CmpOrdering::Equal),
                SortField::Name => va.name.to_lowercase().cmp(&vb.name.to_lowercase()),
            };
            match sort.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
        rows
    }

    /// Visible leads grouped by stage id. Every stage of the pipeline has an
    /// entry; another pipeline id yields an empty map.
    pub fn stage_groups(&self, pipeline_id: &str) -> HashMap<String, Vec<Lead>> {
        let Some(pipeline) = self.pipeline().filter(|p| p.id == pipeline_id) else {
            return HashMap::new();
        };
        let mut groups: HashMap<String, Vec<Lead>> = pipeline
            .stages
            .iter()
            .map(|s| (s.id.clone(), Vec::new()))
            .collect();
        for (lead, _) in self.visible() {
            if let Some(group) = groups.get_mut(&lead.stage_id) {
                group.push(lead);
            }
        }
        groups
    }

    /// Sum of the values of the visible leads in `stage_id`.
    pub fn stage_total_value(&self, stage_id: &str) -> f64 {
        self.visible()
            .iter()
            .filter(|(l, _)| l.stage_id == stage_id)
            .map(|(_, v)| value_of(v))
            .sum()
    }

    fn card(&self, lead: Lead, view: MergedLeadView, stage: &Stage, state: &ViewState, now: DateTime<Utc>) -> LeadCard {
        LeadCard {
            temperature: temperature::classify(&lead, &state.temperature, now),
            qualification: qualification::classify(&lead, &state.rules),
            matched_rules: qualification::explain(&lead, &state.rules),
            lifecycle: qualification::next_lifecycle_stage(&lead, &state.rules),
            days_in_stage: temperature::stage_dwell_days(&lead, now),
            overdue: temperature::exceeds_stage_sla(&lead, stage, now),
            lead,
            view,
        }
    }

    /// Columns in stage order, each with its rendered cards.
    pub fn columns(&self, now: DateTime<Utc>) -> Vec<StageColumn> {
        let Some(pipeline) = self.pipeline() else {
            return Vec::new();
        };
        let mut by_stage: HashMap<String, Vec<(Lead, MergedLeadView)>> = HashMap::new();
        for (lead, view) in self.visible() {
            by_stage.entry(lead.stage_id.clone()).or_default().push((lead, view));
        }
        let state = lock(&self.view);
        pipeline
            .ordered_stages()
            .into_iter()
            .map(|stage| {
                let cards: Vec<LeadCard> = by_stage
                    .remove(&stage.id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(lead, view)| self.card(lead, view, stage, &state, now))
                    .collect();
                StageColumn {
                    total_value: cards.iter().map(|c| value_of(&c.view)).sum(),
                    stage: stage.clone(),
                    cards,
                }
            })
            .collect()
    }

    /// Figures over every lead in scope, ignoring the search filter.
    pub fn summary(&self, now: DateTime<Utc>) -> BoardSummary {
        let Some(pipeline) = self.pipeline() else {
            return BoardSummary::default();
        };
        let leads = self.scoped_leads();
        let state = lock(&self.view);
        let mut summary = BoardSummary {
            total_leads: leads.len(),
            ..Default::default()
        };

        for stage in pipeline.ordered_stages() {
            let in_stage: Vec<&Lead> = leads.iter().filter(|l| l.stage_id == stage.id).collect();
            let value: f64 = in_stage.iter().map(|l| value_of(&self.resolver.peek(l))).sum();
            match stage_outcome(stage) {
                Some(StageOutcome::Won) => summary.won += in_stage.len(),
                Some(StageOutcome::Lost) => summary.lost += in_stage.len(),
                None => {}
            }
            summary.overdue += in_stage
                .iter()
                .filter(|l| temperature::exceeds_stage_sla(l, stage, now))
                .count();
            summary.total_value += value;
            summary.stages.push(StageSummary {
                stage_id: stage.id.clone(),
                name: stage.name.clone(),
                count: in_stage.len(),
                value,
            });
        }

        for lead in &leads {
            let q = qualification::classify(lead, &state.rules);
            summary.mql += usize::from(q.is_mql);
            summary.sql += usize::from(q.is_sql);
            match temperature::classify(lead, &state.temperature, now) {
                Temperature::Hot => summary.hot += 1,
                Temperature::Warm => summary.warm += 1,
                Temperature::Cold => summary.cold += 1,
            }
        }
        summary
    }

    // --- interaction ---

    pub async fn move_lead(&self, lead_id: &str, target_stage_id: &str) -> Result<MoveOutcome> {
        self.coordinator.move_lead(lead_id, target_stage_id).await
    }

    /// Stage ids a dragged card may be dropped on, in board order.
    pub fn drop_targets(&self) -> Vec<String> {
        self.pipeline()
            .map(|p| p.ordered_stages().iter().map(|s| s.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Pick up a visible lead. `None` when the lead is not on this board.
    pub fn start_drag(&self, lead_id: &str) -> Option<DragGesture> {
        let pipeline = self.pipeline()?;
        let lead = self.coordinator.lead(lead_id).filter(|l| self.scope.admits(l))?;
        Some(DragGesture::start(&lead, &pipeline))
    }

    pub async fn finish_drag(&self, gesture: DragGesture) -> Result<DragOutcome> {
        gesture.drop_on(&self.coordinator).await
    }
}

impl Drop for PipelineBoardViewModel {
    fn drop(&mut self) {
        self.unmount();
    }
}

fn matches_search(view: &MergedLeadView, needle: &str) -> bool {
    [
        Some(view.name.as_str()),
        Some(view.email.as_str()),
        view.phone.as_deref(),
        view.company.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(needle))
}

fn value_of(view: &MergedLeadView) -> f64 {
    view.value.unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use funnel_types::{
        ConditionOperator, CustomData, FieldValue, LeadMaster, QualificationCondition,
        QualificationTier,
    };

    use crate::memory::MemoryPersistence;

    fn stage(id: &str, name: &str, order_index: u32, system: bool) -> Stage {
        Stage {
            id: id.into(),
            name: name.into(),
            order_index,
            color: String::new(),
            max_days_allowed: Some(3),
            is_system_stage: system,
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline {
            id: "p1".into(),
            name: "Sales".into(),
            description: String::new(),
            tenant_id: "t1".into(),
            stages: vec![
                stage("new", "New", 0, false),
                stage("contacted", "Contacted", 1, false),
                stage("won", "Won", 2, true),
                stage("lost", "Lost", 3, true),
            ],
            members: vec!["ana".into()],
            custom_fields: vec![],
        }
    }

    fn lead(id: &str, stage_id: &str, days_old: i64, name: &str, value: f64, owner: &str) -> Lead {
        let t = Utc::now() - ChronoDuration::days(days_old);
        let mut custom_data = CustomData::new();
        custom_data.insert("name".into(), name.into());
        custom_data.insert("value".into(), FieldValue::Number(value));
        Lead {
            id: id.into(),
            pipeline_id: "p1".into(),
            stage_id: stage_id.into(),
            custom_data,
            lead_master_id: None,
            assigned_to: Some(owner.into()),
            lifecycle_stage: Default::default(),
            created_at: t,
            updated_at: t,
            moved_at: t,
        }
    }

    fn store() -> Arc<MemoryPersistence> {
        let store = Arc::new(MemoryPersistence::new());
        store.insert_pipeline(pipeline());
        store.insert_lead(lead("l1", "new", 1, "Ada", 100.0, "ana"));
        store.insert_lead(lead("l2", "new", 5, "Bruno", 250.0, "bea"));
        store.insert_lead(lead("l3", "won", 9, "Carla", 1000.0, "ana"));
        store.insert_lead(lead("l4", "lost", 2, "Davi", 50.0, "bea"));
        store
    }

    async fn mount(store: Arc<MemoryPersistence>, bus: EventBus, scope: ViewerScope) -> Arc<PipelineBoardViewModel> {
        PipelineBoardViewModel::mount("p1", scope, store, bus, EngineConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn groups_cover_every_stage() {
        let board = mount(store(), EventBus::new(16), ViewerScope::Administrator).await;
        let groups = board.stage_groups("p1");
        assert_eq!(groups.len(), 4);
        assert_eq!(groups["new"].len(), 2);
        assert!(groups["contacted"].is_empty());
        assert!(board.stage_groups("other").is_empty());
        assert_eq!(board.stage_total_value("new"), 350.0);
        assert_eq!(board.refresh_count(), 1);
    }

    #[tokio::test]
    async fn member_board_only_shows_assigned_leads() {
        let board = mount(
            store(),
            EventBus::new(16),
            ViewerScope::Member { viewer_id: "ana".into() },
        )
        .await;
        let groups = board.stage_groups("p1");
        assert_eq!(groups["new"].len(), 1);
        assert_eq!(groups["new"][0].id, "l1");
        assert!(board.start_drag("l2").is_none());
        assert!(board.start_drag("l1").is_some());
    }

    #[tokio::test]
    async fn filter_and_sort_apply_to_groups() {
        let board = mount(store(), EventBus::new(16), ViewerScope::Administrator).await;
        board.set_filter(BoardFilter {
            search: Some("BRU".into()),
            ..Default::default()
        });
        let groups = board.stage_groups("p1");
        assert_eq!(groups["new"].len(), 1);
        assert_eq!(groups["new"][0].id, "l2");

        board.set_filter(BoardFilter::default());
        board.set_sort(BoardSort {
            field: SortField::Value,
            direction: SortDirection::Asc,
        });
        let ids: Vec<String> = board.stage_groups("p1")["new"].iter().map(|l| l.id.clone()).collect();
        assert_eq!(ids, ["l1", "l2"]);

        // Default sort is newest first.
        board.set_sort(BoardSort::default());
        let ids: Vec<String> = board.stage_groups("p1")["new"].iter().map(|l| l.id.clone()).collect();
        assert_eq!(ids, ["l1", "l2"]);
        board.set_sort(BoardSort {
            field: SortField::CreatedAt,
            direction: SortDirection::Asc,
        });
        let ids: Vec<String> = board.stage_groups("p1")["new"].iter().map(|l| l.id.clone()).collect();
        assert_eq!(ids, ["l2", "l1"]);
    }

    #[tokio::test]
    async fn columns_render_cards_with_derivations() {
        let store = store();
        store.set_rules(
            "p1",
            vec![QualificationRule {
                id: "r1".into(),
                tier: QualificationTier::Mql,
                name: "Big deal".into(),
                description: None,
                is_active: true,
                conditions: vec![QualificationCondition::new("value", ConditionOperator::GreaterThan, "200")],
            }],
        );
        let board = mount(store, EventBus::new(16), ViewerScope::Administrator).await;
        let columns = board.columns(Utc::now());

        let ids: Vec<&str> = columns.iter().map(|c| c.stage.id.as_str()).collect();
        assert_eq!(ids, ["new", "contacted", "won", "lost"]);

        let bruno = columns[0].cards.iter().find(|c| c.lead.id == "l2").unwrap();
        assert!(bruno.qualification.is_mql);
        assert_eq!(bruno.matched_rules[0].rule_name, "Big deal");
        assert_eq!(bruno.temperature, Temperature::Warm);
        assert!(bruno.overdue);
        assert_eq!(bruno.view.name, "Bruno");
        assert_eq!(columns[0].total_value, 350.0);
    }

    #[tokio::test]
    async fn summary_uses_real_counts() {
        let board = mount(store(), EventBus::new(16), ViewerScope::Administrator).await;
        let summary = board.summary(Utc::now());
        assert_eq!(summary.total_leads, 4);
        assert_eq!(summary.won, 1);
        assert_eq!(summary.lost, 1);
        assert_eq!(summary.total_value, 1400.0);
        assert_eq!(summary.stages.len(), 4);
        assert_eq!(summary.hot + summary.warm + summary.cold, 4);
    }

    #[tokio::test]
    async fn lead_master_fields_win_after_refresh() {
        let store = store();
        let mut linked = lead("l5", "contacted", 1, "fallback", 10.0, "ana");
        linked.lead_master_id = Some("m1".into());
        store.insert_lead(linked);
        store.insert_lead_master(LeadMaster {
            id: "m1".into(),
            name: Some("Canonical".into()),
            estimated_value: Some(500.0),
            ..Default::default()
        });
        let board = mount(store, EventBus::new(16), ViewerScope::Administrator).await;
        let columns = board.columns(Utc::now());
        let card = &columns[1].cards[0];
        assert_eq!(card.view.name, "Canonical");
        assert_eq!(board.stage_total_value("contacted"), 500.0);
    }

    #[tokio::test(start_paused = true)]
    async fn relevant_events_refresh_after_debounce() {
        let store = store();
        let bus = EventBus::new(16);
        let admin = mount(store.clone(), bus.clone(), ViewerScope::Administrator).await;
        let other = mount(store.clone(), bus.clone(), ViewerScope::Administrator).await;

        admin.move_lead("l1", "contacted").await.unwrap();
        admin.move_lead("l2", "contacted").await.unwrap();
        assert_eq!(other.refresh_count(), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(other.refresh_count(), 2);
        assert_eq!(other.stage_groups("p1")["contacted"].len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unmounted_board_ignores_events() {
        let store = store();
        let bus = EventBus::new(16);
        let admin = mount(store.clone(), bus.clone(), ViewerScope::Administrator).await;
        let other = mount(store.clone(), bus.clone(), ViewerScope::Administrator).await;
        other.unmount();
        assert!(!other.is_mounted());

        admin.move_lead("l1", "contacted").await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(other.refresh_count(), 1);
    }

    #[tokio::test]
    async fn data_updates_are_relevant_only_for_known_leads() {
        let store = store();
        let board = mount(store, EventBus::new(16), ViewerScope::Administrator).await;
        let event = |lead_id: &str| {
            BoardEvent::LeadDataUpdated(crate::events::LeadDataUpdated {
                lead_id: lead_id.into(),
                updated_fields: serde_json::Map::new(),
                timestamp: Utc::now(),
            })
        };
        assert!(board.is_relevant(&event("l1")));
        assert!(!board.is_relevant(&event("stranger")));
    }
}
