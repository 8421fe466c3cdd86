//! Lead master resolution: merge the canonical contact record into a lead's
//! display fields, falling back to the lead's own `custom_data`.
//!
//! Lookups are memoized per `lead_master_id` for the duration of a render
//! pass ([`LeadMasterResolver::begin_pass`] starts a new one), and concurrent
//! resolutions of the same id share a single fetch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::OnceCell;

use funnel_types::{FunnelError, Lead, LeadMaster};

use crate::persistence::Persistence;

// `custom_data` fallback keys, highest priority first.
const NAME_KEYS: &[&str] = &[
    "nome_lead",
    "nome_contato",
    "contato",
    "nome",
    "lead_name",
    "name",
    "contact_name",
];
const EMAIL_KEYS: &[&str] = &["email", "email_contato", "email_lead"];
const PHONE_KEYS: &[&str] = &["telefone", "telefone_contato", "celular", "phone", "telephone"];
const COMPANY_KEYS: &[&str] = &["empresa", "empresa_contato", "nome_empresa", "company"];
const JOB_TITLE_KEYS: &[&str] = &["cargo", "job_title"];
const SOURCE_KEYS: &[&str] = &["origem", "source"];
const CITY_KEYS: &[&str] = &["cidade", "city"];
const VALUE_KEYS: &[&str] = &[
    "valor",
    "valor_oportunidade",
    "valor_proposta",
    "value",
    "estimated_value",
    "deal_value",
];

/// Where a merged view's fields came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterStatus {
    /// The lead does not reference a lead master.
    Unlinked,
    /// The lookup has not settled yet; fields are provisional.
    Loading,
    Resolved,
    NotFound,
    /// The lookup failed; fields come from `custom_data` only.
    Failed,
}

/// Display fields of a lead after merging its lead master.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedLeadView {
    pub lead_id: String,
    pub status: MasterStatus,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub source: Option<String>,
    pub city: Option<String>,
    pub value: Option<f64>,
}

fn pick(master: Option<&Option<String>>, lead: &Lead, keys: &[&str]) -> Option<String> {
    master
        .and_then(|v| v.as_deref())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .or_else(|| lead.custom_text(keys))
}

/// Build the merged view. Lead master fields win; `custom_data` fills the gaps.
pub fn merge(lead: &Lead, master: Option<&LeadMaster>, status: MasterStatus) -> MergedLeadView {
    MergedLeadView {
        lead_id: lead.id.clone(),
        status,
        name: pick(master.map(|m| &m.name), lead, NAME_KEYS).unwrap_or_default(),
        email: pick(master.map(|m| &m.email), lead, EMAIL_KEYS).unwrap_or_default(),
        phone: pick(master.map(|m| &m.phone), lead, PHONE_KEYS),
        company: pick(master.map(|m| &m.company), lead, COMPANY_KEYS),
        job_title: pick(master.map(|m| &m.job_title), lead, JOB_TITLE_KEYS),
        source: pick(master.map(|m| &m.source), lead, SOURCE_KEYS),
        city: pick(master.map(|m| &m.city), lead, CITY_KEYS),
        value: master
            .and_then(|m| m.estimated_value)
            .filter(|v| v.is_finite())
            .or_else(|| lead.custom_number(VALUE_KEYS)),
    }
}

#[derive(Debug, Clone)]
enum MasterLookup {
    Found(LeadMaster),
    Missing,
    Failed,
}

pub struct LeadMasterResolver {
    persistence: Arc<dyn Persistence>,
    pass: Mutex<HashMap<String, Arc<OnceCell<MasterLookup>>>>,
}

impl LeadMasterResolver {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            pass: Mutex::new(HashMap::new()),
        }
    }

    fn pass(&self) -> MutexGuard<'_, HashMap<String, Arc<OnceCell<MasterLookup>>>> {
        self.pass.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget memoized lookups so the next render pass fetches fresh records.
    pub fn begin_pass(&self) {
        self.pass().clear();
    }

    /// Resolve `lead` into its merged view. Never fails: lookup errors degrade
    /// to the lead's own `custom_data`.
    pub async fn resolve(&self, lead: &Lead) -> MergedLeadView {
        let Some(master_id) = linked_master(lead) else {
            return merge(lead, None, MasterStatus::Unlinked);
        };
        let cell = self.pass().entry(master_id.to_string()).or_default().clone();
        let lookup = cell.get_or_init(|| self.fetch(master_id)).await;
        view_for(lead, lookup)
    }

    /// Non-blocking read of the current pass: the `Loading` sentinel until the
    /// lookup for this lead's master has settled.
    pub fn peek(&self, lead: &Lead) -> MergedLeadView {
        let Some(master_id) = linked_master(lead) else {
            return merge(lead, None, MasterStatus::Unlinked);
        };
        let settled = self
            .pass()
            .get(master_id)
            .and_then(|cell| cell.get().cloned());
        match settled {
            Some(lookup) => view_for(lead, &lookup),
            None => merge(lead, None, MasterStatus::Loading),
        }
    }

    async fn fetch(&self, master_id: &str) -> MasterLookup {
        match self.persistence.load_lead_master(master_id).await {
            Ok(Some(master)) => MasterLookup::Found(master),
            Ok(None) => {
                tracing::debug!(lead_master_id = %master_id, "Lead master not found");
                MasterLookup::Missing
            }
            Err(e) => {
                let err = FunnelError::Resolution {
                    lead_master_id: master_id.to_string(),
                    message: e.to_string(),
                };
                tracing::warn!(error = %err, "Falling back to lead custom data");
                MasterLookup::Failed
            }
        }
    }
}

fn linked_master(lead: &Lead) -> Option<&str> {
    lead.lead_master_id.as_deref().filter(|id| !id.is_empty())
}

fn view_for(lead: &Lead, lookup: &MasterLookup) -> MergedLeadView {
    match lookup {
        MasterLookup::Found(master) => merge(lead, Some(master), MasterStatus::Resolved),
        MasterLookup::Missing => merge(lead, None, MasterStatus::NotFound),
        MasterLookup::Failed => merge(lead, None, MasterStatus::Failed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPersistence;
    use chrono::Utc;
    use funnel_types::{CustomData, FieldValue};

    fn lead(id: &str, master: Option<&str>) -> Lead {
        let t = Utc::now();
        let mut custom_data = CustomData::new();
        custom_data.insert("name".into(), FieldValue::from("Local Name"));
        custom_data.insert("email".into(), FieldValue::from("local@example.com"));
        custom_data.insert("phone".into(), FieldValue::from("555-0100"));
        custom_data.insert("value".into(), FieldValue::from(1200.0));
        Lead {
            id: id.into(),
            pipeline_id: "p1".into(),
            stage_id: "new".into(),
            custom_data,
            lead_master_id: master.map(String::from),
            assigned_to: None,
            lifecycle_stage: Default::default(),
            created_at: t,
            updated_at: t,
            moved_at: t,
        }
    }

    fn master() -> LeadMaster {
        LeadMaster {
            id: "m1".into(),
            tenant_id: "t1".into(),
            name: Some("Canonical Name".into()),
            email: Some("canon@example.com".into()),
            company: Some("Acme".into()),
            estimated_value: Some(5000.0),
            ..Default::default()
        }
    }

    fn resolver(store: &Arc<MemoryPersistence>) -> LeadMasterResolver {
        LeadMasterResolver::new(store.clone())
    }

    #[tokio::test]
    async fn master_fields_win_and_custom_data_fills_gaps() {
        let store = Arc::new(MemoryPersistence::new());
        store.insert_lead_master(master());

        let view = resolver(&store).resolve(&lead("l1", Some("m1"))).await;
        assert_eq!(view.status, MasterStatus::Resolved);
        assert_eq!(view.name, "Canonical Name");
        assert_eq!(view.email, "canon@example.com");
        assert_eq!(view.company.as_deref(), Some("Acme"));
        // The master carries no phone.
        assert_eq!(view.phone.as_deref(), Some("555-0100"));
        assert_eq!(view.value, Some(5000.0));
    }

    #[tokio::test]
    async fn failed_lookup_degrades_to_custom_data() {
        let store = Arc::new(MemoryPersistence::new());
        store.insert_lead_master(master());
        store.fail_lead_master("m1");

        let view = resolver(&store).resolve(&lead("l1", Some("m1"))).await;
        assert_eq!(view.status, MasterStatus::Failed);
        assert_eq!(view.name, "Local Name");
        assert_eq!(view.email, "local@example.com");
        assert_eq!(view.value, Some(1200.0));
    }

    #[tokio::test]
    async fn portuguese_custom_data_keys_fill_the_view() {
        let store = Arc::new(MemoryPersistence::new());
        let mut l = lead("l1", None);
        l.custom_data = [
            ("nome_lead", FieldValue::from("Maria Silva")),
            ("nome", FieldValue::from("Maria")),
            ("email_lead", FieldValue::from("maria@example.com")),
            ("telefone", FieldValue::from("11 9999")),
            ("empresa", FieldValue::from("ACME")),
            ("cargo", FieldValue::from("Diretora")),
            ("valor", FieldValue::from(1500.0)),
            ("value", FieldValue::from(99.0)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let view = resolver(&store).resolve(&l).await;
        assert_eq!(view.status, MasterStatus::Unlinked);
        assert_eq!(view.name, "Maria Silva");
        assert_eq!(view.email, "maria@example.com");
        assert_eq!(view.phone.as_deref(), Some("11 9999"));
        assert_eq!(view.company.as_deref(), Some("ACME"));
        assert_eq!(view.job_title.as_deref(), Some("Diretora"));
        assert_eq!(view.value, Some(1500.0));
    }

    #[tokio::test]
    async fn missing_master_is_not_found() {
        let store = Arc::new(MemoryPersistence::new());
        let view = resolver(&store).resolve(&lead("l1", Some("ghost"))).await;
        assert_eq!(view.status, MasterStatus::NotFound);
        assert_eq!(view.name, "Local Name");
    }

    #[tokio::test]
    async fn unlinked_lead_skips_the_backend() {
        let store = Arc::new(MemoryPersistence::new());
        let view = resolver(&store).resolve(&lead("l1", None)).await;
        assert_eq!(view.status, MasterStatus::Unlinked);
        assert_eq!(store.lead_master_calls(), 0);
    }

    #[tokio::test]
    async fn lookups_are_memoized_within_a_pass() {
        let store = Arc::new(MemoryPersistence::new());
        store.insert_lead_master(master());
        let r = resolver(&store);

        r.resolve(&lead("l1", Some("m1"))).await;
        r.resolve(&lead("l2", Some("m1"))).await;
        assert_eq!(store.lead_master_calls(), 1);

        r.begin_pass();
        r.resolve(&lead("l1", Some("m1"))).await;
        assert_eq!(store.lead_master_calls(), 2);
    }

    #[tokio::test]
    async fn peek_is_loading_until_settled() {
        let store = Arc::new(MemoryPersistence::new());
        store.insert_lead_master(master());
        let r = resolver(&store);
        let l = lead("l1", Some("m1"));

        let pending = r.peek(&l);
        assert_eq!(pending.status, MasterStatus::Loading);
        assert_eq!(pending.name, "Local Name");

        r.resolve(&l).await;
        assert_eq!(r.peek(&l).status, MasterStatus::Resolved);
    }

    #[test]
    fn merge_without_any_data_yields_empty_strings() {
        let mut l = lead("l1", None);
        l.custom_data.clear();
        let view = merge(&l, None, MasterStatus::Unlinked);
        assert_eq!(view.name, "");
        assert_eq!(view.email, "");
        assert_eq!(view.value, None);
    }
}
