//! The external persistence collaborator the engine reads from and writes through.
//!
//! Authorization is enforced behind this trait; the engine never re-checks
//! tenant or viewer permissions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use funnel_types::{
    CustomData, Lead, LeadMaster, Pipeline, QualificationRule, Result, TemperatureConfig,
};

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load_leads(&self, pipeline_id: &str) -> Result<Vec<Lead>>;

    /// Persist a stage change. Only the stage coordinator calls this.
    async fn update_lead_stage(
        &self,
        lead_id: &str,
        stage_id: &str,
        moved_at: DateTime<Utc>,
    ) -> Result<()>;

    /// `Ok(None)` means the lead master does not exist.
    async fn load_lead_master(&self, id: &str) -> Result<Option<LeadMaster>>;

    /// Load a pipeline including its stages and custom field definitions.
    async fn load_pipeline(&self, id: &str) -> Result<Pipeline>;

    async fn load_qualification_rules(&self, pipeline_id: &str) -> Result<Vec<QualificationRule>>;

    async fn load_temperature_config(&self, pipeline_id: &str) -> Result<TemperatureConfig>;

    async fn create_lead(&self, lead: &Lead) -> Result<()>;

    /// Merge `fields` into the lead's custom data. Never touches `stage_id` or `moved_at`.
    async fn update_lead_data(
        &self,
        lead_id: &str,
        fields: &CustomData,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;
}
