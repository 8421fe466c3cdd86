//! Dwell-time temperature classification and stage SLA checks.
//!
//! Everything here is a pure function of its inputs. Callers pass `now`
//! explicitly and recompute on every render; nothing is cached on the lead.

use chrono::{DateTime, Utc};

use funnel_types::{Lead, Stage, Temperature, TemperatureConfig};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Whole days between `since` and `now`, rounded up.
///
/// A lead created two hours ago is on day 1. Timestamps in the future count
/// as day 0.
pub fn elapsed_days(since: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let millis = (now - since).num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    let days = (millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY;
    u32::try_from(days).unwrap_or(u32::MAX)
}

/// Map a day count onto the configured thresholds.
pub fn classify_days(days: u32, config: &TemperatureConfig) -> Temperature {
    if days <= config.hot_threshold {
        Temperature::Hot
    } else if days <= config.warm_threshold {
        Temperature::Warm
    } else {
        Temperature::Cold
    }
}

/// Temperature of `lead` at `now`, based on its age.
pub fn classify(lead: &Lead, config: &TemperatureConfig, now: DateTime<Utc>) -> Temperature {
    classify_days(elapsed_days(lead.created_at, now), config)
}

/// Days the lead has spent in its current stage.
pub fn stage_dwell_days(lead: &Lead, now: DateTime<Utc>) -> u32 {
    elapsed_days(lead.moved_at, now)
}

/// Whether the lead has outstayed the stage's soft SLA.
pub fn exceeds_stage_sla(lead: &Lead, stage: &Stage, now: DateTime<Utc>) -> bool {
    stage
        .max_days_allowed
        .is_some_and(|max| stage_dwell_days(lead, now) > max)
}
