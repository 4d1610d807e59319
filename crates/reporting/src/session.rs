//! A conversion session is one conversion event plus the journey that led to it.

use crate::repository::AttributionRepository;
use attribution_core::config::AggregationConfig;
use attribution_core::{
    AttributionCalculationRequest, AttributionEvent, AttributionModel, EngineError, EngineResult,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ConversionSession {
    pub conversion: AttributionEvent,
    /// Journey events, the conversion itself included.
    pub touchpoints: Vec<AttributionEvent>,
}

impl ConversionSession {
    pub fn request(&self, project_id: Uuid, model: AttributionModel) -> AttributionCalculationRequest {
        AttributionCalculationRequest {
            project_id,
            user_identifier: self.conversion.user_identifier.clone(),
            conversion_event_id: self.conversion.id,
            model,
            touchpoints: self.touchpoints.clone(),
        }
    }
}

/// Sessions fetched once for a project and date range. Every rollup and every
/// model run over the same batch sees exactly the same touchpoints.
#[derive(Debug, Clone)]
pub struct SessionBatch {
    pub project_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub sessions: Vec<ConversionSession>,
    /// Conversions dropped while fetching (user history unavailable).
    pub skipped: usize,
}

/// Counts reported alongside every rollup so skipped records stay visible.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollupDiagnostics {
    pub sessions_considered: usize,
    pub sessions_attributed: usize,
    pub sessions_skipped: usize,
    pub unresolved_channels: usize,
}

pub fn validate_range(start: DateTime<Utc>, end: DateTime<Utc>) -> EngineResult<()> {
    if start > end {
        return Err(EngineError::InvalidArgument(format!(
            "date range start {start} is after end {end}"
        )));
    }
    Ok(())
}

/// Fetch the project's conversions in `[start, end]` and assemble each one's
/// journey. A user whose history cannot be fetched is skipped, not fatal.
pub fn load_sessions(
    repository: &dyn AttributionRepository,
    config: &AggregationConfig,
    project_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> EngineResult<SessionBatch> {
    validate_range(start, end)?;

    let mut conversions = repository.conversion_events(&project_id, start, end)?;
    conversions.sort_by(|a, b| {
        a.event_timestamp
            .cmp(&b.event_timestamp)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut histories: HashMap<String, Option<Vec<AttributionEvent>>> = HashMap::new();
    let mut sessions = Vec::with_capacity(conversions.len());
    let mut skipped = 0;

    for conversion in conversions {
        let history = histories
            .entry(conversion.user_identifier.clone())
            .or_insert_with(|| {
                match repository.user_events(&project_id, &conversion.user_identifier) {
                    Ok(events) => Some(events),
                    Err(e) => {
                        warn!(
                            user = %conversion.user_identifier,
                            error = %e,
                            "User history unavailable, skipping their conversions"
                        );
                        None
                    }
                }
            });

        let Some(history) = history else {
            skipped += 1;
            continue;
        };

        let touchpoints = journey(history, &conversion, config);
        sessions.push(ConversionSession {
            conversion,
            touchpoints,
        });
    }

    if skipped > 0 {
        metrics::counter!("attribution.sessions_skipped").increment(skipped as u64);
    }
    debug!(
        project_id = %project_id,
        sessions = sessions.len(),
        skipped,
        "Conversion sessions loaded"
    );

    Ok(SessionBatch {
        project_id,
        start,
        end,
        sessions,
        skipped,
    })
}

fn journey(
    history: &[AttributionEvent],
    conversion: &AttributionEvent,
    config: &AggregationConfig,
) -> Vec<AttributionEvent> {
    // A window reaching past the calendar's start is the same as no window.
    let earliest = config.lookback_window_days.and_then(|days| {
        Duration::try_days(days as i64)
            .and_then(|window| conversion.event_timestamp.checked_sub_signed(window))
    });

    let mut touchpoints: Vec<AttributionEvent> = history
        .iter()
        .filter(|e| {
            if e.id == conversion.id {
                return true;
            }
            if !config.include_post_conversion_events
                && e.event_timestamp > conversion.event_timestamp
            {
                return false;
            }
            earliest.map_or(true, |earliest| e.event_timestamp >= earliest)
        })
        .cloned()
        .collect();

    if !touchpoints.iter().any(|e| e.id == conversion.id) {
        touchpoints.push(conversion.clone());
    }
    touchpoints
}
