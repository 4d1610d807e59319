//! Attribution calculator — splits a conversion's value across the touchpoints
//! in the converting user's journey.
//!
//! The calculator is a pure function over the request: it never mutates the
//! caller's touchpoints, never reads the clock, and never performs I/O, so it
//! is safe to run concurrently over shared inputs.

use attribution_core::{
    AttributionCalculationRequest, AttributionEvent, AttributionModel, AttributionResult,
    AttributionTouchpoint, EngineError, EngineResult,
};
use chrono::{DateTime, Utc};
use tracing::{debug, error};

/// Half-life of the `time_decay` model.
pub const TIME_DECAY_HALF_LIFE_HOURS: f64 = 168.0;

/// Allowed drift of Σweight away from 1.0.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

const MS_PER_HOUR: f64 = 3_600_000.0;

// u_shaped split for journeys longer than two touchpoints.
const U_SHAPED_ENDPOINT_SHARE: f64 = 0.4;
const U_SHAPED_MIDDLE_SHARE: f64 = 0.2;

/// Compute per-touchpoint weights and attributed values for one conversion.
pub fn calculate_attribution(
    request: &AttributionCalculationRequest,
) -> EngineResult<AttributionResult> {
    if request.touchpoints.is_empty() {
        return Ok(AttributionResult::empty());
    }

    let conversion = request
        .touchpoints
        .iter()
        .find(|e| e.id == request.conversion_event_id)
        .ok_or(EngineError::ConversionNotFound {
            conversion_event_id: request.conversion_event_id,
        })?;

    let conversion_value = conversion.event_value;
    if !conversion_value.is_finite() {
        return Err(EngineError::InvalidArgument(format!(
            "conversion event {} has a non-finite value",
            conversion.id
        )));
    }

    let ordered = chronological(&request.touchpoints);
    let hours: Vec<f64> = ordered
        .iter()
        .map(|e| time_to_conversion_hours(e.event_timestamp, conversion.event_timestamp))
        .collect();
    let weights = model_weights(request.model, &hours);
    check_weight_sum(&weights)?;

    let touchpoints: Vec<AttributionTouchpoint> = ordered
        .iter()
        .zip(weights.iter().zip(hours.iter()))
        .enumerate()
        .map(|(idx, (event, (&weight, &hours)))| AttributionTouchpoint {
            touchpoint_event_id: event.id,
            position: idx + 1,
            weight,
            attributed_value: weight * conversion_value,
            time_to_conversion_hours: hours,
            channel_id: event.channel_id,
            event_timestamp: event.event_timestamp,
        })
        .collect();

    debug!(
        conversion_event_id = %request.conversion_event_id,
        model = %request.model,
        touchpoints = touchpoints.len(),
        conversion_value,
        "Attribution calculated"
    );

    Ok(AttributionResult {
        touchpoints,
        total_attributed_value: conversion_value,
    })
}

/// Sort by timestamp, ties broken by event id. Returns borrowed views so the
/// caller's collection is left untouched.
fn chronological(events: &[AttributionEvent]) -> Vec<&AttributionEvent> {
    let mut ordered: Vec<&AttributionEvent> = events.iter().collect();
    ordered.sort_by(|a, b| {
        a.event_timestamp
            .cmp(&b.event_timestamp)
            .then_with(|| a.id.cmp(&b.id))
    });
    ordered
}

/// Naive millisecond difference, clamped at zero for events after the conversion.
pub fn time_to_conversion_hours(event: DateTime<Utc>, conversion: DateTime<Utc>) -> f64 {
    let ms = (conversion - event).num_milliseconds() as f64;
    (ms / MS_PER_HOUR).max(0.0)
}

/// Un-normalized `time_decay` weight for a touchpoint `hours` before conversion.
pub fn time_decay_raw_weight(hours: f64) -> f64 {
    let lambda = std::f64::consts::LN_2 / TIME_DECAY_HALF_LIFE_HOURS;
    (-lambda * hours).exp()
}

/// Weights for a chronologically ordered journey, given each touchpoint's
/// hours-to-conversion.
pub fn model_weights(model: AttributionModel, hours: &[f64]) -> Vec<f64> {
    let n = hours.len();
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => match model {
            AttributionModel::FirstTouch => {
                let mut weights = vec![0.0; n];
                weights[0] = 1.0;
                weights
            }
            AttributionModel::LastTouch => {
                let mut weights = vec![0.0; n];
                weights[n - 1] = 1.0;
                weights
            }
            AttributionModel::Linear => vec![1.0 / n as f64; n],
            AttributionModel::TimeDecay => time_decay_weights(hours),
            AttributionModel::UShaped => u_shaped_weights(n),
        },
    }
}

fn time_decay_weights(hours: &[f64]) -> Vec<f64> {
    // The conversion event sits at 0 hours, so the sum is always >= 1.0.
    let raw: Vec<f64> = hours.iter().map(|&h| time_decay_raw_weight(h)).collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|r| r / total).collect()
}

fn u_shaped_weights(n: usize) -> Vec<f64> {
    if n == 2 {
        return vec![0.5, 0.5];
    }
    let middle = U_SHAPED_MIDDLE_SHARE / (n - 2) as f64;
    let mut weights = vec![middle; n];
    weights[0] = U_SHAPED_ENDPOINT_SHARE;
    weights[n - 1] = U_SHAPED_ENDPOINT_SHARE;
    weights
}

fn check_weight_sum(weights: &[f64]) -> EngineResult<()> {
    let sum: f64 = weights.iter().sum();
    if weights.iter().all(|w| w.is_finite() && *w >= 0.0) && (sum - 1.0).abs() <= WEIGHT_TOLERANCE
    {
        Ok(())
    } else {
        error!(sum, weights = ?weights, "Attribution weights do not sum to 1.0");
        Err(EngineError::Invariant(format!(
            "attribution weights sum to {sum}, expected 1.0"
        )))
    }
}
