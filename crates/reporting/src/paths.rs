//! Ordered channel sequences traversed by converting users, grouped into
//! top-path rows.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PATH_SEPARATOR: &str = " > ";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionPath {
    pub channels: Vec<String>,
    pub path_string: String,
    pub conversions: u64,
    pub revenue: f64,
    pub avg_touchpoints: f64,
    pub avg_time_to_conversion_hours: f64,
}

/// A single converting session reduced to what path grouping needs.
#[derive(Debug, Clone)]
pub struct SessionPath {
    pub channels: Vec<String>,
    pub revenue: f64,
    pub time_to_conversion_hours: f64,
}

#[derive(Default)]
struct PathTotals {
    conversions: u64,
    revenue: f64,
    touchpoints: u64,
    hours: f64,
}

/// Group sessions whose channel sequences match exactly, then keep the
/// `limit` highest-revenue paths.
pub fn top_paths(sessions: impl IntoIterator<Item = SessionPath>, limit: usize) -> Vec<ConversionPath> {
    let mut groups: HashMap<Vec<String>, PathTotals> = HashMap::new();
    for session in sessions {
        let touchpoints = session.channels.len() as u64;
        let totals = groups.entry(session.channels).or_default();
        totals.conversions += 1;
        totals.revenue += session.revenue;
        totals.touchpoints += touchpoints;
        totals.hours += session.time_to_conversion_hours;
    }

    let mut paths: Vec<ConversionPath> = groups
        .into_iter()
        .map(|(channels, totals)| {
            let conversions = totals.conversions as f64;
            ConversionPath {
                path_string: channels.join(PATH_SEPARATOR),
                channels,
                conversions: totals.conversions,
                revenue: totals.revenue,
                avg_touchpoints: totals.touchpoints as f64 / conversions,
                avg_time_to_conversion_hours: totals.hours / conversions,
            }
        })
        .collect();

    paths.sort_by(|a, b| {
        b.revenue
            .total_cmp(&a.revenue)
            .then_with(|| b.conversions.cmp(&a.conversions))
            .then_with(|| a.path_string.cmp(&b.path_string))
    });
    paths.truncate(limit);
    paths
}
