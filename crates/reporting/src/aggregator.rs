//! Channel performance aggregation — rolls per-touchpoint credit from many
//! calculator runs into channel, time-window, path, ROI and model-comparison
//! reports.

use crate::attribution::calculate_attribution;
use crate::paths::{top_paths, ConversionPath, SessionPath};
use crate::repository::AttributionRepository;
use crate::roi::ChannelRoi;
use crate::session::{load_sessions, ConversionSession, RollupDiagnostics, SessionBatch};
use attribution_core::config::AggregationConfig;
use attribution_core::{AttributionModel, AttributionResult, EngineResult};
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Label of the synthetic channel that collects unresolved touchpoints.
pub const UNKNOWN_CHANNEL_NAME: &str = "(unknown)";
pub const UNKNOWN_CHANNEL_CATEGORY: &str = "unknown";

// ─── Types ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPerformance {
    pub channel_id: Option<Uuid>,
    pub channel_name: String,
    pub category: String,
    /// Σweight across the channel's touchpoints (fractional credit).
    pub attributed_conversions: f64,
    pub total_revenue: f64,
    /// Attributed conversions per distinct session that touched the channel.
    pub conversion_rate: f64,
    pub avg_time_to_conversion_hours: f64,
    pub total_touchpoints: u64,
    pub sessions: u64,
    pub avg_touchpoints: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceTotals {
    pub conversions: u64,
    pub revenue: f64,
    pub touchpoints: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPerformanceReport {
    pub model: AttributionModel,
    pub date_range_start: DateTime<Utc>,
    pub date_range_end: DateTime<Utc>,
    pub channels: Vec<ChannelPerformance>,
    pub totals: PerformanceTotals,
    pub diagnostics: RollupDiagnostics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGranularity {
    Day,
    /// ISO weeks, starting Monday 00:00 UTC.
    Week,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelWindowRollup {
    pub window_start: DateTime<Utc>,
    pub channel_id: Option<Uuid>,
    pub channel_name: String,
    pub attributed_conversions: f64,
    pub revenue: f64,
    pub touchpoints: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelTimeSeries {
    pub model: AttributionModel,
    pub granularity: TimeGranularity,
    pub windows: Vec<ChannelWindowRollup>,
    pub diagnostics: RollupDiagnostics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionPathReport {
    pub model: AttributionModel,
    pub paths: Vec<ConversionPath>,
    pub diagnostics: RollupDiagnostics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelComparison {
    pub conversions: f64,
    pub revenue: f64,
    pub diagnostics: RollupDiagnostics,
}

/// One session's calculator output, paired with the session it came from.
pub struct AttributedSession<'a> {
    pub session: &'a ConversionSession,
    pub result: AttributionResult,
}

// ─── Channel labels ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ChannelLabel {
    name: String,
    category: String,
}

impl ChannelLabel {
    fn unknown() -> Self {
        Self {
            name: UNKNOWN_CHANNEL_NAME.to_string(),
            category: UNKNOWN_CHANNEL_CATEGORY.to_string(),
        }
    }
}

/// Per-call cache over the channel registry. Misses fall back to the
/// `(unknown)` label and are counted.
struct ChannelLabeler<'a> {
    repository: &'a dyn AttributionRepository,
    cache: HashMap<Uuid, ChannelLabel>,
    unresolved: usize,
}

impl<'a> ChannelLabeler<'a> {
    fn new(repository: &'a dyn AttributionRepository) -> Self {
        Self {
            repository,
            cache: HashMap::new(),
            unresolved: 0,
        }
    }

    fn label(&mut self, channel_id: Option<Uuid>) -> ChannelLabel {
        let Some(id) = channel_id else {
            return ChannelLabel::unknown();
        };
        if let Some(label) = self.cache.get(&id) {
            return label.clone();
        }
        let label = match self.repository.channel(&id) {
            Some(channel) => ChannelLabel {
                name: channel.name,
                category: channel.category,
            },
            None => {
                warn!(channel_id = %id, "Channel not in registry, labelling as unknown");
                metrics::counter!("attribution.channels_unresolved").increment(1);
                self.unresolved += 1;
                ChannelLabel::unknown()
            }
        };
        self.cache.insert(id, label.clone());
        label
    }
}

#[derive(Default)]
struct ChannelTotals {
    attributed_conversions: f64,
    revenue: f64,
    touchpoints: u64,
    hours: f64,
    sessions: u64,
}

// ─── Aggregator ─────────────────────────────────────────────────────────────

/// Read-only aggregation over a repository. Holds no mutable state, so one
/// instance can serve concurrent queries.
pub struct ChannelPerformanceAggregator {
    repository: Arc<dyn AttributionRepository>,
    config: AggregationConfig,
}

impl ChannelPerformanceAggregator {
    pub fn new(repository: Arc<dyn AttributionRepository>, config: AggregationConfig) -> Self {
        Self { repository, config }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    pub fn load_sessions(
        &self,
        project_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<SessionBatch> {
        load_sessions(self.repository.as_ref(), &self.config, project_id, start, end)
    }

    /// Run the calculator once per session. A session that fails is logged,
    /// counted and left out; the others still contribute.
    pub fn attribute<'a>(
        &self,
        batch: &'a SessionBatch,
        model: AttributionModel,
    ) -> (Vec<AttributedSession<'a>>, RollupDiagnostics) {
        let project_id = batch.project_id;
        let run = move |session: &'a ConversionSession| {
            (session, calculate_attribution(&session.request(project_id, model)))
        };
        let outcomes: Vec<_> = if self.config.parallel {
            batch.sessions.par_iter().map(run).collect()
        } else {
            batch.sessions.iter().map(run).collect()
        };
        metrics::counter!("attribution.calculations").increment(outcomes.len() as u64);

        let mut diagnostics = RollupDiagnostics {
            sessions_considered: batch.sessions.len() + batch.skipped,
            sessions_skipped: batch.skipped,
            ..RollupDiagnostics::default()
        };
        let mut attributed = Vec::with_capacity(outcomes.len());
        for (session, outcome) in outcomes {
            match outcome {
                Ok(result) => attributed.push(AttributedSession { session, result }),
                Err(e) => {
                    warn!(
                        conversion_event_id = %session.conversion.id,
                        model = %model,
                        error = %e,
                        "Skipping session that failed attribution"
                    );
                    diagnostics.sessions_skipped += 1;
                }
            }
        }
        let failed = diagnostics.sessions_skipped - batch.skipped;
        if failed > 0 {
            metrics::counter!("attribution.sessions_skipped").increment(failed as u64);
        }
        diagnostics.sessions_attributed = attributed.len();
        (attributed, diagnostics)
    }

    // ─── Channel performance ────────────────────────────────────────────────

    pub fn get_channel_performance(
        &self,
        project_id: Uuid,
        model: AttributionModel,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<ChannelPerformanceReport> {
        let batch = self.load_sessions(project_id, start, end)?;
        Ok(self.channel_performance(&batch, model))
    }

    /// Channel rollup over an already loaded batch.
    pub fn channel_performance(
        &self,
        batch: &SessionBatch,
        model: AttributionModel,
    ) -> ChannelPerformanceReport {
        let (attributed, mut diagnostics) = self.attribute(batch, model);

        let mut groups: BTreeMap<Option<Uuid>, ChannelTotals> = BTreeMap::new();
        let mut totals = PerformanceTotals::default();
        for entry in &attributed {
            let mut touched = BTreeSet::new();
            for tp in &entry.result.touchpoints {
                let group = groups.entry(tp.channel_id).or_default();
                group.attributed_conversions += tp.weight;
                group.revenue += tp.attributed_value;
                group.touchpoints += 1;
                group.hours += tp.time_to_conversion_hours;
                touched.insert(tp.channel_id);
            }
            for channel_id in touched {
                if let Some(group) = groups.get_mut(&channel_id) {
                    group.sessions += 1;
                }
            }
            totals.conversions += 1;
            totals.revenue += entry.result.total_attributed_value;
            totals.touchpoints += entry.result.touchpoints.len() as u64;
        }

        let mut labeler = ChannelLabeler::new(self.repository.as_ref());
        let mut channels: Vec<ChannelPerformance> = groups
            .into_iter()
            .map(|(channel_id, group)| {
                let label = labeler.label(channel_id);
                ChannelPerformance {
                    channel_id,
                    channel_name: label.name,
                    category: label.category,
                    attributed_conversions: group.attributed_conversions,
                    total_revenue: group.revenue,
                    conversion_rate: ratio(group.attributed_conversions, group.sessions as f64),
                    avg_time_to_conversion_hours: ratio(group.hours, group.touchpoints as f64),
                    total_touchpoints: group.touchpoints,
                    sessions: group.sessions,
                    avg_touchpoints: ratio(group.touchpoints as f64, group.attributed_conversions),
                }
            })
            .collect();
        channels.sort_by(|a, b| {
            b.total_revenue
                .total_cmp(&a.total_revenue)
                .then_with(|| a.channel_name.cmp(&b.channel_name))
                .then_with(|| a.channel_id.cmp(&b.channel_id))
        });
        diagnostics.unresolved_channels = labeler.unresolved;

        info!(
            project_id = %batch.project_id,
            model = %model,
            channels = channels.len(),
            conversions = totals.conversions,
            revenue = totals.revenue,
            skipped = diagnostics.sessions_skipped,
            "Channel performance aggregated"
        );

        ChannelPerformanceReport {
            model,
            date_range_start: batch.start,
            date_range_end: batch.end,
            channels,
            totals,
            diagnostics,
        }
    }

    // ─── Time windows ───────────────────────────────────────────────────────

    pub fn get_channel_timeseries(
        &self,
        project_id: Uuid,
        model: AttributionModel,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: TimeGranularity,
    ) -> EngineResult<ChannelTimeSeries> {
        let batch = self.load_sessions(project_id, start, end)?;
        let (attributed, mut diagnostics) = self.attribute(&batch, model);

        let mut windows: BTreeMap<(DateTime<Utc>, Option<Uuid>), ChannelTotals> = BTreeMap::new();
        for entry in &attributed {
            let window_start = window_start(entry.session.conversion.event_timestamp, granularity);
            for tp in &entry.result.touchpoints {
                let group = windows.entry((window_start, tp.channel_id)).or_default();
                group.attributed_conversions += tp.weight;
                group.revenue += tp.attributed_value;
                group.touchpoints += 1;
            }
        }

        let mut labeler = ChannelLabeler::new(self.repository.as_ref());
        let mut rollups: Vec<ChannelWindowRollup> = windows
            .into_iter()
            .map(|((window_start, channel_id), group)| ChannelWindowRollup {
                window_start,
                channel_id,
                channel_name: labeler.label(channel_id).name,
                attributed_conversions: group.attributed_conversions,
                revenue: group.revenue,
                touchpoints: group.touchpoints,
            })
            .collect();
        rollups.sort_by(|a, b| {
            a.window_start
                .cmp(&b.window_start)
                .then_with(|| a.channel_name.cmp(&b.channel_name))
                .then_with(|| a.channel_id.cmp(&b.channel_id))
        });
        diagnostics.unresolved_channels = labeler.unresolved;

        Ok(ChannelTimeSeries {
            model,
            granularity,
            windows: rollups,
            diagnostics,
        })
    }

    // ─── Paths ──────────────────────────────────────────────────────────────

    pub fn get_top_conversion_paths(
        &self,
        project_id: Uuid,
        model: AttributionModel,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<ConversionPathReport> {
        let batch = self.load_sessions(project_id, start, end)?;
        Ok(self.top_conversion_paths(&batch, model, limit))
    }

    pub fn top_conversion_paths(
        &self,
        batch: &SessionBatch,
        model: AttributionModel,
        limit: usize,
    ) -> ConversionPathReport {
        let (attributed, mut diagnostics) = self.attribute(batch, model);
        let mut labeler = ChannelLabeler::new(self.repository.as_ref());
        let sessions: Vec<SessionPath> = attributed
            .iter()
            .filter(|entry| !entry.result.touchpoints.is_empty())
            .map(|entry| SessionPath {
                channels: entry
                    .result
                    .touchpoints
                    .iter()
                    .map(|tp| labeler.label(tp.channel_id).name)
                    .collect(),
                revenue: entry.result.total_attributed_value,
                time_to_conversion_hours: entry.result.touchpoints[0].time_to_conversion_hours,
            })
            .collect();
        diagnostics.unresolved_channels = labeler.unresolved;

        ConversionPathReport {
            model,
            paths: top_paths(sessions, limit),
            diagnostics,
        }
    }

    // ─── ROI ────────────────────────────────────────────────────────────────

    pub fn calculate_roi_metrics(
        &self,
        project_id: Uuid,
        model: AttributionModel,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        channel_spend: Option<&HashMap<Uuid, f64>>,
    ) -> EngineResult<Vec<ChannelRoi>> {
        let report = self.get_channel_performance(project_id, model, start, end)?;
        let spend_for = |id: Option<Uuid>| id.and_then(|id| channel_spend?.get(&id).copied());

        let mut rows: Vec<ChannelRoi> = report
            .channels
            .iter()
            .map(|c| {
                ChannelRoi::new(
                    c.channel_id,
                    c.channel_name.clone(),
                    c.total_revenue,
                    c.attributed_conversions,
                    spend_for(c.channel_id),
                )
            })
            .collect();

        // Spend on a channel that drew no touchpoints is still a loss worth showing.
        if let Some(spend) = channel_spend {
            let mut labeler = ChannelLabeler::new(self.repository.as_ref());
            let mut idle: Vec<(&Uuid, &f64)> = spend
                .iter()
                .filter(|(id, _)| !report.channels.iter().any(|c| c.channel_id == Some(**id)))
                .collect();
            idle.sort_by_key(|(id, _)| **id);
            for (id, amount) in idle {
                let label = labeler.label(Some(*id));
                rows.push(ChannelRoi::new(Some(*id), label.name, 0.0, 0.0, Some(*amount)));
            }
        }

        rows.sort_by(|a, b| {
            b.revenue
                .total_cmp(&a.revenue)
                .then_with(|| a.channel_name.cmp(&b.channel_name))
                .then_with(|| a.channel_id.cmp(&b.channel_id))
        });
        Ok(rows)
    }

    // ─── Model comparison ───────────────────────────────────────────────────

    /// Credit one channel receives under each model. The session batch is
    /// fetched once and shared by every model run, so differences come only
    /// from the model. `channel_id = None` selects the `(unknown)` channel.
    pub fn compare_attribution_models(
        &self,
        project_id: Uuid,
        channel_id: Option<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<BTreeMap<AttributionModel, ModelComparison>> {
        let batch = self.load_sessions(project_id, start, end)?;
        Ok(self.compare_models(&batch, channel_id))
    }

    pub fn compare_models(
        &self,
        batch: &SessionBatch,
        channel_id: Option<Uuid>,
    ) -> BTreeMap<AttributionModel, ModelComparison> {
        let run = |model: &AttributionModel| {
            let (attributed, diagnostics) = self.attribute(batch, *model);
            let mut comparison = ModelComparison {
                diagnostics,
                ..ModelComparison::default()
            };
            for tp in attributed
                .iter()
                .flat_map(|entry| entry.result.touchpoints.iter())
                .filter(|tp| tp.channel_id == channel_id)
            {
                comparison.conversions += tp.weight;
                comparison.revenue += tp.attributed_value;
            }
            (*model, comparison)
        };

        if self.config.parallel {
            AttributionModel::ALL.par_iter().map(run).collect()
        } else {
            AttributionModel::ALL.iter().map(run).collect()
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn window_start(ts: DateTime<Utc>, granularity: TimeGranularity) -> DateTime<Utc> {
    let date = ts.date_naive();
    let date = match granularity {
        TimeGranularity::Day => date,
        TimeGranularity::Week => {
            date - Duration::days(date.weekday().num_days_from_monday() as i64)
        }
    };
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use attribution_core::{AttributionChannel, AttributionEvent, EngineError, EventType};

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        project: Uuid,
        email: Uuid,
        search: Uuid,
        social: Uuid,
    }

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, day, hour, 0, 0).unwrap()
    }

    impl Fixture {
        fn new() -> Self {
            let repo = Arc::new(InMemoryRepository::new());
            let project = Uuid::new_v4();
            let mut ids = Vec::new();
            for (name, category) in [("email", "owned"), ("search", "paid"), ("social", "paid")] {
                let id = Uuid::new_v4();
                repo.register_channel(AttributionChannel {
                    id,
                    project_id: project,
                    name: name.into(),
                    category: category.into(),
                    source: None,
                    medium: None,
                    campaign: None,
                });
                ids.push(id);
            }
            Self {
                repo,
                project,
                email: ids[0],
                search: ids[1],
                social: ids[2],
            }
        }

        fn record(
            &self,
            user: &str,
            event_type: EventType,
            at: DateTime<Utc>,
            channel_id: Option<Uuid>,
            value: f64,
        ) -> Uuid {
            let event = AttributionEvent {
                id: Uuid::new_v4(),
                project_id: self.project,
                user_identifier: user.into(),
                event_type,
                event_timestamp: at,
                channel_id,
                event_value: value,
                created_at: at,
            };
            let id = event.id;
            self.repo.record_event(event);
            id
        }

        fn aggregator(&self) -> ChannelPerformanceAggregator {
            ChannelPerformanceAggregator::new(self.repo.clone(), AggregationConfig::default())
        }
    }

    /// alice: email → search → (convert via search) 100
    /// bob:   email → search → (convert via search) 50
    /// carol: social → (convert, unresolved channel) 30
    fn populated() -> Fixture {
        let f = Fixture::new();
        f.record("alice", EventType::PageView, ts(1, 9), Some(f.email), 0.0);
        f.record("alice", EventType::Click, ts(2, 9), Some(f.search), 0.0);
        f.record("alice", EventType::Conversion, ts(3, 9), Some(f.search), 100.0);
        f.record("bob", EventType::PageView, ts(4, 9), Some(f.email), 0.0);
        f.record("bob", EventType::Click, ts(5, 9), Some(f.search), 0.0);
        f.record("bob", EventType::Conversion, ts(6, 9), Some(f.search), 50.0);
        f.record("carol", EventType::Click, ts(7, 9), Some(f.social), 0.0);
        f.record("carol", EventType::Conversion, ts(8, 9), None, 30.0);
        f
    }

    fn find<'a>(report: &'a ChannelPerformanceReport, name: &str) -> &'a ChannelPerformance {
        report
            .channels
            .iter()
            .find(|c| c.channel_name == name)
            .unwrap()
    }

    #[test]
    fn test_channel_performance_linear() {
        let f = populated();
        let report = f
            .aggregator()
            .get_channel_performance(f.project, AttributionModel::Linear, ts(1, 0), ts(30, 0))
            .unwrap();

        assert_eq!(report.totals.conversions, 3);
        assert!((report.totals.revenue - 180.0).abs() < 1e-9);
        assert_eq!(report.totals.touchpoints, 8);

        let search = find(&report, "search");
        // two thirds of alice and bob's credit each
        assert!((search.total_revenue - 100.0).abs() < 1e-9);
        assert!((search.attributed_conversions - 4.0 / 3.0).abs() < 1e-9);
        assert_eq!(search.total_touchpoints, 4);
        assert_eq!(search.sessions, 2);
        assert!((search.conversion_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((search.avg_touchpoints - 3.0).abs() < 1e-9);

        let email = find(&report, "email");
        assert!((email.total_revenue - 50.0).abs() < 1e-9);
        assert_eq!(email.category, "owned");
        // alice 48h, bob 48h before conversion
        assert!((email.avg_time_to_conversion_hours - 48.0).abs() < 1e-9);

        let unknown = find(&report, UNKNOWN_CHANNEL_NAME);
        assert_eq!(unknown.channel_id, None);
        assert!((unknown.total_revenue - 15.0).abs() < 1e-9);

        let channel_revenue: f64 = report.channels.iter().map(|c| c.total_revenue).sum();
        assert!((channel_revenue - report.totals.revenue).abs() < 1e-6);
        assert_eq!(report.channels[0].channel_name, "search");
    }

    #[test]
    fn test_unregistered_channel_keeps_id_but_unknown_label() {
        let f = Fixture::new();
        let stray = Uuid::new_v4();
        f.record("dave", EventType::Click, ts(1, 0), Some(stray), 0.0);
        f.record("dave", EventType::Conversion, ts(2, 0), Some(f.email), 20.0);

        let report = f
            .aggregator()
            .get_channel_performance(f.project, AttributionModel::FirstTouch, ts(1, 0), ts(30, 0))
            .unwrap();
        let row = report
            .channels
            .iter()
            .find(|c| c.channel_id == Some(stray))
            .unwrap();
        assert_eq!(row.channel_name, UNKNOWN_CHANNEL_NAME);
        assert!((row.total_revenue - 20.0).abs() < 1e-9);
        assert_eq!(report.diagnostics.unresolved_channels, 1);
    }

    #[test]
    fn test_empty_window_returns_zeroed_totals() {
        let f = populated();
        let report = f
            .aggregator()
            .get_channel_performance(f.project, AttributionModel::Linear, ts(20, 0), ts(25, 0))
            .unwrap();
        assert!(report.channels.is_empty());
        assert_eq!(report.totals, PerformanceTotals::default());
        assert_eq!(report.diagnostics, RollupDiagnostics::default());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let f = populated();
        let err = f
            .aggregator()
            .get_channel_performance(f.project, AttributionModel::Linear, ts(9, 0), ts(1, 0))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let f = populated();
        let parallel = f.aggregator();
        let sequential = ChannelPerformanceAggregator::new(
            f.repo.clone(),
            AggregationConfig {
                parallel: false,
                ..AggregationConfig::default()
            },
        );
        for model in AttributionModel::ALL {
            let a = parallel
                .get_channel_performance(f.project, model, ts(1, 0), ts(30, 0))
                .unwrap();
            let b = sequential
                .get_channel_performance(f.project, model, ts(1, 0), ts(30, 0))
                .unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_top_paths_group_identical_sequences() {
        let f = populated();
        let paths = f
            .aggregator()
            .get_top_conversion_paths(f.project, AttributionModel::LastTouch, ts(1, 0), ts(30, 0), 10)
            .unwrap()
            .paths;
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].path_string, "email > search > search");
        assert_eq!(paths[0].conversions, 2);
        assert!((paths[0].revenue - 150.0).abs() < 1e-9);
        assert!((paths[0].avg_touchpoints - 3.0).abs() < 1e-9);
        assert!((paths[0].avg_time_to_conversion_hours - 48.0).abs() < 1e-9);
        assert_eq!(paths[1].path_string, "social > (unknown)");

        let limited = f
            .aggregator()
            .get_top_conversion_paths(f.project, AttributionModel::LastTouch, ts(1, 0), ts(30, 0), 1)
            .unwrap()
            .paths;
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_roi_metrics() {
        let f = populated();
        let mut spend = HashMap::new();
        spend.insert(f.search, 50.0);
        spend.insert(f.email, 0.0);
        let idle = Uuid::new_v4();
        spend.insert(idle, 25.0);

        let rows = f
            .aggregator()
            .calculate_roi_metrics(f.project, AttributionModel::LastTouch, ts(1, 0), ts(30, 0), Some(&spend))
            .unwrap();

        let search = rows.iter().find(|r| r.channel_id == Some(f.search)).unwrap();
        assert!((search.revenue - 150.0).abs() < 1e-9);
        assert!((search.roi.unwrap() - 2.0).abs() < 1e-9);
        assert!((search.roas.unwrap() - 3.0).abs() < 1e-9);

        let email = rows.iter().find(|r| r.channel_id == Some(f.email)).unwrap();
        assert_eq!(email.spend, Some(0.0));
        assert_eq!(email.roi, None);

        let unknown = rows.iter().find(|r| r.channel_id.is_none()).unwrap();
        assert_eq!(unknown.spend, None);
        assert_eq!(unknown.roas, None);

        let idle_row = rows.iter().find(|r| r.channel_id == Some(idle)).unwrap();
        assert_eq!(idle_row.roi, Some(-1.0));
        assert_eq!(idle_row.channel_name, UNKNOWN_CHANNEL_NAME);
    }

    #[test]
    fn test_roi_without_spend_map() {
        let f = populated();
        let rows = f
            .aggregator()
            .calculate_roi_metrics(f.project, AttributionModel::Linear, ts(1, 0), ts(30, 0), None)
            .unwrap();
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|r| r.roi.is_none() && r.roas.is_none()));
    }

    #[test]
    fn test_compare_models_differ_between_last_touch_and_linear() {
        let f = populated();
        let comparison = f
            .aggregator()
            .compare_attribution_models(f.project, Some(f.email), ts(1, 0), ts(30, 0))
            .unwrap();
        assert_eq!(comparison.len(), 5);
        assert_eq!(comparison[&AttributionModel::LastTouch].revenue, 0.0);
        assert!((comparison[&AttributionModel::Linear].revenue - 50.0).abs() < 1e-9);
        assert!((comparison[&AttributionModel::FirstTouch].revenue - 150.0).abs() < 1e-9);
        assert!((comparison[&AttributionModel::FirstTouch].conversions - 2.0).abs() < 1e-9);
        assert!((comparison[&AttributionModel::UShaped].revenue - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_compare_models_conserve_total_revenue() {
        let f = populated();
        let aggregator = f.aggregator();
        let batch = aggregator.load_sessions(f.project, ts(1, 0), ts(30, 0)).unwrap();
        for model in AttributionModel::ALL {
            let total: f64 = [Some(f.email), Some(f.search), Some(f.social), None]
                .into_iter()
                .map(|channel| aggregator.compare_models(&batch, channel)[&model].revenue)
                .sum();
            assert!((total - 180.0).abs() < 1e-6, "{model}: {total}");
        }
    }

    #[test]
    fn test_timeseries_daily_and_weekly() {
        let f = populated();
        let aggregator = f.aggregator();
        let daily = aggregator
            .get_channel_timeseries(f.project, AttributionModel::LastTouch, ts(1, 0), ts(30, 0), TimeGranularity::Day)
            .unwrap()
            .windows;
        let credited: Vec<_> = daily.iter().filter(|r| r.revenue > 0.0).collect();
        assert_eq!(credited.len(), 3);
        assert_eq!(credited[0].window_start, ts(3, 0));
        assert_eq!(credited[0].channel_name, "search");

        // 2024-04-01 is a Monday; every conversion lands in that week or the next.
        let weekly = aggregator
            .get_channel_timeseries(f.project, AttributionModel::LastTouch, ts(1, 0), ts(30, 0), TimeGranularity::Week)
            .unwrap()
            .windows;
        assert!(weekly.iter().all(|r| r.window_start == ts(1, 0) || r.window_start == ts(8, 0)));
        let week_one: f64 = weekly
            .iter()
            .filter(|r| r.window_start == ts(1, 0))
            .map(|r| r.revenue)
            .sum();
        assert!((week_one - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_every_rollup_carries_diagnostics() {
        let f = populated();
        // A non-finite conversion value fails attribution and is skipped.
        f.record("erin", EventType::Click, ts(9, 9), Some(f.email), 0.0);
        f.record("erin", EventType::Conversion, ts(10, 9), Some(f.email), f64::NAN);
        let stray = Uuid::new_v4();
        f.record("frank", EventType::Click, ts(11, 9), Some(stray), 0.0);
        f.record("frank", EventType::Conversion, ts(12, 9), Some(f.search), 40.0);

        let aggregator = f.aggregator();
        let expected = RollupDiagnostics {
            sessions_considered: 5,
            sessions_attributed: 4,
            sessions_skipped: 1,
            unresolved_channels: 1,
        };

        let series = aggregator
            .get_channel_timeseries(f.project, AttributionModel::Linear, ts(1, 0), ts(30, 0), TimeGranularity::Day)
            .unwrap();
        assert_eq!(series.diagnostics, expected);
        assert_eq!(series.granularity, TimeGranularity::Day);

        let paths = aggregator
            .get_top_conversion_paths(f.project, AttributionModel::Linear, ts(1, 0), ts(30, 0), 10)
            .unwrap();
        assert_eq!(paths.diagnostics, expected);
        assert!(paths.paths.iter().any(|p| p.path_string == "(unknown) > search"));

        let comparison = aggregator
            .compare_attribution_models(f.project, Some(f.email), ts(1, 0), ts(30, 0))
            .unwrap();
        for entry in comparison.values() {
            assert_eq!(entry.diagnostics.sessions_skipped, 1);
            assert_eq!(entry.diagnostics.sessions_attributed, 4);
        }

        let report = aggregator
            .get_channel_performance(f.project, AttributionModel::Linear, ts(1, 0), ts(30, 0))
            .unwrap();
        assert_eq!(report.diagnostics, expected);
    }

    #[test]
    fn test_window_start_truncation() {
        // Thursday afternoon
        let t = Utc.with_ymd_and_hms(2024, 4, 4, 15, 30, 0).unwrap();
        assert_eq!(window_start(t, TimeGranularity::Day), ts(4, 0));
        assert_eq!(window_start(t, TimeGranularity::Week), ts(1, 0));
    }
}
