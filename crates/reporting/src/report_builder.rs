//! Report builder — persists aggregator output as immutable snapshots and
//! exports them as CSV or JSON.

use crate::aggregator::{ChannelPerformance, ChannelPerformanceAggregator, PerformanceTotals};
use crate::paths::ConversionPath;
use crate::session::{validate_range, RollupDiagnostics};
use attribution_core::{AttributionModel, EngineError, EngineResult};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

// ─── Types ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportKey {
    pub project_id: Uuid,
    pub report_name: String,
    pub model: AttributionModel,
    pub date_range_start: DateTime<Utc>,
    pub date_range_end: DateTime<Utc>,
}

/// Aggregator output handed to the builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportInput {
    pub key: ReportKey,
    pub channels: Vec<ChannelPerformance>,
    pub paths: Vec<ConversionPath>,
    pub totals: PerformanceTotals,
    #[serde(default)]
    pub diagnostics: RollupDiagnostics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub id: Uuid,
    pub key: ReportKey,
    pub channels: Vec<ChannelPerformance>,
    pub paths: Vec<ConversionPath>,
    pub totals: PerformanceTotals,
    pub diagnostics: RollupDiagnostics,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub project_id: Uuid,
    pub report_name: String,
    pub model: AttributionModel,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub path_limit: usize,
}

// ─── Storage ────────────────────────────────────────────────────────────────

/// Snapshot persistence. Implementations must refuse to overwrite a key.
pub trait ReportStore: Send + Sync {
    fn insert(&self, snapshot: ReportSnapshot) -> EngineResult<()>;
    fn get(&self, key: &ReportKey) -> Option<ReportSnapshot>;
    /// Snapshots of a project in the order they were stored.
    fn list(&self, project_id: &Uuid) -> Vec<ReportSnapshot>;
}

pub struct InMemoryReportStore {
    snapshots: DashMap<ReportKey, (u64, ReportSnapshot)>,
    sequence: AtomicU64,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self {
            snapshots: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }
}

impl Default for InMemoryReportStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportStore for InMemoryReportStore {
    fn insert(&self, snapshot: ReportSnapshot) -> EngineResult<()> {
        match self.snapshots.entry(snapshot.key.clone()) {
            Entry::Occupied(_) => Err(EngineError::InvalidArgument(format!(
                "report '{}' for {} / {} already exists",
                snapshot.key.report_name, snapshot.key.model, snapshot.key.date_range_start
            ))),
            Entry::Vacant(slot) => {
                let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
                slot.insert((seq, snapshot));
                Ok(())
            }
        }
    }

    fn get(&self, key: &ReportKey) -> Option<ReportSnapshot> {
        self.snapshots.get(key).map(|s| s.value().1.clone())
    }

    fn list(&self, project_id: &Uuid) -> Vec<ReportSnapshot> {
        let mut found: Vec<(u64, ReportSnapshot)> = self
            .snapshots
            .iter()
            .filter(|s| &s.key().project_id == project_id)
            .map(|s| s.value().clone())
            .collect();
        found.sort_by_key(|(seq, _)| *seq);
        found.into_iter().map(|(_, snapshot)| snapshot).collect()
    }
}

// ─── Report Builder ─────────────────────────────────────────────────────────

pub struct ReportBuilder {
    store: Arc<dyn ReportStore>,
}

impl ReportBuilder {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryReportStore::new()))
    }

    /// Freeze aggregator output under its key.
    pub fn persist(&self, input: ReportInput) -> EngineResult<ReportSnapshot> {
        if input.key.report_name.trim().is_empty() {
            return Err(EngineError::InvalidArgument("report name is empty".into()));
        }
        validate_range(input.key.date_range_start, input.key.date_range_end)?;

        let snapshot = ReportSnapshot {
            id: Uuid::new_v4(),
            key: input.key,
            channels: input.channels,
            paths: input.paths,
            totals: input.totals,
            diagnostics: input.diagnostics,
            generated_at: Utc::now(),
        };
        self.store.insert(snapshot.clone())?;

        info!(
            report_id = %snapshot.id,
            project_id = %snapshot.key.project_id,
            name = %snapshot.key.report_name,
            model = %snapshot.key.model,
            channels = snapshot.channels.len(),
            paths = snapshot.paths.len(),
            "Report snapshot persisted"
        );
        Ok(snapshot)
    }

    /// Aggregate channels and paths from one session batch and persist them.
    pub fn generate_report(
        &self,
        aggregator: &ChannelPerformanceAggregator,
        request: &ReportRequest,
    ) -> EngineResult<ReportSnapshot> {
        let batch = aggregator.load_sessions(request.project_id, request.start, request.end)?;
        let performance = aggregator.channel_performance(&batch, request.model);
        let paths = aggregator
            .top_conversion_paths(&batch, request.model, request.path_limit)
            .paths;

        self.persist(ReportInput {
            key: ReportKey {
                project_id: request.project_id,
                report_name: request.report_name.clone(),
                model: request.model,
                date_range_start: request.start,
                date_range_end: request.end,
            },
            channels: performance.channels,
            paths,
            totals: performance.totals,
            diagnostics: performance.diagnostics,
        })
    }

    pub fn get_report(&self, key: &ReportKey) -> Option<ReportSnapshot> {
        self.store.get(key)
    }

    pub fn list_reports(&self, project_id: &Uuid) -> Vec<ReportSnapshot> {
        self.store.list(project_id)
    }
}

// ─── Export ─────────────────────────────────────────────────────────────────

const CSV_COLUMNS: [&str; 10] = [
    "channel_id",
    "channel",
    "category",
    "attributed_conversions",
    "revenue",
    "conversion_rate",
    "avg_time_to_conversion_hours",
    "touchpoints",
    "sessions",
    "avg_touchpoints",
];

/// One row per channel. Figures are rounded here and only here.
pub fn export_csv(snapshot: &ReportSnapshot) -> String {
    let mut csv = CSV_COLUMNS.join(",");
    csv.push('\n');
    for channel in &snapshot.channels {
        let row = [
            channel
                .channel_id
                .map(|id| serde_json::json!(id.to_string()))
                .unwrap_or(serde_json::Value::Null),
            serde_json::json!(channel.channel_name),
            serde_json::json!(channel.category),
            serde_json::json!(round(channel.attributed_conversions, 4)),
            serde_json::json!(round(channel.total_revenue, 2)),
            serde_json::json!(round(channel.conversion_rate, 4)),
            serde_json::json!(round(channel.avg_time_to_conversion_hours, 2)),
            serde_json::json!(channel.total_touchpoints),
            serde_json::json!(channel.sessions),
            serde_json::json!(round(channel.avg_touchpoints, 2)),
        ];
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => format!("\"{}\"", s.replace('"', "\"\"")),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            })
            .collect();
        csv.push_str(&cells.join(","));
        csv.push('\n');
    }
    csv
}

pub fn export_json(snapshot: &ReportSnapshot) -> EngineResult<String> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

fn round(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

// ─── Tests ──────────────────────────────────────────────────────────────────
