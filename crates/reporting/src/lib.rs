//! Attribution calculation and rollups — per-conversion credit, channel
//! performance, conversion paths, ROI, model comparison, and report snapshots.

pub mod aggregator;
pub mod attribution;
pub mod paths;
pub mod report_builder;
pub mod repository;
pub mod roi;
pub mod session;

pub use aggregator::{
    ChannelPerformance, ChannelPerformanceAggregator, ChannelPerformanceReport,
    ChannelTimeSeries, ChannelWindowRollup, ConversionPathReport, ModelComparison,
    PerformanceTotals, TimeGranularity,
};
pub use attribution::calculate_attribution;
pub use paths::ConversionPath;
pub use report_builder::{
    export_csv, export_json, InMemoryReportStore, ReportBuilder, ReportKey, ReportRequest,
    ReportSnapshot, ReportStore,
};
pub use repository::{AttributionRepository, InMemoryRepository};
pub use roi::ChannelRoi;
pub use session::{ConversionSession, RollupDiagnostics, SessionBatch};
