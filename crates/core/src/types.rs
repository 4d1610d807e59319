use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ─── Events & Channels ──────────────────────────────────────────────────────

/// Kind of a recorded touchpoint event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageView,
    Click,
    /// Terminal, value-bearing event that opens a conversion session.
    Conversion,
    Custom(String),
}

/// A raw marketing event as recorded by ingestion. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionEvent {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_identifier: String,
    pub event_type: EventType,
    pub event_timestamp: DateTime<Utc>,
    /// Resolved upstream from UTM/referrer data; `None` when unresolved.
    #[serde(default)]
    pub channel_id: Option<Uuid>,
    /// Monetary value, 0 for non-conversion events.
    #[serde(default)]
    pub event_value: f64,
    pub created_at: DateTime<Utc>,
}

impl AttributionEvent {
    pub fn is_conversion(&self) -> bool {
        self.event_type == EventType::Conversion
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionChannel {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub medium: Option<String>,
    #[serde(default)]
    pub campaign: Option<String>,
}

// ─── Attribution Model ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionModel {
    FirstTouch,
    LastTouch,
    Linear,
    TimeDecay,
    /// Position-based: 40% first, 40% last, 20% spread over the middle.
    UShaped,
}

impl AttributionModel {
    pub const ALL: [AttributionModel; 5] = [
        AttributionModel::FirstTouch,
        AttributionModel::LastTouch,
        AttributionModel::Linear,
        AttributionModel::TimeDecay,
        AttributionModel::UShaped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionModel::FirstTouch => "first_touch",
            AttributionModel::LastTouch => "last_touch",
            AttributionModel::Linear => "linear",
            AttributionModel::TimeDecay => "time_decay",
            AttributionModel::UShaped => "u_shaped",
        }
    }
}

impl fmt::Display for AttributionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributionModel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttributionModel::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown attribution model '{s}'")))
    }
}

// ─── Calculation ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionCalculationRequest {
    pub project_id: Uuid,
    pub user_identifier: String,
    pub conversion_event_id: Uuid,
    pub model: AttributionModel,
    /// The user's event history in any order.
    pub touchpoints: Vec<AttributionEvent>,
}

/// One touchpoint's share of a conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionTouchpoint {
    pub touchpoint_event_id: Uuid,
    /// 1-based chronological position.
    pub position: usize,
    pub weight: f64,
    pub attributed_value: f64,
    pub time_to_conversion_hours: f64,
    pub channel_id: Option<Uuid>,
    pub event_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionResult {
    pub touchpoints: Vec<AttributionTouchpoint>,
    pub total_attributed_value: f64,
}

impl AttributionResult {
    pub fn empty() -> Self {
        Self {
            touchpoints: Vec::new(),
            total_attributed_value: 0.0,
        }
    }
}
