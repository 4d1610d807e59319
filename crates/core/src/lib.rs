//! Shared domain types, error taxonomy, and configuration for the attribution
//! engine.

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{EngineError, EngineResult, ErrorKind};
pub use types::{
    AttributionCalculationRequest, AttributionChannel, AttributionEvent, AttributionModel,
    AttributionResult, AttributionTouchpoint, EventType,
};
