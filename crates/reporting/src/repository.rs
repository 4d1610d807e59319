//! Read-only event/channel source consumed by the aggregator.

use attribution_core::{AttributionChannel, AttributionEvent, EngineResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// Narrow read interface over whatever stores recorded events and channels.
pub trait AttributionRepository: Send + Sync {
    /// Conversion events of a project whose timestamp lies in `[start, end]`.
    fn conversion_events(
        &self,
        project_id: &Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Vec<AttributionEvent>>;

    /// Every event recorded for a user, channel already resolved.
    fn user_events(&self, project_id: &Uuid, user_identifier: &str)
        -> EngineResult<Vec<AttributionEvent>>;

    /// Display metadata for a channel; `None` when the registry has no entry.
    fn channel(&self, channel_id: &Uuid) -> Option<AttributionChannel>;
}

/// In-memory repository keyed by project, then user.
pub struct InMemoryRepository {
    events: DashMap<(Uuid, String), Vec<AttributionEvent>>,
    channels: DashMap<Uuid, AttributionChannel>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    pub fn record_event(&self, event: AttributionEvent) {
        self.events
            .entry((event.project_id, event.user_identifier.clone()))
            .or_default()
            .push(event);
    }

    pub fn register_channel(&self, channel: AttributionChannel) {
        self.channels.insert(channel.id, channel);
    }

    pub fn event_count(&self) -> usize {
        self.events.iter().map(|e| e.value().len()).sum()
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<AttributionEvent> for InMemoryRepository {
    fn from_iter<I: IntoIterator<Item = AttributionEvent>>(iter: I) -> Self {
        let repo = Self::new();
        for event in iter {
            repo.record_event(event);
        }
        repo
    }
}

impl AttributionRepository for InMemoryRepository {
    fn conversion_events(
        &self,
        project_id: &Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Vec<AttributionEvent>> {
        Ok(self
            .events
            .iter()
            .filter(|entry| &entry.key().0 == project_id)
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|e| {
                        e.is_conversion() && e.event_timestamp >= start && e.event_timestamp <= end
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect())
    }

    fn user_events(
        &self,
        project_id: &Uuid,
        user_identifier: &str,
    ) -> EngineResult<Vec<AttributionEvent>> {
        Ok(self
            .events
            .get(&(*project_id, user_identifier.to_string()))
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    fn channel(&self, channel_id: &Uuid) -> Option<AttributionChannel> {
        self.channels.get(channel_id).map(|c| c.clone())
    }
}
