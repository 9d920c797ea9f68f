pub mod aggregator;
pub mod rest;
pub mod traits;

pub use aggregator::QuoteAggregator;
pub use rest::RestVenue;
pub use traits::*;

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::VenueConfig;

/// Venue adapters keyed by venue id.
#[derive(Clone, Default)]
pub struct VenueRegistry {
    adapters: HashMap<String, Arc<dyn VenueAdapter>>,
}

impl VenueRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn VenueAdapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    pub fn get(&self, venue_id: &str) -> Option<Arc<dyn VenueAdapter>> {
        self.adapters.get(venue_id).cloned()
    }

    /// Adapters for `venue_ids`, in the same order.
    pub fn resolve(&self, venue_ids: &[String]) -> Result<Vec<Arc<dyn VenueAdapter>>> {
        venue_ids
            .iter()
            .map(|id| self.get(id).ok_or_else(|| anyhow!("Venue {} is not registered", id)))
            .collect()
    }

    pub fn venue_count(&self) -> usize {
        self.adapters.len()
    }
}

pub fn create_venues(venue_configs: &HashMap<String, VenueConfig>) -> Result<VenueRegistry> {
    let mut registry = VenueRegistry::new();

    for (id, config) in venue_configs {
        let venue = RestVenue::new(id.clone(), config.clone())?;
        registry.register(Arc::new(venue));
    }

    tracing::info!("Registered {} venues", registry.venue_count());
    Ok(registry)
}
