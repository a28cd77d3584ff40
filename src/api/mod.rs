//! HTTP surface: JSON in, JSON out.
//!
//! Creation endpoints enqueue a background auction and return the created
//! entity immediately; resolution runs synchronously so failures are
//! visible to the caller.

pub mod agents;
pub mod goals;

use std::sync::Arc;

use crate::market::MarketEngine;
use crate::store::MarketStore;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: MarketStore,
    pub engine: Arc<MarketEngine>,
}

impl AppState {
    pub fn new(engine: Arc<MarketEngine>) -> Self {
        Self {
            store: engine.store.clone(),
            engine,
        }
    }
}
