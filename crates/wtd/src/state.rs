//! Shared daemon state handed to every RPC handler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use wt_core::config::WtConfig;

use crate::cache::PrCache;
use crate::engine::WorktreeEngine;

pub struct DaemonState {
    pub config: WtConfig,
    pub engine: WorktreeEngine,
    /// `None` when the GitHub integration is disabled in config.
    pub cache: Option<Arc<PrCache>>,
    pub started_at: DateTime<Utc>,
}

impl DaemonState {
    pub fn new(config: WtConfig, engine: WorktreeEngine, cache: Option<Arc<PrCache>>) -> Self {
        Self {
            config,
            engine,
            cache,
            started_at: Utc::now(),
        }
    }
}
