// src/stream/connectivity.rs
//
// Camera link state. Only transitions are logged and recorded, so a camera
// that stays down across many reconnect attempts produces one `down` row.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Connectivity-history sink (one row per transition).
#[async_trait]
pub trait ConnectivityStore: Send + Sync {
    async fn record(&self, farm_code: i32, connected: bool) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Initial state (no attempt finished yet)
    Unknown,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Lost,
}

pub struct ConnectivityTracker {
    state: LinkState,
    farm_code: i32,
    store: Arc<dyn ConnectivityStore>,
}

impl ConnectivityTracker {
    pub fn new(farm_code: i32, store: Arc<dyn ConnectivityStore>) -> Self {
        Self {
            state: LinkState::Unknown,
            farm_code,
            store,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Update the state and return the transition, if any. A first
    /// observation of `down` counts as an initial loss.
    pub fn observe(&mut self, connected: bool) -> Option<LinkEvent> {
        let next = if connected {
            LinkState::Up
        } else {
            LinkState::Down
        };
        let prev = std::mem::replace(&mut self.state, next);
        match (prev, next) {
            (LinkState::Up, LinkState::Up) | (LinkState::Down, LinkState::Down) => None,
            (_, LinkState::Up) => Some(LinkEvent::Connected),
            (_, _) => Some(LinkEvent::Lost),
        }
    }

    /// Observe and, on a transition, log it and write a history row.
    pub async fn mark(&mut self, connected: bool) -> Option<LinkEvent> {
        let event = self.observe(connected)?;
        match event {
            LinkEvent::Connected => info!(farm_code = self.farm_code, "✅ Stream connected"),
            LinkEvent::Lost => warn!(farm_code = self.farm_code, "📴 Stream connection lost"),
        }
        if let Err(e) = self.store.record(self.farm_code, connected).await {
            warn!(
                farm_code = self.farm_code,
                "Failed to record connectivity change: {:#}", e
            );
        }
        Some(event)
    }

    /// Record a final `down` when shutting down with the link still up.
    pub async fn finish(&mut self) {
        if self.state == LinkState::Up {
            self.mark(false).await;
        }
    }
}
