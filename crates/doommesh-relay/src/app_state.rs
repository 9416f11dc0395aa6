//! Shared application state for the relay's HTTP surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::RelayConfig;
use crate::obs::RelayMetrics;
use crate::relay::RelayHandle;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: Arc<RelayConfig>,
    relay: RelayHandle,
    metrics: Arc<RelayMetrics>,
    draining: AtomicBool,
}

impl AppState {
    pub fn new(cfg: Arc<RelayConfig>, relay: RelayHandle, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                cfg,
                relay,
                metrics,
                draining: AtomicBool::new(false),
            }),
        }
    }

    pub fn cfg(&self) -> &RelayConfig {
        &self.inner.cfg
    }

    pub fn relay(&self) -> &RelayHandle {
        &self.inner.relay
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.inner.metrics
    }

    pub fn begin_draining(&self) {
        self.inner.draining.store(true, Ordering::Relaxed);
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Relaxed)
    }

    /// Gauges rendered next to the metric families.
    pub fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        vec![("doommesh_draining", u64::from(self.is_draining()))]
    }
}
