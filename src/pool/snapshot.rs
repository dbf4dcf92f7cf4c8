use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::load_balancer::Slot;

/// Point-in-time view of the pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub size: usize,
    pub available: usize,
    pub reviving: Vec<usize>,
    pub destroying: bool,
    pub slots: Vec<SlotSnapshot>,
    pub taken_at: DateTime<Utc>,
}

/// One worker position in a [`PoolSnapshot`]
#[derive(Debug, Clone, Serialize)]
pub struct SlotSnapshot {
    pub worker_id: usize,
    /// Load record, `None` while the worker is down
    pub load: Option<Slot>,
    pub score: Option<f64>,
    pub spawned_at: Option<DateTime<Utc>>,
}

impl PoolSnapshot {
    /// Total in-flight calls across present workers
    pub fn active_calls(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.load.map(|load| load.active))
            .sum()
    }
}
