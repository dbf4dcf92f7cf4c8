//! # Load Balancer
//!
//! Keeps one load slot per worker id and picks the least-loaded worker for
//! each call.
//!
//! ## Scoring
//!
//! Each present slot scores
//!
//! ```text
//! score = 0.7 * active / (active + 1 + ε)
//!       + 0.2 * cpu
//!       + 0.05 * memory
//!       + 0.05 * response_time
//! ```
//!
//! where `cpu`, `memory` and `response_time` are EWMAs (α = 0.2) of samples
//! normalized to `[0, 1]`. Lower is better. Absent slots are never selected.

use serde::{Deserialize, Serialize};
use tracing::trace;

/// EWMA smoothing factor applied to every new sample
pub const SMOOTHING_FACTOR: f64 = 0.2;

/// Keeps the active term away from division by zero
pub const EPSILON: f64 = 1e-6;

/// Relative weight of each load term; the defaults sum to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadWeights {
    pub active: f64,
    pub cpu: f64,
    pub memory: f64,
    pub response_time: f64,
}

impl Default for LoadWeights {
    fn default() -> Self {
        Self {
            active: 0.7,
            cpu: 0.2,
            memory: 0.05,
            response_time: 0.05,
        }
    }
}

/// Load record for one worker
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Slot {
    /// In-flight calls
    pub active: usize,
    pub cpu: f64,
    pub memory: f64,
    pub response_time: f64,
}

impl Slot {
    /// Composite load score; lower is better
    pub fn score(&self, weights: &LoadWeights) -> f64 {
        let active = self.active as f64;
        let active_term = active / (active + 1.0 + EPSILON);

        weights.active * active_term
            + weights.cpu * clamp_unit(self.cpu)
            + weights.memory * clamp_unit(self.memory)
            + weights.response_time * clamp_unit(self.response_time)
    }
}

/// One stats observation; missing fields leave the slot's average untouched
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatsSample {
    /// Fraction (0-1) or percentage (0-100)
    pub cpu: Option<f64>,
    /// Bytes
    pub memory: Option<f64>,
    /// Milliseconds
    pub response_time: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct LoadBalancer {
    slots: Vec<Option<Slot>>,
    weights: LoadWeights,
    memory_ceiling: f64,
    response_time_ceiling: f64,
}

impl LoadBalancer {
    /// Create a balancer with `size` absent slots
    pub fn new(size: usize, memory_ceiling: f64, response_time_ceiling: f64) -> Self {
        Self {
            slots: vec![None; size],
            weights: LoadWeights::default(),
            memory_ceiling,
            response_time_ceiling,
        }
    }

    pub fn with_weights(mut self, weights: LoadWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn weights(&self) -> &LoadWeights {
        &self.weights
    }

    /// Total slot positions, present or absent
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn present_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// (Re)initialize slot `id` to zero load
    pub fn add_slot(&mut self, id: usize) {
        if id >= self.slots.len() {
            self.slots.resize(id + 1, None);
        }
        self.slots[id] = Some(Slot::default());
        trace!(worker_id = id, "Load slot added");
    }

    /// Mark slot `id` absent
    pub fn delete_slot(&mut self, id: usize) {
        if let Some(slot) = self.slots.get_mut(id) {
            *slot = None;
            trace!(worker_id = id, "Load slot deleted");
        }
    }

    pub fn slot(&self, id: usize) -> Option<&Slot> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    /// Score of slot `id`; absent slots score as infinitely loaded
    pub fn score(&self, id: usize) -> f64 {
        self.slot(id)
            .map(|slot| slot.score(&self.weights))
            .unwrap_or(f64::INFINITY)
    }

    /// The id with the strictly lowest score, first in index order on ties
    pub fn acquire(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;

        for (id, slot) in self.slots.iter().enumerate() {
            let Some(slot) = slot else { continue };
            let score = slot.score(&self.weights);
            match best {
                Some((_, best_score)) if score >= best_score => {}
                _ => best = Some((id, score)),
            }
        }

        best.map(|(id, _)| id)
    }

    pub fn increase_active(&mut self, id: usize) {
        if let Some(slot) = self.slot_mut(id) {
            slot.active += 1;
        }
    }

    pub fn decrease_active(&mut self, id: usize) {
        if let Some(slot) = self.slot_mut(id) {
            slot.active = slot.active.saturating_sub(1);
        }
    }

    /// Blend a stats sample into slot `id`
    pub fn update_stats(&mut self, id: usize, sample: StatsSample) {
        let memory_ceiling = self.memory_ceiling;
        let response_time_ceiling = self.response_time_ceiling;
        let Some(slot) = self.slot_mut(id) else {
            return;
        };

        if let Some(cpu) = sample.cpu {
            let cpu = if cpu > 1.0 { cpu / 100.0 } else { cpu };
            slot.cpu = blend(slot.cpu, clamp_unit(cpu));
        }
        if let Some(memory) = sample.memory {
            slot.memory = blend(slot.memory, clamp_unit(memory / memory_ceiling));
        }
        if let Some(response_time) = sample.response_time {
            slot.response_time = blend(
                slot.response_time,
                clamp_unit(response_time / response_time_ceiling),
            );
        }

        trace!(
            worker_id = id,
            cpu = slot.cpu,
            memory = slot.memory,
            response_time = slot.response_time,
            "Load slot updated"
        );
    }

    fn slot_mut(&mut self, id: usize) -> Option<&mut Slot> {
        self.slots.get_mut(id).and_then(Option::as_mut)
    }
}

fn blend(current: f64, sample: f64) -> f64 {
    SMOOTHING_FACTOR * sample + (1.0 - SMOOTHING_FACTOR) * current
}

/// Clamp to `[0, 1]`; NaN counts as zero
fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
