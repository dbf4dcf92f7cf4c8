use proptest::prelude::*;

use workpool::load_balancer::StatsSample;

/// Cpu sample as a fraction or as a percentage
pub fn cpu_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![0.0f64..=1.0, 1.0f64..=100.0]
}

pub fn memory_strategy() -> impl Strategy<Value = f64> {
    0.0f64..=2_147_483_648.0
}

pub fn response_time_strategy() -> impl Strategy<Value = f64> {
    0.0f64..=5_000.0
}

pub fn stats_sample_strategy() -> impl Strategy<Value = StatsSample> {
    (
        prop::option::of(cpu_strategy()),
        prop::option::of(memory_strategy()),
        prop::option::of(response_time_strategy()),
    )
        .prop_map(|(cpu, memory, response_time)| StatsSample {
            cpu,
            memory,
            response_time,
        })
}

/// Per-slot active counts for a small pool
pub fn active_counts_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..64, 1..16)
}
