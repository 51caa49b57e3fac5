//! Simulation configuration.

use crate::error::SimulationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longest single activity duration, in seconds. Longer spans do not fit a
/// timestamp offset.
pub const MAX_DURATION_SECS: u64 = (i64::MAX / 1000) as u64;

/// Inclusive range of synthetic activity durations, in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationRange {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl Default for DurationRange {
    fn default() -> Self {
        Self {
            min_secs: 1,
            max_secs: 10_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Fixed seed for reproducible logs. `None` draws one from OS entropy.
    pub seed: Option<u64>,
    pub record_timestamps: bool,
    /// Clock origin for timestamps. Defaults to the time the simulator is created.
    pub start_date: Option<DateTime<Utc>>,
    pub duration: DurationRange,
    pub max_steps_per_case: usize,
    pub max_noise_attempts: usize,
    pub record_events: bool,
    /// Resource pool name → capacity.
    pub resources: BTreeMap<String, u32>,
    /// Activity label → pool it holds while in progress.
    pub activity_resources: BTreeMap<String, String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: None,
            record_timestamps: false,
            start_date: None,
            duration: DurationRange::default(),
            max_steps_per_case: 1_000_000,
            max_noise_attempts: 10_000,
            record_events: false,
            resources: BTreeMap::new(),
            activity_resources: BTreeMap::new(),
        }
    }
}

impl SimulationConfig {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.duration.min_secs > self.duration.max_secs {
            return Err(SimulationError::InvalidConfig(format!(
                "duration min_secs {} exceeds max_secs {}",
                self.duration.min_secs, self.duration.max_secs
            )));
        }
        if self.duration.max_secs > MAX_DURATION_SECS {
            return Err(SimulationError::InvalidConfig(format!(
                "duration max_secs {} exceeds the limit of {MAX_DURATION_SECS}",
                self.duration.max_secs
            )));
        }
        if self.max_steps_per_case == 0 {
            return Err(SimulationError::InvalidConfig(
                "max_steps_per_case must be positive".into(),
            ));
        }
        if self.max_noise_attempts == 0 {
            return Err(SimulationError::InvalidConfig(
                "max_noise_attempts must be positive".into(),
            ));
        }
        for (pool, capacity) in &self.resources {
            if *capacity == 0 {
                return Err(SimulationError::InvalidConfig(format!(
                    "resource pool '{pool}' has zero capacity"
                )));
            }
        }
        for (activity, pool) in &self.activity_resources {
            if !self.resources.contains_key(pool) {
                return Err(SimulationError::InvalidConfig(format!(
                    "activity '{activity}' uses undeclared resource pool '{pool}'"
                )));
            }
        }
        Ok(())
    }
}
