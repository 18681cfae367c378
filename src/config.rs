//! Explicit configuration records, carried through constructors rather
//! than module-level globals (§9 design note).

use std::time::Duration;

/// Constants governing one trajectory's timing, matching
/// `original_source/runner/config.py::TestConfig`.
#[derive(Debug, Clone, Copy)]
pub struct TestConfig {
    pub warmup: Duration,
    pub per_step: Duration,
    pub inter_step_pause: Duration,
    /// Pseudo-cap applied above SUT maximum in continuous-load mode (§4.4.1).
    pub uncapped_power: i64,
}

impl Default for TestConfig {
    fn default() -> Self {
        TestConfig {
            warmup: Duration::from_secs(15),
            per_step: Duration::from_secs(30),
            inter_step_pause: Duration::from_secs(5),
            uncapped_power: 1400,
        }
    }
}

/// Constants governing the collector's sampling cadence.
#[derive(Debug, Clone, Copy)]
pub struct CollectorConfig {
    pub freq_hz: f64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig { freq_hz: 1.0 }
    }
}

impl CollectorConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.freq_hz)
    }
}

/// Constants governing the agent's RAPL sampling window.
#[derive(Debug, Clone, Copy)]
pub struct AgentConfig {
    pub rapl_sample_window: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            rapl_sample_window: Duration::from_millis(250),
        }
    }
}

/// The campaign matrix's parameter ranges (§4.4.2).
#[derive(Debug, Clone, Copy)]
pub struct CampaignConfig {
    pub min_load: i64,
    pub max_load: i64,
    pub load_delta: i64,
    pub cap_min: i64,
    pub cap_max: i64,
    pub cap_delta: i64,
    pub direction: CapDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CapDirection {
    Up,
    Down,
    Both,
}

impl CampaignConfig {
    /// Preconditions asserted before campaign start (§4.4.2).
    pub fn validate(&self) -> Result<(), String> {
        if self.min_load > self.max_load {
            return Err("min_load must be <= max_load".into());
        }
        if self.cap_min >= self.cap_max {
            return Err("cap_min must be < cap_max".into());
        }
        if self.cap_delta <= 0 {
            return Err("cap_delta must be > 0".into());
        }
        if !(self.load_delta > 0 || self.min_load == self.max_load) {
            return Err("load_delta must be > 0 unless min_load == max_load".into());
        }
        Ok(())
    }
}
