//! Tunable timing windows for arbitration and the decision cadence.

use core::fmt;
use core::time::Duration;

/// Minimum age of a road's bookkeeping before a density switch may open it.
pub const DEFAULT_MIN_GREEN: Duration = Duration::from_secs(10);
/// Quiet period after a preemption during which density switches are held.
pub const DEFAULT_EMERGENCY_COOLDOWN: Duration = Duration::from_secs(10);
/// Bookkeeping age after which the overdue sweep intervenes.
pub const DEFAULT_STARVATION_THRESHOLD: Duration = Duration::from_secs(120);
/// Minimum bookkeeping age for a road to be chosen by the overdue sweep.
pub const DEFAULT_OVERDUE_MIN_WAIT: Duration = Duration::from_secs(10);

/// Interval between pulses that run a tick followed by a sweep.
pub const DEFAULT_PULSE_INTERVAL: Duration = Duration::from_millis(100);
/// Interval at which each road's feed delivers a frame.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(10);

/// Arbitration windows.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ArbiterConfig {
    pub min_green: Duration,
    pub emergency_cooldown: Duration,
    pub starvation_threshold: Duration,
    pub overdue_min_wait: Duration,
}

impl ArbiterConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            min_green: DEFAULT_MIN_GREEN,
            emergency_cooldown: DEFAULT_EMERGENCY_COOLDOWN,
            starvation_threshold: DEFAULT_STARVATION_THRESHOLD,
            overdue_min_wait: DEFAULT_OVERDUE_MIN_WAIT,
        }
    }

    /// Checks the relationships the sweep relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.starvation_threshold.is_zero() {
            return Err(ConfigError::ZeroStarvationThreshold);
        }
        if self.starvation_threshold < self.overdue_min_wait {
            return Err(ConfigError::StarvationBelowOverdueWait {
                threshold: self.starvation_threshold,
                wait: self.overdue_min_wait,
            });
        }
        Ok(())
    }

    /// Returns a copy with `update` applied, rejecting invalid combinations.
    pub fn apply(&self, update: ConfigUpdate) -> Result<Self, ConfigError> {
        let mut next = *self;
        match update {
            ConfigUpdate::MinGreen(value) => next.min_green = value,
            ConfigUpdate::EmergencyCooldown(value) => next.emergency_cooldown = value,
            ConfigUpdate::StarvationThreshold(value) => next.starvation_threshold = value,
            ConfigUpdate::OverdueMinWait(value) => next.overdue_min_wait = value,
        }
        next.validate()?;
        Ok(next)
    }
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A single runtime change to [`ArbiterConfig`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigUpdate {
    MinGreen(Duration),
    EmergencyCooldown(Duration),
    StarvationThreshold(Duration),
    OverdueMinWait(Duration),
}

impl ConfigUpdate {
    /// Console keyword naming the updated window.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            ConfigUpdate::MinGreen(_) => "min-green",
            ConfigUpdate::EmergencyCooldown(_) => "cooldown",
            ConfigUpdate::StarvationThreshold(_) => "starvation",
            ConfigUpdate::OverdueMinWait(_) => "overdue-wait",
        }
    }

    #[must_use]
    pub const fn value(self) -> Duration {
        match self {
            ConfigUpdate::MinGreen(value)
            | ConfigUpdate::EmergencyCooldown(value)
            | ConfigUpdate::StarvationThreshold(value)
            | ConfigUpdate::OverdueMinWait(value) => value,
        }
    }
}

/// Errors raised when a configuration would break the sweep.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    ZeroStarvationThreshold,
    StarvationBelowOverdueWait { threshold: Duration, wait: Duration },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroStarvationThreshold => {
                f.write_str("starvation threshold must be non-zero")
            }
            ConfigError::StarvationBelowOverdueWait { threshold, wait } => write!(
                f,
                "starvation threshold {}ms is below overdue wait {}ms",
                threshold.as_millis(),
                wait.as_millis()
            ),
        }
    }
}

/// Cadence of the decision queue's producers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CadenceConfig {
    pub pulse_interval: Duration,
    pub frame_interval: Duration,
}

impl CadenceConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pulse_interval: DEFAULT_PULSE_INTERVAL,
            frame_interval: DEFAULT_FRAME_INTERVAL,
        }
    }
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self::new()
    }
}
