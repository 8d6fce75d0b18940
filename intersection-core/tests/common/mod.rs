#![allow(dead_code)]

use core::ops::Add;
use core::time::Duration;

use intersection_core::arbiter::Arbiter;
use intersection_core::config::ArbiterConfig;
use intersection_core::display::{DisplaySink, LightStateMap};
use intersection_core::roads::{RoadId, RoadOrder};
use intersection_core::telemetry::{TelemetryInstant, TelemetryRecorder};

/// Millisecond clock used by the integration tests.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct MockInstant(pub u64);

impl MockInstant {
    pub const fn secs(value: u64) -> Self {
        Self(value * 1_000)
    }
}

impl Add<Duration> for MockInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX))
    }
}

impl TelemetryInstant for MockInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

/// Sink that keeps every map it was shown.
#[derive(Default)]
pub struct RecordingSink {
    pub shown: Vec<LightStateMap>,
}

impl RecordingSink {
    pub fn last(&self) -> Option<&LightStateMap> {
        self.shown.last()
    }
}

impl DisplaySink for RecordingSink {
    fn show(&mut self, lights: &LightStateMap) {
        self.shown.push(lights.clone());
    }
}

pub type Recorder = TelemetryRecorder<MockInstant, 256>;

pub fn arbiter(order: &[RoadId]) -> Arbiter<MockInstant, RecordingSink> {
    let order = RoadOrder::from_slice(order).expect("valid order");
    Arbiter::new(order, ArbiterConfig::new(), RecordingSink::default())
}

/// Asserts that at most one configured road is open.
pub fn assert_mutual_exclusion(arbiter: &Arbiter<MockInstant, RecordingSink>) {
    assert!(
        arbiter.registry().open_count() <= 1,
        "more than one road open: {:?}",
        arbiter.registry().light_map()
    );
}

pub type TestArbiter = Arbiter<MockInstant, RecordingSink>;
