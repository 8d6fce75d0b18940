//! Shared status storage for the firmware target.
//!
//! The decision task publishes the registry into lightweight atomics after
//! every batch so the console task can build a `StatusSnapshot` without
//! touching the arbiter directly.

use core::time::Duration;

use intersection_core::arbiter::Arbiter;
use intersection_core::config::{
    ArbiterConfig, DEFAULT_EMERGENCY_COOLDOWN, DEFAULT_MIN_GREEN, DEFAULT_OVERDUE_MIN_WAIT,
    DEFAULT_STARVATION_THRESHOLD,
};
use intersection_core::display::DisplaySink;
use intersection_core::repl::status::{RoadStatus, StatusProvider, StatusSnapshot};
use intersection_core::roads::{LightState, ROAD_COUNT, RoadId, VehicleCounts};
use intersection_core::telemetry::TelemetryInstant;
use portable_atomic::{AtomicU8, AtomicU16, AtomicU64, Ordering};

use crate::decisions::FirmwareInstant;

const COUNT_FIELDS: usize = 5;
const NO_ROAD: u8 = u8::MAX;

/// Configured road order, one road index per slot (`NO_ROAD` == unused).
static ORDER: [AtomicU8; ROAD_COUNT] = [const { AtomicU8::new(NO_ROAD) }; ROAD_COUNT];
/// Bitmask of roads currently shown green.
static OPEN_MASK: AtomicU8 = AtomicU8::new(0);
/// Bitmask of roads that have reported counts.
static COUNTS_MASK: AtomicU8 = AtomicU8::new(0);
/// Latest counts per road: ambulance, firefighter, police, car, congestion.
static COUNTS: [[AtomicU16; COUNT_FIELDS]; ROAD_COUNT] =
    [const { [const { AtomicU16::new(0) }; COUNT_FIELDS] }; ROAD_COUNT];
/// Timestamp (µs, +1) of each road's last transition to green.
static OPENED_MICROS: [AtomicU64; ROAD_COUNT] = [const { AtomicU64::new(0) }; ROAD_COUNT];
/// Timestamp (µs, +1) of each road's bookkeeping entry.
static DESIGNATED_MICROS: [AtomicU64; ROAD_COUNT] = [const { AtomicU64::new(0) }; ROAD_COUNT];
/// Timestamp (µs, +1) of the last preemption still holding the cooldown.
static EMERGENCY_MICROS: AtomicU64 = AtomicU64::new(0);
/// Decision windows in milliseconds: min-green, cooldown, starvation, overdue wait.
static CONFIG_MILLIS: [AtomicU64; 4] = [
    AtomicU64::new(DEFAULT_MIN_GREEN.as_secs() * 1_000),
    AtomicU64::new(DEFAULT_EMERGENCY_COOLDOWN.as_secs() * 1_000),
    AtomicU64::new(DEFAULT_STARVATION_THRESHOLD.as_secs() * 1_000),
    AtomicU64::new(DEFAULT_OVERDUE_MIN_WAIT.as_secs() * 1_000),
];

fn bit_for(id: RoadId) -> u8 {
    1 << id.as_index()
}

fn encode(instant: Option<FirmwareInstant>) -> u64 {
    instant.map_or(0, |value| value.as_micros().saturating_add(1))
}

fn decode(raw: u64) -> Option<FirmwareInstant> {
    raw.checked_sub(1).map(FirmwareInstant::from_micros)
}

fn millis(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX)
}

fn store_counts(id: RoadId, counts: Option<VehicleCounts>) {
    let bit = bit_for(id);
    let Some(counts) = counts else {
        COUNTS_MASK.fetch_and(!bit, Ordering::Relaxed);
        return;
    };

    let slots = &COUNTS[id.as_index()];
    let values = [
        counts.ambulance,
        counts.firefighter,
        counts.police,
        counts.car,
        counts.congestion,
    ];
    for (slot, value) in slots.iter().zip(values) {
        slot.store(value, Ordering::Relaxed);
    }
    COUNTS_MASK.fetch_or(bit, Ordering::Relaxed);
}

fn load_counts(id: RoadId) -> Option<VehicleCounts> {
    if COUNTS_MASK.load(Ordering::Relaxed) & bit_for(id) == 0 {
        return None;
    }
    let slots = &COUNTS[id.as_index()];
    let field = |index: usize| slots[index].load(Ordering::Relaxed);
    Some(VehicleCounts::new(
        field(0),
        field(1),
        field(2),
        field(3),
        field(4),
    ))
}

/// Copies the arbiter's registry, timers and windows into the shared atomics.
pub fn publish<S>(arbiter: &Arbiter<FirmwareInstant, S>)
where
    S: DisplaySink,
{
    let registry = arbiter.registry();
    let mut open_mask = 0;

    for (slot, road) in ORDER.iter().zip(registry.roads().map(Some).chain([None; ROAD_COUNT])) {
        let Some(road) = road else {
            slot.store(NO_ROAD, Ordering::Relaxed);
            continue;
        };
        let index = road.id.as_index();
        slot.store(u8::try_from(index).unwrap_or(NO_ROAD), Ordering::Relaxed);

        if road.light.is_open() {
            open_mask |= bit_for(road.id);
        }
        store_counts(road.id, road.counts);
        OPENED_MICROS[index].store(encode(road.last_opened_at), Ordering::Relaxed);
        DESIGNATED_MICROS[index].store(
            encode(registry.bookkeeping(road.id).recorded_at()),
            Ordering::Relaxed,
        );
    }
    OPEN_MASK.store(open_mask, Ordering::Relaxed);
    EMERGENCY_MICROS.store(encode(arbiter.last_emergency_at()), Ordering::Relaxed);

    let config = arbiter.config();
    for (slot, window) in CONFIG_MILLIS.iter().zip([
        config.min_green,
        config.emergency_cooldown,
        config.starvation_threshold,
        config.overdue_min_wait,
    ]) {
        slot.store(millis(window), Ordering::Relaxed);
    }
}

/// Decision windows last published by the decision task.
pub fn config() -> ArbiterConfig {
    let window = |index: usize| Duration::from_millis(CONFIG_MILLIS[index].load(Ordering::Relaxed));
    ArbiterConfig {
        min_green: window(0),
        emergency_cooldown: window(1),
        starvation_threshold: window(2),
        overdue_min_wait: window(3),
    }
}

/// Builds a [`StatusSnapshot`] using the stored metrics.
pub fn snapshot(now: FirmwareInstant) -> StatusSnapshot {
    let mut snapshot = StatusSnapshot::unknown();
    snapshot.roads.clear();
    snapshot.config = config();

    let open_mask = OPEN_MASK.load(Ordering::Relaxed);
    let since = |raw: u64| decode(raw).map(|at| now.saturating_duration_since(at));

    for slot in &ORDER {
        let Some(id) = RoadId::from_index(usize::from(slot.load(Ordering::Relaxed))) else {
            continue;
        };
        let index = id.as_index();
        let open = open_mask & bit_for(id) != 0;
        let mut status = RoadStatus::closed(id);
        if open {
            status.light = LightState::Open;
            status.since_opened = since(OPENED_MICROS[index].load(Ordering::Relaxed));
        }
        status.counts = load_counts(id);
        status.since_designated = since(DESIGNATED_MICROS[index].load(Ordering::Relaxed));
        let _ = snapshot.roads.push(status);
    }

    snapshot.cooldown_remaining = decode(EMERGENCY_MICROS.load(Ordering::Relaxed)).and_then(|at| {
        let ready_at = at + snapshot.config.emergency_cooldown;
        (now < ready_at).then(|| ready_at.saturating_duration_since(now))
    });
    snapshot
}

/// Serialises host tests that publish into the shared atomics.
#[cfg(test)]
pub(crate) static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Status provider backed by the published atomics.
#[derive(Clone, Copy, Debug, Default)]
pub struct FirmwareStatus;

impl StatusProvider<FirmwareInstant> for FirmwareStatus {
    fn snapshot(&mut self, now: FirmwareInstant) -> Option<StatusSnapshot> {
        Some(snapshot(now))
    }
}
