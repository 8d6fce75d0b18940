//! Telemetry event catalog and payload structures shared by firmware and host targets.
//!
//! Event kinds serialize to compact numeric codes so they can be mirrored over
//! diagnostics channels, while payload enums carry the extra metadata the
//! operator console and transcript tooling print.

use core::{convert::TryFrom, fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::roads::{EmergencyClass, LightState, RoadId, VehicleCounts};
use crate::scheduler::RequestTag;

/// Monotonic identifier assigned to each telemetry record.
pub type EventId = u32;

/// Discriminated telemetry events emitted by the arbiter and its queue.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    LightOpened(RoadId),
    LightClosed(RoadId),
    AlreadyOpen(RoadId),
    AlreadyClosed(RoadId),
    BookkeepingSeeded(RoadId),
    SnapshotIngested(RoadId),
    EmergencyPreempt(EmergencyClass),
    DensitySwitch,
    OverdueOverride,
    RequestProcessed(RequestTag),
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::LightOpened(road) => write!(f, "light-opened {road}"),
            TelemetryEventKind::LightClosed(road) => write!(f, "light-closed {road}"),
            TelemetryEventKind::AlreadyOpen(road) => write!(f, "already-open {road}"),
            TelemetryEventKind::AlreadyClosed(road) => write!(f, "already-closed {road}"),
            TelemetryEventKind::BookkeepingSeeded(road) => write!(f, "bookkeeping-seeded {road}"),
            TelemetryEventKind::SnapshotIngested(road) => write!(f, "snapshot {road}"),
            TelemetryEventKind::EmergencyPreempt(class) => write!(f, "emergency-preempt {class}"),
            TelemetryEventKind::DensitySwitch => f.write_str("density-switch"),
            TelemetryEventKind::OverdueOverride => f.write_str("overdue-override"),
            TelemetryEventKind::RequestProcessed(tag) => write!(f, "request-processed {tag}"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const LIGHT_OPENED_BASE: u16 = 0x0000;
    const LIGHT_CLOSED_BASE: u16 = 0x0004;
    const ALREADY_OPEN_BASE: u16 = 0x0008;
    const ALREADY_CLOSED_BASE: u16 = 0x000C;
    const SEEDED_BASE: u16 = 0x0010;
    const SNAPSHOT_BASE: u16 = 0x0014;
    const EMERGENCY_BASE: u16 = 0x0020;
    const DENSITY_SWITCH_CODE: u16 = 0x0024;
    const OVERDUE_OVERRIDE_CODE: u16 = 0x0025;
    const REQUEST_BASE: u16 = 0x0028;
    const REQUEST_END: u16 = 0x002B;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::LightOpened(road) => Self::LIGHT_OPENED_BASE + road_code(road),
            TelemetryEventKind::LightClosed(road) => Self::LIGHT_CLOSED_BASE + road_code(road),
            TelemetryEventKind::AlreadyOpen(road) => Self::ALREADY_OPEN_BASE + road_code(road),
            TelemetryEventKind::AlreadyClosed(road) => {
                Self::ALREADY_CLOSED_BASE + road_code(road)
            }
            TelemetryEventKind::BookkeepingSeeded(road) => Self::SEEDED_BASE + road_code(road),
            TelemetryEventKind::SnapshotIngested(road) => Self::SNAPSHOT_BASE + road_code(road),
            TelemetryEventKind::EmergencyPreempt(class) => Self::EMERGENCY_BASE + class.as_index(),
            TelemetryEventKind::DensitySwitch => Self::DENSITY_SWITCH_CODE,
            TelemetryEventKind::OverdueOverride => Self::OVERDUE_OVERRIDE_CODE,
            TelemetryEventKind::RequestProcessed(tag) => Self::REQUEST_BASE + tag.as_index(),
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant into a telemetry event, falling back to [`Custom`].
    ///
    /// [`Custom`]: TelemetryEventKind::Custom
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        let road_event = |base: u16, build: fn(RoadId) -> TelemetryEventKind| {
            road_from_code(code - base).map_or(TelemetryEventKind::Custom(code), build)
        };

        match code {
            Self::DENSITY_SWITCH_CODE => TelemetryEventKind::DensitySwitch,
            Self::OVERDUE_OVERRIDE_CODE => TelemetryEventKind::OverdueOverride,
            value if value < Self::LIGHT_CLOSED_BASE => {
                road_event(Self::LIGHT_OPENED_BASE, TelemetryEventKind::LightOpened)
            }
            value if value < Self::ALREADY_OPEN_BASE => {
                road_event(Self::LIGHT_CLOSED_BASE, TelemetryEventKind::LightClosed)
            }
            value if value < Self::ALREADY_CLOSED_BASE => {
                road_event(Self::ALREADY_OPEN_BASE, TelemetryEventKind::AlreadyOpen)
            }
            value if value < Self::SEEDED_BASE => {
                road_event(Self::ALREADY_CLOSED_BASE, TelemetryEventKind::AlreadyClosed)
            }
            value if value < Self::SNAPSHOT_BASE => {
                road_event(Self::SEEDED_BASE, TelemetryEventKind::BookkeepingSeeded)
            }
            value if value < Self::SNAPSHOT_BASE + 4 => {
                road_event(Self::SNAPSHOT_BASE, TelemetryEventKind::SnapshotIngested)
            }
            value if (Self::EMERGENCY_BASE..Self::DENSITY_SWITCH_CODE).contains(&value) => {
                EmergencyClass::from_index(value - Self::EMERGENCY_BASE)
                    .map_or(TelemetryEventKind::Custom(value), |class| {
                        TelemetryEventKind::EmergencyPreempt(class)
                    })
            }
            value if (Self::REQUEST_BASE..Self::REQUEST_END).contains(&value) => {
                RequestTag::from_index(value - Self::REQUEST_BASE)
                    .map_or(TelemetryEventKind::Custom(value), |tag| {
                        TelemetryEventKind::RequestProcessed(tag)
                    })
            }
            other => TelemetryEventKind::Custom(other),
        }
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    /// No additional metadata accompanies the event.
    None,
    /// Details describing a light transition.
    Light(LightTelemetry),
    /// Road chosen by a decision.
    Decision(DecisionTelemetry),
    /// Counts carried by an ingested snapshot.
    Snapshot(VehicleCounts),
    /// Queue metadata for a processed request.
    Request(RequestTelemetry),
}

impl TelemetryPayload {
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

/// Light transition payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LightTelemetry {
    pub road: RoadId,
    pub state: LightState,
    pub elapsed_since_previous: Option<Duration>,
}

/// Decision payload. `weight` is the demand score for density switches, the
/// priority vehicle count for preemption and the car count for overdue passes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DecisionTelemetry {
    pub road: RoadId,
    pub weight: u32,
    pub previous: Option<RoadId>,
}

impl DecisionTelemetry {
    #[must_use]
    pub const fn new(road: RoadId, weight: u32, previous: Option<RoadId>) -> Self {
        Self {
            road,
            weight,
            previous,
        }
    }
}

/// Processed request payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RequestTelemetry {
    pub queue_depth: u8,
    pub waited: Duration,
}

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 128;

/// Trait implemented by monotonic instant wrappers used for telemetry tracking.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    last_transition_at: Option<TInstant>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_transition_at: None,
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Id the next record will receive.
    #[must_use]
    pub const fn next_event_id(&self) -> EventId {
        self.next_event_id
    }

    /// Records a light transition and captures elapsed time since the previous one.
    pub fn record_light_change(
        &mut self,
        road: RoadId,
        state: LightState,
        timestamp: TInstant,
    ) -> EventId {
        let elapsed = self
            .last_transition_at
            .map(|previous| timestamp.saturating_duration_since(previous));
        self.last_transition_at = Some(timestamp);

        let payload = TelemetryPayload::Light(LightTelemetry {
            road,
            state,
            elapsed_since_previous: elapsed,
        });
        let event = match state {
            LightState::Open => TelemetryEventKind::LightOpened(road),
            LightState::Closed => TelemetryEventKind::LightClosed(road),
        };
        self.record(event, payload, timestamp)
    }

    /// Records a command that left the light unchanged.
    pub fn record_idempotent(
        &mut self,
        road: RoadId,
        state: LightState,
        timestamp: TInstant,
    ) -> EventId {
        let event = match state {
            LightState::Open => TelemetryEventKind::AlreadyOpen(road),
            LightState::Closed => TelemetryEventKind::AlreadyClosed(road),
        };
        self.record(event, TelemetryPayload::none(), timestamp)
    }

    pub fn record_snapshot(
        &mut self,
        road: RoadId,
        counts: VehicleCounts,
        timestamp: TInstant,
    ) -> EventId {
        self.record(
            TelemetryEventKind::SnapshotIngested(road),
            TelemetryPayload::Snapshot(counts),
            timestamp,
        )
    }

    pub fn record_seeded(&mut self, road: RoadId, timestamp: TInstant) -> EventId {
        self.record(
            TelemetryEventKind::BookkeepingSeeded(road),
            TelemetryPayload::none(),
            timestamp,
        )
    }

    /// Records the road chosen by a preemption, density switch or overdue pass.
    pub fn record_decision(
        &mut self,
        event: TelemetryEventKind,
        details: DecisionTelemetry,
        timestamp: TInstant,
    ) -> EventId {
        self.record(event, TelemetryPayload::Decision(details), timestamp)
    }

    /// Records a request drained from the decision queue.
    pub fn record_request(
        &mut self,
        tag: RequestTag,
        queue_depth: usize,
        requested_at: TInstant,
        timestamp: TInstant,
    ) -> EventId {
        let payload = TelemetryPayload::Request(RequestTelemetry {
            queue_depth: truncate_depth(queue_depth),
            waited: timestamp.saturating_duration_since(requested_at),
        });
        self.record(TelemetryEventKind::RequestProcessed(tag), payload, timestamp)
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_depth(depth: usize) -> u8 {
    u8::try_from(depth).unwrap_or(u8::MAX)
}

const fn road_code(road: RoadId) -> u16 {
    match road {
        RoadId::Road1 => 0,
        RoadId::Road2 => 1,
        RoadId::Road3 => 2,
        RoadId::Road4 => 3,
    }
}

fn road_from_code(code: u16) -> Option<RoadId> {
    RoadId::from_index(usize::from(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct MicrosInstant(u64);

    impl TelemetryInstant for MicrosInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_micros(self.0.saturating_sub(earlier.0))
        }
    }

    #[test]
    fn raw_codes_decode_to_the_same_event() {
        let fixtures = [
            TelemetryEventKind::LightOpened(RoadId::Road4),
            TelemetryEventKind::LightClosed(RoadId::Road1),
            TelemetryEventKind::AlreadyOpen(RoadId::Road2),
            TelemetryEventKind::AlreadyClosed(RoadId::Road3),
            TelemetryEventKind::BookkeepingSeeded(RoadId::Road2),
            TelemetryEventKind::SnapshotIngested(RoadId::Road4),
            TelemetryEventKind::EmergencyPreempt(EmergencyClass::Police),
            TelemetryEventKind::DensitySwitch,
            TelemetryEventKind::OverdueOverride,
            TelemetryEventKind::RequestProcessed(RequestTag::Configure),
        ];

        for event in fixtures {
            assert_eq!(TelemetryEventKind::from_raw(event.to_raw()), event);
        }
    }

    #[test]
    fn unknown_codes_fall_back_to_custom() {
        assert_eq!(
            TelemetryEventKind::from_raw(0x0023),
            TelemetryEventKind::Custom(0x0023)
        );
        assert_eq!(
            TelemetryEventKind::from_raw(0x0100),
            TelemetryEventKind::Custom(0x0100)
        );
    }

    #[test]
    fn records_elapsed_between_light_changes() {
        let mut recorder = TelemetryRecorder::<MicrosInstant>::new();

        let first = recorder.record_light_change(
            RoadId::Road1,
            LightState::Open,
            MicrosInstant(100),
        );
        assert_eq!(first, 0);
        match recorder.latest().map(|record| record.details) {
            Some(TelemetryPayload::Light(details)) => {
                assert_eq!(details.elapsed_since_previous, None);
            }
            other => panic!("expected light payload, got {other:?}"),
        }

        let second = recorder.record_light_change(
            RoadId::Road1,
            LightState::Closed,
            MicrosInstant(250),
        );
        assert_eq!(second, 1);
        let record = recorder.latest().copied().expect("record");
        assert_eq!(record.event, TelemetryEventKind::LightClosed(RoadId::Road1));
        match record.details {
            TelemetryPayload::Light(details) => {
                let elapsed = details.elapsed_since_previous.expect("missing elapsed");
                assert_eq!(elapsed.as_micros(), 150);
            }
            other => panic!("expected light payload, got {other:?}"),
        }
    }

    #[test]
    fn idempotent_commands_do_not_reset_transition_clock() {
        let mut recorder = TelemetryRecorder::<MicrosInstant>::new();
        recorder.record_light_change(RoadId::Road2, LightState::Open, MicrosInstant(10));
        recorder.record_idempotent(RoadId::Road2, LightState::Open, MicrosInstant(40));
        recorder.record_light_change(RoadId::Road2, LightState::Closed, MicrosInstant(70));

        match recorder.latest().map(|record| record.details) {
            Some(TelemetryPayload::Light(details)) => {
                assert_eq!(
                    details.elapsed_since_previous,
                    Some(Duration::from_micros(60))
                );
            }
            other => panic!("expected light payload, got {other:?}"),
        }
    }

    #[test]
    fn request_records_truncate_depth() {
        let mut recorder = TelemetryRecorder::<MicrosInstant>::new();
        recorder.record_request(RequestTag::Pulse, 300, MicrosInstant(90), MicrosInstant(500));

        let record = recorder.latest().copied().expect("record");
        assert_eq!(
            record.event,
            TelemetryEventKind::RequestProcessed(RequestTag::Pulse)
        );
        match record.details {
            TelemetryPayload::Request(details) => {
                assert_eq!(details.queue_depth, u8::MAX);
                assert_eq!(details.waited.as_micros(), 410);
            }
            other => panic!("expected request payload, got {other:?}"),
        }
    }

    #[test]
    fn ring_keeps_most_recent_records() {
        let mut recorder = TelemetryRecorder::<MicrosInstant, 4>::new();
        for step in 0..6_u64 {
            recorder.record_snapshot(RoadId::Road1, VehicleCounts::ZERO, MicrosInstant(step));
        }

        assert_eq!(recorder.len(), 4);
        let first = recorder.oldest_first().next().map(|record| record.id);
        assert_eq!(first, Some(2));
        assert_eq!(recorder.next_event_id(), 6);
    }
}
