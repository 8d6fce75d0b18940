//! Right-of-way arbitration.
//!
//! [`Arbiter::tick`] folds a batch of snapshots into the registry and then
//! decides, in priority order:
//!
//! 1. Emergency preemption, scanning ambulance, firefighter and police tiers
//!    across the configured road order.
//! 2. A density switch to the road with the highest demand, gated by the
//!    minimum green window and the post-emergency cooldown.
//!
//! The overdue sweep lives in [`overdue`] and runs after each pulse tick.

use core::ops::Add;
use core::time::Duration;

use crate::config::ArbiterConfig;
use crate::display::DisplaySink;
use crate::roads::{
    Bookkeeping, EmergencyClass, RoadId, RoadOrder, RoadRegistry, Snapshot,
};
use crate::telemetry::{DecisionTelemetry, TelemetryEventKind, TelemetryInstant, TelemetryRecorder};

pub mod overdue;

pub use overdue::SweepOutcome;

/// Instants the arbiter can compare and offset.
pub trait ArbiterInstant: TelemetryInstant + Ord + Add<Duration, Output = Self> {}

impl<T> ArbiterInstant for T where T: TelemetryInstant + Ord + Add<Duration, Output = T> {}

/// Why a tick left the lights unchanged.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HoldReason<I> {
    /// No road has reported counts yet.
    NoSnapshots,
    /// The density winner is already open.
    AlreadyOpen(RoadId),
    /// The density winner had no bookkeeping; it was seeded with the tick time.
    BookkeepingSeeded(RoadId),
    /// `road` was designated too recently.
    MinGreen { road: RoadId, ready_at: I },
    /// A preemption ended too recently.
    EmergencyCooldown { ready_at: I },
}

/// Outcome of one [`Arbiter::tick`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Decision<I> {
    /// A priority vehicle claimed `road`; `changed` is `false` when it was already open.
    EmergencyPreempt {
        road: RoadId,
        class: EmergencyClass,
        changed: bool,
    },
    /// `road` was opened because it had the highest demand.
    DensitySwitch { road: RoadId, demand: u32 },
    Hold(HoldReason<I>),
}

impl<I> Decision<I> {
    /// Road opened by this decision, if any light changed.
    #[must_use]
    pub const fn opened(&self) -> Option<RoadId> {
        match self {
            Decision::EmergencyPreempt {
                road,
                changed: true,
                ..
            }
            | Decision::DensitySwitch { road, .. } => Some(*road),
            _ => None,
        }
    }
}

/// Owns the road registry and decides which road holds right of way.
pub struct Arbiter<I, S> {
    registry: RoadRegistry<I>,
    config: ArbiterConfig,
    sink: S,
    last_emergency_at: Option<I>,
}

impl<I, S> Arbiter<I, S>
where
    I: ArbiterInstant,
    S: DisplaySink,
{
    #[must_use]
    pub fn new(order: RoadOrder, config: ArbiterConfig, sink: S) -> Self {
        Self {
            registry: RoadRegistry::new(order),
            config,
            sink,
            last_emergency_at: None,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &RoadRegistry<I> {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    /// Replaces the timing windows. Callers validate the configuration first.
    pub fn set_config(&mut self, config: ArbiterConfig) {
        self.config = config;
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Time of the most recent preemption not yet followed by a density switch.
    #[must_use]
    pub fn last_emergency_at(&self) -> Option<I> {
        self.last_emergency_at
    }

    pub fn into_parts(self) -> (RoadRegistry<I>, S) {
        (self.registry, self.sink)
    }

    /// Ingests `batch` and makes at most one right-of-way decision.
    ///
    /// # Panics
    ///
    /// Panics when a snapshot names a road that is not configured.
    pub fn tick<const N: usize>(
        &mut self,
        batch: &[Snapshot],
        now: I,
        telemetry: &mut TelemetryRecorder<I, N>,
    ) -> Decision<I> {
        for snapshot in batch {
            self.registry.ingest(snapshot.road, snapshot.counts);
            telemetry.record_snapshot(snapshot.road, snapshot.counts, now);
        }

        if !self.registry.has_counts() {
            return Decision::Hold(HoldReason::NoSnapshots);
        }

        if let Some((road, class)) = self.emergency_candidate() {
            return self.preempt(road, class, now, telemetry);
        }

        self.density_switch(now, telemetry)
    }

    /// First road in configured order carrying the highest-priority class present.
    fn emergency_candidate(&self) -> Option<(RoadId, EmergencyClass)> {
        EmergencyClass::PRIORITY.into_iter().find_map(|class| {
            self.registry
                .roads()
                .find(|road| {
                    road.counts
                        .is_some_and(|counts| counts.emergency_count(class) > 0)
                })
                .map(|road| (road.id, class))
        })
    }

    /// Road with the highest demand; the first listed wins ties.
    fn density_candidate(&self) -> Option<(RoadId, u32)> {
        let mut best: Option<(RoadId, u32)> = None;
        for road in self.registry.roads() {
            let demand = road.demand();
            if best.is_none_or(|(_, top)| demand > top) {
                best = Some((road.id, demand));
            }
        }
        best
    }

    fn preempt<const N: usize>(
        &mut self,
        road: RoadId,
        class: EmergencyClass,
        now: I,
        telemetry: &mut TelemetryRecorder<I, N>,
    ) -> Decision<I> {
        let previous = self.registry.open_road();
        let was_open = self.registry.light(road).is_open();
        let changed = self.transfer(road, now, telemetry);
        if !was_open {
            self.registry.record_bookkeeping(road, now);
        }
        self.last_emergency_at = Some(now);

        let weight = self
            .registry
            .road(road)
            .counts
            .map_or(0, |counts| u32::from(counts.emergency_count(class)));
        telemetry.record_decision(
            TelemetryEventKind::EmergencyPreempt(class),
            DecisionTelemetry::new(road, weight, previous),
            now,
        );

        Decision::EmergencyPreempt {
            road,
            class,
            changed,
        }
    }

    fn density_switch<const N: usize>(
        &mut self,
        now: I,
        telemetry: &mut TelemetryRecorder<I, N>,
    ) -> Decision<I> {
        let Some((road, demand)) = self.density_candidate() else {
            return Decision::Hold(HoldReason::NoSnapshots);
        };

        let entry = match self.registry.bookkeeping(road) {
            Bookkeeping::Found(entry) => entry,
            Bookkeeping::Missing => {
                self.registry.record_bookkeeping(road, now);
                telemetry.record_seeded(road, now);
                return Decision::Hold(HoldReason::BookkeepingSeeded(road));
            }
        };

        if self.registry.light(road).is_open() {
            return Decision::Hold(HoldReason::AlreadyOpen(road));
        }

        let ready_at = entry.recorded_at + self.config.min_green;
        if now < ready_at {
            return Decision::Hold(HoldReason::MinGreen { road, ready_at });
        }

        let previous = self.registry.open_road();
        if let Some(incumbent) = previous
            && let Some(opened_at) = self.registry.road(incumbent).last_opened_at
        {
            let ready_at = opened_at + self.config.min_green;
            if now < ready_at {
                return Decision::Hold(HoldReason::MinGreen {
                    road: incumbent,
                    ready_at,
                });
            }
        }

        if let Some(last) = self.last_emergency_at {
            let ready_at = last + self.config.emergency_cooldown;
            if now < ready_at {
                return Decision::Hold(HoldReason::EmergencyCooldown { ready_at });
            }
        }

        self.transfer(road, now, telemetry);
        self.registry.record_bookkeeping(road, now);
        self.last_emergency_at = None;
        telemetry.record_decision(
            TelemetryEventKind::DensitySwitch,
            DecisionTelemetry::new(road, demand, previous),
            now,
        );

        Decision::DensitySwitch { road, demand }
    }

    /// Gives `target` right of way and notifies the sink when a light changed.
    pub(crate) fn transfer<const N: usize>(
        &mut self,
        target: RoadId,
        now: I,
        telemetry: &mut TelemetryRecorder<I, N>,
    ) -> bool {
        let changed = self.registry.transfer_to(target, now, telemetry);
        if changed {
            self.sink.show(&self.registry.light_map());
        }
        changed
    }

    pub(crate) fn registry_mut(&mut self) -> &mut RoadRegistry<I> {
        &mut self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::LightStateMap;
    use crate::roads::{LightState, VehicleCounts};

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct Secs(u64);

    impl Add<Duration> for Secs {
        type Output = Secs;

        fn add(self, rhs: Duration) -> Self::Output {
            Secs(self.0 + rhs.as_secs())
        }
    }

    impl TelemetryInstant for Secs {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_secs(self.0.saturating_sub(earlier.0))
        }
    }

    #[derive(Default)]
    struct CountingSink {
        updates: usize,
        last: LightStateMap,
    }

    impl DisplaySink for CountingSink {
        fn show(&mut self, lights: &LightStateMap) {
            self.updates += 1;
            self.last = lights.clone();
        }
    }

    fn arbiter() -> Arbiter<Secs, CountingSink> {
        Arbiter::new(
            RoadOrder::all(),
            ArbiterConfig::default(),
            CountingSink::default(),
        )
    }

    fn snap(road: RoadId, counts: VehicleCounts) -> Snapshot {
        Snapshot::new(road, counts)
    }

    #[test]
    fn tick_without_snapshots_holds() {
        let mut arbiter = arbiter();
        let mut telemetry = TelemetryRecorder::<Secs>::new();
        assert_eq!(
            arbiter.tick(&[], Secs(0), &mut telemetry),
            Decision::Hold(HoldReason::NoSnapshots)
        );
        assert_eq!(arbiter.sink().updates, 0);
    }

    #[test]
    fn ambulance_outranks_earlier_police() {
        let mut arbiter = arbiter();
        let mut telemetry = TelemetryRecorder::<Secs>::new();
        let batch = [
            snap(RoadId::Road1, VehicleCounts::new(0, 0, 1, 0, 0)),
            snap(RoadId::Road3, VehicleCounts::new(1, 0, 0, 0, 0)),
        ];

        let decision = arbiter.tick(&batch, Secs(5), &mut telemetry);
        assert_eq!(
            decision,
            Decision::EmergencyPreempt {
                road: RoadId::Road3,
                class: EmergencyClass::Ambulance,
                changed: true,
            }
        );
        assert_eq!(arbiter.last_emergency_at(), Some(Secs(5)));
        assert_eq!(arbiter.sink().last.open_road(), Some(RoadId::Road3));
    }

    #[test]
    fn repeated_preemption_of_open_road_skips_sink() {
        let mut arbiter = arbiter();
        let mut telemetry = TelemetryRecorder::<Secs>::new();
        let batch = [snap(RoadId::Road2, VehicleCounts::new(0, 1, 0, 0, 0))];

        arbiter.tick(&batch, Secs(1), &mut telemetry);
        let decision = arbiter.tick(&batch, Secs(2), &mut telemetry);

        assert!(matches!(
            decision,
            Decision::EmergencyPreempt { changed: false, .. }
        ));
        assert_eq!(arbiter.sink().updates, 1);
        assert_eq!(arbiter.last_emergency_at(), Some(Secs(2)));
        assert_eq!(
            arbiter.registry().bookkeeping(RoadId::Road2).recorded_at(),
            Some(Secs(1))
        );
    }

    #[test]
    fn first_density_tick_seeds_bookkeeping() {
        let mut arbiter = arbiter();
        let mut telemetry = TelemetryRecorder::<Secs>::new();
        let batch = [snap(RoadId::Road4, VehicleCounts::traffic(3, 7))];

        assert_eq!(
            arbiter.tick(&batch, Secs(0), &mut telemetry),
            Decision::Hold(HoldReason::BookkeepingSeeded(RoadId::Road4))
        );
        assert_eq!(
            arbiter.tick(&[], Secs(4), &mut telemetry),
            Decision::Hold(HoldReason::MinGreen {
                road: RoadId::Road4,
                ready_at: Secs(10),
            })
        );
        assert_eq!(
            arbiter.tick(&[], Secs(10), &mut telemetry),
            Decision::DensitySwitch {
                road: RoadId::Road4,
                demand: 10,
            }
        );
        assert_eq!(arbiter.registry().light(RoadId::Road4), LightState::Open);
        assert_eq!(
            arbiter.tick(&[], Secs(11), &mut telemetry),
            Decision::Hold(HoldReason::AlreadyOpen(RoadId::Road4))
        );
    }

    #[test]
    fn density_ties_resolve_to_first_configured_road() {
        let order = RoadOrder::from_slice(&[RoadId::Road3, RoadId::Road1]).expect("order");
        let mut arbiter: Arbiter<Secs, CountingSink> =
            Arbiter::new(order, ArbiterConfig::default(), CountingSink::default());
        let mut telemetry = TelemetryRecorder::<Secs>::new();
        let batch = [
            snap(RoadId::Road1, VehicleCounts::traffic(5, 0)),
            snap(RoadId::Road3, VehicleCounts::traffic(0, 5)),
        ];

        assert_eq!(
            arbiter.tick(&batch, Secs(0), &mut telemetry),
            Decision::Hold(HoldReason::BookkeepingSeeded(RoadId::Road3))
        );
    }

    #[test]
    fn cooldown_holds_density_after_preemption() {
        let config = ArbiterConfig {
            min_green: Duration::from_secs(2),
            ..ArbiterConfig::default()
        };
        let mut arbiter: Arbiter<Secs, CountingSink> =
            Arbiter::new(RoadOrder::all(), config, CountingSink::default());
        let mut telemetry = TelemetryRecorder::<Secs>::new();

        arbiter.tick(
            &[snap(RoadId::Road1, VehicleCounts::new(1, 0, 0, 0, 0))],
            Secs(100),
            &mut telemetry,
        );
        arbiter
            .registry_mut()
            .record_bookkeeping(RoadId::Road2, Secs(0));

        let batch = [
            snap(RoadId::Road1, VehicleCounts::ZERO),
            snap(RoadId::Road2, VehicleCounts::traffic(4, 4)),
        ];
        assert_eq!(
            arbiter.tick(&batch, Secs(105), &mut telemetry),
            Decision::Hold(HoldReason::EmergencyCooldown {
                ready_at: Secs(110)
            })
        );
        assert_eq!(
            arbiter.tick(&[], Secs(110), &mut telemetry),
            Decision::DensitySwitch {
                road: RoadId::Road2,
                demand: 8,
            }
        );
        assert_eq!(arbiter.last_emergency_at(), None);
    }

    #[test]
    fn incumbent_keeps_green_for_minimum_window() {
        let mut arbiter = arbiter();
        let mut telemetry = TelemetryRecorder::<Secs>::new();
        arbiter
            .registry_mut()
            .record_bookkeeping(RoadId::Road1, Secs(0));
        arbiter
            .registry_mut()
            .record_bookkeeping(RoadId::Road2, Secs(0));

        arbiter.tick(
            &[snap(RoadId::Road1, VehicleCounts::traffic(9, 0))],
            Secs(20),
            &mut telemetry,
        );
        assert_eq!(arbiter.registry().open_road(), Some(RoadId::Road1));

        let batch = [
            snap(RoadId::Road1, VehicleCounts::ZERO),
            snap(RoadId::Road2, VehicleCounts::traffic(9, 0)),
        ];
        assert_eq!(
            arbiter.tick(&batch, Secs(25), &mut telemetry),
            Decision::Hold(HoldReason::MinGreen {
                road: RoadId::Road1,
                ready_at: Secs(30),
            })
        );
        assert_eq!(
            arbiter.tick(&[], Secs(30), &mut telemetry).opened(),
            Some(RoadId::Road2)
        );
        assert_eq!(arbiter.registry().open_count(), 1);
        assert_eq!(arbiter.sink().updates, 2);
    }
}
