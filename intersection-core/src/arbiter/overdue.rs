//! Starvation guard run after every pulse tick.
//!
//! When any bookkept road has gone longer than the starvation threshold since
//! it was last designated, the sweep opens the eligible road with the most cars
//! waiting. At most one road is served per sweep, and the sweep neither checks
//! for priority vehicles nor honors the cooldown window.

use crate::display::DisplaySink;
use crate::roads::{Bookkeeping, RoadId};
use crate::telemetry::{DecisionTelemetry, TelemetryEventKind, TelemetryRecorder};

use super::{Arbiter, ArbiterInstant};

/// Outcome of one [`Arbiter::sweep`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SweepOutcome {
    /// No road exceeded the starvation threshold.
    Idle,
    /// `overdue` crossed the threshold; `opened` is the road given right of
    /// way, or `None` when no road had cars waiting long enough.
    Overdue {
        overdue: RoadId,
        opened: Option<RoadId>,
    },
}

impl<I, S> Arbiter<I, S>
where
    I: ArbiterInstant,
    S: DisplaySink,
{
    /// Serves a starving road if any bookkept road is past the threshold.
    pub fn sweep<const N: usize>(
        &mut self,
        now: I,
        telemetry: &mut TelemetryRecorder<I, N>,
    ) -> SweepOutcome {
        let threshold = self.config.starvation_threshold;
        let registry = &self.registry;
        let overdue = registry.order().iter().find(|&id| match registry.bookkeeping(id) {
            Bookkeeping::Found(entry) => now >= entry.recorded_at + threshold,
            Bookkeeping::Missing => false,
        });
        let Some(overdue) = overdue else {
            return SweepOutcome::Idle;
        };

        let Some((road, cars)) = self.overdue_candidate(now) else {
            return SweepOutcome::Overdue {
                overdue,
                opened: None,
            };
        };

        let previous = self.registry.open_road();
        self.transfer(road, now, telemetry);
        self.registry_mut().record_bookkeeping(road, now);
        telemetry.record_decision(
            TelemetryEventKind::OverdueOverride,
            DecisionTelemetry::new(road, u32::from(cars), previous),
            now,
        );

        SweepOutcome::Overdue {
            overdue,
            opened: Some(road),
        }
    }

    /// Bookkept road with the most cars that has waited at least the overdue
    /// minimum; the first listed wins ties.
    fn overdue_candidate(&self, now: I) -> Option<(RoadId, u16)> {
        let min_wait = self.config.overdue_min_wait;
        let mut best: Option<(RoadId, u16)> = None;

        for road in self.registry.roads() {
            let Some(recorded_at) = self.registry.bookkeeping(road.id).recorded_at() else {
                continue;
            };
            if now < recorded_at + min_wait {
                continue;
            }
            let cars = road.counts.map_or(0, |counts| counts.car);
            if cars == 0 {
                continue;
            }
            if best.is_none_or(|(_, top)| cars > top) {
                best = Some((road.id, cars));
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use core::ops::Add;
    use core::time::Duration;

    use super::*;
    use crate::config::ArbiterConfig;
    use crate::display::NoopDisplaySink;
    use crate::roads::{LightState, RoadOrder, Snapshot, VehicleCounts};
    use crate::telemetry::TelemetryInstant;

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

    fn arbiter_with(bookkeeping: &[(RoadId, u64)]) -> Arbiter<Secs, NoopDisplaySink> {
        let mut arbiter = Arbiter::new(RoadOrder::all(), ArbiterConfig::default(), NoopDisplaySink);
        for &(road, at) in bookkeeping {
            arbiter.registry_mut().record_bookkeeping(road, Secs(at));
        }
        arbiter
    }

    fn feed(arbiter: &mut Arbiter<Secs, NoopDisplaySink>, counts: &[(RoadId, u16)]) {
        for &(road, car) in counts {
            arbiter
                .registry_mut()
                .ingest(road, VehicleCounts::traffic(car, 0));
        }
    }

    #[test]
    fn sweep_is_idle_below_threshold() {
        let mut arbiter = arbiter_with(&[(RoadId::Road1, 0)]);
        let mut telemetry = TelemetryRecorder::<Secs>::new();
        feed(&mut arbiter, &[(RoadId::Road1, 5)]);

        assert_eq!(arbiter.sweep(Secs(119), &mut telemetry), SweepOutcome::Idle);
    }

    #[test]
    fn sweep_opens_road_with_most_cars() {
        let mut arbiter = arbiter_with(&[(RoadId::Road1, 0), (RoadId::Road2, 50), (RoadId::Road3, 125)]);
        let mut telemetry = TelemetryRecorder::<Secs>::new();
        feed(
            &mut arbiter,
            &[(RoadId::Road1, 2), (RoadId::Road2, 6), (RoadId::Road3, 9)],
        );

        let outcome = arbiter.sweep(Secs(130), &mut telemetry);
        assert_eq!(
            outcome,
            SweepOutcome::Overdue {
                overdue: RoadId::Road1,
                opened: Some(RoadId::Road2),
            }
        );
        assert_eq!(arbiter.registry().light(RoadId::Road2), LightState::Open);
        assert_eq!(
            arbiter.registry().bookkeeping(RoadId::Road2).recorded_at(),
            Some(Secs(130))
        );
    }

    #[test]
    fn sweep_without_waiting_cars_opens_nothing() {
        let mut arbiter = arbiter_with(&[(RoadId::Road1, 0)]);
        let mut telemetry = TelemetryRecorder::<Secs>::new();
        feed(&mut arbiter, &[(RoadId::Road1, 0)]);

        assert_eq!(
            arbiter.sweep(Secs(200), &mut telemetry),
            SweepOutcome::Overdue {
                overdue: RoadId::Road1,
                opened: None,
            }
        );
        assert_eq!(arbiter.registry().open_count(), 0);
    }

    #[test]
    fn sweep_refreshes_bookkeeping_of_open_road() {
        let mut arbiter = arbiter_with(&[(RoadId::Road4, 0)]);
        let mut telemetry = TelemetryRecorder::<Secs>::new();
        arbiter.tick(
            &[Snapshot::new(RoadId::Road4, VehicleCounts::traffic(3, 0))],
            Secs(10),
            &mut telemetry,
        );
        assert_eq!(arbiter.registry().light(RoadId::Road4), LightState::Open);

        let outcome = arbiter.sweep(Secs(130), &mut telemetry);
        assert_eq!(
            outcome,
            SweepOutcome::Overdue {
                overdue: RoadId::Road4,
                opened: Some(RoadId::Road4),
            }
        );
        assert_eq!(
            arbiter.registry().bookkeeping(RoadId::Road4).recorded_at(),
            Some(Secs(130))
        );
    }
}
