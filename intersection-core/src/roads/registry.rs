//! Per-road light state and bookkeeping storage.

use crate::display::LightStateMap;
use crate::telemetry::{TelemetryInstant, TelemetryRecorder};

use super::{LightState, ROAD_COUNT, RoadId, RoadOrder, VehicleCounts};

/// Live state for a single configured road.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Road<I> {
    pub id: RoadId,
    pub light: LightState,
    pub last_opened_at: Option<I>,
    pub counts: Option<VehicleCounts>,
}

impl<I> Road<I> {
    const fn closed(id: RoadId) -> Self {
        Self {
            id,
            light: LightState::Closed,
            last_opened_at: None,
            counts: None,
        }
    }

    /// Demand for this road, treating a missing snapshot as zero.
    #[must_use]
    pub fn demand(&self) -> u32 {
        self.counts.map_or(0, |counts| counts.demand_score())
    }
}

/// Timestamp recorded when a road was last designated by a decision.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BookkeepingEntry<I> {
    pub recorded_at: I,
    pub designated: RoadId,
}

/// Result of a bookkeeping lookup.
///
/// A missing entry is a distinct outcome rather than a zero timestamp; the
/// density path seeds the entry and defers instead of treating the road as
/// ancient.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Bookkeeping<I> {
    Found(BookkeepingEntry<I>),
    Missing,
}

impl<I: Copy> Bookkeeping<I> {
    #[must_use]
    pub const fn is_found(&self) -> bool {
        matches!(self, Bookkeeping::Found(_))
    }

    #[must_use]
    pub fn recorded_at(&self) -> Option<I> {
        match self {
            Bookkeeping::Found(entry) => Some(entry.recorded_at),
            Bookkeeping::Missing => None,
        }
    }
}

/// Stores the light, snapshot and bookkeeping state of every configured road.
///
/// Every road starts closed. Accessors take a [`RoadId`] and panic when the
/// road is not part of the configured [`RoadOrder`].
#[derive(Clone, Debug)]
pub struct RoadRegistry<I> {
    order: RoadOrder,
    roads: [Road<I>; ROAD_COUNT],
    bookkeeping: [Option<BookkeepingEntry<I>>; ROAD_COUNT],
}

impl<I> RoadRegistry<I>
where
    I: TelemetryInstant,
{
    /// Creates a registry with every configured road closed.
    #[must_use]
    pub fn new(order: RoadOrder) -> Self {
        Self {
            order,
            roads: RoadId::ALL.map(Road::closed),
            bookkeeping: [None; ROAD_COUNT],
        }
    }

    #[must_use]
    pub fn order(&self) -> &RoadOrder {
        &self.order
    }

    /// Returns the state of the given road.
    ///
    /// # Panics
    ///
    /// Panics when `id` is not a configured road.
    #[must_use]
    pub fn road(&self, id: RoadId) -> &Road<I> {
        self.assert_configured(id);
        &self.roads[id.as_index()]
    }

    fn road_mut(&mut self, id: RoadId) -> &mut Road<I> {
        self.assert_configured(id);
        &mut self.roads[id.as_index()]
    }

    fn assert_configured(&self, id: RoadId) {
        assert!(self.order.contains(id), "road {id} is not configured");
    }

    /// Iterates configured roads in order.
    pub fn roads(&self) -> impl Iterator<Item = &Road<I>> + '_ {
        self.order.iter().map(|id| &self.roads[id.as_index()])
    }

    #[must_use]
    pub fn light(&self, id: RoadId) -> LightState {
        self.road(id).light
    }

    /// Road currently shown green, if any.
    #[must_use]
    pub fn open_road(&self) -> Option<RoadId> {
        self.roads()
            .find(|road| road.light.is_open())
            .map(|road| road.id)
    }

    /// Number of roads currently shown green.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.roads().filter(|road| road.light.is_open()).count()
    }

    /// Stores the latest snapshot for a road, overwriting the previous one.
    ///
    /// # Panics
    ///
    /// Panics when `id` is not a configured road.
    pub fn ingest(&mut self, id: RoadId, counts: VehicleCounts) {
        self.road_mut(id).counts = Some(counts);
    }

    /// Returns `true` once any configured road has reported counts.
    #[must_use]
    pub fn has_counts(&self) -> bool {
        self.roads().any(|road| road.counts.is_some())
    }

    /// Drives a road green.
    ///
    /// Returns `true` when the light changed; opening an open road is a no-op
    /// that is still recorded in telemetry.
    ///
    /// # Panics
    ///
    /// Panics when `id` is not a configured road.
    pub fn open<const N: usize>(
        &mut self,
        id: RoadId,
        now: I,
        telemetry: &mut TelemetryRecorder<I, N>,
    ) -> bool {
        let road = self.road_mut(id);
        if road.light.is_open() {
            telemetry.record_idempotent(id, LightState::Open, now);
            return false;
        }

        road.light = LightState::Open;
        road.last_opened_at = Some(now);
        telemetry.record_light_change(id, LightState::Open, now);
        true
    }

    /// Drives a road red.
    ///
    /// Returns `true` when the light changed.
    ///
    /// # Panics
    ///
    /// Panics when `id` is not a configured road.
    pub fn close<const N: usize>(
        &mut self,
        id: RoadId,
        now: I,
        telemetry: &mut TelemetryRecorder<I, N>,
    ) -> bool {
        let road = self.road_mut(id);
        if !road.light.is_open() {
            telemetry.record_idempotent(id, LightState::Closed, now);
            return false;
        }

        road.light = LightState::Closed;
        telemetry.record_light_change(id, LightState::Closed, now);
        true
    }

    /// Closes every other bookkept or open road, then opens `target`.
    ///
    /// Returns `true` when any light changed.
    pub fn transfer_to<const N: usize>(
        &mut self,
        target: RoadId,
        now: I,
        telemetry: &mut TelemetryRecorder<I, N>,
    ) -> bool {
        let mut changed = false;
        for index in 0..self.order.len() {
            let id = self.order.as_slice()[index];
            if id == target {
                continue;
            }
            let bookkept = self.bookkeeping[id.as_index()].is_some();
            if bookkept || self.roads[id.as_index()].light.is_open() {
                changed |= self.close(id, now, telemetry);
            }
        }

        changed |= self.open(target, now, telemetry);
        changed
    }

    #[must_use]
    pub fn bookkeeping(&self, id: RoadId) -> Bookkeeping<I> {
        self.assert_configured(id);
        match self.bookkeeping[id.as_index()] {
            Some(entry) => Bookkeeping::Found(entry),
            None => Bookkeeping::Missing,
        }
    }

    /// Records `now` as the moment `id` was designated.
    pub fn record_bookkeeping(&mut self, id: RoadId, now: I) {
        self.assert_configured(id);
        self.bookkeeping[id.as_index()] = Some(BookkeepingEntry {
            recorded_at: now,
            designated: id,
        });
    }

    /// Snapshot of every configured road's light.
    #[must_use]
    pub fn light_map(&self) -> LightStateMap {
        let mut map = LightStateMap::new();
        for road in self.roads() {
            map.insert(road.id, road.light);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TelemetryEventKind;
    use core::time::Duration;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct Secs(u64);

    impl TelemetryInstant for Secs {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_secs(self.0.saturating_sub(earlier.0))
        }
    }

    fn registry() -> RoadRegistry<Secs> {
        RoadRegistry::new(RoadOrder::all())
    }

    #[test]
    fn every_road_starts_closed() {
        let registry = registry();
        assert_eq!(registry.open_count(), 0);
        for id in RoadId::ALL {
            assert_eq!(registry.light(id), LightState::Closed);
            assert_eq!(registry.bookkeeping(id), Bookkeeping::Missing);
        }
    }

    #[test]
    fn open_and_close_are_idempotent() {
        let mut registry = registry();
        let mut telemetry = TelemetryRecorder::<Secs>::new();

        assert!(registry.open(RoadId::Road2, Secs(5), &mut telemetry));
        assert!(!registry.open(RoadId::Road2, Secs(6), &mut telemetry));
        assert_eq!(
            telemetry.latest().map(|record| record.event),
            Some(TelemetryEventKind::AlreadyOpen(RoadId::Road2))
        );
        assert_eq!(registry.road(RoadId::Road2).last_opened_at, Some(Secs(5)));

        assert!(registry.close(RoadId::Road2, Secs(7), &mut telemetry));
        assert!(!registry.close(RoadId::Road2, Secs(8), &mut telemetry));
        assert_eq!(registry.light(RoadId::Road2), LightState::Closed);
    }

    #[test]
    fn transfer_leaves_exactly_one_road_open() {
        let mut registry = registry();
        let mut telemetry = TelemetryRecorder::<Secs>::new();

        registry.transfer_to(RoadId::Road1, Secs(1), &mut telemetry);
        registry.record_bookkeeping(RoadId::Road1, Secs(1));
        registry.transfer_to(RoadId::Road4, Secs(2), &mut telemetry);

        assert_eq!(registry.open_count(), 1);
        assert_eq!(registry.open_road(), Some(RoadId::Road4));
        assert!(!registry.transfer_to(RoadId::Road4, Secs(3), &mut telemetry));
    }

    #[test]
    fn light_map_follows_configured_order() {
        let order = RoadOrder::from_slice(&[RoadId::Road4, RoadId::Road2]).expect("order");
        let registry = RoadRegistry::<Secs>::new(order);
        let map = registry.light_map();
        let ids: heapless::Vec<RoadId, ROAD_COUNT> = map.iter().map(|(id, _)| id).collect();
        assert_eq!(ids.as_slice(), [RoadId::Road4, RoadId::Road2]);
    }

    #[test]
    #[should_panic(expected = "not configured")]
    fn unconfigured_road_access_panics() {
        let order = RoadOrder::from_slice(&[RoadId::Road1]).expect("order");
        let mut registry = RoadRegistry::<Secs>::new(order);
        registry.ingest(RoadId::Road3, VehicleCounts::ZERO);
    }
}
