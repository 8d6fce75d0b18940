//! Display sink abstraction notified whenever the light pattern changes.

use heapless::Vec;

use crate::roads::{LightState, ROAD_COUNT, RoadId};

/// Light state of every configured road, in configured order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LightStateMap {
    entries: Vec<(RoadId, LightState), ROAD_COUNT>,
}

impl LightStateMap {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Inserts or replaces the state for `road`.
    pub fn insert(&mut self, road: RoadId, state: LightState) {
        if let Some(entry) = self.entries.iter_mut().find(|(id, _)| *id == road) {
            entry.1 = state;
            return;
        }
        // At most one entry per road, so the map never overflows.
        let _ = self.entries.push((road, state));
    }

    #[must_use]
    pub fn get(&self, road: RoadId) -> Option<LightState> {
        self.entries
            .iter()
            .find(|(id, _)| *id == road)
            .map(|(_, state)| *state)
    }

    /// Road shown green, if any.
    #[must_use]
    pub fn open_road(&self) -> Option<RoadId> {
        self.entries
            .iter()
            .find(|(_, state)| state.is_open())
            .map(|(id, _)| *id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RoadId, LightState)> + '_ {
        self.entries.iter().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Receives the full light pattern after every decision that changed a light.
pub trait DisplaySink {
    fn show(&mut self, lights: &LightStateMap);
}

impl<T: DisplaySink + ?Sized> DisplaySink for &mut T {
    fn show(&mut self, lights: &LightStateMap) {
        (**self).show(lights);
    }
}

/// Sink that discards every update.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopDisplaySink;

impl DisplaySink for NoopDisplaySink {
    fn show(&mut self, _lights: &LightStateMap) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_existing_entries() {
        let mut map = LightStateMap::new();
        map.insert(RoadId::Road1, LightState::Closed);
        map.insert(RoadId::Road2, LightState::Open);
        map.insert(RoadId::Road1, LightState::Open);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(RoadId::Road1), Some(LightState::Open));
        assert_eq!(map.get(RoadId::Road3), None);
        assert_eq!(map.open_road(), Some(RoadId::Road1));
    }
}
