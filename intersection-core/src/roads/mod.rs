//! Road catalog and per-road vehicle snapshots shared by firmware and host targets.
//!
//! Roads are identified by a closed enum so every lookup is a fixed index into
//! pre-allocated storage. The configured scan order lives separately in
//! [`RoadOrder`], because tie-breaks depend on the order an installation lists
//! its roads rather than on the enum declaration order.

use core::fmt;

use heapless::Vec;

pub mod registry;

pub use registry::{Bookkeeping, BookkeepingEntry, Road, RoadRegistry};

/// Number of roads the controller can arbitrate between.
pub const ROAD_COUNT: usize = 4;

/// Identifier for each road approaching the intersection.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RoadId {
    Road1,
    Road2,
    Road3,
    Road4,
}

impl RoadId {
    /// Every road identifier in declaration order.
    pub const ALL: [RoadId; ROAD_COUNT] = [
        RoadId::Road1,
        RoadId::Road2,
        RoadId::Road3,
        RoadId::Road4,
    ];

    /// Deterministic index for lookups into [`ALL_ROADS`].
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            RoadId::Road1 => 0,
            RoadId::Road2 => 1,
            RoadId::Road3 => 2,
            RoadId::Road4 => 3,
        }
    }

    /// Attempts to construct a [`RoadId`] from a raw index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(RoadId::Road1),
            1 => Some(RoadId::Road2),
            2 => Some(RoadId::Road3),
            3 => Some(RoadId::Road4),
            _ => None,
        }
    }

    /// Lower-case keyword used by the operator console and feed protocol.
    #[must_use]
    pub const fn name(self) -> &'static str {
        road_by_id(self).name
    }

    /// Looks a road up by its keyword (case insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        ALL_ROADS
            .iter()
            .find(|line| line.name.eq_ignore_ascii_case(name))
            .map(|line| line.id)
    }
}

impl fmt::Display for RoadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Metadata describing how a road's signal head is wired.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RoadLine {
    pub id: RoadId,
    pub name: &'static str,
    pub label: &'static str,
    pub green_pin: &'static str,
    pub red_pin: &'static str,
}

impl RoadLine {
    pub const fn new(
        id: RoadId,
        name: &'static str,
        label: &'static str,
        green_pin: &'static str,
        red_pin: &'static str,
    ) -> Self {
        Self {
            id,
            name,
            label,
            green_pin,
            red_pin,
        }
    }
}

/// Compile-time catalog of every road.
pub const ALL_ROADS: [RoadLine; ROAD_COUNT] = [
    RoadLine::new(RoadId::Road1, "road1", "Road1", "PA0", "PA1"),
    RoadLine::new(RoadId::Road2, "road2", "Road2", "PA6", "PA7"),
    RoadLine::new(RoadId::Road3, "road3", "Road3", "PB3", "PB4"),
    RoadLine::new(RoadId::Road4, "road4", "Road4", "PB5", "PB6"),
];

/// Retrieve road metadata by identifier.
#[must_use]
pub const fn road_by_id(id: RoadId) -> RoadLine {
    ALL_ROADS[id.as_index()]
}

/// Signal shown to a road.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum LightState {
    Open,
    #[default]
    Closed,
}

impl LightState {
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, LightState::Open)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            LightState::Open => "open",
            LightState::Closed => "closed",
        }
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Priority vehicle classes, highest priority first.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EmergencyClass {
    Ambulance,
    Firefighter,
    Police,
}

impl EmergencyClass {
    /// Tiers scanned during emergency preemption, in priority order.
    pub const PRIORITY: [EmergencyClass; 3] = [
        EmergencyClass::Ambulance,
        EmergencyClass::Firefighter,
        EmergencyClass::Police,
    ];

    #[must_use]
    pub const fn as_index(self) -> u16 {
        match self {
            EmergencyClass::Ambulance => 0,
            EmergencyClass::Firefighter => 1,
            EmergencyClass::Police => 2,
        }
    }

    #[must_use]
    pub const fn from_index(index: u16) -> Option<Self> {
        match index {
            0 => Some(EmergencyClass::Ambulance),
            1 => Some(EmergencyClass::Firefighter),
            2 => Some(EmergencyClass::Police),
            _ => None,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            EmergencyClass::Ambulance => "ambulance",
            EmergencyClass::Firefighter => "firefighter",
            EmergencyClass::Police => "police",
        }
    }
}

impl fmt::Display for EmergencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Latest per-class counts reported by a road's perception feed.
///
/// `congestion` is a weighted density score rather than a raw count.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct VehicleCounts {
    pub ambulance: u16,
    pub firefighter: u16,
    pub police: u16,
    pub car: u16,
    pub congestion: u16,
}

impl VehicleCounts {
    pub const ZERO: VehicleCounts = VehicleCounts::new(0, 0, 0, 0, 0);

    pub const fn new(
        ambulance: u16,
        firefighter: u16,
        police: u16,
        car: u16,
        congestion: u16,
    ) -> Self {
        Self {
            ambulance,
            firefighter,
            police,
            car,
            congestion,
        }
    }

    /// Counts with only cars and a congestion score.
    #[must_use]
    pub const fn traffic(car: u16, congestion: u16) -> Self {
        Self::new(0, 0, 0, car, congestion)
    }

    /// Sum of every field, used to rank roads during density arbitration.
    #[must_use]
    pub const fn demand_score(&self) -> u32 {
        self.ambulance as u32
            + self.firefighter as u32
            + self.police as u32
            + self.car as u32
            + self.congestion as u32
    }

    /// Number of vehicles of the given priority class.
    #[must_use]
    pub const fn emergency_count(&self, class: EmergencyClass) -> u16 {
        match class {
            EmergencyClass::Ambulance => self.ambulance,
            EmergencyClass::Firefighter => self.firefighter,
            EmergencyClass::Police => self.police,
        }
    }

    /// Returns `true` when any priority vehicle is present.
    #[must_use]
    pub const fn has_emergency(&self) -> bool {
        self.ambulance > 0 || self.firefighter > 0 || self.police > 0
    }
}

/// A snapshot delivered for one road.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    pub road: RoadId,
    pub counts: VehicleCounts,
}

impl Snapshot {
    #[must_use]
    pub const fn new(road: RoadId, counts: VehicleCounts) -> Self {
        Self { road, counts }
    }
}

/// Errors raised while building a [`RoadOrder`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RoadOrderError {
    /// The same road was listed twice.
    Duplicate(RoadId),
    /// No road was configured.
    Empty,
}

impl fmt::Display for RoadOrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoadOrderError::Duplicate(road) => write!(f, "road {road} listed twice"),
            RoadOrderError::Empty => f.write_str("no roads configured"),
        }
    }
}

/// Ordered, duplicate-free set of configured roads.
///
/// The order is significant: emergency tiers and density ties resolve to the
/// road listed first.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoadOrder {
    roads: Vec<RoadId, ROAD_COUNT>,
}

impl RoadOrder {
    /// Every road in declaration order.
    #[must_use]
    pub fn all() -> Self {
        let mut roads = Vec::new();
        for id in RoadId::ALL {
            let _ = roads.push(id);
        }
        Self { roads }
    }

    /// Builds an order from the provided slice.
    pub fn from_slice(ids: &[RoadId]) -> Result<Self, RoadOrderError> {
        if ids.is_empty() {
            return Err(RoadOrderError::Empty);
        }

        let mut roads: Vec<RoadId, ROAD_COUNT> = Vec::new();
        for &id in ids {
            if roads.contains(&id) {
                return Err(RoadOrderError::Duplicate(id));
            }
            // Four distinct ids always fit.
            let _ = roads.push(id);
        }

        Ok(Self { roads })
    }

    /// Returns `true` when the road is configured.
    #[must_use]
    pub fn contains(&self, id: RoadId) -> bool {
        self.roads.contains(&id)
    }

    /// Position of the road in the configured order.
    #[must_use]
    pub fn position(&self, id: RoadId) -> Option<usize> {
        self.roads.iter().position(|candidate| *candidate == id)
    }

    /// Iterates the configured roads in order.
    pub fn iter(&self) -> impl Iterator<Item = RoadId> + '_ {
        self.roads.iter().copied()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[RoadId] {
        &self.roads
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.roads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roads.is_empty()
    }
}

impl Default for RoadOrder {
    fn default() -> Self {
        Self::all()
    }
}
