//! Shared status surface for the console.
//!
//! The firmware and emulator implement [`StatusProvider`] so the `status`
//! command can show live lights, counts and timers without duplicating
//! platform logic. [`StatusFormatter`] keeps the textual rendering consistent
//! across front-ends.

use core::fmt;
use core::time::Duration;

use heapless::Vec;

use crate::arbiter::{Arbiter, ArbiterInstant};
use crate::config::ArbiterConfig;
use crate::display::DisplaySink;
use crate::roads::{LightState, ROAD_COUNT, RoadId, VehicleCounts};

/// Sampled state for a single road.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoadStatus {
    pub road: RoadId,
    pub light: LightState,
    pub counts: Option<VehicleCounts>,
    /// Time since the light last turned green.
    pub since_opened: Option<Duration>,
    /// Age of the road's bookkeeping entry.
    pub since_designated: Option<Duration>,
}

impl RoadStatus {
    #[must_use]
    pub const fn closed(road: RoadId) -> Self {
        Self {
            road,
            light: LightState::Closed,
            counts: None,
            since_opened: None,
            since_designated: None,
        }
    }
}

/// Snapshot of status information surfaced by the console.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub roads: Vec<RoadStatus, ROAD_COUNT>,
    /// Time left before density switches resume after a preemption.
    pub cooldown_remaining: Option<Duration>,
    pub config: ArbiterConfig,
}

impl StatusSnapshot {
    /// Builds a snapshot with every road closed and nothing measured.
    #[must_use]
    pub fn unknown() -> Self {
        let mut roads = Vec::new();
        for id in RoadId::ALL {
            let _ = roads.push(RoadStatus::closed(id));
        }
        Self {
            roads,
            cooldown_remaining: None,
            config: ArbiterConfig::new(),
        }
    }

    /// Samples the arbiter's registry at `now`.
    pub fn capture<I, S>(arbiter: &Arbiter<I, S>, now: I) -> Self
    where
        I: ArbiterInstant,
        S: DisplaySink,
    {
        let registry = arbiter.registry();
        let mut roads = Vec::new();
        for road in registry.roads() {
            let _ = roads.push(RoadStatus {
                road: road.id,
                light: road.light,
                counts: road.counts,
                since_opened: road
                    .last_opened_at
                    .filter(|_| road.light.is_open())
                    .map(|at| now.saturating_duration_since(at)),
                since_designated: registry
                    .bookkeeping(road.id)
                    .recorded_at()
                    .map(|at| now.saturating_duration_since(at)),
            });
        }

        let config = *arbiter.config();
        let cooldown_remaining = arbiter.last_emergency_at().and_then(|at| {
            let ready_at = at + config.emergency_cooldown;
            (now < ready_at).then(|| ready_at.saturating_duration_since(now))
        });

        Self {
            roads,
            cooldown_remaining,
            config,
        }
    }

    /// Road shown green, if any.
    #[must_use]
    pub fn open_road(&self) -> Option<RoadId> {
        self.roads
            .iter()
            .find(|status| status.light.is_open())
            .map(|status| status.road)
    }
}

/// Platform hook that supplies live status information.
pub trait StatusProvider<Instant> {
    /// Returns a snapshot if the platform can currently provide one.
    fn snapshot(&mut self, now: Instant) -> Option<StatusSnapshot>;
}

/// Placeholder status provider that never reports snapshots.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStatusProvider;

impl<Instant> StatusProvider<Instant> for NoStatusProvider {
    fn snapshot(&mut self, _now: Instant) -> Option<StatusSnapshot> {
        None
    }
}

impl<I, S> StatusProvider<I> for Arbiter<I, S>
where
    I: ArbiterInstant,
    S: DisplaySink,
{
    fn snapshot(&mut self, now: I) -> Option<StatusSnapshot> {
        Some(StatusSnapshot::capture(self, now))
    }
}

/// Helper that renders a [`StatusSnapshot`] into human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a StatusSnapshot,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(snapshot: &'a StatusSnapshot) -> Self {
        Self { snapshot }
    }

    /// Writes the lights line (e.g. `lights road1=open road2=closed`).
    pub fn write_lights_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        writer.write_str("lights")?;
        for status in &self.snapshot.roads {
            write!(writer, " {}={}", status.road, status.light)?;
        }
        Ok(())
    }

    /// Number of per-road lines available through [`write_road_line`](Self::write_road_line).
    #[must_use]
    pub fn road_lines(&self) -> usize {
        self.snapshot.roads.len()
    }

    /// Writes one road line (e.g. `road2 demand=16 car=3 congestion=13 ... opened=+12.0s`).
    pub fn write_road_line<W: fmt::Write>(&self, index: usize, writer: &mut W) -> fmt::Result {
        let Some(status) = self.snapshot.roads.get(index) else {
            return Ok(());
        };

        write!(writer, "{}", status.road)?;
        match status.counts {
            Some(counts) => write!(
                writer,
                " demand={} ambulance={} firefighter={} police={} car={} congestion={}",
                counts.demand_score(),
                counts.ambulance,
                counts.firefighter,
                counts.police,
                counts.car,
                counts.congestion
            )?,
            None => writer.write_str(" demand=n/a")?,
        }

        writer.write_str(" opened=")?;
        write_duration(writer, status.since_opened)?;
        writer.write_str(" designated=")?;
        write_duration(writer, status.since_designated)
    }

    /// Writes the timers line (e.g. `timers cooldown=+4.2s`).
    pub fn write_timers_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        writer.write_str("timers cooldown=")?;
        match self.snapshot.cooldown_remaining {
            Some(remaining) => write_duration(writer, Some(remaining)),
            None => writer.write_str("clear"),
        }
    }

    /// Writes the config line (e.g. `config min-green=10s cooldown=10s ...`).
    pub fn write_config_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let config = &self.snapshot.config;
        writer.write_str("config min-green=")?;
        write_window(writer, config.min_green)?;
        writer.write_str(" cooldown=")?;
        write_window(writer, config.emergency_cooldown)?;
        writer.write_str(" starvation=")?;
        write_window(writer, config.starvation_threshold)?;
        writer.write_str(" overdue-wait=")?;
        write_window(writer, config.overdue_min_wait)
    }
}

fn write_duration<W: fmt::Write>(writer: &mut W, duration: Option<Duration>) -> fmt::Result {
    match duration {
        None => writer.write_str("n/a"),
        Some(value) if value >= Duration::from_secs(1) => {
            let millis = value.as_millis();
            let seconds = millis / 1_000;
            let tenths = (millis % 1_000) / 100;
            write!(writer, "+{seconds}.{tenths}s")
        }
        Some(value) if value >= Duration::from_millis(1) => {
            write!(writer, "+{}ms", value.as_millis())
        }
        Some(value) => write!(writer, "+{}us", value.as_micros()),
    }
}

/// Renders a window in the same units the console accepts.
fn write_window<W: fmt::Write>(writer: &mut W, window: Duration) -> fmt::Result {
    let millis = window.as_millis();
    if millis % 1_000 == 0 {
        write!(writer, "{}s", millis / 1_000)
    } else {
        write!(writer, "{millis}ms")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(snapshot: &StatusSnapshot) -> heapless::Vec<heapless::String<160>, 8> {
        let formatter = StatusFormatter::new(snapshot);
        let mut lines = heapless::Vec::new();

        let mut line = heapless::String::new();
        formatter.write_lights_line(&mut line).expect("lights");
        let _ = lines.push(line);

        for index in 0..formatter.road_lines() {
            let mut line = heapless::String::new();
            formatter.write_road_line(index, &mut line).expect("road");
            let _ = lines.push(line);
        }

        let mut line = heapless::String::new();
        formatter.write_timers_line(&mut line).expect("timers");
        let _ = lines.push(line);

        let mut line = heapless::String::new();
        formatter.write_config_line(&mut line).expect("config");
        let _ = lines.push(line);
        lines
    }

    #[test]
    fn unknown_snapshot_renders_all_closed() {
        let lines = render(&StatusSnapshot::unknown());
        assert_eq!(
            lines[0].as_str(),
            "lights road1=closed road2=closed road3=closed road4=closed"
        );
        assert_eq!(lines[1].as_str(), "road1 demand=n/a opened=n/a designated=n/a");
        assert_eq!(lines[5].as_str(), "timers cooldown=clear");
        assert_eq!(
            lines[6].as_str(),
            "config min-green=10s cooldown=10s starvation=120s overdue-wait=10s"
        );
    }

    #[test]
    fn road_line_includes_counts_and_timers() {
        let mut snapshot = StatusSnapshot::unknown();
        snapshot.roads[1] = RoadStatus {
            road: RoadId::Road2,
            light: LightState::Open,
            counts: Some(VehicleCounts::traffic(3, 13)),
            since_opened: Some(Duration::from_millis(12_345)),
            since_designated: Some(Duration::from_millis(250)),
        };
        snapshot.cooldown_remaining = Some(Duration::from_millis(4_200));

        let lines = render(&snapshot);
        assert_eq!(
            lines[0].as_str(),
            "lights road1=closed road2=open road3=closed road4=closed"
        );
        assert_eq!(
            lines[2].as_str(),
            "road2 demand=16 ambulance=0 firefighter=0 police=0 car=3 congestion=13 opened=+12.3s designated=+250ms"
        );
        assert_eq!(lines[5].as_str(), "timers cooldown=+4.2s");
        assert_eq!(snapshot.open_road(), Some(RoadId::Road2));
    }

    #[test]
    fn fractional_windows_render_in_millis() {
        let mut snapshot = StatusSnapshot::unknown();
        snapshot.config.min_green = Duration::from_millis(1_500);
        let mut line = heapless::String::<96>::new();
        StatusFormatter::new(&snapshot)
            .write_config_line(&mut line)
            .expect("config");
        assert!(line.starts_with("config min-green=1500ms "));
    }
}
