//! Signal head driver that renders the arbiter's light pattern on GPIO.

use intersection_core::display::{DisplaySink, LightStateMap};
use intersection_core::roads::{LightState, RoadId, road_by_id};

#[cfg(target_os = "none")]
use embassy_stm32::gpio::{Level, Output};

/// Hardware seam for the per-road green/red lamp pair.
pub trait SignalHeads {
    fn drive(&mut self, road: RoadId, state: LightState);
}

/// Display sink that only touches the lamps whose state changed.
pub struct LightDriver<H> {
    heads: H,
    shown: LightStateMap,
}

impl<H> LightDriver<H>
where
    H: SignalHeads,
{
    /// Wraps `heads` and forces every road red.
    pub fn new(mut heads: H) -> Self {
        let mut shown = LightStateMap::new();
        for road in RoadId::ALL {
            heads.drive(road, LightState::Closed);
            shown.insert(road, LightState::Closed);
        }
        Self { heads, shown }
    }

    pub fn shown(&self) -> &LightStateMap {
        &self.shown
    }

    pub fn heads(&self) -> &H {
        &self.heads
    }
}

impl<H> DisplaySink for LightDriver<H>
where
    H: SignalHeads,
{
    fn show(&mut self, lights: &LightStateMap) {
        // Close before open so two roads never show green together.
        for pass in [LightState::Closed, LightState::Open] {
            for (road, state) in lights.iter().filter(|(_, state)| *state == pass) {
                if self.shown.get(road) == Some(state) {
                    continue;
                }
                self.heads.drive(road, state);
                self.shown.insert(road, state);
                log_light_drive(road, state);
            }
        }
    }
}

/// Push-pull outputs for each road's green and red lamps.
#[cfg(target_os = "none")]
pub struct GpioSignalHeads<'d> {
    green: [Output<'d>; intersection_core::roads::ROAD_COUNT],
    red: [Output<'d>; intersection_core::roads::ROAD_COUNT],
}

#[cfg(target_os = "none")]
impl<'d> GpioSignalHeads<'d> {
    pub fn new(
        green: [Output<'d>; intersection_core::roads::ROAD_COUNT],
        red: [Output<'d>; intersection_core::roads::ROAD_COUNT],
    ) -> Self {
        Self { green, red }
    }
}

#[cfg(target_os = "none")]
impl SignalHeads for GpioSignalHeads<'_> {
    fn drive(&mut self, road: RoadId, state: LightState) {
        let index = road.as_index();
        let (green, red) = match state {
            LightState::Open => (Level::High, Level::Low),
            LightState::Closed => (Level::Low, Level::High),
        };
        self.red[index].set_level(red);
        self.green[index].set_level(green);
    }
}

#[cfg(target_os = "none")]
fn log_light_drive(road: RoadId, state: LightState) {
    let line = road_by_id(road);
    defmt::info!(
        "lights:{} {} green={} red={}",
        line.label,
        state.label(),
        line.green_pin,
        line.red_pin
    );
}

#[cfg(not(target_os = "none"))]
fn log_light_drive(road: RoadId, state: LightState) {
    let line = road_by_id(road);
    println!(
        "lights:{} {} green={} red={}",
        line.label,
        state.label(),
        line.green_pin,
        line.red_pin
    );
}
