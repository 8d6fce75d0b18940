use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_sync::channel::Channel;
use intersection_core::config::ArbiterConfig;
use intersection_core::roads::RoadOrder;
use static_cell::StaticCell;

use crate::decisions::{DecisionEngine, DecisionQueue};
use crate::lights::{GpioSignalHeads, LightDriver};
use crate::usb;

mod decision_task;
mod pulse_task;
mod usb_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

pub(super) type Lights = LightDriver<GpioSignalHeads<'static>>;

pub(super) static DECISION_QUEUE: DecisionQueue = Channel::new();
pub(super) static USB_STORAGE: StaticCell<usb::UsbDeviceStorage> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA6,
        PA7,
        PB3,
        PB4,
        PB5,
        PB6,
        USB,
        PA11,
        PA12,
        ..
    } = hal::init(config);

    // Heads power up red.
    let heads = GpioSignalHeads::new(
        [
            Output::new(PA0, Level::Low, Speed::Low),
            Output::new(PA6, Level::Low, Speed::Low),
            Output::new(PB3, Level::Low, Speed::Low),
            Output::new(PB5, Level::Low, Speed::Low),
        ],
        [
            Output::new(PA1, Level::High, Speed::Low),
            Output::new(PA7, Level::High, Speed::Low),
            Output::new(PB4, Level::High, Speed::Low),
            Output::new(PB6, Level::High, Speed::Low),
        ],
    );
    let engine = DecisionEngine::new(RoadOrder::all(), ArbiterConfig::new(), LightDriver::new(heads));

    defmt::info!("runtime: controller ready");

    spawner.spawn(defmt::unwrap!(decision_task::run(engine)));
    spawner.spawn(defmt::unwrap!(pulse_task::run()));
    spawner.spawn(defmt::unwrap!(usb_task::run(USB, PA12, PA11)));

    core::future::pending::<()>().await;
}
