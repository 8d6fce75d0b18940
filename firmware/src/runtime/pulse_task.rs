use embassy_time::Ticker;
use intersection_core::config::CadenceConfig;
use intersection_core::scheduler::{RequestEnqueueError, RequestScheduler};

use super::DECISION_QUEUE;
use crate::decisions::{FirmwareInstant, RequestProducer, core_duration_to_embassy};

#[embassy_executor::task]
pub async fn run() -> ! {
    let cadence = CadenceConfig::new();
    let mut ticker = Ticker::every(core_duration_to_embassy(cadence.pulse_interval));
    let mut scheduler = RequestScheduler::new(RequestProducer::new(DECISION_QUEUE.sender()));
    let mut missed: u32 = 0;

    loop {
        ticker.next().await;
        match scheduler.pulse(FirmwareInstant::now()) {
            Ok(()) if missed > 0 => {
                defmt::warn!("pulse: queue drained after {} skipped pulse(s)", missed);
                missed = 0;
            }
            Ok(()) => {}
            Err(RequestEnqueueError::QueueFull) => missed = missed.saturating_add(1),
            Err(RequestEnqueueError::Disconnected | RequestEnqueueError::Other(_)) => {
                defmt::error!("pulse: decision queue unavailable");
            }
        }
    }
}
