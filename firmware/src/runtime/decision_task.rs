use super::{DECISION_QUEUE, Lights};
use crate::decisions::{DecisionEngine, FirmwareInstant, RequestConsumer};

/// Single consumer of the decision queue; every arbiter mutation happens here.
#[embassy_executor::task]
pub async fn run(mut engine: DecisionEngine<Lights>) -> ! {
    let mut consumer = RequestConsumer::new(DECISION_QUEUE.receiver());

    loop {
        let request = consumer.receive().await;
        let handled = engine.handle(request, &mut consumer, FirmwareInstant::now());
        defmt::trace!("decisions: handled {} request(s)", handled);
    }
}
