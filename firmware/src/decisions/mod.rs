//! Decision queue plumbing between firmware tasks and `intersection-core`.

use core::ops::Add;
use core::time::Duration as CoreDuration;

use embassy_sync::channel::{Channel, Receiver, Sender, TryReceiveError, TrySendError};
use embassy_time::{Duration, Instant};
use intersection_core::arbiter::{Arbiter, Decision, SweepOutcome};
use intersection_core::config::ArbiterConfig;
use intersection_core::display::DisplaySink;
use intersection_core::roads::RoadOrder;
use intersection_core::scheduler::{
    DECISION_QUEUE_DEPTH, DecisionLoop, DecisionReport, DecisionRequest, RequestDequeueError,
    RequestEnqueueError, RequestQueueConsumer, RequestQueueProducer,
};
use intersection_core::telemetry::TelemetryInstant;

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;

use crate::status;
use crate::telemetry::TelemetryMirror;

#[cfg(target_os = "none")]
type DecisionMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
type DecisionMutex = NoopRawMutex;

/// Embassy monotonic instant adapted to the core's instant traits.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(Instant::from_micros(micros))
    }

    #[cfg(target_os = "none")]
    #[must_use]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    #[must_use]
    pub const fn into_embassy(self) -> Instant {
        self.0
    }

    #[must_use]
    pub const fn as_micros(self) -> u64 {
        self.0.as_micros()
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl From<FirmwareInstant> for Instant {
    fn from(instant: FirmwareInstant) -> Self {
        instant.0
    }
}

impl TelemetryInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> CoreDuration {
        let elapsed = self.0.saturating_duration_since(earlier.0);
        CoreDuration::from_micros(elapsed.as_micros())
    }
}

impl Add<CoreDuration> for FirmwareInstant {
    type Output = Self;

    fn add(self, rhs: CoreDuration) -> Self {
        let offset = core_duration_to_embassy(rhs);
        Self(self.0.checked_add(offset).unwrap_or(Instant::MAX))
    }
}

/// Converts a core duration into Embassy ticks, saturating on overflow.
#[must_use]
pub fn core_duration_to_embassy(duration: CoreDuration) -> Duration {
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    Duration::from_micros(micros)
}

pub type FirmwareRequest = DecisionRequest<FirmwareInstant>;

/// Queue feeding the single decision task.
pub type DecisionQueue = Channel<DecisionMutex, FirmwareRequest, DECISION_QUEUE_DEPTH>;

pub type DecisionSender<'a> = Sender<'a, DecisionMutex, FirmwareRequest, DECISION_QUEUE_DEPTH>;

pub type DecisionReceiver<'a> = Receiver<'a, DecisionMutex, FirmwareRequest, DECISION_QUEUE_DEPTH>;

/// Adapter exposing the channel sender as a core queue producer.
pub struct RequestProducer<'a> {
    sender: DecisionSender<'a>,
}

impl<'a> RequestProducer<'a> {
    pub fn new(sender: DecisionSender<'a>) -> Self {
        Self { sender }
    }
}

impl RequestQueueProducer for RequestProducer<'_> {
    type Instant = FirmwareInstant;
    type Error = TrySendError<FirmwareRequest>;

    fn try_enqueue(
        &mut self,
        request: FirmwareRequest,
    ) -> Result<(), RequestEnqueueError<Self::Error>> {
        match self.sender.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RequestEnqueueError::QueueFull),
        }
    }

    fn capacity(&self) -> Option<usize> {
        Some(DECISION_QUEUE_DEPTH)
    }

    fn len(&self) -> Option<usize> {
        Some(self.sender.len())
    }
}

/// Adapter exposing the channel receiver as a core queue consumer.
pub struct RequestConsumer<'a> {
    receiver: DecisionReceiver<'a>,
}

impl<'a> RequestConsumer<'a> {
    pub fn new(receiver: DecisionReceiver<'a>) -> Self {
        Self { receiver }
    }

    /// Waits until a request is available.
    pub async fn receive(&mut self) -> FirmwareRequest {
        self.receiver.receive().await
    }
}

impl RequestQueueConsumer for RequestConsumer<'_> {
    type Instant = FirmwareInstant;
    type Error = TryReceiveError;

    fn try_dequeue(
        &mut self,
    ) -> Result<Option<FirmwareRequest>, RequestDequeueError<Self::Error>> {
        match self.receiver.try_receive() {
            Ok(request) => Ok(Some(request)),
            Err(TryReceiveError::Empty) => Ok(None),
        }
    }

    fn len(&self) -> Option<usize> {
        Some(self.receiver.len())
    }
}

/// Owns the decision loop and mirrors its effects to telemetry and status.
pub struct DecisionEngine<S>
where
    S: DisplaySink,
{
    decisions: DecisionLoop<FirmwareInstant, S>,
    mirror: TelemetryMirror,
}

impl<S> DecisionEngine<S>
where
    S: DisplaySink,
{
    pub fn new(order: RoadOrder, config: ArbiterConfig, sink: S) -> Self {
        let decisions = DecisionLoop::new(Arbiter::new(order, config, sink));
        status::publish(decisions.arbiter());
        Self {
            decisions,
            mirror: TelemetryMirror::new(),
        }
    }

    pub fn decisions(&self) -> &DecisionLoop<FirmwareInstant, S> {
        &self.decisions
    }

    /// Handles `request`, then everything that queued up behind it.
    pub fn handle(
        &mut self,
        request: FirmwareRequest,
        consumer: &mut RequestConsumer<'_>,
        now: FirmwareInstant,
    ) -> usize {
        let report = self.decisions.process(request, now);
        log_report(&report);

        let drained = match self
            .decisions
            .drain(consumer, now, |_, report| log_report(&report))
        {
            Ok(count) => count,
            Err(RequestDequeueError::Disconnected | RequestDequeueError::Other(_)) => {
                log_queue_disconnected();
                0
            }
        };

        self.mirror.flush(self.decisions.telemetry());
        status::publish(self.decisions.arbiter());
        drained + 1
    }
}

fn log_report(report: &DecisionReport<FirmwareInstant>) {
    match report {
        DecisionReport::Pulse { tick, sweep } => {
            log_decision(tick);
            if let SweepOutcome::Overdue { overdue, opened } = sweep {
                emit_overdue(overdue.name(), opened.map(|road| road.name()));
            }
        }
        DecisionReport::Frame { tick, .. } => log_decision(tick),
        DecisionReport::Configured(config) => emit_configured(
            millis(config.min_green),
            millis(config.emergency_cooldown),
            millis(config.starvation_threshold),
            millis(config.overdue_min_wait),
        ),
        DecisionReport::ConfigRejected(_) => emit_config_rejected(),
    }
}

fn millis(window: CoreDuration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX)
}

fn log_decision(decision: &Decision<FirmwareInstant>) {
    match decision {
        Decision::EmergencyPreempt {
            road,
            class,
            changed: true,
        } => emit_preempt(road.name(), class.label()),
        Decision::DensitySwitch { road, demand } => emit_density(road.name(), *demand),
        Decision::EmergencyPreempt { .. } | Decision::Hold(_) => {}
    }
}

#[cfg(target_os = "none")]
fn emit_preempt(road: &'static str, class: &'static str) {
    defmt::info!("arbiter: preempt {} class={}", road, class);
}

#[cfg(not(target_os = "none"))]
fn emit_preempt(road: &'static str, class: &'static str) {
    println!("arbiter: preempt {road} class={class}");
}

#[cfg(target_os = "none")]
fn emit_density(road: &'static str, demand: u32) {
    defmt::info!("arbiter: density {} demand={}", road, demand);
}

#[cfg(not(target_os = "none"))]
fn emit_density(road: &'static str, demand: u32) {
    println!("arbiter: density {road} demand={demand}");
}

#[cfg(target_os = "none")]
fn emit_overdue(overdue: &'static str, served: Option<&'static str>) {
    match served {
        Some(road) => defmt::warn!("arbiter: {} overdue, serving {}", overdue, road),
        None => defmt::warn!("arbiter: {} overdue, nothing eligible", overdue),
    }
}

#[cfg(not(target_os = "none"))]
fn emit_overdue(overdue: &'static str, served: Option<&'static str>) {
    match served {
        Some(road) => println!("arbiter: {overdue} overdue, serving {road}"),
        None => println!("arbiter: {overdue} overdue, nothing eligible"),
    }
}

#[cfg(target_os = "none")]
fn emit_configured(min_green: u64, cooldown: u64, starvation: u64, wait: u64) {
    defmt::info!(
        "arbiter: config min-green={}ms cooldown={}ms starvation={}ms overdue-wait={}ms",
        min_green,
        cooldown,
        starvation,
        wait
    );
}

#[cfg(not(target_os = "none"))]
fn emit_configured(min_green: u64, cooldown: u64, starvation: u64, wait: u64) {
    println!(
        "arbiter: config min-green={min_green}ms cooldown={cooldown}ms starvation={starvation}ms overdue-wait={wait}ms"
    );
}

#[cfg(target_os = "none")]
fn emit_config_rejected() {
    defmt::warn!("arbiter: config update rejected");
}

#[cfg(not(target_os = "none"))]
fn emit_config_rejected() {
    println!("arbiter: config update rejected");
}

#[cfg(target_os = "none")]
fn log_queue_disconnected() {
    defmt::error!("arbiter: decision queue disconnected");
}

#[cfg(not(target_os = "none"))]
fn log_queue_disconnected() {
    println!("arbiter: decision queue disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use intersection_core::display::NoopDisplaySink;
    use intersection_core::roads::{LightState, RoadId, VehicleCounts};
    use intersection_core::scheduler::RequestScheduler;

    fn secs(value: u64) -> FirmwareInstant {
        FirmwareInstant::from_micros(value * 1_000_000)
    }

    #[test]
    fn instant_arithmetic_uses_core_durations() {
        let start = secs(3);
        let later = start + CoreDuration::from_millis(1_500);
        assert_eq!(later.as_micros(), 4_500_000);
        assert_eq!(
            later.saturating_duration_since(start),
            CoreDuration::from_millis(1_500)
        );
        assert_eq!(start.saturating_duration_since(later), CoreDuration::ZERO);
    }

    #[test]
    fn producer_reports_full_queue() {
        let queue = DecisionQueue::new();
        let mut producer = RequestProducer::new(queue.sender());
        for step in 0..DECISION_QUEUE_DEPTH as u64 {
            producer
                .try_enqueue(DecisionRequest::pulse(secs(step)))
                .expect("queue has room");
        }
        assert_eq!(producer.remaining(), Some(0));
        assert_eq!(
            producer.try_enqueue(DecisionRequest::pulse(secs(99))),
            Err(RequestEnqueueError::QueueFull)
        );
    }

    #[test]
    fn engine_drains_backlog_in_order() {
        let _guard = crate::status::TEST_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let queue = DecisionQueue::new();
        let mut scheduler = RequestScheduler::new(RequestProducer::new(queue.sender()));
        let mut consumer = RequestConsumer::new(queue.receiver());
        let mut engine = DecisionEngine::new(
            RoadOrder::all(),
            ArbiterConfig::new(),
            NoopDisplaySink,
        );

        let feed = intersection_core::scheduler::RequestSource::Feed;
        scheduler
            .frame(RoadId::Road1, VehicleCounts::traffic(4, 0), secs(0), feed)
            .expect("frame");
        scheduler
            .frame(RoadId::Road2, VehicleCounts::traffic(9, 0), secs(0), feed)
            .expect("frame");

        let first = consumer
            .try_dequeue()
            .expect("queue connected")
            .expect("request waiting");
        assert_eq!(engine.handle(first, &mut consumer, secs(0)), 2);
        assert_eq!(consumer.try_dequeue(), Ok(None));
        assert_eq!(engine.decisions().processed(), 2);

        scheduler.pulse(secs(15)).expect("pulse");
        let pulse = consumer
            .try_dequeue()
            .expect("queue connected")
            .expect("request waiting");
        engine.handle(pulse, &mut consumer, secs(15));
        assert_eq!(
            engine.decisions().arbiter().registry().light(RoadId::Road2),
            LightState::Open
        );
    }
}
