//! Decision queue shared between firmware and host targets.
//!
//! Producers (the pulse timer, per-road feeds and the operator console) push
//! [`DecisionRequest`]s into a bounded queue. A single [`DecisionLoop`] drains
//! it, so every tick and sweep runs serially against one [`Arbiter`]. Firmware
//! and emulator provide concrete queue types that satisfy the producer and
//! consumer traits.

use core::fmt;
use core::time::Duration;

use crate::arbiter::{Arbiter, ArbiterInstant, Decision, SweepOutcome};
use crate::config::{ArbiterConfig, ConfigError, ConfigUpdate};
use crate::display::DisplaySink;
use crate::roads::{RoadId, Snapshot, VehicleCounts};
use crate::telemetry::{TELEMETRY_RING_CAPACITY, TelemetryRecorder};

/// Default depth of the decision queue.
pub const DECISION_QUEUE_DEPTH: usize = 16;

/// Producer that initiated a [`DecisionRequest`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestSource {
    PulseTimer,
    Feed,
    Operator,
}

/// Work item processed by the decision loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestKind {
    /// Run a tick with no new snapshots, then a sweep.
    Pulse,
    /// Run a tick with one road's fresh snapshot.
    Frame(Snapshot),
    /// Change a timing window.
    Configure(ConfigUpdate),
}

impl RequestKind {
    #[must_use]
    pub const fn tag(&self) -> RequestTag {
        match self {
            RequestKind::Pulse => RequestTag::Pulse,
            RequestKind::Frame(_) => RequestTag::Frame,
            RequestKind::Configure(_) => RequestTag::Configure,
        }
    }
}

/// Payload-free discriminant of [`RequestKind`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestTag {
    Pulse,
    Frame,
    Configure,
}

impl RequestTag {
    #[must_use]
    pub const fn as_index(self) -> u16 {
        match self {
            RequestTag::Pulse => 0,
            RequestTag::Frame => 1,
            RequestTag::Configure => 2,
        }
    }

    #[must_use]
    pub const fn from_index(index: u16) -> Option<Self> {
        match index {
            0 => Some(RequestTag::Pulse),
            1 => Some(RequestTag::Frame),
            2 => Some(RequestTag::Configure),
            _ => None,
        }
    }
}

impl fmt::Display for RequestTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestTag::Pulse => "pulse",
            RequestTag::Frame => "frame",
            RequestTag::Configure => "configure",
        })
    }
}

/// Request waiting to be processed by the decision loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DecisionRequest<TInstant = u64> {
    pub kind: RequestKind,
    pub requested_at: TInstant,
    pub source: RequestSource,
}

impl<TInstant> DecisionRequest<TInstant> {
    pub fn new(kind: RequestKind, requested_at: TInstant, source: RequestSource) -> Self {
        Self {
            kind,
            requested_at,
            source,
        }
    }

    pub fn pulse(requested_at: TInstant) -> Self {
        Self::new(RequestKind::Pulse, requested_at, RequestSource::PulseTimer)
    }

    pub fn frame(road: RoadId, counts: VehicleCounts, requested_at: TInstant) -> Self {
        Self::new(
            RequestKind::Frame(Snapshot::new(road, counts)),
            requested_at,
            RequestSource::Feed,
        )
    }
}

/// Error surfaced when a request cannot be enqueued.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestEnqueueError<E = ()> {
    /// Queue has reached its maximum capacity.
    QueueFull,
    /// Queue has been disconnected from its consumer.
    Disconnected,
    /// Transport-specific failure.
    Other(E),
}

impl<E> RequestEnqueueError<E> {
    /// Maps the inner error type.
    pub fn map_other<F, M>(self, mapper: M) -> RequestEnqueueError<F>
    where
        M: FnOnce(E) -> F,
    {
        match self {
            RequestEnqueueError::QueueFull => RequestEnqueueError::QueueFull,
            RequestEnqueueError::Disconnected => RequestEnqueueError::Disconnected,
            RequestEnqueueError::Other(err) => RequestEnqueueError::Other(mapper(err)),
        }
    }
}

/// Error surfaced when dequeueing from the decision queue fails.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestDequeueError<E = ()> {
    /// Queue has been disconnected from its producers.
    Disconnected,
    /// Transport-specific failure.
    Other(E),
}

impl<E> RequestDequeueError<E> {
    /// Maps the inner error type.
    pub fn map_other<F, M>(self, mapper: M) -> RequestDequeueError<F>
    where
        M: FnOnce(E) -> F,
    {
        match self {
            RequestDequeueError::Disconnected => RequestDequeueError::Disconnected,
            RequestDequeueError::Other(err) => RequestDequeueError::Other(mapper(err)),
        }
    }
}

/// Trait implemented by producers that push requests into the decision queue.
pub trait RequestQueueProducer {
    /// Monotonic timestamp type attached to requests.
    type Instant: Copy;
    /// Transport-specific error type.
    type Error;

    /// Attempts to enqueue a request without blocking.
    fn try_enqueue(
        &mut self,
        request: DecisionRequest<Self::Instant>,
    ) -> Result<(), RequestEnqueueError<Self::Error>>;

    /// Returns the queue capacity if it is known.
    fn capacity(&self) -> Option<usize> {
        None
    }

    /// Returns the current queue depth if it can be observed.
    fn len(&self) -> Option<usize> {
        None
    }

    fn is_empty(&self) -> Option<bool> {
        self.len().map(|current| current == 0)
    }

    /// Remaining slots when both capacity and length are known.
    fn remaining(&self) -> Option<usize> {
        match (self.capacity(), self.len()) {
            (Some(capacity), Some(len)) => Some(capacity.saturating_sub(len)),
            _ => None,
        }
    }

    fn is_full(&self) -> Option<bool> {
        self.remaining().map(|slot_count| slot_count == 0)
    }
}

/// Trait implemented by consumers that pop requests from the decision queue.
pub trait RequestQueueConsumer {
    /// Monotonic timestamp type attached to requests.
    type Instant: Copy;
    /// Transport-specific error type.
    type Error;

    /// Attempts to dequeue a request without blocking.
    ///
    /// Returns `Ok(Some(request))` when a request was available, `Ok(None)` when
    /// the queue is currently empty, or an error when the underlying transport
    /// has been disconnected or failed.
    fn try_dequeue(
        &mut self,
    ) -> Result<Option<DecisionRequest<Self::Instant>>, RequestDequeueError<Self::Error>>;

    /// Returns the current queue depth if it can be observed.
    fn len(&self) -> Option<usize> {
        None
    }
}

impl<P> RequestQueueProducer for &mut P
where
    P: RequestQueueProducer + ?Sized,
{
    type Instant = P::Instant;
    type Error = P::Error;

    fn try_enqueue(
        &mut self,
        request: DecisionRequest<Self::Instant>,
    ) -> Result<(), RequestEnqueueError<Self::Error>> {
        (**self).try_enqueue(request)
    }

    fn capacity(&self) -> Option<usize> {
        (**self).capacity()
    }

    fn len(&self) -> Option<usize> {
        RequestQueueProducer::len(&**self)
    }
}

/// Front door used by producers that stamp requests with their source.
pub struct RequestScheduler<P>
where
    P: RequestQueueProducer,
{
    producer: P,
}

impl<P> RequestScheduler<P>
where
    P: RequestQueueProducer,
{
    pub const fn new(producer: P) -> Self {
        Self { producer }
    }

    pub fn producer(&self) -> &P {
        &self.producer
    }

    pub fn producer_mut(&mut self) -> &mut P {
        &mut self.producer
    }

    pub fn into_inner(self) -> P {
        self.producer
    }

    pub fn pulse(&mut self, requested_at: P::Instant) -> Result<(), RequestEnqueueError<P::Error>> {
        self.producer.try_enqueue(DecisionRequest::pulse(requested_at))
    }

    pub fn frame(
        &mut self,
        road: RoadId,
        counts: VehicleCounts,
        requested_at: P::Instant,
        source: RequestSource,
    ) -> Result<(), RequestEnqueueError<P::Error>> {
        self.producer.try_enqueue(DecisionRequest::new(
            RequestKind::Frame(Snapshot::new(road, counts)),
            requested_at,
            source,
        ))
    }

    pub fn configure(
        &mut self,
        update: ConfigUpdate,
        requested_at: P::Instant,
    ) -> Result<(), RequestEnqueueError<P::Error>> {
        self.producer.try_enqueue(DecisionRequest::new(
            RequestKind::Configure(update),
            requested_at,
            RequestSource::Operator,
        ))
    }
}

/// Result of processing one [`DecisionRequest`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DecisionReport<I> {
    Pulse {
        tick: Decision<I>,
        sweep: SweepOutcome,
    },
    Frame {
        road: RoadId,
        tick: Decision<I>,
    },
    Configured(ArbiterConfig),
    ConfigRejected(ConfigError),
}

impl<I> DecisionReport<I> {
    /// Road opened while handling the request, if any.
    #[must_use]
    pub fn opened(&self) -> Option<RoadId> {
        match self {
            DecisionReport::Pulse { tick, sweep } => tick.opened().or(match sweep {
                SweepOutcome::Overdue { opened, .. } => *opened,
                SweepOutcome::Idle => None,
            }),
            DecisionReport::Frame { tick, .. } => tick.opened(),
            DecisionReport::Configured(_) | DecisionReport::ConfigRejected(_) => None,
        }
    }
}

/// Single consumer of the decision queue; owns the arbiter and its telemetry.
pub struct DecisionLoop<I, S, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    I: ArbiterInstant,
{
    arbiter: Arbiter<I, S>,
    telemetry: TelemetryRecorder<I, CAPACITY>,
    processed: u32,
}

impl<I, S, const CAPACITY: usize> DecisionLoop<I, S, CAPACITY>
where
    I: ArbiterInstant,
    S: DisplaySink,
{
    pub fn new(arbiter: Arbiter<I, S>) -> Self {
        Self {
            arbiter,
            telemetry: TelemetryRecorder::new(),
            processed: 0,
        }
    }

    pub fn arbiter(&self) -> &Arbiter<I, S> {
        &self.arbiter
    }

    pub fn arbiter_mut(&mut self) -> &mut Arbiter<I, S> {
        &mut self.arbiter
    }

    pub fn telemetry(&self) -> &TelemetryRecorder<I, CAPACITY> {
        &self.telemetry
    }

    /// Requests handled since start-up.
    pub const fn processed(&self) -> u32 {
        self.processed
    }

    /// Handles one request at `now`.
    pub fn process(&mut self, request: DecisionRequest<I>, now: I) -> DecisionReport<I> {
        self.process_with_depth(request, now, 0)
    }

    fn process_with_depth(
        &mut self,
        request: DecisionRequest<I>,
        now: I,
        queue_depth: usize,
    ) -> DecisionReport<I> {
        self.processed = self.processed.wrapping_add(1);
        self.telemetry
            .record_request(request.kind.tag(), queue_depth, request.requested_at, now);

        match request.kind {
            RequestKind::Pulse => {
                let tick = self.arbiter.tick(&[], now, &mut self.telemetry);
                let sweep = self.arbiter.sweep(now, &mut self.telemetry);
                DecisionReport::Pulse { tick, sweep }
            }
            RequestKind::Frame(snapshot) => {
                let tick = self.arbiter.tick(&[snapshot], now, &mut self.telemetry);
                DecisionReport::Frame {
                    road: snapshot.road,
                    tick,
                }
            }
            RequestKind::Configure(update) => match self.arbiter.config().apply(update) {
                Ok(config) => {
                    self.arbiter.set_config(config);
                    DecisionReport::Configured(config)
                }
                Err(error) => DecisionReport::ConfigRejected(error),
            },
        }
    }

    /// Processes every queued request, handing each report to `on_report`.
    ///
    /// Returns the number of requests processed.
    pub fn drain<C, F>(
        &mut self,
        consumer: &mut C,
        now: I,
        mut on_report: F,
    ) -> Result<usize, RequestDequeueError<C::Error>>
    where
        C: RequestQueueConsumer<Instant = I>,
        F: FnMut(&DecisionRequest<I>, DecisionReport<I>),
    {
        let mut handled = 0;
        while let Some(request) = consumer.try_dequeue()? {
            let depth = consumer.len().unwrap_or(0);
            let report = self.process_with_depth(request, now, depth);
            on_report(&request, report);
            handled += 1;
        }
        Ok(handled)
    }
}

/// Fixed-interval timer driven by externally supplied instants.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Cadence<I> {
    interval: Duration,
    next_due: Option<I>,
}

impl<I> Cadence<I>
where
    I: ArbiterInstant,
{
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    /// Arms the timer so the first firing happens one interval after `now`.
    pub fn start(&mut self, now: I) {
        self.next_due = Some(now + self.interval);
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn next_due(&self) -> Option<I> {
        self.next_due
    }

    /// Returns the due instant and re-arms for the following interval when the
    /// timer has elapsed by `now`. Call repeatedly to catch up on missed
    /// intervals.
    pub fn poll(&mut self, now: I) -> Option<I> {
        let due = self.next_due?;
        if now < due {
            return None;
        }
        self.next_due = Some(due + self.interval);
        Some(due)
    }
}

#[cfg(test)]
mod tests {
    use core::ops::Add;

    use super::*;
    use crate::arbiter::HoldReason;
    use crate::display::NoopDisplaySink;
    use crate::roads::RoadOrder;
    use crate::telemetry::{TelemetryEventKind, TelemetryInstant};
    use heapless::Deque;

    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    struct MockInstant(u64);

    impl MockInstant {
        fn millis(value: u64) -> Self {
            Self(value)
        }
    }

    impl Add<Duration> for MockInstant {
        type Output = Self;

        fn add(self, rhs: Duration) -> Self::Output {
            Self(self.0 + u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX))
        }
    }

    impl TelemetryInstant for MockInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_millis(self.0.saturating_sub(earlier.0))
        }
    }

    struct MockQueue {
        capacity: usize,
        requests: Deque<DecisionRequest<MockInstant>, 8>,
    }

    impl MockQueue {
        fn new(capacity: usize) -> Self {
            Self {
                capacity,
                requests: Deque::new(),
            }
        }
    }

    impl RequestQueueProducer for MockQueue {
        type Instant = MockInstant;
        type Error = ();

        fn try_enqueue(
            &mut self,
            request: DecisionRequest<Self::Instant>,
        ) -> Result<(), RequestEnqueueError<Self::Error>> {
            if self.requests.len() >= self.capacity {
                return Err(RequestEnqueueError::QueueFull);
            }
            self.requests
                .push_back(request)
                .map_err(|_| RequestEnqueueError::QueueFull)
        }

        fn capacity(&self) -> Option<usize> {
            Some(self.capacity)
        }

        fn len(&self) -> Option<usize> {
            Some(self.requests.len())
        }
    }

    impl RequestQueueConsumer for MockQueue {
        type Instant = MockInstant;
        type Error = ();

        fn try_dequeue(
            &mut self,
        ) -> Result<Option<DecisionRequest<Self::Instant>>, RequestDequeueError<Self::Error>>
        {
            Ok(self.requests.pop_front())
        }

        fn len(&self) -> Option<usize> {
            Some(self.requests.len())
        }
    }

    fn decision_loop() -> DecisionLoop<MockInstant, NoopDisplaySink> {
        DecisionLoop::new(Arbiter::new(
            RoadOrder::all(),
            ArbiterConfig::default(),
            NoopDisplaySink,
        ))
    }

    #[test]
    fn scheduler_reports_full_queue() {
        let mut scheduler = RequestScheduler::new(MockQueue::new(1));
        scheduler
            .pulse(MockInstant::millis(0))
            .expect("first pulse fits");
        assert_eq!(
            scheduler.pulse(MockInstant::millis(100)),
            Err(RequestEnqueueError::QueueFull)
        );
        assert_eq!(scheduler.producer().remaining(), Some(0));
        assert_eq!(RequestQueueProducer::is_full(scheduler.producer()), Some(true));
    }

    #[test]
    fn drain_processes_requests_in_arrival_order() {
        let mut queue = MockQueue::new(8);
        let mut scheduler = RequestScheduler::new(&mut queue);
        scheduler
            .frame(
                RoadId::Road2,
                VehicleCounts::traffic(5, 1),
                MockInstant::millis(0),
                RequestSource::Feed,
            )
            .expect("frame enqueued");
        scheduler
            .pulse(MockInstant::millis(5))
            .expect("pulse enqueued");

        let mut looper = decision_loop();
        let mut seen: heapless::Vec<RequestTag, 4> = heapless::Vec::new();
        let handled = looper
            .drain(&mut queue, MockInstant::millis(10), |request, _| {
                let _ = seen.push(request.kind.tag());
            })
            .expect("drain succeeds");

        assert_eq!(handled, 2);
        assert_eq!(seen.as_slice(), [RequestTag::Frame, RequestTag::Pulse]);
        assert_eq!(looper.processed(), 2);
        assert!(matches!(
            looper.telemetry().latest().map(|record| record.event),
            Some(TelemetryEventKind::RequestProcessed(RequestTag::Pulse))
        ));
    }

    #[test]
    fn frame_request_ticks_with_snapshot() {
        let mut looper = decision_loop();
        let report = looper.process(
            DecisionRequest::frame(
                RoadId::Road3,
                VehicleCounts::traffic(2, 0),
                MockInstant::millis(0),
            ),
            MockInstant::millis(0),
        );

        assert_eq!(
            report,
            DecisionReport::Frame {
                road: RoadId::Road3,
                tick: Decision::Hold(HoldReason::BookkeepingSeeded(RoadId::Road3)),
            }
        );
    }

    #[test]
    fn configure_request_validates_update() {
        let mut looper = decision_loop();
        let rejected = looper.process(
            DecisionRequest::new(
                RequestKind::Configure(ConfigUpdate::StarvationThreshold(Duration::ZERO)),
                MockInstant::millis(0),
                RequestSource::Operator,
            ),
            MockInstant::millis(0),
        );
        assert_eq!(
            rejected,
            DecisionReport::ConfigRejected(ConfigError::ZeroStarvationThreshold)
        );

        let accepted = looper.process(
            DecisionRequest::new(
                RequestKind::Configure(ConfigUpdate::MinGreen(Duration::from_secs(4))),
                MockInstant::millis(1),
                RequestSource::Operator,
            ),
            MockInstant::millis(1),
        );
        assert!(matches!(accepted, DecisionReport::Configured(_)));
        assert_eq!(
            looper.arbiter().config().min_green,
            Duration::from_secs(4)
        );
    }

    #[test]
    fn cadence_fires_once_per_interval() {
        let mut cadence = Cadence::new(Duration::from_millis(100));
        assert_eq!(cadence.poll(MockInstant::millis(500)), None);

        cadence.start(MockInstant::millis(0));
        assert_eq!(cadence.poll(MockInstant::millis(99)), None);
        assert_eq!(
            cadence.poll(MockInstant::millis(250)),
            Some(MockInstant::millis(100))
        );
        assert_eq!(
            cadence.poll(MockInstant::millis(250)),
            Some(MockInstant::millis(200))
        );
        assert_eq!(cadence.poll(MockInstant::millis(250)), None);
        assert_eq!(cadence.next_due(), Some(MockInstant::millis(300)));
    }
}
