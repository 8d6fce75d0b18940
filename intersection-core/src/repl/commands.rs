//! Console command dispatcher.
//!
//! Turns parsed commands into decision requests so the console never touches
//! the arbiter directly. Read-only commands (`status`, `config` without
//! arguments, `help`) and the host-only `advance` are reported as unsupported
//! here; front-ends intercept them before dispatch.

use crate::config::ConfigUpdate;
use crate::roads::{RoadId, VehicleCounts};
use crate::scheduler::{
    RequestEnqueueError, RequestQueueProducer, RequestScheduler, RequestSource,
};

use super::grammar::{self, Command, ConfigCommand, FeedCommand};

/// Command execution successes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome<Instant> {
    Fed(FeedAck<Instant>),
    Pulsed(PulseAck<Instant>),
    Configured(ConfigAck<Instant>),
}

/// Summary returned after queueing a snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedAck<Instant> {
    pub requested_at: Instant,
    pub road: RoadId,
    pub counts: VehicleCounts,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PulseAck<Instant> {
    pub requested_at: Instant,
}

/// Summary returned after queueing a configuration change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigAck<Instant> {
    pub requested_at: Instant,
    pub update: ConfigUpdate,
}

/// Errors surfaced while executing a command.
#[derive(Debug, PartialEq, Eq)]
pub enum CommandError<'a, E> {
    Parse(grammar::ParseError<'a>),
    Unsupported(&'static str),
    Queue(RequestEnqueueError<E>),
}

impl<'a, E> From<grammar::ParseError<'a>> for CommandError<'a, E> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl<E> From<RequestEnqueueError<E>> for CommandError<'_, E> {
    fn from(error: RequestEnqueueError<E>) -> Self {
        Self::Queue(error)
    }
}

type CommandResult<'a, S> = Result<
    CommandOutcome<<S as RequestEnqueuer>::Instant>,
    CommandError<'a, <S as RequestEnqueuer>::Error>,
>;

/// Abstraction over the decision queue used by the dispatcher.
pub trait RequestEnqueuer {
    type Instant: Copy;
    type Error;

    fn enqueue_pulse(
        &mut self,
        requested_at: Self::Instant,
    ) -> Result<(), RequestEnqueueError<Self::Error>>;

    fn enqueue_frame(
        &mut self,
        feed: FeedCommand,
        requested_at: Self::Instant,
    ) -> Result<(), RequestEnqueueError<Self::Error>>;

    fn enqueue_config(
        &mut self,
        update: ConfigUpdate,
        requested_at: Self::Instant,
    ) -> Result<(), RequestEnqueueError<Self::Error>>;
}

impl<P> RequestEnqueuer for RequestScheduler<P>
where
    P: RequestQueueProducer,
{
    type Instant = P::Instant;
    type Error = P::Error;

    fn enqueue_pulse(
        &mut self,
        requested_at: Self::Instant,
    ) -> Result<(), RequestEnqueueError<Self::Error>> {
        self.pulse(requested_at)
    }

    fn enqueue_frame(
        &mut self,
        feed: FeedCommand,
        requested_at: Self::Instant,
    ) -> Result<(), RequestEnqueueError<Self::Error>> {
        self.frame(feed.road, feed.counts, requested_at, RequestSource::Operator)
    }

    fn enqueue_config(
        &mut self,
        update: ConfigUpdate,
        requested_at: Self::Instant,
    ) -> Result<(), RequestEnqueueError<Self::Error>> {
        self.configure(update, requested_at)
    }
}

/// Dispatches console commands into the decision queue.
pub struct CommandExecutor<S> {
    scheduler: S,
}

impl<S> CommandExecutor<S> {
    pub const fn new(scheduler: S) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub fn into_inner(self) -> S {
        self.scheduler
    }
}

impl<S> CommandExecutor<S>
where
    S: RequestEnqueuer,
{
    /// Parses and executes a console command.
    pub fn execute<'a>(&mut self, line: &'a str, now: S::Instant) -> CommandResult<'a, S> {
        let command = grammar::parse(line)?;
        self.dispatch(command, now)
    }

    /// Executes an already parsed command.
    pub fn dispatch<'a>(&mut self, command: Command<'a>, now: S::Instant) -> CommandResult<'a, S> {
        match command {
            Command::Feed(feed) => {
                self.scheduler.enqueue_frame(feed, now)?;
                Ok(CommandOutcome::Fed(FeedAck {
                    requested_at: now,
                    road: feed.road,
                    counts: feed.counts,
                }))
            }
            Command::Pulse => {
                self.scheduler.enqueue_pulse(now)?;
                Ok(CommandOutcome::Pulsed(PulseAck { requested_at: now }))
            }
            Command::Config(ConfigCommand::Set(ConfigUpdate::StarvationThreshold(window)))
                if window.is_zero() =>
            {
                Err(CommandError::Unsupported(
                    "starvation threshold must be non-zero",
                ))
            }
            Command::Config(ConfigCommand::Set(update)) => {
                self.scheduler.enqueue_config(update, now)?;
                Ok(CommandOutcome::Configured(ConfigAck {
                    requested_at: now,
                    update,
                }))
            }
            Command::Config(ConfigCommand::Show) => Err(CommandError::Unsupported("config")),
            Command::Status => Err(CommandError::Unsupported("status")),
            Command::Advance(_) => Err(CommandError::Unsupported("advance")),
            Command::Help(_) => Err(CommandError::Unsupported("help")),
        }
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::*;
    use crate::scheduler::{DecisionRequest, RequestKind};
    use crate::roads::Snapshot;
    use heapless::Vec as HeaplessVec;

    #[derive(Default)]
    struct MockQueue {
        requests: HeaplessVec<DecisionRequest<u64>, 4>,
    }

    impl RequestQueueProducer for MockQueue {
        type Instant = u64;
        type Error = ();

        fn try_enqueue(
            &mut self,
            request: DecisionRequest<Self::Instant>,
        ) -> Result<(), RequestEnqueueError<Self::Error>> {
            self.requests
                .push(request)
                .map_err(|_| RequestEnqueueError::QueueFull)
        }

        fn capacity(&self) -> Option<usize> {
            Some(4)
        }

        fn len(&self) -> Option<usize> {
            Some(self.requests.len())
        }
    }

    fn executor() -> CommandExecutor<RequestScheduler<MockQueue>> {
        CommandExecutor::new(RequestScheduler::new(MockQueue::default()))
    }

    fn queued(executor: &CommandExecutor<RequestScheduler<MockQueue>>) -> &[DecisionRequest<u64>] {
        &executor.scheduler().producer().requests
    }

    #[test]
    fn feed_enqueues_operator_frame() {
        let mut executor = executor();
        let outcome = executor
            .execute("feed road1 ambulance=1 car=3", 42)
            .expect("feed should succeed");

        assert_eq!(
            outcome,
            CommandOutcome::Fed(FeedAck {
                requested_at: 42,
                road: RoadId::Road1,
                counts: VehicleCounts::new(1, 0, 0, 3, 0),
            })
        );
        let request = queued(&executor)[0];
        assert_eq!(request.source, RequestSource::Operator);
        assert_eq!(
            request.kind,
            RequestKind::Frame(Snapshot::new(
                RoadId::Road1,
                VehicleCounts::new(1, 0, 0, 3, 0)
            ))
        );
    }

    #[test]
    fn pulse_enqueues_request() {
        let mut executor = executor();
        assert_eq!(
            executor.execute("pulse", 7),
            Ok(CommandOutcome::Pulsed(PulseAck { requested_at: 7 }))
        );
        assert_eq!(queued(&executor)[0].kind, RequestKind::Pulse);
    }

    #[test]
    fn config_update_is_queued() {
        let mut executor = executor();
        let outcome = executor
            .execute("config cooldown 5s", 1)
            .expect("config should succeed");
        assert_eq!(
            outcome,
            CommandOutcome::Configured(ConfigAck {
                requested_at: 1,
                update: ConfigUpdate::EmergencyCooldown(Duration::from_secs(5)),
            })
        );
    }

    #[test]
    fn zero_starvation_is_rejected_before_queueing() {
        let mut executor = executor();
        assert_eq!(
            executor.execute("config starvation 0s", 1),
            Err(CommandError::Unsupported(
                "starvation threshold must be non-zero"
            ))
        );
        assert!(queued(&executor).is_empty());
    }

    #[test]
    fn read_only_commands_are_left_to_front_ends() {
        let mut executor = executor();
        for (line, name) in [
            ("status", "status"),
            ("config", "config"),
            ("help", "help"),
            ("advance 1s", "advance"),
        ] {
            assert_eq!(
                executor.execute(line, 0),
                Err(CommandError::Unsupported(name))
            );
        }
    }

    #[test]
    fn full_queue_surfaces_error() {
        let mut executor = executor();
        for step in 0..4 {
            executor.execute("pulse", step).expect("queue has room");
        }
        assert_eq!(
            executor.execute("pulse", 5),
            Err(CommandError::Queue(RequestEnqueueError::QueueFull))
        );
    }

    #[test]
    fn parse_errors_are_reported() {
        let mut executor = executor();
        assert!(matches!(
            executor.execute("feed nowhere", 0),
            Err(CommandError::Parse(_))
        ));
    }
}
