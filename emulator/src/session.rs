use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::ops::Add;
use std::path::Path;
use std::time::Duration;

use intersection_core::arbiter::{Arbiter, Decision, HoldReason, SweepOutcome};
use intersection_core::config::{ArbiterConfig, CadenceConfig};
use intersection_core::display::{DisplaySink, LightStateMap};
use intersection_core::repl::catalog;
use intersection_core::repl::commands::{CommandError, CommandExecutor, CommandOutcome};
use intersection_core::repl::completion::{CompletionEngine, Replacement};
use intersection_core::repl::grammar::{self, Command, ConfigCommand};
use intersection_core::repl::status::{StatusFormatter, StatusProvider, StatusSnapshot};
use intersection_core::roads::{LightState, ROAD_COUNT, RoadId, RoadOrder, VehicleCounts};
use intersection_core::scheduler::{
    Cadence, DECISION_QUEUE_DEPTH, DecisionLoop, DecisionReport, DecisionRequest,
    RequestDequeueError, RequestEnqueueError, RequestQueueConsumer, RequestQueueProducer,
    RequestScheduler,
};
use intersection_core::telemetry::TelemetryInstant;

/// Simulated monotonic clock reading, measured from session start.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct SimInstant(Duration);

impl SimInstant {
    pub const ZERO: Self = Self(Duration::ZERO);

    pub fn since_start(self) -> Duration {
        self.0
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

impl TelemetryInstant for SimInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for SimInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}ms", self.0.as_millis())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptProfile {
    Density,
    Emergency,
    Starvation,
}

impl TranscriptProfile {
    pub fn log_path(self) -> &'static str {
        match self {
            TranscriptProfile::Density => "evidence/emulator-density.log",
            TranscriptProfile::Emergency => "evidence/emulator-emergency.log",
            TranscriptProfile::Starvation => "evidence/emulator-starvation.log",
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            TranscriptProfile::Density => "Intersection Emulator density transcript",
            TranscriptProfile::Emergency => "Intersection Emulator emergency transcript",
            TranscriptProfile::Starvation => "Intersection Emulator starvation transcript",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("density") {
            Ok(Self::Density)
        } else if tag.eq_ignore_ascii_case("emergency") {
            Ok(Self::Emergency)
        } else if tag.eq_ignore_ascii_case("starvation") {
            Ok(Self::Starvation)
        } else {
            Err(format!("Unknown transcript profile `{tag}`"))
        }
    }
}

/// One line of console output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    Text(String),
    /// Light board captured when the display changed.
    Board(LightStateMap),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Text(text) => f.write_str(text),
            Response::Board(lights) => {
                for (index, (road, state)) in lights.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{road} Traffic Light: {}", board_label(state))?;
                }
                Ok(())
            }
        }
    }
}

pub fn board_label(state: LightState) -> &'static str {
    match state {
        LightState::Open => "Open",
        LightState::Closed => "Closed",
    }
}

#[derive(Debug)]
pub enum CompletionResponse {
    NoMatches,
    Applied { replacement: Replacement },
    Suggestions { options: Vec<&'static str> },
}

/// Display sink that buffers every board shown until the session collects it.
#[derive(Default)]
pub struct ConsoleBoard {
    pending: Vec<LightStateMap>,
}

impl ConsoleBoard {
    fn take(&mut self) -> Vec<LightStateMap> {
        std::mem::take(&mut self.pending)
    }
}

impl DisplaySink for ConsoleBoard {
    fn show(&mut self, lights: &LightStateMap) {
        self.pending.push(lights.clone());
    }
}

type Executor = CommandExecutor<RequestScheduler<HostQueue>>;

pub struct Session {
    executor: Executor,
    decisions: DecisionLoop<SimInstant, ConsoleBoard>,
    pulses: Cadence<SimInstant>,
    frames: Cadence<SimInstant>,
    last_fed: [Option<VehicleCounts>; ROAD_COUNT],
    clock: SimInstant,
    transcript: TranscriptLogger,
    completion: CompletionEngine,
}

impl Session {
    pub fn new(profile: TranscriptProfile) -> io::Result<Self> {
        let transcript = TranscriptLogger::new(profile)?;
        let executor = CommandExecutor::new(RequestScheduler::new(HostQueue::new(
            DECISION_QUEUE_DEPTH,
        )));
        let arbiter = Arbiter::new(
            RoadOrder::all(),
            ArbiterConfig::new(),
            ConsoleBoard::default(),
        );
        let cadence = CadenceConfig::new();
        let mut pulses = Cadence::new(cadence.pulse_interval);
        let mut frames = Cadence::new(cadence.frame_interval);
        pulses.start(SimInstant::ZERO);
        frames.start(SimInstant::ZERO);

        Ok(Self {
            executor,
            decisions: DecisionLoop::new(arbiter),
            pulses,
            frames,
            last_fed: [None; ROAD_COUNT],
            clock: SimInstant::ZERO,
            transcript,
            completion: CompletionEngine::new(),
        })
    }

    pub fn now(&self) -> SimInstant {
        self.clock
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<Response>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.clock.since_start();
        self.transcript
            .append_line(elapsed, TranscriptRole::Host, trimmed)?;

        let responses = match grammar::parse(trimmed) {
            Ok(Command::Help(help)) => self.handle_help(help.topic),
            Ok(Command::Status) => self.handle_status(),
            Ok(Command::Config(ConfigCommand::Show)) => self.handle_config_show(),
            Ok(Command::Advance(by)) => self.handle_advance(by),
            Ok(command) => {
                let now = self.clock;
                match self.executor.dispatch(command, now) {
                    Ok(outcome) => self.handle_outcome(outcome),
                    Err(error) => vec![Response::Text(describe_command_error(&error))],
                }
            }
            Err(err) => vec![Response::Text(format!("ERR syntax {err}"))],
        };

        self.record_output(&responses)?;
        Ok(responses)
    }

    pub fn handle_completion(
        &mut self,
        buffer: &str,
        cursor: usize,
    ) -> io::Result<CompletionResponse> {
        let cursor = cursor.min(buffer.len());
        let (prefix, suffix) = buffer.split_at(cursor);
        let elapsed = self.clock.since_start();
        self.transcript
            .log_completion_request(elapsed, prefix, suffix, cursor)?;

        let result = self.completion.complete(buffer, cursor);
        if result.options.is_empty() {
            self.transcript.log_completion_none(elapsed)?;
            return Ok(CompletionResponse::NoMatches);
        }

        let options: Vec<&'static str> = result.options.iter().copied().collect();
        if let [candidate] = options.as_slice() {
            self.transcript
                .log_completion_applied(elapsed, candidate, result.replacement.clone())?;
            return Ok(match result.replacement {
                Some(replacement) => CompletionResponse::Applied { replacement },
                None => CompletionResponse::NoMatches,
            });
        }

        self.transcript.log_completion_options(elapsed, &options)?;
        Ok(CompletionResponse::Suggestions { options })
    }

    fn handle_outcome(&mut self, outcome: CommandOutcome<SimInstant>) -> Vec<Response> {
        let mut lines = Vec::new();
        match outcome {
            CommandOutcome::Fed(ack) => {
                self.last_fed[ack.road.as_index()] = Some(ack.counts);
                lines.push(Response::Text(format!(
                    "OK feed {} {} at={}",
                    ack.road,
                    describe_counts(ack.counts),
                    ack.requested_at
                )));
            }
            CommandOutcome::Pulsed(ack) => {
                lines.push(Response::Text(format!("OK pulse at={}", ack.requested_at)));
            }
            CommandOutcome::Configured(ack) => {
                lines.push(Response::Text(format!(
                    "OK config {} queued at={}",
                    ack.update.key(),
                    ack.requested_at
                )));
            }
        }
        self.drain(self.clock, true, &mut lines);
        lines
    }

    fn handle_help(&self, topic: Option<&str>) -> Vec<Response> {
        let mut lines = Vec::new();
        match topic {
            Some(target) => {
                if let Some(spec) = catalog::find(target) {
                    lines.push(Response::Text(spec.summary.to_string()));
                } else {
                    lines.push(Response::Text(format!("No help available for `{target}`.")));
                    lines.push(Response::Text(format!(
                        "Available topics: {}",
                        help_topic_list()
                    )));
                }
            }
            None => {
                lines.push(Response::Text("Available commands:".to_string()));
                for spec in catalog::commands() {
                    lines.push(Response::Text(format!("  {}", spec.summary)));
                }
                lines.push(Response::Text(
                    "Type `help <topic>` for a specific command.".to_string(),
                ));
            }
        }
        lines
    }

    fn handle_status(&mut self) -> Vec<Response> {
        let now = self.clock;
        let snapshot = self
            .decisions
            .arbiter_mut()
            .snapshot(now)
            .unwrap_or_else(StatusSnapshot::unknown);
        let formatter = StatusFormatter::new(&snapshot);

        let mut lines = Vec::new();
        let mut line = String::new();
        let _ = formatter.write_lights_line(&mut line);
        lines.push(Response::Text(std::mem::take(&mut line)));
        for index in 0..formatter.road_lines() {
            let _ = formatter.write_road_line(index, &mut line);
            lines.push(Response::Text(std::mem::take(&mut line)));
        }
        let _ = formatter.write_timers_line(&mut line);
        lines.push(Response::Text(std::mem::take(&mut line)));
        lines.push(Response::Text(format!(
            "clock={} processed={} telemetry={}",
            now,
            self.decisions.processed(),
            self.decisions.telemetry().len()
        )));
        lines
    }

    fn handle_config_show(&self) -> Vec<Response> {
        let snapshot = StatusSnapshot::capture(self.decisions.arbiter(), self.clock);
        let mut line = String::new();
        let _ = StatusFormatter::new(&snapshot).write_config_line(&mut line);
        let cadence = CadenceConfig::new();
        vec![
            Response::Text(line),
            Response::Text(format!(
                "cadence pulse={}ms frame={}ms",
                cadence.pulse_interval.as_millis(),
                cadence.frame_interval.as_millis()
            )),
        ]
    }

    /// Steps the simulated clock, firing pulse and frame cadences in order.
    fn handle_advance(&mut self, by: Duration) -> Vec<Response> {
        let target = match advance_target(self.clock, by) {
            Ok(target) => target,
            Err(message) => return vec![Response::Text(message)],
        };
        let mut lines = Vec::new();

        loop {
            let due = match (self.pulses.next_due(), self.frames.next_due()) {
                (Some(pulse), Some(frame)) => pulse.min(frame),
                (Some(single), None) | (None, Some(single)) => single,
                (None, None) => break,
            };
            if due > target {
                break;
            }
            self.clock = due;

            if self.frames.poll(due).is_some() {
                self.replay_frames(due, &mut lines);
            }
            if self.pulses.poll(due).is_some() {
                self.enqueue_timer(DecisionRequest::pulse(due), &mut lines);
            }
            self.drain(due, false, &mut lines);
        }

        self.clock = target;
        lines.push(Response::Text(format!("OK advance clock={}", self.clock)));
        lines
    }

    /// Re-delivers each road's last operator snapshot as a feed frame.
    fn replay_frames(&mut self, now: SimInstant, lines: &mut Vec<Response>) {
        for road in RoadId::ALL {
            if let Some(counts) = self.last_fed[road.as_index()] {
                self.enqueue_timer(DecisionRequest::frame(road, counts, now), lines);
            }
        }
    }

    fn enqueue_timer(&mut self, request: DecisionRequest<SimInstant>, lines: &mut Vec<Response>) {
        let queue = self.executor.scheduler_mut().producer_mut();
        if queue.try_enqueue(request).is_ok() {
            return;
        }

        let now = request.requested_at;
        self.drain(now, false, lines);
        let queue = self.executor.scheduler_mut().producer_mut();
        if queue.try_enqueue(request).is_err() {
            lines.push(Response::Text(format!(
                "WARN dropped {} request at={now}",
                request.kind.tag()
            )));
        }
    }

    /// Processes queued requests one at a time so each board lands after the
    /// report that produced it.
    fn drain(&mut self, now: SimInstant, verbose: bool, lines: &mut Vec<Response>) {
        loop {
            let queue = self.executor.scheduler_mut().producer_mut();
            let request = match RequestQueueConsumer::try_dequeue(queue) {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(RequestDequeueError::Disconnected | RequestDequeueError::Other(())) => {
                    lines.push(Response::Text("ERR queue-disconnected".to_string()));
                    break;
                }
            };

            let report = self.decisions.process(request, now);
            if let Some(text) = describe_report(&report, now, verbose) {
                lines.push(Response::Text(text));
            }
            let boards = self.decisions.arbiter_mut().sink_mut().take();
            lines.extend(boards.into_iter().map(Response::Board));
        }
    }

    fn record_output(&mut self, lines: &[Response]) -> io::Result<()> {
        let elapsed = self.clock.since_start();
        for line in lines {
            self.transcript
                .append_line(elapsed, TranscriptRole::Emulator, &line.to_string())?;
        }
        Ok(())
    }
}

/// Longest step a single `advance` may take; every frame slot is simulated.
const MAX_ADVANCE: Duration = Duration::from_secs(3_600);

fn advance_target(clock: SimInstant, by: Duration) -> Result<SimInstant, String> {
    if by > MAX_ADVANCE {
        return Err(format!(
            "ERR advance {}s exceeds the {}s limit",
            by.as_secs(),
            MAX_ADVANCE.as_secs()
        ));
    }
    Ok(clock + by)
}

fn describe_counts(counts: VehicleCounts) -> String {
    format!(
        "ambulance={} firefighter={} police={} car={} congestion={}",
        counts.ambulance, counts.firefighter, counts.police, counts.car, counts.congestion
    )
}

fn describe_report(
    report: &DecisionReport<SimInstant>,
    now: SimInstant,
    verbose: bool,
) -> Option<String> {
    match report {
        DecisionReport::Pulse { tick, sweep } => {
            let sweep_line = match sweep {
                SweepOutcome::Overdue {
                    overdue,
                    opened: Some(road),
                } => Some(format!("EVT overdue {overdue} served={road} at={now}")),
                SweepOutcome::Overdue {
                    overdue,
                    opened: None,
                } if verbose => Some(format!("EVT overdue {overdue} served=none at={now}")),
                _ => None,
            };
            let tick_line = describe_decision(tick, now, verbose);
            match (tick_line, sweep_line) {
                (Some(tick), Some(sweep)) => Some(format!("{tick}; {sweep}")),
                (tick, sweep) => tick.or(sweep),
            }
        }
        DecisionReport::Frame { tick, .. } => describe_decision(tick, now, verbose),
        DecisionReport::Configured(config) => Some(format!(
            "EVT config min-green={}ms cooldown={}ms starvation={}ms overdue-wait={}ms",
            config.min_green.as_millis(),
            config.emergency_cooldown.as_millis(),
            config.starvation_threshold.as_millis(),
            config.overdue_min_wait.as_millis()
        )),
        DecisionReport::ConfigRejected(error) => Some(format!("ERR config {error}")),
    }
}

fn describe_decision(
    decision: &Decision<SimInstant>,
    now: SimInstant,
    verbose: bool,
) -> Option<String> {
    match decision {
        Decision::EmergencyPreempt {
            road,
            class,
            changed: true,
        } => Some(format!("EVT preempt {road} class={class} at={now}")),
        Decision::DensitySwitch { road, demand } => {
            Some(format!("EVT density {road} demand={demand} at={now}"))
        }
        _ if !verbose => None,
        Decision::EmergencyPreempt { road, class, .. } => {
            Some(format!("EVT preempt {road} class={class} unchanged"))
        }
        Decision::Hold(reason) => Some(match reason {
            HoldReason::NoSnapshots => "EVT hold no-snapshots".to_string(),
            HoldReason::AlreadyOpen(road) => format!("EVT hold {road} already-open"),
            HoldReason::BookkeepingSeeded(road) => format!("EVT hold {road} seeded"),
            HoldReason::MinGreen { road, ready_at } => {
                format!("EVT hold {road} min-green ready={ready_at}")
            }
            HoldReason::EmergencyCooldown { ready_at } => {
                format!("EVT hold cooldown ready={ready_at}")
            }
        }),
    }
}

fn describe_command_error(error: &CommandError<'_, ()>) -> String {
    match error {
        CommandError::Parse(err) => format!("ERR syntax {err}"),
        CommandError::Unsupported(topic) => format!("ERR unsupported {topic}"),
        CommandError::Queue(RequestEnqueueError::QueueFull) => "ERR queue-full".to_string(),
        CommandError::Queue(RequestEnqueueError::Disconnected) => {
            "ERR queue-disconnected".to_string()
        }
        CommandError::Queue(RequestEnqueueError::Other(())) => "ERR queue-error".to_string(),
    }
}

fn help_topic_list() -> String {
    catalog::commands()
        .iter()
        .map(|spec| spec.name)
        .collect::<Vec<_>>()
        .join(", ")
}

struct HostQueue {
    capacity: usize,
    requests: VecDeque<DecisionRequest<SimInstant>>,
}

impl HostQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            requests: VecDeque::with_capacity(capacity),
        }
    }
}

impl RequestQueueProducer for HostQueue {
    type Instant = SimInstant;
    type Error = ();

    fn try_enqueue(
        &mut self,
        request: DecisionRequest<Self::Instant>,
    ) -> Result<(), RequestEnqueueError<Self::Error>> {
        if self.requests.len() >= self.capacity {
            return Err(RequestEnqueueError::QueueFull);
        }

        self.requests.push_back(request);
        Ok(())
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }

    fn len(&self) -> Option<usize> {
        Some(self.requests.len())
    }
}

impl RequestQueueConsumer for HostQueue {
    type Instant = SimInstant;
    type Error = ();

    fn try_dequeue(
        &mut self,
    ) -> Result<Option<DecisionRequest<Self::Instant>>, RequestDequeueError<Self::Error>> {
        Ok(self.requests.pop_front())
    }

    fn len(&self) -> Option<usize> {
        Some(self.requests.len())
    }
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(profile: TranscriptProfile) -> io::Result<Self> {
        let path = Path::new(profile.log_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header(profile)?;
        Ok(logger)
    }

    fn write_header(&mut self, profile: TranscriptProfile) -> io::Result<()> {
        writeln!(self.writer, "# {}", profile.header())?;
        writeln!(
            self.writer,
            "# Timestamps are simulated milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }

    fn log_completion_request(
        &mut self,
        elapsed: Duration,
        prefix: &str,
        suffix: &str,
        cursor: usize,
    ) -> io::Result<()> {
        let message = format!("[TAB] prefix={prefix:?} suffix={suffix:?} cursor={cursor}");
        self.append_line(elapsed, TranscriptRole::Host, &message)
    }

    fn log_completion_none(&mut self, elapsed: Duration) -> io::Result<()> {
        self.append_line(elapsed, TranscriptRole::Emulator, "completion: no matches")
    }

    fn log_completion_applied(
        &mut self,
        elapsed: Duration,
        candidate: &str,
        replacement: Option<Replacement>,
    ) -> io::Result<()> {
        let message = match replacement {
            Some(rep) => format!(
                "completion applied: {candidate} (range={}..{})",
                rep.start, rep.end
            ),
            None => format!("completion candidate: {candidate} (no replacement applied)"),
        };
        self.append_line(elapsed, TranscriptRole::Emulator, &message)
    }

    fn log_completion_options(
        &mut self,
        elapsed: Duration,
        options: &[&'static str],
    ) -> io::Result<()> {
        let summary = format!("completion options ({})", options.len());
        self.append_line(elapsed, TranscriptRole::Emulator, &summary)?;
        for option in options {
            self.append_line(elapsed, TranscriptRole::Emulator, &format!("  {option}"))?;
        }
        Ok(())
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_within_limit_moves_the_clock() {
        let start = SimInstant::ZERO + Duration::from_secs(5);
        assert_eq!(
            advance_target(start, MAX_ADVANCE),
            Ok(start + MAX_ADVANCE)
        );
    }

    #[test]
    fn oversized_advance_is_rejected() {
        let by = Duration::from_secs(u64::from(u32::MAX));
        let reply = advance_target(SimInstant::ZERO, by).expect_err("beyond the limit");
        assert!(reply.starts_with("ERR advance 4294967295s"));
    }
}
