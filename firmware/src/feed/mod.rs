//! Perception feed ingestion for the CDC1 interface.
//!
//! Each newline-terminated line carries one road's counts in the console's
//! `feed` syntax (the keyword itself is optional). Valid lines become frame
//! requests; anything else is dropped with a warning.

use heapless::String;
use intersection_core::repl::grammar;
use intersection_core::roads::RoadId;
use intersection_core::scheduler::{
    RequestEnqueueError, RequestQueueProducer, RequestScheduler, RequestSource,
};

/// Maximum number of bytes accepted on one feed line (excluding terminator).
pub const MAX_FEED_LINE_LEN: usize = 96;

/// What happened to a completed feed line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FeedEvent {
    Queued(RoadId),
    Malformed,
    Overflow,
    QueueFull,
}

/// Assembles feed lines and turns them into frame requests.
pub struct FeedIngest<P>
where
    P: RequestQueueProducer,
{
    scheduler: RequestScheduler<P>,
    line: String<MAX_FEED_LINE_LEN>,
    overflowed: bool,
    invalid: bool,
}

impl<P> FeedIngest<P>
where
    P: RequestQueueProducer,
{
    pub fn new(producer: P) -> Self {
        Self {
            scheduler: RequestScheduler::new(producer),
            line: String::new(),
            overflowed: false,
            invalid: false,
        }
    }

    /// Discards any partial line, e.g. after the host drops DTR.
    pub fn reset(&mut self) {
        self.line.clear();
        self.overflowed = false;
        self.invalid = false;
    }

    /// Feeds one byte. Returns an event when a line terminator completes a line.
    pub fn ingest(&mut self, byte: u8, now: P::Instant) -> Option<FeedEvent> {
        match byte {
            b'\r' | b'\n' => self.finish_line(now),
            value if value.is_ascii() && !value.is_ascii_control() => {
                if self.line.push(char::from(value)).is_err() {
                    self.overflowed = true;
                }
                None
            }
            b'\t' => {
                if self.line.push(' ').is_err() {
                    self.overflowed = true;
                }
                None
            }
            _ => {
                self.invalid = true;
                None
            }
        }
    }

    fn finish_line(&mut self, now: P::Instant) -> Option<FeedEvent> {
        let overflowed = core::mem::take(&mut self.overflowed);
        let invalid = core::mem::take(&mut self.invalid);
        if self.line.trim().is_empty() && !overflowed && !invalid {
            self.line.clear();
            return None;
        }

        let event = if overflowed {
            FeedEvent::Overflow
        } else if invalid {
            FeedEvent::Malformed
        } else {
            match grammar::parse_feed_line(&self.line) {
                Ok(feed) => {
                    match self
                        .scheduler
                        .frame(feed.road, feed.counts, now, RequestSource::Feed)
                    {
                        Ok(()) => FeedEvent::Queued(feed.road),
                        Err(RequestEnqueueError::QueueFull) => FeedEvent::QueueFull,
                        Err(RequestEnqueueError::Disconnected | RequestEnqueueError::Other(_)) => {
                            FeedEvent::Malformed
                        }
                    }
                }
                Err(_) => FeedEvent::Malformed,
            }
        };
        self.line.clear();

        log_feed_event(event);
        Some(event)
    }
}

fn log_feed_event(event: FeedEvent) {
    match event {
        FeedEvent::Queued(_) => {}
        FeedEvent::Malformed => emit_warning("malformed line dropped"),
        FeedEvent::Overflow => emit_warning("line too long, dropped"),
        FeedEvent::QueueFull => emit_warning("decision queue full, frame dropped"),
    }
}

#[cfg(target_os = "none")]
fn emit_warning(message: &'static str) {
    defmt::warn!("feed: {}", message);
}

#[cfg(not(target_os = "none"))]
fn emit_warning(message: &'static str) {
    println!("feed: {message}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decisions::{DecisionQueue, FirmwareInstant, RequestProducer};
    use intersection_core::roads::{Snapshot, VehicleCounts};
    use intersection_core::scheduler::RequestKind;

    fn feed_bytes<P: RequestQueueProducer<Instant = FirmwareInstant>>(
        ingest: &mut FeedIngest<P>,
        bytes: &[u8],
    ) -> std::vec::Vec<FeedEvent> {
        bytes
            .iter()
            .filter_map(|byte| ingest.ingest(*byte, FirmwareInstant::from_micros(0)))
            .collect()
    }

    #[test]
    fn lines_become_feed_frames() {
        let queue = DecisionQueue::new();
        let mut ingest = FeedIngest::new(RequestProducer::new(queue.sender()));

        let events = feed_bytes(
            &mut ingest,
            b"road2 car=4 congestion=13\r\nfeed road1 police=1\n",
        );
        assert_eq!(
            events,
            [FeedEvent::Queued(RoadId::Road2), FeedEvent::Queued(RoadId::Road1)]
        );

        let first = queue.try_receive().expect("frame queued");
        assert_eq!(first.source, RequestSource::Feed);
        assert_eq!(
            first.kind,
            RequestKind::Frame(Snapshot::new(RoadId::Road2, VehicleCounts::traffic(4, 13)))
        );
        let second = queue.try_receive().expect("frame queued");
        assert_eq!(
            second.kind,
            RequestKind::Frame(Snapshot::new(RoadId::Road1, VehicleCounts::new(0, 0, 1, 0, 0)))
        );
    }

    #[test]
    fn malformed_and_oversized_lines_are_dropped() {
        let queue = DecisionQueue::new();
        let mut ingest = FeedIngest::new(RequestProducer::new(queue.sender()));

        let mut long_line = std::vec![b'a'; MAX_FEED_LINE_LEN + 4];
        long_line.push(b'\n');

        assert_eq!(feed_bytes(&mut ingest, b"road9 car=1\n"), [FeedEvent::Malformed]);
        assert_eq!(feed_bytes(&mut ingest, &long_line), [FeedEvent::Overflow]);
        assert_eq!(feed_bytes(&mut ingest, b"road1 car=\xff\n"), [FeedEvent::Malformed]);
        assert!(feed_bytes(&mut ingest, b"\r\n\n").is_empty());
        assert!(queue.try_receive().is_err());
    }
}
