//! Console responses for the operator REPL.
//!
//! Read-only commands are answered from the status provider; everything else
//! goes through the core `CommandExecutor` and is acknowledged once queued.

use core::fmt::{self, Write};

use intersection_core::repl::catalog;
use intersection_core::repl::commands::{
    CommandError, CommandExecutor, CommandOutcome, RequestEnqueuer,
};
use intersection_core::repl::grammar::{self, Command, ConfigCommand};
use intersection_core::repl::status::{StatusFormatter, StatusProvider, StatusSnapshot};
use intersection_core::scheduler::RequestEnqueueError;

/// Executes `line` and writes the CRLF-terminated response into `out`.
pub fn respond<E, P, W>(
    executor: &mut CommandExecutor<E>,
    status: &mut P,
    line: &str,
    now: E::Instant,
    out: &mut W,
) -> fmt::Result
where
    E: RequestEnqueuer,
    P: StatusProvider<E::Instant>,
    W: Write,
{
    let command = match grammar::parse(line) {
        Ok(command) => command,
        Err(err) => return write!(out, "ERR syntax {err}\r\n"),
    };

    match command {
        Command::Help(help) => write_help(help.topic, out),
        Command::Status => {
            let snapshot = status.snapshot(now).unwrap_or_else(StatusSnapshot::unknown);
            write_status(&snapshot, out)
        }
        Command::Config(ConfigCommand::Show) => {
            let snapshot = status.snapshot(now).unwrap_or_else(StatusSnapshot::unknown);
            StatusFormatter::new(&snapshot).write_config_line(out)?;
            out.write_str("\r\n")
        }
        command => match executor.dispatch(command, now) {
            Ok(outcome) => write_outcome(&outcome, out),
            Err(error) => write_error(&error, out),
        },
    }
}

fn write_outcome<I, W: Write>(outcome: &CommandOutcome<I>, out: &mut W) -> fmt::Result {
    match outcome {
        CommandOutcome::Fed(ack) => write!(
            out,
            "OK feed {} demand={}\r\n",
            ack.road,
            ack.counts.demand_score()
        ),
        CommandOutcome::Pulsed(_) => out.write_str("OK pulse\r\n"),
        CommandOutcome::Configured(ack) => {
            write!(out, "OK config {} queued\r\n", ack.update.key())
        }
    }
}

fn write_error<E, W: Write>(error: &CommandError<'_, E>, out: &mut W) -> fmt::Result {
    match error {
        CommandError::Parse(err) => write!(out, "ERR syntax {err}\r\n"),
        CommandError::Unsupported("advance") => {
            out.write_str("ERR unsupported advance (the controller runs on wall-clock time)\r\n")
        }
        CommandError::Unsupported(topic) => write!(out, "ERR unsupported {topic}\r\n"),
        CommandError::Queue(RequestEnqueueError::QueueFull) => {
            out.write_str("ERR busy decision queue full\r\n")
        }
        CommandError::Queue(RequestEnqueueError::Disconnected | RequestEnqueueError::Other(_)) => {
            out.write_str("ERR queue-error\r\n")
        }
    }
}

fn write_status<W: Write>(snapshot: &StatusSnapshot, out: &mut W) -> fmt::Result {
    let formatter = StatusFormatter::new(snapshot);
    formatter.write_lights_line(out)?;
    out.write_str("\r\n")?;
    for index in 0..formatter.road_lines() {
        formatter.write_road_line(index, out)?;
        out.write_str("\r\n")?;
    }
    formatter.write_timers_line(out)?;
    out.write_str("\r\n")
}

fn write_help<W: Write>(topic: Option<&str>, out: &mut W) -> fmt::Result {
    match topic {
        Some(target) => match catalog::find(target) {
            Some(spec) => write!(out, "{}\r\n", spec.summary),
            None => {
                write!(out, "No help available for `{target}`.\r\nAvailable topics:")?;
                for spec in catalog::commands() {
                    write!(out, " {}", spec.name)?;
                }
                out.write_str("\r\n")
            }
        },
        None => {
            out.write_str("Available commands:\r\n")?;
            for spec in catalog::commands() {
                write!(out, "  {}\r\n", spec.summary)?;
            }
            out.write_str("Type `help <topic>` for a specific command.\r\n")
        }
    }
}
