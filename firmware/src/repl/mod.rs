//! Operator console session for the USB CDC0 interface.
//!
//! The session assembles ASCII lines with local echo, backspace and tab
//! completion, then hands finished lines to [`commands::respond`]. All output
//! is written into a caller-provided buffer that the USB task drains in
//! packet-sized chunks.

pub mod commands;

use core::fmt::Write;

use heapless::String;
use intersection_core::repl::commands::{CommandExecutor, RequestEnqueuer};
use intersection_core::repl::completion::CompletionEngine;
use intersection_core::repl::status::StatusProvider;

/// Maximum number of bytes accepted on a single console line (excluding terminator).
pub const MAX_LINE_LEN: usize = 96;
/// Capacity of the per-byte output buffer.
pub const OUTPUT_CAPACITY: usize = 1024;
pub const PROMPT: &str = "> ";

const BANNER: &str = "intersection controller console\r\nType `help` for commands.\r\n";

pub type ReplOutput = String<OUTPUT_CAPACITY>;

/// Errors surfaced by the console session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReplError {
    /// Input exceeded the maximum configured line length.
    LineOverflow,
    /// The response did not fit in the output buffer and was truncated.
    OutputOverflow,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SessionState {
    Disconnected,
    Connected,
}

/// Maintains console state for the CDC0 session.
pub struct ReplSession<E, P>
where
    E: RequestEnqueuer,
    P: StatusProvider<E::Instant>,
{
    executor: CommandExecutor<E>,
    status: P,
    completion: CompletionEngine,
    buffer: String<MAX_LINE_LEN>,
    state: SessionState,
    last_was_cr: bool,
}

impl<E, P> ReplSession<E, P>
where
    E: RequestEnqueuer,
    P: StatusProvider<E::Instant>,
{
    pub fn new(enqueuer: E, status: P) -> Self {
        Self {
            executor: CommandExecutor::new(enqueuer),
            status,
            completion: CompletionEngine::new(),
            buffer: String::new(),
            state: SessionState::Disconnected,
            last_was_cr: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn line(&self) -> &str {
        &self.buffer
    }

    /// Marks the transport as connected (host raised DTR) and greets the operator.
    pub fn on_connect(&mut self, out: &mut ReplOutput) -> Result<(), ReplError> {
        self.state = SessionState::Connected;
        self.buffer.clear();
        self.last_was_cr = false;
        write_all(out, &[BANNER, PROMPT])
    }

    /// Marks the transport as disconnected (host dropped DTR).
    pub fn on_disconnect(&mut self) {
        self.state = SessionState::Disconnected;
        self.buffer.clear();
        self.last_was_cr = false;
    }

    /// Feeds a single byte into the session, appending any echo or response to `out`.
    pub fn ingest(
        &mut self,
        byte: u8,
        now: E::Instant,
        out: &mut ReplOutput,
    ) -> Result<(), ReplError> {
        if self.state != SessionState::Connected {
            return Ok(());
        }

        let after_cr = core::mem::replace(&mut self.last_was_cr, byte == b'\r');
        match byte {
            b'\n' if after_cr => Ok(()),
            b'\r' | b'\n' => self.process_line(now, out),
            0x08 | 0x7f => {
                if self.buffer.pop().is_some() {
                    write_all(out, &["\x08 \x08"])?;
                }
                Ok(())
            }
            b'\t' => self.complete(out),
            value if value.is_ascii() && !value.is_ascii_control() => {
                let ch = char::from(value);
                self.buffer.push(ch).map_err(|_| ReplError::LineOverflow)?;
                out.push(ch).map_err(|_| ReplError::OutputOverflow)
            }
            _ => Ok(()),
        }
    }

    fn process_line(&mut self, now: E::Instant, out: &mut ReplOutput) -> Result<(), ReplError> {
        write_all(out, &["\r\n"])?;
        let line = core::mem::take(&mut self.buffer);
        if !line.trim().is_empty() {
            commands::respond(&mut self.executor, &mut self.status, &line, now, out)
                .map_err(|_| ReplError::OutputOverflow)?;
        }
        write_all(out, &[PROMPT])
    }

    fn complete(&mut self, out: &mut ReplOutput) -> Result<(), ReplError> {
        let result = self.completion.complete(&self.buffer, self.buffer.len());

        let pending = result.replacement.filter(|replacement| {
            replacement.append_space
                || !self
                    .buffer
                    .get(replacement.start..replacement.end)
                    .is_some_and(|typed| typed.eq_ignore_ascii_case(replacement.value))
        });

        if let Some(replacement) = pending {
            let typed = &self.buffer[replacement.start..replacement.end];
            let mut echo = String::<MAX_LINE_LEN>::new();
            match replacement.value.get(typed.len()..) {
                Some(rest) if replacement.value[..typed.len()].eq_ignore_ascii_case(typed) => {
                    echo.push_str(rest).map_err(|_| ReplError::LineOverflow)?;
                }
                _ => {
                    for _ in 0..typed.len() {
                        echo.push('\x08').map_err(|_| ReplError::LineOverflow)?;
                    }
                    echo.push_str(replacement.value)
                        .map_err(|_| ReplError::LineOverflow)?;
                }
            }

            self.buffer.truncate(replacement.start);
            self.buffer
                .push_str(replacement.value)
                .map_err(|_| ReplError::LineOverflow)?;
            if replacement.append_space {
                self.buffer.push(' ').map_err(|_| ReplError::LineOverflow)?;
                echo.push(' ').map_err(|_| ReplError::LineOverflow)?;
            }
            return write_all(out, &[echo.as_str()]);
        }

        if result.options.len() < 2 {
            return Ok(());
        }
        write_all(out, &["\r\n"])?;
        for option in &result.options {
            write!(out, "{option}  ").map_err(|_| ReplError::OutputOverflow)?;
        }
        write_all(out, &["\r\n", PROMPT, self.buffer.as_str()])
    }
}

fn write_all(out: &mut ReplOutput, parts: &[&str]) -> Result<(), ReplError> {
    for part in parts {
        out.push_str(part).map_err(|_| ReplError::OutputOverflow)?;
    }
    Ok(())
}
