//! Console tooling shared between firmware and emulator targets.
//!
//! The grammar lives in [`grammar`] and is implemented with a token/parse
//! pipeline that stays compatible with `no_std`. The feed link reuses the same
//! parser through [`grammar::parse_feed_line`].

pub mod catalog;
pub mod commands;
pub mod completion;
pub mod grammar;
pub mod status;
