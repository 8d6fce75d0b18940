//! Grammar-aware completion engine shared by firmware and emulator consoles.
//!
//! The line editor can invoke this module to look up suggestions based on the
//! current buffer contents and cursor position without pulling in `std`.

use super::catalog::{self, Node};
use super::grammar::{self, Command, ConfigCommand, GrammarErrorKind, Token, TokenKind};
use heapless::Vec as HeaplessVec;

const MAX_SUGGESTIONS: usize = 16;

const ROOT_COMMANDS: &[&str] = &["status", "feed", "pulse", "config", "advance", "help"];
const ROAD_NAMES: &[&str] = &["road1", "road2", "road3", "road4"];
const FEED_ASSIGNMENTS: &[&str] = &[
    "ambulance=",
    "firefighter=",
    "police=",
    "car=",
    "congestion=",
];
const CONFIG_KEYS: &[&str] = &["min-green", "cooldown", "starvation", "overdue-wait"];

/// Completion result returned to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionResult {
    /// Replacement to apply when only one candidate matches or when the
    /// candidates share a longer prefix than what was typed.
    pub replacement: Option<Replacement>,
    /// Candidates for the current cursor position; empty when nothing matches.
    pub options: HeaplessVec<&'static str, MAX_SUGGESTIONS>,
}

impl CompletionResult {
    const fn empty() -> Self {
        Self {
            replacement: None,
            options: HeaplessVec::new(),
        }
    }
}

/// Portion of the buffer to substitute with a completion string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Replacement {
    pub start: usize,
    pub end: usize,
    pub value: &'static str,
    pub append_space: bool,
}

/// Stateless completion engine that mirrors the console grammar.
#[derive(Default)]
pub struct CompletionEngine;

impl CompletionEngine {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes completions for `buffer` at `cursor`.
    ///
    /// The cursor must sit on a UTF-8 boundary; callers restrict input to ASCII.
    #[must_use]
    pub fn complete(&self, buffer: &str, cursor: usize) -> CompletionResult {
        if cursor > buffer.len() {
            return CompletionResult::empty();
        }

        let upto_cursor = &buffer[..cursor];
        let prefix_start = token_start(upto_cursor);
        let prefix = &upto_cursor[prefix_start..];
        let leading = &upto_cursor[..prefix_start];

        let Ok(leading_tokens) = grammar::lex(leading) else {
            return CompletionResult::empty();
        };

        let context = determine_context(leading_tokens.as_slice());
        let candidates = match context {
            CompletionContext::Root | CompletionContext::HelpTopic => ROOT_COMMANDS,
            CompletionContext::RoadArg => ROAD_NAMES,
            CompletionContext::FeedAssign => FEED_ASSIGNMENTS,
            CompletionContext::ConfigKey => CONFIG_KEYS,
            CompletionContext::None => return CompletionResult::empty(),
        };

        let mut matches: HeaplessVec<&'static str, MAX_SUGGESTIONS> = HeaplessVec::new();
        for candidate in candidates {
            if starts_with_ignore_ascii_case(candidate, prefix) {
                let _ = matches.push(*candidate);
            }
        }

        let replacement_value = match matches.as_slice() {
            [] => None,
            [single] => Some((*single, should_append_space(context, single))),
            several => {
                let lcp = longest_common_prefix(several);
                let shared = common_prefix_len_ignore_case(prefix, lcp);
                (lcp.len() > shared).then_some((lcp, false))
            }
        };

        CompletionResult {
            replacement: replacement_value.map(|(value, append_space)| Replacement {
                start: prefix_start,
                end: cursor,
                value,
                append_space,
            }),
            options: matches,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CompletionContext {
    Root,
    RoadArg,
    FeedAssign,
    ConfigKey,
    HelpTopic,
    None,
}

fn determine_context(tokens: &[Token<'_>]) -> CompletionContext {
    if tokens.is_empty() {
        return CompletionContext::Root;
    }

    if tokens.iter().any(|token| token.kind == TokenKind::Error) {
        return CompletionContext::None;
    }

    match grammar::parse_tokens_partial(tokens) {
        Ok((command, rest)) if rest.is_empty() => classify_success(tokens, &command),
        Ok(_) => CompletionContext::None,
        Err(err) => classify_error(tokens, &err.kind),
    }
}

fn classify_success(tokens: &[Token<'_>], command: &Command<'_>) -> CompletionContext {
    match command {
        Command::Feed(_) => CompletionContext::FeedAssign,
        Command::Config(ConfigCommand::Show) => CompletionContext::ConfigKey,
        Command::Help(help) if help.topic.is_none() => CompletionContext::HelpTopic,
        _ => infer_from_tokens(tokens),
    }
}

fn classify_error(tokens: &[Token<'_>], error: &GrammarErrorKind<'_>) -> CompletionContext {
    match error {
        GrammarErrorKind::UnexpectedEnd { expected: "road" } => CompletionContext::RoadArg,
        GrammarErrorKind::UnknownRoad { .. } => CompletionContext::None,
        _ => infer_from_tokens(tokens),
    }
}

fn infer_from_tokens(tokens: &[Token<'_>]) -> CompletionContext {
    match tokens {
        [] => CompletionContext::Root,
        [first] if first.lexeme.eq_ignore_ascii_case("feed") => CompletionContext::RoadArg,
        [first] if first.lexeme.eq_ignore_ascii_case("config") => CompletionContext::ConfigKey,
        [first] if first.lexeme.eq_ignore_ascii_case("help") => CompletionContext::HelpTopic,
        _ => CompletionContext::None,
    }
}

fn token_start(buffer: &str) -> usize {
    let bytes = buffer.as_bytes();
    let mut index = buffer.len();
    while index > 0 {
        let byte = bytes[index - 1];
        if byte == b' ' || byte == b'\t' {
            break;
        }
        index -= 1;
    }
    index
}

fn starts_with_ignore_ascii_case(candidate: &str, prefix: &str) -> bool {
    prefix.len() <= candidate.len() && candidate[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn common_prefix_len_ignore_case(lhs: &str, rhs: &str) -> usize {
    lhs.as_bytes()
        .iter()
        .zip(rhs.as_bytes())
        .take_while(|(l, r)| l.eq_ignore_ascii_case(r))
        .count()
}

fn longest_common_prefix(candidates: &[&'static str]) -> &'static str {
    let Some((first, rest)) = candidates.split_first() else {
        return "";
    };
    let mut prefix = *first;
    for candidate in rest {
        let len = common_prefix_len_ignore_case(prefix, candidate);
        prefix = &prefix[..len];
        if prefix.is_empty() {
            break;
        }
    }
    prefix
}

fn should_append_space(context: CompletionContext, candidate: &str) -> bool {
    match context {
        CompletionContext::Root => catalog::find(candidate)
            .is_some_and(|spec| !matches!(spec.grammar, Node::End)),
        CompletionContext::RoadArg | CompletionContext::ConfigKey => true,
        _ => false,
    }
}
