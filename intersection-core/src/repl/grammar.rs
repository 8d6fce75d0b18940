#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for the operator console and the feed line protocol.
//!
//! `regal` splits a line into a fixed-size token buffer. Parsing walks the
//! grammar tables in [`catalog`] with `winnow` parsers over that buffer.

use super::catalog::{self, ChoiceBranch, ChoiceTag, CommandTag, DefaultChoice, Node, ValueSpec};
use crate::config::ConfigUpdate;
use crate::roads::{RoadId, VehicleCounts};
use core::fmt;
use core::ops::Range;
use core::time::Duration;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
use winnow::error::ErrMode;
use winnow::prelude::*;

/// Upper bound on tokens kept for one console or feed line.
pub const MAX_TOKENS: usize = 32;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// `250ms`, `10s`.
    #[regex(r"[0-9]+(?:ms|s)", priority = 2)]
    Duration,
    /// Vehicle count on the right of `class=`.
    #[regex(r"[0-9]+")]
    Integer,
    /// Command keywords, road names, classes and windows alike.
    #[regex(r"[A-Za-z][A-Za-z0-9-]*")]
    Ident,
    #[token("=")]
    Equals,
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Any byte the console does not understand.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// One lexeme and where it sits in the line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// The line holds more than [`MAX_TOKENS`] tokens.
    TooManyTokens { processed: usize },
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "line too long ({processed} tokens, limit {MAX_TOKENS})")
            }
            LexError::Engine => f.write_str("lexer failure"),
        }
    }
}

/// Why a token sequence is not a valid command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarErrorKind<'a> {
    UnexpectedToken {
        expected: &'static str,
        found: Option<TokenKind>,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    UnknownRoad {
        span: Range<usize>,
        lexeme: &'a str,
    },
    InvalidInteger {
        span: Range<usize>,
    },
    InvalidDuration {
        span: Range<usize>,
    },
    InvalidToken {
        span: Range<usize>,
        lexeme: &'a str,
    },
}

impl fmt::Display for GrammarErrorKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarErrorKind::UnexpectedToken {
                expected,
                found,
                span,
            } => match found {
                Some(kind) => write!(f, "wanted {expected} at col {}, got {kind:?}", span.start),
                None => write!(f, "wanted {expected} at col {}", span.start),
            },
            GrammarErrorKind::UnexpectedEnd { expected } => {
                write!(f, "line ended early, wanted {expected}")
            }
            GrammarErrorKind::UnknownRoad { span, lexeme } => {
                write!(f, "no road named `{lexeme}` (col {})", span.start)
            }
            GrammarErrorKind::InvalidInteger { span } => {
                write!(f, "count out of range at col {}", span.start)
            }
            GrammarErrorKind::InvalidDuration { span } => {
                write!(f, "bad duration at col {}", span.start)
            }
            GrammarErrorKind::InvalidToken { span, lexeme } => {
                write!(f, "stray `{lexeme}` at col {}", span.start)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrammarError<'a> {
    pub kind: GrammarErrorKind<'a>,
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl<'a> From<GrammarErrorKind<'a>> for GrammarError<'a> {
    fn from(kind: GrammarErrorKind<'a>) -> Self {
        Self { kind }
    }
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        token
            .map_or(GrammarErrorKind::UnexpectedEnd { expected }, |found| {
                GrammarErrorKind::UnexpectedToken {
                    expected,
                    found: Some(found.kind),
                    span: found.span.clone(),
                }
            })
            .into()
    }

    fn unknown_road(token: &Token<'a>) -> Self {
        GrammarErrorKind::UnknownRoad {
            span: token.span.clone(),
            lexeme: token.lexeme,
        }
        .into()
    }

    fn invalid_integer(token: &Token<'a>) -> Self {
        GrammarErrorKind::InvalidInteger {
            span: token.span.clone(),
        }
        .into()
    }

    fn invalid_duration(token: &Token<'a>) -> Self {
        GrammarErrorKind::InvalidDuration {
            span: token.span.clone(),
        }
        .into()
    }

    fn invalid_token(token: &Token<'a>) -> Self {
        GrammarErrorKind::InvalidToken {
            span: token.span.clone(),
            lexeme: token.lexeme,
        }
        .into()
    }
}

type Input<'src, 'toks> = &'toks [Token<'src>];

/// Failure from [`parse`] or [`parse_feed_line`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => fmt::Display::fmt(err, f),
            ParseError::Grammar(err) => fmt::Display::fmt(err, f),
        }
    }
}

/// Structured commands produced by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Status,
    Feed(FeedCommand),
    Pulse,
    Config(ConfigCommand),
    Advance(Duration),
    Help(HelpCommand<'a>),
}

/// Snapshot delivered for one road; omitted classes count as zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeedCommand {
    pub road: RoadId,
    pub counts: VehicleCounts,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigCommand {
    Show,
    Set(ConfigUpdate),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelpCommand<'a> {
    pub topic: Option<&'a str>,
}

pub(crate) fn parse_tokens_partial<'src, 'toks>(
    tokens: &'toks [Token<'src>],
) -> Result<(Command<'src>, &'toks [Token<'src>]), GrammarError<'src>>
where
    'src: 'toks,
{
    let mut input = tokens;
    let parsed = command().parse_next(&mut input);
    parsed.map(|cmd| (cmd, input)).map_err(|err| settle(err, input))
}

fn settle<'src>(err: ErrMode<GrammarError<'src>>, rest: &[Token<'src>]) -> GrammarError<'src> {
    match err {
        ErrMode::Backtrack(err) | ErrMode::Cut(err) => err,
        ErrMode::Incomplete(_) => GrammarError::unexpected("token", rest.first()),
    }
}

/// Splits `line` into tokens, skipping whitespace.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let tail = cache
        .rebuild(TokenKind::lexer(), line)
        .map_err(|err| match err {
            IncrementalError::TokenOverflow => LexError::TooManyTokens {
                processed: MAX_TOKENS,
            },
            _ => LexError::Engine,
        })?;

    let mut tokens = TokenBuffer::new();
    for record in cache.tokens().iter().filter(|record| !record.skipped) {
        let span = record.start..record.end;
        push_token(&mut tokens, record.token, &line[span.clone()], span)?;
    }

    // Input the lexer could not finish is surfaced as one error token.
    if let Some(tail) = tail.filter(|tail| !tail.fragment.is_empty()) {
        let span = tail.start..tail.start + tail.fragment.len();
        push_token(&mut tokens, TokenKind::Error, tail.fragment, span)?;
    }
    Ok(tokens)
}

fn push_token<'a>(
    tokens: &mut TokenBuffer<'a>,
    kind: TokenKind,
    lexeme: &'a str,
    span: Range<usize>,
) -> Result<(), LexError> {
    let processed = tokens.len() + 1;
    tokens
        .push(Token { kind, lexeme, span })
        .map_err(|_| LexError::TooManyTokens { processed })
}

fn lex_clean(line: &str) -> Result<TokenBuffer<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;
    match tokens.iter().find(|token| token.kind == TokenKind::Error) {
        Some(stray) => Err(ParseError::Grammar(GrammarError::invalid_token(stray))),
        None => Ok(tokens),
    }
}

fn expect_line_end<'a>(rest: &[Token<'a>], label: &'static str) -> Result<(), ParseError<'a>> {
    match rest.iter().find(|token| token.kind != TokenKind::Eol) {
        Some(extra) => Err(ParseError::Grammar(GrammarError::unexpected(
            label,
            Some(extra),
        ))),
        None => Ok(()),
    }
}

/// Parses one console line.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex_clean(line)?;
    let (command, rest) = parse_tokens_partial(&tokens).map_err(ParseError::Grammar)?;
    expect_line_end(rest, "end of command")?;
    Ok(command)
}

/// Parses a feed link line: `[feed] <road> [class=N ...]`.
///
/// Same road and count syntax as the console's `feed` command, with the
/// keyword optional.
pub fn parse_feed_line(line: &str) -> Result<FeedCommand, ParseError<'_>> {
    let tokens = lex_clean(line)?;

    let mut input = tokens.as_slice();
    if let [first, rest @ ..] = input
        && first.kind == TokenKind::Ident
        && first.lexeme.eq_ignore_ascii_case("feed")
    {
        input = rest;
    }

    let mut state = CommandState::new(CommandTag::Feed);
    parse_node(catalog::command(CommandTag::Feed).grammar, &mut input, &mut state)
        .map_err(|err| ParseError::Grammar(settle(err, input)))?;
    expect_line_end(input, "end of line")?;

    match state.finish() {
        Ok(Command::Feed(feed)) => Ok(feed),
        Ok(_) => Err(ParseError::Grammar(GrammarError::unexpected("road", None))),
        Err(err) => Err(ParseError::Grammar(settle(err, &[]))),
    }
}

fn command<'src, 'toks>() -> impl Parser<Input<'src, 'toks>, Command<'src>, ErrMode<GrammarError<'src>>>
where
    'src: 'toks,
{
    move |input: &mut Input<'src, 'toks>| {
        let snapshot = *input;
        let command_token = expect_kind(TokenKind::Ident, "command keyword").parse_next(input)?;

        if let Some(spec) = catalog::find(command_token.lexeme) {
            let mut state = CommandState::new(spec.tag);
            parse_node(spec.grammar, input, &mut state)?;
            state.finish()
        } else {
            *input = snapshot;
            Err(ErrMode::Backtrack(GrammarError::unexpected(
                "command keyword",
                Some(&command_token),
            )))
        }
    }
}

fn parse_node<'src, 'toks>(
    node: &'static Node,
    input: &mut Input<'src, 'toks>,
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'toks,
{
    match node {
        Node::End => Ok(()),
        Node::OptionalChoice { choices, default } => {
            parse_optional_choice(input, choices, *default, state)
        }
        Node::RepeatedChoice(choices) => parse_repeated_choice(input, choices, state),
        Node::Road { next } => {
            let road = parse_road(input)?;
            state.set_road(road);
            parse_node(next, input, state)
        }
        Node::Value { tag, value, next } => {
            let value = parse_value(input, *value)?;
            state.apply_choice(*tag, value)?;
            parse_node(next, input, state)
        }
        Node::Topic { next, .. } => {
            parse_topic(input, state)?;
            parse_node(next, input, state)
        }
    }
}

fn parse_optional_choice<'src, 'toks>(
    input: &mut Input<'src, 'toks>,
    choices: &'static [ChoiceBranch],
    default: Option<DefaultChoice>,
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'toks,
{
    match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Ident => {
            if let Some(branch) = find_choice(choices, token.lexeme) {
                *input = rest;
                parse_choice_branch(input, branch, state)
            } else {
                Err(ErrMode::Backtrack(GrammarError::unexpected(
                    choice_expected_label(choices),
                    Some(token),
                )))
            }
        }
        Some((token, _)) if token.kind != TokenKind::Eol => Err(ErrMode::Backtrack(
            GrammarError::unexpected(choice_expected_label(choices), Some(token)),
        )),
        _ => match default {
            Some(default_choice) => {
                state.apply_choice(default_choice.tag, ChoiceValue::None)?;
                parse_node(default_choice.next, input, state)
            }
            None => Ok(()),
        },
    }
}

fn parse_repeated_choice<'src, 'toks>(
    input: &mut Input<'src, 'toks>,
    choices: &'static [ChoiceBranch],
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'toks,
{
    while let Some((token, rest)) = input.split_first() {
        match token.kind {
            TokenKind::Eol => break,
            TokenKind::Ident => {
                let Some(branch) = find_choice(choices, token.lexeme) else {
                    return Err(ErrMode::Backtrack(GrammarError::unexpected(
                        choice_expected_label(choices),
                        Some(token),
                    )));
                };
                *input = rest;
                parse_choice_branch(input, branch, state)?;
            }
            _ => {
                return Err(ErrMode::Backtrack(GrammarError::unexpected(
                    choice_expected_label(choices),
                    Some(token),
                )));
            }
        }
    }
    Ok(())
}

fn parse_choice_branch<'src, 'toks>(
    input: &mut Input<'src, 'toks>,
    branch: &'static ChoiceBranch,
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'toks,
{
    let value = parse_value(input, branch.value)?;
    state.apply_choice(branch.tag, value)?;
    parse_node(branch.next, input, state)
}

fn parse_road<'src, 'toks>(input: &mut Input<'src, 'toks>) -> Result<RoadId, ErrMode<GrammarError<'src>>>
where
    'src: 'toks,
{
    let token = expect_kind(TokenKind::Ident, "road").parse_next(input)?;
    RoadId::from_name(token.lexeme)
        .ok_or_else(|| ErrMode::Cut(GrammarError::unknown_road(&token)))
}

fn parse_topic<'src, 'toks>(
    input: &mut Input<'src, 'toks>,
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'toks,
{
    match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Ident => {
            state.set_topic(token.lexeme);
            *input = rest;
            Ok(())
        }
        Some((token, _)) if token.kind != TokenKind::Eol => Err(ErrMode::Backtrack(
            GrammarError::unexpected("identifier", Some(token)),
        )),
        _ => Ok(()),
    }
}

fn parse_value<'src, 'toks>(
    input: &mut Input<'src, 'toks>,
    spec: ValueSpec,
) -> Result<ChoiceValue, ErrMode<GrammarError<'src>>>
where
    'src: 'toks,
{
    match spec {
        ValueSpec::None => Ok(ChoiceValue::None),
        ValueSpec::Duration => {
            let duration_token = expect_kind(TokenKind::Duration, "duration").parse_next(input)?;
            let duration = parse_duration(&duration_token).map_err(ErrMode::Cut)?;
            Ok(ChoiceValue::Duration(duration))
        }
        ValueSpec::IntegerAssignment => {
            let _ = expect_kind(TokenKind::Equals, "=").parse_next(input)?;
            let integer_token = expect_kind(TokenKind::Integer, "integer").parse_next(input)?;
            let value = parse_integer(&integer_token).map_err(ErrMode::Cut)?;
            Ok(ChoiceValue::Integer(value))
        }
    }
}

fn find_choice(choices: &'static [ChoiceBranch], lexeme: &str) -> Option<&'static ChoiceBranch> {
    choices
        .iter()
        .find(|choice| choice.keyword.eq_ignore_ascii_case(lexeme))
}

fn choice_expected_label(choices: &'static [ChoiceBranch]) -> &'static str {
    choices.first().map_or("keyword", |choice| choice.keyword)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChoiceValue {
    None,
    Duration(Duration),
    Integer(u16),
}

enum CommandState<'a> {
    Status,
    Pulse,
    Feed {
        road: Option<RoadId>,
        counts: VehicleCounts,
    },
    Config {
        update: Option<ConfigUpdate>,
    },
    Advance {
        by: Option<Duration>,
    },
    Help {
        topic: Option<&'a str>,
    },
}

impl<'a> CommandState<'a> {
    fn new(tag: CommandTag) -> Self {
        match tag {
            CommandTag::Status => CommandState::Status,
            CommandTag::Pulse => CommandState::Pulse,
            CommandTag::Feed => CommandState::Feed {
                road: None,
                counts: VehicleCounts::ZERO,
            },
            CommandTag::Config => CommandState::Config { update: None },
            CommandTag::Advance => CommandState::Advance { by: None },
            CommandTag::Help => CommandState::Help { topic: None },
        }
    }

    fn apply_choice(
        &mut self,
        tag: ChoiceTag,
        value: ChoiceValue,
    ) -> Result<(), ErrMode<GrammarError<'a>>> {
        match (self, value) {
            (CommandState::Feed { counts, .. }, ChoiceValue::Integer(count)) => {
                match tag {
                    ChoiceTag::Ambulance => counts.ambulance = count,
                    ChoiceTag::Firefighter => counts.firefighter = count,
                    ChoiceTag::Police => counts.police = count,
                    ChoiceTag::Car => counts.car = count,
                    ChoiceTag::Congestion => counts.congestion = count,
                    _ => return Err(unexpected_choice()),
                }
                Ok(())
            }
            (CommandState::Config { update }, ChoiceValue::Duration(window)) => {
                *update = Some(match tag {
                    ChoiceTag::MinGreen => ConfigUpdate::MinGreen(window),
                    ChoiceTag::Cooldown => ConfigUpdate::EmergencyCooldown(window),
                    ChoiceTag::Starvation => ConfigUpdate::StarvationThreshold(window),
                    ChoiceTag::OverdueWait => ConfigUpdate::OverdueMinWait(window),
                    _ => return Err(unexpected_choice()),
                });
                Ok(())
            }
            (CommandState::Advance { by }, ChoiceValue::Duration(step))
                if tag == ChoiceTag::AdvanceBy =>
            {
                *by = Some(step);
                Ok(())
            }
            _ => Err(unexpected_choice()),
        }
    }

    fn set_road(&mut self, id: RoadId) {
        if let CommandState::Feed { road, .. } = self {
            *road = Some(id);
        }
    }

    fn set_topic(&mut self, topic: &'a str) {
        if let CommandState::Help { topic: slot } = self {
            *slot = Some(topic);
        }
    }

    fn finish(self) -> Result<Command<'a>, ErrMode<GrammarError<'a>>> {
        match self {
            CommandState::Status => Ok(Command::Status),
            CommandState::Pulse => Ok(Command::Pulse),
            CommandState::Feed {
                road: Some(road),
                counts,
            } => Ok(Command::Feed(FeedCommand { road, counts })),
            CommandState::Feed { road: None, .. } => {
                Err(ErrMode::Backtrack(GrammarError::unexpected("road", None)))
            }
            CommandState::Config { update: Some(update) } => {
                Ok(Command::Config(ConfigCommand::Set(update)))
            }
            CommandState::Config { update: None } => Ok(Command::Config(ConfigCommand::Show)),
            CommandState::Advance { by: Some(step) } => Ok(Command::Advance(step)),
            CommandState::Advance { by: None } => {
                Err(ErrMode::Backtrack(GrammarError::unexpected("duration", None)))
            }
            CommandState::Help { topic } => Ok(Command::Help(HelpCommand { topic })),
        }
    }
}

fn unexpected_choice<'a>() -> ErrMode<GrammarError<'a>> {
    ErrMode::Backtrack(GrammarError::unexpected("choice", None))
}

fn expect_kind<'src, 'toks>(
    kind: TokenKind,
    label: &'static str,
) -> impl Parser<Input<'src, 'toks>, Token<'src>, ErrMode<GrammarError<'src>>>
where
    'src: 'toks,
{
    move |input: &mut Input<'src, 'toks>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            label,
            Some(token),
        ))),
        None => Err(ErrMode::Backtrack(GrammarError::unexpected(label, None))),
    }
}

fn parse_integer<'a>(token: &Token<'a>) -> Result<u16, GrammarError<'a>> {
    token
        .lexeme
        .parse::<u16>()
        .map_err(|_| GrammarError::invalid_integer(token))
}

fn parse_duration<'a>(token: &Token<'a>) -> Result<Duration, GrammarError<'a>> {
    let text = token.lexeme;
    if let Some(rest) = text.strip_suffix("ms") {
        let millis = rest
            .parse::<u32>()
            .map_err(|_| GrammarError::invalid_duration(token))?;
        Ok(Duration::from_millis(millis.into()))
    } else if let Some(rest) = text.strip_suffix('s') {
        let seconds = rest
            .parse::<u32>()
            .map_err(|_| GrammarError::invalid_duration(token))?;
        Ok(Duration::from_secs(seconds.into()))
    } else {
        Err(GrammarError::invalid_duration(token))
    }
}
