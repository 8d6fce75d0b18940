//! Console grammar expressed as an applicative AST.
//!
//! The parser and completion engine interpret the same structure, so keywords
//! and value layouts stay in sync.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    Status,
    Feed,
    Pulse,
    Config,
    Advance,
    Help,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChoiceTag {
    Ambulance,
    Firefighter,
    Police,
    Car,
    Congestion,
    MinGreen,
    Cooldown,
    Starvation,
    OverdueWait,
    AdvanceBy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueSpec {
    None,
    Duration,
    /// `=` followed by an unsigned integer.
    IntegerAssignment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HelpTopics {
    None,
    Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub grammar: &'static Node,
    pub help: HelpTopics,
    pub summary: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Node {
    End,
    /// At most one of `choices`, falling back to `default`.
    OptionalChoice {
        choices: &'static [ChoiceBranch],
        default: Option<DefaultChoice>,
    },
    /// Any number of `choices` in any order; later repeats win.
    RepeatedChoice(&'static [ChoiceBranch]),
    /// A mandatory road keyword.
    Road { next: &'static Node },
    /// A mandatory positional value.
    Value {
        tag: ChoiceTag,
        value: ValueSpec,
        next: &'static Node,
    },
    Topic {
        topics: HelpTopics,
        next: &'static Node,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChoiceBranch {
    pub keyword: &'static str,
    pub tag: ChoiceTag,
    pub value: ValueSpec,
    pub next: &'static Node,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DefaultChoice {
    pub tag: ChoiceTag,
    pub next: &'static Node,
}

const END: Node = Node::End;

const fn count(keyword: &'static str, tag: ChoiceTag) -> ChoiceBranch {
    ChoiceBranch {
        keyword,
        tag,
        value: ValueSpec::IntegerAssignment,
        next: &END,
    }
}

const fn window(keyword: &'static str, tag: ChoiceTag) -> ChoiceBranch {
    ChoiceBranch {
        keyword,
        tag,
        value: ValueSpec::Duration,
        next: &END,
    }
}

const FEED_CHOICES: [ChoiceBranch; 5] = [
    count("ambulance", ChoiceTag::Ambulance),
    count("firefighter", ChoiceTag::Firefighter),
    count("police", ChoiceTag::Police),
    count("car", ChoiceTag::Car),
    count("congestion", ChoiceTag::Congestion),
];

const FEED_COUNTS: Node = Node::RepeatedChoice(&FEED_CHOICES);

const FEED_GRAMMAR: Node = Node::Road { next: &FEED_COUNTS };

const CONFIG_CHOICES: [ChoiceBranch; 4] = [
    window("min-green", ChoiceTag::MinGreen),
    window("cooldown", ChoiceTag::Cooldown),
    window("starvation", ChoiceTag::Starvation),
    window("overdue-wait", ChoiceTag::OverdueWait),
];

const CONFIG_GRAMMAR: Node = Node::OptionalChoice {
    choices: &CONFIG_CHOICES,
    default: None,
};

const ADVANCE_GRAMMAR: Node = Node::Value {
    tag: ChoiceTag::AdvanceBy,
    value: ValueSpec::Duration,
    next: &END,
};

const HELP_GRAMMAR: Node = Node::Topic {
    topics: HelpTopics::Commands,
    next: &END,
};

const COMMANDS: [CommandSpec; 6] = [
    CommandSpec {
        name: "status",
        tag: CommandTag::Status,
        grammar: &END,
        help: HelpTopics::None,
        summary: "status                      show lights, counts and timers",
    },
    CommandSpec {
        name: "feed",
        tag: CommandTag::Feed,
        grammar: &FEED_GRAMMAR,
        help: HelpTopics::None,
        summary: "feed <road> [car=N ...]     deliver a snapshot for one road",
    },
    CommandSpec {
        name: "pulse",
        tag: CommandTag::Pulse,
        grammar: &END,
        help: HelpTopics::None,
        summary: "pulse                       run a tick and an overdue sweep",
    },
    CommandSpec {
        name: "config",
        tag: CommandTag::Config,
        grammar: &CONFIG_GRAMMAR,
        help: HelpTopics::None,
        summary: "config [<window> <dur>]     show or change a timing window",
    },
    CommandSpec {
        name: "advance",
        tag: CommandTag::Advance,
        grammar: &ADVANCE_GRAMMAR,
        help: HelpTopics::None,
        summary: "advance <dur>               move the simulated clock forward",
    },
    CommandSpec {
        name: "help",
        tag: CommandTag::Help,
        grammar: &HELP_GRAMMAR,
        help: HelpTopics::Commands,
        summary: "help [command]              list commands",
    },
];

/// Returns the full command catalog.
#[must_use]
pub const fn commands() -> &'static [CommandSpec] {
    &COMMANDS
}

/// Looks up a command by its tag.
#[must_use]
pub fn command(tag: CommandTag) -> &'static CommandSpec {
    match tag {
        CommandTag::Status => &COMMANDS[0],
        CommandTag::Feed => &COMMANDS[1],
        CommandTag::Pulse => &COMMANDS[2],
        CommandTag::Config => &COMMANDS[3],
        CommandTag::Advance => &COMMANDS[4],
        CommandTag::Help => &COMMANDS[5],
    }
}

/// Finds a command by name (case insensitive).
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_lookup_matches_tags() {
        for spec in commands() {
            assert_eq!(command(spec.tag), spec);
            assert_eq!(find(spec.name), Some(spec));
        }
    }

    #[test]
    fn find_ignores_case() {
        assert_eq!(find("FeEd").map(|spec| spec.tag), Some(CommandTag::Feed));
        assert!(find("reboot").is_none());
    }
}
