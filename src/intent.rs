//! Rule-based intent classification.
//!
//! Rules are checked in the order of [`RULES`]; the first whose keywords
//! occur in the utterance decides the intent. Anything unmatched is
//! [`Intent::Fallback`] and goes to the dialogue model.
//!
//! Some words are too common to trigger on their own ("quit", "exit"), so a
//! rule can also carry commands, which only count when they make up the
//! whole utterance.

use crate::text;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Farewell,
    Greeting,
    TimeQuery,
    WeatherQuery,
    Thanks,
    Fallback,
}

/// One entry of the ordered rule chain.
pub struct Rule {
    pub intent: Intent,
    /// Match anywhere in the utterance.
    pub keywords: &'static [&'static str],
    /// Match only as the whole utterance, see [`text::is_command`].
    pub commands: &'static [&'static str],
}

impl Rule {
    pub fn matches(&self, words: &[String]) -> bool {
        text::contains_any(words, self.keywords)
            || self.commands.iter().any(|c| text::is_command(words, c))
    }
}

pub const FAREWELL_KEYWORDS: &[&str] = &[
    "bye",
    "goodbye",
    "good bye",
    "see you later",
    "close down",
    "go to sleep",
];

pub const FAREWELL_COMMANDS: &[&str] = &["quit", "exit", "shut down", "stop", "that's all"];

pub const GREETING_KEYWORDS: &[&str] = &[
    "hello",
    "hi",
    "hey",
    "howdy",
    "greetings",
    "good morning",
    "good afternoon",
    "good evening",
    "wake up",
];

pub const TIME_KEYWORDS: &[&str] = &[
    "what time",
    "current time",
    "what's the time",
    "tell me the time",
    "time is it",
];

pub const WEATHER_KEYWORDS: &[&str] = &["weather", "temperature", "forecast"];

pub const THANKS_KEYWORDS: &[&str] = &["thank you", "thanks", "thank", "cheers"];

/// Priority order. Farewell comes first so "thanks, bye" always ends the
/// session.
pub const RULES: &[Rule] = &[
    Rule {
        intent: Intent::Farewell,
        keywords: FAREWELL_KEYWORDS,
        commands: FAREWELL_COMMANDS,
    },
    Rule {
        intent: Intent::Greeting,
        keywords: GREETING_KEYWORDS,
        commands: &[],
    },
    Rule {
        intent: Intent::TimeQuery,
        keywords: TIME_KEYWORDS,
        commands: &[],
    },
    Rule {
        intent: Intent::WeatherQuery,
        keywords: WEATHER_KEYWORDS,
        commands: &[],
    },
    Rule {
        intent: Intent::Thanks,
        keywords: THANKS_KEYWORDS,
        commands: &[],
    },
];

pub fn classify(utterance: &str) -> Intent {
    classify_with(RULES, utterance)
}

pub fn classify_with(rules: &[Rule], utterance: &str) -> Intent {
    let words = text::words(utterance);
    rules
        .iter()
        .find(|rule| rule.matches(&words))
        .map(|rule| rule.intent)
        .unwrap_or(Intent::Fallback)
}
