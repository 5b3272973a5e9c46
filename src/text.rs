//! Word-level helpers shared by the intent rules and the city alias table.

/// Lowercase the text and split it into words, dropping punctuation. An
/// apostrophe inside a word is kept so "what's" stays one token.
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Position of `phrase` as a contiguous run of whole words inside `haystack`.
pub fn find_phrase(haystack: &[String], phrase: &str) -> Option<usize> {
    let needle = words(phrase);
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle.as_slice())
}

pub fn contains_phrase(haystack: &[String], phrase: &str) -> bool {
    find_phrase(haystack, phrase).is_some()
}

/// True when any of `phrases` occurs in `haystack`.
pub fn contains_any(haystack: &[String], phrases: &[&str]) -> bool {
    phrases.iter().any(|p| contains_phrase(haystack, p))
}

/// True when the utterance is essentially just `command`: the command
/// words, optionally followed by a single word such as the assistant's
/// name ("quit", "shut down jarvis").
pub fn is_command(haystack: &[String], command: &str) -> bool {
    let needle = words(command);
    !needle.is_empty() && haystack.starts_with(&needle) && haystack.len() <= needle.len() + 1
}
