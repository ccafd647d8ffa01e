//! Identifier Casing
//!
//! Splits identifiers into lowercase words and joins them back in one of
//! the case styles used by the target dialects.

use std::fmt;

/// How words are joined into an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaseStyle {
    /// `read_group`
    SnakeLower,
    /// `READ_GROUP`
    SnakeUpper,
    /// `readGroup`
    Camel,
    /// `ReadGroup`
    Pascal,
}

impl fmt::Display for CaseStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaseStyle::SnakeLower => "snake_lower",
            CaseStyle::SnakeUpper => "SNAKE_UPPER",
            CaseStyle::Camel => "camelCase",
            CaseStyle::Pascal => "PascalCase",
        };
        write!(f, "{}", name)
    }
}

/// Splits an identifier into lowercase words.
///
/// Words break at any character that is not alphanumeric (underscore,
/// hyphen, dot, ...) and where a lowercase letter is followed by an
/// uppercase one. Digits stay attached to their word.
///
/// ```
/// use wfbridge::passes::rename::case::split_words;
///
/// assert_eq!(split_words("readGroup_ID"), vec!["read", "group", "id"]);
/// assert_eq!(split_words("bam2fastq"), vec!["bam2fastq"]);
/// ```
pub fn split_words(id: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut previous_lower = false;

    for c in id.chars() {
        if !c.is_alphanumeric() {
            flush(&mut words, &mut current);
            previous_lower = false;
            continue;
        }
        if c.is_uppercase() && previous_lower {
            flush(&mut words, &mut current);
        }
        previous_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    flush(&mut words, &mut current);
    words
}

fn flush(words: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        words.push(std::mem::take(current));
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Joins lowercase words in the given style.
pub fn join_words(words: &[String], style: CaseStyle) -> String {
    match style {
        CaseStyle::SnakeLower => words.join("_"),
        CaseStyle::SnakeUpper => words.join("_").to_uppercase(),
        CaseStyle::Pascal => words.iter().map(|w| capitalize(w)).collect(),
        CaseStyle::Camel => words
            .iter()
            .enumerate()
            .map(|(i, w)| if i == 0 { w.clone() } else { capitalize(w) })
            .collect(),
    }
}

/// True if the letters and digits of `id` contain some chunk of three or
/// more characters immediately repeated, as in `file_file`.
pub fn has_repeated_chunk(id: &str) -> bool {
    let compact: Vec<char> = id
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();

    let n = compact.len();
    (3..=n / 2).any(|len| (0..=n - 2 * len).any(|i| compact[i..i + len] == compact[i + len..i + 2 * len]))
}
