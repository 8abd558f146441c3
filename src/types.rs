//! Probe values, candidate alphabets and candidate keys.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// First symbol of the printable ASCII range.
pub const PRINTABLE_FIRST: char = '\u{20}';

/// Last symbol of the printable ASCII range.
pub const PRINTABLE_LAST: char = '\u{7e}';

/// A value submitted to the oracle.
///
/// Length is measured in `char`s, not bytes, so multi-byte symbols count once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Probe(String);

impl Probe {
    /// Wrap a string as a probe without padding.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Number of symbols in the probe.
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    /// Whether the probe has no symbols.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the probe as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the probe and return the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Probe {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for Probe {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Ordered, duplicate-free set of candidate symbols tried at every position.
///
/// Iteration order is insertion order and stays fixed for the whole session,
/// which makes tie-breaking reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alphabet {
    symbols: Vec<char>,
}

impl Alphabet {
    /// Printable ASCII, `0x20..=0x7e`.
    pub fn printable_ascii() -> Self {
        Self {
            symbols: (PRINTABLE_FIRST..=PRINTABLE_LAST).collect(),
        }
    }

    /// Printable ASCII minus one symbol, typically the filler.
    pub fn printable_ascii_without(excluded: char) -> Self {
        Self {
            symbols: (PRINTABLE_FIRST..=PRINTABLE_LAST)
                .filter(|s| *s != excluded)
                .collect(),
        }
    }

    /// Build an alphabet from symbols, dropping repeats but keeping first-seen order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyAlphabet`] if no symbols are given.
    pub fn from_chars<I>(symbols: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = char>,
    {
        let mut unique: Vec<char> = Vec::new();
        for symbol in symbols {
            if !unique.contains(&symbol) {
                unique.push(symbol);
            }
        }
        if unique.is_empty() {
            return Err(ConfigError::EmptyAlphabet);
        }
        Ok(Self { symbols: unique })
    }

    /// Parse an alphabet from the characters of a string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyAlphabet`] for an empty string.
    pub fn parse(symbols: &str) -> Result<Self, ConfigError> {
        Self::from_chars(symbols.chars())
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the alphabet is empty. Only reachable through deserialization.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Whether `symbol` is a member.
    pub fn contains(&self, symbol: char) -> bool {
        self.symbols.contains(&symbol)
    }

    /// Position of `symbol` in iteration order.
    pub fn position(&self, symbol: char) -> Option<usize> {
        self.symbols.iter().position(|s| *s == symbol)
    }

    /// Iterate symbols in their fixed order.
    pub fn iter(&self) -> impl Iterator<Item = char> + '_ {
        self.symbols.iter().copied()
    }

    /// The symbols as a slice.
    pub fn as_slice(&self) -> &[char] {
        &self.symbols
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self::printable_ascii()
    }
}

/// Identifies one candidate evaluated in a round: the confirmed prefix plus
/// the symbol appended to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateKey {
    /// Confirmed prefix at the time of evaluation.
    pub prefix: String,
    /// Symbol appended to the prefix.
    pub symbol: char,
}

impl CandidateKey {
    /// Create a key.
    pub fn new(prefix: impl Into<String>, symbol: char) -> Self {
        Self {
            prefix: prefix.into(),
            symbol,
        }
    }

    /// The guess this key stands for, `prefix + symbol`.
    pub fn guess(&self) -> String {
        let mut guess = self.prefix.clone();
        guess.push(self.symbol);
        guess
    }
}

impl fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}+{:?}", self.prefix, self.symbol)
    }
}
