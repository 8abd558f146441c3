//! Normalization of partial guesses into full-length probes.

use crate::config::{DEFAULT_FILLER, DEFAULT_TARGET_LENGTH};
use crate::error::RecoveryError;
use crate::types::Probe;

/// Right-pads guesses with a filler symbol to a fixed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeBuilder {
    length: usize,
    filler: char,
}

impl Default for ProbeBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_LENGTH, DEFAULT_FILLER)
    }
}

impl ProbeBuilder {
    /// Create a builder for probes of `length` symbols padded with `filler`.
    pub fn new(length: usize, filler: char) -> Self {
        Self { length, filler }
    }

    /// Target probe length.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Padding symbol.
    pub fn filler(&self) -> char {
        self.filler
    }

    /// Pad `prefix` to exactly the target length.
    ///
    /// A prefix already at the target length is returned unchanged.
    ///
    /// # Errors
    ///
    /// [`RecoveryError::InvalidProbeLength`] if `prefix` is longer than the
    /// target length. Truncating would silently probe a different value.
    pub fn build(&self, prefix: &str) -> Result<Probe, RecoveryError> {
        let length = prefix.chars().count();
        if length > self.length {
            return Err(RecoveryError::InvalidProbeLength {
                length,
                max: self.length,
            });
        }

        let padding = self.length - length;
        let mut value = String::with_capacity(prefix.len() + padding * self.filler.len_utf8());
        value.push_str(prefix);
        value.extend(std::iter::repeat(self.filler).take(padding));
        Ok(Probe::new(value))
    }

    /// Build the probe for `prefix` extended by one candidate symbol.
    pub fn build_candidate(&self, prefix: &str, symbol: char) -> Result<Probe, RecoveryError> {
        let mut guess = String::with_capacity(prefix.len() + symbol.len_utf8());
        guess.push_str(prefix);
        guess.push(symbol);
        self.build(&guess)
    }
}
