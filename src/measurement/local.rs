//! In-process oracle: a comparison function called directly.

use std::fmt;
use std::time::Duration;

use crate::error::OracleError;
use crate::types::Probe;

use super::timer::{black_box, Timer};
use super::{Measurement, Oracle, OracleKind, Outcome};

type Call<'a> = Box<dyn FnMut(&str) -> Result<(), OracleError> + 'a>;

/// Times a closure that compares the probe against a secret.
///
/// Only the closure call sits between the two clock reads; the probe is
/// already built and borrowed.
///
/// ```ignore
/// let secret = b"hunter2hunter2hunter2hunter2hunt";
/// let mut oracle = LocalOracle::new(|probe: &str| early_exit_eq(probe.as_bytes(), secret));
/// ```
pub struct LocalOracle<'a> {
    call: Call<'a>,
    timer: Timer,
}

impl<'a> LocalOracle<'a> {
    /// Wrap an infallible comparison.
    pub fn new<F, T>(mut f: F) -> Self
    where
        F: FnMut(&str) -> T + 'a,
    {
        Self::fallible(move |probe| {
            black_box(f(probe));
            Ok(())
        })
    }

    /// Wrap a comparison that can fail, e.g. a subprocess or FFI call.
    pub fn fallible<F>(f: F) -> Self
    where
        F: FnMut(&str) -> Result<(), OracleError> + 'a,
    {
        Self {
            call: Box::new(f),
            timer: Timer::with_resolution(Duration::from_nanos(1)),
        }
    }
}

impl Oracle for LocalOracle<'_> {
    fn measure(&mut self, probe: &Probe) -> Result<Measurement, OracleError> {
        let call = &mut self.call;
        let (result, duration) = self.timer.measure(|| call(probe.as_str()));
        result.map(|()| Measurement {
            duration,
            outcome: Outcome::Local,
        })
    }

    fn kind(&self) -> OracleKind {
        OracleKind::Local
    }
}

impl fmt::Debug for LocalOracle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalOracle")
            .field("timer", &self.timer)
            .finish_non_exhaustive()
    }
}
