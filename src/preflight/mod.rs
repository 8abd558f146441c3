//! Preflight checks to validate the measurement host before a session.
//!
//! Only in-process oracles are affected by local host noise; remote
//! sessions skip these checks.

mod system;

pub use system::{system_check, SystemWarning};
