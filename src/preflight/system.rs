//! Host checks run before local recovery sessions.
//!
//! Frequency scaling, SMT siblings and background load all add jitter that
//! an in-process oracle cannot average away cheaply. None of these stop a
//! session; they are logged so a failed recovery can be explained.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::measurement::Timer;

/// Load average above which the host is considered busy.
const LOAD_THRESHOLD: f64 = 1.0;

/// Timer resolution above which sub-microsecond differences are lost.
const COARSE_TIMER_NS: f64 = 100.0;

/// Warning from system checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SystemWarning {
    /// CPU frequency scaling is not set to performance mode.
    CpuGovernorNotPerformance {
        /// Current governor setting.
        current: String,
    },

    /// Turbo boost is enabled.
    TurboBoostEnabled,

    /// SMT siblings share the core with the oracle.
    HyperthreadingEnabled,

    /// Running under a hypervisor.
    VirtualMachineDetected,

    /// High system load detected.
    HighSystemLoad {
        /// One-minute load average.
        load_average: f64,
        /// Threshold exceeded.
        threshold: f64,
    },

    /// The monotonic clock ticks too coarsely for small differences.
    CoarseTimer {
        /// Smallest observed clock increment.
        resolution_ns: f64,
    },
}

impl SystemWarning {
    /// Get a human-readable description of the warning.
    pub fn description(&self) -> String {
        match self {
            SystemWarning::CpuGovernorNotPerformance { current } => {
                format!(
                    "CPU frequency governor is '{}', use 'performance' for stable timing \
                     (sudo cpufreq-set -g performance)",
                    current
                )
            }
            SystemWarning::TurboBoostEnabled => {
                "Turbo boost is enabled; clock speed will drift between candidates".to_string()
            }
            SystemWarning::HyperthreadingEnabled => {
                "SMT is active; a sibling thread can steal cycles from the oracle".to_string()
            }
            SystemWarning::VirtualMachineDetected => {
                "Running under a hypervisor; expect extra scheduling jitter".to_string()
            }
            SystemWarning::HighSystemLoad {
                load_average,
                threshold,
            } => {
                format!(
                    "High system load: {:.2} (threshold {:.2}); background work adds noise",
                    load_average, threshold
                )
            }
            SystemWarning::CoarseTimer { resolution_ns } => {
                format!(
                    "Timer resolution is {:.0} ns; differences below that need many more trials",
                    resolution_ns
                )
            }
        }
    }
}

/// Perform all system checks.
///
/// On non-Linux platforms only the timer check runs.
pub fn system_check() -> Vec<SystemWarning> {
    let mut warnings = check_host(Path::new("/"));
    if let Some(warning) = check_timer(&Timer::new()) {
        warnings.push(warning);
    }
    warnings
}

/// Read host settings from a filesystem rooted at `root`.
fn check_host(root: &Path) -> Vec<SystemWarning> {
    if !cfg!(target_os = "linux") {
        return Vec::new();
    }

    [
        check_governor(root),
        check_turbo(root),
        check_smt(root),
        check_hypervisor(root),
        check_load(root),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn read(root: &Path, path: &str) -> Option<String> {
    std::fs::read_to_string(root.join(path))
        .ok()
        .map(|s| s.trim().to_string())
}

fn check_governor(root: &Path) -> Option<SystemWarning> {
    let governor =
        read(root, "sys/devices/system/cpu/cpu0/cpufreq/scaling_governor")?.to_lowercase();
    (governor != "performance")
        .then_some(SystemWarning::CpuGovernorNotPerformance { current: governor })
}

fn check_turbo(root: &Path) -> Option<SystemWarning> {
    if let Some(no_turbo) = read(root, "sys/devices/system/cpu/intel_pstate/no_turbo") {
        return (no_turbo == "0").then_some(SystemWarning::TurboBoostEnabled);
    }
    let boost = read(root, "sys/devices/system/cpu/cpufreq/boost")?;
    (boost == "1").then_some(SystemWarning::TurboBoostEnabled)
}

fn check_smt(root: &Path) -> Option<SystemWarning> {
    let active = read(root, "sys/devices/system/cpu/smt/active")?;
    (active == "1").then_some(SystemWarning::HyperthreadingEnabled)
}

fn check_hypervisor(root: &Path) -> Option<SystemWarning> {
    let cpuinfo = read(root, "proc/cpuinfo")?;
    cpuinfo
        .lines()
        .any(|line| line.starts_with("flags") && line.split_whitespace().any(|f| f == "hypervisor"))
        .then_some(SystemWarning::VirtualMachineDetected)
}

fn check_load(root: &Path) -> Option<SystemWarning> {
    let load = read(root, "proc/loadavg")?
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<f64>().ok())?;
    (load > LOAD_THRESHOLD).then_some(SystemWarning::HighSystemLoad {
        load_average: load,
        threshold: LOAD_THRESHOLD,
    })
}

fn check_timer(timer: &Timer) -> Option<SystemWarning> {
    let resolution_ns = timer.resolution().as_nanos() as f64;
    (resolution_ns > COARSE_TIMER_NS).then_some(SystemWarning::CoarseTimer { resolution_ns })
}
