//! Session-scoped CPU pinning for in-process oracles.
//!
//! Migrating between cores mid-session changes cache state and clock
//! frequency under the measurement. Pinning is acquired once when a recovery
//! session starts and released when the guard drops, restoring the original
//! mask. It is never re-applied per trial.
//!
//! Only Linux enforces the pin (`sched_setaffinity`). Elsewhere
//! [`AffinityGuard::try_pin`] reports `NotPinned` and the session continues.

/// Result of attempting to pin CPU affinity.
#[derive(Debug)]
pub enum AffinityResult {
    /// Pinned; keep the guard alive for the whole session.
    Pinned(AffinityGuard),
    /// Could not pin; measurement continues unpinned.
    NotPinned {
        /// Why pinning was not possible.
        reason: String,
    },
}

impl AffinityResult {
    /// The guard, if pinning succeeded.
    pub fn into_guard(self) -> Option<AffinityGuard> {
        match self {
            AffinityResult::Pinned(guard) => Some(guard),
            AffinityResult::NotPinned { .. } => None,
        }
    }
}

/// RAII guard that restores the original CPU affinity when dropped.
pub struct AffinityGuard {
    #[cfg(target_os = "linux")]
    original_mask: libc::cpu_set_t,
    cpu: usize,
}

impl AffinityGuard {
    /// Pin the calling thread to the CPU it is currently running on.
    pub fn try_pin() -> AffinityResult {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: sched_getcpu has no preconditions.
            let current = unsafe { libc::sched_getcpu() };
            if current < 0 {
                return AffinityResult::NotPinned {
                    reason: format!("sched_getcpu failed: {}", std::io::Error::last_os_error()),
                };
            }
            Self::try_pin_linux(current as usize)
        }

        #[cfg(not(target_os = "linux"))]
        {
            AffinityResult::NotPinned {
                reason: "CPU affinity not supported on this platform".to_string(),
            }
        }
    }

    /// Pin the calling thread to CPU `cpu`.
    pub fn try_pin_to(cpu: usize) -> AffinityResult {
        #[cfg(target_os = "linux")]
        {
            Self::try_pin_linux(cpu)
        }

        #[cfg(not(target_os = "linux"))]
        {
            AffinityResult::NotPinned {
                reason: format!("cannot pin to CPU {}: not supported on this platform", cpu),
            }
        }
    }

    /// CPU the thread is pinned to.
    pub fn cpu(&self) -> usize {
        self.cpu
    }

    #[cfg(target_os = "linux")]
    fn try_pin_linux(cpu: usize) -> AffinityResult {
        use std::mem::MaybeUninit;

        if cpu >= libc::CPU_SETSIZE as usize {
            return AffinityResult::NotPinned {
                reason: format!("CPU index {} out of range", cpu),
            };
        }

        // SAFETY: the masks are plain bitsets sized by size_of::<cpu_set_t>(),
        // and pid 0 targets the calling thread.
        unsafe {
            let mut original_mask = MaybeUninit::<libc::cpu_set_t>::uninit();
            let result = libc::sched_getaffinity(
                0,
                std::mem::size_of::<libc::cpu_set_t>(),
                original_mask.as_mut_ptr(),
            );
            if result != 0 {
                return AffinityResult::NotPinned {
                    reason: format!(
                        "sched_getaffinity failed: {}",
                        std::io::Error::last_os_error()
                    ),
                };
            }
            let original_mask = original_mask.assume_init();

            if !libc::CPU_ISSET(cpu, &original_mask) {
                return AffinityResult::NotPinned {
                    reason: format!("CPU {} is not in the allowed set", cpu),
                };
            }

            let mut new_mask: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut new_mask);
            libc::CPU_SET(cpu, &mut new_mask);

            let result =
                libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &new_mask);
            if result != 0 {
                return AffinityResult::NotPinned {
                    reason: format!(
                        "sched_setaffinity failed: {}",
                        std::io::Error::last_os_error()
                    ),
                };
            }

            tracing::debug!("Pinned thread to CPU {}", cpu);

            AffinityResult::Pinned(AffinityGuard { original_mask, cpu })
        }
    }
}

#[cfg(target_os = "linux")]
impl Drop for AffinityGuard {
    fn drop(&mut self) {
        // SAFETY: restores the mask read in try_pin_linux for the same thread.
        let result = unsafe {
            libc::sched_setaffinity(
                0,
                std::mem::size_of::<libc::cpu_set_t>(),
                &self.original_mask,
            )
        };

        if result != 0 {
            tracing::warn!(
                "Failed to restore CPU affinity: {}",
                std::io::Error::last_os_error()
            );
        } else {
            tracing::debug!("Restored original CPU affinity");
        }
    }
}

impl std::fmt::Debug for AffinityGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AffinityGuard")
            .field("cpu", &self.cpu)
            .finish()
    }
}
