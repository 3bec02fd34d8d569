//! Process hardening for key material
//!
//! Disables core dumps via `setrlimit(RLIMIT_CORE, 0)` so that a crash never
//! writes the keeper's private key or a decrypted key part to disk.
//!
//! Best-effort: failures are logged but never abort startup, since some
//! environments (containers, unprivileged users) do not permit this.

use std::sync::atomic::{AtomicBool, Ordering};

static CORE_DUMPS_DISABLED: AtomicBool = AtomicBool::new(false);

/// Disable core dumps for the current process.
///
/// Returns `true` if core dumps are disabled (now or by an earlier call).
pub fn disable_core_dumps() -> bool {
    if CORE_DUMPS_DISABLED.swap(true, Ordering::SeqCst) {
        return true;
    }

    #[cfg(unix)]
    {
        // SAFETY: setrlimit with RLIMIT_CORE=0 is a standard POSIX operation
        let result = unsafe {
            let rlim = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };
            libc::setrlimit(libc::RLIMIT_CORE, &rlim)
        };
        if result != 0 {
            log::warn!(
                "Failed to disable core dumps: {}",
                std::io::Error::last_os_error()
            );
            return false;
        }
        true
    }

    #[cfg(not(unix))]
    {
        log::warn!("Core dump prevention not supported on this platform");
        false
    }
}
