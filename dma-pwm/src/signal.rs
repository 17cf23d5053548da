//! Termination signal handling: the sole defense against leaking GPU-locked
//! physical pages across process death.
//!
//! One handler covers `SIGHUP`, `SIGQUIT`, `SIGINT`, `SIGTERM`. On delivery it
//! releases every channel in the pool, then restores the signal's default
//! disposition and re-raises it so the process still exits the way it would
//! have without this crate installed.
//!
//! The release pass takes a mutex lock and, transitively, issues VideoCore
//! mailbox ioctls; neither is async-signal-safe in the POSIX sense. That is
//! an accepted non-strict path, guarded here by the reentry flag below so a
//! second signal delivered mid-teardown cannot re-enter it.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{PwmError, PwmResult};

/// The four signals whose delivery triggers full channel release.
const TERMINATION_SIGNALS: &[libc::c_int] = &[libc::SIGHUP, libc::SIGQUIT, libc::SIGINT, libc::SIGTERM];

static INSTALLED: AtomicBool = AtomicBool::new(false);
static HANDLING: AtomicBool = AtomicBool::new(false);

/// Install the termination handler for every signal in [`TERMINATION_SIGNALS`].
/// Idempotent: a second call is a no-op success.
pub fn install() -> PwmResult<()> {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    for &signum in TERMINATION_SIGNALS {
        // SAFETY: `action` is a plain-old-data sigaction with a valid handler
        // pointer and an empty mask; `sigaction` itself is the documented way
        // to register it.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handle_termination as usize;
            libc::sigemptyset(&mut action.sa_mask);
            action.sa_flags = 0;
            if libc::sigaction(signum, &action, std::ptr::null_mut()) != 0 {
                INSTALLED.store(false, Ordering::SeqCst);
                return Err(PwmError::SignalHandlerFailed);
            }
        }
    }
    Ok(())
}

/// The installed handler: release every requested channel, then re-raise the
/// signal with its default disposition restored so the process's exit status
/// still reflects the signal that killed it.
extern "C" fn handle_termination(signum: libc::c_int) {
    if HANDLING.swap(true, Ordering::SeqCst) {
        // Already tearing down on a prior delivery; nothing more to release.
        return;
    }

    if let Some(cell) = crate::global_engine_if_present() {
        // A panicked lock holder would poison the mutex; releasing hardware
        // is still better-effort than giving up, so recover either way.
        let mut engine = match cell.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        engine.free_all();
    }

    // SAFETY: restoring SIG_DFL and re-raising is the standard terminal
    // transition for a cleanup handler; both calls take no pointers we own.
    unsafe {
        libc::signal(signum, libc::SIG_DFL);
        libc::raise(signum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn termination_signals_cover_hup_quit_int_term() {
        assert_eq!(TERMINATION_SIGNALS.len(), 4);
        assert!(TERMINATION_SIGNALS.contains(&libc::SIGHUP));
        assert!(TERMINATION_SIGNALS.contains(&libc::SIGQUIT));
        assert!(TERMINATION_SIGNALS.contains(&libc::SIGINT));
        assert!(TERMINATION_SIGNALS.contains(&libc::SIGTERM));
    }
}
