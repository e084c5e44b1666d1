//! Process-wide interruption and per-call cancellation.
//!
//! # Invariants
//! - The interrupt flag has a single writer: the signal handler. Everything
//!   else only reads it.
//! - The handler does nothing beyond the atomic store; it must stay
//!   async-signal-safe.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn flag_interrupt(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

/// Routes SIGINT and SIGTERM to the interrupt flag. Call once at startup.
pub fn install_signal_handlers() -> io::Result<()> {
    let handler: extern "C" fn(libc::c_int) = flag_interrupt;
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handler as usize;
        libc::sigemptyset(&mut sa.sa_mask);
        for sig in [libc::SIGINT, libc::SIGTERM] {
            if libc::sigaction(sig, &sa, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(())
}

/// Non-blocking poll of the process-wide interrupt flag.
#[inline]
pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Fails with the canonical interruption message when the flag is set.
pub fn check_interrupted() -> Result<(), String> {
    if is_interrupted() {
        return Err("Operation interrupted by user".to_string());
    }
    Ok(())
}

/// Per-call cancellation handle, checked alongside the global flag by every
/// long-running loop.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// True when either the global flag or the per-call token requests a stop.
#[inline]
pub fn stop_requested(cancel: &CancelToken) -> bool {
    is_interrupted() || cancel.is_cancelled()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
