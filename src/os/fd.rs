//! Scoped ownership of raw kernel file descriptors.
//!
//! # Guarantees
//! - A held descriptor is closed exactly once, on drop or `reset`.
//! - `release` relinquishes ownership without closing.
//! - The wrapper is move-only; duplication goes through `try_clone` (dup).

use std::io;
use std::os::unix::io::RawFd;

/// Move-only guard around a raw descriptor.
#[derive(Debug)]
pub struct OwnedFd {
    fd: RawFd,
}

impl OwnedFd {
    /// Adopts `fd`. Fails when `fd` is negative, carrying the errno context
    /// of the call that produced it.
    pub fn wrap(fd: RawFd) -> io::Result<Self> {
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    /// The raw descriptor value. Calling this after `release` or `reset(-1)`
    /// is a programming error.
    #[inline]
    pub fn raw(&self) -> RawFd {
        debug_assert!(self.fd >= 0, "access to released descriptor");
        self.fd
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.fd >= 0
    }

    /// Relinquishes ownership and returns the raw descriptor. The caller is
    /// now responsible for closing it.
    pub fn release(&mut self) -> RawFd {
        std::mem::replace(&mut self.fd, -1)
    }

    /// Closes the held descriptor (if any) and adopts `new_fd`. Pass -1 to
    /// just close.
    pub fn reset(&mut self, new_fd: RawFd) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
        }
        self.fd = new_fd;
    }

    /// Duplicates the descriptor into a new, independently owned guard.
    pub fn try_clone(&self) -> io::Result<Self> {
        if self.fd < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot duplicate invalid file descriptor",
            ));
        }
        let new_fd = unsafe { libc::dup(self.fd) };
        if new_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd: new_fd })
    }
}

impl Drop for OwnedFd {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
        }
    }
}
