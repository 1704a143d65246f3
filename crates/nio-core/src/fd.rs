//! Shared OS descriptor handle.
//!
//! A `Descriptor` is held behind `Arc` by every object that needs the
//! same OS resource: a channel, the selection keys registered for it, and
//! any mappings created from it. The descriptor is closed exactly once,
//! either explicitly via `close()` or when the last `Arc` is dropped.
//! After close, `raw()` fails with `UseAfterClose` instead of handing out
//! a number the kernel may already have reused.

use crate::error::{NioError, Result};

use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

const CLOSED: RawFd = -1;

pub struct Descriptor {
    fd: AtomicI32,
    /// Kernel number at construction, kept for logs after close.
    origin: RawFd,
}

impl Descriptor {
    /// Take ownership of an open descriptor.
    ///
    /// The descriptor is closed when the last handle drops.
    pub fn new(fd: RawFd) -> Arc<Self> {
        debug_assert!(fd >= 0);
        Arc::new(Self {
            fd: AtomicI32::new(fd),
            origin: fd,
        })
    }

    /// Wrap the result of a syscall that returns a descriptor or -1.
    pub fn from_syscall(ret: RawFd) -> Result<Arc<Self>> {
        if ret < 0 {
            return Err(NioError::last_os());
        }
        Ok(Self::new(ret))
    }

    /// The live descriptor number.
    #[inline]
    pub fn raw(&self) -> Result<RawFd> {
        match self.fd.load(Ordering::Acquire) {
            CLOSED => Err(NioError::UseAfterClose),
            fd => Ok(fd),
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.fd.load(Ordering::Acquire) != CLOSED
    }

    /// The number this descriptor was created with, valid or not.
    #[inline]
    pub fn origin(&self) -> RawFd {
        self.origin
    }

    /// Close the descriptor. Idempotent; only the first call reaches the OS.
    pub fn close(&self) -> Result<()> {
        let fd = self.fd.swap(CLOSED, Ordering::AcqRel);
        if fd == CLOSED {
            return Ok(());
        }
        log::trace!("closing fd {}", fd);
        let ret = unsafe { libc::close(fd) };
        if ret < 0 {
            let errno = crate::error::last_errno();
            // The descriptor is released even when close reports EINTR.
            if errno != libc::EINTR {
                return Err(NioError::Os(errno));
            }
        }
        Ok(())
    }
}

impl Drop for Descriptor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw() {
            Ok(fd) => write!(f, "Descriptor({})", fd),
            Err(_) => write!(f, "Descriptor(closed, was {})", self.origin),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_pair() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(ret, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn test_close_then_raw_fails() {
        let (r, w) = pipe_pair();
        let d = Descriptor::new(r);
        assert_eq!(d.raw().unwrap(), r);
        d.close().unwrap();
        assert!(!d.is_open());
        assert_eq!(d.raw(), Err(NioError::UseAfterClose));
        // Second close is a no-op.
        d.close().unwrap();
        unsafe { libc::close(w) };
    }

    #[test]
    fn test_last_handle_closes() {
        let (r, w) = pipe_pair();
        let d = Descriptor::new(w);
        let d2 = Arc::clone(&d);
        drop(d);
        assert!(d2.is_open());
        drop(d2);
        // Write end closed: reading yields EOF immediately.
        let mut byte = [0u8; 1];
        let n = unsafe { libc::read(r, byte.as_mut_ptr() as *mut libc::c_void, 1) };
        assert_eq!(n, 0);
        unsafe { libc::close(r) };
    }

    #[test]
    fn test_from_syscall_error() {
        let err = Descriptor::from_syscall(-1);
        assert!(err.is_err());
    }
}
