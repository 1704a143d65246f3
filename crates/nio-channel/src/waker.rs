//! Selector wakeup.
//!
//! The read end sits in the selector's readiness set. `notify()` makes it
//! readable, so a blocked poll returns; a notify issued while nobody is
//! polling makes the next poll return immediately. Repeated notifies
//! before a `drain()` coalesce into one wakeup.
//!
//! Linux uses an eventfd (one descriptor, counter semantics); other
//! platforms use a non-blocking self-pipe.

use nio_core::error::{last_errno, NioError, Result};
use nio_core::fd::Descriptor;

use std::os::unix::io::RawFd;
use std::sync::Arc;

pub(crate) struct Waker {
    read: Arc<Descriptor>,
    write: Arc<Descriptor>,
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        impl Waker {
            pub(crate) fn new() -> Result<Self> {
                let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
                let desc = Descriptor::from_syscall(fd)?;
                Ok(Self {
                    read: Arc::clone(&desc),
                    write: desc,
                })
            }
        }

        const TOKEN: u64 = 1;
    } else {
        impl Waker {
            pub(crate) fn new() -> Result<Self> {
                let mut fds = [0 as libc::c_int; 2];
                if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
                    return Err(NioError::last_os());
                }
                let read = Descriptor::new(fds[0]);
                let write = Descriptor::new(fds[1]);
                for fd in fds {
                    crate::sys::set_nonblocking(fd, true)?;
                    nix::fcntl::fcntl(
                        fd,
                        nix::fcntl::FcntlArg::F_SETFD(nix::fcntl::FdFlag::FD_CLOEXEC),
                    )?;
                }
                Ok(Self { read, write })
            }
        }

        const TOKEN: u8 = 1;
    }
}

impl Waker {
    /// Descriptor to watch for readability.
    pub(crate) fn fd(&self) -> Result<RawFd> {
        self.read.raw()
    }

    pub(crate) fn notify(&self) -> Result<()> {
        let fd = self.write.raw()?;
        let ret = unsafe {
            libc::write(
                fd,
                &TOKEN as *const _ as *const libc::c_void,
                std::mem::size_of_val(&TOKEN),
            )
        };
        if ret < 0 {
            let errno = last_errno();
            // A full counter or pipe already guarantees a pending wakeup.
            if crate::sys::would_block(errno) {
                return Ok(());
            }
            return Err(NioError::Os(errno));
        }
        Ok(())
    }

    /// Consume pending wakeups.
    pub(crate) fn drain(&self) -> Result<()> {
        let fd = self.read.raw()?;
        let mut scratch = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(fd, scratch.as_mut_ptr() as *mut libc::c_void, scratch.len())
            };
            if n > 0 {
                continue;
            }
            if n == 0 {
                return Ok(());
            }
            match last_errno() {
                libc::EINTR => continue,
                e if crate::sys::would_block(e) => return Ok(()),
                e => return Err(NioError::Os(e)),
            }
        }
    }

    pub(crate) fn close(&self) -> Result<()> {
        self.write.close()?;
        self.read.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys;

    use std::time::Duration;

    #[test]
    fn test_notify_makes_readable() {
        let waker = Waker::new().unwrap();
        let fd = waker.fd().unwrap();
        assert_eq!(sys::poll_one(fd, libc::POLLIN, Some(Duration::ZERO)).unwrap(), 0);
        waker.notify().unwrap();
        waker.notify().unwrap();
        assert_ne!(sys::poll_one(fd, libc::POLLIN, Some(Duration::ZERO)).unwrap(), 0);
        waker.drain().unwrap();
        assert_eq!(sys::poll_one(fd, libc::POLLIN, Some(Duration::ZERO)).unwrap(), 0);
    }

    #[test]
    fn test_cross_thread_notify() {
        let waker = Arc::new(Waker::new().unwrap());
        let fd = waker.fd().unwrap();
        let remote = Arc::clone(&waker);
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.notify().unwrap();
        });
        let revents = sys::poll_one(fd, libc::POLLIN, Some(Duration::from_secs(5))).unwrap();
        assert_ne!(revents & libc::POLLIN, 0);
        t.join().unwrap();
    }

    #[test]
    fn test_closed_waker() {
        let waker = Waker::new().unwrap();
        waker.close().unwrap();
        assert_eq!(waker.notify(), Err(NioError::UseAfterClose));
    }
}
