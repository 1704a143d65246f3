//! epoll readiness backend.
//!
//! The kernel keeps the registration table; interest changes are single
//! `epoll_ctl` calls instead of a rebuild per poll. Level-triggered, so a
//! key stays ready until its channel is drained.

use super::{readiness, Poller};
use crate::sys;

use nio_core::error::{last_errno, NioError, Result};
use nio_core::fd::Descriptor;
use nio_core::ops::Ops;

use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct EpollPoller {
    epfd: Arc<Descriptor>,
    events: Vec<libc::epoll_event>,
}

fn interest_bits(ops: Ops) -> u32 {
    let mut bits = 0;
    if ops.intersects(Ops::READ | Ops::ACCEPT) {
        bits |= libc::EPOLLIN;
    }
    if ops.intersects(Ops::WRITE | Ops::CONNECT) {
        bits |= libc::EPOLLOUT;
    }
    bits as u32
}

impl EpollPoller {
    pub(crate) fn new(batch: usize) -> Result<Self> {
        let epfd = Descriptor::from_syscall(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
        Ok(Self {
            epfd,
            events: vec![libc::epoll_event { events: 0, u64: 0 }; batch.max(1)],
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, ops: Ops) -> std::result::Result<(), i32> {
        let mut ev = libc::epoll_event {
            events: interest_bits(ops),
            u64: fd as u64,
        };
        let epfd = self.epfd.raw().map_err(|_| libc::EBADF)?;
        if unsafe { libc::epoll_ctl(epfd, op, fd, &mut ev) } < 0 {
            return Err(last_errno());
        }
        Ok(())
    }
}

impl Poller for EpollPoller {
    fn register(&mut self, fd: RawFd, interest: Ops) -> Result<()> {
        match self.ctl(libc::EPOLL_CTL_ADD, fd, interest) {
            Ok(()) => Ok(()),
            // Stale entry for a reused descriptor number.
            Err(libc::EEXIST) => self.reregister(fd, interest),
            Err(e) => Err(NioError::Os(e)),
        }
    }

    fn reregister(&mut self, fd: RawFd, interest: Ops) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest)
            .map_err(NioError::Os)
    }

    fn deregister(&mut self, fd: RawFd) -> Result<()> {
        match self.ctl(libc::EPOLL_CTL_DEL, fd, Ops::NONE) {
            Ok(()) | Err(libc::ENOENT) | Err(libc::EBADF) => Ok(()),
            Err(e) => Err(NioError::Os(e)),
        }
    }

    fn wait(&mut self, timeout: Option<Duration>, out: &mut Vec<(RawFd, Ops)>) -> Result<()> {
        let epfd = self.epfd.raw()?;
        let n = unsafe {
            libc::epoll_wait(
                epfd,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                sys::timeout_ms(timeout),
            )
        };
        if n < 0 {
            let errno = last_errno();
            if errno == libc::EINTR {
                return Ok(());
            }
            return Err(NioError::Os(errno));
        }
        for ev in &self.events[..n as usize] {
            let bits = ev.events as libc::c_int;
            let fd = ev.u64 as RawFd;
            let readable = bits & (libc::EPOLLIN | libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) != 0;
            let writable = bits & (libc::EPOLLOUT | libc::EPOLLHUP | libc::EPOLLERR) != 0;
            out.push((fd, readiness(readable, writable)));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.epfd.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interest_mapping() {
        assert_eq!(interest_bits(Ops::NONE), 0);
        assert_eq!(interest_bits(Ops::ACCEPT), libc::EPOLLIN as u32);
        assert_eq!(interest_bits(Ops::CONNECT), libc::EPOLLOUT as u32);
        assert_eq!(
            interest_bits(Ops::READ | Ops::WRITE),
            (libc::EPOLLIN | libc::EPOLLOUT) as u32
        );
    }

    #[test]
    fn test_pipe_readiness() {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (r, w) = (Descriptor::new(fds[0]), Descriptor::new(fds[1]));
        let rfd = r.raw().unwrap();
        let mut poller = EpollPoller::new(8).unwrap();
        poller.register(rfd, Ops::READ).unwrap();

        let mut out = Vec::new();
        poller.wait(Some(Duration::ZERO), &mut out).unwrap();
        assert!(out.is_empty());

        let byte = 1u8;
        unsafe { libc::write(w.raw().unwrap(), &byte as *const u8 as *const libc::c_void, 1) };
        poller.wait(Some(Duration::from_secs(1)), &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, rfd);
        assert!(out[0].1.contains(Ops::READ));

        out.clear();
        poller.deregister(rfd).unwrap();
        poller.wait(Some(Duration::ZERO), &mut out).unwrap();
        assert!(out.is_empty());
        // Removing twice is harmless.
        poller.deregister(rfd).unwrap();
    }
}
