//! poll(2) readiness backend.
//!
//! Keeps the interest table in user space and rebuilds the `pollfd` array
//! on every wait. Used where epoll is unavailable.

use super::{readiness, Poller};
use crate::sys;

use nio_core::error::{last_errno, NioError, Result};
use nio_core::ops::Ops;

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub(crate) struct PollPoller {
    interests: HashMap<RawFd, Ops>,
    fds: Vec<libc::pollfd>,
}

fn interest_bits(ops: Ops) -> libc::c_short {
    let mut bits = 0;
    if ops.intersects(Ops::READ | Ops::ACCEPT) {
        bits |= libc::POLLIN;
    }
    if ops.intersects(Ops::WRITE | Ops::CONNECT) {
        bits |= libc::POLLOUT;
    }
    bits
}

impl PollPoller {
    pub(crate) fn new() -> Self {
        Self {
            interests: HashMap::new(),
            fds: Vec::new(),
        }
    }
}

impl Poller for PollPoller {
    fn register(&mut self, fd: RawFd, interest: Ops) -> Result<()> {
        self.interests.insert(fd, interest);
        Ok(())
    }

    fn reregister(&mut self, fd: RawFd, interest: Ops) -> Result<()> {
        match self.interests.get_mut(&fd) {
            Some(slot) => {
                *slot = interest;
                Ok(())
            }
            None => Err(NioError::Os(libc::ENOENT)),
        }
    }

    fn deregister(&mut self, fd: RawFd) -> Result<()> {
        self.interests.remove(&fd);
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>, out: &mut Vec<(RawFd, Ops)>) -> Result<()> {
        self.fds.clear();
        self.fds.extend(self.interests.iter().map(|(&fd, &ops)| libc::pollfd {
            fd,
            events: interest_bits(ops),
            revents: 0,
        }));
        let n = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
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
        for pfd in self.fds.iter().filter(|p| p.revents != 0) {
            let bits = pfd.revents;
            // POLLNVAL marks a descriptor closed behind our back; report it
            // so the owner notices on its next operation.
            let broken = libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
            let readable = bits & (libc::POLLIN | broken) != 0;
            let writable = bits & (libc::POLLOUT | broken) != 0;
            out.push((pfd.fd, readiness(readable, writable)));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.interests.clear();
        self.fds.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nio_core::fd::Descriptor;

    #[test]
    fn test_pipe_readiness() {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (r, w) = (Descriptor::new(fds[0]), Descriptor::new(fds[1]));
        let (rfd, wfd) = (r.raw().unwrap(), w.raw().unwrap());

        let mut poller = PollPoller::new();
        poller.register(rfd, Ops::READ).unwrap();
        poller.register(wfd, Ops::NONE).unwrap();

        let mut out = Vec::new();
        poller.wait(Some(Duration::ZERO), &mut out).unwrap();
        assert!(out.is_empty());

        poller.reregister(wfd, Ops::WRITE).unwrap();
        poller.wait(Some(Duration::ZERO), &mut out).unwrap();
        assert_eq!(out, vec![(wfd, Ops::WRITE | Ops::CONNECT)]);

        out.clear();
        poller.deregister(wfd).unwrap();
        let byte = 1u8;
        unsafe { libc::write(wfd, &byte as *const u8 as *const libc::c_void, 1) };
        poller.wait(Some(Duration::from_secs(1)), &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, rfd);
        assert!(out[0].1.contains(Ops::READ));

        assert!(poller.reregister(wfd, Ops::READ).is_err());
    }
}
