//! Thin libc wrappers shared by the channel types.

use nio_core::error::{last_errno, NioError, Result};
use nio_core::fd::Descriptor;

use nix::fcntl::{fcntl, FcntlArg, OFlag};

use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        /// Flags for send(2): never raise SIGPIPE on a closed peer.
        pub(crate) const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;

        /// New close-on-exec stream socket.
        pub(crate) fn stream_socket(family: libc::c_int) -> Result<Arc<Descriptor>> {
            let fd = unsafe { libc::socket(family, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
            Descriptor::from_syscall(fd)
        }

        /// accept(2) with close-on-exec set atomically.
        pub(crate) fn accept_raw(
            fd: RawFd,
            storage: &mut libc::sockaddr_storage,
        ) -> RawFd {
            let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
            unsafe {
                libc::accept4(
                    fd,
                    storage as *mut _ as *mut libc::sockaddr,
                    &mut len,
                    libc::SOCK_CLOEXEC,
                )
            }
        }
    } else {
        pub(crate) const SEND_FLAGS: libc::c_int = 0;

        pub(crate) fn stream_socket(family: libc::c_int) -> Result<Arc<Descriptor>> {
            let fd = unsafe { libc::socket(family, libc::SOCK_STREAM, 0) };
            let desc = Descriptor::from_syscall(fd)?;
            set_cloexec(fd)?;
            #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
            set_int_opt(fd, libc::SOL_SOCKET, libc::SO_NOSIGPIPE, 1)?;
            Ok(desc)
        }

        pub(crate) fn accept_raw(
            fd: RawFd,
            storage: &mut libc::sockaddr_storage,
        ) -> RawFd {
            let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
            let conn = unsafe {
                libc::accept(fd, storage as *mut _ as *mut libc::sockaddr, &mut len)
            };
            if conn >= 0 && set_cloexec(conn).is_err() {
                log::warn!("fd {}: could not set FD_CLOEXEC", conn);
            }
            conn
        }

        fn set_cloexec(fd: RawFd) -> Result<()> {
            fcntl(fd, FcntlArg::F_SETFD(nix::fcntl::FdFlag::FD_CLOEXEC))?;
            Ok(())
        }
    }
}

/// Toggle `O_NONBLOCK`.
pub(crate) fn set_nonblocking(fd: RawFd, nonblocking: bool) -> Result<()> {
    let bits = fcntl(fd, FcntlArg::F_GETFL)?;
    let mut flags = OFlag::from_bits_truncate(bits);
    flags.set(OFlag::O_NONBLOCK, nonblocking);
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// Read `O_ACCMODE` from the open file description.
pub(crate) fn access_mode(fd: RawFd) -> Result<(bool, bool)> {
    let mode = fcntl(fd, FcntlArg::F_GETFL)? & libc::O_ACCMODE;
    Ok(if mode == libc::O_RDONLY {
        (true, false)
    } else if mode == libc::O_WRONLY {
        (false, true)
    } else {
        (true, true)
    })
}

pub(crate) fn set_int_opt(fd: RawFd, level: libc::c_int, name: libc::c_int, val: libc::c_int) -> Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &val as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(NioError::last_os());
    }
    Ok(())
}

pub(crate) fn get_int_opt(fd: RawFd, level: libc::c_int, name: libc::c_int) -> Result<libc::c_int> {
    let mut val: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            level,
            name,
            &mut val as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if ret < 0 {
        return Err(NioError::last_os());
    }
    Ok(val)
}

/// Timeout in poll(2) milliseconds: `None` blocks, sub-millisecond
/// remainders round up so a short timeout never becomes a busy poll.
pub(crate) fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_millis() + u128::from(d.subsec_nanos() % 1_000_000 != 0);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

/// Wait for `events` on one descriptor. Returns `revents`, 0 on timeout or EINTR.
pub(crate) fn poll_one(fd: RawFd, events: libc::c_short, timeout: Option<Duration>) -> Result<libc::c_short> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms(timeout)) };
    if ret < 0 {
        let errno = last_errno();
        if errno == libc::EINTR {
            return Ok(0);
        }
        return Err(NioError::Os(errno));
    }
    Ok(pfd.revents)
}

#[inline]
pub(crate) fn would_block(errno: i32) -> bool {
    errno == libc::EAGAIN || errno == libc::EWOULDBLOCK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_rounding() {
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_ms(Some(Duration::from_micros(10))), 1);
        assert_eq!(timeout_ms(Some(Duration::from_millis(1000))), 1000);
    }

    #[test]
    fn test_nonblocking_toggle() {
        let sock = stream_socket(libc::AF_INET).unwrap();
        let fd = sock.raw().unwrap();
        set_nonblocking(fd, true).unwrap();
        let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL).unwrap());
        assert!(flags.contains(OFlag::O_NONBLOCK));
        set_nonblocking(fd, false).unwrap();
        let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL).unwrap());
        assert!(!flags.contains(OFlag::O_NONBLOCK));
    }

    #[test]
    fn test_int_opts() {
        let sock = stream_socket(libc::AF_INET).unwrap();
        let fd = sock.raw().unwrap();
        set_int_opt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1).unwrap();
        assert_ne!(get_int_opt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR).unwrap(), 0);
    }
}
