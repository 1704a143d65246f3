//! Listening stream socket channel.

use crate::addr;
use crate::channel::Channel;
use crate::socket::SocketChannel;
use crate::sys;

use nio_core::config::NioConfig;
use nio_core::error::{last_errno, NioError, Result};
use nio_core::fd::Descriptor;
use nio_core::ops::Ops;

use std::net::SocketAddr;
use std::sync::Arc;

pub struct ServerSocketChannel {
    descriptor: Arc<Descriptor>,
    family: libc::c_int,
    bound: Option<SocketAddr>,
    blocking: bool,
    config: NioConfig,
}

impl ServerSocketChannel {
    pub fn open() -> Result<Self> {
        Self::open_with(&NioConfig::from_env())
    }

    /// Open with explicit settings; accepted channels inherit `config`.
    pub fn open_with(config: &NioConfig) -> Result<Self> {
        Ok(Self {
            descriptor: sys::stream_socket(libc::AF_INET)?,
            family: libc::AF_INET,
            bound: None,
            blocking: true,
            config: config.clone(),
        })
    }

    /// Bind and listen with the configured backlog.
    pub fn bind(&mut self, local: SocketAddr) -> Result<()> {
        self.bind_with_backlog(local, self.config.listen_backlog)
    }

    pub fn bind_with_backlog(&mut self, local: SocketAddr, backlog: i32) -> Result<()> {
        if self.bound.is_some() {
            return Err(NioError::AlreadyBound);
        }
        let family = addr::family(&local);
        if family != self.family {
            let fresh = sys::stream_socket(family)?;
            if !self.blocking {
                sys::set_nonblocking(fresh.raw()?, true)?;
            }
            std::mem::replace(&mut self.descriptor, fresh).close()?;
            self.family = family;
        }

        let fd = self.descriptor.raw()?;
        if self.config.reuse_address {
            sys::set_int_opt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)?;
        }

        let (raw, len) = addr::to_raw(&local);
        if unsafe { libc::bind(fd, &raw as *const _ as *const libc::sockaddr, len) } < 0 {
            return Err(NioError::last_os());
        }
        let backlog = if backlog < 1 { self.config.listen_backlog } else { backlog };
        if unsafe { libc::listen(fd, backlog) } < 0 {
            return Err(NioError::last_os());
        }

        let actual = addr::local_of(fd)?;
        log::debug!("fd {} listening on {} (backlog {})", fd, actual, backlog);
        self.bound = Some(actual);
        Ok(())
    }

    /// Bound address, with the kernel-chosen port when bound to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.descriptor.raw()?;
        self.bound.ok_or(NioError::NotBound)
    }

    pub fn set_blocking(&mut self, blocking: bool) -> Result<()> {
        sys::set_nonblocking(self.descriptor.raw()?, !blocking)?;
        self.blocking = blocking;
        Ok(())
    }

    /// Accept one connection.
    ///
    /// Returns `None` when the channel is non-blocking and no connection is
    /// queued. The new channel is connected and in blocking mode.
    pub fn accept(&mut self) -> Result<Option<SocketChannel>> {
        let fd = self.descriptor.raw()?;
        if self.bound.is_none() {
            return Err(NioError::NotBound);
        }
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        loop {
            let conn = sys::accept_raw(fd, &mut storage);
            if conn >= 0 {
                let descriptor = Descriptor::new(conn);
                let remote = addr::from_raw(&storage)?;
                log::trace!("fd {} accepted fd {} from {}", fd, conn, remote);
                return SocketChannel::accepted(descriptor, remote, &self.config).map(Some);
            }
            match last_errno() {
                libc::EINTR | libc::ECONNABORTED => continue,
                e if sys::would_block(e) => return Ok(None),
                e => return Err(NioError::Os(e)),
            }
        }
    }
}

impl Channel for ServerSocketChannel {
    fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    fn valid_ops(&self) -> Option<Ops> {
        Some(Ops::ACCEPT)
    }

    fn is_blocking(&self) -> bool {
        self.blocking
    }

    fn close(&mut self) -> Result<()> {
        self.bound = None;
        self.descriptor.close()
    }
}

impl std::fmt::Debug for ServerSocketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSocketChannel")
            .field("fd", &self.descriptor.origin())
            .field("bound", &self.bound)
            .field("blocking", &self.blocking)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_picks_port() {
        let mut server = ServerSocketChannel::open().unwrap();
        assert_eq!(server.local_addr(), Err(NioError::NotBound));
        assert_eq!(server.accept().err(), Some(NioError::NotBound));
        server.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(
            server.bind("127.0.0.1:0".parse().unwrap()),
            Err(NioError::AlreadyBound)
        );
    }

    #[test]
    fn test_non_blocking_accept_empty() {
        let mut server = ServerSocketChannel::open().unwrap();
        server.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        server.set_blocking(false).unwrap();
        assert!(server.accept().unwrap().is_none());

        let client = SocketChannel::connect_to(server.local_addr().unwrap()).unwrap();
        let mut accepted = None;
        for _ in 0..200 {
            if let Some(ch) = server.accept().unwrap() {
                accepted = Some(ch);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let accepted = accepted.expect("connection not accepted");
        assert!(accepted.is_connected());
        assert!(accepted.is_blocking());
        assert_eq!(accepted.remote_addr(), Some(client.local_addr().unwrap()));
    }

    #[test]
    fn test_valid_ops_and_close() {
        let mut server = ServerSocketChannel::open().unwrap();
        assert_eq!(server.valid_ops(), Some(Ops::ACCEPT));
        server.close().unwrap();
        assert!(!server.is_open());
        assert_eq!(
            server.bind("127.0.0.1:0".parse().unwrap()),
            Err(NioError::UseAfterClose)
        );
    }

    #[test]
    fn test_ipv6_rebinds_family() {
        let mut server = ServerSocketChannel::open().unwrap();
        // Hosts without IPv6 fail the bind; the family switch itself must not.
        if server.bind("[::1]:0".parse().unwrap()).is_ok() {
            assert!(server.local_addr().unwrap().is_ipv6());
        }
    }
}
