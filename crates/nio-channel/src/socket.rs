//! Stream socket channel.
//!
//! ```text
//!   Unconnected ──connect()──> Connected
//!        │    └──connect() EINPROGRESS──> Connecting ──finish_connect()──> Connected
//!        │                                    │
//!        └──<── connect failure (fresh fd) ───┘
//!   any state ──close()──> Closed (terminal)
//! ```

use crate::addr;
use crate::channel::{Channel, ReadStatus};
use crate::sys;

use nio_buffer::ByteBuffer;
use nio_core::config::NioConfig;
use nio_core::error::{last_errno, NioError, Result};
use nio_core::fd::Descriptor;
use nio_core::ops::Ops;

use std::fmt;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// iovec entries handed to one readv (Linux IOV_MAX).
const MAX_IOV: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Unconnected,
    Connecting,
    Connected,
    Closed,
}

pub struct SocketChannel {
    descriptor: Arc<Descriptor>,
    family: libc::c_int,
    state: ConnState,
    blocking: bool,
    remote: Option<SocketAddr>,
    config: NioConfig,
}

impl SocketChannel {
    /// Unconnected IPv4 stream socket, configured from the environment.
    pub fn open() -> Result<Self> {
        Self::open_with(&NioConfig::from_env())
    }

    pub fn open_with(config: &NioConfig) -> Result<Self> {
        Ok(Self {
            descriptor: sys::stream_socket(libc::AF_INET)?,
            family: libc::AF_INET,
            state: ConnState::Unconnected,
            blocking: true,
            remote: None,
            config: config.clone(),
        })
    }

    /// Open and connect in blocking mode.
    pub fn connect_to(addr: SocketAddr) -> Result<Self> {
        let mut ch = Self::open()?;
        ch.connect(addr)?;
        Ok(ch)
    }

    /// Channel for a descriptor returned by accept.
    pub(crate) fn accepted(
        descriptor: Arc<Descriptor>,
        remote: SocketAddr,
        config: &NioConfig,
    ) -> Result<Self> {
        let ch = Self {
            descriptor,
            family: addr::family(&remote),
            state: ConnState::Connected,
            blocking: true,
            remote: Some(remote),
            config: config.clone(),
        };
        ch.apply_connected_opts()?;
        Ok(ch)
    }

    #[inline]
    pub fn state(&self) -> ConnState {
        self.state
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state == ConnState::Connected
    }

    #[inline]
    pub fn is_connection_pending(&self) -> bool {
        self.state == ConnState::Connecting
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Bound local address; `0.0.0.0:0` before connect.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        addr::local_of(self.fd()?)
    }

    fn fd(&self) -> Result<RawFd> {
        if self.state == ConnState::Closed {
            return Err(NioError::UseAfterClose);
        }
        self.descriptor.raw()
    }

    fn connected_fd(&self) -> Result<RawFd> {
        match self.state {
            ConnState::Connected => self.descriptor.raw(),
            ConnState::Closed => Err(NioError::UseAfterClose),
            _ => Err(NioError::NotConnected),
        }
    }

    /// Put the socket in (non-)blocking mode through `O_NONBLOCK`.
    pub fn set_blocking(&mut self, blocking: bool) -> Result<()> {
        sys::set_nonblocking(self.fd()?, !blocking)?;
        self.blocking = blocking;
        Ok(())
    }

    /// Replace the descriptor with a fresh unconnected socket of `family`,
    /// keeping the blocking mode.
    fn reset_socket(&mut self, family: libc::c_int) -> Result<()> {
        let fresh = sys::stream_socket(family)?;
        if !self.blocking {
            sys::set_nonblocking(fresh.raw()?, true)?;
        }
        let old = std::mem::replace(&mut self.descriptor, fresh);
        old.close()?;
        self.family = family;
        self.state = ConnState::Unconnected;
        self.remote = None;
        Ok(())
    }

    fn apply_connected_opts(&self) -> Result<()> {
        if self.config.tcp_nodelay {
            sys::set_int_opt(self.descriptor.raw()?, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1)?;
        }
        Ok(())
    }

    fn connect_failed(&mut self, errno: i32) -> NioError {
        log::debug!("connect to {:?} failed: errno {}", self.remote, errno);
        if let Err(e) = self.reset_socket(self.family) {
            log::warn!("could not replace socket after failed connect: {}", e);
        }
        NioError::ConnectionRefused(errno)
    }

    /// Connect to `target`.
    ///
    /// Returns `true` once connected. In non-blocking mode returns `false`
    /// while the handshake is in flight; complete it with
    /// `finish_connect()`. Failure leaves the channel unconnected with a
    /// fresh socket.
    pub fn connect(&mut self, target: SocketAddr) -> Result<bool> {
        match self.state {
            ConnState::Connected => return Err(NioError::AlreadyConnected),
            ConnState::Connecting => return Err(NioError::ConnectionPending),
            ConnState::Closed => return Err(NioError::UseAfterClose),
            ConnState::Unconnected => {}
        }

        let family = addr::family(&target);
        if family != self.family {
            self.reset_socket(family)?;
        }

        let fd = self.descriptor.raw()?;
        let (raw, len) = addr::to_raw(&target);
        self.remote = Some(target);
        loop {
            let ret = unsafe { libc::connect(fd, &raw as *const _ as *const libc::sockaddr, len) };
            if ret == 0 {
                self.state = ConnState::Connected;
                self.apply_connected_opts()?;
                log::trace!("fd {} connected to {}", fd, target);
                return Ok(true);
            }
            match last_errno() {
                libc::EINTR if self.blocking => continue,
                libc::EINPROGRESS | libc::EINTR => {
                    self.state = ConnState::Connecting;
                    return Ok(false);
                }
                errno => return Err(self.connect_failed(errno)),
            }
        }
    }

    /// Complete a pending connect.
    ///
    /// Blocking channels wait for the handshake; non-blocking ones return
    /// `false` if it has not finished yet.
    pub fn finish_connect(&mut self) -> Result<bool> {
        match self.state {
            ConnState::Connected => return Ok(true),
            ConnState::Unconnected => return Err(NioError::NoConnectionPending),
            ConnState::Closed => return Err(NioError::UseAfterClose),
            ConnState::Connecting => {}
        }

        let fd = self.descriptor.raw()?;
        let wait = if self.blocking { None } else { Some(std::time::Duration::ZERO) };
        loop {
            let revents = sys::poll_one(fd, libc::POLLOUT, wait)?;
            if revents != 0 {
                break;
            }
            if !self.blocking {
                return Ok(false);
            }
        }

        match sys::get_int_opt(fd, libc::SOL_SOCKET, libc::SO_ERROR)? {
            0 => {
                self.state = ConnState::Connected;
                self.apply_connected_opts()?;
                Ok(true)
            }
            errno => Err(self.connect_failed(errno)),
        }
    }

    /// Read into `buf` at its position, at most `read_chunk` bytes.
    pub fn read(&mut self, buf: &mut ByteBuffer) -> Result<ReadStatus> {
        let fd = self.connected_fd()?;
        if !buf.has_remaining() {
            return Ok(ReadStatus::Read(0));
        }
        let span = buf.remaining_span_mut()?;
        let want = span.len.min(self.config.read_chunk);
        loop {
            let n = unsafe { libc::recv(fd, span.ptr as *mut libc::c_void, want, 0) };
            if n > 0 {
                buf.advance(n as usize)?;
                return Ok(ReadStatus::Read(n as usize));
            }
            if n == 0 {
                return Ok(ReadStatus::EndOfStream);
            }
            match last_errno() {
                libc::EINTR => continue,
                e if sys::would_block(e) => return Ok(ReadStatus::WouldBlock),
                e => return Err(NioError::Os(e)),
            }
        }
    }

    /// Write from `buf`'s remaining bytes. Returns the count sent; 0 when a
    /// non-blocking socket's send buffer is full.
    pub fn write(&mut self, buf: &mut ByteBuffer) -> Result<usize> {
        let fd = self.connected_fd()?;
        if !buf.has_remaining() {
            return Ok(0);
        }
        let span = buf.remaining_span()?;
        loop {
            let n = unsafe {
                libc::send(fd, span.ptr as *const libc::c_void, span.len, sys::SEND_FLAGS)
            };
            if n >= 0 {
                buf.advance(n as usize)?;
                return Ok(n as usize);
            }
            match last_errno() {
                libc::EINTR => continue,
                e if sys::would_block(e) => return Ok(0),
                e => return Err(NioError::Os(e)),
            }
        }
    }

    /// Scatter read: a single `readv` across `bufs` in order, at most
    /// `read_chunk` bytes in total.
    ///
    /// Full buffers are skipped. Returns `Read(0)` when none has room. A
    /// blocking channel waits only until some data arrives, never for every
    /// buffer to fill.
    pub fn read_vectored(&mut self, bufs: &mut [ByteBuffer]) -> Result<ReadStatus> {
        let fd = self.connected_fd()?;
        let mut iov = Vec::new();
        let mut budget = self.config.read_chunk;
        for buf in bufs.iter_mut() {
            if budget == 0 || iov.len() == MAX_IOV {
                break;
            }
            if !buf.has_remaining() {
                continue;
            }
            let span = buf.remaining_span_mut()?;
            let len = span.len.min(budget);
            budget -= len;
            iov.push(libc::iovec {
                iov_base: span.ptr as *mut libc::c_void,
                iov_len: len,
            });
        }
        if iov.is_empty() {
            return Ok(ReadStatus::Read(0));
        }

        loop {
            let n = unsafe { libc::readv(fd, iov.as_ptr(), iov.len() as libc::c_int) };
            if n > 0 {
                let mut left = n as usize;
                for buf in bufs.iter_mut() {
                    if left == 0 {
                        break;
                    }
                    let step = left.min(buf.remaining());
                    buf.advance(step)?;
                    left -= step;
                }
                return Ok(ReadStatus::Read(n as usize));
            }
            if n == 0 {
                return Ok(ReadStatus::EndOfStream);
            }
            match last_errno() {
                libc::EINTR => continue,
                e if sys::would_block(e) => return Ok(ReadStatus::WouldBlock),
                e => return Err(NioError::Os(e)),
            }
        }
    }

    /// Gather write: drain `bufs` in order, stopping at the first short write.
    pub fn write_vectored(&mut self, bufs: &mut [ByteBuffer]) -> Result<usize> {
        let mut total = 0usize;
        for buf in bufs.iter_mut() {
            let len = buf.remaining();
            if len == 0 {
                continue;
            }
            let n = self.write(buf)?;
            total += n;
            if n < len {
                break;
            }
        }
        Ok(total)
    }

    pub fn shutdown_input(&mut self) -> Result<()> {
        self.shutdown(libc::SHUT_RD)
    }

    pub fn shutdown_output(&mut self) -> Result<()> {
        self.shutdown(libc::SHUT_WR)
    }

    fn shutdown(&mut self, how: libc::c_int) -> Result<()> {
        let fd = self.connected_fd()?;
        if unsafe { libc::shutdown(fd, how) } < 0 {
            return Err(NioError::last_os());
        }
        Ok(())
    }
}

impl Channel for SocketChannel {
    fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    fn valid_ops(&self) -> Option<Ops> {
        Some(Ops::READ | Ops::WRITE | Ops::CONNECT)
    }

    fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Close the socket. Terminal: every later operation fails with
    /// `UseAfterClose`, and keys registered for it are dropped on the next
    /// select.
    fn close(&mut self) -> Result<()> {
        self.state = ConnState::Closed;
        self.remote = None;
        self.descriptor.close()
    }
}

impl fmt::Debug for SocketChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketChannel")
            .field("fd", &self.descriptor.origin())
            .field("state", &self.state)
            .field("blocking", &self.blocking)
            .field("remote", &self.remote)
            .finish()
    }
}
