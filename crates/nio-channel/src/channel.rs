//! The `Channel` trait and read outcomes.

use nio_core::error::Result;
use nio_core::fd::Descriptor;
use nio_core::ops::Ops;

use std::sync::Arc;

/// An open connection to an OS I/O resource.
///
/// Selectors register channels through this trait. A channel that cannot
/// be multiplexed returns `None` from `valid_ops()`.
pub trait Channel {
    /// The shared descriptor handle. Keys and mappings hold clones of it.
    fn descriptor(&self) -> &Arc<Descriptor>;

    /// Operations a selector may watch on this channel, `None` if the
    /// channel is not selectable.
    fn valid_ops(&self) -> Option<Ops>;

    /// True unless the channel is in non-blocking mode.
    fn is_blocking(&self) -> bool;

    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool {
        self.descriptor().is_open()
    }
}

/// Outcome of a read that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// `n` bytes landed in the buffer. Zero only when it had no room.
    Read(usize),
    /// Non-blocking channel with nothing available right now.
    WouldBlock,
    /// The peer closed its side, or the file is at its end.
    EndOfStream,
}

impl ReadStatus {
    /// Bytes transferred; 0 for `WouldBlock` and `EndOfStream`.
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            ReadStatus::Read(n) => n,
            _ => 0,
        }
    }

    #[inline]
    pub fn is_end_of_stream(self) -> bool {
        matches!(self, ReadStatus::EndOfStream)
    }

    #[inline]
    pub fn is_would_block(self) -> bool {
        matches!(self, ReadStatus::WouldBlock)
    }
}
