//! Error types for the nio layer.
//!
//! Every failure is surfaced to the immediate caller as a typed condition.
//! Nothing here is retried or swallowed. `EndOfStream` and `WouldBlock`
//! are outcomes of a read, not errors; see `nio_channel::ReadStatus`.

use crate::ops::Ops;

use thiserror::Error;

/// Result type for nio operations
pub type Result<T> = std::result::Result<T, NioError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NioError {
    /// Access outside `[0, limit)` (absolute) or past `limit` (relative).
    #[error("index {index} out of bounds (limit {limit})")]
    OutOfBounds { index: usize, limit: usize },

    /// Write attempted through a read-only view.
    #[error("buffer is read-only")]
    ReadOnly,

    /// Argument would break a buffer or channel invariant.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// `reset()` called with no mark set.
    #[error("mark is not set")]
    InvalidMark,

    /// mmap/munmap/msync failed.
    #[error("mapping failed: errno {0}")]
    MappingFailure(i32),

    /// The backing descriptor has already been closed.
    #[error("descriptor used after close")]
    UseAfterClose,

    #[error("channel already connected")]
    AlreadyConnected,

    /// A non-blocking connect is in progress; call `finish_connect()`.
    #[error("connection already pending")]
    ConnectionPending,

    #[error("no connection pending")]
    NoConnectionPending,

    #[error("channel not connected")]
    NotConnected,

    /// The native connect failed; carries the errno.
    #[error("connection refused: errno {0}")]
    ConnectionRefused(i32),

    #[error("channel already bound")]
    AlreadyBound,

    #[error("channel not bound")]
    NotBound,

    /// The channel kind cannot be multiplexed by a selector.
    #[error("channel is not selectable")]
    UnsupportedChannel,

    /// Interest change on a cancelled selection key.
    #[error("selection key cancelled")]
    CancelledKey,

    /// Interest set is not a subset of the channel's valid operations.
    #[error("interest {requested} not within valid ops {valid}")]
    IllegalOps { requested: Ops, valid: Ops },

    /// File channel opened without read access.
    #[error("channel not open for reading")]
    NotReadable,

    /// File channel opened without write access.
    #[error("channel not open for writing")]
    NotWritable,

    /// Any other OS error.
    #[error("OS error: errno {0}")]
    Os(i32),
}

impl NioError {
    /// Capture the calling thread's errno as `NioError::Os`.
    #[inline]
    pub fn last_os() -> Self {
        NioError::Os(last_errno())
    }

    /// The native error code, if the error carries one.
    pub fn errno(&self) -> Option<i32> {
        match self {
            NioError::MappingFailure(e) | NioError::ConnectionRefused(e) | NioError::Os(e) => {
                Some(*e)
            }
            _ => None,
        }
    }

    pub fn is_use_after_close(&self) -> bool {
        matches!(self, NioError::UseAfterClose)
    }
}

impl From<nix::errno::Errno> for NioError {
    fn from(e: nix::errno::Errno) -> Self {
        NioError::Os(e as i32)
    }
}

/// Read errno for the calling thread.
#[inline]
pub fn last_errno() -> i32 {
    nix::errno::Errno::last() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = NioError::OutOfBounds { index: 4, limit: 4 };
        assert_eq!(e.to_string(), "index 4 out of bounds (limit 4)");

        let e = NioError::ConnectionRefused(libc::ECONNREFUSED);
        assert_eq!(
            e.to_string(),
            format!("connection refused: errno {}", libc::ECONNREFUSED)
        );

        let e = NioError::IllegalOps {
            requested: Ops::ACCEPT,
            valid: Ops::READ | Ops::WRITE,
        };
        assert_eq!(e.to_string(), "interest ACCEPT not within valid ops READ|WRITE");
    }

    #[test]
    fn test_errno_accessor() {
        assert_eq!(NioError::MappingFailure(12).errno(), Some(12));
        assert_eq!(NioError::Os(9).errno(), Some(9));
        assert_eq!(NioError::ReadOnly.errno(), None);
        assert!(NioError::UseAfterClose.is_use_after_close());
        assert_eq!(NioError::from(nix::errno::Errno::EBADF), NioError::Os(libc::EBADF));
    }
}
