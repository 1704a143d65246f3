//! # nio-channel
//!
//! Channels over OS descriptors and a selector that multiplexes them.
//!
//! ## Architecture
//!
//! ```text
//!   SocketChannel ────────┐
//!   ServerSocketChannel ──┼── Arc<Descriptor> ──> SelectionKey ──> Selector
//!   FileChannel ──────────┘        │                                  │
//!        │                         │                           Poller (epoll / poll)
//!        └── map() ──> MappedRegion┘                           Waker  (eventfd / pipe)
//! ```
//!
//! Channels move bytes straight between a `ByteBuffer`'s storage and the
//! kernel. Reads report `ReadStatus::WouldBlock` and
//! `ReadStatus::EndOfStream` as distinct outcomes.
//!
//! ## Modules
//!
//! - `channel` - `Channel` trait, `ReadStatus`
//! - `socket` - connecting stream socket
//! - `server` - listening stream socket
//! - `file` - file channel, owner of mappings
//! - `selector` - `Selector`, `SelectionKey`

pub mod channel;
pub mod socket;
pub mod server;
pub mod file;
pub mod selector;

mod addr;
mod sys;
mod waker;

pub use channel::{Channel, ReadStatus};
pub use file::{FileChannel, OpenOptions};
pub use selector::{SelectionKey, Selector};
pub use server::ServerSocketChannel;
pub use socket::{ConnState, SocketChannel};

pub use nio_core::Ops;
