//! # nio-buffer
//!
//! Typed, cursor-bounded views over shared byte storage.
//!
//! ## Architecture
//!
//! ```text
//!  Buffer<i32> ──┐
//!  Buffer<u8>  ──┼──> Rc<Storage> ──> Heap bytes
//!  Buffer<f64> ──┘                └─> MappedRegion ──> Arc<Descriptor>
//! ```
//!
//! Every element kind shares one generic implementation. Views derived
//! from a buffer (`slice`, `duplicate`, `as_read_only`, `as_*_buffer`)
//! alias the same storage, so a write through one is visible through all.
//!
//! ## Modules
//!
//! - `element` - `Element` trait (stride + encoding) and `ByteOrder`
//! - `mapped` - `MappedRegion` and `MapMode`
//! - `buffer` - the generic `Buffer<T>`

pub mod element;
pub mod mapped;
pub mod buffer;

mod storage;

pub use buffer::{Buffer, BufferSpan};
pub use element::{ByteOrder, Element};
pub use mapped::{MapMode, MappedRegion};

pub type ByteBuffer = Buffer<u8>;
pub type CharBuffer = Buffer<u16>;
pub type ShortBuffer = Buffer<i16>;
pub type IntBuffer = Buffer<i32>;
pub type LongBuffer = Buffer<i64>;
pub type FloatBuffer = Buffer<f32>;
pub type DoubleBuffer = Buffer<f64>;

/// A byte buffer whose storage is a file mapping (see `Buffer::is_mapped`).
pub type MappedByteBuffer = ByteBuffer;
