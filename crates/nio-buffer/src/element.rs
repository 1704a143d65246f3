//! Element types a buffer can be viewed as.
//!
//! Storage is always raw bytes. An `Element` knows its stride and how to
//! decode/encode itself at a byte offset in a given byte order, which is
//! all a typed view needs to reinterpret the same bytes.

use std::fmt;

/// Byte order used to encode multi-byte elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    /// Order of the host CPU.
    #[inline]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::BigEndian
        } else {
            ByteOrder::LittleEndian
        }
    }
}

impl Default for ByteOrder {
    fn default() -> Self {
        ByteOrder::native()
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteOrder::BigEndian => write!(f, "BIG_ENDIAN"),
            ByteOrder::LittleEndian => write!(f, "LITTLE_ENDIAN"),
        }
    }
}

/// A fixed-width primitive stored in a buffer.
///
/// `decode`/`encode` are handed exactly `WIDTH` bytes.
pub trait Element: Copy + Default + PartialEq + fmt::Debug + 'static {
    /// Stride in bytes.
    const WIDTH: usize;
    /// Short name used in `Debug` output.
    const NAME: &'static str;

    fn decode(bytes: &[u8], order: ByteOrder) -> Self;
    fn encode(self, out: &mut [u8], order: ByteOrder);
}

macro_rules! impl_element {
    ($($t:ty => $name:literal),* $(,)?) => {
        $(
            impl Element for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();
                const NAME: &'static str = $name;

                #[inline]
                fn decode(bytes: &[u8], order: ByteOrder) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::WIDTH]);
                    match order {
                        ByteOrder::BigEndian => <$t>::from_be_bytes(raw),
                        ByteOrder::LittleEndian => <$t>::from_le_bytes(raw),
                    }
                }

                #[inline]
                fn encode(self, out: &mut [u8], order: ByteOrder) {
                    let raw = match order {
                        ByteOrder::BigEndian => self.to_be_bytes(),
                        ByteOrder::LittleEndian => self.to_le_bytes(),
                    };
                    out[..Self::WIDTH].copy_from_slice(&raw);
                }
            }
        )*
    };
}

impl_element! {
    u8 => "u8",
    i8 => "i8",
    u16 => "u16",
    i16 => "i16",
    u32 => "u32",
    i32 => "i32",
    u64 => "u64",
    i64 => "i64",
    f32 => "f32",
    f64 => "f64",
}

/// Widest element; sizes the stack scratch used by single-element access.
pub(crate) const MAX_WIDTH: usize = 8;
