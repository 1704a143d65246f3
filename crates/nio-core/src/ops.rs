//! Interest / readiness operation sets.
//!
//! Bit values match the classic selection-key constants so that masks
//! logged by this layer read the same as those of other NIO stacks.

use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// A set of selectable operations.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Ops(u32);

impl Ops {
    pub const NONE: Ops = Ops(0);
    pub const READ: Ops = Ops(1 << 0);
    pub const WRITE: Ops = Ops(1 << 2);
    pub const CONNECT: Ops = Ops(1 << 3);
    pub const ACCEPT: Ops = Ops(1 << 4);

    const ALL: [(Ops, &'static str); 4] = [
        (Ops::READ, "READ"),
        (Ops::WRITE, "WRITE"),
        (Ops::CONNECT, "CONNECT"),
        (Ops::ACCEPT, "ACCEPT"),
    ];

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Ops(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set in `self`.
    #[inline]
    pub const fn contains(self, other: Ops) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: Ops) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for Ops {
    type Output = Ops;
    #[inline]
    fn bitor(self, rhs: Ops) -> Ops {
        Ops(self.0 | rhs.0)
    }
}

impl BitOrAssign for Ops {
    #[inline]
    fn bitor_assign(&mut self, rhs: Ops) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Ops {
    type Output = Ops;
    #[inline]
    fn bitand(self, rhs: Ops) -> Ops {
        Ops(self.0 & rhs.0)
    }
}

impl Not for Ops {
    type Output = Ops;
    #[inline]
    fn not(self) -> Ops {
        Ops(!self.0)
    }
}

impl fmt::Display for Ops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let mut first = true;
        for (op, name) in Ops::ALL {
            if self.contains(op) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        let unknown = self.0 & !(Ops::READ | Ops::WRITE | Ops::CONNECT | Ops::ACCEPT).0;
        if unknown != 0 {
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{:#x}", unknown)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Ops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ops({})", self)
    }
}
