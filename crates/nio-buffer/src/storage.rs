//! Backing storage shared by buffer views.
//!
//! Storage is a flat byte span. Every typed view computes
//! `byte_offset = base + index * stride` against it, and every access goes
//! through the single bounds check in this file. Views never hold Rust
//! references into the span; all transfers are raw copies, so any number
//! of aliasing views can read and write the same bytes.

use crate::mapped::{MapMode, MappedRegion};

use nio_core::error::{NioError, Result};

use std::cell::Cell;
use std::ptr;

pub(crate) enum Storage {
    /// Ordinary heap memory.
    Heap(Box<[Cell<u8>]>),
    /// Anonymous or file-backed mapping.
    Mapped(MappedRegion),
}

impl Storage {
    pub(crate) fn heap(len: usize) -> Self {
        Storage::Heap((0..len).map(|_| Cell::new(0u8)).collect())
    }

    pub(crate) fn heap_from(bytes: Vec<u8>) -> Self {
        Storage::Heap(bytes.into_iter().map(Cell::new).collect())
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        match self {
            Storage::Heap(b) => b.len(),
            Storage::Mapped(r) => r.len(),
        }
    }

    #[inline]
    pub(crate) fn is_direct(&self) -> bool {
        matches!(self, Storage::Mapped(_))
    }

    #[inline]
    pub(crate) fn is_file_backed(&self) -> bool {
        matches!(self, Storage::Mapped(r) if r.is_file_backed())
    }

    /// Mapping mode for mapped storage, `None` on the heap.
    #[inline]
    pub(crate) fn map_mode(&self) -> Option<MapMode> {
        match self {
            Storage::Heap(_) => None,
            Storage::Mapped(r) => Some(r.mode()),
        }
    }

    #[inline]
    pub(crate) fn check_live(&self) -> Result<()> {
        match self {
            Storage::Heap(_) => Ok(()),
            Storage::Mapped(r) => r.check_live(),
        }
    }

    #[inline]
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        match self {
            // Cell<u8> is repr(transparent) over UnsafeCell<u8>, so the
            // slice is a contiguous, shared-mutable run of bytes.
            Storage::Heap(b) => b.as_ptr() as *mut u8,
            Storage::Mapped(r) => r.as_ptr(),
        }
    }

    /// Bounds- and liveness-check `[offset, offset + len)`.
    #[inline]
    pub(crate) fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        self.check_live()?;
        match offset.checked_add(len) {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(NioError::OutOfBounds {
                index: offset,
                limit: self.len(),
            }),
        }
    }

    pub(crate) fn read(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check_range(offset, dst.len())?;
        unsafe {
            ptr::copy_nonoverlapping(self.base_ptr().add(offset), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    pub(crate) fn write(&self, offset: usize, src: &[u8]) -> Result<()> {
        self.check_range(offset, src.len())?;
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.base_ptr().add(offset), src.len());
        }
        Ok(())
    }

    /// Overlap-safe move within the storage.
    pub(crate) fn copy_within(&self, src: usize, dst: usize, len: usize) -> Result<()> {
        self.check_range(src, len)?;
        self.check_range(dst, len)?;
        unsafe {
            let base = self.base_ptr();
            ptr::copy(base.add(src), base.add(dst), len);
        }
        Ok(())
    }

    pub(crate) fn force(&self) -> Result<()> {
        match self {
            Storage::Heap(_) => Ok(()),
            Storage::Mapped(r) => r.force(),
        }
    }

    pub(crate) fn load(&self) -> Result<()> {
        match self {
            Storage::Heap(_) => Ok(()),
            Storage::Mapped(r) => r.load(),
        }
    }
}
