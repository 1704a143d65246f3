//! The typed buffer.
//!
//! `Buffer<T>` is a cursor-bounded view of `T` elements over shared byte
//! storage. One generic type covers every element kind; there is exactly
//! one bounds check path, in `check_index` plus `Storage::check_range`.
//!
//! ```text
//!   storage bytes:  [..........|x x x x|x x x x|x x x x|..........]
//!                              ^base
//!   elements:                   0       1       2  ...  capacity
//!   cursor:         0 <= position <= limit <= capacity
//! ```
//!
//! Derived views (`slice`, `duplicate`, `as_read_only`, `view::<U>`) share
//! the storage and snapshot the cursor; moving one view's cursor never
//! moves another's, but writes through one are visible through all.
//!
//! Buffers are `!Send`: aliased views are not synchronized, and the type
//! system keeps them on one thread.

use crate::element::{ByteOrder, Element, MAX_WIDTH};
use crate::mapped::{MapMode, MappedRegion};
use crate::storage::Storage;

use nio_core::error::{NioError, Result};

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

/// Raw byte span of a buffer's remaining region.
///
/// Handed to native I/O so it can transfer straight to or from storage.
/// Valid while the buffer (or any alias of its storage) is alive and, for
/// file mappings, while the owning channel is open.
#[derive(Debug, Clone, Copy)]
pub struct BufferSpan {
    pub ptr: *mut u8,
    pub len: usize,
}

pub struct Buffer<T: Element> {
    storage: Rc<Storage>,
    /// Byte offset of element 0 within `storage`.
    base: usize,
    capacity: usize,
    position: usize,
    limit: usize,
    mark: Option<usize>,
    read_only: bool,
    order: ByteOrder,
    _elem: PhantomData<T>,
}

// ── Construction ──────────────────────────────────────────────────

impl<T: Element> Buffer<T> {
    fn from_storage(storage: Storage, capacity: usize, read_only: bool) -> Self {
        debug_assert!(capacity * T::WIDTH <= storage.len());
        Self {
            storage: Rc::new(storage),
            base: 0,
            capacity,
            position: 0,
            limit: capacity,
            mark: None,
            read_only,
            order: ByteOrder::native(),
            _elem: PhantomData,
        }
    }

    /// Zero-filled heap buffer of `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics with "capacity overflow" if `capacity` elements do not fit in
    /// `usize` bytes, as `Vec::with_capacity` does.
    pub fn allocate(capacity: usize) -> Self {
        let bytes = match capacity.checked_mul(T::WIDTH) {
            Some(bytes) => bytes,
            None => panic!("capacity overflow"),
        };
        Self::from_storage(Storage::heap(bytes), capacity, false)
    }

    /// Zero-filled buffer backed by anonymous mapped memory.
    pub fn allocate_direct(capacity: usize) -> Result<Self> {
        let bytes = capacity
            .checked_mul(T::WIDTH)
            .ok_or(NioError::InvalidArgument("capacity overflows"))?;
        let region = MappedRegion::anonymous(bytes)?;
        Ok(Self::from_storage(Storage::Mapped(region), capacity, false))
    }

    /// Heap buffer holding `values`, positioned at 0 with limit = len.
    pub fn wrap(values: Vec<T>) -> Self {
        Self::from_slice(&values)
    }

    pub fn from_slice(values: &[T]) -> Self {
        let order = ByteOrder::native();
        let mut bytes = vec![0u8; values.len() * T::WIDTH];
        for (chunk, v) in bytes.chunks_exact_mut(T::WIDTH).zip(values) {
            v.encode(chunk, order);
        }
        Self::from_storage(Storage::heap_from(bytes), values.len(), false)
    }

    /// Wrap `values` with the cursor set to `[offset, offset + len)`.
    pub fn wrap_range(values: Vec<T>, offset: usize, len: usize) -> Result<Self> {
        let cap = values.len();
        if offset > cap || len > cap - offset {
            return Err(NioError::InvalidArgument("wrap range outside array"));
        }
        let mut buf = Self::wrap(values);
        buf.position = offset;
        buf.limit = offset + len;
        Ok(buf)
    }

    fn derive<U: Element>(&self, base: usize, capacity: usize, position: usize, limit: usize) -> Buffer<U> {
        Buffer {
            storage: Rc::clone(&self.storage),
            base,
            capacity,
            position,
            limit,
            mark: None,
            read_only: self.read_only,
            order: self.order,
            _elem: PhantomData,
        }
    }
}

impl Buffer<u8> {
    /// Byte buffer over a mapping. Read-only maps yield read-only views.
    ///
    /// The region comes from the channel that owns the file; the buffer
    /// never maps anything itself.
    pub fn from_mapping(region: MappedRegion) -> Self {
        let read_only = !region.mode().is_writable();
        let len = region.len();
        Self::from_storage(Storage::Mapped(region), len, read_only)
    }
}

// ── Cursor ────────────────────────────────────────────────────────

impl<T: Element> Buffer<T> {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    /// Move the cursor. Fails if `position > limit`.
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.limit {
            return Err(NioError::InvalidArgument("position exceeds limit"));
        }
        if matches!(self.mark, Some(m) if m > position) {
            self.mark = None;
        }
        self.position = position;
        Ok(())
    }

    /// Fails if `limit > capacity` or `limit < position`.
    pub fn set_limit(&mut self, limit: usize) -> Result<()> {
        if limit > self.capacity {
            return Err(NioError::InvalidArgument("limit exceeds capacity"));
        }
        if limit < self.position {
            return Err(NioError::InvalidArgument("limit below position"));
        }
        if matches!(self.mark, Some(m) if m > limit) {
            self.mark = None;
        }
        self.limit = limit;
        Ok(())
    }

    pub fn mark(&mut self) -> &mut Self {
        self.mark = Some(self.position);
        self
    }

    pub fn reset(&mut self) -> Result<&mut Self> {
        match self.mark {
            Some(m) => {
                self.position = m;
                Ok(self)
            }
            None => Err(NioError::InvalidMark),
        }
    }

    pub fn clear(&mut self) -> &mut Self {
        self.position = 0;
        self.limit = self.capacity;
        self.mark = None;
        self
    }

    pub fn flip(&mut self) -> &mut Self {
        self.limit = self.position;
        self.position = 0;
        self.mark = None;
        self
    }

    pub fn rewind(&mut self) -> &mut Self {
        self.position = 0;
        self.mark = None;
        self
    }

    /// Move the cursor forward after a native transfer of `n` elements.
    pub fn advance(&mut self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(NioError::OutOfBounds {
                index: self.position.saturating_add(n),
                limit: self.limit,
            });
        }
        self.position += n;
        Ok(())
    }
}

// ── Properties ────────────────────────────────────────────────────

impl<T: Element> Buffer<T> {
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Backed by mapped memory rather than the heap.
    #[inline]
    pub fn is_direct(&self) -> bool {
        self.storage.is_direct()
    }

    /// Backed by a file mapping.
    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.storage.is_file_backed()
    }

    /// Mutable heap storage.
    #[inline]
    pub fn has_array(&self) -> bool {
        !self.is_direct() && !self.read_only
    }

    #[inline]
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// How the storage is mapped; `None` for heap buffers.
    pub fn map_mode(&self) -> Option<MapMode> {
        self.storage.map_mode()
    }

    /// Element offset of this view inside its storage, when it lines up
    /// with the element stride.
    pub fn array_offset(&self) -> Option<usize> {
        (self.base % T::WIDTH == 0).then(|| self.base / T::WIDTH)
    }

    /// True if both views read and write the same storage.
    pub fn shares_storage<U: Element>(&self, other: &Buffer<U>) -> bool {
        Rc::ptr_eq(&self.storage, &other.storage)
    }

    /// Flush a writable file mapping to disk. No-op elsewhere.
    pub fn force(&self) -> Result<()> {
        self.storage.force()
    }

    /// Prefault a mapping. No-op on the heap.
    pub fn load(&self) -> Result<()> {
        self.storage.load()
    }
}

// ── Element access ────────────────────────────────────────────────

impl<T: Element> Buffer<T> {
    #[inline]
    fn byte_offset(&self, index: usize) -> usize {
        self.base + index * T::WIDTH
    }

    #[inline]
    fn check_index(&self, index: usize) -> Result<usize> {
        if index >= self.limit {
            return Err(NioError::OutOfBounds {
                index,
                limit: self.limit,
            });
        }
        Ok(self.byte_offset(index))
    }

    #[inline]
    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(NioError::ReadOnly);
        }
        Ok(())
    }

    #[inline]
    fn load_at(&self, offset: usize) -> Result<T> {
        let mut raw = [0u8; MAX_WIDTH];
        self.storage.read(offset, &mut raw[..T::WIDTH])?;
        Ok(T::decode(&raw[..T::WIDTH], self.order))
    }

    #[inline]
    fn store_at(&self, offset: usize, value: T) -> Result<()> {
        let mut raw = [0u8; MAX_WIDTH];
        value.encode(&mut raw[..T::WIDTH], self.order);
        self.storage.write(offset, &raw[..T::WIDTH])
    }

    /// Read at `position` and advance by one element.
    pub fn get(&mut self) -> Result<T> {
        let offset = self.check_index(self.position)?;
        let v = self.load_at(offset)?;
        self.position += 1;
        Ok(v)
    }

    /// Read at `index` in `[0, limit)`. The cursor does not move.
    pub fn get_at(&self, index: usize) -> Result<T> {
        let offset = self.check_index(index)?;
        self.load_at(offset)
    }

    /// Write at `position` and advance by one element.
    pub fn put(&mut self, value: T) -> Result<&mut Self> {
        self.check_writable()?;
        let offset = self.check_index(self.position)?;
        self.store_at(offset, value)?;
        self.position += 1;
        Ok(self)
    }

    /// Write at `index` in `[0, limit)`. The cursor does not move.
    pub fn put_at(&mut self, index: usize, value: T) -> Result<&mut Self> {
        self.check_writable()?;
        let offset = self.check_index(index)?;
        self.store_at(offset, value)?;
        Ok(self)
    }

    fn check_bulk(&self, n: usize) -> Result<usize> {
        if n > self.remaining() {
            return Err(NioError::OutOfBounds {
                index: self.position.saturating_add(n),
                limit: self.limit,
            });
        }
        Ok(self.byte_offset(self.position))
    }

    /// Fill `dst` from the cursor. All-or-nothing.
    pub fn get_slice(&mut self, dst: &mut [T]) -> Result<&mut Self> {
        let offset = self.check_bulk(dst.len())?;
        let mut raw = vec![0u8; dst.len() * T::WIDTH];
        self.storage.read(offset, &mut raw)?;
        for (v, chunk) in dst.iter_mut().zip(raw.chunks_exact(T::WIDTH)) {
            *v = T::decode(chunk, self.order);
        }
        self.position += dst.len();
        Ok(self)
    }

    /// Write `src` at the cursor. All-or-nothing.
    pub fn put_slice(&mut self, src: &[T]) -> Result<&mut Self> {
        self.check_writable()?;
        let offset = self.check_bulk(src.len())?;
        let mut raw = vec![0u8; src.len() * T::WIDTH];
        for (chunk, v) in raw.chunks_exact_mut(T::WIDTH).zip(src) {
            v.encode(chunk, self.order);
        }
        self.storage.write(offset, &raw)?;
        self.position += src.len();
        Ok(self)
    }

    /// Move all of `src`'s remaining elements into this buffer.
    ///
    /// Nothing moves unless everything fits; `src` is only advanced on
    /// success.
    pub fn put_buffer(&mut self, src: &mut Buffer<T>) -> Result<&mut Self> {
        self.check_writable()?;
        self.check_bulk(src.remaining())?;
        let values = src.to_vec()?;
        self.put_slice(&values)?;
        src.position = src.limit;
        Ok(self)
    }

    /// Copy of the remaining elements. The cursor does not move.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let n = self.remaining();
        let mut raw = vec![0u8; n * T::WIDTH];
        self.storage.read(self.byte_offset(self.position), &mut raw)?;
        Ok(raw
            .chunks_exact(T::WIDTH)
            .map(|chunk| T::decode(chunk, self.order))
            .collect())
    }

    /// Shift `[position, limit)` down to index 0, then set
    /// `position = remaining` and `limit = capacity` so the next put
    /// appends after the retained elements.
    pub fn compact(&mut self) -> Result<&mut Self> {
        self.check_writable()?;
        let n = self.remaining();
        if self.position > 0 && n > 0 {
            self.storage.copy_within(
                self.byte_offset(self.position),
                self.byte_offset(0),
                n * T::WIDTH,
            )?;
        } else {
            self.storage.check_live()?;
        }
        self.position = n;
        self.limit = self.capacity;
        self.mark = None;
        Ok(self)
    }
}

// ── Derived views ─────────────────────────────────────────────────

impl<T: Element> Buffer<T> {
    /// View of `[position, limit)` re-based at 0.
    pub fn slice(&self) -> Buffer<T> {
        let n = self.remaining();
        self.derive(self.byte_offset(self.position), n, 0, n)
    }

    /// Same storage, same cursor snapshot, independent cursor afterwards.
    pub fn duplicate(&self) -> Buffer<T> {
        let mut dup = self.derive(self.base, self.capacity, self.position, self.limit);
        dup.mark = self.mark;
        dup
    }

    /// Duplicate that rejects every put.
    pub fn as_read_only(&self) -> Buffer<T> {
        let mut ro = self.duplicate();
        ro.read_only = true;
        ro
    }

    /// Reinterpret the remaining bytes as `U` elements without copying.
    ///
    /// The view starts at this buffer's position and covers
    /// `remaining * size_of::<T>() / size_of::<U>()` elements; trailing
    /// bytes that do not fill a whole `U` are not addressable through it.
    pub fn view<U: Element>(&self) -> Buffer<U> {
        let bytes = self.remaining() * T::WIDTH;
        let capacity = bytes / U::WIDTH;
        if bytes % U::WIDTH != 0 {
            log::trace!(
                "view {}->{} drops {} trailing bytes",
                T::NAME,
                U::NAME,
                bytes % U::WIDTH
            );
        }
        self.derive(self.byte_offset(self.position), capacity, 0, capacity)
    }

    pub fn as_byte_buffer(&self) -> Buffer<u8> {
        self.view()
    }

    pub fn as_char_buffer(&self) -> Buffer<u16> {
        self.view()
    }

    pub fn as_short_buffer(&self) -> Buffer<i16> {
        self.view()
    }

    pub fn as_int_buffer(&self) -> Buffer<i32> {
        self.view()
    }

    pub fn as_long_buffer(&self) -> Buffer<i64> {
        self.view()
    }

    pub fn as_float_buffer(&self) -> Buffer<f32> {
        self.view()
    }

    pub fn as_double_buffer(&self) -> Buffer<f64> {
        self.view()
    }
}

// ── Byte buffer extras ────────────────────────────────────────────

impl Buffer<u8> {
    /// Order used by `get_as`/`put_as` and inherited by later views.
    pub fn set_order(&mut self, order: ByteOrder) -> &mut Self {
        self.order = order;
        self
    }

    fn check_span(&self, index: usize, width: usize) -> Result<usize> {
        match index.checked_add(width) {
            Some(end) if end <= self.limit => Ok(self.byte_offset(index)),
            _ => Err(NioError::OutOfBounds {
                index,
                limit: self.limit,
            }),
        }
    }

    /// Decode a `U` at the cursor and advance by `size_of::<U>()` bytes.
    pub fn get_as<U: Element>(&mut self) -> Result<U> {
        let offset = self.check_span(self.position, U::WIDTH)?;
        let mut raw = [0u8; MAX_WIDTH];
        self.storage.read(offset, &mut raw[..U::WIDTH])?;
        self.position += U::WIDTH;
        Ok(U::decode(&raw[..U::WIDTH], self.order))
    }

    /// Decode a `U` at byte `index`.
    pub fn get_as_at<U: Element>(&self, index: usize) -> Result<U> {
        let offset = self.check_span(index, U::WIDTH)?;
        let mut raw = [0u8; MAX_WIDTH];
        self.storage.read(offset, &mut raw[..U::WIDTH])?;
        Ok(U::decode(&raw[..U::WIDTH], self.order))
    }

    /// Encode `value` at the cursor and advance by `size_of::<U>()` bytes.
    pub fn put_as<U: Element>(&mut self, value: U) -> Result<&mut Self> {
        self.check_writable()?;
        let offset = self.check_span(self.position, U::WIDTH)?;
        let mut raw = [0u8; MAX_WIDTH];
        value.encode(&mut raw[..U::WIDTH], self.order);
        self.storage.write(offset, &raw[..U::WIDTH])?;
        self.position += U::WIDTH;
        Ok(self)
    }

    /// Encode `value` at byte `index`.
    pub fn put_as_at<U: Element>(&mut self, index: usize, value: U) -> Result<&mut Self> {
        self.check_writable()?;
        let offset = self.check_span(index, U::WIDTH)?;
        let mut raw = [0u8; MAX_WIDTH];
        value.encode(&mut raw[..U::WIDTH], self.order);
        self.storage.write(offset, &raw[..U::WIDTH])?;
        Ok(self)
    }

    /// `[position, limit)` as a raw span for native writes out of the buffer.
    pub fn remaining_span(&self) -> Result<BufferSpan> {
        let offset = self.byte_offset(self.position);
        let len = self.remaining();
        self.storage.check_range(offset, len)?;
        Ok(BufferSpan {
            ptr: unsafe { self.storage.base_ptr().add(offset) },
            len,
        })
    }

    /// `[position, limit)` as a raw span for native reads into the buffer.
    pub fn remaining_span_mut(&mut self) -> Result<BufferSpan> {
        self.check_writable()?;
        self.remaining_span()
    }
}

// ── Traits ────────────────────────────────────────────────────────

impl<T: Element> PartialEq for Buffer<T> {
    /// Equal when the remaining elements are equal.
    fn eq(&self, other: &Self) -> bool {
        if self.remaining() != other.remaining() {
            return false;
        }
        match (self.to_vec(), other.to_vec()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl<T: Element> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Buffer<{}>[pos={} lim={} cap={}{}{}]",
            T::NAME,
            self.position,
            self.limit,
            self.capacity,
            if self.read_only { " ro" } else { "" },
            if self.is_mapped() {
                " mapped"
            } else if self.is_direct() {
                " direct"
            } else {
                ""
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_put_get_round_trip() {
        let mut buf = Buffer::<i32>::allocate(4);
        buf.put(7).unwrap().put(-9).unwrap();
        assert_eq!(buf.position(), 2);
        buf.put_at(3, 42).unwrap();
        assert_eq!(buf.get_at(0).unwrap(), 7);
        assert_eq!(buf.get_at(1).unwrap(), -9);
        assert_eq!(buf.get_at(3).unwrap(), 42);
        buf.flip();
        assert_eq!(buf.limit(), 2);
        assert_eq!(buf.get().unwrap(), 7);
        assert_eq!(buf.get().unwrap(), -9);
        assert_eq!(
            buf.get(),
            Err(NioError::OutOfBounds { index: 2, limit: 2 })
        );
    }

    #[test]
    #[should_panic(expected = "capacity overflow")]
    fn test_allocate_capacity_overflow_panics() {
        let _ = Buffer::<i64>::allocate(usize::MAX / 8 + 2);
    }

    #[test]
    fn test_allocate_direct_capacity_overflow() {
        assert_eq!(
            Buffer::<i64>::allocate_direct(usize::MAX / 8 + 2).err(),
            Some(NioError::InvalidArgument("capacity overflows"))
        );
    }

    #[test]
    fn test_out_of_bounds_indices() {
        let buf = Buffer::<u8>::wrap(vec![1, 2, 3, 4]);
        assert_eq!(buf.get_at(3).unwrap(), 4);
        assert_eq!(
            buf.get_at(4),
            Err(NioError::OutOfBounds { index: 4, limit: 4 })
        );
        // A negative index wraps to a huge one and is rejected the same way.
        assert!(matches!(
            buf.get_at(-1isize as usize),
            Err(NioError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_cursor_does_not_clamp() {
        let mut buf = Buffer::<i16>::allocate(8);
        buf.set_position(4).unwrap();
        assert!(buf.set_limit(9).is_err());
        assert_eq!(buf.set_limit(3), Err(NioError::InvalidArgument("limit below position")));
        assert_eq!(buf.limit(), 8);
        buf.set_limit(6).unwrap();
        assert!(buf.set_position(7).is_err());
        assert_eq!(buf.position(), 4);
    }

    #[test]
    fn test_mark_reset() {
        let mut buf = Buffer::<u8>::allocate(8);
        assert_eq!(buf.reset().err(), Some(NioError::InvalidMark));
        buf.set_position(2).unwrap();
        buf.mark();
        buf.set_position(5).unwrap();
        buf.reset().unwrap();
        assert_eq!(buf.position(), 2);
        // Moving the position below the mark discards it.
        buf.set_position(1).unwrap();
        assert!(buf.reset().is_err());
    }

    #[test]
    fn test_read_only_rejects_puts() {
        let mut src = Buffer::<i64>::allocate(2);
        let mut ro = src.as_read_only();
        assert!(ro.is_read_only());
        assert_eq!(ro.put(1).err(), Some(NioError::ReadOnly));
        assert_eq!(ro.put_at(0, 1).err(), Some(NioError::ReadOnly));
        assert_eq!(ro.compact().err(), Some(NioError::ReadOnly));
        // Writes through the mutable source stay visible.
        src.put_at(1, 77).unwrap();
        assert_eq!(ro.get_at(1).unwrap(), 77);
    }

    #[test]
    fn test_read_only_put_fails_before_bounds() {
        let mut ro = Buffer::<u8>::allocate(0).as_read_only();
        assert_eq!(ro.put(1).err(), Some(NioError::ReadOnly));
    }

    #[test]
    fn test_duplicate_independent_cursor() {
        let mut a = Buffer::<u16>::allocate(4);
        let mut b = a.duplicate();
        assert!(a.shares_storage(&b));
        b.put(10).unwrap().put(11).unwrap();
        assert_eq!(a.position(), 0);
        assert_eq!(a.get().unwrap(), 10);
        assert_eq!(b.position(), 2);
        a.put_at(3, 99).unwrap();
        assert_eq!(b.get_at(3).unwrap(), 99);
    }

    #[test]
    fn test_slice_shares_from_position() {
        let mut buf = Buffer::<i32>::wrap(vec![1, 2, 3, 4, 5]);
        buf.set_position(2).unwrap();
        buf.set_limit(4).unwrap();
        let mut s = buf.slice();
        assert_eq!(s.capacity(), 2);
        assert_eq!(s.position(), 0);
        assert_eq!(s.get_at(0).unwrap(), 3);
        s.put_at(1, 40).unwrap();
        assert_eq!(buf.get_at(3).unwrap(), 40);
        assert!(s.get_at(2).is_err());
    }

    #[test]
    fn test_int_view_round_trip() {
        let mut bytes = Buffer::<u8>::allocate(8);
        let v: i32 = 0x1234_5678;
        for (i, b) in v.to_ne_bytes().iter().enumerate() {
            bytes.put_at(i, *b).unwrap();
        }
        assert_eq!(bytes.as_int_buffer().get_at(0).unwrap(), v);
    }

    #[test]
    fn test_view_geometry() {
        let mut bytes = Buffer::<u8>::allocate(11);
        bytes.set_position(1).unwrap();
        let ints = bytes.as_int_buffer();
        // 10 remaining bytes hold two whole ints.
        assert_eq!(ints.capacity(), 2);
        assert_eq!(ints.limit(), 2);
        assert!(ints.get_at(2).is_err());

        let longs = Buffer::<i16>::allocate(3).as_long_buffer();
        assert_eq!(longs.capacity(), 0);

        let back = Buffer::<f64>::allocate(2).as_byte_buffer();
        assert_eq!(back.capacity(), 16);
    }

    #[test]
    fn test_view_alias_writes() {
        let bytes = Buffer::<u8>::allocate(16);
        let mut doubles = bytes.as_double_buffer();
        let mut longs = bytes.as_long_buffer();
        doubles.put_at(1, 2.5).unwrap();
        assert_eq!(longs.get_at(1).unwrap(), 2.5f64.to_bits() as i64);
        longs.put_at(0, 1.0f64.to_bits() as i64).unwrap();
        assert_eq!(doubles.get_at(0).unwrap(), 1.0);
    }

    #[test]
    fn test_view_inherits_read_only_and_order() {
        let mut bytes = Buffer::<u8>::allocate(8);
        bytes.set_order(ByteOrder::BigEndian);
        bytes.put_as_at::<u32>(0, 0xAABB_CCDD).unwrap();
        assert_eq!(bytes.get_at(0).unwrap(), 0xAA);
        let ints = bytes.as_int_buffer();
        assert_eq!(ints.order(), ByteOrder::BigEndian);
        assert_eq!(ints.get_at(0).unwrap() as u32, 0xAABB_CCDD);

        let mut ro_ints = bytes.as_read_only().as_int_buffer();
        assert_eq!(ro_ints.put(1).err(), Some(NioError::ReadOnly));
    }

    #[test]
    fn test_get_as_advances_by_width() {
        let mut bytes = Buffer::<u8>::allocate(16);
        bytes.put_as::<u16>(1).unwrap();
        assert_eq!(bytes.position(), 2);
        bytes.put_as::<f64>(0.5).unwrap();
        assert_eq!(bytes.position(), 10);
        bytes.put_as::<i32>(-3).unwrap();
        assert_eq!(bytes.position(), 14);
        assert!(bytes.put_as::<i32>(0).is_err());
        assert_eq!(bytes.position(), 14);
        bytes.flip();
        assert_eq!(bytes.get_as::<u16>().unwrap(), 1);
        assert_eq!(bytes.get_as::<f64>().unwrap(), 0.5);
        assert_eq!(bytes.get_as::<i32>().unwrap(), -3);
        assert!(bytes.get_as::<u8>().is_err());
    }

    #[test]
    fn test_compact_shifts_remaining() {
        let mut buf = Buffer::<i32>::wrap(vec![1, 2, 3, 4, 5]);
        buf.set_position(2).unwrap();
        buf.set_limit(4).unwrap();
        buf.compact().unwrap();
        assert_eq!(buf.position(), 2);
        assert_eq!(buf.limit(), 5);
        assert_eq!(buf.get_at(0).unwrap(), 3);
        assert_eq!(buf.get_at(1).unwrap(), 4);
    }

    #[test]
    fn test_bulk_all_or_nothing() {
        let mut buf = Buffer::<u16>::allocate(3);
        assert!(buf.put_slice(&[1, 2, 3, 4]).is_err());
        assert_eq!(buf.position(), 0);
        buf.put_slice(&[1, 2, 3]).unwrap();
        buf.flip();
        let mut out = [0u16; 4];
        assert!(buf.get_slice(&mut out).is_err());
        assert_eq!(buf.position(), 0);
        let mut out = [0u16; 3];
        buf.get_slice(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn test_put_buffer() {
        let mut dst = Buffer::<u8>::allocate(4);
        let mut src = Buffer::<u8>::wrap(vec![9, 8, 7]);
        dst.put_buffer(&mut src).unwrap();
        assert_eq!(src.remaining(), 0);
        assert_eq!(dst.position(), 3);
        let mut big = Buffer::<u8>::wrap(vec![0; 5]);
        let mut small = Buffer::<u8>::allocate(2);
        assert!(small.put_buffer(&mut big).is_err());
        assert_eq!(big.position(), 0);
    }

    #[test]
    fn test_wrap_range() {
        let buf = Buffer::wrap_range(vec![1u8, 2, 3, 4], 1, 2).unwrap();
        assert_eq!(buf.position(), 1);
        assert_eq!(buf.limit(), 3);
        assert_eq!(buf.to_vec().unwrap(), vec![2, 3]);
        assert!(Buffer::wrap_range(vec![1u8, 2], 1, 2).is_err());
    }

    #[test]
    fn test_equality_on_remaining() {
        let mut a = Buffer::<i32>::wrap(vec![0, 1, 2]);
        let b = Buffer::<i32>::wrap(vec![1, 2]);
        assert_ne!(a, b);
        a.set_position(1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_direct_buffer() {
        let mut buf = Buffer::<f32>::allocate_direct(4).unwrap();
        assert!(buf.is_direct());
        assert!(!buf.is_mapped());
        assert!(!buf.has_array());
        buf.put(1.5).unwrap();
        assert_eq!(buf.get_at(0).unwrap(), 1.5);
        assert_eq!(format!("{:?}", buf), "Buffer<f32>[pos=1 lim=4 cap=4 direct]");
    }

    #[test]
    fn test_span_and_advance() {
        let mut buf = Buffer::<u8>::allocate(8);
        buf.set_position(3).unwrap();
        let span = buf.remaining_span_mut().unwrap();
        assert_eq!(span.len, 5);
        unsafe { *span.ptr = 0xEE };
        buf.advance(1).unwrap();
        assert_eq!(buf.get_at(3).unwrap(), 0xEE);
        assert!(buf.advance(5).is_err());
        assert_eq!(
            buf.as_read_only().remaining_span_mut().err(),
            Some(NioError::ReadOnly)
        );
    }

    proptest! {
        #[test]
        fn prop_cursor_invariant(ops in proptest::collection::vec((0u8..6, 0usize..20), 0..64)) {
            let mut buf = Buffer::<i32>::allocate(12);
            for (op, arg) in ops {
                let _ = match op {
                    0 => buf.set_position(arg).map(|_| ()),
                    1 => buf.set_limit(arg).map(|_| ()),
                    2 => buf.put(arg as i32).map(|_| ()),
                    3 => buf.get().map(|_| ()),
                    4 => { buf.flip(); Ok(()) }
                    _ => buf.compact().map(|_| ()),
                };
                prop_assert!(buf.position() <= buf.limit());
                prop_assert!(buf.limit() <= buf.capacity());
            }
        }

        #[test]
        fn prop_sequential_stride(values in proptest::collection::vec(any::<i64>(), 1..16)) {
            let mut buf = Buffer::<i64>::allocate(values.len());
            for (i, v) in values.iter().enumerate() {
                buf.put(*v).unwrap();
                prop_assert_eq!(buf.position(), i + 1);
            }
            let ro = buf.as_read_only();
            let mut raw = buf.duplicate();
            raw.flip();
            let as_bytes = raw.as_byte_buffer();
            prop_assert_eq!(as_bytes.capacity(), values.len() * 8);
            for (i, v) in values.iter().enumerate() {
                prop_assert_eq!(ro.get_at(i).unwrap(), *v);
                prop_assert_eq!(as_bytes.get_as_at::<i64>(i * 8).unwrap(), *v);
            }
        }

        #[test]
        fn prop_alias_visibility(idx in 0usize..8, v in any::<u16>()) {
            let mut a = Buffer::<u16>::allocate(8);
            let b = a.duplicate();
            let s = a.slice();
            a.put_at(idx, v).unwrap();
            prop_assert_eq!(b.get_at(idx).unwrap(), v);
            prop_assert_eq!(s.get_at(idx).unwrap(), v);
            prop_assert_eq!(a.position(), 0);
        }
    }
}
