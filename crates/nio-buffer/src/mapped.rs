//! Memory-mapped regions.
//!
//! A `MappedRegion` owns one `mmap` and unmaps it on drop. File-backed
//! regions also hold the originating channel's `Descriptor`; every access
//! checks it first, so a view used after its channel closed fails with
//! `UseAfterClose` even though the pages themselves are still mapped.
//!
//! Anonymous regions back `allocate_direct` buffers.

use nio_core::error::{last_errno, NioError, Result};
use nio_core::fd::Descriptor;

use std::ptr::{self, NonNull};
use std::sync::{Arc, Weak};

/// How a file region is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    /// Shared, read-only. Views are read-only.
    ReadOnly,
    /// Shared, read-write. Writes reach the file.
    ReadWrite,
    /// Private copy-on-write. Writes never reach the file.
    Private,
}

impl MapMode {
    fn prot(self) -> libc::c_int {
        match self {
            MapMode::ReadOnly => libc::PROT_READ,
            MapMode::ReadWrite | MapMode::Private => libc::PROT_READ | libc::PROT_WRITE,
        }
    }

    fn flags(self) -> libc::c_int {
        match self {
            MapMode::ReadOnly | MapMode::ReadWrite => libc::MAP_SHARED,
            MapMode::Private => libc::MAP_PRIVATE,
        }
    }

    #[inline]
    pub fn is_writable(self) -> bool {
        !matches!(self, MapMode::ReadOnly)
    }
}

pub struct MappedRegion {
    /// Page-aligned start returned by mmap (null for an empty region).
    map_base: *mut u8,
    /// Length passed to mmap.
    map_len: usize,
    /// First byte the caller asked for (`map_base + skew`).
    data: NonNull<u8>,
    len: usize,
    mode: MapMode,
    /// `None` for anonymous memory.
    descriptor: Option<Arc<Descriptor>>,
    /// Dropped with the region; see `watch`.
    alive: Arc<()>,
}

fn page_size() -> usize {
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz <= 0 {
        4096
    } else {
        sz as usize
    }
}

impl MappedRegion {
    /// Map `len` bytes of an open file starting at `offset`.
    ///
    /// The offset need not be page aligned; the mapping is widened down to
    /// the page boundary and the region points at the requested byte.
    pub fn map_file(
        descriptor: &Arc<Descriptor>,
        mode: MapMode,
        offset: u64,
        len: usize,
    ) -> Result<Self> {
        let fd = descriptor.raw()?;
        if len == 0 {
            return Ok(Self::empty(mode, Some(Arc::clone(descriptor))));
        }

        let page = page_size() as u64;
        let aligned = offset - offset % page;
        let skew = (offset - aligned) as usize;
        let map_len = len
            .checked_add(skew)
            .ok_or(NioError::InvalidArgument("mapping length overflows"))?;
        let file_off = libc::off_t::try_from(aligned)
            .map_err(|_| NioError::InvalidArgument("mapping offset too large"))?;

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                mode.prot(),
                mode.flags(),
                fd,
                file_off,
            )
        };
        if base == libc::MAP_FAILED {
            let errno = last_errno();
            log::debug!("mmap fd={} off={} len={} failed: errno {}", fd, offset, len, errno);
            return Err(NioError::MappingFailure(errno));
        }

        let map_base = base as *mut u8;
        // mmap never returns null on success for a non-fixed mapping.
        let data = NonNull::new(unsafe { map_base.add(skew) })
            .ok_or(NioError::MappingFailure(libc::EFAULT))?;
        log::trace!("mapped fd={} off={} len={} mode={:?}", fd, offset, len, mode);

        Ok(Self {
            map_base,
            map_len,
            data,
            len,
            mode,
            descriptor: Some(Arc::clone(descriptor)),
            alive: Arc::new(()),
        })
    }

    /// Zero-filled private anonymous memory.
    pub fn anonymous(len: usize) -> Result<Self> {
        if len == 0 {
            return Ok(Self::empty(MapMode::Private, None));
        }
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(NioError::MappingFailure(last_errno()));
        }
        let map_base = base as *mut u8;
        let data = NonNull::new(map_base).ok_or(NioError::MappingFailure(libc::EFAULT))?;
        Ok(Self {
            map_base,
            map_len: len,
            data,
            len,
            mode: MapMode::Private,
            descriptor: None,
            alive: Arc::new(()),
        })
    }

    fn empty(mode: MapMode, descriptor: Option<Arc<Descriptor>>) -> Self {
        Self {
            map_base: ptr::null_mut(),
            map_len: 0,
            data: NonNull::dangling(),
            len: 0,
            mode,
            descriptor,
            alive: Arc::new(()),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn mode(&self) -> MapMode {
        self.mode
    }

    #[inline]
    pub fn is_file_backed(&self) -> bool {
        self.descriptor.is_some()
    }

    /// A handle that stops upgrading once this region is unmapped.
    pub fn watch(&self) -> Weak<()> {
        Arc::downgrade(&self.alive)
    }

    /// Fail with `UseAfterClose` once the owning channel has closed.
    #[inline]
    pub fn check_live(&self) -> Result<()> {
        match &self.descriptor {
            Some(d) if !d.is_open() => Err(NioError::UseAfterClose),
            _ => Ok(()),
        }
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// Write dirty pages back to the file (msync).
    pub fn force(&self) -> Result<()> {
        self.check_live()?;
        if self.map_len == 0 || self.descriptor.is_none() || self.mode != MapMode::ReadWrite {
            return Ok(());
        }
        let ret = unsafe {
            libc::msync(self.map_base as *mut libc::c_void, self.map_len, libc::MS_SYNC)
        };
        if ret != 0 {
            return Err(NioError::MappingFailure(last_errno()));
        }
        Ok(())
    }

    /// Hint the kernel to fault the region in.
    pub fn load(&self) -> Result<()> {
        self.check_live()?;
        if self.map_len == 0 {
            return Ok(());
        }
        let ret = unsafe {
            libc::madvise(
                self.map_base as *mut libc::c_void,
                self.map_len,
                libc::MADV_WILLNEED,
            )
        };
        if ret != 0 {
            return Err(NioError::MappingFailure(last_errno()));
        }
        Ok(())
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if self.map_len == 0 {
            return;
        }
        let ret = unsafe { libc::munmap(self.map_base as *mut libc::c_void, self.map_len) };
        if ret != 0 {
            log::warn!("munmap of {} bytes failed: errno {}", self.map_len, last_errno());
        }
    }
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("len", &self.len)
            .field("mode", &self.mode)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}
