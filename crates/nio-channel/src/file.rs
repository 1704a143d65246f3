//! File channel: positional I/O and the owner of file mappings.
//!
//! Buffers returned by `map()` hold a clone of this channel's descriptor.
//! Closing the channel invalidates every one of them: later access fails
//! with `UseAfterClose`. The pages themselves are unmapped when the last
//! view drops.
//!
//! The channel remembers how far each live mapping reaches and refuses to
//! truncate the file below it, so no view is left pointing past EOF.

use crate::channel::{Channel, ReadStatus};
use crate::sys;

use nio_buffer::{ByteBuffer, MapMode, MappedByteBuffer, MappedRegion};
use nio_core::error::{last_errno, NioError, Result};
use nio_core::fd::Descriptor;
use nio_core::ops::Ops;

use std::fs::File;
use std::os::unix::io::{IntoRawFd, RawFd};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// How to open a file channel.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    append: bool,
    create: bool,
    truncate: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, on: bool) -> Self {
        self.read = on;
        self
    }

    pub fn write(mut self, on: bool) -> Self {
        self.write = on;
        self
    }

    pub fn append(mut self, on: bool) -> Self {
        self.append = on;
        self
    }

    pub fn create(mut self, on: bool) -> Self {
        self.create = on;
        self
    }

    pub fn truncate(mut self, on: bool) -> Self {
        self.truncate = on;
        self
    }

    fn to_std(&self) -> std::fs::OpenOptions {
        let mut o = std::fs::OpenOptions::new();
        o.read(self.read)
            .write(self.write)
            .append(self.append)
            .create(self.create)
            .truncate(self.truncate);
        o
    }
}

pub struct FileChannel {
    descriptor: Arc<Descriptor>,
    readable: bool,
    writable: bool,
    /// Live mappings and the file offset each one ends at.
    mappings: Mutex<Vec<(Weak<()>, u64)>>,
}

fn io_errno(e: std::io::Error) -> NioError {
    NioError::Os(e.raw_os_error().unwrap_or(libc::EIO))
}

impl FileChannel {
    pub fn open<P: AsRef<Path>>(path: P, options: &OpenOptions) -> Result<Self> {
        let file = options.to_std().open(path.as_ref()).map_err(io_errno)?;
        log::trace!("opened {} as {:?}", path.as_ref().display(), options);
        Self::from_file(file)
    }

    /// Take ownership of an open file; access rights come from its flags.
    pub fn from_file(file: File) -> Result<Self> {
        let fd = file.into_raw_fd();
        let descriptor = Descriptor::new(fd);
        let (readable, writable) = sys::access_mode(fd)?;
        Ok(Self {
            descriptor,
            readable,
            writable,
            mappings: Mutex::new(Vec::new()),
        })
    }

    fn fd(&self) -> Result<RawFd> {
        self.descriptor.raw()
    }

    fn readable_fd(&self) -> Result<RawFd> {
        let fd = self.fd()?;
        if !self.readable {
            return Err(NioError::NotReadable);
        }
        Ok(fd)
    }

    fn writable_fd(&self) -> Result<RawFd> {
        let fd = self.fd()?;
        if !self.writable {
            return Err(NioError::NotWritable);
        }
        Ok(fd)
    }

    pub fn size(&self) -> Result<u64> {
        let st = nix::sys::stat::fstat(self.fd()?)?;
        Ok(st.st_size as u64)
    }

    /// Shrink the file to `size` bytes. A larger `size` leaves it alone.
    /// The position is pulled back to `size` if it was beyond it.
    ///
    /// Fails with `InvalidArgument` while a mapping created by this channel
    /// still covers bytes past `size`.
    pub fn truncate(&mut self, size: u64) -> Result<()> {
        let fd = self.writable_fd()?;
        if size < self.size()? {
            if self.mapped_end() > size {
                return Err(NioError::InvalidArgument("file is mapped past the new size"));
            }
            set_len(fd, size)?;
        }
        if self.position()? > size {
            self.set_position(size)?;
        }
        Ok(())
    }

    pub fn position(&self) -> Result<u64> {
        let off = unsafe { libc::lseek(self.fd()?, 0, libc::SEEK_CUR) };
        if off < 0 {
            return Err(NioError::last_os());
        }
        Ok(off as u64)
    }

    pub fn set_position(&mut self, pos: u64) -> Result<()> {
        let off = libc::off_t::try_from(pos)
            .map_err(|_| NioError::InvalidArgument("position too large"))?;
        if unsafe { libc::lseek(self.fd()?, off, libc::SEEK_SET) } < 0 {
            return Err(NioError::last_os());
        }
        Ok(())
    }

    /// Read at the file position into `buf`.
    pub fn read(&mut self, buf: &mut ByteBuffer) -> Result<ReadStatus> {
        let fd = self.readable_fd()?;
        self.transfer_in(buf, |ptr, len| unsafe { libc::read(fd, ptr, len) })
    }

    /// Read at `pos` without moving the file position.
    pub fn read_at(&self, buf: &mut ByteBuffer, pos: u64) -> Result<ReadStatus> {
        let fd = self.readable_fd()?;
        let off = to_off(pos)?;
        self.transfer_in(buf, |ptr, len| unsafe { libc::pread(fd, ptr, len, off) })
    }

    /// Write all of `buf`'s remaining bytes at the file position.
    pub fn write(&mut self, buf: &mut ByteBuffer) -> Result<usize> {
        let fd = self.writable_fd()?;
        self.transfer_out(buf, None, |ptr, len, _| unsafe { libc::write(fd, ptr, len) })
    }

    /// Write at `pos` without moving the file position.
    pub fn write_at(&self, buf: &mut ByteBuffer, pos: u64) -> Result<usize> {
        let fd = self.writable_fd()?;
        self.transfer_out(buf, Some(pos), |ptr, len, at| unsafe {
            libc::pwrite(fd, ptr, len, at)
        })
    }

    fn transfer_in<F>(&self, buf: &mut ByteBuffer, mut op: F) -> Result<ReadStatus>
    where
        F: FnMut(*mut libc::c_void, usize) -> isize,
    {
        if !buf.has_remaining() {
            return Ok(ReadStatus::Read(0));
        }
        let span = buf.remaining_span_mut()?;
        loop {
            let n = op(span.ptr as *mut libc::c_void, span.len);
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

    fn transfer_out<F>(&self, buf: &mut ByteBuffer, pos: Option<u64>, mut op: F) -> Result<usize>
    where
        F: FnMut(*const libc::c_void, usize, libc::off_t) -> isize,
    {
        let mut total = 0usize;
        while buf.has_remaining() {
            let span = buf.remaining_span()?;
            let at = match pos {
                Some(p) => to_off(p + total as u64)?,
                None => 0,
            };
            let n = op(span.ptr as *const libc::c_void, span.len, at);
            if n < 0 {
                match last_errno() {
                    libc::EINTR => continue,
                    e => return Err(NioError::Os(e)),
                }
            }
            if n == 0 {
                break;
            }
            buf.advance(n as usize)?;
            total += n as usize;
        }
        Ok(total)
    }

    /// Flush file data (and metadata if `metadata`) to the device.
    pub fn force(&self, metadata: bool) -> Result<()> {
        let fd = self.fd()?;
        if metadata {
            nix::unistd::fsync(fd)?;
            return Ok(());
        }
        cfg_if::cfg_if! {
            if #[cfg(any(target_os = "linux", target_os = "android"))] {
                nix::unistd::fdatasync(fd)?;
            } else {
                nix::unistd::fsync(fd)?;
            }
        }
        Ok(())
    }

    /// Map `size` bytes starting at `offset`.
    ///
    /// `ReadOnly` and `Private` need read access and a region that lies
    /// within the file; `ReadWrite` needs read and write access and grows
    /// the file to cover the region.
    pub fn map(&self, mode: MapMode, offset: u64, size: usize) -> Result<MappedByteBuffer> {
        let fd = self.readable_fd()?;
        let end = offset
            .checked_add(size as u64)
            .ok_or(NioError::InvalidArgument("mapping past end of address space"))?;
        if mode == MapMode::ReadWrite {
            self.writable_fd()?;
            if end > self.size()? {
                set_len(fd, end)?;
            }
        } else if end > self.size()? {
            return Err(NioError::InvalidArgument("mapping past end of file"));
        }
        let region = MappedRegion::map_file(&self.descriptor, mode, offset, size)?;
        if size > 0 {
            self.track(region.watch(), end);
        }
        Ok(ByteBuffer::from_mapping(region))
    }

    fn track(&self, watch: Weak<()>, end: u64) {
        let mut maps = self.mappings.lock().unwrap_or_else(PoisonError::into_inner);
        maps.retain(|(w, _)| w.strong_count() > 0);
        maps.push((watch, end));
    }

    /// Furthest file offset any live mapping reaches, 0 if none.
    fn mapped_end(&self) -> u64 {
        let mut maps = self.mappings.lock().unwrap_or_else(PoisonError::into_inner);
        maps.retain(|(w, _)| w.strong_count() > 0);
        maps.iter().map(|(_, end)| *end).max().unwrap_or(0)
    }
}

fn to_off(pos: u64) -> Result<libc::off_t> {
    libc::off_t::try_from(pos).map_err(|_| NioError::InvalidArgument("offset too large"))
}

fn set_len(fd: RawFd, len: u64) -> Result<()> {
    if unsafe { libc::ftruncate(fd, to_off(len)?) } < 0 {
        return Err(NioError::last_os());
    }
    Ok(())
}

impl Channel for FileChannel {
    fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    /// Files are always ready; selectors reject them.
    fn valid_ops(&self) -> Option<Ops> {
        None
    }

    fn is_blocking(&self) -> bool {
        true
    }

    fn close(&mut self) -> Result<()> {
        self.descriptor.close()
    }
}

impl std::fmt::Debug for FileChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChannel")
            .field("fd", &self.descriptor.origin())
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .finish()
    }
}
