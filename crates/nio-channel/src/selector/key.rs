use super::Shared;
use crate::channel::Channel;

use nio_core::error::{NioError, Result};
use nio_core::fd::Descriptor;
use nio_core::ops::Ops;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Registration of one channel with one selector.
///
/// Cloning yields another handle to the same registration; equality and
/// hashing follow identity, not contents.
#[derive(Clone)]
pub struct SelectionKey(Arc<KeyInner>);

struct KeyInner {
    descriptor: Arc<Descriptor>,
    fd: RawFd,
    valid_ops: Ops,
    interest: AtomicU32,
    ready: AtomicU32,
    valid: AtomicBool,
    /// Member of the selector's selected set.
    selected: AtomicBool,
    attachment: Mutex<Option<usize>>,
    selector: Weak<Shared>,
}

impl SelectionKey {
    pub(super) fn new(
        descriptor: Arc<Descriptor>,
        fd: RawFd,
        valid_ops: Ops,
        interest: Ops,
        selector: Weak<Shared>,
    ) -> Self {
        Self(Arc::new(KeyInner {
            descriptor,
            fd,
            valid_ops,
            interest: AtomicU32::new(interest.bits()),
            ready: AtomicU32::new(0),
            valid: AtomicBool::new(true),
            selected: AtomicBool::new(false),
            attachment: Mutex::new(None),
            selector,
        }))
    }

    /// Descriptor number at registration time.
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.0.fd
    }

    #[inline]
    pub fn valid_ops(&self) -> Ops {
        self.0.valid_ops
    }

    #[inline]
    pub fn interest_ops(&self) -> Ops {
        Ops::from_bits(self.0.interest.load(Ordering::Acquire))
    }

    /// Replace the interest set. Takes effect at the next select.
    pub fn set_interest_ops(&self, ops: Ops) -> Result<()> {
        if !self.is_valid() {
            return Err(NioError::CancelledKey);
        }
        if !self.0.valid_ops.contains(ops) {
            return Err(NioError::IllegalOps {
                requested: ops,
                valid: self.0.valid_ops,
            });
        }
        self.0.interest.store(ops.bits(), Ordering::Release);
        if let Some(shared) = self.0.selector.upgrade() {
            shared.changed.push(self.clone());
        }
        Ok(())
    }

    /// Operations found ready by the last select that selected this key.
    #[inline]
    pub fn ready_ops(&self) -> Ops {
        Ops::from_bits(self.0.ready.load(Ordering::Acquire))
    }

    pub fn is_readable(&self) -> bool {
        self.ready_ops().contains(Ops::READ)
    }

    pub fn is_writable(&self) -> bool {
        self.ready_ops().contains(Ops::WRITE)
    }

    pub fn is_connectable(&self) -> bool {
        self.ready_ops().contains(Ops::CONNECT)
    }

    pub fn is_acceptable(&self) -> bool {
        self.ready_ops().contains(Ops::ACCEPT)
    }

    /// False once cancelled, or once its channel or selector closed.
    pub fn is_valid(&self) -> bool {
        self.0.valid.load(Ordering::Acquire) && self.0.descriptor.is_open()
    }

    /// Invalidate the key. The selector drops it at its next select.
    pub fn cancel(&self) {
        if self.invalidate() {
            if let Some(shared) = self.0.selector.upgrade() {
                shared.cancelled.push(self.clone());
            }
        }
    }

    /// Attach a caller token, returning the previous one.
    pub fn attach(&self, token: usize) -> Option<usize> {
        self.lock_attachment().replace(token)
    }

    pub fn detach(&self) -> Option<usize> {
        self.lock_attachment().take()
    }

    pub fn attachment(&self) -> Option<usize> {
        *self.lock_attachment()
    }

    fn lock_attachment(&self) -> std::sync::MutexGuard<'_, Option<usize>> {
        self.0.attachment.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True if this key was registered for `channel`.
    pub fn belongs_to(&self, channel: &dyn Channel) -> bool {
        Arc::ptr_eq(&self.0.descriptor, channel.descriptor())
    }

    // ── selector side ─────────────────────────────────────────────

    pub(super) fn descriptor(&self) -> &Arc<Descriptor> {
        &self.0.descriptor
    }

    pub(super) fn is_cancelled(&self) -> bool {
        !self.0.valid.load(Ordering::Acquire)
    }

    /// Returns true on the first call.
    pub(super) fn invalidate(&self) -> bool {
        self.0.valid.swap(false, Ordering::AcqRel)
    }

    pub(super) fn set_ready(&self, ops: Ops) {
        self.0.ready.store(ops.bits(), Ordering::Release);
    }

    /// Returns true if the key was not already selected.
    pub(super) fn mark_selected(&self) -> bool {
        !self.0.selected.swap(true, Ordering::AcqRel)
    }

    pub(super) fn clear_selected(&self) {
        self.0.selected.store(false, Ordering::Release);
    }

    pub(super) fn same(&self, other: &SelectionKey) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for SelectionKey {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for SelectionKey {}

impl Hash for SelectionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for SelectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionKey")
            .field("fd", &self.0.fd)
            .field("interest", &self.interest_ops())
            .field("ready", &self.ready_ops())
            .field("valid", &self.is_valid())
            .finish()
    }
}
