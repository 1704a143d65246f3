//! Readiness selector.
//!
//! One thread waits on many channels through a single native call.
//!
//! ```text
//!   register(ch, ops) ──> keys{fd -> SelectionKey} ──> Poller (epoll | poll)
//!                                                       │
//!   select(timeout) ── purge cancelled ── wait ─────────┘
//!         │                                 │
//!         └── purge again ── dispatch ──> selected keys (ready ∩ interest)
//!
//!   SelectionKey::cancel / set_interest_ops ──> lock-free queues, applied
//!   by the selecting thread before the next wait
//!   Selector::wakeup ──> Waker (eventfd / self-pipe), watched by the poller
//! ```
//!
//! The selected set persists across selects until the caller takes it: a
//! key already in it has newly ready operations added to its ready set;
//! a key not in it is added with exactly the operations found ready.

mod key;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod epoll;
        #[allow(dead_code)]
        mod poll;
        use epoll::EpollPoller as PlatformPoller;

        fn new_poller(batch: usize) -> Result<PlatformPoller> {
            PlatformPoller::new(batch)
        }
    } else {
        mod poll;
        use poll::PollPoller as PlatformPoller;

        fn new_poller(_batch: usize) -> Result<PlatformPoller> {
            Ok(PlatformPoller::new())
        }
    }
}

pub use key::SelectionKey;

use crate::channel::Channel;
use crate::waker::Waker;

use nio_core::config::NioConfig;
use nio_core::error::{NioError, Result};
use nio_core::ops::Ops;

use crossbeam_queue::SegQueue;

use std::collections::HashMap;
use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

/// Native readiness multiplexer.
///
/// Implementations report raw readiness; the selector intersects it with
/// each key's interest set.
pub(crate) trait Poller: Send {
    fn register(&mut self, fd: RawFd, interest: Ops) -> Result<()>;

    fn reregister(&mut self, fd: RawFd, interest: Ops) -> Result<()>;

    /// Tolerates descriptors that are already gone.
    fn deregister(&mut self, fd: RawFd) -> Result<()>;

    /// Block up to `timeout` (`None` = forever) and append `(fd, ready)`
    /// pairs to `out`. An interrupted wait appends nothing.
    fn wait(&mut self, timeout: Option<Duration>, out: &mut Vec<(RawFd, Ops)>) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Map native readable/writable flags onto every op they can satisfy.
#[inline]
pub(crate) fn readiness(readable: bool, writable: bool) -> Ops {
    let mut ops = Ops::NONE;
    if readable {
        ops |= Ops::READ | Ops::ACCEPT;
    }
    if writable {
        ops |= Ops::WRITE | Ops::CONNECT;
    }
    ops
}

/// State reachable from keys and from other threads without the lock.
pub(crate) struct Shared {
    waker: Waker,
    cancelled: SegQueue<SelectionKey>,
    changed: SegQueue<SelectionKey>,
    open: AtomicBool,
}

struct State {
    poller: PlatformPoller,
    keys: HashMap<RawFd, SelectionKey>,
    selected: Vec<SelectionKey>,
    /// Cancelled keys not yet deregistered.
    cancelled: Vec<SelectionKey>,
    events: Vec<(RawFd, Ops)>,
    waker_fd: RawFd,
}

pub struct Selector {
    shared: Arc<Shared>,
    /// Taken before `state` by every locker, released once `state` is held.
    gate: Mutex<()>,
    state: Mutex<State>,
}

impl Selector {
    pub fn open() -> Result<Self> {
        Self::open_with(&NioConfig::from_env())
    }

    pub fn open_with(config: &NioConfig) -> Result<Self> {
        let waker = Waker::new()?;
        let waker_fd = waker.fd()?;
        let mut poller = new_poller(config.select_batch)?;
        poller.register(waker_fd, Ops::READ)?;
        log::debug!(
            "selector open (waker fd {}, batch {})",
            waker_fd,
            config.select_batch
        );
        Ok(Self {
            shared: Arc::new(Shared {
                waker,
                cancelled: SegQueue::new(),
                changed: SegQueue::new(),
                open: AtomicBool::new(true),
            }),
            gate: Mutex::new(()),
            state: Mutex::new(State {
                poller,
                keys: HashMap::new(),
                selected: Vec::new(),
                cancelled: Vec::new(),
                events: Vec::with_capacity(config.select_batch),
                waker_fd,
            }),
        })
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if !self.is_open() {
            return Err(NioError::UseAfterClose);
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        let _turn = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the state, waking a concurrent select so it releases the lock.
    ///
    /// The gate stays held until the lock is ours: a thread that loops
    /// back into `select` queues behind us instead of retaking the lock.
    fn lock_interrupting(&self) -> Result<MutexGuard<'_, State>> {
        let _turn = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        match self.state.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(p)) => Ok(p.into_inner()),
            Err(TryLockError::WouldBlock) => {
                self.shared.waker.notify()?;
                Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner))
            }
        }
    }

    /// Register `channel` for `ops`.
    ///
    /// Registering a channel that already has a valid key here updates
    /// that key's interest set and returns it.
    pub fn register(&self, channel: &dyn Channel, ops: Ops) -> Result<SelectionKey> {
        self.ensure_open()?;
        let valid = channel.valid_ops().ok_or(NioError::UnsupportedChannel)?;
        if !valid.contains(ops) {
            return Err(NioError::IllegalOps {
                requested: ops,
                valid,
            });
        }
        let descriptor = channel.descriptor();
        let fd = descriptor.raw()?;

        let mut state = self.lock_interrupting()?;
        self.ensure_open()?;
        self.purge(&mut state)?;

        if let Some(existing) = state.keys.get(&fd) {
            if existing.belongs_to(channel) {
                existing.set_interest_ops(ops)?;
                return Ok(existing.clone());
            }
        }
        // Any key still under this number belongs to a descriptor that was
        // closed and whose number the kernel has handed out again.
        if let Some(stale) = state.keys.remove(&fd) {
            stale.invalidate();
            Self::unselect(&mut state, &stale);
        }

        let key = SelectionKey::new(
            Arc::clone(descriptor),
            fd,
            valid,
            ops,
            Arc::downgrade(&self.shared),
        );
        state.poller.register(fd, ops)?;
        state.keys.insert(fd, key.clone());
        log::trace!("registered fd {} for {}", fd, ops);
        Ok(key)
    }

    /// Register and attach `token` in one step.
    pub fn register_with(&self, channel: &dyn Channel, ops: Ops, token: usize) -> Result<SelectionKey> {
        let key = self.register(channel, ops)?;
        key.attach(token);
        Ok(key)
    }

    /// Every registered key that has not been deregistered yet.
    pub fn keys(&self) -> Result<Vec<SelectionKey>> {
        self.ensure_open()?;
        Ok(self.lock_interrupting()?.keys.values().cloned().collect())
    }

    pub fn selected_keys(&self) -> Result<Vec<SelectionKey>> {
        self.ensure_open()?;
        Ok(self.lock_interrupting()?.selected.clone())
    }

    /// Empty the selected set, handing its keys to the caller.
    pub fn take_selected_keys(&self) -> Result<Vec<SelectionKey>> {
        self.ensure_open()?;
        let mut state = self.lock_interrupting()?;
        let taken = std::mem::take(&mut state.selected);
        for key in &taken {
            key.clear_selected();
        }
        Ok(taken)
    }

    /// Keys cancelled since the last select, still awaiting removal.
    pub fn cancelled_keys(&self) -> Result<Vec<SelectionKey>> {
        self.ensure_open()?;
        let mut state = self.lock_interrupting()?;
        while let Some(key) = self.shared.cancelled.pop() {
            state.cancelled.push(key);
        }
        Ok(state.cancelled.clone())
    }

    /// Poll without blocking.
    pub fn select_now(&self) -> Result<usize> {
        self.select(Some(Duration::ZERO))
    }

    /// Wait up to `timeout` (`None` = until something is ready or
    /// `wakeup()` is called) and update the selected set.
    ///
    /// Returns the number of keys whose ready set was updated. An
    /// interrupted wait returns 0.
    pub fn select(&self, timeout: Option<Duration>) -> Result<usize> {
        self.ensure_open()?;
        let mut state = self.lock();
        self.ensure_open()?;
        self.purge(&mut state)?;
        self.apply_changes(&mut state)?;

        let mut events = std::mem::take(&mut state.events);
        events.clear();
        state.poller.wait(timeout, &mut events)?;

        // Keys cancelled while we were blocked must not be reported.
        self.purge(&mut state)?;

        let mut woken = false;
        let mut updated = 0;
        for &(fd, ready) in &events {
            if fd == state.waker_fd {
                woken = true;
                continue;
            }
            let Some(key) = state.keys.get(&fd).cloned() else {
                continue;
            };
            if !key.is_valid() {
                continue;
            }
            let ready = ready & key.interest_ops();
            if ready.is_empty() {
                continue;
            }
            if key.mark_selected() {
                key.set_ready(ready);
                state.selected.push(key);
                updated += 1;
            } else {
                let prev = key.ready_ops();
                if !prev.contains(ready) {
                    key.set_ready(prev | ready);
                    updated += 1;
                }
            }
        }
        state.events = events;

        if woken {
            self.shared.waker.drain()?;
        }
        Ok(updated)
    }

    /// Make a blocked or the next `select` return immediately.
    ///
    /// Safe to call from any thread. No-op on a closed selector.
    pub fn wakeup(&self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.shared.waker.notify()
    }

    /// Cancel every key and release the native resources. Idempotent.
    pub fn close(&self) -> Result<()> {
        if !self.shared.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.waker.notify()?;
        let mut state = self.lock_interrupting()?;
        for (_, key) in state.keys.drain() {
            key.invalidate();
            key.clear_selected();
        }
        state.selected.clear();
        state.cancelled.clear();
        while self.shared.cancelled.pop().is_some() {}
        while self.shared.changed.pop().is_some() {}
        state.poller.close()?;
        self.shared.waker.close()?;
        log::debug!("selector closed");
        Ok(())
    }

    /// Drop cancelled keys and keys whose channel has closed.
    fn purge(&self, state: &mut State) -> Result<()> {
        let closed: Vec<SelectionKey> = state
            .keys
            .values()
            .filter(|k| !k.descriptor().is_open() && !k.is_cancelled())
            .cloned()
            .collect();
        for key in closed {
            key.invalidate();
            state.cancelled.push(key);
        }
        while let Some(key) = self.shared.cancelled.pop() {
            state.cancelled.push(key);
        }

        let cancelled = std::mem::take(&mut state.cancelled);
        for key in cancelled {
            let registered = state.keys.get(&key.fd()).is_some_and(|k| k.same(&key));
            if registered {
                state.keys.remove(&key.fd());
                state.poller.deregister(key.fd())?;
                log::trace!("deregistered fd {}", key.fd());
            }
            Self::unselect(state, &key);
        }
        Ok(())
    }

    fn unselect(state: &mut State, key: &SelectionKey) {
        key.clear_selected();
        state.selected.retain(|k| !k.same(key));
    }

    /// Push interest changes made through keys down to the poller.
    fn apply_changes(&self, state: &mut State) -> Result<()> {
        while let Some(key) = self.shared.changed.pop() {
            if !key.is_valid() {
                continue;
            }
            let current = state.keys.get(&key.fd()).is_some_and(|k| k.same(&key));
            if current {
                state.poller.reregister(key.fd(), key.interest_ops())?;
            }
        }
        Ok(())
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("selector close failed: {}", e);
        }
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{FileChannel, OpenOptions};
    use crate::server::ServerSocketChannel;
    use crate::socket::SocketChannel;

    use nio_buffer::ByteBuffer;

    use std::net::SocketAddr;
    use std::time::Instant;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    /// Connected (client, accepted) pair; the listener is returned to keep
    /// the port reserved.
    fn pair(server: &mut ServerSocketChannel) -> (SocketChannel, SocketChannel) {
        let client = SocketChannel::connect_to(server.local_addr().unwrap()).unwrap();
        let peer = server.accept().unwrap().unwrap();
        (client, peer)
    }

    fn listener() -> ServerSocketChannel {
        let mut server = ServerSocketChannel::open().unwrap();
        server.bind(loopback()).unwrap();
        server
    }

    #[test]
    fn test_select_reports_only_ready_channel() {
        let mut server = listener();
        let (mut a, mut a_peer) = pair(&mut server);
        let (mut b, _b_peer) = pair(&mut server);
        a.set_blocking(false).unwrap();
        b.set_blocking(false).unwrap();

        let selector = Selector::open().unwrap();
        let ka = selector.register(&a, Ops::READ).unwrap();
        let kb = selector.register(&b, Ops::READ).unwrap();
        assert_ne!(ka, kb);

        a_peer.write(&mut ByteBuffer::wrap(b"ping".to_vec())).unwrap();
        let n = selector.select(Some(Duration::from_millis(1000))).unwrap();
        assert_eq!(n, 1);

        let selected = selector.selected_keys().unwrap();
        assert_eq!(selected, vec![ka.clone()]);
        assert!(selected[0].belongs_to(&a));
        assert!(!selected[0].belongs_to(&b));
        assert!(ka.is_readable());
        assert_eq!(ka.ready_ops(), Ops::READ);

        let mut buf = ByteBuffer::allocate(16);
        assert_eq!(a.read(&mut buf).unwrap().bytes(), 4);
    }

    #[test]
    fn test_selected_set_persists_until_taken() {
        let mut server = listener();
        let (client, mut peer) = pair(&mut server);
        let selector = Selector::open().unwrap();
        let key = selector.register(&client, Ops::READ).unwrap();

        peer.write(&mut ByteBuffer::wrap(vec![1])).unwrap();
        assert_eq!(selector.select(Some(Duration::from_secs(1))).unwrap(), 1);
        // Still ready, already selected with the same ops: nothing updated.
        assert_eq!(selector.select_now().unwrap(), 0);
        assert_eq!(selector.selected_keys().unwrap().len(), 1);

        // Widening interest adds the new op to the existing ready set.
        key.set_interest_ops(Ops::READ | Ops::WRITE).unwrap();
        assert_eq!(selector.select_now().unwrap(), 1);
        assert_eq!(key.ready_ops(), Ops::READ | Ops::WRITE);

        assert_eq!(selector.take_selected_keys().unwrap(), vec![key.clone()]);
        assert!(selector.selected_keys().unwrap().is_empty());
        assert_eq!(selector.select_now().unwrap(), 1);
    }

    #[test]
    fn test_accept_and_connect_readiness() {
        let mut server = listener();
        server.set_blocking(false).unwrap();
        let selector = Selector::open().unwrap();
        let skey = selector.register_with(&server, Ops::ACCEPT, 7).unwrap();
        assert_eq!(skey.attachment(), Some(7));

        let mut client = SocketChannel::open().unwrap();
        client.set_blocking(false).unwrap();
        let connected = client.connect(server.local_addr().unwrap()).unwrap();
        let ckey = selector.register(&client, Ops::CONNECT).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !(skey.is_acceptable() && (connected || ckey.is_connectable())) {
            assert!(Instant::now() < deadline, "readiness never reported");
            selector.select(Some(Duration::from_millis(100))).unwrap();
        }
        assert!(server.accept().unwrap().is_some());
        assert!(client.finish_connect().unwrap());
    }

    #[test]
    fn test_register_validation() {
        let selector = Selector::open().unwrap();
        let server = listener();
        assert_eq!(
            selector.register(&server, Ops::READ).err(),
            Some(NioError::IllegalOps {
                requested: Ops::READ,
                valid: Ops::ACCEPT
            })
        );

        let path = std::env::temp_dir().join(format!("nio-sel-{}", std::process::id()));
        let file = FileChannel::open(
            &path,
            &OpenOptions::new().read(true).write(true).create(true),
        )
        .unwrap();
        assert_eq!(
            selector.register(&file, Ops::NONE).err(),
            Some(NioError::UnsupportedChannel)
        );
        std::fs::remove_file(&path).unwrap();

        let mut closed = SocketChannel::open().unwrap();
        closed.close().unwrap();
        assert_eq!(
            selector.register(&closed, Ops::READ).err(),
            Some(NioError::UseAfterClose)
        );
    }

    #[test]
    fn test_reregister_returns_same_key() {
        let selector = Selector::open().unwrap();
        let ch = SocketChannel::open().unwrap();
        let k1 = selector.register(&ch, Ops::READ).unwrap();
        let k2 = selector.register(&ch, Ops::WRITE).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.interest_ops(), Ops::WRITE);
        assert_eq!(selector.keys().unwrap().len(), 1);
    }

    #[test]
    fn test_cancel_purges_key() {
        let mut server = listener();
        let (client, mut peer) = pair(&mut server);
        let selector = Selector::open().unwrap();
        let key = selector.register(&client, Ops::READ).unwrap();
        peer.write(&mut ByteBuffer::wrap(vec![1])).unwrap();

        key.cancel();
        assert!(!key.is_valid());
        assert_eq!(key.set_interest_ops(Ops::READ), Err(NioError::CancelledKey));
        assert_eq!(selector.cancelled_keys().unwrap(), vec![key.clone()]);

        assert_eq!(selector.select(Some(Duration::from_millis(50))).unwrap(), 0);
        assert!(selector.keys().unwrap().is_empty());
        assert!(selector.cancelled_keys().unwrap().is_empty());
        assert!(selector.selected_keys().unwrap().is_empty());

        // A fresh registration gets a fresh key.
        let again = selector.register(&client, Ops::READ).unwrap();
        assert_ne!(again, key);
        assert_eq!(selector.select(Some(Duration::from_secs(1))).unwrap(), 1);
    }

    #[test]
    fn test_closed_channel_key_dropped() {
        let mut server = listener();
        let (mut client, _peer) = pair(&mut server);
        let selector = Selector::open().unwrap();
        let key = selector.register(&client, Ops::READ | Ops::WRITE).unwrap();
        client.close().unwrap();
        assert!(!key.is_valid());
        assert_eq!(selector.select_now().unwrap(), 0);
        assert!(selector.keys().unwrap().is_empty());
    }

    #[test]
    fn test_wakeup_interrupts_blocked_select() {
        let selector = Arc::new(Selector::open().unwrap());
        let remote = Arc::clone(&selector);
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.wakeup().unwrap();
        });
        let start = Instant::now();
        assert_eq!(selector.select(None).unwrap(), 0);
        assert!(start.elapsed() < Duration::from_secs(5));
        t.join().unwrap();
    }

    #[test]
    fn test_wakeup_before_select() {
        let selector = Selector::open().unwrap();
        selector.wakeup().unwrap();
        let start = Instant::now();
        assert_eq!(selector.select(Some(Duration::from_secs(10))).unwrap(), 0);
        assert!(start.elapsed() < Duration::from_secs(5));
        // Drained: the next poll times out normally.
        let start = Instant::now();
        selector.select(Some(Duration::from_millis(30))).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_register_from_other_thread_during_select() {
        let selector = Arc::new(Selector::open().unwrap());
        let mut server = listener();
        let (client, mut peer) = pair(&mut server);
        peer.write(&mut ByteBuffer::wrap(vec![9])).unwrap();

        let remote = Arc::clone(&selector);
        let t = std::thread::spawn(move || remote.select(None).unwrap());
        std::thread::sleep(Duration::from_millis(50));
        let key = selector.register(&client, Ops::READ).unwrap();
        t.join().unwrap();
        // Whichever select saw the data first, the key ends up selected.
        selector.select(Some(Duration::from_secs(1))).unwrap();
        assert!(key.is_readable());
        assert_eq!(selector.selected_keys().unwrap(), vec![key]);
    }

    #[test]
    fn test_register_while_select_loops() {
        let selector = Arc::new(Selector::open().unwrap());
        let stop = Arc::new(AtomicBool::new(false));
        let looper = {
            let selector = Arc::clone(&selector);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    selector.select(None).unwrap();
                }
            })
        };

        let (tx, rx) = std::sync::mpsc::channel();
        let registrar = {
            let selector = Arc::clone(&selector);
            std::thread::spawn(move || {
                let mut channels = Vec::new();
                for _ in 0..200 {
                    let ch = SocketChannel::open().unwrap();
                    selector.register(&ch, Ops::CONNECT).unwrap();
                    channels.push(ch);
                }
                tx.send(channels.len()).unwrap();
                channels
            })
        };
        let registered = rx.recv_timeout(Duration::from_secs(20));

        stop.store(true, Ordering::Release);
        selector.wakeup().unwrap();
        looper.join().unwrap();
        assert_eq!(registered.unwrap(), 200);
        let channels = registrar.join().unwrap();
        assert_eq!(selector.keys().unwrap().len(), channels.len());
    }

    #[test]
    fn test_close_selector() {
        let selector = Selector::open().unwrap();
        let ch = SocketChannel::open().unwrap();
        let key = selector.register(&ch, Ops::CONNECT).unwrap();
        selector.close().unwrap();
        assert!(!selector.is_open());
        assert!(!key.is_valid());
        assert_eq!(selector.select_now(), Err(NioError::UseAfterClose));
        assert_eq!(
            selector.register(&ch, Ops::READ).err(),
            Some(NioError::UseAfterClose)
        );
        selector.wakeup().unwrap();
        selector.close().unwrap();
    }

    #[test]
    fn test_readiness_mapping() {
        assert_eq!(readiness(false, false), Ops::NONE);
        assert_eq!(readiness(true, false), Ops::READ | Ops::ACCEPT);
        assert_eq!(readiness(false, true), Ops::WRITE | Ops::CONNECT);
    }
}
