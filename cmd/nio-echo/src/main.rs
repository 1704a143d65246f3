//! nio Echo Server
//!
//! Single-threaded TCP echo server: one non-blocking listener and any
//! number of non-blocking connections, all multiplexed by one `Selector`.
//!
//! Usage:
//!     cargo build --release -p nio-echo
//!     ./target/release/nio-echo [port] [max_conns]
//!
//! Test with:
//!     echo "hello" | nc localhost 9999
//!     for i in $(seq 1 100); do echo "ping $i" | nc -q0 localhost 9999 & done
//!
//! Logging: NIO_LOG_LEVEL=debug for per-connection events.

use nio_buffer::ByteBuffer;
use nio_channel::{Channel, ReadStatus, SelectionKey, Selector, ServerSocketChannel, SocketChannel};
use nio_core::{logging, NioConfig, NioError, Ops};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Attachment token of the listener key; connections use their slot index.
const LISTENER: usize = usize::MAX;

// ── Per-connection state ──
const BUF_SIZE: usize = 4096;

struct Conn {
    ch: SocketChannel,
    key: SelectionKey,
    /// Filled by reads, drained by writes. Between events it is in fill
    /// mode: `[0, position)` is data not yet echoed.
    buf: ByteBuffer,
}

struct ConnSlab {
    slots: Vec<Option<Conn>>,
    free: Vec<usize>,
}

impl ConnSlab {
    fn new(max: usize) -> Self {
        Self {
            slots: (0..max).map(|_| None).collect(),
            free: (0..max).rev().collect(),
        }
    }

    fn alloc(&mut self) -> Option<usize> {
        self.free.pop()
    }

    fn put(&mut self, idx: usize, conn: Conn) {
        self.slots[idx] = Some(conn);
    }

    fn get_mut(&mut self, idx: usize) -> Option<&mut Conn> {
        self.slots.get_mut(idx)?.as_mut()
    }

    fn release(&mut self, idx: usize) -> Option<Conn> {
        let conn = self.slots.get_mut(idx)?.take()?;
        self.free.push(idx);
        Some(conn)
    }

    fn active(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

// ── Stats ──
#[derive(Default)]
struct Stats {
    accepts: u64,
    reads: u64,
    writes: u64,
    closes: u64,
    bytes_in: u64,
    bytes_out: u64,
    errors: u64,
}

impl Stats {
    fn print(&self, conns: &ConnSlab, elapsed_secs: f64) {
        log::info!(
            "[{:.1}s] conns={} accepts={} read={} write={} close={} bytes_in={} bytes_out={} err={}",
            elapsed_secs,
            conns.active(),
            self.accepts,
            self.reads,
            self.writes,
            self.closes,
            self.bytes_in,
            self.bytes_out,
            self.errors,
        );
    }
}

fn accept_all(
    server: &mut ServerSocketChannel,
    selector: &Selector,
    conns: &mut ConnSlab,
    stats: &mut Stats,
) -> Result<(), NioError> {
    while let Some(mut ch) = server.accept()? {
        stats.accepts += 1;
        let Some(idx) = conns.alloc() else {
            // At capacity: drop the connection.
            log::warn!("at capacity, refusing {:?}", ch.remote_addr());
            ch.close()?;
            stats.errors += 1;
            continue;
        };
        ch.set_blocking(false)?;
        let key = selector.register_with(&ch, Ops::READ, idx)?;
        log::debug!("conn {} from {:?}", idx, ch.remote_addr());
        conns.put(
            idx,
            Conn {
                ch,
                key,
                buf: ByteBuffer::allocate(BUF_SIZE),
            },
        );
    }
    Ok(())
}

/// Drain as much pending data as the socket takes, then pick the interest
/// set: WRITE while data is pending, READ otherwise.
fn flush(conn: &mut Conn, stats: &mut Stats) -> Result<(), NioError> {
    conn.buf.flip();
    let n = conn.ch.write(&mut conn.buf)?;
    conn.buf.compact()?;
    if n > 0 {
        stats.writes += 1;
        stats.bytes_out += n as u64;
    }
    let interest = if conn.buf.position() > 0 { Ops::WRITE } else { Ops::READ };
    conn.key.set_interest_ops(interest)
}

/// Returns false when the connection should be closed.
fn service(conn: &mut Conn, key: &SelectionKey, stats: &mut Stats) -> Result<bool, NioError> {
    if key.is_readable() {
        match conn.ch.read(&mut conn.buf)? {
            ReadStatus::Read(n) => {
                stats.reads += 1;
                stats.bytes_in += n as u64;
            }
            ReadStatus::WouldBlock => {}
            ReadStatus::EndOfStream => return Ok(false),
        }
    }
    if conn.buf.position() > 0 {
        flush(conn, stats)?;
    }
    Ok(true)
}

static RUNNING: AtomicBool = AtomicBool::new(true);

fn main() {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let port: u16 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(9999);
    let max_conns: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1024);

    // SIGINT handler for clean shutdown
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as usize);
        libc::signal(libc::SIGTERM, handle_sigint as usize);
    }

    let config = NioConfig::from_env();
    log::info!("starting on port {} (max {} connections), {:?}", port, max_conns, config);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let mut server = ServerSocketChannel::open_with(&config).expect("socket setup failed");
    server.bind(addr).expect("bind failed");
    server.set_blocking(false).expect("fcntl failed");
    let selector = Selector::open_with(&config).expect("selector setup failed");
    selector
        .register_with(&server, Ops::ACCEPT, LISTENER)
        .expect("listener registration failed");

    let mut conns = ConnSlab::new(max_conns);
    let mut stats = Stats::default();
    let start = Instant::now();
    let mut last_stats = start;

    log::info!("listening on {}", server.local_addr().unwrap_or(addr));

    // ── Event loop ──
    while RUNNING.load(Ordering::Relaxed) {
        // Bounded wait so a signal is noticed even with no traffic.
        if let Err(e) = selector.select(Some(Duration::from_millis(500))) {
            log::error!("select failed: {}", e);
            break;
        }

        for key in selector.take_selected_keys().unwrap_or_default() {
            let Some(token) = key.attachment() else {
                continue;
            };
            if token == LISTENER {
                if let Err(e) = accept_all(&mut server, &selector, &mut conns, &mut stats) {
                    log::warn!("accept failed: {}", e);
                    stats.errors += 1;
                }
                continue;
            }

            let Some(conn) = conns.get_mut(token) else {
                continue;
            };
            let keep = match service(conn, &key, &mut stats) {
                Ok(keep) => keep,
                Err(e) => {
                    log::debug!("conn {}: {}", token, e);
                    stats.errors += 1;
                    false
                }
            };
            if !keep {
                if let Some(mut conn) = conns.release(token) {
                    conn.key.cancel();
                    let _ = conn.ch.close();
                    stats.closes += 1;
                    log::debug!("conn {} closed", token);
                }
            }
        }

        // Print stats every 5 seconds
        let now = Instant::now();
        if now.duration_since(last_stats).as_secs() >= 5 {
            stats.print(&conns, now.duration_since(start).as_secs_f64());
            last_stats = now;
        }
    }

    // Shutdown
    log::info!("shutting down...");
    stats.print(&conns, start.elapsed().as_secs_f64());
    let _ = selector.close();
    let _ = server.close();
    log::info!("done.");
}

extern "C" fn handle_sigint(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}
