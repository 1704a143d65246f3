//! nio End-to-End Smoke Test
//!
//! Exercises the full stack against the real kernel:
//!   Part A: Buffers (cursor laws, views, typed access)
//!   Part B: Mapped files (read-write round trip, private copies, close)
//!   Part C: Socket channels (connect state machine, refused connect)
//!   Part D: Selector (readiness, selected set, wakeup)
//!
//! Run: ./target/release/nio-smoke

use nio_buffer::{ByteBuffer, ByteOrder, IntBuffer, MapMode};
use nio_channel::{
    Channel, ConnState, FileChannel, OpenOptions, ReadStatus, Selector, ServerSocketChannel,
    SocketChannel,
};
use nio_core::{NioError, Ops};

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    /// Record a fallible step; returns the value on success.
    fn step<T>(&mut self, name: &str, res: Result<T, NioError>) -> Option<T> {
        match res {
            Ok(v) => {
                self.pass(name);
                Some(v)
            }
            Err(e) => {
                self.fail(name, &e.to_string());
                None
            }
        }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

/// Scratch file removed on drop.
struct Scratch(PathBuf);

impl Scratch {
    fn new(tag: &str) -> Self {
        Self(std::env::temp_dir().join(format!("nio-smoke-{}-{}", tag, std::process::id())))
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

/// Port that refuses connections: bind a listener, note its port, drop it.
fn dead_port() -> Option<SocketAddr> {
    let listener = std::net::TcpListener::bind(loopback()).ok()?;
    let addr = listener.local_addr().ok()?;
    drop(listener);
    Some(addr)
}

// ════════════════════════════════════════════════════════════
// Part A: Buffers
// ════════════════════════════════════════════════════════════

fn test_buffers(t: &mut TestRunner) {
    t.section("Part A: Buffers");

    let mut b = ByteBuffer::allocate(8);
    let _ = b.put_slice(b"abc");
    b.flip();
    t.check(
        "flip: limit=3 position=0",
        b.limit() == 3 && b.position() == 0,
        &format!("pos={} lim={}", b.position(), b.limit()),
    );

    let got = b.get_at(3);
    t.check(
        "absolute get past limit -> OutOfBounds",
        matches!(got, Err(NioError::OutOfBounds { .. })),
        &format!("{:?}", got),
    );

    let _ = b.get();
    let _ = b.compact();
    t.check(
        "compact moves [b c] to front",
        b.position() == 2 && b.limit() == 8 && b.get_at(0) == Ok(b'b'),
        &format!("{:?}", b),
    );

    let mut base = ByteBuffer::allocate(4);
    let mut ro = base.as_read_only();
    let rejected = matches!(ro.put(1), Err(NioError::ReadOnly));
    t.check("read-only view rejects put", rejected, "put succeeded");
    let _ = base.put_at(0, 9);
    t.check("view sees base write", ro.get_at(0) == Ok(9), "value not shared");

    let mut d = ByteBuffer::allocate(8);
    d.set_order(ByteOrder::BigEndian);
    let _ = d.put_as::<i32>(0x0102_0304);
    t.check(
        "big-endian i32 layout",
        d.get_at(0) == Ok(1) && d.get_at(3) == Ok(4),
        &format!("{:?}", d.to_vec()),
    );

    let ints: IntBuffer = d.as_int_buffer();
    t.check(
        "as_int_buffer floor capacity",
        ints.capacity() == 1,
        &format!("cap={}", ints.capacity()),
    );

    let mut mark = ByteBuffer::allocate(4);
    t.check(
        "reset without mark -> InvalidMark",
        matches!(mark.reset(), Err(NioError::InvalidMark)),
        "reset succeeded",
    );
}

// ════════════════════════════════════════════════════════════
// Part B: Mapped files
// ════════════════════════════════════════════════════════════

fn test_mapping(t: &mut TestRunner) {
    t.section("Part B: Mapped files");

    let path = Scratch::new("map");
    let opts = OpenOptions::new().read(true).write(true).create(true).truncate(true);
    let Some(mut ch) = t.step("open read-write file", FileChannel::open(&path.0, &opts)) else {
        return;
    };

    let Some(mut map) = t.step("map ReadWrite 16 bytes", ch.map(MapMode::ReadWrite, 0, 16)) else {
        return;
    };
    t.check(
        "mapping grew the file",
        ch.size() == Ok(16),
        &format!("{:?}", ch.size()),
    );

    let _ = map.put_slice(b"mapped!");
    let _ = map.force();
    let on_disk = std::fs::read(&path.0).unwrap_or_default();
    t.check(
        "write through mapping reaches file",
        on_disk.starts_with(b"mapped!"),
        &format!("{:?}", &on_disk[..on_disk.len().min(8)]),
    );

    if let Some(mut private) = t.step("map Private", ch.map(MapMode::Private, 0, 16)) {
        let _ = private.put_at(0, b'X');
        let on_disk = std::fs::read(&path.0).unwrap_or_default();
        t.check(
            "private write stays private",
            on_disk.first() == Some(&b'm'),
            "file changed",
        );
    }

    let _ = t.step("close file channel", ch.close());
    let after = map.get_at(0);
    t.check(
        "mapped access after close -> UseAfterClose",
        after == Err(NioError::UseAfterClose),
        &format!("{:?}", after),
    );
}

// ════════════════════════════════════════════════════════════
// Part C: Socket channels
// ════════════════════════════════════════════════════════════

fn test_sockets(t: &mut TestRunner) {
    t.section("Part C: Socket channels");

    let Some(mut server) = t.step("open server channel", ServerSocketChannel::open()) else {
        return;
    };
    let _ = t.step("bind 127.0.0.1:0", server.bind(loopback()));
    let Some(addr) = t.step("local_addr", server.local_addr()) else {
        return;
    };

    let Some(mut client) = t.step("open socket channel", SocketChannel::open()) else {
        return;
    };
    t.check(
        "fresh channel is Unconnected",
        client.state() == ConnState::Unconnected,
        &format!("{:?}", client.state()),
    );
    let _ = t.step("blocking connect", client.connect(addr));
    t.check(
        "state is Connected",
        client.is_connected(),
        &format!("{:?}", client.state()),
    );
    let again = client.connect(addr);
    t.check(
        "second connect -> AlreadyConnected",
        again == Err(NioError::AlreadyConnected),
        &format!("{:?}", again),
    );

    if let Some(Some(mut peer)) = t.step("accept", server.accept()) {
        let mut out = ByteBuffer::wrap(b"ping".to_vec());
        let _ = client.write(&mut out);
        let mut inb = ByteBuffer::allocate(16);
        let got = peer.read(&mut inb);
        t.check(
            "peer reads 4 bytes",
            got == Ok(ReadStatus::Read(4)),
            &format!("{:?}", got),
        );
        let _ = client.close();
        inb.clear();
        let eof = peer.read(&mut inb);
        t.check(
            "read after peer close -> EndOfStream",
            eof == Ok(ReadStatus::EndOfStream),
            &format!("{:?}", eof),
        );
    }

    let Some(dead) = dead_port() else {
        t.fail("find refused port", "bind failed");
        return;
    };
    if let Some(mut ch) = t.step("open socket for refused connect", SocketChannel::open()) {
        let res = ch.connect(dead);
        t.check(
            "connect to closed port -> ConnectionRefused",
            matches!(res, Err(NioError::ConnectionRefused(_))),
            &format!("{:?}", res),
        );
        t.check(
            "channel reset to Unconnected",
            ch.state() == ConnState::Unconnected && ch.is_open(),
            &format!("{:?}", ch.state()),
        );
    }
}

// ════════════════════════════════════════════════════════════
// Part D: Selector
// ════════════════════════════════════════════════════════════

fn test_selector(t: &mut TestRunner) {
    t.section("Part D: Selector");

    let Some(selector) = t.step("open selector", Selector::open()) else {
        return;
    };
    let Some(mut server) = t.step("open server channel", ServerSocketChannel::open()) else {
        return;
    };
    let _ = server.bind(loopback());
    let Some(addr) = t.step("local_addr", server.local_addr()) else {
        return;
    };

    let mut a = match SocketChannel::connect_to(addr) {
        Ok(c) => c,
        Err(e) => return t.fail("connect a", &e.to_string()),
    };
    let _b = match SocketChannel::connect_to(addr) {
        Ok(c) => c,
        Err(e) => return t.fail("connect b", &e.to_string()),
    };
    let (Ok(Some(mut pa)), Ok(Some(mut pb))) = (server.accept(), server.accept()) else {
        return t.fail("accept both", "accept failed");
    };
    let _ = pa.set_blocking(false);
    let _ = pb.set_blocking(false);

    let Some(ka) = t.step("register peer a for READ", selector.register_with(&pa, Ops::READ, 1)) else {
        return;
    };
    let _ = t.step("register peer b for READ", selector.register_with(&pb, Ops::READ, 2));

    let mut msg = ByteBuffer::wrap(b"x".to_vec());
    let _ = a.write(&mut msg);

    let n = selector.select(Some(Duration::from_secs(1)));
    t.check("select reports exactly 1 ready key", n == Ok(1), &format!("{:?}", n));
    let selected = selector.selected_keys().unwrap_or_default();
    t.check(
        "selected key is peer a",
        selected.len() == 1 && selected[0] == ka && ka.is_readable(),
        &format!("{} keys", selected.len()),
    );
    let again = selector.select_now();
    t.check(
        "unchanged ready key does not recount",
        again == Ok(0),
        &format!("{:?}", again),
    );

    ka.cancel();
    let _ = selector.select_now();
    let keys = selector.keys().unwrap_or_default();
    t.check(
        "cancelled key purged",
        keys.len() == 1 && !keys.contains(&ka),
        &format!("{} keys", keys.len()),
    );

    let selector = Arc::new(selector);
    let waker = Arc::clone(&selector);
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        waker.wakeup()
    });
    let started = Instant::now();
    let _ = selector.select(None);
    let elapsed = started.elapsed();
    let woke = handle.join().map(|r| r.is_ok()).unwrap_or(false);
    t.check(
        "wakeup unblocks select(None)",
        woke && elapsed < Duration::from_secs(5),
        &format!("{:?}", elapsed),
    );

    let _ = t.step("close selector", selector.close());
    let after = selector.select_now();
    t.check(
        "select after close -> UseAfterClose",
        after == Err(NioError::UseAfterClose),
        &format!("{:?}", after),
    );
}

fn main() {
    println!("\n{}", LINE);
    println!("  nio Smoke Test");
    println!("{}", LINE);

    let mut t = TestRunner::new();

    test_buffers(&mut t);
    test_mapping(&mut t);
    test_sockets(&mut t);
    test_selector(&mut t);

    t.summary();

    if t.failed > 0 {
        std::process::exit(1);
    }
}
