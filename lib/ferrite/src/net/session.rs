use crate::net::buffer::RingBuffer;
use crate::net::payload::Payload;
use crossbeam::queue::SegQueue;
use mio::net::TcpStream;
use parking_lot::Mutex;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Per-session receive ring capacity.
pub const RECV_BUF_SIZE: usize = 8192;

/// Maximum number of queued payloads gathered into one send.
pub const MAX_SEND_MSG: usize = 100;

/// Session identifier packing the slot index and a per-occupancy unique
/// counter, so a stale handle can never address a recycled slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub const INVALID: SessionId = SessionId(u64::max_value());

    #[inline]
    pub fn new(index: u32, unique: u32) -> SessionId {
        SessionId((u64::from(unique) << 32) | u64::from(index))
    }

    #[inline]
    pub fn index(self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    #[inline]
    pub fn unique(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Owner object attached to a connected session by the application layer.
pub type Owner = Arc<dyn Any + Send + Sync>;

/// Per-connection state. A slot in the reactor's preallocated session array;
/// its storage is reused across occupancies, guarded by the unique counter
/// and the release latch.
///
/// Lifetime discipline: `io_count` counts every queued completion event plus
/// the standing receive reference taken at open. The slot is torn down
/// exactly when the count reaches zero and `release_flag` transitions
/// false -> true by compare-and-swap.
pub struct Session {
    pub index: usize,
    pub unique: AtomicU32,

    pub stream: Mutex<Option<TcpStream>>,
    pub peer: Mutex<Option<SocketAddr>>,

    // Recv
    pub recv_buf: Mutex<RingBuffer>,
    pub last_recv_ms: AtomicU64,
    /// At most one worker services this session's receive path at a time.
    pub recv_busy: AtomicBool,
    /// The standing receive reference has been surrendered (FIN, error or
    /// disconnect); set at most once per occupancy.
    pub recv_detached: AtomicBool,

    // Send
    pub send_q: SegQueue<Payload>,
    pub inflight: Mutex<Vec<(Payload, usize)>>,
    pub send_flag: AtomicBool,
    pub send_busy: AtomicBool,
    pub want_write: AtomicBool,

    // Lifecycle
    pub connecting: AtomicBool,
    pub connected: AtomicBool,
    pub client: AtomicBool,
    pub disconnect_flag: AtomicBool,
    pub release_flag: AtomicBool,
    pub io_count: AtomicI32,

    /// Serializes occupancy transitions (open/release) against event claims
    /// and interest rearms, so a recycled slot can never absorb a stale
    /// reference. Held for a few loads and stores at a time.
    pub lifecycle: Mutex<()>,

    pub owner: Mutex<Option<Owner>>,
}

impl Session {
    pub fn new(index: usize) -> Session {
        Session {
            index,
            unique: AtomicU32::new(0),
            stream: Mutex::new(None),
            peer: Mutex::new(None),
            recv_buf: Mutex::new(RingBuffer::new(RECV_BUF_SIZE)),
            last_recv_ms: AtomicU64::new(0),
            recv_busy: AtomicBool::new(false),
            recv_detached: AtomicBool::new(false),
            send_q: SegQueue::new(),
            inflight: Mutex::new(Vec::with_capacity(MAX_SEND_MSG)),
            send_flag: AtomicBool::new(false),
            send_busy: AtomicBool::new(false),
            want_write: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            client: AtomicBool::new(false),
            disconnect_flag: AtomicBool::new(false),
            release_flag: AtomicBool::new(true),
            io_count: AtomicI32::new(0),
            lifecycle: Mutex::new(()),
            owner: Mutex::new(None),
        }
    }

    /// Current id of this slot occupancy.
    #[inline]
    pub fn id(&self) -> SessionId {
        SessionId::new(self.index as u32, self.unique.load(Ordering::Acquire))
    }

    /// True when `id` still addresses the live occupancy of this slot.
    #[inline]
    pub fn validate(&self, id: SessionId) -> bool {
        !self.release_flag.load(Ordering::Acquire)
            && self.unique.load(Ordering::Acquire) == id.unique()
    }

    /// Arms the slot for a fresh occupancy. The caller owns the slot index
    /// (it was popped off the free stack) so no other thread can race this.
    pub fn open(&self, stream: TcpStream, peer: SocketAddr, connecting: bool, now_ms: u64) {
        self.unique.fetch_add(1, Ordering::AcqRel);
        *self.stream.lock() = Some(stream);
        *self.peer.lock() = Some(peer);
        self.recv_buf.lock().clear();
        self.last_recv_ms.store(now_ms, Ordering::Release);
        self.recv_busy.store(false, Ordering::Release);
        self.recv_detached.store(false, Ordering::Release);
        self.send_flag.store(false, Ordering::Release);
        self.send_busy.store(false, Ordering::Release);
        self.want_write.store(false, Ordering::Release);
        self.connecting.store(connecting, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        self.disconnect_flag.store(false, Ordering::Release);
        // The standing receive reference.
        self.io_count.store(1, Ordering::Release);
        *self.owner.lock() = None;
        self.release_flag.store(false, Ordering::Release);
    }

    #[inline]
    pub fn increment_io(&self) {
        self.io_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements the io count, reporting whether it reached zero.
    #[inline]
    pub fn decrement_io(&self) -> bool {
        self.io_count.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Surrenders the standing receive reference. Returns true the first
    /// time only; the caller then runs a normal decrement for it.
    #[inline]
    pub fn detach_recv(&self) -> bool {
        !self.recv_detached.swap(true, Ordering::AcqRel)
    }

    /// Claims the teardown of this occupancy. Succeeds for exactly one
    /// caller once the io count is zero.
    #[inline]
    pub fn try_release(&self) -> bool {
        if self.io_count.load(Ordering::Acquire) != 0 {
            return false;
        }
        self.release_flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Drops all queued and in-flight payloads back to the pool and clears
    /// the socket. Runs inside the release path only.
    pub fn reset_resources(&self) {
        while self.send_q.pop().is_some() {}
        self.inflight.lock().clear();
        *self.stream.lock() = None;
        *self.peer.lock() = None;
        *self.owner.lock() = None;
        self.connected.store(false, Ordering::Release);
        self.connecting.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_packing() {
        let id = SessionId::new(1234, 77);
        assert_eq!(id.index(), 1234);
        assert_eq!(id.unique(), 77);
        assert_ne!(id, SessionId::INVALID);
        assert_eq!(SessionId::new(1234, 77), id);
    }

    #[test]
    fn test_io_count_reaches_zero_once() {
        let session = Session::new(0);
        session.io_count.store(2, Ordering::Release);

        assert!(!session.decrement_io());
        assert!(session.decrement_io());
    }

    #[test]
    fn test_release_requires_zero_io() {
        let session = Session::new(0);
        session.release_flag.store(false, Ordering::Release);
        session.io_count.store(1, Ordering::Release);

        assert!(!session.try_release());

        session.decrement_io();
        assert!(session.try_release());
        // Second claim must fail: cleanup runs exactly once.
        assert!(!session.try_release());
    }

    #[test]
    fn test_detach_recv_is_one_way() {
        let session = Session::new(0);
        session.recv_detached.store(false, Ordering::Release);

        assert!(session.detach_recv());
        assert!(!session.detach_recv());
    }

    #[test]
    fn test_stale_id_fails_validation() {
        let session = Session::new(3);
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(&addr).unwrap();

        session.open(stream, addr, false, 0);
        let live = session.id();
        assert!(session.validate(live));

        // Tear down and reopen: the old id must be rejected.
        while !session.decrement_io() {}
        assert!(session.try_release());
        session.reset_resources();

        let stream = TcpStream::connect(&addr).unwrap();
        session.open(stream, addr, false, 0);
        assert!(!session.validate(live));
        assert!(session.validate(session.id()));
    }
}
