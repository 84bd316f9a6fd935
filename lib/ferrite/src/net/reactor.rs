use crate::net::dispatch::Dispatcher;
use crate::net::frame;
use crate::net::payload::Payload;
use crate::net::session::{Owner, Session, SessionId, MAX_SEND_MSG};
use crate::net::support::{ErrorType, NetworkError, NetworkResult};
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::queue::ArrayQueue;
use flint::logging;
use flint::time::timestamp_millis;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Poll, PollOpt, Ready, Token};
use parking_lot::{Condvar, Mutex};
use std::io::Write;
use std::net::{Shutdown, SocketAddr};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// Reactor tuning. Every field has a deployment-level override; the
/// defaults mirror the reference deployment.
#[derive(Clone)]
pub struct ReactorConfig {
    pub worker_threads: usize,
    pub max_sessions: usize,
    /// Idle-recv kick threshold in milliseconds; 0 disables the sweep.
    pub timeout_ms: u64,
    pub timeout_cycle_ms: u64,
    pub reconnect_interval_ms: u64,
    pub nodelay: bool,
    /// Disconnect on unknown packet ids instead of logging them.
    pub strict_packet_ids: bool,
    /// A send queue growing past this is treated as resource exhaustion.
    pub send_queue_limit: usize,
}

impl Default for ReactorConfig {
    fn default() -> ReactorConfig {
        ReactorConfig {
            worker_threads: thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            max_sessions: 10_000,
            timeout_ms: 60_000,
            timeout_cycle_ms: 10_000,
            reconnect_interval_ms: 1000,
            nodelay: true,
            strict_packet_ids: false,
            send_queue_limit: 1000,
        }
    }
}

/// Connection lifecycle hooks supplied by the application layer. Handlers
/// run on reactor workers; anything touching entity state must post through
/// the owner's job queue.
pub trait NetEvents: Send + Sync {
    fn on_connection_request(&self, _addr: &SocketAddr) -> bool {
        true
    }
    fn on_connect(&self, _session: &SessionHandle) {}
    fn on_disconnect(&self, _session: &SessionHandle) {}
}

/// Monitoring snapshot for the operator surface.
#[derive(Debug, Copy, Clone, Default)]
pub struct NetStats {
    pub sessions: u32,
    pub accept_total: u64,
    /// Connections turned away because the session pool was exhausted.
    pub rejected: u64,
    pub recv_msgs: u64,
    pub sent_msgs: u64,
    pub pending_connects: usize,
}

/// Cheap cloneable addressing handle for one session occupancy. Stale
/// handles (the slot was recycled) degrade to no-ops.
#[derive(Clone)]
pub struct SessionHandle {
    core: Arc<ReactorCore>,
    id: SessionId,
}

impl SessionHandle {
    #[inline]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[inline]
    pub fn send(&self, payload: Payload) {
        self.core.send(self.id, payload);
    }

    #[inline]
    pub fn disconnect(&self) {
        self.core.disconnect(self.id);
    }

    pub fn set_owner(&self, owner: Owner) {
        if let Some(session) = self.core.session(self.id) {
            if session.validate(self.id) {
                *session.owner.lock() = Some(owner);
            }
        }
    }

    pub fn owner(&self) -> Option<Owner> {
        self.core.session(self.id).and_then(|session| session.owner.lock().clone())
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.core.session(self.id).and_then(|session| *session.peer.lock())
    }
}

enum IoEvent {
    Readable(usize),
    Writable(usize),
    SendPost(usize),
    Shutdown,
}

enum SendOutcome {
    Complete,
    Wait,
    Fatal,
}

/// The completion reactor: a poll thread translating socket readiness into
/// completion events, a worker pool draining them, an idle timeout sweep,
/// and a reconnect worker for client connection sets.
pub struct Reactor {
    core: Arc<ReactorCore>,
    workers: Vec<thread::JoinHandle<()>>,
    poll_thread: Option<thread::JoinHandle<()>>,
    timeout_thread: Option<thread::JoinHandle<()>>,
    reconnect_thread: Option<thread::JoinHandle<()>>,
}

struct ReactorCore {
    self_ref: Weak<ReactorCore>,
    config: ReactorConfig,
    poll: Poll,
    sessions: Vec<Arc<Session>>,
    free: ArrayQueue<usize>,
    tx: Sender<IoEvent>,
    rx: Receiver<IoEvent>,
    listener: Mutex<Option<TcpListener>>,
    dispatcher: Dispatcher,
    hooks: Arc<dyn NetEvents>,
    running: AtomicBool,
    stopping: AtomicBool,

    // Client mode
    connect_addr: Mutex<Option<SocketAddr>>,
    pending_connects: AtomicUsize,
    reconnect_lock: Mutex<()>,
    reconnect_cv: Condvar,

    // Monitoring
    session_count: AtomicU32,
    accept_total: AtomicU64,
    rejected: AtomicU64,
    recv_msgs: AtomicU64,
    sent_msgs: AtomicU64,

    log: logging::Logger,
}

impl Reactor {
    /// Builds the reactor and starts its poll thread and worker pool. The
    /// dispatcher is fixed for the reactor's lifetime; handlers are
    /// registered once at startup.
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        config: ReactorConfig,
        dispatcher: Dispatcher,
        hooks: Arc<dyn NetEvents>,
        log: L,
    ) -> NetworkResult<Reactor> {
        let log = logging::child(log);
        let poll = Poll::new()?;
        let (tx, rx) = channel::unbounded();

        let sessions: Vec<_> = (0..config.max_sessions)
            .map(|index| Arc::new(Session::new(index)))
            .collect();

        let free = ArrayQueue::new(config.max_sessions);
        for index in (0..config.max_sessions).rev() {
            let _ = free.push(index);
        }

        let core = Arc::new_cyclic(|weak: &Weak<ReactorCore>| ReactorCore {
            self_ref: weak.clone(),
            config,
            poll,
            sessions,
            free,
            tx,
            rx,
            listener: Mutex::new(None),
            dispatcher,
            hooks,
            running: AtomicBool::new(true),
            stopping: AtomicBool::new(false),
            connect_addr: Mutex::new(None),
            pending_connects: AtomicUsize::new(0),
            reconnect_lock: Mutex::new(()),
            reconnect_cv: Condvar::new(),
            session_count: AtomicU32::new(0),
            accept_total: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            recv_msgs: AtomicU64::new(0),
            sent_msgs: AtomicU64::new(0),
            log,
        });

        let workers = (0..core.config.worker_threads.max(1))
            .map(|i| {
                let core = core.clone();
                thread::Builder::new()
                    .name(format!("reactor-worker-{}", i))
                    .spawn(move || core.worker_loop())
                    .expect("Error spawning reactor worker")
            })
            .collect();

        let poll_thread = {
            let core = core.clone();
            thread::Builder::new()
                .name("reactor-poll".into())
                .spawn(move || core.poll_loop())
                .expect("Error spawning poll thread")
        };

        let timeout_thread = if core.config.timeout_ms > 0 {
            let core = core.clone();
            Some(
                thread::Builder::new()
                    .name("reactor-timeout".into())
                    .spawn(move || core.timeout_loop())
                    .expect("Error spawning timeout thread"),
            )
        } else {
            None
        };

        Ok(Reactor {
            core,
            workers,
            poll_thread: Some(poll_thread),
            timeout_thread,
            reconnect_thread: None,
        })
    }

    /// Binds and registers the listen socket. Accepting starts immediately;
    /// the returned address carries the actual bound port.
    pub fn start_server(&mut self, addr: &str) -> NetworkResult<SocketAddr> {
        let core = &self.core;
        let sockaddr: SocketAddr = addr.parse()?;
        let listener = TcpListener::bind(&sockaddr)?;
        let local = listener.local_addr()?;

        core.poll.register(
            &listener,
            Token(core.config.max_sessions),
            Ready::readable(),
            PollOpt::edge(),
        )?;
        *core.listener.lock() = Some(listener);

        logging::info!(core.log, "server listening";
                       "context" => "start_server",
                       "address" => %local,
                       "max_sessions" => core.config.max_sessions);

        Ok(local)
    }

    /// Asynchronously establishes `target_connection_count` connections to
    /// the server and keeps re-issuing failed or dropped ones on the
    /// reconnect worker at the configured interval.
    pub fn start_client(&mut self, addr: &str, target_connection_count: usize) -> NetworkResult<()> {
        let core = &self.core;
        let sockaddr: SocketAddr = addr.parse()?;
        *core.connect_addr.lock() = Some(sockaddr);
        core.pending_connects.fetch_add(target_connection_count, Ordering::AcqRel);

        if self.reconnect_thread.is_none() {
            let core = core.clone();
            self.reconnect_thread = Some(
                thread::Builder::new()
                    .name("reactor-reconnect".into())
                    .spawn(move || core.reconnect_loop())
                    .expect("Error spawning reconnect thread"),
            );
        }

        core.reconnect_cv.notify_one();

        logging::info!(core.log, "client connecting";
                       "context" => "start_client",
                       "address" => %sockaddr,
                       "connections" => target_connection_count);

        Ok(())
    }

    #[inline]
    pub fn send(&self, id: SessionId, payload: Payload) {
        self.core.send(id, payload);
    }

    #[inline]
    pub fn disconnect(&self, id: SessionId) {
        self.core.disconnect(id);
    }

    #[inline]
    pub fn stats(&self) -> NetStats {
        self.core.stats()
    }

    /// Cooperative shutdown: stop accepting and reconnecting, disconnect
    /// every live session, let the completion flow drain, then join all
    /// threads.
    pub fn stop(&mut self) {
        let core = self.core.clone();

        if !core.running.load(Ordering::Acquire) {
            return;
        }

        logging::info!(core.log, "stopping reactor"; "context" => "stop");
        core.stopping.store(true, Ordering::Release);

        // No new connections in either direction.
        if let Some(listener) = core.listener.lock().take() {
            let _ = core.poll.deregister(&listener);
        }

        for session in core.sessions.iter() {
            if !session.release_flag.load(Ordering::Acquire) {
                core.start_disconnect(session);
            }
        }

        // Give the event flow a moment to drain the io counts.
        let deadline = timestamp_millis() + 500;
        while core.session_count.load(Ordering::Acquire) > 0 && timestamp_millis() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        core.running.store(false, Ordering::Release);
        core.reconnect_cv.notify_all();

        for _ in 0..self.workers.len() {
            let _ = core.tx.send(IoEvent::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(handle) = self.poll_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.timeout_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.reconnect_thread.take() {
            let _ = handle.join();
        }

        logging::info!(core.log, "reactor stopped"; "context" => "stop");
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ReactorCore {
    // ------------------------------------------------------------------
    // Poll thread
    // ------------------------------------------------------------------

    fn poll_loop(&self) {
        let mut events = Events::with_capacity(1024);
        let listener_token = Token(self.config.max_sessions);

        while self.running.load(Ordering::Acquire) {
            if let Err(err) = self.poll.poll(&mut events, Some(Duration::from_millis(100))) {
                logging::error!(self.log, "poll failed"; "context" => "poll_loop", "error" => %err);
                continue;
            }

            for event in &events {
                let token = event.token();

                if token == listener_token {
                    self.accept_loop();
                    continue;
                }

                let index = token.0;
                if index >= self.sessions.len() {
                    continue;
                }

                self.claim_session_event(index, event.readiness());
            }
        }
    }

    /// Converts one readiness notification into completion events, claiming
    /// the per-direction latches so at most one worker services a direction
    /// of a session at a time. Runs under the session lifecycle guard so a
    /// concurrent release cannot strand the claim.
    fn claim_session_event(&self, index: usize, ready: Ready) {
        let session = &self.sessions[index];
        let _guard = session.lifecycle.lock();

        if session.release_flag.load(Ordering::Acquire) {
            return;
        }

        let unix = mio::unix::UnixReady::from(ready);
        let failed = unix.is_error() || unix.is_hup();
        let connecting = session.connecting.load(Ordering::Acquire);

        // Error and hangup conditions surface through the read path on
        // established sessions and through the write path mid-connect.
        let readable = ready.is_readable() || (failed && !connecting);
        let writable = ready.is_writable() || connecting || failed;

        if readable
            && !session.recv_detached.load(Ordering::Acquire)
            && session
                .recv_busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            session.increment_io();
            let _ = self.tx.send(IoEvent::Readable(index));
        }

        if writable
            && (connecting || session.want_write.load(Ordering::Acquire))
            && session
                .send_busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            session.increment_io();
            let _ = self.tx.send(IoEvent::Writable(index));
        }
    }

    fn accept_loop(&self) {
        loop {
            let accepted = {
                let guard = self.listener.lock();
                match guard.as_ref() {
                    Some(listener) => listener.accept(),
                    None => return,
                }
            };

            match accepted {
                Ok((stream, addr)) => {
                    self.accept_total.fetch_add(1, Ordering::AcqRel);

                    if self.session_count.load(Ordering::Acquire) >= self.config.max_sessions as u32 {
                        self.reject(&addr, NetworkError::Fatal(ErrorType::SessionExhausted));
                        continue;
                    }

                    if !self.hooks.on_connection_request(&addr) {
                        logging::debug!(self.log, "connection refused by policy";
                                        "context" => "accept", "peer" => %addr);
                        continue;
                    }

                    let index = match self.free.pop() {
                        Some(index) => index,
                        None => {
                            self.reject(&addr, NetworkError::Fatal(ErrorType::SessionExhausted));
                            continue;
                        }
                    };

                    self.open_session(index, stream, addr, false);
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    logging::warn!(self.log, "accept failed"; "context" => "accept", "error" => %err);
                    break;
                }
            }
        }
    }

    /// Resource-exhaustion rejection: the connection is dropped before a
    /// session ever exists, so no lifecycle hooks fire.
    fn reject(&self, addr: &SocketAddr, err: NetworkError) {
        self.rejected.fetch_add(1, Ordering::AcqRel);
        logging::warn!(self.log, "connection rejected";
                       "context" => "accept",
                       "peer" => %addr,
                       "error" => ?err);
    }

    fn open_session(&self, index: usize, stream: TcpStream, addr: SocketAddr, client: bool) {
        let session = &self.sessions[index];

        if self.config.nodelay {
            let _ = stream.set_nodelay(true);
        }

        let opened = {
            let _guard = session.lifecycle.lock();
            session.open(stream, addr, client, timestamp_millis());
            session.client.store(client, Ordering::Release);

            // Server sessions start disarmed; the receive interest is armed
            // only after the connect hook has run, so a handler can always
            // see the owner the hook attached.
            let interest = if client { Ready::writable() } else { Ready::empty() };
            let registered = {
                let guard = session.stream.lock();
                self.poll.register(
                    guard.as_ref().expect("Fresh session must hold a stream"),
                    Token(index),
                    interest,
                    PollOpt::edge() | PollOpt::oneshot(),
                )
            };

            match registered {
                Ok(()) => {
                    if !client {
                        session.connected.store(true, Ordering::Release);
                        self.session_count.fetch_add(1, Ordering::AcqRel);
                    }
                    true
                }
                Err(err) => {
                    logging::error!(self.log, "stream registration failed";
                                    "context" => "open_session", "error" => %err);
                    session.disconnect_flag.store(true, Ordering::Release);
                    session.recv_detached.store(true, Ordering::Release);
                    session.io_count.store(0, Ordering::Release);
                    let _released = session.try_release();
                    debug_assert!(_released, "Fresh session must be releasable");
                    session.reset_resources();
                    let _ = self.free.push(index);
                    false
                }
            }
        };

        if !opened {
            if client {
                self.schedule_reconnect();
            }
            return;
        }

        logging::debug!(self.log, "session opened";
                        "context" => "open_session",
                        "session" => session.id().raw(),
                        "peer" => %addr,
                        "client" => client);

        if !client {
            let handle = self.handle(session.id());
            self.hooks.on_connect(&handle);
            self.rearm(session);
        }
    }

    // ------------------------------------------------------------------
    // Worker pool
    // ------------------------------------------------------------------

    fn worker_loop(&self) {
        while let Ok(event) = self.rx.recv() {
            match event {
                IoEvent::Readable(index) => self.handle_readable(index),
                IoEvent::Writable(index) | IoEvent::SendPost(index) => self.handle_send(index),
                IoEvent::Shutdown => break,
            }
        }
    }

    /// Receive completion: move bytes into the ring, extract and dispatch
    /// whole frames, then rearm. The caller holds the recv latch and one io
    /// reference.
    fn handle_readable(&self, index: usize) {
        let session = self.sessions[index].clone();
        let mut peer_closed = false;
        let mut fatal = false;
        let mut received_total = 0usize;

        loop {
            // Drain the socket into the ring.
            let (count, eof) = {
                let guard = session.stream.lock();
                match guard.as_ref() {
                    Some(stream) => {
                        let mut ring = session.recv_buf.lock();
                        match ring.read_from(&mut (&*stream)) {
                            Ok(result) => result,
                            Err(err) => {
                                logging::debug!(self.log, "recv failed";
                                                "context" => "recv",
                                                "session" => session.id().raw(),
                                                "error" => %err);
                                fatal = true;
                                (0, false)
                            }
                        }
                    }
                    None => (0, true),
                }
            };
            received_total += count;

            // Extract and dispatch whole frames.
            if !fatal {
                let handle = self.handle(session.id());
                loop {
                    if session.disconnect_flag.load(Ordering::Acquire) {
                        break;
                    }

                    let extracted = {
                        let mut ring = session.recv_buf.lock();
                        frame::next_frame(&mut ring)
                    };

                    match extracted {
                        Ok(Some((packet_id, payload))) => {
                            self.dispatch_frame(&session, &handle, packet_id, payload, &mut fatal);
                            if fatal {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            logging::warn!(self.log, "protocol error";
                                           "context" => "recv",
                                           "session" => session.id().raw(),
                                           "error" => ?err);
                            fatal = true;
                            break;
                        }
                    }
                }
            }

            if fatal || eof {
                peer_closed = eof;
                break;
            }
            if count == 0 {
                break;
            }
        }

        if received_total > 0 {
            session.last_recv_ms.store(timestamp_millis(), Ordering::Release);
        }

        if peer_closed || fatal {
            self.start_disconnect(&session);
        }

        // Surrender the standing receive reference once the receive path is
        // over for this occupancy.
        if session.disconnect_flag.load(Ordering::Acquire) {
            if session.detach_recv() && session.decrement_io() {
                self.release(index);
            }
        }

        session.recv_busy.store(false, Ordering::Release);
        self.rearm(&session);

        if session.decrement_io() {
            self.release(index);
        }
    }

    fn dispatch_frame(
        &self,
        session: &Arc<Session>,
        handle: &SessionHandle,
        packet_id: u32,
        payload: Payload,
        fatal: &mut bool,
    ) {
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| self.dispatcher.dispatch(packet_id, handle, payload)));

        match outcome {
            Ok(true) => {
                self.recv_msgs.fetch_add(1, Ordering::AcqRel);
            }
            Ok(false) => {
                let err = NetworkError::Fatal(ErrorType::UnknownPacket);
                logging::warn!(self.log, "unknown packet id";
                               "context" => "dispatch",
                               "session" => session.id().raw(),
                               "packet_id" => packet_id,
                               "error" => ?err);
                // The strict policy treats the typed error as fatal; the
                // default logs it and carries on.
                if self.config.strict_packet_ids {
                    *fatal = true;
                }
            }
            Err(_) => {
                logging::error!(self.log, "handler panicked, disconnecting session";
                                "context" => "dispatch",
                                "session" => session.id().raw(),
                                "packet_id" => packet_id);
                *fatal = true;
            }
        }
    }

    /// Send completion / send post: finish an in-progress connect if any,
    /// then run gathered sends until the queue is dry or the socket pushes
    /// back. The caller holds the send latch and one io reference.
    fn handle_send(&self, index: usize) {
        let session = self.sessions[index].clone();

        if session.connecting.load(Ordering::Acquire) {
            self.finish_connect(&session);
        }

        loop {
            if session.disconnect_flag.load(Ordering::Acquire)
                || !session.connected.load(Ordering::Acquire)
            {
                break;
            }

            // Start a gathered batch if none is in flight.
            if !session.send_flag.load(Ordering::Acquire) {
                if session.send_q.is_empty() {
                    break;
                }

                session.send_flag.store(true, Ordering::Release);
                let mut batch = session.inflight.lock();
                while batch.len() < MAX_SEND_MSG {
                    match session.send_q.pop() {
                        Some(payload) => batch.push((payload, 0)),
                        None => break,
                    }
                }
            }

            match self.write_inflight(&session) {
                SendOutcome::Complete => {
                    session.want_write.store(false, Ordering::Release);
                    session.send_flag.store(false, Ordering::Release);
                    if session.send_q.is_empty() {
                        break;
                    }
                }
                SendOutcome::Wait => {
                    session.want_write.store(true, Ordering::Release);
                    break;
                }
                SendOutcome::Fatal => {
                    self.start_disconnect(&session);
                    break;
                }
            }
        }

        session.send_busy.store(false, Ordering::Release);

        // Lost wakeup prevention: a producer may have enqueued between the
        // last pop and the latch clear.
        if !session.disconnect_flag.load(Ordering::Acquire)
            && session.connected.load(Ordering::Acquire)
            && !session.send_flag.load(Ordering::Acquire)
            && !session.send_q.is_empty()
            && session
                .send_busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            session.increment_io();
            let _ = self.tx.send(IoEvent::SendPost(index));
        }

        self.rearm(&session);

        if session.decrement_io() {
            self.release(index);
        }
    }

    /// Writes the in-flight batch, releasing each payload as it is fully
    /// handed to the kernel. Completed payloads stay released even when the
    /// batch parks on a would-block.
    fn write_inflight(&self, session: &Arc<Session>) -> SendOutcome {
        let guard = session.stream.lock();
        let stream = match guard.as_ref() {
            Some(stream) => stream,
            None => return SendOutcome::Fatal,
        };

        let mut batch = session.inflight.lock();
        let mut sent = 0u64;
        let mut outcome = SendOutcome::Complete;

        'batch: while !batch.is_empty() {
            {
                let (payload, offset) = &mut batch[0];
                let bytes = payload.frame_bytes();

                while *offset < bytes.len() {
                    match (&*stream).write(&bytes[*offset..]) {
                        Ok(0) => {
                            outcome = SendOutcome::Fatal;
                            break 'batch;
                        }
                        Ok(count) => *offset += count,
                        Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                            outcome = SendOutcome::Wait;
                            break 'batch;
                        }
                        Err(ref err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(err) => {
                            logging::debug!(self.log, "send failed";
                                            "context" => "send",
                                            "session" => session.id().raw(),
                                            "error" => %err);
                            outcome = SendOutcome::Fatal;
                            break 'batch;
                        }
                    }
                }
            }

            batch.remove(0);
            sent += 1;
        }

        if sent > 0 {
            self.sent_msgs.fetch_add(sent, Ordering::AcqRel);
        }

        outcome
    }

    fn finish_connect(&self, session: &Arc<Session>) {
        let established = {
            let guard = session.stream.lock();
            match guard.as_ref() {
                Some(stream) => match stream.take_error() {
                    Ok(None) => stream.peer_addr().is_ok(),
                    _ => false,
                },
                None => false,
            }
        };

        if established {
            session.connecting.store(false, Ordering::Release);
            session.connected.store(true, Ordering::Release);
            self.session_count.fetch_add(1, Ordering::AcqRel);

            let handle = self.handle(session.id());
            logging::info!(self.log, "connection established";
                           "context" => "connect",
                           "session" => session.id().raw());
            self.hooks.on_connect(&handle);
        } else {
            logging::debug!(self.log, "connect failed";
                            "context" => "connect",
                            "session" => session.id().raw());
            self.start_disconnect(session);
            // The receive path never ran for this occupancy; surrender its
            // standing reference here.
            if session.detach_recv() && session.decrement_io() {
                self.release(session.index);
            }
        }
    }

    // ------------------------------------------------------------------
    // Egress entry points
    // ------------------------------------------------------------------

    /// Non-blocking send: enqueue the payload and post a gathered send if
    /// none is in flight. Queueing a payload to several sessions clones the
    /// handle per target; the buffer is freed when the last send completes.
    fn send(&self, id: SessionId, payload: Payload) {
        let index = id.index();
        if index >= self.sessions.len() {
            return;
        }
        let session = &self.sessions[index];
        let _guard = session.lifecycle.lock();

        if !session.validate(id) || session.disconnect_flag.load(Ordering::Acquire) {
            return;
        }

        if session.send_q.len() >= self.config.send_queue_limit {
            logging::warn!(self.log, "send queue overflow, disconnecting";
                           "context" => "send",
                           "session" => id.raw(),
                           "queued" => session.send_q.len());
            self.start_disconnect_locked(session);
            return;
        }

        session.send_q.push(payload);

        if !session.send_flag.load(Ordering::Acquire)
            && session.connected.load(Ordering::Acquire)
            && session
                .send_busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            session.increment_io();
            let _ = self.tx.send(IoEvent::SendPost(index));
        }
    }

    fn disconnect(&self, id: SessionId) {
        let index = id.index();
        if index >= self.sessions.len() {
            return;
        }
        let session = &self.sessions[index];
        let _guard = session.lifecycle.lock();

        if !session.validate(id) {
            return;
        }

        self.start_disconnect_locked(session);
    }

    /// Marks the session for disconnection and cancels outstanding
    /// operations by shutting the socket down; the event flow then drains
    /// the io count to zero. Never closes the socket directly.
    fn start_disconnect(&self, session: &Session) {
        let _guard = session.lifecycle.lock();
        self.start_disconnect_locked(session);
    }

    fn start_disconnect_locked(&self, session: &Session) {
        if session.disconnect_flag.swap(true, Ordering::AcqRel) {
            return;
        }

        logging::debug!(self.log, "disconnect pending";
                        "context" => "disconnect",
                        "session" => session.id().raw());

        let guard = session.stream.lock();
        if let Some(stream) = guard.as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Recomputes and rearms the oneshot interest for the session from its
    /// current needs. Runs under the lifecycle guard so concurrent rearms
    /// converge on the latest state.
    fn rearm(&self, session: &Session) {
        let _guard = session.lifecycle.lock();

        if session.release_flag.load(Ordering::Acquire)
            || session.disconnect_flag.load(Ordering::Acquire)
        {
            return;
        }

        let connecting = session.connecting.load(Ordering::Acquire);
        let mut interest = Ready::empty();

        if !session.recv_detached.load(Ordering::Acquire)
            && !session.recv_busy.load(Ordering::Acquire)
            && !connecting
        {
            interest |= Ready::readable();
        }

        if (connecting || session.want_write.load(Ordering::Acquire))
            && !session.send_busy.load(Ordering::Acquire)
        {
            interest |= Ready::writable();
        }

        if interest == Ready::empty() {
            return;
        }

        let guard = session.stream.lock();
        if let Some(stream) = guard.as_ref() {
            let result = self.poll.reregister(
                stream,
                Token(session.index),
                interest,
                PollOpt::edge() | PollOpt::oneshot(),
            );
            if let Err(err) = result {
                logging::debug!(self.log, "rearm failed";
                                "context" => "rearm",
                                "session" => session.id().raw(),
                                "error" => %err);
            }
        }
    }

    /// Final teardown of one occupancy. Claims the release latch (exactly
    /// one caller wins), invokes the disconnect hook exactly once for
    /// connected sessions, frees queued payloads and recycles the slot.
    fn release(&self, index: usize) {
        let session = &self.sessions[index];
        let _guard = session.lifecycle.lock();

        if !session.try_release() {
            return;
        }

        {
            let guard = session.stream.lock();
            if let Some(stream) = guard.as_ref() {
                let _ = self.poll.deregister(stream);
            }
        }

        let was_connected = session.connected.load(Ordering::Acquire);
        let was_client = session.client.load(Ordering::Acquire);

        logging::debug!(self.log, "session released";
                        "context" => "release",
                        "session" => session.id().raw(),
                        "connected" => was_connected);

        if was_connected {
            let handle = self.handle(session.id());
            self.hooks.on_disconnect(&handle);
            self.session_count.fetch_sub(1, Ordering::AcqRel);
        }

        session.reset_resources();
        let _ = self.free.push(index);

        if was_client && !self.stopping.load(Ordering::Acquire) {
            self.schedule_reconnect();
        }
    }

    // ------------------------------------------------------------------
    // Client reconnection
    // ------------------------------------------------------------------

    fn schedule_reconnect(&self) {
        self.pending_connects.fetch_add(1, Ordering::AcqRel);
        self.reconnect_cv.notify_one();
    }

    /// Reconnect worker: wakes on demand or at the scan interval, swaps the
    /// pending counter to zero and issues that many connects. Immediate
    /// failures are put back on the counter for the next scan.
    fn reconnect_loop(&self) {
        let mut guard = self.reconnect_lock.lock();

        while self.running.load(Ordering::Acquire) {
            if !self.stopping.load(Ordering::Acquire) {
                let pending = self.pending_connects.swap(0, Ordering::AcqRel);
                let mut failed = 0;

                for _ in 0..pending {
                    if !self.initiate_connect() {
                        failed += 1;
                    }
                }

                if failed > 0 {
                    logging::debug!(self.log, "connects deferred to next scan";
                                    "context" => "reconnect", "count" => failed);
                    self.pending_connects.fetch_add(failed, Ordering::AcqRel);
                }
            }

            self.reconnect_cv.wait_for(
                &mut guard,
                Duration::from_millis(self.config.reconnect_interval_ms),
            );
        }
    }

    /// Posts one non-blocking connect. Completion (success or refusal)
    /// arrives through the poll as writable readiness on the session.
    fn initiate_connect(&self) -> bool {
        let addr = match *self.connect_addr.lock() {
            Some(addr) => addr,
            None => return true,
        };

        let stream = match TcpStream::connect(&addr) {
            Ok(stream) => stream,
            Err(err) => {
                logging::debug!(self.log, "connect post failed";
                                "context" => "reconnect", "error" => %err);
                return false;
            }
        };

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                logging::warn!(self.log, "no free session for connect"; "context" => "reconnect");
                return false;
            }
        };

        self.open_session(index, stream, addr, true);
        true
    }

    // ------------------------------------------------------------------
    // Timeout sweep
    // ------------------------------------------------------------------

    fn timeout_loop(&self) {
        while self.running.load(Ordering::Acquire) {
            let mut slept: u64 = 0;
            while slept < self.config.timeout_cycle_ms && self.running.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(100));
                slept += 100;
            }

            if !self.running.load(Ordering::Acquire) {
                return;
            }

            let now = timestamp_millis();
            for session in self.sessions.iter() {
                if session.release_flag.load(Ordering::Acquire)
                    || !session.connected.load(Ordering::Acquire)
                {
                    continue;
                }

                let last = session.last_recv_ms.load(Ordering::Acquire);
                if now.saturating_sub(last) >= self.config.timeout_ms {
                    logging::info!(self.log, "session timed out";
                                   "context" => "timeout",
                                   "session" => session.id().raw());
                    self.start_disconnect(session);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Misc
    // ------------------------------------------------------------------

    fn session(&self, id: SessionId) -> Option<&Arc<Session>> {
        self.sessions.get(id.index())
    }

    fn handle(&self, id: SessionId) -> SessionHandle {
        let core = self.self_ref.upgrade().expect("Reactor core must outlive its workers");
        SessionHandle { core, id }
    }

    fn stats(&self) -> NetStats {
        NetStats {
            sessions: self.session_count.load(Ordering::Acquire),
            accept_total: self.accept_total.load(Ordering::Acquire),
            rejected: self.rejected.load(Ordering::Acquire),
            recv_msgs: self.recv_msgs.load(Ordering::Acquire),
            sent_msgs: self.sent_msgs.load(Ordering::Acquire),
            pending_connects: self.pending_connects.load(Ordering::Acquire),
        }
    }
}
