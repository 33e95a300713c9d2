//! The single-threaded, non-blocking event loop (spec §4.6): accept,
//! read, dispatch, write, repeat. Connection lifecycle and replication
//! fan-out both live here since both need the full connection registry
//! at once.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use kvstore::Store;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};

use crate::connection::{ConnRole, Connection};
use crate::replica_link::{self, FullResync, HandshakeBuf, HandshakeState};
use dispatcher::{ServerInfo, SpecialAction};

const LISTENER: Token = Token(0);
const MASTER_LINK: Token = Token(1);
const FIRST_CLIENT_TOKEN: usize = 2;

/// Runs the event loop until a shutdown signal arrives. `store` and
/// `info` are expected to already reflect whatever was loaded from disk
/// (or left empty) before this is called.
pub struct EventLoop {
    poll: Poll,
    listener: TcpListener,
    connections: HashMap<Token, Connection>,
    replica_tokens: HashSet<Token>,
    next_token: usize,
    store: Store,
    info: ServerInfo,
    master_handshake: Option<(HandshakeState, HandshakeBuf)>,
    /// Set once the initial `PING` has been written to the master link.
    /// `connect()` on a non-blocking socket completes asynchronously, so
    /// the first byte can only go out once a writable-readiness event
    /// confirms the connection is actually up.
    master_ping_sent: bool,
    shutdown: Arc<AtomicBool>,
}

impl EventLoop {
    pub fn new(port: u16, store: Store, info: ServerInfo) -> io::Result<Self> {
        let mut listener = bind_listener(port)?;
        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))?;
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))?;

        Ok(Self {
            poll,
            listener,
            connections: HashMap::new(),
            replica_tokens: HashSet::new(),
            next_token: FIRST_CLIENT_TOKEN,
            store,
            info,
            master_handshake: None,
            master_ping_sent: false,
            shutdown,
        })
    }

    /// The port actually bound, useful when constructed with port `0` so
    /// the OS picks an ephemeral one (tests, mainly).
    pub fn local_port(&self) -> io::Result<u16> {
        self.listener.local_addr().map(|addr| addr.port())
    }

    /// A handle to the shutdown flag that normally only `SIGINT`/`SIGTERM`
    /// set. Lets an embedding test stop [`Self::run`] without sending a
    /// real signal to the whole test process.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Dials `host:port`, registers the link as [`MASTER_LINK`], and
    /// kicks off the handshake with the initial `PING`. The connection
    /// isn't usable for ordinary command traffic until the handshake
    /// reaches [`HandshakeState::Ready`].
    pub fn connect_to_master(&mut self, host: &str, port: u16) -> io::Result<()> {
        let addr = format!("{host}:{port}")
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("bad master address: {e}")))?;
        let mut stream = TcpStream::connect(addr)?;
        self.poll
            .registry()
            .register(&mut stream, MASTER_LINK, Interest::READABLE | Interest::WRITABLE)?;
        let conn = Connection::new(stream, MASTER_LINK, ConnRole::MasterLink)?;
        self.connections.insert(MASTER_LINK, conn);
        self.master_handshake = Some((HandshakeState::AwaitPingReply, HandshakeBuf::default()));
        self.master_ping_sent = false;
        Ok(())
    }

    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(1024);
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                tracing::info!("shutdown signal received");
                self.save_snapshot();
                return Ok(());
            }
            match self.poll.poll(&mut events, Some(Duration::from_millis(200))) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in &events {
                let token = event.token();
                if token == LISTENER {
                    self.accept_all()?;
                    continue;
                }
                if self.master_handshake.is_some() && token == MASTER_LINK {
                    if !self.master_ping_sent && event.is_writable() {
                        if let Err(e) = self.send_initial_ping() {
                            tracing::error!(error = %e, "failed to send initial PING to master");
                            return Err(e);
                        }
                    }
                    if event.is_readable() {
                        if let Err(e) = self.drive_handshake() {
                            tracing::error!(error = %e, "replication handshake failed");
                            return Err(e);
                        }
                    }
                    continue;
                }
                self.service_connection(token);
            }
        }
    }

    fn accept_all(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    stream.set_nodelay(true)?;
                    self.poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE)?;
                    let conn = Connection::new(stream, token, ConnRole::Regular)?;
                    self.connections.insert(token, conn);
                    tracing::debug!(%addr, ?token, "accepted connection");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn send_initial_ping(&mut self) -> io::Result<()> {
        use std::io::Write;
        let Some(conn) = self.connections.get_mut(&MASTER_LINK) else { return Ok(()) };
        let ping = resp::bulk_string_array(&[Some(b"PING".as_slice())]);
        conn.stream.write_all(&ping)?;
        self.master_ping_sent = true;
        Ok(())
    }

    fn drive_handshake(&mut self) -> io::Result<()> {
        let Some(conn) = self.connections.get_mut(&MASTER_LINK) else { return Ok(()) };
        let Some((state, scratch)) = self.master_handshake.as_mut() else { return Ok(()) };

        let closed = scratch.fill(&mut conn.stream)?;
        if closed {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "master closed connection during handshake"));
        }
        let listening_port = self.info.port;
        let result = replica_link::advance(state, &mut conn.stream, scratch, listening_port)?;
        let Some(FullResync { master_replid, master_repl_offset, snapshot }) = result else {
            return Ok(());
        };

        rdb::apply_transfer(&snapshot, &mut self.store)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        self.info.master_replid = master_replid;
        self.info.master_repl_offset = master_repl_offset;

        let remainder = scratch.take_remainder();
        self.master_handshake = None;
        tracing::info!(offset = master_repl_offset, "full resync complete");

        if !remainder.is_empty() {
            let conn = self.connections.get_mut(&MASTER_LINK).expect("just looked it up");
            conn.parser
                .feed(&mut conn.sink, &remainder)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        }
        self.drain_completed_commands(MASTER_LINK);
        Ok(())
    }

    fn service_connection(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else { return };

        let closed = match conn.read_available() {
            Ok(closed) => closed,
            Err(e) => {
                tracing::debug!(?token, error = %e, "read error, closing connection");
                self.close_connection(token);
                return;
            }
        };

        if let Err(e) = conn.pump_parser() {
            tracing::debug!(?token, error = %e, "protocol error, closing connection");
            self.close_connection(token);
            return;
        }

        self.drain_completed_commands(token);

        let Some(conn) = self.connections.get_mut(&token) else { return };
        if let Err(e) = conn.flush_output() {
            tracing::debug!(?token, error = %e, "write error, closing connection");
            self.close_connection(token);
            return;
        }

        if closed && conn.output.is_empty() {
            self.close_connection(token);
        }
    }

    /// Dispatches every command the named connection's parser has fully
    /// assembled since the last pump, applying replication side effects.
    fn drain_completed_commands(&mut self, token: Token) {
        loop {
            let Some(conn) = self.connections.get_mut(&token) else { return };
            let Some(cmd) = conn.sink.completed.pop_front() else { return };
            if cmd.is_empty() {
                continue;
            }

            let outcome = dispatcher::dispatch(&mut self.store, &mut self.info, &cmd);

            if let Some(SpecialAction::BeginFullResync { snapshot }) = outcome.special {
                self.begin_full_resync(token, outcome.reply, snapshot);
                continue;
            }

            let is_master_link = self
                .connections
                .get(&token)
                .is_some_and(|c| c.role == ConnRole::MasterLink);

            if is_master_link {
                // Applied writes from our own master never get a reply
                // sent back upstream; an ACK is the only thing we send.
                self.send_replica_ack(token, &cmd);
            } else {
                self.queue_and_flush(token, &outcome.reply);
                if outcome.propagate {
                    self.propagate(&cmd);
                }
            }
        }
    }

    fn begin_full_resync(&mut self, token: Token, reply: Vec<u8>, snapshot: Vec<u8>) {
        if let Some(conn) = self.connections.get_mut(&token) {
            conn.role = ConnRole::Replica;
        }
        self.queue_and_flush(token, &reply);
        self.queue_and_flush(token, format!("${}\r\n", snapshot.len()).as_bytes());
        self.queue_and_flush(token, &snapshot);
        self.replica_tokens.insert(token);
        self.info.connected_replicas = self.replica_tokens.len();
    }

    /// Re-encodes `cmd` into canonical RESP array form and fans it out
    /// to every attached replica, bumping the replication offset by the
    /// encoded length.
    fn propagate(&mut self, cmd: &[Bytes]) {
        let refs: Vec<Option<&[u8]>> = cmd.iter().map(|a| Some(a.as_ref())).collect();
        let encoded = resp::bulk_string_array(&refs);
        self.info.master_repl_offset += encoded.len() as u64;
        for token in self.replica_tokens.clone() {
            self.queue_and_flush(token, &encoded);
        }
    }

    fn send_replica_ack(&mut self, token: Token, cmd: &[Bytes]) {
        let refs: Vec<Option<&[u8]>> = cmd.iter().map(|a| Some(a.as_ref())).collect();
        let encoded_len = resp::bulk_string_array(&refs).len() as u64;
        self.info.master_repl_offset += encoded_len;
        let offset = self.info.master_repl_offset;
        let ack = resp::bulk_string_array(&[
            Some(b"REPLCONF".as_slice()),
            Some(b"ACK".as_slice()),
            Some(offset.to_string().as_bytes()),
        ]);
        self.queue_and_flush(token, &ack);
    }

    /// Queues `bytes` on `token`'s connection and immediately attempts a
    /// non-blocking flush, rather than waiting for that connection's own
    /// next readable event. Needed because a command on one connection
    /// (e.g. a client write that must propagate) can produce output for
    /// an entirely different, otherwise-idle connection (an attached
    /// replica) that has no other reason to be serviced this tick.
    fn queue_and_flush(&mut self, token: Token, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let Some(conn) = self.connections.get_mut(&token) else { return };
        conn.queue_output(bytes);
        if let Err(e) = conn.flush_output() {
            tracing::debug!(?token, error = %e, "write error, closing connection");
            self.close_connection(token);
        }
    }

    fn close_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
        }
        if self.replica_tokens.remove(&token) {
            self.info.connected_replicas = self.replica_tokens.len();
        }
    }

    fn save_snapshot(&self) {
        if let Err(e) = rdb::save(&self.store, &self.info.dir, &self.info.dbfilename) {
            tracing::error!(error = %e, "failed to save snapshot on shutdown");
        }
    }
}

/// Minimum send buffer spec §6 asks for, so a slow reader doesn't force
/// small writes to block/queue in `output_backlog` sooner than
/// necessary.
const MIN_SEND_BUFFER: usize = 1024 * 1024;

/// Builds the listening socket with `SO_REUSEADDR` and a floor on
/// `SO_SNDBUF` set before `listen()`, then hands it to `mio` as a
/// non-blocking listener. `mio::net::TcpListener::bind` doesn't expose
/// these options, hence going through `socket2` to build the raw
/// socket first.
fn bind_listener(port: u16) -> io::Result<TcpListener> {
    let addr: std::net::SocketAddr = (std::net::Ipv4Addr::LOCALHOST, port).into();
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if socket.send_buffer_size().unwrap_or(0) < MIN_SEND_BUFFER {
        socket.set_send_buffer_size(MIN_SEND_BUFFER)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}
