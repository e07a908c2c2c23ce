//! Readiness-multiplexed server runtime.
//!
//! One `mio` poll drives every socket: the listener under `Token(0)` and one
//! token per connection, derived from its stable [`ConnId`]. The reactor owns
//! sockets and I/O progress; every protocol decision is delegated to the
//! sans-IO [`ServerEngine`], whose actions the reactor executes in order.
//!
//! Registration is edge-triggered, so accepts and reads always drain until
//! `WouldBlock`. Writes are attempted eagerly when queued; only when the
//! kernel pushes back does the connection pick up writable interest, dropped
//! again once the queue drains.

use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use chatframe_core::{
    io::{FrameRecv, FrameSend, IoFailure},
    server::{ServerAction, ServerEngine, ServerEvent},
    store::{BlobStore, UserStore},
    table::{ConnId, ConnTable},
};
use mio::{
    Events, Interest, Poll, Token,
    net::{TcpListener, TcpStream},
};
use tracing::{debug, trace, warn};

use crate::error::ServerError;

const LISTENER: Token = Token(0);

fn token_of(id: ConnId) -> Token {
    Token(usize::try_from(id.raw()).unwrap_or(usize::MAX))
}

/// One registered connection: the socket plus its resumable I/O state.
struct Socket {
    stream: TcpStream,
    recv: FrameRecv,
    send: FrameSend,
    /// Receive side is in raw-body mode.
    body_mode: bool,
    /// Engine ordered a close; flush what is queued, then drop.
    closing: bool,
    /// Currently registered with writable interest.
    writable_interest: bool,
}

impl Socket {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            recv: FrameRecv::command(),
            send: FrameSend::new(),
            body_mode: false,
            closing: false,
            writable_interest: false,
        }
    }
}

/// The production server: listener, poll loop, and socket table around a
/// [`ServerEngine`].
pub struct Server<U, B> {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    engine: ServerEngine<U, B>,
    socks: ConnTable<Socket>,
}

impl<U: UserStore, B: BlobStore> Server<U, B> {
    /// Bind `addr` and wrap `engine`.
    pub fn bind(addr: SocketAddr, engine: ServerEngine<U, B>) -> Result<Self, ServerError> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(addr)?;
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;
        Ok(Self { poll, events: Events::with_capacity(256), listener, engine, socks: ConnTable::new() })
    }

    /// The bound listening address.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Run forever. The server has no shutdown path of its own; per-spec it
    /// waits indefinitely for activity.
    pub fn run(&mut self) -> Result<(), ServerError> {
        loop {
            self.turn(None)?;
        }
    }

    /// One reactor turn: wait for readiness, then service every ready token.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<(), ServerError> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|e| (e.token(), e.is_readable(), e.is_writable()))
            .collect();

        for (token, readable, writable) in ready {
            if token == LISTENER {
                self.accept_all()?;
                continue;
            }
            let id = ConnId::from_raw(token.0 as u64);
            if writable {
                self.flush(id);
            }
            if readable {
                self.drain_read(id);
            }
        }
        Ok(())
    }

    /// Accept until the backlog is empty; edge-triggered listeners only
    /// signal once per batch.
    fn accept_all(&mut self) -> Result<(), ServerError> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let id = self.socks.allocate(Socket::new(stream));
                    debug!(%id, %peer, "accepted");
                    let registered = {
                        let Some(sock) = self.socks.get_mut(id) else { continue };
                        self.poll.registry().register(
                            &mut sock.stream,
                            token_of(id),
                            Interest::READABLE,
                        )
                    };
                    if let Err(e) = registered {
                        warn!(%id, error = %e, "failed to register connection");
                        self.socks.remove(id);
                        continue;
                    }
                    let actions = self.engine.process_event(ServerEvent::Accepted { conn: id });
                    self.apply(actions);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read until the socket runs dry, feeding each completed frame or body
    /// to the engine.
    fn drain_read(&mut self, id: ConnId) {
        loop {
            let polled = {
                let Some(sock) = self.socks.get_mut(id) else { return };
                if sock.closing {
                    return;
                }
                sock.recv.poll(&mut sock.stream)
            };
            match polled {
                Ok(Some(buf)) => {
                    let event = {
                        let Some(sock) = self.socks.get_mut(id) else { return };
                        if sock.body_mode {
                            sock.body_mode = false;
                            ServerEvent::Body { conn: id, data: buf }
                        } else {
                            ServerEvent::Frame { conn: id, bytes: buf }
                        }
                    };
                    let actions = self.engine.process_event(event);
                    self.apply(actions);
                }
                Ok(None) => return,
                Err(IoFailure::PeerClosed) => {
                    self.peer_closed(id);
                    return;
                }
                Err(IoFailure::Fatal(e)) => {
                    warn!(%id, error = %e, "read failed");
                    self.peer_closed(id);
                    return;
                }
            }
        }
    }

    /// Execute engine actions in order.
    fn apply(&mut self, actions: Vec<ServerAction>) {
        for action in actions {
            match action {
                ServerAction::SendFrame { conn, msg } => match msg.encode() {
                    Ok(frame) => self.queue(conn, Bytes::from(frame)),
                    Err(e) => warn!(%conn, error = %e, "dropping unencodable frame"),
                },
                ServerAction::SendBytes { conn, data } => self.queue(conn, data),
                ServerAction::ExpectBody { conn, len } => {
                    trace!(%conn, len, "switching to body mode");
                    let armed = match self.socks.get_mut(conn) {
                        Some(sock) => match sock.recv.expect(len) {
                            Ok(()) => {
                                sock.body_mode = true;
                                true
                            }
                            Err(e) => {
                                warn!(%conn, len, error = %e, "cannot buffer body");
                                false
                            }
                        },
                        None => true,
                    };
                    if !armed {
                        self.peer_closed(conn);
                    }
                }
                ServerAction::Close { conn } => self.flush_close(conn),
            }
        }
    }

    /// Queue bytes and push them out as far as the kernel allows right now.
    fn queue(&mut self, id: ConnId, data: Bytes) {
        let Some(sock) = self.socks.get_mut(id) else {
            trace!(%id, "dropping bytes for closed connection");
            return;
        };
        sock.send.push(data);
        self.flush(id);
    }

    /// Write until drained or `WouldBlock`, managing writable interest and
    /// deferred closes.
    fn flush(&mut self, id: ConnId) {
        let polled = {
            let Some(sock) = self.socks.get_mut(id) else { return };
            sock.send.poll(&mut sock.stream)
        };
        match polled {
            Ok(true) => {
                let closing = self.socks.get(id).is_some_and(|s| s.closing);
                if closing {
                    self.remove_socket(id);
                } else {
                    self.want_writable(id, false);
                }
            }
            Ok(false) => self.want_writable(id, true),
            Err(e) => {
                if let IoFailure::Fatal(e) = &e {
                    warn!(%id, error = %e, "write failed");
                }
                let closing = self.socks.get(id).is_some_and(|s| s.closing);
                if closing {
                    // Engine already forgot this connection.
                    self.remove_socket(id);
                } else {
                    self.peer_closed(id);
                }
            }
        }
    }

    /// Engine-ordered close: flush the queue first, then drop the socket.
    fn flush_close(&mut self, id: ConnId) {
        let idle = {
            let Some(sock) = self.socks.get_mut(id) else { return };
            sock.closing = true;
            sock.send.is_idle()
        };
        if idle {
            self.remove_socket(id);
        } else {
            self.flush(id);
        }
    }

    /// The peer went away on its own; tell the engine, then drop the socket.
    fn peer_closed(&mut self, id: ConnId) {
        debug!(%id, "peer closed");
        let actions = self.engine.process_event(ServerEvent::Closed { conn: id });
        self.apply(actions);
        self.remove_socket(id);
    }

    fn remove_socket(&mut self, id: ConnId) {
        if let Some(mut sock) = self.socks.remove(id) {
            if let Err(e) = self.poll.registry().deregister(&mut sock.stream) {
                trace!(%id, error = %e, "deregister failed");
            }
            let _ = sock.stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn want_writable(&mut self, id: ConnId, want: bool) {
        let interest = if want {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        let Some(sock) = self.socks.get_mut(id) else { return };
        if sock.writable_interest == want {
            return;
        }
        sock.writable_interest = want;
        if let Err(e) = self.poll.registry().reregister(&mut sock.stream, token_of(id), interest) {
            warn!(%id, error = %e, "reregister failed");
        }
    }
}
