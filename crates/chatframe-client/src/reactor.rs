//! Readiness-multiplexed client runtime.
//!
//! One `mio` poll drives the control connection under `Token(0)` plus one
//! token per auxiliary transfer leg. Protocol decisions live in the sans-IO
//! [`ClientEngine`]; this reactor owns sockets, the parsed script, and the
//! delay timer.
//!
//! Script pacing: one command is issued per reactor turn, and only while no
//! delay is pending and no transfer occupies the client. `DELAY ms` becomes
//! the poll timeout, so the wait costs nothing and inbound frames are still
//! serviced while it runs.

use std::{
    collections::VecDeque,
    io::Write as _,
    net::SocketAddr,
    time::{Duration, Instant},
};

use bytes::Bytes;
use chatframe_core::{
    client::{ClientAction, ClientEngine, ClientEvent},
    io::{FrameRecv, FrameSend, IoFailure},
    store::BlobStore,
    table::{ConnId, ConnTable},
};
use mio::{
    Events, Interest, Poll, Token,
    net::TcpStream,
};
use tracing::{debug, trace, warn};

use crate::{error::ClientError, script::ScriptCommand};

const CONTROL: Token = Token(0);

fn token_of(id: ConnId) -> Token {
    Token(usize::try_from(id.raw()).unwrap_or(usize::MAX))
}

/// One auxiliary transfer leg.
struct Aux {
    stream: TcpStream,
    recv: FrameRecv,
    send: FrameSend,
    body_mode: bool,
    /// Non-blocking connect still in flight.
    connecting: bool,
    /// Engine ordered a close; flush, then drop.
    closing: bool,
    writable_interest: bool,
}

impl Aux {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            recv: FrameRecv::command(),
            send: FrameSend::new(),
            body_mode: false,
            connecting: true,
            closing: false,
            writable_interest: true,
        }
    }
}

/// The scripted client: control leg, auxiliary legs, and the script cursor
/// around a [`ClientEngine`].
pub struct ClientReactor<B> {
    poll: Poll,
    events: Events,
    server_addr: SocketAddr,
    control: TcpStream,
    control_recv: FrameRecv,
    control_send: FrameSend,
    control_connecting: bool,
    control_writable: bool,
    control_open: bool,
    engine: ClientEngine<B>,
    auxes: ConnTable<Aux>,
    script: VecDeque<ScriptCommand>,
    delay_until: Option<Instant>,
    delivered: Vec<String>,
    quit: bool,
}

impl<B: BlobStore> ClientReactor<B> {
    /// Dial `server_addr` and prepare to run `script`.
    pub fn connect(
        server_addr: SocketAddr,
        engine: ClientEngine<B>,
        script: Vec<ScriptCommand>,
    ) -> Result<Self, ClientError> {
        let poll = Poll::new()?;
        let mut control = TcpStream::connect(server_addr)?;
        poll.registry().register(
            &mut control,
            CONTROL,
            Interest::READABLE | Interest::WRITABLE,
        )?;
        Ok(Self {
            poll,
            events: Events::with_capacity(64),
            server_addr,
            control,
            control_recv: FrameRecv::command(),
            control_send: FrameSend::new(),
            control_connecting: true,
            control_writable: true,
            control_open: true,
            engine,
            auxes: ConnTable::new(),
            script: script.into(),
            delay_until: None,
            delivered: Vec::new(),
            quit: false,
        })
    }

    /// Lines delivered to the user so far, oldest first.
    pub fn delivered(&self) -> &[String] {
        &self.delivered
    }

    /// The engine, for post-run inspection.
    pub fn engine(&self) -> &ClientEngine<B> {
        &self.engine
    }

    /// Run until the script is exhausted and every transfer has drained, or
    /// the control connection closes.
    pub fn run(&mut self) -> Result<(), ClientError> {
        while !self.finished() {
            self.pump_script()?;
            if self.finished() {
                break;
            }
            let timeout = self.next_timeout();
            self.turn(timeout)?;
            if let Some(until) = self.delay_until {
                if Instant::now() >= until {
                    self.delay_until = None;
                }
            }
        }
        Ok(())
    }

    fn finished(&self) -> bool {
        if self.quit || !self.control_open {
            return true;
        }
        self.script.is_empty()
            && self.delay_until.is_none()
            && !self.engine.transfer_busy()
            && self.control_send.is_idle()
            && self.auxes.is_empty()
    }

    /// Whether the next script command may be issued this turn.
    fn may_issue(&self) -> bool {
        !self.script.is_empty()
            && self.delay_until.is_none()
            && !self.engine.transfer_busy()
            && !self.control_connecting
    }

    /// Issue at most one script command.
    fn pump_script(&mut self) -> Result<(), ClientError> {
        if !self.may_issue() {
            return Ok(());
        }
        match self.script.pop_front() {
            Some(ScriptCommand::Delay(ms)) => {
                debug!(ms, "script delay");
                self.delay_until = Some(Instant::now() + Duration::from_millis(ms));
                Ok(())
            }
            Some(ScriptCommand::Wire(msg)) => {
                trace!(%msg, "issuing script command");
                let actions = self.engine.process_event(ClientEvent::Command(msg));
                self.apply(actions)
            }
            None => Ok(()),
        }
    }

    /// Poll timeout for this turn: the remaining delay, zero when another
    /// command is already eligible, unbounded otherwise.
    fn next_timeout(&self) -> Option<Duration> {
        if let Some(until) = self.delay_until {
            return Some(until.saturating_duration_since(Instant::now()));
        }
        if self.may_issue() {
            return Some(Duration::ZERO);
        }
        None
    }

    /// One reactor turn: wait for readiness, then service every ready token.
    fn turn(&mut self, timeout: Option<Duration>) -> Result<(), ClientError> {
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
            if token == CONTROL {
                if writable {
                    self.control_writable_ready()?;
                }
                if readable {
                    self.drain_control()?;
                }
                continue;
            }
            let id = ConnId::from_raw(token.0 as u64);
            if writable {
                self.aux_writable_ready(id)?;
            }
            if readable {
                self.drain_aux(id)?;
            }
        }
        Ok(())
    }

    fn control_writable_ready(&mut self) -> Result<(), ClientError> {
        if self.control_connecting {
            if let Some(e) = self.control.take_error()? {
                return Err(ClientError::Io(e));
            }
            debug!(addr = %self.server_addr, "control connection established");
            self.control_connecting = false;
        }
        self.flush_control()
    }

    fn flush_control(&mut self) -> Result<(), ClientError> {
        if self.control_connecting || !self.control_open {
            return Ok(());
        }
        match self.control_send.poll(&mut self.control) {
            Ok(drained) => self.set_control_writable(!drained),
            Err(IoFailure::PeerClosed) => self.control_closed(),
            Err(IoFailure::Fatal(e)) => Err(ClientError::Io(e)),
        }
    }

    fn set_control_writable(&mut self, want: bool) -> Result<(), ClientError> {
        if self.control_writable == want {
            return Ok(());
        }
        self.control_writable = want;
        let interest = if want {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        self.poll.registry().reregister(&mut self.control, CONTROL, interest)?;
        Ok(())
    }

    fn drain_control(&mut self) -> Result<(), ClientError> {
        loop {
            if !self.control_open {
                return Ok(());
            }
            match self.control_recv.poll(&mut self.control) {
                Ok(Some(bytes)) => {
                    let actions =
                        self.engine.process_event(ClientEvent::ControlFrame { bytes });
                    self.apply(actions)?;
                }
                Ok(None) => return Ok(()),
                Err(IoFailure::PeerClosed) => return self.control_closed(),
                Err(IoFailure::Fatal(e)) => return Err(ClientError::Io(e)),
            }
        }
    }

    fn control_closed(&mut self) -> Result<(), ClientError> {
        debug!("control connection closed by server");
        self.control_open = false;
        let actions = self.engine.process_event(ClientEvent::ControlClosed);
        self.apply(actions)
    }

    fn aux_writable_ready(&mut self, id: ConnId) -> Result<(), ClientError> {
        // A failed dial only costs the transfer this leg was for; everything
        // else keeps running.
        let dialed = {
            let Some(aux) = self.auxes.get_mut(id) else { return Ok(()) };
            if aux.connecting {
                match aux.stream.take_error()? {
                    Some(e) => Some(Err(e)),
                    None => {
                        aux.connecting = false;
                        Some(Ok(()))
                    }
                }
            } else {
                None
            }
        };
        match dialed {
            Some(Err(e)) => {
                warn!(%id, error = %e, "auxiliary connect failed");
                self.remove_aux(id);
                let actions = self.engine.process_event(ClientEvent::AuxFailed);
                self.apply(actions)
            }
            Some(Ok(())) => {
                debug!(%id, "auxiliary leg established");
                let actions = self.engine.process_event(ClientEvent::AuxOpened { conn: id });
                self.apply(actions)?;
                self.flush_aux(id)
            }
            None => self.flush_aux(id),
        }
    }

    fn drain_aux(&mut self, id: ConnId) -> Result<(), ClientError> {
        loop {
            let polled = {
                let Some(aux) = self.auxes.get_mut(id) else { return Ok(()) };
                if aux.connecting || aux.closing {
                    return Ok(());
                }
                aux.recv.poll(&mut aux.stream)
            };
            match polled {
                Ok(Some(buf)) => {
                    let event = {
                        let Some(aux) = self.auxes.get_mut(id) else { return Ok(()) };
                        if aux.body_mode {
                            aux.body_mode = false;
                            ClientEvent::AuxBody { conn: id, data: buf }
                        } else {
                            ClientEvent::AuxFrame { conn: id, bytes: buf }
                        }
                    };
                    let actions = self.engine.process_event(event);
                    self.apply(actions)?;
                }
                Ok(None) => return Ok(()),
                Err(IoFailure::PeerClosed) => {
                    self.remove_aux(id);
                    let actions = self.engine.process_event(ClientEvent::AuxClosed { conn: id });
                    return self.apply(actions);
                }
                Err(IoFailure::Fatal(e)) => {
                    warn!(%id, error = %e, "auxiliary read failed");
                    self.remove_aux(id);
                    let actions = self.engine.process_event(ClientEvent::AuxClosed { conn: id });
                    return self.apply(actions);
                }
            }
        }
    }

    fn flush_aux(&mut self, id: ConnId) -> Result<(), ClientError> {
        let polled = {
            let Some(aux) = self.auxes.get_mut(id) else { return Ok(()) };
            if aux.connecting {
                return Ok(());
            }
            aux.send.poll(&mut aux.stream)
        };
        match polled {
            Ok(true) => {
                let closing = self.auxes.get(id).is_some_and(|a| a.closing);
                if closing {
                    self.remove_aux(id);
                    Ok(())
                } else {
                    self.set_aux_writable(id, false)
                }
            }
            Ok(false) => self.set_aux_writable(id, true),
            Err(IoFailure::PeerClosed | IoFailure::Fatal(_)) => {
                let closing = self.auxes.get(id).is_some_and(|a| a.closing);
                self.remove_aux(id);
                if closing {
                    Ok(())
                } else {
                    let actions = self.engine.process_event(ClientEvent::AuxClosed { conn: id });
                    self.apply(actions)
                }
            }
        }
    }

    fn set_aux_writable(&mut self, id: ConnId, want: bool) -> Result<(), ClientError> {
        let interest = if want {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        let registry = self.poll.registry();
        let Some(aux) = self.auxes.get_mut(id) else { return Ok(()) };
        if aux.writable_interest == want {
            return Ok(());
        }
        aux.writable_interest = want;
        registry.reregister(&mut aux.stream, token_of(id), interest)?;
        Ok(())
    }

    fn remove_aux(&mut self, id: ConnId) {
        if let Some(mut aux) = self.auxes.remove(id) {
            if let Err(e) = self.poll.registry().deregister(&mut aux.stream) {
                trace!(%id, error = %e, "deregister failed");
            }
            let _ = aux.stream.shutdown(std::net::Shutdown::Both);
        }
    }

    /// Execute engine actions in order.
    fn apply(&mut self, actions: Vec<ClientAction>) -> Result<(), ClientError> {
        for action in actions {
            match action {
                ClientAction::SendControl(msg) => match msg.encode() {
                    Ok(frame) => {
                        self.control_send.push(Bytes::from(frame));
                        self.flush_control()?;
                    }
                    Err(e) => warn!(error = %e, "dropping unencodable frame"),
                },
                ClientAction::OpenAux => self.open_aux()?,
                ClientAction::SendAux { conn, msg } => match msg.encode() {
                    Ok(frame) => self.queue_aux(conn, Bytes::from(frame))?,
                    Err(e) => warn!(%conn, error = %e, "dropping unencodable frame"),
                },
                ClientAction::SendAuxBytes { conn, data } => self.queue_aux(conn, data)?,
                ClientAction::ExpectAuxBody { conn, len } => {
                    trace!(%conn, len, "switching to body mode");
                    let armed = match self.auxes.get_mut(conn) {
                        Some(aux) => match aux.recv.expect(len) {
                            Ok(()) => {
                                aux.body_mode = true;
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
                        self.remove_aux(conn);
                        let actions =
                            self.engine.process_event(ClientEvent::AuxClosed { conn });
                        self.apply(actions)?;
                    }
                }
                ClientAction::CloseAux { conn } => self.close_aux(conn),
                ClientAction::Deliver { text } => self.deliver(text),
                ClientAction::Quit => self.quit = true,
            }
        }
        Ok(())
    }

    /// Dial a fresh auxiliary connection for the engine's oldest pending
    /// transfer. A dial that fails outright drops that transfer only.
    fn open_aux(&mut self) -> Result<(), ClientError> {
        let stream = match TcpStream::connect(self.server_addr) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(addr = %self.server_addr, error = %e, "auxiliary dial failed");
                let actions = self.engine.process_event(ClientEvent::AuxFailed);
                return self.apply(actions);
            }
        };
        let id = self.auxes.allocate(Aux::new(stream));
        debug!(%id, "dialing auxiliary leg");
        let registered = {
            let registry = self.poll.registry();
            let Some(aux) = self.auxes.get_mut(id) else { return Ok(()) };
            registry.register(
                &mut aux.stream,
                token_of(id),
                Interest::READABLE | Interest::WRITABLE,
            )
        };
        if let Err(e) = registered {
            warn!(%id, error = %e, "failed to register auxiliary leg");
            self.remove_aux(id);
            let actions = self.engine.process_event(ClientEvent::AuxFailed);
            return self.apply(actions);
        }
        Ok(())
    }

    fn queue_aux(&mut self, id: ConnId, data: Bytes) -> Result<(), ClientError> {
        let Some(aux) = self.auxes.get_mut(id) else {
            trace!(%id, "dropping bytes for closed auxiliary leg");
            return Ok(());
        };
        aux.send.push(data);
        self.flush_aux(id)
    }

    /// Engine-ordered close: flush the queue first, then drop the leg.
    fn close_aux(&mut self, id: ConnId) {
        let idle = {
            let Some(aux) = self.auxes.get_mut(id) else { return };
            aux.closing = true;
            aux.send.is_idle()
        };
        if idle {
            self.remove_aux(id);
        } else if let Err(e) = self.flush_aux(id) {
            warn!(%id, error = %e, "flush on close failed");
            self.remove_aux(id);
        }
    }

    fn deliver(&mut self, text: String) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{text}") {
            trace!(error = %e, "stdout unavailable");
        }
        self.delivered.push(text);
    }
}
