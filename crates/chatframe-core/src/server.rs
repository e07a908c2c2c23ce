//! Action-based server engine.
//!
//! The engine owns every piece of server state (connection roles, sessions,
//! stores) and is driven entirely by [`ServerEvent`]s fed in by a runtime.
//! It returns [`ServerAction`]s describing what to put on which wire; it
//! performs no I/O itself, which keeps the whole protocol testable without a
//! socket in sight.

use bytes::Bytes;
use chatframe_proto::{Message, ProtocolError};
use tracing::{debug, info, warn};

use crate::{
    router::{self, RouteError},
    session::{NameRejection, SessionRegistry, validate_credentials},
    store::{BlobStore, StoreError, UserStore},
    table::{ConnId, ConnTable},
    transfer::{MAX_TRANSFER_SIZE, NotifyScope, PendingUpload},
};

/// Server tuning knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrent connections, auxiliary legs included.
    pub max_connections: usize,
    /// Largest accepted declared upload size, in bytes.
    pub max_transfer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { max_connections: 18, max_transfer_size: MAX_TRANSFER_SIZE }
    }
}

/// Events the server engine processes.
///
/// Produced by the runtime (production reactor or tests).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new connection was accepted under a runtime-allocated ID.
    Accepted {
        /// The new connection.
        conn: ConnId,
    },
    /// A complete command frame arrived.
    Frame {
        /// Originating connection.
        conn: ConnId,
        /// The raw frame, padding included.
        bytes: Vec<u8>,
    },
    /// A complete raw body arrived, as previously requested via
    /// [`ServerAction::ExpectBody`].
    Body {
        /// Originating connection.
        conn: ConnId,
        /// The full body.
        data: Vec<u8>,
    },
    /// The peer closed the connection (or it failed).
    Closed {
        /// The connection that went away.
        conn: ConnId,
    },
}

/// Actions the engine asks the runtime to execute, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    /// Queue one command frame.
    SendFrame {
        /// Target connection.
        conn: ConnId,
        /// Message to encode and send.
        msg: Message,
    },
    /// Queue raw bytes (a file body, after its header frame).
    SendBytes {
        /// Target connection.
        conn: ConnId,
        /// The body.
        data: Bytes,
    },
    /// Switch the connection's receive side to raw-body mode for exactly
    /// `len` bytes.
    ExpectBody {
        /// Target connection.
        conn: ConnId,
        /// Body length.
        len: usize,
    },
    /// Flush anything queued, then close the connection. The engine has
    /// already forgotten it; the runtime must not report it back as closed.
    Close {
        /// Connection to close.
        conn: ConnId,
    },
}

/// What a connection is currently for.
#[derive(Debug)]
enum ConnRole {
    /// Ordinary command connection.
    Control,
    /// Auxiliary upload leg: header seen, body pending.
    Upload(PendingUpload),
    /// Auxiliary download leg: serving a file, awaiting `TERMINATE`.
    Download,
}

/// The sans-IO server: all state, no sockets.
#[derive(Debug)]
pub struct ServerEngine<U, B> {
    conns: ConnTable<ConnRole>,
    sessions: SessionRegistry,
    users: U,
    blobs: B,
    config: ServerConfig,
}

impl<U: UserStore, B: BlobStore> ServerEngine<U, B> {
    /// A fresh engine over the given stores.
    pub fn new(users: U, blobs: B, config: ServerConfig) -> Self {
        Self { conns: ConnTable::new(), sessions: SessionRegistry::new(), users, blobs, config }
    }

    /// Number of live connections.
    pub fn conn_count(&self) -> usize {
        self.conns.len()
    }

    /// The blob store, for inspection in tests and the harness.
    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    /// Process one event and return the actions to execute.
    pub fn process_event(&mut self, event: ServerEvent) -> Vec<ServerAction> {
        match event {
            ServerEvent::Accepted { conn } => self.on_accepted(conn),
            ServerEvent::Frame { conn, bytes } => self.on_frame(conn, &bytes),
            ServerEvent::Body { conn, data } => self.on_body(conn, &data),
            ServerEvent::Closed { conn } => {
                self.drop_conn(conn);
                Vec::new()
            }
        }
    }

    fn on_accepted(&mut self, conn: ConnId) -> Vec<ServerAction> {
        if self.conns.len() >= self.config.max_connections {
            warn!(%conn, limit = self.config.max_connections, "connection limit reached");
            return vec![ServerAction::Close { conn }];
        }
        debug!(%conn, "connection accepted");
        self.conns.insert(conn, ConnRole::Control);
        Vec::new()
    }

    fn on_frame(&mut self, conn: ConnId, bytes: &[u8]) -> Vec<ServerAction> {
        if !self.conns.contains(conn) {
            warn!(%conn, "frame from unknown connection");
            return Vec::new();
        }
        let msg = match Message::decode(bytes) {
            Ok(msg) => msg,
            Err(e) => return self.protocol_violation(conn, &e),
        };
        debug!(%conn, %msg, "frame received");

        match msg {
            Message::Register { user, pass } => self.register(conn, &user, &pass),
            Message::Login { user, pass } => self.login(conn, &user, &pass),
            Message::Logout => self.logout(conn),
            Message::Send { text } => self.public(conn, &text, false),
            Message::SendA { text } => self.public(conn, &text, true),
            Message::Send2 { to, text } => self.private(conn, &to, &text, false),
            Message::SendA2 { to, text } => self.private(conn, &to, &text, true),
            Message::List => {
                vec![self.reply(conn, Message::print(router::presence_line(&self.sessions)))]
            }
            Message::RecvF { user, size, filename } => {
                self.upload_header(conn, PendingUpload {
                    uploader: user,
                    filename,
                    size,
                    scope: NotifyScope::AllOthers,
                })
            }
            Message::RecvF4 { target, user, size, filename } => {
                self.upload_header(conn, PendingUpload {
                    uploader: user,
                    filename,
                    size,
                    scope: NotifyScope::Only(target),
                })
            }
            Message::SendF { filename } => self.download(conn, &filename),
            Message::Terminate { user } => self.terminate(conn, &user),
            Message::Idle => Vec::new(),
            Message::LoginOk { .. }
            | Message::Listen { .. }
            | Message::Recv { .. }
            | Message::Print { .. }
            | Message::Error { .. } => {
                warn!(%conn, verb = %msg.verb(), "unexpected verb from client");
                self.close(conn)
            }
        }
    }

    fn register(&mut self, conn: ConnId, user: &str, pass: &str) -> Vec<ServerAction> {
        let reply = match validate_credentials(user, pass) {
            Err(NameRejection::BadLength) => Message::error(format!(
                "Credentials are of invalid size (must be between 4 and 8 characters). \
                 Username is {} characters and password is {} characters.",
                user.len(),
                pass.len()
            )),
            Err(NameRejection::Reserved) => Message::error(format!(
                "'{user}' is an invalid username because it is an internal server command. \
                 Please choose a new username."
            )),
            Ok(()) => match self.users.lookup(user) {
                Ok(Some(_)) => Message::error(format!(
                    "User already exists with username '{user}'. Please choose a new username."
                )),
                Ok(None) => match self.users.append(user, pass) {
                    Ok(()) => {
                        info!(user, "account registered");
                        Message::print(format!("User '{user}' registered successfully."))
                    }
                    Err(e) => self.store_failure(&e),
                },
                Err(e) => self.store_failure(&e),
            },
        };
        vec![self.reply(conn, reply)]
    }

    fn login(&mut self, conn: ConnId, user: &str, pass: &str) -> Vec<ServerAction> {
        if let Some(current) = self.sessions.user_of(conn) {
            let msg = Message::error(format!("You are already logged in as '{current}'."));
            return vec![self.reply(conn, msg)];
        }
        let stored = match self.users.lookup(user) {
            Ok(stored) => stored,
            Err(e) => {
                let msg = self.store_failure(&e);
                return vec![self.reply(conn, msg)];
            }
        };
        match stored {
            Some(_) if self.sessions.is_online(user) => {
                let msg = Message::error(format!("User '{user}' is already logged in."));
                vec![self.reply(conn, msg)]
            }
            Some(stored_pass) if stored_pass == pass => {
                info!(user, %conn, "login");
                let mut actions: Vec<ServerAction> = router::fan_out(
                    &self.sessions,
                    &format!("'{user}' has logged in."),
                )
                .into_iter()
                .map(|(to, msg)| ServerAction::SendFrame { conn: to, msg })
                .collect();
                self.sessions.login(conn, user);
                actions.push(self.reply(conn, Message::LoginOk { user: user.to_string() }));
                actions
            }
            _ => vec![self.reply(conn, Message::error("Invalid user credentials."))],
        }
    }

    fn logout(&mut self, conn: ConnId) -> Vec<ServerAction> {
        match self.sessions.logout(conn) {
            Some(user) => {
                info!(user, %conn, "logout");
                vec![self.reply(conn, Message::Logout)]
            }
            None => {
                vec![self.reply(conn, Message::error("Cannot log out, you are not logged in."))]
            }
        }
    }

    fn public(&mut self, conn: ConnId, text: &str, anonymous: bool) -> Vec<ServerAction> {
        let Some(user) = self.sessions.user_of(conn) else {
            return vec![self.not_logged_in(conn)];
        };
        let line = if anonymous {
            router::anonymous_line(text)
        } else {
            router::public_line(user, text)
        };
        router::fan_out(&self.sessions, &line)
            .into_iter()
            .map(|(to, msg)| ServerAction::SendFrame { conn: to, msg })
            .collect()
    }

    fn private(&mut self, conn: ConnId, to: &str, text: &str, anonymous: bool) -> Vec<ServerAction> {
        let Some(user) = self.sessions.user_of(conn) else {
            return vec![self.not_logged_in(conn)];
        };
        match router::private(&self.sessions, conn, user, to, text, anonymous) {
            Ok(pairs) => pairs
                .into_iter()
                .map(|(to, msg)| ServerAction::SendFrame { conn: to, msg })
                .collect(),
            Err(RouteError::SelfTarget) => {
                let msg =
                    Message::error("You are attempting to send a private message to yourself.");
                vec![self.reply(conn, msg)]
            }
            Err(RouteError::Offline(target)) => {
                let msg = Message::error(format!("Cannot send, user '{target}' is not online."));
                vec![self.reply(conn, msg)]
            }
        }
    }

    /// `RECVF`/`RECVF4` reclassifies the connection as an upload leg.
    ///
    /// The declared size is an allocation request from an untrusted peer, so
    /// it is checked against the configured cap before any buffer exists.
    fn upload_header(&mut self, conn: ConnId, upload: PendingUpload) -> Vec<ServerAction> {
        debug!(%conn, file = %upload.filename, size = upload.size, "upload header");
        if upload.size > self.config.max_transfer_size {
            warn!(
                %conn,
                size = upload.size,
                limit = self.config.max_transfer_size,
                "declared upload size refused"
            );
            let msg =
                Message::error(format!("File '{}' exceeds the transfer size limit.", upload.filename));
            let mut actions = vec![self.reply(conn, msg)];
            actions.extend(self.close(conn));
            return actions;
        }
        if upload.size == 0 {
            // Nothing further arrives on this leg; finish in place.
            if let Some(role) = self.conns.get_mut(conn) {
                *role = ConnRole::Upload(upload);
            }
            return self.on_body(conn, &[]);
        }
        let len = upload.size;
        if let Some(role) = self.conns.get_mut(conn) {
            *role = ConnRole::Upload(upload);
        }
        vec![ServerAction::ExpectBody { conn, len }]
    }

    fn on_body(&mut self, conn: ConnId, data: &[u8]) -> Vec<ServerAction> {
        let Some(ConnRole::Upload(upload)) = self.conns.get(conn) else {
            warn!(%conn, "unexpected raw body");
            return self.close(conn);
        };
        let upload = upload.clone();
        if let Err(e) = self.blobs.write(&upload.filename, data) {
            warn!(file = %upload.filename, error = %e, "failed to store upload");
            let msg = self.store_failure(&e);
            let mut actions = vec![self.reply(conn, msg)];
            actions.extend(self.close(conn));
            return actions;
        }
        info!(file = %upload.filename, size = data.len(), from = %upload.uploader, "file stored");

        let mut actions: Vec<ServerAction> = upload
            .notifications(&self.sessions)
            .into_iter()
            .map(|(to, msg)| ServerAction::SendFrame { conn: to, msg })
            .collect();
        actions.extend(self.close(conn));
        actions
    }

    /// `SENDF` serves a stored file back on this auxiliary leg.
    fn download(&mut self, conn: ConnId, filename: &str) -> Vec<ServerAction> {
        match self.blobs.read(filename) {
            Ok(data) => {
                if let Some(role) = self.conns.get_mut(conn) {
                    *role = ConnRole::Download;
                }
                debug!(%conn, file = filename, size = data.len(), "serving file");
                let header = Message::Recv { size: data.len(), filename: filename.to_string() };
                let mut actions = vec![self.reply(conn, header)];
                if !data.is_empty() {
                    actions.push(ServerAction::SendBytes { conn, data });
                }
                actions
            }
            Err(StoreError::NotFound(_)) => {
                warn!(file = filename, "requested file not stored");
                let msg = Message::error(format!("File '{filename}' not found."));
                let mut actions = vec![self.reply(conn, msg)];
                actions.extend(self.close(conn));
                actions
            }
            Err(e) => {
                let msg = self.store_failure(&e);
                let mut actions = vec![self.reply(conn, msg)];
                actions.extend(self.close(conn));
                actions
            }
        }
    }

    /// `TERMINATE user` closes this auxiliary leg and re-arms the named
    /// user's control connection with an `IDLE`.
    fn terminate(&mut self, conn: ConnId, user: &str) -> Vec<ServerAction> {
        debug!(%conn, user, "auxiliary leg terminated");
        let mut actions = self.close(conn);
        if let Some(control) = self.sessions.conn_of(user) {
            actions.push(ServerAction::SendFrame { conn: control, msg: Message::Idle });
        }
        actions
    }

    fn protocol_violation(&mut self, conn: ConnId, err: &ProtocolError) -> Vec<ServerAction> {
        warn!(%conn, error = %err, "protocol violation, closing");
        self.close(conn)
    }

    /// Forget the connection and tell the runtime to close it.
    fn close(&mut self, conn: ConnId) -> Vec<ServerAction> {
        self.drop_conn(conn);
        vec![ServerAction::Close { conn }]
    }

    fn drop_conn(&mut self, conn: ConnId) {
        if let Some(user) = self.sessions.logout(conn) {
            info!(user, %conn, "session ended");
        }
        self.conns.remove(conn);
    }

    fn reply(&self, conn: ConnId, msg: Message) -> ServerAction {
        ServerAction::SendFrame { conn, msg }
    }

    fn not_logged_in(&self, conn: ConnId) -> ServerAction {
        self.reply(conn, Message::error("Cannot send message, you are not logged in."))
    }

    fn store_failure(&self, err: &StoreError) -> Message {
        warn!(error = %err, "storage failure");
        Message::error("Server storage failure, please try again.")
    }
}
