//! Action-based scripted client engine.
//!
//! Mirrors the server engine's shape: the runtime feeds in script commands
//! and inbound frames, the engine answers with actions. The engine owns the
//! client's identity, the transfer-busy gate, and the state of every
//! auxiliary transfer leg; the runtime owns sockets, the script file, and
//! delays.
//!
//! A transfer occupies the client end to end: while any auxiliary leg is
//! pending or open, [`ClientEngine::transfer_busy`] is true and the runtime
//! must hold back further script commands. The gate derives from the leg
//! bookkeeping itself rather than from a parked `IDLE` exchange, so it can
//! never be left set by a lost frame.

use bytes::Bytes;
use chatframe_proto::{Message, ProtocolError};
use tracing::{debug, warn};

use crate::{
    store::BlobStore,
    table::ConnId,
    transfer::MAX_TRANSFER_SIZE,
};

/// Events the client engine processes.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The next script command is ready to issue.
    Command(Message),
    /// A complete frame arrived on the control connection.
    ControlFrame {
        /// The raw frame.
        bytes: Vec<u8>,
    },
    /// The runtime finished dialing an auxiliary connection, in answer to
    /// the oldest outstanding [`ClientAction::OpenAux`].
    AuxOpened {
        /// The new auxiliary connection.
        conn: ConnId,
    },
    /// A complete frame arrived on an auxiliary connection.
    AuxFrame {
        /// Originating leg.
        conn: ConnId,
        /// The raw frame.
        bytes: Vec<u8>,
    },
    /// A complete raw body arrived on an auxiliary connection.
    AuxBody {
        /// Originating leg.
        conn: ConnId,
        /// The full body.
        data: Vec<u8>,
    },
    /// The runtime could not establish the oldest dialed auxiliary
    /// connection, so no [`ClientEvent::AuxOpened`] will follow for it.
    AuxFailed,
    /// An auxiliary connection was closed by the server.
    AuxClosed {
        /// The leg that went away.
        conn: ConnId,
    },
    /// The control connection was closed.
    ControlClosed,
}

/// Actions the engine asks the runtime to execute, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Queue one frame on the control connection.
    SendControl(Message),
    /// Dial a new auxiliary connection; report it back via
    /// [`ClientEvent::AuxOpened`].
    OpenAux,
    /// Queue one frame on an auxiliary connection.
    SendAux {
        /// Target leg.
        conn: ConnId,
        /// Message to encode and send.
        msg: Message,
    },
    /// Queue raw bytes on an auxiliary connection.
    SendAuxBytes {
        /// Target leg.
        conn: ConnId,
        /// The body.
        data: Bytes,
    },
    /// Switch an auxiliary connection to raw-body mode for `len` bytes.
    ExpectAuxBody {
        /// Target leg.
        conn: ConnId,
        /// Body length.
        len: usize,
    },
    /// Close an auxiliary connection. The engine has already forgotten it.
    CloseAux {
        /// Leg to close.
        conn: ConnId,
    },
    /// Show a server-delivered line to the user.
    Deliver {
        /// The line, without its `PRINT`/`ERROR` prefix.
        text: String,
    },
    /// Stop the event loop.
    Quit,
}

/// What an auxiliary leg that has not yet connected will do.
#[derive(Debug)]
enum AuxIntent {
    Upload { filename: String, data: Bytes },
    Download { filename: String },
}

/// State of one connected auxiliary leg.
#[derive(Debug)]
enum AuxState {
    /// Header and body queued; waiting for the server to close the leg.
    Uploading,
    /// `SENDF` sent; waiting for the `RECV` header.
    AwaitingHeader,
    /// `RECV` seen; body incoming.
    ReceivingBody { filename: String },
    /// Body stored and `TERMINATE` sent; waiting for the server to close.
    TerminateSent,
}

/// The sans-IO scripted client.
#[derive(Debug)]
pub struct ClientEngine<B> {
    blobs: B,
    user: Option<String>,
    /// Aux legs requested but not yet connected, oldest first.
    intents: std::collections::VecDeque<AuxIntent>,
    /// Connected aux legs.
    legs: Vec<(ConnId, AuxState)>,
}

impl<B: BlobStore> ClientEngine<B> {
    /// A fresh engine over the given blob store.
    pub fn new(blobs: B) -> Self {
        Self { blobs, user: None, intents: std::collections::VecDeque::new(), legs: Vec::new() }
    }

    /// Whether a transfer currently occupies the client.
    ///
    /// While true, the runtime must not issue further script commands.
    pub fn transfer_busy(&self) -> bool {
        !self.intents.is_empty() || !self.legs.is_empty()
    }

    /// Identity confirmed by the server, if logged in.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// The blob store, for inspection in tests.
    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    /// Process one event and return the actions to execute.
    pub fn process_event(&mut self, event: ClientEvent) -> Vec<ClientAction> {
        match event {
            ClientEvent::Command(msg) => self.on_command(msg),
            ClientEvent::ControlFrame { bytes } => self.on_control_frame(&bytes),
            ClientEvent::AuxOpened { conn } => self.on_aux_opened(conn),
            ClientEvent::AuxFrame { conn, bytes } => self.on_aux_frame(conn, &bytes),
            ClientEvent::AuxBody { conn, data } => self.on_aux_body(conn, &data),
            ClientEvent::AuxFailed => self.on_aux_failed(),
            ClientEvent::AuxClosed { conn } => {
                debug!(%conn, "auxiliary leg closed");
                self.legs.retain(|(c, _)| *c != conn);
                Vec::new()
            }
            ClientEvent::ControlClosed => {
                debug!("control connection closed");
                vec![ClientAction::Quit]
            }
        }
    }

    fn on_command(&mut self, msg: Message) -> Vec<ClientAction> {
        if let Message::SendF { filename } = msg {
            return self.start_upload(&filename);
        }
        vec![ClientAction::SendControl(msg)]
    }

    /// Script `SENDF`: load the file and dial an upload leg for it.
    fn start_upload(&mut self, filename: &str) -> Vec<ClientAction> {
        if self.user.is_none() {
            return vec![ClientAction::Deliver {
                text: format!("Cannot upload '{filename}', you are not logged in."),
            }];
        }
        match self.blobs.read(filename) {
            Ok(data) => {
                debug!(file = filename, size = data.len(), "upload leg requested");
                self.intents.push_back(AuxIntent::Upload { filename: filename.to_string(), data });
                vec![ClientAction::OpenAux]
            }
            Err(e) => {
                warn!(file = filename, error = %e, "upload source unavailable");
                vec![ClientAction::Deliver {
                    text: format!("Cannot upload '{filename}': file not available."),
                }]
            }
        }
    }

    fn on_control_frame(&mut self, bytes: &[u8]) -> Vec<ClientAction> {
        let msg = match Message::decode(bytes) {
            Ok(msg) => msg,
            Err(e) => return self.protocol_violation(&e),
        };
        match msg {
            Message::Print { text } => vec![ClientAction::Deliver { text }],
            Message::Error { text } => {
                warn!(text, "server reported an error");
                vec![ClientAction::Deliver { text }]
            }
            Message::LoginOk { user } => {
                debug!(user, "login confirmed");
                self.user = Some(user.clone());
                vec![ClientAction::Deliver { text: format!("Logged in as '{user}'.") }]
            }
            Message::Logout => {
                let user = self.user.take();
                debug!(user = user.as_deref().unwrap_or(""), "logout confirmed");
                vec![ClientAction::Deliver { text: String::from("Logged out.") }]
            }
            Message::Listen { user, filename } => self.start_download(&user, &filename),
            Message::Idle => {
                // Informational re-arm; the busy gate clears itself when the
                // last leg goes away.
                debug!("control connection re-armed");
                Vec::new()
            }
            other => {
                warn!(verb = %other.verb(), "unexpected verb on control connection");
                Vec::new()
            }
        }
    }

    /// Server `LISTEN`: dial a download leg and pull the file.
    fn start_download(&mut self, from: &str, filename: &str) -> Vec<ClientAction> {
        debug!(from, file = filename, "download leg requested");
        self.intents.push_back(AuxIntent::Download { filename: filename.to_string() });
        vec![ClientAction::OpenAux]
    }

    fn on_aux_opened(&mut self, conn: ConnId) -> Vec<ClientAction> {
        let Some(intent) = self.intents.pop_front() else {
            warn!(%conn, "auxiliary connection with no pending transfer");
            return vec![ClientAction::CloseAux { conn }];
        };
        match intent {
            AuxIntent::Upload { filename, data } => {
                let Some(user) = self.user.clone() else {
                    // Logged out between the request and the dial.
                    return vec![ClientAction::CloseAux { conn }];
                };
                self.legs.push((conn, AuxState::Uploading));
                let header = Message::RecvF { user, size: data.len(), filename };
                let mut actions = vec![ClientAction::SendAux { conn, msg: header }];
                if !data.is_empty() {
                    actions.push(ClientAction::SendAuxBytes { conn, data });
                }
                actions
            }
            AuxIntent::Download { filename } => {
                self.legs.push((conn, AuxState::AwaitingHeader));
                vec![ClientAction::SendAux { conn, msg: Message::SendF { filename } }]
            }
        }
    }

    /// A dial failed before any leg existed; the transfer it was for is
    /// abandoned, everything else continues.
    fn on_aux_failed(&mut self) -> Vec<ClientAction> {
        let Some(intent) = self.intents.pop_front() else {
            warn!("auxiliary dial failure with no pending transfer");
            return Vec::new();
        };
        let text = match intent {
            AuxIntent::Upload { filename, .. } => {
                format!("Cannot upload '{filename}': connection failed.")
            }
            AuxIntent::Download { filename } => {
                format!("Cannot receive '{filename}': connection failed.")
            }
        };
        warn!(text, "auxiliary dial failed");
        vec![ClientAction::Deliver { text }]
    }

    fn on_aux_frame(&mut self, conn: ConnId, bytes: &[u8]) -> Vec<ClientAction> {
        let msg = match Message::decode(bytes) {
            Ok(msg) => msg,
            Err(e) => return self.protocol_violation(&e),
        };
        if self.leg_mut(conn).is_none() {
            warn!(%conn, "frame on unknown auxiliary leg");
            return vec![ClientAction::CloseAux { conn }];
        }
        let awaiting_header = matches!(self.leg_mut(conn), Some(AuxState::AwaitingHeader));
        match msg {
            Message::Recv { size, filename } if awaiting_header => {
                // The declared size is an allocation request from the server;
                // refuse it before any buffer exists.
                if size > MAX_TRANSFER_SIZE {
                    warn!(%conn, size, file = %filename, "declared download size refused");
                    self.legs.retain(|(c, _)| *c != conn);
                    return vec![
                        ClientAction::Deliver {
                            text: format!(
                                "Cannot receive '{filename}': size exceeds the transfer limit."
                            ),
                        },
                        ClientAction::CloseAux { conn },
                    ];
                }
                if let Some(state) = self.leg_mut(conn) {
                    *state = AuxState::ReceivingBody { filename };
                }
                if size == 0 {
                    return self.finish_download(conn, &[]);
                }
                vec![ClientAction::ExpectAuxBody { conn, len: size }]
            }
            Message::Error { text } => {
                warn!(%conn, text, "transfer refused");
                self.legs.retain(|(c, _)| *c != conn);
                vec![ClientAction::Deliver { text }, ClientAction::CloseAux { conn }]
            }
            other => {
                warn!(%conn, verb = %other.verb(), "unexpected verb on auxiliary leg");
                self.legs.retain(|(c, _)| *c != conn);
                vec![ClientAction::CloseAux { conn }]
            }
        }
    }

    fn on_aux_body(&mut self, conn: ConnId, data: &[u8]) -> Vec<ClientAction> {
        if matches!(self.leg_mut(conn), Some(AuxState::ReceivingBody { .. })) {
            return self.finish_download(conn, data);
        }
        warn!(%conn, "unexpected raw body on auxiliary leg");
        self.legs.retain(|(c, _)| *c != conn);
        vec![ClientAction::CloseAux { conn }]
    }

    /// Store the downloaded body and hand the leg back to the server.
    fn finish_download(&mut self, conn: ConnId, data: &[u8]) -> Vec<ClientAction> {
        let filename = match self.leg_mut(conn) {
            Some(AuxState::ReceivingBody { filename }) => filename.clone(),
            _ => return vec![ClientAction::CloseAux { conn }],
        };
        if let Err(e) = self.blobs.write(&filename, data) {
            warn!(file = %filename, error = %e, "failed to store download");
            self.legs.retain(|(c, _)| *c != conn);
            return vec![ClientAction::CloseAux { conn }];
        }
        if let Some(state) = self.leg_mut(conn) {
            *state = AuxState::TerminateSent;
        }
        let user = self.user.clone().unwrap_or_default();
        vec![
            ClientAction::Deliver {
                text: format!("Received file '{filename}' ({} bytes).", data.len()),
            },
            ClientAction::SendAux { conn, msg: Message::Terminate { user } },
        ]
    }

    fn protocol_violation(&mut self, err: &ProtocolError) -> Vec<ClientAction> {
        warn!(error = %err, "protocol violation from server");
        vec![ClientAction::Quit]
    }

    fn leg_mut(&mut self, conn: ConnId) -> Option<&mut AuxState> {
        self.legs.iter_mut().find(|(c, _)| *c == conn).map(|(_, s)| s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::store::{BlobStore as _, MemoryBlobStore};

    use super::*;

    fn logged_in_engine() -> ClientEngine<MemoryBlobStore> {
        let mut eng = ClientEngine::new(MemoryBlobStore::new());
        let out = eng.process_event(ClientEvent::ControlFrame {
            bytes: b"LOGIN alice".to_vec(),
        });
        assert_eq!(out, vec![ClientAction::Deliver { text: "Logged in as 'alice'.".into() }]);
        eng
    }

    #[test]
    fn commands_pass_through_to_control() {
        let mut eng = logged_in_engine();
        let out = eng.process_event(ClientEvent::Command(Message::Send { text: "hi".into() }));
        assert_eq!(out, vec![ClientAction::SendControl(Message::Send { text: "hi".into() })]);
        assert!(!eng.transfer_busy());
    }

    #[test]
    fn print_and_error_frames_are_delivered() {
        let mut eng = logged_in_engine();
        let out = eng.process_event(ClientEvent::ControlFrame { bytes: b"PRINT alice: hi".to_vec() });
        assert_eq!(out, vec![ClientAction::Deliver { text: "alice: hi".into() }]);

        let out = eng.process_event(ClientEvent::ControlFrame {
            bytes: b"ERROR Invalid user credentials.".to_vec(),
        });
        assert_eq!(out, vec![ClientAction::Deliver { text: "Invalid user credentials.".into() }]);
    }

    #[test]
    fn upload_runs_header_then_body_then_waits_for_close() {
        let mut eng = logged_in_engine();
        eng.blobs.write("notes.txt", b"hello").unwrap();

        let out = eng.process_event(ClientEvent::Command(Message::SendF {
            filename: "notes.txt".into(),
        }));
        assert_eq!(out, vec![ClientAction::OpenAux]);
        assert!(eng.transfer_busy());

        let aux = ConnId::from_raw(7);
        let out = eng.process_event(ClientEvent::AuxOpened { conn: aux });
        assert_eq!(
            out,
            vec![
                ClientAction::SendAux {
                    conn: aux,
                    msg: Message::RecvF {
                        user: "alice".into(),
                        size: 5,
                        filename: "notes.txt".into(),
                    },
                },
                ClientAction::SendAuxBytes { conn: aux, data: Bytes::from_static(b"hello") },
            ]
        );
        assert!(eng.transfer_busy());

        let out = eng.process_event(ClientEvent::AuxClosed { conn: aux });
        assert!(out.is_empty());
        assert!(!eng.transfer_busy());
    }

    #[test]
    fn upload_requires_login_and_a_readable_file() {
        let mut eng = ClientEngine::new(MemoryBlobStore::new());
        let out = eng.process_event(ClientEvent::Command(Message::SendF {
            filename: "f.txt".into(),
        }));
        assert_eq!(
            out,
            vec![ClientAction::Deliver {
                text: "Cannot upload 'f.txt', you are not logged in.".into(),
            }]
        );

        let mut eng = logged_in_engine();
        let out = eng.process_event(ClientEvent::Command(Message::SendF {
            filename: "missing.txt".into(),
        }));
        assert_eq!(
            out,
            vec![ClientAction::Deliver {
                text: "Cannot upload 'missing.txt': file not available.".into(),
            }]
        );
        assert!(!eng.transfer_busy());
    }

    #[test]
    fn listen_drives_the_download_leg() {
        let mut eng = logged_in_engine();

        let out = eng.process_event(ClientEvent::ControlFrame {
            bytes: b"LISTEN bobby notes.txt".to_vec(),
        });
        assert_eq!(out, vec![ClientAction::OpenAux]);
        assert!(eng.transfer_busy());

        let aux = ConnId::from_raw(9);
        let out = eng.process_event(ClientEvent::AuxOpened { conn: aux });
        assert_eq!(
            out,
            vec![ClientAction::SendAux {
                conn: aux,
                msg: Message::SendF { filename: "notes.txt".into() },
            }]
        );

        let out = eng.process_event(ClientEvent::AuxFrame {
            conn: aux,
            bytes: b"RECV 5 notes.txt".to_vec(),
        });
        assert_eq!(out, vec![ClientAction::ExpectAuxBody { conn: aux, len: 5 }]);

        let out = eng.process_event(ClientEvent::AuxBody { conn: aux, data: b"hello".to_vec() });
        assert_eq!(
            out,
            vec![
                ClientAction::Deliver { text: "Received file 'notes.txt' (5 bytes).".into() },
                ClientAction::SendAux { conn: aux, msg: Message::Terminate { user: "alice".into() } },
            ]
        );
        assert_eq!(
            eng.blobs().get("notes.txt").map(bytes::Bytes::as_ref),
            Some(&b"hello"[..])
        );
        assert!(eng.transfer_busy());

        // Server closes the leg after TERMINATE; gate clears.
        eng.process_event(ClientEvent::AuxClosed { conn: aux });
        assert!(!eng.transfer_busy());
    }

    #[test]
    fn zero_byte_download_skips_body_mode() {
        let mut eng = logged_in_engine();
        eng.process_event(ClientEvent::ControlFrame { bytes: b"LISTEN bobby empty.txt".to_vec() });
        let aux = ConnId::from_raw(3);
        eng.process_event(ClientEvent::AuxOpened { conn: aux });

        let out = eng.process_event(ClientEvent::AuxFrame {
            conn: aux,
            bytes: b"RECV 0 empty.txt".to_vec(),
        });
        assert_eq!(
            out,
            vec![
                ClientAction::Deliver { text: "Received file 'empty.txt' (0 bytes).".into() },
                ClientAction::SendAux { conn: aux, msg: Message::Terminate { user: "alice".into() } },
            ]
        );
        assert_eq!(eng.blobs().get("empty.txt").map(bytes::Bytes::len), Some(0));
    }

    #[test]
    fn refused_transfer_surfaces_the_error() {
        let mut eng = logged_in_engine();
        eng.process_event(ClientEvent::ControlFrame { bytes: b"LISTEN bobby gone.txt".to_vec() });
        let aux = ConnId::from_raw(4);
        eng.process_event(ClientEvent::AuxOpened { conn: aux });

        let out = eng.process_event(ClientEvent::AuxFrame {
            conn: aux,
            bytes: b"ERROR File 'gone.txt' not found.".to_vec(),
        });
        assert_eq!(
            out,
            vec![
                ClientAction::Deliver { text: "File 'gone.txt' not found.".into() },
                ClientAction::CloseAux { conn: aux },
            ]
        );
        assert!(!eng.transfer_busy());
    }

    #[test]
    fn oversized_download_header_is_refused() {
        let mut eng = logged_in_engine();
        eng.process_event(ClientEvent::ControlFrame { bytes: b"LISTEN bobby big.bin".to_vec() });
        let aux = ConnId::from_raw(5);
        eng.process_event(ClientEvent::AuxOpened { conn: aux });

        let out = eng.process_event(ClientEvent::AuxFrame {
            conn: aux,
            bytes: b"RECV 1152921504606846976 big.bin".to_vec(),
        });
        assert_eq!(
            out,
            vec![
                ClientAction::Deliver {
                    text: "Cannot receive 'big.bin': size exceeds the transfer limit.".into(),
                },
                ClientAction::CloseAux { conn: aux },
            ]
        );
        assert!(!eng.transfer_busy());
    }

    #[test]
    fn failed_aux_dial_drops_the_transfer() {
        let mut eng = logged_in_engine();
        eng.blobs.write("notes.txt", b"hello").unwrap();
        let out = eng.process_event(ClientEvent::Command(Message::SendF {
            filename: "notes.txt".into(),
        }));
        assert_eq!(out, vec![ClientAction::OpenAux]);
        assert!(eng.transfer_busy());

        let out = eng.process_event(ClientEvent::AuxFailed);
        assert_eq!(
            out,
            vec![ClientAction::Deliver {
                text: "Cannot upload 'notes.txt': connection failed.".into(),
            }]
        );
        assert!(!eng.transfer_busy());

        // The client is still usable afterwards.
        let out = eng.process_event(ClientEvent::Command(Message::Send { text: "hi".into() }));
        assert_eq!(out, vec![ClientAction::SendControl(Message::Send { text: "hi".into() })]);
    }

    #[test]
    fn control_close_quits() {
        let mut eng = logged_in_engine();
        let out = eng.process_event(ClientEvent::ControlClosed);
        assert_eq!(out, vec![ClientAction::Quit]);
    }
}
