//! File-relay bookkeeping shared by the engines.
//!
//! An upload travels in two hops: uploader → server (an auxiliary connection
//! carrying a `RECVF`/`RECVF4` header plus raw bytes), then server → each
//! notified peer (a `LISTEN` push, answered by a fresh auxiliary connection
//! that pulls the file with `SENDF`). This module tracks the first hop and
//! computes who gets notified when it lands.

use chatframe_proto::Message;

use crate::{session::SessionRegistry, table::ConnId};

/// Largest declared transfer body either side will accept, in bytes.
///
/// Bodies are buffered whole, so the declared size in a `RECVF`/`RECV`
/// header is an allocation request from the peer; anything above this is
/// refused before a buffer exists.
pub const MAX_TRANSFER_SIZE: usize = 64 * 1024 * 1024;

/// Who gets a `LISTEN` notification once an upload completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyScope {
    /// Every online user except the uploader.
    AllOthers,
    /// Exactly one named user.
    Only(String),
}

/// One in-flight upload: header received, body still arriving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpload {
    /// User who initiated the upload (named in the header, not looked up
    /// from the session registry; the auxiliary connection never logs in).
    pub uploader: String,
    /// Destination filename.
    pub filename: String,
    /// Exact body length in bytes.
    pub size: usize,
    /// Notification fan-out once the body lands.
    pub scope: NotifyScope,
}

impl PendingUpload {
    /// `LISTEN` pushes to emit now that the body has been stored.
    ///
    /// An offline or unknown target under [`NotifyScope::Only`] simply gets
    /// nothing; the upload itself still succeeded.
    pub fn notifications(&self, sessions: &SessionRegistry) -> Vec<(ConnId, Message)> {
        let listen = Message::Listen {
            user: self.uploader.clone(),
            filename: self.filename.clone(),
        };
        match &self.scope {
            NotifyScope::AllOthers => sessions
                .iter()
                .filter(|(_, user)| *user != self.uploader)
                .map(|(conn, _)| (conn, listen.clone()))
                .collect(),
            NotifyScope::Only(target) => sessions
                .conn_of(target)
                .map(|conn| (conn, listen.clone()))
                .into_iter()
                .collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sessions() -> SessionRegistry {
        let mut reg = SessionRegistry::new();
        reg.login(ConnId::from_raw(1), "alice");
        reg.login(ConnId::from_raw(2), "bobby");
        reg.login(ConnId::from_raw(3), "carol");
        reg
    }

    fn upload(scope: NotifyScope) -> PendingUpload {
        PendingUpload {
            uploader: "alice".to_string(),
            filename: "notes.txt".to_string(),
            size: 42,
            scope,
        }
    }

    #[test]
    fn broadcast_upload_skips_uploader() {
        let out = upload(NotifyScope::AllOthers).notifications(&sessions());
        let conns: Vec<_> = out.iter().map(|(c, _)| c.raw()).collect();
        assert_eq!(conns, vec![2, 3]);
        for (_, msg) in &out {
            assert_eq!(
                *msg,
                Message::Listen { user: "alice".to_string(), filename: "notes.txt".to_string() }
            );
        }
    }

    #[test]
    fn targeted_upload_notifies_one_user() {
        let out = upload(NotifyScope::Only("carol".to_string())).notifications(&sessions());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0.raw(), 3);
    }

    #[test]
    fn offline_target_gets_dropped() {
        let out = upload(NotifyScope::Only("ghost".to_string())).notifications(&sessions());
        assert!(out.is_empty());
    }
}
