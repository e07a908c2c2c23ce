//! Message routing and reply formatting for the chat verbs.
//!
//! Produces `(connection, message)` pairs for the engine to turn into send
//! actions. All user-visible strings live here so the exact wording is in one
//! place and covered by one set of tests.

use chatframe_proto::{ANON_MARKER, Message};
use thiserror::Error;

use crate::{session::SessionRegistry, table::ConnId};

/// Why a private message could not be routed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Sender addressed themselves.
    #[error("message targets its own sender")]
    SelfTarget,

    /// Target has no active session.
    #[error("user {0:?} is not online")]
    Offline(String),
}

/// Public chat line as delivered: `from: text`.
pub fn public_line(from: &str, text: &str) -> String {
    format!("{from}: {text}")
}

/// Anonymous chat line as delivered: `******: text`.
pub fn anonymous_line(text: &str) -> String {
    format!("{ANON_MARKER}: {text}")
}

/// Presence summary in login order: `Users online: a, b`.
pub fn presence_line(sessions: &SessionRegistry) -> String {
    let mut line = String::from("Users online: ");
    for (n, (_, user)) in sessions.iter().enumerate() {
        if n > 0 {
            line.push_str(", ");
        }
        line.push_str(user);
    }
    line
}

/// Deliver `text` as a `PRINT` to every online user, sender included.
pub fn fan_out(sessions: &SessionRegistry, text: &str) -> Vec<(ConnId, Message)> {
    sessions.iter().map(|(conn, _)| (conn, Message::print(text))).collect()
}

/// Route a private message to `target`, echoing a receipt to the sender.
///
/// Anonymous delivery hides the sender's name from the recipient but the
/// echo still confirms who the sender addressed.
pub fn private(
    sessions: &SessionRegistry,
    sender: ConnId,
    sender_name: &str,
    target: &str,
    text: &str,
    anonymous: bool,
) -> Result<Vec<(ConnId, Message)>, RouteError> {
    if target == sender_name {
        return Err(RouteError::SelfTarget);
    }
    let Some(target_conn) = sessions.conn_of(target) else {
        return Err(RouteError::Offline(target.to_string()));
    };

    let (delivery, echo) = if anonymous {
        (format!("[{ANON_MARKER}->you]: {text}"), format!("[(you)->{target}]: {text}"))
    } else {
        (format!("[{sender_name}->you]: {text}"), format!("[you->{target}]: {text}"))
    };
    Ok(vec![(target_conn, Message::print(delivery)), (sender, Message::print(echo))])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn registry() -> (SessionRegistry, ConnId, ConnId) {
        let mut reg = SessionRegistry::new();
        let (a, b) = (ConnId::from_raw(1), ConnId::from_raw(2));
        reg.login(a, "alice");
        reg.login(b, "bobby");
        (reg, a, b)
    }

    #[test]
    fn fan_out_includes_sender() {
        let (reg, a, b) = registry();
        let out = fan_out(&reg, &public_line("alice", "hi"));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], (a, Message::print("alice: hi")));
        assert_eq!(out[1], (b, Message::print("alice: hi")));
    }

    #[test]
    fn private_delivers_and_echoes() {
        let (reg, a, b) = registry();
        let out = private(&reg, a, "alice", "bobby", "psst", false).unwrap();
        assert_eq!(out[0], (b, Message::print("[alice->you]: psst")));
        assert_eq!(out[1], (a, Message::print("[you->bobby]: psst")));
    }

    #[test]
    fn anonymous_private_masks_sender() {
        let (reg, a, b) = registry();
        let out = private(&reg, a, "alice", "bobby", "psst", true).unwrap();
        assert_eq!(out[0], (b, Message::print("[******->you]: psst")));
        assert_eq!(out[1], (a, Message::print("[(you)->bobby]: psst")));
    }

    #[test]
    fn private_rejects_self_and_offline() {
        let (reg, a, _) = registry();
        assert_eq!(private(&reg, a, "alice", "alice", "hi", false), Err(RouteError::SelfTarget));
        assert_eq!(
            private(&reg, a, "alice", "ghost", "hi", false),
            Err(RouteError::Offline("ghost".to_string()))
        );
    }

    #[test]
    fn presence_is_login_ordered() {
        let (reg, _, _) = registry();
        assert_eq!(presence_line(&reg), "Users online: alice, bobby");
    }
}
