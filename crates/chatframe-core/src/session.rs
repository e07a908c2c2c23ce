//! Session registry: who is logged in, on which connection.
//!
//! One username maps to at most one control connection and vice versa.
//! Iteration order is login order, which is the order the presence list is
//! rendered in.

use chatframe_proto::Verb;

use crate::table::ConnId;

/// Minimum username/password length, in bytes.
pub const MIN_CRED: usize = 4;

/// Maximum username/password length, in bytes.
pub const MAX_CRED: usize = 8;

/// Whether a username or password has an acceptable length.
pub fn credential_len_ok(cred: &str) -> bool {
    (MIN_CRED..=MAX_CRED).contains(&cred.len())
}

/// Why a username is not acceptable for registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRejection {
    /// Username or password outside the length bounds.
    BadLength,
    /// Username collides with the command vocabulary.
    Reserved,
}

/// Validate a registration credential pair.
pub fn validate_credentials(user: &str, pass: &str) -> Result<(), NameRejection> {
    if !credential_len_ok(user) || !credential_len_ok(pass) {
        return Err(NameRejection::BadLength);
    }
    if Verb::is_reserved_name(user) {
        return Err(NameRejection::Reserved);
    }
    Ok(())
}

/// Login-ordered map between usernames and control connections.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Vec<(ConnId, String)>,
}

impl SessionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user` to `conn`. Caller has already checked both sides are free.
    pub fn login(&mut self, conn: ConnId, user: &str) {
        self.sessions.push((conn, user.to_string()));
    }

    /// Unbind whatever user is on `conn`, returning the username if any.
    pub fn logout(&mut self, conn: ConnId) -> Option<String> {
        let pos = self.sessions.iter().position(|(c, _)| *c == conn)?;
        Some(self.sessions.remove(pos).1)
    }

    /// Username logged in on `conn`.
    pub fn user_of(&self, conn: ConnId) -> Option<&str> {
        self.sessions.iter().find(|(c, _)| *c == conn).map(|(_, u)| u.as_str())
    }

    /// Control connection `user` is logged in on.
    pub fn conn_of(&self, user: &str) -> Option<ConnId> {
        self.sessions.iter().find(|(_, u)| u == user).map(|(c, _)| *c)
    }

    /// Whether `user` has an active session.
    pub fn is_online(&self, user: &str) -> bool {
        self.conn_of(user).is_some()
    }

    /// Active sessions in login order.
    pub fn iter(&self) -> impl Iterator<Item = (ConnId, &str)> {
        self.sessions.iter().map(|(c, u)| (*c, u.as_str()))
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether nobody is logged in.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn credential_bounds_are_inclusive() {
        assert!(validate_credentials("abcd", "efgh").is_ok());
        assert!(validate_credentials("abcdefgh", "12345678").is_ok());
        assert_eq!(validate_credentials("abc", "efgh"), Err(NameRejection::BadLength));
        assert_eq!(validate_credentials("abcd", "toolongpass"), Err(NameRejection::BadLength));
    }

    #[test]
    fn command_vocabulary_is_reserved() {
        assert_eq!(validate_credentials("SENDA", "pass1"), Err(NameRejection::Reserved));
        assert_eq!(validate_credentials("LOGIN", "pass1"), Err(NameRejection::Reserved));
    }

    #[test]
    fn registry_tracks_login_order() {
        let mut reg = SessionRegistry::new();
        let (a, b) = (ConnId::from_raw(1), ConnId::from_raw(2));
        reg.login(a, "alice");
        reg.login(b, "bob");

        let users: Vec<_> = reg.iter().map(|(_, u)| u).collect();
        assert_eq!(users, vec!["alice", "bob"]);

        assert_eq!(reg.logout(a).as_deref(), Some("alice"));
        assert!(!reg.is_online("alice"));
        assert_eq!(reg.conn_of("bob"), Some(b));
        assert_eq!(reg.logout(a), None);
    }
}
