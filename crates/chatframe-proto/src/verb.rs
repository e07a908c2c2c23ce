//! Command vocabulary.
//!
//! Verbs are matched by exact string comparison against the first
//! space-delimited token of a frame. The lookup is a single `match`, built
//! once at compile time, rather than a chain of sequential comparisons.

/// One protocol verb.
///
/// Direction is conventional, not enforced by the type: `LOGIN` appears
/// client→server as `LOGIN user pass` and server→client as `LOGIN user`, and
/// the decoder disambiguates by argument count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// `IDLE` — control-channel re-arm placeholder.
    Idle,
    /// `REGISTER user pass` — create an account.
    Register,
    /// `LOGIN` — authenticate (request) or confirm (reply).
    Login,
    /// `LOGOUT` — end the session.
    Logout,
    /// `SEND msg` — public broadcast.
    Send,
    /// `SEND2 user msg` — private message.
    Send2,
    /// `SENDA msg` — anonymous broadcast.
    SendA,
    /// `SENDA2 user msg` — anonymous private message.
    SendA2,
    /// `SENDF filename` — request a file (download auxiliary leg).
    SendF,
    /// `LIST` — online-user directory.
    List,
    /// `RECVF user size filename` — upload header, relayed to all peers.
    RecvF,
    /// `RECVF4 target user size filename` — upload header, single recipient.
    RecvF4,
    /// `LISTEN user filename` — pull notification pushed by the server.
    Listen,
    /// `RECV size filename` — download header sent by the server.
    Recv,
    /// `TERMINATE user` — close an auxiliary leg and re-arm `user`'s control
    /// connection.
    Terminate,
    /// `PRINT text` — human-readable server output.
    Print,
    /// `ERROR text` — human-readable validation failure.
    Error,
}

impl Verb {
    /// Every wire verb, in declaration order.
    pub const ALL: [Verb; 17] = [
        Verb::Idle,
        Verb::Register,
        Verb::Login,
        Verb::Logout,
        Verb::Send,
        Verb::Send2,
        Verb::SendA,
        Verb::SendA2,
        Verb::SendF,
        Verb::List,
        Verb::RecvF,
        Verb::RecvF4,
        Verb::Listen,
        Verb::Recv,
        Verb::Terminate,
        Verb::Print,
        Verb::Error,
    ];

    /// Look up a verb by its exact wire token.
    pub fn from_token(token: &str) -> Option<Verb> {
        match token {
            "IDLE" => Some(Verb::Idle),
            "REGISTER" => Some(Verb::Register),
            "LOGIN" => Some(Verb::Login),
            "LOGOUT" => Some(Verb::Logout),
            "SEND" => Some(Verb::Send),
            "SEND2" => Some(Verb::Send2),
            "SENDA" => Some(Verb::SendA),
            "SENDA2" => Some(Verb::SendA2),
            "SENDF" => Some(Verb::SendF),
            "LIST" => Some(Verb::List),
            "RECVF" => Some(Verb::RecvF),
            "RECVF4" => Some(Verb::RecvF4),
            "LISTEN" => Some(Verb::Listen),
            "RECV" => Some(Verb::Recv),
            "TERMINATE" => Some(Verb::Terminate),
            "PRINT" => Some(Verb::Print),
            "ERROR" => Some(Verb::Error),
            _ => None,
        }
    }

    /// Wire token for this verb.
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Idle => "IDLE",
            Verb::Register => "REGISTER",
            Verb::Login => "LOGIN",
            Verb::Logout => "LOGOUT",
            Verb::Send => "SEND",
            Verb::Send2 => "SEND2",
            Verb::SendA => "SENDA",
            Verb::SendA2 => "SENDA2",
            Verb::SendF => "SENDF",
            Verb::List => "LIST",
            Verb::RecvF => "RECVF",
            Verb::RecvF4 => "RECVF4",
            Verb::Listen => "LISTEN",
            Verb::Recv => "RECV",
            Verb::Terminate => "TERMINATE",
            Verb::Print => "PRINT",
            Verb::Error => "ERROR",
        }
    }

    /// Whether `name` collides with the protocol vocabulary and is therefore
    /// unusable as a username.
    ///
    /// `DELAY` never travels on the wire but is part of the client script
    /// grammar, so it is reserved too.
    pub fn is_reserved_name(name: &str) -> bool {
        name == "DELAY" || Verb::from_token(name).is_some()
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        for verb in Verb::ALL {
            assert_eq!(Verb::from_token(verb.as_str()), Some(verb));
        }
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        assert_eq!(Verb::from_token("SENDF2"), None);
        assert_eq!(Verb::from_token("login"), None);
        assert_eq!(Verb::from_token("LOGIN "), None);
        assert_eq!(Verb::from_token(""), None);
    }

    #[test]
    fn reserved_names_cover_script_grammar() {
        assert!(Verb::is_reserved_name("LOGIN"));
        assert!(Verb::is_reserved_name("DELAY"));
        assert!(!Verb::is_reserved_name("alice"));
    }
}
