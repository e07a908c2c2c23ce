//! Typed command messages and their fixed-frame codec.
//!
//! A [`Message`] is the decoded form of one command frame: the verb plus its
//! verb-specific arguments. [`Message::decode`] accepts a full frame (or a
//! bare script line) and [`Message::encode`] produces the padded wire frame.

use std::fmt;

use crate::{ProtocolError, Verb};

/// Fixed length of every command frame, in bytes.
///
/// One constant for the whole deployment. Unused trailing bytes are NUL
/// padding and are ignored on decode.
pub const FRAME_LEN: usize = 300;

/// Identity marker substituted for the sender of anonymous messages.
pub const ANON_MARKER: &str = "******";

/// One decoded protocol message.
///
/// Field order within each variant mirrors the wire argument order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `REGISTER user pass`
    Register {
        /// Requested username.
        user: String,
        /// Requested password.
        pass: String,
    },
    /// `LOGIN user pass` (client→server request)
    Login {
        /// Username to authenticate.
        user: String,
        /// Supplied password.
        pass: String,
    },
    /// `LOGIN user` (server→client success reply)
    LoginOk {
        /// Username that is now logged in.
        user: String,
    },
    /// `LOGOUT`
    Logout,
    /// `SEND msg`
    Send {
        /// Message text (may contain spaces).
        text: String,
    },
    /// `SEND2 user msg`
    Send2 {
        /// Target username.
        to: String,
        /// Message text.
        text: String,
    },
    /// `SENDA msg`
    SendA {
        /// Message text.
        text: String,
    },
    /// `SENDA2 user msg`
    SendA2 {
        /// Target username.
        to: String,
        /// Message text.
        text: String,
    },
    /// `LIST`
    List,
    /// `SENDF filename`
    SendF {
        /// File to pull (single token, no whitespace).
        filename: String,
    },
    /// `RECVF user size filename`
    RecvF {
        /// Uploading user.
        user: String,
        /// Body length in bytes, following this frame.
        size: usize,
        /// Destination filename.
        filename: String,
    },
    /// `RECVF4 target user size filename`
    RecvF4 {
        /// Sole recipient of the relay notification.
        target: String,
        /// Uploading user.
        user: String,
        /// Body length in bytes, following this frame.
        size: usize,
        /// Destination filename.
        filename: String,
    },
    /// `LISTEN user filename`
    Listen {
        /// User whose upload triggered the notification.
        user: String,
        /// File available for pull.
        filename: String,
    },
    /// `RECV size filename`
    Recv {
        /// Body length in bytes, following this frame.
        size: usize,
        /// Filename being delivered.
        filename: String,
    },
    /// `TERMINATE user`
    Terminate {
        /// User whose control connection should be re-armed.
        user: String,
    },
    /// `IDLE`
    Idle,
    /// `PRINT text`
    Print {
        /// Human-readable output.
        text: String,
    },
    /// `ERROR text`
    Error {
        /// Human-readable failure description.
        text: String,
    },
}

impl Message {
    /// Verb of this message.
    pub fn verb(&self) -> Verb {
        match self {
            Message::Register { .. } => Verb::Register,
            Message::Login { .. } | Message::LoginOk { .. } => Verb::Login,
            Message::Logout => Verb::Logout,
            Message::Send { .. } => Verb::Send,
            Message::Send2 { .. } => Verb::Send2,
            Message::SendA { .. } => Verb::SendA,
            Message::SendA2 { .. } => Verb::SendA2,
            Message::List => Verb::List,
            Message::SendF { .. } => Verb::SendF,
            Message::RecvF { .. } => Verb::RecvF,
            Message::RecvF4 { .. } => Verb::RecvF4,
            Message::Listen { .. } => Verb::Listen,
            Message::Recv { .. } => Verb::Recv,
            Message::Terminate { .. } => Verb::Terminate,
            Message::Idle => Verb::Idle,
            Message::Print { .. } => Verb::Print,
            Message::Error { .. } => Verb::Error,
        }
    }

    /// A `PRINT` message whose text is clamped to fit one frame.
    pub fn print(text: impl Into<String>) -> Message {
        Message::Print { text: clamp(text.into(), FRAME_LEN - "PRINT ".len()) }
    }

    /// An `ERROR` message whose text is clamped to fit one frame.
    pub fn error(text: impl Into<String>) -> Message {
        Message::Error { text: clamp(text.into(), FRAME_LEN - "ERROR ".len()) }
    }

    /// Decode a command frame (or a bare script line).
    ///
    /// Trailing NUL padding and ASCII whitespace are stripped before the verb
    /// token is matched, pinning down the historically inconsistent handling
    /// of trailing newlines.
    pub fn decode(bytes: &[u8]) -> Result<Message, ProtocolError> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let text =
            std::str::from_utf8(&bytes[..end]).map_err(|_| ProtocolError::NotText)?.trim_end();

        let (token, rest) = match text.split_once(' ') {
            Some((token, rest)) => (token, Some(rest)),
            None => (text, None),
        };
        let verb = Verb::from_token(token)
            .ok_or_else(|| ProtocolError::UnknownVerb(token.to_string()))?;

        match verb {
            Verb::Register => {
                let [user, pass] = fixed_fields(verb, rest)?;
                Ok(Message::Register { user: user.to_string(), pass: pass.to_string() })
            }
            Verb::Login => {
                // Two arguments is the request form, one is the reply form.
                let fields = all_fields(rest);
                match fields.as_slice() {
                    [user, pass] => Ok(Message::Login {
                        user: (*user).to_string(),
                        pass: (*pass).to_string(),
                    }),
                    [user] => Ok(Message::LoginOk { user: (*user).to_string() }),
                    _ => Err(malformed(verb, "expected `user pass` or `user`")),
                }
            }
            Verb::Logout => Ok(Message::Logout),
            Verb::Send => Ok(Message::Send { text: text_field(rest) }),
            Verb::SendA => Ok(Message::SendA { text: text_field(rest) }),
            Verb::Send2 => {
                let (to, text) = targeted_fields(verb, rest)?;
                Ok(Message::Send2 { to, text })
            }
            Verb::SendA2 => {
                let (to, text) = targeted_fields(verb, rest)?;
                Ok(Message::SendA2 { to, text })
            }
            Verb::List => Ok(Message::List),
            Verb::SendF => {
                let [filename] = fixed_fields(verb, rest)?;
                Ok(Message::SendF { filename: filename.to_string() })
            }
            Verb::RecvF => {
                let [user, size, filename] = fixed_fields(verb, rest)?;
                Ok(Message::RecvF {
                    user: user.to_string(),
                    size: parse_size(size)?,
                    filename: filename.to_string(),
                })
            }
            Verb::RecvF4 => {
                let [target, user, size, filename] = fixed_fields(verb, rest)?;
                Ok(Message::RecvF4 {
                    target: target.to_string(),
                    user: user.to_string(),
                    size: parse_size(size)?,
                    filename: filename.to_string(),
                })
            }
            Verb::Listen => {
                let [user, filename] = fixed_fields(verb, rest)?;
                Ok(Message::Listen { user: user.to_string(), filename: filename.to_string() })
            }
            Verb::Recv => {
                let [size, filename] = fixed_fields(verb, rest)?;
                Ok(Message::Recv { size: parse_size(size)?, filename: filename.to_string() })
            }
            Verb::Terminate => {
                let [user] = fixed_fields(verb, rest)?;
                Ok(Message::Terminate { user: user.to_string() })
            }
            Verb::Idle => Ok(Message::Idle),
            Verb::Print => Ok(Message::Print { text: text_field(rest) }),
            Verb::Error => Ok(Message::Error { text: text_field(rest) }),
        }
    }

    /// Encode this message as a NUL-padded [`FRAME_LEN`]-byte frame.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let text = self.to_string();
        if text.len() > FRAME_LEN {
            return Err(ProtocolError::Overflow { len: text.len(), max: FRAME_LEN });
        }
        let mut frame = vec![0u8; FRAME_LEN];
        frame[..text.len()].copy_from_slice(text.as_bytes());
        Ok(frame)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Register { user, pass } => write!(f, "REGISTER {user} {pass}"),
            Message::Login { user, pass } => write!(f, "LOGIN {user} {pass}"),
            Message::LoginOk { user } => write!(f, "LOGIN {user}"),
            Message::Logout => f.write_str("LOGOUT"),
            Message::Send { text } => write!(f, "SEND {text}"),
            Message::Send2 { to, text } => write!(f, "SEND2 {to} {text}"),
            Message::SendA { text } => write!(f, "SENDA {text}"),
            Message::SendA2 { to, text } => write!(f, "SENDA2 {to} {text}"),
            Message::List => f.write_str("LIST"),
            Message::SendF { filename } => write!(f, "SENDF {filename}"),
            Message::RecvF { user, size, filename } => {
                write!(f, "RECVF {user} {size} {filename}")
            }
            Message::RecvF4 { target, user, size, filename } => {
                write!(f, "RECVF4 {target} {user} {size} {filename}")
            }
            Message::Listen { user, filename } => write!(f, "LISTEN {user} {filename}"),
            Message::Recv { size, filename } => write!(f, "RECV {size} {filename}"),
            Message::Terminate { user } => write!(f, "TERMINATE {user}"),
            Message::Idle => f.write_str("IDLE"),
            Message::Print { text } => write!(f, "PRINT {text}"),
            Message::Error { text } => write!(f, "ERROR {text}"),
        }
    }
}

fn malformed(verb: Verb, reason: &'static str) -> ProtocolError {
    ProtocolError::Malformed { verb: verb.as_str(), reason }
}

/// Exactly `N` whitespace-delimited argument tokens.
fn fixed_fields<const N: usize>(
    verb: Verb,
    rest: Option<&str>,
) -> Result<[&str; N], ProtocolError> {
    let fields = all_fields(rest);
    <[&str; N]>::try_from(fields).map_err(|_| malformed(verb, "wrong argument count"))
}

fn all_fields(rest: Option<&str>) -> Vec<&str> {
    rest.map(str::split_whitespace).map(Iterator::collect).unwrap_or_default()
}

/// The raw remainder of the line; missing arguments decode as empty text.
fn text_field(rest: Option<&str>) -> String {
    rest.unwrap_or_default().to_string()
}

/// `user` then free text, for the targeted message verbs.
fn targeted_fields(verb: Verb, rest: Option<&str>) -> Result<(String, String), ProtocolError> {
    let rest = rest.ok_or_else(|| malformed(verb, "expected `user msg`"))?;
    let (to, text) =
        rest.split_once(' ').ok_or_else(|| malformed(verb, "expected `user msg`"))?;
    if to.is_empty() {
        return Err(malformed(verb, "empty target user"));
    }
    Ok((to.to_string(), text.to_string()))
}

fn parse_size(field: &str) -> Result<usize, ProtocolError> {
    field.parse().map_err(|_| ProtocolError::InvalidSize(field.to_string()))
}

/// Truncate `text` to at most `budget` bytes on a character boundary.
fn clamp(mut text: String, budget: usize) -> String {
    if text.len() > budget {
        let mut cut = budget;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Vec<u8> {
        let mut buf = vec![0u8; FRAME_LEN];
        buf[..text.len()].copy_from_slice(text.as_bytes());
        buf
    }

    #[test]
    fn decodes_padded_frames() {
        let msg = Message::decode(&frame("REGISTER alice pass1")).unwrap();
        assert_eq!(
            msg,
            Message::Register { user: "alice".to_string(), pass: "pass1".to_string() }
        );
    }

    #[test]
    fn trailing_whitespace_is_canonicalized() {
        assert_eq!(Message::decode(b"LOGOUT").unwrap(), Message::Logout);
        assert_eq!(Message::decode(b"LOGOUT\n").unwrap(), Message::Logout);
        assert_eq!(Message::decode(&frame("LOGOUT \n")).unwrap(), Message::Logout);
    }

    #[test]
    fn login_disambiguates_by_argument_count() {
        assert_eq!(
            Message::decode(b"LOGIN alice pass1").unwrap(),
            Message::Login { user: "alice".to_string(), pass: "pass1".to_string() }
        );
        assert_eq!(
            Message::decode(b"LOGIN alice").unwrap(),
            Message::LoginOk { user: "alice".to_string() }
        );
        assert!(Message::decode(b"LOGIN a b c").is_err());
    }

    #[test]
    fn message_text_keeps_internal_spaces() {
        assert_eq!(
            Message::decode(b"SEND hello there world").unwrap(),
            Message::Send { text: "hello there world".to_string() }
        );
        assert_eq!(
            Message::decode(b"SEND2 bob hi bob").unwrap(),
            Message::Send2 { to: "bob".to_string(), text: "hi bob".to_string() }
        );
    }

    #[test]
    fn upload_header_parses_size() {
        assert_eq!(
            Message::decode(b"RECVF alice 1024 notes.txt").unwrap(),
            Message::RecvF {
                user: "alice".to_string(),
                size: 1024,
                filename: "notes.txt".to_string()
            }
        );
        assert!(matches!(
            Message::decode(b"RECVF alice big notes.txt"),
            Err(ProtocolError::InvalidSize(_))
        ));
    }

    #[test]
    fn unknown_verb_is_fatal() {
        assert!(matches!(
            Message::decode(b"SENDF2 notes.txt"),
            Err(ProtocolError::UnknownVerb(_))
        ));
    }

    #[test]
    fn encode_pads_to_frame_len() {
        let bytes = Message::Idle.encode().unwrap();
        assert_eq!(bytes.len(), FRAME_LEN);
        assert_eq!(&bytes[..4], b"IDLE");
        assert!(bytes[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn encode_rejects_oversized_messages() {
        let msg = Message::Send { text: "x".repeat(FRAME_LEN) };
        assert!(matches!(msg.encode(), Err(ProtocolError::Overflow { .. })));
    }

    #[test]
    fn print_constructor_clamps_to_fit() {
        let msg = Message::print("y".repeat(FRAME_LEN * 2));
        assert_eq!(msg.encode().unwrap().len(), FRAME_LEN);
    }

    #[test]
    fn empty_frame_is_unknown_verb() {
        assert!(matches!(
            Message::decode(&[0u8; FRAME_LEN]),
            Err(ProtocolError::UnknownVerb(_))
        ));
    }
}
