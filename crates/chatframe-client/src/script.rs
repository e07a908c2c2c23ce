//! Input-script parsing.
//!
//! A script is line-oriented: one command per line in the wire verb grammar,
//! plus the client-local `DELAY ms`, which suspends issuance and never
//! reaches the wire. Blank and whitespace-only lines are skipped.

use chatframe_proto::{Message, ProtocolError};
use thiserror::Error;

/// One parsed script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    /// A command to issue on the control connection (or, for `SENDF`, to
    /// start an upload).
    Wire(Message),
    /// Hold back the next command for this many milliseconds.
    Delay(u64),
}

/// Script parse failures, with the 1-based offending line.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// `DELAY` argument was missing or not a number.
    #[error("line {line}: invalid delay {value:?}")]
    BadDelay {
        /// Offending line number.
        line: usize,
        /// The argument as written.
        value: String,
    },

    /// The line is not a valid command.
    #[error("line {line}: {source}")]
    BadCommand {
        /// Offending line number.
        line: usize,
        /// Why it failed to parse.
        source: ProtocolError,
    },
}

/// Parse a whole script.
pub fn parse_script(text: &str) -> Result<Vec<ScriptCommand>, ScriptError> {
    let mut commands = Vec::new();
    for (n, raw) in text.lines().enumerate() {
        let line = n + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let (head, rest) = match trimmed.split_once(' ') {
            Some((head, rest)) => (head, rest.trim()),
            None => (trimmed, ""),
        };
        if head == "DELAY" {
            let ms = rest
                .parse()
                .map_err(|_| ScriptError::BadDelay { line, value: rest.to_string() })?;
            commands.push(ScriptCommand::Delay(ms));
            continue;
        }
        let msg = Message::decode(trimmed.as_bytes())
            .map_err(|source| ScriptError::BadCommand { line, source })?;
        commands.push(ScriptCommand::Wire(msg));
    }
    Ok(commands)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_delays_and_blanks() {
        let script = "REGISTER alice pass1\n\nDELAY 250\n   \nSEND hello there\n";
        let cmds = parse_script(script).unwrap();
        assert_eq!(
            cmds,
            vec![
                ScriptCommand::Wire(Message::Register {
                    user: "alice".to_string(),
                    pass: "pass1".to_string(),
                }),
                ScriptCommand::Delay(250),
                ScriptCommand::Wire(Message::Send { text: "hello there".to_string() }),
            ]
        );
    }

    #[test]
    fn delay_requires_a_number() {
        assert!(matches!(
            parse_script("DELAY soon"),
            Err(ScriptError::BadDelay { line: 1, .. })
        ));
        assert!(matches!(parse_script("DELAY"), Err(ScriptError::BadDelay { .. })));
    }

    #[test]
    fn unknown_verbs_are_reported_with_line_numbers() {
        let err = parse_script("LIST\nSENDF2 x.txt").unwrap_err();
        assert!(matches!(err, ScriptError::BadCommand { line: 2, .. }));
    }
}
