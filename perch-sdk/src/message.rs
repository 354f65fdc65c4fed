//! IRC line grammar (RFC 1459/2812 with IRCv3 tags).
//!
//! One received line parses into a [`Message`]; outbound lines are
//! built with [`format_line`]. Neither side carries the CRLF
//! terminator; the write path appends it once.

use crate::error::ParseError;

/// Sender prefix of a message, split into its parts.
///
/// Wire form is `nickname[!user]@host`; `user` and `host` are only
/// present when the prefix contains the corresponding separators. A
/// bare server name parses as `nick` with no user or host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    /// The prefix exactly as received, without the leading `:`.
    pub raw: String,
    /// Nickname (or server name) portion.
    pub nick: String,
    /// Ident, from the `!user` segment.
    pub user: Option<String>,
    /// Host, from the `@host` segment.
    pub host: Option<String>,
}

impl Prefix {
    fn parse(raw: &str) -> Self {
        match raw.split_once('@') {
            Some((left, host)) => match left.split_once('!') {
                Some((nick, user)) => Self {
                    raw: raw.to_string(),
                    nick: nick.to_string(),
                    user: Some(user.to_string()),
                    host: Some(host.to_string()),
                },
                None => Self {
                    raw: raw.to_string(),
                    nick: left.to_string(),
                    user: None,
                    host: Some(host.to_string()),
                },
            },
            None => Self {
                raw: raw.to_string(),
                nick: raw.to_string(),
                user: None,
                host: None,
            },
        }
    }
}

/// One parsed protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Raw IRCv3 tag string (between `@` and the first space), left
    /// uninterpreted.
    pub tags: Option<String>,
    /// Sender prefix, when the line carried one.
    pub prefix: Option<Prefix>,
    /// Command token or three-digit numeric. Never empty.
    pub command: String,
    /// Middle parameters, in order.
    pub params: Vec<String>,
    /// Trailing parameter (after ` :`); the only field that may
    /// contain spaces.
    pub trailing: Option<String>,
}

impl Message {
    /// Parse one line. The CRLF terminator may be present or absent.
    ///
    /// Grammar, all parts optional except the command:
    /// `[@tags ][:prefix ]command[ middles][ :trailing]`
    pub fn parse(line: &str) -> Result<Message, ParseError> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        let tags = match rest.strip_prefix('@') {
            Some(after) => match after.split_once(' ') {
                Some((tags, tail)) => {
                    rest = tail.trim_start_matches(' ');
                    Some(tags.to_string())
                }
                None => return Err(ParseError::MissingCommand),
            },
            None => None,
        };

        let prefix = match rest.strip_prefix(':') {
            Some(after) => match after.split_once(' ') {
                Some((prefix, tail)) => {
                    rest = tail.trim_start_matches(' ');
                    Some(Prefix::parse(prefix))
                }
                None => return Err(ParseError::MissingCommand),
            },
            None => None,
        };

        let command_end = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        let command = &rest[..command_end];
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }
        rest = &rest[command_end..];

        // Middles run until the line ends or a token starts with `:`;
        // everything after the first ` :` is the trailing parameter.
        let (middles, trailing) = match rest.find(" :") {
            Some(idx) => (&rest[..idx], Some(rest[idx + 2..].to_string())),
            None => (rest, None),
        };
        let params: Vec<String> = middles
            .split_ascii_whitespace()
            .map(str::to_string)
            .collect();

        Ok(Message {
            tags,
            prefix,
            command: command.to_string(),
            params,
            trailing,
        })
    }
}

/// Build a well-formed outbound line body.
///
/// Parameters are space-joined; the last one is introduced with `:`
/// when it contains spaces, is empty, or itself starts with `:`. No
/// line terminator is appended.
pub fn format_line(command: &str, params: &[&str]) -> String {
    let mut line = command.to_string();
    for (i, param) in params.iter().enumerate() {
        let last = i + 1 == params.len();
        if last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
            line.push_str(" :");
            line.push_str(param);
        } else {
            line.push(' ');
            line.push_str(param);
        }
    }
    line
}
