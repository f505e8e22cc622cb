use core::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A command line received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ehlo(String),
    Helo(String),
    /// `MAIL FROM:<path>`, with any ESMTP parameters ignored.
    MailFrom(String),
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Vrfy(String),
    Auth {
        mechanism: String,
        initial: Option<String>,
    },
    Quit,
}

/// Why a line couldn't be turned into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The verb isn't one the server implements.
    Unrecognised(String),
    /// The verb is known but its arguments are malformed.
    Syntax(&'static str),
}

impl CommandError {
    pub const fn code(&self) -> u16 {
        match self {
            Self::Unrecognised(_) => 500,
            Self::Syntax(_) => 501,
        }
    }
}

impl Display for CommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unrecognised(verb) => write!(f, "Command not recognised: {verb}"),
            Self::Syntax(reason) => f.write_str(reason),
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ehlo(domain) => write!(f, "EHLO {domain}"),
            Self::Helo(domain) => write!(f, "HELO {domain}"),
            Self::MailFrom(from) => write!(f, "MAIL FROM:<{from}>"),
            Self::RcptTo(to) => write!(f, "RCPT TO:<{to}>"),
            Self::Data => f.write_str("DATA"),
            Self::Rset => f.write_str("RSET"),
            Self::Noop => f.write_str("NOOP"),
            Self::Vrfy(who) => write!(f, "VRFY {who}"),
            Self::Auth { mechanism, .. } => write!(f, "AUTH {mechanism}"),
            Self::Quit => f.write_str("QUIT"),
        }
    }
}

/// Extracts the path from `<path> [params]`, tolerating a missing pair of
/// angle brackets.
fn path(argument: &str) -> Result<String, CommandError> {
    let argument = argument.trim_start();

    if let Some(rest) = argument.strip_prefix('<') {
        let (path, _params) = rest
            .split_once('>')
            .ok_or(CommandError::Syntax("Unterminated path"))?;
        return Ok(path.trim().to_string());
    }

    argument
        .split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or(CommandError::Syntax("Missing path"))
}

/// Splits `FROM:<x>` style arguments on the keyword, case-insensitively.
fn after_keyword<'a>(argument: &'a str, keyword: &str) -> Result<&'a str, CommandError> {
    let argument = argument.trim_start();

    match argument.get(..keyword.len()) {
        Some(head) if head.eq_ignore_ascii_case(keyword) => Ok(&argument[keyword.len()..]),
        _ => Err(CommandError::Syntax("Syntax error in parameters")),
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, argument) = line.split_once(' ').unwrap_or((line, ""));
        let argument = argument.trim();

        match verb.to_ascii_uppercase().as_str() {
            "EHLO" | "HELO" if argument.is_empty() => {
                Err(CommandError::Syntax("Domain name required"))
            }
            "EHLO" => Ok(Self::Ehlo(argument.to_string())),
            "HELO" => Ok(Self::Helo(argument.to_string())),
            "MAIL" => path(after_keyword(argument, "FROM:")?).map(Self::MailFrom),
            "RCPT" => {
                let to = path(after_keyword(argument, "TO:")?)?;
                if to.is_empty() {
                    Err(CommandError::Syntax("Recipient address required"))
                } else {
                    Ok(Self::RcptTo(to))
                }
            }
            "DATA" => Ok(Self::Data),
            "RSET" => Ok(Self::Rset),
            "NOOP" => Ok(Self::Noop),
            "QUIT" => Ok(Self::Quit),
            "VRFY" => Ok(Self::Vrfy(argument.to_string())),
            "AUTH" => {
                let mut parts = argument.split_whitespace();
                let mechanism = parts
                    .next()
                    .ok_or(CommandError::Syntax("Mechanism required"))?
                    .to_ascii_uppercase();

                Ok(Self::Auth {
                    mechanism,
                    initial: parts.next().map(str::to_string),
                })
            }
            _ => Err(CommandError::Unrecognised(verb.to_string())),
        }
    }
}
