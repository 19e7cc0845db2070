use log::trace;
use std::io;

// Empty response that sends nothing back to the client
pub(crate) const EMPTY_RESPONSE: Response = Response::empty();
/// Response to indicate that the SMTP session finished
pub(crate) const GOODBYE: Response = Response::fixed(221, "Bye");
/// Authentication succeeded
pub(crate) const AUTH_OK: Response = Response::fixed(235, "Authentication succeeded");
/// OK response
pub(crate) const OK: Response = Response::fixed(250, "OK");
// Non-commital response to VRFY
pub(crate) const VERIFY_RESPONSE: Response =
    Response::fixed(252, "Cannot VRFY user, but will accept message");
// Empty response sent as an auth challenge
pub(crate) const EMPTY_AUTH_CHALLENGE: Response = Response::fixed(334, "");
/// Response sent to the client before accepting data
pub(crate) const START_DATA: Response =
    Response::fixed(354, "Start mail input; end with <CRLF>.<CRLF>");
// Session has already been closed
pub(crate) const INVALID_STATE: Response =
    Response::fixed(421, "Internal service error, closing connection");
// Parser error
pub(crate) const SYNTAX_ERROR: Response = Response::fixed(500, "Syntax error, command unrecognized");
// Input line exceeded the configured maximum
pub(crate) const LINE_TOO_LONG: Response =
    Response::fixed_action(500, "Line too long", Action::Close);
// Known command with a missing or malformed argument
pub(crate) const MISSING_PARAMETER: Response =
    Response::fixed(501, "Syntax error in parameters or arguments");
// Client answered an auth challenge with "*"
pub(crate) const AUTH_CANCELLED: Response = Response::fixed(501, "Authentication cancelled");
pub(crate) const UNSUPPORTED_AUTH: Response =
    Response::fixed(504, "Unsupported authentication mechanism");
/// Bad authentication attempt
pub(crate) const INVALID_CREDENTIALS: Response =
    Response::fixed(535, "Authentication credentials invalid");
// The message body could not be stored
pub(crate) const TRANSACTION_FAILED: Response =
    Response::fixed_action(554, "Transaction failed", Action::Close);

/// Response contains a code and message to be sent back to the client
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Response {
    /// The three digit response code
    pub code: u16,
    message: Message,
    pub is_error: bool,
    /// The action to take after sending the response to the client
    pub action: Action,
}

#[derive(Clone, Debug, PartialEq)]
enum Message {
    Fixed(&'static str),
    Custom(String),
    Dynamic(String, Vec<&'static str>),
    Empty,
}

/// Action indicates the recommended action to take on a response
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub(crate) enum Action {
    /// Send the response and close the connection
    Close,
    /// Do not reply, wait for the client to send more data
    NoReply,
    /// Send a reply and keep the connection open
    Reply,
}

impl Response {
    pub(crate) const fn fixed(code: u16, message: &'static str) -> Self {
        Self::fixed_action(code, message, Response::action_from_code(code))
    }

    const fn action_from_code(code: u16) -> Action {
        match code {
            221 | 421 => Action::Close,
            _ => Action::Reply,
        }
    }

    pub(crate) const fn fixed_action(code: u16, message: &'static str, action: Action) -> Self {
        Self {
            code,
            message: Message::Fixed(message),
            is_error: code < 200 || code >= 400,
            action,
        }
    }

    pub(crate) fn custom(code: u16, message: String) -> Self {
        Self {
            code,
            message: Message::Custom(message),
            is_error: code < 200 || code >= 400,
            action: Response::action_from_code(code),
        }
    }

    // A response that is built dynamically and can be a multiline response
    pub(crate) fn dynamic(code: u16, head: String, tail: Vec<&'static str>) -> Self {
        Self {
            code,
            message: Message::Dynamic(head, tail),
            is_error: false,
            action: Action::Reply,
        }
    }

    const fn empty() -> Self {
        Self {
            code: 0,
            message: Message::Empty,
            is_error: false,
            action: Action::NoReply,
        }
    }

    /// Write the response to the given writer
    pub(crate) fn write_to(&self, out: &mut dyn io::Write) -> io::Result<()> {
        match &self.message {
            Message::Dynamic(head, tail) => {
                let separator = if tail.is_empty() { ' ' } else { '-' };
                write!(out, "{}{}{}\r\n", self.code, separator, head)?;
                for (i, line) in tail.iter().enumerate() {
                    let separator = if i + 1 == tail.len() { ' ' } else { '-' };
                    write!(out, "{}{}{}\r\n", self.code, separator, line)?;
                }
            }
            Message::Fixed(s) => write!(out, "{} {}\r\n", self.code, s)?,
            Message::Custom(s) => write!(out, "{} {}\r\n", self.code, s)?,
            Message::Empty => (),
        };
        Ok(())
    }

    pub(crate) fn log(&self) {
        if self.message != Message::Empty {
            let mut buf = Vec::new();
            let _ = self.write_to(&mut buf);
            trace!("< {}", String::from_utf8_lossy(&buf).trim_end());
        }
    }
}
