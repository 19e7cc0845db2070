//! The SMTP state machine for a single connection.
//!
//! Lines read from the client are fed to [`Session::process`], which returns the reply to
//! send back. Decisions about what to do with the mail are delegated to a [`Handler`].
//! Commands are accepted in any order outside of the DATA phase.

use std::io;
use std::net::IpAddr;

use log::{error, trace};

use crate::smtp_server::parser::{parse, parse_auth_response, Cmd};
use crate::smtp_server::response::*;

/// Receives the envelope and body of each mail transaction.
///
/// All methods have a default implementation that accepts and does nothing. One handler
/// instance is created for each connection.
pub(crate) trait Handler {
    /// Called when a client sends a ehlo or helo message
    fn helo(&mut self, _ip: IpAddr, _domain: &str) -> Response {
        OK
    }

    /// Called when the envelope sender is declared
    fn mail(&mut self, _from: &str) -> Response {
        OK
    }

    /// Called for every recipient
    fn rcpt(&mut self, _to: &str) -> Response {
        OK
    }

    /// Called when a data command is received
    fn data_start(&mut self) -> Response {
        OK
    }

    /// Called with every unstuffed line of the body, line ending included
    fn data(&mut self, _buf: &[u8]) -> io::Result<()> {
        Ok(())
    }

    /// Called once the terminating dot has been received
    fn data_end(&mut self) -> Response {
        OK
    }

    /// Called on RSET, the transaction so far must be discarded
    fn reset(&mut self) {}

    fn auth_plain(
        &mut self,
        _authorization_id: &str,
        _authentication_id: &str,
        _password: &str,
    ) -> Response {
        INVALID_CREDENTIALS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SmtpState {
    Idle,
    /// A sender has been declared
    Enveloped,
    /// At least one recipient has been declared
    Addressed,
    /// Waiting for the answer to an AUTH PLAIN challenge
    Auth { resume: Resume },
    Data,
}

// Where to go once an auth challenge is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resume {
    Idle,
    Enveloped,
    Addressed,
}

impl Resume {
    fn state(self) -> SmtpState {
        match self {
            Resume::Idle => SmtpState::Idle,
            Resume::Enveloped => SmtpState::Enveloped,
            Resume::Addressed => SmtpState::Addressed,
        }
    }
}

/// A single smtp session connected to a single client
pub(crate) struct Session<H: Handler> {
    name: String,
    ip: IpAddr,
    handler: H,
    // None once the session has been closed
    state: Option<SmtpState>,
}

impl<H: Handler> Session<H> {
    pub fn new(name: impl Into<String>, ip: IpAddr, handler: H) -> Self {
        Self {
            name: name.into(),
            ip,
            handler,
            state: Some(SmtpState::Idle),
        }
    }

    /// Get a greeting to send to the client
    pub fn greeting(&self) -> Response {
        Response::dynamic(220, format!("{} ESMTP Service Ready", self.name), Vec::new())
    }

    #[cfg(test)]
    pub fn state(&self) -> Option<SmtpState> {
        self.state
    }

    pub fn in_data(&self) -> bool {
        self.state == Some(SmtpState::Data)
    }

    #[cfg(test)]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Process a line sent by the client, line ending included.
    ///
    /// Returns a response that should be written back to the client.
    pub fn process(&mut self, line: &[u8]) -> Response {
        let state = self.state;
        let response = match state {
            Some(SmtpState::Data) => self.data_line(line),
            Some(SmtpState::Auth { resume }) => self.auth_line(resume, strip_line_ending(line)),
            Some(current) => {
                let line = strip_line_ending(line);
                trace!("> {}", String::from_utf8_lossy(line));
                match parse(line) {
                    Ok(cmd) => self.command(current, cmd),
                    Err(res) => res,
                }
            }
            None => INVALID_STATE,
        };
        response.log();
        response
    }

    fn command(&mut self, current: SmtpState, cmd: Cmd) -> Response {
        let (response, next) = match cmd {
            Cmd::Helo { domain } => {
                let res = self.handler.helo(self.ip, domain);
                (res, current)
            }
            Cmd::Ehlo { domain } => {
                let res = self.handler.helo(self.ip, domain);
                if res.is_error {
                    (res, current)
                } else {
                    (self.ehlo_response(domain), current)
                }
            }
            Cmd::Mail { reverse_path } => {
                let res = self.handler.mail(reverse_path);
                (res, SmtpState::Enveloped)
            }
            Cmd::Rcpt { forward_path } => {
                let res = self.handler.rcpt(forward_path);
                (res, SmtpState::Addressed)
            }
            Cmd::Data => {
                let res = self.handler.data_start();
                if res.is_error {
                    (res, current)
                } else {
                    (START_DATA, SmtpState::Data)
                }
            }
            Cmd::Rset => {
                self.handler.reset();
                (OK, SmtpState::Idle)
            }
            Cmd::Noop => (OK, current),
            Cmd::Vrfy => (VERIFY_RESPONSE, current),
            Cmd::Quit => (GOODBYE, current),
            Cmd::AuthPlain(creds) => {
                let res = self.handler.auth_plain(
                    &creds.authorization_id,
                    &creds.authentication_id,
                    &creds.password,
                );
                (res, current)
            }
            Cmd::AuthPlainEmpty => {
                let resume = match current {
                    SmtpState::Enveloped => Resume::Enveloped,
                    SmtpState::Addressed => Resume::Addressed,
                    _ => Resume::Idle,
                };
                (EMPTY_AUTH_CHALLENGE, SmtpState::Auth { resume })
            }
            Cmd::AuthUnsupported => (UNSUPPORTED_AUTH, current),
        };
        self.transition(response, current, next)
    }

    // An error reply keeps the current state, a closing reply ends the session
    fn transition(&mut self, res: Response, current: SmtpState, next: SmtpState) -> Response {
        self.state = if res.action == Action::Close {
            None
        } else if res.is_error {
            Some(current)
        } else {
            Some(next)
        };
        res
    }

    fn auth_line(&mut self, resume: Resume, line: &[u8]) -> Response {
        trace!("> _auth_");
        let res = if line == b"*" {
            AUTH_CANCELLED
        } else {
            match parse_auth_response(line) {
                Ok(creds) => self.handler.auth_plain(
                    &creds.authorization_id,
                    &creds.authentication_id,
                    &creds.password,
                ),
                Err(res) => res,
            }
        };
        self.state = Some(resume.state());
        res
    }

    fn data_line(&mut self, mut line: &[u8]) -> Response {
        if line == b".\r\n" || line == b".\n" {
            trace!("> _data_");
            let res = self.handler.data_end();
            return self.transition(res, SmtpState::Idle, SmtpState::Idle);
        }
        if line.starts_with(b".") {
            line = &line[1..];
        }
        match self.handler.data(line) {
            Ok(()) => EMPTY_RESPONSE,
            Err(e) => {
                error!("Error saving message: {}", e);
                self.handler.reset();
                self.state = None;
                TRANSACTION_FAILED
            }
        }
    }

    fn ehlo_response(&self, domain: &str) -> Response {
        let extensions = vec!["PIPELINING", "8BITMIME", "AUTH PLAIN"];
        Response::dynamic(250, format!("{} Hello {}", self.name, domain), extensions)
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
