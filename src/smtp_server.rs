mod fsm;
pub(crate) mod mail;
mod parser;
mod response;

use crate::config::{AuthPolicy, Config};
use crate::smtp_server::fsm::{Handler, Session};
use crate::smtp_server::mail::parse_subject;
use crate::smtp_server::response::{Action, Response, AUTH_OK, INVALID_CREDENTIALS, LINE_TOO_LONG, OK};
use crate::store::{Draft, Store};
use log::{debug, error, info};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Collects one transaction at a time and hands it to the store.
struct MailHandler {
    store: Store,
    auth: AuthPolicy,
    from: String,
    rcpts: Vec<String>,
    body: Vec<u8>,
}

impl MailHandler {
    fn new(store: Store, auth: AuthPolicy) -> Self {
        MailHandler {
            store,
            auth,
            from: String::new(),
            rcpts: Vec::new(),
            body: Vec::new(),
        }
    }

    fn clear(&mut self) {
        self.from.clear();
        self.rcpts.clear();
        self.body.clear();
    }
}

impl Handler for MailHandler {
    fn mail(&mut self, from: &str) -> Response {
        self.from = from.to_string();
        OK
    }

    fn rcpt(&mut self, to: &str) -> Response {
        self.rcpts.push(to.to_string());
        OK
    }

    fn data_start(&mut self) -> Response {
        self.body.clear();
        OK
    }

    fn data(&mut self, buf: &[u8]) -> io::Result<()> {
        self.body.extend_from_slice(buf);
        Ok(())
    }

    fn data_end(&mut self) -> Response {
        let body = String::from_utf8_lossy(&self.body).into_owned();
        let draft = Draft {
            from: std::mem::take(&mut self.from),
            to: std::mem::take(&mut self.rcpts),
            subject: parse_subject(&body),
            body,
        };
        self.clear();
        let email = self.store.append(draft);
        Response::custom(250, format!("OK: queued as {}", email.id))
    }

    fn reset(&mut self) {
        self.clear();
    }

    fn auth_plain(
        &mut self,
        _authorization_id: &str,
        authentication_id: &str,
        _password: &str,
    ) -> Response {
        match self.auth {
            AuthPolicy::AcceptAny => {
                debug!("accept credentials for {:?}", authentication_id);
                AUTH_OK
            }
            AuthPolicy::RejectAll => INVALID_CREDENTIALS,
        }
    }
}

/// Settings shared by every connection of one listener.
struct SessionConfig {
    domain: String,
    max_line_length: usize,
    auth: AuthPolicy,
}

enum ReadLine {
    Line,
    Eof,
    TooLong,
}

// Read up to and including the next '\n', refusing lines longer than `max`
fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> io::Result<ReadLine> {
    buf.clear();
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(2);
    let n = reader.by_ref().take(limit).read_until(b'\n', buf)?;
    if n == 0 {
        return Ok(ReadLine::Eof);
    }
    let content = buf.len() - line_ending_len(buf);
    if content > max {
        return Ok(ReadLine::TooLong);
    }
    Ok(ReadLine::Line)
}

fn line_ending_len(line: &[u8]) -> usize {
    if line.ends_with(b"\r\n") {
        2
    } else if line.ends_with(b"\n") {
        1
    } else {
        0
    }
}

fn handle_connection(mut stream: TcpStream, store: Store, config: &SessionConfig) -> io::Result<()> {
    let peer = stream.peer_addr()?;
    debug!("smtp connection from {}", peer);
    let mut reader = BufReader::new(stream.try_clone()?);
    let handler = MailHandler::new(store, config.auth);
    let mut session = Session::new(config.domain.as_str(), peer.ip(), handler);
    send(&mut stream, &session.greeting())?;

    let mut line = Vec::with_capacity(1024);
    loop {
        match read_line(&mut reader, &mut line, config.max_line_length)? {
            ReadLine::Line => {}
            ReadLine::Eof if session.in_data() => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed during DATA",
                ));
            }
            ReadLine::Eof => {
                debug!("smtp connection from {} closed", peer);
                return Ok(());
            }
            ReadLine::TooLong => {
                send(&mut stream, &LINE_TOO_LONG)?;
                return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
            }
        }
        let res = session.process(&line);
        match res.action {
            Action::Reply => send(&mut stream, &res)?,
            Action::Close => {
                send(&mut stream, &res)?;
                debug!("smtp connection from {} finished", peer);
                return Ok(());
            }
            Action::NoReply => (),
        }
    }
}

fn send(stream: &mut TcpStream, res: &Response) -> io::Result<()> {
    let mut buf = Vec::with_capacity(64);
    res.write_to(&mut buf)?;
    stream.write_all(&buf)?;
    stream.flush()
}

/// Bind the SMTP listener without accepting connections yet.
pub(crate) fn bind(config: &Config) -> io::Result<TcpListener> {
    TcpListener::bind(SocketAddr::new(config.host, config.smtp_port))
}

/// A running SMTP accept loop.
pub(crate) struct SmtpServer {
    addr: SocketAddr,
    wake: SocketAddr,
    running: Arc<AtomicBool>,
    accept: Mutex<Option<JoinHandle<()>>>,
}

impl SmtpServer {
    /// Accept connections on `listener` in a background thread, one thread per client.
    pub fn serve(listener: TcpListener, store: Store, config: &Config) -> io::Result<SmtpServer> {
        let addr = listener.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let session_config = Arc::new(SessionConfig {
            domain: config.domain.clone(),
            max_line_length: config.max_line_length,
            auth: config.auth,
        });

        let accepting = running.clone();
        let accept = thread::Builder::new()
            .name("smtp-accept".to_string())
            .spawn(move || accept_loop(listener, store, session_config, accepting))?;
        info!("SMTP server listening on {}", addr);
        Ok(SmtpServer {
            addr,
            wake: wake_addr(addr),
            running,
            accept: Mutex::new(Some(accept)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections. Sessions already in progress run to completion.
    ///
    /// If the listener cannot be woken the server keeps running and `stop` may be retried.
    pub fn stop(&self) -> io::Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        // Wake the blocking accept so the loop sees the flag and drops the listener
        if let Err(e) = TcpStream::connect(self.wake) {
            error!("failed to wake SMTP listener on {}: {}", self.addr, e);
            self.running.store(true, Ordering::SeqCst);
            return Err(e);
        }
        let accept = self
            .accept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(accept) = accept {
            if accept.join().is_err() {
                error!("SMTP accept thread panicked");
            }
        }
        info!("SMTP server on {} stopped", self.addr);
        Ok(())
    }
}

fn accept_loop(
    listener: TcpListener,
    store: Store,
    config: Arc<SessionConfig>,
    running: Arc<AtomicBool>,
) {
    for stream in listener.incoming() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                error!("failed to accept SMTP connection: {}", e);
                continue;
            }
        };
        let store = store.clone();
        let config = config.clone();
        let spawned = thread::Builder::new()
            .name("smtp-session".to_string())
            .spawn(move || {
                if let Err(e) = handle_connection(stream, store, &config) {
                    debug!("smtp session aborted: {}", e);
                }
            });
        if let Err(e) = spawned {
            error!("failed to spawn SMTP session: {}", e);
        }
    }
}

// The listener may be bound to the unspecified address, which is not connectable everywhere
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}
