//! An SMTP sink for tests and local development.
//!
//! Every message delivered to the SMTP listener is kept in memory and can be
//! read back through a small JSON API or directly through [`MailCatcher`].
//!
//! ```no_run
//! use mailcatcher::{Config, MailCatcher};
//! use std::time::Duration;
//!
//! let catcher = MailCatcher::start(Config::new(0, 0))?;
//! println!("SMTP on {}, HTTP on {}", catcher.smtp_addr(), catcher.http_addr());
//! // ... deliver some mail ...
//! for email in catcher.emails() {
//!     println!("{}: {}", email.id, email.subject);
//! }
//! catcher.stop(Duration::from_secs(5))?;
//! # Ok::<(), mailcatcher::Error>(())
//! ```

mod api_dto;
mod api_server;
mod config;
mod default;
mod error;
mod smtp_server;
mod store;

pub use crate::api_dto::EmailList;
pub use crate::config::{AuthPolicy, Config, DEFAULT_HTTP_PORT, DEFAULT_SMTP_PORT};
pub use crate::default::{default_server, stop_default};
pub use crate::error::{Error, Result};
pub use crate::smtp_server::mail::parse_subject;
pub use crate::store::{Draft, Email, Store};

use crate::api_server::HttpApi;
use crate::smtp_server::SmtpServer;
use log::info;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

struct Inner {
    store: Store,
    smtp: SmtpServer,
    http: HttpApi,
}

/// Handle to a running SMTP listener and HTTP API sharing one [`Store`].
///
/// Clones refer to the same servers.
#[derive(Clone)]
pub struct MailCatcher {
    inner: Arc<Inner>,
}

impl MailCatcher {
    /// Bind both listeners and start serving in background threads.
    ///
    /// Both ports are bound before any serving thread starts, so an occupied
    /// port is reported here and leaves nothing running.
    pub fn start(config: Config) -> Result<MailCatcher> {
        let smtp_addr = SocketAddr::new(config.host, config.smtp_port);
        let smtp_listener = smtp_server::bind(&config)
            .map_err(|source| Error::SmtpBind { addr: smtp_addr, source })?;
        let http_addr = SocketAddr::new(config.host, config.http_port);
        let http_listener = api_server::bind(&config)
            .map_err(|source| Error::HttpBind { addr: http_addr, source })?;

        let store = Store::new();
        let http = HttpApi::serve(http_listener, store.clone(), &config)?;
        let smtp = match SmtpServer::serve(smtp_listener, store.clone(), &config) {
            Ok(smtp) => smtp,
            Err(e) => {
                let _ = http.stop(Duration::from_secs(1));
                return Err(e.into());
            }
        };

        info!(
            "mail catcher ready: SMTP {} HTTP {}",
            smtp.local_addr(),
            http.local_addr()
        );
        Ok(MailCatcher {
            inner: Arc::new(Inner { store, smtp, http }),
        })
    }

    /// Start with [`Config::default`]: SMTP on 1025 and HTTP on 8025.
    pub fn with_defaults() -> Result<MailCatcher> {
        MailCatcher::start(Config::default())
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// All received messages, oldest first.
    pub fn emails(&self) -> Vec<Email> {
        self.inner.store.list_all()
    }

    pub fn email(&self, id: &str) -> Option<Email> {
        self.inner.store.get(id)
    }

    pub fn clear(&self) {
        self.inner.store.clear_all()
    }

    pub fn smtp_addr(&self) -> SocketAddr {
        self.inner.smtp.local_addr()
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.inner.http.local_addr()
    }

    /// Stop accepting SMTP connections, then shut the HTTP API down, giving
    /// in-flight requests up to `timeout` to finish.
    ///
    /// Returns [`Error::ShutdownTimeout`] if requests were still running at
    /// the deadline; those are dropped later, once
    /// [`Config::http_shutdown_timeout`] runs out. Stopping an already stopped
    /// catcher does nothing. Must not be called from inside an async runtime.
    pub fn stop(&self, timeout: Duration) -> Result<()> {
        let smtp = self.inner.smtp.stop();
        self.inner.http.stop(timeout)?;
        Ok(smtp?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{IpAddr, Ipv4Addr, TcpListener, TcpStream};
    use std::time::Instant;

    fn local() -> Config {
        Config::new(0, 0).with_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    fn url(catcher: &MailCatcher, path: &str) -> String {
        format!("http://{}{}", catcher.http_addr(), path)
    }

    fn deliver(addr: SocketAddr, from: &str, to: &[&str], data: &str) {
        let stream = TcpStream::connect(addr).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = stream;
        let mut reply = || {
            let mut line = String::new();
            loop {
                line.clear();
                reader.read_line(&mut line).unwrap();
                if line.as_bytes().get(3) != Some(&b'-') {
                    return line.clone();
                }
            }
        };
        assert!(reply().starts_with("220 "));
        let mut command = |cmd: String| {
            writer.write_all(cmd.as_bytes()).unwrap();
            writer.write_all(b"\r\n").unwrap();
        };
        command("EHLO client.test".to_string());
        assert!(reply().starts_with("250 "));
        command(format!("MAIL FROM:<{}>", from));
        assert!(reply().starts_with("250 "));
        for rcpt in to {
            command(format!("RCPT TO:<{}>", rcpt));
            assert!(reply().starts_with("250 "));
        }
        command("DATA".to_string());
        assert!(reply().starts_with("354 "));
        command(format!("{}\r\n.", data));
        assert!(reply().starts_with("250 "));
        command("QUIT".to_string());
        assert!(reply().starts_with("221 "));
    }

    #[test]
    fn smtp_to_http() {
        let catcher = MailCatcher::start(local()).unwrap();
        deliver(
            catcher.smtp_addr(),
            "a@x.com",
            &["b@x.com"],
            "Subject: T\r\n\r\nHi",
        );

        let list: EmailList = ureq::get(&url(&catcher, "/api/v1/emails"))
            .call()
            .unwrap()
            .into_json()
            .unwrap();
        assert_eq!(list.total, 1);
        assert_eq!(list.count, 1);
        let email = &list.items[0];
        assert_eq!(email.id, "msg-0");
        assert_eq!(email.from, "a@x.com");
        assert_eq!(email.to, vec!["b@x.com"]);
        assert_eq!(email.subject, "T");
        assert_eq!(email.body, "Subject: T\r\n\r\nHi\r\n");

        let single: Email = ureq::get(&url(&catcher, "/api/v1/emails/msg-0"))
            .call()
            .unwrap()
            .into_json()
            .unwrap();
        assert_eq!(&single, email);
        assert_eq!(catcher.email("msg-0").as_ref(), Some(email));

        let deleted = ureq::delete(&url(&catcher, "/api/v1/emails")).call().unwrap();
        assert_eq!(deleted.status(), 204);
        assert!(catcher.emails().is_empty());

        catcher.stop(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn not_found_over_http() {
        let catcher = MailCatcher::start(local()).unwrap();
        match ureq::get(&url(&catcher, "/api/v1/emails/msg-3")).call() {
            Err(ureq::Error::Status(404, resp)) => {
                assert_eq!(resp.header("Access-Control-Allow-Origin"), Some("*"));
                assert_eq!(resp.into_string().unwrap(), "Email not found");
            }
            other => panic!("expected 404, got {:?}", other.map(|r| r.status())),
        }
        catcher.stop(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn preflight_over_http() {
        let catcher = MailCatcher::start(local()).unwrap();
        let resp = ureq::request("OPTIONS", &url(&catcher, "/api/v1/emails"))
            .call()
            .unwrap();
        assert_eq!(resp.status(), 204);
        assert_eq!(
            resp.header("Access-Control-Allow-Methods"),
            Some("GET, POST, DELETE, OPTIONS")
        );
        catcher.stop(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn programmatic_access() {
        let catcher = MailCatcher::start(local()).unwrap();
        let copy = catcher.clone();
        deliver(catcher.smtp_addr(), "", &["x@y.z", "w@y.z"], "no headers");
        assert_eq!(copy.emails().len(), 1);
        assert_eq!(copy.store().len(), 1);
        let email = copy.email("msg-0").unwrap();
        assert_eq!(email.from, "");
        assert_eq!(email.to, vec!["x@y.z", "w@y.z"]);
        assert_eq!(email.subject, "");
        copy.clear();
        assert!(catcher.emails().is_empty());
        catcher.stop(Duration::from_secs(5)).unwrap();
        copy.stop(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn stop_releases_smtp() {
        let catcher = MailCatcher::start(local()).unwrap();
        let addr = catcher.smtp_addr();
        catcher.stop(Duration::from_secs(5)).unwrap();
        assert!(TcpStream::connect(addr).is_err());
    }

    #[test]
    fn occupied_smtp_port() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let config = Config {
            smtp_port: port,
            ..local()
        };
        match MailCatcher::start(config) {
            Err(Error::SmtpBind { addr, .. }) => assert_eq!(addr.port(), port),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("start succeeded on an occupied port"),
        }
    }

    #[test]
    fn occupied_http_port() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let config = Config {
            http_port: port,
            ..local()
        };
        match MailCatcher::start(config) {
            Err(Error::HttpBind { addr, .. }) => assert_eq!(addr.port(), port),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("start succeeded on an occupied port"),
        }
    }

    #[test]
    fn stop_returns_at_deadline_with_request_in_flight() {
        let config = local().with_http_shutdown_timeout(Duration::from_secs(1));
        let catcher = MailCatcher::start(config).unwrap();
        let body = "x".repeat(4 * 1024 * 1024);
        for _ in 0..8 {
            catcher.store().append(Draft {
                body: body.clone(),
                ..Draft::default()
            });
        }

        // Start a large response and never read past its first byte
        let mut slow = TcpStream::connect(catcher.http_addr()).unwrap();
        slow.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        slow.write_all(b"GET /api/v1/emails HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        let mut first = [0u8; 1];
        slow.read_exact(&mut first).unwrap();

        let timeout = Duration::from_millis(500);
        let started = Instant::now();
        let res = catcher.stop(timeout);
        let elapsed = started.elapsed();
        match res {
            Err(Error::ShutdownTimeout(t)) => assert_eq!(t, timeout),
            other => panic!("expected a shutdown timeout, got {:?}", other),
        }
        assert!(elapsed < Duration::from_secs(3), "stop took {:?}", elapsed);
        assert!(TcpStream::connect(catcher.smtp_addr()).is_err());
        drop(slow);
    }
}
