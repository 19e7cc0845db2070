use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use log::warn;

pub const DEFAULT_SMTP_PORT: u16 = 1025;
pub const DEFAULT_HTTP_PORT: u16 = 8025;
/// Long enough for single-line HTML bodies.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// How long HTTP workers keep serving in-flight requests after a stop.
pub const DEFAULT_HTTP_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub const SMTP_PORT_ENV: &str = "MAILCATCHER_SMTP_PORT";
pub const HTTP_PORT_ENV: &str = "MAILCATCHER_HTTP_PORT";

/// What to answer to `AUTH PLAIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPolicy {
    /// Every username and password is accepted. Only suitable for local testing.
    #[default]
    AcceptAny,
    /// Every attempt fails with 535. Unauthenticated mail is still accepted.
    RejectAll,
}

/// Runtime configuration of a [`MailCatcher`](crate::MailCatcher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address both listeners bind to.
    pub host: IpAddr,
    /// SMTP port, 0 picks a free one.
    pub smtp_port: u16,
    /// HTTP API port, 0 picks a free one.
    pub http_port: u16,
    /// Name used in the SMTP greeting.
    pub domain: String,
    /// Longest line accepted from an SMTP client, line ending excluded.
    pub max_line_length: usize,
    pub auth: AuthPolicy,
    /// Number of actix-web worker threads.
    pub http_workers: usize,
    /// Longest an HTTP worker waits for in-flight requests once stopped,
    /// in whole seconds. Requests still running after that are dropped.
    pub http_shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            smtp_port: DEFAULT_SMTP_PORT,
            http_port: DEFAULT_HTTP_PORT,
            domain: "localhost".to_string(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            auth: AuthPolicy::AcceptAny,
            http_workers: 2,
            http_shutdown_timeout: DEFAULT_HTTP_SHUTDOWN_TIMEOUT,
        }
    }
}

impl Config {
    pub fn new(smtp_port: u16, http_port: u16) -> Self {
        Config {
            smtp_port,
            http_port,
            ..Config::default()
        }
    }

    /// Default configuration with the ports taken from `MAILCATCHER_SMTP_PORT` and
    /// `MAILCATCHER_HTTP_PORT` when they are set to valid port numbers.
    pub fn from_env() -> Self {
        Config {
            smtp_port: env_or(SMTP_PORT_ENV, DEFAULT_SMTP_PORT),
            http_port: env_or(HTTP_PORT_ENV, DEFAULT_HTTP_PORT),
            ..Config::default()
        }
    }

    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    pub fn with_auth(mut self, auth: AuthPolicy) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_http_workers(mut self, http_workers: usize) -> Self {
        self.http_workers = http_workers.max(1);
        self
    }

    pub fn with_http_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.http_shutdown_timeout = timeout;
        self
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value.parse().unwrap_or_else(|_| {
            warn!("invalid {} value '{}', using default", key, value);
            default
        }),
        _ => default,
    }
}
