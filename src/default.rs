use crate::config::Config;
use crate::error::Result;
use crate::MailCatcher;
use log::info;
use once_cell::sync::Lazy;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

static DEFAULT: Lazy<Mutex<Option<MailCatcher>>> = Lazy::new(|| Mutex::new(None));

/// The process-wide catcher, started on first use with [`Config::from_env`].
///
/// Later calls return the same handle until [`stop_default`] is called.
pub fn default_server() -> Result<MailCatcher> {
    let mut slot = DEFAULT.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(catcher) = slot.as_ref() {
        return Ok(catcher.clone());
    }
    let catcher = MailCatcher::start(Config::from_env())?;
    info!("started default mail catcher");
    *slot = Some(catcher.clone());
    Ok(catcher)
}

/// Stop the process-wide catcher, if running, and forget it.
pub fn stop_default() -> Result<()> {
    let catcher = DEFAULT
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    match catcher {
        Some(catcher) => catcher.stop(STOP_TIMEOUT),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HTTP_PORT_ENV, SMTP_PORT_ENV};
    use crate::store::Draft;
    use std::env;

    #[test]
    fn shared_until_stopped() {
        env::set_var(SMTP_PORT_ENV, "0");
        env::set_var(HTTP_PORT_ENV, "0");

        let first = default_server().unwrap();
        let second = default_server().unwrap();
        assert_eq!(first.smtp_addr(), second.smtp_addr());
        assert_eq!(first.http_addr(), second.http_addr());
        first.store().append(Draft::default());
        assert_eq!(second.emails().len(), 1);

        stop_default().unwrap();
        stop_default().unwrap();

        let third = default_server().unwrap();
        assert!(third.emails().is_empty());
        stop_default().unwrap();
    }
}
