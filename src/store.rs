use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A message captured by the SMTP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    /// `msg-<n>`, where `n` is the number of messages stored before this one.
    pub id: String,
    /// Envelope sender, empty when the client never sent `MAIL FROM`.
    pub from: String,
    /// Envelope recipients in the order they were declared.
    pub to: Vec<String>,
    /// Value of the first `Subject` header, or empty.
    pub subject: String,
    /// The raw message: headers, blank line and body.
    pub body: String,
    /// When the message was stored.
    pub time: DateTime<Utc>,
}

/// A finished transaction that has not been stored yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draft {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// In-memory message store shared by the SMTP sessions and the HTTP API.
///
/// Cloning is cheap and every clone sees the same messages.
#[derive(Clone, Default)]
pub struct Store {
    emails: Arc<RwLock<Vec<Email>>>,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }

    /// Store a finished transaction, assigning its id and timestamp.
    ///
    /// Ids are derived from the current number of messages, so they start again at
    /// `msg-0` after [`Store::clear_all`].
    pub fn append(&self, draft: Draft) -> Email {
        let mut emails = self.write();
        let email = Email {
            id: format!("msg-{}", emails.len()),
            from: draft.from,
            to: draft.to,
            subject: draft.subject,
            body: draft.body,
            time: Utc::now(),
        };
        debug!("store {} from {:?} to {:?}", email.id, email.from, email.to);
        emails.push(email.clone());
        email
    }

    /// Snapshot of every message in insertion order.
    pub fn list_all(&self) -> Vec<Email> {
        self.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<Email> {
        self.read().iter().find(|email| email.id == id).cloned()
    }

    pub fn clear_all(&self) {
        let mut emails = self.write();
        debug!("clear {} messages", emails.len());
        emails.clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the lock cannot leave the Vec half-updated
    fn read(&self) -> RwLockReadGuard<'_, Vec<Email>> {
        self.emails.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Email>> {
        self.emails.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    fn draft(subject: &str) -> Draft {
        Draft {
            from: "a@x.com".to_string(),
            to: vec!["b@x.com".to_string()],
            subject: subject.to_string(),
            body: format!("Subject: {}\r\n\r\nHi", subject),
        }
    }

    #[test]
    fn ids_follow_insertion_order() {
        let store = Store::new();
        for n in 0..5 {
            let email = store.append(draft(&n.to_string()));
            assert_eq!(email.id, format!("msg-{}", n));
        }
        let ids: Vec<String> = store.list_all().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["msg-0", "msg-1", "msg-2", "msg-3", "msg-4"]);
    }

    #[test]
    fn get_returns_appended_record() {
        let store = Store::new();
        store.append(draft("first"));
        let second = store.append(draft("second"));
        assert_eq!(store.get("msg-1"), Some(second));
        assert_eq!(store.get("msg-2"), None);
        assert_eq!(store.get(""), None);
    }

    #[test]
    fn list_is_a_snapshot() {
        let store = Store::new();
        store.append(draft("one"));
        let snapshot = store.list_all();
        store.append(draft("two"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn clear_restarts_ids() {
        let store = Store::new();
        for n in 0..3 {
            store.append(draft(&n.to_string()));
        }
        store.clear_all();
        assert!(store.is_empty());
        assert_eq!(store.get("msg-2"), None);

        let email = store.append(draft("after"));
        assert_eq!(email.id, "msg-0");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("msg-0").map(|e| e.subject), Some("after".to_string()));
    }

    #[test]
    fn clones_share_messages() {
        let store = Store::new();
        let other = store.clone();
        other.append(draft("shared"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_appends_get_contiguous_ids() {
        let store = Store::new();
        let workers: Vec<_> = (0..300)
            .map(|n| {
                let store = store.clone();
                thread::spawn(move || store.append(draft(&n.to_string())).id)
            })
            .collect();
        let returned: HashSet<String> = workers.into_iter().map(|w| w.join().unwrap()).collect();

        let expected: HashSet<String> = (0..300).map(|n| format!("msg-{}", n)).collect();
        assert_eq!(returned, expected);
        let stored: Vec<String> = store.list_all().into_iter().map(|e| e.id).collect();
        let in_order: Vec<String> = (0..300).map(|n| format!("msg-{}", n)).collect();
        assert_eq!(stored, in_order);
    }
}
