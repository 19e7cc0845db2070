use serde::{Deserialize, Serialize};

use crate::store::Email;

/// Body of `GET /api/v1/emails`.
#[derive(Debug, Serialize, Deserialize)]
pub struct EmailList {
    pub total: usize,
    pub count: usize,
    pub items: Vec<Email>,
}

impl EmailList {
    pub fn new(items: Vec<Email>) -> Self {
        EmailList {
            total: items.len(),
            count: items.len(),
            items,
        }
    }
}
