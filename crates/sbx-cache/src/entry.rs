use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Common header shared by every cache entry. Each cache specializes this
/// with its own value type and validity rule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheHeader {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
}

impl CacheHeader {
    pub fn new(key: impl Into<String>, ttl: Option<chrono::Duration>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            created_at: now,
            expires_at: ttl.map(|d| now + d),
            access_count: 0,
            last_accessed: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now() > exp,
            None => false,
        }
    }

    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed = Utc::now();
    }
}
