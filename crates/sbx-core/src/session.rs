use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::isolate::Isolate;

/// A live handle to an isolate, tracked by the lifecycle manager.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub isolate: Isolate,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub metadata: HashMap<String, String>,
}

impl Session {
    pub fn new(session_id: String, isolate: Isolate) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            isolate,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            metadata: HashMap::new(),
        }
    }

    /// Record an access, bumping `last_accessed` and `access_count`.
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
    }

    pub fn is_idle(&self, timeout: chrono::Duration) -> bool {
        Utc::now() - self.last_accessed > timeout
    }
}
