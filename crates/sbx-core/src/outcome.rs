use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failure,
    Partial,
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    Automatic,
    Manual,
    External,
}

/// A derived judgement about whether an [`Action`](crate::action::Action) achieved its intent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifiedOutcome {
    pub action_id: String,
    pub outcome_type: String,
    pub status: OutcomeStatus,
    pub description: String,
    pub evidence: HashMap<String, String>,
    pub verified_at: DateTime<Utc>,
    pub method: VerificationMethod,
}

impl VerifiedOutcome {
    pub fn new(
        action_id: impl Into<String>,
        outcome_type: impl Into<String>,
        status: OutcomeStatus,
        description: impl Into<String>,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            outcome_type: outcome_type.into(),
            status,
            description: description.into(),
            evidence: HashMap::new(),
            verified_at: Utc::now(),
            method: VerificationMethod::Automatic,
        }
    }

    pub fn with_evidence(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.evidence.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_success_checks_status() {
        let outcome = VerifiedOutcome::new("a1", "command_executed", OutcomeStatus::Success, "ok");
        assert!(outcome.is_success());
        let failed = VerifiedOutcome::new("a2", "command_executed", OutcomeStatus::Failure, "bad");
        assert!(!failed.is_success());
    }
}
