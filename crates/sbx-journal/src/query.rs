use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sbx_core::ActionKind;

#[derive(Clone, Debug, Default)]
pub struct Query {
    pub session_id: Option<String>,
    pub task_id: Option<String>,
    pub kinds: Option<Vec<ActionKind>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct Summary {
    pub total_actions: u64,
    pub actions_by_kind: HashMap<String, u64>,
    pub files_modified: u64,
    pub commands_executed: u64,
    pub errors_encountered: u64,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}
