use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use sbx_core::{Action, ActionKind, ActionPayload, CommandInfo, ErrorInfo, FileChange, FileChangeKind};

use crate::error::JournalError;
use crate::query::{Query, Summary};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS actions (
    id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    kind TEXT NOT NULL,
    description TEXT NOT NULL,
    details TEXT NOT NULL,
    session_id TEXT,
    task_id TEXT
);
CREATE TABLE IF NOT EXISTS file_changes (
    action_id TEXT NOT NULL REFERENCES actions(id),
    file_path TEXT NOT NULL,
    change_type TEXT NOT NULL,
    before TEXT,
    after TEXT,
    timestamp TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS commands (
    action_id TEXT NOT NULL REFERENCES actions(id),
    command TEXT NOT NULL,
    working_directory TEXT NOT NULL,
    stdout TEXT NOT NULL,
    stderr TEXT NOT NULL,
    exit_code INTEGER NOT NULL,
    duration REAL NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS errors (
    action_id TEXT NOT NULL REFERENCES actions(id),
    error_type TEXT NOT NULL,
    message TEXT NOT NULL,
    stack_trace TEXT,
    context TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_actions_timestamp ON actions(timestamp);
CREATE INDEX IF NOT EXISTS idx_actions_session ON actions(session_id);
CREATE INDEX IF NOT EXISTS idx_actions_task ON actions(task_id);
CREATE INDEX IF NOT EXISTS idx_actions_kind ON actions(kind);
CREATE INDEX IF NOT EXISTS idx_file_changes_action ON file_changes(action_id);
CREATE INDEX IF NOT EXISTS idx_commands_action ON commands(action_id);
CREATE INDEX IF NOT EXISTS idx_errors_action ON errors(action_id);
";

/// Indexed append-only action journal, backed by a single SQLite
/// connection guarded by an in-process mutex. SQLite's own file lock
/// already covers cross-process exclusion at the database-file
/// granularity; the mutex here only serializes writers within this
/// process, the same division of labor `sbx-lock` draws between an
/// advisory cross-process flock and ordinary in-process synchronization.
pub struct Journal {
    conn: Mutex<Connection>,
}

impl Journal {
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, JournalError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn log_action(&self, mut action: Action) -> Result<String, JournalError> {
        let conn = self.conn.lock().expect("journal mutex poisoned");
        insert_action(&conn, &action)?;
        match std::mem::replace(&mut action.payload, ActionPayload::None) {
            ActionPayload::Command(info) => insert_command(&conn, &action.id, &info)?,
            ActionPayload::FileChange(change) => insert_file_change(&conn, &action.id, &change)?,
            ActionPayload::Error(info) => insert_error(&conn, &action.id, &info)?,
            ActionPayload::None => {}
        }
        Ok(action.id)
    }

    pub fn log_command(
        &self,
        description: impl Into<String>,
        session_id: Option<String>,
        task_id: Option<String>,
        info: CommandInfo,
    ) -> Result<String, JournalError> {
        let mut action = Action::new(ActionKind::CommandExecute, description);
        action.session_id = session_id;
        action.task_id = task_id;
        action.payload = ActionPayload::Command(info);
        self.log_action(action)
    }

    pub fn log_file_change(
        &self,
        description: impl Into<String>,
        session_id: Option<String>,
        task_id: Option<String>,
        change: FileChange,
    ) -> Result<String, JournalError> {
        let kind = match change.change_type {
            FileChangeKind::Create => ActionKind::FileCreate,
            FileChangeKind::Modify => ActionKind::FileModify,
            FileChangeKind::Delete => ActionKind::FileDelete,
        };
        let mut action = Action::new(kind, description);
        action.session_id = session_id;
        action.task_id = task_id;
        action.payload = ActionPayload::FileChange(change);
        self.log_action(action)
    }

    pub fn log_error(
        &self,
        description: impl Into<String>,
        session_id: Option<String>,
        task_id: Option<String>,
        info: ErrorInfo,
    ) -> Result<String, JournalError> {
        tracing::warn!(error_type = %info.error_type, session_id = ?session_id.as_deref(), "error recorded in journal");
        let mut action = Action::new(ActionKind::TaskError, description);
        action.session_id = session_id;
        action.task_id = task_id;
        action.payload = ActionPayload::Error(info);
        self.log_action(action)
    }

    pub fn get_actions(&self, query: &Query) -> Result<Vec<Action>, JournalError> {
        let conn = self.conn.lock().expect("journal mutex poisoned");
        let mut sql = String::from(
            "SELECT id, timestamp, kind, description, details, session_id, task_id FROM actions WHERE 1=1",
        );
        let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(sid) = &query.session_id {
            sql.push_str(" AND session_id = ?");
            binds.push(Box::new(sid.clone()));
        }
        if let Some(tid) = &query.task_id {
            sql.push_str(" AND task_id = ?");
            binds.push(Box::new(tid.clone()));
        }
        if let Some(start) = &query.start_time {
            sql.push_str(" AND timestamp >= ?");
            binds.push(Box::new(start.to_rfc3339()));
        }
        if let Some(end) = &query.end_time {
            sql.push_str(" AND timestamp <= ?");
            binds.push(Box::new(end.to_rfc3339()));
        }
        sql.push_str(" ORDER BY timestamp ASC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
            if let Some(offset) = query.offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }

        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(params_ref.as_slice(), |row| {
            let kind_str: String = row.get(2)?;
            let details_json: String = row.get(4)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                kind_str,
                row.get::<_, String>(3)?,
                details_json,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut actions = Vec::new();
        for row in rows {
            let (id, ts, kind_str, description, details_json, session_id, task_id) = row?;
            let kind = parse_kind(&kind_str);
            if let Some(kinds) = &query.kinds {
                if !kinds.contains(&kind) {
                    continue;
                }
            }
            let payload = load_payload(&conn, &id, kind)?;
            actions.push(Action {
                id,
                timestamp: ts.parse().unwrap_or_else(|_| Utc::now()),
                kind,
                description,
                details: serde_json::from_str(&details_json).unwrap_or_default(),
                session_id,
                task_id,
                payload,
            });
        }
        Ok(actions)
    }

    pub fn get_log_summary(
        &self,
        session_id: Option<&str>,
        task_id: Option<&str>,
    ) -> Result<Summary, JournalError> {
        let query = Query {
            session_id: session_id.map(str::to_string),
            task_id: task_id.map(str::to_string),
            ..Default::default()
        };
        let actions = self.get_actions(&query)?;
        let mut actions_by_kind: HashMap<String, u64> = HashMap::new();
        let mut files_modified = 0u64;
        let mut commands_executed = 0u64;
        let mut errors_encountered = 0u64;
        let mut earliest: Option<DateTime<Utc>> = None;
        let mut latest: Option<DateTime<Utc>> = None;

        for action in &actions {
            *actions_by_kind.entry(action.kind.to_string()).or_insert(0) += 1;
            match &action.payload {
                ActionPayload::FileChange(_) => files_modified += 1,
                ActionPayload::Command(_) => commands_executed += 1,
                ActionPayload::Error(_) => errors_encountered += 1,
                ActionPayload::None => {}
            }
            earliest = Some(earliest.map_or(action.timestamp, |e| e.min(action.timestamp)));
            latest = Some(latest.map_or(action.timestamp, |l| l.max(action.timestamp)));
        }

        Ok(Summary {
            total_actions: actions.len() as u64,
            actions_by_kind,
            files_modified,
            commands_executed,
            errors_encountered,
            time_range: earliest.zip(latest),
        })
    }

    pub fn clear_logs(
        &self,
        session_id: Option<&str>,
        before_ts: Option<DateTime<Utc>>,
    ) -> Result<u64, JournalError> {
        if session_id.is_none() && before_ts.is_none() {
            return Err(JournalError::RetentionScopeRequired);
        }
        let conn = self.conn.lock().expect("journal mutex poisoned");
        let mut sql = String::from("SELECT id FROM actions WHERE 1=1");
        let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(sid) = session_id {
            sql.push_str(" AND session_id = ?");
            binds.push(Box::new(sid.to_string()));
        }
        if let Some(ts) = before_ts {
            sql.push_str(" AND timestamp < ?");
            binds.push(Box::new(ts.to_rfc3339()));
        }
        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b.as_ref()).collect();
        let ids: Vec<String> = stmt
            .query_map(params_ref.as_slice(), |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        for id in &ids {
            conn.execute("DELETE FROM file_changes WHERE action_id = ?1", params![id])?;
            conn.execute("DELETE FROM commands WHERE action_id = ?1", params![id])?;
            conn.execute("DELETE FROM errors WHERE action_id = ?1", params![id])?;
            conn.execute("DELETE FROM actions WHERE id = ?1", params![id])?;
        }
        Ok(ids.len() as u64)
    }
}

fn insert_action(conn: &Connection, action: &Action) -> Result<(), JournalError> {
    conn.execute(
        "INSERT INTO actions (id, timestamp, kind, description, details, session_id, task_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            action.id,
            action.timestamp.to_rfc3339(),
            action.kind.as_str(),
            action.description,
            serde_json::to_string(&action.details).unwrap_or_default(),
            action.session_id,
            action.task_id,
        ],
    )?;
    Ok(())
}

fn insert_command(conn: &Connection, action_id: &str, info: &CommandInfo) -> Result<(), JournalError> {
    conn.execute(
        "INSERT INTO commands (action_id, command, working_directory, stdout, stderr, exit_code, duration, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            action_id,
            info.command,
            info.working_directory,
            info.stdout,
            info.stderr,
            info.exit_code,
            info.duration_s,
            info.timestamp.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn insert_file_change(conn: &Connection, action_id: &str, change: &FileChange) -> Result<(), JournalError> {
    let change_type = match change.change_type {
        FileChangeKind::Create => "create",
        FileChangeKind::Modify => "modify",
        FileChangeKind::Delete => "delete",
    };
    conn.execute(
        "INSERT INTO file_changes (action_id, file_path, change_type, before, after, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            action_id,
            change.file_path,
            change_type,
            change.before,
            change.after,
            change.timestamp.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn insert_error(conn: &Connection, action_id: &str, info: &ErrorInfo) -> Result<(), JournalError> {
    conn.execute(
        "INSERT INTO errors (action_id, error_type, message, stack_trace, context, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            action_id,
            info.error_type,
            info.message,
            info.stack_trace,
            serde_json::to_string(&info.context).unwrap_or_default(),
            info.timestamp.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn load_payload(conn: &Connection, action_id: &str, kind: ActionKind) -> Result<ActionPayload, JournalError> {
    match kind {
        ActionKind::CommandExecute => {
            let row = conn
                .query_row(
                    "SELECT command, working_directory, stdout, stderr, exit_code, duration, timestamp
                     FROM commands WHERE action_id = ?1",
                    params![action_id],
                    |row| {
                        Ok(CommandInfo {
                            command: row.get(0)?,
                            working_directory: row.get(1)?,
                            stdout: row.get(2)?,
                            stderr: row.get(3)?,
                            exit_code: row.get(4)?,
                            duration_s: row.get(5)?,
                            timestamp: row
                                .get::<_, String>(6)?
                                .parse()
                                .unwrap_or_else(|_| Utc::now()),
                        })
                    },
                )
                .optional()?;
            Ok(row.map(ActionPayload::Command).unwrap_or(ActionPayload::None))
        }
        ActionKind::FileCreate | ActionKind::FileModify | ActionKind::FileDelete => {
            let row = conn
                .query_row(
                    "SELECT file_path, change_type, before, after, timestamp FROM file_changes WHERE action_id = ?1",
                    params![action_id],
                    |row| {
                        let change_type: String = row.get(1)?;
                        Ok(FileChange {
                            file_path: row.get(0)?,
                            change_type: match change_type.as_str() {
                                "create" => FileChangeKind::Create,
                                "delete" => FileChangeKind::Delete,
                                _ => FileChangeKind::Modify,
                            },
                            before: row.get(2)?,
                            after: row.get(3)?,
                            timestamp: row
                                .get::<_, String>(4)?
                                .parse()
                                .unwrap_or_else(|_| Utc::now()),
                        })
                    },
                )
                .optional()?;
            Ok(row.map(ActionPayload::FileChange).unwrap_or(ActionPayload::None))
        }
        ActionKind::TaskError => {
            let row = conn
                .query_row(
                    "SELECT error_type, message, stack_trace, context, timestamp FROM errors WHERE action_id = ?1",
                    params![action_id],
                    |row| {
                        let context_json: String = row.get(3)?;
                        Ok(ErrorInfo {
                            error_type: row.get(0)?,
                            message: row.get(1)?,
                            stack_trace: row.get(2)?,
                            context: serde_json::from_str(&context_json).unwrap_or_default(),
                            timestamp: row
                                .get::<_, String>(4)?
                                .parse()
                                .unwrap_or_else(|_| Utc::now()),
                        })
                    },
                )
                .optional()?;
            Ok(row.map(ActionPayload::Error).unwrap_or(ActionPayload::None))
        }
        _ => Ok(ActionPayload::None),
    }
}

fn parse_kind(raw: &str) -> ActionKind {
    match raw {
        "command_execute" => ActionKind::CommandExecute,
        "file_create" => ActionKind::FileCreate,
        "file_modify" => ActionKind::FileModify,
        "file_delete" => ActionKind::FileDelete,
        "package_install" => ActionKind::PackageInstall,
        "environment_setup" => ActionKind::EnvironmentSetup,
        "session_cleanup" => ActionKind::SessionCleanup,
        "task_start" => ActionKind::TaskStart,
        "task_complete" => ActionKind::TaskComplete,
        "task_error" => ActionKind::TaskError,
        "system_config" => ActionKind::SystemConfig,
        _ => ActionKind::LifecycleEvent,
    }
}
