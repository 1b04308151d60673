use sbx_core::{Action, ActionPayload};

use crate::error::JournalError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl std::str::FromStr for ExportFormat {
    type Err = JournalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(JournalError::UnsupportedFormat(other.to_string())),
        }
    }
}

pub fn export(actions: &[Action], format: ExportFormat) -> Result<String, JournalError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(actions).unwrap_or_default()),
        ExportFormat::Csv => Ok(export_csv(actions)),
    }
}

fn export_csv(actions: &[Action]) -> String {
    let mut out = String::from(
        "id,timestamp,kind,description,session_id,task_id,file_path,change_type,command,exit_code,error_type,error_message\n",
    );
    for action in actions {
        let (file_path, change_type, command, exit_code, error_type, error_message) = match &action.payload {
            ActionPayload::FileChange(fc) => (
                fc.file_path.clone(),
                format!("{:?}", fc.change_type),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
            ),
            ActionPayload::Command(cmd) => (
                String::new(),
                String::new(),
                csv_escape(&cmd.command),
                cmd.exit_code.to_string(),
                String::new(),
                String::new(),
            ),
            ActionPayload::Error(err) => (
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                err.error_type.clone(),
                csv_escape(&err.message),
            ),
            ActionPayload::None => Default::default(),
        };
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{},{}\n",
            action.id,
            action.timestamp.to_rfc3339(),
            action.kind,
            csv_escape(&action.description),
            action.session_id.clone().unwrap_or_default(),
            action.task_id.clone().unwrap_or_default(),
            file_path,
            change_type,
            command,
            exit_code,
            error_type,
            error_message,
        ));
    }
    out
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
