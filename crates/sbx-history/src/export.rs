use crate::analyze::SessionExecutionHistory;
use crate::error::HistoryError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl std::str::FromStr for ExportFormat {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "markdown" => Ok(Self::Markdown),
            other => Err(HistoryError::UnsupportedFormat(other.to_string())),
        }
    }
}

pub fn export_execution_history(history: &SessionExecutionHistory, format: ExportFormat) -> Result<String, HistoryError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(history).unwrap_or_default()),
        ExportFormat::Markdown => Ok(render_markdown(history)),
    }
}

fn render_markdown(history: &SessionExecutionHistory) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Session {}\n\n", history.session_id));

    out.push_str("## Summary\n\n");
    out.push_str(&format!("- Tasks: {}\n", history.tasks.len()));
    out.push_str(&format!("- Overall success rate: {:.0}%\n\n", history.overall_success_rate * 100.0));

    out.push_str("## Achievements\n\n");
    if history.key_achievements.is_empty() {
        out.push_str("- none recorded\n\n");
    } else {
        for item in &history.key_achievements {
            out.push_str(&format!("- {item}\n"));
        }
        out.push('\n');
    }

    out.push_str("## Remaining Issues\n\n");
    if history.remaining_issues.is_empty() {
        out.push_str("- none\n\n");
    } else {
        for item in &history.remaining_issues {
            out.push_str(&format!("- {item}\n"));
        }
        out.push('\n');
    }

    out.push_str("## Recommendations\n\n");
    if history.recommendations.is_empty() {
        out.push_str("- none\n");
    } else {
        for item in &history.recommendations {
            out.push_str(&format!("- {item}\n"));
        }
    }

    out
}
