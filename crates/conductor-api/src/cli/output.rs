//! Shared rendering helpers for CLI output.

use anyhow::Result;
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use conductor_types::action::ActionStatus;
use conductor_types::execution::ExecutionStatus;
use conductor_types::workflow::WorkflowStatus;
use serde::Serialize;
use uuid::Uuid;

/// How results are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    /// Styled text is printed only when neither `--json` nor `--quiet` is set.
    pub fn is_text(&self) -> bool {
        !self.json && !self.quiet
    }

    pub fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        if !self.quiet {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        Ok(())
    }
}

pub fn table(header: Vec<Cell>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn short_id(id: &Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

pub fn format_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn workflow_status_cell(status: WorkflowStatus) -> Cell {
    let color = match status {
        WorkflowStatus::Active => Color::Green,
        WorkflowStatus::Draft => Color::Yellow,
        WorkflowStatus::Deprecated => Color::DarkYellow,
        WorkflowStatus::Archived => Color::DarkGrey,
    };
    Cell::new(status).fg(color)
}

pub fn execution_status_cell(status: ExecutionStatus) -> Cell {
    let color = match status {
        ExecutionStatus::Completed => Color::Green,
        ExecutionStatus::Failed => Color::Red,
        ExecutionStatus::Cancelled => Color::DarkYellow,
        ExecutionStatus::Running => Color::Cyan,
        ExecutionStatus::Pending => Color::Grey,
    };
    Cell::new(status).fg(color)
}

pub fn action_status_cell(status: ActionStatus) -> Cell {
    let color = match status {
        ActionStatus::Completed => Color::Green,
        ActionStatus::Failed => Color::Red,
        ActionStatus::Skipped => Color::DarkGrey,
        ActionStatus::Cancelled => Color::DarkYellow,
        ActionStatus::Running => Color::Cyan,
        ActionStatus::Pending => Color::Grey,
    };
    Cell::new(status).fg(color)
}

/// Single-line preview of a JSON value for table cells.
pub fn preview(value: &serde_json::Value, max_chars: usize) -> String {
    let text = value.to_string();
    if text.chars().count() <= max_chars {
        return text;
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn preview_truncates_long_values() {
        assert_eq!(preview(&json!({"a": 1}), 20), r#"{"a":1}"#);
        assert_eq!(preview(&json!("abcdefghij"), 8), r#""abcd..."#);
    }

    #[test]
    fn short_id_is_prefix() {
        let id = Uuid::now_v7();
        assert!(id.to_string().starts_with(&short_id(&id)));
        assert_eq!(short_id(&id).len(), 8);
    }

    #[test]
    fn quiet_suppresses_text() {
        let out = Output { json: false, quiet: true };
        assert!(!out.is_text());
        assert!(Output { json: false, quiet: false }.is_text());
    }
}
