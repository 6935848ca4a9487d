use std::collections::BTreeSet;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use unicode_width::UnicodeWidthStr;

use crate::activity::{ActivityEntry, TaskSnapshot};
use crate::config::Config;
use crate::datetime::{compact_date_serde, to_project_date};
use crate::dto::task_to_dto;
use crate::lanes::{Lane, ViewMode, group_into_lanes};
use crate::task::{Task, TaskId, TaskStatus, short_id};

const TITLE_WIDTH: usize = 40;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
        })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, out, tasks, selection, now), fields(count = tasks.len()))]
    pub fn write_tasks<W: Write>(
        &self,
        out: W,
        view: ViewMode,
        tasks: &[&Task],
        selection: &BTreeSet<TaskId>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let lanes = group_into_lanes(tasks);
        match view {
            ViewMode::List => self.write_list(out, &lanes, selection, to_project_date(now)),
            ViewMode::Board => self.write_board(out, &lanes, selection),
        }
    }

    fn write_list<W: Write>(
        &self,
        mut out: W,
        lanes: &[Lane<'_>],
        selection: &BTreeSet<TaskId>,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        for (idx, lane) in lanes.iter().enumerate() {
            if idx > 0 {
                writeln!(out)?;
            }
            let heading = format!("{} ({})", lane.status.title(), lane.count());
            writeln!(out, "{}", self.paint(&heading, status_color(lane.status)))?;
            if lane.tasks.is_empty() {
                writeln!(out, "  no tasks")?;
                continue;
            }

            let headers: Vec<String> = ["", "ID", "Title", "Category", "Due", "Files"]
                .map(str::to_string)
                .to_vec();
            let rows: Vec<Vec<String>> = lane
                .tasks
                .iter()
                .map(|task| {
                    let mark = if selection.contains(&task.id) { "*" } else { "" };
                    let due = task.due_date.format("%Y-%m-%d").to_string();
                    let due = if is_overdue(task, today) {
                        self.paint(&due, "31")
                    } else {
                        due
                    };
                    let files = if task.attachments.is_empty() {
                        String::new()
                    } else {
                        task.attachments.len().to_string()
                    };
                    vec![
                        mark.to_string(),
                        self.paint(&task.short_id(), "33"),
                        truncate(&task.title, TITLE_WIDTH),
                        task.category.as_str().to_string(),
                        due,
                        files,
                    ]
                })
                .collect();

            write_table(&mut out, headers, rows)?;
        }
        Ok(())
    }

    fn write_board<W: Write>(
        &self,
        mut out: W,
        lanes: &[Lane<'_>],
        selection: &BTreeSet<TaskId>,
    ) -> anyhow::Result<()> {
        let headers: Vec<String> = lanes
            .iter()
            .map(|lane| self.paint(&format!("{} ({})", lane.status.title(), lane.count()), status_color(lane.status)))
            .collect();
        let depth = lanes.iter().map(Lane::count).max().unwrap_or(0);

        let rows: Vec<Vec<String>> = (0..depth)
            .map(|row| {
                lanes
                    .iter()
                    .map(|lane| {
                        lane.tasks
                            .get(row)
                            .map(|task| {
                                let mark = if selection.contains(&task.id) { "*" } else { " " };
                                format!("{mark}{} {}", task.short_id(), truncate(&task.title, TITLE_WIDTH / 2))
                            })
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect();

        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip(self, out, task))]
    pub fn write_task_info<W: Write>(&self, mut out: W, task: &Task, selected: bool) -> anyhow::Result<()> {
        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        if let Some(description) = task.description.as_deref() {
            writeln!(out, "description {description}")?;
        }
        writeln!(out, "status      {}", self.paint(task.status.as_str(), status_color(task.status)))?;
        writeln!(out, "category    {}", task.category)?;
        writeln!(out, "due         {}", task.due_date.format("%Y-%m-%d"))?;
        writeln!(out, "order       {}", task.order)?;
        writeln!(out, "created     {}", compact_date_serde::format(&task.created_at))?;
        writeln!(out, "updated     {}", compact_date_serde::format(&task.updated_at))?;
        if selected {
            writeln!(out, "selected    yes")?;
        }
        for attachment in &task.attachments {
            writeln!(out, "attachment  {} {}", attachment.name, attachment.locator)?;
        }
        Ok(())
    }

    pub fn write_json<W: Write>(&self, mut out: W, tasks: &[&Task], selection: &BTreeSet<TaskId>) -> anyhow::Result<()> {
        let dtos: Vec<_> = tasks
            .iter()
            .map(|task| task_to_dto(task, selection.contains(&task.id)))
            .collect();
        serde_json::to_writer_pretty(&mut out, &dtos)?;
        writeln!(out)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, out, entries), fields(count = entries.len()))]
    pub fn write_history<W: Write>(&self, mut out: W, entries: &[ActivityEntry]) -> anyhow::Result<()> {
        if entries.is_empty() {
            writeln!(out, "no activity")?;
            return Ok(());
        }

        let headers: Vec<String> = ["When", "Kind", "Task", "Change"].map(str::to_string).to_vec();
        let rows: Vec<Vec<String>> = entries
            .iter()
            .map(|entry| {
                vec![
                    compact_date_serde::format(&entry.timestamp),
                    entry.kind.as_str().to_string(),
                    self.paint(&short_id(entry.task_id), "33"),
                    describe_change(entry),
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn status_color(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => "36",
        TaskStatus::InProgress => "33",
        TaskStatus::Completed => "32",
    }
}

fn is_overdue(task: &Task, today: NaiveDate) -> bool {
    task.status != TaskStatus::Completed && task.due_date < today
}

fn truncate(text: &str, max: usize) -> String {
    if UnicodeWidthStr::width(text) <= max {
        return text.to_string();
    }
    let mut out = String::new();
    for ch in text.chars() {
        if UnicodeWidthStr::width(out.as_str()) + 2 > max {
            break;
        }
        out.push(ch);
    }
    out.push('…');
    out
}

/// One-line summary of what an activity entry changed.
fn describe_change(entry: &ActivityEntry) -> String {
    let empty = TaskSnapshot::default();
    let before = entry.before.as_ref().unwrap_or(&empty);
    let after = entry.after.as_ref().unwrap_or(&empty);
    let mut parts = Vec::new();

    if let Some(title) = after.title.as_ref().or(before.title.as_ref()) {
        parts.push(format!("\"{}\"", truncate(title, TITLE_WIDTH / 2)));
    }
    if let (Some(old), Some(new)) = (before.status, after.status) {
        parts.push(format!("status {old} -> {new}"));
    }
    if let (Some(old), Some(new)) = (before.category, after.category) {
        parts.push(format!("category {old} -> {new}"));
    }
    if let (Some(old), Some(new)) = (before.due_date, after.due_date) {
        parts.push(format!("due {old} -> {new}"));
    }
    if let Some(attachments) = after.attachments.as_ref() {
        let names: Vec<&str> = attachments.iter().map(|a| a.name.as_str()).collect();
        if !names.is_empty() {
            parts.push(format!("files [{}]", names.join(", ")));
        }
    }

    parts.join(", ")
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(header).as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (idx, header) in headers.iter().enumerate() {
        write_cell(&mut writer, header, widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, width) in widths.iter().enumerate() {
            write_cell(&mut writer, row.get(idx).map(String::as_str).unwrap_or(""), *width)?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn write_cell<W: Write>(writer: &mut W, cell: &str, width: usize) -> anyhow::Result<()> {
    let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
    let padding = width.saturating_sub(visible_width);
    write!(writer, "{}{} ", cell, " ".repeat(padding))?;
    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::collection::TaskCollection;
    use crate::task::{TaskDraft, TaskPatch};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    fn sample() -> TaskCollection {
        let mut collection = TaskCollection::new("u1");
        collection.create(TaskDraft::titled("write report"), noon()).unwrap();
        let done = collection.create(TaskDraft::titled("file taxes"), noon()).unwrap();
        collection
            .update(done, TaskPatch::status(TaskStatus::Completed), noon())
            .unwrap();
        collection
    }

    #[test]
    fn list_view_groups_by_lane() {
        let collection = sample();
        let tasks: Vec<&Task> = collection.tasks().iter().collect();
        let mut out = Vec::new();

        Renderer::plain()
            .write_tasks(&mut out, ViewMode::List, &tasks, &BTreeSet::new(), noon())
            .unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("Todo (1)\n"));
        assert!(text.contains("In-Progress (0)\n  no tasks"));
        assert!(text.contains("Completed (1)"));
        assert!(text.contains("file taxes"));
        assert!(!text.contains('\x1b'));
    }

    #[test]
    fn board_view_marks_selection() {
        let collection = sample();
        let tasks: Vec<&Task> = collection.tasks().iter().collect();
        let selection: BTreeSet<TaskId> = [tasks[0].id].into();
        let mut out = Vec::new();

        Renderer::plain()
            .write_tasks(&mut out, ViewMode::Board, &tasks, &selection, noon())
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let first_row = text.lines().nth(2).unwrap();

        assert!(first_row.starts_with(&format!("*{}", tasks[0].short_id())));
        assert!(first_row.contains(&format!(" {}", tasks[1].short_id())));
    }

    #[test]
    fn history_describes_status_changes() {
        let collection = sample();
        let entries: Vec<ActivityEntry> = collection.activity().entries().cloned().collect();
        let mut out = Vec::new();

        Renderer::plain().write_history(&mut out, &entries).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("STATUS_CHANGE"));
        assert!(text.contains("status TO-DO -> COMPLETED"));
    }

    #[test]
    fn table_pads_by_visible_width() {
        let mut out = Vec::new();
        write_table(
            &mut out,
            vec!["A".to_string(), "B".to_string()],
            vec![vec!["\x1b[33mxy\x1b[0m".to_string(), "z".to_string()]],
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(strip_ansi(&text), "A  B \n-- - \nxy z \n");
    }

    #[test]
    fn truncates_long_titles() {
        assert_eq!(truncate("short", 10), "short");
        let cut = truncate("a very long title indeed", 10);
        assert!(UnicodeWidthStr::width(cut.as_str()) <= 10);
        assert!(cut.ends_with('…'));
    }
}
