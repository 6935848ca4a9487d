use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::compact_date_serde;
use crate::error::TaskError;

pub type TaskId = Uuid;
pub type UserId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskStatus {
    #[serde(rename = "TO-DO")]
    Todo,
    #[serde(rename = "IN-PROGRESS")]
    InProgress,
    #[serde(rename = "COMPLETED")]
    Completed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Todo, TaskStatus::InProgress, TaskStatus::Completed];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "TO-DO",
            TaskStatus::InProgress => "IN-PROGRESS",
            TaskStatus::Completed => "COMPLETED",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            TaskStatus::Todo => "Todo",
            TaskStatus::InProgress => "In-Progress",
            TaskStatus::Completed => "Completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "to-do" | "todo" => Ok(TaskStatus::Todo),
            "in-progress" | "in_progress" | "inprogress" => Ok(TaskStatus::InProgress),
            "completed" | "done" => Ok(TaskStatus::Completed),
            other => Err(TaskError::Validation(format!("invalid status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    #[default]
    Work,
    Personal,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Work => "WORK",
            Category::Personal => "PERSONAL",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "work" => Ok(Category::Work),
            "personal" => Ok(Category::Personal),
            other => Err(TaskError::Validation(format!("invalid category: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub locator: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,

    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    pub status: TaskStatus,

    pub category: Category,

    pub due_date: NaiveDate,

    #[serde(with = "compact_date_serde")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "compact_date_serde")]
    pub updated_at: DateTime<Utc>,

    pub owner_id: UserId,

    #[serde(default)]
    pub attachments: Vec<Attachment>,

    #[serde(default)]
    pub order: i64,
}

impl Task {
    /// Stamps a mutation. The clock may step backwards between calls; the
    /// stored value never does.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = self.updated_at.max(now).max(self.created_at);
    }

    pub fn short_id(&self) -> String {
        short_id(self.id)
    }
}

pub fn short_id(id: TaskId) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Input for `TaskCollection::create`. Only the title is required.
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub category: Option<Category>,
    pub due_date: Option<NaiveDate>,
    pub attachments: Vec<Attachment>,
}

impl TaskDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Keeps a field that is present but `null` distinct from an absent one,
/// so a cleared value survives a serde round trip as `Some(None)`.
pub(crate) fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn order(order: i64) -> Self {
        Self {
            order: Some(order),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merges the patch into `task`. Does not stamp `updated_at`.
    pub fn apply_to(&self, task: &mut Task) -> Result<(), TaskError> {
        if let Some(title) = self.title.as_ref() {
            if title.trim().is_empty() {
                return Err(TaskError::Validation("title cannot be empty".to_string()));
            }
            task.title = title.clone();
        }
        if let Some(description) = self.description.as_ref() {
            task.description = description.clone();
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(category) = self.category {
            task.category = category;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(attachments) = self.attachments.as_ref() {
            task.attachments = attachments.clone();
        }
        if let Some(order) = self.order {
            task.order = order;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn sample(now: DateTime<Utc>) -> Task {
        Task {
            id: Uuid::new_v4(),
            title: "Draft budget".to_string(),
            description: None,
            status: TaskStatus::Todo,
            category: Category::Work,
            due_date: now.date_naive(),
            created_at: now,
            updated_at: now,
            owner_id: "u1".to_string(),
            attachments: vec![],
            order: 0,
        }
    }

    #[test]
    fn status_parses_loose_spellings() {
        assert_eq!("todo".parse::<TaskStatus>().unwrap(), TaskStatus::Todo);
        assert_eq!("IN-PROGRESS".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("done".parse::<TaskStatus>().unwrap(), TaskStatus::Completed);
        assert!(matches!(
            "blocked".parse::<TaskStatus>(),
            Err(TaskError::Validation(_))
        ));
    }

    #[test]
    fn touch_never_moves_backwards() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
        let mut task = sample(now);

        task.touch(now + Duration::minutes(5));
        assert_eq!(task.updated_at, now + Duration::minutes(5));

        task.touch(now - Duration::hours(1));
        assert_eq!(task.updated_at, now + Duration::minutes(5));
        assert!(task.updated_at >= task.created_at);
    }

    #[test]
    fn patch_rejects_blank_title_without_partial_apply() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
        let mut task = sample(now);
        let patch = TaskPatch {
            title: Some("  ".to_string()),
            ..TaskPatch::default()
        };

        assert!(patch.apply_to(&mut task).is_err());
        assert_eq!(task.title, "Draft budget");
    }

    #[test]
    fn cleared_description_survives_serde() {
        let patch = TaskPatch {
            description: Some(None),
            ..TaskPatch::default()
        };
        let json = serde_json::to_string(&patch).unwrap();
        assert_eq!(json, r#"{"description":null}"#);

        let back: TaskPatch = serde_json::from_str(&json).unwrap();
        assert_eq!(back.description, Some(None));

        let absent: TaskPatch = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.description, None);
    }

    #[test]
    fn status_serializes_with_dashes() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN-PROGRESS\"");
    }
}
