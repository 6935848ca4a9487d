use std::collections::VecDeque;

use chrono::{
  DateTime,
  NaiveDate,
  Utc
};
use serde::{
  Deserialize,
  Serialize
};
use uuid::Uuid;

use crate::datetime::compact_date_serde;
use crate::task::{
  Attachment,
  Category,
  Task,
  TaskId,
  TaskStatus,
  UserId
};

pub const DEFAULT_ACTIVITY_LIMIT: usize =
  200;

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(
  rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum ActivityKind {
  Create,
  Update,
  Delete,
  StatusChange,
  AttachmentAdded,
  AttachmentRemoved
}

impl ActivityKind {
  pub fn as_str(self) -> &'static str {
    match self {
      | ActivityKind::Create => "CREATE",
      | ActivityKind::Update => "UPDATE",
      | ActivityKind::Delete => "DELETE",
      | ActivityKind::StatusChange => {
        "STATUS_CHANGE"
      }
      | ActivityKind::AttachmentAdded => {
        "ATTACHMENT_ADDED"
      }
      | ActivityKind::AttachmentRemoved => {
        "ATTACHMENT_REMOVED"
      }
    }
  }
}

/// Partial view of a task captured
/// before or after a change. Only the
/// fields that changed are populated.
#[derive(
  Debug,
  Clone,
  Default,
  Serialize,
  Deserialize,
  PartialEq,
)]
pub struct TaskSnapshot {
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub title:       Option<String>,
  #[serde(
    default,
    deserialize_with = "crate::task::present_or_null",
    skip_serializing_if = "Option::is_none"
  )]
  pub description: Option<Option<String>>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub status:      Option<TaskStatus>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub category:    Option<Category>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub due_date:    Option<NaiveDate>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub attachments: Option<Vec<Attachment>>
}

impl TaskSnapshot {
  pub fn full(task: &Task) -> Self {
    Self {
      title:       Some(
        task.title.clone()
      ),
      description: Some(
        task.description.clone()
      ),
      status:      Some(task.status),
      category:    Some(task.category),
      due_date:    Some(task.due_date),
      attachments: Some(
        task.attachments.clone()
      )
    }
  }

  /// Returns the (before, after) pair
  /// restricted to fields that differ.
  pub fn diff(
    before: &Task,
    after: &Task
  ) -> (Self, Self) {
    let mut old = Self::default();
    let mut new = Self::default();

    if before.title != after.title {
      old.title =
        Some(before.title.clone());
      new.title =
        Some(after.title.clone());
    }
    if before.description
      != after.description
    {
      old.description = Some(
        before.description.clone()
      );
      new.description = Some(
        after.description.clone()
      );
    }
    if before.status != after.status {
      old.status = Some(before.status);
      new.status = Some(after.status);
    }
    if before.category != after.category
    {
      old.category =
        Some(before.category);
      new.category =
        Some(after.category);
    }
    if before.due_date != after.due_date
    {
      old.due_date =
        Some(before.due_date);
      new.due_date =
        Some(after.due_date);
    }
    if before.attachments
      != after.attachments
    {
      old.attachments = Some(
        before.attachments.clone()
      );
      new.attachments = Some(
        after.attachments.clone()
      );
    }

    (old, new)
  }

  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
)]
pub struct ActivityEntry {
  pub id:        Uuid,
  pub task_id:   TaskId,
  pub kind:      ActivityKind,
  #[serde(with = "compact_date_serde")]
  pub timestamp: DateTime<Utc>,
  pub user_id:   UserId,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub before:    Option<TaskSnapshot>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub after:     Option<TaskSnapshot>
}

#[derive(Debug, Clone)]
pub struct ActivityLog {
  entries:   VecDeque<ActivityEntry>,
  limit:     usize,
  unflushed: usize
}

impl Default for ActivityLog {
  fn default() -> Self {
    Self::with_limit(
      DEFAULT_ACTIVITY_LIMIT
    )
  }
}

impl ActivityLog {
  pub fn with_limit(
    limit: usize
  ) -> Self {
    Self {
      entries:   VecDeque::new(),
      limit:     limit.max(1),
      unflushed: 0
    }
  }

  pub fn record(
    &mut self,
    task_id: TaskId,
    kind: ActivityKind,
    user_id: &str,
    now: DateTime<Utc>,
    before: Option<TaskSnapshot>,
    after: Option<TaskSnapshot>
  ) {
    if self.entries.len() == self.limit
    {
      self.entries.pop_front();
    }
    self.entries.push_back(
      ActivityEntry {
        id: Uuid::new_v4(),
        task_id,
        kind,
        timestamp: now,
        user_id: user_id.to_string(),
        before,
        after
      }
    );
    self.unflushed = (self.unflushed
      + 1)
    .min(self.entries.len());
  }

  pub fn entries(
    &self
  ) -> impl DoubleEndedIterator<Item = &ActivityEntry>
  {
    self.entries.iter()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Entries recorded since the last
  /// call, oldest first.
  pub fn take_unflushed(
    &mut self
  ) -> Vec<ActivityEntry> {
    let skip = self.entries.len()
      - self.unflushed;
    self.unflushed = 0;
    self
      .entries
      .iter()
      .skip(skip)
      .cloned()
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn now() -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2026, 10, 18, 9, 0, 0
      )
      .unwrap()
  }

  #[test]
  fn evicts_oldest_past_limit() {
    let mut log =
      ActivityLog::with_limit(2);
    let ids: Vec<TaskId> = (0..3)
      .map(|_| Uuid::new_v4())
      .collect();
    for id in &ids {
      log.record(
        *id,
        ActivityKind::Create,
        "u1",
        now(),
        None,
        None
      );
    }

    let kept: Vec<TaskId> = log
      .entries()
      .map(|e| e.task_id)
      .collect();
    assert_eq!(kept, vec![ids[1], ids[2]]);
  }

  #[test]
  fn take_unflushed_returns_only_new_entries()
  {
    let mut log = ActivityLog::default();
    let id = Uuid::new_v4();
    log.record(
      id,
      ActivityKind::Create,
      "u1",
      now(),
      None,
      None
    );
    assert_eq!(
      log.take_unflushed().len(),
      1
    );

    log.record(
      id,
      ActivityKind::Delete,
      "u1",
      now(),
      None,
      None
    );
    let fresh = log.take_unflushed();
    assert_eq!(fresh.len(), 1);
    assert_eq!(
      fresh[0].kind,
      ActivityKind::Delete
    );
    assert!(
      log.take_unflushed().is_empty()
    );
  }

  #[test]
  fn kind_serializes_screaming_snake() {
    let json = serde_json::to_string(
      &ActivityKind::AttachmentAdded
    )
    .unwrap();
    assert_eq!(
      json,
      "\"ATTACHMENT_ADDED\""
    );
  }

  #[test]
  fn cleared_description_survives_persistence()
  {
    let entry = ActivityEntry {
      id:        Uuid::new_v4(),
      task_id:   Uuid::new_v4(),
      kind:      ActivityKind::Update,
      timestamp: now(),
      user_id:   "u1".to_string(),
      before:    Some(TaskSnapshot {
        description: Some(Some(
          "old notes".to_string()
        )),
        ..TaskSnapshot::default()
      }),
      after:     Some(TaskSnapshot {
        description: Some(None),
        ..TaskSnapshot::default()
      })
    };

    let line =
      serde_json::to_string(&entry)
        .unwrap();
    let back: ActivityEntry =
      serde_json::from_str(&line)
        .unwrap();

    assert_eq!(back, entry);
    assert_eq!(
      back.after.unwrap().description,
      Some(None)
    );
  }
}
