//! In-memory task collection for one
//! signed-in user.
//!
//! `TaskCollection` owns the ordered
//! task sequence, the selection set and
//! the active filter criteria. Every
//! mutation is applied locally first
//! and queued as a [`MutationIntent`]
//! for the persistence collaborator;
//! the collaborator's next snapshot
//! (see [`TaskCollection::replace_all`])
//! is the source of truth on conflict.

use std::collections::{
  BTreeSet,
  HashSet
};

use chrono::{
  DateTime,
  Utc
};
use tracing::{
  debug,
  instrument,
  warn
};
use uuid::Uuid;

use crate::activity::{
  ActivityKind,
  ActivityLog,
  TaskSnapshot
};
use crate::datetime::to_project_date;
use crate::error::TaskError;
use crate::filter::TaskFilter;
use crate::task::{
  Attachment,
  Task,
  TaskDraft,
  TaskId,
  TaskPatch,
  TaskStatus,
  UserId
};

/// A write the persistence collaborator
/// should perform. Dispatched
/// fire-and-forget; local state is
/// never rolled back when one fails.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationIntent {
  Create(Task),
  Update {
    id:         TaskId,
    patch:      TaskPatch,
    updated_at: DateTime<Utc>
  },
  Delete(TaskId)
}

impl MutationIntent {
  pub fn task_id(&self) -> TaskId {
    match self {
      | MutationIntent::Create(task) => {
        task.id
      }
      | MutationIntent::Update {
        id,
        ..
      } => *id,
      | MutationIntent::Delete(id) => *id
    }
  }
}

#[derive(Debug, Clone)]
pub struct TaskCollection {
  owner_id:  UserId,
  tasks:     Vec<Task>,
  selection: BTreeSet<TaskId>,
  filter:    TaskFilter,
  outbox:    Vec<MutationIntent>,
  activity:  ActivityLog
}

impl TaskCollection {
  pub fn new(
    owner_id: impl Into<UserId>
  ) -> Self {
    Self::with_activity(
      owner_id,
      ActivityLog::default()
    )
  }

  pub fn with_activity(
    owner_id: impl Into<UserId>,
    activity: ActivityLog
  ) -> Self {
    Self {
      owner_id: owner_id.into(),
      tasks: Vec::new(),
      selection: BTreeSet::new(),
      filter: TaskFilter::default(),
      outbox: Vec::new(),
      activity
    }
  }

  pub fn owner_id(&self) -> &str {
    &self.owner_id
  }

  pub fn tasks(&self) -> &[Task] {
    &self.tasks
  }

  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  pub fn get(
    &self,
    id: TaskId
  ) -> Option<&Task> {
    self
      .tasks
      .iter()
      .find(|task| task.id == id)
  }

  pub fn contains(
    &self,
    id: TaskId
  ) -> bool {
    self.position(id).is_some()
  }

  pub fn selection(
    &self
  ) -> &BTreeSet<TaskId> {
    &self.selection
  }

  pub fn is_selected(
    &self,
    id: TaskId
  ) -> bool {
    self.selection.contains(&id)
  }

  pub fn filter_criteria(
    &self
  ) -> &TaskFilter {
    &self.filter
  }

  pub fn set_filter(
    &mut self,
    filter: TaskFilter
  ) {
    debug!(?filter, "active filter changed");
    self.filter = filter;
  }

  pub fn activity(&self) -> &ActivityLog {
    &self.activity
  }

  pub fn activity_mut(
    &mut self
  ) -> &mut ActivityLog {
    &mut self.activity
  }

  /// Intents queued since the last
  /// drain, in the order they were
  /// made.
  pub fn drain_intents(
    &mut self
  ) -> Vec<MutationIntent> {
    std::mem::take(&mut self.outbox)
  }

  fn position(
    &self,
    id: TaskId
  ) -> Option<usize> {
    self
      .tasks
      .iter()
      .position(|task| task.id == id)
  }

  /// Replaces the whole sequence with a
  /// collaborator snapshot.
  ///
  /// Records owned by someone else are
  /// dropped, as are repeated ids after
  /// their first occurrence. If any
  /// selected id is missing from the
  /// new sequence the selection is
  /// cleared.
  #[instrument(skip(self, snapshot), fields(owner = %self.owner_id, incoming = snapshot.len()))]
  pub fn replace_all(
    &mut self,
    snapshot: Vec<Task>
  ) {
    let mut seen = HashSet::with_capacity(
      snapshot.len()
    );
    let mut tasks =
      Vec::with_capacity(snapshot.len());

    for task in snapshot {
      if task.owner_id != self.owner_id {
        warn!(id = %task.id, owner = %task.owner_id, "dropping task owned by another user");
        continue;
      }
      if !seen.insert(task.id) {
        warn!(id = %task.id, "dropping duplicate task id in snapshot");
        continue;
      }
      tasks.push(task);
    }

    self.tasks = tasks;

    if self
      .selection
      .iter()
      .any(|id| !seen.contains(id))
    {
      debug!(
        selected = self.selection.len(),
        "selection went stale; clearing"
      );
      self.selection.clear();
    }

    debug!(
      count = self.tasks.len(),
      "snapshot applied"
    );
  }

  /// Appends a new task built from
  /// `draft` and returns its id.
  ///
  /// Defaults: status TO-DO, category
  /// WORK, due today (project
  /// timezone). The new task's `order`
  /// is the collection length before
  /// the append.
  #[instrument(skip(self, draft, now), fields(title_len = draft.title.len()))]
  pub fn create(
    &mut self,
    draft: TaskDraft,
    now: DateTime<Utc>
  ) -> Result<TaskId, TaskError> {
    let title = draft.title.trim();
    if title.is_empty() {
      return Err(TaskError::Validation(
        "title is required".to_string()
      ));
    }

    let task = Task {
      id: Uuid::new_v4(),
      title: title.to_string(),
      description: draft
        .description
        .filter(|text| {
          !text.trim().is_empty()
        }),
      status: draft
        .status
        .unwrap_or(TaskStatus::Todo),
      category: draft
        .category
        .unwrap_or_default(),
      due_date: draft
        .due_date
        .unwrap_or_else(|| {
          to_project_date(now)
        }),
      created_at: now,
      updated_at: now,
      owner_id: self.owner_id.clone(),
      attachments: draft.attachments,
      order: self.tasks.len() as i64
    };
    let id = task.id;

    self.activity.record(
      id,
      ActivityKind::Create,
      &self.owner_id,
      now,
      None,
      Some(TaskSnapshot::full(&task))
    );
    self
      .outbox
      .push(MutationIntent::Create(
        task.clone()
      ));
    self.tasks.push(task);

    debug!(
      %id,
      order = self.tasks.len() - 1,
      "task created"
    );
    Ok(id)
  }

  /// Merges `patch` into the task at
  /// `id` and stamps `updated_at`.
  ///
  /// A status change keeps the task's
  /// `order`; it now competes in the
  /// new lane with the same value.
  #[instrument(skip(self, patch, now), fields(id = %id))]
  pub fn update(
    &mut self,
    id: TaskId,
    patch: TaskPatch,
    now: DateTime<Utc>
  ) -> Result<&Task, TaskError> {
    let idx = self
      .position(id)
      .ok_or(TaskError::NotFound(id))?;

    let before = self.tasks[idx].clone();
    let mut after = before.clone();
    patch.apply_to(&mut after)?;
    after.touch(now);

    let (old, new) =
      TaskSnapshot::diff(&before, &after);
    let status_only = TaskSnapshot {
      status: None,
      ..new.clone()
    }
    .is_empty();
    let kind = if new.status.is_some()
      && status_only
    {
      ActivityKind::StatusChange
    } else {
      ActivityKind::Update
    };
    self.activity.record(
      id,
      kind,
      &self.owner_id,
      now,
      Some(old),
      Some(new)
    );

    self.outbox.push(
      MutationIntent::Update {
        id,
        patch,
        updated_at: after.updated_at
      }
    );
    self.tasks[idx] = after;
    Ok(&self.tasks[idx])
  }

  /// Removes the task and drops it from
  /// the selection. Deleting an absent
  /// id succeeds and changes nothing;
  /// returns whether a task was
  /// removed.
  #[instrument(skip(self, now), fields(id = %id))]
  pub fn delete(
    &mut self,
    id: TaskId,
    now: DateTime<Utc>
  ) -> bool {
    self.selection.remove(&id);

    let Some(idx) = self.position(id)
    else {
      debug!("delete of absent task ignored");
      return false;
    };

    let removed = self.tasks.remove(idx);
    self.activity.record(
      id,
      ActivityKind::Delete,
      &self.owner_id,
      now,
      Some(TaskSnapshot::full(&removed)),
      None
    );
    self
      .outbox
      .push(MutationIntent::Delete(id));
    true
  }

  /// Moves `moved_id` to the index
  /// `target_id` occupied, shifting the
  /// tasks in between by one, then
  /// renumbers `order` for the whole
  /// sequence.
  ///
  /// Unknown ids and
  /// `moved_id == target_id` are silent
  /// no-ops; returns whether anything
  /// moved.
  #[instrument(skip(self, now), fields(moved = %moved_id, target = %target_id))]
  pub fn reorder(
    &mut self,
    moved_id: TaskId,
    target_id: TaskId,
    now: DateTime<Utc>
  ) -> bool {
    if moved_id == target_id {
      return false;
    }
    let (Some(from), Some(to)) = (
      self.position(moved_id),
      self.position(target_id)
    ) else {
      debug!(
        "reorder references an absent \
         task; ignoring"
      );
      return false;
    };

    let task = self.tasks.remove(from);
    self.tasks.insert(to, task);
    self.renumber(now);

    debug!(from, to, "task moved");
    true
  }

  /// Sets `order = index` for every
  /// task whose value disagrees with
  /// its position and queues an update
  /// for each change.
  fn renumber(
    &mut self,
    now: DateTime<Utc>
  ) {
    for (idx, task) in
      self.tasks.iter_mut().enumerate()
    {
      let order = idx as i64;
      if task.order == order {
        continue;
      }
      task.order = order;
      task.touch(now);
      self.outbox.push(
        MutationIntent::Update {
          id:         task.id,
          patch:      TaskPatch::order(
            order
          ),
          updated_at: task.updated_at
        }
      );
    }
  }

  /// Sets `status` on every listed task
  /// that still exists and clears the
  /// selection. Ids that went stale are
  /// skipped. Returns the number of
  /// tasks updated.
  #[instrument(skip(self, ids, now), fields(status = %status))]
  pub fn bulk_status_change<I>(
    &mut self,
    ids: I,
    status: TaskStatus,
    now: DateTime<Utc>
  ) -> usize
  where
    I: IntoIterator<Item = TaskId>
  {
    let wanted: HashSet<TaskId> =
      ids.into_iter().collect();
    let mut updated = 0;

    for task in
      self.tasks.iter_mut().filter(|task| {
        wanted.contains(&task.id)
      })
    {
      let previous = task.status;
      task.status = status;
      task.touch(now);
      updated += 1;

      self.activity.record(
        task.id,
        ActivityKind::StatusChange,
        &self.owner_id,
        now,
        Some(TaskSnapshot {
          status: Some(previous),
          ..TaskSnapshot::default()
        }),
        Some(TaskSnapshot {
          status: Some(status),
          ..TaskSnapshot::default()
        })
      );
      self.outbox.push(
        MutationIntent::Update {
          id:         task.id,
          patch:      TaskPatch::status(
            status
          ),
          updated_at: task.updated_at
        }
      );
    }

    debug!(
      requested = wanted.len(),
      updated,
      "bulk status change applied"
    );
    self.selection.clear();
    updated
  }

  pub fn bulk_status_change_selected(
    &mut self,
    status: TaskStatus,
    now: DateTime<Utc>
  ) -> usize {
    let ids: Vec<TaskId> = self
      .selection
      .iter()
      .copied()
      .collect();
    self.bulk_status_change(ids, status, now)
  }

  /// Deletes every listed task; absent
  /// ids are ignored. Returns the
  /// number of tasks removed.
  #[instrument(skip(self, ids, now))]
  pub fn bulk_delete<I>(
    &mut self,
    ids: I,
    now: DateTime<Utc>
  ) -> usize
  where
    I: IntoIterator<Item = TaskId>
  {
    let mut removed = 0;
    for id in ids {
      if self.delete(id, now) {
        removed += 1;
      }
    }
    debug!(removed, "bulk delete applied");
    removed
  }

  pub fn bulk_delete_selected(
    &mut self,
    now: DateTime<Utc>
  ) -> usize {
    let ids: Vec<TaskId> = self
      .selection
      .iter()
      .copied()
      .collect();
    self.bulk_delete(ids, now)
  }

  /// Flips membership of `id` in the
  /// selection. No existence check.
  /// Returns whether the id is selected
  /// afterwards.
  pub fn toggle_selection(
    &mut self,
    id: TaskId
  ) -> bool {
    if self.selection.remove(&id) {
      false
    } else {
      self.selection.insert(id);
      true
    }
  }

  pub fn clear_selection(&mut self) {
    self.selection.clear();
  }

  /// Derived view; never mutates stored
  /// state.
  pub fn filter(
    &self,
    criteria: &TaskFilter,
    now: DateTime<Utc>
  ) -> Vec<&Task> {
    criteria.apply(&self.tasks, now)
  }

  /// Tasks passing the active filter
  /// criteria.
  pub fn visible(
    &self,
    now: DateTime<Utc>
  ) -> Vec<&Task> {
    self.filter.apply(&self.tasks, now)
  }

  #[instrument(skip(self, attachment, now), fields(id = %id, name = %attachment.name))]
  pub fn add_attachment(
    &mut self,
    id: TaskId,
    attachment: Attachment,
    now: DateTime<Utc>
  ) -> Result<(), TaskError> {
    let idx = self
      .position(id)
      .ok_or(TaskError::NotFound(id))?;
    let task = &mut self.tasks[idx];

    let before = task.attachments.clone();
    task.attachments.push(attachment);
    task.touch(now);

    self.activity.record(
      id,
      ActivityKind::AttachmentAdded,
      &self.owner_id,
      now,
      Some(TaskSnapshot {
        attachments: Some(before),
        ..TaskSnapshot::default()
      }),
      Some(TaskSnapshot {
        attachments: Some(
          task.attachments.clone()
        ),
        ..TaskSnapshot::default()
      })
    );
    self.outbox.push(
      MutationIntent::Update {
        id,
        patch: TaskPatch {
          attachments: Some(
            task.attachments.clone()
          ),
          ..TaskPatch::default()
        },
        updated_at: task.updated_at
      }
    );
    Ok(())
  }

  /// Removes the first attachment
  /// called `name`. Returns whether one
  /// was removed.
  #[instrument(skip(self, now), fields(id = %id))]
  pub fn remove_attachment(
    &mut self,
    id: TaskId,
    name: &str,
    now: DateTime<Utc>
  ) -> Result<bool, TaskError> {
    let idx = self
      .position(id)
      .ok_or(TaskError::NotFound(id))?;
    let task = &mut self.tasks[idx];

    let Some(pos) = task
      .attachments
      .iter()
      .position(|a| a.name == name)
    else {
      return Ok(false);
    };

    let before = task.attachments.clone();
    task.attachments.remove(pos);
    task.touch(now);

    self.activity.record(
      id,
      ActivityKind::AttachmentRemoved,
      &self.owner_id,
      now,
      Some(TaskSnapshot {
        attachments: Some(before),
        ..TaskSnapshot::default()
      }),
      Some(TaskSnapshot {
        attachments: Some(
          task.attachments.clone()
        ),
        ..TaskSnapshot::default()
      })
    );
    self.outbox.push(
      MutationIntent::Update {
        id,
        patch: TaskPatch {
          attachments: Some(
            task.attachments.clone()
          ),
          ..TaskPatch::default()
        },
        updated_at: task.updated_at
      }
    );
    Ok(true)
  }

  /// Resolves a full id or a unique
  /// prefix of its hex form.
  pub fn resolve_prefix(
    &self,
    raw: &str
  ) -> Result<TaskId, TaskError> {
    if let Ok(id) = raw.parse::<Uuid>() {
      return Ok(id);
    }

    let needle = raw
      .trim()
      .to_ascii_lowercase()
      .replace('-', "");
    if needle.is_empty() {
      return Err(TaskError::Validation(
        "task id cannot be empty"
          .to_string()
      ));
    }

    let mut matches =
      self.tasks.iter().filter(|task| {
        task
          .id
          .simple()
          .to_string()
          .starts_with(&needle)
      });
    let first =
      matches.next().ok_or_else(|| {
        TaskError::Validation(format!(
          "no task matches id {raw}"
        ))
      })?;
    if matches.next().is_some() {
      return Err(TaskError::AmbiguousId(
        raw.to_string()
      ));
    }
    Ok(first.id)
  }
}
