use std::fmt;
use std::sync::Arc;

use chrono::{
  DateTime,
  Utc
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{
  debug,
  info,
  instrument,
  warn
};

use crate::collection::MutationIntent;
use crate::task::{
  Task,
  TaskId,
  TaskPatch
};

/// Persistence collaborator. Owns the
/// durable copy of every user's tasks
/// and pushes full snapshots to
/// subscribers whenever an owner's set
/// changes.
pub trait TaskBackend:
  Send + Sync + 'static
{
  /// Stream of full snapshots for
  /// `owner_id`, starting with the
  /// current state.
  fn subscribe(
    &self,
    owner_id: &str
  ) -> anyhow::Result<
    mpsc::UnboundedReceiver<Vec<Task>>
  >;

  fn create(
    &self,
    task: &Task
  ) -> anyhow::Result<TaskId>;

  fn update(
    &self,
    id: TaskId,
    patch: &TaskPatch,
    updated_at: DateTime<Utc>
  ) -> anyhow::Result<()>;

  fn delete(
    &self,
    id: TaskId
  ) -> anyhow::Result<()>;

  /// Stores the bytes and returns a
  /// locator that can be opened later.
  fn upload_attachment(
    &self,
    owner_id: &str,
    bytes: &[u8],
    file_name: &str
  ) -> anyhow::Result<String>;
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum NoticeLevel {
  Info,
  Error
}

/// User-facing report of something a
/// collaborator did or failed to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
  pub level:   NoticeLevel,
  pub message: String
}

impl Notice {
  pub fn error(
    message: impl Into<String>
  ) -> Self {
    Self {
      level:   NoticeLevel::Error,
      message: message.into()
    }
  }

  pub fn info(
    message: impl Into<String>
  ) -> Self {
    Self {
      level:   NoticeLevel::Info,
      message: message.into()
    }
  }
}

impl fmt::Display for Notice {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self.level {
      | NoticeLevel::Info => {
        write!(f, "{}", self.message)
      }
      | NoticeLevel::Error => {
        write!(
          f,
          "warning: {}",
          self.message
        )
      }
    }
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
)]
pub struct DispatchReport {
  pub applied: usize,
  pub failed:  usize
}

/// Applies queued intents to `backend`
/// until the intent channel closes.
///
/// Failures are reported on `notices`
/// and never retried; the local copy is
/// left as is and the next snapshot
/// reconciles it.
pub fn spawn_dispatcher<B: TaskBackend>(
  backend: Arc<B>,
  intents: mpsc::UnboundedReceiver<
    MutationIntent
  >,
  notices: mpsc::UnboundedSender<Notice>
) -> JoinHandle<DispatchReport> {
  tokio::spawn(dispatch_intents(
    backend, intents, notices
  ))
}

#[instrument(skip_all)]
pub async fn dispatch_intents<
  B: TaskBackend
>(
  backend: Arc<B>,
  mut intents: mpsc::UnboundedReceiver<
    MutationIntent
  >,
  notices: mpsc::UnboundedSender<Notice>
) -> DispatchReport {
  let mut report =
    DispatchReport::default();

  while let Some(intent) =
    intents.recv().await
  {
    let id = intent.task_id();
    let result = match &intent {
      | MutationIntent::Create(task) => {
        backend.create(task).map(|_| ())
      }
      | MutationIntent::Update {
        id,
        patch,
        updated_at
      } => {
        backend.update(
          *id,
          patch,
          *updated_at
        )
      }
      | MutationIntent::Delete(id) => {
        backend.delete(*id)
      }
    };

    match result {
      | Ok(()) => {
        debug!(%id, "intent applied");
        report.applied += 1;
      }
      | Err(err) => {
        warn!(%id, error = %err, "backend write failed");
        report.failed += 1;
        let notice = Notice::error(
          format!(
            "failed to save task {id}: \
             {err:#}"
          )
        );
        if notices.send(notice).is_err() {
          debug!("no notice listener");
        }
      }
    }
  }

  info!(
    applied = report.applied,
    failed = report.failed,
    "dispatcher finished"
  );
  report
}

#[cfg(test)]
mod tests {
  use anyhow::anyhow;
  use chrono::TimeZone;
  use parking_lot::Mutex;

  use super::*;
  use crate::collection::TaskCollection;
  use crate::task::TaskDraft;

  #[derive(Default)]
  struct RecordingBackend {
    writes:         Mutex<Vec<String>>,
    refuse_deletes: bool
  }

  impl TaskBackend for RecordingBackend {
    fn subscribe(
      &self,
      _owner_id: &str
    ) -> anyhow::Result<
      mpsc::UnboundedReceiver<Vec<Task>>
    > {
      let (_tx, rx) =
        mpsc::unbounded_channel();
      Ok(rx)
    }

    fn create(
      &self,
      task: &Task
    ) -> anyhow::Result<TaskId> {
      self
        .writes
        .lock()
        .push(format!("create {}", task.title));
      Ok(task.id)
    }

    fn update(
      &self,
      _id: TaskId,
      patch: &TaskPatch,
      _updated_at: DateTime<Utc>
    ) -> anyhow::Result<()> {
      self
        .writes
        .lock()
        .push(format!("update {:?}", patch.status));
      Ok(())
    }

    fn delete(
      &self,
      _id: TaskId
    ) -> anyhow::Result<()> {
      if self.refuse_deletes {
        return Err(anyhow!(
          "permission denied"
        ));
      }
      self
        .writes
        .lock()
        .push("delete".to_string());
      Ok(())
    }

    fn upload_attachment(
      &self,
      _owner_id: &str,
      _bytes: &[u8],
      file_name: &str
    ) -> anyhow::Result<String> {
      Ok(format!("mem://{file_name}"))
    }
  }

  #[tokio::test]
  async fn failed_write_becomes_notice_and_dispatch_continues()
  {
    let backend =
      Arc::new(RecordingBackend {
        refuse_deletes: true,
        ..RecordingBackend::default()
      });
    let (intent_tx, intent_rx) =
      mpsc::unbounded_channel();
    let (notice_tx, mut notice_rx) =
      mpsc::unbounded_channel();
    let handle = spawn_dispatcher(
      backend.clone(),
      intent_rx,
      notice_tx
    );

    let now = Utc
      .with_ymd_and_hms(
        2026, 10, 18, 9, 0, 0
      )
      .unwrap();
    let mut collection =
      TaskCollection::new("u1");
    let id = collection
      .create(TaskDraft::titled("a"), now)
      .unwrap();
    collection.delete(id, now);
    collection
      .create(TaskDraft::titled("b"), now)
      .unwrap();
    for intent in collection.drain_intents()
    {
      intent_tx.send(intent).unwrap();
    }
    drop(intent_tx);

    let report = handle.await.unwrap();

    assert_eq!(
      report,
      DispatchReport {
        applied: 2,
        failed:  1
      }
    );
    assert_eq!(
      *backend.writes.lock(),
      vec![
        "create a".to_string(),
        "create b".to_string()
      ]
    );
    let notice =
      notice_rx.recv().await.unwrap();
    assert_eq!(
      notice.level,
      NoticeLevel::Error
    );
    assert!(
      notice
        .message
        .contains("permission denied")
    );
    // The local delete stands even
    // though the backend refused it.
    assert!(collection.get(id).is_none());
  }
}
