use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{
  mpsc,
  watch
};
use tracing::{
  debug,
  info,
  instrument,
  warn
};

use crate::collection::{
  MutationIntent,
  TaskCollection
};
use crate::task::Task;

/// Owned state container shared by
/// every view that needs the
/// collection.
///
/// Writers go through
/// [`SharedStore::update`], which
/// applies the closure, forwards queued
/// intents to the dispatcher and bumps
/// the revision that readers watch.
pub struct SharedStore {
  collection: Mutex<TaskCollection>,
  intents:    Mutex<
    Option<
      mpsc::UnboundedSender<
        MutationIntent
      >
    >
  >,
  revision:   watch::Sender<u64>
}

impl SharedStore {
  pub fn new(
    collection: TaskCollection
  ) -> (
    Arc<Self>,
    mpsc::UnboundedReceiver<MutationIntent>
  ) {
    let (intent_tx, intent_rx) =
      mpsc::unbounded_channel();
    let (revision, _) = watch::channel(0);
    let store = Arc::new(Self {
      collection: Mutex::new(collection),
      intents: Mutex::new(Some(
        intent_tx
      )),
      revision
    });
    (store, intent_rx)
  }

  pub fn update<R>(
    &self,
    f: impl FnOnce(&mut TaskCollection) -> R
  ) -> R {
    let (result, intents) = {
      let mut collection =
        self.collection.lock();
      let result = f(&mut collection);
      (result, collection.drain_intents())
    };

    if !intents.is_empty() {
      self.forward(intents);
    }
    self
      .revision
      .send_modify(|rev| *rev += 1);
    result
  }

  pub fn read<R>(
    &self,
    f: impl FnOnce(&TaskCollection) -> R
  ) -> R {
    let collection =
      self.collection.lock();
    f(&collection)
  }

  pub fn subscribe(
    &self
  ) -> watch::Receiver<u64> {
    self.revision.subscribe()
  }

  pub fn revision(&self) -> u64 {
    *self.revision.borrow()
  }

  /// Drops the intent sender so the
  /// dispatcher drains and exits. Later
  /// mutations still apply locally;
  /// their intents are discarded.
  pub fn close_intents(&self) {
    if self
      .intents
      .lock()
      .take()
      .is_some()
    {
      debug!("intent channel closed");
    }
  }

  fn forward(
    &self,
    intents: Vec<MutationIntent>
  ) {
    let guard = self.intents.lock();
    let Some(sender) = guard.as_ref()
    else {
      warn!(count = intents.len(), "intent channel closed; dropping intents");
      return;
    };

    for intent in intents {
      let id = intent.task_id();
      if sender.send(intent).is_err() {
        warn!(%id, "dispatcher gone; intent dropped");
      }
    }
  }
}

/// Applies every snapshot from the
/// persistence collaborator until the
/// stream ends. Returns the number of
/// snapshots applied.
#[instrument(skip_all)]
pub async fn pump_snapshots(
  store: Arc<SharedStore>,
  mut snapshots: mpsc::UnboundedReceiver<
    Vec<Task>
  >
) -> usize {
  let mut applied = 0;
  while let Some(snapshot) =
    snapshots.recv().await
  {
    store.update(|collection| {
      collection.replace_all(snapshot)
    });
    applied += 1;
  }
  info!(applied, "snapshot stream ended");
  applied
}

/// Applies snapshots that are already
/// queued without waiting for more.
pub fn drain_ready_snapshots(
  store: &SharedStore,
  snapshots: &mut mpsc::UnboundedReceiver<
    Vec<Task>
  >
) -> usize {
  let mut applied = 0;
  while let Ok(snapshot) =
    snapshots.try_recv()
  {
    store.update(|collection| {
      collection.replace_all(snapshot)
    });
    applied += 1;
  }
  applied
}
