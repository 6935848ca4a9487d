use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::activity::{ActivityEntry, DEFAULT_ACTIVITY_LIMIT};
use crate::backend::TaskBackend;
use crate::task::{Task, TaskId, TaskPatch};

/// File-backed persistence collaborator rooted at a data directory.
pub struct DataStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    pub activity_path: PathBuf,
    pub selection_path: PathBuf,
    pub attachments_dir: PathBuf,
    activity_limit: usize,
    write_lock: Mutex<()>,
    subscribers: Mutex<Vec<(String, mpsc::UnboundedSender<Vec<Task>>)>>,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join("tasks.data");
        let activity_path = data_dir.join("activity.data");
        let selection_path = data_dir.join("selection.data");
        let attachments_dir = data_dir.join("attachments");

        for path in [&tasks_path, &activity_path, &selection_path] {
            if !path.exists() {
                fs::write(path, "")?;
            }
        }

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            activity = %activity_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            tasks_path,
            activity_path,
            selection_path,
            attachments_dir,
            activity_limit: DEFAULT_ACTIVITY_LIMIT,
            write_lock: Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Caps how many activity entries each owner keeps on disk.
    pub fn with_activity_limit(mut self, limit: usize) -> Self {
        self.activity_limit = limit.max(1);
        self
    }

    #[tracing::instrument(skip(self))]
    pub fn load_tasks(&self) -> anyhow::Result<Vec<Task>> {
        load_jsonl(&self.tasks_path).context("failed to load tasks.data")
    }

    /// The owner's tasks in display order. The file keeps insertion order
    /// and only the `order` field moves, so the sort is stable on it.
    #[tracing::instrument(skip(self))]
    pub fn load_owned(&self, owner_id: &str) -> anyhow::Result<Vec<Task>> {
        let mut tasks = self.load_tasks()?;
        tasks.retain(|task| task.owner_id == owner_id);
        tasks.sort_by_key(|task| task.order);
        Ok(tasks)
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn save_tasks(&self, tasks: &[Task]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.tasks_path, tasks).context("failed to save tasks.data")
    }

    /// Loads, mutates and saves the task file under the write lock, then
    /// pushes fresh snapshots to the affected owner's subscribers.
    ///
    /// The closure returns the owner whose set changed, or `None` when
    /// nothing did.
    fn modify<R>(
        &self,
        f: impl FnOnce(&mut Vec<Task>) -> anyhow::Result<(R, Option<String>)>,
    ) -> anyhow::Result<R> {
        let (result, owner_id) = {
            let _guard = self.write_lock.lock();
            let mut tasks = self.load_tasks()?;
            let (result, owner_id) = f(&mut tasks)?;
            if owner_id.is_some() {
                self.save_tasks(&tasks)?;
            }
            (result, owner_id)
        };
        if let Some(owner_id) = owner_id {
            self.publish(&owner_id)?;
        }
        Ok(result)
    }

    #[tracing::instrument(skip(self))]
    fn publish(&self, owner_id: &str) -> anyhow::Result<()> {
        let snapshot = self.load_owned(owner_id)?;
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(owner, sender)| {
            if owner != owner_id {
                return true;
            }
            sender.send(snapshot.clone()).is_ok()
        });
        debug!(owner = owner_id, count = snapshot.len(), "published snapshot");
        Ok(())
    }

    #[tracing::instrument(skip(self, entries))]
    pub fn append_activity(&self, entries: &[ActivityEntry]) -> anyhow::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock();
        let mut log: Vec<ActivityEntry> =
            load_jsonl(&self.activity_path).context("failed to load activity.data")?;
        log.extend(entries.iter().cloned());
        let before = log.len();
        let log = keep_latest_per_owner(log, self.activity_limit);
        save_jsonl_atomic(&self.activity_path, &log).context("failed to save activity.data")?;
        debug!(
            count = entries.len(),
            dropped = before - log.len(),
            "appended activity"
        );
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn load_activity(&self, owner_id: &str) -> anyhow::Result<Vec<ActivityEntry>> {
        let mut entries: Vec<ActivityEntry> =
            load_jsonl(&self.activity_path).context("failed to load activity.data")?;
        entries.retain(|entry| entry.user_id == owner_id);
        Ok(entries)
    }

    #[tracing::instrument(skip(self))]
    pub fn load_selection(&self) -> anyhow::Result<BTreeSet<TaskId>> {
        let raw = fs::read_to_string(&self.selection_path)
            .with_context(|| format!("failed reading {}", self.selection_path.display()))?;
        raw.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.parse::<TaskId>()
                    .with_context(|| format!("invalid id in selection.data: {line}"))
            })
            .collect()
    }

    #[tracing::instrument(skip(self, selection))]
    pub fn save_selection(&self, selection: &BTreeSet<TaskId>) -> anyhow::Result<()> {
        let payload: String = selection.iter().map(|id| format!("{id}\n")).collect();
        fs::write(&self.selection_path, payload)
            .with_context(|| format!("failed writing {}", self.selection_path.display()))?;
        Ok(())
    }
}

impl TaskBackend for DataStore {
    #[tracing::instrument(skip(self))]
    fn subscribe(&self, owner_id: &str) -> anyhow::Result<mpsc::UnboundedReceiver<Vec<Task>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let initial = self.load_owned(owner_id)?;
        tx.send(initial)
            .map_err(|_| anyhow!("subscriber dropped before first snapshot"))?;
        self.subscribers.lock().push((owner_id.to_string(), tx));
        Ok(rx)
    }

    #[tracing::instrument(skip(self, task), fields(id = %task.id))]
    fn create(&self, task: &Task) -> anyhow::Result<TaskId> {
        self.modify(|tasks| {
            if tasks.iter().any(|existing| existing.id == task.id) {
                return Err(anyhow!("task already exists: {}", task.id));
            }
            tasks.push(task.clone());
            Ok((task.id, Some(task.owner_id.clone())))
        })
    }

    #[tracing::instrument(skip(self, patch), fields(id = %id))]
    fn update(&self, id: TaskId, patch: &TaskPatch, updated_at: DateTime<Utc>) -> anyhow::Result<()> {
        self.modify(|tasks| {
            let task = tasks
                .iter_mut()
                .find(|task| task.id == id)
                .ok_or_else(|| anyhow!("task not found: {id}"))?;
            patch.apply_to(task)?;
            task.touch(updated_at);
            Ok(((), Some(task.owner_id.clone())))
        })
    }

    #[tracing::instrument(skip(self), fields(id = %id))]
    fn delete(&self, id: TaskId) -> anyhow::Result<()> {
        self.modify(|tasks| {
            let Some(idx) = tasks.iter().position(|task| task.id == id) else {
                debug!("delete of absent task ignored");
                return Ok(((), None));
            };
            let removed = tasks.remove(idx);
            Ok(((), Some(removed.owner_id)))
        })
    }

    #[tracing::instrument(skip(self, bytes), fields(len = bytes.len()))]
    fn upload_attachment(&self, owner_id: &str, bytes: &[u8], file_name: &str) -> anyhow::Result<String> {
        let name = Path::new(file_name)
            .file_name()
            .ok_or_else(|| anyhow!("attachment needs a file name: {file_name}"))?;
        let owner_dir = self.attachments_dir.join(owner_id);
        fs::create_dir_all(&owner_dir)
            .with_context(|| format!("failed to create {}", owner_dir.display()))?;

        let target = owner_dir.join(name);
        let mut temp = NamedTempFile::new_in(&owner_dir)?;
        temp.write_all(bytes)?;
        temp.flush()?;
        temp.persist(&target)
            .map_err(|err| anyhow!("failed to persist {}: {}", target.display(), err))?;

        let absolute = target.canonicalize().unwrap_or(target);
        Ok(format!("file://{}", absolute.display()))
    }
}

/// Drops each owner's oldest entries past `limit`, keeping file order.
fn keep_latest_per_owner(entries: Vec<ActivityEntry>, limit: usize) -> Vec<ActivityEntry> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<ActivityEntry> = entries
        .into_iter()
        .rev()
        .filter(|entry| {
            let count = seen.entry(entry.user_id.clone()).or_default();
            *count += 1;
            *count <= limit
        })
        .collect();
    kept.reverse();
    kept
}

#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let item: T = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(item);
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, items))]
fn save_jsonl_atomic<T: Serialize>(path: &Path, items: &[T]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = items.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for item in items {
        let serialized = serde_json::to_string(item)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
