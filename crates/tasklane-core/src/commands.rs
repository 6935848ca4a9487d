use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tasklane_shared::AttachmentDto;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::activity::ActivityLog;
use crate::auth::{self, AuthProvider, LocalAuth, UserIdentity};
use crate::backend::{DispatchReport, Notice, TaskBackend, spawn_dispatcher};
use crate::cli::{AddArgs, BulkCommand, Command, ListArgs};
use crate::collection::TaskCollection;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::dto::{draft_from_create, filter_from_args, patch_from_dto};
use crate::error::TaskError;
use crate::render::Renderer;
use crate::store::{SharedStore, drain_ready_snapshots};
use crate::task::{Attachment, Task, TaskId, TaskStatus, short_id};

/// A signed-in user's live view over the datastore for the length of one
/// command: the shared store, its snapshot subscription and the dispatcher
/// draining its writes.
pub struct Session {
    pub user: UserIdentity,
    pub backend: Arc<DataStore>,
    pub store: Arc<SharedStore>,
    snapshots: mpsc::UnboundedReceiver<Vec<Task>>,
    notices: mpsc::UnboundedReceiver<Notice>,
    dispatcher: Option<JoinHandle<DispatchReport>>,
}

impl Session {
    /// Subscribes to the user's tasks and applies the first snapshot. Must
    /// be called from inside a tokio runtime.
    #[instrument(skip(backend, user), fields(uid = %user.uid))]
    pub fn open(backend: Arc<DataStore>, user: UserIdentity, activity_limit: usize) -> anyhow::Result<Self> {
        let mut snapshots = backend.subscribe(&user.uid)?;

        let mut collection = TaskCollection::with_activity(user.uid.clone(), ActivityLog::with_limit(activity_limit));
        // Restored before the first snapshot so stale ids clear it.
        for id in backend.load_selection()? {
            collection.toggle_selection(id);
        }

        let (store, intents) = SharedStore::new(collection);
        let applied = drain_ready_snapshots(&store, &mut snapshots);

        let (notice_tx, notices) = mpsc::unbounded_channel();
        let dispatcher = spawn_dispatcher(backend.clone(), intents, notice_tx);

        debug!(applied, tasks = store.read(TaskCollection::len), "session opened");
        Ok(Self {
            user,
            backend,
            store,
            snapshots,
            notices,
            dispatcher: Some(dispatcher),
        })
    }

    /// Waits for every queued write, applies the snapshots they produced and
    /// persists the selection and new activity. Returns collaborator
    /// notices raised along the way.
    #[instrument(skip(self))]
    pub async fn settle(&mut self) -> anyhow::Result<Vec<Notice>> {
        self.store.close_intents();
        if let Some(handle) = self.dispatcher.take() {
            let report = handle.await.context("write dispatcher stopped unexpectedly")?;
            debug!(applied = report.applied, failed = report.failed, "writes dispatched");
        }

        let mut notices = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            notices.push(notice);
        }

        let applied = drain_ready_snapshots(&self.store, &mut self.snapshots);
        debug!(applied, "reconciled with backend snapshots");

        let selection = self.store.read(|c| c.selection().clone());
        self.backend.save_selection(&selection)?;
        let entries = self.store.update(|c| c.activity_mut().take_unflushed());
        self.backend.append_activity(&entries)?;

        Ok(notices)
    }

    pub fn resolve(&self, raw: &str) -> Result<TaskId, TaskError> {
        self.store.read(|c| c.resolve_prefix(raw))
    }

    fn upload(&self, path: &Path) -> anyhow::Result<Attachment> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("not a file: {}", path.display()))?;
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let locator = self.backend.upload_attachment(&self.user.uid, &bytes, &name)?;
        info!(name = %name, size = bytes.len(), "attachment uploaded");
        Ok(Attachment { name, locator })
    }
}

/// What to print once writes have settled.
enum Output {
    Message(String),
    Tasks(ListArgs),
    Show(TaskId),
    Selection,
    History(usize),
}

#[instrument(skip(cfg, data_dir, renderer, command))]
pub async fn dispatch(cfg: &Config, data_dir: &Path, renderer: &Renderer, command: Command) -> anyhow::Result<()> {
    let auth = LocalAuth::new(cfg, data_dir);
    debug!(?command, "dispatching command");

    match command {
        Command::Login => cmd_login(&auth),
        Command::Whoami => {
            match auth.current_user() {
                Some(user) => println!("{} ({})", user.label(), user.uid),
                None => println!("Not signed in."),
            }
            Ok(())
        }
        Command::Logout => {
            let Some(user) = auth.current_user() else {
                println!("Not signed in.");
                return Ok(());
            };
            let mut session = open_session(cfg, data_dir, user)?;
            auth::sign_out(&auth, &session.store)?;
            report_notices(session.settle().await?);
            println!("Signed out {}.", session.user.label());
            Ok(())
        }
        command => {
            let user = auth
                .current_user()
                .ok_or_else(|| anyhow!("not signed in; run `tasklane login` first"))?;
            let mut session = open_session(cfg, data_dir, user)?;

            let output = apply(&session, command, Utc::now());
            // Writes already queued still go out when a later step fails.
            let notices = session.settle().await?;
            report_notices(notices);
            print_output(&session, cfg, renderer, output?)
        }
    }
}

fn open_session(cfg: &Config, data_dir: &Path, user: UserIdentity) -> anyhow::Result<Session> {
    let backend = Arc::new(DataStore::open(data_dir)?.with_activity_limit(cfg.activity_limit()));
    Session::open(backend, user, cfg.activity_limit())
}

fn cmd_login(auth: &LocalAuth) -> anyhow::Result<()> {
    if let Some(user) = auth.current_user() {
        println!("Already signed in as {}.", user.label());
        return Ok(());
    }
    let user = auth::sign_in(auth)?;
    println!("Signed in as {}.", user.label());
    Ok(())
}

#[instrument(skip(session, command, now))]
fn apply(session: &Session, command: Command, now: DateTime<Utc>) -> anyhow::Result<Output> {
    let store = &session.store;

    let output = match command {
        Command::List(args) => {
            let criteria = filter_from_args(&args.to_request())?;
            store.update(|c| c.set_filter(criteria));
            Output::Tasks(args)
        }
        Command::Add(args) => cmd_add(session, &args, now)?,
        Command::Edit(args) => {
            let id = session.resolve(&args.id)?;
            let patch = patch_from_dto(args.to_patch(), now)?;
            if patch.is_empty() {
                return Err(anyhow!("nothing to change"));
            }
            let short = store.update(|c| c.update(id, patch, now).map(Task::short_id))?;
            Output::Message(format!("Modified task {short}."))
        }
        Command::Show { id } => Output::Show(session.resolve(&id)?),
        Command::Delete { id } => {
            let id = session.resolve(&id)?;
            let removed = store.update(|c| c.delete(id, now));
            Output::Message(if removed {
                format!("Deleted task {}.", short_id(id))
            } else {
                "No such task.".to_string()
            })
        }
        Command::Move { id, target } => {
            let moved = session.resolve(&id)?;
            let target = session.resolve(&target)?;
            let changed = store.update(|c| c.reorder(moved, target, now));
            Output::Message(if changed {
                format!("Moved task {} to {}.", short_id(moved), short_id(target))
            } else {
                "Nothing moved.".to_string()
            })
        }
        Command::Select { ids, clear } => {
            if clear {
                store.update(|c| c.clear_selection());
            }
            for raw in &ids {
                let id = session.resolve(raw)?;
                store.update(|c| c.toggle_selection(id));
            }
            Output::Selection
        }
        Command::Selection => Output::Selection,
        Command::Bulk(BulkCommand::Status { status }) => {
            let status: TaskStatus = status.parse()?;
            let updated = store.update(|c| c.bulk_status_change_selected(status, now));
            Output::Message(format!("Set {updated} task(s) to {status}."))
        }
        Command::Bulk(BulkCommand::Delete) => {
            let removed = store.update(|c| c.bulk_delete_selected(now));
            Output::Message(format!("Deleted {removed} task(s)."))
        }
        Command::Attach { id, file } => {
            let id = session.resolve(&id)?;
            let attachment = session.upload(&file)?;
            let name = attachment.name.clone();
            store.update(|c| c.add_attachment(id, attachment, now))?;
            Output::Message(format!("Attached {name} to task {}.", short_id(id)))
        }
        Command::Detach { id, name } => {
            let id = session.resolve(&id)?;
            let removed = store.update(|c| c.remove_attachment(id, &name, now))?;
            Output::Message(if removed {
                format!("Removed {name} from task {}.", short_id(id))
            } else {
                format!("Task {} has no attachment named {name}.", short_id(id))
            })
        }
        Command::History { limit } => Output::History(limit),
        Command::Login | Command::Logout | Command::Whoami => {
            return Err(anyhow!("session command dispatched without a session"));
        }
    };

    Ok(output)
}

#[instrument(skip(session, args, now))]
fn cmd_add(session: &Session, args: &AddArgs, now: DateTime<Utc>) -> anyhow::Result<Output> {
    let mut request = args.to_request();
    for path in &args.attach {
        let attachment = session.upload(path)?;
        request.attachments.push(AttachmentDto {
            name: attachment.name,
            locator: attachment.locator,
        });
    }

    let draft = draft_from_create(request, now)?;
    let id = session.store.update(|c| c.create(draft, now))?;
    Ok(Output::Message(format!("Created task {}.", short_id(id))))
}

fn report_notices(notices: Vec<Notice>) {
    for notice in notices {
        eprintln!("{notice}");
    }
}

fn print_output(session: &Session, cfg: &Config, renderer: &Renderer, output: Output) -> anyhow::Result<()> {
    let now = Utc::now();
    let mut out = io::stdout().lock();

    match output {
        Output::Message(message) => {
            writeln!(out, "{message}")?;
            Ok(())
        }
        Output::Tasks(args) => session.store.read(|c| {
            let visible = c.visible(now);
            if args.json {
                renderer.write_json(out, &visible, c.selection())
            } else {
                let view = args.view.unwrap_or_else(|| cfg.default_view());
                renderer.write_tasks(out, view, &visible, c.selection(), now)
            }
        }),
        Output::Show(id) => session.store.read(|c| match c.get(id) {
            Some(task) => renderer.write_task_info(out, task, c.is_selected(id)),
            None => Err(TaskError::NotFound(id).into()),
        }),
        Output::Selection => session.store.read(|c| {
            let selected: Vec<&Task> = c.tasks().iter().filter(|task| c.is_selected(task.id)).collect();
            renderer.write_tasks(out, cfg.default_view(), &selected, c.selection(), now)
        }),
        Output::History(limit) => {
            let entries = session.backend.load_activity(&session.user.uid)?;
            let skip = entries.len().saturating_sub(limit);
            renderer.write_history(out, &entries[skip..])
        }
    }
}
