use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tasklane_shared::{TaskCreate, TasksListArgs};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::lanes::ViewMode;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tasklane",
    version,
    about = "Tasklane: personal task lanes from the terminal",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "rc-file")]
    pub rc_file: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Sign in, interactively when possible.
    Login,
    Logout,
    Whoami,
    /// Show tasks grouped by status.
    List(ListArgs),
    Add(AddArgs),
    Edit(EditArgs),
    /// Show every field of one task.
    Show { id: String },
    Delete { id: String },
    /// Move a task to the position another task occupies.
    Move { id: String, target: String },
    /// Toggle tasks in and out of the selection.
    Select {
        ids: Vec<String>,
        #[arg(long)]
        clear: bool,
    },
    Selection,
    /// Apply a change to every selected task.
    #[command(subcommand)]
    Bulk(BulkCommand),
    Attach { id: String, file: PathBuf },
    Detach { id: String, name: String },
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum BulkCommand {
    Status { status: String },
    Delete,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    #[arg(long)]
    pub query: Option<String>,

    #[arg(long)]
    pub category: Option<String>,

    /// today, week or month.
    #[arg(long)]
    pub due: Option<String>,

    #[arg(long, value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<ViewMode>()))]
    pub view: Option<ViewMode>,

    #[arg(long)]
    pub json: bool,
}

impl ListArgs {
    pub fn to_request(&self) -> TasksListArgs {
        TasksListArgs {
            query: self.query.clone(),
            category: self.category.clone(),
            due: self.due.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    #[arg(required = true, num_args = 1..)]
    pub title: Vec<String>,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long)]
    pub status: Option<String>,

    #[arg(long)]
    pub category: Option<String>,

    /// YYYY-MM-DD, today, tomorrow, a weekday name or +Nd / +Nw.
    #[arg(long)]
    pub due: Option<String>,

    #[arg(long = "attach", action = ArgAction::Append)]
    pub attach: Vec<PathBuf>,
}

impl AddArgs {
    /// Form payload without attachments; those need uploading first.
    pub fn to_request(&self) -> TaskCreate {
        TaskCreate {
            title: self.title.join(" "),
            description: self.description.clone(),
            status: self.status.clone(),
            category: self.category.clone(),
            due: self.due.clone(),
            attachments: vec![],
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long, conflicts_with = "clear_description")]
    pub description: Option<String>,

    #[arg(long)]
    pub clear_description: bool,

    #[arg(long)]
    pub status: Option<String>,

    #[arg(long)]
    pub category: Option<String>,

    #[arg(long)]
    pub due: Option<String>,
}

impl EditArgs {
    pub fn to_patch(&self) -> tasklane_shared::TaskPatch {
        let description = if self.clear_description {
            Some(None)
        } else {
            self.description.clone().map(Some)
        };
        tasklane_shared::TaskPatch {
            title: self.title.clone(),
            description,
            status: self.status.clone(),
            category: self.category.clone(),
            due: self.due.clone(),
            attachments: None,
        }
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` and `rc.key:value` tokens out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest.split_once('=').or_else(|| rest.split_once(':'));
            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((format!("rc.{k}"), v.to_string()));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<OsString> {
        raw.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_tokens_become_overrides() {
        let pre = preprocess_args(&args(&["tasklane", "rc.color=off", "list", "rc.default.view:board"])).unwrap();

        assert_eq!(pre.cleaned_args, args(&["tasklane", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.default.view".to_string(), "board".to_string()),
            ]
        );
    }

    #[test]
    fn add_joins_title_words_and_keeps_flags() {
        let cli = GlobalCli::try_parse_from(args(&[
            "tasklane", "--rc", "color=off", "add", "pay", "rent", "--category", "personal", "--due", "+2d",
        ]))
        .unwrap();

        assert_eq!(cli.rc_overrides[0].key, "color");
        let Some(Command::Add(add)) = cli.command else {
            panic!("expected add command");
        };
        let request = add.to_request();
        assert_eq!(request.title, "pay rent");
        assert_eq!(request.category.as_deref(), Some("personal"));
        assert_eq!(request.due.as_deref(), Some("+2d"));
    }

    #[test]
    fn edit_can_clear_description() {
        let cli = GlobalCli::try_parse_from(args(&["tasklane", "edit", "abc1", "--clear-description"])).unwrap();

        let Some(Command::Edit(edit)) = cli.command else {
            panic!("expected edit command");
        };
        assert_eq!(edit.to_patch().description, Some(None));
    }

    #[test]
    fn list_view_is_validated() {
        assert!(GlobalCli::try_parse_from(args(&["tasklane", "list", "--view", "board"])).is_ok());
        assert!(GlobalCli::try_parse_from(args(&["tasklane", "list", "--view", "grid"])).is_err());
    }

    #[test]
    fn bulk_status_parses() {
        let cli = GlobalCli::try_parse_from(args(&["tasklane", "bulk", "status", "completed"])).unwrap();

        assert!(matches!(
            cli.command,
            Some(Command::Bulk(BulkCommand::Status { ref status })) if status == "completed"
        ));
    }
}
