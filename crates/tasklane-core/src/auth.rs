use std::fs;
use std::io::{
  self,
  BufRead,
  IsTerminal,
  Write
};
use std::path::{
  Path,
  PathBuf
};

use anyhow::Context;
use serde::{
  Deserialize,
  Serialize
};
use thiserror::Error;
use tracing::{
  debug,
  info,
  instrument,
  warn
};

use crate::config::Config;
use crate::store::SharedStore;

const USER_ENV_VAR: &str =
  "TASKLANE_USER";

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct UserIdentity {
  pub uid:          String,
  #[serde(default)]
  pub display_name: Option<String>
}

impl UserIdentity {
  pub fn label(&self) -> &str {
    self
      .display_name
      .as_deref()
      .unwrap_or(&self.uid)
  }
}

#[derive(Debug, Error)]
pub enum AuthError {
  /// The environment refused to open
  /// the interactive flow.
  #[error(
    "interactive sign-in is \
     unavailable here"
  )]
  OverlayBlocked,
  #[error("sign-in rejected: {0}")]
  Rejected(String),
  #[error(transparent)]
  Other(#[from] anyhow::Error)
}

/// Auth collaborator.
pub trait AuthProvider {
  fn current_user(
    &self
  ) -> Option<UserIdentity>;

  fn sign_in_overlay(
    &self
  ) -> Result<UserIdentity, AuthError>;

  fn sign_in_redirect(
    &self
  ) -> Result<UserIdentity, AuthError>;

  fn sign_out(
    &self
  ) -> Result<(), AuthError>;
}

/// Tries the interactive flow first and
/// falls back to the redirect flow only
/// when the interactive one is blocked.
#[instrument(skip(provider))]
pub fn sign_in<
  P: AuthProvider + ?Sized
>(
  provider: &P
) -> Result<UserIdentity, AuthError> {
  match provider.sign_in_overlay() {
    | Ok(user) => {
      info!(uid = %user.uid, "signed in interactively");
      Ok(user)
    }
    | Err(AuthError::OverlayBlocked) => {
      info!(
        "interactive sign-in blocked; \
         falling back to redirect flow"
      );
      let user =
        provider.sign_in_redirect()?;
      info!(uid = %user.uid, "signed in via redirect flow");
      Ok(user)
    }
    | Err(err) => {
      warn!(error = %err, "sign-in failed");
      Err(err)
    }
  }
}

/// Ends the session and drops the
/// signed-in user's tasks and selection
/// from memory.
#[instrument(skip_all)]
pub fn sign_out<
  P: AuthProvider + ?Sized
>(
  provider: &P,
  store: &SharedStore
) -> Result<(), AuthError> {
  provider.sign_out()?;
  store.update(|collection| {
    collection.clear_selection();
    collection.replace_all(Vec::new());
  });
  Ok(())
}

/// Session kept in the data directory.
/// The interactive flow prompts on the
/// terminal; the redirect flow takes
/// the identity from configuration.
#[derive(Debug, Clone)]
pub struct LocalAuth {
  session_path: PathBuf,
  configured:   Option<UserIdentity>,
  interactive:  bool
}

impl LocalAuth {
  pub fn new(
    cfg: &Config,
    data_dir: &Path
  ) -> Self {
    let configured = cfg
      .get("auth.user")
      .or_else(|| {
        std::env::var(USER_ENV_VAR).ok()
      })
      .map(|uid| uid.trim().to_string())
      .filter(|uid| !uid.is_empty())
      .map(|uid| {
        UserIdentity {
          uid,
          display_name: cfg
            .get("auth.name")
        }
      });
    let interactive = cfg
      .get_bool("auth.interactive")
      .unwrap_or(true)
      && io::stdin().is_terminal();

    debug!(
      configured = configured.is_some(),
      interactive,
      "initialized local auth"
    );

    Self::with_identity(
      data_dir,
      configured,
      interactive
    )
  }

  pub fn with_identity(
    data_dir: &Path,
    configured: Option<UserIdentity>,
    interactive: bool
  ) -> Self {
    Self {
      session_path: data_dir
        .join("session.json"),
      configured,
      interactive
    }
  }

  fn store_session(
    &self,
    user: &UserIdentity
  ) -> Result<(), AuthError> {
    let payload =
      serde_json::to_string_pretty(user)
        .context(
          "failed to encode session"
        )?;
    fs::write(
      &self.session_path,
      payload
    )
    .with_context(|| {
      format!(
        "failed writing {}",
        self.session_path.display()
      )
    })?;
    Ok(())
  }
}

impl AuthProvider for LocalAuth {
  fn current_user(
    &self
  ) -> Option<UserIdentity> {
    let raw = fs::read_to_string(
      &self.session_path
    )
    .ok()?;
    match serde_json::from_str(&raw) {
      | Ok(user) => Some(user),
      | Err(err) => {
        warn!(file = %self.session_path.display(), error = %err, "ignoring unreadable session");
        None
      }
    }
  }

  fn sign_in_overlay(
    &self
  ) -> Result<UserIdentity, AuthError> {
    if !self.interactive {
      return Err(
        AuthError::OverlayBlocked
      );
    }

    let mut stderr = io::stderr().lock();
    write!(stderr, "user id: ")
      .context("failed to write prompt")?;
    stderr
      .flush()
      .context("failed to flush prompt")?;

    let mut line = String::new();
    io::stdin()
      .lock()
      .read_line(&mut line)
      .context("failed to read user id")?;
    let uid = line.trim();
    if uid.is_empty() {
      return Err(AuthError::Rejected(
        "no user id entered".to_string()
      ));
    }

    let user = UserIdentity {
      uid:          uid.to_string(),
      display_name: self
        .configured
        .as_ref()
        .filter(|configured| {
          configured.uid == uid
        })
        .and_then(|configured| {
          configured.display_name.clone()
        })
    };
    self.store_session(&user)?;
    Ok(user)
  }

  fn sign_in_redirect(
    &self
  ) -> Result<UserIdentity, AuthError> {
    let user = self
      .configured
      .clone()
      .ok_or_else(|| {
        AuthError::Rejected(format!(
          "no identity configured; set \
           auth.user or {USER_ENV_VAR}"
        ))
      })?;
    self.store_session(&user)?;
    Ok(user)
  }

  fn sign_out(
    &self
  ) -> Result<(), AuthError> {
    if self.session_path.exists() {
      fs::remove_file(&self.session_path)
        .with_context(|| {
          format!(
            "failed removing {}",
            self.session_path.display()
          )
        })?;
    }
    info!("signed out");
    Ok(())
  }
}
