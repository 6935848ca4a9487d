use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::activity::DEFAULT_ACTIVITY_LIMIT;
use crate::lanes::ViewMode;

const RC_ENV_VAR: &str = "TASKLANERC";
const RC_FILE_NAME: &str =
  ".tasklanerc";
const DATA_DIR_NAME: &str =
  ".tasklane";

/// Flat key/value settings from
/// defaults, the rc file chain and
/// command-line overrides, in that
/// order of precedence.
#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      ("data.location", "~/.tasklane"),
      ("color", "on"),
      ("default.view", "list"),
      ("activity.limit", "200")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }
    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    match resolve_rc_path(rc_override)?
    {
      | Some(path) => {
        info!(rc = %path.display(), "loading rc file");
        cfg.load_file(&path)?;
      }
      | None => {
        debug!(
          "no rc file found; using \
           defaults"
        );
      }
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  /// Capacity of the in-memory
  /// activity log. Zero or garbage
  /// falls back to the default.
  pub fn activity_limit(
    &self
  ) -> usize {
    self
      .map
      .get("activity.limit")
      .and_then(|raw| {
        raw.trim().parse::<usize>().ok()
      })
      .filter(|limit| *limit > 0)
      .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
  }

  pub fn default_view(
    &self
  ) -> ViewMode {
    match self.map.get("default.view") {
      | Some(raw) => {
        raw.parse().unwrap_or_else(
          |_| {
            warn!(value = %raw, "unknown default.view; using list");
            ViewMode::List
          }
        )
      }
      | None => ViewMode::List
    }
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let line = strip_comment(raw_line);
      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match (
    override_dir,
    cfg.get("data.location")
  ) {
    | (Some(path), _) => {
      path.to_path_buf()
    }
    | (None, Some(cfg_value)) => {
      expand_tilde(Path::new(
        &cfg_value
      ))
    }
    | (None, None) => {
      home_dir()?.join(DATA_DIR_NAME)
    }
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let candidate =
    home_dir()?.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn home_dir() -> anyhow::Result<PathBuf>
{
  dirs::home_dir().ok_or_else(|| {
    anyhow!(
      "cannot determine home \
       directory"
    )
  })
}

fn strip_comment(
  raw_line: &str
) -> &str {
  match raw_line.split_once('#') {
    | Some((before, _)) => {
      before.trim()
    }
    | None => raw_line.trim()
  }
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let expanded =
    expand_tilde(Path::new(include));
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::*;

  #[test]
  fn rc_file_with_include_and_comments()
  {
    let temp = tempdir().unwrap();
    let extra = temp.path().join("extra.rc");
    fs::write(
      &extra,
      "auth.name = Ada Lovelace\n"
    )
    .unwrap();
    let rc = temp.path().join("main.rc");
    fs::write(
      &rc,
      "# tasklane settings\ncolor=off  # no ansi\nactivity.limit=50\ninclude extra.rc\n"
    )
    .unwrap();

    let cfg =
      Config::load(Some(rc.as_path())).unwrap();

    assert_eq!(cfg.get_bool("color"), Some(false));
    assert_eq!(cfg.activity_limit(), 50);
    assert_eq!(
      cfg.get("auth.name").as_deref(),
      Some("Ada Lovelace")
    );
    assert_eq!(cfg.loaded_files.len(), 2);
    assert_eq!(cfg.default_view(), ViewMode::List);
  }

  #[test]
  fn invalid_line_is_reported() {
    let temp = tempdir().unwrap();
    let rc = temp.path().join("bad.rc");
    fs::write(&rc, "just words\n").unwrap();

    let err =
      Config::load(Some(rc.as_path())).unwrap_err();

    assert!(err.to_string().contains("bad.rc:1"));
  }

  #[test]
  fn overrides_win_and_strip_rc_prefix()
  {
    let mut cfg = Config::default();
    cfg.apply_overrides([
      (
        "rc.default.view".to_string(),
        "board".to_string()
      ),
      (
        "activity.limit".to_string(),
        "0".to_string()
      )
    ]);

    assert_eq!(cfg.default_view(), ViewMode::Board);
    assert_eq!(
      cfg.activity_limit(),
      DEFAULT_ACTIVITY_LIMIT
    );
  }

  #[test]
  fn data_dir_override_is_created() {
    let temp = tempdir().unwrap();
    let target = temp.path().join("nested/data");

    let dir = resolve_data_dir(
      &Config::default(),
      Some(target.as_path())
    )
    .unwrap();

    assert_eq!(dir, target);
    assert!(target.is_dir());
  }
}
