use thiserror::Error;

use crate::task::TaskId;

/// Failures the collection reports to
/// its caller. Collaborator failures
/// travel as `anyhow::Error` instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
  #[error("validation failed: {0}")]
  Validation(String),
  #[error("task not found: {0}")]
  NotFound(TaskId),
  #[error(
    "ambiguous task id prefix: {0}"
  )]
  AmbiguousId(String)
}
