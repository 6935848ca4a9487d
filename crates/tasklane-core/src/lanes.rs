use std::fmt;
use std::str::FromStr;

use crate::error::TaskError;
use crate::task::{
  Task,
  TaskStatus
};

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
)]
pub enum ViewMode {
  #[default]
  List,
  Board
}

impl ViewMode {
  pub fn as_str(self) -> &'static str {
    match self {
      | ViewMode::List => "list",
      | ViewMode::Board => "board"
    }
  }
}

impl fmt::Display for ViewMode {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ViewMode {
  type Err = TaskError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "list" => Ok(ViewMode::List),
      | "board" | "kanban" => {
        Ok(ViewMode::Board)
      }
      | other => {
        Err(TaskError::Validation(
          format!("invalid view: {other}")
        ))
      }
    }
  }
}

/// Tasks sharing one status, in
/// manual order.
#[derive(Debug, Clone)]
pub struct Lane<'a> {
  pub status: TaskStatus,
  pub tasks:  Vec<&'a Task>
}

impl Lane<'_> {
  pub fn count(&self) -> usize {
    self.tasks.len()
  }
}

/// Groups `tasks` into one lane per
/// status. Lanes come out in
/// `TaskStatus::ALL` order and are
/// kept even when empty; within a lane
/// tasks sort by `order`, ties keeping
/// their input position.
pub fn group_into_lanes<'a>(
  tasks: &[&'a Task]
) -> Vec<Lane<'a>> {
  TaskStatus::ALL
    .iter()
    .map(|&status| {
      let mut lane: Vec<&Task> = tasks
        .iter()
        .copied()
        .filter(|task| {
          task.status == status
        })
        .collect();
      lane.sort_by_key(|task| task.order);
      Lane {
        status,
        tasks: lane
      }
    })
    .collect()
}
