use std::fmt;
use std::str::FromStr;

use chrono::{
  DateTime,
  Datelike,
  Days,
  NaiveDate,
  Utc
};
use tracing::trace;

use crate::datetime::to_project_date;
use crate::error::TaskError;
use crate::task::{
  Category,
  Task
};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum DueBucket {
  Today,
  Week,
  Month
}

impl DueBucket {
  /// Empty input and `all` mean no
  /// bucket.
  pub fn parse_optional(
    raw: &str
  ) -> Result<Option<Self>, TaskError>
  {
    match raw
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "" | "all" => Ok(None),
      | other => other.parse().map(Some)
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      | DueBucket::Today => "today",
      | DueBucket::Week => "week",
      | DueBucket::Month => "month"
    }
  }

  /// `Week` is an upper bound only:
  /// overdue tasks pass as well.
  pub fn contains(
    self,
    due: NaiveDate,
    today: NaiveDate
  ) -> bool {
    match self {
      | DueBucket::Today => due == today,
      | DueBucket::Week => {
        let week_end = today
          .checked_add_days(Days::new(7))
          .unwrap_or(NaiveDate::MAX);
        due <= week_end
      }
      | DueBucket::Month => {
        due.month() == today.month()
          && due.year() == today.year()
      }
    }
  }
}

impl fmt::Display for DueBucket {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for DueBucket {
  type Err = TaskError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "today" => Ok(DueBucket::Today),
      | "week" => Ok(DueBucket::Week),
      | "month" => Ok(DueBucket::Month),
      | other => {
        Err(TaskError::Validation(
          format!(
            "invalid due bucket: {other}"
          )
        ))
      }
    }
  }
}

#[derive(
  Debug, Clone, Default, PartialEq, Eq,
)]
pub struct TaskFilter {
  pub query:    String,
  pub category: Option<Category>,
  pub due:      Option<DueBucket>
}

impl TaskFilter {
  pub fn is_empty(&self) -> bool {
    self.query.trim().is_empty()
      && self.category.is_none()
      && self.due.is_none()
  }

  pub fn matches(
    &self,
    task: &Task,
    now: DateTime<Utc>
  ) -> bool {
    self.matches_on(
      task,
      to_project_date(now)
    )
  }

  pub fn matches_on(
    &self,
    task: &Task,
    today: NaiveDate
  ) -> bool {
    let query =
      self.query.to_lowercase();
    let text_match = query.is_empty()
      || task
        .title
        .to_lowercase()
        .contains(&query);

    let category_match = self
      .category
      .is_none_or(|category| {
        task.category == category
      });

    let due_match =
      self.due.is_none_or(|bucket| {
        bucket
          .contains(task.due_date, today)
      });

    trace!(
      id = %task.id,
      text_match,
      category_match,
      due_match,
      "filter evaluated"
    );

    text_match
      && category_match
      && due_match
  }

  /// Stable: the result keeps input
  /// order and never duplicates.
  pub fn apply<'a>(
    &self,
    tasks: &'a [Task],
    now: DateTime<Utc>
  ) -> Vec<&'a Task> {
    let today = to_project_date(now);
    tasks
      .iter()
      .filter(|task| {
        self.matches_on(task, today)
      })
      .collect()
  }
}
