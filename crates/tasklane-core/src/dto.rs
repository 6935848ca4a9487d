use chrono::{
  DateTime,
  Utc
};
use tasklane_shared::{
  AttachmentDto,
  TaskCreate,
  TaskDto,
  TasksListArgs
};

use crate::datetime::{
  compact_date_serde,
  parse_due_date
};
use crate::error::TaskError;
use crate::filter::{
  DueBucket,
  TaskFilter
};
use crate::task::{
  Attachment,
  Category,
  Task,
  TaskDraft,
  TaskPatch
};

pub fn task_to_dto(
  task: &Task,
  selected: bool
) -> TaskDto {
  TaskDto {
    id: task.id,
    title: task.title.clone(),
    description: task
      .description
      .clone(),
    status: task
      .status
      .as_str()
      .to_string(),
    category: task
      .category
      .as_str()
      .to_string(),
    due_date: task
      .due_date
      .format("%Y-%m-%d")
      .to_string(),
    created_at:
      compact_date_serde::format(
        &task.created_at
      ),
    updated_at:
      compact_date_serde::format(
        &task.updated_at
      ),
    owner_id: task.owner_id.clone(),
    attachments: task
      .attachments
      .iter()
      .map(attachment_to_dto)
      .collect(),
    order: task.order,
    selected
  }
}

fn attachment_to_dto(
  attachment: &Attachment
) -> AttachmentDto {
  AttachmentDto {
    name:    attachment.name.clone(),
    locator: attachment
      .locator
      .clone()
  }
}

fn attachment_from_dto(
  dto: AttachmentDto
) -> Attachment {
  Attachment {
    name:    dto.name,
    locator: dto.locator
  }
}

/// Validates a form payload into a
/// draft. Unset fields stay unset so
/// the collection applies its
/// defaults.
pub fn draft_from_create(
  create: TaskCreate,
  now: DateTime<Utc>
) -> Result<TaskDraft, TaskError> {
  Ok(TaskDraft {
    title: create.title,
    description: create
      .description
      .filter(|text| {
        !text.trim().is_empty()
      }),
    status: create
      .status
      .as_deref()
      .map(str::parse)
      .transpose()?,
    category: create
      .category
      .as_deref()
      .map(str::parse)
      .transpose()?,
    due_date: create
      .due
      .as_deref()
      .map(|raw| due_from_expr(raw, now))
      .transpose()?,
    attachments: create
      .attachments
      .into_iter()
      .map(attachment_from_dto)
      .collect()
  })
}

pub fn patch_from_dto(
  patch: tasklane_shared::TaskPatch,
  now: DateTime<Utc>
) -> Result<TaskPatch, TaskError> {
  Ok(TaskPatch {
    title: patch.title,
    description: patch
      .description
      .map(|description| {
        description.filter(|text| {
          !text.trim().is_empty()
        })
      }),
    status: patch
      .status
      .as_deref()
      .map(str::parse)
      .transpose()?,
    category: patch
      .category
      .as_deref()
      .map(str::parse)
      .transpose()?,
    due_date: patch
      .due
      .as_deref()
      .map(|raw| due_from_expr(raw, now))
      .transpose()?,
    attachments: patch
      .attachments
      .map(|attachments| {
        attachments
          .into_iter()
          .map(attachment_from_dto)
          .collect()
      }),
    order: None
  })
}

pub fn filter_from_args(
  args: &TasksListArgs
) -> Result<TaskFilter, TaskError> {
  let category: Option<Category> = match args
    .category
    .as_deref()
    .map(str::trim)
  {
    | None | Some("") => None,
    | Some(raw)
      if raw
        .eq_ignore_ascii_case("all") =>
    {
      None
    }
    | Some(raw) => Some(raw.parse()?)
  };
  let due = match args.due.as_deref() {
    | Some(raw) => {
      DueBucket::parse_optional(raw)?
    }
    | None => None
  };

  Ok(TaskFilter {
    query: args
      .query
      .clone()
      .unwrap_or_default(),
    category,
    due
  })
}

fn due_from_expr(
  raw: &str,
  now: DateTime<Utc>
) -> Result<chrono::NaiveDate, TaskError>
{
  parse_due_date(raw, now).map_err(
    |err| {
      TaskError::Validation(format!(
        "{err:#}"
      ))
    }
  )
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone
  };

  use super::*;
  use crate::task::TaskStatus;

  fn noon() -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2026, 10, 18, 12, 0, 0
      )
      .unwrap()
  }

  #[test]
  fn create_payload_becomes_draft() {
    let draft = draft_from_create(
      TaskCreate {
        title: "Pay rent".to_string(),
        description: Some(
          "  ".to_string()
        ),
        status: Some(
          "in-progress".to_string()
        ),
        category: Some(
          "personal".to_string()
        ),
        due: Some(
          "2026-11-01".to_string()
        ),
        attachments: vec![]
      },
      noon()
    )
    .unwrap();

    assert_eq!(draft.description, None);
    assert_eq!(
      draft.status,
      Some(TaskStatus::InProgress)
    );
    assert_eq!(
      draft.category,
      Some(Category::Personal)
    );
    assert_eq!(
      draft.due_date,
      NaiveDate::from_ymd_opt(
        2026, 11, 1
      )
    );
  }

  #[test]
  fn invalid_enum_is_a_validation_error()
  {
    let err = draft_from_create(
      TaskCreate {
        title: "x".to_string(),
        status: Some(
          "blocked".to_string()
        ),
        ..TaskCreate::default()
      },
      noon()
    )
    .unwrap_err();
    assert!(matches!(
      err,
      TaskError::Validation(_)
    ));

    let err = patch_from_dto(
      tasklane_shared::TaskPatch {
        due: Some(
          "someday".to_string()
        ),
        ..Default::default()
      },
      noon()
    )
    .unwrap_err();
    assert!(matches!(
      err,
      TaskError::Validation(_)
    ));
  }

  #[test]
  fn list_args_map_to_filter() {
    let filter =
      filter_from_args(&TasksListArgs {
        query: Some("rent".to_string()),
        category: Some(
          "all".to_string()
        ),
        due: Some("week".to_string())
      })
      .unwrap();

    assert_eq!(filter.query, "rent");
    assert_eq!(filter.category, None);
    assert_eq!(
      filter.due,
      Some(DueBucket::Week)
    );
  }

  #[test]
  fn dto_carries_wire_names() {
    let mut collection =
      crate::collection::TaskCollection::new(
        "u1"
      );
    let id = collection
      .create(
        TaskDraft::titled("ship"),
        noon()
      )
      .unwrap();
    let task = collection
      .get(id)
      .unwrap();

    let dto = task_to_dto(task, true);

    assert_eq!(dto.status, "TO-DO");
    assert_eq!(dto.category, "WORK");
    assert_eq!(dto.due_date, "2026-10-18");
    assert_eq!(
      dto.created_at,
      "20261018T120000Z"
    );
    assert!(dto.selected);
  }
}
