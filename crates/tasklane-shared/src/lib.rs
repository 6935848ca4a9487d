use serde::{
  Deserialize,
  Serialize
};
use uuid::Uuid;

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct AttachmentDto {
  pub name:    String,
  pub locator: String
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
)]
pub struct TaskDto {
  pub id:          Uuid,
  #[serde(default)]
  pub title:       String,
  pub description: Option<String>,
  pub status:      String,
  pub category:    String,
  pub due_date:    String,
  pub created_at:  String,
  pub updated_at:  String,
  pub owner_id:    String,
  #[serde(default)]
  pub attachments: Vec<AttachmentDto>,
  pub order:       i64,
  #[serde(default)]
  pub selected:    bool
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  Default,
)]
pub struct TasksListArgs {
  pub query:    Option<String>,
  pub category: Option<String>,
  pub due:      Option<String>
}

/// Create payload as entered in a
/// form. Enum-like fields stay
/// strings until validated.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  Default,
)]
pub struct TaskCreate {
  pub title:       String,
  pub description: Option<String>,
  pub status:      Option<String>,
  pub category:    Option<String>,
  pub due:         Option<String>,
  #[serde(default)]
  pub attachments: Vec<AttachmentDto>
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  Default,
)]
pub struct TaskPatch {
  pub title:       Option<String>,
  #[serde(
    default,
    deserialize_with = "present_or_null",
    skip_serializing_if = "Option::is_none"
  )]
  pub description:
    Option<Option<String>>,
  pub status:      Option<String>,
  pub category:    Option<String>,
  pub due:         Option<String>,
  pub attachments:
    Option<Vec<AttachmentDto>>
}

/// A present `null` means "clear",
/// an absent key means "leave as is".
fn present_or_null<'de, D, T>(
  deserializer: D
) -> Result<Option<Option<T>>, D::Error>
where
  D: serde::Deserializer<'de>,
  T: Deserialize<'de>
{
  Option::<T>::deserialize(deserializer)
    .map(Some)
}
