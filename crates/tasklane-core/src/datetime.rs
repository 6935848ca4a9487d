use std::fs;
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  NaiveDate,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;
use tracing::{
  debug,
  warn
};

const TIMEZONE_ENV_VAR: &str =
  "TASKLANE_TIMEZONE";
const TIMEZONE_FILE: &str =
  "tasklane-time.toml";

#[derive(Debug, Deserialize)]
struct TimezoneFile {
  timezone: Option<String>
}

/// Zone used to turn instants into
/// calendar days: `TASKLANE_TIMEZONE`,
/// then `tasklane-time.toml` in the
/// working directory, then UTC.
pub fn project_timezone() -> &'static Tz
{
  static PROJECT_TZ: OnceLock<Tz> =
    OnceLock::new();
  PROJECT_TZ.get_or_init(|| {
    std::env::var(TIMEZONE_ENV_VAR)
      .ok()
      .and_then(|raw| {
        parse_timezone(&raw)
      })
      .or_else(timezone_from_file)
      .unwrap_or(chrono_tz::UTC)
  })
}

/// Calendar day of `dt` in the
/// project timezone.
#[must_use]
pub fn to_project_date(
  dt: DateTime<Utc>
) -> NaiveDate {
  dt.with_timezone(project_timezone())
    .date_naive()
}

fn timezone_from_file() -> Option<Tz> {
  let path = std::env::current_dir()
    .ok()?
    .join(TIMEZONE_FILE);
  let raw =
    fs::read_to_string(&path).ok()?;
  debug!(file = %path.display(), "reading timezone file");
  timezone_from_toml(&raw)
}

fn timezone_from_toml(
  raw: &str
) -> Option<Tz> {
  match toml::from_str::<TimezoneFile>(
    raw
  ) {
    | Ok(parsed) => {
      parsed
        .timezone
        .as_deref()
        .and_then(parse_timezone)
    }
    | Err(err) => {
      warn!(error = %err, "ignoring malformed timezone file");
      None
    }
  }
}

fn parse_timezone(
  raw: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  match trimmed.parse::<Tz>() {
    | Ok(tz) => Some(tz),
    | Err(err) => {
      if !trimmed.is_empty() {
        warn!(timezone = %trimmed, error = %err, "unknown timezone id");
      }
      None
    }
  }
}

/// Parses a due-date expression
/// relative to `now`.
///
/// Accepts `YYYY-MM-DD`, `today`,
/// `tomorrow`, `yesterday`, weekday
/// names (next occurrence, never
/// today) and offsets such as `+3d`,
/// `+2w` or `-1d`.
#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_due_date(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let today = to_project_date(now);

  match lower.as_str() {
    | "" => {
      return Err(anyhow!(
        "due date cannot be empty"
      ));
    }
    | "today" => return Ok(today),
    | "tomorrow" => {
      return shift_days(today, 1);
    }
    | "yesterday" => {
      return shift_days(today, -1);
    }
    | _ => {}
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d{1,4})(?P<unit>[dw])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let amount: i64 = caps["num"]
      .parse()
      .context("invalid offset amount")?;
    let unit_days = if &caps["unit"] == "w" {
      7
    } else {
      1
    };
    let sign =
      if &caps["sign"] == "-" { -1 } else { 1 };
    return shift_days(
      today,
      sign * amount * unit_days
    );
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today,
      target_weekday
    ));
  }

  NaiveDate::parse_from_str(
    token, "%Y-%m-%d"
  )
  .with_context(|| {
    format!(
      "unrecognized due date: {token}"
    )
  })
}

fn shift_days(
  from: NaiveDate,
  days: i64
) -> anyhow::Result<NaiveDate> {
  from
    .checked_add_signed(Duration::days(
      days
    ))
    .ok_or_else(|| {
      anyhow!(
        "due date out of range: \
         {from} {days:+}d"
      )
    })
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}


pub mod compact_date_serde {
  use chrono::{
    DateTime,
    NaiveDateTime,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  const FORMAT: &str = "%Y%m%dT%H%M%SZ";

  pub fn format(
    dt: &DateTime<Utc>
  ) -> String {
    dt.format(FORMAT).to_string()
  }

  pub fn serialize<S>(
    dt: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer
      .serialize_str(&format(dt))
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    NaiveDateTime::parse_from_str(
      &raw, FORMAT
    )
    .map(|ndt| {
      DateTime::<Utc>::from_naive_utc_and_offset(
        ndt, Utc
      )
    })
    .map_err(serde::de::Error::custom)
  }
}
