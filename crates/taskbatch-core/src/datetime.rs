use std::fmt;

use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  SubsecRound,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::{
  Deserialize,
  Deserializer,
  Serialize,
  Serializer
};

use crate::config::Config;
use crate::error::SyncError;

/// The only textual form ever sent to the remote store.
pub const WIRE_FORMAT: &str =
  "%Y-%m-%d %H:%M:%S";
pub const DEFAULT_TIMEZONE: &str =
  "UTC";

const NAIVE_FORMATS: &[&str] = &[
  "%Y-%m-%d %H:%M:%S",
  "%Y-%m-%d %H:%M",
  "%Y-%m-%dT%H:%M:%S",
  "%Y-%m-%dT%H:%M",
  "%Y-%m-%dT%H:%M:%S%.f"
];

/// A validated due date. Always held as a UTC instant; inputs with no
/// offset are resolved in the caller's timezone at parse time.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
)]
pub struct DueDate(DateTime<Utc>);

impl DueDate {
  /// Drops sub-second precision, which the wire form cannot carry.
  #[must_use]
  pub fn from_utc(
    dt: DateTime<Utc>
  ) -> Self {
    Self(dt.trunc_subsecs(0))
  }

  #[must_use]
  pub fn as_utc(&self) -> DateTime<Utc> {
    self.0
  }

  /// Calendar-day portion, equal to the first ten characters of the
  /// wire form.
  #[must_use]
  pub fn day(&self) -> NaiveDate {
    self.0.date_naive()
  }

  #[must_use]
  pub fn to_wire(&self) -> String {
    self.0.format(WIRE_FORMAT).to_string()
  }

  /// Parses user-entered text: absolute forms plus `today`,
  /// `tomorrow`, `yesterday`, weekday names and `+Nd`/`+Nw`.
  #[tracing::instrument(skip_all, fields(input = raw))]
  pub fn parse_input(
    raw: &str,
    tz: &Tz,
    now: DateTime<Utc>
  ) -> Result<Self, SyncError> {
    let token = raw.trim();
    if token.is_empty() {
      return Err(SyncError::validation(
        "due date",
        "empty date expression"
      ));
    }

    if let Some(dt) =
      parse_absolute(token, tz)?
    {
      return Ok(Self::from_utc(dt));
    }

    if let Some(dt) =
      parse_relative(token, tz, now)?
    {
      return Ok(Self::from_utc(dt));
    }

    Err(SyncError::validation(
      "due date",
      format!(
        "unrecognized date '{token}' \
         (expected YYYY-MM-DD, \
         YYYY-MM-DD HH:MM[:SS], \
         RFC3339, today, tomorrow, \
         yesterday, a weekday name, \
         +Nd or +Nw)"
      )
    ))
  }

  /// Parses a value received from the remote store. Naive values are
  /// UTC; RFC 2822 is accepted because that is how the server's JSON
  /// encoder renders timestamps.
  pub fn parse_wire(
    raw: &str
  ) -> Result<Self, SyncError> {
    let token = raw.trim();
    if let Ok(dt) =
      DateTime::parse_from_rfc2822(token)
    {
      return Ok(Self::from_utc(
        dt.with_timezone(&Utc)
      ));
    }

    parse_absolute(token, &chrono_tz::UTC)?
      .map(Self::from_utc)
      .ok_or_else(|| {
        SyncError::validation(
          "due date",
          format!(
            "unrecognized wire date \
             '{token}'"
          )
        )
      })
  }
}

impl fmt::Display for DueDate {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(&self.to_wire())
  }
}

impl Serialize for DueDate {
  fn serialize<S>(
    &self,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer
      .serialize_str(&self.to_wire())
  }
}

impl<'de> Deserialize<'de> for DueDate {
  fn deserialize<D>(
    deserializer: D
  ) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    Self::parse_wire(&raw)
      .map_err(serde::de::Error::custom)
  }
}

/// Serde adapter for optional due dates where the server may send
/// `null` or an empty string.
pub mod wire_date_serde {
  pub mod option {
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    use crate::datetime::DueDate;

    pub fn serialize<S>(
      due: &Option<DueDate>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match due {
        | Some(value) => {
          serializer.serialize_str(
            &value.to_wire()
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<
      Option<DueDate>,
      D::Error
    >
    where
      D: Deserializer<'de>
    {
      let opt =
        Option::<String>::deserialize(
          deserializer
        )?;
      match opt {
        | Some(raw)
          if !raw.trim().is_empty() =>
        {
          DueDate::parse_wire(&raw)
            .map(Some)
            .map_err(
              serde::de::Error::custom
            )
        }
        | _ => Ok(None)
      }
    }
  }
}

/// Resolves the `timezone` config key; naive user input is read in
/// this zone.
#[tracing::instrument(skip(cfg))]
pub fn resolve_timezone(
  cfg: &Config
) -> anyhow::Result<Tz> {
  let raw = cfg
    .get("timezone")
    .unwrap_or_else(|| {
      DEFAULT_TIMEZONE.to_string()
    });
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      "timezone setting was empty; \
       using UTC"
    );
    return Ok(chrono_tz::UTC);
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        timezone = %trimmed,
        "configured input timezone"
      );
      Ok(tz)
    }
    | Err(err) => {
      Err(anyhow::anyhow!(
        "invalid timezone setting \
         '{trimmed}': {err}"
      ))
    }
  }
}

/// Parses a `YYYY-MM-DD` day, as used by the due-date filter.
pub fn parse_day(
  raw: &str
) -> Result<NaiveDate, SyncError> {
  NaiveDate::parse_from_str(
    raw.trim(),
    "%Y-%m-%d"
  )
  .map_err(|err| {
    SyncError::validation(
      "due date filter",
      format!(
        "expected YYYY-MM-DD, got \
         '{}': {err}",
        raw.trim()
      )
    )
  })
}

fn parse_absolute(
  token: &str,
  tz: &Tz
) -> Result<Option<DateTime<Utc>>, SyncError>
{
  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(Some(
      dt.with_timezone(&Utc)
    ));
  }

  for format in NAIVE_FORMATS {
    if let Ok(naive) =
      NaiveDateTime::parse_from_str(
        token, format
      )
    {
      return to_utc_from_local(
        naive, tz, token
      )
      .map(Some);
    }
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return start_of_day(date, tz, token)
      .map(Some);
  }

  Ok(None)
}

fn parse_relative(
  token: &str,
  tz: &Tz,
  now: DateTime<Utc>
) -> Result<Option<DateTime<Utc>>, SyncError>
{
  let lower =
    token.to_ascii_lowercase();
  let today = now
    .with_timezone(tz)
    .date_naive();

  let target = match lower.as_str() {
    | "today" => Some(today),
    | "tomorrow" => {
      today.checked_add_signed(
        Duration::days(1)
      )
    }
    | "yesterday" => {
      today.checked_sub_signed(
        Duration::days(1)
      )
    }
    | other => {
      if let Some(weekday) =
        parse_weekday_name(other)
      {
        Some(next_weekday_date(
          today, weekday
        ))
      } else if let Some(days) =
        parse_offset_days(other)
      {
        today.checked_add_signed(
          Duration::days(days)
        )
      } else {
        return Ok(None);
      }
    }
  };

  let Some(date) = target else {
    return Err(SyncError::validation(
      "due date",
      format!(
        "date out of range: {token}"
      )
    ));
  };

  start_of_day(date, tz, token)
    .map(Some)
}

fn parse_offset_days(
  token: &str
) -> Option<i64> {
  let offset_re = Regex::new(
    r"^\+(?P<count>\d{1,4})(?P<unit>[dw])$"
  )
  .ok()?;
  let captures =
    offset_re.captures(token)?;
  let count = captures
    .name("count")?
    .as_str()
    .parse::<i64>()
    .ok()?;
  match captures.name("unit")?.as_str()
  {
    | "d" => Some(count),
    | "w" => Some(count * 7),
    | _ => None
  }
}

fn start_of_day(
  date: NaiveDate,
  tz: &Tz,
  context: &str
) -> Result<DateTime<Utc>, SyncError> {
  let midnight = date
    .and_hms_opt(0, 0, 0)
    .ok_or_else(|| {
      SyncError::validation(
        "due date",
        format!(
          "cannot build midnight for \
           {context}"
        )
      )
    })?;
  to_utc_from_local(midnight, tz, context)
}

fn to_utc_from_local(
  local_naive: NaiveDateTime,
  tz: &Tz,
  context: &str
) -> Result<DateTime<Utc>, SyncError> {
  match tz.from_local_datetime(
    &local_naive
  ) {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Ok(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(SyncError::validation(
        "due date",
        format!(
          "local time does not exist \
           in {tz}: {context}"
        )
      ))
    }
  }
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
  let from_idx = i64::from(
    from
      .weekday()
      .num_days_from_monday()
  );
  let target_idx = i64::from(
    target.num_days_from_monday()
  );
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
