//! Payload value conversion keyed by target column type.
//!
//! The capture layer encodes `datetime`/`timestamp` columns as epoch
//! milliseconds, but the source stores a zone-less wall clock that was
//! read as UTC when the epoch was produced. Conversion therefore:
//!
//! 1. reads the epoch as UTC to recover the original wall-clock fields,
//! 2. attaches the configured source timezone to get the true instant,
//! 3. renders that instant in the configured target timezone.
//!
//! Dates go through the same steps at day granularity. Times of day are
//! rendered as `HH:MM:SS` with no zone handling.

use crate::sql::Dialect;
use crate::value::SqlValue;
use crate::schema::ColumnInfo;
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde_json::Value;

const TEXT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TEXT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Formats without an offset; values in these are wall clocks in the source zone.
const ZONELESS_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Broad type families that decide how a payload value is converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFamily {
    DateTime,
    Date,
    Time,
    Numeric,
    String,
    Binary,
    Boolean,
    Json,
    Unknown,
}

impl DataFamily {
    /// Classifies a catalog type name from either dialect.
    pub fn from_type_name(data_type: &str) -> Self {
        match data_type.to_ascii_lowercase().as_str() {
            "datetime"
            | "timestamp"
            | "timestamp with time zone"
            | "timestamp without time zone"
            | "timestamptz" => DataFamily::DateTime,
            "date" => DataFamily::Date,
            "time" | "time with time zone" | "time without time zone" | "timetz" => {
                DataFamily::Time
            }
            "int" | "integer" | "bigint" | "smallint" | "tinyint" | "mediumint" | "decimal"
            | "numeric" | "float" | "double" | "double precision" | "real" => DataFamily::Numeric,
            "varchar" | "char" | "text" | "longtext" | "mediumtext" | "tinytext"
            | "character varying" | "character" => DataFamily::String,
            "blob" | "longblob" | "mediumblob" | "tinyblob" | "binary" | "varbinary" | "bytea" => {
                DataFamily::Binary
            }
            "bit" | "bool" | "boolean" => DataFamily::Boolean,
            "json" | "jsonb" => DataFamily::Json,
            _ => DataFamily::Unknown,
        }
    }
}

/// How converted temporal values are handed to the target driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalOutput {
    /// `YYYY-MM-DD HH:MM:SS` text in the target timezone.
    Text,
    /// Native values carrying an explicit offset.
    Native,
}

impl TemporalOutput {
    pub fn for_dialect(dialect: Dialect) -> Self {
        match dialect {
            Dialect::MySql => TemporalOutput::Text,
            Dialect::Postgres => TemporalOutput::Native,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValueConverter {
    source_tz: Tz,
    target_tz: Tz,
    output: TemporalOutput,
}

impl ValueConverter {
    pub fn new(source_tz: Tz, target_tz: Tz, output: TemporalOutput) -> Self {
        Self {
            source_tz,
            target_tz,
            output,
        }
    }

    pub fn convert(&self, column: &ColumnInfo, raw: &Value) -> SqlValue {
        if raw.is_null() {
            return SqlValue::Null;
        }

        match column.family() {
            DataFamily::DateTime => self.convert_datetime(raw),
            DataFamily::Date => self.convert_date(raw),
            DataFamily::Time => convert_time(raw),
            DataFamily::Boolean => convert_bool(raw),
            DataFamily::Numeric
            | DataFamily::String
            | DataFamily::Binary
            | DataFamily::Json
            | DataFamily::Unknown => SqlValue::from_json(raw),
        }
    }

    fn convert_datetime(&self, raw: &Value) -> SqlValue {
        match raw {
            Value::Number(_) => match as_whole_number(raw)
                .and_then(DateTime::from_timestamp_millis)
                .and_then(|utc| self.in_source_zone(utc.naive_utc()))
            {
                Some(instant) => self.render_instant(instant),
                None => SqlValue::from_json(raw),
            },
            Value::String(s) => match self.parse_datetime(s) {
                Some(instant) => self.render_instant(instant),
                None => SqlValue::Text(s.clone()),
            },
            _ => SqlValue::from_json(raw),
        }
    }

    fn parse_datetime(&self, s: &str) -> Option<DateTime<Tz>> {
        // RFC 3339 also covers the `Z`-suffixed UTC form.
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&self.source_tz));
        }
        ZONELESS_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            .and_then(|naive| self.in_source_zone(naive))
    }

    fn render_instant(&self, instant: DateTime<Tz>) -> SqlValue {
        let target = instant.with_timezone(&self.target_tz);
        match self.output {
            TemporalOutput::Text => SqlValue::Text(target.format(TEXT_DATETIME_FORMAT).to_string()),
            TemporalOutput::Native => SqlValue::Timestamp(target.fixed_offset()),
        }
    }

    fn convert_date(&self, raw: &Value) -> SqlValue {
        let date = match raw {
            Value::Number(_) => as_whole_number(raw).and_then(days_to_date),
            Value::String(s) => return SqlValue::Text(s.clone()),
            _ => None,
        };
        let Some(date) = date else {
            return SqlValue::from_json(raw);
        };

        match self.output {
            TemporalOutput::Native => SqlValue::Date(date),
            TemporalOutput::Text => match date
                .and_hms_opt(0, 0, 0)
                .and_then(|midnight| self.in_source_zone(midnight))
            {
                Some(instant) => SqlValue::Text(
                    instant
                        .with_timezone(&self.target_tz)
                        .format(TEXT_DATE_FORMAT)
                        .to_string(),
                ),
                None => SqlValue::Text(date.format(TEXT_DATE_FORMAT).to_string()),
            },
        }
    }

    /// Attaches the source timezone to a wall clock.
    ///
    /// Ambiguous wall clocks (DST fall-back) resolve to the earlier instant.
    /// Wall clocks inside a spring-forward gap move forward by one hour.
    fn in_source_zone(&self, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
        match self.source_tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Some(dt),
            LocalResult::Ambiguous(earliest, _) => Some(earliest),
            LocalResult::None => self
                .source_tz
                .from_local_datetime(&(naive + Duration::hours(1)))
                .earliest(),
        }
    }
}

fn days_to_date(days: i64) -> Option<NaiveDate> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    epoch.checked_add_signed(Duration::try_days(days)?)
}

fn convert_time(raw: &Value) -> SqlValue {
    match as_whole_number(raw) {
        Some(ms) => SqlValue::Text(millis_to_time(ms)),
        None => SqlValue::from_json(raw),
    }
}

/// Renders milliseconds within a day as `HH:MM:SS`; negative input clamps to midnight.
fn millis_to_time(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn convert_bool(raw: &Value) -> SqlValue {
    match raw {
        Value::Bool(b) => SqlValue::Bool(*b),
        Value::Number(n) => SqlValue::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        Value::String(s) => SqlValue::Bool(matches!(s.as_str(), "1" | "true" | "TRUE")),
        _ => SqlValue::from_json(raw),
    }
}

/// Integer view of a JSON number; fractional values truncate toward zero.
fn as_whole_number(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}
