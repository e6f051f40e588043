use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Error as SqlError;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// Encodes a `#[serde(rename_all = "snake_case")]` enum to the bare string
/// SQLite stores it as, e.g. `JobStatus::Running` -> `"running"`.
pub fn enum_to_str<T: Serialize>(value: &T) -> rusqlite::Result<String> {
    match serde_json::to_value(value) {
        Ok(Value::String(s)) => Ok(s),
        Ok(other) => Err(SqlError::ToSqlConversionFailure(
            format!("expected string-serializable enum, got {other}").into(),
        )),
        Err(e) => Err(SqlError::ToSqlConversionFailure(Box::new(e))),
    }
}

pub fn str_to_enum<T: DeserializeOwned>(column: usize, s: &str) -> rusqlite::Result<T> {
    serde_json::from_value(Value::String(s.to_string()))
        .map_err(|e| SqlError::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

pub fn ts_to_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub fn str_to_ts(column: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| SqlError::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

pub fn opt_ts_to_str(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(ts_to_str)
}

pub fn opt_str_to_ts(column: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| str_to_ts(column, &s)).transpose()
}

pub fn json_to_str(value: &Value) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| SqlError::ToSqlConversionFailure(Box::new(e)))
}

pub fn str_to_json(column: usize, s: &str) -> rusqlite::Result<Value> {
    serde_json::from_str(s).map_err(|e| SqlError::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

/// UTC midnight of the current day, the cutoff both the token ledger and
/// the job-count stats query use to scope "today".
pub fn today_midnight_utc() -> DateTime<Utc> {
    use chrono::{Datelike, TimeZone};
    let now = Utc::now();
    Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0).single().unwrap_or(now)
}
