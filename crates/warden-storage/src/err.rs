use rusqlite::ErrorCode;
use warden_types::PersistError;

/// Maps a raw `rusqlite::Error` onto the closed persistence-error taxonomy
/// the rest of the runtime reasons about, instead of leaking SQLite detail.
pub fn map_sql(err: rusqlite::Error) -> PersistError {
    match &err {
        rusqlite::Error::QueryReturnedNoRows => PersistError::NotFound,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            PersistError::Conflict(err.to_string())
        }
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            PersistError::Transient(err.to_string())
        }
        _ => PersistError::Fatal(err.to_string()),
    }
}
