// Error types for the task store

use rusqlite::ffi::ErrorCode;
use thiserror::Error;
use uuid::Uuid;

/// Coarse classification of a [`StoreError`], for callers that need to branch
/// on the failure (e.g. map `NotFound` to "task not found").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Conflict,
    NotFound,
    Serialization,
    Timeout,
    Storage,
}

/// Errors returned by [`crate::TaskStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store was constructed without a usable database
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A task with this key already exists
    #[error("task with key '{0}' already exists")]
    Conflict(String),

    /// No task matched the lookup
    #[error("task not found: {0}")]
    NotFound(TaskRef),

    /// A parameter list could not be encoded or decoded
    #[error("failed to {action} {field}")]
    Serialization {
        action: &'static str,
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The operation ran past its time budget
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    /// Any other database failure
    #[error("{operation} failed")]
    Storage {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}

/// How a missing task was addressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRef {
    ExternalId(Uuid),
    Key(String),
}

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskRef::ExternalId(id) => write!(f, "no task with id {}", id),
            TaskRef::Key(key) => write!(f, "no task with key {}", key),
        }
    }
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Configuration(_) => ErrorKind::Configuration,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Serialization { .. } => ErrorKind::Serialization,
            StoreError::Timeout { .. } => ErrorKind::Timeout,
            StoreError::Storage { .. } => ErrorKind::Storage,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Classify a rusqlite error raised while running `operation`.
    ///
    /// Interrupts (from the deadline progress handler) and busy/locked
    /// results (the busy timeout expired) both become `Timeout`.
    pub(crate) fn from_sqlite(operation: &'static str, err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::OperationInterrupted | ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                StoreError::Timeout { operation }
            }
            _ => StoreError::Storage { operation, source: err },
        }
    }
}

/// True if the error is a UNIQUE constraint violation
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(StoreError::Configuration("x".into()).kind(), ErrorKind::Configuration);
        assert_eq!(StoreError::Conflict("k".into()).kind(), ErrorKind::Conflict);
        assert_eq!(
            StoreError::Timeout { operation: "insert task" }.kind(),
            ErrorKind::Timeout
        );
        assert!(StoreError::NotFound(TaskRef::Key("k".into())).is_not_found());
    }

    #[test]
    fn test_not_found_message() {
        let id = Uuid::new_v4();
        let err = StoreError::NotFound(TaskRef::ExternalId(id));
        assert_eq!(err.to_string(), format!("task not found: no task with id {}", id));

        let err = StoreError::NotFound(TaskRef::Key("t1".into()));
        assert_eq!(err.to_string(), "task not found: no task with key t1");
    }

    #[test]
    fn test_from_sqlite_interrupt_is_timeout() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
            None,
        );
        assert_eq!(StoreError::from_sqlite("list tasks", err).kind(), ErrorKind::Timeout);

        let err = rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY), None);
        assert_eq!(StoreError::from_sqlite("insert task", err).kind(), ErrorKind::Timeout);

        let err = StoreError::from_sqlite("select task", rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(err.to_string(), "select task failed");
    }

    #[test]
    fn test_unique_violation_detection() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            None,
        );
        assert!(is_unique_violation(&err));

        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_CHECK),
            None,
        );
        assert!(!is_unique_violation(&err));
    }
}
