// Task store backed by SQLite

use crate::error::{StoreError, TaskRef, is_unique_violation};
use crate::models::{NewTask, Parameters, Task, now_micros};
use chrono::{DateTime, Utc};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{FromSqlError, Type};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default per-call time budget
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of SQLite VM instructions between deadline checks
const PROGRESS_OPS: i32 = 1000;

const TASK_COLUMNS: &str = r#"sequential_id, external_id, "key", name, description,
    input_parameters, input_parameters_keyed, output_parameters, created_at, updated_at"#;

/// Options applied when a store is constructed
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Drop the task table before (re)creating it
    pub reset: bool,
    /// Time budget for every store operation
    pub timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            reset: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl StoreOptions {
    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// How parameter lists that fail to decode are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decode {
    /// Fail the operation (single-row reads)
    Strict,
    /// Substitute an empty list and log (page reads)
    Lenient,
}

/// A task row as it comes out of SQLite, before the parameter lists are decoded
struct TaskRow {
    sequential_id: i64,
    external_id: Uuid,
    key: String,
    name: String,
    description: String,
    input_parameters: Option<String>,
    input_parameters_keyed: Option<String>,
    output_parameters: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let external_id: String = row.get(1)?;
        let external_id = Uuid::parse_str(&external_id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

        Ok(Self {
            sequential_id: row.get(0)?,
            external_id,
            key: row.get(2)?,
            name: row.get(3)?,
            description: row.get(4)?,
            input_parameters: row.get(5)?,
            input_parameters_keyed: row.get(6)?,
            output_parameters: row.get(7)?,
            created_at: timestamp(row, 8)?,
            updated_at: timestamp(row, 9)?,
        })
    }

    fn into_task(self, mode: Decode) -> Result<Task, StoreError> {
        let external_id = self.external_id;
        let decode = |field: &'static str, json: Option<String>| -> Result<Parameters, StoreError> {
            let Some(json) = json else {
                return Ok(Parameters::default());
            };
            match Parameters::decode(&json) {
                Ok(params) => Ok(params),
                Err(e) if mode == Decode::Lenient => {
                    warn!(task = %external_id, field, error = %e, "Failed to decode parameters, using empty list");
                    Ok(Parameters::default())
                }
                Err(source) => Err(StoreError::Serialization {
                    action: "decode",
                    field,
                    source,
                }),
            }
        };

        Ok(Task {
            input_parameters: decode("input_parameters", self.input_parameters)?,
            input_parameters_keyed: decode("input_parameters_keyed", self.input_parameters_keyed)?,
            output_parameters: decode("output_parameters", self.output_parameters)?,
            sequential_id: self.sequential_id,
            external_id,
            key: self.key,
            name: self.name,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// `icontains(haystack, needle)`: true when `needle` is a substring of
/// `haystack` ignoring case, using Unicode lowercasing
fn icontains(ctx: &Context<'_>) -> rusqlite::Result<bool> {
    let haystack: Option<String> = ctx.get(0)?;
    let needle: Option<String> = ctx.get(1)?;

    Ok(match (haystack, needle) {
        (Some(haystack), Some(needle)) => haystack.to_lowercase().contains(&needle.to_lowercase()),
        _ => false,
    })
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(FromSqlError::OutOfRange(micros)))
    })
}

/// Parameter lists encoded for storage
struct EncodedParameters {
    input: String,
    input_keyed: String,
    output: String,
}

impl EncodedParameters {
    fn encode(task: &NewTask) -> Result<Self, StoreError> {
        let encode = |field: &'static str, params: &Parameters| {
            params.encode().map_err(|source| StoreError::Serialization {
                action: "encode",
                field,
                source,
            })
        };

        Ok(Self {
            input: encode("input_parameters", &task.input_parameters)?,
            input_keyed: encode("input_parameters_keyed", &task.input_parameters_keyed)?,
            output: encode("output_parameters", &task.output_parameters)?,
        })
    }
}

/// Durable store of task definitions
pub struct TaskStore {
    db: Connection,
    timeout: Duration,
}

impl TaskStore {
    /// Create a store over an existing connection
    ///
    /// Fails with a configuration error if `db` is `None`. With
    /// `options.reset` the task table is dropped first; either way it is
    /// created if missing.
    pub fn new(db: Option<Connection>, options: StoreOptions) -> Result<Self, StoreError> {
        let db = db.ok_or_else(|| StoreError::Configuration("database connection is missing".to_string()))?;

        db.busy_timeout(options.timeout)
            .map_err(|e| StoreError::from_sqlite("configure connection", e))?;
        db.create_scalar_function(
            "icontains",
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            icontains,
        )
        .map_err(|e| StoreError::from_sqlite("register search function", e))?;

        let store = Self {
            db,
            timeout: options.timeout,
        };

        if options.reset {
            store.drop_schema()?;
        }
        store.ensure_schema()?;

        Ok(store)
    }

    /// Open (or create) a SQLite database file and build a store on it
    pub fn open(path: Option<&Path>, options: StoreOptions) -> Result<Self, StoreError> {
        let path = path.ok_or_else(|| StoreError::Configuration("database path is not set".to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                StoreError::Configuration(format!("failed to create directory {}: {}", parent.display(), e))
            })?;
        }

        debug!(path = %path.display(), "Opening task database");
        let db = Connection::open(path).map_err(|e| StoreError::from_sqlite("open database", e))?;
        Self::new(Some(db), options)
    }

    /// Store over a private in-memory database
    pub fn open_in_memory(options: StoreOptions) -> Result<Self, StoreError> {
        let db = Connection::open_in_memory().map_err(|e| StoreError::from_sqlite("open database", e))?;
        Self::new(Some(db), options)
    }

    /// Get a reference to the SQLite database connection
    pub fn db(&self) -> &Connection {
        &self.db
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Change the time budget for subsequent operations
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
        self.db
            .busy_timeout(timeout)
            .map_err(|e| StoreError::from_sqlite("configure connection", e))?;
        self.timeout = timeout;
        Ok(())
    }

    /// Run `f` with the per-call deadline armed.
    ///
    /// Lock waits are bounded by the busy timeout; running statements are
    /// interrupted by the progress handler once the deadline passes.
    fn run<T, F>(&self, f: F) -> rusqlite::Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let deadline = Instant::now() + self.timeout;
        self.db
            .progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));
        let result = f(&self.db);
        self.db.progress_handler(PROGRESS_OPS, None::<fn() -> bool>);
        result
    }

    // ========================================================================
    // Schema lifecycle
    // ========================================================================

    /// Create the task table and its indexes if they don't exist
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        self.run(|db| {
            db.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS task (
                    sequential_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    external_id TEXT UNIQUE NOT NULL,
                    "key" TEXT UNIQUE NOT NULL CHECK (length("key") <= 100),
                    name TEXT NOT NULL DEFAULT '' CHECK (length(name) <= 120),
                    description TEXT NOT NULL DEFAULT '',
                    input_parameters TEXT NOT NULL DEFAULT '[]',
                    input_parameters_keyed TEXT NOT NULL DEFAULT '[]',
                    output_parameters TEXT NOT NULL DEFAULT '[]',
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_task_external_id ON task(external_id);
                CREATE INDEX IF NOT EXISTS idx_task_name ON task(name);
                "#,
            )
        })
        .map_err(|e| StoreError::from_sqlite("create task table", e))?;

        info!("Checked/created table task");
        Ok(())
    }

    /// Drop the task table (and its indexes)
    pub fn drop_schema(&self) -> Result<(), StoreError> {
        self.run(|db| db.execute_batch("DROP TABLE IF EXISTS task"))
            .map_err(|e| StoreError::from_sqlite("drop task table", e))?;

        info!("Dropped table task");
        Ok(())
    }

    pub fn schema_exists(&self) -> Result<bool, StoreError> {
        let count: i64 = self
            .run(|db| {
                db.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'task'",
                    [],
                    |row| row.get(0),
                )
            })
            .map_err(|e| StoreError::from_sqlite("check task table", e))?;

        Ok(count > 0)
    }

    // ========================================================================
    // Single-task operations
    // ========================================================================

    /// Insert a new task; ids and timestamps are assigned here
    ///
    /// `created_at` is kept strictly increasing so the search cursor never
    /// sees two rows with the same timestamp.
    pub fn insert(&self, task: &NewTask) -> Result<Task, StoreError> {
        let encoded = EncodedParameters::encode(task)?;
        let external_id = Uuid::new_v4();
        let now = now_micros();

        let sql = format!(
            r#"INSERT INTO task (
                external_id, "key", name, description,
                input_parameters, input_parameters_keyed, output_parameters,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                MAX(?8, COALESCE((SELECT MAX(created_at) + 1 FROM task), ?8)),
                MAX(?8, COALESCE((SELECT MAX(created_at) + 1 FROM task), ?8))
            )
            RETURNING {TASK_COLUMNS}"#
        );

        let row = self
            .run(|db| {
                db.query_row(
                    &sql,
                    params![
                        external_id.to_string(),
                        task.key,
                        task.name,
                        task.description,
                        encoded.input,
                        encoded.input_keyed,
                        encoded.output,
                        now,
                    ],
                    TaskRow::from_row,
                )
            })
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(task.key.clone())
                } else {
                    StoreError::from_sqlite("insert task", e)
                }
            })?;

        debug!(task = %external_id, key = %task.key, "Inserted task");
        row.into_task(Decode::Strict)
    }

    /// Replace every caller-editable field of the task with `external_id`
    ///
    /// `updated_at` moves to now, or one microsecond past its old value if
    /// the clock hasn't advanced.
    pub fn update(&self, external_id: Uuid, task: &NewTask) -> Result<Task, StoreError> {
        let encoded = EncodedParameters::encode(task)?;
        let now = now_micros();

        let sql = format!(
            r#"UPDATE task
            SET
                "key" = ?1,
                name = ?2,
                description = ?3,
                input_parameters = ?4,
                input_parameters_keyed = ?5,
                output_parameters = ?6,
                updated_at = MAX(?7, updated_at + 1)
            WHERE external_id = ?8
            RETURNING {TASK_COLUMNS}"#
        );

        let row = self
            .run(|db| {
                db.query_row(
                    &sql,
                    params![
                        task.key,
                        task.name,
                        task.description,
                        encoded.input,
                        encoded.input_keyed,
                        encoded.output,
                        now,
                        external_id.to_string(),
                    ],
                    TaskRow::from_row,
                )
                .optional()
            })
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(task.key.clone())
                } else {
                    StoreError::from_sqlite("update task", e)
                }
            })?
            .ok_or(StoreError::NotFound(TaskRef::ExternalId(external_id)))?;

        debug!(task = %external_id, key = %task.key, "Updated task");
        row.into_task(Decode::Strict)
    }

    pub fn delete(&self, external_id: Uuid) -> Result<(), StoreError> {
        let affected = self
            .run(|db| db.execute("DELETE FROM task WHERE external_id = ?1", [external_id.to_string()]))
            .map_err(|e| StoreError::from_sqlite("delete task", e))?;

        if affected == 0 {
            return Err(StoreError::NotFound(TaskRef::ExternalId(external_id)));
        }

        debug!(task = %external_id, "Deleted task");
        Ok(())
    }

    pub fn get_by_external_id(&self, external_id: Uuid) -> Result<Task, StoreError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM task WHERE external_id = ?1");

        self.run(|db| {
            db.query_row(&sql, [external_id.to_string()], TaskRow::from_row)
                .optional()
        })
        .map_err(|e| StoreError::from_sqlite("select task", e))?
        .ok_or(StoreError::NotFound(TaskRef::ExternalId(external_id)))?
        .into_task(Decode::Strict)
    }

    pub fn get_by_key(&self, key: &str) -> Result<Task, StoreError> {
        let sql = format!(r#"SELECT {TASK_COLUMNS} FROM task WHERE "key" = ?1"#);

        self.run(|db| db.query_row(&sql, [key], TaskRow::from_row).optional())
            .map_err(|e| StoreError::from_sqlite("select task by key", e))?
            .ok_or_else(|| StoreError::NotFound(TaskRef::Key(key.to_string())))?
            .into_task(Decode::Strict)
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.run(|db| db.query_row("SELECT COUNT(*) FROM task", [], |row| row.get(0)))
            .map_err(|e| StoreError::from_sqlite("count tasks", e))
    }

    // ========================================================================
    // Pages
    // ========================================================================

    /// Tasks with `sequential_id > after`, oldest first, at most `page_size`
    ///
    /// Pass `0` for the first page and the last row's `sequential_id` for
    /// each following page.
    pub fn list_page(&self, after: i64, page_size: u32) -> Result<Vec<Task>, StoreError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM task
            WHERE sequential_id > ?1
            ORDER BY sequential_id ASC
            LIMIT ?2"
        );

        let rows = self
            .run(|db| {
                let mut stmt = db.prepare(&sql)?;
                let rows = stmt.query_map(params![after.max(0), page_size], TaskRow::from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .map_err(|e| StoreError::from_sqlite("select all tasks", e))?;

        Self::decode_page(rows)
    }

    /// Tasks whose id, key, name or description contains `query`
    /// (case-insensitive), newest first, at most `page_size`
    ///
    /// With a non-zero `after`, only tasks created strictly before the task
    /// whose `sequential_id` is `after` are returned.
    pub fn search_page(&self, query: &str, after: i64, page_size: u32) -> Result<Vec<Task>, StoreError> {
        let sql = format!(
            r#"SELECT {TASK_COLUMNS} FROM task
            WHERE (icontains(external_id, ?1)
                    OR icontains("key", ?1)
                    OR icontains(name, ?1)
                    OR icontains(description, ?1))
                AND (?2 = 0
                    OR created_at < (
                        SELECT t.created_at
                        FROM task AS t
                        WHERE t.sequential_id = ?2))
            ORDER BY created_at DESC
            LIMIT ?3"#
        );
        let rows = self
            .run(|db| {
                let mut stmt = db.prepare(&sql)?;
                let rows = stmt.query_map(params![query, after, page_size], TaskRow::from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .map_err(|e| StoreError::from_sqlite("select tasks by search", e))?;

        Self::decode_page(rows)
    }

    fn decode_page(rows: Vec<TaskRow>) -> Result<Vec<Task>, StoreError> {
        rows.into_iter().map(|row| row.into_task(Decode::Lenient)).collect()
    }
}
