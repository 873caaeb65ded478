// taskdb - Persistent store for job-queue task definitions

pub mod error;
pub mod models;
pub mod page;
pub mod store;
pub mod transfer;

// Re-export main types for convenience
pub use error::{ErrorKind, StoreError, TaskRef};
pub use models::{NewTask, Parameters, Task, now_micros};
pub use page::{PageError, PageRequest, SearchRequest};
pub use store::{DEFAULT_TIMEOUT, StoreOptions, TaskStore};
pub use transfer::ImportReport;

// Re-export rusqlite for callers that supply their own connection
pub use rusqlite;
