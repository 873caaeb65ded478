// JSON import/export of task definitions

use crate::models::NewTask;
use crate::store::TaskStore;
use eyre::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of an import: how many tasks went in and why the rest didn't
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub errors: Vec<String>,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn total(&self) -> usize {
        self.imported + self.errors.len()
    }
}

/// Collect the exportable fields of the given tasks.
///
/// Ids that don't resolve to a task are skipped with a warning; any other
/// store error aborts the export.
pub fn export_tasks(store: &TaskStore, ids: &[Uuid]) -> Result<Vec<NewTask>> {
    let mut exported = Vec::with_capacity(ids.len());

    for id in ids {
        match store.get_by_external_id(*id) {
            Ok(task) => exported.push(task.to_new_task()),
            Err(e) if e.is_not_found() => {
                warn!(task = %id, "Skipping unknown task in export");
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read task {} for export", id)),
        }
    }

    Ok(exported)
}

/// Every task in the store, in insertion order
pub fn export_all(store: &TaskStore) -> Result<Vec<NewTask>> {
    const BATCH: u32 = 100;

    let mut exported = Vec::new();
    let mut after = 0;
    loop {
        let page = store.list_page(after, BATCH).context("Failed to list tasks for export")?;
        let Some(last) = page.last() else {
            break;
        };
        after = last.sequential_id;
        exported.extend(page.iter().map(|task| task.to_new_task()));
    }

    Ok(exported)
}

/// Write tasks as a pretty-printed JSON array
pub fn write_export(path: &Path, tasks: &[NewTask]) -> Result<()> {
    let json = serde_json::to_string_pretty(tasks).context("Failed to serialize tasks")?;

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .context("Failed to open export file")?;

    // Acquire exclusive lock before truncating
    file.lock_exclusive().context("Failed to acquire file lock")?;
    file.set_len(0).context("Failed to truncate export file")?;

    writeln!(file, "{}", json).context("Failed to write export file")?;
    file.sync_all().context("Failed to sync export file")?;

    info!(file = ?path, count = tasks.len(), "Exported tasks");
    Ok(())
}

/// Read a JSON array of task definitions
pub fn read_import(path: &Path) -> Result<Vec<NewTask>> {
    let file = File::open(path).context("Failed to open import file")?;
    let reader = BufReader::new(file);

    let tasks: Vec<NewTask> =
        serde_json::from_reader(reader).with_context(|| format!("Invalid JSON format in {}", path.display()))?;

    Ok(tasks)
}

/// Insert each task; failures are recorded in the report and don't stop the batch
pub fn import_tasks(store: &TaskStore, tasks: Vec<NewTask>) -> ImportReport {
    let mut report = ImportReport::default();

    for task in tasks {
        if task.key.is_empty() {
            report.errors.push("Skipped task with empty key".to_string());
            continue;
        }

        match store.insert(&task) {
            Ok(inserted) => {
                info!(key = %inserted.key, name = %inserted.name, "Task imported");
                report.imported += 1;
            }
            Err(e) => {
                warn!(key = %task.key, error = %e, "Failed to insert task");
                report.errors.push(format!("Failed to import task '{}': {}", task.key, e));
            }
        }
    }

    report
}

/// Seed the store from a JSON file at startup
pub fn load_tasks_from_file(store: &TaskStore, path: &Path) -> Result<ImportReport> {
    let tasks = read_import(path)?;
    let report = import_tasks(store, tasks);

    info!(
        file = ?path,
        total = report.total(),
        imported = report.imported,
        "Finished loading tasks from JSON"
    );

    Ok(report)
}
