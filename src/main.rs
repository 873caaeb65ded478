use clap::{ArgGroup, Args, Parser, Subcommand};
use colored::Colorize;
use eyre::{Context, Result, eyre};
use std::path::PathBuf;
use std::time::Duration;
use taskdb::{ErrorKind, NewTask, PageRequest, Parameters, SearchRequest, StoreOptions, Task, TaskStore, transfer};
use tracing::warn;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "taskdb")]
#[command(about = "taskdb CLI - manage task definitions for the job queue")]
#[command(version)]
struct Cli {
    /// Path to the SQLite database (default: <data dir>/taskdb/tasks.db)
    #[arg(short, long, env = "TASKDB_DATABASE")]
    database: Option<PathBuf>,

    /// Time budget for each store operation, in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// JSON file of tasks to load before running the command
    #[arg(long, env = "TASKDB_TASK_JSON")]
    seed: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the task table (or recreate it with --reset)
    Init {
        /// Drop existing tasks first
        #[arg(long)]
        reset: bool,
    },

    /// Show whether the table exists and how many tasks it holds
    Status,

    /// Add a task
    Add(TaskArgs),

    /// Replace a task's fields
    Update {
        /// External id of the task
        id: Uuid,
        #[command(flatten)]
        task: TaskArgs,
    },

    /// Show one task
    #[command(group(ArgGroup::new("lookup").required(true).args(["id", "key"])))]
    Get {
        #[arg(long)]
        id: Option<Uuid>,
        #[arg(long)]
        key: Option<String>,
    },

    /// Delete tasks by external id
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// List tasks in insertion order
    List(PageArgs),

    /// Search tasks by id, key, name or description
    Search {
        query: String,
        #[command(flatten)]
        page: PageArgs,
    },

    /// Import tasks from a JSON array file
    Import { file: PathBuf },

    /// Export tasks to a JSON array file (all tasks if no ids are given)
    Export { file: PathBuf, ids: Vec<Uuid> },
}

#[derive(Args)]
struct TaskArgs {
    #[arg(long)]
    key: String,
    #[arg(long, default_value = "")]
    name: String,
    #[arg(long, default_value = "")]
    description: String,
    /// JSON array of positional parameter specs
    #[arg(long, value_parser = parse_parameters, default_value = "[]")]
    input_parameters: Parameters,
    /// JSON array of keyed parameter specs
    #[arg(long, value_parser = parse_parameters, default_value = "[]")]
    input_parameters_keyed: Parameters,
    /// JSON array of output specs
    #[arg(long, value_parser = parse_parameters, default_value = "[]")]
    output_parameters: Parameters,
}

impl From<TaskArgs> for NewTask {
    fn from(args: TaskArgs) -> Self {
        NewTask {
            key: args.key,
            name: args.name,
            description: args.description,
            input_parameters: args.input_parameters,
            input_parameters_keyed: args.input_parameters_keyed,
            output_parameters: args.output_parameters,
        }
    }
}

#[derive(Args)]
struct PageArgs {
    /// sequential_id of the last task of the previous page
    #[arg(long)]
    last_id: Option<String>,
    /// Page size (1-100)
    #[arg(long)]
    limit: Option<String>,
}

impl PageArgs {
    fn page(&self) -> Result<PageRequest> {
        Ok(PageRequest::parse(self.last_id.as_deref(), self.limit.as_deref())?)
    }
}

fn parse_parameters(raw: &str) -> Result<Parameters, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid parameter list: {}", e))
}

fn database_path(cli: &Cli) -> Option<PathBuf> {
    cli.database
        .clone()
        .or_else(|| dirs::data_local_dir().map(|dir| dir.join("taskdb").join("tasks.db")))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_page(tasks: &[Task]) -> Result<()> {
    print_json(&tasks)?;
    if let Some(next) = PageRequest::next_after(tasks) {
        eprintln!("{} next page: --last-id {}", "→".cyan(), next);
    }
    Ok(())
}

/// Print the outcome of a per-task batch; any recorded error fails the command
fn finish_batch(verb: &str, done: usize, errors: &[String]) -> Result<()> {
    if errors.is_empty() {
        println!("{} Successfully {} {} task(s)", "✓".green(), verb, done);
        return Ok(());
    }

    println!("{} {} {} task(s), with errors:", "!".yellow(), verb, done);
    for error in errors {
        println!("  - {}", error);
    }
    Err(eyre!("{} task(s) could not be {}", errors.len(), verb))
}

fn main() -> Result<()> {
    // Logs go to stderr so command output stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let reset = matches!(cli.command, Commands::Init { reset: true });
    let options = StoreOptions::default()
        .with_reset(reset)
        .with_timeout(Duration::from_secs(cli.timeout_secs));
    let store = TaskStore::open(database_path(&cli).as_deref(), options).context("Failed to open task store")?;

    if let Some(seed) = &cli.seed {
        // A bad seed file shouldn't keep the store from being usable
        if let Err(e) = transfer::load_tasks_from_file(&store, seed) {
            warn!(file = ?seed, error = %e, "Failed to load tasks from JSON file");
        }
    }

    match cli.command {
        Commands::Init { reset } => {
            let verb = if reset { "Recreated" } else { "Checked/created" };
            println!("{} {} table task", "✓".green(), verb);
        }
        Commands::Status => {
            let exists = store.schema_exists()?;
            println!("table task: {}", if exists { "present".green() } else { "missing".red() });
            println!("tasks: {}", store.count()?);
        }
        Commands::Add(args) => {
            let task = store.insert(&args.into())?;
            print_json(&task)?;
        }
        Commands::Update { id, task } => match store.update(id, &task.into()) {
            Ok(task) => print_json(&task)?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(eyre!("Task not found")),
            Err(e) => return Err(e.into()),
        },
        Commands::Get { id, key } => {
            let result = match (id, key) {
                (Some(id), _) => store.get_by_external_id(id),
                (None, Some(key)) => store.get_by_key(&key),
                (None, None) => return Err(eyre!("Either --id or --key is required")),
            };
            match result {
                Ok(task) => print_json(&task)?,
                Err(e) if e.is_not_found() => return Err(eyre!("Task not found")),
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Delete { ids } => {
            let mut deleted = 0;
            let mut errors = Vec::new();
            for raw in &ids {
                let id = match Uuid::parse_str(raw) {
                    Ok(id) => id,
                    Err(e) => {
                        errors.push(format!("Invalid id {}: {}", raw, e));
                        continue;
                    }
                };
                match store.delete(id) {
                    Ok(()) => deleted += 1,
                    Err(e) => errors.push(format!("Failed to delete task {}: {}", raw, e)),
                }
            }

            finish_batch("deleted", deleted, &errors)?;
        }
        Commands::List(args) => {
            let page = args.page()?;
            print_page(&store.list_page(page.after, page.limit)?)?;
        }
        Commands::Search { query, page } => {
            let request = SearchRequest::new(query, page.page()?);
            let tasks = match request.query() {
                Some(query) => store.search_page(query, request.page.after, request.page.limit)?,
                None => store.list_page(request.page.after, request.page.limit)?,
            };
            print_page(&tasks)?;
        }
        Commands::Import { file } => {
            let tasks = transfer::read_import(&file)?;
            if tasks.is_empty() {
                return Err(eyre!("No tasks found in JSON file"));
            }

            let report = transfer::import_tasks(&store, tasks);
            finish_batch("imported", report.imported, &report.errors)?;
        }
        Commands::Export { file, ids } => {
            let tasks = if ids.is_empty() {
                transfer::export_all(&store)?
            } else {
                transfer::export_tasks(&store, &ids)?
            };
            if tasks.is_empty() {
                return Err(eyre!("No valid tasks found to export"));
            }

            transfer::write_export(&file, &tasks)?;
            println!("{} Exported {} tasks to {}", "✓".green(), tasks.len(), file.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_batch_clean() {
        assert!(finish_batch("imported", 3, &[]).is_ok());
    }

    #[test]
    fn test_finish_batch_with_errors_fails() {
        let errors = vec!["Skipped task with empty key".to_string()];
        let err = finish_batch("imported", 2, &errors).unwrap_err();
        assert_eq!(err.to_string(), "1 task(s) could not be imported");
    }

    #[test]
    fn test_cli_parses_batch_commands() {
        let cli = Cli::try_parse_from(["taskdb", "delete", "a", "b"]).unwrap();
        assert!(matches!(cli.command, Commands::Delete { ids } if ids.len() == 2));

        assert!(Cli::try_parse_from(["taskdb", "delete"]).is_err());
    }
}
