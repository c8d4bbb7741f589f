use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use cellflow_dataflow::{
    handle_message, DataflowError, ExecutionMode, ExecutionSchedule, FlowDirection, Session,
    Settings, SliceGranularity, SliceSeed,
};
use cellflow_diagnostics::build_diagnostic_message;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

mod notebook;

use notebook::Notebook;

/// Dataflow tracking for notebook cells
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log scheduling details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a notebook file and print the resulting execution schedule
    Run {
        notebook: PathBuf,

        #[command(flatten)]
        settings: SettingsArgs,

        /// Also print the slice needed to reproduce this cell
        #[arg(long)]
        slice: Option<String>,

        /// Slice whole cells instead of single statements
        #[arg(long, requires = "slice")]
        whole_cells: bool,
    },
    /// Answer JSON requests read from stdin, one per line
    Serve {
        #[command(flatten)]
        settings: SettingsArgs,
    },
}

#[derive(clap::Args, Debug)]
struct SettingsArgs {
    /// Settings file with a `[settings]` table
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    schedule: Option<ExecutionSchedule>,

    #[arg(long)]
    flow: Option<FlowDirection>,

    #[arg(long)]
    mode: Option<ExecutionMode>,
}

impl SettingsArgs {
    /// `base`, replaced by the config file if one is given, then patched by
    /// the individual flags
    fn resolve(&self, base: Settings) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::from_path(path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?,
            None => base,
        };
        if let Some(schedule) = self.schedule {
            settings.exec_schedule = schedule;
        }
        if let Some(flow) = self.flow {
            settings.flow_direction = flow;
        }
        if let Some(mode) = self.mode {
            settings.exec_mode = mode;
        }
        Ok(settings)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn execute(session: &mut Session, cell_id: &str, content: &str) -> Result<()> {
    match session.execute_cell(cell_id, content) {
        Ok(precheck) => {
            if precheck.waiter_usage_detected {
                tracing::warn!("cell `{cell_id}` read a stale symbol");
            }
            if let Some(counter) = precheck.out_of_order_usage_counter {
                tracing::warn!("cell `{cell_id}` read a value produced below it by execution {counter}");
            }
            Ok(())
        }
        Err(DataflowError::Syntax { diagnostics, .. }) => {
            for diagnostic in &diagnostics {
                eprintln!("{}", build_diagnostic_message(content, diagnostic, true));
            }
            bail!("cell `{cell_id}` does not parse")
        }
        Err(err) => Err(err).with_context(|| format!("failed to execute cell `{cell_id}`")),
    }
}

fn run(
    path: &Path,
    settings: &SettingsArgs,
    slice: Option<String>,
    whole_cells: bool,
) -> Result<()> {
    let notebook = Notebook::from_path(path)?;
    let settings = settings.resolve(notebook.settings.clone().unwrap_or_default())?;
    let mut session = Session::new(settings);

    let mut last_executed = None;
    for cell in notebook.execution_order()? {
        execute(&mut session, &cell.id, &cell.content)?;
        last_executed = Some(cell.id.as_str());
    }
    let schedule = session.compute_exec_schedule(last_executed, Some(&notebook.metadata()))?;
    println!("{}", serde_json::to_string_pretty(&schedule)?);

    if let Some(cell_id) = slice {
        let granularity = if whole_cells {
            SliceGranularity::Cell
        } else {
            SliceGranularity::Statement
        };
        let entries = session.compute_slice(&[SliceSeed::Cell(cell_id)], granularity)?;
        for entry in entries {
            println!("# [{}] {}", entry.cell_counter, entry.cell_id);
            println!("{}", entry.text);
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ExecuteCell {
    cell_id: String,
    content: String,
}

/// Cell execution is driven by the host itself in a real kernel. The server
/// accepts it as one more request type and runs the cell synthetically.
fn execute_request(session: &mut Session, message: &str) -> Option<String> {
    let value: Value = serde_json::from_str(message).ok()?;
    if value.get("type").and_then(Value::as_str) != Some("execute_cell") {
        return None;
    }
    let response = match serde_json::from_value::<ExecuteCell>(value) {
        Ok(request) => match session.execute_cell(&request.cell_id, &request.content) {
            Ok(precheck) => json!({
                "type": "execute_cell",
                "cell_counter": session.cell_counter(),
                "waiter_usage_detected": precheck.waiter_usage_detected,
                "out_of_order_usage_counter": precheck.out_of_order_usage_counter,
            }),
            Err(err) => json!({"type": "execute_cell", "error": err.to_string()}),
        },
        Err(err) => json!({"type": "execute_cell", "error": err.to_string()}),
    };
    Some(response.to_string())
}

fn serve(settings: &SettingsArgs) -> Result<()> {
    let mut session = Session::new(settings.resolve(Settings::default())?);
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match execute_request(&mut session, &line) {
            Some(response) => response,
            None => match handle_message(&mut session, &line) {
                Ok(response) => response,
                Err(err) => {
                    tracing::error!("{err}");
                    continue;
                }
            },
        };
        writeln!(stdout, "{response}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    match &args.command {
        Command::Run {
            notebook,
            settings,
            slice,
            whole_cells,
        } => run(notebook, settings, slice.clone(), *whole_cells),
        Command::Serve { settings } => serve(settings),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_execute_request() {
        let mut session = Session::new(Settings::default());
        let response = execute_request(
            &mut session,
            r#"{"type": "execute_cell", "cell_id": "a", "content": "x = 1"}"#,
        )
        .unwrap();
        let response: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(response["cell_counter"], 1);
        assert_eq!(response["waiter_usage_detected"], false);

        let response = execute_request(
            &mut session,
            r#"{"type": "execute_cell", "cell_id": "b", "content": "y = = 1"}"#,
        )
        .unwrap();
        assert!(response.contains("does not parse"));
        assert!(execute_request(&mut session, r#"{"type": "reactivity_cleanup"}"#).is_none());
    }

    #[test]
    fn test_settings_flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cellflow.toml");
        std::fs::write(&path, "[settings]\nexec_schedule = \"strict\"\nexec_mode = \"reactive\"\n")
            .unwrap();
        let args = SettingsArgs {
            config: Some(path),
            schedule: Some(ExecutionSchedule::Hybrid),
            flow: None,
            mode: None,
        };
        let settings = args.resolve(Settings::default()).unwrap();
        assert_eq!(settings.exec_schedule, ExecutionSchedule::Hybrid);
        assert_eq!(settings.exec_mode, ExecutionMode::Reactive);
        assert_eq!(settings.flow_direction, FlowDirection::InOrder);
    }

    #[test]
    fn test_cli_parses() {
        let args = Args::try_parse_from([
            "cellflow",
            "run",
            "nb.toml",
            "--schedule",
            "dag_based",
            "--slice",
            "b",
        ])
        .unwrap();
        let Command::Run { settings, slice, .. } = args.command else {
            panic!("expected run");
        };
        assert_eq!(settings.schedule, Some(ExecutionSchedule::DagBased));
        assert_eq!(slice.as_deref(), Some("b"));
    }
}
