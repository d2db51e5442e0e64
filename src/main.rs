use clap::{Parser, Subcommand};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod controller;
mod domain;
mod inputter;
mod model;
mod sheet;
mod source;
mod ui;
mod viewer;

use controller::Controller;
use domain::{SheetConfig, SheetError};
use model::{Model, Status};
use sheet::ExportFormat;
use source::{DataSource, DirectorySource};
use ui::TableUI;
use viewer::ViewerController;

#[derive(Parser, Debug)]
#[command(version, about = "Browse hostel occupancy sheets in the terminal")]
struct Cli {
    /// Directory with partitions.json, one folder per hostel and summary/
    data_dir: String,

    /// Hostel to open instead of the summary
    #[arg(short, long)]
    partition: Option<String>,

    /// Where exported files are written
    #[arg(long, default_value = ".")]
    export_dir: String,

    #[arg(long, default_value = "hostel-sheet.log")]
    log_file: String,

    /// Event poll interval in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,

    /// Rows rendered beyond the viewport
    #[arg(long, default_value_t = 20)]
    overscan: usize,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the filtered rows of one hostel to a file and exit
    Export {
        #[arg(short, long)]
        partition: String,

        /// csv, tsv, json or xml
        #[arg(short, long, default_value = "csv")]
        format: ExportFormat,

        /// Keep rows where any cell contains this text
        #[arg(short, long)]
        search: Option<String>,

        /// Keep rows whose column has this value, e.g. status=Active. Repeatable.
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,

        /// Defaults to --export-dir
        #[arg(long)]
        out_dir: Option<String>,
    },
}

fn parse_filter(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected COLUMN=VALUE, got '{s}'")),
    }
}

fn expand_path(path: &str) -> Result<PathBuf, SheetError> {
    let expanded = shellexpand::full(path)
        .map_err(|e| SheetError::InvalidArgument(format!("{path}: {e}")))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

fn init_logging(path: &Path) -> Result<(), SheetError> {
    let file = File::create(path)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .with(ErrorLayer::default())
        .init();
    Ok(())
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Err(e) => {
            error!("Exiting with error: {e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

fn run(cli: Cli) -> Result<(), SheetError> {
    init_logging(&expand_path(&cli.log_file)?)?;
    let config = SheetConfig::default()
        .event_poll_time(cli.poll_ms)
        .overscan(cli.overscan)
        .data_dir(expand_path(&cli.data_dir)?)
        .export_dir(expand_path(&cli.export_dir)?);
    info!("Starting hostel-sheet with {:?}", config);

    let source = DirectorySource::open(config.data_dir.clone())?;
    match cli.command {
        Some(Command::Export {
            partition,
            format,
            search,
            filters,
            out_dir,
        }) => {
            let out_dir = match out_dir {
                Some(dir) => expand_path(&dir)?,
                None => config.export_dir.clone(),
            };
            let exported = export(
                &config,
                &source,
                &partition,
                format,
                search,
                filters,
                &out_dir,
            )?;
            match exported {
                Some(path) => println!("{}", path.display()),
                None => eprintln!("Nothing to export"),
            }
            Ok(())
        }
        None => {
            let mut terminal = ratatui::init();
            let result = run_tui(&config, Arc::new(source), cli.partition, &mut terminal);
            ratatui::restore();
            result
        }
    }
}

fn run_tui(
    config: &SheetConfig,
    source: Arc<dyn DataSource>,
    partition: Option<String>,
    terminal: &mut ratatui::DefaultTerminal,
) -> Result<(), SheetError> {
    let size = terminal.size()?;
    let mut model = Model::init(config, source, size.width as usize, size.height as usize)?;
    if let Some(id) = partition {
        model.open_partition(&id)?;
    }
    let mut ui = TableUI::new();
    let controller = Controller::new(config);

    while model.status != Status::QUITTING {
        model.poll_fetches();

        // Render the current view
        terminal.draw(|f| ui.draw(&model, f))?;

        // Handle events and map to a Message
        if let Some(message) = controller.handle_event(&model)? {
            model.update(message)?;
        };
    }
    info!("Bye");
    Ok(())
}

/// Headless export of one hostel with the same filter semantics as the grid.
/// Writes nothing and returns `None` when no row or column is left.
fn export(
    config: &SheetConfig,
    source: &dyn DataSource,
    partition: &str,
    format: ExportFormat,
    search: Option<String>,
    filters: Vec<(String, String)>,
    out_dir: &Path,
) -> Result<Option<PathBuf>, SheetError> {
    let mut viewer = ViewerController::new(config.width_sample_size);
    viewer.set_partitions(source.list_partitions()?);
    let ticket = viewer.select_partition(partition);
    let dataset = source.fetch_partition(partition)?;
    viewer.complete_partition(&ticket, Ok(dataset));

    if let Some(text) = search {
        viewer.set_global_text(&text);
    }
    let mut selections: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (key, value) in filters {
        if viewer.dataset().and_then(|d| d.column(&key)).is_none() {
            return Err(SheetError::InvalidArgument(format!("unknown column '{key}'")));
        }
        selections.entry(key).or_default().insert(value);
    }
    for (key, values) in selections {
        viewer.set_column_filter(&key, Some(values));
    }

    let date = chrono::Local::now().date_naive();
    let Some(file) = viewer.export(format, date)? else {
        warn!("Nothing to export from {partition}: no rows or columns left");
        return Ok(None);
    };
    fs::create_dir_all(out_dir)?;
    let path = out_dir.join(&file.suggested_filename);
    fs::write(&path, &file.content)?;
    info!(
        "Exported {} of {} rows from {partition} to {}",
        viewer.filtered_count(),
        viewer.total_rows(),
        path.display()
    );
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> DirectorySource {
        let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/hostels");
        DirectorySource::open(root).unwrap()
    }

    #[test]
    fn cli_parses_export_command() {
        let cli = Cli::parse_from([
            "hostel-sheet",
            "data",
            "export",
            "--partition",
            "aravali",
            "--format",
            "json",
            "--filter",
            "status=Active",
            "--filter",
            "floor=2",
        ]);
        match cli.command {
            Some(Command::Export {
                partition,
                format,
                filters,
                ..
            }) => {
                assert_eq!(partition, "aravali");
                assert_eq!(format, ExportFormat::Json);
                assert_eq!(filters.len(), 2);
                assert_eq!(filters[0], ("status".to_string(), "Active".to_string()));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn filter_argument_needs_a_column() {
        assert!(parse_filter("=x").is_err());
        assert!(parse_filter("status").is_err());
        let (key, value) = parse_filter("room=A=1").unwrap();
        assert_eq!((key.as_str(), value.as_str()), ("room", "A=1"));
    }

    #[test]
    fn headless_export_writes_filtered_rows() {
        let out_dir = std::env::temp_dir().join("hostel-sheet-export-test");
        let path = export(
            &SheetConfig::default(),
            &fixtures(),
            "narmada",
            ExportFormat::Tsv,
            None,
            Vec::new(),
            &out_dir,
        )
        .unwrap()
        .unwrap();
        let content = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(content.lines().count(), 4);
        assert!(content.starts_with("Name\tRoll no\tStatus\tRoom\n"));
    }

    #[test]
    fn empty_headless_export_writes_nothing() {
        let out_dir = std::env::temp_dir().join("hostel-sheet-empty-export-test");
        let _ = fs::remove_dir_all(&out_dir);
        // No narmada occupant is missing a name.
        let exported = export(
            &SheetConfig::default(),
            &fixtures(),
            "narmada",
            ExportFormat::Tsv,
            None,
            vec![("name".to_string(), "(Blank)".to_string())],
            &out_dir,
        );
        assert!(matches!(exported, Ok(None)));
        assert!(!out_dir.exists());
    }

    #[test]
    fn unknown_filter_column_is_rejected() {
        let result = export(
            &SheetConfig::default(),
            &fixtures(),
            "aravali",
            ExportFormat::Csv,
            None,
            vec![("nope".to_string(), "x".to_string())],
            &std::env::temp_dir(),
        );
        assert!(matches!(result, Err(SheetError::InvalidArgument(_))));
    }
}
