use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use futures::StreamExt;
use log::info;
use std::fs;
use std::path::PathBuf;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use wavediff::Coordinator;
use wavediff::config::Config;
use wavediff::coordinator::{StatusSource, TrainRunView};
use wavediff::domain::{DataParams, DataRun, GenerationRun, RunStatus, TrainParams};
use wavediff::tail::TailEvent;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wavediff")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("wavediff.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{} {}", "Base directory:".yellow(), config.paths.base_dir.display());
        println!("{} {}", "Database:".yellow(), config.paths.database().display());
    }

    let coordinator = Coordinator::open(config).context("Failed to open run store")?;

    match &cli.command {
        Commands::Data(args) => handle_data_command(&coordinator, DataParams::from(args)).await,
        Commands::DataRuns => handle_data_runs_command(&coordinator),
        Commands::Train(args) => handle_train_command(&coordinator, TrainParams::from(args)).await,
        Commands::Runs => handle_runs_command(&coordinator),
        Commands::Show { id } => handle_show_command(&coordinator, *id),
        Commands::Logs { id } => handle_logs_command(&coordinator, *id).await.map(|_| ()),
        Commands::Delete { id } => handle_delete_command(&coordinator, *id),
        Commands::Generate { train_run_id } => handle_generate_command(&coordinator, *train_run_id).await,
        Commands::Generations { train_run } => handle_generations_command(&coordinator, *train_run),
        Commands::Image { file, out } => handle_image_command(&coordinator, file, out.as_ref()).await,
        Commands::Recover => handle_recover_command(&coordinator),
    }
}

fn format_time(created_at_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(created_at_ms)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| created_at_ms.to_string())
}

fn paint(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Pending => status.as_str().yellow(),
        RunStatus::Running => status.as_str().cyan(),
        RunStatus::Success => status.as_str().green(),
        RunStatus::Failed => status.as_str().red(),
    }
}

fn print_data_run(run: &DataRun) {
    println!(
        "{:>4}  {}  {:<8} {:>7} rows  {}",
        run.id,
        format_time(run.created_at),
        paint(run.status),
        run.row_count,
        run.artifact_path.display()
    );
}

fn print_train_run(view: &TrainRunView) {
    let note = match view.status_source {
        StatusSource::Stale => format!(" {}", "(interrupted)".red()),
        StatusSource::Live | StatusSource::Persisted => String::new(),
    };
    println!(
        "{:>4}  {}  {:<8} {:>3} epochs{}",
        view.id(),
        format_time(view.run.created_at),
        paint(view.status()),
        view.run.epoch_count,
        note
    );
}

fn print_generation(generation: &GenerationRun) {
    println!(
        "{:>4}  {}  {:<8} train {:>4}  {}",
        generation.id,
        format_time(generation.created_at),
        paint(generation.status),
        generation.train_run_id,
        generation.image_url()
    );
}

async fn handle_data_command(coordinator: &Coordinator, params: DataParams) -> Result<()> {
    info!("Submitting data run: {:?}", params);
    println!("{}", "Generating data...".cyan());
    let run = coordinator.submit_data_run(&params).await?;
    println!(
        "{} data run {} produced {} rows at {}",
        "Done:".green(),
        run.id,
        run.row_count,
        run.artifact_path.display()
    );
    Ok(())
}

fn handle_data_runs_command(coordinator: &Coordinator) -> Result<()> {
    let runs = coordinator.list_data_runs()?;
    if runs.is_empty() {
        println!("{}", "No data runs".dimmed());
    }
    runs.iter().for_each(print_data_run);
    Ok(())
}

async fn handle_train_command(coordinator: &Coordinator, params: TrainParams) -> Result<()> {
    info!("Submitting train run: {:?}", params);
    let run = coordinator.submit_train_run(&params)?;
    println!(
        "{} train run {} ({} epochs), logging to {}",
        "Started:".green(),
        run.id,
        run.epoch_count,
        run.log_path.display()
    );

    match handle_logs_command(coordinator, run.id).await? {
        RunStatus::Success => Ok(()),
        status => Err(eyre!("Training run {} finished with status {}", run.id, status)),
    }
}

fn handle_runs_command(coordinator: &Coordinator) -> Result<()> {
    let runs = coordinator.list_train_runs()?;
    if runs.is_empty() {
        println!("{}", "No training runs".dimmed());
    }
    runs.iter().for_each(print_train_run);
    Ok(())
}

fn handle_show_command(coordinator: &Coordinator, id: i64) -> Result<()> {
    let view = coordinator.get_train_run(id)?;
    println!("{} {}", "Training run:".green(), view.id());
    println!("  created:     {}", format_time(view.run.created_at));
    println!("  status:      {} ({:?})", paint(view.status()), view.status_source);
    if let Some(pid) = view.pid {
        println!("  pid:         {}", pid);
    }
    println!("  epochs:      {}", view.run.epoch_count);
    println!("  log:         {}", view.run.log_path.display());
    println!("  checkpoints: {}", view.run.checkpoint_dir.display());
    println!("  params:      {}", serde_json::to_string(&view.run.params)?);
    if view.is_stale() {
        println!(
            "{}",
            "No running process owns this run; `wavediff recover` marks it failed.".yellow()
        );
    }
    Ok(())
}

async fn handle_logs_command(coordinator: &Coordinator, id: i64) -> Result<RunStatus> {
    let mut events = coordinator.stream_train_logs(id)?;
    while let Some(event) = events.next().await {
        match event {
            TailEvent::Line { line } => println!("{}", line),
            TailEvent::Done {
                status, interrupted, ..
            } => {
                if interrupted {
                    println!("{} run {} was interrupted ({})", "Stale:".red(), id, status);
                } else {
                    println!("{} run {} {}", "Finished:".green(), id, paint(status));
                }
                return Ok(status);
            }
        }
    }
    Err(eyre!("Log stream for run {} ended without a status", id))
}

fn handle_delete_command(coordinator: &Coordinator, id: i64) -> Result<()> {
    let removed = coordinator.delete_train_run(id)?;
    println!(
        "{} training run {} and {} generation(s)",
        "Deleted:".red(),
        id,
        removed
    );
    Ok(())
}

async fn handle_generate_command(coordinator: &Coordinator, train_run_id: i64) -> Result<()> {
    println!("{} from training run {}", "Sampling...".cyan(), train_run_id);
    let generation = coordinator.submit_generation(train_run_id).await?;
    println!(
        "{} generation {} wrote {}",
        "Done:".green(),
        generation.id,
        generation.artifact_path.display()
    );
    Ok(())
}

fn handle_generations_command(coordinator: &Coordinator, train_run: Option<i64>) -> Result<()> {
    let generations = coordinator.list_generations(train_run)?;
    if generations.is_empty() {
        println!("{}", "No generations".dimmed());
    }
    generations.iter().for_each(print_generation);
    Ok(())
}

async fn handle_image_command(coordinator: &Coordinator, file: &str, out: Option<&PathBuf>) -> Result<()> {
    let image = coordinator.fetch_generated_image(file).await?;
    let dest = out.cloned().unwrap_or_else(|| PathBuf::from(&image.name));
    fs::write(&dest, &image.bytes).context(format!("Failed to write {}", dest.display()))?;
    println!("{} {} ({} bytes)", "Wrote:".green(), dest.display(), image.bytes.len());
    Ok(())
}

fn handle_recover_command(coordinator: &Coordinator) -> Result<()> {
    let report = coordinator.recover_interrupted()?;
    if report.is_empty() {
        println!("{}", "Nothing to recover".dimmed());
    }
    for action in &report.actions {
        println!(
            "{} {} run {} ({} -> {})",
            "Recovered:".yellow(),
            action.kind,
            action.run_id,
            action.previous,
            paint(RunStatus::Failed)
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
