use clap::{Parser, Subcommand};
use hf_app::{
    AppConfig, AppError, AppResult, ArtifactFetcher, PlaybackController, RunLifecycle,
    RunProgressEvent, RunSupervisor, load_batch, load_config,
};
use hf_core::{ResultId, format_sim_time, to_display};
use hf_gateway::{Gateway, HttpGateway};
use hf_results::{ArtifactPayload, FrameExport, StepArtifactSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hf-cli")]
#[command(about = "herdflow CLI - run and replay livestock epidemic simulations", long_about = None)]
struct Cli {
    /// Path to the config YAML file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a batch of runs and follow them to completion
    Submit {
        /// Path to the batch YAML file
        batch_path: PathBuf,
        /// Return right after submission
        #[arg(long)]
        no_wait: bool,
    },
    /// Query the progress of a result once
    Progress {
        /// Experiment result ID
        result_id: String,
    },
    /// Ask the server to stop a running simulation
    Stop {
        /// Experiment result ID
        result_id: String,
    },
    /// Show details of a result
    Show {
        /// Experiment result ID
        result_id: String,
    },
    /// List the artifact categories of a result
    Categories {
        /// Experiment result ID
        result_id: String,
    },
    /// Show the artifacts of one display step
    View {
        /// Experiment result ID
        result_id: String,
        /// Display step (one per 45 simulated minutes)
        step: i64,
    },
    /// Write the frames of a step range to a directory
    Export {
        /// Experiment result ID
        result_id: String,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        /// First display step
        #[arg(long, default_value_t = 0)]
        from: i64,
        /// Last display step (defaults to the last step of the result)
        #[arg(long)]
        to: Option<i64>,
    },
    /// Stream an animation of one or more results
    Play {
        /// Experiment result IDs
        #[arg(required = true)]
        result_ids: Vec<String>,
        /// Display step to start from
        #[arg(long, default_value_t = 0)]
        from: i64,
        /// Milliseconds per step (1-1501)
        #[arg(long)]
        speed: Option<u64>,
        /// Stop after this many frames
        #[arg(long)]
        frames: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let gateway = connect(&config)?;

    match cli.command {
        Commands::Submit {
            batch_path,
            no_wait,
        } => cmd_submit(gateway, &config, &batch_path, !no_wait).await,
        Commands::Progress { result_id } => cmd_progress(gateway, &result_id.into()).await,
        Commands::Stop { result_id } => cmd_stop(gateway, &result_id.into()).await,
        Commands::Show { result_id } => cmd_show(gateway, &result_id.into()).await,
        Commands::Categories { result_id } => cmd_categories(gateway, &result_id.into()).await,
        Commands::View { result_id, step } => cmd_view(gateway, &result_id.into(), step).await,
        Commands::Export {
            result_id,
            output,
            from,
            to,
        } => cmd_export(gateway, &result_id.into(), &output, from, to).await,
        Commands::Play {
            result_ids,
            from,
            speed,
            frames,
        } => {
            let ids = result_ids.into_iter().map(ResultId::from).collect();
            cmd_play(gateway, &config, ids, from, speed, frames).await
        }
    }
}

fn connect(config: &AppConfig) -> AppResult<Arc<dyn Gateway>> {
    tracing::debug!(base_url = %config.gateway.base_url, "using gateway");
    let gateway = HttpGateway::new(&config.gateway)
        .map_err(|e| AppError::Config(format!("Cannot reach gateway: {}", e)))?;
    Ok(Arc::new(gateway))
}

async fn cmd_submit(
    gateway: Arc<dyn Gateway>,
    config: &AppConfig,
    batch_path: &Path,
    wait: bool,
) -> AppResult<()> {
    let batch = load_batch(batch_path)?;
    let mut supervisor = RunSupervisor::new(gateway, batch.project_id, config.polling);
    for run in batch.run_configs() {
        supervisor.add_run(run)?;
    }

    println!(
        "Submitting {} run(s) for project {}",
        supervisor.registry().len(),
        batch.project_id
    );
    let launched = supervisor.submit_all().await?;
    for (order, result_id) in &launched {
        println!("✓ Run {} submitted: result {}", order, result_id);
    }

    if !wait || launched.is_empty() {
        print_runs(&supervisor);
        return Ok(());
    }

    let started = Instant::now();
    let mut last_emit = Instant::now();
    supervisor
        .run_until_terminal(|event| {
            if event.lifecycle_changed() {
                clear_progress_line();
                println!("  Run {} {}", event.order, event.lifecycle);
            }
            if event.lifecycle_changed() || last_emit.elapsed().as_millis() >= 100 {
                render_cli_progress(event, started.elapsed().as_secs_f64());
                last_emit = Instant::now();
            }
        })
        .await?;
    clear_progress_line();

    println!("✓ All runs finished in {:.1}s", started.elapsed().as_secs_f64());
    print_runs(&supervisor);
    Ok(())
}

fn print_runs(supervisor: &RunSupervisor) {
    println!("\nRuns:");
    for entry in supervisor.snapshot() {
        let result = entry
            .result_id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  result={}  state={}  {:.1}%",
            entry.order, result, entry.lifecycle, entry.progress_percent
        );
        if let Some(url) = &entry.download_url {
            println!("      download: {}", url);
        }
    }
}

fn clear_progress_line() {
    print!("\r{}\r", " ".repeat(100));
    let _ = io::stdout().flush();
}

fn render_cli_progress(event: &RunProgressEvent, elapsed_s: f64) {
    let width = 28usize;
    let filled = ((event.progress_percent / 100.0 * width as f64).round() as usize).min(width);
    let bar = format!(
        "{}{}",
        "#".repeat(filled),
        "-".repeat(width.saturating_sub(filled))
    );
    let step = event
        .current_step
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    print!(
        "\r[{}] {:>6.2}%  run={}  state={}  step={}  elapsed={:.1}s",
        bar,
        event.progress_percent,
        event.order,
        event.lifecycle.label(),
        step,
        elapsed_s
    );
    let _ = io::stdout().flush();
}

async fn cmd_progress(gateway: Arc<dyn Gateway>, result_id: &ResultId) -> AppResult<()> {
    let report = gateway.progress(result_id).await?;
    let detail = gateway.result_detail(result_id).await?;
    let lifecycle: RunLifecycle = hf_app::ServerStatus::from(report.status).lifecycle();
    let percent = hf_app::progress_percent(report.current_step, detail.final_step);

    println!("Result {}: {}", result_id, lifecycle);
    match report.current_step {
        Some(step) => println!(
            "  Step {}/{} ({:.1}%)",
            step, detail.final_step, percent
        ),
        None => println!("  Not started"),
    }
    Ok(())
}

async fn cmd_stop(gateway: Arc<dyn Gateway>, result_id: &ResultId) -> AppResult<()> {
    gateway.stop(result_id).await?;
    println!("✓ Stop requested for result {}", result_id);
    Ok(())
}

async fn cmd_show(gateway: Arc<dyn Gateway>, result_id: &ResultId) -> AppResult<()> {
    let detail = gateway.result_detail(result_id).await?;
    let domain = hf_core::StepDomain::new(detail.final_step)?;

    println!("\nResult {}:", result_id);
    println!("  Experiment: {}", detail.experiment_name);
    println!("  Model: {}", detail.model_name);
    println!("  Final step: {}", detail.final_step);
    println!("  Display steps: 0 - {}", domain.last_display());
    println!("  Simulated time: {}", format_sim_time(detail.final_step));
    match &detail.download_url {
        Some(url) => println!("  Download: {}", url),
        None => println!("  Download: not available"),
    }
    Ok(())
}

async fn cmd_categories(gateway: Arc<dyn Gateway>, result_id: &ResultId) -> AppResult<()> {
    let categories = gateway.categories(result_id).await?;

    if categories.is_empty() {
        println!("No categories found for result {}", result_id);
    } else {
        println!("Categories of result {}:", result_id);
        for category in categories {
            println!("  {} - {}", category.id, category.name);
        }
    }
    Ok(())
}

fn print_set(set: &StepArtifactSet) {
    println!(
        "Step {} ({})  result={}",
        set.display_step(),
        format_sim_time(set.step),
        set.result_id
    );
    for artifact in &set.artifacts {
        match &artifact.payload {
            ArtifactPayload::Image { encoded } => {
                println!("  {:<24} image ({} bytes base64)", artifact.label(), encoded.len());
            }
            ArtifactPayload::Metric { value } => {
                println!("  {:<24} {}", artifact.label(), value);
            }
        }
    }
}

async fn cmd_view(gateway: Arc<dyn Gateway>, result_id: &ResultId, step: i64) -> AppResult<()> {
    let mut fetcher = ArtifactFetcher::new(gateway);
    fetcher.load_domain(result_id).await?;
    let set = fetcher.fetch_step(result_id, step).await?;
    print_set(&set);
    Ok(())
}

async fn cmd_export(
    gateway: Arc<dyn Gateway>,
    result_id: &ResultId,
    output: &Path,
    from: i64,
    to: Option<i64>,
) -> AppResult<()> {
    let mut fetcher = ArtifactFetcher::new(gateway);
    let domain = fetcher.load_domain(result_id).await?;
    let to = to.unwrap_or(domain.last_display() as i64);

    println!(
        "Fetching steps {} - {} of result {}",
        from, to, result_id
    );
    let sets = fetcher.fetch_range(result_id, from, to).await?;
    let export = FrameExport::new(output.to_path_buf())?;
    let summary = export.write_sets(sets.iter().map(|s| s.as_ref()))?;

    println!(
        "✓ Exported {} frames and {} metric values to {}",
        summary.images_written,
        summary.metrics_written,
        output.display()
    );
    Ok(())
}

fn frame_line(step: u64, sets: &[Arc<StepArtifactSet>]) -> String {
    let images: usize = sets.iter().map(|s| s.images().count()).sum();
    format!(
        "  step {:>4}  {}  {} image(s) from {} result(s)",
        to_display(step),
        format_sim_time(step),
        images,
        sets.len()
    )
}

async fn cmd_play(
    gateway: Arc<dyn Gateway>,
    config: &AppConfig,
    result_ids: Vec<ResultId>,
    from: i64,
    speed: Option<u64>,
    frames: Option<usize>,
) -> AppResult<()> {
    let pace = config.playback.pace()?;
    let filter = config.playback.filter_for(result_ids.len());
    let mut playback = PlaybackController::open(gateway, result_ids, pace)
        .await?
        .with_filter(filter);
    if let Some(ms) = speed {
        playback.set_speed(ms).await?;
    }

    playback.seek(from).await?;
    println!(
        "Playing from step {} to {} at {} ms/step (Ctrl-C to stop)",
        from,
        playback.domain().last_display(),
        playback.pace().millis()
    );
    playback.play().await?;

    let mut shown = 0usize;
    let outcome = loop {
        if frames.is_some_and(|limit| shown >= limit) {
            break Ok(());
        }
        tokio::select! {
            next = playback.next_frame() => match next {
                Ok(Some(frame)) => {
                    shown += 1;
                    println!("{}", frame_line(frame.step, &frame.sets));
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted");
                break Ok(());
            }
        }
    };

    playback.shutdown();
    outcome?;
    println!(
        "✓ Played {} frame(s); stopped at step {}",
        shown,
        playback.current_display_step()
    );
    Ok(())
}
