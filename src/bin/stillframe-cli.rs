use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use stillframe::{
    CostModel, ExtractOptions, ExtractionRequest, FfmpegLogLevel, GateOptions, ImageSurface,
    LogicalSize, SeekPrecision, ThumbnailError, ThumbnailExtractor,
};

const CLI_AFTER_HELP: &str = "Examples:\n  stillframe extract input.mp4 --out thumbs\n  stillframe extract *.mov --out thumbs --width 320 --height 180 --scale 2 --max-slots 2 --progress\n  stillframe extract input.mkv --out thumbs --memory-ceiling-mb 120 --pipeline-mb 24 --json\n  stillframe completions zsh > _stillframe";

#[derive(Debug, Parser)]
#[command(
    name = "stillframe",
    version,
    about = "Extract representative thumbnails from video files under a memory budget",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional logging output.
    #[arg(long)]
    verbose: bool,

    /// Show a progress bar.
    #[arg(long)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long)]
    overwrite: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Parser, Clone)]
struct BudgetOptions {
    /// Slots shared by all concurrent extractions.
    #[arg(long)]
    max_slots: Option<u32>,

    /// Derive the slot count from a memory ceiling in MiB (needs --pipeline-mb).
    #[arg(long, requires = "pipeline_mb", conflicts_with = "max_slots")]
    memory_ceiling_mb: Option<u64>,

    /// Worst-case memory of one pipeline in MiB.
    #[arg(long)]
    pipeline_mb: Option<u64>,

    /// Requests allowed to wait for a slot.
    #[arg(long, default_value_t = 32)]
    queue_depth: usize,

    /// Longest time a request waits for a slot, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    queue_timeout_ms: u64,

    /// Charge one slot per this many MiB of input file instead of one per request.
    #[arg(long)]
    mib_per_slot: Option<u64>,

    /// Largest thumbnail, in pixels, a request may produce.
    #[arg(long)]
    max_output_pixels: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract one thumbnail per input file.
    #[command(
        about = "Extract thumbnails",
        after_help = "Examples:\n  stillframe extract input.mp4 --out thumbs\n  stillframe extract a.mp4 b.mkv --out thumbs --position 50 --accurate"
    )]
    Extract {
        /// Input media paths.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output directory for PNG thumbnails.
        #[arg(long)]
        out: PathBuf,
        /// Maximum thumbnail width in points.
        #[arg(long, default_value_t = 256.0)]
        width: f64,
        /// Maximum thumbnail height in points.
        #[arg(long, default_value_t = 256.0)]
        height: f64,
        /// Pixels per point of the target display.
        #[arg(long, default_value_t = 1.0)]
        scale: f64,
        /// Position of the frame as a percentage of the duration.
        #[arg(long, default_value_t = 25)]
        position: u32,
        /// Decode forward to the exact position instead of stopping at the keyframe.
        #[arg(long)]
        accurate: bool,
        /// Output results as machine-readable JSON.
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        budget: BudgetOptions,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// What happened to one input.
#[derive(Debug)]
struct Outcome {
    input: PathBuf,
    elapsed: Duration,
    result: Result<Saved, ThumbnailError>,
}

#[derive(Debug)]
struct Saved {
    output: PathBuf,
    pixel_size: (u32, u32),
    logical_size: LogicalSize,
}

fn mebibytes(value: u64) -> u64 {
    value.saturating_mul(1024 * 1024)
}

fn output_path_for(input: &Path, out: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "thumbnail".to_string());
    out.join(format!("{stem}.png"))
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn gate_options(budget: &BudgetOptions) -> GateOptions {
    let gate = match (budget.memory_ceiling_mb, budget.pipeline_mb, budget.max_slots) {
        (Some(ceiling), Some(pipeline), _) => {
            GateOptions::from_memory_ceiling(mebibytes(ceiling), mebibytes(pipeline))
        }
        (_, _, Some(slots)) => GateOptions::new().with_max_concurrent_slots(slots),
        _ => GateOptions::new(),
    };
    gate.with_max_queue_depth(budget.queue_depth)
        .with_queue_timeout(Duration::from_millis(budget.queue_timeout_ms))
}

fn extract_options(
    budget: &BudgetOptions,
    position: u32,
    accurate: bool,
) -> Result<ExtractOptions, Box<dyn std::error::Error>> {
    if position > 100 {
        return Err("--position must be between 0 and 100".into());
    }

    let mut options = ExtractOptions::new()
        .with_position_percent(position)
        .with_gate(gate_options(budget));
    if accurate {
        options = options.with_seek_precision(SeekPrecision::Accurate);
    }
    if let Some(mib) = budget.mib_per_slot {
        if mib == 0 {
            return Err("--mib-per-slot must be greater than 0".into());
        }
        options = options.with_cost_model(CostModel::FileSize {
            bytes_per_slot: mebibytes(mib),
        });
    }
    if let Some(pixels) = budget.max_output_pixels {
        options = options.with_max_output_pixels(pixels);
    }
    Ok(options)
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(level) = &global.log_level {
        let parsed = FfmpegLogLevel::parse(level)
            .ok_or(format!("unsupported --log-level: {level}"))?;
        stillframe::set_ffmpeg_log_level(parsed);
    }
    Ok(())
}

async fn extract_one(
    extractor: Arc<ThumbnailExtractor>,
    request: ExtractionRequest,
    output: PathBuf,
    scale: f64,
) -> Result<Saved, ThumbnailError> {
    let reply = extractor.extract(request).await?;
    let pixel_size = reply.pixel_size();
    let logical_size = reply.logical_size();

    let mut surface = ImageSurface::for_reply(&reply, scale);
    reply.draw(&mut surface)?;
    surface
        .into_image()
        .save(&output)
        .map_err(|error| ThumbnailError::DrawFailed(error.to_string()))?;

    Ok(Saved {
        output,
        pixel_size,
        logical_size,
    })
}

fn print_outcomes(outcomes: &[Outcome], json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        let payload: Vec<_> = outcomes
            .iter()
            .map(|outcome| match &outcome.result {
                Ok(saved) => json!({
                    "input": outcome.input.display().to_string(),
                    "output": saved.output.display().to_string(),
                    "pixel_width": saved.pixel_size.0,
                    "pixel_height": saved.pixel_size.1,
                    "logical_width": saved.logical_size.width,
                    "logical_height": saved.logical_size.height,
                    "elapsed_ms": outcome.elapsed.as_millis() as u64,
                }),
                Err(error) => json!({
                    "input": outcome.input.display().to_string(),
                    "error": error.to_string(),
                    "kind": format!("{:?}", error.kind()),
                    "retryable": error.kind().is_retryable(),
                    "elapsed_ms": outcome.elapsed.as_millis() as u64,
                }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    for outcome in outcomes {
        match &outcome.result {
            Ok(saved) => println!(
                "{} {} -> {} ({}x{} px)",
                "saved".green().bold(),
                outcome.input.display(),
                saved.output.display(),
                saved.pixel_size.0,
                saved.pixel_size.1
            ),
            Err(error) if error.kind().is_retryable() => eprintln!(
                "{} {}: {}",
                "skipped".yellow().bold(),
                outcome.input.display(),
                error
            ),
            Err(error) => eprintln!(
                "{} {}: {}",
                "failed".red().bold(),
                outcome.input.display(),
                error
            ),
        }
    }
    Ok(())
}

async fn run_extract(
    global: &GlobalOptions,
    inputs: Vec<PathBuf>,
    out: PathBuf,
    size: LogicalSize,
    scale: f64,
    options: ExtractOptions,
) -> Result<Vec<Outcome>, Box<dyn std::error::Error>> {
    if !(size.width > 0.0 && size.height > 0.0) {
        return Err("--width and --height must be greater than 0".into());
    }
    if !(scale.is_finite() && scale > 0.0) {
        return Err("--scale must be greater than 0".into());
    }

    fs::create_dir_all(&out)?;
    for input in &inputs {
        ensure_writable_path(&output_path_for(input, &out), global.overwrite)?;
    }

    let extractor = Arc::new(ThumbnailExtractor::new(options));
    if global.verbose {
        eprintln!(
            "{} {} slot(s), queue {}, timeout {:?}",
            "budget".cyan().bold(),
            extractor.options().gate().max_concurrent_slots(),
            extractor.options().gate().max_queue_depth(),
            extractor.options().gate().queue_timeout()
        );
    }

    let progress_bar = if global.progress {
        let pb = ProgressBar::new(inputs.len() as u64);
        let style =
            ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}")?;
        pb.set_style(style.progress_chars("##-"));
        Some(pb)
    } else {
        None
    };

    let mut handles = Vec::with_capacity(inputs.len());
    for input in inputs {
        let extractor = Arc::clone(&extractor);
        let request = ExtractionRequest::new(input.clone(), size, scale);
        let output = output_path_for(&input, &out);
        let progress_bar = progress_bar.clone();
        let verbose = global.verbose;

        handles.push(tokio::spawn(async move {
            let started = Instant::now();
            let result = extract_one(extractor, request, output, scale).await;
            if let Some(pb) = &progress_bar {
                pb.inc(1);
            }
            if verbose {
                eprintln!(
                    "finished {} in {:?}",
                    input.display(),
                    started.elapsed()
                );
            }
            Outcome {
                input,
                elapsed: started.elapsed(),
                result,
            }
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await?);
    }

    if let Some(pb) = progress_bar {
        pb.finish_with_message("done");
    }
    if global.verbose {
        eprintln!(
            "{} {} resource(s) outstanding",
            "resources".cyan().bold(),
            extractor.resources().outstanding()
        );
    }

    Ok(outcomes)
}

fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Extract {
            inputs,
            out,
            width,
            height,
            scale,
            position,
            accurate,
            json,
            budget,
        } => {
            let options = extract_options(&budget, position, accurate)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let outcomes = runtime.block_on(run_extract(
                &cli.global,
                inputs,
                out,
                LogicalSize::new(width, height),
                scale,
                options,
            ))?;

            print_outcomes(&outcomes, json)?;
            Ok(outcomes.iter().all(|outcome| outcome.result.is_ok()))
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "stillframe", &mut std::io::stdout());
            Ok(true)
        }
    }
}

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(error) => {
            eprintln!("error: {error}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(args: &[&str]) -> BudgetOptions {
        let mut argv = vec!["stillframe", "extract", "in.mp4", "--out", "thumbs"];
        argv.extend_from_slice(args);
        match Cli::parse_from(argv).command {
            Commands::Extract { budget, .. } => budget,
            Commands::Completions { .. } => unreachable!(),
        }
    }

    #[test]
    fn output_path_uses_input_stem() {
        assert_eq!(
            output_path_for(Path::new("/videos/clip.final.mov"), Path::new("thumbs")),
            PathBuf::from("thumbs/clip.final.png")
        );
    }

    #[test]
    fn memory_ceiling_derives_slots() {
        let gate = gate_options(&budget(&["--memory-ceiling-mb", "120", "--pipeline-mb", "24"]));
        assert_eq!(gate.max_concurrent_slots(), 3);
        assert_eq!(gate.max_queue_depth(), 32);
    }

    #[test]
    fn explicit_slots_and_queue() {
        let gate = gate_options(&budget(&[
            "--max-slots",
            "4",
            "--queue-depth",
            "0",
            "--queue-timeout-ms",
            "250",
        ]));
        assert_eq!(gate.max_concurrent_slots(), 4);
        assert_eq!(gate.max_queue_depth(), 0);
        assert_eq!(gate.queue_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn rejects_out_of_range_position() {
        assert!(extract_options(&budget(&[]), 101, false).is_err());
        let options = extract_options(&budget(&[]), 50, true).unwrap();
        assert_eq!(options.position_percent(), 50);
        assert_eq!(options.seek_precision(), SeekPrecision::Accurate);
    }

    #[test]
    fn output_pixel_cap_is_forwarded() {
        let default = extract_options(&budget(&[]), 25, false).unwrap();
        assert_eq!(
            default.max_output_pixels(),
            stillframe::scaler::DEFAULT_MAX_OUTPUT_PIXELS
        );
        let capped = budget(&["--max-output-pixels", "65536"]);
        let capped = extract_options(&capped, 25, false).unwrap();
        assert_eq!(capped.max_output_pixels(), 65_536);
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
