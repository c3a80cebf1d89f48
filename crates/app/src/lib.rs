use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use tessera_core::backend::{build_session, InferenceBackend, SessionConfig};
use tessera_core::compositor::{ProgressCallback, TileCompositor, TileProgress};
use tessera_core::config::{config_path, data_dir, AppConfig, InferenceConfig};
use tessera_core::geometry::{ModelGeometry, PixelRange};
use tessera_core::grid::{EdgePolicy, TilePlan, TilingSettings};
use tessera_core::image_io::{load_image, save_image};
use tessera_core::inpaint::{hole_count, inpaint, InpaintOptions, MaskBuilder, Rect, Stroke};
use tessera_core::logging::{
    self, FileSinkPlan, LoggingInitOptions, PanicHookInstallPlan, RedactingMakeWriter,
    DEFAULT_LOG_FILTER,
};
use tessera_core::model_io::{inspect_session, GeometryOverrides};
use tessera_core::onnx::{OnnxInpainting, OnnxSuperResolution};
use tessera_core::runtime;

const PROGRESS_BAR_WIDTH: usize = 30;

#[derive(Parser)]
#[command(
    name = "tessera",
    version,
    about = "Tiled super-resolution and in-painting with ONNX models"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[arg(
        long,
        value_name = "BACKEND",
        global = true,
        help = "Execution provider: cpu, cuda or tensorrt (default from config)"
    )]
    backend: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upscale an image tile by tile.
    Upscale(UpscaleArgs),
    /// Fill masked regions of an image.
    Inpaint(InpaintArgs),
    /// Print a model's inputs, outputs and derived geometry as JSON.
    Inspect(InspectArgs),
    /// Print the tile plan for an image without running a model.
    Plan(PlanArgs),
}

#[derive(Args, Clone, Default)]
struct TilingArgs {
    #[arg(long, value_name = "N", help = "Source pixels per model input pixel")]
    crop_factor: Option<u32>,
    #[arg(long, value_name = "N", help = "Edge lines discarded from every tile")]
    border_lines: Option<u32>,
    #[arg(long, help = "Add a final tile flush with the right/bottom edge")]
    align_edges: bool,
}

impl TilingArgs {
    fn settings(&self, base: TilingSettings) -> TilingSettings {
        TilingSettings {
            crop_factor: self.crop_factor.unwrap_or(base.crop_factor),
            border_lines: self.border_lines.unwrap_or(base.border_lines),
            edge_policy: if self.align_edges {
                EdgePolicy::Align
            } else {
                base.edge_policy
            },
        }
    }
}

#[derive(Args, Clone, Default)]
struct GeometryArgs {
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    input_size: Option<(u32, u32)>,
    #[arg(long, value_name = "N", help = "Native upsample factor for dynamic-shape models")]
    upsample: Option<u32>,
    #[arg(
        long,
        value_name = "unit|byte",
        value_parser = parse_range,
        help = "Value range the model reads"
    )]
    input_range: Option<PixelRange>,
    #[arg(
        long,
        value_name = "unit|byte",
        value_parser = parse_range,
        help = "Value range the model writes [default: input range]"
    )]
    output_range: Option<PixelRange>,
}

impl GeometryArgs {
    fn overrides(&self, config: &InferenceConfig) -> GeometryOverrides {
        GeometryOverrides {
            input_size: self.input_size,
            upsample: self.upsample,
            input_range: self.input_range.or(config.input_range),
            output_range: self.output_range.or(config.output_range),
        }
    }
}

#[derive(Args)]
struct UpscaleArgs {
    #[arg(help = "Source image path or http(s) URL")]
    input: String,
    #[arg(short = 'o', long)]
    output: PathBuf,
    #[arg(short = 'm', long, help = "ONNX model path or name under models_dir")]
    model: PathBuf,
    #[command(flatten)]
    tiling: TilingArgs,
    #[command(flatten)]
    geometry: GeometryArgs,
    #[arg(long, value_name = "Q", help = "JPEG quality 1-100")]
    quality: Option<u8>,
}

#[derive(Args)]
struct InpaintArgs {
    #[arg(help = "Source image path or http(s) URL")]
    input: String,
    #[arg(short = 'o', long)]
    output: PathBuf,
    #[arg(short = 'm', long)]
    model: PathBuf,
    #[arg(long = "rect", value_name = "X,Y,W,H")]
    rects: Vec<Rect>,
    #[arg(long = "stroke", value_name = "X0,Y0,X1,Y1,T")]
    strokes: Vec<Stroke>,
    #[arg(long, value_name = "FILE", help = "Mask image; pixels brighter than 127 are holes")]
    mask: Option<PathBuf>,
    #[arg(long, help = "Write the result at the model's resolution")]
    keep_model_size: bool,
    #[command(flatten)]
    geometry: GeometryArgs,
    #[arg(long, value_name = "Q")]
    quality: Option<u8>,
}

#[derive(Args)]
struct InspectArgs {
    #[arg(short = 'm', long)]
    model: PathBuf,
    #[command(flatten)]
    geometry: GeometryArgs,
}

#[derive(Args)]
struct PlanArgs {
    input: String,
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    input_size: (u32, u32),
    #[arg(long, value_name = "N")]
    upsample: u32,
    #[command(flatten)]
    tiling: TilingArgs,
}

fn parse_range(raw: &str) -> Result<PixelRange, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "unit" | "0-1" => Ok(PixelRange::Unit),
        "byte" | "0-255" => Ok(PixelRange::Byte),
        _ => Err(format!("expected 'unit' or 'byte', got '{raw}'")),
    }
}

fn parse_size(raw: &str) -> Result<(u32, u32), String> {
    let (w, h) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{raw}'"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| format!("invalid dimension '{v}' in '{raw}'"))
    };
    Ok((parse(w)?, parse(h)?))
}

pub async fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    let resolved_data_dir = data_dir(cli.data_dir.as_deref());

    runtime::configure_ort_dylib(Some(&resolved_data_dir));
    init_logging(
        Some(resolved_data_dir.as_path()),
        cli.verbose,
        cli.log_filter.as_deref(),
    );
    runtime::log_ort_dylib_status();
    log_startup_metadata(&resolved_data_dir);

    let config = AppConfig::load_or_init(&resolved_data_dir);
    let backend = cli
        .backend
        .as_deref()
        .map(InferenceBackend::from_str_lossy)
        .unwrap_or(config.inference.backend);

    let ctx = RunContext {
        config,
        data_dir: resolved_data_dir,
        backend,
    };

    match cli.command {
        Commands::Upscale(args) => run_upscale(ctx, args).await,
        Commands::Inpaint(args) => run_inpaint(ctx, args).await,
        Commands::Inspect(args) => run_inspect(&ctx, &args),
        Commands::Plan(args) => run_plan(&ctx, &args),
    }
}

fn init_logging(data_dir: Option<&Path>, verbose: u8, cli_log_filter: Option<&str>) {
    let panic_hook_plan = logging::install_panic_hook(data_dir);

    let options = LoggingInitOptions {
        data_dir: data_dir.map(Path::to_path_buf),
        verbose,
        cli_log_filter: cli_log_filter.map(ToString::to_string),
        rust_log_env: std::env::var("RUST_LOG").ok(),
        ..Default::default()
    };
    let filters = logging::compose_logging_filters(&options);
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(parse_env_filter_with_fallback(&filters.console_filter, "console"));

    match logging::build_file_sink_plan(&options) {
        FileSinkPlan::Ready { appender, .. } => {
            let subscriber = tracing_subscriber::registry().with(console_layer).with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(RedactingMakeWriter::new(appender))
                    .with_filter(parse_env_filter_with_fallback(&filters.file_filter, "file")),
            );
            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!("Failed to initialize tracing subscriber: {error}");
            }
        }
        FileSinkPlan::Disabled {
            attempted_log_dir,
            reason,
        } => {
            let subscriber = tracing_subscriber::registry().with(console_layer);
            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!("Failed to initialize tracing subscriber: {error}");
                return;
            }
            warn!(
                attempted_log_dir = ?attempted_log_dir,
                reason = %reason,
                "Persistent file logging unavailable; continuing with console-only logging"
            );
        }
    }

    if let PanicHookInstallPlan::Fallback { reason } = panic_hook_plan {
        warn!(reason = %reason, "Crash reports disabled");
    }
}

fn parse_env_filter_with_fallback(filter: &str, sink_name: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|error| {
        eprintln!(
            "Invalid {sink_name} log filter '{filter}': {error}. Falling back to '{DEFAULT_LOG_FILTER}'."
        );
        tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

fn log_startup_metadata(data_dir: &Path) {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        data_dir = %data_dir.display(),
        config_path = %config_path(data_dir).display(),
        "Runtime startup metadata"
    );
}

struct RunContext {
    config: AppConfig,
    data_dir: PathBuf,
    backend: InferenceBackend,
}

impl RunContext {
    fn model_path(&self, model: &Path) -> PathBuf {
        self.config.resolve_model_path(&self.data_dir, model)
    }
}

/// Cancels `token` on the first Ctrl-C. Abort the handle once the work is done.
fn spawn_ctrl_c_watcher(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current tile");
            token.cancel();
        }
    })
}

async fn run_upscale(ctx: RunContext, args: UpscaleArgs) -> Result<()> {
    let settings = args.tiling.settings(ctx.config.tiling);
    let overrides = args.geometry.overrides(&ctx.config.inference);
    let model_path = ctx.model_path(&args.model);
    let trt_cache_dir = ctx.config.trt_cache_dir(&ctx.data_dir);
    let quality = args.quality.unwrap_or(ctx.config.output.jpeg_quality);
    let backend = ctx.backend;

    let cancel = CancellationToken::new();
    let watcher = spawn_ctrl_c_watcher(cancel.clone());

    info!(input = %args.input, model = %model_path.display(), %backend, "Upscaling");
    let worker_cancel = cancel.clone();
    let input = args.input.clone();
    let output = args.output.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<(u32, u32)> {
        let source = load_image(&input)?;
        let session = SessionConfig {
            model_path: &model_path,
            backend,
            trt_cache_dir: Some(&trt_cache_dir),
        };
        let mut model = OnnxSuperResolution::load(&session, &overrides)?;

        let upscaled = TileCompositor::new(&mut model, settings)
            .with_progress(make_progress_callback())
            .with_cancellation(worker_cancel)
            .run(&source);
        eprintln!();
        let upscaled = upscaled?;

        save_image(&output, &upscaled, quality)?;
        Ok(upscaled.dimensions())
    })
    .await
    .context("upscale worker panicked");
    watcher.abort();

    let (width, height) = result??;
    info!(
        output = %args.output.display(),
        width,
        height,
        "Upscale completed successfully"
    );
    Ok(())
}

async fn run_inpaint(ctx: RunContext, args: InpaintArgs) -> Result<()> {
    let overrides = args.geometry.overrides(&ctx.config.inference);
    let model_path = ctx.model_path(&args.model);
    let trt_cache_dir = ctx.config.trt_cache_dir(&ctx.data_dir);
    let quality = args.quality.unwrap_or(ctx.config.output.jpeg_quality);
    let backend = ctx.backend;
    let options = InpaintOptions {
        restore_size: !args.keep_model_size,
        composite: true,
    };

    let output = args.output.display().to_string();
    let (width, height) = tokio::task::spawn_blocking(move || -> Result<(u32, u32)> {
        let source = load_image(&args.input)?;
        let (w, h) = source.dimensions();

        let mut builder = match &args.mask {
            Some(path) => MaskBuilder::from_file(path, w, h)?,
            None => MaskBuilder::new(w, h),
        };
        for rect in &args.rects {
            builder = builder.rect(*rect);
        }
        for stroke in &args.strokes {
            builder = builder.stroke(*stroke);
        }
        let mask = builder.build();
        if hole_count(&mask) == 0 {
            bail!("mask is empty; pass --rect, --stroke or --mask");
        }

        let session = SessionConfig {
            model_path: &model_path,
            backend,
            trt_cache_dir: Some(&trt_cache_dir),
        };
        let mut model = OnnxInpainting::load(&session, &overrides)?;
        let painted = inpaint(&mut model, &source, &mask, &options)?;
        save_image(&args.output, &painted, quality)?;
        Ok(painted.dimensions())
    })
    .await
    .context("in-painting worker panicked")??;

    info!(
        output = %output,
        width,
        height,
        "In-painting completed successfully"
    );
    Ok(())
}

fn run_inspect(ctx: &RunContext, args: &InspectArgs) -> Result<()> {
    let model_path = ctx.model_path(&args.model);
    let trt_cache_dir = ctx.config.trt_cache_dir(&ctx.data_dir);
    let session = build_session(&SessionConfig {
        model_path: &model_path,
        backend: ctx.backend,
        trt_cache_dir: Some(&trt_cache_dir),
    })?;
    let io = inspect_session(&session);

    let overrides = args.geometry.overrides(&ctx.config.inference);
    let geometry = match io.geometry(&overrides) {
        Ok(geometry) => Some(geometry),
        Err(err) => {
            warn!(error = %err, "Model geometry is not fully determined");
            None
        }
    };
    let upsample = geometry.and_then(|g| g.upsample_factor().ok());

    let report = serde_json::json!({
        "model": model_path.display().to_string(),
        "inputs": io.inputs,
        "outputs": io.outputs,
        "geometry": geometry,
        "upsample": upsample,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_plan(ctx: &RunContext, args: &PlanArgs) -> Result<()> {
    let source = load_image(&args.input)?;
    let (input_w, input_h) = args.input_size;
    let geometry = ModelGeometry::with_upsample(input_w, input_h, args.upsample)?;
    let settings = args.tiling.settings(ctx.config.tiling);

    let plan = TilePlan::new(source.width(), source.height(), &geometry, &settings)?;
    println!("{}", serde_json::to_string_pretty(&plan_report(&plan, &settings))?);
    Ok(())
}

fn plan_report(plan: &TilePlan, settings: &TilingSettings) -> serde_json::Value {
    let tiles: Vec<serde_json::Value> = plan
        .tiles()
        .map(|tile| {
            serde_json::json!({
                "index": tile.index,
                "x": tile.x,
                "y": tile.y,
                "placement": plan.placement(&tile),
            })
        })
        .collect();
    serde_json::json!({
        "edge_policy": settings.edge_policy,
        "plan": plan,
        "tile_count": plan.tile_count(),
        "tiles": tiles,
    })
}

fn format_duration(secs: f64) -> String {
    let total = secs.round() as u64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

fn progress_line(progress: &TileProgress) -> String {
    let done = progress.completed();
    let total = progress.total.max(1);
    let fraction = (done as f64 / total as f64).clamp(0.0, 1.0);
    let filled = (fraction * PROGRESS_BAR_WIDTH as f64).round() as usize;
    let bar = "█".repeat(filled) + &"░".repeat(PROGRESS_BAR_WIDTH.saturating_sub(filled));

    let elapsed = progress.elapsed.as_secs_f64();
    let per_tile = elapsed / done.max(1) as f64;
    let eta = if done < total {
        format!(" | ETA: {}", format_duration(per_tile * (total - done) as f64))
    } else {
        String::new()
    };

    format!(
        "[{bar}] {:5.1}% | Tile {done}/{total} | {:.0} ms/tile | Elapsed: {}{eta}",
        fraction * 100.0,
        progress.inference.as_secs_f64() * 1000.0,
        format_duration(elapsed),
    )
}

fn make_progress_callback() -> ProgressCallback {
    Box::new(|progress: &TileProgress| {
        eprint!("\r{}    ", progress_line(progress));
    })
}
