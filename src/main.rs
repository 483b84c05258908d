use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use simplelog::{
    ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode, WriteLogger,
};

use pdfsqueeze::pipeline::{CompressionJob, MupdfCodec, ProgressEvent};
use pdfsqueeze::settings::{self, Settings, StoredConfig};

#[derive(Parser, Debug)]
#[command(
    name = "pdfsqueeze",
    version,
    about = "Compress and enhance image-heavy PDF documents"
)]
struct Cli {
    /// Input PDF to compress
    input: PathBuf,

    /// Output path; defaults to `<input stem>_compressed.pdf`
    output: Option<PathBuf>,

    /// Rasterization resolution in DPI
    #[arg(long)]
    dpi: Option<u32>,

    /// JPEG quality (1-100)
    #[arg(long)]
    quality: Option<u8>,

    /// Convert pages to grayscale
    #[arg(long)]
    grayscale: bool,

    /// Apply a 3x3 median filter before other enhancements
    #[arg(long)]
    denoise: bool,

    /// Sharpen pages
    #[arg(long)]
    sharpen: bool,

    /// Contrast factor (1.0 leaves contrast unchanged)
    #[arg(long)]
    contrast: Option<f32>,

    /// Brightness factor (1.0 leaves brightness unchanged)
    #[arg(long)]
    brightness: Option<f32>,

    /// Threshold pages to pure black and white
    #[arg(long)]
    binarize: bool,

    /// Binarization threshold (0-255); implies --binarize
    #[arg(long)]
    threshold: Option<u8>,

    /// Log file path
    #[arg(long, default_value = "pdfsqueeze.log")]
    log_file: PathBuf,

    /// Do not persist the effective settings for the next run
    #[arg(long)]
    no_save_settings: bool,
}

fn init_logging(path: &Path) -> Result<()> {
    let log_file = File::create(path)
        .with_context(|| format!("failed to create log file {}", path.display()))?;
    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Warn,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Debug, Config::default(), log_file),
    ])?;
    Ok(())
}

/// Persisted settings overridden by whatever was given on the command line.
fn effective_settings(cli: &Cli, stored: &StoredConfig) -> Settings {
    let mut settings = stored.processing.clone();

    if let Some(dpi) = cli.dpi {
        settings.dpi = dpi;
    }
    if let Some(quality) = cli.quality {
        settings.quality = quality;
    }
    if cli.grayscale {
        settings.grayscale = true;
    }
    if cli.denoise {
        settings.denoise = true;
    }
    if cli.sharpen {
        settings.sharpen = true;
    }
    if let Some(factor) = cli.contrast {
        settings.enhance_contrast = true;
        settings.contrast_factor = factor;
    }
    if let Some(factor) = cli.brightness {
        settings.enhance_brightness = true;
        settings.brightness_factor = factor;
    }
    if cli.binarize {
        settings.binarize = true;
    }
    if let Some(threshold) = cli.threshold {
        settings.binarize = true;
        settings.binarize_threshold = threshold;
    }

    settings.normalized()
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("output");
    input.with_file_name(format!("{stem}_compressed.pdf"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_file)?;

    let mut config = settings::load_config();
    let settings = effective_settings(&cli, &config);
    let output = cli.output.clone().unwrap_or_else(|| default_output(&cli.input));
    info!(
        "compressing {} -> {}",
        cli.input.display(),
        output.display()
    );

    let job = CompressionJob::spawn(
        Arc::new(MupdfCodec),
        cli.input.clone(),
        output.clone(),
        settings.clone(),
    );

    let mut failed = false;
    for event in job.events().iter() {
        match event {
            ProgressEvent::Status(message) => eprintln!("{message}"),
            ProgressEvent::Progress(percent) => eprint!("\r{percent:>3}%"),
            ProgressEvent::PagesDone(_) => {}
            ProgressEvent::Finished(path) => {
                eprintln!("\rdone: {}", path.display());
                break;
            }
            ProgressEvent::Cancelled => {
                eprintln!("\rcancelled");
                break;
            }
            ProgressEvent::Failed(message) => {
                eprintln!("\rerror: {message}");
                failed = true;
                break;
            }
        }
    }
    job.join();

    if !cli.no_save_settings {
        config.processing = settings;
        config.input_path = cli.input.display().to_string();
        config.output_path = output.display().to_string();
        if let Err(e) = settings::save_config(&config) {
            warn!("could not save settings: {e}");
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
