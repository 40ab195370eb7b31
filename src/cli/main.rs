//! Batch background removal CLI
//!
//! Loads the model from the registry, runs every input through the batch
//! processor and writes each finished image as `<output>/<stem>.png`.

use super::config::CliConfigBuilder;
use crate::{
    backends::list_all_providers,
    cache::{format_size, ModelCache, CACHE_DIR_ENV},
    capability::{CapabilityProbe, SystemCapabilityProbe},
    compositing::decode_data_url,
    config::Precision,
    loader::RegistryLoader,
    processor::BatchImageProcessor,
    provider::{LoadingProgress, ModelProvider},
    services::{
        BatchProcessingStats, ConsoleProgressReporter, ProcessingStage, ProgressReporter,
        ProgressUpdate,
    },
    tracing_config::init_cli_tracing,
    types::{InputFile, ProcessingTimings, RecordStatus},
};
use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "webp", "bmp", "tiff", "tif"];

/// Remove image backgrounds in batch with a locally executed segmentation model
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "rmbg-batch")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image files or directories
    #[arg(
        value_name = "INPUT",
        required_unless_present_any = ["show_providers", "show_cache_dir", "list_models", "clear_cache"]
    )]
    pub input: Vec<PathBuf>,

    /// Output directory for transparent PNGs
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub output: PathBuf,

    /// Registry model id (owner/name) [default: briaai/RMBG-1.4]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Never request GPU-accelerated execution
    #[arg(long)]
    pub no_gpu: bool,

    /// Weight precision on the GPU path (default = quantized, high = fp32)
    #[arg(long, default_value_t = Precision::High)]
    pub precision: Precision,

    /// Number of images processed concurrently
    #[arg(short, long, default_value_t = 1)]
    pub concurrency: usize,

    /// Report exact PNG sizes instead of the data URL estimate
    #[arg(long)]
    pub exact_size: bool,

    /// Disable progress bars
    #[arg(long)]
    pub no_progress: bool,

    /// Number of inference threads (0 = runtime default)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Model registry base URL
    #[arg(long, value_name = "URL")]
    pub registry_url: Option<String>,

    /// Custom cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Expected SHA-256 digest of the model weights
    #[arg(long, value_name = "HEX")]
    pub weights_sha256: Option<String>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Process directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// File name pattern for directory inputs (e.g. "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// Show the cache directory and exit
    #[arg(long)]
    pub show_cache_dir: bool,

    /// List cached models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Clear cached models (combine with --model to clear one) and exit
    #[arg(long)]
    pub clear_cache: bool,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_cli_tracing(cli.verbose, cli.json_logs).context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics().await;
        return Ok(());
    }
    if cli.show_cache_dir {
        return show_cache_dir(&cli);
    }
    if cli.list_models {
        return list_cached_models(&cli);
    }
    if cli.clear_cache {
        return clear_cache_models(&cli);
    }

    let provider_config = CliConfigBuilder::provider_config(&cli)?;
    let batch_config = CliConfigBuilder::batch_config(&cli)?;

    let paths = collect_inputs(&cli)?;
    if paths.is_empty() {
        anyhow::bail!("No image files found in the given inputs");
    }
    std::fs::create_dir_all(&cli.output).with_context(|| {
        format!("Failed to create output directory {}", cli.output.display())
    })?;

    info!("Model: {}", provider_config.model_id);
    let loader = RegistryLoader::from_config(&provider_config)
        .context("Failed to set up the model registry client")?;
    let provider = Arc::new(ModelProvider::new(
        provider_config,
        Arc::new(loader),
        Arc::new(SystemCapabilityProbe),
    )?);

    load_model(&provider, !cli.no_progress).await?;

    let mut inputs = Vec::with_capacity(paths.len());
    for path in &paths {
        match InputFile::from_path(path).await {
            Ok(file) => inputs.push(file),
            Err(e) => warn!("Skipping {}: {e}", path.display()),
        }
    }

    let reporter: Arc<dyn ProgressReporter> = if cli.no_progress {
        Arc::new(ConsoleProgressReporter::new(cli.verbose > 0))
    } else {
        Arc::new(BarReporter::new(inputs.len()))
    };
    let processor = BatchImageProcessor::new(Arc::clone(&provider), batch_config)?
        .with_reporter(Arc::clone(&reporter));

    let summary = processor.process_images(inputs).await;

    let mut written = 0_usize;
    let mut used_names = HashSet::new();
    for index in summary.indices() {
        let Some(record) = processor.record(index) else {
            continue;
        };
        if record.status != RecordStatus::Done {
            error!("Failed to process {}", record.filename);
            continue;
        }

        let output_path = output_path(&cli.output, &record.filename, &mut used_names);
        let png = decode_data_url(&record.download_url)
            .with_context(|| format!("Invalid output for {}", record.filename))?;
        tokio::fs::write(&output_path, &png)
            .await
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        debug!(
            "{} -> {} ({} -> ~{}, {}ms)",
            record.filename,
            output_path.display(),
            format_size(record.original_size),
            format_size(record.converted_size),
            record.duration
        );
        written += 1;
    }

    println!(
        "✅ Processed {} image(s): {} succeeded, {} failed in {:.1}s",
        summary.total,
        summary.succeeded,
        summary.failed,
        summary.elapsed_ms as f64 / 1000.0
    );
    println!("   {written} file(s) written to {}", cli.output.display());
    Ok(())
}

/// Wait for the model, rendering loading progress
async fn load_model(provider: &ModelProvider, show_progress: bool) -> Result<()> {
    provider.initialize()?;

    let bars = show_progress.then(LoadingBars::new);
    let updater = bars.clone().map(|bars| {
        let mut progress = provider.subscribe_progress();
        tokio::spawn(async move {
            loop {
                bars.update(&progress.borrow_and_update());
                if progress.changed().await.is_err() {
                    break;
                }
            }
        })
    });

    let result = provider.wait_ready().await;

    if let Some(updater) = updater {
        updater.abort();
    }
    if let Some(bars) = bars {
        bars.update(&provider.progress());
        bars.finish(result.is_ok());
    }

    let handle = result.context("Model failed to load")?;
    info!(
        "Model ready ({}, {} precision)",
        handle.options().device,
        handle.options().precision
    );
    Ok(())
}

/// Model and processor loading bars
#[derive(Clone)]
struct LoadingBars {
    model: ProgressBar,
    processor: ProgressBar,
}

impl LoadingBars {
    fn new() -> Self {
        let multi = MultiProgress::new();
        let style = ProgressStyle::default_bar()
            .template("{prefix:>10} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");

        let bar = |prefix: &'static str| {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(style.clone());
            bar.set_prefix(prefix);
            bar
        };

        Self {
            model: bar("model"),
            processor: bar("processor"),
        }
    }

    fn update(&self, progress: &LoadingProgress) {
        self.model.set_position(progress.model_progress.clamp(0.0, 100.0) as u64);
        self.processor
            .set_position(progress.processor_progress.clamp(0.0, 100.0) as u64);
    }

    fn finish(&self, ready: bool) {
        let message = if ready { "ready" } else { "failed" };
        self.model.finish_with_message(message);
        self.processor.finish_with_message(message);
    }
}

/// Reporter driving a batch progress bar
struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { bar }
    }
}

impl ProgressReporter for BarReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        self.bar
            .set_message(format!("{} ({})", update.filename, update.description));
    }

    fn report_completion(&self, _filename: &str, _timings: ProcessingTimings) {}

    fn report_error(&self, filename: &str, stage: ProcessingStage, error: &str) {
        self.bar
            .println(format!("❌ {filename}: {} failed: {error}", stage.description()));
    }

    fn report_batch_progress(&self, stats: BatchProcessingStats) {
        self.bar.set_position(stats.items_completed as u64);
        if stats.items_completed >= stats.items_total {
            self.bar.finish_with_message("done");
        }
    }
}

/// Expand files and directories into a sorted, de-duplicated list of images
fn collect_inputs(cli: &Cli) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in &cli.input {
        if input.is_dir() {
            files.extend(find_image_files(input, cli.recursive, cli.pattern.as_deref())?);
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            anyhow::bail!("Input not found: {}", input.display());
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn find_image_files(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let pattern = pattern
        .map(glob::Pattern::new)
        .transpose()
        .context("Invalid --pattern")?;
    let max_depth = if recursive { usize::MAX } else { 1 };

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).max_depth(max_depth) {
        let entry = entry.with_context(|| format!("Failed to read {}", dir.display()))?;
        let path = entry.path();
        if entry.file_type().is_file()
            && is_image_file(path)
            && matches_pattern(path, pattern.as_ref())
        {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn matches_pattern(path: &Path, pattern: Option<&glob::Pattern>) -> bool {
    match pattern {
        Some(pattern) => path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| pattern.matches(name)),
        None => true,
    }
}

/// `<dir>/<stem>.png`, suffixed with a counter when the name is taken
fn output_path(dir: &Path, filename: &str, used: &mut HashSet<String>) -> PathBuf {
    let stem = Path::new(filename)
        .file_stem()
        .map_or_else(|| "image".to_string(), |s| s.to_string_lossy().into_owned());

    let mut name = format!("{stem}.png");
    let mut counter = 1;
    while !used.insert(name.clone()) {
        name = format!("{stem}-{counter}.png");
        counter += 1;
    }
    dir.join(name)
}

async fn show_provider_diagnostics() {
    println!("🔍 Execution Provider Diagnostics");

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(1);
    println!("💻 System: {cpu_count} CPU cores detected");

    println!("\n🚀 Execution Providers:");
    for provider in list_all_providers() {
        let status = if provider.available {
            "✅ Available"
        } else {
            "❌ Not Available"
        };
        println!("  • {}: {status} - {}", provider.name, provider.description);
    }

    let tier = SystemCapabilityProbe.probe().await;
    println!("\n🎯 Capability probe:");
    match (&tier.gpu, tier.fps) {
        (Some(gpu), Some(fps)) => println!("  • GPU: {gpu} (nominal {fps:.0} fps)"),
        _ => println!("  • GPU: none"),
    }
    let selection = if tier.supports_gpu() {
        "GPU-accelerated execution"
    } else {
        "default CPU backend"
    };
    println!("  • Selected: {selection}");
}

fn open_cache(cli: &Cli) -> Result<ModelCache> {
    match &cli.cache_dir {
        Some(dir) => ModelCache::with_custom_cache_dir(dir)
            .context("Failed to open cache with custom directory"),
        None => ModelCache::new().context("Failed to open model cache"),
    }
}

fn show_cache_dir(cli: &Cli) -> Result<()> {
    let cache = open_cache(cli)?;
    println!("📁 Cache directory: {}", cache.cache_dir().display());

    let source = if cli.cache_dir.is_some() {
        "--cache-dir argument".to_string()
    } else if std::env::var(CACHE_DIR_ENV).is_ok() {
        format!("{CACHE_DIR_ENV} environment variable")
    } else {
        "platform cache directory".to_string()
    };
    println!("   Source: {source}");
    Ok(())
}

fn list_cached_models(cli: &Cli) -> Result<()> {
    let cache = open_cache(cli)?;
    let models = cache
        .scan_cached_models()
        .context("Failed to list cached models")?;

    println!("📦 Cached Models");
    if models.is_empty() {
        println!("No cached models found. Models are downloaded on first use.");
        return Ok(());
    }

    for model in models {
        println!("📁 {}", model.model_id);
        println!("  └─ Location: {}", model.path.display());
        println!("  └─ Variants: {}", model.variants.join(", "));
        println!("  └─ Size: {}", format_size(model.size_bytes));
        if !model.has_preprocessor {
            println!("  └─ ⚠️  Processor configuration not cached");
        }
    }
    Ok(())
}

fn clear_cache_models(cli: &Cli) -> Result<()> {
    let cache = open_cache(cli)?;

    if let Some(model_id) = &cli.model {
        if cache
            .clear_specific_model(model_id)
            .with_context(|| format!("Failed to clear model '{model_id}'"))?
        {
            println!("✅ Removed cached model: {model_id}");
        } else {
            println!("⚠️  Model '{model_id}' not found in cache");
        }
        return Ok(());
    }

    let removed = cache.clear_all_models().context("Failed to clear cache")?;
    if removed.is_empty() {
        println!("💡 Cache was already empty");
    } else {
        println!("✅ Removed {} model(s):", removed.len());
        for model_id in &removed {
            println!("   • {model_id}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_output_path_deduplicates() {
        let mut used = HashSet::new();
        let dir = Path::new("/out");
        assert_eq!(output_path(dir, "cat.jpg", &mut used), dir.join("cat.png"));
        assert_eq!(output_path(dir, "cat.png", &mut used), dir.join("cat-1.png"));
        assert_eq!(output_path(dir, "dog.webp", &mut used), dir.join("dog.png"));
    }

    #[test]
    fn test_find_image_files() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("nested");
        std::fs::create_dir_all(&nested).unwrap();
        for name in ["a.jpg", "b.PNG", "notes.txt"] {
            std::fs::write(temp.path().join(name), b"x").unwrap();
        }
        std::fs::write(nested.join("c.png"), b"x").unwrap();

        let flat = find_image_files(temp.path(), false, None).unwrap();
        assert_eq!(flat.len(), 2);

        let deep = find_image_files(temp.path(), true, None).unwrap();
        assert_eq!(deep.len(), 3);

        let only_png = find_image_files(temp.path(), true, Some("*.png")).unwrap();
        assert_eq!(only_png, vec![nested.join("c.png")]);
    }

    #[test]
    fn test_collect_inputs_sorted() {
        let temp = TempDir::new().unwrap();
        for name in ["z.png", "m.jpg"] {
            std::fs::write(temp.path().join(name), b"x").unwrap();
        }
        let explicit = temp.path().join("z.png");
        let cli = Cli::try_parse_from([
            std::ffi::OsStr::new("rmbg-batch"),
            temp.path().as_os_str(),
            explicit.as_os_str(),
        ])
        .unwrap();

        let inputs = collect_inputs(&cli).unwrap();
        assert_eq!(inputs, vec![temp.path().join("m.jpg"), explicit]);
    }

    #[test]
    fn test_missing_input_rejected() {
        let cli = Cli::try_parse_from(["rmbg-batch", "/definitely/missing.png"]).unwrap();
        assert!(collect_inputs(&cli).is_err());
    }
}
