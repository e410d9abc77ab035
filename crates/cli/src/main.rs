use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

use mailpack_core::config::{config_path, PackConfig};
use mailpack_core::pipeline::{package, process_archive, ArchiveReport, InputKind, PackOptions, ProcessReport};
use mailpack_core::progress::{ProgressEvent, ProgressHandler};

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "mailpack")]
#[command(about = "Package an HTML email template into an optimized ZIP archive")]
#[command(version)]
struct Cli {
    /// Template (.html) to package, or archive (.zip) to extract or publish
    #[arg(required_unless_present = "print_config")]
    path: Option<PathBuf>,

    /// Extract the archive into a sibling build directory
    #[arg(short = 'e', long = "extract-zip-file")]
    extract_zip_file: bool,

    /// Publish the archive as a webletter
    #[arg(short = 'w', long = "web-version")]
    web_version: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

/// Spinner showing the current pipeline state.
struct Spinner(ProgressBar);

impl Spinner {
    fn new(hidden: bool) -> Self {
        if hidden {
            return Self(ProgressBar::hidden());
        }
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} [{pos}/{len}] {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        Self(bar)
    }

    fn finish(&self) {
        self.0.finish_and_clear();
    }
}

impl ProgressHandler for Spinner {
    fn on_progress(&self, event: ProgressEvent) {
        self.0.set_length(event.total);
        self.0.set_position(event.step + 1);
        match event.message {
            Some(detail) => self.0.set_message(format!("{} ({})", event.state.label(), detail)),
            None => self.0.set_message(event.state.label()),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mailpack=info,mailpack_core=info")),
        )
        .init();

    let result = match (&cli.path, cli.print_config) {
        (_, true) => run_print_config(cli.json),
        (Some(path), false) => run_pack(path, cli.extract_zip_file, cli.web_version, cli.json).await,
        (None, false) => Err("no input path given".into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_pack(path: &Path, extract: bool, publish: bool, json: bool) -> CliResult {
    let kind = InputKind::detect(path)?;
    let config = PackConfig::load()?;
    tracing::debug!("Config file: {:?}", config_path());
    let spinner = Spinner::new(json);

    let outcome = match kind {
        InputKind::Html => {
            let options = PackOptions { extract, publish };
            package(path, &config, &options, Some(&spinner as &dyn ProgressHandler))
                .await
                .map(Output::Package)
        }
        InputKind::Archive => process_archive(path, &config, publish, Some(&spinner as &dyn ProgressHandler))
            .await
            .map(Output::Archive),
    };
    spinner.finish();

    match outcome? {
        Output::Package(report) if json => println!("{}", serde_json::to_string_pretty(&report)?),
        Output::Archive(report) if json => println!("{}", serde_json::to_string_pretty(&report)?),
        Output::Package(report) => print_process_report(&report),
        Output::Archive(report) => print_archive_report(&report),
    }
    Ok(())
}

enum Output {
    Package(ProcessReport),
    Archive(ArchiveReport),
}

fn print_process_report(report: &ProcessReport) {
    println!(
        "HTML file size: {:.2} KB {}%",
        report.cleaned_size as f64 / 1e3,
        report.html_change_percent()
    );
    println!("Images: {}", report.image_count());
    println!("Total size: {:.2} MB", report.archive_size as f64 / 1e6);
    if !report.links.broken.is_empty() {
        println!("Broken links: {}/{}", report.links.broken.len(), report.links.checked);
    }
    if let Some(dir) = &report.extracted_to {
        println!("Extracted: {}", dir.display());
    }
    if let Some(url) = &report.webletter_url {
        println!("Webletter: {}", url);
    }
    println!("Path: {}", report.archive_path.display());
    println!("Done in {} ms", report.elapsed_ms);
}

fn print_archive_report(report: &ArchiveReport) {
    if let Some(dir) = &report.extracted_to {
        println!("Archive extracted to {}", dir.display());
    }
    if let Some(url) = &report.webletter_url {
        println!("Webletter: {}", url);
    }
}

fn run_print_config(json: bool) -> CliResult {
    let mut config = PackConfig::load()?;
    if config.webletter_token.is_some() {
        config.webletter_token = Some("********".into());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    match config_path() {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (no config directory)"),
    }
    println!("Webletter URL: {}", config.webletter_url.as_deref().unwrap_or("(unset)"));
    println!("Webletter token: {}", config.webletter_token.as_deref().unwrap_or("(unset)"));
    println!("Proxy: {}", config.proxy.as_deref().unwrap_or("(none)"));
    println!("Compression level: {}", config.compression_level);
    println!("Image size ceiling: {} bytes", config.gate_image_size);
    println!("Quality step: {}", config.quality_step);
    println!("Request timeout: {} ms", config.request_timeout_ms);
    println!("HTML file name: {}", config.html_file_name);
    println!("CSS file name: {}", config.css_file_name);
    println!("Image directory: {}", config.image_dir_name);
    println!("Extract directory: {}", config.extract_dir_name);
    println!("State file: {}", config.state_file_name);
    Ok(())
}
