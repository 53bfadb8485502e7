//! Nanobake CLI - asynchronous image generation from the terminal

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use nanobake_core::config::Config;
use nanobake_core::health::HealthStatus;
use nanobake_core::prelude::*;
use serde_json::json;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "nanobake")]
#[command(author, version, about = "Asynchronous image generation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate images and wait for them
    Generate {
        /// One job is submitted per prompt
        #[arg(required = true)]
        prompts: Vec<String>,
        /// Model selector (fast or pro)
        #[arg(short, long, default_value = "pro")]
        model: String,
        /// Output size for the pro model (1K, 2K, 4K)
        #[arg(short, long)]
        size: Option<String>,
        /// Aspect ratio such as 16:9
        #[arg(short, long)]
        aspect_ratio: Option<String>,
        /// Reference image file (repeatable)
        #[arg(short, long = "reference")]
        references: Vec<PathBuf>,
        /// Directory images are written to
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        poll_ms: u64,
    },

    /// Manage the provider API key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Health,
}

#[derive(Subcommand)]
enum KeyAction {
    /// Store a new API key
    Set { secret: String },
    /// Show whether a key is configured
    Check,
    /// Test a key against the primary endpoint (defaults to the stored key)
    Verify { secret: Option<String> },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration
    List,
    /// Reset to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() {
    // A missing .env is normal
    let _ = dotenvy::dotenv();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "nanobake=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        std::process::exit(report_error(&e));
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Generate {
            prompts,
            model,
            size,
            aspect_ratio,
            references,
            output,
            poll_ms,
        } => {
            let options = GenerateOptions {
                model: ModelChoice::from_selector(&model),
                size: parse_size(size.as_deref())?,
                aspect_ratio,
                references,
                output,
                poll_interval: Duration::from_millis(poll_ms.max(1)),
            };
            cmd_generate(prompts, options, cli.format, cli.quiet).await
        }

        Commands::Key { action } => cmd_key(action, cli.format, cli.quiet).await,

        Commands::Config { action } => cmd_config(action, cli.format, cli.quiet),

        Commands::Health => cmd_health(cli.format, cli.quiet),
    }
}

/// Exit status for rejected input; matches clap's usage errors
const EXIT_USAGE: i32 = 2;

/// Print `error` and return the process exit status
fn report_error(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<Error>() {
        Some(core) => {
            eprintln!("Error [{}]: {}", core.code(), core);
            if let Some(suggestion) = core.suggestion() {
                eprintln!("  Try: {}", suggestion);
            }
            if core.is_validation() { EXIT_USAGE } else { 1 }
        }
        None => {
            eprintln!("Error: {:#}", error);
            1
        }
    }
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_service() -> anyhow::Result<ImageService> {
    let config = Config::load()?;
    Ok(ImageService::from_config(config)?)
}

// ============================================================================
// Command Implementations
// ============================================================================

struct GenerateOptions {
    model: ModelChoice,
    size: Option<SizeHint>,
    aspect_ratio: Option<String>,
    references: Vec<PathBuf>,
    output: PathBuf,
    poll_interval: Duration,
}

fn parse_size(size: Option<&str>) -> anyhow::Result<Option<SizeHint>> {
    size.map(|s| {
        SizeHint::parse(s).ok_or_else(|| anyhow!("Invalid size '{}': expected 1K, 2K or 4K", s))
    })
    .transpose()
}

async fn cmd_generate(
    prompts: Vec<String>,
    options: GenerateOptions,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let service = build_service()?;
    let chatty = format == OutputFormat::Text && !quiet;

    let references = options
        .references
        .iter()
        .map(|path| ReferenceImage::from_file(path))
        .collect::<Result<Vec<_>>>()?;

    let mut submitted = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        let mut request = GenerationRequest::new(prompt).with_model(options.model);
        for reference in &references {
            request = request.with_reference(reference.clone());
        }
        if let Some(size) = options.size {
            request = request.with_size(size);
        }
        if let Some(ratio) = &options.aspect_ratio {
            request = request.with_aspect_ratio(ratio.clone());
        }

        let job = service.submit(request).await?;
        if chatty {
            println!("Submitted job {} ({})", job.id, job.model);
        }
        submitted.push(job);
    }

    let mut finished = Vec::with_capacity(submitted.len());
    for job in &submitted {
        let mut shown = 0u8;
        let done = service
            .wait_with(job.id, options.poll_interval, |snapshot| {
                if chatty && snapshot.progress > shown {
                    shown = snapshot.progress;
                    eprintln!("  {} {:>3}%", job.id, shown);
                }
            })
            .await?;
        finished.push(done);
    }

    let mut results = Vec::with_capacity(finished.len());
    let mut failures = 0;
    for job in &finished {
        match (&job.status, &job.result) {
            (JobStatus::Completed, Some(image)) => {
                let path = write_image(&options.output, job, image)?;
                if chatty {
                    println!("[OK] {} -> {}", job.id, path.display());
                    if let Some(thinking) = &job.thinking {
                        println!("     {}", thinking);
                    }
                }
                results.push(json!({
                    "id": job.id,
                    "status": job.status,
                    "model": job.model,
                    "path": path,
                    "thinking": job.thinking,
                }));
            }
            _ => {
                failures += 1;
                let error = job.error.clone().unwrap_or_default();
                warn!(job_id = %job.id, error = %error, "Job failed");
                if format == OutputFormat::Text && !quiet {
                    println!("[!!] {} failed: {}", job.id, error);
                }
                results.push(json!({
                    "id": job.id,
                    "status": job.status,
                    "model": job.model,
                    "progress": job.progress,
                    "error": job.error,
                }));
            }
        }
    }

    if format == OutputFormat::Json {
        print_json(&json!({
            "jobs": results,
            "recent": service.list(finished.len()).await?,
        }))?;
    }

    if failures > 0 {
        return Err(anyhow!("{} of {} jobs failed", failures, finished.len()));
    }
    Ok(())
}

fn write_image(dir: &Path, job: &Job, image: &GeneratedImage) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

    let path = dir.join(format!("{}.{}", job.id, image.extension()));
    let bytes = image.decode()?;
    fs::write(&path, &bytes)
        .with_context(|| format!("Failed to write image: {}", path.display()))?;

    debug!(job_id = %job.id, path = %path.display(), bytes = bytes.len(), "Image written");
    Ok(path)
}

async fn cmd_key(action: KeyAction, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let service = build_service()?;

    match action {
        KeyAction::Set { secret } => {
            let status = service.set_credential(&secret)?;
            match format {
                OutputFormat::Json => print_json(&serde_json::to_value(&status)?)?,
                OutputFormat::Text if !quiet => println!("API key saved ({})", status.masked_key),
                OutputFormat::Text => {}
            }
        }
        KeyAction::Check => {
            let status = service.check_credential();
            match format {
                OutputFormat::Json => print_json(&serde_json::to_value(&status)?)?,
                OutputFormat::Text if status.has_key => {
                    println!("[OK] API key: Configured ({})", status.masked_key)
                }
                OutputFormat::Text => {
                    println!("[!!] API key: Not configured");
                    if !quiet {
                        println!("     Run `nanobake key set <key>` or set NANOBAKE_API_KEY");
                    }
                }
            }
        }
        KeyAction::Verify { secret } => {
            let check = service.verify_credential(secret.as_deref()).await;
            match format {
                OutputFormat::Json => print_json(&serde_json::to_value(&check)?)?,
                OutputFormat::Text if check.valid => println!("[OK] {}", check.message),
                OutputFormat::Text => println!("[!!] {}", check.message),
            }
            if !check.valid {
                return Err(anyhow!("API key verification failed"));
            }
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            match format {
                OutputFormat::Json => print_json(&json!({ "key": key, "value": value }))?,
                OutputFormat::Text => println!("{}", value),
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet && format == OutputFormat::Text {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            match format {
                OutputFormat::Json => {
                    let map: serde_json::Map<String, serde_json::Value> = items
                        .into_iter()
                        .map(|(k, v)| (k, serde_json::Value::String(v)))
                        .collect();
                    print_json(&serde_json::Value::Object(map))?;
                }
                OutputFormat::Text => {
                    for (key, value) in items {
                        println!("{} = {}", key, value);
                    }
                }
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet && format == OutputFormat::Text {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

fn cmd_health(format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let service = build_service()?;
    let report = service.health();

    match format {
        OutputFormat::Json => print_json(&serde_json::to_value(&report)?)?,
        OutputFormat::Text => {
            if !quiet {
                println!("Nanobake Health Check");
                println!("=====================");
                println!();
            }
            for check in &report.checks {
                match &check.message {
                    Some(message) => {
                        println!("{} {}: {}", check.status.marker(), check.name, message)
                    }
                    None => println!("{} {}", check.status.marker(), check.name),
                }
            }
            if !quiet {
                println!();
                match report.overall_status {
                    HealthStatus::Ok => println!("All checks passed."),
                    _ => println!("Some checks need attention."),
                }
            }
        }
    }

    if report.overall_status == HealthStatus::Error {
        return Err(anyhow!("Health check failed"));
    }
    Ok(())
}
