use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceswap_core::{AvailabilityProbe, Orchestrator, ToolConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "faceswap", about = "FaceSwap CLI for the external face swap tool")]
struct Cli {
    /// TOML config file; FACEFUSION_* environment variables are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Swap the face from SOURCE onto TARGET and print the output path
    Swap {
        /// Image providing the face
        #[arg(short, long)]
        source: PathBuf,
        /// Image whose face is replaced
        #[arg(short, long)]
        target: PathBuf,
    },
    /// Check that the tool is installed and responsive
    Check,
    /// Print the resolved tool configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Arc::new(load_config(cli.config.as_deref())?);

    match cli.command {
        Commands::Swap { source, target } => {
            let orchestrator = Orchestrator::new(config);
            match orchestrator.swap_faces(&source, &target).await {
                Ok(result) => {
                    println!("{}", result.output_path.display());
                }
                Err(err) => {
                    eprintln!("error [{}]: {err}", err.kind().as_str());
                    if let Some(stderr) = err.diagnostics().filter(|s| !s.trim().is_empty()) {
                        eprintln!("--- tool stderr ---\n{}", stderr.trim_end());
                    }
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Commands::Check => {
            let report = AvailabilityProbe::new(config).diagnose().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.available {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Config => {
            print!("{}", toml::to_string(config.as_ref())?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// `RUST_LOG` directives when set and valid, otherwise `info`.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn load_config(path: Option<&std::path::Path>) -> Result<ToolConfig> {
    match path {
        Some(path) => ToolConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => ToolConfig::from_env().context("invalid FACEFUSION_* environment"),
    }
}
