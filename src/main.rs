use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lab_bundle::config::{self, AppConfig};
use lab_bundle::{Bundle, LabPipeline, PipelineOutcome};

/// Exit status when the record held no numeric lab value.
const EXIT_NO_OBSERVATIONS: u8 = 2;

#[derive(Parser)]
#[command(
    name = "lab-bundle",
    about = "Turn a scanned lab report into a FHIR R4 collection bundle",
    version,
    arg_required_else_help = true
)]
struct Cli {
    /// Config file (JSON). Defaults to $LAB_BUNDLE_CONFIG, then the per-user config.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Pretty-print the bundle JSON.
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// OCR the document, structure it with the language model and encode it.
    Extract {
        /// Scanned report; overrides the configured document.
        #[arg(short, long, value_name = "PATH")]
        document: Option<PathBuf>,
    },

    /// Encode language-model output that was obtained elsewhere.
    Encode {
        /// File holding the model output (or "-" for stdin).
        #[arg(default_value = "-")]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    tokio::select! {
        result = run(cli) => match result {
            Ok(code) => code,
            Err(e) => {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        },
        Ok(()) = tokio::signal::ctrl_c() => {
            // Dropping the run future kills any tool still running.
            tracing::warn!("Interrupted, pipeline cancelled");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut app_config = AppConfig::load(cli.config.as_deref())?;
    tracing::debug!(version = config::APP_VERSION, "{} starting", config::APP_NAME);

    let outcome = match cli.command {
        Commands::Extract { document } => {
            if let Some(document) = document {
                app_config.document_path = Some(document);
            }
            let pipeline = LabPipeline::new(app_config).context("Failed to load prompt")?;
            pipeline.extract_and_encode().await?
        }
        Commands::Encode { input } => {
            let raw = read_input(&input)?;
            let pipeline = LabPipeline::new(app_config).context("Failed to load prompt")?;
            pipeline.encode(&raw)?
        }
    };

    match outcome {
        PipelineOutcome::Bundle(bundle) => {
            write_bundle(&bundle, cli.pretty)?;
            Ok(ExitCode::SUCCESS)
        }
        PipelineOutcome::NoObservations => {
            eprintln!("No numeric lab values found; no bundle produced.");
            Ok(ExitCode::from(EXIT_NO_OBSERVATIONS))
        }
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read model output from stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read model output '{}'", path.display()))
}

fn write_bundle(bundle: &Bundle, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(bundle)?
    } else {
        serde_json::to_string(bundle)?
    };
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{json}").context("Failed to write bundle")?;
    Ok(())
}
