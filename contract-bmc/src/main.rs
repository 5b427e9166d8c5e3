//! contract-bmc CLI

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use contract_bmc::config::{CliOverrides, Settings};
use contract_bmc::error::report_error;
use contract_bmc::preprocessor;
use contract_bmc::runner::Interrupt;
use contract_bmc::verify::{Translation, Verifier};

/// Conventional status for a run ended by SIGINT
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(
    name = "contract-bmc",
    version,
    about = "Check JML method contracts with a bounded model checker"
)]
struct Cli {
    /// Java source file with JML contracts
    file: PathBuf,

    /// Only verify methods whose descriptor contains `.METHOD`
    method: Option<String>,

    /// Per-method timeout in milliseconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Unwind bound for methods without @Unwind
    #[arg(long)]
    unwind: Option<u32>,

    /// Model checker executable
    #[arg(long)]
    backend: Option<PathBuf>,

    /// Extra backend flags (repeatable, may hold several flags)
    #[arg(long = "backend-arg", allow_hyphen_values = true)]
    backend_args: Vec<String>,

    /// Extra compiler classpath entry (repeatable)
    #[arg(long)]
    classpath: Vec<PathBuf>,

    /// Keep the staging directory with the translation
    #[arg(long)]
    keep_translation: bool,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log the raw backend output of every run
    #[arg(long)]
    all_output: bool,

    /// Succeed when every target matches its @Verifyable/@Fails annotation
    #[arg(long)]
    check_expectations: bool,

    /// Print the translated program and exit
    #[arg(long)]
    emit_only: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // before any work, so Ctrl-C always unwinds through cleanup
    let interrupt = Interrupt::install();

    match run(cli, interrupt.clone()).await {
        Ok(_) if interrupt.is_set() => ExitCode::from(EXIT_INTERRUPTED),
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli, interrupt: Interrupt) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let settings = Settings::load(cli.config.as_deref())?.merge_cli(CliOverrides {
        backend: cli.backend,
        timeout_ms: cli.timeout,
        unwind: cli.unwind,
        backend_args: cli.backend_args,
        classpath: cli.classpath,
        keep_translation: cli.keep_translation,
    });

    let source = std::fs::read_to_string(&cli.file)?;
    let filename = cli.file.display().to_string();

    let translation = match Translation::new(&filename, &source) {
        Ok(translation) => translation,
        Err(e) => {
            // spans point into the preprocessed text
            let text = preprocessor::preprocess(&source).unwrap_or(source);
            report_error(&filename, &text, &e);
            return Ok(ExitCode::from(2));
        }
    };

    for outcome in translation.encoded.failures() {
        if let Some(error) = &outcome.error {
            warn!(method = %outcome.method, class = %outcome.class, "method not translated");
            report_error(&filename, &translation.preprocessed, error);
        }
    }

    if cli.emit_only {
        print!("{}", translation.emitted.source);
        return Ok(ExitCode::SUCCESS);
    }

    let targets = translation.select(cli.method.as_deref());
    if targets.is_empty() {
        let available: Vec<_> = translation.targets.iter().map(|t| t.descriptor.as_str()).collect();
        match &cli.method {
            Some(method) => warn!(method = %method, ?available, "no matching function in file"),
            None => warn!("no methods to verify"),
        }
        return Ok(ExitCode::from(1));
    }
    info!(count = targets.len(), file = %filename, "verifying");

    let report = Verifier::new(settings)
        .with_echo_output(cli.all_output)
        .with_interrupt(interrupt)
        .verify(&cli.file, &translation, &targets)
        .await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }

    let passed = if cli.check_expectations {
        report.all_match_expectations()
    } else {
        report.all_verified()
    };
    Ok(if passed { ExitCode::SUCCESS } else { ExitCode::from(1) })
}
