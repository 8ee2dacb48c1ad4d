//! CLI tool to run pipeline (.pipe) files against an input stream.
//!
//! Usage:
//!   seqpipe <pipeline.pipe> [input]
//!   seqpipe <pipeline.pipe> [input] -o <output>
//!   seqpipe --list
//!
//! Without an input file (or with `-`) the pipeline reads standard input.
//! The final sequence goes to the output file, or to stdout unless the last
//! stage already is `CONSOLE`.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::Parser;
use seqpipe::registry::OPERATORS;
use seqpipe::{Sequence, Settings, bridge, dsl};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Run a pipeline file against input data.
#[derive(Parser)]
#[command(name = "seqpipe", version)]
struct Cli {
    /// Pipeline definition file (.pipe)
    #[arg(required_unless_present = "list")]
    pipeline: Option<PathBuf>,

    /// Input file, `-` for stdin
    input: Option<PathBuf>,

    /// Write output to file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log pipeline construction and teardown on stderr
    #[arg(short, long)]
    verbose: bool,

    /// Settings file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// List the available pipeline stages and exit
    #[arg(long)]
    list: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    if cli.list {
        list_operators();
        return Ok(());
    }
    let Some(pipeline_path) = &cli.pipeline else {
        bail!("no pipeline file given");
    };

    let settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Error loading settings '{}'", path.display()))?,
        None => Settings::default(),
    };

    let pipeline_text = fs::read_to_string(pipeline_path)
        .with_context(|| format!("Error reading pipeline file '{}'", pipeline_path.display()))?;
    let stages = dsl::parse_pipeline(&pipeline_text)
        .with_context(|| format!("Error parsing '{}'", pipeline_path.display()))?;

    let input = open_input(cli.input.as_deref(), &settings)?;
    tracing::debug!(
        pipeline = %pipeline_path.display(),
        stages = stages.len(),
        output = ?cli.output,
        "running pipeline"
    );
    let result = dsl::run_pipeline(&stages, input, &settings).context("Pipeline error")?;

    match &cli.output {
        Some(out_path) => {
            if let Some(parent) = out_path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Error creating output directory for '{}'", out_path.display())
                })?;
            }
            result
                .write_file(out_path)
                .with_context(|| format!("Error writing output file '{}'", out_path.display()))?;
        }
        None if stages.last().is_some_and(|stage| stage.name() == "CONSOLE") => {
            result.for_each(|_| Ok(())).context("Pipeline error")?;
        }
        None => result.stdout().context("Error writing output")?,
    }
    Ok(())
}

fn open_input(path: Option<&Path>, settings: &Settings) -> anyhow::Result<Sequence<String>> {
    match path {
        None => Ok(bridge::read_stream(io::stdin(), &settings.read_config())),
        Some(path) if path.as_os_str() == "-" => {
            Ok(bridge::read_stream(io::stdin(), &settings.read_config()))
        }
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Error reading input file '{}'", path.display()))?;
            Ok(bridge::read_stream(file, &settings.read_config()))
        }
    }
}

fn list_operators() {
    for op in OPERATORS {
        println!("{:<12} {:<10} {:<8} {}", op.name, format!("{:?}", op.kind), op.arity.to_string(), op.summary);
    }
}
