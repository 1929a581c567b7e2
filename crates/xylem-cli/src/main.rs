//! Xylem CLI - translate portable pipelines into streaming graphs

mod config;
mod logging;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use config::Config;
use std::path::{Path, PathBuf};
use xylem::coder::urn as coder_urn;
use xylem::{
    Pipeline, PipelineOptions, PipelineTranslator, SerdeFormat, SourceRegistry, StreamNode,
    TranslationContext, Translator,
};

#[derive(Parser)]
#[command(name = "xylem")]
#[command(about = "Translate portable pipelines into streaming graphs", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/xylem/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported transforms, sources and coders
    List,

    /// Translate a pipeline and print the resulting stream graph
    Translate {
        #[command(flatten)]
        args: TranslateArgs,
    },

    /// Translate a pipeline, run it and print every record
    Run {
        #[command(flatten)]
        args: TranslateArgs,

        /// Only run this collection
        #[arg(long)]
        collection: Option<String>,
    },
}

#[derive(Args)]
struct TranslateArgs {
    /// Pipeline file (YAML, TOML, or JSON)
    pipeline: PathBuf,

    /// Pipeline options file (TOML, YAML, or JSON)
    #[arg(long)]
    options: Option<PathBuf>,

    /// Shape outputs with wire coders
    #[arg(long)]
    portable: bool,

    /// Default parallelism of the environment
    #[arg(long)]
    parallelism: Option<usize>,

    /// Maximum parallelism of the environment (0 = unset)
    #[arg(long)]
    max_parallelism: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref());
    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.defaults.log_level.clone());
    logging::init(&log_level);

    match cli.command {
        Commands::List => cmd_list(),
        Commands::Translate { args } => cmd_translate(&config, &args),
        Commands::Run { args, collection } => cmd_run(&config, &args, collection.as_deref()),
    }
}

fn cmd_list() -> Result<()> {
    println!("Transforms:");
    for urn in Translator::urns() {
        println!("  {}", urn);
    }

    println!();
    println!("Sources:");
    for urn in SourceRegistry::with_builtins().urns() {
        println!("  {}", urn);
    }

    println!();
    println!("Coders:");
    for urn in [
        coder_urn::BYTES,
        coder_urn::STRING_UTF8,
        coder_urn::VARINT,
        coder_urn::DOUBLE,
        coder_urn::BOOL,
        coder_urn::KV,
        coder_urn::ITERABLE,
        coder_urn::LENGTH_PREFIX,
        coder_urn::GLOBAL_WINDOW,
        coder_urn::INTERVAL_WINDOW,
    ] {
        println!("  {}", urn);
    }
    let formats: Vec<_> = [SerdeFormat::Json, SerdeFormat::Msgpack, SerdeFormat::Cbor]
        .iter()
        .map(|f| f.name())
        .collect();
    println!("  {} ({})", coder_urn::SERDE, formats.join(", "));

    Ok(())
}

fn cmd_translate(config: &Config, args: &TranslateArgs) -> Result<()> {
    let (pipeline, context) = translate(config, args)?;

    let env = context.execution_environment();
    println!("Pipeline: {}", args.pipeline.display());
    println!("Job: {}", context.pipeline_options().job_name);
    println!("Mode: {}", context.mode());
    println!(
        "Parallelism: {} (max {})",
        env.parallelism(),
        env.max_parallelism()
    );
    println!();

    println!("Stream graph:");
    for node in env.graph().nodes() {
        print_node(node);
    }
    println!();

    println!("Collections:");
    for (id, stream) in context.streams() {
        let name = pipeline
            .components
            .pcollections
            .get(id)
            .map(|p| p.unique_name.as_str())
            .unwrap_or_default();
        println!(
            "  {} {} -> [{}] {}",
            id,
            name,
            stream.node_id(),
            stream.type_info()
        );
    }

    Ok(())
}

fn print_node(node: &StreamNode) {
    let kind = match node.input() {
        Some(input) => format!("map <- [{}]", input),
        None => "source".to_string(),
    };
    println!("  [{}] {} ({})", node.id, node.name, kind);
    if let Some(uid) = &node.uid {
        println!("      uid: {}", uid);
    }
    println!("      parallelism: {}", node.parallelism);
    println!("      type: {}", node.type_info);
    if let Some(watermarks) = node.watermarks() {
        println!("      watermarks: {:?}", watermarks);
    }
}

fn cmd_run(config: &Config, args: &TranslateArgs, only: Option<&str>) -> Result<()> {
    let (_, context) = translate(config, args)?;

    if let Some(id) = only {
        if context.stream(id).is_none() {
            bail!("Pipeline has no collection '{}'", id);
        }
    }

    for (id, _) in context.streams() {
        if only.is_some_and(|o| o != id) {
            continue;
        }

        let result = context
            .execute(id)
            .with_context(|| format!("Failed to run collection '{}'", id))?;

        println!(
            "{}: {} records ({} splits, {} readers)",
            id, result.stats.records, result.stats.splits, result.stats.readers
        );
        for envelope in &result.envelopes {
            let line = serde_json::to_string(envelope).context("Failed to render record")?;
            println!("  {}", line);
        }
        tracing::info!(collection = id, duration = ?result.stats.duration, "collection finished");
    }

    Ok(())
}

fn translate(config: &Config, args: &TranslateArgs) -> Result<(Pipeline, TranslationContext)> {
    let pipeline = load_pipeline(&args.pipeline)?;
    let options = load_options(config, args)?;

    let mut context = TranslationContext::from_options(options);
    PipelineTranslator::default()
        .translate(&pipeline, &mut context)
        .with_context(|| format!("Failed to translate {}", args.pipeline.display()))?;

    Ok((pipeline, context))
}

fn load_pipeline(path: &Path) -> Result<Pipeline> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
    Pipeline::from_bytes(&data, path.to_str())
        .with_context(|| format!("Failed to parse pipeline file {}", path.display()))
}

/// Options from the options file (or config defaults), then flags on top.
fn load_options(config: &Config, args: &TranslateArgs) -> Result<PipelineOptions> {
    let mut options = match &args.options {
        Some(path) => {
            let data = std::fs::read(path)
                .with_context(|| format!("Failed to read options file {}", path.display()))?;
            PipelineOptions::from_bytes(&data, path.to_str())
                .with_context(|| format!("Failed to parse options file {}", path.display()))?
        }
        None => PipelineOptions {
            portable: config.defaults.portable,
            parallelism: config.defaults.parallelism,
            max_parallelism: config.defaults.max_parallelism,
            ..PipelineOptions::default()
        },
    };

    for (key, value) in &config.options {
        options
            .extra
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }

    if args.portable {
        options.portable = true;
    }
    if let Some(parallelism) = args.parallelism {
        options.parallelism = Some(parallelism);
    }
    if let Some(max_parallelism) = args.max_parallelism {
        options.max_parallelism = Some(max_parallelism);
    }

    options.validate().context("Invalid pipeline options")?;
    Ok(options)
}
