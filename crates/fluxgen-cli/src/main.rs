use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fluxgen_contracts::models::ModelCatalog;
use fluxgen_contracts::GenerationForm;
use fluxgen_engine::{
    api_token_from_env, random_seed, read_embedded_metadata, EngineConfig, GenerationOutcome,
    Generator,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fluxgen", version, about = "Flux image generation on Replicate")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate one or more images.
    Generate(GenerateArgs),
    /// List the known Flux models.
    Models,
    /// Print the generation parameters embedded in a saved PNG.
    Inspect(InspectArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    seed: Option<i64>,
    /// Keep the seed between runs instead of drawing a new one.
    #[arg(long)]
    fixed_seed: bool,
    #[arg(long)]
    steps: Option<i64>,
    #[arg(long)]
    guidance: Option<f64>,
    #[arg(long)]
    aspect_ratio: Option<String>,
    #[arg(long)]
    width: Option<i64>,
    #[arg(long)]
    height: Option<i64>,
    #[arg(long)]
    safety_tolerance: Option<i64>,
    #[arg(long)]
    interval: Option<f64>,
    /// `--raw` or `--raw=false`.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    raw: Option<bool>,
    #[arg(long)]
    output_format: Option<String>,
    #[arg(long)]
    output_quality: Option<i64>,
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    prompt_upsampling: Option<bool>,
    /// JSON file with form fields; flags override its values.
    #[arg(long)]
    form: Option<PathBuf>,
    #[arg(long)]
    api_token: Option<String>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long, default_value_t = 1)]
    repeat: u32,
    /// Print the status as an HTML span.
    #[arg(long)]
    html: bool,
}

#[derive(Debug, Parser)]
struct InspectArgs {
    path: PathBuf,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("fluxgen error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Models => {
            print_models(&ModelCatalog::default());
            Ok(0)
        }
        Command::Inspect(args) => run_inspect(&args.path),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    if args.repeat == 0 {
        bail!("--repeat must be at least 1");
    }
    let mut config = EngineConfig::from_env();
    if let Some(dir) = &args.output_dir {
        config = config.with_output_dir(dir.clone());
    }
    if let Some(base) = &args.api_base {
        config = config.with_api_base(base.as_str());
    }
    let api_token = args
        .api_token
        .clone()
        .or_else(api_token_from_env)
        .unwrap_or_default();

    let base = match &args.form {
        Some(path) => read_form(path)?,
        None => GenerationForm::default(),
    };
    let seeded_by_file = args.form.is_some();
    let mut form = apply_overrides(base, &args);
    if args.seed.is_none() && !seeded_by_file {
        form.seed = random_seed();
    }

    let generator = Generator::from_config(&config)?;
    let mut failures = 0;
    for round in 1..=args.repeat {
        if args.repeat > 1 {
            tracing::info!(round, total = args.repeat, seed = form.seed, "starting run");
        }
        let outcome = generator.generate_image(&api_token, &form);
        if !outcome.is_success() {
            failures += 1;
        }
        print_outcome(&outcome, args.html);
        form.seed = outcome.next_seed;
    }
    Ok(if failures == 0 { 0 } else { 1 })
}

fn read_form(path: &Path) -> Result<GenerationForm> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading form {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("form {} is not valid JSON", path.display()))?;
    GenerationForm::from_json(value).with_context(|| format!("invalid form {}", path.display()))
}

fn apply_overrides(mut form: GenerationForm, args: &GenerateArgs) -> GenerationForm {
    if let Some(prompt) = &args.prompt {
        form.prompt = prompt.clone();
    }
    if let Some(model) = &args.model {
        form.model = model.clone();
    }
    if let Some(seed) = args.seed {
        form.seed = seed;
    }
    if args.fixed_seed {
        form.randomize = false;
    }
    if let Some(steps) = args.steps {
        form.steps = steps;
    }
    if let Some(guidance) = args.guidance {
        form.guidance = guidance;
    }
    if let Some(aspect_ratio) = &args.aspect_ratio {
        form.aspect_ratio = aspect_ratio.clone();
    }
    if let Some(width) = args.width {
        form.width = width;
    }
    if let Some(height) = args.height {
        form.height = height;
    }
    if let Some(safety_tolerance) = args.safety_tolerance {
        form.safety_tolerance = safety_tolerance;
    }
    if let Some(interval) = args.interval {
        form.interval = interval;
    }
    if let Some(raw) = args.raw {
        form.raw = raw;
        form.invalid_raw = None;
    }
    if let Some(output_format) = &args.output_format {
        form.output_format = output_format.clone();
    }
    if let Some(output_quality) = args.output_quality {
        form.output_quality = output_quality;
    }
    if let Some(prompt_upsampling) = args.prompt_upsampling {
        form.prompt_upsampling = prompt_upsampling;
    }
    form
}

fn print_outcome(outcome: &GenerationOutcome, html: bool) {
    if html {
        println!("{}", outcome.status.to_html());
    } else {
        println!("{}", outcome.status);
    }
    if let Some(path) = outcome.artifact_path() {
        println!("path: {}", path.display());
    }
    println!("next seed: {}", outcome.next_seed);
}

fn print_models(catalog: &ModelCatalog) {
    for spec in catalog.list() {
        let marker = if spec.name == catalog.default_model() {
            "*"
        } else {
            " "
        };
        let raw = if spec.supports_raw { " (raw)" } else { "" };
        println!("{marker} {:<40} {}{raw}", spec.name, spec.label);
    }
}

fn run_inspect(path: &Path) -> Result<i32> {
    match read_embedded_metadata(path)? {
        Some(metadata) => {
            let pretty = serde_json::to_string_pretty(&metadata)
                .context("failed to format metadata")?;
            println!("{pretty}");
            Ok(0)
        }
        None => {
            eprintln!("no generation parameters found in {}", path.display());
            Ok(1)
        }
    }
}
