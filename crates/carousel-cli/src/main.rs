//! CLI binary for generating and checking slide carousels.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use carousel_llm::{LlmClient, LoggingMiddleware, UsageTrackingMiddleware};
use carousel_pipeline::{
    load_manifest, validate_all_slides, FsArtifactWriter, LlmGenerator, PipelineConfig,
    PipelineExecutor, PipelineResult, Severity, StageModels, ValidationFinding,
};
use carousel_render::{load_slides, ChromiumRenderer, Renderer};
use carousel_types::parse_slide_file_name;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "carousel", version, about = "Topic-to-carousel generation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a carousel for a topic
    Run {
        /// The topic to research and turn into slides
        topic: String,

        /// Output directory for artifacts, slides and images
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Maximum number of review iterations (at least 1)
        #[arg(long, value_parser = parse_revisions)]
        max_revisions: Option<u32>,

        /// Use one model for every stage
        #[arg(long)]
        model: Option<String>,

        /// Stop after review without rasterizing slides
        #[arg(long)]
        no_render: bool,
    },

    /// Run the structural slide rules over saved slides
    Check {
        /// A slides directory, or individual slide_NN.html files
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Rasterize saved slides to PNG
    Render {
        /// Directory containing slide_NN.html files
        dir: PathBuf,

        /// Where images/ is written (default: the parent of DIR)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the manifest of a finished run
    Info {
        /// Run output directory containing run.json
        dir: PathBuf,
    },
}

fn parse_revisions(raw: &str) -> Result<u32, String> {
    carousel_pipeline::parse_max_revisions(raw).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            topic,
            output,
            max_revisions,
            model,
            no_render,
        } => {
            cmd_run(&topic, output, max_revisions, model, no_render).await?;
        }
        Commands::Check { paths } => {
            cmd_check(&paths).await?;
        }
        Commands::Render { dir, output } => {
            cmd_render(&dir, output).await?;
        }
        Commands::Info { dir } => {
            cmd_info(&dir).await?;
        }
    }

    Ok(())
}

async fn cmd_run(
    topic: &str,
    output: Option<PathBuf>,
    max_revisions: Option<u32>,
    model: Option<String>,
    no_render: bool,
) -> anyhow::Result<()> {
    let mut config = PipelineConfig::from_env()?;
    if let Some(dir) = output {
        config = config.with_output_dir(dir);
    }
    if let Some(n) = max_revisions {
        config = config.with_max_revisions(n)?;
    }
    if let Some(model) = model {
        config.models = StageModels::uniform(model);
    }

    let usage = UsageTrackingMiddleware::new();
    let client = LlmClient::from_env()?
        .with_middleware(LoggingMiddleware)
        .with_middleware(usage.clone());
    let generator = Arc::new(LlmGenerator::new(client, &config));

    println!("Topic: {topic}");
    println!("Output: {}", config.output_dir.display());
    println!("Max revisions: {}", config.max_revisions());

    let mut executor = PipelineExecutor::new(config.clone(), generator)
        .with_writer(Arc::new(FsArtifactWriter::new(&config.output_dir)));
    if no_render {
        println!("(rendering disabled)");
    } else {
        let renderer = ChromiumRenderer::new(&config.chrome_binary, &config.output_dir)
            .with_canvas(config.validation.canvas_width, config.validation.canvas_height);
        executor = executor.with_renderer(Arc::new(renderer));
    }

    match executor.run(topic).await {
        Ok(result) => {
            print_summary(&result);
            println!(
                "Tokens: {} in / {} out",
                usage.total_input_tokens(),
                usage.total_output_tokens()
            );
            Ok(())
        }
        Err(err) => {
            eprintln!("\nRun failed [{}]: {}", err.kind(), err);
            std::process::exit(1);
        }
    }
}

fn print_summary(result: &PipelineResult) {
    println!("\nRun {} completed", result.run_id);
    let states: Vec<String> = result.transitions.iter().map(|s| s.to_string()).collect();
    println!("States: {}", states.join(" -> "));
    println!("Review iterations: {}", result.review_iterations());
    println!("Slides: {}", result.context.slides().len());
    if !result.images.is_empty() {
        println!("Images: {}", result.images.len());
    }

    for (stage, usage) in result.context.usage() {
        println!(
            "  {:<8} {:>7} in {:>7} out",
            stage.name(),
            usage.input_tokens,
            usage.output_tokens
        );
    }

    if !result.unresolved.is_empty() {
        println!(
            "\n⚠ Revision limit reached with {} unresolved finding(s):",
            result.unresolved.len()
        );
        for finding in &result.unresolved {
            print_finding(finding);
        }
    }
}

fn print_finding(finding: &ValidationFinding) {
    let severity = match finding.severity {
        Severity::High => "HIGH",
        Severity::Medium => "MEDIUM",
        Severity::Low => "LOW",
    };
    let location = finding
        .slide_number
        .map(|n| format!(" (slide {n})"))
        .unwrap_or_default();
    println!(
        "[{}] {}{}: {}",
        severity,
        finding.rule_id,
        location,
        finding.detail.as_deref().unwrap_or("failed")
    );
}

/// Slides from a directory, or from files named `slide_NN.html`. Files with
/// other names are numbered by their position on the command line.
async fn collect_slides(paths: &[PathBuf]) -> anyhow::Result<BTreeMap<u32, String>> {
    if let [dir] = paths {
        if dir.is_dir() {
            return Ok(load_slides(dir).await?);
        }
    }

    let mut slides = BTreeMap::new();
    for (i, path) in paths.iter().enumerate() {
        let number = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_slide_file_name)
            .unwrap_or(i as u32 + 1);
        let html = tokio::fs::read_to_string(path).await?;
        if slides.insert(number, html).is_some() {
            anyhow::bail!("slide {} given twice", number);
        }
    }
    Ok(slides)
}

async fn cmd_check(paths: &[PathBuf]) -> anyhow::Result<()> {
    let config = PipelineConfig::from_env()?;
    let slides = collect_slides(paths).await?;
    if slides.is_empty() {
        anyhow::bail!("no slides found");
    }

    let report = validate_all_slides(&slides, &config.validation);
    let failures = report.failures();
    if failures.is_empty() {
        println!("All {} slide(s) passed", slides.len());
        return Ok(());
    }

    for finding in &failures {
        print_finding(finding);
    }
    println!(
        "\n{} high, {} medium, {} low",
        report.high_count, report.medium_count, report.low_count
    );

    if !report.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_render(dir: &Path, output: Option<PathBuf>) -> anyhow::Result<()> {
    let config = PipelineConfig::from_env()?;
    let slides = load_slides(dir).await?;
    if slides.is_empty() {
        anyhow::bail!("no slide_NN.html files in {}", dir.display());
    }

    let output = output
        .or_else(|| dir.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let renderer = ChromiumRenderer::new(&config.chrome_binary, &output)
        .with_canvas(config.validation.canvas_width, config.validation.canvas_height);
    let images = renderer.render_all(&slides).await?;

    for (n, path) in &images {
        println!("  slide {:>2} -> {}", n, path.display());
    }
    println!("✓ Rendered {} of {} slide(s)", images.len(), slides.len());
    Ok(())
}

async fn cmd_info(dir: &Path) -> anyhow::Result<()> {
    let manifest = load_manifest(dir).await?;

    println!("Run: {}", manifest.run_id);
    println!("Topic: {}", manifest.topic);
    println!("Status: {}", manifest.status);
    if let Some(kind) = &manifest.failure_kind {
        println!("Failure: {kind}");
    }
    if let Some(error) = &manifest.error {
        println!("Error: {error}");
    }
    if let Some(verdict) = manifest.verdict {
        println!("Verdict: {verdict}");
    }
    println!("Started: {}", manifest.started_at);
    println!("Finished: {}", manifest.finished_at);
    println!("Review iterations: {}", manifest.review_iterations);
    println!("States: {}", manifest.transitions.join(" -> "));
    println!(
        "Tokens: {} in / {} out",
        manifest.total_usage.input_tokens, manifest.total_usage.output_tokens
    );
    for finding in &manifest.unresolved {
        print_finding(finding);
    }
    Ok(())
}
