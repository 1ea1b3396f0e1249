//! CLI binary for mistral-ocr-pipeline.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_llm::ProviderFactory;
use indicatif::{ProgressBar, ProgressStyle};
use mistral_ocr_pipeline::config::{
    DEFAULT_API_BASE_URL, DEFAULT_CHAT_BASE_URL, DEFAULT_CHAT_MODEL, DEFAULT_OCR_MODEL,
};
use mistral_ocr_pipeline::{
    analyze_only, run, AnalysisConfig, AnalysisOutput, ChatBackend, OcrPipelineError,
    PipelineConfig, PipelineProgressCallback, PipelineState, ProgressCallback, ReferenceStrategy,
    SavedArtifacts, TrustPolicy,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner whose message follows the pipeline
/// state, plus a boxed signed-URL notice the operator can copy.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("mistral-ocr");
        bar.set_message("starting…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_transition(&self, from: &PipelineState, to: &PipelineState) {
        match to {
            PipelineState::Done => self.bar.finish_and_clear(),
            PipelineState::Failed { .. } => {
                self.bar.finish_and_clear();
                eprintln!("{} failed while {}", red("✘"), from);
            }
            _ => {
                if !matches!(from, PipelineState::Idle) {
                    self.bar.println(format!("  {} {}", green("✓"), from));
                }
                self.bar.set_message(format!("{to}…"));
            }
        }
    }

    fn on_signed_url(&self, url: &str, expiry_hours: u32) {
        let rule = "═".repeat(63);
        self.bar.println(format!(
            "\n{} {}\n{rule}\n{url}\n{rule}\n{}\n",
            cyan("◆"),
            bold(&format!("SIGNED URL (valid {expiry_hours}h, save this for reuse):")),
            dim("Next time: --signed-url <URL> skips the upload."),
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Upload, OCR, save output/ocr_output.json + output/ocr_output.md
  mistral-ocr documents/sample.pdf

  # Reuse a signed URL printed by an earlier run (no upload)
  mistral-ocr --signed-url 'https://…/file.pdf?se=…&sig=…'

  # Inline the PDF as base64 instead of uploading it
  mistral-ocr --strategy inline small.pdf

  # OCR, then fill a template with a chat model
  mistral-ocr --analyze --template sample.json invoice.pdf

  # Analysis only, on an existing output/ocr_output.json
  mistral-ocr --analyze-only --template sample.json

  # Behind a TLS-inspecting proxy
  mistral-ocr --ca-cert corp-root.pem documents/sample.pdf

ENVIRONMENT VARIABLES:
  MISTRAL_API_KEY          OCR provider API key (required for OCR)
  OPENAI_API_KEY           Chat API key for --analyze (optional for custom base URLs)
  OPENAI_BASE_URL          Chat-completion base URL
  EDGEQUAKE_LLM_PROVIDER   Use a named provider for --analyze (openai, anthropic, gemini, ollama)
  RUST_LOG                 Override log filtering (e.g. mistral_ocr_pipeline=debug)

  A .env file in the working directory is loaded at startup.
"#;

/// Extract PDF text with a document-OCR API and optionally structure it with a chat model.
#[derive(Parser, Debug)]
#[command(
    name = "mistral-ocr",
    version,
    about = "Extract PDF text with a document-OCR API and optionally structure it with a chat model",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file. Not needed with --analyze-only or a reused signed URL.
    #[arg(env = "MISTRAL_OCR_INPUT")]
    input: Option<PathBuf>,

    /// Directory receiving all output files.
    #[arg(short, long, env = "MISTRAL_OCR_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// OCR provider API key.
    #[arg(long, env = "MISTRAL_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// OCR provider base URL.
    #[arg(long, env = "MISTRAL_API_BASE_URL", default_value = DEFAULT_API_BASE_URL)]
    api_base_url: String,

    /// OCR model ID.
    #[arg(long, env = "MISTRAL_OCR_MODEL", default_value = DEFAULT_OCR_MODEL)]
    model: String,

    /// How the PDF reaches the OCR service. Default: reuse when --signed-url is set, else upload.
    #[arg(long, env = "MISTRAL_OCR_STRATEGY", value_enum)]
    strategy: Option<StrategyArg>,

    /// Signed URL from an earlier upload.
    #[arg(long, env = "MISTRAL_SIGNED_URL")]
    signed_url: Option<String>,

    /// Fail instead of uploading when the reuse strategy has no signed URL.
    #[arg(long)]
    no_fallback: bool,

    /// Signed URL lifetime in hours.
    #[arg(long, env = "MISTRAL_OCR_EXPIRY_HOURS", default_value_t = 24,
          value_parser = clap::value_parser!(u32).range(1..))]
    expiry_hours: u32,

    /// OCR call timeout in seconds.
    #[arg(long, env = "MISTRAL_OCR_TIMEOUT", default_value_t = 120)]
    ocr_timeout: u64,

    /// Do not ask the OCR service for embedded images.
    #[arg(long)]
    no_images: bool,

    /// Decode embedded images into <OUTPUT_DIR>/images/.
    #[arg(long)]
    save_images: bool,

    /// Extra PEM root certificate to trust (corporate proxy CA).
    #[arg(long, env = "MISTRAL_OCR_CA_CERT")]
    ca_cert: Option<PathBuf>,

    /// Run the analysis stage after OCR.
    #[arg(long)]
    analyze: bool,

    /// Run only the analysis stage, on <OUTPUT_DIR>/ocr_output.json.
    #[arg(long, conflicts_with = "analyze")]
    analyze_only: bool,

    /// Template JSON shaping the analysis output.
    #[arg(long, env = "MISTRAL_OCR_TEMPLATE", default_value = "sample.json")]
    template: PathBuf,

    /// Chat model for the analysis stage.
    #[arg(long, env = "OPENAI_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    analysis_model: String,

    /// OpenAI-compatible base URL for the analysis stage.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_CHAT_BASE_URL)]
    analysis_base_url: String,

    /// API key for the analysis endpoint; omitted from requests when unset.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    analysis_api_key: Option<String>,

    /// Named edgequake-llm provider for the analysis stage (overrides the base URL).
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    analysis_provider: Option<String>,

    /// Analysis sampling temperature (0.0–2.0).
    #[arg(long)]
    temperature: Option<f32>,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "MISTRAL_OCR_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Upload,
    Inline,
    Reuse,
}

impl From<StrategyArg> for ReferenceStrategy {
    fn from(v: StrategyArg) -> Self {
        match v {
            StrategyArg::Upload => ReferenceStrategy::Upload,
            StrategyArg::Inline => ReferenceStrategy::Inline,
            StrategyArg::Reuse => ReferenceStrategy::Reuse,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Credentials may live in .env; load it before clap reads the environment.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Analysis-only mode ───────────────────────────────────────────────
    if cli.analyze_only {
        let analysis = analyze_only(&config).await.map_err(report)?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&analysis).context("Failed to serialise output")?
            );
        } else if !cli.quiet {
            print_analysis(&analysis);
        }
        return Ok(());
    }

    // ── Full run ─────────────────────────────────────────────────────────
    let uses_reused_url = matches!(config.strategy, ReferenceStrategy::Reuse)
        && config.prior_url.as_deref().is_some_and(|u| !u.trim().is_empty());
    let input = match cli.input {
        Some(ref p) => p.clone(),
        None if uses_reused_url => PathBuf::new(),
        None => bail!("No input PDF given.\nUsage: mistral-ocr <PDF> (see --help)"),
    };

    let output = run(&input, &config).await.map_err(report)?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }

    if let Some(ref url) = output.signed_url {
        if !show_progress {
            // The progress callback already printed it in spinner mode.
            eprintln!("Signed URL (valid {}h): {}", config.signed_url_expiry_hours, url);
        }
    }
    if let Some(ref artifacts) = output.artifacts {
        print_artifacts(artifacts);
    }
    if let Some(ref analysis) = output.analysis {
        print_analysis(analysis);
    }
    eprintln!(
        "{}  done in {}ms",
        green("✔"),
        output.total_duration_ms
    );

    Ok(())
}

/// Attach the error kind so the operator sees what class of failure occurred.
fn report(e: OcrPipelineError) -> anyhow::Error {
    let kind = e.kind();
    anyhow::Error::new(e).context(format!("Pipeline failed ({kind})"))
}

fn print_artifacts(artifacts: &SavedArtifacts) {
    eprintln!(
        "{} OCR output saved to: {}",
        green("✓"),
        bold(&artifacts.json_path.display().to_string())
    );
    match artifacts.markdown_path {
        Some(ref md) => eprintln!(
            "{} OCR markdown saved to: {}  {}",
            green("✓"),
            bold(&md.display().to_string()),
            dim(&format!("({} pages)", artifacts.page_count))
        ),
        None => eprintln!("{}", dim("  no page markdown in the response")),
    }
    if !artifacts.image_paths.is_empty() {
        eprintln!(
            "{} {} images saved",
            green("✓"),
            artifacts.image_paths.len()
        );
    }
    if let Some(ref preview) = artifacts.text_preview {
        let rule = "═".repeat(39);
        eprintln!(
            "Extracted text length: {} characters\n\nFirst 300 characters:\n{rule}\n{}",
            preview.total_chars, preview.preview
        );
        if preview.truncated {
            eprintln!("{}", dim("... (see full text in ocr_output.json)"));
        }
        eprintln!("{rule}");
    }
}

fn print_analysis(analysis: &AnalysisOutput) {
    eprintln!(
        "{} Analysis saved to: {}",
        if analysis.is_valid_json { green("✓") } else { cyan("⚠") },
        bold(&analysis.output_path.display().to_string())
    );
    if !analysis.is_valid_json {
        eprintln!("{}", dim("  reply was not valid JSON; saved verbatim"));
    }
    if let Some(usage) = analysis.usage {
        eprintln!(
            "   {} tokens in  /  {} tokens out  /  {} total",
            dim(&usage.input_tokens.to_string()),
            dim(&usage.output_tokens.to_string()),
            dim(&usage.total_tokens.to_string()),
        );
    }
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    if !cli.analyze_only && cli.api_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
        bail!(
            "MISTRAL_API_KEY environment variable is not set.\n\
             Set it with: export MISTRAL_API_KEY=your_api_key_here"
        );
    }

    let strategy = match cli.strategy {
        Some(s) => s.into(),
        None if cli.signed_url.is_some() => ReferenceStrategy::Reuse,
        None => ReferenceStrategy::Upload,
    };

    let mut builder = PipelineConfig::builder()
        .api_base_url(&cli.api_base_url)
        .ocr_model(&cli.model)
        .strategy(strategy)
        .fallback_to_upload(!cli.no_fallback)
        .signed_url_expiry_hours(cli.expiry_hours)
        .ocr_timeout_secs(cli.ocr_timeout)
        .include_image_base64(!cli.no_images)
        .save_images(cli.save_images)
        .output_dir(&cli.output_dir);

    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(ref url) = cli.signed_url {
        builder = builder.prior_url(url);
    }
    if let Some(ref path) = cli.ca_cert {
        builder = builder.trust(TrustPolicy::ExtraRootCertificate(path.clone()));
    }
    if cli.analyze || cli.analyze_only {
        builder = builder.analysis(build_analysis(cli)?);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Resolve the analysis backend: named provider first, then the base URL.
fn build_analysis(cli: &Cli) -> Result<AnalysisConfig> {
    let backend = if let Some(ref name) = cli.analysis_provider {
        let provider = ProviderFactory::create_llm_provider(name, &cli.analysis_model)
            .map_err(|e| anyhow::anyhow!("LLM provider '{name}' is not configured: {e}"))?;
        ChatBackend::Provider(provider)
    } else {
        let key = cli.analysis_api_key.clone().filter(|k| !k.trim().is_empty());
        if key.is_none() && cli.analysis_base_url.trim_end_matches('/') == DEFAULT_CHAT_BASE_URL {
            bail!(
                "OPENAI_API_KEY environment variable is not set.\n\
                 Set it, or point --analysis-base-url at an endpoint that needs no key."
            );
        }
        ChatBackend::compatible(&cli.analysis_base_url, key)
    };

    let mut analysis = AnalysisConfig::new(backend, &cli.template).with_model(&cli.analysis_model);
    if let Some(t) = cli.temperature {
        analysis = analysis.with_temperature(t);
    }
    Ok(analysis)
}
