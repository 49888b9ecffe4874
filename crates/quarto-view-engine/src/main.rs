//! view-render binary - render one view template from the command line

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quarto_view_engine::{EngineConfig, RenderOptions, RenderOutcome, ViewEngine, ViewSettings};

#[derive(Parser, Debug)]
#[command(name = "view-render")]
#[command(about = "Render a view template with its includes and layout")]
struct Args {
    /// Logical template name, resolved against the views directory
    template: String,

    /// Views directory (defaults to current directory)
    #[arg(short, long)]
    views: Option<PathBuf>,

    /// Extension appended to template names without one
    #[arg(short, long, default_value = "liquid")]
    ext: String,

    /// JSON file with template data (must contain an object)
    #[arg(short, long, value_name = "FILE")]
    data: Option<PathBuf>,

    /// Extra data binding, overriding --data (can be specified multiple times).
    /// Example: -D title=Home
    #[arg(short = 'D', value_name = "KEY=VALUE")]
    defines: Vec<String>,

    /// Wrap the output in this layout template
    #[arg(short, long, value_name = "NAME")]
    layout: Option<String>,

    /// Show source lines and the error chain on the error page
    #[arg(long)]
    trace: bool,

    /// Fetch includes concurrently
    #[arg(long)]
    parallel: bool,

    /// Engine configuration file (JSON); flags above take precedence
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write output to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quarto_view_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    config.trace_error |= args.trace;
    config.parallel |= args.parallel;
    // A one-shot render never reuses the cache
    config.watch = false;

    let views = match args.views {
        Some(views) => views,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let settings = ViewSettings::new(views).with_view_engine(args.ext);

    let mut options = RenderOptions::new().with_settings(settings);
    if let Some(path) = &args.data {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read data file {}", path.display()))?;
        let data: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?;
        options = options.with_json_locals(data)?;
    }
    for define in &args.defines {
        let Some((key, value)) = define.split_once('=') else {
            bail!("Invalid -D binding '{define}', expected KEY=VALUE");
        };
        options = options.with_local(key.trim(), value);
    }
    if let Some(layout) = args.layout {
        options = options.with_layout(layout);
    }

    info!(template = %args.template, "Rendering view");
    let engine = ViewEngine::builder().config(config).build();
    let outcome = engine.render_outcome(&args.template, options).await?;
    if let RenderOutcome::ErrorPage(_) = &outcome {
        warn!(template = %args.template, "Template failed, wrote error page");
    }

    match args.output {
        Some(path) => {
            std::fs::write(&path, outcome.as_str())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(output = %path.display(), "Wrote rendered view");
        }
        None => print!("{}", outcome.as_str()),
    }

    Ok(())
}
