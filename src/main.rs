use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use autoblogger::config;
use autoblogger::error::{FailureClass, Stage};
use autoblogger::orchestrator::Orchestrator;

#[derive(Debug, Parser)]
#[command(author, version, about = "Generate and publish the next scheduled blog post, then exit")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Generate, fetch the image and render markup, but do not publish or advance progress
    #[arg(long)]
    dry_run: bool,
}

const EXIT_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = match load_config(&args) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("configuration error: {err:#}");
            eprintln!("configuration error: {err:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let outcome = match Orchestrator::from_config(&cfg, args.dry_run).await {
        Ok(orchestrator) => orchestrator.run().await,
        Err(err) => Err(err),
    };

    match outcome {
        Ok(report) => {
            match &report.post {
                Some(post) => info!(
                    day = report.day,
                    next_day = report.next_day,
                    url = %post.url,
                    image = report.image_attached,
                    "published"
                ),
                None => info!(day = report.day, topic = %report.topic, "dry run finished"),
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            let diagnostic = err.diagnostic();
            error!(stage = %err.stage, class = %err.class, "{diagnostic}");
            eprintln!("{diagnostic}");
            if err.class == FailureClass::Configuration || err.stage == Stage::Config {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::from(EXIT_FAILED)
            }
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<config::Config> {
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("loading {}", args.config.display()))?;
    cfg.ensure_dirs().context("creating data directories")?;
    Ok(cfg)
}
