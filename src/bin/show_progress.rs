use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use autoblogger::calendar::Calendar;
use autoblogger::config::{self, Config};
use autoblogger::progress;

#[derive(Debug, Parser)]
#[command(author, version, about = "Print the progress cursor and the entry the next run would publish")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    // Secrets are not needed to inspect progress, so skip full validation.
    let raw = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading {}", args.config.display()))?;
    let mut cfg: Config = serde_yaml::from_str(&raw)?;
    cfg.apply_env();

    let store = progress::open_read_only(&cfg)
        .await
        .with_context(|| format!("opening {}", cfg.progress_location()))?;
    let state = store.load().await;
    println!("Store: {}", store.location());
    println!("{}", serde_json::to_string_pretty(&state)?);

    match Calendar::load(&cfg.calendar_path(), &cfg.categories) {
        Ok(calendar) => match calendar.entry_for(state.next_day) {
            Ok(entry) => {
                println!("Next entry (day {} of {}):", entry.day, calendar.len());
                println!("  Topic:    {}", entry.topic);
                println!("  Category: {}", entry.category);
                if let Some(details) = &entry.details {
                    println!("  Details:  {details}");
                }
            }
            Err(err) => println!("Next entry unavailable: {err}"),
        },
        Err(err) => println!("Calendar unavailable: {err}"),
    }

    if let Err(err) = config::validate(&cfg) {
        println!("Config check: {err}");
    }
    Ok(())
}
