use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tracksmith::cli::{Cli, Commands};
use tracksmith::config::Config;
use tracksmith::delivery::{ChatId, LocalDelivery, UserId};
use tracksmith::pipeline::MediaPipeline;
use tracksmith::session::AudioSource;
use tracksmith::utils;

// The CLI drives the same pipeline a chat host would, as a single local user.
const CHAT: ChatId = ChatId(0);
const USER: UserId = UserId(0);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose {
        "tracksmith=debug"
    } else {
        "tracksmith=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Check for required external tools (non-fatal; warnings only)
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.set_message("Checking external tools...");
    spinner.enable_steady_tick(Duration::from_millis(120));
    let missing_deps = utils::check_dependencies().await;
    spinner.finish_and_clear();

    if !missing_deps.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing_deps {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - tools may be available)");
    }

    let config = Config::load().await?;

    let out_dir = config
        .app
        .out_dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| ".".into()));
    let delivery = Arc::new(LocalDelivery::new(out_dir));
    let pipeline = MediaPipeline::new(&config, delivery)?;

    match cli.command {
        Commands::Mp3 { url } => {
            pipeline.handle_url(CHAT, &url).await;
        }
        Commands::Search { query } => {
            pipeline.handle_search(CHAT, &query.join(" ")).await;
        }
        Commands::Cut { file, start, end } => {
            if start.is_none() && end.is_none() {
                eprintln!(
                    "{} specify at least one of --start or --end",
                    console::style("error:").red().bold()
                );
                std::process::exit(2);
            }
            let mut args = String::new();
            if let Some(start) = &start {
                args.push_str(&format!("start={} ", start));
            }
            if let Some(end) = &end {
                args.push_str(&format!("end={}", end));
            }
            let source = AudioSource {
                file_ref: file.to_string_lossy().into_owned(),
                duration_secs: 0,
            };
            pipeline
                .handle_cut_command(CHAT, USER, args.trim(), Some(source))
                .await;
        }
        Commands::Merge { files } => {
            for file in &files {
                pipeline
                    .handle_audio_message(CHAT, USER, &file.to_string_lossy())
                    .await;
            }
            pipeline.handle_merge(CHAT, USER).await;
        }
        Commands::Transcribe { file } => {
            pipeline
                .handle_transcribe(CHAT, &file.to_string_lossy())
                .await;
        }
        Commands::Shortvideo { url } => {
            pipeline.handle_short_video(CHAT, &url).await;
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                println!("Edit the config file directly; it lives next to the binary or at the");
                println!("platform config dir under tracksmith/config.yaml.");
            }
        }
    }

    Ok(())
}
