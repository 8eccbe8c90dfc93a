//! Prism CLI - local entry point to the analysis pipeline.
//!
//! ```text
//! prism analyze --message <msg> <file>...   score a change, print the result JSON
//! prism config                              show resolved settings
//! ```
//!
//! Logs go to `~/.prism/logs/prism.log` (or `./.prism/logs/prism.log`) when
//! one can be opened, otherwise to stderr. Stdout carries only command output.

mod args;

use std::{
    fs::{self, File, OpenOptions},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use prism_config::{PrismConfig, Settings};
use prism_engine::Services;
use prism_inference::Outcome;
use prism_registration::LogSender;
use prism_types::{ChangeSet, PullRequestId};

use args::{Cli, Commands};

const LOG_FILE_NAME: &str = "prism.log";

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    let (log_file, init_warnings) = open_log_file(&log_dirs());
    let registry = tracing_subscriber::registry().with(env_filter);
    match log_file {
        Some((log_path, file)) => {
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
            tracing::info!(path = %log_path.display(), "Logging initialized");
        }
        None => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
    }
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

/// Log directories in preference order: beside the config file, then
/// `./.prism/logs`.
fn log_dirs() -> Vec<PathBuf> {
    PrismConfig::path()
        .and_then(|path| path.parent().map(|dir| dir.join("logs")))
        .into_iter()
        .chain(std::iter::once(PathBuf::from(".prism").join("logs")))
        .collect()
}

/// Open `prism.log` for appending in the first usable directory. Failures are
/// returned as messages to emit once a subscriber is installed.
fn open_log_file(dirs: &[PathBuf]) -> (Option<(PathBuf, File)>, Vec<String>) {
    let mut warnings = Vec::new();
    for dir in dirs {
        let path = dir.join(LOG_FILE_NAME);
        let opened = fs::create_dir_all(dir)
            .and_then(|()| OpenOptions::new().create(true).append(true).open(&path));
        match opened {
            Ok(file) => return (Some((path, file)), warnings),
            Err(e) => warnings.push(format!("Cannot log to {}: {e}", path.display())),
        }
    }
    (None, warnings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing();

    let config = PrismConfig::load().context("failed to load config")?;
    let settings = Settings::resolve(config.as_ref());

    match cli.command {
        Commands::Analyze { message, pr, files } => analyze(&settings, pr, message, files).await,
        Commands::Config => {
            print_settings(&settings);
            Ok(())
        }
    }
}

async fn analyze(
    settings: &Settings,
    pr: String,
    message: String,
    files: Vec<String>,
) -> Result<()> {
    let mut services = Services::start(settings, Arc::new(LogSender::new()))
        .context("failed to start services")?;
    let change = ChangeSet::new(files, message);

    let result = services
        .analysis
        .run_manual(PullRequestId::new(pr), &change)
        .await;

    if let Some(event) = services.events.recv().await
        && let Outcome::Fallback(error) = &event.assessment.outcome
    {
        eprintln!("warning: model unavailable ({}): {error}", error.kind());
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    services.shutdown();
    Ok(())
}

fn print_settings(settings: &Settings) {
    let path = PrismConfig::path()
        .map_or_else(|| "<unknown>".to_string(), |p| p.display().to_string());
    println!("config file:        {path}");
    println!("ollama url:         {}", settings.inference.base_url);
    println!("ollama model:       {}", settings.inference.model);
    println!("ollama timeout:     {}ms", settings.inference.timeout.as_millis());
    println!("analysis delay:     {}s", settings.analysis_delay.as_secs());
    println!(
        "registration ttl:   {}s",
        settings.registration.ttl().num_seconds()
    );
    println!(
        "max attempts:       {}",
        settings.registration.max_attempts()
    );
    match &settings.mail {
        Some(mail) => println!(
            "mail:               {} as {} (password [REDACTED])",
            mail.service, mail.user
        ),
        None => println!("mail:               not configured (codes are logged)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_dirs_end_with_local_fallback() {
        let dirs = log_dirs();
        assert_eq!(dirs.last(), Some(&PathBuf::from(".prism").join("logs")));
    }

    #[test]
    fn unusable_log_dir_falls_through_to_next() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let usable = tmp.path().join("logs");

        let (opened, warnings) = open_log_file(&[blocker.join("logs"), usable.clone()]);

        let (path, _file) = opened.unwrap();
        assert_eq!(path, usable.join(LOG_FILE_NAME));
        assert!(path.exists());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn no_usable_log_dir_reports_every_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();

        let (opened, warnings) = open_log_file(&[blocker.join("a"), blocker.join("b")]);
        assert!(opened.is_none());
        assert_eq!(warnings.len(), 2);
    }
}
