use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Target of the JSON event lines, one per result posted to the Hub.
pub const RESULT_TARGET: &str = "result";

/// Install the global subscriber.
///
/// - `log_level` is an `EnvFilter` directive (e.g. `"info"`), overridden by
///   `RUST_LOG` when set.
/// - `log_file` is the daily rolling text log, relative to `root`.
/// - `event_file` is the daily rolling JSON log, relative to `root`; it only
///   receives events with target `"result"`.
pub fn init_tracing(root: &Path, log_file: &str, event_file: &str, log_level: &str) -> Result<()> {
    let (log_dir, log_name) = split(&root.join(log_file))?;
    let (event_dir, event_name) = split(&root.join(event_file))?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    std::fs::create_dir_all(&event_dir)
        .with_context(|| format!("creating event directory {}", event_dir.display()))?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let stdout_layer = fmt::layer().with_target(false);

    let txt_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, &log_name);
    let txt_layer = fmt::layer().with_writer(txt_appender).with_ansi(false);

    let json_appender = RollingFileAppender::new(Rotation::DAILY, &event_dir, &event_name);
    let json_layer = fmt::layer()
        .json()
        .with_writer(json_appender)
        .with_target(true)
        .with_filter(EnvFilter::new(format!("{RESULT_TARGET}=info")));

    Registry::default()
        .with(env_filter)
        .with(stdout_layer)
        .with(txt_layer)
        .with(json_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;
    Ok(())
}

fn split(path: &Path) -> Result<(PathBuf, String)> {
    let name = path
        .file_name()
        .with_context(|| format!("log path {} has no file name", path.display()))?
        .to_string_lossy()
        .into_owned();
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((dir, name))
}
