//! Structured logging module for Stride
//!
//! Events go through `tracing` under one target per category:
//! - GENERATION: Reasoning Service calls, breakdowns, task generation
//! - SCHEDULE: Schedule synthesis and fallbacks
//! - PROGRESS: XP awards, streaks, goal completion
//! - ORCHESTRATION: Initialize / onboarding lifecycle
//! - ERROR: Errors surfaced to callers
//!
//! When a log directory is configured, a copy of every event is appended to
//! `stride-YYYY-MM-DD.log` in that directory, dated by the day it was written.

use chrono::{Local, NaiveDate, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Log categories for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Generation,
    Schedule,
    Progress,
    Orchestration,
    Error,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Generation => "GENERATION",
            LogCategory::Schedule => "SCHEDULE",
            LogCategory::Progress => "PROGRESS",
            LogCategory::Orchestration => "ORCHESTRATION",
            LogCategory::Error => "ERROR",
        }
    }
}

/// Today's log file inside `dir`
pub fn log_file_path(dir: &Path) -> PathBuf {
    log_file_for(dir, Local::now().date_naive())
}

fn log_file_for(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("stride-{}.log", date.format("%Y-%m-%d")))
}

/// File sink that moves to a new dated file when the local day changes,
/// so a long-running process still leaves one file per day.
pub struct DailyLogFile {
    dir: PathBuf,
    current: Mutex<Option<(NaiveDate, File)>>,
}

impl DailyLogFile {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Mutex::new(None),
        }
    }

    fn append(&self, date: NaiveDate, buf: &[u8]) -> io::Result<()> {
        let mut current = self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !matches!(current.as_ref(), Some((open_date, _)) if *open_date == date) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file_for(&self.dir, date))?;
            *current = Some((date, file));
        }
        match current.as_mut() {
            Some((_, file)) => file.write_all(buf),
            None => Ok(()),
        }
    }
}

pub struct DailyLogWriter<'a>(&'a DailyLogFile);

impl Write for DailyLogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.append(Local::now().date_naive(), buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for DailyLogFile {
    type Writer = DailyLogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        DailyLogWriter(self)
    }
}

/// Install the global subscriber. Calling it again after a subscriber is
/// already installed is a no-op.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = match &config.dir {
        Some(dir) => {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
            Some(fmt::layer().with_ansi(false).with_writer(DailyLogFile::new(dir.clone())))
        }
        None => None,
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        log(LogCategory::Orchestration, None, "Stride logging initialized");
    }

    Ok(())
}

/// Log a message with category and optional user context
pub fn log(category: LogCategory, user_id: Option<&str>, message: &str) {
    let user_context = user_id
        .map(|id| format!("user={} | ", &id[..8.min(id.len())]))
        .unwrap_or_default();

    match category {
        LogCategory::Generation => {
            tracing::info!(target: "stride::generation", "{}{}", user_context, message)
        }
        LogCategory::Schedule => {
            tracing::info!(target: "stride::schedule", "{}{}", user_context, message)
        }
        LogCategory::Progress => {
            tracing::info!(target: "stride::progress", "{}{}", user_context, message)
        }
        LogCategory::Orchestration => {
            tracing::info!(target: "stride::orchestration", "{}{}", user_context, message)
        }
        LogCategory::Error => {
            tracing::error!(target: "stride::error", "{}{}", user_context, message)
        }
    }
}

pub fn log_generation(user_id: Option<&str>, message: &str) {
    log(LogCategory::Generation, user_id, message);
}

pub fn log_schedule(user_id: Option<&str>, message: &str) {
    log(LogCategory::Schedule, user_id, message);
}

pub fn log_progress(user_id: Option<&str>, message: &str) {
    log(LogCategory::Progress, user_id, message);
}

pub fn log_orchestration(user_id: Option<&str>, message: &str) {
    log(LogCategory::Orchestration, user_id, message);
}

pub fn log_error(user_id: Option<&str>, message: &str) {
    log(LogCategory::Error, user_id, message);
}

/// Clean up log files older than `retention_days`
pub fn cleanup_old_logs(dir: &Path, retention_days: i64) -> Result<usize, Box<dyn std::error::Error>> {
    let mut deleted = 0;

    if !dir.exists() {
        return Ok(0);
    }

    let cutoff = Utc::now() - chrono::Duration::days(retention_days);

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("stride-") && n.ends_with(".log"))
            .unwrap_or(false);
        if !is_log {
            continue;
        }

        if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
            let modified_time: chrono::DateTime<Utc> = modified.into();
            if modified_time < cutoff && fs::remove_file(&path).is_ok() {
                deleted += 1;
            }
        }
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name() {
        let path = log_file_path(Path::new("/tmp/logs"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("stride-"));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn test_cleanup_keeps_recent_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stride-2020-01-01.log"), "old").unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        // Files were just written, so nothing is past a 7 day cutoff.
        assert_eq!(cleanup_old_logs(dir.path(), 7).unwrap(), 0);
        // A negative retention puts the cutoff in the future.
        assert_eq!(cleanup_old_logs(dir.path(), -1).unwrap(), 1);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_daily_file_switches_with_the_date() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DailyLogFile::new(dir.path());
        let monday = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let tuesday = monday.succ_opt().unwrap();

        sink.append(monday, b"first\n").unwrap();
        sink.append(monday, b"second\n").unwrap();
        sink.append(tuesday, b"third\n").unwrap();

        let read = |date| fs::read_to_string(log_file_for(dir.path(), date)).unwrap();
        assert_eq!(read(monday), "first\nsecond\n");
        assert_eq!(read(tuesday), "third\n");
    }

    #[test]
    fn test_cleanup_missing_dir() {
        let missing = Path::new("/definitely/not/here/stride-logs");
        assert_eq!(cleanup_old_logs(missing, 7).unwrap(), 0);
    }
}
