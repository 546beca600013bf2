//! Console notifications and per-experiment log files.
//!
//! Every notification goes to `tracing` (subject to the output mode) and to
//! the experiment's log file (always). Warnings and errors are never
//! suppressed.

use chrono::Local;
use serde::Serialize;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// How much the console shows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum OutputMode {
    #[default]
    Normal,
    /// Also show debug notifications
    Verbose,
    /// Hide progress; script output, warnings and errors still show
    Quiet,
    /// Hide progress and script output; warnings and errors still show
    Silent,
}

impl OutputMode {
    pub fn shows_progress(self) -> bool {
        matches!(self, Self::Normal | Self::Verbose)
    }

    pub fn shows_script_output(self) -> bool {
        self != Self::Silent
    }

    pub fn shows_debug(self) -> bool {
        self == Self::Verbose
    }
}

/// Severity tag written to the log file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Success,
    Warning,
    Error,
    Print,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Print => write!(f, "PRINT"),
        }
    }
}

/// Append-only log file of one experiment
#[derive(Debug)]
pub struct ExperimentLog {
    path: PathBuf,
    file: File,
}

impl ExperimentLog {
    /// Open `<dir>/<sidecar stem>_<YYYYMMDD_HHMMSS>.log`, creating `dir`
    pub fn create(dir: &Path, sidecar: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let stem = sidecar
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "experiment".to_string());
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("{stem}_{timestamp}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, severity: Severity, message: &str) -> io::Result<()> {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let mut file = &self.file;
        writeln!(file, "[{timestamp}] [{severity}] {message}")
    }
}

/// User-facing notifications of one experiment
#[derive(Debug, Default)]
pub struct Notifier {
    mode: OutputMode,
    log: Option<ExperimentLog>,
}

impl Notifier {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode, log: None }
    }

    /// Notifier mirroring into a fresh log file under `dir`
    ///
    /// A log file that cannot be created is reported and skipped.
    pub fn with_log_file(mode: OutputMode, dir: &Path, sidecar: &Path) -> Self {
        match ExperimentLog::create(dir, sidecar) {
            Ok(log) => {
                debug!("Logging to {}", log.path().display());
                Self {
                    mode,
                    log: Some(log),
                }
            }
            Err(err) => {
                warn!("Cannot create log file in {}: {}", dir.display(), err);
                Self::new(mode)
            }
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log.as_ref().map(ExperimentLog::path)
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        if self.mode.shows_debug() {
            debug!("{}", message);
        }
        self.mirror(Severity::Debug, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        if self.mode.shows_progress() {
            info!("{}", message);
        }
        self.mirror(Severity::Info, message);
    }

    pub fn success(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        if self.mode.shows_progress() {
            info!("✅ {}", message);
        }
        self.mirror(Severity::Success, message);
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!("{}", message);
        self.mirror(Severity::Warning, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        error!("{}", message);
        self.mirror(Severity::Error, message);
    }

    /// A line printed by the caller script
    pub fn script_output(&self, line: &str) {
        if self.mode.shows_script_output() {
            info!("{}", line);
        }
        self.mirror(Severity::Print, line);
    }

    fn mirror(&self, severity: Severity, message: &str) {
        if let Some(log) = &self.log {
            if let Err(err) = log.append(severity, message) {
                warn!("Failed to write {}: {}", log.path().display(), err);
            }
        }
    }
}
