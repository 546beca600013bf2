//! Experiment states, failures and run reports.

use convenient_params::ParamsError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::earth_engine::ClientError;
use crate::exports::SubmittedTask;
use crate::sandbox::SandboxError;

/// Where an experiment is in its lifecycle
///
/// `Loaded → Validated → {Rejected | DryRunComplete | Authenticated →
/// Initialized → Executed → Reported}`. `Failed` ends an experiment that
/// could not reach execution (unreadable sidecar, authentication,
/// initialization or sandbox setup).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExperimentState {
    Pending,
    Loaded,
    Validated,
    Rejected,
    DryRunComplete,
    Authenticated,
    Initialized,
    Executed,
    Reported,
    Failed,
}

impl ExperimentState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::DryRunComplete | Self::Reported | Self::Failed
        )
    }
}

impl fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "⏳ PENDING"),
            Self::Loaded => write!(f, "📄 LOADED"),
            Self::Validated => write!(f, "🔍 VALIDATED"),
            Self::Rejected => write!(f, "🚫 REJECTED"),
            Self::DryRunComplete => write!(f, "✅ DRY RUN COMPLETE"),
            Self::Authenticated => write!(f, "🔑 AUTHENTICATED"),
            Self::Initialized => write!(f, "🌍 INITIALIZED"),
            Self::Executed => write!(f, "⚙️  EXECUTED"),
            Self::Reported => write!(f, "📋 REPORTED"),
            Self::Failed => write!(f, "❌ FAILED"),
        }
    }
}

/// Why an experiment failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExperimentFailure {
    #[error(transparent)]
    Config(#[from] ParamsError),

    #[error("Validation failed with {} error(s): {}", .0.len(), .0.join("; "))]
    Validation(Vec<String>),

    #[error(transparent)]
    Authentication(ClientError),

    #[error(transparent)]
    Initialization(ClientError),

    #[error(transparent)]
    Execution(#[from] SandboxError),
}

/// Outcome of one experiment
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub sidecar: PathBuf,
    pub state: ExperimentState,
    /// Every state passed through, in order
    pub history: Vec<ExperimentState>,
    #[serde(serialize_with = "serialize_failure")]
    pub failure: Option<ExperimentFailure>,
    pub warnings: Vec<String>,
    pub tasks: Vec<SubmittedTask>,
    /// Module bodies executed by the caller script
    pub modules_executed: usize,
    pub bundle_checksum: Option<String>,
    pub log_file: Option<PathBuf>,
    pub elapsed_ms: u64,
}

impl ExperimentReport {
    pub fn new(sidecar: &Path) -> Self {
        Self {
            sidecar: sidecar.to_path_buf(),
            state: ExperimentState::Pending,
            history: vec![ExperimentState::Pending],
            failure: None,
            warnings: Vec::new(),
            tasks: Vec::new(),
            modules_executed: 0,
            bundle_checksum: None,
            log_file: None,
            elapsed_ms: 0,
        }
    }

    pub fn transition(&mut self, state: ExperimentState) {
        self.state = state;
        self.history.push(state);
    }

    /// Record `failure`, ending the experiment unless it already ended
    pub fn fail(&mut self, failure: ExperimentFailure) {
        if !self.state.is_terminal() {
            self.transition(ExperimentState::Failed);
        }
        self.failure = Some(failure);
    }

    pub fn reached(&self, state: ExperimentState) -> bool {
        self.history.contains(&state)
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
            && matches!(
                self.state,
                ExperimentState::DryRunComplete | ExperimentState::Reported
            )
    }

    /// File name of the sidecar, for summaries
    pub fn name(&self) -> String {
        self.sidecar
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.sidecar.display().to_string())
    }
}

impl fmt::Display for ExperimentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.succeeded() {
            write!(f, "✅ PASS {}", self.name())?;
            if !self.tasks.is_empty() {
                write!(f, " ({} task(s))", self.tasks.len())?;
            }
            Ok(())
        } else {
            write!(f, "❌ FAIL {}", self.name())?;
            if let Some(failure) = &self.failure {
                write!(f, ": {failure}")?;
            }
            Ok(())
        }
    }
}

fn serialize_failure<S: Serializer>(
    failure: &Option<ExperimentFailure>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match failure {
        Some(failure) => serializer.serialize_some(&failure.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Reports of a batch run, in processing order
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub reports: Vec<ExperimentReport>,
}

impl BatchSummary {
    pub fn passed(&self) -> usize {
        self.reports.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.passed()
    }

    pub fn succeeded(&self) -> bool {
        self.failed() == 0
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.reports {
            writeln!(f, "{report}")?;
        }
        write!(f, "{} passed, {} failed", self.passed(), self.failed())
    }
}
