//! Experiment orchestration: single runs, dry runs and batches.
//!
//! One experiment is one sidecar file. It is loaded, validated and (unless
//! the run is a dry run) executed against a freshly authenticated client in
//! its own sandbox. A batch runs every `*.json` sidecar of a directory, one
//! at a time, with the module cache cleared between experiments.

use convenient_params::{ParameterBundle, validate};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;
use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

use crate::cache::{ModuleCache, SharedModuleCache};
use crate::earth_engine::EarthEngine;
use crate::exports::{ExportMode, start_pending};
use crate::notify::{Notifier, OutputMode};
use crate::report::{BatchSummary, ExperimentFailure, ExperimentReport, ExperimentState};
use crate::sandbox::{ExecutionSandbox, INJECTED_PARAMETERS, PrintSink, SandboxConfig, SandboxError};

/// Service account key used when none is configured
pub const DEFAULT_KEY_FILE: &str = "private-key.json";

/// Environment variable overriding the key file
pub const KEY_FILE_ENV: &str = "GEE_KEY_FILE";

/// Directory experiment logs are written to
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Settings shared by every experiment of a run
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub caller_script: PathBuf,
    pub module_root: PathBuf,
    /// Validate only; never authenticate or execute
    pub dry_run: bool,
    pub output_mode: OutputMode,
    pub log_dir: PathBuf,
    /// Write a log file per experiment
    pub log_to_file: bool,
    pub key_file: PathBuf,
    /// Requested concurrency. Experiments currently always run one at a time.
    pub parallelism: usize,
    /// Forward exports to the client; otherwise they are only logged
    pub submit_exports: bool,
    /// Start submitted tasks the script left unstarted
    pub auto_start: bool,
    pub injected_name: String,
}

impl RunnerConfig {
    pub fn new(caller_script: impl Into<PathBuf>, module_root: impl Into<PathBuf>) -> Self {
        Self {
            caller_script: caller_script.into(),
            module_root: module_root.into(),
            dry_run: false,
            output_mode: OutputMode::Normal,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            log_to_file: true,
            key_file: PathBuf::from(DEFAULT_KEY_FILE),
            parallelism: 1,
            submit_exports: true,
            auto_start: true,
            injected_name: INJECTED_PARAMETERS.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("No experiment files (*.json) found in {0}")]
    NoExperiments(PathBuf),

    #[error("Failed to list {0}: {1}")]
    Io(PathBuf, String),
}

/// Runs experiments against one client
pub struct Orchestrator {
    config: RunnerConfig,
    client: Rc<dyn EarthEngine>,
    cache: SharedModuleCache,
}

impl Orchestrator {
    pub fn new(config: RunnerConfig, client: Rc<dyn EarthEngine>) -> Self {
        Self {
            config,
            client,
            cache: ModuleCache::shared(),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn cache(&self) -> &SharedModuleCache {
        &self.cache
    }

    /// Run the experiment described by `sidecar`
    ///
    /// Never fails as a whole: every failure ends up in the report. Cached
    /// modules from earlier experiments are dropped first.
    pub async fn run_experiment(&self, sidecar: &Path) -> ExperimentReport {
        self.run_at(sidecar, None).await
    }

    /// Run one experiment, `batch_position` being `(index, total)` within a batch
    async fn run_at(&self, sidecar: &Path, batch_position: Option<(usize, usize)>) -> ExperimentReport {
        let started = Instant::now();
        self.cache.borrow_mut().clear();
        let notifier = Rc::new(if self.config.log_to_file {
            Notifier::with_log_file(self.config.output_mode, &self.config.log_dir, sidecar)
        } else {
            Notifier::new(self.config.output_mode)
        });

        if let Some((index, total)) = batch_position {
            notifier.info(format!("[{}/{}] {}", index, total, sidecar.display()));
        }

        let mut report = ExperimentReport::new(sidecar);
        report.log_file = notifier.log_file().map(Path::to_path_buf);

        if let Err(failure) = self.drive(sidecar, &notifier, &mut report).await {
            if let ExperimentFailure::Execution(SandboxError::Runtime {
                stack: Some(stack), ..
            }) = &failure
            {
                notifier.debug(stack);
            }
            // Validation errors were already logged one by one
            let summary = match &failure {
                ExperimentFailure::Validation(errors) => {
                    format!("rejected with {} validation error(s)", errors.len())
                }
                other => other.to_string(),
            };
            notifier.error(format!("{}: {}", sidecar.display(), summary));
            report.fail(failure);
        }

        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        notifier.debug(format!(
            "{} finished as {} in {} ms",
            sidecar.display(),
            report.state,
            report.elapsed_ms
        ));
        report
    }

    async fn drive(
        &self,
        sidecar: &Path,
        notifier: &Rc<Notifier>,
        report: &mut ExperimentReport,
    ) -> Result<(), ExperimentFailure> {
        notifier.info(format!("Loading parameters from {}", sidecar.display()));
        let bundle = ParameterBundle::load(sidecar).await?;
        report.bundle_checksum = Some(bundle.checksum.clone());
        report.transition(ExperimentState::Loaded);

        let validation = validate(bundle.value());
        for warning in &validation.warnings {
            notifier.warning(warning);
        }
        report.warnings.clone_from(&validation.warnings);
        if !validation.is_valid() {
            for error in &validation.errors {
                notifier.error(error);
            }
            report.transition(ExperimentState::Rejected);
            return Err(ExperimentFailure::Validation(validation.errors));
        }
        report.transition(ExperimentState::Validated);

        if self.config.dry_run {
            notifier.success(format!(
                "Dry run: {} is valid ({} warning(s)); nothing executed",
                sidecar.display(),
                report.warnings.len()
            ));
            report.transition(ExperimentState::DryRunComplete);
            return Ok(());
        }

        notifier.info(format!("Authenticating with {}", self.client.name()));
        self.client
            .authenticate(&self.config.key_file)
            .await
            .map_err(ExperimentFailure::Authentication)?;
        report.transition(ExperimentState::Authenticated);

        self.client
            .initialize()
            .await
            .map_err(ExperimentFailure::Initialization)?;
        report.transition(ExperimentState::Initialized);

        let script = &self.config.caller_script;
        let source = tokio::fs::read_to_string(script)
            .await
            .map_err(|e| SandboxError::ScriptRead {
                path: script.clone(),
                message: e.to_string(),
            })?;

        let sink: PrintSink = {
            let notifier = Rc::clone(notifier);
            Rc::new(move |line: &str| notifier.script_output(line))
        };
        let export_mode = if self.config.submit_exports {
            ExportMode::Live
        } else {
            ExportMode::DryRun
        };
        let sandbox_config = SandboxConfig::new(&self.config.module_root)
            .with_export_mode(export_mode)
            .with_injected_name(self.config.injected_name.clone())
            .with_print_sink(sink);

        let mut sandbox =
            ExecutionSandbox::new(sandbox_config, Rc::clone(&self.client), Rc::clone(&self.cache))?;
        let geometry = sandbox.inject_parameters(bundle.value())?;
        if !geometry.is_empty() {
            notifier.debug(format!(
                "Rebuilt geometries: {:?}, aliased: {:?}",
                geometry.built, geometry.aliased
            ));
        }

        notifier.info(format!("Executing {}", script.display()));
        let executed = sandbox.execute(&source, script);
        report.transition(ExperimentState::Executed);

        let outcome = match executed {
            Ok(outcome) => outcome,
            Err(err) => {
                report.tasks = sandbox.tasks();
                report.transition(ExperimentState::Reported);
                return Err(err.into());
            }
        };

        let mut tasks = outcome.tasks;
        if self.config.auto_start {
            for err in start_pending(self.client.as_ref(), &mut tasks) {
                notifier.warning(err.to_string());
            }
        }
        report.tasks = tasks;
        report.modules_executed = outcome.modules_executed;
        report.transition(ExperimentState::Reported);

        notifier.success(format!(
            "{} completed: {} task(s) submitted, {} module(s) loaded",
            sidecar.display(),
            report.tasks.len(),
            report.modules_executed
        ));
        Ok(())
    }

    /// Run every sidecar in `dir`, in file name order
    ///
    /// Each experiment starts with an empty module cache.
    pub async fn run_batch(&self, dir: &Path) -> Result<BatchSummary, BatchError> {
        let sidecars = discover_sidecars(dir)?;
        if sidecars.is_empty() {
            return Err(BatchError::NoExperiments(dir.to_path_buf()));
        }
        if self.config.parallelism > 1 {
            warn!(
                "--parallel={} requested; experiments run sequentially",
                self.config.parallelism
            );
        }

        let total = sidecars.len();
        let mut summary = BatchSummary::default();
        for (index, sidecar) in sidecars.iter().enumerate() {
            let report = self.run_at(sidecar, Some((index + 1, total))).await;
            summary.reports.push(report);
        }
        self.cache.borrow_mut().clear();

        Ok(summary)
    }
}

/// `*.json` files directly inside `dir`, sorted by file name
pub fn discover_sidecars(dir: &Path) -> Result<Vec<PathBuf>, BatchError> {
    if !dir.is_dir() {
        return Err(BatchError::NotADirectory(dir.to_path_buf()));
    }

    let mut sidecars = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| BatchError::Io(dir.to_path_buf(), e.to_string()))?;
        let is_json = entry.path().extension().is_some_and(|ext| ext == "json");
        if entry.file_type().is_file() && is_json {
            sidecars.push(entry.into_path());
        }
    }
    Ok(sidecars)
}
