//! Headless host for Google Earth Engine Code Editor scripts.
//!
//! Code Editor scripts assume a browser: `print`, `Map` and `ui` are globals,
//! `require('users/<account>/<repo>:<path>')` fetches shared modules from the
//! cloud and `Export.*` queues tasks in a side panel. This crate recreates
//! that surface on top of an embedded JavaScript engine so the same scripts
//! can run unattended, driven by JSON parameter bundles.
//!
//! - [`shims`]: inert `print` / `Map` / `ui` replacements
//! - [`resolver`]: `users/...` imports resolved against a local mirror, with
//!   a shared per-experiment [`cache`]
//! - [`geometry`]: polygons rebuilt from coordinate lists in a bundle
//! - [`sandbox`]: one evaluation context per experiment, with [`exports`]
//!   intercepted
//! - [`orchestrator`]: dry runs, single runs and batches, reported through
//!   [`report`] and [`notify`]
//!
//! The Earth Engine client itself sits behind the [`EarthEngine`] trait.

pub mod cache;
pub mod earth_engine;
pub mod exports;
pub mod geometry;
pub mod notify;
pub mod orchestrator;
pub mod report;
pub mod resolver;
pub mod sandbox;
pub mod shims;

pub use cache::{ModuleCache, SharedModuleCache};
pub use earth_engine::{ClientError, EarthEngine, ExportCategory, ExportDestination, ExportRequest, LocalEarthEngine};
pub use exports::{ExportMode, SubmittedTask};
pub use geometry::{GeometryError, GeometrySummary};
pub use notify::{Notifier, OutputMode};
pub use orchestrator::{BatchError, Orchestrator, RunnerConfig};
pub use report::{BatchSummary, ExperimentFailure, ExperimentReport, ExperimentState};
pub use resolver::{ModuleIdentifier, ModuleResolver, ResolveError};
pub use sandbox::{ExecutionOutcome, ExecutionSandbox, SandboxConfig, SandboxError};
pub use shims::ShimRegistry;
