//! Interception of `Export.*` calls made by scripts.

use boa_engine::object::FunctionObjectBuilder;
use boa_engine::{Context, JsArgs, JsNativeError, JsResult, JsString, JsValue, NativeFunction};
use boa_gc::{Finalize, Trace, empty_trace};
use serde::Serialize;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{info, warn};

use crate::earth_engine::{
    ClientError, EarthEngine, ExportCategory, ExportDestination, ExportRequest,
};
use crate::shims::ShimRegistry;

/// How export calls are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExportMode {
    /// Log the intended export and return an inert handle
    DryRun,
    /// Forward to the client and record the submitted task
    Live,
}

/// Export forwarded to the client during one experiment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmittedTask {
    pub id: String,
    pub category: ExportCategory,
    pub destination: ExportDestination,
    pub config: Value,
    pub started: bool,
}

/// Submitted tasks of one experiment, in submission order
pub type TaskLedger = Rc<RefCell<Vec<SubmittedTask>>>;

/// Builds the `Export` namespace for one evaluation context
pub struct ExportInterceptor {
    mode: ExportMode,
    client: Rc<dyn EarthEngine>,
    ledger: TaskLedger,
}

impl ExportInterceptor {
    pub fn new(mode: ExportMode, client: Rc<dyn EarthEngine>) -> Self {
        Self {
            mode,
            client,
            ledger: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn mode(&self) -> ExportMode {
        self.mode
    }

    /// Snapshot of the tasks recorded so far
    pub fn tasks(&self) -> Vec<SubmittedTask> {
        self.ledger.borrow().clone()
    }

    /// Create the `Export` object with native submit and start hooks
    pub fn install(&self, shims: &ShimRegistry, context: &mut Context) -> JsResult<JsValue> {
        let capture = || ExportCapture {
            mode: self.mode,
            client: Rc::clone(&self.client),
            ledger: Rc::clone(&self.ledger),
        };

        let submit = NativeFunction::from_copy_closure_with_captures(
            |_this, args, captures: &ExportCapture, context| {
                let category = args.get_or_undefined(0).to_string(context)?.to_std_string_escaped();
                let destination = args.get_or_undefined(1).to_string(context)?.to_std_string_escaped();
                let payload = args.get_or_undefined(2).to_string(context)?.to_std_string_escaped();

                let (Some(category), Some(destination)) = (
                    ExportCategory::parse(&category),
                    ExportDestination::parse(&destination),
                ) else {
                    let message = format!("Unsupported export Export.{category}.{destination}");
                    return Err(JsNativeError::typ()
                        .with_message(message)
                        .into());
                };
                let config = serde_json::from_str(&payload).unwrap_or(Value::String(payload));
                let request = ExportRequest {
                    category,
                    destination,
                    config,
                };
                captures.submit(&request)
            },
            capture(),
        );

        let start = NativeFunction::from_copy_closure_with_captures(
            |_this, args, captures: &ExportCapture, context| {
                let id = args.get_or_undefined(0).to_string(context)?.to_std_string_escaped();
                captures.start(&id)?;
                Ok(JsValue::undefined())
            },
            capture(),
        );

        let submit = FunctionObjectBuilder::new(context.realm(), submit)
            .name(JsString::from("submitExport"))
            .length(3)
            .constructor(false)
            .build();
        let start = FunctionObjectBuilder::new(context.realm(), start)
            .name(JsString::from("startTask"))
            .length(1)
            .constructor(false)
            .build();

        shims.export_namespace(submit.into(), start.into(), context)
    }
}

/// Start every task in `tasks` that has not been started yet
///
/// Returns the failures. Tasks that fail to start stay unstarted.
pub fn start_pending(client: &dyn EarthEngine, tasks: &mut [SubmittedTask]) -> Vec<ClientError> {
    let mut failures = Vec::new();
    for task in tasks.iter_mut().filter(|t| !t.started) {
        match client.start_task(&task.id) {
            Ok(()) => {
                info!("Started task {}", task.id);
                task.started = true;
            }
            Err(err) => {
                warn!("Could not start task {}: {}", task.id, err);
                failures.push(err);
            }
        }
    }
    failures
}

#[derive(Finalize)]
struct ExportCapture {
    mode: ExportMode,
    client: Rc<dyn EarthEngine>,
    ledger: TaskLedger,
}

// SAFETY: holds no garbage-collected values of its own.
unsafe impl Trace for ExportCapture {
    empty_trace!();
}

impl ExportCapture {
    fn submit(&self, request: &ExportRequest) -> JsResult<JsValue> {
        match self.mode {
            ExportMode::DryRun => {
                info!("[dry-run] {} not submitted: {}", request, request.config);
                Ok(JsValue::null())
            }
            ExportMode::Live => {
                let id = self.client.submit_export(request).map_err(to_js_error)?;
                info!("Submitted {} as task {}", request, id);
                self.ledger.borrow_mut().push(SubmittedTask {
                    id: id.clone(),
                    category: request.category,
                    destination: request.destination,
                    config: request.config.clone(),
                    started: false,
                });
                Ok(JsValue::from(JsString::from(id.as_str())))
            }
        }
    }

    fn start(&self, id: &str) -> JsResult<()> {
        self.client.start_task(id).map_err(to_js_error)?;
        info!("Started task {}", id);
        if let Some(task) = self.ledger.borrow_mut().iter_mut().find(|t| t.id == id) {
            task.started = true;
        }
        Ok(())
    }
}

fn to_js_error(err: ClientError) -> boa_engine::JsError {
    JsNativeError::error()
        .with_message(err.to_string())
        .into()
}
