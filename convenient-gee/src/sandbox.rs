//! Execution sandbox for caller scripts
//!
//! One sandbox is one evaluation context for one experiment. It is populated
//! with the client's `ee` handle, a `require` bound to the experiment's module
//! root, the browser shims, a logging `print`, the `Export` namespace and,
//! when a bundle was injected, the parameter object.
//!
//! The caller script runs as the body of
//!
//! ```text
//! (function (ee, require, print, Map, ui, Export, injectedParameters) { <caller script>
//! })
//! ```
//!
//! where the last parameter only exists when parameters were injected.
//! Scripts detect headless mode with `typeof injectedParameters !== 'undefined'`.

use boa_engine::object::FunctionObjectBuilder;
use boa_engine::{Context, JsArgs, JsError, JsResult, JsString, JsValue, NativeFunction, Source};
use boa_gc::{Finalize, Trace, empty_trace};
use serde::Serialize;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::SharedModuleCache;
use crate::earth_engine::EarthEngine;
use crate::exports::{ExportInterceptor, ExportMode, SubmittedTask};
use crate::geometry::{self, GeometryError, GeometrySummary};
use crate::resolver::{ModuleResolver, ResolveError, error_message, error_stack};
use crate::shims::ShimRegistry;

/// Default name of the injected parameter object
pub const INJECTED_PARAMETERS: &str = "injectedParameters";

/// Host module names answering with the client's `ee` handle
pub const EE_MODULE_NAMES: &[&str] = &["@google/earthengine", "ee"];

const CALLER_BINDINGS: &[&str] = &["ee", "require", "print", "Map", "ui", "Export"];

const RESERVED_WORDS: &[&str] = &[
    "arguments", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "enum", "eval", "export", "extends", "false", "finally",
    "for", "function", "if", "implements", "import", "in", "instanceof", "interface", "let",
    "new", "null", "package", "private", "protected", "public", "return", "static", "super",
    "switch", "this", "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

/// Receives every line printed by the caller script
pub type PrintSink = Rc<dyn Fn(&str)>;

/// Sandbox settings
#[derive(Clone)]
pub struct SandboxConfig {
    /// Local mirror of the `users/...` repositories
    pub module_root: PathBuf,
    pub export_mode: ExportMode,
    /// Name the parameter object is bound to
    pub injected_name: String,
    /// Where printed lines go. Without a sink they are logged at info level.
    pub print_sink: Option<PrintSink>,
}

impl SandboxConfig {
    pub fn new(module_root: impl Into<PathBuf>) -> Self {
        Self {
            module_root: module_root.into(),
            export_mode: ExportMode::Live,
            injected_name: INJECTED_PARAMETERS.to_string(),
            print_sink: None,
        }
    }

    pub fn with_export_mode(mut self, mode: ExportMode) -> Self {
        self.export_mode = mode;
        self
    }

    pub fn with_injected_name(mut self, name: impl Into<String>) -> Self {
        self.injected_name = name.into();
        self
    }

    pub fn with_print_sink(mut self, sink: PrintSink) -> Self {
        self.print_sink = Some(sink);
        self
    }
}

/// Result of a successful caller script run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionOutcome {
    /// Lines printed by the caller script
    pub printed: Vec<String>,
    /// Exports submitted while the script ran
    pub tasks: Vec<SubmittedTask>,
    /// Module bodies executed (cache misses)
    pub modules_executed: usize,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SandboxError {
    #[error("Failed to set up evaluation context: {0}")]
    Setup(String),

    #[error("'{0}' cannot be used as the parameter binding name")]
    InvalidBindingName(String),

    #[error("Cannot read caller script {path}: {message}")]
    ScriptRead { path: PathBuf, message: String },

    #[error("Failed to inject parameters: {0}")]
    Injection(String),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Module(#[from] ResolveError),

    #[error("Script error: {message}")]
    Runtime {
        message: String,
        stack: Option<String>,
    },
}

/// Evaluation context for one experiment
pub struct ExecutionSandbox {
    context: Context,
    injected_name: String,
    ee: JsValue,
    shims: ShimRegistry,
    resolver: Rc<ModuleResolver>,
    exports: ExportInterceptor,
    export_namespace: JsValue,
    print: JsValue,
    printed: Rc<RefCell<Vec<String>>>,
    parameters: Option<JsValue>,
}

impl ExecutionSandbox {
    /// Build a fresh context with every binding installed
    pub fn new(
        config: SandboxConfig,
        client: Rc<dyn EarthEngine>,
        cache: SharedModuleCache,
    ) -> Result<Self, SandboxError> {
        if !is_binding_name(&config.injected_name) {
            return Err(SandboxError::InvalidBindingName(config.injected_name));
        }

        let setup = |e: JsError| SandboxError::Setup(e.to_string());
        let mut context = Context::default();
        let ee = client.install(&mut context).map_err(setup)?;
        let shims = ShimRegistry::install(&mut context).map_err(setup)?;

        let resolver = ModuleResolver::new(&config.module_root, cache, ee.clone(), shims.clone());
        for name in EE_MODULE_NAMES {
            resolver.register_host_module(*name, ee.clone());
        }

        let printed = Rc::new(RefCell::new(Vec::new()));
        let sink = print_sink(Rc::clone(&printed), config.print_sink, &mut context);
        let print = shims.logging_print(sink, &mut context).map_err(setup)?;

        let exports = ExportInterceptor::new(config.export_mode, Rc::clone(&client));
        let export_namespace = exports.install(&shims, &mut context).map_err(setup)?;

        debug!(
            "Sandbox ready (client: {}, module root: {}, exports: {:?})",
            client.name(),
            config.module_root.display(),
            config.export_mode
        );

        Ok(Self {
            context,
            injected_name: config.injected_name,
            ee,
            shims,
            resolver,
            exports,
            export_namespace,
            print,
            printed,
            parameters: None,
        })
    }

    /// Convert `bundle` into a script object, rebuild its geometries and
    /// bind it for the caller script
    pub fn inject_parameters(
        &mut self,
        bundle: &serde_json::Value,
    ) -> Result<GeometrySummary, SandboxError> {
        let value = JsValue::from_json(bundle, &mut self.context)
            .map_err(|e| SandboxError::Injection(e.to_string()))?;
        let summary = geometry::reconstruct(&value, &self.ee, &mut self.context)?;
        self.parameters = Some(value);
        Ok(summary)
    }

    pub fn has_parameters(&self) -> bool {
        self.parameters.is_some()
    }

    pub fn resolver(&self) -> &Rc<ModuleResolver> {
        &self.resolver
    }

    /// Resolve an import the way the caller script would
    pub fn resolve(&mut self, identifier: &str) -> Result<JsValue, ResolveError> {
        self.resolver.resolve(identifier, &mut self.context)
    }

    /// Lines printed so far
    pub fn printed(&self) -> Vec<String> {
        self.printed.borrow().clone()
    }

    pub fn tasks(&self) -> Vec<SubmittedTask> {
        self.exports.tasks()
    }

    /// Read `script_path` and execute it
    pub fn execute_file(&mut self, script_path: &Path) -> Result<ExecutionOutcome, SandboxError> {
        let source =
            std::fs::read_to_string(script_path).map_err(|e| SandboxError::ScriptRead {
                path: script_path.to_path_buf(),
                message: e.to_string(),
            })?;
        self.execute(&source, script_path)
    }

    /// Execute caller script `source`, read from `script_path`
    ///
    /// Any exception escaping the script fails the run. Nothing the script
    /// did before failing is salvaged.
    pub fn execute(
        &mut self,
        source: &str,
        script_path: &Path,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let base_dir = script_path.parent().map(Path::to_path_buf);
        let require = self.resolver.require_function(base_dir, &mut self.context);

        let mut names: Vec<&str> = CALLER_BINDINGS.to_vec();
        let mut args = vec![
            self.ee.clone(),
            require,
            self.print.clone(),
            self.shims.map(),
            self.shims.ui(),
            self.export_namespace.clone(),
        ];
        if let Some(parameters) = &self.parameters {
            names.push(&self.injected_name);
            args.push(parameters.clone());
        }

        // Source starts on the wrapper's first line so reported lines match the file
        let wrapped = format!("(function ({}) {{ {source}\n}})", names.join(", "));
        info!("Executing {}", script_path.display());
        if let Err(err) = run_wrapped(&mut self.context, &wrapped, script_path, &args) {
            return Err(self.script_failure(&err));
        }

        Ok(ExecutionOutcome {
            printed: self.printed(),
            tasks: self.exports.tasks(),
            modules_executed: self.resolver.cache().borrow().executions(),
        })
    }

    fn script_failure(&mut self, err: &JsError) -> SandboxError {
        let message = error_message(err, &mut self.context);
        if let Some(failure) = self.resolver.take_failure(&message) {
            return SandboxError::Module(failure);
        }
        SandboxError::Runtime {
            message,
            stack: error_stack(err),
        }
    }
}

fn run_wrapped(
    context: &mut Context,
    wrapped: &str,
    script_path: &Path,
    args: &[JsValue],
) -> JsResult<JsValue> {
    let function = context.eval(Source::from_bytes(wrapped.as_bytes()).with_path(script_path))?;
    let callable = function.as_callable().ok_or_else(|| {
        boa_engine::JsNativeError::typ().with_message("caller script wrapper is not callable")
    })?;
    callable.call(&JsValue::undefined(), args, context)
}

fn is_binding_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !RESERVED_WORDS.contains(&name)
        && !CALLER_BINDINGS.contains(&name)
}

#[derive(Finalize)]
struct PrintCapture {
    printed: Rc<RefCell<Vec<String>>>,
    sink: Option<PrintSink>,
}

// SAFETY: holds no garbage-collected values of its own.
unsafe impl Trace for PrintCapture {
    empty_trace!();
}

fn print_sink(
    printed: Rc<RefCell<Vec<String>>>,
    sink: Option<PrintSink>,
    context: &mut Context,
) -> JsValue {
    let native = NativeFunction::from_copy_closure_with_captures(
        |_this, args, captures: &PrintCapture, context| {
            let line = args.get_or_undefined(0).to_string(context)?.to_std_string_escaped();
            match &captures.sink {
                Some(sink) => sink(&line),
                None => info!("{}", line),
            }
            captures.printed.borrow_mut().push(line);
            Ok(JsValue::undefined())
        },
        PrintCapture { printed, sink },
    );
    FunctionObjectBuilder::new(context.realm(), native)
        .name(JsString::from("printSink"))
        .length(1)
        .constructor(false)
        .build()
        .into()
}
