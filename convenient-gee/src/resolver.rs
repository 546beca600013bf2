//! Module resolver for Code Editor style imports
//!
//! Code Editor scripts import each other with
//! `require('users/<account>/<repo>:<path>')`. The resolver maps those
//! identifiers onto a local checkout of the repositories (the module root),
//! executes each module once and hands every importer the same exports.
//!
//! Each module body runs as a function whose parameters are the only
//! bindings it can see:
//!
//! ```text
//! (function (exports, module, require, ee, print, Map, ui, __filename, __dirname) { <module source>
//! })
//! ```
//!
//! Module-local declarations stay inside that function. The function is
//! compiled in a fresh realm, so even sloppy-mode globals a module creates
//! are its own. The `require` handed in is this same resolver, so
//! transitive imports behave identically.
//!
//! Identifiers outside the `users/` namespace fall back to host modules:
//! registered names (the client's `ee` handle as `@google/earthengine`) and
//! relative or absolute file paths.

use boa_engine::object::{FunctionObjectBuilder, ObjectInitializer};
use boa_engine::property::Attribute;
use boa_engine::{
    Context, JsArgs, JsError, JsNativeError, JsResult, JsString, JsValue, NativeFunction, Source, js_string,
};
use boa_gc::{Finalize, Trace, empty_trace};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use thiserror::Error;
use tracing::debug;

use crate::cache::SharedModuleCache;
use crate::shims::ShimRegistry;

/// Prefix of identifiers that live in the Code Editor repository namespace
pub const GEE_PREFIX: &str = "users/";

/// Failures while resolving an import
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// Computed path does not exist
    #[error("Module not found: {local_path} (required as '{identifier}')")]
    ModuleNotFound {
        local_path: PathBuf,
        identifier: String,
    },

    /// Module threw while running its own top-level code
    #[error("Error executing module {local_path}: {message}")]
    ModuleExecution { local_path: PathBuf, message: String },

    /// File exists but could not be read
    #[error("Cannot read module {local_path}: {message}")]
    ModuleRead { local_path: PathBuf, message: String },

    /// A module required itself, directly or transitively
    #[error("Circular import detected: {0}")]
    CircularImport(String),

    /// Not a repository identifier, and no host module answers to it
    #[error("Cannot find module '{identifier}'")]
    HostModuleNotFound { identifier: String },
}

/// A parsed `users/<account>/<repo>[:<path>]` identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleIdentifier {
    raw: String,
    repo_path: String,
    internal_path: String,
}

impl ModuleIdentifier {
    /// Parse `identifier`, or `None` if it is not in the `users/` namespace
    pub fn parse(identifier: &str) -> Option<Self> {
        if !identifier.starts_with(GEE_PREFIX) {
            return None;
        }
        let (repo_path, internal_path) = identifier.split_once(':').unwrap_or((identifier, ""));
        Some(Self {
            raw: identifier.to_string(),
            repo_path: repo_path.to_string(),
            internal_path: internal_path.to_string(),
        })
    }

    /// The identifier as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn repo_path(&self) -> &str {
        &self.repo_path
    }

    pub fn internal_path(&self) -> &str {
        &self.internal_path
    }

    /// Last segment of the repository path, the local folder name
    pub fn folder_name(&self) -> &str {
        self.repo_path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.repo_path)
    }

    /// `<module_root>/<folder>/<internal path>` with `.js` appended if missing
    pub fn local_path(&self, module_root: &Path) -> PathBuf {
        let mut path = module_root.join(self.folder_name());
        let internal = self.internal_path.trim_start_matches('/');
        if !internal.is_empty() {
            path.push(internal);
        }
        with_js_extension(path)
    }
}

fn with_js_extension(path: PathBuf) -> PathBuf {
    if path.to_string_lossy().ends_with(".js") {
        return path;
    }
    let mut raw = path.into_os_string();
    raw.push(".js");
    PathBuf::from(raw)
}

/// Resolves imports against one module root
pub struct ModuleResolver {
    module_root: PathBuf,
    cache: SharedModuleCache,
    ee: JsValue,
    shims: ShimRegistry,
    host_modules: RefCell<HashMap<String, JsValue>>,
    /// Cache keys of modules currently executing, outermost first
    loading: RefCell<Vec<String>>,
    last_failure: RefCell<Option<ResolveError>>,
}

impl ModuleResolver {
    pub fn new(
        module_root: impl Into<PathBuf>,
        cache: SharedModuleCache,
        ee: JsValue,
        shims: ShimRegistry,
    ) -> Rc<Self> {
        Rc::new(Self {
            module_root: module_root.into(),
            cache,
            ee,
            shims,
            host_modules: RefCell::new(HashMap::new()),
            loading: RefCell::new(Vec::new()),
            last_failure: RefCell::new(None),
        })
    }

    pub fn module_root(&self) -> &Path {
        &self.module_root
    }

    pub fn cache(&self) -> &SharedModuleCache {
        &self.cache
    }

    /// Make `value` available as `require(name)`
    pub fn register_host_module(&self, name: impl Into<String>, value: JsValue) {
        self.host_modules.borrow_mut().insert(name.into(), value);
    }

    /// Resolve `identifier`, with relative host paths taken from the module root
    pub fn resolve(
        self: &Rc<Self>,
        identifier: &str,
        context: &mut Context,
    ) -> Result<JsValue, ResolveError> {
        self.resolve_from(identifier, None, context)
    }

    /// Resolve `identifier` as required from a file in `base_dir`
    pub fn resolve_from(
        self: &Rc<Self>,
        identifier: &str,
        base_dir: Option<&Path>,
        context: &mut Context,
    ) -> Result<JsValue, ResolveError> {
        match ModuleIdentifier::parse(identifier) {
            Some(id) => {
                let local_path = id.local_path(&self.module_root);
                self.load(id.as_str(), &local_path, id.as_str(), context)
            }
            None => self.resolve_host(identifier, base_dir, context),
        }
    }

    fn resolve_host(
        self: &Rc<Self>,
        identifier: &str,
        base_dir: Option<&Path>,
        context: &mut Context,
    ) -> Result<JsValue, ResolveError> {
        let hosted = self.host_modules.borrow().get(identifier).cloned();
        if let Some(value) = hosted {
            return Ok(value);
        }

        let is_file = identifier.starts_with("./")
            || identifier.starts_with("../")
            || Path::new(identifier).is_absolute();
        if !is_file {
            return Err(ResolveError::HostModuleNotFound {
                identifier: identifier.to_string(),
            });
        }

        let base = base_dir.unwrap_or(&self.module_root);
        let local_path = with_js_extension(base.join(identifier));
        let key = local_path.to_string_lossy().into_owned();
        self.load(&key, &local_path, identifier, context)
    }

    fn load(
        self: &Rc<Self>,
        key: &str,
        local_path: &Path,
        identifier: &str,
        context: &mut Context,
    ) -> Result<JsValue, ResolveError> {
        let cached = self.cache.borrow_mut().lookup(key);
        if let Some(exports) = cached {
            debug!("Module cache hit: {}", key);
            return Ok(exports);
        }

        if !local_path.is_file() {
            return Err(ResolveError::ModuleNotFound {
                local_path: local_path.to_path_buf(),
                identifier: identifier.to_string(),
            });
        }

        if self.loading.borrow().iter().any(|k| k == key) {
            let mut chain = self.loading.borrow().clone();
            chain.push(key.to_string());
            return Err(ResolveError::CircularImport(chain.join(" -> ")));
        }

        let source =
            std::fs::read_to_string(local_path).map_err(|e| ResolveError::ModuleRead {
                local_path: local_path.to_path_buf(),
                message: e.to_string(),
            })?;

        debug!("Loading module {} from {}", identifier, local_path.display());
        self.loading.borrow_mut().push(key.to_string());
        self.cache.borrow_mut().record_execution();
        let result = self.execute_module(&source, local_path, context);
        self.loading.borrow_mut().pop();

        let exports = result.map_err(|e| ResolveError::ModuleExecution {
            local_path: local_path.to_path_buf(),
            message: error_message(&e, context),
        })?;
        self.cache.borrow_mut().insert(key, exports.clone());
        Ok(exports)
    }

    /// Run a module body in a realm of its own
    ///
    /// Assignments to undeclared names land on that realm's global object,
    /// so they are invisible to the caller script and to other modules.
    fn execute_module(
        self: &Rc<Self>,
        source: &str,
        local_path: &Path,
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let realm = context.create_realm()?;
        let previous = context.enter_realm(realm);
        let result = self.run_module_body(source, local_path, context);
        context.enter_realm(previous);
        result
    }

    fn run_module_body(
        self: &Rc<Self>,
        source: &str,
        local_path: &Path,
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let wrapped = format!(
            "(function (exports, module, require, ee, print, Map, ui, __filename, __dirname) {{ {source}\n}})"
        );
        let function = context.eval(Source::from_bytes(wrapped.as_bytes()).with_path(local_path))?;
        let callable = function
            .as_callable()
            .ok_or_else(|| JsNativeError::typ().with_message("module wrapper is not callable"))?;

        let exports: JsValue = ObjectInitializer::new(context).build().into();
        let module: JsValue = ObjectInitializer::new(context)
            .property(js_string!("exports"), exports.clone(), Attribute::all())
            .build()
            .into();

        let directory = local_path.parent().map(Path::to_path_buf).unwrap_or_default();
        let require = self.require_function(Some(directory.clone()), context);
        let args = [
            exports.clone(),
            module.clone(),
            require,
            self.ee.clone(),
            self.shims.print(),
            self.shims.map(),
            self.shims.ui(),
            JsValue::from(JsString::from(local_path.to_string_lossy().as_ref())),
            JsValue::from(JsString::from(directory.to_string_lossy().as_ref())),
        ];
        callable.call(&exports, &args, context)?;

        self.shims.pick_exports(&module, &exports, context)
    }

    /// Build a script-side `require` bound to this resolver
    ///
    /// Relative host paths are resolved against `base_dir`. A failing
    /// resolution throws a script error and is also remembered, see
    /// [`ModuleResolver::take_failure`].
    pub fn require_function(self: &Rc<Self>, base_dir: Option<PathBuf>, context: &mut Context) -> JsValue {
        let native = NativeFunction::from_copy_closure_with_captures(
            |_this, args, captures: &RequireCapture, context| {
                let identifier = args
                    .get_or_undefined(0)
                    .to_string(context)?
                    .to_std_string_escaped();
                let Some(resolver) = captures.resolver.upgrade() else {
                    return Err(JsNativeError::error()
                        .with_message("module resolver is no longer available")
                        .into());
                };
                match resolver.resolve_from(&identifier, captures.base_dir.as_deref(), context) {
                    Ok(exports) => Ok(exports),
                    Err(err) => {
                        let message = err.to_string();
                        *resolver.last_failure.borrow_mut() = Some(err);
                        Err(JsNativeError::error()
                            .with_message(message)
                            .into())
                    }
                }
            },
            RequireCapture {
                resolver: Rc::downgrade(self),
                base_dir,
            },
        );
        FunctionObjectBuilder::new(context.realm(), native)
            .name(js_string!("require"))
            .length(1)
            .constructor(false)
            .build()
            .into()
    }

    /// The last resolution failure, if the script error `message` came from it
    pub fn take_failure(&self, message: &str) -> Option<ResolveError> {
        let failure = self.last_failure.borrow_mut().take()?;
        message.contains(&failure.to_string()).then_some(failure)
    }
}

/// `Kind: message` for script errors, the thrown value's text otherwise
pub(crate) fn error_message(err: &JsError, context: &mut Context) -> String {
    match err.try_native(context) {
        Ok(native) => native.to_string(),
        Err(_) => {
            let rendered = err.to_string();
            match rendered.split_once("\n    at ") {
                Some((thrown, _)) => thrown.to_string(),
                None => rendered,
            }
        }
    }
}

/// Call sites recorded when `err` was thrown, innermost first
pub(crate) fn error_stack(err: &JsError) -> Option<String> {
    let rendered = err.to_string();
    let (_, frames) = rendered.split_once("\n    at ")?;
    Some(format!("    at {frames}"))
}

#[derive(Finalize)]
struct RequireCapture {
    resolver: Weak<ModuleResolver>,
    base_dir: Option<PathBuf>,
}

// SAFETY: a weak handle and a path; nothing here is garbage collected.
unsafe impl Trace for RequireCapture {
    empty_trace!();
}
