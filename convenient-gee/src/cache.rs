//! Module cache shared by every resolver of an orchestrator.

use boa_engine::JsValue;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Cache handle passed into resolvers
pub type SharedModuleCache = Rc<RefCell<ModuleCache>>;

/// Executed module exports keyed by the identifier used to require them
///
/// Keys are the identifiers exactly as written in `require(...)`, not the
/// resolved paths. The cache never expires on its own; the owner clears it
/// between experiments.
#[derive(Debug, Default)]
pub struct ModuleCache {
    entries: HashMap<String, JsValue>,
    executions: usize,
    hits: usize,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedModuleCache {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Cached exports for `identifier`, counting the hit
    pub fn lookup(&mut self, identifier: &str) -> Option<JsValue> {
        let value = self.entries.get(identifier).cloned();
        if value.is_some() {
            self.hits += 1;
        }
        value
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    pub fn insert(&mut self, identifier: impl Into<String>, exports: JsValue) {
        self.entries.insert(identifier.into(), exports);
    }

    /// Count one module body execution
    pub fn record_execution(&mut self) {
        self.executions += 1;
    }

    /// Module bodies executed since the last clear
    pub fn executions(&self) -> usize {
        self.executions
    }

    /// Cache hits since the last clear
    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry and reset the counters
    pub fn clear(&mut self) {
        self.entries.clear();
        self.executions = 0;
        self.hits = 0;
    }
}
