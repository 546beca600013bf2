//! Earth Engine client abstraction
//!
//! Scripts only ever see the `ee` handle a client installs into their
//! evaluation context. The orchestrator drives the rest of the lifecycle
//! through [`EarthEngine`]: authenticate, initialize, then forward export
//! calls while the script runs.
//!
//! [`LocalEarthEngine`] is the built-in offline client. Its `ee` handle builds
//! a deferred computation graph instead of talking to Google servers, so
//! scripts construct their images, collections and geometries exactly as they
//! would in the Code Editor and every export is recorded as a local task.

use async_trait::async_trait;
use boa_engine::{Context, JsResult, JsValue, Source};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Errors raised by an Earth Engine client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Export submission failed: {0}")]
    Export(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),
}

/// What an export produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportCategory {
    Image,
    Table,
    Video,
}

impl ExportCategory {
    pub const ALL: [ExportCategory; 3] = [Self::Image, Self::Table, Self::Video];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Table => "table",
            Self::Video => "video",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

/// Where an export is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportDestination {
    #[serde(rename = "toAsset")]
    Asset,
    #[serde(rename = "toDrive")]
    Drive,
    #[serde(rename = "toCloudStorage")]
    CloudStorage,
}

impl ExportDestination {
    pub const ALL: [ExportDestination; 3] = [Self::Asset, Self::Drive, Self::CloudStorage];

    /// Name of the `Export.<category>` method for this destination
    pub fn method_name(self) -> &'static str {
        match self {
            Self::Asset => "toAsset",
            Self::Drive => "toDrive",
            Self::CloudStorage => "toCloudStorage",
        }
    }

    pub fn parse(method: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.method_name() == method)
    }
}

/// One export call made by a script
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRequest {
    pub category: ExportCategory,
    pub destination: ExportDestination,
    /// Export configuration as passed by the script
    pub config: serde_json::Value,
}

impl fmt::Display for ExportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Export.{}.{}",
            self.category.as_str(),
            self.destination.method_name()
        )?;
        if let Some(description) = self.config.get("description").and_then(|d| d.as_str()) {
            write!(f, " ({description})")?;
        }
        Ok(())
    }
}

/// Client for the Earth Engine service
///
/// Clients are driven from a single thread: the `ee` handle lives inside a
/// script engine context, so the trait is `?Send`.
#[async_trait(?Send)]
pub trait EarthEngine {
    /// Client name (for logging)
    fn name(&self) -> &str;

    /// Authenticate with the credentials in `key_file`
    async fn authenticate(&self, key_file: &Path) -> Result<(), ClientError>;

    /// Initialize the session. Requires a prior successful authentication.
    async fn initialize(&self) -> Result<(), ClientError>;

    /// Build the `ee` handle bound into every evaluation context
    fn install(&self, context: &mut Context) -> JsResult<JsValue>;

    /// Submit an export, returning the new task id
    fn submit_export(&self, request: &ExportRequest) -> Result<String, ClientError>;

    /// Start a previously submitted task
    fn start_task(&self, task_id: &str) -> Result<(), ClientError>;
}

/// Service account key file contents
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// Lifecycle of a task held by [`LocalEarthEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Ready,
    Running,
}

/// Task recorded by [`LocalEarthEngine`]
#[derive(Debug, Clone, Serialize)]
pub struct LocalTask {
    pub id: String,
    pub request: ExportRequest,
    pub state: TaskState,
}

#[derive(Debug, Default)]
struct Session {
    account: Option<ServiceAccountKey>,
    initialized: bool,
    tasks: Vec<LocalTask>,
}

/// Offline Earth Engine client
#[derive(Debug, Default)]
pub struct LocalEarthEngine {
    session: RefCell<Session>,
}

impl LocalEarthEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks submitted since the last authentication, in submission order
    pub fn tasks(&self) -> Vec<LocalTask> {
        self.session.borrow().tasks.clone()
    }

    /// Service account of the current session
    pub fn account(&self) -> Option<String> {
        self.session
            .borrow()
            .account
            .as_ref()
            .map(|key| key.client_email.clone())
    }
}

#[async_trait(?Send)]
impl EarthEngine for LocalEarthEngine {
    fn name(&self) -> &str {
        "local"
    }

    async fn authenticate(&self, key_file: &Path) -> Result<(), ClientError> {
        let content = tokio::fs::read_to_string(key_file).await.map_err(|e| {
            ClientError::Authentication(format!(
                "cannot read key file {}: {e}",
                key_file.display()
            ))
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&content).map_err(|e| {
            ClientError::Authentication(format!(
                "invalid service account key {}: {e}",
                key_file.display()
            ))
        })?;
        if key.private_key.trim().is_empty() {
            return Err(ClientError::Authentication(format!(
                "service account key {} has an empty private_key",
                key_file.display()
            )));
        }

        info!("Authenticated as {}", key.client_email);
        let mut session = self.session.borrow_mut();
        session.account = Some(key);
        session.initialized = false;
        session.tasks.clear();
        Ok(())
    }

    async fn initialize(&self) -> Result<(), ClientError> {
        let mut session = self.session.borrow_mut();
        let Some(account) = session.account.as_ref() else {
            return Err(ClientError::Initialization(
                "client is not authenticated".to_string(),
            ));
        };
        debug!(
            "Initialized offline session (project {})",
            account.project_id.as_deref().unwrap_or("<none>")
        );
        session.initialized = true;
        Ok(())
    }

    fn install(&self, context: &mut Context) -> JsResult<JsValue> {
        context.eval(Source::from_bytes(EE_PRELUDE))
    }

    fn submit_export(&self, request: &ExportRequest) -> Result<String, ClientError> {
        let mut session = self.session.borrow_mut();
        if !session.initialized {
            return Err(ClientError::Export(
                "client is not initialized".to_string(),
            ));
        }
        let id = Uuid::new_v4().to_string();
        session.tasks.push(LocalTask {
            id: id.clone(),
            request: request.clone(),
            state: TaskState::Ready,
        });
        Ok(id)
    }

    fn start_task(&self, task_id: &str) -> Result<(), ClientError> {
        let mut session = self.session.borrow_mut();
        let task = session
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| ClientError::UnknownTask(task_id.to_string()))?;
        task.state = TaskState::Running;
        Ok(())
    }
}

/// Deferred computation model behind the offline `ee` handle.
///
/// `ee.<Name>(...)` and `new ee.<Name>(...)` create nodes, any method call on
/// a node creates a new node with the receiver recorded. Nodes serialise to
/// JSON through `toJSON`. Geometry constructors expose `type`,
/// `coordinates` and `geodesic`.
const EE_PRELUDE: &str = r#"
(function () {
    'use strict';
    var OFFLINE = 'Earth Engine evaluation is not available in the offline client';

    function describe(node) {
        var out = { functionName: node.func, arguments: node.args };
        if (node.receiver) {
            out.receiver = describe(node.receiver);
        }
        return out;
    }

    function computed(node) {
        return new Proxy(node, {
            get: function (target, prop) {
                if (typeof prop === 'symbol' || Object.prototype.hasOwnProperty.call(target, prop)) {
                    return target[prop];
                }
                if (prop === 'toJSON') {
                    return function () { return describe(target); };
                }
                if (prop === 'then') {
                    return undefined;
                }
                if (prop === 'getInfo') {
                    return function (callback) {
                        if (typeof callback === 'function') {
                            callback(undefined, OFFLINE);
                        }
                        return null;
                    };
                }
                if (prop === 'evaluate') {
                    return function (callback) {
                        if (typeof callback === 'function') {
                            callback(undefined, OFFLINE);
                        }
                    };
                }
                return function () {
                    return computed({
                        kind: target.kind,
                        func: target.kind + '.' + prop,
                        args: Array.prototype.slice.call(arguments),
                        receiver: target
                    });
                };
            }
        });
    }

    function construct(path, args) {
        var segments = path.split('.');
        var node = { kind: segments[0], func: path, args: args, receiver: null };
        if (segments[0] === 'Geometry' && segments.length > 1) {
            node.type = segments[segments.length - 1];
            node.coordinates = args.length > 0 ? args[0] : null;
            node.geodesic = typeof args[2] === 'boolean' ? args[2] : false;
        }
        return computed(node);
    }

    function namespace(path) {
        var target = function () {};
        return new Proxy(target, {
            get: function (t, prop) {
                if (typeof prop === 'symbol' || prop === 'prototype') {
                    return t[prop];
                }
                if (prop === 'toJSON') {
                    return function () { return { namespace: path }; };
                }
                if (prop === 'then') {
                    return undefined;
                }
                return namespace(path + '.' + prop);
            },
            apply: function (t, self, args) {
                return construct(path, args);
            },
            construct: function (t, args) {
                return construct(path, args);
            }
        });
    }

    function ready() {
        for (var i = 0; i < arguments.length; i++) {
            if (typeof arguments[i] === 'function') {
                arguments[i]();
                return;
            }
        }
    }

    var root = {
        initialize: ready,
        Initialize: ready,
        reset: function () {},
        data: {
            authenticateViaPrivateKey: ready,
            authenticateViaOauth: ready,
            setProject: function () {}
        }
    };

    return new Proxy(root, {
        get: function (t, prop) {
            if (typeof prop === 'symbol' || Object.prototype.hasOwnProperty.call(t, prop)) {
                return t[prop];
            }
            if (prop === 'toJSON' || prop === 'then') {
                return undefined;
            }
            return namespace(prop);
        }
    });
})()
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::JsString;
    use std::fs;
    use tempfile::TempDir;

    fn write_key(dir: &TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("private-key.json");
        fs::write(&path, body).unwrap();
        path
    }

    fn eval_json(context: &mut Context, ee: JsValue, expression: &str) -> String {
        context
            .register_global_property(JsString::from("ee"), ee, boa_engine::property::Attribute::all())
            .unwrap();
        let source = format!("JSON.stringify({expression})");
        context
            .eval(Source::from_bytes(source.as_bytes()))
            .unwrap()
            .to_string(context)
            .unwrap()
            .to_std_string_escaped()
    }

    #[tokio::test]
    async fn test_authenticate_then_initialize() {
        let dir = TempDir::new().unwrap();
        let key = write_key(
            &dir,
            r#"{"client_email": "runner@example.iam.gserviceaccount.com", "private_key": "-----BEGIN-----", "project_id": "demo"}"#,
        );
        let client = LocalEarthEngine::new();
        client.authenticate(&key).await.unwrap();
        client.initialize().await.unwrap();
        assert_eq!(
            client.account().as_deref(),
            Some("runner@example.iam.gserviceaccount.com")
        );
    }

    #[tokio::test]
    async fn test_missing_key_file_fails_authentication() {
        let dir = TempDir::new().unwrap();
        let client = LocalEarthEngine::new();
        let err = client
            .authenticate(&dir.path().join("absent.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_malformed_key_fails_authentication() {
        let dir = TempDir::new().unwrap();
        let key = write_key(&dir, r#"{"client_email": "x@example.com"}"#);
        let client = LocalEarthEngine::new();
        assert!(matches!(
            client.authenticate(&key).await,
            Err(ClientError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_initialize_requires_authentication() {
        let client = LocalEarthEngine::new();
        assert!(matches!(
            client.initialize().await,
            Err(ClientError::Initialization(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_and_start_task() {
        let dir = TempDir::new().unwrap();
        let key = write_key(&dir, r#"{"client_email": "a@b.c", "private_key": "k"}"#);
        let client = LocalEarthEngine::new();
        let request = ExportRequest {
            category: ExportCategory::Image,
            destination: ExportDestination::Drive,
            config: serde_json::json!({"description": "ndvi"}),
        };
        assert!(client.submit_export(&request).is_err());

        client.authenticate(&key).await.unwrap();
        client.initialize().await.unwrap();
        let id = client.submit_export(&request).unwrap();
        assert_eq!(client.tasks()[0].state, TaskState::Ready);

        client.start_task(&id).unwrap();
        assert_eq!(client.tasks()[0].state, TaskState::Running);
        assert!(matches!(
            client.start_task("nope"),
            Err(ClientError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn test_reauthentication_starts_with_no_tasks() {
        let dir = TempDir::new().unwrap();
        let key = write_key(&dir, r#"{"client_email": "a@b.c", "private_key": "k"}"#);
        let client = LocalEarthEngine::new();
        let request = ExportRequest {
            category: ExportCategory::Table,
            destination: ExportDestination::Asset,
            config: serde_json::json!({"description": "first"}),
        };

        client.authenticate(&key).await.unwrap();
        client.initialize().await.unwrap();
        let id = client.submit_export(&request).unwrap();
        assert_eq!(client.tasks().len(), 1);

        client.authenticate(&key).await.unwrap();
        assert!(client.tasks().is_empty());
        assert!(matches!(
            client.start_task(&id),
            Err(ClientError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_export_names_round_trip() {
        for category in ExportCategory::ALL {
            assert_eq!(ExportCategory::parse(category.as_str()), Some(category));
        }
        for destination in ExportDestination::ALL {
            assert_eq!(
                ExportDestination::parse(destination.method_name()),
                Some(destination)
            );
        }
        assert_eq!(ExportCategory::parse("map"), None);
    }

    #[test]
    fn test_export_request_display() {
        let request = ExportRequest {
            category: ExportCategory::Table,
            destination: ExportDestination::CloudStorage,
            config: serde_json::json!({"description": "changes"}),
        };
        assert_eq!(request.to_string(), "Export.table.toCloudStorage (changes)");
    }

    #[test]
    fn test_deferred_graph_serialises() {
        let client = LocalEarthEngine::new();
        let mut context = Context::default();
        let ee = client.install(&mut context).unwrap();
        let json = eval_json(
            &mut context,
            ee,
            "ee.ImageCollection('LANDSAT/LC08/C02/T1_L2').filterDate('2020-01-01', '2021-01-01')",
        );
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["functionName"], "ImageCollection.filterDate");
        assert_eq!(value["receiver"]["functionName"], "ImageCollection");
        assert_eq!(value["receiver"]["arguments"][0], "LANDSAT/LC08/C02/T1_L2");
    }

    #[test]
    fn test_geometry_nodes_expose_coordinates() {
        let client = LocalEarthEngine::new();
        let mut context = Context::default();
        let ee = client.install(&mut context).unwrap();
        let json = eval_json(
            &mut context,
            ee,
            "(function () { var g = new ee.Geometry.Polygon([[[0, 0], [0, 1], [1, 1]]]); \
             return [g.type, g.coordinates, g.geodesic, ee.Geometry.Point([1, 2], null, true).geodesic]; })()",
        );
        assert_eq!(json, r#"["Polygon",[[[0,0],[0,1],[1,1]]],false,true]"#);
    }
}
