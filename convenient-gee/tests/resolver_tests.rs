use convenient_gee::{
    ExecutionSandbox, LocalEarthEngine, ModuleCache, ResolveError, SandboxConfig, SandboxError,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

fn write_module(root: &Path, relative: &str, body: &str) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, body).unwrap();
    path
}

fn sandbox(root: &Path) -> ExecutionSandbox {
    ExecutionSandbox::new(
        SandboxConfig::new(root),
        Rc::new(LocalEarthEngine::new()),
        ModuleCache::shared(),
    )
    .unwrap()
}

fn run(root: &Path, script: &str) -> Result<Vec<String>, SandboxError> {
    let mut sandbox = sandbox(root);
    sandbox
        .execute(script, &root.join("caller.js"))
        .map(|outcome| outcome.printed)
}

#[test]
fn test_repository_identifier_maps_to_module_root() {
    let root = TempDir::new().unwrap();
    write_module(root.path(), "Repo/sub/File.js", "exports.name = 'file';");

    let printed = run(
        root.path(),
        "var m = require('users/alice/Repo:sub/File'); print(m.name);",
    )
    .unwrap();
    assert_eq!(printed, vec!["file"]);
}

#[test]
fn test_module_executes_once_per_experiment() {
    let root = TempDir::new().unwrap();
    write_module(
        root.path(),
        "Repo/counter.js",
        "exports.token = {};",
    );

    let mut sandbox = sandbox(root.path());
    let outcome = sandbox
        .execute(
            "var a = require('users/alice/Repo:counter');\n\
             var b = require('users/alice/Repo:counter');\n\
             print(a === b, a.token === b.token);",
            &root.path().join("caller.js"),
        )
        .unwrap();

    assert_eq!(outcome.printed, vec!["true true"]);
    assert_eq!(outcome.modules_executed, 1);
    let cache = sandbox.resolver().cache().borrow();
    assert!(cache.contains("users/alice/Repo:counter"));
    assert_eq!(cache.hits(), 1);
}

#[test]
fn test_missing_module_reports_both_paths() {
    let root = TempDir::new().unwrap();

    let err = run(root.path(), "require('users/alice/Repo:absent');").unwrap_err();
    match err {
        SandboxError::Module(ResolveError::ModuleNotFound {
            local_path,
            identifier,
        }) => {
            assert_eq!(local_path, root.path().join("Repo/absent.js"));
            assert_eq!(identifier, "users/alice/Repo:absent");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_failing_module_is_not_cached() {
    let root = TempDir::new().unwrap();
    write_module(root.path(), "Repo/broken.js", "throw new Error('boom');");

    let mut sandbox = sandbox(root.path());
    for _ in 0..2 {
        match sandbox.resolve("users/alice/Repo:broken") {
            Err(ResolveError::ModuleExecution { local_path, message }) => {
                assert_eq!(local_path, root.path().join("Repo/broken.js"));
                assert!(message.contains("boom"), "{message}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    let cache = sandbox.resolver().cache().borrow();
    assert!(!cache.contains("users/alice/Repo:broken"));
    assert_eq!(cache.executions(), 2);
}

#[test]
fn test_module_error_surfaces_from_caller_script() {
    let root = TempDir::new().unwrap();
    write_module(root.path(), "Repo/broken.js", "throw new Error('boom');");

    let err = run(root.path(), "require('users/alice/Repo:broken');").unwrap_err();
    assert!(
        matches!(err, SandboxError::Module(ResolveError::ModuleExecution { .. })),
        "{err:?}"
    );
}

#[test]
fn test_self_import_is_circular() {
    let root = TempDir::new().unwrap();
    write_module(root.path(), "Repo/loop.js", "require('users/alice/Repo:loop');");

    let mut sandbox = sandbox(root.path());
    let err = sandbox.resolve("users/alice/Repo:loop").unwrap_err();
    let ResolveError::ModuleExecution { message, .. } = &err else {
        panic!("unexpected error: {err:?}");
    };
    assert!(
        message.contains("Circular import detected: users/alice/Repo:loop -> users/alice/Repo:loop"),
        "{message}"
    );
}

#[test]
fn test_mutual_import_is_circular() {
    let root = TempDir::new().unwrap();
    write_module(root.path(), "Repo/a.js", "exports.b = require('users/alice/Repo:b');");
    write_module(root.path(), "Repo/b.js", "exports.a = require('users/alice/Repo:a');");

    let err = run(root.path(), "require('users/alice/Repo:a');").unwrap_err();
    assert!(
        err.to_string().contains("users/alice/Repo:a -> users/alice/Repo:b -> users/alice/Repo:a"),
        "{err}"
    );
}

#[test]
fn test_module_exports_replacement_wins() {
    let root = TempDir::new().unwrap();
    write_module(root.path(), "Repo/replaced.js", "module.exports = { kind: 'replaced' };");
    write_module(root.path(), "Repo/augmented.js", "exports.kind = 'augmented';");
    write_module(root.path(), "Repo/this.js", "this.kind = 'this';");

    let printed = run(
        root.path(),
        "print(require('users/alice/Repo:replaced').kind);\n\
         print(require('users/alice/Repo:augmented').kind);\n\
         print(require('users/alice/Repo:this').kind);",
    )
    .unwrap();
    assert_eq!(printed, vec!["replaced", "augmented", "this"]);
}

#[test]
fn test_transitive_imports_share_the_cache() {
    let root = TempDir::new().unwrap();
    write_module(root.path(), "Repo/base.js", "exports.value = 21;");
    write_module(
        root.path(),
        "Repo/derived.js",
        "var base = require('users/alice/Repo:base'); exports.value = base.value * 2; exports.base = base;",
    );

    let mut sandbox = sandbox(root.path());
    let outcome = sandbox
        .execute(
            "var d = require('users/alice/Repo:derived');\n\
             print(d.value, d.base === require('users/alice/Repo:base'));",
            &root.path().join("caller.js"),
        )
        .unwrap();
    assert_eq!(outcome.printed, vec!["42 true"]);
    assert_eq!(outcome.modules_executed, 2);
}

#[test]
fn test_module_locals_stay_private() {
    let root = TempDir::new().unwrap();
    write_module(
        root.path(),
        "Repo/private.js",
        "var secret = 1; function helper() {} exports.ok = true;",
    );

    let printed = run(
        root.path(),
        "require('users/alice/Repo:private'); print(typeof secret, typeof helper);",
    )
    .unwrap();
    assert_eq!(printed, vec!["undefined undefined"]);
}

#[test]
fn test_undeclared_assignments_stay_on_their_side_of_require() {
    let root = TempDir::new().unwrap();
    write_module(
        root.path(),
        "Repo/m.js",
        "exports.seen = typeof callerState; leaked = 'from-module';",
    );

    let printed = run(
        root.path(),
        "callerState = 1; var m = require('users/a/Repo:m'); print(m.seen, typeof leaked);",
    )
    .unwrap();
    assert_eq!(printed, vec!["undefined undefined"]);
}

#[test]
fn test_modules_do_not_share_globals() {
    let root = TempDir::new().unwrap();
    write_module(root.path(), "Repo/first.js", "shared = 'first'; exports.done = true;");
    write_module(root.path(), "Repo/second.js", "exports.seen = typeof shared;");

    let printed = run(
        root.path(),
        "require('users/a/Repo:first'); print(require('users/a/Repo:second').seen);",
    )
    .unwrap();
    assert_eq!(printed, vec!["undefined"]);
}

#[test]
fn test_module_functions_keep_their_own_globals() {
    let root = TempDir::new().unwrap();
    write_module(
        root.path(),
        "Repo/counter.js",
        "count = 0; exports.next = function () { count += 1; return count; };",
    );

    let printed = run(
        root.path(),
        "var c = require('users/a/Repo:counter'); c.next(); print(c.next(), typeof count);",
    )
    .unwrap();
    assert_eq!(printed, vec!["2 undefined"]);
}

#[test]
fn test_dropping_the_sandbox_releases_the_resolver() {
    let root = TempDir::new().unwrap();
    write_module(root.path(), "Repo/leaf.js", "exports.value = 1;");

    let resolver = {
        let mut sandbox = sandbox(root.path());
        sandbox
            .execute(
                "var requireAgain = require; print(require('users/a/Repo:leaf').value);",
                &root.path().join("caller.js"),
            )
            .unwrap();
        Rc::downgrade(sandbox.resolver())
    };
    assert!(resolver.upgrade().is_none());
}

#[test]
fn test_module_sees_shims_and_ee() {
    let root = TempDir::new().unwrap();
    write_module(
        root.path(),
        "Repo/ui.js",
        "print('hidden'); Map.addLayer(ee.Image(1), {}, 'layer');\n\
         exports.panel = ui.Panel(); exports.hasEe = typeof ee.Image === 'function';",
    );

    let printed = run(
        root.path(),
        "var m = require('users/alice/Repo:ui'); print(m.hasEe, typeof m.panel.add);",
    )
    .unwrap();
    assert_eq!(printed, vec!["true function"]);
}

#[test]
fn test_relative_path_from_caller_directory() {
    let root = TempDir::new().unwrap();
    write_module(root.path(), "helpers/util.js", "exports.twice = function (x) { return 2 * x; };");

    let printed = run(root.path(), "print(require('./helpers/util').twice(4));").unwrap();
    assert_eq!(printed, vec!["8"]);
}

#[test]
fn test_earthengine_host_module_is_ee() {
    let root = TempDir::new().unwrap();

    let printed = run(
        root.path(),
        "print(require('@google/earthengine') === ee, require('ee') === ee);",
    )
    .unwrap();
    assert_eq!(printed, vec!["true true"]);
}

#[test]
fn test_unknown_host_module() {
    let root = TempDir::new().unwrap();

    let err = run(root.path(), "require('fs');").unwrap_err();
    assert_eq!(
        err,
        SandboxError::Module(ResolveError::HostModuleNotFound {
            identifier: "fs".to_string()
        })
    );
}

#[test]
fn test_caught_require_failure_does_not_fail_script() {
    let root = TempDir::new().unwrap();

    let err = run(
        root.path(),
        "try { require('users/alice/Repo:absent'); } catch (e) { print('caught'); }\n\
         throw new Error('later');",
    )
    .unwrap_err();
    match err {
        SandboxError::Runtime { message, .. } => assert!(message.contains("later"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}
