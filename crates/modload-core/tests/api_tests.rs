//! Integration tests for the scope API: exports, define, delete and callbacks.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;

use common::{loader_with, within, CallLog, RelativeHooks};
use modload_core::{
    ExportStyle, Factory, FileHooks, LoadError, Loader, MemoryHooks, ModuleApi, NativeEvaluator,
};

fn no_deps(factory: Factory) -> Factory {
    factory.with_dependencies(Vec::<String>::new())
}

#[tokio::test]
async fn test_direct_then_deferred_export_conflicts() {
    let loader = loader_with(Arc::new(MemoryHooks::new()), NativeEvaluator::new());
    let api = loader.api();

    api.set_export(json!({"ready": true})).unwrap();
    let err = api.export_define(no_deps(Factory::new(|_| Ok(())))).unwrap_err();
    match err {
        LoadError::ExportConflict { scope, existing } => {
            assert_eq!(scope, "<top>");
            assert_eq!(existing, ExportStyle::Direct);
        }
        other => panic!("expected export conflict, got {other}"),
    }
    assert_eq!(api.export().as_json(), Some(&json!({"ready": true})));
}

#[tokio::test]
async fn test_deferred_export_adopts_producer_value() {
    let loader = loader_with(Arc::new(MemoryHooks::new()), NativeEvaluator::new());
    let api = loader.api();
    let conflict = Arc::new(Mutex::new(None));
    let conflict_slot = conflict.clone();

    api.define(
        "config",
        no_deps(Factory::new(move |m| {
            m.export_define(no_deps(Factory::new(|p| {
                p.set_export(json!({"port": 8080}))?;
                Ok(())
            })))?;
            *conflict_slot.lock() = m.set_export(json!("too late")).err();
            Ok(())
        })),
    )
    .unwrap();

    let export = within(api.import("config")).await.unwrap();
    assert_eq!(export.as_json(), Some(&json!({"port": 8080})));
    assert!(matches!(
        conflict.lock().take(),
        Some(LoadError::ExportConflict {
            existing: ExportStyle::Deferred,
            ..
        })
    ));
}

#[tokio::test]
async fn test_delete_forces_reload() {
    let hooks = Arc::new(MemoryHooks::new().with_module("util", "module.export = 1;"));
    let log = CallLog::new();
    let evaluator = NativeEvaluator::new().with_body("util", log.body("util", json!(1)));
    let loader = loader_with(hooks.clone(), evaluator);
    let api = loader.api();

    let first = within(api.import("util")).await.unwrap();
    assert!(api.has("util").unwrap());

    api.delete("util").unwrap();
    assert!(!api.has("util").unwrap());
    assert!(matches!(
        api.delete("util"),
        Err(LoadError::UnknownModule { .. })
    ));

    let second = within(api.import("util")).await.unwrap();
    assert!(!first.ptr_eq(&second));
    assert_eq!(hooks.fetch_count("util.js"), 2);
    assert_eq!(log.count("util"), 2);

    // The unbound entry stays in the arena next to its replacement.
    let stats = loader.stats();
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.resolved, 2);
    assert_eq!(stats.cached_modules, 1);
}

#[tokio::test]
async fn test_unknown_module_lookup() {
    let loader = loader_with(Arc::new(MemoryHooks::new()), NativeEvaluator::new());
    assert!(matches!(
        loader.api().module("ghost"),
        Err(LoadError::UnknownModule { ref name }) if name == "ghost"
    ));
    assert!(!loader.api().has("ghost").unwrap());
}

#[tokio::test]
async fn test_local_submodules_stay_private() {
    let source = "module.define('inner', function (module) { module.export = 1; });\n\
                  module.define('unused', function (module) {});\n\
                  module.export = 'outer';";
    let hooks = Arc::new(MemoryHooks::new().with_module("outer", source));
    let slot: Arc<Mutex<Option<ModuleApi>>> = Arc::new(Mutex::new(None));
    let outer_slot = slot.clone();
    let evaluator = NativeEvaluator::new().with_body("outer", move |m| {
        m.define(
            "inner",
            no_deps(Factory::new(|i| Ok(i.set_export(json!("inner"))?))),
        )?;
        m.set_export(json!("outer"))?;
        *outer_slot.lock() = Some(m.clone());
        Ok(())
    });
    let loader = loader_with(hooks, evaluator);
    let api = loader.api();

    let outer = within(api.import("outer")).await.unwrap();
    let outer_api = slot.lock().clone().expect("outer body should run");
    assert_eq!(outer_api.name().as_deref(), Some("outer"));

    let inner = within(outer_api.import("inner")).await.unwrap();
    assert_eq!(inner.as_json(), Some(&json!("inner")));
    assert!(outer_api.has("inner").unwrap());
    assert!(!api.has("inner").unwrap());

    // Declared but never defined: settles with the parent's export.
    let unused = within(outer_api.import("unused")).await.unwrap();
    assert!(unused.ptr_eq(&outer));

    // The root is reachable from any scope.
    assert!(outer_api.top().has("outer").unwrap());
}

#[tokio::test]
async fn test_anonymous_define_needs_owning_module() {
    let loader = loader_with(Arc::new(MemoryHooks::new()), NativeEvaluator::new());
    let err = loader
        .api()
        .define_anonymous(no_deps(Factory::new(|_| Ok(()))))
        .unwrap_err();
    assert!(matches!(err, LoadError::NoOwningModule));
}

#[tokio::test]
async fn test_errback_receives_failure() {
    let loader = loader_with(Arc::new(MemoryHooks::new()), NativeEvaluator::new());
    let (tx, rx) = oneshot::channel();

    loader
        .api()
        .use_with_errback(
            &["nowhere"],
            |_| panic!("load should fail"),
            move |err| {
                let _ = tx.send(err);
            },
        )
        .unwrap();

    let err = within(rx).await.unwrap();
    assert_eq!(err.module_name(), Some("nowhere"));
}

#[tokio::test]
async fn test_unhandled_failure_is_reported() {
    let hooks = Arc::new(RelativeHooks::default());
    let loader = loader_with(hooks.clone(), NativeEvaluator::new());

    let handle = loader
        .api()
        .use_with(&["./nowhere"], |_| panic!("load should fail"))
        .unwrap();
    within(handle).await.unwrap();

    let reported = hooks.reported.lock().clone();
    assert_eq!(reported.len(), 1);
    assert!(reported[0].contains("nowhere.js"));
}

#[tokio::test]
async fn test_file_hooks_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("util.js"), "module.export = 1;").unwrap();
    std::fs::write(dir.path().join("app.js"), "module('util'); module.export = 2;").unwrap();

    let log = CallLog::new();
    let evaluator = NativeEvaluator::new()
        .with_body("util", log.body("util", json!(1)))
        .with_body("app", log.body("app", json!(2)));
    let loader = Loader::new(FileHooks::new(dir.path()), evaluator);

    let app = within(loader.api().import("app")).await.unwrap();
    assert_eq!(app.as_json(), Some(&json!(2)));
    assert_eq!(log.calls(), vec!["util", "app"]);

    let stats = loader.stats();
    assert_eq!(stats.resolved, 2);
    assert_eq!(stats.rejected, 0);
    assert_eq!(stats.fetches, 2);
    assert_eq!(stats.cached_modules, 2);
    assert_eq!(stats.pending_loads, 0);
}

#[tokio::test]
async fn test_loaders_are_independent() {
    let hooks = Arc::new(MemoryHooks::new().with_module("util", "module.export = 1;"));
    let log = CallLog::new();
    let first = loader_with(
        hooks.clone(),
        NativeEvaluator::new().with_body("util", log.body("util", json!(1))),
    );
    let second = loader_with(
        hooks.clone(),
        NativeEvaluator::new().with_body("util", log.body("util", json!(1))),
    );

    let a = within(first.api().import("util")).await.unwrap();
    let b = within(second.api().import("util")).await.unwrap();
    assert!(!a.ptr_eq(&b));
    assert_eq!(hooks.fetch_count("util.js"), 2);
    assert!(!second.api().has("other").unwrap());
}
