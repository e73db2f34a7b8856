//! Integration tests for the watchdog: cycle breaking and timeouts.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;

use common::{loader_with, loader_with_config, within, CallLog, StallingHooks};
use modload_core::{Factory, LoadError, LoaderConfig, MemoryHooks, ModuleApi, NativeEvaluator};

/// Body that records whether `peer` looked finished when this body ran.
fn observing_body(
    name: &'static str,
    peer: &'static str,
    seen: Arc<Mutex<Vec<(String, bool)>>>,
) -> impl Fn(&ModuleApi) -> anyhow::Result<()> + Send + Sync + 'static {
    move |api| {
        let peer_export = api.module(peer)?;
        seen.lock()
            .push((name.to_string(), peer_export.is_empty_object()));
        api.set_export(json!({ "name": name }))?;
        Ok(())
    }
}

#[tokio::test]
async fn test_mutual_dependency_resolves() {
    let hooks = Arc::new(
        MemoryHooks::new()
            .with_module("a", "var b = module('b'); module.export = { name: 'a' };")
            .with_module("b", "var a = module('a'); module.export = { name: 'b' };"),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let evaluator = NativeEvaluator::new()
        .with_body("a", observing_body("a", "b", seen.clone()))
        .with_body("b", observing_body("b", "a", seen.clone()));
    let loader = loader_with(hooks.clone(), evaluator);

    let exports = within(loader.api().use_modules(&["a", "b"]).unwrap())
        .await
        .expect("cycle members should resolve");

    assert_eq!(exports[0].as_json(), Some(&json!({"name": "a"})));
    assert_eq!(exports[1].as_json(), Some(&json!({"name": "b"})));

    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 2);
    assert!(
        seen.iter().any(|(_, incomplete)| *incomplete),
        "one side should observe the other before it finished: {seen:?}"
    );
    assert_eq!(hooks.fetch_count("a.js"), 1);
    assert_eq!(hooks.fetch_count("b.js"), 1);
}

#[tokio::test]
async fn test_three_module_cycle_resolves() {
    let hooks = Arc::new(MemoryHooks::new());
    let loader = loader_with(hooks, NativeEvaluator::new());
    let api = loader.api();
    let log = CallLog::new();

    for (name, dep) in [("x", "y"), ("y", "z"), ("z", "x")] {
        api.define(
            name,
            Factory::new(log.body(name, json!(name))).with_dependencies([dep]),
        )
        .unwrap();
    }

    let x = within(api.import("x")).await.unwrap();
    assert_eq!(x.as_json(), Some(&json!("x")));
    let mut calls = log.calls();
    calls.sort();
    assert_eq!(calls, vec!["x", "y", "z"]);
    assert!(api.has("y").unwrap());
    assert!(api.has("z").unwrap());
}

#[tokio::test]
async fn test_cycle_consumer_outside_the_cycle_gets_real_export() {
    let hooks = Arc::new(MemoryHooks::new());
    let loader = loader_with(hooks, NativeEvaluator::new());
    let api = loader.api();

    api.define(
        "a",
        Factory::new(|m| Ok(m.set_export(json!("A"))?)).with_dependencies(["b"]),
    )
    .unwrap();
    api.define(
        "b",
        Factory::new(|m| Ok(m.set_export(json!("B"))?)).with_dependencies(["a"]),
    )
    .unwrap();
    api.define(
        "app",
        Factory::new(|m| Ok(m.set_export(json!("app"))?)).with_dependencies(["a", "b"]),
    )
    .unwrap();

    within(api.import("app")).await.unwrap();
    // A forced edge only affects its consumer; the cache holds real exports.
    assert_eq!(api.module("a").unwrap().as_json(), Some(&json!("A")));
    assert_eq!(api.module("b").unwrap().as_json(), Some(&json!("B")));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_dependency_times_out_after_wait_interval() {
    let hooks = Arc::new(StallingHooks {
        inner: MemoryHooks::new(),
        stalled: vec!["slow.js".to_string()],
    });
    let wait = Duration::from_millis(300);
    let config = LoaderConfig::default()
        .with_watch_interval(Duration::from_millis(25))
        .with_wait_interval(wait);
    let loader = loader_with_config(hooks, NativeEvaluator::new(), config);
    let api = loader.api();
    api.define(
        "app",
        Factory::new(|m| Ok(m.set_export(json!(1))?)).with_dependencies(["slow"]),
    )
    .unwrap();

    let start = Instant::now();
    let err = api.import("app").await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_timeout(), "expected timeout, got {err}");
    assert!(elapsed >= wait, "rejected too early: {elapsed:?}");
    assert!(elapsed < wait + Duration::from_millis(100));
    match err {
        LoadError::Timeout { waited, .. } => assert!(waited >= wait),
        other => panic!("expected timeout, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_without_wait_interval_nothing_times_out() {
    let hooks = Arc::new(StallingHooks {
        inner: MemoryHooks::new(),
        stalled: vec!["slow.js".to_string()],
    });
    let loader = loader_with(hooks, NativeEvaluator::new());

    let request = loader.api().use_modules(&["slow"]).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(60), request).await;
    assert!(outcome.is_err(), "load should still be pending");
}

#[tokio::test]
async fn test_deferred_export_cycle_resolves() {
    let loader = loader_with(Arc::new(MemoryHooks::new()), NativeEvaluator::new());
    let api = loader.api();

    api.define(
        "a",
        Factory::new(|m| {
            m.export_define(
                Factory::new(|p| {
                    let b = p.module("b")?;
                    p.set_export(json!({ "b": b.as_json().cloned() }))?;
                    Ok(())
                })
                .with_dependencies(["b"]),
            )?;
            Ok(())
        }),
    )
    .unwrap();

    let b_saw_incomplete_a = Arc::new(Mutex::new(None));
    let seen = b_saw_incomplete_a.clone();
    api.define(
        "b",
        Factory::new(move |m| {
            *seen.lock() = Some(m.module("a")?.is_empty_object());
            m.set_export(json!("B"))?;
            Ok(())
        })
        .with_dependencies(["a"]),
    )
    .unwrap();

    let a = within(api.import("a"))
        .await
        .expect("deferred export cycle should resolve");

    assert_eq!(a.as_json(), Some(&json!({ "b": "B" })));
    assert_eq!(*b_saw_incomplete_a.lock(), Some(true));
    assert!(api.module("a").unwrap().ptr_eq(&a));
}

#[tokio::test(start_paused = true)]
async fn test_expiring_tick_rejects_all_and_skips_cycle_breaking() {
    let hooks = Arc::new(StallingHooks {
        inner: MemoryHooks::new(),
        stalled: vec!["slow1.js".to_string(), "slow2.js".to_string()],
    });
    let wait = Duration::from_millis(300);
    let tick = Duration::from_millis(25);
    let config = LoaderConfig::default()
        .with_watch_interval(tick)
        .with_wait_interval(wait);
    let loader = loader_with_config(hooks, NativeEvaluator::new(), config);
    let api = loader.api();

    let start = Instant::now();
    let timed = move |request: modload_core::LoadRequest| {
        tokio::spawn(async move {
            let outcome = request.await;
            (outcome, start.elapsed())
        })
    };
    let slow1 = timed(api.use_modules(&["slow1"]).unwrap());
    let slow2 = timed(api.use_modules(&["slow2"]).unwrap());

    // The stalled fetches keep dependency discovery open, so the cycle
    // stays intact until they are rejected.
    tokio::time::sleep(Duration::from_millis(150)).await;
    api.define(
        "a",
        Factory::new(|m| Ok(m.set_export(json!("A"))?)).with_dependencies(["b"]),
    )
    .unwrap();
    api.define(
        "b",
        Factory::new(|m| Ok(m.set_export(json!("B"))?)).with_dependencies(["a"]),
    )
    .unwrap();
    let cycle = timed(api.use_modules(&["a", "b"]).unwrap());

    let (slow1, slow1_at) = slow1.await.unwrap();
    let (slow2, slow2_at) = slow2.await.unwrap();
    let (cycle, cycle_at) = cycle.await.unwrap();

    for err in [slow1.unwrap_err(), slow2.unwrap_err()] {
        assert!(err.is_timeout(), "expected timeout, got {err}");
    }
    assert_eq!(slow1_at, slow2_at, "expired entries should reject on one tick");
    assert!(slow1_at >= wait && slow1_at < wait + tick);

    let exports = cycle.expect("cycle should resolve after the expiring tick");
    assert_eq!(exports.len(), 2);
    assert!(
        cycle_at >= slow1_at + tick,
        "cycle broken on the expiring tick: {cycle_at:?} vs {slow1_at:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_rearms_for_a_later_cycle() {
    let config = LoaderConfig::default();
    let watch = config.watch_interval;
    let loader = loader_with_config(
        Arc::new(MemoryHooks::new()),
        NativeEvaluator::new(),
        config,
    );
    let api = loader.api();

    api.define("leaf", Factory::new(|m| Ok(m.set_export(json!("leaf"))?)))
        .unwrap();
    within(api.import("leaf")).await.unwrap();
    assert_eq!(loader.stats().pending_loads, 0);

    // Let the idle watchdog notice there is nothing left and stop.
    tokio::time::sleep(watch * 3).await;

    api.define(
        "a",
        Factory::new(|m| Ok(m.set_export(json!("A"))?)).with_dependencies(["b"]),
    )
    .unwrap();
    api.define(
        "b",
        Factory::new(|m| Ok(m.set_export(json!("B"))?)).with_dependencies(["a"]),
    )
    .unwrap();

    let exports = within(api.use_modules(&["a", "b"]).unwrap())
        .await
        .expect("a fresh watchdog should break the cycle");
    assert_eq!(exports[0].as_json(), Some(&json!("A")));
    assert_eq!(exports[1].as_json(), Some(&json!("B")));
    assert_eq!(loader.stats().pending_loads, 0);
}
