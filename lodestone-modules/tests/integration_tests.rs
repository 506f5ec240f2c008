//! Integration tests for the module registry, resolver and runtime.
//!
//! Remote-loading tests drive the runtime through a `ScriptedFetcher`: the
//! action installed per URL plays the role of the fetched code executing,
//! calling `define` on a clone of the runtime handle.

use lodestone_assets::{AssetError, FetchError, ScriptedFetcher};
use lodestone_modules::{ModuleError, ModuleRuntime, RuntimeConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CDN: &str = "http://cdn.example";

fn local_runtime() -> ModuleRuntime<i32> {
    ModuleRuntime::with_fetcher(Arc::new(ScriptedFetcher::new()))
}

fn remote_runtime(fetcher: Arc<ScriptedFetcher>) -> ModuleRuntime<i32> {
    let config = RuntimeConfig {
        base_url: CDN.to_string(),
        ..Default::default()
    };
    ModuleRuntime::new(config, fetcher)
}

#[test]
fn require_resolves_a_local_graph_with_positional_dependencies() {
    let runtime = local_runtime();
    runtime.define("/one", &[], |_| 1).unwrap();
    runtime.define("/two", &[], |_| 2).unwrap();
    runtime
        .define("/sum", &["/one", "/two"], |deps| *deps[0] * 10 + *deps[1])
        .unwrap();

    assert_eq!(*runtime.require("/sum").unwrap(), 12);
    assert!(runtime.is_resolved("/one"));
    assert!(runtime.is_resolved("/two"));
}

#[test]
fn factories_run_once_and_the_cached_value_is_shared() {
    let runtime = local_runtime();
    let runs = Arc::new(AtomicUsize::new(0));
    let counted = runs.clone();
    runtime
        .define("/counted", &[], move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            7
        })
        .unwrap();

    let first = runtime.require("/counted").unwrap();
    let second = runtime.require("/counted").unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn bare_paths_are_rooted_to_their_canonical_form() {
    let runtime = local_runtime();
    runtime.define("math", &[], |_| 3).unwrap();

    assert_eq!(*runtime.require("/math").unwrap(), 3);
    assert_eq!(*runtime.require("math").unwrap(), 3);
}

#[test]
fn relative_specifiers_resolve_against_the_requesting_module() {
    let runtime = local_runtime();
    runtime.define("/app/util", &[], |_| 5).unwrap();
    runtime.define("/shared/log", &[], |_| 6).unwrap();
    runtime
        .define("/app/main", &["./util", "../shared/log"], |deps| {
            *deps[0] * 10 + *deps[1]
        })
        .unwrap();

    assert_eq!(*runtime.require("/app/main").unwrap(), 56);
}

#[test]
fn first_definition_wins_even_after_resolution() {
    let runtime = local_runtime();
    runtime.define("/d", &[], |_| 1).unwrap();
    runtime.define("/d", &[], |_| 2).unwrap();
    let before = runtime.require("/d").unwrap();
    assert_eq!(*before, 1);

    // a late re-definition of a resolved path is also a silent no-op
    runtime.define("/d", &[], |_| 3).unwrap();
    let after = runtime.require("/d").unwrap();
    assert!(Arc::ptr_eq(&before, &after));
}

#[test]
fn define_rejects_malformed_calls() {
    let runtime = local_runtime();
    assert!(matches!(
        runtime.define("", &[], |_| 0),
        Err(ModuleError::Definition { .. })
    ));
    assert!(matches!(
        runtime.define("./relative", &[], |_| 0),
        Err(ModuleError::Definition { .. })
    ));
}

#[test]
fn require_rejects_malformed_calls() {
    let runtime = local_runtime();
    assert!(matches!(
        runtime.require(""),
        Err(ModuleError::RequireArgument { .. })
    ));
    assert!(matches!(
        runtime.require("./relative"),
        Err(ModuleError::RequireArgument { .. })
    ));
}

#[test]
fn missing_module_fails_synchronously() {
    let runtime = local_runtime();
    assert!(matches!(
        runtime.require("/ghost"),
        Err(ModuleError::MissingModule { ref path }) if path == "/ghost"
    ));
}

#[test]
fn circular_graphs_fail_and_leave_nothing_resolved() {
    let runtime = local_runtime();
    runtime.define("/a", &["/b"], |_| 1).unwrap();
    runtime.define("/b", &["/a"], |_| 2).unwrap();

    let result = runtime.require("/a");

    assert!(matches!(
        result,
        Err(ModuleError::CircularDependency { ref cycle }) if cycle == "/a -> /b -> /a"
    ));
    assert!(!runtime.is_resolved("/a"));
    assert!(!runtime.is_resolved("/b"));
    // the failed graph stays requireable and reports the same error again
    assert!(matches!(
        runtime.require("/a"),
        Err(ModuleError::CircularDependency { .. })
    ));
}

#[tokio::test]
async fn circular_graphs_fail_the_asynchronous_form_too() {
    let runtime = local_runtime();
    runtime.define("/a", &["/b"], |_| 1).unwrap();
    runtime.define("/b", &["/a"], |_| 2).unwrap();

    let result = runtime.require_async("/a").await;

    assert!(matches!(result, Err(ModuleError::CircularDependency { .. })));
    assert!(!runtime.is_resolved("/a"));
    assert!(!runtime.is_resolved("/b"));
}

#[tokio::test]
async fn diamond_dependencies_are_not_a_cycle() {
    let runtime = local_runtime();
    let runs = Arc::new(AtomicUsize::new(0));
    let counted = runs.clone();
    runtime
        .define("/c", &[], move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            1
        })
        .unwrap();
    runtime.define("/a", &["./c"], |deps| *deps[0] + 10).unwrap();
    runtime.define("/b", &["./c"], |deps| *deps[0] + 20).unwrap();
    runtime
        .define("/x", &["./a", "./b"], |deps| *deps[0] + *deps[1])
        .unwrap();

    let value = runtime.require_async("/x").await.unwrap();

    assert_eq!(*value, 32);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn remote_modules_are_fetched_defined_and_resolved() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let runtime = remote_runtime(fetcher.clone());

    let handle = runtime.clone();
    fetcher.install("http://cdn.example/math.js", move || {
        handle.define("/math", &[], |_| 7).unwrap();
    });

    let values = runtime.require_many(&["/math"]).await.unwrap();

    assert_eq!(*values[0], 7);
    assert_eq!(fetcher.call_count("http://cdn.example/math.js"), 1);

    // a second require is served from the cache without another fetch
    assert_eq!(*runtime.require_async("/math").await.unwrap(), 7);
    assert_eq!(fetcher.call_count("http://cdn.example/math.js"), 1);
}

#[tokio::test]
async fn remote_dependencies_fan_out_and_keep_declared_order() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let runtime = remote_runtime(fetcher.clone());
    runtime
        .define("/x", &["./a", "./b"], |deps| *deps[0] * 10 + *deps[1])
        .unwrap();

    // the slower asset is the first dependency: completion order is the
    // reverse of declared order
    let handle = runtime.clone();
    fetcher.install_delayed("http://cdn.example/a.js", 40, move || {
        handle.define("/a", &[], |_| 1).unwrap();
    });
    let handle = runtime.clone();
    fetcher.install_delayed("http://cdn.example/b.js", 5, move || {
        handle.define("/b", &[], |_| 2).unwrap();
    });

    let value = runtime.require_async("/x").await.unwrap();
    assert_eq!(*value, 12);
}

#[tokio::test]
async fn concurrent_requests_share_one_fetch_and_one_factory_run() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let runtime = remote_runtime(fetcher.clone());
    let runs = Arc::new(AtomicUsize::new(0));

    let handle = runtime.clone();
    let counted = runs.clone();
    fetcher.install_delayed("http://cdn.example/shared.js", 30, move || {
        let counted = counted.clone();
        handle
            .define("/shared", &[], move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
                9
            })
            .unwrap();
    });

    let (a, b) = tokio::join!(
        runtime.require_async("/shared"),
        runtime.require_async("/shared"),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(fetcher.call_count("http://cdn.example/shared.js"), 1);
}

#[tokio::test]
async fn a_loaded_asset_that_defines_nothing_is_a_missing_module() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let runtime = remote_runtime(fetcher.clone());
    fetcher.install("http://cdn.example/empty.js", || {});

    let result = runtime.require_async("/empty").await;
    assert!(matches!(
        result,
        Err(ModuleError::MissingModule { ref path }) if path == "/empty"
    ));

    // the asset is never fetched twice
    let again = runtime.require_async("/empty").await;
    assert!(matches!(again, Err(ModuleError::MissingModule { .. })));
    assert_eq!(fetcher.call_count("http://cdn.example/empty.js"), 1);
}

#[tokio::test]
async fn a_failed_fetch_fails_the_resolution_explicitly() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let runtime = remote_runtime(fetcher.clone());
    fetcher.install_failure(
        "http://cdn.example/down.js",
        FetchError::Status {
            url: "http://cdn.example/down.js".to_string(),
            status: 503,
        },
    );

    let result = runtime.require_async("/down").await;

    assert!(matches!(
        result,
        Err(ModuleError::Asset(AssetError::Fetch {
            source: FetchError::Status { status: 503, .. },
            ..
        }))
    ));

    // the asset settled as failed; requiring again reports the failure
    // without another fetch
    let again = runtime.require_async("/down").await;
    assert!(matches!(again, Err(ModuleError::Asset(_))));
    assert_eq!(fetcher.call_count("http://cdn.example/down.js"), 1);
}

#[tokio::test]
async fn the_first_dependency_error_aborts_the_parent_but_not_the_siblings() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let runtime = remote_runtime(fetcher.clone());
    runtime
        .define("/x", &["/bad", "/slow"], |deps| *deps[0] + *deps[1])
        .unwrap();

    fetcher.install_failure(
        "http://cdn.example/bad.js",
        FetchError::NotFound {
            url: "http://cdn.example/bad.js".to_string(),
        },
    );
    let handle = runtime.clone();
    fetcher.install_delayed("http://cdn.example/slow.js", 40, move || {
        handle.define("/slow", &[], |_| 4).unwrap();
    });

    let result = runtime.require_async("/x").await;
    assert!(matches!(result, Err(ModuleError::Asset(_))));
    assert!(!runtime.is_resolved("/x"));
    assert!(runtime.is_defined("/x"));

    // the sibling resolution was discarded, not cancelled: it finishes on
    // its own and lands in the cache
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(runtime.is_resolved("/slow"));
}

#[tokio::test]
async fn require_many_returns_values_in_request_order() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let runtime = remote_runtime(fetcher.clone());
    runtime.define("/local", &[], |_| 1).unwrap();

    let handle = runtime.clone();
    fetcher.install_delayed("http://cdn.example/remote.js", 20, move || {
        handle.define("/remote", &[], |_| 2).unwrap();
    });

    let values = runtime.require_many(&["/remote", "/local"]).await.unwrap();
    assert_eq!(*values[0], 2);
    assert_eq!(*values[1], 1);
}

#[tokio::test]
async fn require_many_rejects_relative_paths_up_front() {
    let runtime = local_runtime();
    assert!(matches!(
        runtime.require_many(&["./x"]).await,
        Err(ModuleError::RequireArgument { .. })
    ));
}

#[tokio::test]
async fn definitions_may_land_shortly_after_the_asset_loads() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let config = RuntimeConfig {
        base_url: CDN.to_string(),
        define_grace_ms: 25,
        ..Default::default()
    };
    let runtime: ModuleRuntime<i32> = ModuleRuntime::new(config, fetcher.clone());

    // the fetched code registers its definition asynchronously, a little
    // after the asset signals loaded
    let handle = runtime.clone();
    fetcher.install("http://cdn.example/late.js", move || {
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            handle.define("/late", &[], |_| 11).unwrap();
        });
    });

    assert_eq!(*runtime.require_async("/late").await.unwrap(), 11);
}

#[tokio::test]
async fn define_value_registers_a_leaf_module() {
    let runtime: ModuleRuntime<String> =
        ModuleRuntime::with_fetcher(Arc::new(ScriptedFetcher::new()));
    runtime.define_value("/greeting", "hello".to_string()).unwrap();
    runtime
        .define("/shout", &["/greeting"], |deps| deps[0].to_uppercase())
        .unwrap();

    assert_eq!(*runtime.require("/shout").unwrap(), "HELLO");
}

#[test]
fn config_loads_from_toml_and_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lodestone.toml");
    std::fs::write(
        &path,
        r#"
base_url = "https://cdn.example/js"
define_grace_ms = 5

[assets]
fetch_timeout_ms = 250
"#,
    )
    .unwrap();

    let config = RuntimeConfig::from_path(&path).unwrap();
    assert_eq!(config.base_url, "https://cdn.example/js");
    assert_eq!(config.define_grace_ms, 5);
    assert_eq!(config.script_suffix, ".js");
    assert_eq!(config.assets.fetch_timeout_ms, 250);

    let missing = RuntimeConfig::from_path(&dir.path().join("nope.toml"));
    assert!(matches!(missing, Err(ModuleError::Config { .. })));
}
