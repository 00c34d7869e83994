//! End-to-end checks of the engine's core guarantees, driven through the
//! driver against in-memory storage and a scripted network.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::join_all;
use http::StatusCode;
use http::header::{self, HeaderValue};

use common::{Build, Harness, url};
use outpost_core::cache::Storage;
use outpost_core::{ReadyState, Request, Response};

#[tokio::test(start_paused = true)]
async fn test_hash_pinned_asset_never_changes_under_a_manifest() {
    let h = Harness::new();
    let a = Build::new("A");
    a.deploy(&h.fetcher);
    h.boot().await;

    h.clients.connect("c1");
    let first = h.fetch_text(Request::get(url("/main.js")).with_client("c1")).await;
    assert_eq!(first, "main A");

    // The server changes the file without publishing a new manifest.
    h.fetcher.serve_text(&url("/main.js"), "main hotfix");
    let again = h.fetch_text(Request::get(url("/main.js")).with_client("c1")).await;
    assert_eq!(again, "main A");

    // A restarted agent still serves the pinned bytes.
    let restarted = h.restart();
    restarted.clients.connect("c1");
    let after_restart = restarted
        .fetch_text(Request::get(url("/main.js")).with_client("c1"))
        .await;
    assert_eq!(after_restart, "main A");

    // Only a new manifest changes what new clients see.
    let b = Build::new("B");
    b.deploy(&h.fetcher);
    assert!(restarted.driver.check_for_update().await);
    assert_eq!(restarted.fetch_text(Request::get(url("/main.js")).with_client("c2")).await, "main B");
    assert_eq!(restarted.fetch_text(Request::get(url("/main.js")).with_client("c1")).await, "main A");
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_fetches_of_one_asset_hit_the_network_once() {
    let h = Harness::new();
    let a = Build::new("A");
    a.deploy(&h.fetcher);
    h.boot().await;
    h.fetcher.delay(&url("/lazy/chunk.js"), Duration::from_millis(200));

    let outcomes = join_all((0..5).map(|_| h.driver.on_fetch(Request::get(url("/lazy/chunk.js"))))).await;

    assert_eq!(h.fetcher.count(&url("/lazy/chunk.js")), 1);
    for outcome in outcomes {
        let res = outcome.response.unwrap().unwrap();
        assert_eq!(res.text(), "chunk A");
        outcome.background.wait().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_data_group_never_exceeds_its_size() {
    let h = Harness::new();
    Build::new("A").deploy(&h.fetcher);
    for n in 1..=5 {
        h.fetcher.serve_text(&url(&format!("/api/{n}")), &format!("item {n}"));
    }
    h.boot().await;

    for n in [1, 2, 3] {
        h.fetch_text(Request::get(url(&format!("/api/{n}")))).await;
    }
    // Touch 1 so 2 is the least recently used.
    assert_eq!(h.fetch_text(Request::get(url("/api/1"))).await, "item 1");
    h.fetch_text(Request::get(url("/api/4"))).await;

    let cache = h.storage.open_cache("outpost:/:1:data:dynamic:api:cache").await.unwrap();
    let mut keys = cache.keys().await.unwrap();
    keys.sort();
    assert_eq!(keys, vec![url("/api/1"), url("/api/3"), url("/api/4")]);

    h.fetch_text(Request::get(url("/api/5"))).await;
    assert_eq!(cache.keys().await.unwrap().len(), 3);
    assert_eq!(h.fetcher.count(&url("/api/1")), 1);

    h.fetch_text(Request::get(url("/api/2"))).await;
    assert_eq!(h.fetcher.count(&url("/api/2")), 2);
}

#[tokio::test(start_paused = true)]
async fn test_idle_queue_runs_every_task_once_in_order() {
    let h = Harness::new();
    let idle = h.driver.scope().idle.clone();
    let log = Arc::new(Mutex::new(Vec::new()));

    for name in ["first", "second", "third"] {
        let log = log.clone();
        let nested_idle = idle.clone();
        idle.schedule(
            name,
            Box::new(move || {
                async move {
                    log.lock().unwrap().push(name.to_string());
                    if name == "second" {
                        let log = log.clone();
                        nested_idle.schedule(
                            "late",
                            Box::new(move || {
                                async move {
                                    log.lock().unwrap().push("late".to_string());
                                    Ok(())
                                }
                                .boxed()
                            }),
                        );
                    }
                    Ok(())
                }
                .boxed()
            }),
        );
    }

    idle.trigger().await;
    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third", "late"]);
    assert!(idle.is_empty());

    idle.trigger().await;
    assert_eq!(log.lock().unwrap().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_identical_content_is_copied_between_versions() {
    let h = Harness::new();
    let mut a = Build::new("A");
    a.files[1].1 = "main shared".to_string();
    a.deploy(&h.fetcher);
    h.boot().await;

    let mut b = Build::new("B");
    b.files[1].1 = "main shared".to_string();
    b.deploy(&h.fetcher);
    h.fetcher.reset_counts();

    assert!(h.driver.check_for_update().await);
    assert_eq!(h.fetcher.count(&url("/main.js")), 0);
    assert_eq!(h.fetcher.count(&url("/index.html")), 1);

    // Each version keeps its own stores.
    let names = h.storage.names().await.unwrap();
    let app_caches: Vec<_> = names.iter().filter(|n| n.ends_with(":assets:app:cache")).collect();
    assert_eq!(app_caches.len(), 2);
    assert_eq!(h.driver.version_hashes().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stale_unhashed_asset_is_served_then_revalidated_once() {
    let h = Harness::new();
    Build::new("A").deploy(&h.fetcher);
    let logo = |body: &str| {
        Response::with_content(body.to_string(), "image/png")
            .with_header(header::CACHE_CONTROL, HeaderValue::from_static("max-age=60"))
    };
    h.fetcher.serve(&url("/img/logo.png"), logo("logo v1"));
    h.boot().await;

    assert_eq!(h.fetch_text(Request::get(url("/img/logo.png"))).await, "logo v1");
    h.fetcher.serve(&url("/img/logo.png"), logo("logo v2"));
    h.clock.advance(61_000);

    // The stale copy comes back immediately; the refresh happens on idle.
    let outcome = h.driver.on_fetch(Request::get(url("/img/logo.png"))).await;
    assert_eq!(outcome.response.unwrap().unwrap().text(), "logo v1");
    assert_eq!(h.fetcher.count(&url("/img/logo.png")), 1);
    outcome.background.wait().await;
    assert_eq!(h.fetcher.count(&url("/img/logo.png")), 2);

    assert_eq!(h.fetch_text(Request::get(url("/img/logo.png"))).await, "logo v2");
    assert_eq!(h.fetcher.count(&url("/img/logo.png")), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_config_version_wipes_everything_on_update() {
    let h = Harness::new();
    Build::new("A").deploy(&h.fetcher);
    h.boot().await;
    assert!(!h.storage.names().await.unwrap().is_empty());

    let mut next = Build::new("B");
    next.config_version = 2;
    next.deploy(&h.fetcher);

    assert!(!h.driver.check_for_update().await);
    assert!(h.clients.unregistered());
    assert!(h.storage.names().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_config_version_at_first_start() {
    let h = Harness::new();
    let mut build = Build::new("A");
    build.config_version = 2;
    build.deploy(&h.fetcher);

    assert!(h.driver.ensure_initialized().await.is_err());
    assert_eq!(h.driver.readiness(), ReadyState::SafeMode);
    assert!(h.clients.unregistered());
    assert!(h.storage.names().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_initialization_enters_safe_mode() {
    let h = Harness::new();
    Build::new("A").deploy(&h.fetcher);
    h.fetcher.set_offline(true);

    assert!(h.driver.ensure_initialized().await.is_err());
    assert_eq!(h.driver.readiness(), ReadyState::SafeMode);

    h.fetcher.set_offline(false);
    h.fetcher.reset_counts();
    let res = h.fetch(Request::get(url("/main.js"))).await.unwrap();
    assert!(res.is_none());
    assert_eq!(h.fetcher.total(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_broken_latest_degrades_until_next_good_update() {
    let h = Harness::new();
    let a = Build::new("A");
    a.deploy(&h.fetcher);
    h.fetcher.serve_status(&url("/main.js"), StatusCode::NOT_FOUND);
    h.boot().await;

    assert_eq!(h.driver.readiness(), ReadyState::ExistingClientsOnly);
    // New clients go to the network.
    h.fetcher.serve_text(&url("/main.js"), "from network");
    let res = h.fetch(Request::get(url("/main.js")).with_client("fresh")).await.unwrap();
    assert_eq!(res.unwrap().text(), "from network");
    assert_eq!(h.driver.assignment("fresh"), None);

    Build::new("B").deploy(&h.fetcher);
    assert!(h.driver.check_for_update().await);
    assert_eq!(h.driver.readiness(), ReadyState::Normal);
    assert_eq!(h.fetch_text(Request::get(url("/main.js")).with_client("fresh")).await, "main B");
}
