//! Restart behaviour with the on-disk store.

mod common;

use std::sync::Arc;

use common::{config, key, url, ScriptedNetwork};
use shellcache_net::{Request, ResponseSource};
use shellcache_sw::{CacheStorage, DiskCacheStorage, ServiceWorker, ServiceWorkerState};
use tempfile::TempDir;

const APP: &[&str] = &["./", "./index.html", "./app.js"];

#[tokio::test]
async fn test_resume_serves_offline_after_restart() {
    shellcache_common::init_logging(shellcache_common::LogConfig::debug());
    let dir = TempDir::new().unwrap();
    let network = ScriptedNetwork::serving(APP);

    {
        let storage = Arc::new(DiskCacheStorage::open_dir(dir.path()).unwrap());
        let (worker, _events) =
            ServiceWorker::standalone(config("v1", APP), storage, network.clone()).unwrap();
        worker.install().await.unwrap();
    }

    network.set_offline(true);
    let storage = Arc::new(DiskCacheStorage::open_dir(dir.path()).unwrap());
    assert!(storage
        .match_request("jjs2025-cache-v1", &key("./app.js"))
        .await
        .is_some());

    let (worker, _events) =
        ServiceWorker::standalone(config("v1", APP), storage, network.clone()).unwrap();
    assert!(!worker.is_active().await);
    assert!(worker.resume().await.unwrap());
    assert_eq!(worker.state().await, Some(ServiceWorkerState::Activated));

    let page = worker.respond(Request::navigate(url("./anything"))).await;
    assert_eq!(page.source, ResponseSource::Cache);
    assert_eq!(page.text().unwrap(), "precached");
}

#[tokio::test]
async fn test_resume_without_store_does_nothing() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(DiskCacheStorage::open_dir(dir.path()).unwrap());
    let (worker, _events) =
        ServiceWorker::standalone(config("v2", APP), storage, ScriptedNetwork::serving(APP))
            .unwrap();

    assert!(!worker.resume().await.unwrap());
    assert!(!worker.is_active().await);
}

#[tokio::test]
async fn test_upgrade_removes_old_store() {
    let dir = TempDir::new().unwrap();
    let network = ScriptedNetwork::serving(APP);
    let storage = Arc::new(DiskCacheStorage::open_dir(dir.path()).unwrap());

    let (v1, _events) =
        ServiceWorker::standalone(config("v1", APP), storage.clone(), network.clone()).unwrap();
    v1.install().await.unwrap();
    let (v2, _events) = ServiceWorker::new(
        config("v2", APP),
        storage.clone(),
        network.clone(),
        v1.registration(),
    )
    .unwrap();
    v2.install().await.unwrap();

    let reopened = DiskCacheStorage::open_dir(dir.path()).unwrap();
    assert_eq!(reopened.keys().await, vec!["jjs2025-cache-v2"]);
}
