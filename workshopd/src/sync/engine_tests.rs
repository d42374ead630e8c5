use super::*;
use serde_json::json;
use std::path::Path;
use tempfile::tempdir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::sync::transfer::TransferConfig;

const ACCOUNT: &str = "42";
const APP_ID: u32 = 7;

fn item(id: &str, version: &str) -> serde_json::Value {
    json!({
        "id": id,
        "version_tag": version,
        "title": format!("Map {id}"),
        "content_handle": format!("c-{id}-{version}"),
        "preview_handle": format!("p-{id}-{version}"),
        "consumer_app_id": APP_ID,
        "file_type": "community"
    })
}

async fn mount_page(server: &MockServer, list: &str, page: u32, total: u32, items: Vec<serde_json::Value>) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/accounts/{ACCOUNT}/ugc")))
        .and(query_param("list", list))
        .and(query_param("page", page.to_string()))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "total": total, "items": items })),
        )
        .mount(server)
        .await;
}

/// Link and blob endpoints for both files of `id@version`; each link is
/// expected to be resolved exactly `times` times.
async fn mount_item_files(server: &MockServer, id: &str, version: &str, times: u64) {
    for kind in ["c", "p"] {
        let handle = format!("{kind}-{id}-{version}");
        Mock::given(method("GET"))
            .and(path(format!("/v1/content/{handle}/link")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "href": format!("{}/blob/{handle}", server.uri()),
                "method": "GET"
            })))
            .expect(times)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/blob/{handle}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(handle.into_bytes()))
            .mount(server)
            .await;
    }
}

fn make_engine(server: &MockServer, root: &Path) -> SyncEngine {
    let client = WorkshopClient::with_base_url(&server.uri(), "test-token").unwrap();
    SyncEngine::new(
        client,
        TransferClient::new(),
        CacheLayout::new(root, "map"),
        ACCOUNT,
        APP_ID,
    )
}

async fn commit_locally(layout: &CacheLayout, id: &str, version: &str) {
    let id = ItemId::from(id);
    std::fs::create_dir_all(layout.staging_path_for(&id).unwrap()).unwrap();
    std::fs::write(layout.staged_content_path(&id).unwrap(), b"content").unwrap();
    std::fs::write(layout.staged_preview_path(&id).unwrap(), b"preview").unwrap();
    layout.promote(&id).await.unwrap();
    layout
        .metadata()
        .write(&id, version, &format!("Map {id}"))
        .await
        .unwrap();
}

fn ids(values: &[&str]) -> Vec<ItemId> {
    values.iter().map(|id| ItemId::from(*id)).collect()
}

#[tokio::test]
async fn pass_downloads_new_items_and_sweeps_unobserved_entries() {
    let server = MockServer::start().await;
    mount_page(&server, "subscribed", 1, 5, vec![item("A", "v1"), item("B", "v1")]).await;
    mount_page(
        &server,
        "subscribed",
        2,
        5,
        vec![item("D", "v1"), item("E", "v1"), item("F", "v1")],
    )
    .await;
    mount_page(&server, "subscribed", 3, 5, vec![]).await;
    for id in ["D", "E", "F"] {
        mount_item_files(&server, id, "v1", 1).await;
    }
    let dir = tempdir().unwrap();
    let engine = make_engine(&server, dir.path());
    for id in ["A", "B", "C"] {
        commit_locally(engine.layout(), id, "v1").await;
    }

    let report = engine.run_catalog_pass().await.unwrap();

    assert_eq!(report.pages, 3);
    assert_eq!(report.observed, 5);
    assert_eq!(report.up_to_date, 2);
    assert_eq!(report.committed, ids(&["D", "E", "F"]));
    assert_eq!(report.removed, ids(&["C"]));
    assert!(report.failed.is_empty());
    assert_eq!(
        engine.layout().list_committed().await.unwrap(),
        ids(&["A", "B", "D", "E", "F"])
    );
    assert_eq!(*engine.downloads_in_flight().borrow(), 0);
}

#[tokio::test]
async fn second_pass_over_unchanged_catalog_is_a_no_op() {
    let server = MockServer::start().await;
    mount_page(&server, "subscribed", 1, 2, vec![item("A", "v1"), item("B", "v1")]).await;
    mount_page(&server, "subscribed", 2, 2, vec![]).await;
    mount_item_files(&server, "A", "v1", 1).await;
    mount_item_files(&server, "B", "v1", 1).await;
    let dir = tempdir().unwrap();
    let engine = make_engine(&server, dir.path());

    let first = engine.run_catalog_pass().await.unwrap();
    let second = engine.run_catalog_pass().await.unwrap();

    assert_eq!(first.committed, ids(&["A", "B"]));
    assert!(second.committed.is_empty());
    assert!(second.removed.is_empty());
    assert_eq!(second.up_to_date, 2);
}

#[tokio::test]
async fn page_failure_aborts_pass_without_sweeping() {
    let server = MockServer::start().await;
    mount_page(&server, "subscribed", 1, 4, vec![item("A", "v1"), item("B", "v1")]).await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/accounts/{ACCOUNT}/ugc")))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();
    let engine = make_engine(&server, dir.path());
    for id in ["A", "B", "C"] {
        commit_locally(engine.layout(), id, "v1").await;
    }

    let err = engine.run_catalog_pass().await.unwrap_err();

    assert!(matches!(err, EngineError::Catalog(CatalogError::Page { page: 2, .. })));
    assert!(err.is_retryable());
    assert_eq!(
        engine.layout().list_committed().await.unwrap(),
        ids(&["A", "B", "C"])
    );
}

#[tokio::test]
async fn failed_item_download_does_not_get_swept() {
    let server = MockServer::start().await;
    mount_page(&server, "subscribed", 1, 1, vec![item("A", "v2")]).await;
    mount_page(&server, "subscribed", 2, 1, vec![]).await;
    Mock::given(method("GET"))
        .and(path("/v1/content/c-A-v2/link"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();
    let engine = make_engine(&server, dir.path());
    commit_locally(engine.layout(), "A", "v1").await;

    let report = engine.run_catalog_pass().await.unwrap();

    assert_eq!(report.failed, ids(&["A"]));
    assert!(report.removed.is_empty());
    let entry = engine
        .layout()
        .metadata()
        .read(&ItemId::from("A"))
        .await
        .unwrap();
    assert_eq!(entry.recorded_version_tag, "v1");
}

#[tokio::test]
async fn subscribed_event_downloads_item_outside_a_pass() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/files/N"))
        .respond_with(ResponseTemplate::new(200).set_body_json(item("N", "v3")))
        .expect(1)
        .mount(&server)
        .await;
    mount_item_files(&server, "N", "v3", 1).await;
    let dir = tempdir().unwrap();
    let engine = make_engine(&server, dir.path());
    let mut ready = engine.content_ready();

    engine
        .handle_event(PlatformEvent::ItemSubscribed {
            item_id: ItemId::from("N"),
            app_id: APP_ID,
        })
        .await
        .unwrap();

    let event = ready.try_recv().unwrap();
    assert_eq!(event.id, ItemId::from("N"));
    assert_eq!(event.version_tag, "v3");
    assert_eq!(
        engine.layout().list_committed().await.unwrap(),
        ids(&["N"])
    );
}

#[tokio::test]
async fn events_for_other_apps_are_ignored() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/files/N"))
        .respond_with(ResponseTemplate::new(200).set_body_json(item("N", "v1")))
        .expect(0)
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();
    let engine = make_engine(&server, dir.path());

    let outcome = engine
        .on_item_subscribed(&ItemId::from("N"), APP_ID + 1)
        .await
        .unwrap();
    engine
        .handle_event(PlatformEvent::OverlayActivated { active: true })
        .await
        .unwrap();

    assert!(outcome.is_none());
}

#[tokio::test]
async fn published_items_uses_published_listing() {
    let server = MockServer::start().await;
    mount_page(&server, "published", 1, 1, vec![item("P", "v1")]).await;
    let dir = tempdir().unwrap();
    let engine = make_engine(&server, dir.path());

    let items = engine.published_items().await.unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, ItemId::from("P"));
    assert_eq!(items[0].content_handle, "c-P-v1");
}

#[tokio::test]
async fn unsubscribe_removes_committed_entry() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let engine = make_engine(&server, dir.path());
    commit_locally(engine.layout(), "A", "v1").await;

    assert!(engine.unsubscribe(&ItemId::from("A")).await.unwrap());
    assert!(!engine.unsubscribe(&ItemId::from("A")).await.unwrap());
    assert!(engine.layout().metadata().read(&ItemId::from("A")).await.is_none());
}

#[tokio::test]
async fn receivers_taken_at_construction_see_later_downloads() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/files/N"))
        .respond_with(ResponseTemplate::new(200).set_body_json(item("N", "v1")))
        .mount(&server)
        .await;
    mount_item_files(&server, "N", "v1", 1).await;
    let dir = tempdir().unwrap();
    let client = WorkshopClient::with_base_url(&server.uri(), "test-token").unwrap();
    let transfer = TransferClient::with_config(TransferConfig {
        download_concurrency: 1,
        upload_concurrency: 1,
    });
    let layout = CacheLayout::new(dir.path(), "map");
    let engine = SyncEngine::new(client, transfer, layout, ACCOUNT, APP_ID);
    let mut ready = engine.content_ready();
    let mut in_flight = engine.downloads_in_flight();

    engine
        .on_item_subscribed(&ItemId::from("N"), APP_ID)
        .await
        .unwrap();

    assert_eq!(ready.try_recv().unwrap().id, ItemId::from("N"));
    assert!(in_flight.has_changed().unwrap());
    assert_eq!(*in_flight.borrow_and_update(), 0);
}

