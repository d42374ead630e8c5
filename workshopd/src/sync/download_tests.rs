use super::*;
use std::time::Duration;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn descriptor(id: &str, version: &str, title: &str) -> ItemDescriptor {
    ItemDescriptor {
        id: ItemId::from(id),
        version_tag: version.into(),
        title: title.into(),
        content_handle: format!("c-{id}-{version}"),
        preview_handle: format!("p-{id}-{version}"),
    }
}

/// Serves `handle` through the link endpoint and returns `body` from the blob
/// endpoint, expecting exactly `times` link lookups.
async fn mount_blob(server: &MockServer, handle: &str, body: &[u8], times: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/content/{handle}/link")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "href": format!("{}/blob/{handle}", server.uri()),
            "method": "GET"
        })))
        .expect(times)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/blob/{handle}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

async fn mount_failing_link(server: &MockServer, handle: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/content/{handle}/link")))
        .respond_with(ResponseTemplate::new(503))
        .mount(server)
        .await;
}

fn make_downloader(server: &MockServer, root: &Path) -> Downloader {
    let client = WorkshopClient::with_base_url(&server.uri(), "test-token").unwrap();
    Downloader::new(client, TransferClient::new(), CacheLayout::new(root, "map"))
}

#[tokio::test]
async fn new_item_is_committed_with_remote_version() {
    let server = MockServer::start().await;
    mount_blob(&server, "c-1-v1", b"level-data", 1).await;
    mount_blob(&server, "p-1-v1", b"png-data", 1).await;
    let dir = tempdir().unwrap();
    let downloader = make_downloader(&server, dir.path());
    let mut ready = downloader.content_ready();
    let active = downloader.downloads_in_flight();

    let outcome = downloader
        .sync_item(&descriptor("1", "v1", "Tower"))
        .await
        .unwrap();

    let DownloadOutcome::Committed(entry) = outcome else {
        panic!("expected commit, got {outcome:?}");
    };
    assert_eq!(entry.recorded_version_tag, "v1");
    assert_eq!(entry.recorded_title, "Tower");
    let layout = downloader.layout();
    let id = ItemId::from("1");
    assert_eq!(
        std::fs::read(layout.committed_content_path(&id).unwrap()).unwrap(),
        b"level-data"
    );
    assert_eq!(
        std::fs::read(layout.committed_path_for(&id).unwrap().join("1.png")).unwrap(),
        b"png-data"
    );
    assert_eq!(layout.metadata().read(&id).await.unwrap(), entry);

    let event = ready.try_recv().unwrap();
    assert_eq!(event.id, id);
    assert_eq!(event.version_tag, "v1");
    assert_eq!(*active.borrow(), 0);
    assert!(downloader.in_flight().is_empty());
}

#[tokio::test]
async fn unchanged_version_triggers_no_transfer() {
    let server = MockServer::start().await;
    mount_blob(&server, "c-1-v1", b"level", 1).await;
    mount_blob(&server, "p-1-v1", b"png", 1).await;
    let dir = tempdir().unwrap();
    let downloader = make_downloader(&server, dir.path());
    let item = descriptor("1", "v1", "Tower");

    downloader.sync_item(&item).await.unwrap();
    let second = downloader.sync_item(&item).await.unwrap();

    assert_eq!(second, DownloadOutcome::UpToDate);
}

#[tokio::test]
async fn title_change_only_rewrites_metadata() {
    let server = MockServer::start().await;
    mount_blob(&server, "c-1-v1", b"level", 1).await;
    mount_blob(&server, "p-1-v1", b"png", 1).await;
    let dir = tempdir().unwrap();
    let downloader = make_downloader(&server, dir.path());
    downloader
        .sync_item(&descriptor("1", "v1", "Tower"))
        .await
        .unwrap();
    let active = downloader.downloads_in_flight();

    let outcome = downloader
        .sync_item(&descriptor("1", "v1", "Tower of Pillars"))
        .await
        .unwrap();

    let DownloadOutcome::TitleUpdated(entry) = outcome else {
        panic!("expected title update, got {outcome:?}");
    };
    assert_eq!(entry.recorded_title, "Tower of Pillars");
    assert_eq!(entry.recorded_version_tag, "v1");
    assert!(!active.has_changed().unwrap());
}

#[tokio::test]
async fn preview_failure_keeps_staged_content_and_creates_no_entry() {
    let server = MockServer::start().await;
    mount_blob(&server, "c-1-v1", b"level", 1).await;
    mount_failing_link(&server, "p-1-v1").await;
    let dir = tempdir().unwrap();
    let downloader = make_downloader(&server, dir.path());
    let mut ready = downloader.content_ready();

    let err = downloader
        .sync_item(&descriptor("1", "v1", "Tower"))
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::Api(_)));
    assert!(err.is_retryable());
    let layout = downloader.layout();
    let id = ItemId::from("1");
    assert!(layout.metadata().read(&id).await.is_none());
    assert!(!layout.committed_path_for(&id).unwrap().exists());
    assert_eq!(
        std::fs::read(layout.staged_content_path(&id).unwrap()).unwrap(),
        b"level"
    );
    assert!(ready.try_recv().is_err());
    assert_eq!(*downloader.downloads_in_flight().borrow(), 0);
    assert!(downloader.in_flight().is_empty());
}

#[tokio::test]
async fn failed_update_keeps_previous_version_authoritative() {
    let server = MockServer::start().await;
    mount_blob(&server, "c-1-v1", b"old-level", 1).await;
    mount_blob(&server, "p-1-v1", b"old-png", 1).await;
    mount_blob(&server, "c-1-v2", b"new-level", 1).await;
    mount_failing_link(&server, "p-1-v2").await;
    let dir = tempdir().unwrap();
    let downloader = make_downloader(&server, dir.path());
    downloader
        .sync_item(&descriptor("1", "v1", "Tower"))
        .await
        .unwrap();

    downloader
        .sync_item(&descriptor("1", "v2", "Tower"))
        .await
        .unwrap_err();

    let id = ItemId::from("1");
    let layout = downloader.layout();
    let entry = layout.metadata().read(&id).await.unwrap();
    assert_eq!(entry.recorded_version_tag, "v1");
    assert_eq!(
        std::fs::read(layout.committed_content_path(&id).unwrap()).unwrap(),
        b"old-level"
    );
}

#[tokio::test]
async fn content_failure_skips_preview() {
    let server = MockServer::start().await;
    mount_failing_link(&server, "c-1-v1").await;
    mount_blob(&server, "p-1-v1", b"png", 0).await;
    let dir = tempdir().unwrap();
    let downloader = make_downloader(&server, dir.path());

    downloader
        .sync_item(&descriptor("1", "v1", "Tower"))
        .await
        .unwrap_err();

    assert!(downloader
        .layout()
        .metadata()
        .read(&ItemId::from("1"))
        .await
        .is_none());
}

#[tokio::test]
async fn missing_record_forces_fresh_download() {
    let server = MockServer::start().await;
    mount_blob(&server, "c-1-v1", b"level", 2).await;
    mount_blob(&server, "p-1-v1", b"png", 2).await;
    let dir = tempdir().unwrap();
    let downloader = make_downloader(&server, dir.path());
    let item = descriptor("1", "v1", "Tower");
    downloader.sync_item(&item).await.unwrap();
    let record = downloader
        .layout()
        .metadata()
        .record_path(&item.id)
        .unwrap();
    std::fs::write(&record, b"garbage").unwrap();

    let outcome = downloader.sync_item(&item).await.unwrap();

    assert!(matches!(outcome, DownloadOutcome::Committed(_)));
}

#[tokio::test]
async fn concurrent_request_for_same_id_is_coalesced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/content/c-1-v1/link"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({
                    "href": format!("{}/blob/c-1-v1", server.uri()),
                    "method": "GET"
                }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blob/c-1-v1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"level".to_vec()))
        .mount(&server)
        .await;
    mount_blob(&server, "p-1-v1", b"png", 1).await;
    let dir = tempdir().unwrap();
    let downloader = make_downloader(&server, dir.path());
    let item = descriptor("1", "v1", "Tower");

    let (first, second) = tokio::join!(downloader.sync_item(&item), downloader.sync_item(&item));

    assert!(matches!(first.unwrap(), DownloadOutcome::Committed(_)));
    assert_eq!(second.unwrap(), DownloadOutcome::AlreadyInFlight);
}

#[tokio::test]
async fn distinct_ids_download_in_parallel() {
    let server = MockServer::start().await;
    for id in ["1", "2"] {
        mount_blob(&server, &format!("c-{id}-v1"), b"level", 1).await;
        mount_blob(&server, &format!("p-{id}-v1"), b"png", 1).await;
    }
    let dir = tempdir().unwrap();
    let downloader = make_downloader(&server, dir.path());

    let first = descriptor("1", "v1", "A");
    let second = descriptor("2", "v1", "B");
    let (a, b) = tokio::join!(downloader.sync_item(&first), downloader.sync_item(&second));

    assert!(matches!(a.unwrap(), DownloadOutcome::Committed(_)));
    assert!(matches!(b.unwrap(), DownloadOutcome::Committed(_)));
}

#[test]
fn state_machine_rejects_out_of_order_transitions() {
    let layout = CacheLayout::new(Path::new("/data"), "map");
    let mut task = DownloadTask::new(&layout, &ItemId::from("1")).unwrap();

    assert!(matches!(
        task.enter(DownloadState::Promoting),
        Err(DownloadError::InvalidTransition { .. })
    ));
    assert!(task.enter(DownloadState::Failed).is_err());

    task.enter(DownloadState::ContentFetching).unwrap();
    assert!(task.enter(DownloadState::Committed).is_err());
    task.enter(DownloadState::PreviewFetching).unwrap();
    task.enter(DownloadState::Promoting).unwrap();
    task.enter(DownloadState::Committed).unwrap();
    assert!(task.state().is_terminal());
    assert!(task.enter(DownloadState::Failed).is_err());
}

#[test]
fn in_flight_claim_is_released_on_drop() {
    let in_flight = InFlight::default();
    let id = ItemId::from("1");
    let guard = in_flight.try_claim(&id).unwrap();
    assert!(in_flight.try_claim(&id).is_none());
    assert!(in_flight.contains(&id));
    drop(guard);
    assert!(!in_flight.contains(&id));
    assert!(in_flight.try_claim(&id).is_some());
}
