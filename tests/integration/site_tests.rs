//! Site pipeline integration tests.
//!
//! Tests verify:
//! - A folder scan makes new folders reachable through the image endpoint
//! - Scan results persist in the JSON metadata store
//! - Bursts of rebuild triggers collapse into few builds

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use tower::ServiceExt;

use photopost::site::{
    folder_id, scan_folders, JsonMetadataStore, MetadataStore, RebuildCoalescer, RebuildOutcome,
};
use photopost::{create_router, AppState, CacheConfig, DerivativeCache, ImageResizer, RouterConfig};

use super::test_utils::{get, header, write_png, CountingBuilder};

fn extensions() -> Vec<String> {
    vec!["png".to_string(), "mp4".to_string()]
}

#[tokio::test]
async fn test_scanned_folder_is_served() {
    let dir = tempfile::TempDir::new().unwrap();
    let watch = dir.path().join("watch");
    let folder = watch.join("2024").join("kyoto");
    write_png(&folder.join("temple.png"), 40, 20);

    let store = Arc::new(JsonMetadataStore::in_memory(&watch));
    let report = scan_folders(&watch, &extensions(), &*store).await.unwrap();
    assert_eq!(report.added, 1);
    assert!(report.changed());

    let id = folder_id(&folder);
    let record = store.get(&id).await.unwrap();
    assert_eq!(record.file_count, 1);
    assert_eq!(record.tags, vec!["2024".to_string()]);

    let cache = DerivativeCache::open(CacheConfig::new(dir.path().join("cache")), ImageResizer::new())
        .await
        .unwrap();
    let store: Arc<dyn MetadataStore> = store;
    let router = create_router(
        AppState::new(cache, store),
        RouterConfig::new().with_tracing(false),
    );

    let response = router
        .oneshot(get(&format!("/images/{}/temple.png?w=10", id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-derivative"), Some("resized"));
}

#[tokio::test]
async fn test_scan_persists_and_tracks_changes() {
    let dir = tempfile::TempDir::new().unwrap();
    let watch = dir.path().join("watch");
    let db = dir.path().join("photopost.json");
    let folder = watch.join("beach");
    write_png(&folder.join("a.png"), 8, 8);

    {
        let store = JsonMetadataStore::open(&watch, &db).await.unwrap();
        let report = scan_folders(&watch, &extensions(), &store).await.unwrap();
        assert_eq!(report.added, 1);
    }

    // Reopened store already knows the folder
    let store = JsonMetadataStore::open(&watch, &db).await.unwrap();
    let report = scan_folders(&watch, &extensions(), &store).await.unwrap();
    assert!(!report.changed());

    write_png(&folder.join("b.png"), 8, 8);
    let report = scan_folders(&watch, &extensions(), &store).await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(store.file_count(&folder_id(&folder)).await, 2);

    std::fs::remove_dir_all(&folder).unwrap();
    let report = scan_folders(&watch, &extensions(), &store).await.unwrap();
    assert_eq!(report.removed, 1);
    assert!(store.folder_ids().await.is_empty());
}

#[tokio::test]
async fn test_trigger_burst_coalesces() {
    let builder = CountingBuilder::default();
    let rebuild =
        RebuildCoalescer::new(builder.clone()).with_settle_delay(Duration::from_millis(50));

    let triggers: Vec<_> = (0..10)
        .map(|_| {
            let rebuild = rebuild.clone();
            tokio::spawn(async move { rebuild.trigger().await })
        })
        .collect();

    let mut led = 0;
    for trigger in triggers {
        match trigger.await.unwrap() {
            RebuildOutcome::Led { builds, failures } => {
                led += 1;
                assert_eq!(builds, 1);
                assert_eq!(failures, 0);
            }
            RebuildOutcome::Coalesced => {}
        }
    }

    assert_eq!(led, 1);
    assert_eq!(builder.runs(), 1);
    assert!(!rebuild.is_running().await);
}
