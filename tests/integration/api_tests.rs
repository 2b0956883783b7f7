//! API integration tests for the image endpoint, health and rebuild.
//!
//! Tests verify:
//! - Originals, fresh and cached derivatives with the real resizer
//! - Error cases (bad width, unknown folder, missing file, path traversal)
//! - Busy responses with `Retry-After`
//! - Range requests on served files
//! - Health and rebuild endpoints, folder rescans, static site fallback

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use photopost::site::{folder_id, FolderScanner, RebuildCoalescer};
use photopost::{create_router, RouterConfig};

use super::test_utils::{
    body_bytes, body_json, eventually, get, header, image_dimensions, post, write_png,
    CountingBuilder, Library, SlowResizer, PHOTO_HEIGHT, PHOTO_WIDTH,
};

// =============================================================================
// Image Retrieval
// =============================================================================

#[tokio::test]
async fn test_original_without_width() {
    let lib = Library::new().await;
    let router = lib.router().await;

    let response = router.oneshot(get(&lib.uri("photo.png", ""))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), Some("image/png"));
    assert_eq!(header(&response, "x-derivative"), Some("original"));
    assert_eq!(
        header(&response, "cache-control"),
        Some("public, max-age=3600")
    );

    let body = body_bytes(response).await;
    assert_eq!(body, std::fs::read(lib.original("photo.png")).unwrap());
}

#[tokio::test]
async fn test_width_zero_serves_original() {
    let lib = Library::new().await;
    let router = lib.router().await;

    let response = router
        .oneshot(get(&lib.uri("photo.png", "w=0")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-derivative"), Some("original"));
}

#[tokio::test]
async fn test_resize_then_cached() {
    let lib = Library::new().await;
    let router = lib.router().await;

    let response = router
        .clone()
        .oneshot(get(&lib.uri("photo.png", "w=16")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-derivative"), Some("resized"));
    assert_eq!(header(&response, "content-type"), Some("image/png"));
    let first = body_bytes(response).await;
    assert_eq!(image_dimensions(&first), (16, 8));

    let response = router
        .oneshot(get(&lib.uri("photo.png", "w=16")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-derivative"), Some("cached"));
    assert_eq!(body_bytes(response).await, first);
}

#[tokio::test]
async fn test_width_at_or_above_source_serves_original() {
    let lib = Library::new().await;
    let router = lib.router().await;

    for w in [PHOTO_WIDTH, PHOTO_WIDTH * 10] {
        let response = router
            .clone()
            .oneshot(get(&lib.uri("photo.png", &format!("w={}", w))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-derivative"), Some("not-larger"));
        let body = body_bytes(response).await;
        assert_eq!(image_dimensions(&body), (PHOTO_WIDTH, PHOTO_HEIGHT));
    }

    // Nothing was written for a no-op resize
    let written = std::fs::read_dir(&lib.cache_dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".png"))
        .count();
    assert_eq!(written, 0);
}

#[tokio::test]
async fn test_undecodable_image_falls_back_to_original() {
    let lib = Library::new().await;
    let router = lib.router().await;

    let response = router
        .oneshot(get(&lib.uri("broken.jpg", "w=16")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), Some("image/jpeg"));
    assert_eq!(header(&response, "x-derivative"), Some("original"));
    assert_eq!(body_bytes(response).await, b"definitely not a jpeg");
}

#[tokio::test]
async fn test_deleted_derivative_is_rebuilt() {
    let lib = Library::new().await;
    let router = lib.router().await;

    let response = router
        .clone()
        .oneshot(get(&lib.uri("photo.png", "w=20")))
        .await
        .unwrap();
    assert_eq!(header(&response, "x-derivative"), Some("resized"));

    for entry in std::fs::read_dir(&lib.cache_dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|e| e == "png") {
            std::fs::remove_file(path).unwrap();
        }
    }

    // Let the finished job leave the in-flight table
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = router
        .oneshot(get(&lib.uri("photo.png", "w=20")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-derivative"), Some("resized"));
    assert_eq!(image_dimensions(&body_bytes(response).await), (20, 10));
}

#[tokio::test]
async fn test_range_request_on_original() {
    let lib = Library::new().await;
    let router = lib.router().await;
    let original = std::fs::read(lib.original("photo.png")).unwrap();

    let request = Request::builder()
        .uri(lib.uri("photo.png", ""))
        .header("range", "bytes=0-9")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, "content-type"), Some("image/png"));
    assert_eq!(header(&response, "x-derivative"), Some("original"));
    assert_eq!(
        header(&response, "cache-control"),
        Some("public, max-age=3600")
    );
    assert_eq!(body_bytes(response).await, &original[..10]);
}

#[tokio::test]
async fn test_range_request_on_derivative() {
    let lib = Library::new().await;
    let router = lib.router().await;

    let full = router
        .clone()
        .oneshot(get(&lib.uri("photo.png", "w=16")))
        .await
        .unwrap();
    let full = body_bytes(full).await;

    let request = Request::builder()
        .uri(lib.uri("photo.png", "w=16"))
        .header("range", "bytes=4-")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, "x-derivative"), Some("cached"));
    assert_eq!(body_bytes(response).await, &full[4..]);
}

// =============================================================================
// Error Handling
// =============================================================================

#[tokio::test]
async fn test_invalid_width_rejected() {
    let lib = Library::new().await;
    let router = lib.router().await;

    for query in ["w=abc", "w=-5", "w=1.5"] {
        let response = router
            .clone()
            .oneshot(get(&lib.uri("photo.png", query)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "query {}", query);
        let error = body_json(response).await;
        assert_eq!(error["error"], "invalid_width");
        assert_eq!(error["status"], 400);
    }
}

#[tokio::test]
async fn test_unknown_folder() {
    let lib = Library::new().await;
    let router = lib.router().await;

    let response = router
        .oneshot(get("/images/0000000000/photo.png?w=16"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let error = body_json(response).await;
    assert_eq!(error["error"], "not_found");
}

#[tokio::test]
async fn test_missing_file() {
    let lib = Library::new().await;
    let router = lib.router().await;

    let response = router
        .oneshot(get(&lib.uri("nope.png", "w=16")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let error = body_json(response).await;
    assert_eq!(error["error"], "not_found");
}

#[tokio::test]
async fn test_path_traversal_rejected() {
    let lib = Library::new().await;
    std::fs::write(lib.watch.join("secret.png"), b"secret").unwrap();
    let router = lib.router().await;

    let response = router
        .oneshot(get(&lib.uri("..%2Fsecret.png", "")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_busy_when_no_slot_is_free() {
    let lib = Library::new().await;
    let resizer = SlowResizer::new(Duration::from_millis(500));
    let cache = lib
        .cache(lib.cache_config().with_max_concurrent(1), resizer.clone())
        .await;
    let router = create_router(
        lib.state_with(cache),
        RouterConfig::new().with_tracing(false).with_retry_after(7),
    );

    // Occupy the only slot
    let first = tokio::spawn(
        router
            .clone()
            .oneshot(get(&lib.uri("photo.png", "w=10"))),
    );
    assert!(eventually(Duration::from_secs(5), || resizer.started()).await);

    let response = router
        .clone()
        .oneshot(get(&lib.uri("photo.png", "w=12")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, "retry-after"), Some("7"));
    let error = body_json(response).await;
    assert_eq!(error["error"], "busy");

    let response = first.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-derivative"), Some("resized"));
}

// =============================================================================
// Health and Rebuild
// =============================================================================

#[tokio::test]
async fn test_health_reports_cache_stats() {
    let lib = Library::new().await;
    let router = lib.router().await;

    router
        .clone()
        .oneshot(get(&lib.uri("photo.png", "w=16")))
        .await
        .unwrap();

    let response = router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["cache"]["entries"], 1);
    assert_eq!(health["cache"]["max_concurrent"], 10);
    assert_eq!(health["rebuilding"], false);
}

#[tokio::test]
async fn test_rebuild_disabled_without_builder() {
    let lib = Library::new().await;
    let router = lib.router().await;

    let response = router.oneshot(post("/rebuild")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let error = body_json(response).await;
    assert_eq!(error["error"], "rebuild_disabled");
}

#[tokio::test]
async fn test_rebuild_runs_builder() {
    let lib = Library::new().await;
    let builder = CountingBuilder::default();
    let rebuild = RebuildCoalescer::new(builder.clone()).with_settle_delay(Duration::ZERO);
    let state = lib.state().await.with_rebuild(rebuild);
    let router = create_router(state, RouterConfig::new().with_tracing(false));

    let response = router.oneshot(post("/rebuild")).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["status"], "accepted");

    assert!(eventually(Duration::from_secs(5), || builder.runs() == 1).await);
}

#[tokio::test]
async fn test_rebuild_rescans_new_folders() {
    let lib = Library::new().await;
    let builder = CountingBuilder::default();
    let rebuild = RebuildCoalescer::new(builder.clone()).with_settle_delay(Duration::ZERO);
    let scanner = FolderScanner::new(&lib.watch, &["png", "jpg"]);
    let state = lib
        .state()
        .await
        .with_rebuild(rebuild)
        .with_scanner(scanner);
    let router = create_router(state, RouterConfig::new().with_tracing(false));

    let added = lib.watch.join("harbor");
    write_png(&added.join("boat.png"), 40, 20);
    let uri = format!("/images/{}/boat.png?w=10", folder_id(&added));

    // Unknown until a rescan records it
    let response = router.clone().oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router.clone().oneshot(post("/rebuild")).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["scan"]["added"], 1);

    let response = router.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-derivative"), Some("resized"));
    assert_eq!(image_dimensions(&body_bytes(response).await), (10, 5));

    assert!(eventually(Duration::from_secs(5), || builder.runs() == 1).await);
}

#[tokio::test]
async fn test_site_fallback() {
    let lib = Library::new().await;
    let site = lib.dir.path().join("public");
    std::fs::create_dir_all(&site).unwrap();
    std::fs::write(site.join("index.html"), "<h1>photos</h1>").unwrap();

    let config = RouterConfig::new().with_tracing(false).with_site_dir(&site);
    let router = create_router(lib.state().await, config);

    let response = router.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"<h1>photos</h1>");

    let response = router.oneshot(get("/missing.html")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
