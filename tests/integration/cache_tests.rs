//! Derivative cache integration tests against real images on disk.
//!
//! Tests verify:
//! - Restarting the cache restores finished derivatives from the snapshot
//! - Expiry sweeps remove files and the next request rebuilds them
//! - A modified original invalidates its derivatives
//! - Repeated requests resize once

use std::time::Duration;

use photopost::derivative::{derive_key, DerivativeKind, ImageResizer, SNAPSHOT_FILE_NAME};

use super::test_utils::{write_png, Library, SlowResizer};

#[tokio::test]
async fn test_snapshot_survives_restart() {
    let lib = Library::new().await;
    let original = lib.original("photo.png");

    let first = {
        let cache = lib.cache(lib.cache_config(), ImageResizer::new()).await;
        let derivative = cache.get_derivative(&original, 24).await.unwrap();
        assert_eq!(derivative.kind, DerivativeKind::Resized);
        assert_eq!(cache.save_snapshot().await.unwrap(), 1);
        derivative
    };
    assert!(lib.cache_dir.join(SNAPSHOT_FILE_NAME).exists());

    let resizer = SlowResizer::new(Duration::ZERO);
    let cache = lib.cache(lib.cache_config(), resizer.clone()).await;
    let derivative = cache.get_derivative(&original, 24).await.unwrap();

    assert_eq!(derivative.kind, DerivativeKind::Cached);
    assert_eq!(derivative.path, first.path);
    assert_eq!(resizer.calls(), 0);
}

#[tokio::test]
async fn test_expired_derivative_is_swept_and_rebuilt() {
    let lib = Library::new().await;
    let original = lib.original("photo.png");
    let config = lib.cache_config().with_ttl(Duration::from_millis(100));
    let cache = lib.cache(config, ImageResizer::new()).await;

    let derivative = cache.get_derivative(&original, 16).await.unwrap();
    assert!(derivative.path.exists());

    tokio::time::sleep(Duration::from_millis(200)).await;

    let report = cache.sweep().await;
    assert_eq!(report.expired, 1);
    assert_eq!(report.errors, 0);
    assert!(!derivative.path.exists());
    assert_eq!(cache.stats().await.entries, 0);

    let rebuilt = cache.get_derivative(&original, 16).await.unwrap();
    assert_eq!(rebuilt.kind, DerivativeKind::Resized);
    assert_eq!(rebuilt.path, derivative.path);
    assert!(rebuilt.path.exists());
}

#[tokio::test]
async fn test_modified_original_invalidates_derivative() {
    let lib = Library::new().await;
    let original = lib.original("photo.png");
    let cache = lib.cache(lib.cache_config(), ImageResizer::new()).await;

    let first = cache.get_derivative(&original, 16).await.unwrap();
    assert_eq!(image::image_dimensions(&first.path).unwrap(), (16, 8));

    // Let the finished job expire and make sure the new mtime is later
    tokio::time::sleep(Duration::from_millis(1100)).await;
    write_png(&original, 64, 64);

    let second = cache.get_derivative(&original, 16).await.unwrap();
    assert_eq!(second.kind, DerivativeKind::Resized);
    assert_eq!(image::image_dimensions(&second.path).unwrap(), (16, 16));
}

#[tokio::test]
async fn test_repeated_requests_resize_once() {
    let lib = Library::new().await;
    let original = lib.original("photo.png");
    let resizer = SlowResizer::new(Duration::ZERO);
    let cache = lib.cache(lib.cache_config(), resizer.clone()).await;

    for _ in 0..5 {
        cache.get_derivative(&original, 30).await.unwrap();
    }

    assert_eq!(resizer.calls(), 1);
    assert_eq!(cache.stats().await.entries, 1);
}

#[tokio::test]
async fn test_keys_are_per_width() {
    let lib = Library::new().await;
    let original = lib.original("photo.png");
    let cache = lib.cache(lib.cache_config(), ImageResizer::new()).await;

    let small = cache.get_derivative(&original, 8).await.unwrap();
    let large = cache.get_derivative(&original, 32).await.unwrap();

    assert_ne!(small.path, large.path);
    let small_key = derive_key(&original, 8).unwrap();
    assert!(small
        .path
        .to_string_lossy()
        .contains(small_key.as_str()));
    assert_eq!(cache.stats().await.entries, 2);
}

#[tokio::test]
async fn test_old_orphan_files_are_swept() {
    let lib = Library::new().await;
    let config = lib.cache_config().with_ttl(Duration::from_millis(100));
    let cache = lib.cache(config, ImageResizer::new()).await;

    let orphan = lib.cache_dir.join("leftover.png");
    write_png(&orphan, 4, 4);

    // Too young to be removed
    assert_eq!(cache.sweep().await.orphans, 0);
    assert!(orphan.exists());

    tokio::time::sleep(Duration::from_millis(200)).await;

    let report = cache.sweep().await;
    assert_eq!(report.orphans, 1);
    assert!(!orphan.exists());
}
