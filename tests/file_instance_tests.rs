//! File instance lifecycle: reference counting, fixity verification,
//! migration and the integrity sweep.

mod common;

use common::fixtures::{bucket, collect, payload, setup};
use common::mocks::RecordingRunner;
use chrono::Duration;
use object_store_core::hooks::events;
use object_store_core::storage::stream_from;
use object_store_core::Error;

#[tokio::test]
async fn removing_referenced_content_is_refused() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;

    let version = ctx
        .engine
        .versions()
        .create_version(bucket.id, "pinned", stream_from(payload(1, 32)))
        .await
        .unwrap();
    let file_id = version.file_id.unwrap();

    match ctx.engine.files().remove(file_id).await {
        Err(Error::FileReferenced { references, .. }) => assert_eq!(references, 1),
        other => panic!("expected FileReferenced, got {other:?}"),
    }

    // dropping the last referencing version permits removal
    ctx.engine
        .versions()
        .delete_version(bucket.id, "pinned", version.id, false)
        .await
        .unwrap();
    ctx.engine.files().remove(file_id).await.unwrap();
    assert!(matches!(
        ctx.engine.files().get(file_id).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn staged_multipart_content_also_counts_as_a_reference() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;

    let upload = ctx
        .engine
        .multipart()
        .initiate(bucket.id, "staged", 1000, 1000)
        .await
        .unwrap();
    assert!(matches!(
        ctx.engine.files().remove(upload.file_id).await,
        Err(Error::FileReferenced { .. })
    ));
}

#[tokio::test]
async fn verify_flags_corrupted_content_without_deleting_it() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;

    let version = ctx
        .engine
        .versions()
        .create_version(bucket.id, "fragile", stream_from(payload(5, 64)))
        .await
        .unwrap();
    let file_id = version.file_id.unwrap();

    assert!(ctx.engine.files().verify(file_id).await.unwrap());
    let file = ctx.engine.files().get(file_id).await.unwrap();
    assert_eq!(file.last_check, Some(true));
    assert!(file.last_check_at.is_some());

    // flip bytes behind the engine's back
    std::fs::write(&file.uri, b"corrupted").unwrap();

    assert!(!ctx.engine.files().verify(file_id).await.unwrap());
    let file = ctx.engine.files().get(file_id).await.unwrap();
    assert_eq!(file.last_check, Some(false));
    assert!(!file.readable);

    // flagged, reported, but never auto-deleted
    assert!(std::path::Path::new(&file.uri).exists());
    assert_eq!(ctx.hook.payloads_of(events::CHECKSUM_MISMATCH).len(), 1);

    // unreadable content is no longer served
    assert!(matches!(
        ctx.engine.versions().download(bucket.id, "fragile", None).await,
        Err(Error::StorageUnavailable(_))
    ));
}

#[tokio::test]
async fn migration_repoints_every_referencing_version() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;
    let archive_root = ctx.root.path().join("archive");
    ctx.engine
        .locations()
        .create("archive", archive_root.to_str().unwrap(), false)
        .await
        .unwrap();

    let content = payload(0x42, 512);
    let version = ctx
        .engine
        .versions()
        .create_version(bucket.id, "moved", stream_from(content.clone()))
        .await
        .unwrap();
    let old_file = version.file_id.unwrap();

    let migrated = ctx
        .engine
        .integrity()
        .migrate_file(old_file, "archive", true)
        .await
        .unwrap();
    assert_ne!(migrated.id, old_file);
    assert!(migrated.uri.starts_with(archive_root.to_str().unwrap()));

    let resolved = ctx
        .engine
        .versions()
        .resolve(bucket.id, "moved", None)
        .await
        .unwrap();
    assert_eq!(resolved.file_id, Some(migrated.id));

    let (_, file, stream) = ctx
        .engine
        .versions()
        .download(bucket.id, "moved", None)
        .await
        .unwrap();
    assert_eq!(file.checksum, migrated.checksum);
    assert_eq!(collect(stream).await, content);

    // the source instance is unreferenced now and can be collected
    ctx.engine.files().remove(old_file).await.unwrap();
}

#[tokio::test]
async fn failed_migration_leaves_the_source_untouched() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;
    ctx.engine
        .locations()
        .create("broken", "flaky://vault", false)
        .await
        .unwrap();

    let version = ctx
        .engine
        .versions()
        .create_version(bucket.id, "stuck", stream_from(payload(6, 256)))
        .await
        .unwrap();
    let file_id = version.file_id.unwrap();

    assert!(matches!(
        ctx.engine.integrity().migrate_file(file_id, "broken", false).await,
        Err(Error::StorageUnavailable(_))
    ));

    // still exactly one instance, still referenced, still readable
    let instances: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM file_instances")
        .fetch_one(ctx.engine.db())
        .await
        .unwrap();
    assert_eq!(instances, 1);
    let resolved = ctx
        .engine
        .versions()
        .resolve(bucket.id, "stuck", None)
        .await
        .unwrap();
    assert_eq!(resolved.file_id, Some(file_id));
    let (_, _, stream) = ctx
        .engine
        .versions()
        .download(bucket.id, "stuck", None)
        .await
        .unwrap();
    assert_eq!(collect(stream).await, payload(6, 256));
}

#[tokio::test]
async fn migrating_to_an_unknown_location_is_not_found() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;
    let version = ctx
        .engine
        .versions()
        .create_version(bucket.id, "f", stream_from(payload(0, 8)))
        .await
        .unwrap();
    assert!(matches!(
        ctx.engine
            .integrity()
            .migrate_file(version.file_id.unwrap(), "nowhere", false)
            .await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn checksum_sweep_reverifies_due_files() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;
    let versions = ctx.engine.versions();

    let good = versions
        .create_version(bucket.id, "good", stream_from(payload(1, 100)))
        .await
        .unwrap();
    let bad = versions
        .create_version(bucket.id, "bad", stream_from(payload(2, 100)))
        .await
        .unwrap();

    let report = ctx
        .engine
        .integrity()
        .checksum_sweep(Duration::zero(), 100)
        .await
        .unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.passed, 2);
    assert!(report.failed.is_empty());

    let bad_file = ctx.engine.files().get(bad.file_id.unwrap()).await.unwrap();
    std::fs::write(&bad_file.uri, b"bitrot").unwrap();

    let report = ctx
        .engine
        .integrity()
        .checksum_sweep(Duration::zero(), 100)
        .await
        .unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.passed, 1);
    assert_eq!(report.failed, vec![bad.file_id.unwrap()]);

    // the flagged file drops out of later sweeps, the good one stays
    let report = ctx
        .engine
        .integrity()
        .checksum_sweep(Duration::zero(), 100)
        .await
        .unwrap();
    assert_eq!(report.checked, 1);
    let _ = good;
}

#[tokio::test]
async fn sweep_jobs_can_be_deferred_to_a_runner() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;
    ctx.engine
        .versions()
        .create_version(bucket.id, "f", stream_from(payload(0, 16)))
        .await
        .unwrap();

    let runner = RecordingRunner::default();
    let submitted = ctx
        .engine
        .integrity()
        .enqueue_due(&runner, Duration::zero(), 100)
        .await
        .unwrap();
    assert_eq!(submitted, 1);
    let jobs = runner.jobs.lock().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].0, "verify_file");
}

#[tokio::test]
async fn download_events_are_emitted() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;
    ctx.engine
        .versions()
        .create_version(bucket.id, "seen", stream_from(payload(3, 24)))
        .await
        .unwrap();
    let (_, _, stream) = ctx
        .engine
        .versions()
        .download(bucket.id, "seen", None)
        .await
        .unwrap();
    collect(stream).await;

    let names = ctx.hook.names();
    assert!(names.contains(&events::OBJECT_VERSION_CREATED.to_string()));
    assert!(names.contains(&events::FILE_DOWNLOADED.to_string()));
}
