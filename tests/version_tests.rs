//! Version chain behavior: head uniqueness, history, delete markers and
//! resolution.

mod common;

use common::fixtures::{bucket, collect, md5_digest, payload, setup};
use object_store_core::storage::stream_from;
use object_store_core::{Error, ListParams};

#[tokio::test]
async fn upload_then_download_roundtrips() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;
    let content = payload(0x5a, 4096);

    let version = ctx
        .engine
        .versions()
        .create_version(bucket.id, "my_file.txt", stream_from(content.clone()))
        .await
        .unwrap();
    assert!(version.is_head);
    assert!(!version.delete_marker);

    let (resolved, file, stream) = ctx
        .engine
        .versions()
        .download(bucket.id, "my_file.txt", None)
        .await
        .unwrap();
    assert_eq!(resolved.id, version.id);
    assert_eq!(file.size, content.len() as i64);
    assert_eq!(file.checksum.as_deref(), Some(md5_digest(&content).as_str()));
    assert_eq!(collect(stream).await, content);
}

#[tokio::test]
async fn reupload_moves_the_head_and_keeps_history() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;
    let versions = ctx.engine.versions();

    let first = versions
        .create_version(bucket.id, "doc", stream_from(payload(1, 100)))
        .await
        .unwrap();
    let second = versions
        .create_version(bucket.id, "doc", stream_from(payload(2, 200)))
        .await
        .unwrap();

    let head = versions.resolve(bucket.id, "doc", None).await.unwrap();
    assert_eq!(head.id, second.id);

    let old = versions
        .resolve(bucket.id, "doc", Some(first.id))
        .await
        .unwrap();
    assert!(!old.is_head);
    let (_, _, stream) = versions
        .download(bucket.id, "doc", Some(first.id))
        .await
        .unwrap();
    assert_eq!(collect(stream).await, payload(1, 100));

    let history = versions.list_versions(bucket.id, "doc").await.unwrap();
    assert_eq!(
        history.iter().map(|v| v.id).collect::<Vec<_>>(),
        vec![second.id, first.id]
    );
}

#[tokio::test]
async fn concurrent_uploads_keep_a_single_head() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;

    let mut handles = Vec::new();
    for i in 0..8u8 {
        let versions = ctx.engine.versions();
        let bucket_id = bucket.id;
        handles.push(tokio::spawn(async move {
            versions
                .create_version(bucket_id, "contended", stream_from(payload(i, 64)))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let heads: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM object_versions WHERE bucket_id = ? AND key = ? AND is_head = 1",
    )
    .bind(bucket.id)
    .bind("contended")
    .fetch_one(ctx.engine.db())
    .await
    .unwrap();
    assert_eq!(heads, 1);

    let history = ctx
        .engine
        .versions()
        .list_versions(bucket.id, "contended")
        .await
        .unwrap();
    assert_eq!(history.len(), 8);
    assert!(history[0].is_head);
    assert!(history[1..].iter().all(|v| !v.is_head));
}

#[tokio::test]
async fn delete_marker_hides_the_key_but_preserves_history() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;
    let versions = ctx.engine.versions();

    let original = versions
        .create_version(bucket.id, "ghost", stream_from(payload(7, 50)))
        .await
        .unwrap();
    let marker = versions.create_delete_marker(bucket.id, "ghost").await.unwrap();
    assert!(marker.delete_marker);
    assert!(marker.file_id.is_none());

    // the head resolves as a value; callers read the flag
    let head = versions.resolve(bucket.id, "ghost", None).await.unwrap();
    assert_eq!(head.id, marker.id);
    assert!(head.delete_marker);

    // content is gone from the default view but not from history
    assert!(matches!(
        versions.download(bucket.id, "ghost", None).await,
        Err(Error::NotFound(_))
    ));
    let (_, _, stream) = versions
        .download(bucket.id, "ghost", Some(original.id))
        .await
        .unwrap();
    assert_eq!(collect(stream).await, payload(7, 50));

    // deleting an already-deleted key reports it absent
    assert!(matches!(
        versions.create_delete_marker(bucket.id, "ghost").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn delete_marker_for_unknown_key_is_not_found() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;
    assert!(matches!(
        ctx.engine
            .versions()
            .create_delete_marker(bucket.id, "never-uploaded")
            .await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn deleting_the_head_promotes_the_previous_version() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;
    let versions = ctx.engine.versions();

    let v1 = versions
        .create_version(bucket.id, "doc", stream_from(payload(1, 10)))
        .await
        .unwrap();
    let v2 = versions
        .create_version(bucket.id, "doc", stream_from(payload(2, 20)))
        .await
        .unwrap();
    let v3 = versions
        .create_version(bucket.id, "doc", stream_from(payload(3, 30)))
        .await
        .unwrap();
    let v3_file = v3.file_id.unwrap();

    versions
        .delete_version(bucket.id, "doc", v3.id, true)
        .await
        .unwrap();

    let head = versions.resolve(bucket.id, "doc", None).await.unwrap();
    assert_eq!(head.id, v2.id);
    assert!(head.is_head);

    // the erased version's content went with it
    assert!(matches!(
        ctx.engine.files().get(v3_file).await,
        Err(Error::NotFound(_))
    ));

    // remaining history is intact
    let history = versions.list_versions(bucket.id, "doc").await.unwrap();
    assert_eq!(
        history.iter().map(|v| v.id).collect::<Vec<_>>(),
        vec![v2.id, v1.id]
    );
}

#[tokio::test]
async fn non_permanent_delete_keeps_the_file_instance() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;
    let versions = ctx.engine.versions();

    let version = versions
        .create_version(bucket.id, "kept", stream_from(payload(9, 40)))
        .await
        .unwrap();
    let file_id = version.file_id.unwrap();

    versions
        .delete_version(bucket.id, "kept", version.id, false)
        .await
        .unwrap();

    // version row is gone, the now-unreferenced content is left for a sweep
    assert!(matches!(
        versions.resolve(bucket.id, "kept", None).await,
        Err(Error::NotFound(_))
    ));
    let file = ctx.engine.files().get(file_id).await.unwrap();
    assert_eq!(file.size, 40);
    ctx.engine.files().remove(file_id).await.unwrap();
}

#[tokio::test]
async fn deleting_an_unknown_version_is_not_found() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;
    assert!(matches!(
        ctx.engine
            .versions()
            .delete_version(bucket.id, "doc", uuid::Uuid::new_v4(), true)
            .await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn list_returns_heads_with_prefix_and_continuation() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;
    let versions = ctx.engine.versions();

    for key in ["logs/a", "logs/b", "logs/c", "readme"] {
        versions
            .create_version(bucket.id, key, stream_from(payload(0, 8)))
            .await
            .unwrap();
    }
    versions.create_delete_marker(bucket.id, "readme").await.unwrap();

    // delete markers are excluded from the default listing
    let all = versions
        .list(bucket.id, ListParams::default())
        .await
        .unwrap();
    assert_eq!(
        all.versions.iter().map(|v| v.key.as_str()).collect::<Vec<_>>(),
        vec!["logs/a", "logs/b", "logs/c"]
    );
    assert!(!all.is_truncated);

    let page = versions
        .list(
            bucket.id,
            ListParams {
                prefix: Some("logs/".into()),
                max_keys: 2,
                ..ListParams::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.versions.len(), 2);
    assert!(page.is_truncated);

    let rest = versions
        .list(
            bucket.id,
            ListParams {
                prefix: Some("logs/".into()),
                continuation_token: page.next_continuation_token.clone(),
                max_keys: 2,
                ..ListParams::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(rest.versions.len(), 1);
    assert_eq!(rest.versions[0].key, "logs/c");
    assert!(!rest.is_truncated);
}

#[tokio::test]
async fn version_tags_upsert_and_delete() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;
    let versions = ctx.engine.versions();

    let version = versions
        .create_version(bucket.id, "tagged", stream_from(payload(4, 16)))
        .await
        .unwrap();

    versions.set_tag(version.id, "mimetype", "text/plain").await.unwrap();
    versions.set_tag(version.id, "mimetype", "text/html").await.unwrap();
    versions.set_tag(version.id, "origin", "import").await.unwrap();

    let tags = versions.tags(version.id).await.unwrap();
    assert_eq!(tags.len(), 2);
    assert_eq!(tags[0].key, "mimetype");
    assert_eq!(tags[0].value, "text/html");

    versions.delete_tag(version.id, "origin").await.unwrap();
    assert!(matches!(
        versions.delete_tag(version.id, "origin").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn invalid_keys_are_rejected() {
    let ctx = setup().await;
    let bucket = bucket(&ctx).await;
    for key in ["", "/rooted", "a/../b"] {
        assert!(matches!(
            ctx.engine
                .versions()
                .create_version(bucket.id, key, stream_from(payload(0, 1)))
                .await,
            Err(Error::InvalidKey)
        ));
    }
}
