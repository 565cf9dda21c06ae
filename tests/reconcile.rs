//! Reconciliation pass tests.
//!
//! Drive full passes against an in-memory database with a scripted fetcher.

mod common;

use aggregator::rss::{FeedRepository, PassReport, PostRepository};
use common::{feed, jan, post_count, register, rss, set_state, setup, FetchCall, Response};

const A: &str = "https://a.example.com/rss";
const B: &str = "https://b.example.com/rss";
const C: &str = "https://c.example.com/rss";

#[tokio::test]
async fn test_first_fetch_imports_every_item() {
    let (db, fetcher, reconciler) = setup().await;
    let f1 = register(&db, A).await;
    fetcher.set(A, Response::document(rss(&[("One", "1"), ("Two", "2")])));

    let report = reconciler.run_pass().await.unwrap();

    assert_eq!(report.feeds_seen, 1);
    assert_eq!(report.initial_imports, 1);
    assert_eq!(report.posts_created, 2);
    assert_eq!(post_count(&db, &f1.id).await, 2);

    let stored = feed(&db, &f1.id).await;
    assert!(stored.fetched);
    // No signal on the response: last_modified keeps its registration value
    assert_eq!(stored.last_modified, f1.last_modified);
}

#[tokio::test]
async fn test_first_fetch_stores_item_fields() {
    let (db, fetcher, reconciler) = setup().await;
    let f1 = register(&db, A).await;
    fetcher.set(A, Response::document(rss(&[("One", "First body")])));

    reconciler.run_pass().await.unwrap();

    let posts = PostRepository::new(db.pool())
        .list_by_feed(&f1.id, 10, 0)
        .await
        .unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].feed_id, f1.id);
    assert_eq!(posts[0].title, "One");
    assert_eq!(posts[0].description, "First body");
    assert_eq!(posts[0].link, "https://example.com/0");
    assert_eq!(posts[0].pub_date, "Mon, 01 Jan 2024 00:00:00 GMT");
}

#[tokio::test]
async fn test_first_fetch_with_empty_channel_still_marks_fetched() {
    let (db, fetcher, reconciler) = setup().await;
    let f1 = register(&db, A).await;
    fetcher.set(A, Response::document(rss(&[])));

    let report = reconciler.run_pass().await.unwrap();

    assert_eq!(report.initial_imports, 1);
    assert_eq!(post_count(&db, &f1.id).await, 0);
    assert!(feed(&db, &f1.id).await.fetched);
}

#[tokio::test]
async fn test_first_fetch_records_modification_signal() {
    let (db, fetcher, reconciler) = setup().await;
    let f1 = register(&db, A).await;
    set_state(&db, &f1.id, false, Some(jan(1))).await;
    fetcher.set(
        A,
        Response::document_modified(rss(&[("One", "1")]), "Wed, 03 Jan 2024 00:00:00 GMT"),
    );

    reconciler.run_pass().await.unwrap();

    let stored = feed(&db, &f1.id).await;
    assert!(stored.fetched);
    assert_eq!(stored.last_modified, Some(jan(3)));
}

#[tokio::test]
async fn test_refresh_with_newer_signal() {
    let (db, fetcher, reconciler) = setup().await;
    let f2 = register(&db, A).await;
    set_state(&db, &f2.id, true, Some(jan(1))).await;
    fetcher.set(
        A,
        Response::document_modified(rss(&[("New", "item")]), "Tue, 02 Jan 2024 00:00:00 GMT"),
    );

    let report = reconciler.run_pass().await.unwrap();

    assert_eq!(report.refreshes, 1);
    assert_eq!(report.posts_created, 1);
    assert_eq!(post_count(&db, &f2.id).await, 1);
    assert_eq!(feed(&db, &f2.id).await.last_modified, Some(jan(2)));
}

#[tokio::test]
async fn test_refresh_with_older_signal_is_ignored() {
    let (db, fetcher, reconciler) = setup().await;
    let f3 = register(&db, A).await;
    set_state(&db, &f3.id, true, Some(jan(2))).await;
    fetcher.set(
        A,
        Response::document_modified(rss(&[("Old", "item")]), "Mon, 01 Jan 2024 00:00:00 GMT"),
    );

    let report = reconciler.run_pass().await.unwrap();

    assert_eq!(report.unchanged, 1);
    assert_eq!(post_count(&db, &f3.id).await, 0);
    assert_eq!(feed(&db, &f3.id).await.last_modified, Some(jan(2)));
}

#[tokio::test]
async fn test_refresh_with_equal_signal_is_ignored() {
    let (db, fetcher, reconciler) = setup().await;
    let f = register(&db, A).await;
    set_state(&db, &f.id, true, Some(jan(2))).await;
    fetcher.set(
        A,
        Response::document_modified(rss(&[("Same", "item")]), "Tue, 02 Jan 2024 00:00:00 GMT"),
    );

    let report = reconciler.run_pass().await.unwrap();

    assert_eq!(report.unchanged, 1);
    assert_eq!(post_count(&db, &f.id).await, 0);
}

#[tokio::test]
async fn test_refresh_accepts_all_http_date_forms() {
    let (db, fetcher, reconciler) = setup().await;
    let rfc850 = register(&db, A).await;
    let asctime = register(&db, B).await;
    set_state(&db, &rfc850.id, true, Some(jan(1))).await;
    set_state(&db, &asctime.id, true, Some(jan(1))).await;
    fetcher.set(
        A,
        Response::document_modified(rss(&[("x", "y")]), "Tuesday, 02-Jan-24 00:00:00 GMT"),
    );
    fetcher.set(
        B,
        Response::document_modified(rss(&[("x", "y")]), "Tue Jan  2 00:00:00 2024"),
    );

    let report = reconciler.run_pass().await.unwrap();

    assert_eq!(report.refreshes, 2);
    assert_eq!(feed(&db, &rfc850.id).await.last_modified, Some(jan(2)));
    assert_eq!(feed(&db, &asctime.id).await.last_modified, Some(jan(2)));
}

#[tokio::test]
async fn test_fetched_feed_without_signal_is_skipped() {
    let (db, fetcher, reconciler) = setup().await;
    let f = register(&db, A).await;
    set_state(&db, &f.id, true, Some(jan(1))).await;
    let before = feed(&db, &f.id).await;
    fetcher.set(A, Response::document(rss(&[("x", "y")])));

    let report = reconciler.run_pass().await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(post_count(&db, &f.id).await, 0);
    assert_eq!(feed(&db, &f.id).await, before);
}

#[tokio::test]
async fn test_fetched_feed_with_unparseable_signal_is_skipped() {
    let (db, fetcher, reconciler) = setup().await;
    let f = register(&db, A).await;
    set_state(&db, &f.id, true, Some(jan(1))).await;
    let before = feed(&db, &f.id).await;
    fetcher.set(
        A,
        Response::document_modified(rss(&[("x", "y")]), "2024-01-02T00:00:00Z"),
    );

    let report = reconciler.run_pass().await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(post_count(&db, &f.id).await, 0);
    assert_eq!(feed(&db, &f.id).await, before);
}

#[tokio::test]
async fn test_unchanged_refresh_does_not_parse_body() {
    let (db, fetcher, reconciler) = setup().await;
    let f = register(&db, A).await;
    set_state(&db, &f.id, true, Some(jan(2))).await;
    fetcher.set(
        A,
        Response::document_modified("not xml at all", "Mon, 01 Jan 2024 00:00:00 GMT"),
    );

    let report = reconciler.run_pass().await.unwrap();

    assert_eq!(report.unchanged, 1);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_second_pass_is_idempotent() {
    let (db, fetcher, reconciler) = setup().await;
    let plain = register(&db, A).await;
    let signalled = register(&db, B).await;
    fetcher.set(A, Response::document(rss(&[("One", "1"), ("Two", "2")])));
    fetcher.set(
        B,
        Response::document_modified(rss(&[("One", "1")]), "Tue, 02 Jan 2024 00:00:00 GMT"),
    );

    let first = reconciler.run_pass().await.unwrap();
    assert_eq!(first.posts_created, 3);
    let plain_after_first = feed(&db, &plain.id).await;
    let signalled_after_first = feed(&db, &signalled.id).await;

    let second = reconciler.run_pass().await.unwrap();

    assert_eq!(second.posts_created, 0);
    assert_eq!(second.initial_imports, 0);
    assert_eq!(second.refreshes, 0);
    assert_eq!(post_count(&db, &plain.id).await, 2);
    assert_eq!(post_count(&db, &signalled.id).await, 1);
    assert_eq!(feed(&db, &plain.id).await, plain_after_first);
    assert_eq!(feed(&db, &signalled.id).await, signalled_after_first);
}

#[tokio::test]
async fn test_fetch_failure_is_isolated() {
    let (db, fetcher, reconciler) = setup().await;
    let a = register(&db, A).await;
    let b = register(&db, B).await;
    let c = register(&db, C).await;
    fetcher.set(A, Response::document(rss(&[("a", "1")])));
    fetcher.set(B, Response::Fail("connection refused".to_string()));
    fetcher.set(C, Response::document(rss(&[("c", "1"), ("c", "2")])));

    let report = reconciler.run_pass().await.unwrap();

    assert_eq!(report.feeds_seen, 3);
    assert_eq!(report.initial_imports, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(post_count(&db, &a.id).await, 1);
    assert_eq!(post_count(&db, &c.id).await, 2);
    assert!(feed(&db, &a.id).await.fetched);
    assert!(feed(&db, &c.id).await.fetched);

    let b_after = feed(&db, &b.id).await;
    assert!(!b_after.fetched);
    assert_eq!(post_count(&db, &b.id).await, 0);

    // B recovers on a later pass
    fetcher.set(B, Response::document(rss(&[("b", "1")])));
    let report = reconciler.run_pass().await.unwrap();
    assert_eq!(report.initial_imports, 1);
    assert_eq!(post_count(&db, &b.id).await, 1);
}

#[tokio::test]
async fn test_parse_failure_is_isolated() {
    let (db, fetcher, reconciler) = setup().await;
    let a = register(&db, A).await;
    let b = register(&db, B).await;
    fetcher.set(A, Response::document("<rss><channel><item>"));
    fetcher.set(B, Response::document(rss(&[("b", "1")])));

    let report = reconciler.run_pass().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.initial_imports, 1);
    assert!(!feed(&db, &a.id).await.fetched);
    assert!(feed(&db, &b.id).await.fetched);
}

#[tokio::test]
async fn test_malformed_item_is_skipped() {
    let (db, fetcher, reconciler) = setup().await;
    let f = register(&db, A).await;
    let body = r#"<rss version="2.0"><channel><title>T</title>
        <item><title>Good</title><description>Body</description></item>
        <item><title>No description</title></item>
    </channel></rss>"#;
    fetcher.set(A, Response::document(body));

    let report = reconciler.run_pass().await.unwrap();

    assert_eq!(report.posts_created, 1);
    assert_eq!(report.items_dropped, 1);
    assert_eq!(post_count(&db, &f.id).await, 1);
    assert!(feed(&db, &f.id).await.fetched);
}

#[tokio::test]
async fn test_conditional_request_not_modified() {
    let (db, fetcher, reconciler) = setup().await;
    let reconciler = reconciler.with_conditional_requests(true);
    let fresh = register(&db, A).await;
    let known = register(&db, B).await;
    set_state(&db, &known.id, true, Some(jan(2))).await;
    let before = feed(&db, &known.id).await;
    fetcher.set(A, Response::document(rss(&[("a", "1")])));
    fetcher.set(B, Response::NotModified);

    let report = reconciler.run_pass().await.unwrap();

    assert_eq!(report.initial_imports, 1);
    assert_eq!(report.unchanged, 1);
    assert_eq!(feed(&db, &known.id).await, before);

    let calls = fetcher.calls();
    assert!(calls.contains(&FetchCall {
        url: A.to_string(),
        if_modified_since: None,
    }));
    assert!(calls.contains(&FetchCall {
        url: B.to_string(),
        if_modified_since: Some(jan(2)),
    }));
    assert_eq!(post_count(&db, &fresh.id).await, 1);
}

#[tokio::test]
async fn test_unconditional_by_default() {
    let (db, fetcher, reconciler) = setup().await;
    let known = register(&db, A).await;
    set_state(&db, &known.id, true, Some(jan(2))).await;
    fetcher.set(A, Response::document(rss(&[])));

    reconciler.run_pass().await.unwrap();

    assert!(fetcher
        .calls()
        .iter()
        .all(|call| call.if_modified_since.is_none()));
}

#[tokio::test]
async fn test_concurrent_passes_do_not_duplicate_posts() {
    let (db, fetcher, reconciler) = setup().await;
    let f = register(&db, A).await;
    fetcher.set(A, Response::document(rss(&[("One", "1"), ("Two", "2")])));

    let other = reconciler.clone();
    let (first, second) = tokio::join!(reconciler.run_pass(), other.run_pass());
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.initial_imports + second.initial_imports, 1);
    assert_eq!(first.posts_created + second.posts_created, 2);
    assert_eq!(first.failed + second.failed, 0);
    assert_eq!(post_count(&db, &f.id).await, 2);
}

#[tokio::test]
async fn test_concurrent_refreshes_do_not_duplicate_posts() {
    let (db, fetcher, reconciler) = setup().await;
    let f = register(&db, A).await;
    set_state(&db, &f.id, true, Some(jan(1))).await;
    fetcher.set(
        A,
        Response::document_modified(rss(&[("New", "1")]), "Tue, 02 Jan 2024 00:00:00 GMT"),
    );

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.run_pass().await.unwrap() })
        })
        .collect();

    let mut refreshes = 0;
    for handle in handles {
        refreshes += handle.await.unwrap().refreshes;
    }

    assert_eq!(refreshes, 1);
    assert_eq!(post_count(&db, &f.id).await, 1);
    assert_eq!(feed(&db, &f.id).await.last_modified, Some(jan(2)));
}

#[tokio::test]
async fn test_deleted_feed_posts_cascade() {
    let (db, fetcher, reconciler) = setup().await;
    let f = register(&db, A).await;
    fetcher.set(A, Response::document(rss(&[("One", "1")])));
    reconciler.run_pass().await.unwrap();
    assert_eq!(post_count(&db, &f.id).await, 1);

    assert!(FeedRepository::new(db.pool()).delete(&f.id).await.unwrap());

    assert_eq!(post_count(&db, &f.id).await, 0);
    let report = reconciler.run_pass().await.unwrap();
    assert_eq!(report.feeds_seen, 0);
}

#[tokio::test]
async fn test_empty_store() {
    let (_db, fetcher, reconciler) = setup().await;

    let report = reconciler.run_pass().await.unwrap();

    assert_eq!(report, PassReport::default());
    assert!(fetcher.calls().is_empty());
}

#[tokio::test]
async fn test_private_host_is_not_fetched() {
    const LOCAL: &str = "http://127.0.0.1/rss";
    let (db, fetcher, reconciler) = setup().await;
    let local = register(&db, LOCAL).await;
    let public = register(&db, A).await;
    fetcher.set(LOCAL, Response::document(rss(&[("Local", "1")])));
    fetcher.set(A, Response::document(rss(&[("Public", "1")])));

    let report = reconciler.run_pass().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.initial_imports, 1);
    assert!(fetcher.calls().iter().all(|call| call.url != LOCAL));
    assert!(!feed(&db, &local.id).await.fetched);
    assert!(feed(&db, &public.id).await.fetched);

    let report = reconciler
        .with_allow_private_hosts(true)
        .run_pass()
        .await
        .unwrap();
    assert_eq!(report.initial_imports, 1);
    assert_eq!(post_count(&db, &local.id).await, 1);
}

#[tokio::test]
async fn test_imported_posts_keep_document_order() {
    let (db, fetcher, reconciler) = setup().await;
    let f = register(&db, A).await;
    let items = [("Newest", "3"), ("Middle", "2"), ("Oldest", "1"), ("Extra", "0")];
    fetcher.set(A, Response::document(rss(&items)));

    reconciler.run_pass().await.unwrap();

    let titles: Vec<_> = PostRepository::new(db.pool())
        .list_by_feed(&f.id, 10, 0)
        .await
        .unwrap()
        .into_iter()
        .map(|post| post.title)
        .collect();
    assert_eq!(titles, ["Newest", "Middle", "Oldest", "Extra"]);
}
