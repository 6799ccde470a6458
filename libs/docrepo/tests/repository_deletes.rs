mod common;

use common::{audited, dated_note, jan, note, unaudited};
use docrepo::{OpOptions, RepositoryError};
use docrepo_core::{Expr, IdPartitionPair, Projection, Query};
use std::time::Duration;
use tracing_test::traced_test;

async fn seed_dated(fx: &common::Fixture) {
    let mut docs = vec![
        dated_note("A", "1", 3),
        dated_note("A", "2", 1),
        dated_note("B", "3", 2),
        dated_note("C", "4", 5),
        dated_note("C", "5", 4),
    ];
    fx.repo.add_items(&mut docs, &OpOptions::default()).await.unwrap();
    fx.settle().await;
    fx.store().clear_calls();
}

#[tokio::test]
async fn two_documents_in_one_partition_go_out_in_one_batch() {
    let fx = unaudited();
    let opts = OpOptions::default();
    let mut docs = vec![note("A", "A", "first"), note("A", "B", "second")];
    fx.repo.add_items(&mut docs, &opts).await.unwrap();

    let in_a = fx.repo.get_all_by_partition_key("A", &opts).await.unwrap();
    assert_eq!(in_a.len(), 2);

    fx.store().clear_calls();
    let ids = vec![IdPartitionPair::new("A", "A"), IdPartitionPair::new("B", "A")];
    fx.repo.delete_ids_batched(&ids, 100, &opts).await.unwrap();

    assert_eq!(fx.store().calls(), vec!["batch:A:2"]);
    assert_eq!(fx.store().len(), 0);
}

#[tokio::test]
async fn batches_split_by_partition_and_size() {
    let fx = unaudited();
    let opts = OpOptions::default();
    let mut docs: Vec<_> = (0..5).map(|i| note("P", &format!("p{i}"), "x")).collect();
    docs.push(note("Q", "q0", "x"));
    fx.repo.add_items(&mut docs, &opts).await.unwrap();
    fx.store().clear_calls();

    let ids = fx.repo.get_all_ids(&opts).await.unwrap();
    fx.store().clear_calls();
    fx.repo.delete_ids_batched(&ids, 2, &opts).await.unwrap();

    assert_eq!(
        fx.store().calls(),
        vec!["batch:P:2", "batch:P:2", "batch:P:1", "batch:Q:1"]
    );
    assert_eq!(fx.store().len(), 0);
}

#[tokio::test]
async fn batch_size_is_validated() {
    let fx = unaudited();
    let ids = vec![IdPartitionPair::new("x", "y")];
    for size in [0, 101] {
        let err = fx
            .repo
            .delete_ids_batched(&ids, size, &OpOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
    }
    assert!(fx.store().calls().is_empty());
}

#[tokio::test]
async fn rejected_batch_is_skipped_and_not_audited() {
    let fx = audited();
    let opts = OpOptions::default();
    let mut docs = vec![note("A", "1", "x"), note("B", "2", "x")];
    fx.repo.add_items(&mut docs, &opts).await.unwrap();
    fx.settle().await;

    let ids = vec![
        IdPartitionPair::new("1", "A"),
        IdPartitionPair::new("missing", "A"),
        IdPartitionPair::new("2", "B"),
    ];
    fx.repo.delete_ids_batched(&ids, 100, &opts).await.unwrap();
    fx.settle().await;

    // Partition A rolled back as a whole; B committed.
    let left: Vec<_> = fx
        .store()
        .snapshot()
        .iter()
        .map(|d| d["id"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(left, vec!["1"]);

    let deletes: Vec<_> = fx
        .audits()
        .into_iter()
        .filter(|a| a["eventType"] == "Delete")
        .map(|a| a["entityId"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(deletes, vec!["B:2"]);
}

#[tokio::test]
async fn deleting_a_missing_document_succeeds_and_is_audited() {
    let fx = audited();
    fx.repo
        .delete_item("team:ghost", &OpOptions::default())
        .await
        .unwrap();
    fx.repo
        .delete_item_by_key("team", "ghost", &OpOptions::queued())
        .await
        .unwrap();
    fx.settle().await;

    assert_eq!(fx.store().calls_of("delete").len(), 2);
    assert_eq!(fx.audits().len(), 2);
}

#[tokio::test]
async fn delete_all_removes_everything_in_one_lookup() {
    let fx = audited();
    seed_dated(&fx).await;
    let before = fx.resolver.resolutions();

    fx.repo.delete_all(&OpOptions::default()).await.unwrap();
    fx.settle().await;

    assert_eq!(fx.store().len(), 0);
    assert_eq!(fx.store().calls_of("delete").len(), 5);
    // One lookup for the id scan, one for the deletes.
    assert_eq!(fx.resolver.resolutions() - before, 2);
    let deletes = fx
        .audits()
        .into_iter()
        .filter(|a| a["eventType"] == "Delete")
        .count();
    assert_eq!(deletes, 5);
}

#[tokio::test]
async fn delete_items_by_query() {
    let fx = unaudited();
    seed_dated(&fx).await;

    fx.repo
        .delete_items(
            Query::new().filter(Expr::eq("partitionKey", "C")),
            &OpOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(fx.store().len(), 3);
    assert!(!fx.repo.exists("C:4", &OpOptions::default()).await.unwrap());
}

#[tokio::test]
async fn delete_items_in_parallel() {
    let fx = unaudited();
    seed_dated(&fx).await;

    let summary = fx
        .repo
        .delete_items_parallel(
            Query::new().filter(Expr::ne("partitionKey", "B")),
            3,
            &OpOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(summary.total, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(fx.store().len(), 1);
}

#[tokio::test]
async fn delete_ids_keeps_input_order() {
    let fx = unaudited();
    seed_dated(&fx).await;

    let ids = vec![
        IdPartitionPair::new("5", "C"),
        IdPartitionPair::new("1", "A"),
        IdPartitionPair::new("3", "B"),
    ];
    fx.repo.delete_ids(&ids, &OpOptions::default()).await.unwrap();
    assert_eq!(
        fx.store().calls(),
        vec!["delete:C:5", "delete:A:1", "delete:B:3"]
    );
}

#[tokio::test]
async fn delete_ids_in_parallel_counts_every_id() {
    let fx = unaudited();
    seed_dated(&fx).await;

    let ids = fx.repo.get_all_ids(&OpOptions::default()).await.unwrap();
    let summary = fx
        .repo
        .delete_ids_parallel(&ids, 2, &OpOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.total, 5);
    assert_eq!(summary.succeeded(), 5);
    assert_eq!(fx.store().len(), 0);
}

#[tokio::test]
async fn created_at_window_is_deleted_in_batches() {
    let fx = unaudited();
    seed_dated(&fx).await;

    fx.repo
        .delete_created_at_between(jan(2), jan(4), &OpOptions::default())
        .await
        .unwrap();

    let mut left: Vec<_> = fx
        .store()
        .snapshot()
        .iter()
        .map(|d| d["id"].as_str().unwrap_or_default().to_string())
        .collect();
    left.sort();
    assert_eq!(left, vec!["2", "4"]);
    assert!(fx.store().calls_of("delete").is_empty());
    assert_eq!(fx.store().calls_of("batch").len(), 3);
}

#[tokio::test]
async fn paged_delete_all_empties_the_container() {
    let fx = audited();
    seed_dated(&fx).await;

    fx.repo
        .delete_all_paged(2, &OpOptions::default())
        .await
        .unwrap();
    fx.settle().await;

    assert_eq!(fx.store().len(), 0);
    assert_eq!(
        fx.store().calls_of("delete"),
        vec!["delete:A:2", "delete:B:3", "delete:A:1", "delete:C:5", "delete:C:4"]
    );
}

#[tokio::test]
async fn queued_paged_delete_eventually_empties_the_container() {
    let fx = unaudited();
    seed_dated(&fx).await;

    fx.repo
        .delete_all_paged(2, &OpOptions::queued())
        .await
        .unwrap();
    fx.settle().await;

    assert_eq!(fx.store().len(), 0);
    assert_eq!(fx.store().calls_of("delete").len(), 5);
}

#[tokio::test]
async fn paged_delete_by_query_narrows_to_ids() {
    let fx = unaudited();
    seed_dated(&fx).await;

    fx.repo
        .delete_items_paged(
            Query::new().filter(Expr::eq("partitionKey", "A")),
            1,
            &OpOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(fx.store().len(), 3);
    assert_eq!(fx.store().calls_of("delete").len(), 2);
}

#[tokio::test]
async fn paged_delete_of_distinct_query_leaves_nothing_behind() {
    let fx = unaudited();
    let opts = OpOptions::default();
    let mut docs: Vec<_> = (1..=4).map(|i| note("P", &i.to_string(), "x")).collect();
    fx.repo.add_items(&mut docs, &opts).await.unwrap();

    fx.repo
        .delete_items_paged(
            Query::new().select(Projection::IdPartition).distinct(),
            1,
            &opts,
        )
        .await
        .unwrap();

    assert_eq!(fx.store().len(), 0);
    assert_eq!(fx.store().calls_of("delete").len(), 4);
}

#[tokio::test]
#[traced_test]
async fn delete_all_logs_the_configured_delay() {
    let fx = unaudited();
    seed_dated(&fx).await;

    fx.repo
        .delete_all(&OpOptions::default().with_delay(Duration::from_millis(1)))
        .await
        .unwrap();

    assert_eq!(fx.store().len(), 0);
    assert!(logs_contain("deleting all documents"));
    assert!(logs_contain("delay=Some(1ms)"));
}
