mod common;

use aspect_models::{AspectProposal, LatestAspects};
use aspect_pipeline::PipelineError;
use common::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn concurrent_batches_on_distinct_urns() {
    let (pipeline, store) = pipeline(registry(), LatestAspects::new());
    let mut handles = Vec::new();
    for i in 0..8 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            let target = urn(&format!("urn:li:dataset:table-{i}"));
            let proposals = vec![
                AspectProposal::upsert(
                    &target,
                    "status",
                    &json!({ "removed": false }),
                ),
                AspectProposal::upsert(
                    &target,
                    "globalTags",
                    &json!({ "tags": [format!("t{i}")] }),
                ),
            ];
            pipeline.ingest(proposals, audit()).await
        }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.committed.len(), 2);
        assert_eq!(outcome.delta.len(), 1);
    }
    assert_eq!(store.len().await, 16);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn concurrent_writes_to_one_aspect_get_distinct_versions() {
    let (pipeline, store) = pipeline(registry(), seeded_state());
    let mut handles = Vec::new();
    for i in 0..10 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            let proposal = AspectProposal::upsert(
                &urn(PROD_ORDERS),
                "status",
                &json!({ "removed": i % 2 == 0 }),
            );
            pipeline.ingest(vec![proposal], audit()).await
        }));
    }
    let mut versions = Vec::new();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        versions.push(outcome.receipt.versions[0].version.unwrap());
    }
    versions.sort_unstable();
    assert_eq!(versions, (4..14).collect::<Vec<u64>>());
    let status = store.get(&urn(PROD_ORDERS), "status").await.unwrap();
    assert_eq!(status.version, 13);
}

#[test_log::test(tokio::test)]
async fn cancelled_batch_is_not_committed() {
    let (pipeline, store) = pipeline(registry(), seeded_state());
    let token = CancellationToken::new();
    token.cancel();
    let proposals = vec![AspectProposal::upsert(
        &urn(PROD_ORDERS),
        "status",
        &json!({ "removed": true }),
    )];

    let err = pipeline
        .ingest_with_cancel(proposals, audit(), token)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled));
    assert_eq!(store.snapshot().await, seeded_state());
}
