mod common;

use aspect_models::{AspectClass, AspectProposal};
use aspect_pipeline::throttle::{BacklogSensor, spawn_sensor};
use aspect_pipeline::{
    AdmissionThrottle, PipelineError, ThrottleConfig, ThrottlePolicy,
};
use async_trait::async_trait;
use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn fast_throttle(max_attempts: u32) -> ThrottleConfig {
    ThrottleConfig {
        enabled: true,
        threshold: 100,
        max_attempts,
        initial_interval: Duration::from_millis(10),
        multiplier: 2,
        max_interval: Duration::from_millis(40),
    }
}

fn versioned_throttle(max_attempts: u32) -> Arc<AdmissionThrottle> {
    Arc::new(AdmissionThrottle::new(ThrottlePolicy {
        update_interval: Duration::from_millis(10),
        versioned: fast_throttle(max_attempts),
        timeseries: ThrottleConfig::default(),
    }))
}

fn status_update() -> Vec<AspectProposal> {
    vec![AspectProposal::upsert(
        &urn(PROD_ORDERS),
        "status",
        &json!({ "removed": true }),
    )]
}

#[test_log::test(tokio::test)]
async fn backlog_over_threshold_refuses_batch() {
    let throttle = versioned_throttle(3);
    let (pipeline, store) = pipeline(registry(), seeded_state());
    let pipeline = pipeline.with_throttle(throttle.clone());
    throttle.record_backlog(AspectClass::Versioned, 500);

    let err = pipeline.ingest(status_update(), audit()).await.unwrap_err();

    assert!(err.is_throttled());
    assert_eq!(err.retry_after(), Some(Duration::from_millis(10)));
    match err {
        PipelineError::Throttled(e) => {
            assert_eq!(e.class, AspectClass::Versioned);
            assert_eq!((e.backlog, e.threshold), (500, 100));
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(store.snapshot().await, seeded_state());

    // Timeseries aspects are tracked separately and stay admitted.
    let profile = AspectProposal::upsert(
        &urn(PROD_ORDERS),
        "datasetProfile",
        &json!({ "rowCount": 42 }),
    );
    let outcome = pipeline.ingest(vec![profile], audit()).await.unwrap();
    assert_eq!(outcome.committed.len(), 1);
}

#[test_log::test(tokio::test)]
async fn retry_succeeds_once_backlog_drains() {
    let throttle = versioned_throttle(50);
    let (pipeline, store) = pipeline(registry(), seeded_state());
    let pipeline = pipeline.with_throttle(throttle.clone());
    throttle.record_backlog(AspectClass::Versioned, 500);

    let drain = {
        let throttle = throttle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            throttle.record_backlog(AspectClass::Versioned, 0);
        })
    };
    let outcome = pipeline
        .ingest_with_retry(status_update(), audit(), CancellationToken::new())
        .await
        .unwrap();
    drain.await.unwrap();

    assert_eq!(outcome.committed.len(), 1);
    let status = store.get(&urn(PROD_ORDERS), "status").await.unwrap();
    assert_eq!(status.version, 4);
}

#[test_log::test(tokio::test)]
async fn retry_gives_up_after_max_attempts() {
    let throttle = versioned_throttle(2);
    let (pipeline, _store) = pipeline(registry(), seeded_state());
    let pipeline = pipeline.with_throttle(throttle.clone());
    throttle.record_backlog(AspectClass::Versioned, 500);

    let err = pipeline
        .ingest_with_retry(status_update(), audit(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_throttled());
}

#[test_log::test(tokio::test)]
async fn retry_stops_on_cancel() {
    let throttle = versioned_throttle(1000);
    let (pipeline, _store) = pipeline(registry(), seeded_state());
    let pipeline = pipeline.with_throttle(throttle.clone());
    throttle.record_backlog(AspectClass::Versioned, 500);
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        })
    };
    let err = pipeline
        .ingest_with_retry(status_update(), audit(), token)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, PipelineError::Cancelled));
}

struct FixedSensor(u64);

#[async_trait]
impl BacklogSensor for FixedSensor {
    async fn backlog(&self, _class: AspectClass) -> anyhow::Result<u64> {
        Ok(self.0)
    }
}

#[test_log::test(tokio::test)]
async fn sensor_feeds_enabled_classes() {
    let throttle = versioned_throttle(3);
    let token = CancellationToken::new();
    let handle = spawn_sensor(
        throttle.clone(),
        Arc::new(FixedSensor(250)),
        token.clone(),
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();
    handle.await.unwrap();

    assert_eq!(throttle.backlog(AspectClass::Versioned), 250);
    assert_eq!(throttle.backlog(AspectClass::Timeseries), 0);
    assert!(throttle.check([AspectClass::Versioned]).is_err());
    assert!(throttle.check([AspectClass::Timeseries]).is_ok());
}
