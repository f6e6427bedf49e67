//! Concurrent access to the build-state registry and to claims.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use pucm_core::fakes::{FakeJobHost, MemoryConsole};
use pucm_core::{BuildStates, Coordinator, JobConfig, PollOutcome};
use ucm_entities::fakes::{MemoryUcmBackend, StreamFixture};
use ucm_entities::PromotionLevel;

#[tokio::test]
async fn concurrent_get_or_create_yields_one_record() {
    let registry = Arc::new(BuildStates::new());

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get_or_create("nightly", 12).await.record_id() })
        })
        .collect();

    let ids: HashSet<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(ids.len(), 1);
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn concurrent_removal_succeeds_once() {
    let registry = Arc::new(BuildStates::new());
    let state = registry.get_or_create("nightly", 3).await;

    let results = join_all((0..8).map(|_| {
        let registry = Arc::clone(&registry);
        let state = Arc::clone(&state);
        async move { registry.remove(&state).await }
    }))
    .await;

    assert_eq!(results.iter().filter(|removed| **removed).count(), 1);
}

#[tokio::test]
async fn reclaim_races_with_inserts_without_losing_live_records() {
    let registry = Arc::new(BuildStates::new());
    let host = Arc::new(FakeJobHost::new());
    for n in 0..20 {
        registry.get_or_create("nightly", n).await;
    }
    for n in 100..120 {
        host.start("nightly", n);
    }

    let reclaimer = {
        let registry = Arc::clone(&registry);
        let host = Arc::clone(&host);
        tokio::spawn(async move { registry.reclaim(host.as_ref()).await })
    };
    let inserts = join_all((100..120).map(|n| {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            registry.get_or_create("nightly", n).await;
        })
    }))
    .await;
    for r in inserts {
        r.unwrap();
    }
    let removed = reclaimer.await.unwrap();

    assert_eq!(removed, 20);
    for n in 100..120 {
        assert!(registry.get("nightly", n).await.is_some(), "record {n} lost");
    }
}

#[tokio::test]
async fn concurrent_polls_never_claim_the_same_baseline() {
    let backend = MemoryUcmBackend::new();
    let stream = backend.add_stream(r"DEV@\PVOB1", StreamFixture::default());
    let component = backend.add_component(r"COMP1@\PVOB1");
    for i in 1..=4 {
        backend.add_baseline(
            format!(r"BL{}@\PVOB1", i).as_str(),
            &component,
            &stream,
            PromotionLevel::Initial,
        );
    }
    let host = Arc::new(FakeJobHost::new());
    let coordinator = Arc::new(Coordinator::new(Arc::new(backend), host.clone()));
    let mut config = JobConfig::default();
    config.poll.stream = r"DEV@\PVOB1".to_string();
    config.poll.component = r"COMP1@\PVOB1".to_string();
    let config = Arc::new(config);

    // Each polled invocation starts right away, so its claim is live.
    for n in 1..=4 {
        host.start("nightly", n);
    }

    let handles: Vec<_> = (1..=4)
        .map(|n| {
            let coordinator = Arc::clone(&coordinator);
            let config = Arc::clone(&config);
            tokio::spawn(async move {
                let console = MemoryConsole::new();
                coordinator.poll("nightly", n, &config, &console).await
            })
        })
        .collect();

    let mut picked = HashSet::new();
    for outcome in join_all(handles).await {
        match outcome.unwrap().unwrap() {
            PollOutcome::BuildNow(bl) => assert!(picked.insert(bl), "baseline claimed twice"),
            PollOutcome::NoChanges => panic!("four baselines for four invocations"),
        }
    }

    assert_eq!(picked.len(), 4);
    assert_eq!(coordinator.metrics().claims(), 4);
}
