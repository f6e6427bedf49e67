//! Whole job lifecycle through the coordinator: poll, checkout, post-build.

use std::sync::Arc;

use chrono::{Duration, Utc};
use pucm_core::fakes::{FakeJobHost, MemoryConsole};
use pucm_core::{
    BuildOutcome, Coordinator, DeliverState, JobConfig, PollOutcome, PostBuildStatus, PucmError,
};
use tempfile::TempDir;
use ucm_entities::fakes::{DeliverScript, MemoryUcmBackend, StreamFixture};
use ucm_entities::{EntityRef, PromotionLevel, UcmError};

struct Harness {
    backend: Arc<MemoryUcmBackend>,
    host: Arc<FakeJobHost>,
    coordinator: Coordinator,
    dev: EntityRef,
    bl1: EntityRef,
    workspace: TempDir,
}

fn harness() -> Harness {
    let backend = Arc::new(MemoryUcmBackend::new());
    let dev = backend.add_stream(r"DEV@\PVOB1", StreamFixture::default());
    backend.add_stream(
        r"pucm_BUILD01_nightly@\PVOB1",
        StreamFixture {
            default_target: Some(r"INT@\PVOB1".to_string()),
            ..Default::default()
        },
    );
    backend.add_stream(r"INT@\PVOB1", StreamFixture::default());
    let component = backend.add_component(r"COMP1@\PVOB1");
    let bl1 = backend.add_baseline(r"BL1@\PVOB1", &component, &dev, PromotionLevel::Initial);
    backend.add_baseline(r"BL2@\PVOB1", &component, &dev, PromotionLevel::Initial);

    let host = Arc::new(FakeJobHost::new());
    let coordinator = Coordinator::new(backend.clone(), host.clone());
    Harness {
        backend,
        host,
        coordinator,
        dev,
        bl1,
        workspace: tempfile::tempdir().unwrap(),
    }
}

fn config() -> JobConfig {
    let mut cfg = JobConfig::default();
    cfg.host = Some("BUILD01".to_string());
    cfg.poll.stream = r"DEV@\PVOB1".to_string();
    cfg.poll.component = r"COMP1@\PVOB1".to_string();
    cfg
}

#[tokio::test]
async fn polled_build_is_promoted_and_released() {
    let h = harness();
    let cfg = config();
    let console = MemoryConsole::new();

    let polled = h.coordinator.poll("nightly", 1, &cfg, &console).await.unwrap();
    assert_eq!(polled, PollOutcome::BuildNow(h.bl1.clone()));

    h.host.start("nightly", 1);
    let built = h
        .coordinator
        .checkout("nightly", 1, &cfg, None, &console)
        .await
        .unwrap();
    assert_eq!(built, h.bl1);
    assert!(console.contains("Retrieved 2 baseline(s):"));
    assert!(console.contains(r"Building baseline: baseline:BL1@\PVOB1"));

    h.host.finish("nightly", 1, BuildOutcome::Success);
    let report = h
        .coordinator
        .post_build("nightly", 1, &cfg, h.workspace.path(), &console)
        .await
        .unwrap();

    assert_eq!(report.status, PostBuildStatus::Performed);
    assert!(!report.unstable);
    assert!(report.deliver.is_none());
    let promotion = report.promotion.unwrap();
    assert_eq!(promotion.level, PromotionLevel::Built);
    assert_eq!(h.backend.level_of(&h.bl1), Some(PromotionLevel::Built));
    assert_eq!(report.description.as_deref(), Some("BL1 (INITIAL -> BUILT)"));
    assert!(h.coordinator.registry().is_empty().await);
    assert_eq!(h.coordinator.metrics().promotions(), 1);
}

#[tokio::test]
async fn checkout_without_poll_selects_and_skips_live_claims() {
    let h = harness();
    let cfg = config();
    let console = MemoryConsole::new();

    h.host.start("nightly", 1);
    h.host.start("nightly", 2);
    let first = h
        .coordinator
        .checkout("nightly", 1, &cfg, None, &console)
        .await
        .unwrap();
    let second = h
        .coordinator
        .checkout("nightly", 2, &cfg, None, &console)
        .await
        .unwrap();

    assert_eq!(first.short_name(), "BL1");
    assert_eq!(second.short_name(), "BL2");
}

#[tokio::test]
async fn post_build_without_record_is_not_performed() {
    let h = harness();
    let console = MemoryConsole::new();

    let report = h
        .coordinator
        .post_build("nightly", 42, &config(), h.workspace.path(), &console)
        .await
        .unwrap();

    assert_eq!(report.status, PostBuildStatus::NotPerformed);
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn unknown_explicit_baseline_disables_post_build() {
    let h = harness();
    let cfg = config();
    let console = MemoryConsole::new();
    h.host.start("nightly", 3);

    let err = h
        .coordinator
        .checkout("nightly", 3, &cfg, Some(r"NOPE@\PVOB1"), &console)
        .await
        .unwrap_err();
    assert!(matches!(err, PucmError::BackendOperationFailed { .. }));
    assert!(console.contains(r"Could not find baseline NOPE@\PVOB1"));

    h.host.finish("nightly", 3, BuildOutcome::Failure);
    let report = h
        .coordinator
        .post_build("nightly", 3, &cfg, h.workspace.path(), &console)
        .await
        .unwrap();

    assert_eq!(report.status, PostBuildStatus::NotPerformed);
    assert!(!h.backend.called("set_promotion_level"));
    assert!(h.coordinator.registry().is_empty().await);
}

#[tokio::test]
async fn explicit_baseline_is_built_and_rejected_on_failure() {
    let h = harness();
    let cfg = config();
    let console = MemoryConsole::new();
    h.host.start("nightly", 4);

    let built = h
        .coordinator
        .checkout("nightly", 4, &cfg, Some(r"BL2@\PVOB1"), &console)
        .await
        .unwrap();
    assert_eq!(built.short_name(), "BL2");

    h.host.finish("nightly", 4, BuildOutcome::Failure);
    let report = h
        .coordinator
        .post_build("nightly", 4, &cfg, h.workspace.path(), &console)
        .await
        .unwrap();

    assert_eq!(report.promotion.unwrap().level, PromotionLevel::Rejected);
    assert_eq!(h.backend.level_of(&built), Some(PromotionLevel::Rejected));
}

#[tokio::test]
async fn failed_deliver_marks_unstable_and_skips_promotion() {
    let h = harness();
    let mut cfg = config();
    cfg.deliver.enabled = true;
    cfg.post_build.recommended = true;
    cfg.post_build.make_tag = true;
    h.backend.script_deliver(DeliverScript::Conflict {
        message: "non-trivial merge".to_string(),
        output: None,
        left_in_progress: true,
    });
    let console = MemoryConsole::new();

    h.host.start("nightly", 5);
    h.coordinator
        .checkout("nightly", 5, &cfg, None, &console)
        .await
        .unwrap();
    h.host.finish("nightly", 5, BuildOutcome::Success);
    let report = h
        .coordinator
        .post_build("nightly", 5, &cfg, h.workspace.path(), &console)
        .await
        .unwrap();

    assert!(report.unstable);
    let (state, message) = report.deliver_failure.unwrap();
    assert_eq!(state, DeliverState::Cancelled);
    assert!(message.contains("was cancelled"), "{message}");
    assert!(report.promotion.is_none());
    assert_eq!(h.backend.level_of(&h.bl1), Some(PromotionLevel::Initial));
    assert!(!h.backend.called("set_promotion_level"));
    assert!(!h.backend.called("recommend"));
    assert!(!h.backend.called("create_tag"));
    assert_eq!(report.description.as_deref(), Some("BL1, deliver failed"));
    assert!(h.coordinator.registry().is_empty().await);
    assert_eq!(h.coordinator.metrics().delivers(), 1);
    assert_eq!(h.coordinator.metrics().delivers_cancelled(), 1);
    assert_eq!(h.coordinator.metrics().promotions(), 0);
}

#[tokio::test]
async fn empty_deliver_leaves_level_and_recommendation_alone() {
    let h = harness();
    h.backend.add_stream(
        r"pucm_BUILD02_nightly@\PVOB1",
        StreamFixture {
            read_only: true,
            default_target: Some(r"INT@\PVOB1".to_string()),
            ..Default::default()
        },
    );
    h.backend.script_deliver(DeliverScript::EmptyChangeSet);
    let mut cfg = config();
    cfg.host = Some("BUILD02".to_string());
    cfg.deliver.enabled = true;
    cfg.post_build.recommended = true;
    let console = MemoryConsole::new();

    h.host.start("nightly", 10);
    h.coordinator
        .checkout("nightly", 10, &cfg, None, &console)
        .await
        .unwrap();
    h.host.finish("nightly", 10, BuildOutcome::Success);
    let report = h
        .coordinator
        .post_build("nightly", 10, &cfg, h.workspace.path(), &console)
        .await
        .unwrap();

    assert!(report.unstable);
    assert_eq!(report.deliver_failure.unwrap().0, DeliverState::Failed);
    assert_eq!(h.backend.level_of(&h.bl1), Some(PromotionLevel::Initial));
    assert!(h.backend.recommended(&h.dev).is_none());
    assert!(console.contains("promotion level left unchanged"));
}

#[tokio::test]
async fn promotion_write_failure_prints_raw_output() {
    let h = harness();
    let cfg = config();
    let console = MemoryConsole::new();
    h.backend.fail_next(
        "set_promotion_level",
        UcmError::command(
            "set_promotion_level",
            "permission denied",
            Some("cleartool: Error: No permission to change plevel".to_string()),
        ),
    );

    h.host.start("nightly", 11);
    h.coordinator
        .checkout("nightly", 11, &cfg, None, &console)
        .await
        .unwrap();
    h.host.finish("nightly", 11, BuildOutcome::Success);
    let err = h
        .coordinator
        .post_build("nightly", 11, &cfg, h.workspace.path(), &console)
        .await
        .unwrap_err();

    assert_eq!(
        err.output(),
        Some("cleartool: Error: No permission to change plevel")
    );
    assert!(console.contains("cleartool: Error: No permission to change plevel"));
    assert!(h.coordinator.registry().is_empty().await);
}

#[tokio::test]
async fn successful_deliver_creates_baseline() {
    let h = harness();
    let mut cfg = config();
    cfg.deliver.enabled = true;
    cfg.deliver.baseline_name = "nightly_rc".to_string();
    let console = MemoryConsole::new();

    h.host.start("nightly", 6);
    h.coordinator
        .checkout("nightly", 6, &cfg, None, &console)
        .await
        .unwrap();
    h.host.finish("nightly", 6, BuildOutcome::Success);
    let report = h
        .coordinator
        .post_build("nightly", 6, &cfg, h.workspace.path(), &console)
        .await
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "performed");
    assert_eq!(json["deliver"]["state"], "baseline_created");

    let deliver = report.deliver.unwrap();
    assert_eq!(deliver.state, DeliverState::BaselineCreated);
    assert_eq!(deliver.new_baseline.unwrap().short_name(), "nightly_rc");
    assert!(!report.unstable);
    assert_eq!(
        report.description.as_deref(),
        Some("BL1 (INITIAL -> BUILT), created nightly_rc")
    );
}

#[tokio::test]
async fn listing_failure_on_checkout_prints_raw_output() {
    let h = harness();
    let cfg = config();
    let console = MemoryConsole::new();
    h.backend.fail_next(
        "baselines",
        UcmError::command(
            "baselines",
            "lsbl failed",
            Some("cleartool: Error: Unable to access PVOB1".to_string()),
        ),
    );

    h.host.start("nightly", 12);
    let err = h
        .coordinator
        .checkout("nightly", 12, &cfg, None, &console)
        .await
        .unwrap_err();

    assert!(matches!(err, PucmError::BackendOperationFailed { .. }));
    assert!(console.contains("cleartool: Error: Unable to access PVOB1"));
}

#[tokio::test]
async fn missing_build_outcome_is_unhandled_and_releases_record() {
    let h = harness();
    let cfg = config();
    let console = MemoryConsole::new();

    h.host.start("nightly", 7);
    h.coordinator
        .checkout("nightly", 7, &cfg, None, &console)
        .await
        .unwrap();
    h.host.stop("nightly", 7);
    let err = h
        .coordinator
        .post_build("nightly", 7, &cfg, h.workspace.path(), &console)
        .await
        .unwrap_err();

    assert!(matches!(err, PucmError::UnhandledBuildOutcome { outcome } if outcome == "UNKNOWN"));
    assert!(h.coordinator.registry().is_empty().await);
    assert_eq!(h.backend.level_of(&h.bl1), Some(PromotionLevel::Initial));
}

#[tokio::test]
async fn multi_site_post_build_remembers_the_new_level() {
    let h = harness();
    let mut cfg = config();
    cfg.poll.multi_site_frequency_minutes = 5;
    let console = MemoryConsole::new();
    let t0 = Utc::now();

    h.host.start("nightly", 8);
    h.coordinator
        .checkout_at("nightly", 8, &cfg, None, &console, t0)
        .await
        .unwrap();
    h.host.finish("nightly", 8, BuildOutcome::Success);
    h.coordinator
        .post_build_at("nightly", 8, &cfg, h.workspace.path(), &console, t0)
        .await
        .unwrap();

    let stored = h.coordinator.stored().lookup(h.bl1.fqname()).unwrap();
    assert_eq!(stored.level, PromotionLevel::Built);

    // The replica still reads INITIAL, so the next invocation skips BL1.
    h.backend.set_level(&h.bl1, PromotionLevel::Initial);
    h.host.start("nightly", 9);
    let next = h
        .coordinator
        .checkout_at("nightly", 9, &cfg, None, &console, t0 + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(next.short_name(), "BL2");
}
