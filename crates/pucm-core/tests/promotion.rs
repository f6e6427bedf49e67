//! Promotion protocol: level moves, side effects and refused outcomes.

use pucm_core::fakes::MemoryConsole;
use pucm_core::promotion::{self, JobRef, TAG_TYPE};
use pucm_core::{BuildOutcome, DemotionPolicy, PostBuildConfig, PucmError};
use ucm_entities::fakes::{MemoryUcmBackend, StreamFixture};
use ucm_entities::{EntityRef, PromotionLevel, UcmError};

const JOB: JobRef<'static> = JobRef {
    job: "nightly",
    number: 9,
};

fn repo(level: PromotionLevel) -> (MemoryUcmBackend, EntityRef, EntityRef) {
    let backend = MemoryUcmBackend::new();
    let stream = backend.add_stream(r"DEV@\PVOB1", StreamFixture::default());
    let component = backend.add_component(r"COMP1@\PVOB1");
    let baseline = backend.add_baseline(r"BL1@\PVOB1", &component, &stream, level);
    (backend, stream, baseline)
}

#[tokio::test]
async fn success_promotes_one_level() {
    let (backend, stream, baseline) = repo(PromotionLevel::Built);
    let console = MemoryConsole::new();

    let report = promotion::apply(
        &backend,
        &console,
        &baseline,
        &stream,
        BuildOutcome::Success,
        &PostBuildConfig::default(),
        JOB,
    )
    .await
    .unwrap();

    assert_eq!(report.previous, PromotionLevel::Built);
    assert_eq!(report.level, PromotionLevel::Tested);
    assert_eq!(backend.level_of(&baseline), Some(PromotionLevel::Tested));
    assert!(report.is_clean());
    assert!(!report.recommended);
    assert!(backend.recommended(&stream).is_none());
    assert!(console.contains("promoted to TESTED"));
}

#[tokio::test]
async fn failure_rejects_by_default() {
    let (backend, stream, baseline) = repo(PromotionLevel::Tested);
    let console = MemoryConsole::new();

    let report = promotion::apply(
        &backend,
        &console,
        &baseline,
        &stream,
        BuildOutcome::Failure,
        &PostBuildConfig::default(),
        JOB,
    )
    .await
    .unwrap();

    assert_eq!(report.level, PromotionLevel::Rejected);
    assert_eq!(backend.level_of(&baseline), Some(PromotionLevel::Rejected));
}

#[tokio::test]
async fn failure_steps_down_when_configured() {
    let (backend, stream, baseline) = repo(PromotionLevel::Tested);
    let console = MemoryConsole::new();
    let config = PostBuildConfig {
        demote: DemotionPolicy::StepDown,
        ..Default::default()
    };

    let report = promotion::apply(
        &backend,
        &console,
        &baseline,
        &stream,
        BuildOutcome::Failure,
        &config,
        JOB,
    )
    .await
    .unwrap();

    assert_eq!(report.level, PromotionLevel::Built);
    assert_eq!(backend.level_of(&baseline), Some(PromotionLevel::Built));
}

#[tokio::test]
async fn unhandled_outcomes_touch_nothing() {
    for outcome in [
        BuildOutcome::Unstable,
        BuildOutcome::NotBuilt,
        BuildOutcome::Aborted,
    ] {
        let (backend, stream, baseline) = repo(PromotionLevel::Built);
        let console = MemoryConsole::new();

        let err = promotion::apply(
            &backend,
            &console,
            &baseline,
            &stream,
            outcome,
            &PostBuildConfig::default(),
            JOB,
        )
        .await
        .unwrap_err();

        assert!(
            matches!(
                &err,
                PucmError::UnhandledBuildOutcome { outcome: o } if o == outcome.as_str()
            ),
            "{err}"
        );
        assert!(backend.calls().is_empty(), "{outcome} reached the backend");
        assert_eq!(backend.level_of(&baseline), Some(PromotionLevel::Built));
    }
}

#[tokio::test]
async fn promote_disabled_keeps_level_but_runs_side_effects() {
    let (backend, stream, baseline) = repo(PromotionLevel::Built);
    let console = MemoryConsole::new();
    let config = PostBuildConfig {
        promote: false,
        recommended: true,
        ..Default::default()
    };

    let report = promotion::apply(
        &backend,
        &console,
        &baseline,
        &stream,
        BuildOutcome::Success,
        &config,
        JOB,
    )
    .await
    .unwrap();

    assert_eq!(report.level, PromotionLevel::Built);
    assert!(!backend.called("set_promotion_level"));
    assert!(report.recommended);
    assert_eq!(backend.recommended(&stream).as_deref(), Some(baseline.fqname()));
}

#[tokio::test]
async fn success_recommends_and_tags() {
    let (backend, stream, baseline) = repo(PromotionLevel::Initial);
    let console = MemoryConsole::new();
    let config = PostBuildConfig {
        recommended: true,
        make_tag: true,
        ..Default::default()
    };

    let report = promotion::apply(
        &backend,
        &console,
        &baseline,
        &stream,
        BuildOutcome::Success,
        &config,
        JOB,
    )
    .await
    .unwrap();

    assert!(report.recommended);
    assert_eq!(backend.recommended(&stream).as_deref(), Some(baseline.fqname()));
    let tags = backend.tags_on(&baseline);
    assert_eq!(tags.len(), 1);
    assert_eq!(report.tag.as_ref(), Some(&tags[0].entity));
    assert_eq!(tags[0].tag_type, TAG_TYPE);
    assert_eq!(tags[0].tag_id, "nightly");
    assert_eq!(tags[0].entry("buildstatus"), Some("SUCCESS"));
    assert_eq!(tags[0].entry("job"), Some("nightly::9"));
}

#[tokio::test]
async fn failed_build_is_tagged_but_not_recommended() {
    let (backend, stream, baseline) = repo(PromotionLevel::Built);
    let console = MemoryConsole::new();
    let config = PostBuildConfig {
        recommended: true,
        make_tag: true,
        ..Default::default()
    };

    let report = promotion::apply(
        &backend,
        &console,
        &baseline,
        &stream,
        BuildOutcome::Failure,
        &config,
        JOB,
    )
    .await
    .unwrap();

    assert!(!report.recommended);
    assert!(!backend.called("recommend"));
    assert_eq!(
        backend.tags_on(&baseline)[0].entry("buildstatus"),
        Some("FAILURE")
    );
}

#[tokio::test]
async fn failed_side_effects_do_not_revert_the_level() {
    let (backend, stream, baseline) = repo(PromotionLevel::Built);
    backend.fail_next(
        "recommend",
        UcmError::command("recommend", "no permission", Some("chstream: Error".to_string())),
    );
    backend.fail_next(
        "persist_tag",
        UcmError::command("persist_tag", "hyperlink type missing", None),
    );
    let console = MemoryConsole::new();
    let config = PostBuildConfig {
        recommended: true,
        make_tag: true,
        ..Default::default()
    };

    let report = promotion::apply(
        &backend,
        &console,
        &baseline,
        &stream,
        BuildOutcome::Success,
        &config,
        JOB,
    )
    .await
    .unwrap();

    assert_eq!(backend.level_of(&baseline), Some(PromotionLevel::Tested));
    assert!(!report.is_clean());
    assert_eq!(report.side_effect_errors.len(), 2);
    assert!(report.side_effect_errors[0].starts_with("recommend:"));
    assert!(report.side_effect_errors[1].starts_with("tag:"));
    assert!(report.tag.is_none());
    assert!(console.contains("chstream: Error"));
    assert!(console.contains("Could not tag BL1"));
}

#[tokio::test]
async fn level_read_failure_aborts_before_any_write() {
    let (backend, stream, baseline) = repo(PromotionLevel::Built);
    backend.fail_next(
        "promotion_level",
        UcmError::command("promotion_level", "replica unreachable", None),
    );
    let console = MemoryConsole::new();

    let err = promotion::apply(
        &backend,
        &console,
        &baseline,
        &stream,
        BuildOutcome::Success,
        &PostBuildConfig::default(),
        JOB,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PucmError::BackendOperationFailed { .. }));
    assert!(!backend.called("set_promotion_level"));
}
