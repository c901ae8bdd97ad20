use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;

use super::{PipelineError, Reporter, Stage, StageFailure, StageStatus, execute};
use crate::test_support::RecordingReporter;

#[derive(Debug, thiserror::Error)]
#[error("boom")]
struct Boom;

fn reporters() -> (Arc<RecordingReporter>, Arc<dyn Reporter>) {
    let recording = Arc::new(RecordingReporter::default());
    let dynamic: Arc<dyn Reporter> = Arc::clone(&recording) as Arc<dyn Reporter>;
    (recording, dynamic)
}

async fn bump(state: &mut Vec<&'static str>, tag: &'static str) -> Result<(), StageFailure<Boom>> {
    state.push(tag);
    Ok(())
}

fn passing(label: &str, tag: &'static str) -> Stage<'static, Vec<&'static str>, Boom> {
    Stage::new(
        format!("running {label}"),
        format!("{label} finished"),
        format!("{label} broke"),
        move |state, _status| Box::pin(bump(state, tag)),
    )
}

fn failing(
    label: &str,
    failure: fn() -> StageFailure<Boom>,
) -> Stage<'static, Vec<&'static str>, Boom> {
    Stage::new(
        format!("running {label}"),
        format!("{label} finished"),
        format!("{label} broke"),
        move |_state, _status| Box::pin(async move { Err(failure()) }),
    )
}

#[tokio::test]
async fn runs_stages_in_order_and_reports_ok_lines() {
    let (recording, reporter) = reporters();
    let mut state = Vec::new();
    let stages = vec![passing("first", "a"), passing("second", "b")];
    execute(&mut state, &reporter, stages)
        .await
        .expect("pipeline succeeds");
    assert_eq!(state, vec!["a", "b"]);
    assert_eq!(
        recording.lines(),
        vec!["OK [1/2] first finished.", "OK [2/2] second finished."]
    );
    assert_eq!(
        recording.statuses(),
        vec!["[1/2] running first", "[2/2] running second"]
    );
}

#[tokio::test]
async fn single_stage_pipeline_omits_the_index_prefix() {
    let (recording, reporter) = reporters();
    let mut state = Vec::new();
    execute(&mut state, &reporter, vec![passing("only", "x")])
        .await
        .expect("pipeline succeeds");
    assert_eq!(recording.lines(), vec!["OK only finished."]);
    assert_eq!(recording.statuses(), vec!["running only"]);
}

#[tokio::test]
async fn item_failure_is_reported_and_later_stages_still_run() {
    let (recording, reporter) = reporters();
    let mut state = Vec::new();
    let stages = vec![
        failing("first", || StageFailure::Item(Boom)),
        passing("second", "b"),
    ];
    execute(&mut state, &reporter, stages)
        .await
        .expect("item failures do not stop the pipeline");
    assert_eq!(state, vec!["b"]);
    assert_eq!(
        recording.lines(),
        vec!["ERROR [1/2] first broke: boom", "OK [2/2] second finished."]
    );
}

#[tokio::test]
async fn fatal_failure_stops_the_pipeline() {
    let (recording, reporter) = reporters();
    let mut state = Vec::new();
    let stages = vec![
        failing("first", || StageFailure::Fatal(Boom)),
        passing("second", "b"),
    ];
    let err = execute(&mut state, &reporter, stages)
        .await
        .expect_err("fatal failure surfaces");
    match err {
        PipelineError::Stage { label, source } => {
            assert_eq!(label, "first broke");
            assert_eq!(source.to_string(), "boom");
        }
        PipelineError::Cancelled => panic!("expected a stage failure"),
    }
    assert!(state.is_empty(), "second stage must not run");
    assert!(recording.lines().is_empty());
}

#[tokio::test]
async fn cancellation_aborts_without_failure_framing() {
    let (recording, reporter) = reporters();
    let mut state = Vec::new();
    let stages = vec![
        failing("first", || StageFailure::Cancelled),
        passing("second", "b"),
    ];
    let err = execute(&mut state, &reporter, stages)
        .await
        .expect_err("cancellation surfaces");
    assert!(matches!(err, PipelineError::Cancelled));
    assert!(state.is_empty());
    assert!(recording.lines().is_empty());
}

#[tokio::test]
async fn empty_pipeline_completes_without_output() {
    let (recording, reporter) = reporters();
    let mut state: Vec<&'static str> = Vec::new();
    execute(&mut state, &reporter, Vec::<Stage<'_, _, Boom>>::new())
        .await
        .expect("empty pipeline succeeds");
    assert!(recording.lines().is_empty());
    assert!(recording.statuses().is_empty());
}

#[rstest]
#[case(1, 1, "")]
#[case(1, 3, "[1/3]")]
#[case(3, 3, "[3/3]")]
#[case(1, 12, "[ 1/12]")]
#[case(10, 12, "[10/12]")]
fn index_text_reflects_position(#[case] index: usize, #[case] count: usize, #[case] expected: &str) {
    let (_recording, reporter) = reporters();
    let status = StageStatus::new(reporter, index, count);
    assert_eq!(status.index_text(), expected);
}

#[test]
fn set_remaining_appends_a_countdown_hint() {
    let (recording, reporter) = reporters();
    let status = StageStatus::new(reporter, 1, 1);
    status.set_text("estimating");
    status.set_remaining(Duration::from_secs(12));
    status.set_remaining(Duration::ZERO);
    assert_eq!(
        recording.statuses(),
        vec!["estimating", "estimating (12s left)", "estimating"]
    );
}

#[rstest]
#[case(-0.5, 0.0)]
#[case(0.25, 0.25)]
#[case(7.0, 1.0)]
fn set_progress_clamps_to_the_unit_interval(#[case] input: f32, #[case] expected: f32) {
    let (recording, reporter) = reporters();
    let status = StageStatus::new(reporter, 1, 1);
    status.set_progress(input);
    assert_eq!(recording.progress_values(), vec![expected]);
}
