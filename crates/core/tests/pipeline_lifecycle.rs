//! Pipeline lifecycle integration tests.
//!
//! These tests verify multi-stage runs through the stage pools:
//! - One work item identity across stages
//! - Stage outputs feeding the next stage's inputs
//! - Failure and cancellation between stages
//! - Resuming a chain interrupted after the store advanced

use std::time::Duration;

use conveyor_core::{
    orchestrator::RunLifecycle,
    pool::{Activation, Disposition, StageLifecycle},
    providers::ProviderError,
    stage::{handlers::ExtractTextHandler, StageHandler},
    testing::fixtures::{RunHarness, TEST_ORG},
    CreateRunRequest, RunKind, StageKind, WorkItemStatus,
};

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_digest_pipeline_chains_extract_into_summarize() {
    let harness = RunHarness::new();
    let item = harness
        .orchestrator
        .create_run(
            TEST_ORG,
            CreateRunRequest::pipeline("digest").with_url("https://example.com/report.pdf"),
        )
        .unwrap();
    assert_eq!(item.kind, RunKind::PipelineRun);
    assert_eq!(
        item.stages,
        vec![StageKind::ExtractText, StageKind::Summarize]
    );
    assert_eq!(item.stage_name, StageKind::ExtractText);

    harness.orchestrator.start().await;
    let done = harness.wait_for_terminal(&item.id, TIMEOUT).await;
    harness.orchestrator.stop().await;

    assert_eq!(done.id, item.id);
    assert_eq!(done.status, WorkItemStatus::Complete);
    assert_eq!(done.stage_index, 1);
    assert_eq!(done.stage_name, StageKind::Summarize);
    assert_eq!(harness.mocks.extractor.call_count().await, 1);
    assert_eq!(harness.mocks.completions.call_count().await, 1);

    let stage_runs = harness.orchestrator.stage_runs(TEST_ORG, &item.id).unwrap();
    assert_eq!(stage_runs.len(), 2);
    assert!(stage_runs
        .iter()
        .all(|r| r.status == WorkItemStatus::Complete));
    assert_eq!(stage_runs[1].inputs, stage_runs[0].outputs);

    // Outputs of every stage are attached to the run.
    assert_eq!(done.outputs.len(), 2);
    assert!(done.outputs.contains(&stage_runs[0].outputs[0]));
    assert!(done.outputs.contains(&stage_runs[1].outputs[0]));

    harness.flush_events().await;
    let events = harness.publisher.events_for(&item.id).await;
    let advanced = events
        .iter()
        .find(|e| e.event == "stage_advanced")
        .unwrap();
    assert_eq!(advanced.payload["stage_index"], 1);
    assert_eq!(advanced.payload["stage"], "summarize");

    let progress: Vec<f64> = events
        .iter()
        .filter(|e| e.event == "update_progress")
        .filter_map(|e| e.payload["progress"].as_f64())
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.iter().any(|p| *p > 0.5));
}

#[tokio::test]
async fn test_digest_of_text_summarizes_the_input_itself() {
    let harness = RunHarness::new();
    harness.mocks.completions.set_response("Short.").await;
    let item = harness
        .orchestrator
        .create_run(
            TEST_ORG,
            CreateRunRequest::pipeline("digest").with_text("a long text to digest"),
        )
        .unwrap();

    harness.orchestrator.start().await;
    let done = harness.wait_for_terminal(&item.id, TIMEOUT).await;
    harness.orchestrator.stop().await;

    assert_eq!(done.status, WorkItemStatus::Complete);
    let stage_runs = harness.orchestrator.stage_runs(TEST_ORG, &item.id).unwrap();
    assert_eq!(stage_runs.len(), 2);
    assert!(stage_runs[0].outputs.is_empty());
    assert_eq!(stage_runs[1].inputs, item.inputs);

    // Only the summary is an output; the input stays an input.
    assert_eq!(done.outputs, stage_runs[1].outputs);
    assert!(done.outputs.iter().all(|id| !done.inputs.contains(id)));
}

#[tokio::test]
async fn test_narrate_pipeline_stores_audio() {
    let harness = RunHarness::new();
    let item = harness
        .orchestrator
        .create_run(
            TEST_ORG,
            CreateRunRequest::pipeline("narrate")
                .with_text("The quarterly numbers are up across every region."),
        )
        .unwrap();

    harness.orchestrator.start().await;
    let done = harness.wait_for_terminal(&item.id, TIMEOUT).await;
    harness.orchestrator.stop().await;

    assert_eq!(done.status, WorkItemStatus::Complete);
    assert_eq!(harness.mocks.speech.call_count().await, 1);
    assert_eq!(harness.mocks.storage.object_count().await, 1);
}

#[tokio::test]
async fn test_failure_in_later_stage_keeps_earlier_outputs() {
    let harness = RunHarness::new();
    harness
        .mocks
        .speech
        .set_next_error(ProviderError::Api {
            status: 400,
            message: "voice not available".into(),
        })
        .await;

    let item = harness
        .orchestrator
        .create_run(
            TEST_ORG,
            CreateRunRequest::pipeline("narrate").with_text("Read this aloud."),
        )
        .unwrap();

    harness.orchestrator.start().await;
    let done = harness.wait_for_terminal(&item.id, TIMEOUT).await;
    harness.orchestrator.stop().await;

    assert_eq!(done.status, WorkItemStatus::Error);
    assert!(done.error.as_deref().unwrap().contains("voice not available"));
    assert_eq!(done.stage_name, StageKind::TextToSpeech);

    let stage_runs = harness.orchestrator.stage_runs(TEST_ORG, &item.id).unwrap();
    assert_eq!(stage_runs[0].status, WorkItemStatus::Complete);
    assert_eq!(stage_runs[1].status, WorkItemStatus::Error);

    let summary_id = &stage_runs[0].outputs[0];
    assert!(done.outputs.contains(summary_id));
    assert!(harness
        .stores
        .contents
        .get(TEST_ORG, summary_id)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_cancel_mid_stage_stops_before_next_stage() {
    let harness = RunHarness::new();
    let item = harness
        .orchestrator
        .create_run(
            TEST_ORG,
            CreateRunRequest::pipeline("digest").with_url("https://example.com/report.pdf"),
        )
        .unwrap();

    let lifecycle = RunLifecycle::new(harness.services());
    let lease = harness
        .stores
        .queue
        .lease(&StageKind::ExtractText.queue_name(), Duration::from_secs(30))
        .unwrap()
        .unwrap();
    let ctx = match lifecycle.on_active(&lease).await.unwrap() {
        Activation::Run(ctx) => ctx,
        Activation::Settle(_) => panic!("expected the stage to run"),
    };

    let output = ExtractTextHandler::new(harness.mocks.extractor.clone())
        .run(&ctx)
        .await
        .unwrap();

    // Cancelled while the stage is executing.
    let outcome = harness
        .orchestrator
        .cancel_run(TEST_ORG, &item.id)
        .await
        .unwrap();
    assert!(!outcome.cancelled);

    let disposition = lifecycle.on_completed(&ctx, output).await.unwrap();
    assert_eq!(disposition, Disposition::Ack);
    harness.stores.queue.ack(&lease).unwrap();

    let done = harness.work_item(&item.id);
    assert_eq!(done.status, WorkItemStatus::Error);
    assert_eq!(done.error.as_deref(), Some("cancelled"));
    assert_eq!(done.stage_index, 0);
    assert_eq!(
        harness
            .orchestrator
            .stage_runs(TEST_ORG, &item.id)
            .unwrap()
            .len(),
        1
    );
    assert_eq!(harness.mocks.completions.call_count().await, 0);
}

#[tokio::test]
async fn test_interrupted_chain_resumes_at_next_stage() {
    let harness = RunHarness::new();
    let item = harness
        .orchestrator
        .create_run(
            TEST_ORG,
            CreateRunRequest::pipeline("digest").with_url("https://example.com/report.pdf"),
        )
        .unwrap();

    // First executor finishes stage 0 and advances the item, then dies
    // before moving the job to the next queue.
    let lifecycle = RunLifecycle::new(harness.services());
    let lease = harness
        .stores
        .queue
        .lease(&StageKind::ExtractText.queue_name(), Duration::from_millis(50))
        .unwrap()
        .unwrap();
    let ctx = match lifecycle.on_active(&lease).await.unwrap() {
        Activation::Run(ctx) => ctx,
        Activation::Settle(_) => panic!("expected the stage to run"),
    };
    let output = ExtractTextHandler::new(harness.mocks.extractor.clone())
        .run(&ctx)
        .await
        .unwrap();
    let disposition = lifecycle.on_completed(&ctx, output).await.unwrap();
    assert!(matches!(disposition, Disposition::Forward { .. }));
    assert_eq!(harness.work_item(&item.id).stage_index, 1);

    harness.orchestrator.start().await;
    let done = harness.wait_for_terminal(&item.id, TIMEOUT).await;
    harness.orchestrator.stop().await;

    assert_eq!(done.status, WorkItemStatus::Complete);
    assert_eq!(harness.mocks.extractor.call_count().await, 1);
    assert_eq!(harness.mocks.completions.call_count().await, 1);
}

#[tokio::test]
async fn test_unknown_pipeline_is_not_found() {
    let harness = RunHarness::new();
    let err = harness
        .orchestrator
        .create_run(TEST_ORG, CreateRunRequest::pipeline("nope").with_text("hi"))
        .unwrap_err();
    assert!(matches!(err, conveyor_core::OrchestratorError::NotFound(_)));
}
