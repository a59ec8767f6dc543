//! Run lifecycle integration tests.
//!
//! These tests drive whole runs through the orchestrator and its stage pools
//! against in-memory stores and mock collaborators:
//! QUEUED -> PROCESSING -> COMPLETE | ERROR

use std::time::Duration;

use conveyor_core::{
    content::CreateContentRequest,
    orchestrator::RunLifecycle,
    pool::{Activation, StageLifecycle},
    providers::{ProviderError, VectorIndex},
    queue::RemoveOutcome,
    stage::{handlers::SummarizeHandler, StageHandler},
    testing::fixtures::{test_config, RunHarness, TEST_CREDITS, TEST_ORG},
    CreateRunRequest, OrchestratorError, Plan, RunKind, StageKind, WorkItemFilter,
    WorkItemStatus,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn run_count(harness: &RunHarness) -> i64 {
    harness
        .stores
        .work_items
        .count(&WorkItemFilter::new())
        .unwrap()
}

#[tokio::test]
async fn test_summarize_tool_run_completes() {
    let harness = RunHarness::new();
    harness.mocks.completions.set_response("A greeting.").await;

    let item = harness
        .orchestrator
        .create_run(TEST_ORG, CreateRunRequest::tool("summarize").with_text("hello world"))
        .unwrap();
    assert_eq!(item.status, WorkItemStatus::Queued);
    assert_eq!(item.kind, RunKind::ToolRun);
    assert_eq!(item.progress, 0.0);
    assert_eq!(item.inputs.len(), 1);
    assert_eq!(item.credits_cost, 1);

    harness.orchestrator.start().await;
    let done = harness.wait_for_terminal(&item.id, TIMEOUT).await;
    harness.orchestrator.stop().await;

    assert_eq!(done.status, WorkItemStatus::Complete);
    assert_eq!(done.progress, 1.0);
    assert!(done.error.is_none());
    assert_eq!(done.outputs.len(), 1);

    let summary = harness
        .stores
        .contents
        .get(TEST_ORG, &done.outputs[0])
        .unwrap()
        .unwrap();
    assert_eq!(summary.text.as_deref(), Some("A greeting."));
    assert!(harness.balance() < TEST_CREDITS);
    assert_eq!(
        harness.balance(),
        TEST_CREDITS - done.credits_used,
        "settled credits match the debits"
    );

    harness.flush_events().await;
    let events = harness.publisher.events_for(&item.id).await;
    let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(names.first(), Some(&"run_created"));
    assert_eq!(names.last(), Some(&"update"));
    assert_eq!(events.last().unwrap().payload["status"], "COMPLETE");
}

#[tokio::test]
async fn test_extract_on_text_reports_no_outputs() {
    let harness = RunHarness::new();
    let item = harness
        .orchestrator
        .create_run(
            TEST_ORG,
            CreateRunRequest::tool("extract-text").with_text("hello world"),
        )
        .unwrap();

    harness.orchestrator.start().await;
    let done = harness.wait_for_terminal(&item.id, TIMEOUT).await;
    harness.orchestrator.stop().await;

    assert_eq!(done.status, WorkItemStatus::Complete);
    assert!(done.outputs.iter().all(|id| !done.inputs.contains(id)));
    assert!(done.outputs.is_empty());

    let stage_runs = harness.orchestrator.stage_runs(TEST_ORG, &item.id).unwrap();
    assert!(stage_runs[0].outputs.is_empty());
    assert_eq!(harness.mocks.extractor.call_count().await, 0);
}

#[tokio::test]
async fn test_progress_events_never_decrease() {
    let harness = RunHarness::new();
    let item = harness
        .orchestrator
        .create_run(
            TEST_ORG,
            CreateRunRequest::tool("ingest-document").with_url("https://example.com/report.pdf"),
        )
        .unwrap();

    harness.orchestrator.start().await;
    let done = harness.wait_for_terminal(&item.id, TIMEOUT).await;
    harness.orchestrator.stop().await;
    assert_eq!(done.status, WorkItemStatus::Complete);

    harness.flush_events().await;
    let progress: Vec<f64> = harness
        .publisher
        .events_for(&item.id)
        .await
        .iter()
        .filter(|e| e.event == "update_progress")
        .filter_map(|e| e.payload["progress"].as_f64())
        .collect();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.iter().all(|p| *p < 1.0));
}

#[tokio::test]
async fn test_missing_content_is_not_found() {
    let harness = RunHarness::new();

    let err = harness
        .orchestrator
        .create_run(
            TEST_ORG,
            CreateRunRequest::tool("summarize").with_content_ids(vec!["missing".to_string()]),
        )
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::NotFound(_)));
    assert_eq!(run_count(&harness), 0);
}

#[tokio::test]
async fn test_content_of_other_org_is_not_found() {
    let harness = RunHarness::new();
    harness
        .stores
        .ledger
        .upsert_organization("globex", Plan::Standard, 100)
        .unwrap();
    let theirs = harness
        .stores
        .contents
        .create(CreateContentRequest::text("globex", "Theirs", "secret"))
        .unwrap();

    let err = harness
        .orchestrator
        .create_run(
            TEST_ORG,
            CreateRunRequest::tool("summarize").with_content_ids(vec![theirs.id]),
        )
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn test_zero_balance_is_rejected_before_anything_is_written() {
    let harness = RunHarness::new();
    harness.set_balance(Plan::Standard, 0);

    let err = harness
        .orchestrator
        .create_run(TEST_ORG, CreateRunRequest::tool("summarize").with_text("hello world"))
        .unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::InsufficientCredits {
            required: 1,
            available: 0
        }
    ));
    assert_eq!(run_count(&harness), 0);
    assert_eq!(harness.mocks.completions.call_count().await, 0);
}

#[tokio::test]
async fn test_unlimited_plan_is_admitted_with_zero_balance() {
    let harness = RunHarness::new();
    harness.set_balance(Plan::Unlimited, 0);

    let item = harness
        .orchestrator
        .create_run(TEST_ORG, CreateRunRequest::tool("summarize").with_text("hello world"))
        .unwrap();
    assert_eq!(item.status, WorkItemStatus::Queued);
}

#[tokio::test]
async fn test_invalid_requests() {
    let harness = RunHarness::new();
    let orchestrator = &harness.orchestrator;

    let no_inputs = orchestrator
        .create_run(TEST_ORG, CreateRunRequest::tool("summarize"))
        .unwrap_err();
    assert!(matches!(no_inputs, OrchestratorError::InvalidInput(_)));

    let unknown_tool = orchestrator
        .create_run(TEST_ORG, CreateRunRequest::tool("translate").with_text("hi"))
        .unwrap_err();
    assert!(matches!(unknown_tool, OrchestratorError::NotFound(_)));

    let unknown_org = orchestrator
        .create_run("nobody", CreateRunRequest::tool("summarize").with_text("hi"))
        .unwrap_err();
    assert!(matches!(unknown_org, OrchestratorError::NotFound(_)));

    let mut both = CreateRunRequest::tool("summarize").with_text("hi");
    both.pipeline_id = Some("digest".to_string());
    let both = orchestrator.create_run(TEST_ORG, both).unwrap_err();
    assert!(matches!(both, OrchestratorError::InvalidInput(_)));

    assert_eq!(run_count(&harness), 0);
}

#[tokio::test]
async fn test_embedding_retried_until_success() {
    let harness = RunHarness::new();
    harness.mocks.embeddings.fail_times(2).await;

    let item = harness
        .orchestrator
        .create_run(
            TEST_ORG,
            CreateRunRequest::tool("create-embeddings").with_text("some text to embed"),
        )
        .unwrap();

    harness.orchestrator.start().await;
    let done = harness.wait_for_terminal(&item.id, TIMEOUT).await;
    harness.orchestrator.stop().await;

    assert_eq!(done.status, WorkItemStatus::Complete);
    assert_eq!(harness.mocks.embeddings.call_count().await, 3);
    assert!(harness.mocks.vectors.count_for(&done.inputs[0]).await.unwrap() > 0);
}

#[tokio::test]
async fn test_permanent_sub_task_failure_keeps_other_side_effects() {
    let harness = RunHarness::new();
    harness
        .mocks
        .completions
        .set_next_error(ProviderError::Api {
            status: 400,
            message: "context length exceeded".into(),
        })
        .await;

    let item = harness
        .orchestrator
        .create_run(
            TEST_ORG,
            CreateRunRequest::tool("ingest-document").with_url("https://example.com/report.pdf"),
        )
        .unwrap();

    harness.orchestrator.start().await;
    let done = harness.wait_for_terminal(&item.id, TIMEOUT).await;
    harness.orchestrator.stop().await;

    assert_eq!(done.status, WorkItemStatus::Error);
    assert!(done.error.as_deref().unwrap().contains("context length exceeded"));
    assert!(done.completed_at.is_some());
    assert!(done.progress < 1.0);

    // The preview upload and vector upsert were detached and are kept.
    for _ in 0..100 {
        if harness.mocks.storage.object_count().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(harness.mocks.storage.object_count().await, 1);
    let input = harness
        .stores
        .contents
        .get(TEST_ORG, &done.inputs[0])
        .unwrap()
        .unwrap();
    assert!(input.preview_image.is_some());

    let stage_runs = harness
        .orchestrator
        .stage_runs(TEST_ORG, &item.id)
        .unwrap();
    assert_eq!(stage_runs.len(), 1);
    assert!(stage_runs[0].error.is_some());
}

#[tokio::test]
async fn test_cancel_queued_run() {
    let harness = RunHarness::new();
    let item = harness
        .orchestrator
        .create_run(TEST_ORG, CreateRunRequest::tool("summarize").with_text("hello"))
        .unwrap();

    let outcome = harness
        .orchestrator
        .cancel_run(TEST_ORG, &item.id)
        .await
        .unwrap();
    assert!(outcome.cancelled);
    assert_eq!(outcome.queue, RemoveOutcome::Removed);
    assert_eq!(outcome.work_item.status, WorkItemStatus::Error);
    assert_eq!(outcome.work_item.error.as_deref(), Some("cancelled"));

    harness.orchestrator.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.orchestrator.stop().await;

    assert_eq!(harness.mocks.completions.call_count().await, 0);
    assert_eq!(harness.work_item(&item.id).status, WorkItemStatus::Error);

    harness.flush_events().await;
    let cancelled = harness
        .publisher
        .events_for(&item.id)
        .await
        .into_iter()
        .find(|e| e.event == "run_cancelled")
        .unwrap();
    assert_eq!(cancelled.payload["removed_from_queue"], true);
}

#[tokio::test]
async fn test_cancel_finished_run_changes_nothing() {
    let harness = RunHarness::new();
    let item = harness
        .orchestrator
        .create_run(TEST_ORG, CreateRunRequest::tool("summarize").with_text("hello"))
        .unwrap();

    harness.orchestrator.start().await;
    harness.wait_for_terminal(&item.id, TIMEOUT).await;
    harness.orchestrator.stop().await;

    let outcome = harness
        .orchestrator
        .cancel_run(TEST_ORG, &item.id)
        .await
        .unwrap();
    assert!(!outcome.cancelled);
    assert_eq!(outcome.work_item.status, WorkItemStatus::Complete);
}

#[tokio::test]
async fn test_cancel_of_leased_run_applies_at_stage_boundary() {
    let harness = RunHarness::new();
    let item = harness
        .orchestrator
        .create_run(TEST_ORG, CreateRunRequest::tool("summarize").with_text("hello"))
        .unwrap();

    // Another executor holds the job.
    let queue = &harness.stores.queue;
    let lease = queue
        .lease(&StageKind::Summarize.queue_name(), Duration::from_secs(30))
        .unwrap()
        .unwrap();

    let outcome = harness
        .orchestrator
        .cancel_run(TEST_ORG, &item.id)
        .await
        .unwrap();
    assert!(!outcome.cancelled);
    assert_eq!(outcome.queue, RemoveOutcome::Leased);
    assert!(outcome.work_item.cancel_requested);
    assert!(!outcome.work_item.status.is_terminal());

    // The executor gives the job back; the next activation ends the run.
    queue.release(&lease, Duration::ZERO).unwrap();
    harness.orchestrator.start().await;
    let done = harness.wait_for_terminal(&item.id, TIMEOUT).await;
    harness.orchestrator.stop().await;

    assert_eq!(done.status, WorkItemStatus::Error);
    assert_eq!(done.error.as_deref(), Some("cancelled"));
    assert_eq!(harness.mocks.completions.call_count().await, 0);
}

#[tokio::test]
async fn test_get_run_is_scoped_to_org() {
    let harness = RunHarness::new();
    let item = harness
        .orchestrator
        .create_run(TEST_ORG, CreateRunRequest::tool("summarize").with_text("hello"))
        .unwrap();

    assert_eq!(
        harness.orchestrator.get_run(TEST_ORG, &item.id).unwrap().id,
        item.id
    );
    assert!(matches!(
        harness.orchestrator.get_run("globex", &item.id),
        Err(OrchestratorError::NotFound(_))
    ));
    assert!(matches!(
        harness.orchestrator.cancel_run("globex", &item.id).await,
        Err(OrchestratorError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_redelivered_stage_is_not_charged_twice() {
    let harness = RunHarness::new();
    let item = harness
        .orchestrator
        .create_run(TEST_ORG, CreateRunRequest::tool("summarize").with_text("hello world"))
        .unwrap();

    // A first executor runs the stage to the end, then dies before acking.
    let lifecycle = RunLifecycle::new(harness.services());
    let lease = harness
        .stores
        .queue
        .lease(&StageKind::Summarize.queue_name(), Duration::from_millis(50))
        .unwrap()
        .unwrap();
    let ctx = match lifecycle.on_active(&lease).await.unwrap() {
        Activation::Run(ctx) => ctx,
        Activation::Settle(_) => panic!("expected the stage to run"),
    };
    let first = SummarizeHandler::new(harness.mocks.completions.clone())
        .run(&ctx)
        .await
        .unwrap();
    let balance_after_first = harness.balance();
    assert!(balance_after_first < TEST_CREDITS);

    // The lease expires and the pool redelivers the job.
    harness.orchestrator.start().await;
    let done = harness.wait_for_terminal(&item.id, TIMEOUT).await;
    harness.orchestrator.stop().await;

    assert_eq!(done.status, WorkItemStatus::Complete);
    assert_eq!(done.outputs, first.outputs);
    assert_eq!(harness.mocks.completions.call_count().await, 2);
    assert_eq!(harness.balance(), balance_after_first);
    assert_eq!(harness.stores.ledger.charges_for(&item.id).unwrap().len(), 1);

    let stage_runs = harness.stores.work_items.stage_runs(&item.id).unwrap();
    assert_eq!(stage_runs[0].attempts, 2);
}

#[tokio::test]
async fn test_disabled_orchestrator_queues_without_running() {
    let harness = RunHarness::with_config({
        let mut config = test_config();
        config.orchestrator.enabled = false;
        config
    });
    let item = harness
        .orchestrator
        .create_run(TEST_ORG, CreateRunRequest::tool("summarize").with_text("hello"))
        .unwrap();

    harness.orchestrator.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!harness.orchestrator.status().running);
    assert_eq!(harness.work_item(&item.id).status, WorkItemStatus::Queued);
    assert_eq!(harness.orchestrator.status().queued_count, 1);
}
