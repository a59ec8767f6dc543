//! Test fixtures and helper functions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::{
    MockCompletions, MockEmbeddings, MockExtractor, MockImages, MockSpeech, MockStorage,
    MockVectorIndex, RecordingPublisher,
};
use crate::config::{Config, PipelineConfig};
use crate::content::{
    mime_type_for_url, Content, ContentStore, CreateContentRequest, SqliteContentStore,
};
use crate::credits::{CreditLedger, Plan, SqliteCreditLedger};
use crate::orchestrator::{Orchestrator, Stores, ToolCatalog};
use crate::providers::Providers;
use crate::publisher::{create_publisher_system, PublisherHandle};
use crate::retry::RetryPolicy;
use crate::stage::{Metering, StageContext, StageKind, StageRegistry, StageServices};
use crate::work::{
    CreateWorkItemRequest, RunKind, SqliteWorkItemStore, WorkItem, WorkItemStore,
};

/// Organization every fixture runs as.
pub const TEST_ORG: &str = "acme";

/// Balance the test organization starts with.
pub const TEST_CREDITS: i64 = 1000;

/// Three retries with millisecond backoff.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3).with_base_delay(Duration::from_millis(1))
}

/// One mock per collaborator, kept typed so tests can drive them.
#[derive(Debug, Clone)]
pub struct MockProviders {
    pub extractor: Arc<MockExtractor>,
    pub embeddings: Arc<MockEmbeddings>,
    pub completions: Arc<MockCompletions>,
    pub speech: Arc<MockSpeech>,
    pub images: Arc<MockImages>,
    pub storage: Arc<MockStorage>,
    pub vectors: Arc<MockVectorIndex>,
}

impl MockProviders {
    /// The same mocks as the trait objects handlers take.
    pub fn providers(&self) -> Providers {
        Providers {
            extractor: self.extractor.clone(),
            embeddings: self.embeddings.clone(),
            completions: self.completions.clone(),
            speech: self.speech.clone(),
            images: self.images.clone(),
            storage: self.storage.clone(),
            vectors: self.vectors.clone(),
        }
    }
}

/// Fresh mocks with default behavior.
pub fn mock_providers() -> MockProviders {
    MockProviders {
        extractor: Arc::new(MockExtractor::new()),
        embeddings: Arc::new(MockEmbeddings::new()),
        completions: Arc::new(MockCompletions::new()),
        speech: Arc::new(MockSpeech::new()),
        images: Arc::new(MockImages::new()),
        storage: Arc::new(MockStorage::new()),
        vectors: Arc::new(MockVectorIndex::new()),
    }
}

/// In-memory stores plus the services a handler needs, for running one
/// stage outside the worker pool.
pub struct StageHarness {
    pub work_items: Arc<SqliteWorkItemStore>,
    pub contents: Arc<SqliteContentStore>,
    pub ledger: Arc<SqliteCreditLedger>,
    pub services: StageServices,
}

impl Default for StageHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl StageHarness {
    pub fn new() -> Self {
        Self::with_publisher(PublisherHandle::disabled())
    }

    pub fn with_publisher(publisher: PublisherHandle) -> Self {
        let work_items = Arc::new(SqliteWorkItemStore::in_memory().expect("work item store"));
        let contents = Arc::new(SqliteContentStore::in_memory().expect("content store"));
        let ledger = Arc::new(SqliteCreditLedger::in_memory().expect("credit ledger"));
        ledger
            .upsert_organization(TEST_ORG, Plan::Standard, TEST_CREDITS)
            .expect("seed organization");

        let services = StageServices {
            work_items: work_items.clone(),
            contents: contents.clone(),
            ledger: ledger.clone(),
            publisher,
            retry: fast_retry(),
            metering: Metering::default(),
        };

        Self {
            work_items,
            contents,
            ledger,
            services,
        }
    }

    pub fn text_input(&self, text: &str) -> Content {
        self.contents
            .create(CreateContentRequest::text(TEST_ORG, "Input", text))
            .expect("create text content")
    }

    pub fn url_input(&self, url: &str) -> Content {
        self.contents
            .create(CreateContentRequest::url(
                TEST_ORG,
                "Input",
                url,
                mime_type_for_url(url),
            ))
            .expect("create url content")
    }

    /// A processing single-stage work item over `inputs`, with its stage
    /// run begun.
    pub fn context(&self, stage: StageKind, inputs: Vec<Content>) -> StageContext {
        let work_item = self
            .work_items
            .create(CreateWorkItemRequest {
                orgname: TEST_ORG.to_string(),
                kind: RunKind::ToolRun,
                tool_id: Some(stage.as_str().to_string()),
                pipeline_id: None,
                stages: vec![stage],
                inputs: inputs.iter().map(|c| c.id.clone()).collect(),
                credits_cost: 1,
            })
            .expect("create work item");
        let work_item = self
            .work_items
            .mark_processing(&work_item.id)
            .expect("mark processing");
        self.work_items
            .begin_stage_run(&work_item.id, 0)
            .expect("begin stage run");

        StageContext::new(&self.services, work_item, inputs)
    }

    pub fn content(&self, id: &str) -> Content {
        self.contents
            .get(TEST_ORG, id)
            .expect("get content")
            .expect("content exists")
    }

    pub fn balance(&self) -> i64 {
        self.ledger
            .organization(TEST_ORG)
            .expect("get organization")
            .expect("organization exists")
            .credits
    }

    pub fn set_balance(&self, plan: Plan, credits: i64) {
        self.ledger
            .upsert_organization(TEST_ORG, plan, credits)
            .expect("update organization");
    }

    /// Stored run-wide progress of the context's work item.
    pub fn progress(&self, ctx: &StageContext) -> f64 {
        self.work_items
            .get(ctx.work_item_id())
            .expect("get work item")
            .expect("work item exists")
            .progress
    }
}

/// Configuration for whole-run tests: default tools, fast polling and two
/// pipelines, `digest` (extract-text, summarize) and `narrate` (summarize,
/// text-to-speech).
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.pools.poll_interval_ms = 10;
    config.pools.lease_ttl_ms = 2_000;
    config.pipelines = vec![
        PipelineConfig {
            id: "digest".to_string(),
            name: None,
            tools: vec!["extract-text".to_string(), "summarize".to_string()],
        },
        PipelineConfig {
            id: "narrate".to_string(),
            name: None,
            tools: vec!["summarize".to_string(), "text-to-speech".to_string()],
        },
    ];
    config
}

/// A complete orchestrator over in-memory stores and mock collaborators,
/// with a recording publisher behind a live dispatcher.
pub struct RunHarness {
    pub orchestrator: Arc<Orchestrator>,
    pub stores: Stores,
    pub mocks: MockProviders,
    pub publisher: Arc<RecordingPublisher>,
    pub handle: PublisherHandle,
    dispatcher: JoinHandle<()>,
}

impl RunHarness {
    /// Must be called inside a tokio runtime. Pools are not started.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let stores = Stores::in_memory().expect("in-memory stores");
        stores
            .ledger
            .upsert_organization(TEST_ORG, Plan::Standard, TEST_CREDITS)
            .expect("seed organization");

        let mocks = mock_providers();
        let publisher = Arc::new(RecordingPublisher::new());
        let (handle, dispatcher) = create_publisher_system(publisher.clone(), 1000);
        let dispatcher = tokio::spawn(dispatcher.run());

        let registry =
            StageRegistry::standard(&mocks.providers(), &config.pools).expect("stage registry");
        let catalog = ToolCatalog::new(&config.tools, &config.pipelines).expect("tool catalog");

        let orchestrator = Orchestrator::new(
            config.orchestrator.clone(),
            &config.pools,
            fast_retry(),
            stores.clone(),
            registry,
            catalog,
            handle.clone(),
        )
        .expect("orchestrator");

        Self {
            orchestrator: Arc::new(orchestrator),
            stores,
            mocks,
            publisher,
            handle,
            dispatcher,
        }
    }

    /// Services matching the orchestrator's, for driving a lifecycle or a
    /// handler by hand.
    pub fn services(&self) -> StageServices {
        StageServices {
            work_items: self.stores.work_items.clone(),
            contents: self.stores.contents.clone(),
            ledger: self.stores.ledger.clone(),
            publisher: self.handle.clone(),
            retry: fast_retry(),
            metering: Metering::default(),
        }
    }

    pub fn work_item(&self, id: &str) -> WorkItem {
        self.stores
            .work_items
            .get(id)
            .expect("get work item")
            .expect("work item exists")
    }

    pub fn balance(&self) -> i64 {
        self.stores
            .ledger
            .organization(TEST_ORG)
            .expect("get organization")
            .expect("organization exists")
            .credits
    }

    pub fn set_balance(&self, plan: Plan, credits: i64) {
        self.stores
            .ledger
            .upsert_organization(TEST_ORG, plan, credits)
            .expect("update organization");
    }

    /// Poll until the work item is terminal. Panics after `timeout`.
    pub async fn wait_for_terminal(&self, id: &str, timeout: Duration) -> WorkItem {
        let start = std::time::Instant::now();
        loop {
            let item = self.work_item(id);
            if item.status.is_terminal() {
                return item;
            }
            if start.elapsed() > timeout {
                panic!(
                    "work item {} still {} at stage {} after {:?}",
                    id, item.status, item.stage_name, timeout
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Give the publish dispatcher a moment to drain its channel.
    pub async fn flush_events(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

impl Drop for RunHarness {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}
