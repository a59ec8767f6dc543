pub mod config;
pub mod content;
pub mod credits;
pub mod metrics;
pub mod orchestrator;
pub mod pool;
pub mod providers;
pub mod publisher;
pub mod queue;
pub mod retry;
pub mod stage;
pub mod testing;
pub mod work;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    OrganizationSeed, PipelineConfig, SanitizedConfig, ServerConfig, ToolConfig,
};
pub use content::{Content, ContentError, ContentStore, SqliteContentStore};
pub use credits::{CreditError, CreditLedger, Organization, Plan, SqliteCreditLedger};
pub use orchestrator::{
    CancelOutcome, CatalogError, CreateRunRequest, Orchestrator, OrchestratorConfig,
    OrchestratorError, OrchestratorStatus, Stores, ToolCatalog,
};
pub use pool::{PoolConfig, PoolStatus};
pub use providers::{Providers, ProvidersConfig, SqliteVectorIndex};
pub use publisher::{
    create_publisher_system, BroadcastPublisher, OrgSubscription, PublishedEvent, PublisherHandle,
    RunEvent,
};
pub use queue::{DispatchQueue, RemoveOutcome, SqliteDispatchQueue};
pub use retry::{RetryConfig, RetryPolicy};
pub use stage::{StageError, StageKind, StageRegistry};
pub use work::{
    RunKind, StageRun, WorkItem, WorkItemError, WorkItemFilter, WorkItemStatus, WorkItemStore,
};
