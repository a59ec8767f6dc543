//! Progress and status publishing.
//!
//! Components emit [`RunEvent`]s through a cloneable [`PublisherHandle`]. A
//! [`PublishDispatcher`] task forwards them to a [`Publisher`]. Publishing is
//! fire-and-forget: a slow or failing transport never fails a run.

mod broadcast;
mod dispatcher;
mod events;
mod handle;
mod traits;

pub use broadcast::{BroadcastPublisher, OrgSubscription, PublishedEvent};
pub use dispatcher::{create_publisher_system, PublishDispatcher};
pub use events::RunEvent;
pub use handle::{PublisherHandle, RunEventEnvelope};
pub use traits::{PublishError, Publisher};
