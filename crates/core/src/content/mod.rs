//! Tenant-owned content records referenced by work items.
//!
//! Content is either inline text or a URL to an object. Stage outputs are
//! created through [`ContentStore::create_output`], which is keyed by
//! `(work_item_id, output_key)` so a redelivered stage reuses what an
//! earlier attempt already produced.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteContentStore;
pub use store::ContentStore;
pub use types::*;
