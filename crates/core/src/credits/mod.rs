//! Per-organization credit balances and idempotent settlement.

mod ledger;
mod sqlite;

pub use ledger::*;
pub use sqlite::SqliteCreditLedger;
