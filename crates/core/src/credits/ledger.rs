use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Billing plan of an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Standard,
    /// Never rejected at admission. Charges are still recorded.
    Unlimited,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Standard => "standard",
            Plan::Unlimited => "unlimited",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(Plan::Standard),
            "unlimited" => Some(Plan::Unlimited),
            _ => None,
        }
    }
}

/// A tenant with its current balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub orgname: String,
    pub plan: Plan,
    pub credits: i64,
}

/// One applied settlement, unique per (work item, charge key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditCharge {
    pub orgname: String,
    pub work_item_id: String,
    pub charge_key: String,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum CreditError {
    #[error("organization not found: {0}")]
    OrganizationNotFound(String),

    #[error("insufficient credits for {orgname}: required {required}, available {available}")]
    InsufficientCredits {
        orgname: String,
        required: i64,
        available: i64,
    },

    #[error("database error: {0}")]
    Database(String),
}

/// Store of organization balances.
///
/// All balance mutation happens inside the store as a single atomic
/// statement. Callers never read a balance and write it back.
pub trait CreditLedger: Send + Sync {
    /// Look up an organization.
    fn organization(&self, orgname: &str) -> Result<Option<Organization>, CreditError>;

    /// Create or overwrite an organization's plan and balance.
    fn upsert_organization(
        &self,
        orgname: &str,
        plan: Plan,
        credits: i64,
    ) -> Result<Organization, CreditError>;

    /// Create an organization only if it does not exist yet.
    /// Returns true when a row was inserted.
    fn ensure_organization(
        &self,
        orgname: &str,
        plan: Plan,
        credits: i64,
    ) -> Result<bool, CreditError>;

    /// Admission check. Fails when the plan is not unlimited and the
    /// balance does not exceed `amount`.
    fn check_credits(&self, orgname: &str, amount: i64) -> Result<(), CreditError> {
        let org = self
            .organization(orgname)?
            .ok_or_else(|| CreditError::OrganizationNotFound(orgname.to_string()))?;

        if org.plan != Plan::Unlimited && org.credits <= amount {
            return Err(CreditError::InsufficientCredits {
                orgname: orgname.to_string(),
                required: amount,
                available: org.credits,
            });
        }
        Ok(())
    }

    /// Atomically add `delta` (negative to debit). Returns the new balance.
    fn adjust(&self, orgname: &str, delta: i64) -> Result<i64, CreditError>;

    /// Debit `amount` for `(work_item_id, charge_key)` unless that pair was
    /// already charged. Returns the new balance when the debit was applied.
    fn debit_once(
        &self,
        orgname: &str,
        work_item_id: &str,
        charge_key: &str,
        amount: i64,
    ) -> Result<Option<i64>, CreditError>;

    /// Charges applied for a work item, oldest first.
    fn charges_for(&self, work_item_id: &str) -> Result<Vec<CreditCharge>, CreditError>;
}

/// Credits for a token count, rounded up.
pub fn credits_for_tokens(tokens: u64, tokens_per_credit: u64) -> i64 {
    if tokens == 0 {
        return 0;
    }
    tokens.div_ceil(tokens_per_credit.max(1)) as i64
}
