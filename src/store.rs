//! Record store contract consumed by the ledger and the risk scorer.
//!
//! Two implementations exist: [`crate::pg_store::PgRecordStore`] for
//! PostgreSQL and [`crate::memory_store::MemoryRecordStore`] for tests and
//! local runs.

use crate::models::*;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;
use uuid::Uuid;

/// Failure of the underlying record store.
#[derive(Debug)]
pub enum StoreError {
    /// Database driver error.
    Database(sqlx::Error),
    /// Store could not be reached or refused the request.
    Unavailable(String),
    /// A stored row could not be mapped back into a record.
    Corrupt(String),
    /// A unique field already holds the submitted value.
    Duplicate(String),
}

impl StoreError {
    /// Duplicate registration of a client identifier, worded the same by
    /// every backend.
    pub fn duplicate_client(field: &str, value: &str) -> Self {
        StoreError::Duplicate(format!("{} {} is already registered", field, value))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "database error: {}", e),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
            StoreError::Corrupt(msg) => write!(f, "corrupt record: {}", msg),
            StoreError::Duplicate(msg) => write!(f, "duplicate record: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::Database(ref db) if db.is_unique_violation() => StoreError::Duplicate(
                db.constraint().unwrap_or("unique constraint").to_string(),
            ),
            other => StoreError::Database(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filter for [`RecordStore::list_loans`]. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct LoanFilter {
    pub client_id: Option<Uuid>,
    pub status: Option<LoanStatus>,
    /// Only loans with `days_in_arrears > 0`, ordered by days in arrears
    /// descending instead of creation time.
    pub in_arrears: bool,
}

impl LoanFilter {
    pub fn for_client(client_id: Uuid) -> Self {
        Self {
            client_id: Some(client_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, loan: &Loan) -> bool {
        self.client_id.map_or(true, |id| loan.client_id == id)
            && self.status.map_or(true, |s| loan.status == s)
            && (!self.in_arrears || loan.days_in_arrears > 0)
    }
}

/// Filter for [`RecordStore::list_repayments`]. Results are ordered by
/// transaction date descending, most recently created first within a day.
#[derive(Debug, Clone, Default)]
pub struct RepaymentFilter {
    /// Membership filter on `loan_id`. `None` means every loan; an empty set
    /// matches nothing.
    pub loan_ids: Option<Vec<Uuid>>,
    /// Only repayments on or after this date.
    pub since: Option<NaiveDate>,
    pub limit: Option<i64>,
}

impl RepaymentFilter {
    pub fn for_loans(loan_ids: Vec<Uuid>) -> Self {
        Self {
            loan_ids: Some(loan_ids),
            ..Self::default()
        }
    }

    pub fn matches(&self, repayment: &Repayment) -> bool {
        self.loan_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&repayment.loan_id))
            && self
                .since
                .map_or(true, |since| repayment.transaction_date >= since)
    }
}

/// Storage abstraction for the four portfolio entities plus risk scores.
///
/// Repayments and risk scores are append-only: the trait offers no way to
/// edit or delete them.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_client(&self, id: Uuid) -> StoreResult<Option<Client>>;

    async fn insert_client(&self, client: NewClient) -> StoreResult<Client>;

    async fn count_clients(&self) -> StoreResult<i64>;

    async fn get_loan(&self, id: Uuid) -> StoreResult<Option<Loan>>;

    async fn list_loans(&self, filter: &LoanFilter) -> StoreResult<Vec<Loan>>;

    async fn insert_loan(&self, loan: NewLoan) -> StoreResult<Loan>;

    async fn list_repayments(&self, filter: &RepaymentFilter) -> StoreResult<Vec<Repayment>>;

    async fn list_guarantors(&self, loan_id: Uuid) -> StoreResult<Vec<Guarantor>>;

    async fn insert_guarantor(&self, guarantor: NewGuarantor) -> StoreResult<Guarantor>;

    /// Atomically appends `repayment` and overwrites the loan's ledger fields
    /// with those of `loan`, provided the stored loan still has
    /// `expected_version`. The stored version becomes `expected_version + 1`.
    ///
    /// Returns `Ok(None)` without writing anything when the version no
    /// longer matches.
    async fn commit_repayment(
        &self,
        expected_version: i64,
        loan: &Loan,
        repayment: NewRepayment,
    ) -> StoreResult<Option<(Loan, Repayment)>>;

    async fn insert_risk_score(&self, score: NewRiskScore) -> StoreResult<RiskScore>;

    /// Most recent risk score for a loan by `calculated_at`.
    async fn latest_risk_score(&self, loan_id: Uuid) -> StoreResult<Option<RiskScore>>;

    /// Score history for a client, newest first.
    async fn list_risk_scores(&self, client_id: Uuid) -> StoreResult<Vec<RiskScore>>;
}
