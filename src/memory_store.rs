use crate::models::*;
use crate::store::{LoanFilter, RecordStore, RepaymentFilter, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    clients: HashMap<Uuid, Client>,
    loans: HashMap<Uuid, Loan>,
    /// Insertion ordered.
    repayments: Vec<Repayment>,
    guarantors: Vec<Guarantor>,
    /// Insertion ordered.
    risk_scores: Vec<RiskScore>,
}

/// In-process record store.
///
/// A single lock guards every table, so `commit_repayment` is atomic. Used by
/// the test suite and by `STORE_BACKEND=memory`.
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: RwLock<Tables>,
    offline: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store is offline".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of stored repayments across all loans.
    pub async fn repayment_count(&self) -> usize {
        self.tables.read().await.repayments.len()
    }

    /// Number of stored risk scores across all clients.
    pub async fn risk_score_count(&self) -> usize {
        self.tables.read().await.risk_scores.len()
    }

    /// Overwrites a loan's arrears fields, bypassing the ledger.
    ///
    /// Arrears are raised by the collections process, which lives outside this
    /// service; tests use this to put a loan into arrears.
    pub async fn set_arrears(
        &self,
        loan_id: Uuid,
        arrears_amount: bigdecimal::BigDecimal,
        days_in_arrears: i32,
    ) -> StoreResult<()> {
        self.ensure_online()?;
        let mut tables = self.tables.write().await;
        let loan = tables
            .loans
            .get_mut(&loan_id)
            .ok_or_else(|| StoreError::Corrupt(format!("loan {} does not exist", loan_id)))?;
        loan.arrears_amount = arrears_amount;
        loan.days_in_arrears = days_in_arrears;
        loan.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_client(&self, id: Uuid) -> StoreResult<Option<Client>> {
        self.ensure_online()?;
        Ok(self.tables.read().await.clients.get(&id).cloned())
    }

    async fn insert_client(&self, client: NewClient) -> StoreResult<Client> {
        self.ensure_online()?;
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.clients.values().find(|c| {
            c.member_number == client.member_number || c.national_id == client.national_id
        }) {
            return Err(if existing.member_number == client.member_number {
                StoreError::duplicate_client("member_number", &client.member_number)
            } else {
                StoreError::duplicate_client("national_id", &client.national_id)
            });
        }

        let now = Utc::now();
        let record = Client {
            id: Uuid::new_v4(),
            member_number: client.member_number,
            first_name: client.first_name,
            last_name: client.last_name,
            email: client.email,
            phone: client.phone,
            national_id: client.national_id,
            date_of_birth: client.date_of_birth,
            address: client.address,
            employer: client.employer,
            monthly_income: client.monthly_income,
            status: client.status,
            joined_date: client.joined_date,
            created_at: now,
            updated_at: now,
        };
        tables.clients.insert(record.id, record.clone());
        Ok(record)
    }

    async fn count_clients(&self) -> StoreResult<i64> {
        self.ensure_online()?;
        Ok(self.tables.read().await.clients.len() as i64)
    }

    async fn get_loan(&self, id: Uuid) -> StoreResult<Option<Loan>> {
        self.ensure_online()?;
        Ok(self.tables.read().await.loans.get(&id).cloned())
    }

    async fn list_loans(&self, filter: &LoanFilter) -> StoreResult<Vec<Loan>> {
        self.ensure_online()?;
        let tables = self.tables.read().await;
        let mut loans: Vec<Loan> = tables
            .loans
            .values()
            .filter(|loan| filter.matches(loan))
            .cloned()
            .collect();
        if filter.in_arrears {
            loans.sort_by(|a, b| {
                b.days_in_arrears
                    .cmp(&a.days_in_arrears)
                    .then(b.created_at.cmp(&a.created_at))
            });
        } else {
            loans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
        Ok(loans)
    }

    async fn insert_loan(&self, loan: NewLoan) -> StoreResult<Loan> {
        self.ensure_online()?;
        let now = Utc::now();
        let record = Loan {
            id: Uuid::new_v4(),
            client_id: loan.client_id,
            loan_number: loan.loan_number,
            loan_product: loan.loan_product,
            principal_amount: loan.principal_amount,
            interest_rate: loan.interest_rate,
            loan_term_months: loan.loan_term_months,
            disbursement_date: loan.disbursement_date,
            maturity_date: loan.maturity_date,
            purpose: loan.purpose,
            status: loan.status,
            outstanding_balance: loan.outstanding_balance,
            total_paid: loan.total_paid,
            arrears_amount: loan.arrears_amount,
            days_in_arrears: loan.days_in_arrears,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.tables
            .write()
            .await
            .loans
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn list_repayments(&self, filter: &RepaymentFilter) -> StoreResult<Vec<Repayment>> {
        self.ensure_online()?;
        let tables = self.tables.read().await;
        // Newest insert first, then a stable sort keeps that order within a date.
        let mut rows: Vec<Repayment> = tables
            .repayments
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.transaction_date.cmp(&a.transaction_date));
        if let Some(limit) = filter.limit {
            rows.truncate(limit.max(0) as usize);
        }
        Ok(rows)
    }

    async fn list_guarantors(&self, loan_id: Uuid) -> StoreResult<Vec<Guarantor>> {
        self.ensure_online()?;
        let tables = self.tables.read().await;
        Ok(tables
            .guarantors
            .iter()
            .filter(|g| g.loan_id == loan_id)
            .cloned()
            .collect())
    }

    async fn insert_guarantor(&self, guarantor: NewGuarantor) -> StoreResult<Guarantor> {
        self.ensure_online()?;
        let record = Guarantor {
            id: Uuid::new_v4(),
            loan_id: guarantor.loan_id,
            guarantor_client_id: guarantor.guarantor_client_id,
            guarantor_name: guarantor.guarantor_name,
            guarantor_phone: guarantor.guarantor_phone,
            guarantor_relationship: guarantor.guarantor_relationship,
            guaranteed_amount: guarantor.guaranteed_amount,
            created_at: Utc::now(),
        };
        self.tables.write().await.guarantors.push(record.clone());
        Ok(record)
    }

    async fn commit_repayment(
        &self,
        expected_version: i64,
        loan: &Loan,
        repayment: NewRepayment,
    ) -> StoreResult<Option<(Loan, Repayment)>> {
        self.ensure_online()?;
        let mut tables = self.tables.write().await;
        let now = Utc::now();

        let stored = match tables.loans.get_mut(&loan.id) {
            Some(stored) if stored.version == expected_version => stored,
            Some(_) => return Ok(None),
            None => {
                return Err(StoreError::Corrupt(format!(
                    "loan {} vanished during commit",
                    loan.id
                )))
            }
        };

        stored.outstanding_balance = loan.outstanding_balance.clone();
        stored.total_paid = loan.total_paid.clone();
        stored.arrears_amount = loan.arrears_amount.clone();
        stored.days_in_arrears = loan.days_in_arrears;
        stored.status = loan.status;
        stored.version = expected_version + 1;
        stored.updated_at = now;
        let updated = stored.clone();

        let entry = Repayment {
            id: Uuid::new_v4(),
            loan_id: repayment.loan_id,
            transaction_date: repayment.transaction_date,
            amount: repayment.amount,
            principal_amount: repayment.principal_amount,
            interest_amount: repayment.interest_amount,
            payment_method: repayment.payment_method,
            receipt_number: repayment.receipt_number,
            recorded_by: repayment.recorded_by,
            notes: repayment.notes,
            created_at: now,
        };
        tables.repayments.push(entry.clone());

        Ok(Some((updated, entry)))
    }

    async fn insert_risk_score(&self, score: NewRiskScore) -> StoreResult<RiskScore> {
        self.ensure_online()?;
        let record = RiskScore {
            id: Uuid::new_v4(),
            client_id: score.client_id,
            loan_id: score.loan_id,
            score: score.score,
            risk_category: score.risk_category,
            payment_history_score: score.payment_history_score,
            debt_to_income_ratio: score.debt_to_income_ratio,
            loan_amount_score: score.loan_amount_score,
            guarantor_score: score.guarantor_score,
            days_in_arrears_score: score.days_in_arrears_score,
            calculated_at: score.calculated_at,
            factors: score.factors,
        };
        self.tables.write().await.risk_scores.push(record.clone());
        Ok(record)
    }

    async fn latest_risk_score(&self, loan_id: Uuid) -> StoreResult<Option<RiskScore>> {
        self.ensure_online()?;
        let tables = self.tables.read().await;
        // max_by_key keeps the last maximum, i.e. the latest insert on ties.
        Ok(tables
            .risk_scores
            .iter()
            .filter(|s| s.loan_id == Some(loan_id))
            .max_by_key(|s| s.calculated_at)
            .cloned())
    }

    async fn list_risk_scores(&self, client_id: Uuid) -> StoreResult<Vec<RiskScore>> {
        self.ensure_online()?;
        let tables = self.tables.read().await;
        let mut rows: Vec<RiskScore> = tables
            .risk_scores
            .iter()
            .rev()
            .filter(|s| s.client_id == client_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.calculated_at.cmp(&a.calculated_at));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::time::Duration;

    fn new_loan(client_id: Uuid, loan_number: &str, days_in_arrears: i32) -> NewLoan {
        NewLoan {
            client_id,
            loan_number: loan_number.to_string(),
            loan_product: "emergency".to_string(),
            principal_amount: BigDecimal::from(5_000),
            interest_rate: BigDecimal::from(12),
            loan_term_months: 6,
            disbursement_date: None,
            maturity_date: None,
            purpose: None,
            status: LoanStatus::Active,
            outstanding_balance: BigDecimal::from(5_000),
            total_paid: BigDecimal::from(0),
            arrears_amount: BigDecimal::from(500),
            days_in_arrears,
        }
    }

    #[tokio::test]
    async fn arrears_listing_breaks_ties_newest_first() {
        let store = MemoryRecordStore::new();
        let client_id = Uuid::new_v4();
        for (number, days) in [("LN-1", 45), ("LN-2", 90), ("LN-3", 45), ("LN-4", 45)] {
            store.insert_loan(new_loan(client_id, number, days)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let filter = LoanFilter {
            in_arrears: true,
            ..LoanFilter::default()
        };
        let order: Vec<String> = store
            .list_loans(&filter)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.loan_number)
            .collect();

        assert_eq!(order, ["LN-2", "LN-4", "LN-3", "LN-1"]);
    }

    #[tokio::test]
    async fn client_identifiers_are_unique() {
        let store = MemoryRecordStore::new();
        let client = NewClient {
            member_number: "M-77".to_string(),
            first_name: "Otieno".to_string(),
            last_name: "Achieng".to_string(),
            email: None,
            phone: "+254733000111".to_string(),
            national_id: "22334455".to_string(),
            date_of_birth: chrono::NaiveDate::from_ymd_opt(1979, 2, 2).unwrap(),
            address: None,
            employer: None,
            monthly_income: BigDecimal::from(30_000),
            status: ClientStatus::Active,
            joined_date: chrono::NaiveDate::from_ymd_opt(2019, 9, 9).unwrap(),
        };
        store.insert_client(client.clone()).await.unwrap();

        let err = store.insert_client(client).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(msg) if msg == "member_number M-77 is already registered"));
        assert_eq!(store.count_clients().await.unwrap(), 1);
    }
}
