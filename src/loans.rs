use crate::errors::{AppError, ResultExt};
use crate::models::*;
use crate::scoring::RiskScorer;
use crate::store::{LoanFilter, RecordStore, RepaymentFilter};
use bigdecimal::{BigDecimal, Zero};
use chrono::{Months, NaiveDate, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Default and maximum page size for ledger listings.
const DEFAULT_REPAYMENT_LIMIT: i64 = 50;
const MAX_REPAYMENT_LIMIT: i64 = 500;

/// Loan book operations outside the ledger: disbursement, lookups and
/// guarantors.
#[derive(Clone)]
pub struct LoanService {
    store: Arc<dyn RecordStore>,
    scorer: RiskScorer,
}

/// Maturity is the disbursement date moved forward by the loan term, clamped
/// to the end of the month (31 Jan + 1 month = 28/29 Feb).
pub fn maturity_date(disbursed: NaiveDate, term_months: i32) -> Option<NaiveDate> {
    let months = u32::try_from(term_months).ok()?;
    disbursed.checked_add_months(Months::new(months))
}

/// Checks a disbursement request and builds the loan row: active, with the
/// full principal outstanding and no arrears.
pub fn build_new_loan(
    req: &DisburseLoanRequest,
    disbursed: NaiveDate,
    loan_number: String,
) -> Result<NewLoan, AppError> {
    if req.principal_amount <= BigDecimal::zero() {
        return Err(AppError::Validation(
            "principal_amount must be greater than zero".to_string(),
        ));
    }
    if req.interest_rate < BigDecimal::zero() {
        return Err(AppError::Validation(
            "interest_rate cannot be negative".to_string(),
        ));
    }
    if req.loan_term_months <= 0 {
        return Err(AppError::Validation(
            "loan_term_months must be at least 1".to_string(),
        ));
    }
    let loan_product = req.loan_product.trim();
    if loan_product.is_empty() {
        return Err(AppError::Validation("loan_product is required".to_string()));
    }

    Ok(NewLoan {
        client_id: req.client_id,
        loan_number,
        loan_product: loan_product.to_string(),
        principal_amount: req.principal_amount.clone(),
        interest_rate: req.interest_rate.clone(),
        loan_term_months: req.loan_term_months,
        disbursement_date: Some(disbursed),
        maturity_date: maturity_date(disbursed, req.loan_term_months),
        purpose: req
            .purpose
            .as_ref()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty()),
        status: LoanStatus::Active,
        outstanding_balance: req.principal_amount.clone(),
        total_paid: BigDecimal::zero(),
        arrears_amount: BigDecimal::zero(),
        days_in_arrears: 0,
    })
}

impl LoanService {
    pub fn new(store: Arc<dyn RecordStore>, scorer: RiskScorer) -> Self {
        Self { store, scorer }
    }

    /// Creates an active loan and scores it straight away.
    ///
    /// The loan stays stored when scoring fails; the failure is logged and the
    /// returned `risk_score` is `None`.
    pub async fn disburse(&self, req: DisburseLoanRequest) -> Result<DisbursedLoan, AppError> {
        let client = self
            .store
            .get_client(req.client_id)
            .await
            .context("loading client for disbursement")?
            .ok_or_else(|| AppError::NotFound(format!("Client {} not found", req.client_id)))?;

        if client.status != ClientStatus::Active {
            return Err(AppError::Validation(format!(
                "Client {} is {} and cannot borrow",
                client.member_number, client.status
            )));
        }

        let now = Utc::now();
        let loan_number = format!("LN-{}", now.timestamp_millis());
        let new_loan = build_new_loan(&req, now.date_naive(), loan_number)?;

        let loan = self
            .store
            .insert_loan(new_loan)
            .await
            .context("inserting loan")?;

        tracing::info!(
            "Disbursed loan {} of {} to {} ({})",
            loan.loan_number,
            loan.principal_amount,
            client.full_name(),
            client.member_number
        );

        let risk_score = match self.scorer.score(client.id, Some(loan.id)).await {
            Ok(score) => Some(RiskScoreResult::from(&score)),
            Err(e) => {
                tracing::warn!(
                    "Loan {} disbursed but initial scoring failed: {}",
                    loan.loan_number,
                    e
                );
                None
            }
        };

        Ok(DisbursedLoan { loan, risk_score })
    }

    pub async fn get_loan(&self, loan_id: Uuid) -> Result<Loan, AppError> {
        self.store
            .get_loan(loan_id)
            .await
            .context("loading loan")?
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", loan_id)))
    }

    pub async fn get_client(&self, client_id: Uuid) -> Result<Client, AppError> {
        self.store
            .get_client(client_id)
            .await
            .context("loading client")?
            .ok_or_else(|| AppError::NotFound(format!("Client {} not found", client_id)))
    }

    pub async fn list_loans(&self, params: &LoanQueryParams) -> Result<Vec<Loan>, AppError> {
        let filter = LoanFilter {
            client_id: params.client_id,
            status: params.status,
            in_arrears: false,
        };
        Ok(self
            .store
            .list_loans(&filter)
            .await
            .context("listing loans")?)
    }

    /// Ledger entries of a loan, most recent first.
    pub async fn list_repayments(
        &self,
        loan_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<Repayment>, AppError> {
        self.get_loan(loan_id).await?;

        let limit = limit
            .unwrap_or(DEFAULT_REPAYMENT_LIMIT)
            .clamp(1, MAX_REPAYMENT_LIMIT);
        let filter = RepaymentFilter {
            loan_ids: Some(vec![loan_id]),
            since: None,
            limit: Some(limit),
        };
        Ok(self
            .store
            .list_repayments(&filter)
            .await
            .context("listing repayments")?)
    }

    pub async fn add_guarantor(
        &self,
        loan_id: Uuid,
        req: AddGuarantorRequest,
    ) -> Result<Guarantor, AppError> {
        let loan = self.get_loan(loan_id).await?;

        let name = req.guarantor_name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("guarantor_name is required".to_string()));
        }
        let phone = req.guarantor_phone.trim();
        if phone.is_empty() {
            return Err(AppError::Validation("guarantor_phone is required".to_string()));
        }
        if req.guaranteed_amount < BigDecimal::zero() {
            return Err(AppError::Validation(
                "guaranteed_amount cannot be negative".to_string(),
            ));
        }
        if req.guarantor_client_id == Some(loan.client_id) {
            return Err(AppError::Validation(
                "A borrower cannot guarantee their own loan".to_string(),
            ));
        }
        if let Some(guarantor_client_id) = req.guarantor_client_id {
            self.get_client(guarantor_client_id).await?;
        }

        let guarantor = self
            .store
            .insert_guarantor(NewGuarantor {
                loan_id,
                guarantor_client_id: req.guarantor_client_id,
                guarantor_name: name.to_string(),
                guarantor_phone: phone.to_string(),
                guarantor_relationship: req
                    .guarantor_relationship
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty()),
                guaranteed_amount: req.guaranteed_amount,
            })
            .await
            .context("inserting guarantor")?;

        tracing::info!(
            "Guarantor {} added to loan {}",
            guarantor.guarantor_name,
            loan.loan_number
        );
        Ok(guarantor)
    }

    pub async fn list_guarantors(&self, loan_id: Uuid) -> Result<Vec<Guarantor>, AppError> {
        self.get_loan(loan_id).await?;
        Ok(self
            .store
            .list_guarantors(loan_id)
            .await
            .context("listing guarantors")?)
    }
}
