//! Ledger updater: applies a repayment to a loan's running balances.
//!
//! The balance arithmetic lives in [`apply_payment`], a pure function over a
//! loan snapshot. [`LedgerService`] wraps it with the read-modify-write cycle
//! against the record store:
//! 1. Serialize payments per loan with an in-process async mutex
//! 2. Read the loan and apply the payment
//! 3. Commit the repayment and the new balances in one conditional write
//! 4. Re-read and re-apply if another writer bumped the loan version

use crate::errors::{AppError, ResultExt};
use crate::models::{Loan, LoanStatus, NewRepayment, PaymentReceipt, RecordPaymentRequest};
use crate::store::RecordStore;
use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// New loan snapshot plus the ledger entry that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerUpdate {
    pub loan: Loan,
    pub repayment: NewRepayment,
}

/// Splits a payment into `(principal, interest)` components.
///
/// `interest = amount * interest_rate / 100` and `principal = amount - interest`.
/// The principal component goes negative when the rate exceeds 100%; that is
/// not guarded. The two always sum to `amount` exactly.
pub fn split_payment(amount: &BigDecimal, interest_rate: &BigDecimal) -> (BigDecimal, BigDecimal) {
    let interest = amount * interest_rate / BigDecimal::from(100);
    let principal = amount - &interest;
    (principal, interest)
}

/// Applies one payment to a loan snapshot.
///
/// Fails with [`AppError::Validation`] when the amount is not positive or the
/// loan is not active. `days_in_arrears` is never recomputed from due dates,
/// it only resets to zero once arrears are cleared.
pub fn apply_payment(loan: &Loan, payment: &RecordPaymentRequest) -> Result<LedgerUpdate, AppError> {
    let zero = BigDecimal::zero();
    if payment.amount <= zero {
        return Err(AppError::Validation(
            "Payment amount must be greater than zero".to_string(),
        ));
    }
    if loan.status != LoanStatus::Active {
        return Err(AppError::Validation(format!(
            "Loan {} is {} and cannot accept payments",
            loan.loan_number, loan.status
        )));
    }

    let amount = &payment.amount;
    let (principal_component, interest_amount) = split_payment(amount, &loan.interest_rate);

    let outstanding_balance = (&loan.outstanding_balance - amount).max(zero.clone());
    let total_paid = &loan.total_paid + amount;
    let arrears_amount = (&loan.arrears_amount - amount).max(zero.clone());
    let days_in_arrears = if arrears_amount > zero {
        loan.days_in_arrears
    } else {
        0
    };
    let status = if outstanding_balance.is_zero() {
        LoanStatus::Closed
    } else {
        LoanStatus::Active
    };

    if !loan.status.can_transition_to(status) {
        return Err(AppError::Computation(format!(
            "illegal status transition {} -> {} for loan {}",
            loan.status, status, loan.id
        )));
    }

    let updated = Loan {
        outstanding_balance,
        total_paid,
        arrears_amount,
        days_in_arrears,
        status,
        ..loan.clone()
    };

    let repayment = NewRepayment {
        loan_id: loan.id,
        transaction_date: payment
            .transaction_date
            .unwrap_or_else(|| Utc::now().date_naive()),
        amount: amount.clone(),
        principal_amount: principal_component,
        interest_amount,
        payment_method: payment.payment_method,
        receipt_number: payment.receipt_number.clone(),
        recorded_by: payment.recorded_by.clone(),
        notes: payment.notes.clone(),
    };

    Ok(LedgerUpdate {
        loan: updated,
        repayment,
    })
}

/// Records payments against loans held in a [`RecordStore`].
pub struct LedgerService {
    store: Arc<dyn RecordStore>,
    /// Per-loan write locks. Idle entries expire; the version check in
    /// `commit_repayment` still protects a loan whose lock was evicted mid-flight.
    locks: Cache<Uuid, Arc<Mutex<()>>>,
    max_attempts: u32,
}

impl LedgerService {
    pub fn new(store: Arc<dyn RecordStore>, max_attempts: u32) -> Self {
        let locks = Cache::builder()
            .time_to_idle(Duration::from_secs(600))
            .max_capacity(10_000)
            .build();

        Self {
            store,
            locks,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Applies a payment to a loan and appends the repayment, atomically.
    ///
    /// Nothing is written when validation fails, the loan is unknown, the
    /// store fails, or every attempt loses the version race.
    pub async fn record_payment(
        &self,
        loan_id: Uuid,
        payment: RecordPaymentRequest,
    ) -> Result<PaymentReceipt, AppError> {
        if payment.amount <= BigDecimal::zero() {
            return Err(AppError::Validation(
                "Payment amount must be greater than zero".to_string(),
            ));
        }

        let lock = self
            .locks
            .get_with(loan_id, async { Arc::new(Mutex::new(())) })
            .await;
        let _guard = lock.lock().await;

        for attempt in 1..=self.max_attempts {
            let loan = self
                .store
                .get_loan(loan_id)
                .await
                .context("loading loan for payment")?
                .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", loan_id)))?;

            let update = apply_payment(&loan, &payment)?;
            tracing::debug!(
                "Loan {} payment {}: outstanding {} -> {}, arrears {} -> {}",
                loan.loan_number,
                payment.amount,
                loan.outstanding_balance,
                update.loan.outstanding_balance,
                loan.arrears_amount,
                update.loan.arrears_amount
            );

            let committed = self
                .store
                .commit_repayment(loan.version, &update.loan, update.repayment)
                .await
                .context("committing repayment")?;

            match committed {
                Some((loan, repayment)) => {
                    tracing::info!(
                        "Recorded payment {} on loan {} (status: {}, outstanding: {})",
                        repayment.amount,
                        loan.loan_number,
                        loan.status,
                        loan.outstanding_balance
                    );
                    return Ok(PaymentReceipt { loan, repayment });
                }
                None => {
                    tracing::warn!(
                        "Loan {} changed during payment (attempt {}/{}), retrying",
                        loan_id,
                        attempt,
                        self.max_attempts
                    );
                }
            }
        }

        Err(AppError::Conflict(format!(
            "Loan {} is being updated concurrently, payment not recorded",
            loan_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentMethod;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn loan(outstanding: &str, arrears: &str, days: i32) -> Loan {
        let now = Utc::now();
        Loan {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            loan_number: "LN-1".to_string(),
            loan_product: "development".to_string(),
            principal_amount: dec("10000"),
            interest_rate: dec("10"),
            loan_term_months: 12,
            disbursement_date: None,
            maturity_date: None,
            purpose: None,
            status: LoanStatus::Active,
            outstanding_balance: dec(outstanding),
            total_paid: dec("10000") - dec(outstanding),
            arrears_amount: dec(arrears),
            days_in_arrears: days,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn payment(amount: &str) -> RecordPaymentRequest {
        RecordPaymentRequest {
            amount: dec(amount),
            transaction_date: None,
            payment_method: PaymentMethod::Cash,
            receipt_number: None,
            recorded_by: None,
            notes: None,
        }
    }

    #[test]
    fn splits_interest_at_loan_rate() {
        let (principal, interest) = split_payment(&dec("500"), &dec("10"));
        assert_eq!(interest, dec("50"));
        assert_eq!(principal, dec("450"));
    }

    #[test]
    fn principal_goes_negative_above_full_rate() {
        let (principal, interest) = split_payment(&dec("100"), &dec("150"));
        assert_eq!(interest, dec("150"));
        assert_eq!(principal, dec("-50"));
        assert_eq!(principal + interest, dec("100"));
    }

    #[test]
    fn partial_payment_keeps_loan_active() {
        let update = apply_payment(&loan("10000", "0", 0), &payment("500")).unwrap();
        assert_eq!(update.loan.outstanding_balance, dec("9500"));
        assert_eq!(update.loan.total_paid, dec("500"));
        assert_eq!(update.loan.status, LoanStatus::Active);
        assert_eq!(update.repayment.interest_amount, dec("50"));
        assert_eq!(update.repayment.principal_amount, dec("450"));
    }

    #[test]
    fn overpayment_clamps_to_zero_and_closes() {
        let update = apply_payment(&loan("300", "0", 0), &payment("500")).unwrap();
        assert!(update.loan.outstanding_balance.is_zero());
        assert_eq!(update.loan.status, LoanStatus::Closed);
        assert_eq!(update.loan.total_paid, dec("10200"));
    }

    #[test]
    fn arrears_days_survive_partial_arrears_payment() {
        let update = apply_payment(&loan("5000", "800", 45), &payment("300")).unwrap();
        assert_eq!(update.loan.arrears_amount, dec("500"));
        assert_eq!(update.loan.days_in_arrears, 45);
    }

    #[test]
    fn clearing_arrears_resets_days() {
        let update = apply_payment(&loan("5000", "800", 45), &payment("800")).unwrap();
        assert!(update.loan.arrears_amount.is_zero());
        assert_eq!(update.loan.days_in_arrears, 0);
    }

    #[test]
    fn rejects_non_positive_amounts() {
        for amount in ["0", "-10"] {
            let err = apply_payment(&loan("1000", "0", 0), &payment(amount)).unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
    }

    #[test]
    fn rejects_payments_on_closed_loans() {
        let mut closed = loan("0", "0", 0);
        closed.status = LoanStatus::Closed;
        let err = apply_payment(&closed, &payment("100")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
