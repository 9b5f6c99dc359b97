//! Portfolio-level read models: dashboard totals and the arrears watchlist.

use crate::errors::{AppError, ResultExt};
use crate::models::{ArrearsBucket, Client, Loan, LoanStatus, Repayment};
use crate::store::{LoanFilter, RecordStore, RepaymentFilter};
use bigdecimal::{BigDecimal, Zero};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Window for the "collected recently" figures on the dashboard.
pub const COLLECTION_WINDOW_DAYS: i64 = 30;

/// Repayments shown per loan on the watchlist.
pub const WATCHLIST_RECENT_REPAYMENTS: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioSummary {
    pub total_clients: i64,
    pub active_loans: usize,
    /// Principal over every loan ever disbursed.
    pub total_disbursed: BigDecimal,
    /// Outstanding balance over active loans.
    pub total_outstanding: BigDecimal,
    pub loans_in_arrears: usize,
    pub total_arrears: BigDecimal,
    pub repayments_last_30_days: usize,
    pub collected_last_30_days: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrearsEntry {
    pub loan: Loan,
    /// `None` when the borrower record is missing.
    pub client: Option<Client>,
    pub bucket: ArrearsBucket,
    pub recent_repayments: Vec<Repayment>,
}

/// Folds loans and recent repayments into dashboard totals.
pub fn summarize(total_clients: i64, loans: &[Loan], recent: &[Repayment]) -> PortfolioSummary {
    let mut summary = PortfolioSummary {
        total_clients,
        active_loans: 0,
        total_disbursed: BigDecimal::zero(),
        total_outstanding: BigDecimal::zero(),
        loans_in_arrears: 0,
        total_arrears: BigDecimal::zero(),
        repayments_last_30_days: recent.len(),
        collected_last_30_days: recent
            .iter()
            .fold(BigDecimal::zero(), |acc, r| acc + &r.amount),
    };

    for loan in loans {
        summary.total_disbursed += &loan.principal_amount;
        if loan.status != LoanStatus::Active {
            continue;
        }
        summary.active_loans += 1;
        summary.total_outstanding += &loan.outstanding_balance;
        if loan.days_in_arrears > 0 {
            summary.loans_in_arrears += 1;
            summary.total_arrears += &loan.arrears_amount;
        }
    }

    summary
}

fn window_start(today: NaiveDate) -> NaiveDate {
    today - Duration::days(COLLECTION_WINDOW_DAYS)
}

#[derive(Clone)]
pub struct PortfolioService {
    store: Arc<dyn RecordStore>,
}

impl PortfolioService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn summary(&self) -> Result<PortfolioSummary, AppError> {
        let loan_filter = LoanFilter::default();
        let repayment_filter = RepaymentFilter {
            since: Some(window_start(Utc::now().date_naive())),
            ..RepaymentFilter::default()
        };

        let (total_clients, loans, recent) = tokio::try_join!(
            self.store.count_clients(),
            self.store.list_loans(&loan_filter),
            self.store.list_repayments(&repayment_filter),
        )
        .context("loading portfolio")?;

        let summary = summarize(total_clients, &loans, &recent);
        tracing::debug!(
            "Portfolio: {} active loans, {} in arrears, outstanding {}",
            summary.active_loans,
            summary.loans_in_arrears,
            summary.total_outstanding
        );
        Ok(summary)
    }

    /// Active loans in arrears, most days overdue first.
    pub async fn arrears_watchlist(&self) -> Result<Vec<ArrearsEntry>, AppError> {
        let filter = LoanFilter {
            client_id: None,
            status: Some(LoanStatus::Active),
            in_arrears: true,
        };
        let loans = self
            .store
            .list_loans(&filter)
            .await
            .context("listing loans in arrears")?;

        let mut entries = Vec::with_capacity(loans.len());
        for loan in loans {
            let repayment_filter = RepaymentFilter {
                loan_ids: Some(vec![loan.id]),
                since: None,
                limit: Some(WATCHLIST_RECENT_REPAYMENTS),
            };
            let (client, recent_repayments) = tokio::try_join!(
                self.store.get_client(loan.client_id),
                self.store.list_repayments(&repayment_filter),
            )
            .context("loading watchlist entry")?;

            if client.is_none() {
                tracing::warn!(
                    "Loan {} references missing client {}",
                    loan.loan_number,
                    loan.client_id
                );
            }

            entries.push(ArrearsEntry {
                bucket: ArrearsBucket::from_days(loan.days_in_arrears),
                client,
                recent_repayments,
                loan,
            });
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use uuid::Uuid;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn loan(status: LoanStatus, principal: &str, outstanding: &str, arrears: &str, days: i32) -> Loan {
        let now = Utc::now();
        Loan {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            loan_number: "LN-1".to_string(),
            loan_product: "development".to_string(),
            principal_amount: dec(principal),
            interest_rate: dec("12"),
            loan_term_months: 12,
            disbursement_date: None,
            maturity_date: None,
            purpose: None,
            status,
            outstanding_balance: dec(outstanding),
            total_paid: dec(principal) - dec(outstanding),
            arrears_amount: dec(arrears),
            days_in_arrears: days,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn closed_loans_count_towards_disbursed_only() {
        let loans = vec![
            loan(LoanStatus::Active, "10000", "8000", "500", 40),
            loan(LoanStatus::Active, "5000", "5000", "0", 0),
            loan(LoanStatus::Closed, "2000", "0", "0", 0),
        ];
        let summary = summarize(3, &loans, &[]);

        assert_eq!(summary.total_clients, 3);
        assert_eq!(summary.active_loans, 2);
        assert_eq!(summary.total_disbursed, dec("17000"));
        assert_eq!(summary.total_outstanding, dec("13000"));
        assert_eq!(summary.loans_in_arrears, 1);
        assert_eq!(summary.total_arrears, dec("500"));
        assert_eq!(summary.repayments_last_30_days, 0);
        assert!(summary.collected_last_30_days.is_zero());
    }

    #[test]
    fn window_covers_thirty_days() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        assert_eq!(window_start(today), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }
}
