//! Risk scorer: composite 0–100 credit risk score for a client, optionally
//! narrowed to one loan.
//!
//! Scoring runs in two phases. [`RiskScorer::gather`] fetches everything the
//! score depends on into a [`ScoringSnapshot`], issuing independent reads
//! concurrently. [`compute`] is then a pure fold over that snapshot. A store
//! failure during the fetch phase aborts before anything is written.

use crate::errors::{AppError, ResultExt};
use crate::models::{
    Client, Loan, LoanStatus, NewRiskScore, RiskCategory, RiskFactors, RiskScore,
    RiskScoreResult,
};
use crate::store::{LoanFilter, RecordStore, RepaymentFilter};
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Weights of the five sub-scores in the composite. They sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub payment_history: f64,
    pub debt_to_income: f64,
    pub loan_amount: f64,
    pub guarantor: f64,
    pub arrears: f64,
}

impl ScoringWeights {
    pub const STANDARD: ScoringWeights = ScoringWeights {
        payment_history: 0.30,
        debt_to_income: 0.25,
        loan_amount: 0.20,
        guarantor: 0.15,
        arrears: 0.10,
    };

    pub fn total(&self) -> f64 {
        self.payment_history + self.debt_to_income + self.loan_amount + self.guarantor + self.arrears
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Everything a score is derived from.
#[derive(Debug, Clone)]
pub struct ScoringSnapshot {
    pub client: Client,
    /// Every loan of the client, regardless of status.
    pub loans: Vec<Loan>,
    /// Repayments recorded across all of the client's loans.
    pub repayment_count: usize,
    /// The requested loan, when it belongs to the client.
    pub specific_loan: Option<Loan>,
    /// Guarantors of `specific_loan`; zero without one.
    pub guarantor_count: usize,
}

/// The five sub-scores, each within `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubScores {
    pub payment_history: f64,
    pub debt_to_income: f64,
    pub loan_amount: f64,
    pub guarantor: f64,
    pub arrears: f64,
}

impl SubScores {
    pub fn composite(&self, weights: &ScoringWeights) -> f64 {
        self.payment_history * weights.payment_history
            + self.debt_to_income * weights.debt_to_income
            + self.loan_amount * weights.loan_amount
            + self.guarantor * weights.guarantor
            + self.arrears * weights.arrears
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn to_f64(value: &BigDecimal, what: &str) -> Result<f64, AppError> {
    value
        .to_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| AppError::Computation(format!("{} {} is not representable", what, value)))
}

/// `100` without repayments, otherwise `100 - lateRatio * 100` floored at 0.
///
/// `lateRatio` divides the number of ACTIVE LOANS in arrears by the number of
/// REPAYMENTS across all loans. The units differ, and scores already stored
/// were computed with this exact ratio.
pub fn payment_history_score(loans: &[Loan], repayment_count: usize) -> f64 {
    if repayment_count == 0 {
        return 100.0;
    }
    let late_loans = loans
        .iter()
        .filter(|l| l.status == LoanStatus::Active && l.days_in_arrears > 0)
        .count();
    let late_ratio = late_loans as f64 / repayment_count as f64;
    (100.0 - late_ratio * 100.0).clamp(0.0, 100.0)
}

/// Outstanding debt as a percentage of monthly income; 100 when income is not positive.
pub fn debt_to_income_ratio(total_outstanding: f64, monthly_income: f64) -> f64 {
    if monthly_income > 0.0 {
        (total_outstanding / monthly_income) * 100.0
    } else {
        100.0
    }
}

pub fn debt_to_income_score(ratio: f64) -> f64 {
    (100.0 - ratio).clamp(0.0, 100.0)
}

/// Buckets the loan principal as a multiple of annual income.
pub fn loan_amount_score(principal: f64, monthly_income: f64) -> f64 {
    let income_multiple = if monthly_income > 0.0 {
        principal / (monthly_income * 12.0)
    } else {
        10.0
    };

    if income_multiple > 3.0 {
        20.0
    } else if income_multiple > 2.0 {
        40.0
    } else if income_multiple > 1.0 {
        60.0
    } else if income_multiple > 0.5 {
        80.0
    } else {
        100.0
    }
}

pub fn guarantor_score(count: usize) -> f64 {
    match count {
        0 => 0.0,
        1 => 40.0,
        2 => 70.0,
        _ => 100.0,
    }
}

pub fn days_in_arrears_score(days: i32) -> f64 {
    if days > 90 {
        0.0
    } else if days > 60 {
        20.0
    } else if days > 30 {
        40.0
    } else if days > 7 {
        60.0
    } else if days > 0 {
        80.0
    } else {
        100.0
    }
}

/// Derives the score, category, sub-scores and audit factors from a snapshot.
///
/// Without a specific loan the loan-amount and arrears sub-scores default to
/// 100 and the guarantor sub-score to 0. The category is taken from the
/// unrounded composite; only the reported score is rounded.
pub fn compute(snapshot: &ScoringSnapshot, weights: &ScoringWeights) -> Result<RiskScoreResult, AppError> {
    let monthly_income = to_f64(&snapshot.client.monthly_income, "monthly income")?;

    let active: Vec<&Loan> = snapshot
        .loans
        .iter()
        .filter(|l| l.status == LoanStatus::Active)
        .collect();
    let closed_loans = snapshot
        .loans
        .iter()
        .filter(|l| l.status == LoanStatus::Closed)
        .count();

    let mut total_outstanding = 0.0;
    for loan in &active {
        total_outstanding += to_f64(&loan.outstanding_balance, "outstanding balance")?;
    }

    let dti_ratio = debt_to_income_ratio(total_outstanding, monthly_income);

    let (loan_amount, arrears, guarantor) = match &snapshot.specific_loan {
        Some(loan) => (
            loan_amount_score(
                to_f64(&loan.principal_amount, "principal amount")?,
                monthly_income,
            ),
            days_in_arrears_score(loan.days_in_arrears),
            guarantor_score(snapshot.guarantor_count),
        ),
        None => (100.0, 100.0, 0.0),
    };

    let sub_scores = SubScores {
        payment_history: payment_history_score(&snapshot.loans, snapshot.repayment_count),
        debt_to_income: debt_to_income_score(dti_ratio),
        loan_amount,
        guarantor,
        arrears,
    };

    let composite = sub_scores.composite(weights);
    if !composite.is_finite() {
        return Err(AppError::Computation(format!(
            "composite score for client {} is not finite",
            snapshot.client.id
        )));
    }

    Ok(RiskScoreResult {
        score: round2(composite),
        risk_category: RiskCategory::from_score(composite),
        payment_history_score: round2(sub_scores.payment_history),
        debt_to_income_ratio: round2(dti_ratio),
        loan_amount_score: round2(sub_scores.loan_amount),
        guarantor_score: round2(sub_scores.guarantor),
        days_in_arrears_score: round2(sub_scores.arrears),
        factors: RiskFactors {
            total_loans: snapshot.loans.len(),
            active_loans: active.len(),
            closed_loans,
            total_outstanding,
            monthly_income,
            guarantor_count: if snapshot.specific_loan.is_some() {
                snapshot.guarantor_count
            } else {
                0
            },
        },
    })
}

/// Scores clients against a [`RecordStore`] and keeps the score history.
#[derive(Clone)]
pub struct RiskScorer {
    store: Arc<dyn RecordStore>,
    weights: ScoringWeights,
}

impl RiskScorer {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_weights(store, ScoringWeights::STANDARD)
    }

    pub fn with_weights(store: Arc<dyn RecordStore>, weights: ScoringWeights) -> Self {
        Self { store, weights }
    }

    /// Fetches the client, their loans, the repayments across those loans and
    /// the guarantors of the requested loan.
    ///
    /// A `loan_id` that is not one of the client's loans is ignored and the
    /// loan-specific sub-scores fall back to their defaults.
    pub async fn gather(
        &self,
        client_id: Uuid,
        loan_id: Option<Uuid>,
    ) -> Result<ScoringSnapshot, AppError> {
        let filter = LoanFilter::for_client(client_id);
        let (client, loans) = tokio::try_join!(
            self.store.get_client(client_id),
            self.store.list_loans(&filter),
        )
        .context("fetching client and loans for scoring")?;

        let client =
            client.ok_or_else(|| AppError::NotFound("Client not found".to_string()))?;

        let specific_loan = loan_id.and_then(|id| loans.iter().find(|l| l.id == id).cloned());
        if let (Some(id), None) = (loan_id, &specific_loan) {
            tracing::warn!(
                "Loan {} does not belong to client {}, scoring without loan-specific factors",
                id,
                client_id
            );
        }

        let repayment_filter = RepaymentFilter::for_loans(loans.iter().map(|l| l.id).collect());
        let guarantors = async {
            match &specific_loan {
                Some(loan) => self.store.list_guarantors(loan.id).await,
                None => Ok(Vec::new()),
            }
        };
        let (repayments, guarantors) = tokio::try_join!(
            self.store.list_repayments(&repayment_filter),
            guarantors,
        )
        .context("fetching repayments and guarantors for scoring")?;

        Ok(ScoringSnapshot {
            client,
            loans,
            repayment_count: repayments.len(),
            specific_loan,
            guarantor_count: guarantors.len(),
        })
    }

    /// Computes, persists and returns a fresh risk score.
    pub async fn score(
        &self,
        client_id: Uuid,
        loan_id: Option<Uuid>,
    ) -> Result<RiskScore, AppError> {
        let snapshot = self.gather(client_id, loan_id).await?;
        let result = compute(&snapshot, &self.weights)?;

        tracing::debug!(
            "Client {} sub-scores: payment history {}, DTI ratio {}, loan amount {}, guarantor {}, arrears {}",
            client_id,
            result.payment_history_score,
            result.debt_to_income_ratio,
            result.loan_amount_score,
            result.guarantor_score,
            result.days_in_arrears_score
        );

        let row = NewRiskScore {
            client_id,
            loan_id,
            score: result.score,
            risk_category: result.risk_category,
            payment_history_score: result.payment_history_score,
            debt_to_income_ratio: result.debt_to_income_ratio,
            loan_amount_score: result.loan_amount_score,
            guarantor_score: result.guarantor_score,
            days_in_arrears_score: result.days_in_arrears_score,
            calculated_at: Utc::now(),
            factors: result.factors,
        };

        let stored = self
            .store
            .insert_risk_score(row)
            .await
            .context("persisting risk score")?;

        tracing::info!(
            "Scored client {} (loan: {:?}): {} ({})",
            client_id,
            loan_id,
            stored.score,
            stored.risk_category
        );

        Ok(stored)
    }

    /// The most recent score recorded for a loan.
    pub async fn current_score(&self, loan_id: Uuid) -> Result<RiskScore, AppError> {
        self.store
            .latest_risk_score(loan_id)
            .await
            .context("loading current risk score")?
            .ok_or_else(|| AppError::NotFound(format!("No risk score for loan {}", loan_id)))
    }

    /// Score history for a client, newest first.
    pub async fn history(&self, client_id: Uuid) -> Result<Vec<RiskScore>, AppError> {
        if self
            .store
            .get_client(client_id)
            .await
            .context("loading client")?
            .is_none()
        {
            return Err(AppError::NotFound("Client not found".to_string()));
        }
        Ok(self
            .store
            .list_risk_scores(client_id)
            .await
            .context("loading risk score history")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_weights_sum_to_one() {
        assert!((ScoringWeights::STANDARD.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn loan_amount_buckets() {
        assert_eq!(loan_amount_score(40_000.0, 1_000.0), 20.0);
        assert_eq!(loan_amount_score(36_000.0, 1_000.0), 40.0);
        assert_eq!(loan_amount_score(24_000.0, 1_000.0), 60.0);
        assert_eq!(loan_amount_score(12_000.0, 1_000.0), 80.0);
        assert_eq!(loan_amount_score(6_000.0, 1_000.0), 100.0);
        assert_eq!(loan_amount_score(100.0, 0.0), 20.0);
    }

    #[test]
    fn guarantor_buckets() {
        assert_eq!(guarantor_score(0), 0.0);
        assert_eq!(guarantor_score(1), 40.0);
        assert_eq!(guarantor_score(2), 70.0);
        assert_eq!(guarantor_score(3), 100.0);
        assert_eq!(guarantor_score(7), 100.0);
    }

    #[test]
    fn arrears_buckets() {
        assert_eq!(days_in_arrears_score(95), 0.0);
        assert_eq!(days_in_arrears_score(90), 20.0);
        assert_eq!(days_in_arrears_score(61), 20.0);
        assert_eq!(days_in_arrears_score(60), 40.0);
        assert_eq!(days_in_arrears_score(31), 40.0);
        assert_eq!(days_in_arrears_score(8), 60.0);
        assert_eq!(days_in_arrears_score(7), 80.0);
        assert_eq!(days_in_arrears_score(1), 80.0);
        assert_eq!(days_in_arrears_score(0), 100.0);
    }

    #[test]
    fn debt_to_income_without_income_is_maxed() {
        assert_eq!(debt_to_income_ratio(1_000.0, 0.0), 100.0);
        assert_eq!(debt_to_income_score(100.0), 0.0);
        assert_eq!(debt_to_income_ratio(500.0, 1_000.0), 50.0);
        assert_eq!(debt_to_income_score(250.0), 0.0);
    }

    #[test]
    fn composite_of_perfect_sub_scores_is_100() {
        let perfect = SubScores {
            payment_history: 100.0,
            debt_to_income: 100.0,
            loan_amount: 100.0,
            guarantor: 100.0,
            arrears: 100.0,
        };
        assert_eq!(round2(perfect.composite(&ScoringWeights::STANDARD)), 100.0);
    }

    #[test]
    fn round2_rounds_half_up() {
        assert_eq!(round2(59.994), 59.99);
        assert_eq!(round2(59.995000001), 60.0);
        assert_eq!(round2(12.0), 12.0);
    }
}
