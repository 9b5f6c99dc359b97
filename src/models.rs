use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Declares a unit-only enum stored as `snake_case` text, with `as_str`,
/// `Display` and `FromStr` implementations.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Text form used on the wire and in the database.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    )),
                }
            }
        }
    };
}

// ============ Enumerations ============

text_enum! {
    /// Membership status of a client.
    pub enum ClientStatus {
        Active => "active",
        Inactive => "inactive",
        Suspended => "suspended",
    }
}

text_enum! {
    /// Lifecycle status of a loan. Transitions only move forward.
    pub enum LoanStatus {
        Pending => "pending",
        Approved => "approved",
        Active => "active",
        Closed => "closed",
        WrittenOff => "written_off",
    }
}

impl LoanStatus {
    fn rank(&self) -> u8 {
        match self {
            LoanStatus::Pending => 0,
            LoanStatus::Approved => 1,
            LoanStatus::Active => 2,
            LoanStatus::Closed | LoanStatus::WrittenOff => 3,
        }
    }

    /// Whether the loan may move from `self` to `next`.
    ///
    /// Staying in the same status is allowed. Terminal statuses never change.
    pub fn can_transition_to(&self, next: LoanStatus) -> bool {
        if *self == next {
            return true;
        }
        self.rank() < 3 && next.rank() > self.rank()
    }
}

text_enum! {
    /// How a repayment was received.
    pub enum PaymentMethod {
        Cash => "cash",
        BankTransfer => "bank_transfer",
        MobileMoney => "mobile_money",
        SalaryDeduction => "salary_deduction",
    }
}

impl Default for PaymentMethod {
    fn default() -> Self {
        PaymentMethod::Cash
    }
}

text_enum! {
    /// Risk classification derived from the composite score.
    pub enum RiskCategory {
        Low => "low",
        Medium => "medium",
        High => "high",
        VeryHigh => "very_high",
    }
}

impl RiskCategory {
    /// Classifies a composite score. Each threshold is exclusive on the lower
    /// bound, so exactly 75 is `Low` and exactly 40 is `High`.
    pub fn from_score(score: f64) -> Self {
        if score < 40.0 {
            RiskCategory::VeryHigh
        } else if score < 60.0 {
            RiskCategory::High
        } else if score < 75.0 {
            RiskCategory::Medium
        } else {
            RiskCategory::Low
        }
    }
}

text_enum! {
    /// Status of a single installment in a repayment schedule.
    pub enum ScheduleStatus {
        Pending => "pending",
        Paid => "paid",
        Overdue => "overdue",
        Partial => "partial",
    }
}

text_enum! {
    /// Severity band of a loan in arrears, by days overdue.
    pub enum ArrearsBucket {
        Moderate => "moderate",
        High => "high",
        Severe => "severe",
        Critical => "critical",
    }
}

impl ArrearsBucket {
    pub fn from_days(days_in_arrears: i32) -> Self {
        match days_in_arrears {
            d if d > 90 => ArrearsBucket::Critical,
            d if d > 60 => ArrearsBucket::Severe,
            d if d > 30 => ArrearsBucket::High,
            _ => ArrearsBucket::Moderate,
        }
    }
}

// ============ Records ============

/// A SACCO member who can borrow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Client {
    pub id: Uuid,
    /// Cooperative membership number.
    pub member_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    /// Phone number in E.164 form.
    pub phone: String,
    pub national_id: String,
    pub date_of_birth: NaiveDate,
    pub address: Option<String>,
    pub employer: Option<String>,
    /// Declared monthly income, never negative.
    pub monthly_income: BigDecimal,
    pub status: ClientStatus,
    pub joined_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Client {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Fields required to insert a client. The store assigns `id` and timestamps.
#[derive(Debug, Clone)]
pub struct NewClient {
    pub member_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: String,
    pub national_id: String,
    pub date_of_birth: NaiveDate,
    pub address: Option<String>,
    pub employer: Option<String>,
    pub monthly_income: BigDecimal,
    pub status: ClientStatus,
    pub joined_date: NaiveDate,
}

/// A loan disbursed to exactly one client, with its running ledger balances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Loan {
    pub id: Uuid,
    pub client_id: Uuid,
    /// Human-facing reference, e.g. `LN-1718000000000`.
    pub loan_number: String,
    pub loan_product: String,
    /// Amount disbursed. Fixed for the life of the loan.
    pub principal_amount: BigDecimal,
    /// Interest rate in percent.
    pub interest_rate: BigDecimal,
    pub loan_term_months: i32,
    pub disbursement_date: Option<NaiveDate>,
    pub maturity_date: Option<NaiveDate>,
    pub purpose: Option<String>,
    pub status: LoanStatus,
    /// Remaining balance, within `[0, principal_amount]`.
    pub outstanding_balance: BigDecimal,
    pub total_paid: BigDecimal,
    pub arrears_amount: BigDecimal,
    pub days_in_arrears: i32,
    /// Optimistic concurrency counter, bumped on every ledger write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a loan.
#[derive(Debug, Clone)]
pub struct NewLoan {
    pub client_id: Uuid,
    pub loan_number: String,
    pub loan_product: String,
    pub principal_amount: BigDecimal,
    pub interest_rate: BigDecimal,
    pub loan_term_months: i32,
    pub disbursement_date: Option<NaiveDate>,
    pub maturity_date: Option<NaiveDate>,
    pub purpose: Option<String>,
    pub status: LoanStatus,
    pub outstanding_balance: BigDecimal,
    pub total_paid: BigDecimal,
    pub arrears_amount: BigDecimal,
    pub days_in_arrears: i32,
}

/// Append-only ledger entry for one payment event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Repayment {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub transaction_date: NaiveDate,
    /// Total received; always `principal_amount + interest_amount`.
    pub amount: BigDecimal,
    pub principal_amount: BigDecimal,
    pub interest_amount: BigDecimal,
    pub payment_method: PaymentMethod,
    pub receipt_number: Option<String>,
    pub recorded_by: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRepayment {
    pub loan_id: Uuid,
    pub transaction_date: NaiveDate,
    pub amount: BigDecimal,
    pub principal_amount: BigDecimal,
    pub interest_amount: BigDecimal,
    pub payment_method: PaymentMethod,
    pub receipt_number: Option<String>,
    pub recorded_by: Option<String>,
    pub notes: Option<String>,
}

/// A person guaranteeing part of a loan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Guarantor {
    pub id: Uuid,
    pub loan_id: Uuid,
    /// Set when the guarantor is also a member.
    pub guarantor_client_id: Option<Uuid>,
    pub guarantor_name: String,
    pub guarantor_phone: String,
    pub guarantor_relationship: Option<String>,
    pub guaranteed_amount: BigDecimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewGuarantor {
    pub loan_id: Uuid,
    pub guarantor_client_id: Option<Uuid>,
    pub guarantor_name: String,
    pub guarantor_phone: String,
    pub guarantor_relationship: Option<String>,
    pub guaranteed_amount: BigDecimal,
}

/// Audit payload stored with every risk score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RiskFactors {
    pub total_loans: usize,
    pub active_loans: usize,
    pub closed_loans: usize,
    pub total_outstanding: f64,
    pub monthly_income: f64,
    pub guarantor_count: usize,
}

/// One row of the append-only risk score history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskScore {
    pub id: Uuid,
    pub client_id: Uuid,
    pub loan_id: Option<Uuid>,
    pub score: f64,
    pub risk_category: RiskCategory,
    pub payment_history_score: f64,
    pub debt_to_income_ratio: f64,
    pub loan_amount_score: f64,
    pub guarantor_score: f64,
    pub days_in_arrears_score: f64,
    pub calculated_at: DateTime<Utc>,
    pub factors: RiskFactors,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRiskScore {
    pub client_id: Uuid,
    pub loan_id: Option<Uuid>,
    pub score: f64,
    pub risk_category: RiskCategory,
    pub payment_history_score: f64,
    pub debt_to_income_ratio: f64,
    pub loan_amount_score: f64,
    pub guarantor_score: f64,
    pub days_in_arrears_score: f64,
    pub calculated_at: DateTime<Utc>,
    pub factors: RiskFactors,
}

/// Installment of an amortization schedule.
///
/// The table exists but nothing in this service generates schedules yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoanSchedule {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub installment_number: i32,
    pub due_date: NaiveDate,
    pub principal_due: BigDecimal,
    pub interest_due: BigDecimal,
    pub total_due: BigDecimal,
    pub principal_paid: BigDecimal,
    pub interest_paid: BigDecimal,
    pub total_paid: BigDecimal,
    pub status: ScheduleStatus,
}

// ============ API Request/Response Models ============

/// Body of the risk scoring boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskScoreRequest {
    pub client_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loan_id: Option<Uuid>,
}

/// Response of the risk scoring boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RiskScoreResult {
    pub score: f64,
    pub risk_category: RiskCategory,
    pub payment_history_score: f64,
    pub debt_to_income_ratio: f64,
    pub loan_amount_score: f64,
    pub guarantor_score: f64,
    pub days_in_arrears_score: f64,
    pub factors: RiskFactors,
}

impl From<&RiskScore> for RiskScoreResult {
    fn from(row: &RiskScore) -> Self {
        Self {
            score: row.score,
            risk_category: row.risk_category,
            payment_history_score: row.payment_history_score,
            debt_to_income_ratio: row.debt_to_income_ratio,
            loan_amount_score: row.loan_amount_score,
            guarantor_score: row.guarantor_score,
            days_in_arrears_score: row.days_in_arrears_score,
            factors: row.factors.clone(),
        }
    }
}

/// Request body for recording a payment against a loan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPaymentRequest {
    pub amount: BigDecimal,
    #[serde(default)]
    pub transaction_date: Option<NaiveDate>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub receipt_number: Option<String>,
    #[serde(default)]
    pub recorded_by: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Outcome of a recorded payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub loan: Loan,
    pub repayment: Repayment,
}

/// Request body for registering a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterClientRequest {
    pub member_number: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub phone: String,
    pub national_id: String,
    pub date_of_birth: NaiveDate,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub employer: Option<String>,
    pub monthly_income: BigDecimal,
    #[serde(default)]
    pub joined_date: Option<NaiveDate>,
}

/// Request body for disbursing a new loan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisburseLoanRequest {
    pub client_id: Uuid,
    pub loan_product: String,
    pub principal_amount: BigDecimal,
    pub interest_rate: BigDecimal,
    pub loan_term_months: i32,
    #[serde(default)]
    pub purpose: Option<String>,
}

/// A freshly disbursed loan together with its initial risk score.
///
/// `risk_score` is `None` when the loan was stored but scoring failed; the
/// score can be requested again through the scoring endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisbursedLoan {
    pub loan: Loan,
    pub risk_score: Option<RiskScoreResult>,
}

/// Request body for attaching a guarantor to a loan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddGuarantorRequest {
    #[serde(default)]
    pub guarantor_client_id: Option<Uuid>,
    pub guarantor_name: String,
    pub guarantor_phone: String,
    #[serde(default)]
    pub guarantor_relationship: Option<String>,
    pub guaranteed_amount: BigDecimal,
}

/// Query parameters for listing loans.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoanQueryParams {
    pub status: Option<LoanStatus>,
    pub client_id: Option<Uuid>,
}

/// Query parameters for listing ledger entries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepaymentQueryParams {
    pub limit: Option<i64>,
}
