use crate::models::*;
use crate::store::{LoanFilter, RecordStore, RepaymentFilter, StoreError, StoreResult};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

/// PostgreSQL implementation of [`RecordStore`].
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_enum<T: FromStr<Err = String>>(value: &str, table: &str, id: Uuid) -> StoreResult<T> {
    value
        .parse()
        .map_err(|e: String| StoreError::Corrupt(format!("{} {}: {}", table, id, e)))
}

// Rows keep enumerations as TEXT; they are checked when mapped into records.

#[derive(Debug, FromRow)]
struct ClientRow {
    id: Uuid,
    member_number: String,
    first_name: String,
    last_name: String,
    email: Option<String>,
    phone: String,
    national_id: String,
    date_of_birth: NaiveDate,
    address: Option<String>,
    employer: Option<String>,
    monthly_income: BigDecimal,
    status: String,
    joined_date: NaiveDate,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ClientRow> for Client {
    type Error = StoreError;

    fn try_from(row: ClientRow) -> StoreResult<Self> {
        Ok(Client {
            status: parse_enum(&row.status, "client", row.id)?,
            id: row.id,
            member_number: row.member_number,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            phone: row.phone,
            national_id: row.national_id,
            date_of_birth: row.date_of_birth,
            address: row.address,
            employer: row.employer,
            monthly_income: row.monthly_income,
            joined_date: row.joined_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct LoanRow {
    id: Uuid,
    client_id: Uuid,
    loan_number: String,
    loan_product: String,
    principal_amount: BigDecimal,
    interest_rate: BigDecimal,
    loan_term_months: i32,
    disbursement_date: Option<NaiveDate>,
    maturity_date: Option<NaiveDate>,
    purpose: Option<String>,
    status: String,
    outstanding_balance: BigDecimal,
    total_paid: BigDecimal,
    arrears_amount: BigDecimal,
    days_in_arrears: i32,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LoanRow> for Loan {
    type Error = StoreError;

    fn try_from(row: LoanRow) -> StoreResult<Self> {
        Ok(Loan {
            status: parse_enum(&row.status, "loan", row.id)?,
            id: row.id,
            client_id: row.client_id,
            loan_number: row.loan_number,
            loan_product: row.loan_product,
            principal_amount: row.principal_amount,
            interest_rate: row.interest_rate,
            loan_term_months: row.loan_term_months,
            disbursement_date: row.disbursement_date,
            maturity_date: row.maturity_date,
            purpose: row.purpose,
            outstanding_balance: row.outstanding_balance,
            total_paid: row.total_paid,
            arrears_amount: row.arrears_amount,
            days_in_arrears: row.days_in_arrears,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RepaymentRow {
    id: Uuid,
    loan_id: Uuid,
    transaction_date: NaiveDate,
    amount: BigDecimal,
    principal_amount: BigDecimal,
    interest_amount: BigDecimal,
    payment_method: String,
    receipt_number: Option<String>,
    recorded_by: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RepaymentRow> for Repayment {
    type Error = StoreError;

    fn try_from(row: RepaymentRow) -> StoreResult<Self> {
        Ok(Repayment {
            payment_method: parse_enum(&row.payment_method, "repayment", row.id)?,
            id: row.id,
            loan_id: row.loan_id,
            transaction_date: row.transaction_date,
            amount: row.amount,
            principal_amount: row.principal_amount,
            interest_amount: row.interest_amount,
            receipt_number: row.receipt_number,
            recorded_by: row.recorded_by,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct GuarantorRow {
    id: Uuid,
    loan_id: Uuid,
    guarantor_client_id: Option<Uuid>,
    guarantor_name: String,
    guarantor_phone: String,
    guarantor_relationship: Option<String>,
    guaranteed_amount: BigDecimal,
    created_at: DateTime<Utc>,
}

impl From<GuarantorRow> for Guarantor {
    fn from(row: GuarantorRow) -> Self {
        Guarantor {
            id: row.id,
            loan_id: row.loan_id,
            guarantor_client_id: row.guarantor_client_id,
            guarantor_name: row.guarantor_name,
            guarantor_phone: row.guarantor_phone,
            guarantor_relationship: row.guarantor_relationship,
            guaranteed_amount: row.guaranteed_amount,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct RiskScoreRow {
    id: Uuid,
    client_id: Uuid,
    loan_id: Option<Uuid>,
    score: f64,
    risk_category: String,
    payment_history_score: f64,
    debt_to_income_ratio: f64,
    loan_amount_score: f64,
    guarantor_score: f64,
    days_in_arrears_score: f64,
    calculated_at: DateTime<Utc>,
    factors: Json<RiskFactors>,
}

impl TryFrom<RiskScoreRow> for RiskScore {
    type Error = StoreError;

    fn try_from(row: RiskScoreRow) -> StoreResult<Self> {
        Ok(RiskScore {
            risk_category: parse_enum(&row.risk_category, "risk_score", row.id)?,
            id: row.id,
            client_id: row.client_id,
            loan_id: row.loan_id,
            score: row.score,
            payment_history_score: row.payment_history_score,
            debt_to_income_ratio: row.debt_to_income_ratio,
            loan_amount_score: row.loan_amount_score,
            guarantor_score: row.guarantor_score,
            days_in_arrears_score: row.days_in_arrears_score,
            calculated_at: row.calculated_at,
            factors: row.factors.0,
        })
    }
}

const CLIENT_COLUMNS: &str = "id, member_number, first_name, last_name, email, phone, \
     national_id, date_of_birth, address, employer, monthly_income, status, joined_date, \
     created_at, updated_at";

const LOAN_COLUMNS: &str = "id, client_id, loan_number, loan_product, principal_amount, \
     interest_rate, loan_term_months, disbursement_date, maturity_date, purpose, status, \
     outstanding_balance, total_paid, arrears_amount, days_in_arrears, version, created_at, \
     updated_at";

const REPAYMENT_COLUMNS: &str = "id, loan_id, transaction_date, amount, principal_amount, \
     interest_amount, payment_method, receipt_number, recorded_by, notes, created_at";

const GUARANTOR_COLUMNS: &str = "id, loan_id, guarantor_client_id, guarantor_name, \
     guarantor_phone, guarantor_relationship, guaranteed_amount, created_at";

const RISK_SCORE_COLUMNS: &str = "id, client_id, loan_id, score, risk_category, \
     payment_history_score, debt_to_income_ratio, loan_amount_score, guarantor_score, \
     days_in_arrears_score, calculated_at, factors";

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn get_client(&self, id: Uuid) -> StoreResult<Option<Client>> {
        let row = sqlx::query_as::<_, ClientRow>(&format!(
            "SELECT {} FROM clients WHERE id = $1",
            CLIENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Client::try_from).transpose()
    }

    async fn insert_client(&self, client: NewClient) -> StoreResult<Client> {
        let row = sqlx::query_as::<_, ClientRow>(&format!(
            r#"
            INSERT INTO clients (
                member_number, first_name, last_name, email, phone, national_id,
                date_of_birth, address, employer, monthly_income, status, joined_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            CLIENT_COLUMNS
        ))
        .bind(&client.member_number)
        .bind(&client.first_name)
        .bind(&client.last_name)
        .bind(&client.email)
        .bind(&client.phone)
        .bind(&client.national_id)
        .bind(client.date_of_birth)
        .bind(&client.address)
        .bind(&client.employer)
        .bind(&client.monthly_income)
        .bind(client.status.as_str())
        .bind(client.joined_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match StoreError::from(e) {
            StoreError::Duplicate(constraint) if constraint.contains("national_id") => {
                StoreError::duplicate_client("national_id", &client.national_id)
            }
            StoreError::Duplicate(_) => {
                StoreError::duplicate_client("member_number", &client.member_number)
            }
            other => other,
        })?;

        Client::try_from(row)
    }

    async fn count_clients(&self) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM clients")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn get_loan(&self, id: Uuid) -> StoreResult<Option<Loan>> {
        let row = sqlx::query_as::<_, LoanRow>(&format!(
            "SELECT {} FROM loans WHERE id = $1",
            LOAN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Loan::try_from).transpose()
    }

    async fn list_loans(&self, filter: &LoanFilter) -> StoreResult<Vec<Loan>> {
        let order = if filter.in_arrears {
            "days_in_arrears DESC, created_at DESC"
        } else {
            "created_at DESC"
        };
        let rows = sqlx::query_as::<_, LoanRow>(&format!(
            r#"
            SELECT {} FROM loans
            WHERE ($1::uuid IS NULL OR client_id = $1)
              AND ($2::text IS NULL OR status = $2)
              AND (NOT $3 OR days_in_arrears > 0)
            ORDER BY {}
            "#,
            LOAN_COLUMNS, order
        ))
        .bind(filter.client_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.in_arrears)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Loan::try_from).collect()
    }

    async fn insert_loan(&self, loan: NewLoan) -> StoreResult<Loan> {
        let row = sqlx::query_as::<_, LoanRow>(&format!(
            r#"
            INSERT INTO loans (
                client_id, loan_number, loan_product, principal_amount, interest_rate,
                loan_term_months, disbursement_date, maturity_date, purpose, status,
                outstanding_balance, total_paid, arrears_amount, days_in_arrears
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {}
            "#,
            LOAN_COLUMNS
        ))
        .bind(loan.client_id)
        .bind(&loan.loan_number)
        .bind(&loan.loan_product)
        .bind(&loan.principal_amount)
        .bind(&loan.interest_rate)
        .bind(loan.loan_term_months)
        .bind(loan.disbursement_date)
        .bind(loan.maturity_date)
        .bind(&loan.purpose)
        .bind(loan.status.as_str())
        .bind(&loan.outstanding_balance)
        .bind(&loan.total_paid)
        .bind(&loan.arrears_amount)
        .bind(loan.days_in_arrears)
        .fetch_one(&self.pool)
        .await?;

        Loan::try_from(row)
    }

    async fn list_repayments(&self, filter: &RepaymentFilter) -> StoreResult<Vec<Repayment>> {
        let rows = sqlx::query_as::<_, RepaymentRow>(&format!(
            r#"
            SELECT {} FROM repayments
            WHERE ($1::uuid[] IS NULL OR loan_id = ANY($1))
              AND ($2::date IS NULL OR transaction_date >= $2)
            ORDER BY transaction_date DESC, seq DESC
            LIMIT $3
            "#,
            REPAYMENT_COLUMNS
        ))
        .bind(filter.loan_ids.as_deref())
        .bind(filter.since)
        .bind(filter.limit.map(|l| l.max(0)))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Repayment::try_from).collect()
    }

    async fn list_guarantors(&self, loan_id: Uuid) -> StoreResult<Vec<Guarantor>> {
        let rows = sqlx::query_as::<_, GuarantorRow>(&format!(
            "SELECT {} FROM guarantors WHERE loan_id = $1 ORDER BY created_at",
            GUARANTOR_COLUMNS
        ))
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Guarantor::from).collect())
    }

    async fn insert_guarantor(&self, guarantor: NewGuarantor) -> StoreResult<Guarantor> {
        let row = sqlx::query_as::<_, GuarantorRow>(&format!(
            r#"
            INSERT INTO guarantors (
                loan_id, guarantor_client_id, guarantor_name, guarantor_phone,
                guarantor_relationship, guaranteed_amount
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            GUARANTOR_COLUMNS
        ))
        .bind(guarantor.loan_id)
        .bind(guarantor.guarantor_client_id)
        .bind(&guarantor.guarantor_name)
        .bind(&guarantor.guarantor_phone)
        .bind(&guarantor.guarantor_relationship)
        .bind(&guarantor.guaranteed_amount)
        .fetch_one(&self.pool)
        .await?;

        Ok(Guarantor::from(row))
    }

    async fn commit_repayment(
        &self,
        expected_version: i64,
        loan: &Loan,
        repayment: NewRepayment,
    ) -> StoreResult<Option<(Loan, Repayment)>> {
        let mut tx = self.pool.begin().await?;

        // Compare-and-swap on version: zero rows means another writer won.
        let updated = sqlx::query_as::<_, LoanRow>(&format!(
            r#"
            UPDATE loans
            SET outstanding_balance = $3,
                total_paid = $4,
                arrears_amount = $5,
                days_in_arrears = $6,
                status = $7,
                version = version + 1,
                updated_at = now()
            WHERE id = $1 AND version = $2
            RETURNING {}
            "#,
            LOAN_COLUMNS
        ))
        .bind(loan.id)
        .bind(expected_version)
        .bind(&loan.outstanding_balance)
        .bind(&loan.total_paid)
        .bind(&loan.arrears_amount)
        .bind(loan.days_in_arrears)
        .bind(loan.status.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(updated) = updated else {
            tx.rollback().await?;
            return Ok(None);
        };

        let entry = sqlx::query_as::<_, RepaymentRow>(&format!(
            r#"
            INSERT INTO repayments (
                loan_id, transaction_date, amount, principal_amount, interest_amount,
                payment_method, receipt_number, recorded_by, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            REPAYMENT_COLUMNS
        ))
        .bind(repayment.loan_id)
        .bind(repayment.transaction_date)
        .bind(&repayment.amount)
        .bind(&repayment.principal_amount)
        .bind(&repayment.interest_amount)
        .bind(repayment.payment_method.as_str())
        .bind(&repayment.receipt_number)
        .bind(&repayment.recorded_by)
        .bind(&repayment.notes)
        .fetch_one(&mut *tx)
        .await?;

        let loan = Loan::try_from(updated)?;
        let entry = Repayment::try_from(entry)?;
        tx.commit().await?;

        Ok(Some((loan, entry)))
    }

    async fn insert_risk_score(&self, score: NewRiskScore) -> StoreResult<RiskScore> {
        let row = sqlx::query_as::<_, RiskScoreRow>(&format!(
            r#"
            INSERT INTO risk_scores (
                client_id, loan_id, score, risk_category, payment_history_score,
                debt_to_income_ratio, loan_amount_score, guarantor_score,
                days_in_arrears_score, calculated_at, factors
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            RISK_SCORE_COLUMNS
        ))
        .bind(score.client_id)
        .bind(score.loan_id)
        .bind(score.score)
        .bind(score.risk_category.as_str())
        .bind(score.payment_history_score)
        .bind(score.debt_to_income_ratio)
        .bind(score.loan_amount_score)
        .bind(score.guarantor_score)
        .bind(score.days_in_arrears_score)
        .bind(score.calculated_at)
        .bind(Json(&score.factors))
        .fetch_one(&self.pool)
        .await?;

        RiskScore::try_from(row)
    }

    async fn latest_risk_score(&self, loan_id: Uuid) -> StoreResult<Option<RiskScore>> {
        let row = sqlx::query_as::<_, RiskScoreRow>(&format!(
            r#"
            SELECT {} FROM risk_scores
            WHERE loan_id = $1
            ORDER BY calculated_at DESC, seq DESC
            LIMIT 1
            "#,
            RISK_SCORE_COLUMNS
        ))
        .bind(loan_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RiskScore::try_from).transpose()
    }

    async fn list_risk_scores(&self, client_id: Uuid) -> StoreResult<Vec<RiskScore>> {
        let rows = sqlx::query_as::<_, RiskScoreRow>(&format!(
            r#"
            SELECT {} FROM risk_scores
            WHERE client_id = $1
            ORDER BY calculated_at DESC, seq DESC
            "#,
            RISK_SCORE_COLUMNS
        ))
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RiskScore::try_from).collect()
    }
}
