use std::env;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sacco_risk_api::db::Database;
use sacco_risk_api::ledger::LedgerService;
use sacco_risk_api::models::*;
use sacco_risk_api::pg_store::PgRecordStore;
use sacco_risk_api::scoring::RiskScorer;
use sacco_risk_api::errors::AppError;
use sacco_risk_api::store::{LoanFilter, RecordStore, RepaymentFilter, StoreError};
use std::str::FromStr;
use uuid::Uuid;

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

async fn connect() -> anyhow::Result<Arc<PgRecordStore>> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url, 5).await?;
    db.migrate().await?;
    Ok(Arc::new(PgRecordStore::new(db.pool)))
}

// Unique identifiers so repeated runs do not collide.
fn new_client(suffix: &str) -> NewClient {
    NewClient {
        member_number: format!("T-{}", &suffix[..12]),
        first_name: "Smoke".to_string(),
        last_name: "Test".to_string(),
        email: None,
        phone: "+254712345678".to_string(),
        national_id: format!("T{}", &suffix[..12]),
        date_of_birth: NaiveDate::from_ymd_opt(1988, 8, 8).unwrap(),
        address: None,
        employer: None,
        monthly_income: dec("50000"),
        status: ClientStatus::Active,
        joined_date: NaiveDate::from_ymd_opt(2021, 5, 1).unwrap(),
    }
}

async fn seed(store: &PgRecordStore) -> anyhow::Result<(Client, Loan)> {
    let suffix = Uuid::new_v4().simple().to_string();
    let client = store.insert_client(new_client(&suffix)).await?;

    let loan = store
        .insert_loan(NewLoan {
            client_id: client.id,
            loan_number: format!("LN-T{}", &suffix[..10]),
            loan_product: "development".to_string(),
            principal_amount: dec("10000"),
            interest_rate: dec("10"),
            loan_term_months: 12,
            disbursement_date: Some(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()),
            maturity_date: Some(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()),
            purpose: None,
            status: LoanStatus::Active,
            outstanding_balance: dec("10000"),
            total_paid: dec("0"),
            arrears_amount: dec("0"),
            days_in_arrears: 0,
        })
        .await?;

    Ok((client, loan))
}

/// Ledger and scorer against PostgreSQL.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn ledger_and_scoring_smoke_test() -> anyhow::Result<()> {
    let store = connect().await?;
    let (client, loan) = seed(&store).await?;

    let ledger = LedgerService::new(store.clone(), 3);
    let receipt = ledger
        .record_payment(
            loan.id,
            RecordPaymentRequest {
                amount: dec("500"),
                transaction_date: None,
                payment_method: PaymentMethod::BankTransfer,
                receipt_number: Some("SMOKE-1".to_string()),
                recorded_by: None,
                notes: None,
            },
        )
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    assert_eq!(receipt.repayment.interest_amount, dec("50"));
    assert_eq!(receipt.repayment.principal_amount, dec("450"));
    assert_eq!(receipt.loan.outstanding_balance, dec("9500"));
    assert_eq!(receipt.loan.version, loan.version + 1);

    let stale = store
        .commit_repayment(loan.version, &receipt.loan, NewRepayment {
            loan_id: loan.id,
            transaction_date: receipt.repayment.transaction_date,
            amount: dec("1"),
            principal_amount: dec("0.9"),
            interest_amount: dec("0.1"),
            payment_method: PaymentMethod::Cash,
            receipt_number: None,
            recorded_by: None,
            notes: None,
        })
        .await?;
    assert!(stale.is_none(), "stale version must not commit");

    let repayments = store
        .list_repayments(&RepaymentFilter::for_loans(vec![loan.id]))
        .await?;
    assert_eq!(repayments.len(), 1);

    let scorer = RiskScorer::new(store.clone());
    let scored = scorer
        .score(client.id, Some(loan.id))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let current = scorer
        .current_score(loan.id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(current.id, scored.id);
    assert_eq!(current.factors, scored.factors);

    let loans = store.list_loans(&LoanFilter::for_client(client.id)).await?;
    assert_eq!(loans.len(), 1);

    Ok(())
}

#[tokio::test]
#[ignore]
async fn scoring_an_unknown_loan_id_falls_back_and_is_stored() -> anyhow::Result<()> {
    let store = connect().await?;
    let (client, _) = seed(&store).await?;
    let missing_loan = Uuid::new_v4();

    let scorer = RiskScorer::new(store.clone());
    let scored = scorer
        .score(client.id, Some(missing_loan))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    assert_eq!(scored.loan_id, Some(missing_loan));
    assert_eq!(scored.loan_amount_score, 100.0);
    assert_eq!(scored.guarantor_score, 0.0);
    assert_eq!(scored.days_in_arrears_score, 100.0);

    let current = scorer
        .current_score(missing_loan)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(current.id, scored.id);

    Ok(())
}

#[tokio::test]
#[ignore]
async fn duplicate_client_identifiers_are_reported_as_duplicates() -> anyhow::Result<()> {
    let store = connect().await?;
    let suffix = Uuid::new_v4().simple().to_string();
    store.insert_client(new_client(&suffix)).await?;

    let same_member = store.insert_client(new_client(&suffix)).await;
    assert!(
        matches!(&same_member, Err(StoreError::Duplicate(msg)) if msg.starts_with("member_number")),
        "{:?}",
        same_member
    );

    let mut same_national_id = new_client(&Uuid::new_v4().simple().to_string());
    same_national_id.national_id = format!("T{}", &suffix[..12]);
    let err = store.insert_client(same_national_id).await.unwrap_err();
    assert!(matches!(&err, StoreError::Duplicate(msg) if msg.starts_with("national_id")));
    assert!(matches!(AppError::from(err), AppError::Conflict(_)));

    Ok(())
}
