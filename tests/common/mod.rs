//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sacco_risk_api::config::Config;
use sacco_risk_api::memory_store::MemoryRecordStore;
use sacco_risk_api::models::*;
use sacco_risk_api::store::RecordStore;
use std::str::FromStr;
use uuid::Uuid;

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

pub fn test_config() -> Config {
    Config::default()
}

pub async fn seed_client(store: &MemoryRecordStore, monthly_income: &str) -> Client {
    seed_client_with_status(store, monthly_income, ClientStatus::Active).await
}

pub async fn seed_client_with_status(
    store: &MemoryRecordStore,
    monthly_income: &str,
    status: ClientStatus,
) -> Client {
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    store
        .insert_client(NewClient {
            member_number: format!("M-{}", suffix),
            first_name: "Wanjiku".to_string(),
            last_name: "Kamau".to_string(),
            email: None,
            phone: "+254712345678".to_string(),
            national_id: format!("ID-{}", suffix),
            date_of_birth: NaiveDate::from_ymd_opt(1985, 6, 1).unwrap(),
            address: None,
            employer: Some("Kenya Power".to_string()),
            monthly_income: dec(monthly_income),
            status,
            joined_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
        })
        .await
        .unwrap()
}

/// Inserts an active loan with no payments yet.
pub async fn seed_loan(
    store: &MemoryRecordStore,
    client_id: Uuid,
    principal: &str,
    interest_rate: &str,
) -> Loan {
    seed_loan_with_balance(store, client_id, principal, interest_rate, principal).await
}

pub async fn seed_loan_with_balance(
    store: &MemoryRecordStore,
    client_id: Uuid,
    principal: &str,
    interest_rate: &str,
    outstanding: &str,
) -> Loan {
    store
        .insert_loan(NewLoan {
            client_id,
            loan_number: format!("LN-{}", Uuid::new_v4().as_u128() % 1_000_000_000),
            loan_product: "development".to_string(),
            principal_amount: dec(principal),
            interest_rate: dec(interest_rate),
            loan_term_months: 12,
            disbursement_date: Some(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()),
            maturity_date: Some(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()),
            purpose: None,
            status: LoanStatus::Active,
            outstanding_balance: dec(outstanding),
            total_paid: dec(principal) - dec(outstanding),
            arrears_amount: dec("0"),
            days_in_arrears: 0,
        })
        .await
        .unwrap()
}

pub async fn seed_guarantor(store: &MemoryRecordStore, loan_id: Uuid) -> Guarantor {
    store
        .insert_guarantor(NewGuarantor {
            loan_id,
            guarantor_client_id: None,
            guarantor_name: "Otieno Odhiambo".to_string(),
            guarantor_phone: "+254722000111".to_string(),
            guarantor_relationship: Some("colleague".to_string()),
            guaranteed_amount: dec("2500"),
        })
        .await
        .unwrap()
}

pub fn payment(amount: &str) -> RecordPaymentRequest {
    RecordPaymentRequest {
        amount: dec(amount),
        transaction_date: None,
        payment_method: PaymentMethod::MobileMoney,
        receipt_number: None,
        recorded_by: Some("teller-1".to_string()),
        notes: None,
    }
}

pub fn payment_on(amount: &str, date: NaiveDate) -> RecordPaymentRequest {
    RecordPaymentRequest {
        transaction_date: Some(date),
        ..payment(amount)
    }
}
