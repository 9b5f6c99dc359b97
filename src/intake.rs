//! Client intake: validation and normalization of member registrations.
//!
//! Phone numbers are parsed with `phonenumber` (a port of Google's
//! libphonenumber) using Kenya as the default region, and stored in E.164
//! form. Numbers given with a `+` country prefix are accepted from any region.

use crate::errors::{AppError, ResultExt};
use crate::models::{Client, ClientStatus, NewClient, RegisterClientRequest};
use crate::store::RecordStore;
use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::OnceLock;

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        // RFC 5322 simplified: local@domain.tld
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
        )
        .expect("static email regex compiles")
    })
}

/// Validate email format.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    if !email_regex().is_match(email) {
        tracing::warn!("Invalid email format: {}", email);
        return false;
    }

    true
}

/// Validate and normalize a phone number to E.164 (`+254712345678`).
pub fn normalize_phone(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.len() < 8 {
        return Err(AppError::Validation(format!(
            "Phone number '{}' is too short",
            raw
        )));
    }

    match phonenumber::parse(Some(CountryId::KE), trimmed) {
        Ok(number) if phonenumber::is_valid(&number) => {
            let formatted = number.format().mode(Mode::E164).to_string();
            tracing::debug!("Valid phone: {} -> {}", raw, formatted);
            Ok(formatted)
        }
        Ok(_) => Err(AppError::Validation(format!(
            "Phone number '{}' is not valid",
            raw
        ))),
        Err(e) => Err(AppError::Validation(format!(
            "Phone number '{}' could not be parsed: {:?}",
            raw, e
        ))),
    }
}

fn required(field: &str, value: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Checks a registration request and turns it into an insertable client.
pub fn validate_registration(req: RegisterClientRequest) -> Result<NewClient, AppError> {
    let member_number = required("member_number", &req.member_number)?;
    let first_name = required("first_name", &req.first_name)?;
    let last_name = required("last_name", &req.last_name)?;
    let national_id = required("national_id", &req.national_id)?;
    let phone = normalize_phone(&required("phone", &req.phone)?)?;

    let email = optional(req.email).map(|e| e.to_lowercase());
    if let Some(ref e) = email {
        if !is_valid_email(e) {
            return Err(AppError::Validation(format!("Email '{}' is not valid", e)));
        }
    }

    if req.monthly_income < BigDecimal::zero() {
        return Err(AppError::Validation(
            "monthly_income cannot be negative".to_string(),
        ));
    }

    let today = Utc::now().date_naive();
    if req.date_of_birth >= today {
        return Err(AppError::Validation(
            "date_of_birth must be in the past".to_string(),
        ));
    }

    Ok(NewClient {
        member_number,
        first_name,
        last_name,
        email,
        phone,
        national_id,
        date_of_birth: req.date_of_birth,
        address: optional(req.address),
        employer: optional(req.employer),
        monthly_income: req.monthly_income,
        status: ClientStatus::Active,
        joined_date: req.joined_date.unwrap_or(today),
    })
}

/// Validates and stores a new member.
pub async fn register_client(
    store: &dyn RecordStore,
    req: RegisterClientRequest,
) -> Result<Client, AppError> {
    let new_client = validate_registration(req)?;
    let client = store
        .insert_client(new_client)
        .await
        .context("registering client")?;

    tracing::info!(
        "Registered client {} ({})",
        client.member_number,
        client.id
    );
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn request() -> RegisterClientRequest {
        RegisterClientRequest {
            member_number: " M-0042 ".to_string(),
            first_name: "Achieng".to_string(),
            last_name: "Otieno".to_string(),
            email: Some("Achieng.Otieno@Example.com".to_string()),
            phone: "0712 345678".to_string(),
            national_id: "23456789".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1988, 4, 12).unwrap(),
            address: Some("  ".to_string()),
            employer: None,
            monthly_income: BigDecimal::from_str("45000").unwrap(),
            joined_date: None,
        }
    }

    #[test]
    fn test_valid_emails() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("test.user@example.co.ke"));
        assert!(is_valid_email("user+tag@example.com"));
    }

    #[test]
    fn test_invalid_emails() {
        assert!(!is_valid_email("userexample.com"));
        assert!(!is_valid_email("user@examplecom"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user @example.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn normalizes_local_kenyan_numbers() {
        assert_eq!(normalize_phone("0712 345678").unwrap(), "+254712345678");
        assert_eq!(normalize_phone("+254712345678").unwrap(), "+254712345678");
    }

    #[test]
    fn rejects_short_phone_numbers() {
        assert!(matches!(
            normalize_phone("0712"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn registration_trims_and_normalizes() {
        let client = validate_registration(request()).unwrap();
        assert_eq!(client.member_number, "M-0042");
        assert_eq!(client.phone, "+254712345678");
        assert_eq!(client.email.as_deref(), Some("achieng.otieno@example.com"));
        assert_eq!(client.address, None);
        assert_eq!(client.status, ClientStatus::Active);
    }

    #[test]
    fn registration_rejects_negative_income() {
        let mut req = request();
        req.monthly_income = BigDecimal::from_str("-1").unwrap();
        assert!(matches!(
            validate_registration(req),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn registration_requires_names() {
        let mut req = request();
        req.last_name = "   ".to_string();
        let err = validate_registration(req).unwrap_err();
        assert!(err.to_string().contains("last_name"));
    }
}
