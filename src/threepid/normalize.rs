//! Address canonicalization.
//!
//! Every lookup, insert, and delete goes through these helpers so the store
//! only ever sees one spelling of an address.

use phonenumber::{Mode, country};
use regex::Regex;

use crate::error::ApiError;

/// Normalize an email address: trimmed and lower-cased.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Canonicalize a phone number to its E.164 digit string (no leading `+`).
///
/// `country` is an ISO 3166-1 alpha-2 region code used to resolve national
/// dialing formats; a full international number overrides it.
pub fn canonicalize_msisdn(country: &str, phone_number: &str) -> Result<String, ApiError> {
    let region: country::Id = country
        .trim()
        .to_uppercase()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Unknown country code: {country}")))?;

    let number = phonenumber::parse(Some(region), phone_number)
        .map_err(|_| ApiError::BadRequest("Unable to parse phone number".to_string()))?;

    if !phonenumber::is_valid(&number) {
        return Err(ApiError::BadRequest("Invalid phone number".to_string()));
    }

    let e164 = number.format().mode(Mode::E164).to_string();
    Ok(e164.trim_start_matches('+').to_string())
}
