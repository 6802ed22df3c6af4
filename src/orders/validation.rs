//! Input rules shared by the conversation, the order API and operator tools.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::ServiceKind;
use crate::payments;

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid username pattern"));

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\+62|62|0)[0-9]{9,12}$").expect("valid phone pattern"));

pub const MAX_DURATION_DAYS: u32 = 365;

/// Letters, digits and underscores. Length limits belong to the backend that
/// creates the identity.
pub fn is_valid_username(username: &str) -> bool {
    USERNAME_RE.is_match(username)
}

pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_RE.is_match(phone)
}

pub fn parse_service_kind(raw: &str) -> Result<ServiceKind, String> {
    raw.parse::<ServiceKind>()
        .map_err(|_| "Invalid service type".to_string())
}

pub fn check_username(username: &str) -> Result<(), String> {
    if is_valid_username(username) {
        Ok(())
    } else {
        Err("Username may only contain letters, digits and underscores".to_string())
    }
}

/// `:` and line breaks would corrupt `chpasswd` input; a backtick cannot be
/// shown inside a chat code span.
const FORBIDDEN_PASSWORD_CHARS: [char; 4] = [':', '`', '\n', '\r'];

pub fn check_password(kind: ServiceKind, password: Option<&str>) -> Result<(), String> {
    if !kind.requires_password() {
        return Ok(());
    }
    match password {
        Some(p) if !p.is_empty() && !p.contains(FORBIDDEN_PASSWORD_CHARS) => Ok(()),
        Some(_) => {
            Err("Password must not be empty or contain ':', '`' or line breaks".to_string())
        }
        None => Err("Password is required for SSH".to_string()),
    }
}

pub fn check_phone(phone: Option<&str>) -> Result<(), String> {
    match phone {
        Some(p) if !is_valid_phone(p) => Err("Invalid phone number".to_string()),
        _ => Ok(()),
    }
}

pub fn check_duration(days: u32) -> Result<(), String> {
    if (1..=MAX_DURATION_DAYS).contains(&days) {
        Ok(())
    } else {
        Err(format!("Duration must be between 1 and {MAX_DURATION_DAYS} days"))
    }
}

pub fn check_payment_method(method: &str) -> Result<(), String> {
    if payments::is_supported_method(method) {
        Ok(())
    } else {
        Err(format!("Unsupported payment method '{method}'"))
    }
}
