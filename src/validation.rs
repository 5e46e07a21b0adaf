use rust_decimal::Decimal;
use validator::ValidateEmail;

use crate::error::{ErrorCode, FieldErrors};

pub const PHONE_MIN_DIGITS: usize = 10;
pub const PHONE_MAX_DIGITS: usize = 15;
pub const PHONE_MAX_LEN: usize = 20;
pub const PASSWORD_MIN_LEN: usize = 8;
pub const TITLE_MAX_LEN: usize = 200;
pub const NAME_MAX_LEN: usize = 150;
pub const CATEGORY_NAME_MAX_LEN: usize = 100;
pub const SLUG_MAX_LEN: usize = 150;

/// Largest price NUMERIC(10,2) can hold.
const PRICE_LIMIT: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

const COMMON_PASSWORDS: &[&str] = &[
    "password", "password1", "12345678", "123456789", "1234567890", "qwertyui", "qwerty123",
    "iloveyou", "letmein1", "11111111", "00000000", "abcdefgh", "passw0rd", "admin123",
];

/// Phone rule shared by accounts and listings: after removing whitespace and hyphens only
/// `[0-9+()]` may remain, and the digit count must be within 10..=15.
pub fn check_phone(raw: &str) -> Result<(), &'static str> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    if cleaned.is_empty()
        || !cleaned
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '(' | ')'))
    {
        return Err("Phone number can only contain digits, +, (, ) characters.");
    }
    let digits = cleaned.chars().filter(char::is_ascii_digit).count();
    if !(PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS).contains(&digits) {
        return Err("Phone number must contain 10-15 digits.");
    }
    Ok(())
}

pub fn validate_phone(field: &str, raw: &str, errors: &mut FieldErrors) {
    if raw.chars().count() > PHONE_MAX_LEN {
        errors.add(field, ErrorCode::TooLong, format!("at most {PHONE_MAX_LEN} characters"));
        return;
    }
    if let Err(message) = check_phone(raw) {
        errors.add(field, ErrorCode::PhoneFormatInvalid, message);
    }
}

/// Optional phones treat a blank value as "no phone".
pub fn normalize_optional_phone(field: &str, raw: Option<&str>, errors: &mut FieldErrors) -> Option<String> {
    let value = raw.map(str::trim).filter(|v| !v.is_empty())?;
    validate_phone(field, value, errors);
    Some(value.to_string())
}

pub fn validate_email(field: &str, raw: &str, errors: &mut FieldErrors) {
    if raw.trim().is_empty() {
        errors.add(field, ErrorCode::Required, "This field may not be blank.");
    } else if !raw.trim().to_string().validate_email() {
        errors.add(field, ErrorCode::InvalidEmail, "Enter a valid email address.");
    }
}

/// Checks a required text field and returns it trimmed.
pub fn required_text(field: &str, raw: &str, max_len: Option<usize>, errors: &mut FieldErrors) -> String {
    let value = raw.trim();
    if value.is_empty() {
        errors.add(field, ErrorCode::Required, "This field may not be blank.");
    } else if let Some(max) = max_len.filter(|max| value.chars().count() > *max) {
        errors.add(field, ErrorCode::TooLong, format!("at most {max} characters"));
    }
    value.to_string()
}

pub fn validate_password(password: &str, username: &str, errors: &mut FieldErrors) {
    let field = "password";
    if password.chars().count() < PASSWORD_MIN_LEN {
        errors.add(
            field,
            ErrorCode::WeakPassword,
            format!("This password is too short. It must contain at least {PASSWORD_MIN_LEN} characters."),
        );
    }
    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        errors.add(field, ErrorCode::WeakPassword, "This password is entirely numeric.");
    }
    let lowered = password.to_lowercase();
    if COMMON_PASSWORDS.contains(&lowered.as_str()) {
        errors.add(field, ErrorCode::WeakPassword, "This password is too common.");
    }
    let username = username.trim().to_lowercase();
    if username.chars().count() >= 3 && lowered.contains(&username) {
        errors.add(field, ErrorCode::WeakPassword, "The password is too similar to the username.");
    }
}

/// Accepts a non-negative price with at most two fractional digits and rescales it to exactly two.
pub fn normalize_price(field: &str, price: Decimal, errors: &mut FieldErrors) -> Decimal {
    let normalized = price.normalize();
    if normalized.is_sign_negative() && !normalized.is_zero() {
        errors.add(field, ErrorCode::InvalidPrice, "Price must not be negative.");
    } else if normalized.scale() > 2 {
        errors.add(field, ErrorCode::InvalidPrice, "Ensure that there are no more than 2 decimal places.");
    } else if normalized > PRICE_LIMIT {
        errors.add(field, ErrorCode::InvalidPrice, "Ensure that there are no more than 8 digits before the decimal point.");
    }
    let mut rescaled = normalized.abs();
    rescaled.rescale(2);
    rescaled
}
