// SPDX-License-Identifier: MPL-2.0

//! Client-side checks that block a submission before any remote call.

use crate::config::{MIN_PASSWORD_LEN, OTP_CODE_LEN};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please fill in all fields")]
    MissingFields,
    #[error("Please enter your email address")]
    MissingEmail,
    #[error("{0} is required")]
    Required(&'static str),
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("Password must be at least {0} characters")]
    PasswordTooShort(usize),
    #[error("Please agree to the Terms of Service")]
    TermsNotAccepted,
    #[error("Please enter a valid 6-digit OTP")]
    InvalidOtpFormat,
    #[error("Please wait {0} seconds before trying again")]
    Cooldown(i64),
    #[error("{what} must be less than {max_mb}MB")]
    FileTooLarge { what: &'static str, max_mb: u64 },
    #[error("You cannot follow yourself")]
    SelfFollow,
    #[error("You can only delete your own posts")]
    NotOwner,
    #[error("{0}")]
    Invalid(String),
}

impl ValidationError {
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Every field must be non-blank.
pub fn all_filled(fields: &[&str]) -> Result<(), ValidationError> {
    if fields.iter().any(|f| blank(f)) {
        return Err(ValidationError::MissingFields);
    }
    Ok(())
}

pub fn email(email: &str) -> Result<&str, ValidationError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ValidationError::MissingEmail);
    }
    Ok(email)
}

pub fn required<'a>(value: &'a str, what: &'static str) -> Result<&'a str, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Required(what));
    }
    Ok(value)
}

/// Confirmation must match, then the length rule applies.
pub fn new_password(password: &str, confirmation: &str) -> Result<(), ValidationError> {
    if password != confirmation {
        return Err(ValidationError::PasswordMismatch);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort(MIN_PASSWORD_LEN));
    }
    Ok(())
}

pub fn otp_code(code: &str) -> Result<&str, ValidationError> {
    let code = code.trim();
    if code.chars().count() != OTP_CODE_LEN {
        return Err(ValidationError::InvalidOtpFormat);
    }
    Ok(code)
}

pub fn file_size(len: usize, max_bytes: usize, what: &'static str) -> Result<(), ValidationError> {
    if len > max_bytes {
        return Err(ValidationError::FileTooLarge {
            what,
            max_mb: (max_bytes / (1024 * 1024)) as u64,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PROFILE_PICTURE_MAX_BYTES;

    #[test]
    fn test_blank_field_rejected() {
        assert_eq!(
            all_filled(&["a@b.c", "  ", "pw"]),
            Err(ValidationError::MissingFields)
        );
        assert!(all_filled(&["a", "b"]).is_ok());
    }

    #[test]
    fn test_new_password_rules_in_order() {
        assert_eq!(
            new_password("short", "other"),
            Err(ValidationError::PasswordMismatch)
        );
        let err = new_password("short", "short").unwrap_err();
        assert_eq!(err.user_message(), "Password must be at least 8 characters");
        assert!(new_password("longenough", "longenough").is_ok());
    }

    #[test]
    fn test_otp_must_be_six_chars() {
        assert!(otp_code("12345").is_err());
        assert!(otp_code("1234567").is_err());
        assert_eq!(otp_code(" 123456 "), Ok("123456"));
    }

    #[test]
    fn test_file_size_message() {
        let err = file_size(PROFILE_PICTURE_MAX_BYTES + 1, PROFILE_PICTURE_MAX_BYTES, "Profile picture")
            .unwrap_err();
        assert_eq!(err.to_string(), "Profile picture must be less than 5MB");
        assert!(file_size(10, PROFILE_PICTURE_MAX_BYTES, "Profile picture").is_ok());
    }
}
