// SPDX-License-Identifier: MPL-2.0

//! Account sign-up, sign-in and password flows.
//!
//! The hosted auth provider sits behind [`AuthProvider`]; [`AuthService`]
//! adds form validation, resend cooldowns and publishes sessions into the
//! shared [`SessionContext`](crate::state::SessionContext).

mod memory;
mod rest;
mod service;

pub use memory::{MemoryAuth, SentMail};
pub use rest::RestAuth;
pub use service::{AuthService, ResendAction, ResendCooldown, SignUpOutcome, SignupForm};

use crate::model::{AuthUser, Session};
use crate::util::ValidationError;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("email already registered")]
    AlreadyRegistered,
    #[error("invalid email address")]
    InvalidEmail,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("email not confirmed")]
    EmailNotConfirmed,
    #[error("invalid or expired one-time code")]
    InvalidOtp,
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("network error: {0}")]
    Connectivity(String),
    #[error("auth request rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl AuthError {
    pub fn user_message(&self) -> String {
        match self {
            AuthError::AlreadyRegistered => "This email is already registered".to_string(),
            AuthError::InvalidEmail => "Please enter a valid email address".to_string(),
            AuthError::InvalidCredentials => "Invalid email or password".to_string(),
            AuthError::EmailNotConfirmed => {
                "Please verify your email before logging in".to_string()
            }
            AuthError::InvalidOtp => "Invalid or expired OTP".to_string(),
            AuthError::NotAuthenticated => "Please login to continue".to_string(),
            AuthError::Connectivity(_) => "Something went wrong. Please try again.".to_string(),
            AuthError::Rejected(msg) => msg.clone(),
            AuthError::Validation(v) => v.user_message(),
        }
    }
}

/// User metadata attached at sign-up.
#[derive(Debug, Clone, Serialize)]
pub struct SignUpMetadata {
    pub username: String,
    pub display_name: String,
}

/// Result of a provider sign-up. `session` is absent while the address
/// still needs confirming.
#[derive(Debug, Clone)]
pub struct SignUp {
    pub user: AuthUser,
    pub session: Option<Session>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<SignUp, AuthError>;

    async fn sign_in_with_password(&self, email: &str, password: &str)
    -> Result<Session, AuthError>;

    /// Send a one-time login code.
    async fn sign_in_with_otp(&self, email: &str) -> Result<(), AuthError>;

    async fn verify_otp(&self, email: &str, code: &str) -> Result<Session, AuthError>;

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), AuthError>;

    async fn update_password(&self, session: &Session, password: &str)
    -> Result<AuthUser, AuthError>;

    /// Re-send the sign-up confirmation mail.
    async fn resend_confirmation(&self, email: &str) -> Result<(), AuthError>;

    async fn sign_out(&self, session: &Session) -> Result<(), AuthError>;
}
