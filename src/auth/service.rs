// SPDX-License-Identifier: MPL-2.0

use crate::auth::{AuthError, AuthProvider, SignUpMetadata};
use crate::config::RESEND_COOLDOWN_SECS;
use crate::gateway::{Remote, Table};
use crate::model::{AuthUser, NewProfile, Session};
use crate::state::SessionContext;
use crate::util::ValidationError;
use crate::util::validate;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Mail-sending actions that are rate limited on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResendAction {
    LoginCode,
    PasswordReset,
    Confirmation,
}

/// Per-action cooldown between mail sends.
pub struct ResendCooldown {
    window: Duration,
    last_sent: Mutex<HashMap<ResendAction, DateTime<Utc>>>,
}

impl ResendCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Whole seconds left before `action` may run again (0 when ready).
    pub fn remaining(&self, action: ResendAction, now: DateTime<Utc>) -> i64 {
        let last_sent = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        let Some(at) = last_sent.get(&action) else {
            return 0;
        };
        let left = (*at + self.window) - now;
        if left <= Duration::zero() {
            0
        } else {
            // Round partial seconds up so "0 seconds" is never shown while blocked
            (left.num_milliseconds() + 999) / 1000
        }
    }

    pub fn check(&self, action: ResendAction, now: DateTime<Utc>) -> Result<(), ValidationError> {
        match self.remaining(action, now) {
            0 => Ok(()),
            secs => Err(ValidationError::Cooldown(secs)),
        }
    }

    pub fn start(&self, action: ResendAction, now: DateTime<Utc>) {
        self.last_sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(action, now);
    }
}

impl Default for ResendCooldown {
    fn default() -> Self {
        Self::new(Duration::seconds(RESEND_COOLDOWN_SECS))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignupForm {
    pub email: String,
    pub username: String,
    pub password: String,
    pub confirm_password: String,
    pub accepted_terms: bool,
}

impl SignupForm {
    fn validate(&self) -> Result<(), ValidationError> {
        validate::all_filled(&[
            self.email.as_str(),
            self.username.as_str(),
            self.password.as_str(),
            self.confirm_password.as_str(),
        ])?;
        validate::new_password(&self.password, &self.confirm_password)?;
        if !self.accepted_terms {
            return Err(ValidationError::TermsNotAccepted);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user: AuthUser,
    /// The address must be confirmed before password sign-in works
    pub needs_confirmation: bool,
}

/// Auth flows on top of an [`AuthProvider`].
///
/// Every call that yields a session publishes it into the [`SessionContext`].
pub struct AuthService {
    provider: Arc<dyn AuthProvider>,
    remote: Remote,
    session: SessionContext,
    cooldown: ResendCooldown,
    redirect_to: Option<String>,
    /// Address of the most recent sign-up, for re-sending the confirmation
    pending_confirmation: Mutex<Option<String>>,
}

impl AuthService {
    pub fn new(
        provider: Arc<dyn AuthProvider>,
        remote: Remote,
        session: SessionContext,
        redirect_to: Option<String>,
    ) -> Self {
        Self {
            provider,
            remote,
            session,
            cooldown: ResendCooldown::default(),
            redirect_to,
            pending_confirmation: Mutex::new(None),
        }
    }

    pub fn cooldown(&self) -> &ResendCooldown {
        &self.cooldown
    }

    fn publish(&self, session: Session) -> Session {
        self.session.set(Some(session.clone()));
        session
    }

    /// Make a previously persisted session current.
    pub fn resume(&self, session: Session) {
        self.session.set(Some(session));
    }

    pub async fn sign_up(&self, form: &SignupForm) -> Result<SignUpOutcome, AuthError> {
        form.validate()?;
        let email = form.email.trim();
        let username = form.username.trim();

        let metadata = SignUpMetadata {
            username: username.to_string(),
            display_name: username.to_string(),
        };
        let signup = self
            .provider
            .sign_up(email, &form.password, &metadata)
            .await?;

        let profile = NewProfile {
            id: signup.user.id.clone(),
            username: if username.is_empty() {
                signup.user.email_local_part().unwrap_or_default().to_string()
            } else {
                username.to_string()
            },
            display_name: username.to_string(),
        };
        if let Err(e) = self.remote.insert_only(Table::Profiles, &profile).await {
            // Created lazily on first profile view instead
            warn!(user_id = %signup.user.id, error = %e, "profile creation after sign-up failed");
        }

        info!(user_id = %signup.user.id, "account created");
        let needs_confirmation = signup.session.is_none();
        match signup.session {
            Some(session) => {
                self.publish(session);
            }
            None => {
                *self
                    .pending_confirmation
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(email.to_string());
            }
        }

        Ok(SignUpOutcome {
            user: signup.user,
            needs_confirmation,
        })
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        validate::all_filled(&[email, password])?;
        let session = self
            .provider
            .sign_in_with_password(email.trim(), password)
            .await?;
        Ok(self.publish(session))
    }

    pub async fn send_otp(&self, email: &str) -> Result<(), AuthError> {
        let email = validate::email(email)?;
        let now = Utc::now();
        self.cooldown.check(ResendAction::LoginCode, now)?;
        self.provider.sign_in_with_otp(email).await?;
        self.cooldown.start(ResendAction::LoginCode, now);
        Ok(())
    }

    pub async fn verify_otp(&self, email: &str, code: &str) -> Result<Session, AuthError> {
        let email = validate::email(email)?;
        let code = validate::otp_code(code)?;
        let session = self.provider.verify_otp(email, code).await?;
        Ok(self.publish(session))
    }

    pub async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = validate::email(email)?;
        let now = Utc::now();
        self.cooldown.check(ResendAction::PasswordReset, now)?;
        self.provider
            .reset_password_for_email(email, self.redirect_to.as_deref())
            .await?;
        self.cooldown.start(ResendAction::PasswordReset, now);
        Ok(())
    }

    /// Set a new password for the signed-in user (after following a reset link).
    pub async fn update_password(
        &self,
        password: &str,
        confirmation: &str,
    ) -> Result<(), AuthError> {
        validate::all_filled(&[password, confirmation])?;
        validate::new_password(password, confirmation)?;
        let session = self.session.current().ok_or(AuthError::NotAuthenticated)?;
        let user = self.provider.update_password(&session, password).await?;
        info!(user_id = %user.id, "password updated");
        Ok(())
    }

    pub async fn resend_verification(&self) -> Result<(), AuthError> {
        let email = self
            .pending_confirmation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(ValidationError::MissingEmail)?;
        let now = Utc::now();
        self.cooldown.check(ResendAction::Confirmation, now)?;
        self.provider.resend_confirmation(&email).await?;
        self.cooldown.start(ResendAction::Confirmation, now);
        Ok(())
    }

    /// Always ends signed out locally, even if the provider call fails.
    pub async fn sign_out(&self) {
        if let Some(session) = self.session.current() {
            if let Err(e) = self.provider.sign_out(&session).await {
                warn!(error = %e, "provider sign-out failed");
            }
        }
        self.session.set(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryAuth, SentMail};
    use crate::gateway::{MemoryGateway, Query};
    use crate::model::Profile;
    use std::time::Duration as StdDuration;

    struct Harness {
        auth: Arc<MemoryAuth>,
        gateway: Arc<MemoryGateway>,
        session: SessionContext,
        service: AuthService,
    }

    fn harness(auth: MemoryAuth) -> Harness {
        let auth = Arc::new(auth);
        let gateway = Arc::new(MemoryGateway::new());
        let session = SessionContext::new();
        let remote = Remote::new(gateway.clone(), StdDuration::from_secs(1));
        let service = AuthService::new(auth.clone(), remote, session.clone(), None);
        Harness {
            auth,
            gateway,
            session,
            service,
        }
    }

    fn form() -> SignupForm {
        SignupForm {
            email: "ada@example.com".into(),
            username: "ada".into(),
            password: "password1".into(),
            confirm_password: "password1".into(),
            accepted_terms: true,
        }
    }

    #[tokio::test]
    async fn test_signup_validation_runs_before_provider() {
        let h = harness(MemoryAuth::new());

        let mut f = form();
        f.username = " ".into();
        let err = h.service.sign_up(&f).await.unwrap_err();
        assert_eq!(err.user_message(), "Please fill in all fields");

        let mut f = form();
        f.confirm_password = "password2".into();
        let err = h.service.sign_up(&f).await.unwrap_err();
        assert_eq!(err.user_message(), "Passwords do not match");

        let mut f = form();
        f.password = "short".into();
        f.confirm_password = "short".into();
        let err = h.service.sign_up(&f).await.unwrap_err();
        assert_eq!(err.user_message(), "Password must be at least 8 characters");

        let mut f = form();
        f.accepted_terms = false;
        let err = h.service.sign_up(&f).await.unwrap_err();
        assert_eq!(err.user_message(), "Please agree to the Terms of Service");

        assert!(h.auth.outbox().is_empty());
    }

    #[tokio::test]
    async fn test_signup_creates_profile_and_awaits_confirmation() {
        let h = harness(MemoryAuth::new());
        let outcome = h.service.sign_up(&form()).await.unwrap();
        assert!(outcome.needs_confirmation);
        assert!(!h.session.is_signed_in());

        let rows = h.gateway.rows(Table::Profiles);
        assert_eq!(rows.len(), 1);
        let profile: Profile = serde_json::from_value(rows[0].clone()).unwrap();
        assert_eq!(profile.id, outcome.user.id);
        assert_eq!(profile.username, "ada");

        h.service.resend_verification().await.unwrap();
        let err = h.service.resend_verification().await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(ValidationError::Cooldown(_))));
        assert_eq!(
            h.auth.outbox(),
            vec![
                SentMail::Confirmation("ada@example.com".into()),
                SentMail::Confirmation("ada@example.com".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_signup_survives_missing_profiles_table() {
        let h = harness(MemoryAuth::auto_confirming());
        h.gateway.drop_table(Table::Profiles);
        let outcome = h.service.sign_up(&form()).await.unwrap();
        assert!(!outcome.needs_confirmation);
        assert_eq!(h.session.user_id(), Some(outcome.user.id));
    }

    #[tokio::test]
    async fn test_sign_in_publishes_session() {
        let h = harness(MemoryAuth::new());
        h.auth.add_user("bob@example.com", "password1", true);
        h.auth.add_user("eve@example.com", "password1", false);

        let err = h.service.sign_in("bob@example.com", "wrong").await.unwrap_err();
        assert_eq!(err.user_message(), "Invalid email or password");
        let err = h.service.sign_in("eve@example.com", "password1").await.unwrap_err();
        assert_eq!(err.user_message(), "Please verify your email before logging in");

        let mut rx = h.session.subscribe();
        h.service.sign_in("bob@example.com", "password1").await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_some());
    }

    #[tokio::test]
    async fn test_otp_flow() {
        let h = harness(MemoryAuth::new());
        assert_eq!(
            h.service.send_otp("  ").await.unwrap_err().user_message(),
            "Please enter your email address"
        );
        h.service.send_otp("otp@example.com").await.unwrap();

        let err = h.service.verify_otp("otp@example.com", "123").await.unwrap_err();
        assert_eq!(err.user_message(), "Please enter a valid 6-digit OTP");
        let err = h.service.verify_otp("otp@example.com", "999999").await.unwrap_err();
        assert_eq!(err.user_message(), "Invalid or expired OTP");

        let code = h.auth.last_code("otp@example.com").unwrap();
        h.service.verify_otp("otp@example.com", &code).await.unwrap();
        assert!(h.session.is_signed_in());

        let err = h.service.send_otp("otp@example.com").await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(ValidationError::Cooldown(_))));
    }

    #[tokio::test]
    async fn test_update_password_requires_session() {
        let h = harness(MemoryAuth::new());
        h.auth.add_user("bob@example.com", "password1", true);
        assert_eq!(
            h.service.update_password("newpassword", "newpassword").await.unwrap_err(),
            AuthError::NotAuthenticated
        );

        h.service.sign_in("bob@example.com", "password1").await.unwrap();
        h.service.update_password("newpassword", "newpassword").await.unwrap();
        assert_eq!(h.auth.password_of("bob@example.com").as_deref(), Some("newpassword"));
    }

    #[tokio::test]
    async fn test_sign_out_clears_even_when_offline() {
        let h = harness(MemoryAuth::new());
        h.auth.add_user("bob@example.com", "password1", true);
        h.service.sign_in("bob@example.com", "password1").await.unwrap();
        h.auth.set_offline(true);
        h.service.sign_out().await;
        assert!(!h.session.is_signed_in());
    }

    #[test]
    fn test_cooldown_window() {
        let cooldown = ResendCooldown::default();
        let t0 = Utc::now();
        assert!(cooldown.check(ResendAction::PasswordReset, t0).is_ok());
        cooldown.start(ResendAction::PasswordReset, t0);

        assert_eq!(
            cooldown.check(ResendAction::PasswordReset, t0 + Duration::seconds(15)),
            Err(ValidationError::Cooldown(45))
        );
        // Actions are independent
        assert!(cooldown.check(ResendAction::LoginCode, t0).is_ok());
        assert!(
            cooldown
                .check(ResendAction::PasswordReset, t0 + Duration::seconds(60))
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_profile_row_uses_given_username() {
        let h = harness(MemoryAuth::new());
        h.service.sign_up(&form()).await.unwrap();
        let rows = h.gateway.rows(Table::Profiles);
        assert!(Query::new().eq("username", "ada").matches(&rows[0]));
    }
}
