// SPDX-License-Identifier: MPL-2.0

use crate::auth::{AuthError, AuthProvider, SignUp, SignUpMetadata};
use crate::model::{AuthUser, Session};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Mail the in-memory provider would have sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMail {
    Confirmation(String),
    LoginCode { email: String, code: String },
    PasswordReset(String),
}

struct Account {
    user: AuthUser,
    password: String,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    /// Outstanding one-time codes by e-mail
    codes: HashMap<String, String>,
    /// Live access tokens → user id
    tokens: HashMap<String, String>,
    outbox: Vec<SentMail>,
    auto_confirm: bool,
    offline: bool,
    seq: u64,
}

/// In-process auth provider.
///
/// Accounts need confirming before password sign-in unless built with
/// [`MemoryAuth::auto_confirming`].
#[derive(Default)]
pub struct MemoryAuth {
    inner: Mutex<Inner>,
}

impl MemoryAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_confirming() -> Self {
        let auth = Self::default();
        auth.lock().auto_confirm = true;
        auth
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an account directly, bypassing sign-up.
    pub fn add_user(&self, email: &str, password: &str, confirmed: bool) -> AuthUser {
        let mut inner = self.lock();
        inner.seq += 1;
        let user = AuthUser {
            id: format!("user-{}", inner.seq),
            email: Some(email.to_string()),
            email_confirmed_at: confirmed.then(Utc::now),
        };
        inner.accounts.insert(
            email.to_string(),
            Account {
                user: user.clone(),
                password: password.to_string(),
            },
        );
        user
    }

    pub fn confirm(&self, email: &str) {
        if let Some(account) = self.lock().accounts.get_mut(email) {
            account.user.email_confirmed_at = Some(Utc::now());
        }
    }

    /// Simulate the network being down.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn outbox(&self) -> Vec<SentMail> {
        self.lock().outbox.clone()
    }

    /// Latest login code sent to `email`.
    pub fn last_code(&self, email: &str) -> Option<String> {
        self.lock().codes.get(email).cloned()
    }

    pub fn password_of(&self, email: &str) -> Option<String> {
        self.lock().accounts.get(email).map(|a| a.password.clone())
    }

    pub fn is_token_live(&self, token: &str) -> bool {
        self.lock().tokens.contains_key(token)
    }
}

impl Inner {
    fn online(&self) -> Result<(), AuthError> {
        if self.offline {
            return Err(AuthError::Connectivity("auth provider unreachable".into()));
        }
        Ok(())
    }

    fn issue(&mut self, user: &AuthUser) -> Session {
        self.seq += 1;
        let access_token = format!("access-{}-{}", user.id, self.seq);
        self.tokens.insert(access_token.clone(), user.id.clone());
        Session {
            access_token,
            refresh_token: format!("refresh-{}-{}", user.id, self.seq),
            expires_at: Some(Utc::now().timestamp() + 3600),
            user: user.clone(),
        }
    }

    fn next_code(&mut self) -> String {
        self.seq += 1;
        format!("{:06}", (self.seq * 7919) % 1_000_000)
    }
}

fn well_formed(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.ends_with('.'),
        None => false,
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _metadata: &SignUpMetadata,
    ) -> Result<SignUp, AuthError> {
        let mut inner = self.lock();
        inner.online()?;
        if !well_formed(email) {
            return Err(AuthError::InvalidEmail);
        }
        if inner.accounts.contains_key(email) {
            return Err(AuthError::AlreadyRegistered);
        }

        inner.seq += 1;
        let confirmed = inner.auto_confirm;
        let user = AuthUser {
            id: format!("user-{}", inner.seq),
            email: Some(email.to_string()),
            email_confirmed_at: confirmed.then(Utc::now),
        };
        inner.accounts.insert(
            email.to_string(),
            Account {
                user: user.clone(),
                password: password.to_string(),
            },
        );

        let session = if confirmed {
            Some(inner.issue(&user))
        } else {
            inner.outbox.push(SentMail::Confirmation(email.to_string()));
            None
        };
        Ok(SignUp { user, session })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let mut inner = self.lock();
        inner.online()?;
        let user = match inner.accounts.get(email) {
            Some(account) if account.password == password => account.user.clone(),
            _ => return Err(AuthError::InvalidCredentials),
        };
        if user.email_confirmed_at.is_none() {
            return Err(AuthError::EmailNotConfirmed);
        }
        Ok(inner.issue(&user))
    }

    async fn sign_in_with_otp(&self, email: &str) -> Result<(), AuthError> {
        let mut inner = self.lock();
        inner.online()?;
        if !well_formed(email) {
            return Err(AuthError::InvalidEmail);
        }
        let code = inner.next_code();
        inner.codes.insert(email.to_string(), code.clone());
        inner.outbox.push(SentMail::LoginCode {
            email: email.to_string(),
            code,
        });
        Ok(())
    }

    async fn verify_otp(&self, email: &str, code: &str) -> Result<Session, AuthError> {
        let mut inner = self.lock();
        inner.online()?;
        if inner.codes.get(email).map(String::as_str) != Some(code) {
            return Err(AuthError::InvalidOtp);
        }
        inner.codes.remove(email);

        // Passwordless sign-in creates the account on first use
        let user = match inner.accounts.get_mut(email) {
            Some(account) => {
                account.user.email_confirmed_at.get_or_insert_with(Utc::now);
                account.user.clone()
            }
            None => {
                inner.seq += 1;
                let user = AuthUser {
                    id: format!("user-{}", inner.seq),
                    email: Some(email.to_string()),
                    email_confirmed_at: Some(Utc::now()),
                };
                inner.accounts.insert(
                    email.to_string(),
                    Account {
                        user: user.clone(),
                        password: String::new(),
                    },
                );
                user
            }
        };
        Ok(inner.issue(&user))
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        _redirect_to: Option<&str>,
    ) -> Result<(), AuthError> {
        let mut inner = self.lock();
        inner.online()?;
        // Unknown addresses succeed silently so accounts cannot be probed
        if inner.accounts.contains_key(email) {
            inner.outbox.push(SentMail::PasswordReset(email.to_string()));
        }
        Ok(())
    }

    async fn update_password(
        &self,
        session: &Session,
        password: &str,
    ) -> Result<AuthUser, AuthError> {
        let mut inner = self.lock();
        inner.online()?;
        let user_id = inner
            .tokens
            .get(&session.access_token)
            .cloned()
            .ok_or(AuthError::NotAuthenticated)?;
        let account = inner
            .accounts
            .values_mut()
            .find(|a| a.user.id == user_id)
            .ok_or(AuthError::NotAuthenticated)?;
        account.password = password.to_string();
        Ok(account.user.clone())
    }

    async fn resend_confirmation(&self, email: &str) -> Result<(), AuthError> {
        let mut inner = self.lock();
        inner.online()?;
        inner.outbox.push(SentMail::Confirmation(email.to_string()));
        Ok(())
    }

    async fn sign_out(&self, session: &Session) -> Result<(), AuthError> {
        let mut inner = self.lock();
        inner.online()?;
        inner.tokens.remove(&session.access_token);
        Ok(())
    }
}
