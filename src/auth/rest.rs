// SPDX-License-Identifier: MPL-2.0

use crate::auth::{AuthError, AuthProvider, SignUp, SignUpMetadata};
use crate::config::{APP_NAME, Config};
use crate::model::{AuthUser, Session};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: AuthUser,
}

impl From<TokenResponse> for Session {
    fn from(t: TokenResponse) -> Self {
        let expires_at = t
            .expires_at
            .or_else(|| t.expires_in.map(|secs| Utc::now().timestamp() + secs));
        Session {
            access_token: t.access_token,
            refresh_token: t.refresh_token,
            expires_at,
            user: t.user,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl ErrorBody {
    fn text(&self) -> String {
        self.msg
            .clone()
            .or_else(|| self.message.clone())
            .or_else(|| self.error_description.clone())
            .or_else(|| self.error.clone())
            .unwrap_or_default()
    }
}

/// Map an auth endpoint failure onto [`AuthError`]. Newer servers send an
/// `error_code`; older ones only a message.
fn classify(status: StatusCode, body: &ErrorBody) -> AuthError {
    let text = body.text();
    let lower = text.to_lowercase();

    match body.error_code.as_deref() {
        Some("user_already_exists" | "email_exists") => return AuthError::AlreadyRegistered,
        Some("email_address_invalid") => return AuthError::InvalidEmail,
        Some("invalid_credentials") => return AuthError::InvalidCredentials,
        Some("email_not_confirmed") => return AuthError::EmailNotConfirmed,
        Some("otp_expired") => return AuthError::InvalidOtp,
        Some("session_not_found" | "bad_jwt" | "no_authorization") => {
            return AuthError::NotAuthenticated;
        }
        _ => {}
    }

    if lower.contains("already registered") {
        AuthError::AlreadyRegistered
    } else if lower.contains("invalid login credentials") {
        AuthError::InvalidCredentials
    } else if lower.contains("email not confirmed") {
        AuthError::EmailNotConfirmed
    } else if lower.contains("token has expired") || lower.contains("otp") {
        AuthError::InvalidOtp
    } else if lower.contains("email") && lower.contains("invalid") {
        AuthError::InvalidEmail
    } else if status == StatusCode::UNAUTHORIZED {
        AuthError::NotAuthenticated
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        AuthError::Connectivity(text)
    } else if text.is_empty() {
        AuthError::Rejected(status.to_string())
    } else {
        AuthError::Rejected(text)
    }
}

/// Client for the hosted auth endpoints (`/auth/v1`).
pub struct RestAuth {
    http: reqwest::Client,
    base: Url,
    anon_key: String,
}

impl RestAuth {
    pub fn new(config: &Config) -> Result<Self, AuthError> {
        let base = config
            .endpoint()
            .map_err(|e| AuthError::Rejected(e.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuthError::Connectivity(e.to_string()))?;
        Ok(Self {
            http,
            base,
            anon_key: config.anon_key.clone(),
        })
    }

    fn url(&self, endpoint: &str) -> Result<Url, AuthError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| AuthError::Rejected("endpoint url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["auth", "v1", endpoint]);
        Ok(url)
    }

    fn post(&self, url: Url, body: &Value) -> RequestBuilder {
        self.http
            .post(url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .json(body)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, AuthError> {
        let response = request
            .send()
            .await
            .map_err(|e| AuthError::Connectivity(e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body: ErrorBody = response.json().await.unwrap_or_default();
        let err = classify(status, &body);
        debug!(%status, code = ?body.error_code, error = %err, "auth request failed");
        Err(err)
    }

    async fn session(response: Response) -> Result<Session, AuthError> {
        response
            .json::<TokenResponse>()
            .await
            .map(Session::from)
            .map_err(|e| AuthError::Rejected(format!("unexpected auth response: {e}")))
    }
}

#[async_trait]
impl AuthProvider for RestAuth {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<SignUp, AuthError> {
        let body = json!({ "email": email, "password": password, "data": metadata });
        let response = self.send(self.post(self.url("signup")?, &body)).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| AuthError::Rejected(e.to_string()))?;

        // Auto-confirmed projects answer with a session, others with the bare user.
        if value.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(value)
                .map_err(|e| AuthError::Rejected(e.to_string()))?;
            let session = Session::from(token);
            return Ok(SignUp {
                user: session.user.clone(),
                session: Some(session),
            });
        }

        let user_value = value.get("user").cloned().unwrap_or(value);
        let user: AuthUser =
            serde_json::from_value(user_value).map_err(|e| AuthError::Rejected(e.to_string()))?;
        Ok(SignUp {
            user,
            session: None,
        })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let mut url = self.url("token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let body = json!({ "email": email, "password": password });
        let response = self.send(self.post(url, &body)).await?;
        Self::session(response).await
    }

    async fn sign_in_with_otp(&self, email: &str) -> Result<(), AuthError> {
        let body = json!({ "email": email, "create_user": true });
        self.send(self.post(self.url("otp")?, &body)).await?;
        Ok(())
    }

    async fn verify_otp(&self, email: &str, code: &str) -> Result<Session, AuthError> {
        let body = json!({ "type": "email", "email": email, "token": code });
        let response = self.send(self.post(self.url("verify")?, &body)).await?;
        Self::session(response).await
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), AuthError> {
        let mut url = self.url("recover")?;
        if let Some(redirect) = redirect_to {
            url.query_pairs_mut().append_pair("redirect_to", redirect);
        }
        let body = json!({ "email": email });
        self.send(self.post(url, &body)).await?;
        Ok(())
    }

    async fn update_password(
        &self,
        session: &Session,
        password: &str,
    ) -> Result<AuthUser, AuthError> {
        let request = self
            .http
            .put(self.url("user")?)
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .json(&json!({ "password": password }));
        let response = self.send(request).await?;
        response
            .json::<AuthUser>()
            .await
            .map_err(|e| AuthError::Rejected(e.to_string()))
    }

    async fn resend_confirmation(&self, email: &str) -> Result<(), AuthError> {
        let body = json!({ "type": "signup", "email": email });
        self.send(self.post(self.url("resend")?, &body)).await?;
        Ok(())
    }

    async fn sign_out(&self, session: &Session) -> Result<(), AuthError> {
        let request = self
            .http
            .post(self.url("logout")?)
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token);
        self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(code: Option<&str>, msg: &str) -> ErrorBody {
        ErrorBody {
            error_code: code.map(String::from),
            msg: Some(msg.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_by_code() {
        assert_eq!(
            classify(StatusCode::BAD_REQUEST, &body(Some("invalid_credentials"), "x")),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, &body(Some("user_already_exists"), "x")),
            AuthError::AlreadyRegistered
        );
    }

    #[test]
    fn test_classify_by_message() {
        assert_eq!(
            classify(StatusCode::BAD_REQUEST, &body(None, "Invalid login credentials")),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            classify(StatusCode::BAD_REQUEST, &body(None, "Email not confirmed")),
            AuthError::EmailNotConfirmed
        );
        assert_eq!(
            classify(StatusCode::FORBIDDEN, &body(None, "Token has expired or is invalid")),
            AuthError::InvalidOtp
        );
        assert_eq!(
            classify(StatusCode::BAD_REQUEST, &body(None, "Unable to validate email address: invalid format")),
            AuthError::InvalidEmail
        );
    }

    #[test]
    fn test_classify_fallbacks() {
        assert!(matches!(
            classify(StatusCode::SERVICE_UNAVAILABLE, &ErrorBody::default()),
            AuthError::Connectivity(_)
        ));
        assert_eq!(
            classify(StatusCode::UNAUTHORIZED, &ErrorBody::default()),
            AuthError::NotAuthenticated
        );
    }

    #[test]
    fn test_token_response_expiry() {
        let token: TokenResponse = serde_json::from_value(json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "user": { "id": "u1", "email": "a@b.co" }
        }))
        .unwrap();
        let session = Session::from(token);
        assert!(session.expires_at.unwrap() > Utc::now().timestamp());
        assert_eq!(session.user_id(), "u1");
    }

    #[test]
    fn test_endpoint_urls() {
        let auth = RestAuth::new(&Config::new("https://project.example.co", "anon")).unwrap();
        assert_eq!(
            auth.url("token").unwrap().as_str(),
            "https://project.example.co/auth/v1/token"
        );
    }
}
