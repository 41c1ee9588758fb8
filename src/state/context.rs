// SPDX-License-Identifier: MPL-2.0

use crate::model::Session;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::info;

type UserChangeHook = Box<dyn Fn(Option<&str>) + Send + Sync>;

/// The one place the current session lives.
///
/// Everything that cares about sign-in state either reads it on demand
/// ([`SessionContext::current`]) or holds a receiver from
/// [`SessionContext::subscribe`]. Cloning shares the same session.
#[derive(Clone)]
pub struct SessionContext {
    tx: Arc<watch::Sender<Option<Session>>>,
    on_user_change: Arc<Mutex<Vec<UserChangeHook>>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::with_session(None)
    }

    pub fn with_session(session: Option<Session>) -> Self {
        let (tx, _rx) = watch::channel(session);
        Self {
            tx: Arc::new(tx),
            on_user_change: Arc::default(),
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.tx.borrow().as_ref().map(|s| s.user_id().to_string())
    }

    pub fn access_token(&self) -> Option<String> {
        self.tx.borrow().as_ref().map(|s| s.access_token.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Replace the session and wake subscribers.
    ///
    /// When the signed-in user differs from before (sign-in, sign-out or a
    /// switch), the hooks from [`SessionContext::on_user_change`] run before
    /// this returns. A refreshed token for the same user runs none.
    pub fn set(&self, session: Option<Session>) {
        match &session {
            Some(s) => info!(user_id = %s.user_id(), "session started"),
            None => info!("session cleared"),
        }
        let user_id = session.as_ref().map(|s| s.user_id().to_string());
        let previous = self.tx.send_replace(session);
        if previous.as_ref().map(Session::user_id) == user_id.as_deref() {
            return;
        }
        let hooks = self.on_user_change.lock().unwrap_or_else(|e| e.into_inner());
        for hook in hooks.iter() {
            hook(user_id.as_deref());
        }
    }

    /// Run `hook` with the new user id whenever the signed-in user changes.
    /// Hooks must not call back into [`SessionContext::set`].
    pub fn on_user_change<F>(&self, hook: F)
    where
        F: Fn(Option<&str>) + Send + Sync + 'static,
    {
        self.on_user_change
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(hook));
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AuthUser;

    fn session(id: &str) -> Session {
        Session {
            access_token: format!("token-{id}"),
            refresh_token: String::new(),
            expires_at: None,
            user: AuthUser {
                id: id.to_string(),
                email: Some(format!("{id}@example.com")),
                email_confirmed_at: None,
            },
        }
    }

    #[test]
    fn test_current_reflects_latest_set() {
        let ctx = SessionContext::new();
        assert!(!ctx.is_signed_in());
        ctx.set(Some(session("u1")));
        assert_eq!(ctx.user_id().as_deref(), Some("u1"));
        assert_eq!(ctx.access_token().as_deref(), Some("token-u1"));
        ctx.set(None);
        assert!(ctx.current().is_none());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let ctx = SessionContext::new();
        let shared = ctx.clone();
        let mut rx = ctx.subscribe();

        shared.set(Some(session("u2")));
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow().as_ref().map(|s| s.user_id().to_string()),
            Some("u2".to_string())
        );
    }

    #[test]
    fn test_user_change_hooks_skip_token_refresh() {
        let ctx = SessionContext::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        ctx.on_user_change(move |user| {
            log.lock().unwrap().push(user.map(str::to_string));
        });

        ctx.set(Some(session("u1")));
        let mut refreshed = session("u1");
        refreshed.access_token = "token-u1-refreshed".into();
        ctx.set(Some(refreshed));
        ctx.set(Some(session("u2")));
        ctx.set(None);
        ctx.set(None);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some("u1".to_string()), Some("u2".to_string()), None]
        );
    }
}
