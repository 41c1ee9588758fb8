// SPDX-License-Identifier: MPL-2.0

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::{AuthError, AuthProvider, AuthService, MemoryAuth, RestAuth};
use crate::cache::{CacheDb, CacheError};
use crate::config::{Config, ConfigError, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::gateway::{Gateway, GatewayError, MemoryGateway, Remote, RestGateway};
use crate::model::Session;
use crate::notify::Notifier;
use crate::services::{
    CommentService, DashboardService, FeedService, PostService, ProfileService, UploadService,
};
use crate::state::SessionContext;
use crate::sync::{MutationController, ViewTracker};

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// One client session: the backend handles plus everything scoped to them.
///
/// Screens get short-lived service views (`app.feed()`, `app.profiles()`, ...)
/// that borrow from here.
pub struct App {
    remote: Remote,
    cache: CacheDb,
    session: SessionContext,
    notifier: Notifier,
    auth: AuthService,
    mutations: MutationController,
    views: ViewTracker,
}

impl App {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        provider: Arc<dyn AuthProvider>,
        session: SessionContext,
        timeout: Duration,
        redirect_to: Option<String>,
    ) -> Result<Self, AppError> {
        let cache = CacheDb::open_in_memory()?;
        let notifier = Notifier::new();
        let remote = Remote::new(gateway, timeout);
        let views = ViewTracker::new(remote.clone(), cache.clone());
        scope_to_user(&session, cache.clone(), views.resetter());

        Ok(Self {
            auth: AuthService::new(provider, remote.clone(), session.clone(), redirect_to),
            mutations: MutationController::new(cache.clone(), remote.clone(), notifier.clone()),
            views,
            remote,
            cache,
            session,
            notifier,
        })
    }

    /// Client for the hosted backend described by `config`.
    pub fn connect(config: &Config) -> Result<Self, AppError> {
        config.validate()?;
        let session = SessionContext::new();
        let gateway = RestGateway::new(config, session.clone())?;
        let provider = RestAuth::new(config)?;
        info!(endpoint = %config.url, "connecting to backend");
        Self::new(
            Arc::new(gateway),
            Arc::new(provider),
            session,
            config.request_timeout(),
            config.site_url.clone(),
        )
    }

    /// Fully in-process client, for offline runs and tests.
    pub fn in_memory(gateway: Arc<MemoryGateway>, provider: Arc<MemoryAuth>) -> Result<Self, AppError> {
        Self::new(
            gateway,
            provider,
            SessionContext::new(),
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            None,
        )
    }

    pub fn remote(&self) -> &Remote {
        &self.remote
    }

    pub fn cache(&self) -> &CacheDb {
        &self.cache
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub fn mutations(&self) -> &MutationController {
        &self.mutations
    }

    pub fn views(&self) -> &ViewTracker {
        &self.views
    }

    /// The signed-in session, if any.
    pub fn viewer(&self) -> Option<Session> {
        self.session.current()
    }

    pub fn feed(&self) -> FeedService<'_> {
        FeedService::new(self)
    }

    pub fn comments(&self) -> CommentService<'_> {
        CommentService::new(self)
    }

    pub fn posts(&self) -> PostService<'_> {
        PostService::new(self)
    }

    pub fn profiles(&self) -> ProfileService<'_> {
        ProfileService::new(self)
    }

    pub fn uploads(&self) -> UploadService<'_> {
        UploadService::new(self)
    }

    pub fn dashboard(&self) -> DashboardService<'_> {
        DashboardService::new(self)
    }
}

/// Cached entities and view-tracking progress belong to one user; drop
/// them whenever the signed-in user changes.
fn scope_to_user<R>(session: &SessionContext, cache: CacheDb, reset_views: R)
where
    R: Fn() + Send + Sync + 'static,
{
    session.on_user_change(move |user_id| {
        reset_views();
        match cache.clear() {
            Ok(()) => info!(user_id, "session cache reset"),
            Err(e) => warn!(user_id, error = %e, "failed to reset session cache"),
        }
    });
}
