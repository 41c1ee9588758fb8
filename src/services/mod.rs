// SPDX-License-Identifier: MPL-2.0

//! Screen-level flows.
//!
//! Each service is a cheap borrowed view over [`App`](crate::app::App). Remote
//! failures stop here: they are logged, turned into a notice or a [`Screen`]
//! state, and never take the process down.

mod comments;
mod dashboard;
mod feed;
mod posts;
mod profile;
mod upload;

pub use comments::CommentService;
pub use dashboard::{DashboardService, PostInsights, SiteStats};
pub use feed::FeedService;
pub use posts::{MemeSource, PostDraft, PostService};
pub use profile::{OwnProfile, ProfileEdit, ProfileService, PublicProfile};
pub use upload::{MediaFile, UploadService, content_type};

use crate::cache::CacheError;
use crate::gateway::{Bucket, GatewayError};
use crate::sync::MutationError;
use crate::util::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("not signed in")]
    NotSignedIn,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Remote(#[from] GatewayError),
    #[error("upload to {bucket} failed: {source}")]
    Upload {
        bucket: Bucket,
        #[source]
        source: GatewayError,
    },
    #[error("username already taken")]
    UsernameTaken,
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

impl ServiceError {
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::NotSignedIn => "You must be logged in".to_string(),
            ServiceError::Validation(v) => v.user_message(),
            ServiceError::Remote(e) => e.user_message(),
            ServiceError::Upload {
                bucket,
                source: GatewayError::NotConfigured(_),
            } => format!(
                "Storage bucket \"{bucket}\" not found. Please create it in the storage dashboard and make it public."
            ),
            ServiceError::Upload { bucket, source } => {
                format!("Failed to upload to {bucket}: {}", source.user_message())
            }
            ServiceError::UsernameTaken => "That username is already taken".to_string(),
            ServiceError::NotFound => "Not found".to_string(),
            ServiceError::Mutation(m) => m.user_message(),
            ServiceError::Cache(_) => "Something went wrong".to_string(),
        }
    }
}

/// What a screen shows once its primary fetch has settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Screen<T> {
    Ready(T),
    /// A table or bucket is missing; the text says what to create.
    SetupRequired(String),
    NotFound,
    /// Anything else went wrong; a notice has already been raised.
    Unavailable,
}

impl<T> Screen<T> {
    /// Screen for a failed primary fetch.
    pub fn failed(error: &GatewayError) -> Self {
        match error {
            GatewayError::NotConfigured(_) => Screen::SetupRequired(error.user_message()),
            GatewayError::NotFound => Screen::NotFound,
            _ => Screen::Unavailable,
        }
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Screen::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Screen::Ready(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Screen<U> {
        match self {
            Screen::Ready(value) => Screen::Ready(f(value)),
            Screen::SetupRequired(what) => Screen::SetupRequired(what),
            Screen::NotFound => Screen::NotFound,
            Screen::Unavailable => Screen::Unavailable,
        }
    }
}

/// Secondary fetches degrade to an empty set.
pub(crate) fn or_empty<T>(what: &str, result: Result<Vec<T>, GatewayError>) -> Vec<T> {
    match result {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(what, error = %e, "secondary fetch failed, continuing without it");
            Vec::new()
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::app::App;
    use crate::auth::MemoryAuth;
    use crate::gateway::{MemoryGateway, Table};
    use crate::model::{AuthUser, Session};
    use serde_json::json;
    use std::sync::Arc;

    pub struct Fixture {
        pub gateway: Arc<MemoryGateway>,
        pub auth: Arc<MemoryAuth>,
        pub app: App,
    }

    pub fn fixture() -> Fixture {
        let gateway = Arc::new(MemoryGateway::new());
        let auth = Arc::new(MemoryAuth::auto_confirming());
        let app = App::in_memory(gateway.clone(), auth.clone()).unwrap();
        Fixture { gateway, auth, app }
    }

    impl Fixture {
        pub fn sign_in_as(&self, user_id: &str) -> Session {
            let session = Session {
                access_token: format!("token-{user_id}"),
                refresh_token: String::new(),
                expires_at: None,
                user: AuthUser {
                    id: user_id.to_string(),
                    email: Some(format!("{user_id}@example.com")),
                    email_confirmed_at: None,
                },
            };
            self.app.session().set(Some(session.clone()));
            session
        }

        pub fn profile(&self, id: &str, username: &str) {
            self.gateway.seed(
                Table::Profiles,
                json!({"id": id, "username": username, "display_name": username.to_uppercase()}),
            );
        }

        pub fn code_post(&self, id: &str, author: &str, created_at: &str) {
            self.gateway.seed(
                Table::Posts,
                json!({
                    "id": id,
                    "user_id": author,
                    "type": "code",
                    "title": format!("post {id}"),
                    "code_snippet": "fn main() {}",
                    "code_language": "Rust",
                    "created_at": created_at,
                }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_bucket_message_names_bucket() {
        let err = ServiceError::Upload {
            bucket: Bucket::BannerImages,
            source: GatewayError::NotConfigured("Bucket not found".into()),
        };
        assert!(err.user_message().starts_with("Storage bucket \"banner-images\" not found"));
    }

    #[test]
    fn test_failed_screen_kinds() {
        let setup: Screen<()> = Screen::failed(&GatewayError::NotConfigured("posts".into()));
        assert!(matches!(setup, Screen::SetupRequired(_)));
        let down: Screen<()> = Screen::failed(&GatewayError::Connectivity("reset".into()));
        assert_eq!(down, Screen::Unavailable);
        assert_eq!(Screen::Ready(2).map(|n| n * 2).ready(), Some(4));
    }
}
