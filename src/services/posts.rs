// SPDX-License-Identifier: MPL-2.0

use crate::app::App;
use crate::cache::PostCache;
use crate::config::DEFAULT_CODE_LANGUAGE;
use crate::model::{NewPost, Post, PostKind};
use crate::services::{MediaFile, ServiceError};
use crate::util::validate;
use tracing::{info, warn};

/// Where a meme's media comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemeSource {
    Upload(MediaFile),
    Url(String),
}

/// Contents of the compose form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostDraft {
    Code {
        title: String,
        snippet: String,
        /// Empty means the default language
        language: String,
    },
    Meme {
        title: String,
        media: MemeSource,
    },
}

impl PostDraft {
    pub fn kind(&self) -> PostKind {
        match self {
            PostDraft::Code { .. } => PostKind::Code,
            PostDraft::Meme { .. } => PostKind::Meme,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            PostDraft::Code { title, .. } | PostDraft::Meme { title, .. } => title,
        }
    }
}

pub struct PostService<'a> {
    app: &'a App,
}

impl<'a> PostService<'a> {
    pub fn new(app: &'a App) -> Self {
        Self { app }
    }

    /// Publish a post as the signed-in user.
    pub async fn create(&self, draft: &PostDraft) -> Result<Post, ServiceError> {
        let result = self.try_create(draft).await;
        match &result {
            Ok(_) => self.app.notifier().success("Post created successfully!"),
            Err(e) => {
                warn!(kind = %draft.kind(), error = %e, "failed to create post");
                self.app.notifier().error(e.user_message());
            }
        }
        result
    }

    async fn try_create(&self, draft: &PostDraft) -> Result<Post, ServiceError> {
        let user_id = self.app.session().user_id().ok_or(ServiceError::NotSignedIn)?;
        let title = validate::required(draft.title(), "Title")?.to_string();

        let row = match draft {
            PostDraft::Code {
                snippet, language, ..
            } => {
                let snippet = validate::required(snippet, "Code snippet")?;
                let language = language.trim();
                NewPost {
                    user_id: user_id.clone(),
                    title,
                    kind: PostKind::Code,
                    content_url: None,
                    code_snippet: Some(snippet.to_string()),
                    code_language: Some(if language.is_empty() {
                        DEFAULT_CODE_LANGUAGE.to_string()
                    } else {
                        language.to_string()
                    }),
                }
            }
            PostDraft::Meme { media, .. } => {
                let url = match media {
                    MemeSource::Upload(file) => {
                        self.app.uploads().upload_post_media(&user_id, file).await?
                    }
                    MemeSource::Url(url) => validate::required(url, "Media URL")?.to_string(),
                };
                NewPost {
                    user_id: user_id.clone(),
                    title,
                    kind: PostKind::Meme,
                    content_url: Some(url),
                    code_snippet: None,
                    code_language: None,
                }
            }
        };

        let post: Post = self.app.remote().insert(&row).await?;
        if let Err(e) = PostCache::new(self.app.cache()).store(&post) {
            warn!(post_id = %post.id, error = %e, "failed to cache new post");
        }
        info!(post_id = %post.id, user_id = %user_id, kind = %post.kind, "post created");
        Ok(post)
    }
}
