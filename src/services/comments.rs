// SPDX-License-Identifier: MPL-2.0

use crate::app::App;
use crate::cache::{CommentCache, ProfileCache};
use crate::gateway::Query;
use crate::model::{Comment, NewComment, Profile};
use crate::services::{ServiceError, or_empty};
use crate::sync::CommentItem;
use crate::sync::aggregate;
use crate::util::validate;
use tracing::warn;

pub struct CommentService<'a> {
    app: &'a App,
}

impl<'a> CommentService<'a> {
    pub fn new(app: &'a App) -> Self {
        Self { app }
    }

    /// Comments on `post_id`, oldest first, with their authors.
    pub async fn list(&self, post_id: &str) -> Vec<CommentItem> {
        let cache = CommentCache::new(self.app.cache());
        let comments = match self
            .app
            .remote()
            .fetch_many::<Comment>(&Query::new().eq("post_id", post_id).oldest_first())
            .await
        {
            Ok(comments) => {
                if let Err(e) = cache.store_batch(&comments) {
                    warn!(post_id, error = %e, "failed to cache comments");
                }
                comments
            }
            Err(e) => {
                warn!(post_id, error = %e, "failed to fetch comments, using cache");
                cache.for_post(post_id).unwrap_or_default()
            }
        };

        let mut author_ids: Vec<String> = comments.iter().map(|c| c.author_id.clone()).collect();
        author_ids.sort();
        author_ids.dedup();
        let profiles = or_empty(
            "comment authors",
            self.app
                .remote()
                .fetch_many::<Profile>(&Query::new().in_list("id", author_ids))
                .await,
        );
        if let Err(e) = ProfileCache::new(self.app.cache()).store_batch(&profiles) {
            warn!(post_id, error = %e, "failed to cache comment authors");
        }

        let profiles = aggregate::index_by(profiles, |p| p.id.clone());
        aggregate::join_comments(comments, &profiles)
    }

    /// Post a comment as the signed-in user. Returns the stored comment.
    pub async fn add(&self, post_id: &str, content: &str) -> Result<Comment, ServiceError> {
        let result = self.try_add(post_id, content).await;
        match &result {
            Ok(_) => self.app.notifier().success("Comment added!"),
            Err(ServiceError::Validation(v)) => self.app.notifier().error(v.user_message()),
            Err(ServiceError::NotSignedIn) => {
                self.app.notifier().error("Please login to comment")
            }
            Err(e) => {
                warn!(post_id, error = %e, "failed to post comment");
                self.app.notifier().error("Failed to post comment");
            }
        }
        result
    }

    async fn try_add(&self, post_id: &str, content: &str) -> Result<Comment, ServiceError> {
        let user_id = self.app.session().user_id().ok_or(ServiceError::NotSignedIn)?;
        let content = validate::required(content, "Comment")?;

        let row = NewComment {
            post_id: post_id.to_string(),
            user_id,
            content: content.to_string(),
        };
        let comment: Comment = self.app.remote().insert(&row).await?;
        if let Err(e) = CommentCache::new(self.app.cache()).add(&comment) {
            warn!(post_id, comment_id = %comment.id, error = %e, "failed to cache new comment");
        }
        Ok(comment)
    }
}
