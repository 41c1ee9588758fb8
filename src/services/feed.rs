// SPDX-License-Identifier: MPL-2.0

use crate::app::App;
use crate::cache::{CommentCache, LikeCache, PostCache, PostCounts, ProfileCache};
use crate::gateway::{Query, Table};
use crate::model::{Comment, Like, Post, Profile};
use crate::services::{Screen, ServiceError, or_empty};
use crate::sync::aggregate::{self, FeedItem, PostExtras};
use crate::sync::{MutationError, ToggleOutcome};
use crate::util::ValidationError;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

pub struct FeedService<'a> {
    app: &'a App,
}

impl<'a> FeedService<'a> {
    pub fn new(app: &'a App) -> Self {
        Self { app }
    }

    /// All posts, newest first, joined with authors and tallies.
    pub async fn load(&self) -> Screen<Vec<FeedItem>> {
        let posts = match self
            .app
            .remote()
            .fetch_many::<Post>(&Query::new().newest_first())
            .await
        {
            Ok(posts) => posts,
            Err(e) => {
                error!(error = %e, "failed to load feed");
                let screen = Screen::failed(&e);
                if screen == Screen::Unavailable {
                    self.app.notifier().error("Error loading feed");
                }
                return screen;
            }
        };

        let viewer = self.app.session().user_id();
        let extras = load_extras(self.app, &posts, viewer.as_deref()).await;
        debug!(posts = posts.len(), "feed loaded");
        Screen::Ready(aggregate::join_posts(posts, &extras))
    }

    pub async fn toggle_like(&self, post_id: &str) -> Result<ToggleOutcome, MutationError> {
        let viewer = self.app.viewer();
        self.app
            .mutations()
            .toggle_like(viewer.as_ref(), post_id)
            .await
    }

    /// Remove one of the viewer's own posts.
    pub async fn delete_post(&self, post_id: &str) -> Result<(), ServiceError> {
        let result = self.try_delete(post_id).await;
        match &result {
            Ok(()) => self.app.notifier().success("Post deleted successfully"),
            Err(ServiceError::Validation(v)) => self.app.notifier().error(v.user_message()),
            Err(e) => {
                warn!(post_id, error = %e, "failed to delete post");
                self.app.notifier().error("Error deleting post");
            }
        }
        result
    }

    async fn try_delete(&self, post_id: &str) -> Result<(), ServiceError> {
        let viewer = self.app.session().user_id().ok_or(ServiceError::NotSignedIn)?;

        let author_id = match PostCache::new(self.app.cache()).get(post_id) {
            Ok(post) => post.author_id,
            Err(_) => {
                self.app
                    .remote()
                    .find::<Post>(&Query::new().eq("id", post_id))
                    .await?
                    .ok_or(ServiceError::NotFound)?
                    .author_id
            }
        };
        if author_id != viewer {
            return Err(ValidationError::NotOwner.into());
        }

        let query = Query::new().eq("id", post_id).eq("user_id", viewer.as_str());
        self.app.remote().delete(Table::Posts, &query).await?;
        PostCache::new(self.app.cache()).remove(post_id)?;
        info!(post_id, "post deleted");
        Ok(())
    }
}

/// Fetch authors, likes and comments for `posts` concurrently, cache them,
/// and build the join input. Failures degrade to placeholders and zeros.
pub(crate) async fn load_extras(app: &App, posts: &[Post], viewer_id: Option<&str>) -> PostExtras {
    if posts.is_empty() {
        return PostExtras::default();
    }

    let post_ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();
    let authors = Query::new().in_list("id", aggregate::author_ids(posts));
    let by_post = Query::new().in_list("post_id", post_ids.clone());

    let remote = app.remote();
    let (profiles, likes, comments) = tokio::join!(
        remote.fetch_many::<Profile>(&authors),
        remote.fetch_many::<Like>(&by_post),
        remote.fetch_many::<Comment>(&by_post),
    );
    let profiles = or_empty("profiles", profiles);
    let comments = or_empty("comments", comments);
    // Keep the cached memberships when the like rows could not be fetched
    let likes = match likes {
        Ok(likes) => Some(likes),
        Err(e) => {
            warn!(error = %e, "secondary fetch failed, continuing without likes");
            None
        }
    };

    let viewer_likes = match (viewer_id, &likes) {
        (Some(viewer), Some(likes)) => likes
            .iter()
            .filter(|l| l.user_id == viewer)
            .map(|l| l.post_id.clone())
            .collect(),
        (Some(viewer), None) => LikeCache::new(app.cache())
            .liked_among(viewer, &post_ids)
            .unwrap_or_default(),
        (None, _) => HashSet::new(),
    };
    let like_rows = likes.as_deref().unwrap_or_default();
    let extras = PostExtras {
        viewer_likes,
        likes: aggregate::tally_by(like_rows, |l| l.post_id.as_str()),
        comments: aggregate::tally_by(&comments, |c| c.post_id.as_str()),
        profiles: aggregate::index_by(profiles, |p| p.id.clone()),
    };

    if let Err(e) = remember(app, posts, &post_ids, &extras, likes.as_deref(), &comments) {
        warn!(error = %e, "failed to cache feed");
    }
    extras
}

fn remember(
    app: &App,
    posts: &[Post],
    post_ids: &[String],
    extras: &PostExtras,
    likes: Option<&[Like]>,
    comments: &[Comment],
) -> Result<(), crate::cache::CacheError> {
    let cache = app.cache();
    let post_cache = PostCache::new(cache);
    post_cache.store_batch(posts)?;
    let profiles: Vec<Profile> = extras.profiles.values().cloned().collect();
    ProfileCache::new(cache).store_batch(&profiles)?;
    CommentCache::new(cache).store_batch(comments)?;

    let Some(likes) = likes else {
        // Tallies stay as they were, only comments are fresh
        for post in posts {
            let mut counts = post_cache.counts(&post.id)?;
            counts.comments = extras.comments.get(&post.id);
            post_cache.set_counts(&post.id, counts)?;
        }
        return Ok(());
    };
    LikeCache::new(cache).replace_for_posts(post_ids, likes)?;
    for post in posts {
        post_cache.set_counts(
            &post.id,
            PostCounts {
                likes: extras.likes.get(&post.id),
                comments: extras.comments.get(&post.id),
            },
        )?;
    }
    Ok(())
}
