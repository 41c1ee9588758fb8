// SPDX-License-Identifier: MPL-2.0

use crate::app::App;
use crate::cache::AnalyticsCache;
use crate::config::TOP_POSTS_LIMIT;
use crate::gateway::{Query, Table};
use crate::model::{Post, PostAnalytics, Profile};
use crate::services::feed::load_extras;
use crate::services::{Screen, ServiceError, or_empty};
use crate::sync::aggregate::{self, AuthorSummary, PostStats};
use tracing::warn;

/// Site-wide totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteStats {
    pub users: u64,
    pub posts: u64,
    pub likes: u64,
    pub comments: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostInsights {
    pub post: Post,
    pub author: AuthorSummary,
    pub analytics: PostAnalytics,
    pub like_count: u64,
    pub comment_count: u64,
}

pub struct DashboardService<'a> {
    app: &'a App,
}

impl<'a> DashboardService<'a> {
    pub fn new(app: &'a App) -> Self {
        Self { app }
    }

    async fn count(&self, table: Table, query: Query) -> u64 {
        match self.app.remote().count(table, &query).await {
            Ok(n) => n,
            Err(e) => {
                warn!(%table, error = %e, "count failed");
                0
            }
        }
    }

    pub async fn stats(&self) -> SiteStats {
        let (users, posts, likes, comments) = tokio::join!(
            self.count(Table::Profiles, Query::new()),
            self.count(Table::Posts, Query::new()),
            self.count(Table::Likes, Query::new()),
            self.count(Table::Comments, Query::new()),
        );
        SiteStats {
            users,
            posts,
            likes,
            comments,
        }
    }

    /// The most recent posts with their analytics and tallies.
    pub async fn top_posts(&self) -> Screen<Vec<PostStats>> {
        let query = Query::new().newest_first().limit(TOP_POSTS_LIMIT);
        let posts = match self.app.remote().fetch_many::<Post>(&query).await {
            Ok(posts) => posts,
            Err(e) => {
                warn!(error = %e, "failed to load top posts");
                return Screen::failed(&e);
            }
        };

        let post_ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();
        let by_post = Query::new().in_list("post_id", post_ids);
        let (extras, analytics) = tokio::join!(
            load_extras(self.app, &posts, None),
            self.app.remote().fetch_many::<PostAnalytics>(&by_post),
        );
        let analytics = or_empty("post analytics", analytics);
        let cache = AnalyticsCache::new(self.app.cache());
        for snapshot in &analytics {
            if let Err(e) = cache.store(snapshot) {
                warn!(post_id = %snapshot.post_id, error = %e, "failed to cache analytics");
            }
        }

        let analytics = aggregate::index_by(analytics, |a| a.post_id.clone());
        Screen::Ready(aggregate::join_post_stats(posts, &extras, &analytics))
    }

    /// Detailed numbers for one post.
    pub async fn insights(&self, post_id: &str) -> Result<PostInsights, ServiceError> {
        let result = self.try_insights(post_id).await;
        match &result {
            Ok(_) => {}
            Err(ServiceError::NotFound) => self.app.notifier().error("Post not found"),
            Err(e) => {
                warn!(post_id, error = %e, "failed to load insights");
                self.app.notifier().error("Failed to load insights");
            }
        }
        result
    }

    async fn try_insights(&self, post_id: &str) -> Result<PostInsights, ServiceError> {
        let post = self
            .app
            .remote()
            .find::<Post>(&Query::new().eq("id", post_id))
            .await?
            .ok_or(ServiceError::NotFound)?;

        let by_post = || Query::new().eq("post_id", post_id);
        let by_author = Query::new().eq("id", post.author_id.as_str());
        let (author, analytics, like_count, comment_count) = tokio::join!(
            self.app.remote().find::<Profile>(&by_author),
            self.app.views().fetch(post_id),
            self.count(Table::Likes, by_post()),
            self.count(Table::Comments, by_post()),
        );
        let author = match author {
            Ok(Some(profile)) => AuthorSummary::from_profile(&profile),
            Ok(None) => AuthorSummary::anonymous(&post.author_id),
            Err(e) => {
                warn!(post_id, error = %e, "failed to load author");
                AuthorSummary::anonymous(&post.author_id)
            }
        };

        Ok(PostInsights {
            post,
            author,
            analytics,
            like_count,
            comment_count,
        })
    }
}
