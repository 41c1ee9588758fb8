// SPDX-License-Identifier: MPL-2.0

//! Best-effort view tracking and engagement recomputation.
//!
//! The first time a post is shown in this process a view event is appended
//! in the background and the post's analytics are re-derived from the view
//! log. Nothing here is awaited by rendering and no failure reaches the user;
//! views fall back to stale or zero analytics.

use crate::cache::{AnalyticsCache, CacheDb};
use crate::gateway::{GatewayError, Query, Remote, Table};
use crate::model::{NewPostView, PostAnalytics, PostView};
use crate::runtime::spawn_background;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Per-post progress of view tracking within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Unviewed,
    ViewRecorded,
    CountsRefreshed,
}

/// `(likes + comments) / max(views, 1) * 100`
pub fn engagement_rate(likes: u64, comments: u64, views: u64) -> f64 {
    (likes + comments) as f64 / views.max(1) as f64 * 100.0
}

/// Rate as shown to users, two decimals.
pub fn format_rate(rate: f64) -> String {
    format!("{rate:.2}%")
}

#[derive(Default)]
struct Progress {
    states: HashMap<String, ViewState>,
    /// Posts with a tracking task running or done
    claimed: HashSet<String>,
}

impl Progress {
    fn clear(&mut self) {
        self.states.clear();
        self.claimed.clear();
    }
}

#[derive(Clone)]
pub struct ViewTracker {
    remote: Remote,
    cache: CacheDb,
    progress: Arc<Mutex<Progress>>,
}

impl ViewTracker {
    pub fn new(remote: Remote, cache: CacheDb) -> Self {
        Self {
            remote,
            cache,
            progress: Arc::new(Mutex::new(Progress::default())),
        }
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self, post_id: &str) -> ViewState {
        self.progress()
            .states
            .get(post_id)
            .copied()
            .unwrap_or(ViewState::Unviewed)
    }

    /// Forgets every post seen so far when called, e.g. after the viewer
    /// changes. Keeps no backend handles alive.
    pub fn resetter(&self) -> impl Fn() + Send + Sync + 'static {
        let progress = Arc::downgrade(&self.progress);
        move || {
            if let Some(progress) = progress.upgrade() {
                progress.lock().unwrap_or_else(|e| e.into_inner()).clear();
            }
        }
    }

    fn advance(&self, post_id: &str, state: ViewState) {
        self.progress().states.insert(post_id.to_string(), state);
    }

    /// Record that `post_id` was shown. Only the first call per post starts
    /// work; the returned handle is for callers that want to wait on it.
    pub fn track_view(&self, post_id: &str, viewer_id: Option<&str>) -> Option<JoinHandle<()>> {
        if !self.progress().claimed.insert(post_id.to_string()) {
            return None;
        }

        let tracker = self.clone();
        let post_id = post_id.to_string();
        let viewer_id = viewer_id.map(str::to_string);
        Some(spawn_background(async move {
            tracker.record(&post_id, viewer_id).await;
        }))
    }

    async fn record(&self, post_id: &str, viewer_id: Option<String>) {
        let view = NewPostView {
            post_id: post_id.to_string(),
            user_id: viewer_id,
        };
        if let Err(e) = self.remote.insert_only(Table::PostViews, &view).await {
            warn!(post_id, error = %e, "failed to record view");
            // Let a later render try again
            self.progress().claimed.remove(post_id);
            return;
        }
        self.advance(post_id, ViewState::ViewRecorded);

        match self.recompute(post_id).await {
            Ok(analytics) => {
                debug!(
                    post_id,
                    views = analytics.view_count,
                    unique = analytics.unique_viewers,
                    "analytics refreshed"
                );
                self.advance(post_id, ViewState::CountsRefreshed);
            }
            Err(e) => warn!(post_id, error = %e, "failed to refresh analytics"),
        }
    }

    /// Re-derive the full snapshot from the view log and engagement rows.
    ///
    /// The engagement rate is recomputed here too, against the fresh view
    /// count, so every `CountsRefreshed` snapshot satisfies the rate formula.
    /// The cost is two extra count queries per first view of a post. A rate
    /// refresh without a new view goes through
    /// [`ViewTracker::refresh_engagement`].
    async fn recompute(&self, post_id: &str) -> Result<PostAnalytics, GatewayError> {
        let by_post = Query::new().eq("post_id", post_id);
        let views = self.remote.count(Table::PostViews, &by_post).await?;
        let log: Vec<PostView> = self.remote.fetch_many(&by_post).await?;
        let unique_viewers = log
            .iter()
            .filter_map(|v| v.viewer_id.as_deref())
            .collect::<HashSet<_>>()
            .len() as u64;
        let (likes, comments) = self.engagement(post_id).await?;

        let analytics = PostAnalytics {
            post_id: post_id.to_string(),
            view_count: views,
            unique_viewers,
            engagement_rate: engagement_rate(likes, comments, views),
            last_viewed_at: Some(Utc::now()),
        };
        self.persist(analytics).await
    }

    async fn engagement(&self, post_id: &str) -> Result<(u64, u64), GatewayError> {
        let by_post = Query::new().eq("post_id", post_id);
        let (likes, comments) = tokio::join!(
            self.remote.count(Table::Likes, &by_post),
            self.remote.count(Table::Comments, &by_post),
        );
        Ok((likes?, comments?))
    }

    async fn persist(&self, analytics: PostAnalytics) -> Result<PostAnalytics, GatewayError> {
        let stored: PostAnalytics = self.remote.upsert(&analytics).await?;
        if let Err(e) = AnalyticsCache::new(&self.cache).store(&stored) {
            warn!(post_id = %stored.post_id, error = %e, "failed to cache analytics");
        }
        Ok(stored)
    }

    /// Recompute the engagement rate against the stored view count.
    pub async fn refresh_engagement(&self, post_id: &str) -> PostAnalytics {
        let result: Result<PostAnalytics, GatewayError> = async {
            let mut analytics = self
                .remote
                .find::<PostAnalytics>(&Query::new().eq("post_id", post_id))
                .await?
                .unwrap_or_else(|| PostAnalytics::empty(post_id));
            let (likes, comments) = self.engagement(post_id).await?;
            analytics.engagement_rate = engagement_rate(likes, comments, analytics.view_count);
            self.persist(analytics).await
        }
        .await;

        match result {
            Ok(analytics) => analytics,
            Err(e) => {
                warn!(post_id, error = %e, "failed to refresh engagement");
                self.cached_or_empty(post_id)
            }
        }
    }

    /// Current analytics for `post_id`, never failing.
    pub async fn fetch(&self, post_id: &str) -> PostAnalytics {
        match self
            .remote
            .find::<PostAnalytics>(&Query::new().eq("post_id", post_id))
            .await
        {
            Ok(Some(analytics)) => {
                if let Err(e) = AnalyticsCache::new(&self.cache).store(&analytics) {
                    warn!(post_id, error = %e, "failed to cache analytics");
                }
                analytics
            }
            Ok(None) => PostAnalytics::empty(post_id),
            Err(e) => {
                warn!(post_id, error = %e, "failed to fetch analytics");
                self.cached_or_empty(post_id)
            }
        }
    }

    fn cached_or_empty(&self, post_id: &str) -> PostAnalytics {
        AnalyticsCache::new(&self.cache)
            .get(post_id)
            .ok()
            .flatten()
            .unwrap_or_else(|| PostAnalytics::empty(post_id))
    }
}
