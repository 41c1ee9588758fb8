// SPDX-License-Identifier: MPL-2.0

//! Optimistic toggles for membership records (likes, follows).
//!
//! The cache flips first so views update at once; the remote write follows
//! and a failure puts the cache back exactly as it was. Toggles on the same
//! (kind, target, user) run one at a time: a second click waits for the
//! first to settle and then toggles from the settled state.

use crate::cache::{CacheDb, CacheError, CacheEvent, FollowCache, LikeCache, PostCache, ProfileCache};
use crate::gateway::{GatewayError, Query, Remote, Table};
use crate::model::{Follow, Like, Session};
use crate::notify::Notifier;
use crate::runtime::spawn_background;
use crate::util::ValidationError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{Mutex as TurnLock, OwnedMutexGuard};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum MutationError {
    #[error("not signed in")]
    NotSignedIn,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Remote(#[from] GatewayError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("toggle task failed: {0}")]
    Task(#[from] JoinError),
}

impl MutationError {
    pub fn user_message(&self) -> String {
        match self {
            MutationError::NotSignedIn => "Please login to continue".to_string(),
            MutationError::Validation(v) => v.user_message(),
            MutationError::Remote(e) => e.user_message(),
            MutationError::Cache(_) | MutationError::Task(_) => "Something went wrong".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Like,
    Follow,
}

/// Cached state captured before an optimistic change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub member: bool,
    /// Tally on the target, when the target is cached
    pub count: Option<u32>,
    /// Tally on the acting user's side, for relations that keep one
    pub actor_count: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub member: bool,
    pub count: Option<u32>,
}

/// A boolean relation between the acting user and a target that the
/// controller can toggle.
#[async_trait]
pub trait Membership: Send + Sync {
    fn kind(&self) -> MutationKind;

    /// Shown when nobody is signed in.
    fn sign_in_prompt(&self) -> &'static str;

    /// Rejected before anything is touched.
    fn validate(&self, _user_id: &str, _target: &str) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Toast after a confirmed change, if any.
    fn confirmation(&self, _member: bool) -> Option<&'static str> {
        None
    }

    fn snapshot(&self, cache: &CacheDb, user_id: &str, target: &str) -> Result<Snapshot, CacheError>;

    /// Set membership in the cache and shift the tally. Returns the new tally.
    fn apply(
        &self,
        cache: &CacheDb,
        user_id: &str,
        target: &str,
        member: bool,
    ) -> Result<Option<u32>, CacheError>;

    fn restore(
        &self,
        cache: &CacheDb,
        user_id: &str,
        target: &str,
        snapshot: Snapshot,
    ) -> Result<(), CacheError>;

    fn event(&self, user_id: &str, target: &str, member: bool, count: Option<u32>) -> CacheEvent;

    async fn insert(&self, remote: &Remote, user_id: &str, target: &str) -> Result<(), GatewayError>;

    async fn delete(&self, remote: &Remote, user_id: &str, target: &str) -> Result<(), GatewayError>;
}

/// The viewer likes a post.
pub struct Likes;

#[async_trait]
impl Membership for Likes {
    fn kind(&self) -> MutationKind {
        MutationKind::Like
    }

    fn sign_in_prompt(&self) -> &'static str {
        "Please login to like posts"
    }

    fn snapshot(&self, cache: &CacheDb, user_id: &str, post_id: &str) -> Result<Snapshot, CacheError> {
        Ok(Snapshot {
            member: LikeCache::new(cache).contains(user_id, post_id)?,
            count: PostCache::new(cache).like_count(post_id)?,
            actor_count: None,
        })
    }

    fn apply(
        &self,
        cache: &CacheDb,
        user_id: &str,
        post_id: &str,
        liked: bool,
    ) -> Result<Option<u32>, CacheError> {
        LikeCache::new(cache).set(user_id, post_id, liked)?;
        let delta = if liked { 1 } else { -1 };
        PostCache::new(cache).adjust_like_count(post_id, delta)
    }

    fn restore(
        &self,
        cache: &CacheDb,
        user_id: &str,
        post_id: &str,
        snapshot: Snapshot,
    ) -> Result<(), CacheError> {
        LikeCache::new(cache).set(user_id, post_id, snapshot.member)?;
        if let Some(count) = snapshot.count {
            PostCache::new(cache).set_like_count(post_id, count)?;
        }
        Ok(())
    }

    fn event(&self, user_id: &str, post_id: &str, liked: bool, count: Option<u32>) -> CacheEvent {
        CacheEvent::LikeChanged {
            post_id: post_id.to_string(),
            user_id: user_id.to_string(),
            liked,
            like_count: count,
        }
    }

    async fn insert(&self, remote: &Remote, user_id: &str, post_id: &str) -> Result<(), GatewayError> {
        let like = Like {
            user_id: user_id.to_string(),
            post_id: post_id.to_string(),
        };
        remote.insert_only(Table::Likes, &like).await
    }

    async fn delete(&self, remote: &Remote, user_id: &str, post_id: &str) -> Result<(), GatewayError> {
        let query = Query::new().eq("user_id", user_id).eq("post_id", post_id);
        remote.delete(Table::Likes, &query).await
    }
}

/// The viewer follows another profile.
pub struct Follows;

#[async_trait]
impl Membership for Follows {
    fn kind(&self) -> MutationKind {
        MutationKind::Follow
    }

    fn sign_in_prompt(&self) -> &'static str {
        "Please login to follow users"
    }

    fn validate(&self, user_id: &str, target: &str) -> Result<(), ValidationError> {
        if user_id == target {
            return Err(ValidationError::SelfFollow);
        }
        Ok(())
    }

    fn confirmation(&self, following: bool) -> Option<&'static str> {
        Some(if following { "Following!" } else { "Unfollowed" })
    }

    fn snapshot(&self, cache: &CacheDb, user_id: &str, target: &str) -> Result<Snapshot, CacheError> {
        let count = match ProfileCache::new(cache).get(target) {
            Ok(profile) => Some(profile.follower_count),
            Err(CacheError::NotFound) => None,
            Err(e) => return Err(e),
        };
        Ok(Snapshot {
            member: FollowCache::new(cache).contains(user_id, target)?,
            count,
            actor_count: ProfileCache::new(cache).following_count(user_id)?,
        })
    }

    fn apply(
        &self,
        cache: &CacheDb,
        user_id: &str,
        target: &str,
        following: bool,
    ) -> Result<Option<u32>, CacheError> {
        FollowCache::new(cache).set(user_id, target, following)?;
        let delta = if following { 1 } else { -1 };
        let profiles = ProfileCache::new(cache);
        profiles.adjust_following_count(user_id, delta)?;
        profiles.adjust_follower_count(target, delta)
    }

    fn restore(
        &self,
        cache: &CacheDb,
        user_id: &str,
        target: &str,
        snapshot: Snapshot,
    ) -> Result<(), CacheError> {
        FollowCache::new(cache).set(user_id, target, snapshot.member)?;
        let profiles = ProfileCache::new(cache);
        if let Some(count) = snapshot.count {
            profiles.set_follower_count(target, count)?;
        }
        if let Some(count) = snapshot.actor_count {
            profiles.set_following_count(user_id, count)?;
        }
        Ok(())
    }

    fn event(&self, user_id: &str, target: &str, following: bool, count: Option<u32>) -> CacheEvent {
        CacheEvent::FollowChanged {
            follower_id: user_id.to_string(),
            following_id: target.to_string(),
            following,
            follower_count: count,
        }
    }

    async fn insert(&self, remote: &Remote, user_id: &str, target: &str) -> Result<(), GatewayError> {
        let follow = Follow {
            follower_id: user_id.to_string(),
            following_id: target.to_string(),
        };
        remote.insert_only(Table::Follows, &follow).await
    }

    async fn delete(&self, remote: &Remote, user_id: &str, target: &str) -> Result<(), GatewayError> {
        let query = Query::new()
            .eq("follower_id", user_id)
            .eq("following_id", target);
        remote.delete(Table::Follows, &query).await
    }
}

type ToggleKey = (MutationKind, String, String);
type Turns = Arc<Mutex<HashMap<ToggleKey, Arc<TurnLock<()>>>>>;

/// A caller's place in the queue for one toggle key. The key is forgotten
/// when the last holder lets go, whether or not its toggle ever ran.
struct Slot {
    turns: Turns,
    key: ToggleKey,
    lock: Arc<TurnLock<()>>,
}

impl Slot {
    fn join(turns: &Turns, key: ToggleKey) -> Self {
        let lock = lock_turns(turns).entry(key.clone()).or_default().clone();
        Self {
            turns: turns.clone(),
            key,
            lock,
        }
    }

    async fn wait(&self) -> OwnedMutexGuard<()> {
        self.lock.clone().lock_owned().await
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        let mut turns = lock_turns(&self.turns);
        // One reference in the map, one here
        if Arc::strong_count(&self.lock) <= 2 {
            turns.remove(&self.key);
        }
    }
}

fn lock_turns(turns: &Turns) -> MutexGuard<'_, HashMap<ToggleKey, Arc<TurnLock<()>>>> {
    turns.lock().unwrap_or_else(|e| e.into_inner())
}

/// Applies toggles optimistically and reconciles them with the store.
///
/// Once a toggle holds its turn, the optimistic change, the remote write
/// and the reconciliation run on a background task. A caller that stops
/// waiting (a timeout, a closed screen) does not strand the cache in the
/// optimistic state.
#[derive(Clone)]
pub struct MutationController {
    cache: CacheDb,
    remote: Remote,
    notifier: Notifier,
    turns: Turns,
}

impl MutationController {
    pub fn new(cache: CacheDb, remote: Remote, notifier: Notifier) -> Self {
        Self {
            cache,
            remote,
            notifier,
            turns: Arc::default(),
        }
    }

    pub async fn toggle_like(
        &self,
        viewer: Option<&Session>,
        post_id: &str,
    ) -> Result<ToggleOutcome, MutationError> {
        self.toggle(Likes, viewer, post_id).await
    }

    pub async fn toggle_follow(
        &self,
        viewer: Option<&Session>,
        profile_id: &str,
    ) -> Result<ToggleOutcome, MutationError> {
        self.toggle(Follows, viewer, profile_id).await
    }

    /// Number of (kind, target, user) triples with a toggle running or queued.
    pub fn in_flight(&self) -> usize {
        lock_turns(&self.turns).len()
    }

    pub async fn toggle<M>(
        &self,
        membership: M,
        viewer: Option<&Session>,
        target: &str,
    ) -> Result<ToggleOutcome, MutationError>
    where
        M: Membership + 'static,
    {
        let Some(user_id) = viewer.map(Session::user_id) else {
            self.notifier.error(membership.sign_in_prompt());
            return Err(MutationError::NotSignedIn);
        };
        if let Err(e) = membership.validate(user_id, target) {
            self.notifier.error(e.user_message());
            return Err(e.into());
        }

        let slot = Slot::join(
            &self.turns,
            (membership.kind(), target.to_string(), user_id.to_string()),
        );
        let turn = slot.wait().await;

        let controller = self.clone();
        let user_id = user_id.to_string();
        let target = target.to_string();
        let task = spawn_background(async move {
            let result = controller.run(&membership, &user_id, &target).await;
            drop(turn);
            drop(slot);
            result
        });
        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "toggle task did not finish");
                self.notifier.error("Something went wrong");
                Err(e.into())
            }
        }
    }

    async fn run<M: Membership + ?Sized>(
        &self,
        membership: &M,
        user_id: &str,
        target: &str,
    ) -> Result<ToggleOutcome, MutationError> {
        let before = membership.snapshot(&self.cache, user_id, target)?;
        let member = !before.member;

        let count = membership.apply(&self.cache, user_id, target, member)?;
        self.cache
            .emit(membership.event(user_id, target, member, count));
        debug!(kind = ?membership.kind(), target, user_id, member, "optimistic toggle applied");

        let written = if member {
            membership.insert(&self.remote, user_id, target).await
        } else {
            membership.delete(&self.remote, user_id, target).await
        };

        match written {
            Ok(()) => {}
            Err(e) if member && e.is_duplicate() => {
                // Already there remotely, which is the state we wanted
                info!(kind = ?membership.kind(), target, user_id, "membership already present");
            }
            Err(e) => {
                warn!(kind = ?membership.kind(), target, user_id, error = %e, "toggle failed, rolling back");
                membership.restore(&self.cache, user_id, target, before)?;
                self.cache
                    .emit(membership.event(user_id, target, before.member, before.count));
                self.notifier.error(e.user_message());
                return Err(e.into());
            }
        }

        if let Some(message) = membership.confirmation(member) {
            self.notifier.success(message);
        }
        Ok(ToggleOutcome { member, count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthUser, Post, PostKind, Profile};
    use crate::gateway::MemoryGateway;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        gateway: Arc<MemoryGateway>,
        cache: CacheDb,
        notifier: Notifier,
        controller: Arc<MutationController>,
    }

    fn harness() -> Harness {
        let gateway = Arc::new(MemoryGateway::new());
        let cache = CacheDb::open_in_memory().unwrap();
        let notifier = Notifier::new();
        let remote = Remote::new(gateway.clone(), Duration::from_secs(2));
        let controller = Arc::new(MutationController::new(
            cache.clone(),
            remote,
            notifier.clone(),
        ));

        gateway.seed(Table::Posts, json!({"id": "p1", "user_id": "author", "type": "code", "title": "t"}));
        PostCache::new(&cache)
            .store(&Post {
                id: "p1".into(),
                author_id: "author".into(),
                kind: PostKind::Code,
                title: "t".into(),
                content_url: None,
                code_snippet: Some("x".into()),
                code_language: Some("Rust".into()),
                created_at: Utc::now(),
            })
            .unwrap();
        ProfileCache::new(&cache)
            .store(&Profile::placeholder("author", "author"))
            .unwrap();

        Harness {
            gateway,
            cache,
            notifier,
            controller,
        }
    }

    fn session(id: &str) -> Session {
        Session {
            access_token: "t".into(),
            refresh_token: "r".into(),
            expires_at: None,
            user: AuthUser {
                id: id.into(),
                email: None,
                email_confirmed_at: None,
            },
        }
    }

    #[tokio::test]
    async fn test_like_then_unlike() {
        let h = harness();
        let viewer = session("u1");

        let liked = h.controller.toggle_like(Some(&viewer), "p1").await.unwrap();
        assert_eq!(liked, ToggleOutcome { member: true, count: Some(1) });
        assert_eq!(h.gateway.rows(Table::Likes).len(), 1);

        let unliked = h.controller.toggle_like(Some(&viewer), "p1").await.unwrap();
        assert_eq!(unliked, ToggleOutcome { member: false, count: Some(0) });
        assert!(h.gateway.rows(Table::Likes).is_empty());
        assert_eq!(h.controller.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_double_toggle_returns_to_start() {
        let h = harness();
        h.gateway.set_latency(Duration::from_millis(30));
        let viewer = session("u1");

        let (first, second) = tokio::join!(
            h.controller.toggle_like(Some(&viewer), "p1"),
            h.controller.toggle_like(Some(&viewer), "p1"),
        );
        assert!(first.unwrap().member);
        assert!(!second.unwrap().member);

        assert!(!LikeCache::new(&h.cache).contains("u1", "p1").unwrap());
        assert_eq!(PostCache::new(&h.cache).counts("p1").unwrap().likes, 0);
        assert!(h.gateway.rows(Table::Likes).is_empty());
        assert_eq!(
            h.gateway.writes_to(Table::Likes),
            vec![crate::gateway::WriteKind::Insert, crate::gateway::WriteKind::Delete]
        );
    }

    #[tokio::test]
    async fn test_optimistic_state_visible_before_remote_resolves() {
        let h = harness();
        h.gateway.set_latency(Duration::from_millis(100));
        let controller = h.controller.clone();
        let viewer = session("u1");

        let task = tokio::spawn(async move { controller.toggle_like(Some(&viewer), "p1").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(LikeCache::new(&h.cache).contains("u1", "p1").unwrap());
        assert_eq!(h.controller.in_flight(), 1);

        task.await.unwrap().unwrap();
        assert_eq!(h.controller.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_self_follow_never_writes() {
        let h = harness();
        let viewer = session("author");

        let err = h
            .controller
            .toggle_follow(Some(&viewer), "author")
            .await
            .unwrap_err();
        assert!(matches!(err, MutationError::Validation(ValidationError::SelfFollow)));
        assert!(h.gateway.writes().is_empty());
        assert_eq!(h.notifier.drain()[0].message, "You cannot follow yourself");
    }

    #[tokio::test]
    async fn test_failed_follow_rolls_back_fully() {
        let h = harness();
        let mut events = h.cache.subscribe();
        let viewer = session("u1");
        let before_member = FollowCache::new(&h.cache).contains("u1", "author").unwrap();
        let before_count = ProfileCache::new(&h.cache).get("author").unwrap().follower_count;

        h.gateway.fail_writes(
            Table::Follows,
            GatewayError::Connectivity("connection reset".into()),
        );
        let err = h
            .controller
            .toggle_follow(Some(&viewer), "author")
            .await
            .unwrap_err();
        assert!(matches!(err, MutationError::Remote(GatewayError::Connectivity(_))));

        assert_eq!(
            FollowCache::new(&h.cache).contains("u1", "author").unwrap(),
            before_member
        );
        assert_eq!(
            ProfileCache::new(&h.cache).get("author").unwrap().follower_count,
            before_count
        );

        // optimistic event, then the rollback
        assert!(matches!(
            events.try_recv().unwrap(),
            CacheEvent::FollowChanged { following: true, .. }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            CacheEvent::FollowChanged { following: false, .. }
        ));
        let notices = h.notifier.drain();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].message, "Something went wrong. Please try again.");
    }

    #[tokio::test]
    async fn test_follow_confirmation_messages() {
        let h = harness();
        let viewer = session("u1");
        h.controller.toggle_follow(Some(&viewer), "author").await.unwrap();
        h.controller.toggle_follow(Some(&viewer), "author").await.unwrap();
        let messages: Vec<_> = h.notifier.drain().into_iter().map(|n| n.message).collect();
        assert_eq!(messages, vec!["Following!", "Unfollowed"]);
    }

    #[tokio::test]
    async fn test_signed_out_toggle_prompts_login() {
        let h = harness();
        let err = h.controller.toggle_like(None, "p1").await.unwrap_err();
        assert!(matches!(err, MutationError::NotSignedIn));
        assert_eq!(h.notifier.drain()[0].message, "Please login to like posts");
        assert!(h.gateway.writes().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_like_keeps_liked_state() {
        let h = harness();
        // Liked elsewhere, cache does not know yet
        h.gateway
            .seed(Table::Likes, json!({"user_id": "u1", "post_id": "p1"}));
        let viewer = session("u1");

        let outcome = h.controller.toggle_like(Some(&viewer), "p1").await.unwrap();
        assert!(outcome.member);
        assert!(LikeCache::new(&h.cache).contains("u1", "p1").unwrap());
    }

    #[tokio::test]
    async fn test_abandoned_toggle_still_completes() {
        let h = harness();
        h.gateway.set_latency(Duration::from_millis(200));
        let viewer = session("u1");

        let waited = tokio::time::timeout(
            Duration::from_millis(20),
            h.controller.toggle_like(Some(&viewer), "p1"),
        )
        .await;
        assert!(waited.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.gateway.rows(Table::Likes).len(), 1);
        assert!(LikeCache::new(&h.cache).contains("u1", "p1").unwrap());
        assert_eq!(PostCache::new(&h.cache).counts("p1").unwrap().likes, 1);
        assert_eq!(h.controller.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_like_on_uncached_post_has_no_count() {
        let h = harness();
        h.gateway.seed(
            Table::Posts,
            json!({"id": "p2", "user_id": "author", "type": "code", "title": "t"}),
        );
        h.gateway
            .seed(Table::Likes, json!({"user_id": "u3", "post_id": "p2"}));
        let mut events = h.cache.subscribe();
        let viewer = session("u1");

        let outcome = h.controller.toggle_like(Some(&viewer), "p2").await.unwrap();
        assert_eq!(outcome, ToggleOutcome { member: true, count: None });
        assert_eq!(
            events.try_recv().unwrap(),
            CacheEvent::LikeChanged {
                post_id: "p2".into(),
                user_id: "u1".into(),
                liked: true,
                like_count: None,
            }
        );
        assert_eq!(h.gateway.rows(Table::Likes).len(), 2);
    }

    #[tokio::test]
    async fn test_follow_moves_viewer_following_count() {
        let h = harness();
        let profiles = ProfileCache::new(&h.cache);
        profiles.store(&Profile::placeholder("u1", "u1")).unwrap();
        let viewer = session("u1");

        h.controller.toggle_follow(Some(&viewer), "author").await.unwrap();
        assert_eq!(profiles.get("u1").unwrap().following_count, 1);
        assert_eq!(profiles.get("author").unwrap().follower_count, 1);

        h.gateway.fail_writes(
            Table::Follows,
            GatewayError::Connectivity("connection reset".into()),
        );
        h.controller
            .toggle_follow(Some(&viewer), "author")
            .await
            .unwrap_err();
        assert_eq!(profiles.get("u1").unwrap().following_count, 1);
        assert_eq!(profiles.get("author").unwrap().follower_count, 1);
        assert!(FollowCache::new(&h.cache).contains("u1", "author").unwrap());
    }
}
