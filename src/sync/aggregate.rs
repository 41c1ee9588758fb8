// SPDX-License-Identifier: MPL-2.0

//! Client-side joins.
//!
//! The store is queried one table at a time, so screens fetch posts first and
//! then the rows that hang off them. The functions here merge those sets into
//! display records in a single pass each, keeping the order of the primary
//! set and filling misses with placeholders.

use crate::model::{Comment, Post, PostAnalytics, Profile};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Shown in place of an author whose profile could not be found.
pub const ANONYMOUS: &str = "Anonymous";

/// Map each item by `key`. Later items replace earlier ones with the same key.
pub fn index_by<T, K, F>(items: impl IntoIterator<Item = T>, key: F) -> HashMap<K, T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut index = HashMap::new();
    for item in items {
        index.insert(key(&item), item);
    }
    index
}

/// Occurrence count per foreign key. Keys never seen read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally(HashMap<String, u32>);

impl Tally {
    pub fn get(&self, key: &str) -> u32 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Group `items` by `key` and count each group.
pub fn tally_by<'a, T: 'a, F>(items: impl IntoIterator<Item = &'a T>, key: F) -> Tally
where
    F: Fn(&'a T) -> &'a str,
{
    let mut counts = HashMap::new();
    for item in items {
        *counts.entry(key(item).to_string()).or_insert(0) += 1;
    }
    Tally(counts)
}

/// What a list row shows about an author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorSummary {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl AuthorSummary {
    pub fn anonymous(id: &str) -> Self {
        Self {
            id: id.to_string(),
            username: ANONYMOUS.to_string(),
            display_name: None,
            avatar_url: None,
        }
    }

    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            id: profile.id.clone(),
            username: profile.username.clone(),
            display_name: profile.display_name.clone(),
            avatar_url: profile.profile_picture_url.clone(),
        }
    }

    /// Look `id` up in `profiles`, falling back to the anonymous placeholder.
    pub fn resolve(id: &str, profiles: &HashMap<String, Profile>) -> Self {
        profiles
            .get(id)
            .map(Self::from_profile)
            .unwrap_or_else(|| Self::anonymous(id))
    }

    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.username)
    }

    pub fn is_anonymous(&self) -> bool {
        self.username == ANONYMOUS && self.display_name.is_none()
    }
}

/// One row of the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub post: Post,
    pub author: AuthorSummary,
    pub like_count: u32,
    pub comment_count: u32,
    pub liked_by_viewer: bool,
}

/// Secondary sets joined onto a page of posts.
#[derive(Debug, Clone, Default)]
pub struct PostExtras {
    pub profiles: HashMap<String, Profile>,
    pub likes: Tally,
    pub comments: Tally,
    /// Post ids the viewer has liked
    pub viewer_likes: HashSet<String>,
}

pub fn join_posts(posts: Vec<Post>, extras: &PostExtras) -> Vec<FeedItem> {
    posts
        .into_iter()
        .map(|post| FeedItem {
            author: AuthorSummary::resolve(&post.author_id, &extras.profiles),
            like_count: extras.likes.get(&post.id),
            comment_count: extras.comments.get(&post.id),
            liked_by_viewer: extras.viewer_likes.contains(&post.id),
            post,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentItem {
    pub comment: Comment,
    pub author: AuthorSummary,
}

pub fn join_comments(comments: Vec<Comment>, profiles: &HashMap<String, Profile>) -> Vec<CommentItem> {
    comments
        .into_iter()
        .map(|comment| CommentItem {
            author: AuthorSummary::resolve(&comment.author_id, profiles),
            comment,
        })
        .collect()
}

/// Dashboard row: a post with its analytics and engagement tallies.
#[derive(Debug, Clone, PartialEq)]
pub struct PostStats {
    pub post: Post,
    pub author: AuthorSummary,
    pub analytics: PostAnalytics,
    pub like_count: u32,
    pub comment_count: u32,
}

pub fn join_post_stats(
    posts: Vec<Post>,
    extras: &PostExtras,
    analytics: &HashMap<String, PostAnalytics>,
) -> Vec<PostStats> {
    posts
        .into_iter()
        .map(|post| PostStats {
            author: AuthorSummary::resolve(&post.author_id, &extras.profiles),
            analytics: analytics
                .get(&post.id)
                .cloned()
                .unwrap_or_else(|| PostAnalytics::empty(&post.id)),
            like_count: extras.likes.get(&post.id),
            comment_count: extras.comments.get(&post.id),
            post,
        })
        .collect()
}

/// Distinct author ids of `posts`, in first-seen order.
pub fn author_ids(posts: &[Post]) -> Vec<String> {
    let mut seen = HashSet::new();
    posts
        .iter()
        .filter(|p| seen.insert(p.author_id.as_str()))
        .map(|p| p.author_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Like, PostKind};
    use chrono::{Duration, Utc};

    fn post(id: &str, author: &str, age_mins: i64) -> Post {
        Post {
            id: id.to_string(),
            author_id: author.to_string(),
            kind: PostKind::Code,
            title: format!("post {id}"),
            content_url: None,
            code_snippet: Some("fn main() {}".into()),
            code_language: Some("Rust".into()),
            created_at: Utc::now() - Duration::minutes(age_mins),
        }
    }

    fn like(user: &str, post: &str) -> Like {
        Like {
            user_id: user.to_string(),
            post_id: post.to_string(),
        }
    }

    #[test]
    fn test_missing_author_gets_placeholder_in_order() {
        let posts = vec![post("p3", "u1", 1), post("p2", "ghost", 2), post("p1", "u2", 3)];
        let profiles = index_by(
            vec![Profile::placeholder("u1", "ada"), Profile::placeholder("u2", "bob")],
            |p| p.id.clone(),
        );
        let extras = PostExtras {
            profiles,
            ..Default::default()
        };

        let items = join_posts(posts, &extras);
        let ids: Vec<_> = items.iter().map(|i| i.post.id.as_str()).collect();
        assert_eq!(ids, vec!["p3", "p2", "p1"]);
        assert_eq!(items[0].author.username, "ada");
        assert!(items[1].author.is_anonymous());
        assert_eq!(items[1].author.label(), "Anonymous");
        assert_eq!(items[2].author.username, "bob");
        assert!(items.iter().all(|i| i.like_count == 0 && i.comment_count == 0));
    }

    #[test]
    fn test_like_tally_groups_by_post() {
        let likes = vec![like("a", "1"), like("b", "1"), like("a", "2")];
        let tally = tally_by(&likes, |l| l.post_id.as_str());
        assert_eq!(tally.get("1"), 2);
        assert_eq!(tally.get("2"), 1);
        assert_eq!(tally.get("3"), 0);
        assert_eq!(tally.len(), 2);
    }

    #[test]
    fn test_index_last_write_wins() {
        let mut first = Profile::placeholder("u1", "old");
        first.follower_count = 1;
        let second = Profile::placeholder("u1", "new");
        let index = index_by(vec![first, second], |p| p.id.clone());
        assert_eq!(index.len(), 1);
        assert_eq!(index["u1"].username, "new");
    }

    #[test]
    fn test_viewer_likes_and_counts_joined() {
        let likes = vec![like("me", "p1"), like("x", "p1")];
        let extras = PostExtras {
            likes: tally_by(&likes, |l| l.post_id.as_str()),
            viewer_likes: HashSet::from(["p1".to_string()]),
            ..Default::default()
        };
        let items = join_posts(vec![post("p1", "u1", 0), post("p2", "u1", 1)], &extras);
        assert!(items[0].liked_by_viewer);
        assert_eq!(items[0].like_count, 2);
        assert!(!items[1].liked_by_viewer);
    }

    #[test]
    fn test_post_stats_default_to_empty_analytics() {
        let stats = join_post_stats(vec![post("p1", "u1", 0)], &PostExtras::default(), &HashMap::new());
        assert_eq!(stats[0].analytics, PostAnalytics::empty("p1"));
        assert!(stats[0].author.is_anonymous());
    }

    #[test]
    fn test_author_ids_deduplicated() {
        let posts = vec![post("p1", "u1", 0), post("p2", "u2", 1), post("p3", "u1", 2)];
        assert_eq!(author_ids(&posts), vec!["u1", "u2"]);
    }
}
