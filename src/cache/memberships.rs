// SPDX-License-Identifier: MPL-2.0

//! Like and follow memberships. A row exists exactly when the relation holds.

use crate::cache::{CacheDb, CacheError};
use crate::model::{Follow, Like};
use std::collections::HashSet;

pub struct LikeCache<'a> {
    db: &'a CacheDb,
}

impl<'a> LikeCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    pub fn contains(&self, user_id: &str, post_id: &str) -> Result<bool, CacheError> {
        let conn = self.db.conn();
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM likes WHERE user_id = ?1 AND post_id = ?2)",
            [user_id, post_id],
            |r| r.get(0),
        )?;
        Ok(found)
    }

    /// Make the membership match `liked`.
    pub fn set(&self, user_id: &str, post_id: &str, liked: bool) -> Result<(), CacheError> {
        let conn = self.db.conn();
        if liked {
            conn.execute(
                "INSERT OR IGNORE INTO likes (user_id, post_id) VALUES (?1, ?2)",
                [user_id, post_id],
            )?;
        } else {
            conn.execute(
                "DELETE FROM likes WHERE user_id = ?1 AND post_id = ?2",
                [user_id, post_id],
            )?;
        }
        Ok(())
    }

    /// Make the cached likes on `post_ids` exactly `likes`, the complete
    /// set just fetched for those posts.
    pub fn replace_for_posts(&self, post_ids: &[String], likes: &[Like]) -> Result<(), CacheError> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        for post_id in post_ids {
            tx.execute("DELETE FROM likes WHERE post_id = ?", [post_id])?;
        }
        for like in likes {
            tx.execute(
                "INSERT OR IGNORE INTO likes (user_id, post_id) VALUES (?1, ?2)",
                [&like.user_id, &like.post_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Which of `post_ids` the user likes.
    pub fn liked_among(
        &self,
        user_id: &str,
        post_ids: &[String],
    ) -> Result<HashSet<String>, CacheError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare("SELECT post_id FROM likes WHERE user_id = ?")?;
        let wanted: HashSet<&str> = post_ids.iter().map(String::as_str).collect();
        let liked = stmt
            .query_map([user_id], |r| r.get::<_, String>(0))?
            .filter(|r| r.as_ref().map_or(true, |id| wanted.contains(id.as_str())))
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(liked)
    }
}

pub struct FollowCache<'a> {
    db: &'a CacheDb,
}

impl<'a> FollowCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    pub fn contains(&self, follower_id: &str, following_id: &str) -> Result<bool, CacheError> {
        let conn = self.db.conn();
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM follows WHERE follower_id = ?1 AND following_id = ?2)",
            [follower_id, following_id],
            |r| r.get(0),
        )?;
        Ok(found)
    }

    pub fn set(
        &self,
        follower_id: &str,
        following_id: &str,
        following: bool,
    ) -> Result<(), CacheError> {
        let conn = self.db.conn();
        if following {
            conn.execute(
                "INSERT OR IGNORE INTO follows (follower_id, following_id) VALUES (?1, ?2)",
                [follower_id, following_id],
            )?;
        } else {
            conn.execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
                [follower_id, following_id],
            )?;
        }
        Ok(())
    }

    pub fn store(&self, follow: &Follow) -> Result<(), CacheError> {
        self.set(&follow.follower_id, &follow.following_id, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_set_is_idempotent() {
        let db = CacheDb::open_in_memory().unwrap();
        let likes = LikeCache::new(&db);
        likes.set("u1", "p1", true).unwrap();
        likes.set("u1", "p1", true).unwrap();
        assert!(likes.contains("u1", "p1").unwrap());
        likes.set("u1", "p1", false).unwrap();
        likes.set("u1", "p1", false).unwrap();
        assert!(!likes.contains("u1", "p1").unwrap());
    }

    #[test]
    fn test_liked_among_filters_to_requested_posts() {
        let db = CacheDb::open_in_memory().unwrap();
        let likes = LikeCache::new(&db);
        likes.set("u1", "p1", true).unwrap();
        likes.set("u1", "p2", true).unwrap();
        likes.set("u2", "p3", true).unwrap();
        let liked = likes
            .liked_among("u1", &["p1".to_string(), "p3".to_string()])
            .unwrap();
        assert_eq!(liked, HashSet::from(["p1".to_string()]));
    }

    #[test]
    fn test_replace_for_posts_drops_stale_memberships() {
        let db = CacheDb::open_in_memory().unwrap();
        let likes = LikeCache::new(&db);
        likes.set("u1", "p1", true).unwrap();
        likes.set("u2", "p1", true).unwrap();
        likes.set("u1", "p9", true).unwrap();

        likes
            .replace_for_posts(
                &["p1".to_string(), "p2".to_string()],
                &[Like { user_id: "u2".into(), post_id: "p2".into() }],
            )
            .unwrap();
        assert!(!likes.contains("u1", "p1").unwrap());
        assert!(!likes.contains("u2", "p1").unwrap());
        assert!(likes.contains("u2", "p2").unwrap());
        // outside the fetched window
        assert!(likes.contains("u1", "p9").unwrap());
    }

    #[test]
    fn test_follow_is_directional() {
        let db = CacheDb::open_in_memory().unwrap();
        let follows = FollowCache::new(&db);
        follows
            .store(&Follow { follower_id: "a".into(), following_id: "b".into() })
            .unwrap();
        assert!(follows.contains("a", "b").unwrap());
        assert!(!follows.contains("b", "a").unwrap());
    }
}
