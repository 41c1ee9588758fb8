// SPDX-License-Identifier: MPL-2.0

use crate::cache::{CacheDb, CacheError, CacheEvent, not_found, ts_from_sql, ts_to_sql};
use crate::model::{Post, PostKind};
use rusqlite::{Connection, OptionalExtension, params};

const POST_COLUMNS: &str = "id, author_id, kind, title, content_url, code_snippet, code_language, created_at";

/// Tallies shown next to a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostCounts {
    pub likes: u32,
    pub comments: u32,
}

/// Cache operations for posts
pub struct PostCache<'a> {
    db: &'a CacheDb,
}

impl<'a> PostCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    /// Store a single post (upserts, keeps existing tallies)
    pub fn store(&self, post: &Post) -> Result<(), CacheError> {
        let conn = self.db.conn();
        Self::upsert(&conn, post, CacheDb::now())
    }

    /// Store multiple posts in a transaction
    pub fn store_batch(&self, posts: &[Post]) -> Result<(), CacheError> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        let now = CacheDb::now();
        for post in posts {
            Self::upsert(&tx, post, now)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert(conn: &Connection, post: &Post, now: i64) -> Result<(), CacheError> {
        conn.execute(
            r#"
            INSERT INTO posts (
                id, author_id, kind, title, content_url, code_snippet,
                code_language, created_at, fetched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content_url = excluded.content_url,
                code_snippet = excluded.code_snippet,
                code_language = excluded.code_language,
                fetched_at = excluded.fetched_at
            "#,
            params![
                post.id,
                post.author_id,
                post.kind.as_str(),
                post.title,
                post.content_url,
                post.code_snippet,
                post.code_language,
                ts_to_sql(&post.created_at),
                now,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Post, CacheError> {
        let conn = self.db.conn();
        conn.query_row(
            &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?"),
            [id],
            Self::row_to_post,
        )
        .map_err(not_found)
    }

    /// Posts by one author, newest first
    pub fn by_author(&self, author_id: &str) -> Result<Vec<Post>, CacheError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE author_id = ? ORDER BY created_at DESC"
        ))?;
        let posts = stmt
            .query_map([author_id], Self::row_to_post)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    pub fn counts(&self, id: &str) -> Result<PostCounts, CacheError> {
        let conn = self.db.conn();
        let counts = conn
            .query_row(
                "SELECT like_count, comment_count FROM posts WHERE id = ?",
                [id],
                |row| {
                    Ok(PostCounts {
                        likes: row.get(0)?,
                        comments: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(counts.unwrap_or_default())
    }

    /// Overwrite tallies with freshly aggregated values
    pub fn set_counts(&self, id: &str, counts: PostCounts) -> Result<(), CacheError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE posts SET like_count = ?, comment_count = ? WHERE id = ?",
            params![counts.likes, counts.comments, id],
        )?;
        Ok(())
    }

    pub fn set_like_count(&self, id: &str, likes: u32) -> Result<(), CacheError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE posts SET like_count = ? WHERE id = ?",
            params![likes, id],
        )?;
        Ok(())
    }

    /// Like tally of a cached post, `None` if the post is not cached.
    pub fn like_count(&self, id: &str) -> Result<Option<u32>, CacheError> {
        let conn = self.db.conn();
        let likes = conn
            .query_row("SELECT like_count FROM posts WHERE id = ?", [id], |r| r.get(0))
            .optional()?;
        Ok(likes)
    }

    /// Shift the like tally, never below zero. Returns the new value, or
    /// `None` if the post is not cached.
    pub fn adjust_like_count(&self, id: &str, delta: i64) -> Result<Option<u32>, CacheError> {
        self.adjust("like_count", id, delta)
    }

    pub fn adjust_comment_count(&self, id: &str, delta: i64) -> Result<Option<u32>, CacheError> {
        self.adjust("comment_count", id, delta)
    }

    fn adjust(&self, column: &'static str, id: &str, delta: i64) -> Result<Option<u32>, CacheError> {
        let conn = self.db.conn();
        conn.execute(
            &format!("UPDATE posts SET {column} = MAX({column} + ?1, 0) WHERE id = ?2"),
            params![delta, id],
        )?;
        let value = conn
            .query_row(&format!("SELECT {column} FROM posts WHERE id = ?"), [id], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Forget a post and everything hanging off it
    pub fn remove(&self, id: &str) -> Result<(), CacheError> {
        {
            let mut conn = self.db.conn();
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM likes WHERE post_id = ?", [id])?;
            tx.execute("DELETE FROM comments WHERE post_id = ?", [id])?;
            tx.execute("DELETE FROM post_analytics WHERE post_id = ?", [id])?;
            tx.execute("DELETE FROM posts WHERE id = ?", [id])?;
            tx.commit()?;
        }
        self.db.emit(CacheEvent::PostRemoved {
            post_id: id.to_string(),
        });
        Ok(())
    }

    fn row_to_post(row: &rusqlite::Row) -> Result<Post, rusqlite::Error> {
        let kind: String = row.get(2)?;
        let kind = PostKind::parse(&kind).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown post kind {kind:?}").into(),
            )
        })?;
        let created_at: String = row.get(7)?;

        Ok(Post {
            id: row.get(0)?,
            author_id: row.get(1)?,
            kind,
            title: row.get(3)?,
            content_url: row.get(4)?,
            code_snippet: row.get(5)?,
            code_language: row.get(6)?,
            created_at: ts_from_sql(7, &created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn post(id: &str, author: &str, minute: u32) -> Post {
        Post {
            id: id.to_string(),
            author_id: author.to_string(),
            kind: PostKind::Code,
            title: format!("post {id}"),
            content_url: None,
            code_snippet: Some("fn main() {}".into()),
            code_language: Some("Rust".into()),
            created_at: Utc.with_ymd_and_hms(2026, 1, 11, 10, minute, 0).unwrap(),
        }
    }

    #[test]
    fn test_store_and_get() {
        let db = CacheDb::open_in_memory().unwrap();
        let cache = PostCache::new(&db);
        let p = post("p1", "u1", 0);
        cache.store(&p).unwrap();
        assert_eq!(cache.get("p1").unwrap(), p);
        assert!(matches!(cache.get("nope"), Err(CacheError::NotFound)));
    }

    #[test]
    fn test_by_author_newest_first() {
        let db = CacheDb::open_in_memory().unwrap();
        let cache = PostCache::new(&db);
        cache
            .store_batch(&[post("a", "u1", 1), post("b", "u2", 2), post("c", "u1", 3)])
            .unwrap();
        let ids: Vec<_> = cache
            .by_author("u1")
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn test_restore_keeps_counts() {
        let db = CacheDb::open_in_memory().unwrap();
        let cache = PostCache::new(&db);
        cache.store(&post("p1", "u1", 0)).unwrap();
        cache
            .set_counts("p1", PostCounts { likes: 4, comments: 2 })
            .unwrap();
        cache.store(&post("p1", "u1", 0)).unwrap();
        assert_eq!(cache.counts("p1").unwrap(), PostCounts { likes: 4, comments: 2 });
    }

    #[test]
    fn test_like_count_floors_at_zero() {
        let db = CacheDb::open_in_memory().unwrap();
        let cache = PostCache::new(&db);
        cache.store(&post("p1", "u1", 0)).unwrap();
        assert_eq!(cache.adjust_like_count("p1", 1).unwrap(), Some(1));
        assert_eq!(cache.adjust_like_count("p1", -1).unwrap(), Some(0));
        assert_eq!(cache.adjust_like_count("p1", -1).unwrap(), Some(0));
        assert_eq!(cache.adjust_like_count("missing", 1).unwrap(), None);
        assert_eq!(cache.like_count("missing").unwrap(), None);
    }

    #[test]
    fn test_remove_emits_event() {
        let db = CacheDb::open_in_memory().unwrap();
        let mut rx = db.subscribe();
        let cache = PostCache::new(&db);
        cache.store(&post("p1", "u1", 0)).unwrap();
        cache.remove("p1").unwrap();
        assert!(matches!(cache.get("p1"), Err(CacheError::NotFound)));
        assert_eq!(
            rx.try_recv().unwrap(),
            CacheEvent::PostRemoved {
                post_id: "p1".into()
            }
        );
    }
}
