// SPDX-License-Identifier: MPL-2.0

use crate::cache::{CacheDb, CacheError, CacheEvent, PostCache, ts_from_sql, ts_to_sql};
use crate::model::Comment;
use rusqlite::{Connection, params};

pub struct CommentCache<'a> {
    db: &'a CacheDb,
}

impl<'a> CommentCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    pub fn store_batch(&self, comments: &[Comment]) -> Result<(), CacheError> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        for comment in comments {
            Self::upsert(&tx, comment)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert(conn: &Connection, comment: &Comment) -> Result<(), CacheError> {
        conn.execute(
            r#"
            INSERT INTO comments (id, post_id, author_id, content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET content = excluded.content
            "#,
            params![
                comment.id,
                comment.post_id,
                comment.author_id,
                comment.content,
                ts_to_sql(&comment.created_at),
            ],
        )?;
        Ok(())
    }

    /// Record a freshly posted comment and bump the post's tally.
    /// Returns the new comment count, `None` if the post is not cached.
    pub fn add(&self, comment: &Comment) -> Result<Option<u32>, CacheError> {
        {
            let conn = self.db.conn();
            Self::upsert(&conn, comment)?;
        }
        let comment_count = PostCache::new(self.db).adjust_comment_count(&comment.post_id, 1)?;
        self.db.emit(CacheEvent::CommentsChanged {
            post_id: comment.post_id.clone(),
            comment_count,
        });
        Ok(comment_count)
    }

    /// Comments on a post, oldest first
    pub fn for_post(&self, post_id: &str) -> Result<Vec<Comment>, CacheError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, post_id, author_id, content, created_at
            FROM comments
            WHERE post_id = ?
            ORDER BY created_at ASC
            "#,
        )?;
        let comments = stmt
            .query_map([post_id], |row| {
                let created_at: String = row.get(4)?;
                Ok(Comment {
                    id: row.get(0)?,
                    post_id: row.get(1)?,
                    author_id: row.get(2)?,
                    content: row.get(3)?,
                    created_at: ts_from_sql(4, &created_at)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }
}
