// SPDX-License-Identifier: MPL-2.0

use crate::cache::{CacheDb, CacheError, CacheEvent, opt_ts_from_sql, ts_to_sql};
use crate::model::PostAnalytics;
use rusqlite::{OptionalExtension, params};

/// Last-known analytics snapshot per post
pub struct AnalyticsCache<'a> {
    db: &'a CacheDb,
}

impl<'a> AnalyticsCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    pub fn store(&self, analytics: &PostAnalytics) -> Result<(), CacheError> {
        {
            let conn = self.db.conn();
            conn.execute(
                r#"
                INSERT INTO post_analytics (
                    post_id, view_count, unique_viewers, engagement_rate,
                    last_viewed_at, fetched_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(post_id) DO UPDATE SET
                    view_count = excluded.view_count,
                    unique_viewers = excluded.unique_viewers,
                    engagement_rate = excluded.engagement_rate,
                    last_viewed_at = excluded.last_viewed_at,
                    fetched_at = excluded.fetched_at
                "#,
                params![
                    analytics.post_id,
                    analytics.view_count as i64,
                    analytics.unique_viewers as i64,
                    analytics.engagement_rate,
                    analytics.last_viewed_at.as_ref().map(ts_to_sql),
                    CacheDb::now(),
                ],
            )?;
        }
        self.db.emit(CacheEvent::AnalyticsChanged {
            post_id: analytics.post_id.clone(),
        });
        Ok(())
    }

    pub fn get(&self, post_id: &str) -> Result<Option<PostAnalytics>, CacheError> {
        let conn = self.db.conn();
        let analytics = conn
            .query_row(
                r#"
                SELECT post_id, view_count, unique_viewers, engagement_rate, last_viewed_at
                FROM post_analytics WHERE post_id = ?
                "#,
                [post_id],
                |row| {
                    Ok(PostAnalytics {
                        post_id: row.get(0)?,
                        view_count: row.get::<_, i64>(1)?.max(0) as u64,
                        unique_viewers: row.get::<_, i64>(2)?.max(0) as u64,
                        engagement_rate: row.get(3)?,
                        last_viewed_at: opt_ts_from_sql(4, row.get(4)?)?,
                    })
                },
            )
            .optional()?;
        Ok(analytics)
    }
}
