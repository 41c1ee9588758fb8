// SPDX-License-Identifier: MPL-2.0

//! Entity cache.
//!
//! Last-known server state for the current session, kept in an in-memory
//! SQLite database so lookups and joins stay cheap. Nothing here outlives
//! the process; the remote store remains the source of truth.

mod analytics;
mod comments;
mod db;
mod memberships;
mod posts;
mod profiles;
mod schema;

pub use analytics::AnalyticsCache;
pub use comments::CommentCache;
pub use db::CacheDb;
pub use memberships::{FollowCache, LikeCache};
pub use posts::{PostCache, PostCounts};
pub use profiles::ProfileCache;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found")]
    NotFound,
}

/// Change notifications for views that render cached state.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    LikeChanged {
        post_id: String,
        user_id: String,
        liked: bool,
        /// `None` when the post is not cached
        like_count: Option<u32>,
    },
    FollowChanged {
        follower_id: String,
        following_id: String,
        following: bool,
        follower_count: Option<u32>,
    },
    CommentsChanged {
        post_id: String,
        comment_count: Option<u32>,
    },
    AnalyticsChanged {
        post_id: String,
    },
    PostRemoved {
        post_id: String,
    },
    Cleared,
}

/// Timestamps are stored as fixed-width RFC 3339 text so they sort lexically.
pub(crate) fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts_from_sql(idx: usize, raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_ts_from_sql(
    idx: usize,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    raw.map(|s| ts_from_sql(idx, &s)).transpose()
}

/// `NotFound` for an empty single-row query, everything else as-is.
pub(crate) fn not_found(e: rusqlite::Error) -> CacheError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => CacheError::NotFound,
        other => CacheError::Database(other),
    }
}
