// SPDX-License-Identifier: MPL-2.0

//! Remote data gateway.
//!
//! Everything the app needs from the hosted backend (table reads and writes,
//! file uploads) goes through the [`Gateway`] trait. Implementations own no
//! application state; caching and reconciliation live in `cache` and `sync`.

mod memory;
mod query;
mod remote;
mod rest;

pub use memory::{MemoryGateway, WriteKind, WriteRecord};
pub use query::{Filter, Order, Query};
pub use remote::{Record, Remote};
pub use rest::RestGateway;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Network failure or timeout; the user may retry.
    #[error("connectivity error: {0}")]
    Connectivity(String),
    /// A table or bucket does not exist on the backend.
    #[error("backend not configured: {0}")]
    NotConfigured(String),
    /// Uniqueness, foreign-key or check constraint rejected the write.
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("not found")]
    NotFound,
    #[error("not authenticated")]
    NotAuthenticated,
    /// Any other refusal (row-level security, malformed filter, ...).
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Connectivity(_))
    }

    /// A uniqueness violation: the row is already there.
    pub fn is_duplicate(&self) -> bool {
        match self {
            GatewayError::Constraint(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("duplicate") || msg.contains("already exists")
            }
            _ => false,
        }
    }

    /// Short text suitable for a toast.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Connectivity(_) => "Something went wrong. Please try again.".to_string(),
            GatewayError::NotConfigured(what) => format!(
                "The backend is not set up yet ({what}). Follow the setup instructions to create it."
            ),
            GatewayError::Constraint(_) => "That already exists.".to_string(),
            GatewayError::NotFound => "Not found".to_string(),
            GatewayError::NotAuthenticated => "Please login to continue".to_string(),
            GatewayError::Rejected(msg) => msg.clone(),
            GatewayError::InvalidResponse(_) => "Unexpected response from server".to_string(),
        }
    }
}

/// Tables of the relational store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Profiles,
    Posts,
    Likes,
    Comments,
    Follows,
    PostAnalytics,
    PostViews,
}

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Profiles,
        Table::Posts,
        Table::Likes,
        Table::Comments,
        Table::Follows,
        Table::PostAnalytics,
        Table::PostViews,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::Posts => "posts",
            Table::Likes => "likes",
            Table::Comments => "comments",
            Table::Follows => "follows",
            Table::PostAnalytics => "post_analytics",
            Table::PostViews => "post_views",
        }
    }

    /// Column(s) an upsert conflicts on.
    pub fn primary_key(self) -> &'static [&'static str] {
        match self {
            Table::PostAnalytics => &["post_id"],
            Table::Likes => &["user_id", "post_id"],
            Table::Follows => &["follower_id", "following_id"],
            _ => &["id"],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Public-read object storage buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    ProfilePictures,
    BannerImages,
    PostMedia,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [
        Bucket::ProfilePictures,
        Bucket::BannerImages,
        Bucket::PostMedia,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Bucket::ProfilePictures => "profile-pictures",
            Bucket::BannerImages => "banner-images",
            Bucket::PostMedia => "meme-uploads",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    /// Replace an existing object at the same path
    pub overwrite: bool,
    pub cache_control_secs: Option<u32>,
}

/// Capability surface of the hosted backend.
///
/// Rows travel as JSON objects; [`Remote`] layers typed records and a call
/// timeout on top.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn fetch_many(&self, table: Table, query: &Query) -> Result<Vec<Value>, GatewayError>;

    /// Exactly one row, or [`GatewayError::NotFound`].
    async fn fetch_one(&self, table: Table, query: &Query) -> Result<Value, GatewayError> {
        let rows = self.fetch_many(table, &query.clone().limit(1)).await?;
        rows.into_iter().next().ok_or(GatewayError::NotFound)
    }

    /// Count-only query.
    async fn count(&self, table: Table, query: &Query) -> Result<u64, GatewayError>;

    /// Insert one row and return it as stored.
    async fn insert(&self, table: Table, row: Value) -> Result<Value, GatewayError>;

    /// Insert or replace on the table's primary key.
    async fn upsert(&self, table: Table, row: Value) -> Result<Value, GatewayError>;

    /// Patch every matching row; returns the updated rows.
    async fn update(
        &self,
        table: Table,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, GatewayError>;

    /// Delete every matching row. An unfiltered delete is refused.
    async fn delete(&self, table: Table, query: &Query) -> Result<(), GatewayError>;

    /// Store a file and return its public URL.
    async fn upload_file(
        &self,
        bucket: Bucket,
        path: &str,
        bytes: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<String, GatewayError>;

    async fn remove_file(&self, bucket: Bucket, path: &str) -> Result<(), GatewayError>;

    fn public_url(&self, bucket: Bucket, path: &str) -> String;
}
