// SPDX-License-Identifier: MPL-2.0

use crate::gateway::{Bucket, Gateway, GatewayError, Query, Table, UploadOptions};
use crate::model::{Comment, Follow, Like, Post, PostAnalytics, PostView, Profile};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A typed row of one table.
pub trait Record: DeserializeOwned + Send + 'static {
    const TABLE: Table;
}

impl Record for Profile {
    const TABLE: Table = Table::Profiles;
}

impl Record for Post {
    const TABLE: Table = Table::Posts;
}

impl Record for Like {
    const TABLE: Table = Table::Likes;
}

impl Record for Follow {
    const TABLE: Table = Table::Follows;
}

impl Record for Comment {
    const TABLE: Table = Table::Comments;
}

impl Record for PostAnalytics {
    const TABLE: Table = Table::PostAnalytics;
}

impl Record for PostView {
    const TABLE: Table = Table::PostViews;
}

/// Typed, time-bounded access to a [`Gateway`].
///
/// Every call is wrapped in the configured timeout; an elapsed timeout is
/// reported as [`GatewayError::Connectivity`] so callers treat it as retryable.
#[derive(Clone)]
pub struct Remote {
    gateway: Arc<dyn Gateway>,
    timeout: Duration,
}

impl Remote {
    pub fn new(gateway: Arc<dyn Gateway>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    async fn bounded<T, F>(&self, table: &str, fut: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                debug!(table, timeout_ms = self.timeout.as_millis() as u64, "remote call timed out");
                Err(GatewayError::Connectivity(format!(
                    "request to {table} timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    pub async fn fetch_many<T: Record>(&self, query: &Query) -> Result<Vec<T>, GatewayError> {
        if query.is_trivially_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .bounded(T::TABLE.name(), self.gateway.fetch_many(T::TABLE, query))
            .await?;
        rows.into_iter().map(decode).collect()
    }

    pub async fn fetch_one<T: Record>(&self, query: &Query) -> Result<T, GatewayError> {
        let row = self
            .bounded(T::TABLE.name(), self.gateway.fetch_one(T::TABLE, query))
            .await?;
        decode(row)
    }

    /// Like [`Remote::fetch_one`] but maps `NotFound` to `None`.
    pub async fn find<T: Record>(&self, query: &Query) -> Result<Option<T>, GatewayError> {
        match self.fetch_one(query).await {
            Ok(record) => Ok(Some(record)),
            Err(GatewayError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn count(&self, table: Table, query: &Query) -> Result<u64, GatewayError> {
        if query.is_trivially_empty() {
            return Ok(0);
        }
        self.bounded(table.name(), self.gateway.count(table, query))
            .await
    }

    pub async fn insert<T: Record, N: Serialize>(&self, row: &N) -> Result<T, GatewayError> {
        let value = encode(row)?;
        let stored = self
            .bounded(T::TABLE.name(), self.gateway.insert(T::TABLE, value))
            .await?;
        decode(stored)
    }

    /// Insert where the stored row is not needed back.
    pub async fn insert_only<N: Serialize>(&self, table: Table, row: &N) -> Result<(), GatewayError> {
        let value = encode(row)?;
        self.bounded(table.name(), self.gateway.insert(table, value))
            .await
            .map(|_| ())
    }

    pub async fn upsert<T: Record, N: Serialize>(&self, row: &N) -> Result<T, GatewayError> {
        let value = encode(row)?;
        let stored = self
            .bounded(T::TABLE.name(), self.gateway.upsert(T::TABLE, value))
            .await?;
        decode(stored)
    }

    pub async fn update<T: Record, N: Serialize>(
        &self,
        query: &Query,
        patch: &N,
    ) -> Result<Vec<T>, GatewayError> {
        let value = encode(patch)?;
        let rows = self
            .bounded(T::TABLE.name(), self.gateway.update(T::TABLE, query, value))
            .await?;
        rows.into_iter().map(decode).collect()
    }

    pub async fn delete(&self, table: Table, query: &Query) -> Result<(), GatewayError> {
        self.bounded(table.name(), self.gateway.delete(table, query))
            .await
    }

    pub async fn upload_file(
        &self,
        bucket: Bucket,
        path: &str,
        bytes: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<String, GatewayError> {
        self.bounded(
            bucket.name(),
            self.gateway.upload_file(bucket, path, bytes, options),
        )
        .await
    }

    pub async fn remove_file(&self, bucket: Bucket, path: &str) -> Result<(), GatewayError> {
        self.bounded(bucket.name(), self.gateway.remove_file(bucket, path))
            .await
    }
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, GatewayError> {
    serde_json::from_value(value).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

fn encode<N: Serialize>(row: &N) -> Result<serde_json::Value, GatewayError> {
    serde_json::to_value(row).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}
