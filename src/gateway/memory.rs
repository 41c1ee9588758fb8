// SPDX-License-Identifier: MPL-2.0

//! In-process stand-in for the hosted backend.
//!
//! Enforces the same uniqueness, foreign-key and check constraints as the
//! real schema, cascades post deletion, and can simulate missing tables or
//! buckets, latency and failed writes. Used by the test-suite and for
//! offline runs of the binary.

use crate::gateway::{Bucket, Gateway, GatewayError, Query, Table, UploadOptions};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Upsert,
    Update,
    Delete,
    Upload,
    Remove,
}

/// One write that reached the store (successful or not).
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub kind: WriteKind,
    pub target: String,
}

struct Inner {
    tables: HashMap<Table, Vec<Value>>,
    buckets: HashMap<Bucket, HashMap<String, Vec<u8>>>,
    failing_writes: HashMap<Table, GatewayError>,
    failing_reads: HashMap<Table, GatewayError>,
    next_write_failures: HashMap<Table, VecDeque<GatewayError>>,
    writes: Vec<WriteRecord>,
    latency: Duration,
    seq: u64,
    last_timestamp: DateTime<Utc>,
}

pub struct MemoryGateway {
    inner: Mutex<Inner>,
}

impl MemoryGateway {
    /// Store with every table and bucket present and empty.
    pub fn new() -> Self {
        let tables = Table::ALL.iter().map(|t| (*t, Vec::new())).collect();
        let buckets = Bucket::ALL.iter().map(|b| (*b, HashMap::new())).collect();
        Self {
            inner: Mutex::new(Inner {
                tables,
                buckets,
                failing_writes: HashMap::new(),
                failing_reads: HashMap::new(),
                next_write_failures: HashMap::new(),
                writes: Vec::new(),
                latency: Duration::ZERO,
                seq: 0,
                last_timestamp: DateTime::<Utc>::MIN_UTC,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulate a schema where `table` was never created.
    pub fn drop_table(&self, table: Table) {
        self.lock().tables.remove(&table);
    }

    pub fn drop_bucket(&self, bucket: Bucket) {
        self.lock().buckets.remove(&bucket);
    }

    /// Delay applied to every call before it touches the store.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Every write to `table` fails with `error` until cleared.
    pub fn fail_writes(&self, table: Table, error: GatewayError) {
        self.lock().failing_writes.insert(table, error);
    }

    /// Only the next write to `table` fails.
    pub fn fail_next_write(&self, table: Table, error: GatewayError) {
        self.lock()
            .next_write_failures
            .entry(table)
            .or_default()
            .push_back(error);
    }

    pub fn fail_reads(&self, table: Table, error: GatewayError) {
        self.lock().failing_reads.insert(table, error);
    }

    pub fn clear_failures(&self) {
        let mut inner = self.lock();
        inner.failing_writes.clear();
        inner.failing_reads.clear();
        inner.next_write_failures.clear();
    }

    /// Insert a row directly, filling `id`/`created_at` but skipping constraints.
    pub fn seed(&self, table: Table, row: Value) -> Value {
        let mut inner = self.lock();
        let row = inner.fill_defaults(table, row);
        if let Some(rows) = inner.tables.get_mut(&table) {
            rows.push(row.clone());
        }
        row
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.lock().tables.get(&table).cloned().unwrap_or_default()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    pub fn writes_to(&self, table: Table) -> Vec<WriteKind> {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.target == table.name())
            .map(|w| w.kind)
            .collect()
    }

    pub fn file(&self, bucket: Bucket, path: &str) -> Option<Vec<u8>> {
        self.lock().buckets.get(&bucket)?.get(path).cloned()
    }

    async fn pause(&self) {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn now(&mut self) -> String {
        let mut now = Utc::now();
        if now <= self.last_timestamp {
            now = self.last_timestamp + ChronoDuration::microseconds(1);
        }
        self.last_timestamp = now;
        now.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn fill_defaults(&mut self, table: Table, row: Value) -> Value {
        let mut obj = match row {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if table.primary_key() == ["id"] && !obj.contains_key("id") {
            self.seq += 1;
            obj.insert("id".into(), Value::String(format!("{}-{}", table.name(), self.seq)));
        }
        if table != Table::PostAnalytics && !obj.contains_key("created_at") {
            let ts = self.now();
            obj.insert("created_at".into(), Value::String(ts));
        }
        Value::Object(obj)
    }

    fn table(&self, table: Table) -> Result<&Vec<Value>, GatewayError> {
        self.tables.get(&table).ok_or_else(|| missing_table(table))
    }

    fn check_read(&self, table: Table) -> Result<(), GatewayError> {
        if let Some(err) = self.failing_reads.get(&table) {
            return Err(err.clone());
        }
        self.table(table).map(|_| ())
    }

    /// Record the attempt and apply injected failures.
    fn begin_write(&mut self, kind: WriteKind, table: Table) -> Result<(), GatewayError> {
        self.writes.push(WriteRecord {
            kind,
            target: table.name().to_string(),
        });
        if let Some(err) = self
            .next_write_failures
            .get_mut(&table)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        if let Some(err) = self.failing_writes.get(&table) {
            return Err(err.clone());
        }
        self.table(table).map(|_| ())
    }

    /// Uniqueness, foreign-key and check constraints for a candidate row.
    /// `replacing` is the index of the row being overwritten, if any.
    fn check_constraints(
        &self,
        table: Table,
        row: &Value,
        replacing: Option<usize>,
    ) -> Result<(), GatewayError> {
        let rows = self.table(table)?;
        for key in unique_keys(table) {
            let clash = rows.iter().enumerate().any(|(i, existing)| {
                Some(i) != replacing
                    && key
                        .iter()
                        .all(|col| !row[*col].is_null() && existing[*col] == row[*col])
            });
            if clash {
                return Err(GatewayError::Constraint(format!(
                    "duplicate key value violates unique constraint \"{}_{}_key\"",
                    table.name(),
                    key.join("_")
                )));
            }
        }

        if references_post(table) {
            let post_id = &row["post_id"];
            let posts = self.table(Table::Posts)?;
            if !posts.iter().any(|p| &p["id"] == post_id) {
                return Err(GatewayError::Constraint(format!(
                    "insert on \"{}\" violates foreign key constraint on post_id",
                    table.name()
                )));
            }
        }

        if table == Table::Follows && row["follower_id"] == row["following_id"] {
            return Err(GatewayError::Constraint(
                "new row violates check constraint \"no_self_follow\"".to_string(),
            ));
        }
        Ok(())
    }

    fn find_by_primary_key(&self, table: Table, row: &Value) -> Result<Option<usize>, GatewayError> {
        let rows = self.table(table)?;
        Ok(rows.iter().position(|existing| {
            table
                .primary_key()
                .iter()
                .all(|col| existing[*col] == row[*col])
        }))
    }

    /// Mirror `ON DELETE CASCADE` from posts to their dependants.
    fn cascade_post_delete(&mut self, post_ids: &[Value]) {
        for table in [Table::Likes, Table::Comments, Table::PostViews, Table::PostAnalytics] {
            if let Some(rows) = self.tables.get_mut(&table) {
                rows.retain(|r| !post_ids.contains(&r["post_id"]));
            }
        }
    }
}

fn missing_table(table: Table) -> GatewayError {
    GatewayError::NotConfigured(format!("relation \"public.{}\" does not exist", table.name()))
}

const PROFILE_ID: &[&str] = &["id"];
const PROFILE_USERNAME: &[&str] = &["username"];

fn unique_keys(table: Table) -> Vec<&'static [&'static str]> {
    match table {
        Table::Profiles => vec![PROFILE_ID, PROFILE_USERNAME],
        other => vec![other.primary_key()],
    }
}

fn references_post(table: Table) -> bool {
    matches!(
        table,
        Table::Likes | Table::Comments | Table::PostViews | Table::PostAnalytics
    )
}

fn merge(existing: &mut Value, patch: &Value) {
    if let (Value::Object(dst), Value::Object(src)) = (existing, patch) {
        for (k, v) in src {
            dst.insert(k.clone(), v.clone());
        }
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn fetch_many(&self, table: Table, query: &Query) -> Result<Vec<Value>, GatewayError> {
        self.pause().await;
        let inner = self.lock();
        inner.check_read(table)?;
        Ok(query.apply(inner.table(table)?))
    }

    async fn count(&self, table: Table, query: &Query) -> Result<u64, GatewayError> {
        self.pause().await;
        let inner = self.lock();
        inner.check_read(table)?;
        let n = inner.table(table)?.iter().filter(|r| query.matches(r)).count();
        Ok(n as u64)
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, GatewayError> {
        self.pause().await;
        let mut inner = self.lock();
        inner.begin_write(WriteKind::Insert, table)?;
        let row = inner.fill_defaults(table, row);
        inner.check_constraints(table, &row, None)?;
        if let Some(rows) = inner.tables.get_mut(&table) {
            rows.push(row.clone());
        }
        Ok(row)
    }

    async fn upsert(&self, table: Table, row: Value) -> Result<Value, GatewayError> {
        self.pause().await;
        let mut inner = self.lock();
        inner.begin_write(WriteKind::Upsert, table)?;
        match inner.find_by_primary_key(table, &row)? {
            Some(index) => {
                let mut merged = inner.table(table)?[index].clone();
                merge(&mut merged, &row);
                inner.check_constraints(table, &merged, Some(index))?;
                if let Some(rows) = inner.tables.get_mut(&table) {
                    rows[index] = merged.clone();
                }
                Ok(merged)
            }
            None => {
                let row = inner.fill_defaults(table, row);
                inner.check_constraints(table, &row, None)?;
                if let Some(rows) = inner.tables.get_mut(&table) {
                    rows.push(row.clone());
                }
                Ok(row)
            }
        }
    }

    async fn update(
        &self,
        table: Table,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, GatewayError> {
        self.pause().await;
        let mut inner = self.lock();
        inner.begin_write(WriteKind::Update, table)?;

        let targets: Vec<usize> = inner
            .table(table)?
            .iter()
            .enumerate()
            .filter(|(_, r)| query.matches(r))
            .map(|(i, _)| i)
            .collect();

        let mut updated = Vec::with_capacity(targets.len());
        for index in targets {
            let mut row = inner.table(table)?[index].clone();
            merge(&mut row, &patch);
            inner.check_constraints(table, &row, Some(index))?;
            updated.push((index, row));
        }

        if let Some(rows) = inner.tables.get_mut(&table) {
            for (index, row) in &updated {
                rows[*index] = row.clone();
            }
        }
        Ok(updated.into_iter().map(|(_, r)| r).collect())
    }

    async fn delete(&self, table: Table, query: &Query) -> Result<(), GatewayError> {
        self.pause().await;
        let mut inner = self.lock();
        inner.begin_write(WriteKind::Delete, table)?;
        if !query.has_filters() {
            return Err(GatewayError::Rejected("DELETE requires a WHERE clause".to_string()));
        }

        let mut removed_ids = Vec::new();
        if let Some(rows) = inner.tables.get_mut(&table) {
            rows.retain(|r| {
                let hit = query.matches(r);
                if hit {
                    removed_ids.push(r["id"].clone());
                }
                !hit
            });
        }
        if table == Table::Posts {
            inner.cascade_post_delete(&removed_ids);
        }
        Ok(())
    }

    async fn upload_file(
        &self,
        bucket: Bucket,
        path: &str,
        bytes: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<String, GatewayError> {
        self.pause().await;
        let mut inner = self.lock();
        inner.writes.push(WriteRecord {
            kind: WriteKind::Upload,
            target: bucket.name().to_string(),
        });
        let objects = inner
            .buckets
            .get_mut(&bucket)
            .ok_or_else(|| GatewayError::NotConfigured(format!("Bucket not found: {}", bucket.name())))?;
        if objects.contains_key(path) && !options.overwrite {
            return Err(GatewayError::Constraint("The resource already exists".to_string()));
        }
        objects.insert(path.to_string(), bytes);
        drop(inner);
        Ok(self.public_url(bucket, path))
    }

    async fn remove_file(&self, bucket: Bucket, path: &str) -> Result<(), GatewayError> {
        self.pause().await;
        let mut inner = self.lock();
        inner.writes.push(WriteRecord {
            kind: WriteKind::Remove,
            target: bucket.name().to_string(),
        });
        let objects = inner
            .buckets
            .get_mut(&bucket)
            .ok_or_else(|| GatewayError::NotConfigured(format!("Bucket not found: {}", bucket.name())))?;
        objects.remove(path);
        Ok(())
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!("memory://storage/{}/{}", bucket.name(), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_duplicate_like_rejected() {
        let gw = MemoryGateway::new();
        gw.seed(Table::Posts, json!({"id": "p1", "user_id": "u1", "type": "code"}));

        let like = json!({"user_id": "u2", "post_id": "p1"});
        gw.insert(Table::Likes, like.clone()).await.unwrap();
        let err = gw.insert(Table::Likes, like).await.unwrap_err();
        assert!(matches!(err, GatewayError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_like_requires_existing_post() {
        let gw = MemoryGateway::new();
        let err = gw
            .insert(Table::Likes, json!({"user_id": "u2", "post_id": "ghost"}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_self_follow_violates_check() {
        let gw = MemoryGateway::new();
        let err = gw
            .insert(Table::Follows, json!({"follower_id": "u1", "following_id": "u1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_missing_table_is_not_configured() {
        let gw = MemoryGateway::new();
        gw.drop_table(Table::Posts);
        let err = gw.fetch_many(Table::Posts, &Query::new()).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_post_delete_cascades() {
        let gw = MemoryGateway::new();
        gw.seed(Table::Posts, json!({"id": "p1", "user_id": "u1", "type": "code"}));
        gw.insert(Table::Likes, json!({"user_id": "u2", "post_id": "p1"}))
            .await
            .unwrap();
        gw.insert(
            Table::Comments,
            json!({"user_id": "u2", "post_id": "p1", "content": "nice"}),
        )
        .await
        .unwrap();

        gw.delete(Table::Posts, &Query::new().eq("id", "p1")).await.unwrap();
        assert!(gw.rows(Table::Likes).is_empty());
        assert!(gw.rows(Table::Comments).is_empty());
    }

    #[tokio::test]
    async fn test_unfiltered_delete_refused() {
        let gw = MemoryGateway::new();
        let err = gw.delete(Table::Likes, &Query::new()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_keeps_username_unique() {
        let gw = MemoryGateway::new();
        gw.seed(Table::Profiles, json!({"id": "u1", "username": "ada"}));
        gw.seed(Table::Profiles, json!({"id": "u2", "username": "grace"}));

        let row = gw
            .upsert(Table::Profiles, json!({"id": "u1", "username": "countess"}))
            .await
            .unwrap();
        assert_eq!(row["username"], "countess");

        let err = gw
            .upsert(Table::Profiles, json!({"id": "u1", "username": "grace"}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_one_shot_write_failure() {
        let gw = MemoryGateway::new();
        gw.seed(Table::Posts, json!({"id": "p1", "user_id": "u1", "type": "code"}));
        gw.fail_next_write(Table::Likes, GatewayError::Connectivity("offline".into()));

        let like = json!({"user_id": "u2", "post_id": "p1"});
        assert!(gw.insert(Table::Likes, like.clone()).await.is_err());
        assert!(gw.insert(Table::Likes, like).await.is_ok());
        assert_eq!(gw.writes_to(Table::Likes), vec![WriteKind::Insert, WriteKind::Insert]);
    }

    #[tokio::test]
    async fn test_upload_without_overwrite_conflicts() {
        let gw = MemoryGateway::new();
        let opts = UploadOptions::default();
        let url = gw
            .upload_file(Bucket::PostMedia, "u1/a.png", vec![1, 2], &opts)
            .await
            .unwrap();
        assert!(url.ends_with("meme-uploads/u1/a.png"));

        let err = gw
            .upload_file(Bucket::PostMedia, "u1/a.png", vec![3], &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Constraint(_)));

        gw.drop_bucket(Bucket::BannerImages);
        let err = gw
            .upload_file(Bucket::BannerImages, "u1/b.png", vec![3], &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotConfigured(_)));
    }

    #[test]
    fn test_generated_timestamps_strictly_increase() {
        let gw = MemoryGateway::new();
        let a = gw.seed(Table::Posts, json!({"user_id": "u1", "type": "code"}));
        let b = gw.seed(Table::Posts, json!({"user_id": "u1", "type": "code"}));
        assert!(a["created_at"].as_str().unwrap() < b["created_at"].as_str().unwrap());
        assert_ne!(a["id"], b["id"]);
    }
}
