// SPDX-License-Identifier: MPL-2.0

//! HTTP implementation of [`Gateway`] against a PostgREST-style data API
//! (`/rest/v1`) and an object storage API (`/storage/v1`).

use crate::config::{APP_NAME, Config};
use crate::gateway::{Bucket, Gateway, GatewayError, Query, Table, UploadOptions};
use crate::state::SessionContext;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

const REST_PATH: [&str; 2] = ["rest", "v1"];
const STORAGE_PATH: [&str; 2] = ["storage", "v1"];

/// Requests a single JSON object instead of an array; zero rows becomes 406.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Error body shared (loosely) by the data and storage APIs.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Talks to the hosted backend over HTTPS.
///
/// The bearer token is read from the shared [`SessionContext`] on every
/// request, so signing in or out takes effect without rebuilding the gateway.
pub struct RestGateway {
    http: reqwest::Client,
    base: Url,
    anon_key: String,
    session: SessionContext,
}

impl RestGateway {
    pub fn new(config: &Config, session: SessionContext) -> Result<Self, GatewayError> {
        let base = config
            .endpoint()
            .map_err(|e| GatewayError::NotConfigured(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Connectivity(e.to_string()))?;

        Ok(Self {
            http,
            base,
            anon_key: config.anon_key.clone(),
            session,
        })
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, GatewayError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::NotConfigured("endpoint url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn table_url(&self, table: Table, query: &Query) -> Result<Url, GatewayError> {
        let mut url = self.endpoint(REST_PATH.into_iter().chain([table.name()]))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query.to_params() {
                pairs.append_pair(&k, &v);
            }
        }
        Ok(url)
    }

    fn object_url(&self, bucket: Bucket, path: &str) -> Result<Url, GatewayError> {
        self.endpoint(
            STORAGE_PATH
                .into_iter()
                .chain(["object", bucket.name()])
                .chain(path.split('/').filter(|s| !s.is_empty())),
        )
    }

    /// API key plus the user's token when signed in (anon key otherwise).
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .session
            .access_token()
            .unwrap_or_else(|| self.anon_key.clone());
        request.header("apikey", &self.anon_key).bearer_auth(token)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| GatewayError::Connectivity(e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body: ErrorBody = response.json().await.unwrap_or_default();
        let err = classify(status, &body);
        debug!(%status, code = ?body.code, error = %err, "backend rejected request");
        Err(err)
    }

    async fn rows(response: Response) -> Result<Vec<Value>, GatewayError> {
        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    async fn first_row(response: Response) -> Result<Value, GatewayError> {
        Self::rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::InvalidResponse("write returned no rows".into()))
    }
}

/// Map an error response to the gateway taxonomy.
fn classify(status: StatusCode, body: &ErrorBody) -> GatewayError {
    let message = body
        .message
        .clone()
        .or_else(|| body.error.clone())
        .unwrap_or_else(|| status.to_string());

    match body.code.as_deref() {
        // unique_violation, foreign_key_violation, check_violation
        Some("23505" | "23503" | "23514") => return GatewayError::Constraint(message),
        // undefined_table, or the table missing from the schema cache
        Some("42P01" | "PGRST205") => return GatewayError::NotConfigured(message),
        Some("PGRST116") => return GatewayError::NotFound,
        Some("PGRST301" | "PGRST302") => return GatewayError::NotAuthenticated,
        _ => {}
    }

    let lower = message.to_lowercase();
    if lower.contains("bucket not found")
        || (lower.contains("relation") && lower.contains("does not exist"))
    {
        return GatewayError::NotConfigured(message);
    }

    match status {
        StatusCode::UNAUTHORIZED => GatewayError::NotAuthenticated,
        StatusCode::NOT_FOUND => GatewayError::NotFound,
        StatusCode::CONFLICT => GatewayError::Constraint(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            GatewayError::Connectivity(message)
        }
        s if s.is_server_error() => GatewayError::Connectivity(message),
        _ => GatewayError::Rejected(message),
    }
}

/// Total from a `Content-Range: 0-9/42` (or `*/42`) header.
fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

#[async_trait]
impl Gateway for RestGateway {
    async fn fetch_many(&self, table: Table, query: &Query) -> Result<Vec<Value>, GatewayError> {
        let url = self.table_url(table, query)?;
        let response = self.send(self.http.get(url)).await?;
        Self::rows(response).await
    }

    async fn fetch_one(&self, table: Table, query: &Query) -> Result<Value, GatewayError> {
        let url = self.table_url(table, query)?;
        let response = self
            .send(self.http.get(url).header("Accept", SINGLE_OBJECT))
            .await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    async fn count(&self, table: Table, query: &Query) -> Result<u64, GatewayError> {
        let url = self.table_url(table, query)?;
        let response = self
            .send(self.http.head(url).header("Prefer", "count=exact"))
            .await?;
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| GatewayError::InvalidResponse("missing content-range".into()))
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, GatewayError> {
        let url = self.table_url(table, &Query::new())?;
        let response = self
            .send(
                self.http
                    .post(url)
                    .header("Prefer", "return=representation")
                    .json(&row),
            )
            .await?;
        Self::first_row(response).await
    }

    async fn upsert(&self, table: Table, row: Value) -> Result<Value, GatewayError> {
        let mut url = self.table_url(table, &Query::new())?;
        url.query_pairs_mut()
            .append_pair("on_conflict", &table.primary_key().join(","));
        let response = self
            .send(
                self.http
                    .post(url)
                    .header("Prefer", "resolution=merge-duplicates,return=representation")
                    .json(&row),
            )
            .await?;
        Self::first_row(response).await
    }

    async fn update(
        &self,
        table: Table,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, GatewayError> {
        let url = self.table_url(table, query)?;
        let response = self
            .send(
                self.http
                    .patch(url)
                    .header("Prefer", "return=representation")
                    .json(&patch),
            )
            .await?;
        Self::rows(response).await
    }

    async fn delete(&self, table: Table, query: &Query) -> Result<(), GatewayError> {
        if !query.has_filters() {
            return Err(GatewayError::Rejected("DELETE requires a WHERE clause".into()));
        }
        let url = self.table_url(table, query)?;
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    async fn upload_file(
        &self,
        bucket: Bucket,
        path: &str,
        bytes: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<String, GatewayError> {
        let url = self.object_url(bucket, path)?;
        let content_type = options
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let mut request = self
            .http
            .post(url)
            .header("Content-Type", content_type)
            .header("x-upsert", if options.overwrite { "true" } else { "false" })
            .body(bytes);
        if let Some(secs) = options.cache_control_secs {
            request = request.header("cache-control", format!("max-age={secs}"));
        }

        self.send(request).await.inspect_err(|e| {
            warn!(bucket = bucket.name(), path, error = %e, "upload failed");
        })?;
        Ok(self.public_url(bucket, path))
    }

    async fn remove_file(&self, bucket: Bucket, path: &str) -> Result<(), GatewayError> {
        let url = self.endpoint(STORAGE_PATH.into_iter().chain(["object", bucket.name()]))?;
        let body = serde_json::json!({ "prefixes": [path] });
        self.send(self.http.delete(url).json(&body)).await?;
        Ok(())
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        let segments = STORAGE_PATH
            .into_iter()
            .chain(["object", "public", bucket.name()])
            .chain(path.split('/').filter(|s| !s.is_empty()));
        match self.endpoint(segments) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}/storage/v1/object/public/{}/{}", self.base, bucket.name(), path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(code: Option<&str>, message: &str) -> ErrorBody {
        ErrorBody {
            code: code.map(String::from),
            message: Some(message.to_string()),
            error: None,
        }
    }

    fn gateway() -> RestGateway {
        let config = Config::new("https://project.example.co", "anon");
        RestGateway::new(&config, SessionContext::new()).unwrap()
    }

    #[test]
    fn test_classify_constraint_codes() {
        let err = classify(
            StatusCode::CONFLICT,
            &body(Some("23505"), "duplicate key value violates unique constraint"),
        );
        assert!(matches!(err, GatewayError::Constraint(_)));
        let err = classify(StatusCode::CONFLICT, &body(Some("23503"), "fk"));
        assert!(matches!(err, GatewayError::Constraint(_)));
    }

    #[test]
    fn test_classify_missing_schema() {
        let err = classify(
            StatusCode::NOT_FOUND,
            &body(Some("42P01"), "relation \"public.posts\" does not exist"),
        );
        assert!(matches!(err, GatewayError::NotConfigured(_)));

        let err = classify(StatusCode::BAD_REQUEST, &body(None, "Bucket not found"));
        assert!(matches!(err, GatewayError::NotConfigured(_)));
    }

    #[test]
    fn test_classify_single_row_miss() {
        let err = classify(
            StatusCode::NOT_ACCEPTABLE,
            &body(Some("PGRST116"), "JSON object requested, multiple (or no) rows returned"),
        );
        assert_eq!(err, GatewayError::NotFound);
    }

    #[test]
    fn test_classify_server_errors_retryable() {
        let err = classify(StatusCode::BAD_GATEWAY, &ErrorBody::default());
        assert!(err.is_retryable());
        let err = classify(StatusCode::FORBIDDEN, &body(None, "row-level security"));
        assert!(matches!(err, GatewayError::Rejected(_)));
    }

    #[test]
    fn test_content_range_total() {
        assert_eq!(parse_content_range_total("*/42"), Some(42));
        assert_eq!(parse_content_range_total("0-9/120"), Some(120));
        assert_eq!(parse_content_range_total("0-9/*"), None);
    }

    #[test]
    fn test_table_url_encodes_filters() {
        let gw = gateway();
        let url = gw
            .table_url(Table::Likes, &Query::new().eq("user_id", "u1").newest_first())
            .unwrap();
        assert_eq!(url.path(), "/rest/v1/likes");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("user_id".to_string(), "eq.u1".to_string())));
        assert!(pairs.contains(&("order".to_string(), "created_at.desc".to_string())));
    }

    #[test]
    fn test_public_url_layout() {
        let gw = gateway();
        assert_eq!(
            gw.public_url(Bucket::ProfilePictures, "u1/u1-1700000000000.png"),
            "https://project.example.co/storage/v1/object/public/profile-pictures/u1/u1-1700000000000.png"
        );
    }
}
