// SPDX-License-Identifier: MPL-2.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authenticated account as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
}

impl AuthUser {
    /// Local part of the e-mail address, used as the default username.
    pub fn email_local_part(&self) -> Option<&str> {
        self.email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .filter(|s| !s.is_empty())
    }
}

/// Decoupled from the provider's wire format so we own the API boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp at which the access token expires
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    #[serde(default)]
    pub banner_image_url: Option<String>,
    #[serde(default)]
    pub follower_count: u32,
    #[serde(default)]
    pub following_count: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// Unsaved profile shown when the store has none yet.
    pub fn placeholder(id: &str, username: &str) -> Self {
        Self {
            id: id.to_string(),
            username: username.to_string(),
            display_name: None,
            bio: None,
            website: None,
            profile_picture_url: None,
            banner_image_url: None,
            follower_count: 0,
            following_count: 0,
            created_at: None,
        }
    }

    /// Display name if set and non-empty, otherwise the username.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    Code,
    Meme,
}

impl PostKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PostKind::Code => "code",
            PostKind::Meme => "meme",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code" => Some(PostKind::Code),
            "meme" => Some(PostKind::Meme),
            _ => None,
        }
    }
}

impl fmt::Display for PostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(rename = "user_id")]
    pub author_id: String,
    #[serde(rename = "type")]
    pub kind: PostKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content_url: Option<String>,
    #[serde(default)]
    pub code_snippet: Option<String>,
    #[serde(default)]
    pub code_language: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Post {
    /// Whether the media URL points at a video rather than an image.
    pub fn is_video(&self) -> bool {
        self.content_url
            .as_deref()
            .is_some_and(|u| u.ends_with(".mp4") || u.contains("video"))
    }
}

/// Membership record: the viewer likes the post.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Like {
    pub user_id: String,
    pub post_id: String,
}

/// Membership record: `follower_id` follows `following_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Follow {
    pub follower_id: String,
    pub following_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    #[serde(rename = "user_id")]
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostAnalytics {
    pub post_id: String,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub unique_viewers: u64,
    #[serde(default)]
    pub engagement_rate: f64,
    #[serde(default)]
    pub last_viewed_at: Option<DateTime<Utc>>,
}

impl PostAnalytics {
    /// Snapshot shown when nothing has been recorded yet.
    pub fn empty(post_id: &str) -> Self {
        Self {
            post_id: post_id.to_string(),
            view_count: 0,
            unique_viewers: 0,
            engagement_rate: 0.0,
            last_viewed_at: None,
        }
    }
}

/// Raw view event; analytics are derived from these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostView {
    pub post_id: String,
    #[serde(rename = "user_id", default)]
    pub viewer_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub id: String,
    pub username: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileUpdate {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub bio: String,
    pub website: String,
    pub profile_picture_url: Option<String>,
    pub banner_image_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPost {
    pub user_id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: PostKind,
    pub content_url: Option<String>,
    pub code_snippet: Option<String>,
    pub code_language: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewComment {
    pub post_id: String,
    pub user_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPostView {
    pub post_id: String,
    pub user_id: Option<String>,
}
