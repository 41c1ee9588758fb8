// SPDX-License-Identifier: MPL-2.0

use crate::app::App;
use crate::cache::{FollowCache, PostCache, ProfileCache};
use crate::config::{BANNER_IMAGE_MAX_BYTES, PROFILE_PICTURE_MAX_BYTES};
use crate::gateway::{GatewayError, Query};
use crate::model::{Follow, NewProfile, Post, Profile, ProfileUpdate, Session};
use crate::services::{MediaFile, Screen, ServiceError};
use crate::sync::{MutationError, ToggleOutcome};
use crate::util::validate;
use chrono::Utc;
use tracing::{info, warn};

/// The signed-in user's own profile page.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnProfile {
    pub profile: Profile,
    pub posts: Vec<Post>,
}

/// Someone's profile as seen by the current viewer.
#[derive(Debug, Clone, PartialEq)]
pub struct PublicProfile {
    pub profile: Profile,
    pub posts: Vec<Post>,
    pub is_following: bool,
    pub is_own: bool,
}

/// Contents of the edit-profile form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileEdit {
    pub username: String,
    pub display_name: String,
    pub bio: String,
    pub website: String,
    pub picture: Option<MediaFile>,
    pub banner: Option<MediaFile>,
}

pub struct ProfileService<'a> {
    app: &'a App,
}

impl<'a> ProfileService<'a> {
    pub fn new(app: &'a App) -> Self {
        Self { app }
    }

    fn viewer(&self) -> Result<Session, ServiceError> {
        self.app.viewer().ok_or(ServiceError::NotSignedIn)
    }

    async fn posts_by(&self, user_id: &str) -> Vec<Post> {
        match self
            .app
            .remote()
            .fetch_many::<Post>(&Query::new().eq("user_id", user_id).newest_first())
            .await
        {
            Ok(posts) => {
                if let Err(e) = PostCache::new(self.app.cache()).store_batch(&posts) {
                    warn!(user_id, error = %e, "failed to cache posts");
                }
                posts
            }
            Err(e) => {
                warn!(user_id, error = %e, "failed to fetch posts, using cache");
                PostCache::new(self.app.cache())
                    .by_author(user_id)
                    .unwrap_or_default()
            }
        }
    }

    fn remember(&self, profile: &Profile) {
        if let Err(e) = ProfileCache::new(self.app.cache()).store(profile) {
            warn!(user_id = %profile.id, error = %e, "failed to cache profile");
        }
    }

    /// The viewer's profile, created on first visit if the store has none.
    pub async fn own(&self) -> Result<OwnProfile, ServiceError> {
        let viewer = self.viewer()?;
        let user_id = viewer.user_id();

        let profile = match self
            .app
            .remote()
            .find::<Profile>(&Query::new().eq("id", user_id))
            .await?
        {
            Some(profile) => profile,
            None => self.create_default(&viewer).await,
        };
        self.remember(&profile);

        Ok(OwnProfile {
            posts: self.posts_by(user_id).await,
            profile,
        })
    }

    async fn create_default(&self, viewer: &Session) -> Profile {
        let username = viewer
            .user
            .email_local_part()
            .unwrap_or(viewer.user_id())
            .to_string();
        let row = NewProfile {
            id: viewer.user_id().to_string(),
            username: username.clone(),
            display_name: String::new(),
        };
        match self.app.remote().insert::<Profile, _>(&row).await {
            Ok(profile) => {
                info!(user_id = %profile.id, "created missing profile");
                profile
            }
            Err(e) => {
                warn!(user_id = viewer.user_id(), error = %e, "failed to create profile");
                Profile::placeholder(viewer.user_id(), &username)
            }
        }
    }

    pub async fn public(&self, user_id: &str) -> Screen<PublicProfile> {
        let profile = match self
            .app
            .remote()
            .find::<Profile>(&Query::new().eq("id", user_id))
            .await
        {
            Ok(Some(profile)) => profile,
            Ok(None) => return Screen::NotFound,
            Err(e) => {
                warn!(user_id, error = %e, "failed to load profile");
                let screen = Screen::failed(&e);
                if screen == Screen::Unavailable {
                    self.app.notifier().error("Failed to load profile");
                }
                return screen;
            }
        };
        self.remember(&profile);

        let viewer_id = self.app.session().user_id();
        let is_own = viewer_id.as_deref() == Some(user_id);
        let is_following = match viewer_id.as_deref() {
            Some(viewer_id) if !is_own => self.follow_status(viewer_id, user_id).await,
            _ => false,
        };

        Screen::Ready(PublicProfile {
            posts: self.posts_by(user_id).await,
            profile,
            is_following,
            is_own,
        })
    }

    async fn follow_status(&self, viewer_id: &str, target: &str) -> bool {
        let query = Query::new()
            .eq("follower_id", viewer_id)
            .eq("following_id", target);
        let following = match self.app.remote().find::<Follow>(&query).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                warn!(viewer_id, target, error = %e, "failed to check follow status");
                return FollowCache::new(self.app.cache())
                    .contains(viewer_id, target)
                    .unwrap_or(false);
            }
        };
        if let Err(e) = FollowCache::new(self.app.cache()).set(viewer_id, target, following) {
            warn!(viewer_id, target, error = %e, "failed to cache follow status");
        }
        following
    }

    pub async fn toggle_follow(&self, target: &str) -> Result<ToggleOutcome, MutationError> {
        let viewer = self.app.viewer();
        self.app
            .mutations()
            .toggle_follow(viewer.as_ref(), target)
            .await
    }

    /// Save the edit form, uploading any new images first.
    pub async fn update(&self, edit: &ProfileEdit) -> Result<Profile, ServiceError> {
        let result = self.try_update(edit).await;
        match &result {
            Ok(_) => self.app.notifier().success("Profile updated!"),
            Err(ServiceError::Remote(e)) => {
                warn!(error = %e, "failed to update profile");
                self.app.notifier().error("Error updating profile");
            }
            Err(e) => self.app.notifier().error(e.user_message()),
        }
        result
    }

    async fn try_update(&self, edit: &ProfileEdit) -> Result<Profile, ServiceError> {
        let viewer = self.viewer()?;
        let user_id = viewer.user_id();
        let username = validate::required(&edit.username, "Username")?;
        if let Some(picture) = &edit.picture {
            validate::file_size(picture.bytes.len(), PROFILE_PICTURE_MAX_BYTES, "Profile picture")?;
        }
        if let Some(banner) = &edit.banner {
            validate::file_size(banner.bytes.len(), BANNER_IMAGE_MAX_BYTES, "Banner image")?;
        }

        let current = match ProfileCache::new(self.app.cache()).get(user_id) {
            Ok(profile) => Some(profile),
            Err(_) => {
                self.app
                    .remote()
                    .find::<Profile>(&Query::new().eq("id", user_id))
                    .await?
            }
        };
        let uploads = self.app.uploads();
        let profile_picture_url = match &edit.picture {
            Some(file) => Some(uploads.upload_profile_picture(user_id, file).await?),
            None => current.as_ref().and_then(|p| p.profile_picture_url.clone()),
        };
        let banner_image_url = match &edit.banner {
            Some(file) => Some(uploads.upload_banner_image(user_id, file).await?),
            None => current.as_ref().and_then(|p| p.banner_image_url.clone()),
        };

        let update = ProfileUpdate {
            id: user_id.to_string(),
            username: username.to_string(),
            display_name: edit.display_name.trim().to_string(),
            bio: edit.bio.trim().to_string(),
            website: edit.website.trim().to_string(),
            profile_picture_url,
            banner_image_url,
            updated_at: Utc::now(),
        };
        let profile: Profile = self.app.remote().upsert(&update).await.map_err(|e| match e {
            e @ GatewayError::Constraint(_) if e.is_duplicate() => ServiceError::UsernameTaken,
            e => ServiceError::Remote(e),
        })?;
        self.remember(&profile);
        info!(user_id, "profile updated");
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Bucket, Table};
    use crate::services::testing::fixture;
    use serde_json::json;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    #[tokio::test]
    async fn test_own_profile_created_on_first_visit() {
        let f = fixture();
        f.sign_in_as("u1");

        let own = f.app.profiles().own().await.unwrap();
        assert_eq!(own.profile.username, "u1");
        assert!(own.posts.is_empty());
        assert_eq!(f.gateway.rows(Table::Profiles).len(), 1);

        // second visit finds it
        f.app.profiles().own().await.unwrap();
        assert_eq!(f.gateway.rows(Table::Profiles).len(), 1);
    }

    #[tokio::test]
    async fn test_public_profile_states() {
        let f = fixture();
        f.profile("u2", "bob");
        f.code_post("p1", "u2", "2026-01-01T10:00:00Z");
        f.gateway.seed(
            Table::Follows,
            json!({"follower_id": "u1", "following_id": "u2"}),
        );
        f.sign_in_as("u1");

        let page = f.app.profiles().public("u2").await.ready().unwrap();
        assert!(page.is_following);
        assert!(!page.is_own);
        assert_eq!(page.posts.len(), 1);
        assert!(FollowCache::new(f.app.cache()).contains("u1", "u2").unwrap());

        assert_eq!(f.app.profiles().public("nobody").await, Screen::NotFound);
    }

    #[tokio::test]
    async fn test_own_public_profile_skips_follow_check() {
        let f = fixture();
        f.profile("u1", "ada");
        f.sign_in_as("u1");
        let page = f.app.profiles().public("u1").await.ready().unwrap();
        assert!(page.is_own);
        assert!(!page.is_following);
    }

    #[tokio::test]
    async fn test_follow_round_trip_adjusts_followers() {
        let f = fixture();
        f.profile("u2", "bob");
        f.sign_in_as("u1");
        f.app.profiles().public("u2").await;

        let followed = f.app.profiles().toggle_follow("u2").await.unwrap();
        assert_eq!(followed, ToggleOutcome { member: true, count: Some(1) });
        assert_eq!(f.gateway.rows(Table::Follows).len(), 1);

        let unfollowed = f.app.profiles().toggle_follow("u2").await.unwrap();
        assert_eq!(unfollowed, ToggleOutcome { member: false, count: Some(0) });
        assert!(f.gateway.rows(Table::Follows).is_empty());
    }

    #[tokio::test]
    async fn test_update_uploads_and_saves() {
        let f = fixture();
        f.profile("u1", "ada");
        f.sign_in_as("u1");

        let edit = ProfileEdit {
            username: "countess".into(),
            display_name: "Ada".into(),
            picture: Some(MediaFile::new("me.png", PNG.to_vec())),
            ..Default::default()
        };
        let profile = f.app.profiles().update(&edit).await.unwrap();
        assert_eq!(profile.username, "countess");
        let url = profile.profile_picture_url.unwrap();
        assert!(url.contains("profile-pictures/u1/u1-"));
        assert_eq!(ProfileCache::new(f.app.cache()).get("u1").unwrap().username, "countess");
        assert_eq!(f.app.notifier().drain()[0].message, "Profile updated!");
    }

    #[tokio::test]
    async fn test_taken_username_reported() {
        let f = fixture();
        f.profile("u1", "ada");
        f.profile("u2", "bob");
        f.sign_in_as("u1");

        let edit = ProfileEdit {
            username: "bob".into(),
            ..Default::default()
        };
        let err = f.app.profiles().update(&edit).await.unwrap_err();
        assert!(matches!(err, ServiceError::UsernameTaken));
        assert_eq!(
            f.app.notifier().drain()[0].message,
            "That username is already taken"
        );
    }

    #[tokio::test]
    async fn test_oversized_banner_blocks_everything() {
        let f = fixture();
        f.sign_in_as("u1");
        let mut banner = MediaFile::new("wide.png", PNG.to_vec());
        banner.bytes.resize(BANNER_IMAGE_MAX_BYTES + 1, 0);
        let edit = ProfileEdit {
            username: "ada".into(),
            picture: Some(MediaFile::new("me.png", PNG.to_vec())),
            banner: Some(banner),
            ..Default::default()
        };

        let err = f.app.profiles().update(&edit).await.unwrap_err();
        assert_eq!(err.user_message(), "Banner image must be less than 10MB");
        assert!(f.gateway.writes().is_empty());
    }

    #[tokio::test]
    async fn test_missing_picture_bucket_message() {
        let f = fixture();
        f.sign_in_as("u1");
        f.gateway.drop_bucket(Bucket::ProfilePictures);
        let edit = ProfileEdit {
            username: "ada".into(),
            picture: Some(MediaFile::new("me.png", PNG.to_vec())),
            ..Default::default()
        };

        f.app.profiles().update(&edit).await.unwrap_err();
        let message = &f.app.notifier().drain()[0].message;
        assert!(message.starts_with("Storage bucket \"profile-pictures\" not found"));
    }
}
