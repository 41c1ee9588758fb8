// SPDX-License-Identifier: MPL-2.0

use crate::app::App;
use crate::config::{BANNER_IMAGE_MAX_BYTES, MEDIA_CACHE_CONTROL_SECS, PROFILE_PICTURE_MAX_BYTES};
use crate::gateway::{Bucket, UploadOptions};
use crate::services::ServiceError;
use crate::util::{ValidationError, validate};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

/// A file picked by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl MediaFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Extension from the file name, lowercased. `bin` if there is none.
    pub fn extension(&self) -> String {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .filter(|ext| !ext.is_empty() && !ext.contains('/'))
            .unwrap_or_else(|| "bin".to_string())
    }

    pub fn is_image(&self) -> bool {
        image::guess_format(&self.bytes).is_ok()
    }
}

/// MIME type sniffed from the bytes, or guessed from the extension for video.
pub fn content_type(file: &MediaFile) -> Option<String> {
    if let Ok(format) = image::guess_format(&file.bytes) {
        return Some(format.to_mime_type().to_string());
    }
    let mime = match file.extension().as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => return None,
    };
    Some(mime.to_string())
}

/// Short unique-enough token for post media names.
fn suffix() -> String {
    let seq = UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed);
    let nanos = Utc::now().timestamp_subsec_nanos() as u64;
    let mut n = nanos.wrapping_mul(31).wrapping_add(seq);
    let mut out = String::new();
    while out.len() < 6 {
        let digit = (n % 36) as u32;
        out.push(char::from_digit(digit, 36).unwrap_or('0'));
        n /= 36;
    }
    out
}

pub struct UploadService<'a> {
    app: &'a App,
}

impl<'a> UploadService<'a> {
    pub fn new(app: &'a App) -> Self {
        Self { app }
    }

    pub async fn upload_profile_picture(
        &self,
        user_id: &str,
        file: &MediaFile,
    ) -> Result<String, ServiceError> {
        validate::file_size(file.bytes.len(), PROFILE_PICTURE_MAX_BYTES, "Profile picture")?;
        self.upload_profile_media(Bucket::ProfilePictures, user_id, file)
            .await
    }

    pub async fn upload_banner_image(
        &self,
        user_id: &str,
        file: &MediaFile,
    ) -> Result<String, ServiceError> {
        validate::file_size(file.bytes.len(), BANNER_IMAGE_MAX_BYTES, "Banner image")?;
        self.upload_profile_media(Bucket::BannerImages, user_id, file)
            .await
    }

    async fn upload_profile_media(
        &self,
        bucket: Bucket,
        user_id: &str,
        file: &MediaFile,
    ) -> Result<String, ServiceError> {
        if !file.is_image() {
            return Err(ValidationError::Invalid("Please choose an image file".to_string()).into());
        }
        let path = format!(
            "{user_id}/{user_id}-{}.{}",
            Utc::now().timestamp_millis(),
            file.extension()
        );
        let options = UploadOptions {
            content_type: content_type(file),
            overwrite: true,
            cache_control_secs: Some(MEDIA_CACHE_CONTROL_SECS),
        };
        self.upload(bucket, &path, file, &options).await
    }

    /// Image or video attached to a meme post.
    pub async fn upload_post_media(
        &self,
        user_id: &str,
        file: &MediaFile,
    ) -> Result<String, ServiceError> {
        let path = format!(
            "{user_id}/{}-{}.{}",
            Utc::now().timestamp_millis(),
            suffix(),
            file.extension()
        );
        let options = UploadOptions {
            content_type: content_type(file),
            ..Default::default()
        };
        self.upload(Bucket::PostMedia, &path, file, &options).await
    }

    async fn upload(
        &self,
        bucket: Bucket,
        path: &str,
        file: &MediaFile,
        options: &UploadOptions,
    ) -> Result<String, ServiceError> {
        match self
            .app
            .remote()
            .upload_file(bucket, path, file.bytes.clone(), options)
            .await
        {
            Ok(url) => {
                info!(%bucket, path, bytes = file.bytes.len(), "file uploaded");
                Ok(url)
            }
            Err(source) => {
                warn!(%bucket, path, error = %source, "upload failed");
                Err(ServiceError::Upload { bucket, source })
            }
        }
    }

    pub async fn delete_file(&self, bucket: Bucket, path: &str) -> Result<(), ServiceError> {
        self.app
            .remote()
            .remove_file(bucket, path)
            .await
            .map_err(|source| ServiceError::Upload { bucket, source })
    }
}
