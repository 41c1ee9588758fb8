// SPDX-License-Identifier: MPL-2.0

use crate::config::APP_ID;
use crate::model::Session;
use secret_service::{Collection, EncryptionType, SecretService};
use thiserror::Error;
use tracing::debug;

const SECRET_LABEL: &str = "CodeKrafts Session";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("secret service unavailable: {0}")]
    SecretService(String),
    #[error("session not found")]
    NotFound,
    #[error("invalid session data: {0}")]
    InvalidData(String),
}

fn unavailable(e: impl std::fmt::Display) -> SessionError {
    SessionError::SecretService(e.to_string())
}

/// Persists the signed-in session in the desktop keyring so a restart
/// resumes it.
pub struct SessionManager;

impl SessionManager {
    async fn unlocked<'s>(ss: &'s SecretService<'_>) -> Result<Collection<'s>, SessionError> {
        let collection = ss.get_default_collection().await.map_err(unavailable)?;
        if collection.is_locked().await.unwrap_or(true) {
            collection.unlock().await.map_err(unavailable)?;
        }
        Ok(collection)
    }

    pub async fn store(session: &Session) -> Result<(), SessionError> {
        let session_json =
            serde_json::to_string(session).map_err(|e| SessionError::InvalidData(e.to_string()))?;
        let user_id = session.user_id().to_string();

        let ss = SecretService::connect(EncryptionType::Dh)
            .await
            .map_err(unavailable)?;
        let collection = Self::unlocked(&ss).await?;

        let attributes = vec![("application", APP_ID), ("user_id", user_id.as_str())];
        collection
            .create_item(
                SECRET_LABEL,
                attributes.into_iter().collect(),
                session_json.as_bytes(),
                true,
                "text/plain",
            )
            .await
            .map_err(unavailable)?;
        debug!(user_id = %user_id, "stored session");
        Ok(())
    }

    pub async fn load() -> Result<Session, SessionError> {
        let ss = SecretService::connect(EncryptionType::Dh)
            .await
            .map_err(unavailable)?;
        let collection = Self::unlocked(&ss).await?;

        let items = collection
            .search_items(vec![("application", APP_ID)].into_iter().collect())
            .await
            .map_err(unavailable)?;
        let item = items.first().ok_or(SessionError::NotFound)?;
        let secret = item.get_secret().await.map_err(unavailable)?;
        serde_json::from_slice(&secret).map_err(|e| SessionError::InvalidData(e.to_string()))
    }

    pub async fn clear() -> Result<(), SessionError> {
        let ss = SecretService::connect(EncryptionType::Dh)
            .await
            .map_err(unavailable)?;
        let collection = Self::unlocked(&ss).await?;

        let items = collection
            .search_items(vec![("application", APP_ID)].into_iter().collect())
            .await
            .map_err(unavailable)?;
        for item in items {
            item.delete().await.map_err(unavailable)?;
        }
        Ok(())
    }
}
