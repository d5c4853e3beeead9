//! Profile pictures and message media in blob storage.

use std::sync::Arc;

use tracing::info;
use url::Url;

use messenger_shared::constants::{
    MESSAGE_IMAGES_PREFIX, MESSAGE_VIDEOS_PREFIX, PROFILE_IMAGES_PREFIX,
};
use messenger_shared::{IdentityKey, MessageId};
use messenger_store::BlobStore;

use crate::error::{Result, SyncError};

pub struct Media {
    blobs: Arc<dyn BlobStore>,
}

impl Media {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    pub fn profile_picture_key(identity: &IdentityKey) -> String {
        format!(
            "{PROFILE_IMAGES_PREFIX}/{}",
            identity.profile_picture_file_name()
        )
    }

    pub fn message_photo_key(message_id: &MessageId) -> String {
        format!("{MESSAGE_IMAGES_PREFIX}/photo_message_{message_id}.png")
    }

    pub fn message_video_key(message_id: &MessageId) -> String {
        format!("{MESSAGE_VIDEOS_PREFIX}/video_message_{message_id}.mov")
    }

    /// Upload a profile picture and return the URL to download it from.
    pub async fn upload_profile_picture(&self, identity: &IdentityKey, data: &[u8]) -> Result<Url> {
        self.upload(&Self::profile_picture_key(identity), data).await
    }

    /// Upload the image of a photo message; the URL becomes the message content.
    pub async fn upload_message_photo(&self, message_id: &MessageId, data: &[u8]) -> Result<Url> {
        self.upload(&Self::message_photo_key(message_id), data).await
    }

    pub async fn upload_message_video(&self, message_id: &MessageId, data: &[u8]) -> Result<Url> {
        self.upload(&Self::message_video_key(message_id), data).await
    }

    pub async fn profile_picture_url(&self, identity: &IdentityKey) -> Result<Url> {
        self.download_url(&Self::profile_picture_key(identity)).await
    }

    pub async fn download_url(&self, key: &str) -> Result<Url> {
        self.blobs
            .download_url(key)
            .await
            .map_err(SyncError::UrlUnavailable)
    }

    async fn upload(&self, key: &str, data: &[u8]) -> Result<Url> {
        self.blobs
            .put(key, data)
            .await
            .map_err(SyncError::UploadFailed)?;
        let url = self.download_url(key).await?;
        info!(key, size = data.len(), %url, "media uploaded");
        Ok(url)
    }
}
