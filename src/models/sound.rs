use serde::{Deserialize, Serialize};

use crate::models::user::User;

pub const MAX_TITLE_CHARS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sound {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    pub metadata: SoundMetadata,
    pub user: SoundOwner,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundMetadata {
    pub s3_key: String,
    pub bucket_name: String,
    pub file_type: String,
    pub file_size: u64,
}

/// The API returns the owner either populated or as a bare id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SoundOwner {
    User(User),
    Id(String),
}

impl SoundOwner {
    pub fn id(&self) -> &str {
        match self {
            SoundOwner::User(user) => &user.id,
            SoundOwner::Id(id) => id,
        }
    }
}

/// Body of `GET /sounds/upload-url`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSlot {
    pub url: String,
    pub key: String,
    pub bucket_name: String,
}

/// Body of `POST /sounds`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSound {
    pub title: String,
    pub description: String,
    pub metadata: SoundMetadata,
}
