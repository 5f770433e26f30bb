use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::api::ApiClient;
use crate::audio::{self, FormatHint};
use crate::config::Config;
use crate::error::{AudioError, ClientError, ValidationError};
use crate::models::sound::{CreateSound, Sound, SoundMetadata, MAX_TITLE_CHARS};

pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// A file picked by the user, fully read into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl AudioFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Read `path` from disk. The content type comes from the extension
    /// unless `content_type` overrides it.
    pub async fn open(path: &Path, content_type: Option<&str>) -> Result<Self, ClientError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("not a file path: {}", path.display()),
                )
            })?
            .to_string();
        let content_type = content_type
            .map(str::to_string)
            .unwrap_or_else(|| mime_from_path(path).to_string());
        let bytes = tokio::fs::read(path).await?;
        Ok(Self {
            name,
            content_type,
            bytes,
        })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.name).extension().and_then(|e| e.to_str())
    }

    fn format_hint(&self) -> FormatHint {
        FormatHint::new(self.extension(), Some(&self.content_type))
    }
}

pub fn mime_from_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" | "oga" => "audio/ogg",
        "flac" => "audio/flac",
        "m4a" | "aac" => "audio/aac",
        "webm" => "audio/webm",
        _ => FALLBACK_CONTENT_TYPE,
    }
}

/// File name minus its last extension, cut to the title limit.
pub fn derive_title(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    stem.chars().take(MAX_TITLE_CHARS).collect()
}

/// Measures how long a clip plays. Blocking.
pub trait DurationProbe: Send + Sync {
    fn duration(&self, file: &AudioFile) -> Result<Duration, AudioError>;
}

pub struct SymphoniaProbe;

impl DurationProbe for SymphoniaProbe {
    fn duration(&self, file: &AudioFile) -> Result<Duration, AudioError> {
        audio::probe_duration(file.bytes.clone(), &file.format_hint())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_bytes: u64,
    pub max_duration: Duration,
}

impl UploadPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_bytes: config.max_upload_bytes,
            max_duration: Duration::from_secs(config.max_duration_secs),
        }
    }
}

/// A file that passed every check, with the title suggested for it.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedFile {
    pub file: AudioFile,
    pub duration: Duration,
    pub suggested_title: String,
}

/// Local checks run on a file before it can be selected for upload.
#[derive(Clone)]
pub struct Validator {
    policy: UploadPolicy,
    probe: Arc<dyn DurationProbe>,
}

impl Validator {
    pub fn new(policy: UploadPolicy) -> Self {
        Self::with_probe(policy, Arc::new(SymphoniaProbe))
    }

    pub fn with_probe(policy: UploadPolicy, probe: Arc<dyn DurationProbe>) -> Self {
        Self { policy, probe }
    }

    pub fn policy(&self) -> UploadPolicy {
        self.policy
    }

    /// Size first, then type, then duration. The first failure wins and
    /// later checks do not run.
    pub async fn validate(&self, file: AudioFile) -> Result<SelectedFile, ValidationError> {
        if file.size() > self.policy.max_bytes {
            return Err(ValidationError::FileTooLarge {
                size: file.size(),
                max: self.policy.max_bytes,
            });
        }

        if !file.content_type.starts_with("audio/") {
            return Err(ValidationError::UnsupportedType(file.content_type));
        }

        let probe = Arc::clone(&self.probe);
        let (file, probed) = tokio::task::spawn_blocking(move || {
            let probed = probe.duration(&file);
            (file, probed)
        })
        .await
        .map_err(|e| ValidationError::ProbeFailed(e.to_string()))?;

        let duration = probed.map_err(|e| {
            tracing::debug!(file = %file.name, "duration probe failed: {e}");
            ValidationError::ProbeFailed(e.to_string())
        })?;

        if duration > self.policy.max_duration {
            return Err(ValidationError::TooLong {
                duration_ms: duration.as_millis() as u64,
                max_secs: self.policy.max_duration.as_secs(),
            });
        }

        let suggested_title = derive_title(&file.name);
        Ok(SelectedFile {
            file,
            duration,
            suggested_title,
        })
    }
}

/// What the user is about to submit.
#[derive(Debug, Clone, Copy)]
pub struct UploadDraft<'a> {
    pub file: Option<&'a SelectedFile>,
    pub title: &'a str,
    pub description: &'a str,
}

impl<'a> UploadDraft<'a> {
    /// The selected file and trimmed title, if the draft can be submitted.
    pub fn check(&self) -> Result<(&'a SelectedFile, &'a str), ValidationError> {
        let title = self.title.trim();
        let file = match self.file {
            Some(file) if !title.is_empty() => file,
            _ => return Err(ValidationError::MissingTitleOrFile),
        };
        let len = title.chars().count();
        if len > MAX_TITLE_CHARS {
            return Err(ValidationError::TitleTooLong {
                len,
                max: MAX_TITLE_CHARS,
            });
        }
        Ok((file, title))
    }
}

/// Get a storage slot, write the bytes to it, then register the sound.
/// Nothing is undone if a later step fails.
pub async fn upload(api: &ApiClient, draft: UploadDraft<'_>) -> Result<Sound, ClientError> {
    let (selected, title) = draft.check()?;
    let file = &selected.file;

    let slot = api.upload_slot(&file.content_type, &file.name).await?;
    tracing::debug!(key = %slot.key, size = file.size(), "uploading to storage");

    api.put_object(&slot.url, &file.content_type, file.bytes.clone())
        .await?;

    let body = CreateSound {
        title: title.to_string(),
        description: draft.description.trim().to_string(),
        metadata: SoundMetadata {
            s3_key: slot.key.clone(),
            bucket_name: slot.bucket_name,
            file_type: file.content_type.clone(),
            file_size: file.size(),
        },
    };

    match api.create_sound(&body).await {
        Ok(sound) => {
            tracing::info!(sound_id = %sound.id, title = %sound.title, "sound uploaded");
            Ok(sound)
        }
        Err(e) => {
            tracing::warn!(key = %slot.key, "stored object left orphaned: {e}");
            Err(e)
        }
    }
}
