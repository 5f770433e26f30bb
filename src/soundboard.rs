use chrono::Duration;

use crate::api::ApiClient;
use crate::config::PreloadPolicy;
use crate::error::{ClientError, ValidationError};
use crate::keys::{KeyAction, KeyInput};
use crate::models::sound::Sound;
use crate::notify::{Level, Notifier, PLAYBACK_ERROR_DURATION_SECS};
use crate::playback::{PlaybackEngine, PreloadReport};
use crate::upload::{self, AudioFile, SelectedFile, UploadDraft, Validator};

/// The signed-in user's board: the sound list, the file being prepared for
/// upload, playback, and the notifications those actions produce.
///
/// Every user-facing action both returns its result and queues a
/// notification, so a renderer can ignore the `Result` entirely.
pub struct Soundboard {
    api: ApiClient,
    engine: PlaybackEngine,
    validator: Validator,
    preload: PreloadPolicy,
    sounds: Vec<Sound>,
    selected: Option<SelectedFile>,
    title: String,
    notifier: Notifier,
}

impl Soundboard {
    pub fn new(
        api: ApiClient,
        engine: PlaybackEngine,
        validator: Validator,
        preload: PreloadPolicy,
    ) -> Self {
        Self {
            api,
            engine,
            validator,
            preload,
            sounds: Vec::new(),
            selected: None,
            title: String::new(),
            notifier: Notifier::new(),
        }
    }

    pub fn sounds(&self) -> &[Sound] {
        &self.sounds
    }

    pub fn selected(&self) -> Option<&SelectedFile> {
        self.selected.as_ref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn notifications(&mut self) -> &mut Notifier {
        &mut self.notifier
    }

    /// Replace the list with the server's, then preload per policy. On
    /// failure the current list is kept.
    pub async fn load_sounds(&mut self) -> Result<PreloadReport, ClientError> {
        let sounds = match self.api.list_sounds().await {
            Ok(sounds) => sounds,
            Err(e) => {
                tracing::warn!("failed to load sounds: {e}");
                self.notifier.error("Error loading sounds", &e);
                return Err(e);
            }
        };

        tracing::debug!(count = sounds.len(), "sounds loaded");
        self.engine.retain(sounds.iter().map(|s| s.id.as_str()));
        self.sounds = sounds;

        let limit = self.preload.limit(self.sounds.len());
        Ok(self.engine.preload(&self.sounds[..limit]).await)
    }

    /// Validate `file` and, if it passes, select it and prefill the title.
    /// A rejected file leaves the previous selection and title in place.
    pub async fn select_file(&mut self, file: AudioFile) -> Result<&SelectedFile, ValidationError> {
        match self.validator.validate(file).await {
            Ok(selected) => {
                self.title = selected.suggested_title.clone();
                Ok(self.selected.insert(selected))
            }
            Err(e) => {
                self.notifier.error(e.title(), &e);
                Err(e)
            }
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
        self.title.clear();
    }

    /// Upload the selected file under the current title. On success the
    /// selection is cleared and the list reloaded.
    pub async fn upload(&mut self, description: &str) -> Result<Sound, ClientError> {
        let draft = UploadDraft {
            file: self.selected.as_ref(),
            title: &self.title,
            description,
        };

        match upload::upload(&self.api, draft).await {
            Ok(sound) => {
                self.notifier.success("Sound uploaded successfully");
                self.clear_selection();
                // A failed reload has its own notification.
                let _ = self.load_sounds().await;
                Ok(sound)
            }
            Err(e) => {
                let title = match &e {
                    ClientError::Validation(v) => v.title(),
                    _ => "Upload failed",
                };
                self.notifier.error(title, &e);
                Err(e)
            }
        }
    }

    /// Delete on the server, then reload. The local list is never edited
    /// directly.
    pub async fn delete_sound(&mut self, sound_id: &str) -> Result<(), ClientError> {
        match self.api.delete_sound(sound_id).await {
            Ok(()) => {
                tracing::info!(sound_id, "sound deleted");
                self.notifier.success("Sound deleted successfully");
                let _ = self.load_sounds().await;
                Ok(())
            }
            Err(e) => {
                self.notifier.error("Delete failed", &e);
                Err(e)
            }
        }
    }

    /// Play the sound at list position `index`. Returns `Ok(false)` when
    /// there is no sound there.
    pub async fn play_index(&mut self, index: usize) -> Result<bool, ClientError> {
        let Some(sound) = self.sounds.get(index).cloned() else {
            return Ok(false);
        };
        self.play_sound(&sound).await?;
        Ok(true)
    }

    pub async fn play_sound(&mut self, sound: &Sound) -> Result<(), ClientError> {
        let result = self.engine.play_sound(sound).await;
        if let Err(e) = &result {
            tracing::warn!(sound_id = %sound.id, "playback failed: {e}");
            self.notifier.push(
                Level::Error,
                "Error playing sound",
                Some(e.to_string()),
                Duration::seconds(PLAYBACK_ERROR_DURATION_SECS),
            );
        }
        result
    }

    pub fn stop_all(&self) -> usize {
        self.engine.stop_all()
    }

    /// Dispatch a key press. Playback errors are returned after being
    /// queued as notifications; keys with no sound behind them do nothing.
    pub async fn handle_key(&mut self, key: KeyInput) -> Result<KeyAction, ClientError> {
        let action = key.action();
        match action {
            KeyAction::Play(index) => {
                self.play_index(index).await?;
            }
            KeyAction::StopAll => {
                self.stop_all();
            }
            KeyAction::Ignore => {}
        }
        Ok(action)
    }

    /// Forget everything tied to the signed-in user.
    pub fn reset(&mut self) {
        self.engine.stop_all();
        self.engine.retain(std::iter::empty::<&str>());
        self.sounds.clear();
        self.clear_selection();
    }
}
