use std::sync::Arc;

use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};

use crate::api::ApiClient;
use crate::error::{AudioError, ClientError};
use crate::models::sound::Sound;

/// Turns downloaded clip bytes into something playable.
///
/// `prepare` does the decoding and is called from the blocking pool.
pub trait AudioBackend: Send + Sync {
    fn prepare(&self, bytes: Vec<u8>, content_type: &str) -> Result<Arc<dyn AudioHandle>, AudioError>;
}

pub trait AudioHandle: Send + Sync {
    /// Start from the beginning, restarting if already playing.
    fn play(&self) -> Result<(), AudioError>;
    /// Stop and rewind.
    fn stop(&self);
    fn is_playing(&self) -> bool;
}

/// Clips fetched and decoded at once while preloading.
pub const PRELOAD_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadReport {
    pub loaded: usize,
    pub failed: usize,
}

/// Resolves, caches and plays sounds. Clones share the same cache.
#[derive(Clone)]
pub struct PlaybackEngine {
    api: ApiClient,
    backend: Arc<dyn AudioBackend>,
    handles: Arc<DashMap<String, Arc<dyn AudioHandle>>>,
}

impl PlaybackEngine {
    pub fn new(api: ApiClient, backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            api,
            backend,
            handles: Arc::new(DashMap::new()),
        }
    }

    pub fn is_cached(&self, sound_id: &str) -> bool {
        self.handles.contains_key(sound_id)
    }

    pub fn cached_count(&self) -> usize {
        self.handles.len()
    }

    /// Play `sound` from the start, loading it first if it was not preloaded.
    pub async fn play_sound(&self, sound: &Sound) -> Result<(), ClientError> {
        let handle = match self.cached(&sound.id) {
            Some(handle) => handle,
            None => self.load(sound).await?,
        };
        handle.play()?;
        tracing::debug!(sound_id = %sound.id, "playing");
        Ok(())
    }

    fn cached(&self, sound_id: &str) -> Option<Arc<dyn AudioHandle>> {
        self.handles.get(sound_id).map(|h| Arc::clone(h.value()))
    }

    async fn load(&self, sound: &Sound) -> Result<Arc<dyn AudioHandle>, ClientError> {
        let url = self.api.sound_url(&sound.id).await?;
        let bytes = self.api.fetch_object(&url).await?;

        let backend = Arc::clone(&self.backend);
        let content_type = sound.metadata.file_type.clone();
        let handle = tokio::task::spawn_blocking(move || backend.prepare(bytes, &content_type))
            .await
            .map_err(|e| AudioError::Decode(e.to_string()))??;

        self.handles.insert(sound.id.clone(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Load handles for `sounds` without playing them, at most
    /// [`PRELOAD_CONCURRENCY`] at a time. Failures are logged and skipped.
    pub async fn preload(&self, sounds: &[Sound]) -> PreloadReport {
        let pending: Vec<&Sound> = sounds.iter().filter(|s| !self.is_cached(&s.id)).collect();
        let mut report = PreloadReport {
            loaded: sounds.len() - pending.len(),
            failed: 0,
        };

        let results: Vec<_> = stream::iter(pending)
            .map(|sound| async move { (sound, self.load(sound).await) })
            .buffer_unordered(PRELOAD_CONCURRENCY)
            .collect()
            .await;
        for (sound, result) in results {
            match result {
                Ok(_) => report.loaded += 1,
                Err(e) => {
                    tracing::warn!(sound_id = %sound.id, title = %sound.title, "preload failed: {e}");
                    report.failed += 1;
                }
            }
        }
        tracing::debug!(loaded = report.loaded, failed = report.failed, "preload finished");
        report
    }

    /// Drop cached handles whose sound is not in `ids`.
    pub fn retain<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        let keep: std::collections::HashSet<&str> = ids.into_iter().collect();
        self.handles.retain(|id, handle| {
            let kept = keep.contains(id.as_str());
            if !kept {
                handle.stop();
            }
            kept
        });
    }

    pub fn any_playing(&self) -> bool {
        self.handles.iter().any(|entry| entry.value().is_playing())
    }

    /// Stop every playing handle. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for entry in self.handles.iter() {
            if entry.value().is_playing() {
                entry.value().stop();
                stopped += 1;
            }
        }
        stopped
    }
}
