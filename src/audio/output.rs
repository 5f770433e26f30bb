//! Default-device output. Decoded clips become voices in a small mixer that
//! the cpal callback reads without locking.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, OnceLock};

use arc_swap::ArcSwap;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};

use super::{decode_clip, DecodedClip, FormatHint};
use crate::error::AudioError;
use crate::playback::{AudioBackend, AudioHandle};

/// Playback positions are 32.32 fixed point, in source frames.
const FRAC_BITS: u32 = 32;
const FRAC_MASK: u64 = (1 << FRAC_BITS) - 1;

struct Voice {
    clip: DecodedClip,
    step: u64,
    position: AtomicU64,
    playing: AtomicBool,
}

impl Voice {
    fn new(clip: DecodedClip, output_rate: u32) -> Self {
        let step = if output_rate == 0 {
            1 << FRAC_BITS
        } else {
            (u64::from(clip.sample_rate) << FRAC_BITS) / u64::from(output_rate)
        };
        Self {
            clip,
            step,
            position: AtomicU64::new(0),
            playing: AtomicBool::new(false),
        }
    }

    /// Add this voice into `out`, linearly interpolating between source
    /// frames. Source channels beyond the output's are dropped; missing ones
    /// repeat the last source channel.
    fn mix_into(&self, out: &mut [f32], channels: usize) {
        if !self.playing.load(Ordering::Acquire) {
            return;
        }
        let frames = self.clip.frames();
        let src_channels = self.clip.channels;
        if frames == 0 || src_channels == 0 || channels == 0 {
            self.playing.store(false, Ordering::Release);
            return;
        }

        let start = self.position.load(Ordering::Acquire);
        let mut pos = start;
        let mut finished = false;

        for frame in out.chunks_mut(channels) {
            let idx = (pos >> FRAC_BITS) as usize;
            if idx >= frames {
                finished = true;
                break;
            }
            let next = (idx + 1).min(frames - 1);
            let frac = (pos & FRAC_MASK) as f32 / (1u64 << FRAC_BITS) as f32;
            for (c, sample) in frame.iter_mut().enumerate() {
                let sc = c.min(src_channels - 1);
                let a = self.clip.samples[idx * src_channels + sc];
                let b = self.clip.samples[next * src_channels + sc];
                *sample += a + (b - a) * frac;
            }
            pos += self.step;
        }

        // A concurrent play/stop rewound us; keep its position.
        if self
            .position
            .compare_exchange(start, pos, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            && finished
        {
            self.playing.store(false, Ordering::Release);
        }
    }
}

/// Active voices. Writers swap in a new list; the callback only loads.
pub(crate) struct Mixer {
    voices: ArcSwap<Vec<Arc<Voice>>>,
    sample_rate: u32,
}

impl Mixer {
    pub(crate) fn new(sample_rate: u32) -> Self {
        Self {
            voices: ArcSwap::from_pointee(Vec::new()),
            sample_rate,
        }
    }

    fn add(&self, voice: Arc<Voice>) {
        self.voices.rcu(|voices| {
            let mut next = Vec::with_capacity(voices.len() + 1);
            next.extend(voices.iter().cloned());
            next.push(Arc::clone(&voice));
            next
        });
    }

    fn remove(&self, voice: &Arc<Voice>) {
        self.voices.rcu(|voices| {
            voices
                .iter()
                .filter(|v| !Arc::ptr_eq(v, voice))
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    fn voice_count(&self) -> usize {
        self.voices.load().len()
    }

    /// Overwrite `out` with the clamped sum of all playing voices.
    pub(crate) fn render(&self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        for voice in self.voices.load().iter() {
            voice.mix_into(out, channels);
        }
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }

    pub(crate) fn voice(self: &Arc<Self>, clip: DecodedClip) -> VoiceHandle {
        let voice = Arc::new(Voice::new(clip, self.sample_rate));
        self.add(Arc::clone(&voice));
        VoiceHandle {
            voice,
            mixer: Arc::clone(self),
        }
    }
}

/// A clip registered with the mixer. Dropping it removes the voice.
pub struct VoiceHandle {
    voice: Arc<Voice>,
    mixer: Arc<Mixer>,
}

impl AudioHandle for VoiceHandle {
    fn play(&self) -> Result<(), AudioError> {
        self.voice.position.store(0, Ordering::Release);
        self.voice.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) {
        self.voice.playing.store(false, Ordering::Release);
        self.voice.position.store(0, Ordering::Release);
    }

    fn is_playing(&self) -> bool {
        self.voice.playing.load(Ordering::Acquire)
    }
}

impl Drop for VoiceHandle {
    fn drop(&mut self) {
        self.mixer.remove(&self.voice);
    }
}

/// Plays through the default output device.
///
/// cpal streams are not `Send`, so the stream lives on its own thread for as
/// long as the backend does.
pub struct CpalBackend {
    mixer: Arc<Mixer>,
    _shutdown: mpsc::SyncSender<()>,
}

impl CpalBackend {
    pub fn new() -> Result<Self, AudioError> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<Arc<Mixer>, AudioError>>(1);
        let (shutdown_tx, shutdown_rx) = mpsc::sync_channel::<()>(0);

        std::thread::Builder::new()
            .name("soundboard-audio".to_string())
            .spawn(move || {
                let stream = match open_stream() {
                    Ok((stream, mixer)) => {
                        let _ = ready_tx.send(Ok(mixer));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns once the backend (and its sender) is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::debug!("audio stream closed");
            })
            .map_err(|e| AudioError::Device(format!("failed to spawn audio thread: {e}")))?;

        let mixer = ready_rx
            .recv()
            .map_err(|_| AudioError::Device("audio thread exited during startup".to_string()))??;

        Ok(Self {
            mixer,
            _shutdown: shutdown_tx,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.mixer.sample_rate
    }

    pub fn voice_count(&self) -> usize {
        self.mixer.voice_count()
    }
}

impl AudioBackend for CpalBackend {
    fn prepare(&self, bytes: Vec<u8>, content_type: &str) -> Result<Arc<dyn AudioHandle>, AudioError> {
        let clip = decode_clip(bytes, &FormatHint::new(None, Some(content_type)))?;
        tracing::debug!(
            frames = clip.frames(),
            rate = clip.sample_rate,
            channels = clip.channels,
            "clip decoded"
        );
        Ok(Arc::new(self.mixer.voice(clip)))
    }
}

/// Opens the output device on the first `prepare`, so commands that never
/// play a sound work on machines without one.
#[derive(Default)]
pub struct LazyCpalBackend {
    backend: OnceLock<CpalBackend>,
    opening: Mutex<()>,
}

impl LazyCpalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn backend(&self) -> Result<&CpalBackend, AudioError> {
        if let Some(backend) = self.backend.get() {
            return Ok(backend);
        }
        let _guard = self
            .opening
            .lock()
            .map_err(|_| AudioError::Device("audio backend poisoned".to_string()))?;
        if let Some(backend) = self.backend.get() {
            return Ok(backend);
        }
        let opened = CpalBackend::new()?;
        Ok(self.backend.get_or_init(|| opened))
    }
}

impl AudioBackend for LazyCpalBackend {
    fn prepare(&self, bytes: Vec<u8>, content_type: &str) -> Result<Arc<dyn AudioHandle>, AudioError> {
        self.backend()?.prepare(bytes, content_type)
    }
}

fn open_stream() -> Result<(Stream, Arc<Mixer>), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::Device("no output device available".to_string()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::Device(format!("no usable output config: {e}")))?;

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let mixer = Arc::new(Mixer::new(config.sample_rate.0));

    tracing::info!(
        device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        rate = config.sample_rate.0,
        channels = config.channels,
        format = ?sample_format,
        "audio output ready"
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, Arc::clone(&mixer)),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, Arc::clone(&mixer)),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, Arc::clone(&mixer)),
        other => Err(AudioError::Device(format!("unsupported sample format {other:?}"))),
    }?;
    stream
        .play()
        .map_err(|e| AudioError::Device(format!("failed to start stream: {e}")))?;

    Ok((stream, mixer))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mixer: Arc<Mixer>,
) -> Result<Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.render(&mut scratch, channels);
                for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(*sample);
                }
            },
            |err| tracing::error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| AudioError::Device(format!("failed to build stream: {e}")))
}
