//! Clip decoding and duration probing on top of symphonia.
//!
//! Everything here is blocking; async callers go through `spawn_blocking`.

pub mod output;

use std::io::Cursor;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::AudioError;

/// Format hints for the prober; either part may be missing.
#[derive(Debug, Clone, Default)]
pub struct FormatHint {
    pub extension: Option<String>,
    pub mime_type: Option<String>,
}

impl FormatHint {
    pub fn new(extension: Option<&str>, mime_type: Option<&str>) -> Self {
        Self {
            extension: extension.map(str::to_string),
            mime_type: mime_type.map(str::to_string),
        }
    }
}

/// Interleaved f32 PCM.
#[derive(Debug, Clone)]
pub struct DecodedClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl DecodedClip {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    pub fn duration(&self) -> Duration {
        frames_to_duration(self.frames() as u64, self.sample_rate)
    }
}

fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(frames as f64 / f64::from(sample_rate))
}

fn open(bytes: Vec<u8>, hint: &FormatHint) -> Result<(Box<dyn FormatReader>, u32, CodecParameters), AudioError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut probe_hint = Hint::new();
    if let Some(ext) = hint.extension.as_deref() {
        probe_hint.with_extension(ext);
    }
    if let Some(mime) = hint.mime_type.as_deref() {
        probe_hint.mime_type(mime);
    }

    let probed = symphonia::default::get_probe().format(
        &probe_hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(AudioError::NoTrack)?;
    let track_id = track.id;
    let params = track.codec_params.clone();
    Ok((format, track_id, params))
}

/// Length of the clip. Uses the container's frame count when it has one and
/// decodes the whole stream otherwise.
pub fn probe_duration(bytes: Vec<u8>, hint: &FormatHint) -> Result<Duration, AudioError> {
    let (mut format, track_id, params) = open(bytes, hint)?;

    if let (Some(frames), Some(rate)) = (params.n_frames, params.sample_rate) {
        if rate > 0 {
            return Ok(frames_to_duration(frames, rate));
        }
    }

    let mut decoder = symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;
    let mut frames: u64 = 0;
    let mut sample_rate = params.sample_rate.unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                sample_rate = decoded.spec().rate;
                frames += decoded.frames() as u64;
            }
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!("skipping undecodable packet: {e}");
            }
            Err(e) => return Err(e.into()),
        }
    }

    if sample_rate == 0 {
        return Err(AudioError::Decode("sample rate unknown".to_string()));
    }
    Ok(frames_to_duration(frames, sample_rate))
}

/// Decode a whole clip to interleaved f32 samples.
pub fn decode_clip(bytes: Vec<u8>, hint: &FormatHint) -> Result<DecodedClip, AudioError> {
    let (mut format, track_id, params) = open(bytes, hint)?;
    let mut decoder = symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate = params.sample_rate.unwrap_or(0);
    let mut channels = params.channels.map(|c| c.count()).unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!("skipping undecodable packet: {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count();
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buf.samples());
    }

    if sample_rate == 0 || channels == 0 {
        return Err(AudioError::Decode("stream has no audio".to_string()));
    }

    Ok(DecodedClip {
        samples,
        sample_rate,
        channels,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 16-bit mono WAV of `seconds` of a quiet square wave.
    pub(crate) fn wav(seconds: f32, sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            let total = (seconds * sample_rate as f32) as u32;
            for i in 0..total {
                let v: i16 = if (i / 20) % 2 == 0 { 2000 } else { -2000 };
                writer.write_sample(v).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn wav_hint() -> FormatHint {
        FormatHint::new(Some("wav"), Some("audio/wav"))
    }

    #[test]
    fn test_probe_short_wav() {
        let duration = probe_duration(wav(2.0, 8000), &wav_hint()).unwrap();
        assert!((duration.as_secs_f64() - 2.0).abs() < 0.01, "{duration:?}");
    }

    #[test]
    fn test_probe_long_wav() {
        let duration = probe_duration(wav(12.0, 8000), &wav_hint()).unwrap();
        assert!(duration > Duration::from_secs(10));
    }

    #[test]
    fn test_probe_garbage_fails() {
        let err = probe_duration(vec![0u8; 512], &FormatHint::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_decode_clip() {
        let clip = decode_clip(wav(0.5, 8000), &wav_hint()).unwrap();
        assert_eq!(clip.sample_rate, 8000);
        assert_eq!(clip.channels, 1);
        assert_eq!(clip.frames(), 4000);
        assert!((clip.duration().as_secs_f64() - 0.5).abs() < 0.01);
    }
}
