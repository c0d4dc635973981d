//! Waveform → fixed-shape log-mel matrix.

use crate::audio::{Waveform, resample_mono};
use crate::constants::{FIXED_TIME_FRAMES, MEL_BINS, PAD_VALUE, SAMPLE_RATE_HZ};
use crate::error::{DetectorError, Result};
use crate::mel::{MelSpectrogram, power_to_db_inplace};

/// How to pick frames when the spectrogram is longer than the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Truncate {
    /// Keep the first `target_frames` frames; later audio is ignored.
    #[default]
    KeepFirst,
    /// Keep a window centered on the middle of the recording.
    Center,
}

/// Fixed-length framing applied after the log-power transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramingPolicy {
    pub target_frames: usize,
    /// Written into frames past the end of the audio. It marks "no
    /// information", not silence.
    pub pad_value: f32,
    pub truncate: Truncate,
}

impl Default for FramingPolicy {
    fn default() -> Self {
        Self {
            target_frames: FIXED_TIME_FRAMES,
            pad_value: PAD_VALUE,
            truncate: Truncate::KeepFirst,
        }
    }
}

impl FramingPolicy {
    /// Index of the first source frame kept.
    #[must_use]
    pub fn offset(&self, n_frames: usize) -> usize {
        match self.truncate {
            Truncate::KeepFirst => 0,
            Truncate::Center => n_frames.saturating_sub(self.target_frames) / 2,
        }
    }

    /// Frame a row-major `[n_rows, n_frames]` matrix to `[n_rows, target_frames]`.
    ///
    /// Returns the framed data and how many of its frames carry signal.
    #[must_use]
    pub fn apply(&self, data: &[f32], n_rows: usize, n_frames: usize) -> (Vec<f32>, usize) {
        debug_assert_eq!(data.len(), n_rows * n_frames);
        let target = self.target_frames;
        let offset = self.offset(n_frames);
        let kept = n_frames.saturating_sub(offset).min(target);

        let mut out = vec![self.pad_value; n_rows * target];
        for r in 0..n_rows {
            let src = &data[r * n_frames + offset..r * n_frames + offset + kept];
            out[r * target..r * target + kept].copy_from_slice(src);
        }
        (out, kept)
    }
}

/// Log-mel features, row-major `[n_mels, n_frames]`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogMelMatrix {
    data: Vec<f32>,
    n_mels: usize,
    n_frames: usize,
    signal_frames: usize,
}

impl LogMelMatrix {
    pub fn from_vec(data: Vec<f32>, n_mels: usize, n_frames: usize) -> Result<Self> {
        if data.len() != n_mels * n_frames {
            return Err(DetectorError::Prediction(format!(
                "log-mel buffer has {} values, expected {n_mels}x{n_frames}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            n_mels,
            n_frames,
            signal_frames: n_frames,
        })
    }

    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.n_mels, self.n_frames)
    }

    /// Frames that came from audio (the rest is padding).
    #[must_use]
    pub fn signal_frames(&self) -> usize {
        self.signal_frames
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[must_use]
    pub fn get(&self, mel: usize, frame: usize) -> f32 {
        self.data[mel * self.n_frames + frame]
    }
}

/// Deterministic frontend matching the training-time preprocessing.
#[derive(Debug)]
pub struct FeatureExtractor {
    mel: MelSpectrogram,
    framing: FramingPolicy,
    target_rate_hz: u32,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(FramingPolicy::default())
    }
}

impl FeatureExtractor {
    #[must_use]
    pub fn new(framing: FramingPolicy) -> Self {
        Self {
            mel: MelSpectrogram::default(),
            framing,
            target_rate_hz: SAMPLE_RATE_HZ,
        }
    }

    #[must_use]
    pub fn framing(&self) -> FramingPolicy {
        self.framing
    }

    /// Resample, mel spectrogram, dB relative to max, fixed framing.
    pub fn extract(&self, samples: &[f32], source_rate_hz: u32) -> Result<LogMelMatrix> {
        if samples.is_empty() {
            return Err(DetectorError::InvalidInput(
                "Audio contains no samples".into(),
            ));
        }
        if source_rate_hz == 0 {
            return Err(DetectorError::InvalidInput("Sample rate must be > 0".into()));
        }

        let resampled = resample_mono(samples, source_rate_hz, self.target_rate_hz)?;

        let (mut spec, n_frames) = self.mel.power(&resampled);
        power_to_db_inplace(&mut spec);

        let n_mels = self.mel.n_mels();
        let (data, signal_frames) = self.framing.apply(&spec, n_mels, n_frames);
        tracing::trace!(n_frames, signal_frames, "framed log-mel");

        Ok(LogMelMatrix {
            data,
            n_mels,
            n_frames: self.framing.target_frames,
            signal_frames,
        })
    }

    pub fn extract_waveform(&self, waveform: &Waveform) -> Result<LogMelMatrix> {
        self.extract(&waveform.samples, waveform.sample_rate_hz)
    }
}

/// Expected feature shape for the classifier input.
pub const LOGMEL_SHAPE: (usize, usize) = (MEL_BINS, FIXED_TIME_FRAMES);
