//! Mel power spectrogram (librosa-compatible).
//!
//! - centered STFT with constant (zero) padding of `n_fft/2` on both sides
//! - periodic Hann window
//! - power spectrum `|X|^2`
//! - Slaney mel scale with Slaney area normalization
//! - `power_to_db` referenced to the spectrogram maximum

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::constants::{AMIN, HOP_LENGTH, MEL_BINS, N_FFT, SAMPLE_RATE_HZ, TOP_DB};

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP; // 15.0

#[inline]
fn logstep() -> f64 {
    6.4f64.ln() / 27.0
}

/// Slaney mel scale: linear below 1 kHz, logarithmic above.
#[inline]
pub fn hz_to_mel(freq: f64) -> f64 {
    if freq >= MIN_LOG_HZ {
        MIN_LOG_MEL + (freq / MIN_LOG_HZ).ln() / logstep()
    } else {
        freq / F_SP
    }
}

#[inline]
pub fn mel_to_hz(mels: f64) -> f64 {
    if mels >= MIN_LOG_MEL {
        MIN_LOG_HZ * (logstep() * (mels - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mels
    }
}

/// Triangular mel filters `[n_mels, n_fft/2 + 1]`, spanning `0..sr/2`.
pub fn build_mel_filters(sample_rate_hz: u32, n_fft: usize, n_mels: usize) -> Vec<f32> {
    let n_freq = n_fft / 2 + 1;
    let sr = f64::from(sample_rate_hz);

    let fft_freqs: Vec<f64> = (0..n_freq)
        .map(|k| (k as f64) * sr / (n_fft as f64))
        .collect();

    let mel_min = hz_to_mel(0.0);
    let mel_max = hz_to_mel(sr / 2.0);
    let mel_f: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * (i as f64) / ((n_mels + 1) as f64)))
        .collect();

    let mut filters = vec![0.0f32; n_mels * n_freq];
    for m in 0..n_mels {
        let lower_width = mel_f[m + 1] - mel_f[m];
        let upper_width = mel_f[m + 2] - mel_f[m + 1];
        let enorm = 2.0 / (mel_f[m + 2] - mel_f[m]);
        let row = &mut filters[m * n_freq..(m + 1) * n_freq];
        for (f, out) in row.iter_mut().enumerate() {
            let lower = (fft_freqs[f] - mel_f[m]) / lower_width;
            let upper = (mel_f[m + 2] - fft_freqs[f]) / upper_width;
            *out = (lower.min(upper).max(0.0) * enorm) as f32;
        }
    }
    filters
}

/// Periodic Hann: `0.5 * (1 - cos(2*pi*i/N))`.
pub fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let angle = 2.0 * std::f64::consts::PI * (i as f64) / (n as f64);
            (0.5 * (1.0 - angle.cos())) as f32
        })
        .collect()
}

/// Number of STFT frames produced for `n_samples` with centered framing.
#[inline]
#[must_use]
pub fn n_frames_centered(n_samples: usize, hop: usize) -> usize {
    1 + n_samples / hop
}

/// Shared, read-only STFT + mel projection tables.
pub struct MelSpectrogram {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    filters: Vec<f32>, // [n_mels * n_freq]
    n_fft: usize,
    hop: usize,
    n_mels: usize,
}

impl std::fmt::Debug for MelSpectrogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MelSpectrogram")
            .field("n_fft", &self.n_fft)
            .field("hop", &self.hop)
            .field("n_mels", &self.n_mels)
            .finish_non_exhaustive()
    }
}

impl Default for MelSpectrogram {
    fn default() -> Self {
        Self::new(SAMPLE_RATE_HZ, N_FFT, HOP_LENGTH, MEL_BINS)
    }
}

impl MelSpectrogram {
    #[must_use]
    pub fn new(sample_rate_hz: u32, n_fft: usize, hop: usize, n_mels: usize) -> Self {
        let fft = FftPlanner::new().plan_fft_forward(n_fft);
        Self {
            fft,
            window: hann_window(n_fft),
            filters: build_mel_filters(sample_rate_hz, n_fft, n_mels),
            n_fft,
            hop,
            n_mels,
        }
    }

    #[must_use]
    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    /// Mel power spectrogram as row-major `[n_mels, n_frames]`, plus `n_frames`.
    ///
    /// Scratch buffers are allocated per call so concurrent callers never share state.
    #[must_use]
    pub fn power(&self, samples: &[f32]) -> (Vec<f32>, usize) {
        let n_fft = self.n_fft;
        let n_freq = n_fft / 2 + 1;
        let pad = n_fft / 2;
        let n_frames = n_frames_centered(samples.len(), self.hop);

        let mut padded = vec![0.0f32; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);

        let mut buf = vec![Complex::new(0.0f32, 0.0); n_fft];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); self.fft.get_inplace_scratch_len()];
        let mut power = vec![0.0f32; n_freq];
        let mut mel = vec![0.0f32; self.n_mels * n_frames];

        for t in 0..n_frames {
            let start = t * self.hop;
            let frame = &padded[start..start + n_fft];
            for ((b, &x), &w) in buf.iter_mut().zip(frame).zip(&self.window) {
                *b = Complex::new(x * w, 0.0);
            }
            self.fft.process_with_scratch(&mut buf, &mut scratch);

            for (p, c) in power.iter_mut().zip(&buf[..n_freq]) {
                *p = c.re * c.re + c.im * c.im;
            }

            for m in 0..self.n_mels {
                let filt = &self.filters[m * n_freq..(m + 1) * n_freq];
                let mut sum = 0.0f32;
                for k in 0..n_freq {
                    sum += filt[k] * power[k];
                }
                mel[m * n_frames + t] = sum;
            }
        }

        (mel, n_frames)
    }
}

/// Convert power to dB in place, referenced to the maximum of `spec`.
///
/// `10*log10(max(amin, S)) - 10*log10(max(amin, max(S)))`, floored at
/// `-TOP_DB`. The loudest bin becomes 0 dB.
pub fn power_to_db_inplace(spec: &mut [f32]) {
    if spec.is_empty() {
        return;
    }
    let max_power = spec.iter().copied().fold(0.0f32, f32::max);
    let ref_db = 10.0 * max_power.max(AMIN).log10();

    let mut max_db = f32::NEG_INFINITY;
    for v in spec.iter_mut() {
        *v = 10.0 * v.max(AMIN).log10() - ref_db;
        max_db = max_db.max(*v);
    }

    let floor = max_db - TOP_DB;
    for v in spec.iter_mut() {
        if *v < floor {
            *v = floor;
        }
    }
}
