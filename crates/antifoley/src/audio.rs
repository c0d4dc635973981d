//! Audio ingestion.
//!
//! - container/codec decode from an in-memory upload (symphonia)
//! - downmix to mono f32
//! - band-limited resampling to the model rate (rubato)
//! - upload file-name validation

use std::io::Cursor;
use std::path::Path;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::constants::SUPPORTED_EXTENSIONS;
use crate::error::{DetectorError, Result};

/// Mono samples at a known rate. Owned by exactly one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate_hz: u32,
}

impl Waveform {
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate_hz: u32) -> Self {
        Self {
            samples,
            sample_rate_hz,
        }
    }

    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate_hz == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate_hz)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Validate an upload's file name and return its lowercase extension (with the dot).
pub fn check_upload_name(file_name: &str) -> Result<String> {
    if file_name.is_empty() {
        return Err(DetectorError::InvalidInput("No file selected".into()));
    }

    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();

    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(DetectorError::InvalidInput(format!(
            "Unsupported file format. Supported: {}",
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }
    Ok(ext)
}

/// Decode an in-memory audio file to a mono waveform at its native rate.
///
/// `extension` (without or with the leading dot) is only a probe hint; the
/// container is still sniffed from the bytes.
pub fn decode_audio_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<Waveform> {
    if bytes.is_empty() {
        return Err(DetectorError::InvalidInput("Uploaded file is empty".into()));
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext.trim_start_matches('.'));
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DetectorError::Decode(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| DetectorError::Decode("no audio track found".into()))?;
    let track_id = track.id;
    let mut sample_rate_hz = track.codec_params.sample_rate.unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DetectorError::Decode(e.to_string()))?;

    let mut samples = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DetectorError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!("skipping corrupt packet: {e}");
                continue;
            }
            Err(e) => return Err(DetectorError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        sample_rate_hz = spec.rate;
        let channels = spec.channels.count().max(1);

        if sample_buf
            .as_ref()
            .map_or(true, |b| b.capacity() < decoded.capacity())
        {
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);
        samples.extend(downmix_to_mono(buf.samples(), channels));
    }

    if sample_rate_hz == 0 {
        return Err(DetectorError::Decode("unknown sample rate".into()));
    }

    tracing::debug!(
        sample_rate_hz,
        samples = samples.len(),
        "decoded upload to mono"
    );
    Ok(Waveform::new(samples, sample_rate_hz))
}

/// Average interleaved channels into one.
#[must_use]
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let scale = 1.0 / channels as f32;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

const RESAMPLE_CHUNK: usize = 1024;

/// Band-limited resampling of mono `input` from `src_hz` to `dst_hz`.
///
/// Same rates return the input unchanged. Otherwise the output holds
/// `ceil(len * dst_hz / src_hz)` samples, time-aligned with the input.
/// `SincFixedIn` already centers its kernel, so no delay is trimmed.
pub fn resample_mono(input: &[f32], src_hz: u32, dst_hz: u32) -> Result<Vec<f32>> {
    if src_hz == dst_hz || input.is_empty() {
        return Ok(input.to_vec());
    }
    if src_hz == 0 || dst_hz == 0 {
        return Err(DetectorError::InvalidInput(
            "sample rate must be > 0".into(),
        ));
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = f64::from(dst_hz) / f64::from(src_hz);
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| DetectorError::Prediction(format!("resampler setup: {e}")))?;

    let expected = (input.len() as u64 * u64::from(dst_hz)).div_ceil(u64::from(src_hz)) as usize;
    let mut out = Vec::with_capacity(expected + RESAMPLE_CHUNK);

    let mut pos = 0usize;
    while pos + resampler.input_frames_next() <= input.len() {
        let end = pos + resampler.input_frames_next();
        let chunk = resampler
            .process(&[&input[pos..end]], None)
            .map_err(|e| DetectorError::Prediction(format!("resample: {e}")))?;
        out.extend_from_slice(&chunk[0]);
        pos = end;
    }
    if pos < input.len() {
        let tail: [&[f32]; 1] = [&input[pos..]];
        let chunk = resampler
            .process_partial(Some(&tail[..]), None)
            .map_err(|e| DetectorError::Prediction(format!("resample: {e}")))?;
        out.extend_from_slice(&chunk[0]);
    }
    // Flush the filter tail.
    while out.len() < expected {
        let chunk = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| DetectorError::Prediction(format!("resample: {e}")))?;
        if chunk[0].is_empty() {
            break;
        }
        out.extend_from_slice(&chunk[0]);
    }

    out.resize(expected, 0.0);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sr: u32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin())
            .collect()
    }

    #[test]
    fn resample_identity_at_same_rate() {
        let x = vec![0.0, 1.0, -2.0, 3.5];
        let y = resample_mono(&x, 16_000, 16_000).expect("resample");
        assert_eq!(x, y);
    }

    #[test]
    fn resample_length_is_ceil_of_ratio() {
        let x = sine(440.0, 44_100, 4_410);
        let y = resample_mono(&x, 44_100, 16_000).expect("resample");
        assert_eq!(y.len(), 1_600);

        let x = sine(440.0, 8_000, 801);
        let y = resample_mono(&x, 8_000, 16_000).expect("resample");
        assert_eq!(y.len(), 1_602);
    }

    #[test]
    fn resample_keeps_low_tone_amplitude_and_alignment() {
        let x = sine(200.0, 48_000, 48_000);
        let y = resample_mono(&x, 48_000, 16_000).expect("resample");
        let reference = sine(200.0, 16_000, 16_000);

        // Skip the edges where the filter sees zero padding.
        let mut max_diff = 0.0f32;
        for (a, b) in y[1_000..15_000].iter().zip(&reference[1_000..15_000]) {
            max_diff = max_diff.max((a - b).abs());
        }
        assert!(max_diff < 0.12, "max diff {max_diff}");
    }

    #[test]
    fn resample_keeps_pulse_position() {
        // 1 ms wide pulse at t = 0.5 s must stay at sample 8000 of the 16 kHz output.
        for src in [48_000u32, 44_100, 22_050, 8_000] {
            let sigma = 0.0005 * f64::from(src);
            let center = 0.5 * f64::from(src);
            let x: Vec<f32> = (0..src as usize)
                .map(|i| {
                    let d = (i as f64 - center) / sigma;
                    (-0.5 * d * d).exp() as f32
                })
                .collect();
            let y = resample_mono(&x, src, 16_000).expect("resample");
            let peak = y
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .expect("peak");
            assert!(peak.abs_diff(8_000) <= 2, "src {src}: peak at {peak}");
        }
    }

    #[test]
    fn downmix_averages_frames() {
        let stereo = [1.0, 0.0, 0.5, 0.5, 0.0, 1.0];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono.len(), 3);
        for v in mono {
            assert!((v - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn upload_name_validation() {
        assert_eq!(check_upload_name("clip.WAV").expect("wav"), ".wav");
        assert_eq!(check_upload_name("a.b.m4a").expect("m4a"), ".m4a");

        let err = check_upload_name("notes.txt").expect_err("txt");
        assert!(matches!(err, DetectorError::InvalidInput(_)));
        assert!(err.to_string().starts_with("Unsupported file format"));

        assert!(check_upload_name("").is_err());
        assert!(check_upload_name("noext").is_err());
        assert!(check_upload_name(".wav").is_err());
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode_audio_bytes(b"definitely not audio".to_vec(), Some("wav"))
            .expect_err("garbage");
        assert!(matches!(err, DetectorError::Decode(_)));

        let err = decode_audio_bytes(Vec::new(), Some("wav")).expect_err("empty");
        assert!(matches!(err, DetectorError::InvalidInput(_)));
    }

    #[test]
    fn decode_stereo_wav_downmixes() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = hound::WavWriter::new(&mut cursor, spec).expect("writer");
            for _ in 0..2_205 {
                w.write_sample(i16::MAX / 2).expect("l");
                w.write_sample(0i16).expect("r");
            }
            w.finalize().expect("finalize");
        }

        let wav = decode_audio_bytes(cursor.into_inner(), Some(".wav")).expect("decode");
        assert_eq!(wav.sample_rate_hz, 22_050);
        assert_eq!(wav.samples.len(), 2_205);
        assert!((wav.samples[100] - 0.25).abs() < 1e-3);
        assert!((wav.duration_secs() - 0.1).abs() < 1e-9);
    }
}
