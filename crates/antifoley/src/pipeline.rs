//! End-to-end detector: upload bytes → waveform → log-mel → verdict → report.

use std::path::PathBuf;
use std::time::Instant;

use crate::audio::{Waveform, check_upload_name, decode_audio_bytes};
use crate::classify::{ClassDistribution, Classifier};
use crate::constants::MEL_BINS;
use crate::error::{ModelLoadError, Result};
use crate::features::{FeatureExtractor, FramingPolicy};
use crate::model::{AntiFoleyNet, UNTRAINED_SEED, WeightsProvenance};
use crate::params::{ClassifierParams, ParamsError};
use crate::report::AnalysisReport;

/// Where to find the model assets. Both files are optional.
#[derive(Debug, Clone, Default)]
pub struct DetectorConfig {
    pub weights_path: Option<PathBuf>,
    pub params_path: Option<PathBuf>,
    pub framing: FramingPolicy,
}

fn load_params(cfg: &DetectorConfig) -> std::result::Result<ClassifierParams, ParamsError> {
    let params = match &cfg.params_path {
        Some(path) => ClassifierParams::from_path(path)?,
        None => ClassifierParams::default(),
    };
    if params.n_mels != MEL_BINS {
        return Err(ParamsError::Invalid(format!(
            "n_mels must be {MEL_BINS} to match the frontend, got {}",
            params.n_mels
        )));
    }
    Ok(params)
}

/// Feature extractor plus classifier. Read-only after construction, so one
/// instance is shared by all requests.
#[derive(Debug)]
pub struct Detector {
    extractor: FeatureExtractor,
    classifier: Classifier,
}

impl Detector {
    #[must_use]
    pub fn new(extractor: FeatureExtractor, classifier: Classifier) -> Self {
        Self {
            extractor,
            classifier,
        }
    }

    /// Bring up the detector. Bad or missing assets degrade to the seeded
    /// untrained network instead of failing.
    pub fn load(cfg: &DetectorConfig) -> std::result::Result<Self, ModelLoadError> {
        let (net, provenance) = match load_params(cfg) {
            Ok(params) => AntiFoleyNet::load_or_untrained(cfg.weights_path.as_deref(), params)?,
            Err(e) => {
                tracing::warn!(error = %e, "invalid classifier params; using untrained defaults");
                let net = AntiFoleyNet::untrained(ClassifierParams::default(), UNTRAINED_SEED)?;
                let reason = ModelLoadError::from(e).to_string();
                (net, WeightsProvenance::Untrained { reason })
            }
        };

        let framing = FramingPolicy {
            target_frames: net.params().n_frames,
            ..cfg.framing
        };
        tracing::info!(weights = %provenance, frames = framing.target_frames, "detector ready");
        Ok(Self::new(
            FeatureExtractor::new(framing),
            Classifier::new(net, provenance),
        ))
    }

    #[must_use]
    pub fn provenance(&self) -> &WeightsProvenance {
        self.classifier.provenance()
    }

    #[must_use]
    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn analyze(&self, waveform: &Waveform) -> Result<ClassDistribution> {
        let features = self.extractor.extract_waveform(waveform)?;
        self.classifier.classify(&features)
    }

    pub fn analyze_waveform(&self, waveform: &Waveform, file_name: &str) -> Result<AnalysisReport> {
        let started = Instant::now();
        let dist = self.analyze(waveform)?;
        let report = AnalysisReport::new(
            &dist,
            file_name,
            waveform.duration_secs(),
            waveform.sample_rate_hz,
        );
        tracing::info!(
            file = file_name,
            is_fake = report.is_fake,
            confidence = report.confidence,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis complete"
        );
        Ok(report)
    }

    /// Validate the name, decode the bytes and analyze. The extension check
    /// runs before any decoding.
    pub fn analyze_upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<AnalysisReport> {
        let ext = check_upload_name(file_name)?;
        let waveform = decode_audio_bytes(bytes, Some(&ext))?;
        tracing::debug!(
            file = file_name,
            samples = waveform.samples.len(),
            sample_rate = waveform.sample_rate_hz,
            "decoded upload"
        );
        self.analyze_waveform(&waveform, file_name)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{Detector, DetectorConfig};
    use crate::audio::Waveform;
    use crate::error::DetectorError;

    fn tmp_file(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        p.push(format!("antifoley-pipeline-test-{nanos}-{name}"));
        p
    }

    #[test]
    fn missing_assets_degrade_to_untrained() {
        let detector = Detector::load(&DetectorConfig::default()).expect("detector");
        assert_eq!(detector.provenance().as_str(), "untrained");
        assert_eq!(detector.extractor().framing().target_frames, 128);
    }

    #[test]
    fn bad_params_file_degrades_to_untrained() {
        let path = tmp_file("params.json");
        std::fs::write(&path, r#"{ "n_mels": 64 }"#).expect("write");
        let detector = Detector::load(&DetectorConfig {
            params_path: Some(path.clone()),
            ..DetectorConfig::default()
        })
        .expect("detector");
        assert!(!detector.provenance().is_pretrained());
        std::fs::remove_file(path).expect("cleanup");
    }

    #[test]
    fn rejects_unsupported_upload_before_decoding() {
        let detector = Detector::load(&DetectorConfig::default()).expect("detector");
        let err = detector
            .analyze_upload("notes.txt", b"RIFF".to_vec())
            .expect_err("txt");
        assert!(matches!(err, DetectorError::InvalidInput(ref m) if m.starts_with("Unsupported file format")));

        let err = detector
            .analyze_upload("clip.wav", b"not audio at all".to_vec())
            .expect_err("garbage");
        assert!(matches!(err, DetectorError::Decode(_)));
    }

    #[test]
    fn short_waveform_is_analyzed() {
        let detector = Detector::load(&DetectorConfig::default()).expect("detector");
        let samples: Vec<f32> = (0..300).map(|i| (i as f32 * 0.05).sin() * 0.3).collect();
        let report = detector
            .analyze_waveform(&Waveform::new(samples, 16_000), "tiny.wav")
            .expect("report");
        let total = report.probabilities.fake + report.probabilities.real;
        assert!((total - 100.0).abs() < 0.02);
        assert_eq!(report.duration, 0.02);
        assert_eq!(report.features.len(), 4);
    }
}
