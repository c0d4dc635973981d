//! AntiFoley core library.
//!
//! Tells recorded environmental sound apart from synthetic (foley) sound:
//! - Audio frontend (decode + resample + log-mel with fixed framing)
//! - CNN + self-attention classifier over the log-mel matrix
//! - Softmax decision and the JSON analysis report

pub mod audio;
pub mod classify;
pub mod constants;
pub mod conv;
pub mod encoder;
pub mod error;
pub mod features;
pub mod math;
pub mod mel;
pub mod model;
pub mod ops;
pub mod params;
pub mod pipeline;
pub mod report;
pub mod weights;

pub use audio::Waveform;
pub use classify::{ClassDistribution, Classifier, Label};
pub use error::{DetectorError, ModelLoadError};
pub use features::{FeatureExtractor, FramingPolicy, LogMelMatrix};
pub use model::{AntiFoleyNet, WeightsProvenance};
pub use params::{BlockOrder, ClassifierParams};
pub use pipeline::{Detector, DetectorConfig};
pub use report::AnalysisReport;
