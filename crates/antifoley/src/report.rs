//! JSON analysis report returned to clients.
//!
//! The evidence strings are presentation only: they are picked from
//! `is_fake` after the decision and never influence it.

use serde::{Deserialize, Serialize};

use crate::classify::ClassDistribution;

const FAKE_EVIDENCE: [&str; 4] = [
    "Anomalous frequency patterns detected",
    "Inconsistent spectral distribution",
    "Artificial noise characteristics identified",
    "Unnatural temporal patterns found",
];

const REAL_EVIDENCE: [&str; 4] = [
    "Natural frequency distribution confirmed",
    "Consistent environmental acoustics",
    "Authentic noise characteristics",
    "Valid temporal patterns detected",
];

#[must_use]
pub fn evidence_for(is_fake: bool) -> &'static [&'static str] {
    if is_fake {
        &FAKE_EVIDENCE
    } else {
        &REAL_EVIDENCE
    }
}

/// Round half away from zero to 2 decimals.
#[must_use]
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn percent(p: f32) -> f64 {
    round2(f64::from(p) * 100.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probabilities {
    pub fake: f64,
    pub real: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub is_fake: bool,
    /// Percentage, 2 decimals.
    pub confidence: f64,
    pub probabilities: Probabilities,
    pub features: Vec<String>,
    pub file_name: String,
    /// Seconds, 2 decimals.
    pub duration: f64,
    /// Sample rate of the uploaded file, before resampling.
    pub sample_rate: u32,
}

impl AnalysisReport {
    #[must_use]
    pub fn new(
        dist: &ClassDistribution,
        file_name: impl Into<String>,
        duration_secs: f64,
        sample_rate: u32,
    ) -> Self {
        let is_fake = dist.is_fake();
        Self {
            is_fake,
            confidence: percent(dist.confidence),
            probabilities: Probabilities {
                fake: percent(dist.fake),
                real: percent(dist.real),
            },
            features: evidence_for(is_fake)
                .iter()
                .map(ToString::to_string)
                .collect(),
            file_name: file_name.into(),
            duration: round2(duration_secs),
            sample_rate,
        }
    }
}
