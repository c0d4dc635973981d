//! Logits to decision: softmax, argmax and the class-index convention.

use serde::Serialize;

use crate::error::{DetectorError, Result};
use crate::features::LogMelMatrix;
use crate::math::{argmax, softmax_inplace};
use crate::model::{AntiFoleyNet, WeightsProvenance};

/// Output class of the detector.
///
/// The index mapping is fixed by how the checkpoint was trained: logit 0 is
/// the synthetic (foley) class and logit 1 is the recorded class. Nothing in
/// the weights file states this, so it cannot be checked at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Fake = 0,
    Real = 1,
}

impl Label {
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Fake),
            1 => Some(Self::Real),
            _ => None,
        }
    }

    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassDistribution {
    pub fake: f32,
    pub real: f32,
    pub predicted: Label,
    /// Probability of `predicted`, in `[0.5, 1]`.
    pub confidence: f32,
}

impl ClassDistribution {
    /// Softmax over `[fake, real]` logits. Equal probabilities resolve to `Fake`.
    pub fn from_logits(logits: [f32; 2]) -> Result<Self> {
        let mut probs = logits;
        softmax_inplace(&mut probs);
        if probs.iter().any(|p| !p.is_finite()) {
            return Err(DetectorError::Prediction(format!(
                "softmax of {logits:?} is not finite"
            )));
        }
        let predicted = argmax(&probs)
            .and_then(Label::from_index)
            .ok_or_else(|| DetectorError::Prediction("empty class distribution".into()))?;
        Ok(Self {
            fake: probs[0],
            real: probs[1],
            predicted,
            confidence: probs[predicted.index()],
        })
    }

    #[must_use]
    pub fn is_fake(&self) -> bool {
        self.predicted == Label::Fake
    }

    #[must_use]
    pub fn probability(&self, label: Label) -> f32 {
        match label {
            Label::Fake => self.fake,
            Label::Real => self.real,
        }
    }
}

/// Read-only classifier shared by every request.
#[derive(Debug)]
pub struct Classifier {
    net: AntiFoleyNet,
    provenance: WeightsProvenance,
}

impl Classifier {
    #[must_use]
    pub fn new(net: AntiFoleyNet, provenance: WeightsProvenance) -> Self {
        Self { net, provenance }
    }

    #[must_use]
    pub fn provenance(&self) -> &WeightsProvenance {
        &self.provenance
    }

    #[must_use]
    pub fn net(&self) -> &AntiFoleyNet {
        &self.net
    }

    pub fn classify(&self, features: &LogMelMatrix) -> Result<ClassDistribution> {
        let logits = self.net.forward(features)?;
        tracing::debug!(fake = logits[0], real = logits[1], "classifier logits");
        ClassDistribution::from_logits(logits)
    }
}

#[cfg(test)]
mod tests {
    use super::{ClassDistribution, Classifier, Label};
    use crate::features::LogMelMatrix;
    use crate::model::{AntiFoleyNet, WeightsProvenance};
    use crate::params::ClassifierParams;

    #[test]
    fn label_indices_follow_logit_order() {
        assert_eq!(Label::Fake.index(), 0);
        assert_eq!(Label::Real.index(), 1);
        assert_eq!(Label::from_index(1), Some(Label::Real));
        assert_eq!(Label::from_index(2), None);
    }

    #[test]
    fn ln3_bias_gives_quarter_and_three_quarters() {
        let d = ClassDistribution::from_logits([0.0, 3.0f32.ln()]).expect("dist");
        assert!((d.fake - 0.25).abs() < 1e-6);
        assert!((d.real - 0.75).abs() < 1e-6);
        assert_eq!(d.predicted, Label::Real);
        assert!(!d.is_fake());
        assert_eq!(d.confidence, d.real);
    }

    #[test]
    fn ties_resolve_to_fake() {
        let d = ClassDistribution::from_logits([1.5, 1.5]).expect("dist");
        assert_eq!(d.fake, 0.5);
        assert_eq!(d.predicted, Label::Fake);
        assert!(d.is_fake());
    }

    #[test]
    fn extreme_logits_stay_finite() {
        let d = ClassDistribution::from_logits([500.0, -500.0]).expect("dist");
        assert!((d.fake + d.real - 1.0).abs() < 1e-4);
        assert_eq!(d.predicted, Label::Fake);
        assert!(ClassDistribution::from_logits([f32::NAN, 0.0]).is_err());
    }

    #[test]
    fn classify_is_deterministic() {
        let p = ClassifierParams {
            n_mels: 16,
            n_frames: 16,
            conv_channels: vec![2, 2],
            pool_grid: 4,
            d_model: 8,
            n_heads: 2,
            n_layers: 1,
            ffn_dim: 8,
            hidden_dim: 4,
            ..ClassifierParams::default()
        };
        let net = AntiFoleyNet::untrained(p, 11).expect("net");
        let classifier = Classifier::new(
            net,
            WeightsProvenance::Untrained {
                reason: "test".into(),
            },
        );
        let data = (0..256).map(|i| -((i * 37 % 80) as f32)).collect();
        let x = LogMelMatrix::from_vec(data, 16, 16).expect("matrix");
        let a = classifier.classify(&x).expect("a");
        let b = classifier.classify(&x).expect("b");
        assert_eq!(a, b);
        assert!((a.fake + a.real - 1.0).abs() < 1e-4);
        assert_eq!(a.is_fake(), a.fake >= a.real);
    }
}
