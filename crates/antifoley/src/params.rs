//! Classifier hyperparameters (`params.json`).
//!
//! Every field defaults to the shipped architecture, so an empty JSON object
//! (or no file at all) describes the standard model.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{FIXED_TIME_FRAMES, MEL_BINS, N_CLASSES};

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parse params.json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid params: {0}")]
    Invalid(String),
}

/// Position of the activation inside each convolutional block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockOrder {
    /// conv → batch norm → ReLU → max pool.
    #[default]
    NormThenRelu,
    /// conv → ReLU → batch norm → max pool, for checkpoints trained that way.
    ReluThenNorm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierParams {
    pub n_mels: usize,
    pub n_frames: usize,
    pub conv_channels: Vec<usize>,
    pub kernel_size: usize,
    pub bn_eps: f32,
    pub block_order: BlockOrder,
    pub pool_grid: usize,
    pub d_model: usize,
    pub n_heads: usize,
    pub n_layers: usize,
    pub ffn_dim: usize,
    pub ln_eps: f32,
    pub hidden_dim: usize,
    pub n_classes: usize,
    /// Only used while training; kept so exported params describe the full model.
    pub dropout: f32,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            n_mels: MEL_BINS,
            n_frames: FIXED_TIME_FRAMES,
            conv_channels: vec![32, 64, 128],
            kernel_size: 3,
            bn_eps: 1e-5,
            block_order: BlockOrder::NormThenRelu,
            pool_grid: 16,
            d_model: 256,
            n_heads: 8,
            n_layers: 2,
            ffn_dim: 2048,
            ln_eps: 1e-5,
            hidden_dim: 128,
            n_classes: N_CLASSES,
            dropout: 0.5,
        }
    }
}

fn ensure(cond: bool, msg: &str) -> Result<(), ParamsError> {
    if cond {
        Ok(())
    } else {
        Err(ParamsError::Invalid(msg.to_string()))
    }
}

impl ClassifierParams {
    pub fn from_json_str(json: &str) -> Result<Self, ParamsError> {
        let params: Self = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ParamsError> {
        let path_ref = path.as_ref();
        let json = std::fs::read_to_string(path_ref).map_err(|source| ParamsError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Channels entering the feature-map sequence (last conv block).
    #[must_use]
    pub fn feature_channels(&self) -> usize {
        self.conv_channels.last().copied().unwrap_or(1)
    }

    #[must_use]
    pub fn head_dim(&self) -> usize {
        self.d_model / self.n_heads.max(1)
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        ensure(self.n_mels > 0 && self.n_frames > 0, "input shape must be non-empty")?;
        ensure(!self.conv_channels.is_empty(), "need at least one conv block")?;
        ensure(
            self.conv_channels.iter().all(|&c| c > 0),
            "conv channels must be > 0",
        )?;
        ensure(self.kernel_size % 2 == 1, "kernel_size must be odd")?;
        ensure(self.pool_grid > 0, "pool_grid must be > 0")?;

        let shrink = 1usize << self.conv_channels.len();
        ensure(
            self.n_mels / shrink > 0 && self.n_frames / shrink > 0,
            "input too small for the pooling stack",
        )?;

        ensure(self.n_heads > 0, "n_heads must be > 0")?;
        ensure(
            self.d_model > 0 && self.d_model % self.n_heads == 0,
            "d_model must be a positive multiple of n_heads",
        )?;
        ensure(self.n_layers > 0, "n_layers must be > 0")?;
        ensure(self.ffn_dim > 0, "ffn_dim must be > 0")?;
        ensure(self.hidden_dim > 0, "hidden_dim must be > 0")?;
        ensure(self.n_classes == N_CLASSES, "classifier head must have 2 classes")?;
        ensure(
            (0.0..1.0).contains(&self.dropout),
            "dropout must be in [0, 1)",
        )?;
        Ok(())
    }
}
