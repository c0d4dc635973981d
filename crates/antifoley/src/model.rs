//! CNN + self-attention classifier: weight layout, loading and forward pass.
//!
//! Tensor names follow the PyTorch state dict of the trained network
//! (`conv1.weight`, `bn1.running_var`, `transformer.layers.0.linear1.weight`,
//! `fc2.bias`, ...). `num_batches_tracked` and any other extra tensors are
//! ignored.

use std::fmt;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::conv::{
    adaptive_avg_pool2d, batch_norm2d_inplace, conv2d_same, max_pool2d, mean_height_to_sequence,
};
use crate::encoder::{EncoderConfig, EncoderLayerWeights, encoder_layer_forward};
use crate::error::{DetectorError, ModelLoadError, Result};
use crate::features::LogMelMatrix;
use crate::math::{mean_rows, relu_inplace};
use crate::ops::linear;
use crate::params::{BlockOrder, ClassifierParams};
use crate::weights::WeightStore;

/// Seed for the fallback initialization, so untrained runs are reproducible.
pub const UNTRAINED_SEED: u64 = 0x5eed_f01e;

const POOL: usize = 2;

/// How a parameter is filled when no checkpoint is available.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    /// Uniform in `±1/sqrt(fan_in)`.
    Uniform { fan_in: usize },
    Zeros,
    Ones,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub init: Init,
}

impl TensorSpec {
    fn new(name: impl Into<String>, shape: Vec<usize>, init: Init) -> Self {
        Self {
            name: name.into(),
            shape,
            init,
        }
    }

    #[must_use]
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Every tensor the network reads, in a fixed order.
#[must_use]
pub fn tensor_specs(params: &ClassifierParams) -> Vec<TensorSpec> {
    let k = params.kernel_size;
    let mut specs = Vec::new();

    let mut c_in = 1usize;
    for (i, &c_out) in params.conv_channels.iter().enumerate() {
        let n = i + 1;
        let fan_in = c_in * k * k;
        specs.push(TensorSpec::new(
            format!("conv{n}.weight"),
            vec![c_out, c_in, k, k],
            Init::Uniform { fan_in },
        ));
        specs.push(TensorSpec::new(
            format!("conv{n}.bias"),
            vec![c_out],
            Init::Uniform { fan_in },
        ));
        specs.push(TensorSpec::new(format!("bn{n}.weight"), vec![c_out], Init::Ones));
        specs.push(TensorSpec::new(format!("bn{n}.bias"), vec![c_out], Init::Zeros));
        specs.push(TensorSpec::new(
            format!("bn{n}.running_mean"),
            vec![c_out],
            Init::Zeros,
        ));
        specs.push(TensorSpec::new(
            format!("bn{n}.running_var"),
            vec![c_out],
            Init::Ones,
        ));
        c_in = c_out;
    }

    let c = params.feature_channels();
    let d = params.d_model;
    specs.push(TensorSpec::new(
        "embed.weight",
        vec![d, c],
        Init::Uniform { fan_in: c },
    ));
    specs.push(TensorSpec::new(
        "embed.bias",
        vec![d],
        Init::Uniform { fan_in: c },
    ));

    let cfg = encoder_config(params);
    for layer in 0..params.n_layers {
        for (suffix, shape) in EncoderLayerWeights::tensor_shapes(cfg) {
            let init = if suffix.starts_with("norm") {
                if suffix.ends_with("weight") {
                    Init::Ones
                } else {
                    Init::Zeros
                }
            } else if suffix.starts_with("linear2") {
                Init::Uniform {
                    fan_in: params.ffn_dim,
                }
            } else {
                Init::Uniform { fan_in: d }
            };
            specs.push(TensorSpec::new(
                format!("transformer.layers.{layer}.{suffix}"),
                shape,
                init,
            ));
        }
    }

    let hd = params.hidden_dim;
    let nc = params.n_classes;
    specs.push(TensorSpec::new(
        "fc1.weight",
        vec![hd, d],
        Init::Uniform { fan_in: d },
    ));
    specs.push(TensorSpec::new(
        "fc1.bias",
        vec![hd],
        Init::Uniform { fan_in: d },
    ));
    specs.push(TensorSpec::new(
        "fc2.weight",
        vec![nc, hd],
        Init::Uniform { fan_in: hd },
    ));
    specs.push(TensorSpec::new(
        "fc2.bias",
        vec![nc],
        Init::Uniform { fan_in: hd },
    ));
    specs
}

fn encoder_config(params: &ClassifierParams) -> EncoderConfig {
    EncoderConfig {
        dim: params.d_model,
        n_heads: params.n_heads,
        ffn_dim: params.ffn_dim,
        norm_eps: params.ln_eps,
    }
}

#[derive(Debug, Clone)]
struct ConvBlockWeights {
    channels_in: usize,
    channels_out: usize,
    weight: Vec<f32>,
    bias: Vec<f32>,
    bn_weight: Vec<f32>,
    bn_bias: Vec<f32>,
    bn_running_mean: Vec<f32>,
    bn_running_var: Vec<f32>,
}

/// Where the active weights came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightsProvenance {
    Pretrained { path: PathBuf },
    Untrained { reason: String },
}

impl WeightsProvenance {
    #[must_use]
    pub fn is_pretrained(&self) -> bool {
        matches!(self, Self::Pretrained { .. })
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pretrained { .. } => "pretrained",
            Self::Untrained { .. } => "untrained",
        }
    }
}

impl fmt::Display for WeightsProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretrained { path } => write!(f, "pretrained ({})", path.display()),
            Self::Untrained { reason } => write!(f, "untrained ({reason})"),
        }
    }
}

pub struct AntiFoleyNet {
    params: ClassifierParams,
    blocks: Vec<ConvBlockWeights>,
    embed_weight: Vec<f32>,
    embed_bias: Vec<f32>,
    layers: Vec<EncoderLayerWeights>,
    fc1_weight: Vec<f32>,
    fc1_bias: Vec<f32>,
    fc2_weight: Vec<f32>,
    fc2_bias: Vec<f32>,
}

impl fmt::Debug for AntiFoleyNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AntiFoleyNet")
            .field("params", &self.params)
            .field("conv_blocks", &self.blocks.len())
            .field("encoder_layers", &self.layers.len())
            .finish_non_exhaustive()
    }
}

impl AntiFoleyNet {
    /// Build from tensors laid out in [`tensor_specs`] order.
    fn assemble(params: ClassifierParams, tensors: Vec<Vec<f32>>) -> Self {
        let mut it = tensors.into_iter();
        let mut next = move || it.next().unwrap_or_default();

        let mut blocks = Vec::with_capacity(params.conv_channels.len());
        let mut c_in = 1usize;
        for &c_out in &params.conv_channels {
            blocks.push(ConvBlockWeights {
                channels_in: c_in,
                channels_out: c_out,
                weight: next(),
                bias: next(),
                bn_weight: next(),
                bn_bias: next(),
                bn_running_mean: next(),
                bn_running_var: next(),
            });
            c_in = c_out;
        }

        let embed_weight = next();
        let embed_bias = next();
        let layers = (0..params.n_layers)
            .map(|_| EncoderLayerWeights::from_ordered((0..12).map(|_| next()).collect()))
            .collect();

        Self {
            blocks,
            embed_weight,
            embed_bias,
            layers,
            fc1_weight: next(),
            fc1_bias: next(),
            fc2_weight: next(),
            fc2_bias: next(),
            params,
        }
    }

    /// Build from a per-tensor generator, e.g. for fixtures.
    pub fn from_fn(
        params: ClassifierParams,
        mut fill: impl FnMut(&TensorSpec) -> Vec<f32>,
    ) -> std::result::Result<Self, ModelLoadError> {
        params.validate()?;
        let mut tensors = Vec::new();
        for spec in tensor_specs(&params) {
            let data = fill(&spec);
            if data.len() != spec.numel() {
                return Err(ModelLoadError::ShapeMismatch {
                    name: spec.name,
                    got: vec![data.len()],
                    expected: spec.shape,
                });
            }
            tensors.push(data);
        }
        Ok(Self::assemble(params, tensors))
    }

    /// Seeded fallback initialization: PyTorch-style uniform fan-in bounds,
    /// identity normalization.
    pub fn untrained(
        params: ClassifierParams,
        seed: u64,
    ) -> std::result::Result<Self, ModelLoadError> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::from_fn(params, |spec| match spec.init {
            Init::Zeros => vec![0.0; spec.numel()],
            Init::Ones => vec![1.0; spec.numel()],
            Init::Uniform { fan_in } => {
                let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
                (0..spec.numel())
                    .map(|_| rng.gen_range(-bound..bound))
                    .collect()
            }
        })
    }

    /// Load every tensor from a safetensors checkpoint, checking names and shapes.
    pub fn load(
        path: impl AsRef<Path>,
        params: ClassifierParams,
    ) -> std::result::Result<Self, ModelLoadError> {
        params.validate()?;
        let store = WeightStore::open(path)?;

        let mut tensors = Vec::new();
        for spec in tensor_specs(&params) {
            if !store.contains(&spec.name)? {
                return Err(ModelLoadError::MissingTensor(spec.name));
            }
            let t = store.tensor_f32(&spec.name)?;
            if t.shape != spec.shape {
                return Err(ModelLoadError::ShapeMismatch {
                    name: spec.name,
                    got: t.shape,
                    expected: spec.shape,
                });
            }
            tensors.push(t.data);
        }
        Ok(Self::assemble(params, tensors))
    }

    /// Load pretrained weights when possible, otherwise fall back to the
    /// seeded initialization. Never fails on a bad checkpoint.
    pub fn load_or_untrained(
        path: Option<&Path>,
        params: ClassifierParams,
    ) -> std::result::Result<(Self, WeightsProvenance), ModelLoadError> {
        let reason = match path {
            None => {
                tracing::warn!("no classifier weights configured; using untrained initialization");
                "no weights file configured".to_string()
            }
            Some(p) => match Self::load(p, params.clone()) {
                Ok(net) => {
                    tracing::info!(path = %p.display(), "loaded pretrained classifier weights");
                    return Ok((
                        net,
                        WeightsProvenance::Pretrained {
                            path: p.to_path_buf(),
                        },
                    ));
                }
                Err(e) => {
                    tracing::warn!(
                        path = %p.display(),
                        error = %e,
                        "could not load classifier weights; using untrained initialization"
                    );
                    e.to_string()
                }
            },
        };
        let net = Self::untrained(params, UNTRAINED_SEED)?;
        Ok((net, WeightsProvenance::Untrained { reason }))
    }

    #[must_use]
    pub fn params(&self) -> &ClassifierParams {
        &self.params
    }

    /// Run the network on one log-mel matrix and return raw class logits.
    pub fn forward(&self, features: &LogMelMatrix) -> Result<[f32; 2]> {
        let p = &self.params;
        let (n_mels, n_frames) = features.shape();
        if (n_mels, n_frames) != (p.n_mels, p.n_frames) {
            return Err(DetectorError::Prediction(format!(
                "feature shape {n_mels}x{n_frames} does not match model input {}x{}",
                p.n_mels, p.n_frames
            )));
        }

        // 1) Convolution blocks on [C, mel, time].
        let mut x = features.as_slice().to_vec();
        let (mut h, mut w) = (n_mels, n_frames);
        for block in &self.blocks {
            let mut y = vec![0.0f32; block.channels_out * h * w];
            conv2d_same(
                &mut y,
                &x,
                &block.weight,
                Some(&block.bias),
                block.channels_in,
                block.channels_out,
                h,
                w,
                p.kernel_size,
            );
            let bn = |v: &mut [f32]| {
                batch_norm2d_inplace(
                    v,
                    block.channels_out,
                    &block.bn_weight,
                    &block.bn_bias,
                    &block.bn_running_mean,
                    &block.bn_running_var,
                    p.bn_eps,
                );
            };
            match p.block_order {
                BlockOrder::NormThenRelu => {
                    bn(&mut y);
                    relu_inplace(&mut y);
                }
                BlockOrder::ReluThenNorm => {
                    relu_inplace(&mut y);
                    bn(&mut y);
                }
            }
            let (pooled, ph, pw) = max_pool2d(&y, block.channels_out, h, w, POOL);
            x = pooled;
            h = ph;
            w = pw;
        }

        // 2) Fixed grid, frequency mean, time-major sequence.
        let c = p.feature_channels();
        let g = p.pool_grid;
        let grid = adaptive_avg_pool2d(&x, c, h, w, g, g);
        let seq = mean_height_to_sequence(&grid, c, g, g);

        // 3) Embedding and encoder stack.
        let mut hidden = linear(
            &seq,
            g,
            c,
            &self.embed_weight,
            p.d_model,
            Some(&self.embed_bias),
        );
        let cfg = encoder_config(p);
        for layer in &self.layers {
            hidden = encoder_layer_forward(cfg, layer, &hidden, g);
        }

        // 4) Temporal mean and classifier head.
        let pooled = mean_rows(&hidden, g, p.d_model);
        let mut z = linear(
            &pooled,
            1,
            p.d_model,
            &self.fc1_weight,
            p.hidden_dim,
            Some(&self.fc1_bias),
        );
        relu_inplace(&mut z);
        let logits = linear(
            &z,
            1,
            p.hidden_dim,
            &self.fc2_weight,
            p.n_classes,
            Some(&self.fc2_bias),
        );

        if logits.len() != 2 || logits.iter().any(|v| !v.is_finite()) {
            return Err(DetectorError::Prediction(format!(
                "classifier produced invalid logits {logits:?}"
            )));
        }
        Ok([logits[0], logits[1]])
    }
}
