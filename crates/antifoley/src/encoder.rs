//! Self-attention sequence encoder layer (post-norm, ReLU feed-forward).
//!
//! Matches a batch-first `TransformerEncoderLayer` in evaluation mode:
//! `x = norm1(x + attn(x)); x = norm2(x + ffn(x))`.

use crate::math::{layer_norm_rows, relu_inplace};
use crate::ops::{AttentionShape, add_inplace, attention_full, linear};

#[derive(Debug, Clone, Copy)]
pub struct EncoderConfig {
    pub dim: usize,
    pub n_heads: usize,
    pub ffn_dim: usize,
    pub norm_eps: f32,
}

impl EncoderConfig {
    #[must_use]
    pub fn head_dim(self) -> usize {
        self.dim / self.n_heads
    }
}

#[derive(Debug, Clone)]
pub struct EncoderLayerWeights {
    pub in_proj_weight: Vec<f32>,  // [3*dim, dim], rows q|k|v
    pub in_proj_bias: Vec<f32>,    // [3*dim]
    pub out_proj_weight: Vec<f32>, // [dim, dim]
    pub out_proj_bias: Vec<f32>,   // [dim]
    pub linear1_weight: Vec<f32>,  // [ffn_dim, dim]
    pub linear1_bias: Vec<f32>,    // [ffn_dim]
    pub linear2_weight: Vec<f32>,  // [dim, ffn_dim]
    pub linear2_bias: Vec<f32>,    // [dim]
    pub norm1_weight: Vec<f32>,    // [dim]
    pub norm1_bias: Vec<f32>,      // [dim]
    pub norm2_weight: Vec<f32>,    // [dim]
    pub norm2_bias: Vec<f32>,      // [dim]
}

impl EncoderLayerWeights {
    /// Parameter suffixes and shapes, relative to `transformer.layers.{i}.`.
    #[must_use]
    pub fn tensor_shapes(cfg: EncoderConfig) -> [(&'static str, Vec<usize>); 12] {
        let d = cfg.dim;
        let f = cfg.ffn_dim;
        [
            ("self_attn.in_proj_weight", vec![3 * d, d]),
            ("self_attn.in_proj_bias", vec![3 * d]),
            ("self_attn.out_proj.weight", vec![d, d]),
            ("self_attn.out_proj.bias", vec![d]),
            ("linear1.weight", vec![f, d]),
            ("linear1.bias", vec![f]),
            ("linear2.weight", vec![d, f]),
            ("linear2.bias", vec![d]),
            ("norm1.weight", vec![d]),
            ("norm1.bias", vec![d]),
            ("norm2.weight", vec![d]),
            ("norm2.bias", vec![d]),
        ]
    }

    /// Build from tensors in `tensor_shapes` order.
    #[must_use]
    pub fn from_ordered(mut t: Vec<Vec<f32>>) -> Self {
        debug_assert_eq!(t.len(), 12);
        let mut next = || t.remove(0);
        Self {
            in_proj_weight: next(),
            in_proj_bias: next(),
            out_proj_weight: next(),
            out_proj_bias: next(),
            linear1_weight: next(),
            linear1_bias: next(),
            linear2_weight: next(),
            linear2_bias: next(),
            norm1_weight: next(),
            norm1_bias: next(),
            norm2_weight: next(),
            norm2_bias: next(),
        }
    }
}

/// Run one encoder layer over a whole `[seq_len, dim]` sequence.
pub fn encoder_layer_forward(
    cfg: EncoderConfig,
    weights: &EncoderLayerWeights,
    hidden: &[f32],
    seq_len: usize,
) -> Vec<f32> {
    let dim = cfg.dim;
    debug_assert_eq!(hidden.len(), seq_len * dim);

    // 1) Self-attention branch.
    let (wq, rest) = weights.in_proj_weight.split_at(dim * dim);
    let (wk, wv) = rest.split_at(dim * dim);
    let (bq, rest) = weights.in_proj_bias.split_at(dim);
    let (bk, bv) = rest.split_at(dim);

    let q = linear(hidden, seq_len, dim, wq, dim, Some(bq));
    let k = linear(hidden, seq_len, dim, wk, dim, Some(bk));
    let v = linear(hidden, seq_len, dim, wv, dim, Some(bv));

    let attn = attention_full(
        &q,
        &k,
        &v,
        AttentionShape {
            n_heads: cfg.n_heads,
            head_dim: cfg.head_dim(),
            seq_len,
        },
    );
    let attn_proj = linear(
        &attn,
        seq_len,
        dim,
        &weights.out_proj_weight,
        dim,
        Some(&weights.out_proj_bias),
    );

    let mut h = hidden.to_vec();
    add_inplace(&mut h, &attn_proj);
    let mut x = vec![0.0f32; h.len()];
    layer_norm_rows(
        &mut x,
        &h,
        &weights.norm1_weight,
        &weights.norm1_bias,
        dim,
        cfg.norm_eps,
    );

    // 2) Feed-forward branch.
    let mut ff = linear(
        &x,
        seq_len,
        dim,
        &weights.linear1_weight,
        cfg.ffn_dim,
        Some(&weights.linear1_bias),
    );
    relu_inplace(&mut ff);
    let ff_out = linear(
        &ff,
        seq_len,
        cfg.ffn_dim,
        &weights.linear2_weight,
        dim,
        Some(&weights.linear2_bias),
    );
    add_inplace(&mut x, &ff_out);

    let mut out = vec![0.0f32; x.len()];
    layer_norm_rows(
        &mut out,
        &x,
        &weights.norm2_weight,
        &weights.norm2_bias,
        dim,
        cfg.norm_eps,
    );
    out
}
