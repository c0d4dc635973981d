//! Dense ops shared by the classifier head and the sequence encoder.

use crate::math::softmax_inplace;

/// Linear layer: `y = x * W^T + b`.
///
/// Shapes:
/// - `input`: `[n_rows, in_dim]`
/// - `weight`: `[out_dim, in_dim]`
/// - output: `[n_rows, out_dim]`
pub fn linear(
    input: &[f32],
    n_rows: usize,
    in_dim: usize,
    weight: &[f32],
    out_dim: usize,
    bias: Option<&[f32]>,
) -> Vec<f32> {
    debug_assert_eq!(input.len(), n_rows * in_dim);
    debug_assert_eq!(weight.len(), out_dim * in_dim);
    if let Some(b) = bias {
        debug_assert_eq!(b.len(), out_dim);
    }

    let mut out = vec![0.0f32; n_rows * out_dim];
    for r in 0..n_rows {
        let x = &input[r * in_dim..(r + 1) * in_dim];
        let y = &mut out[r * out_dim..(r + 1) * out_dim];
        for o in 0..out_dim {
            let w = &weight[o * in_dim..(o + 1) * in_dim];
            let mut sum = bias.map_or(0.0, |b| b[o]);
            for i in 0..in_dim {
                sum += x[i] * w[i];
            }
            y[o] = sum;
        }
    }
    out
}

pub fn add_inplace(dst: &mut [f32], src: &[f32]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter_mut().zip(src.iter().copied()) {
        *d += s;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AttentionShape {
    pub n_heads: usize,
    pub head_dim: usize,
    pub seq_len: usize,
}

impl AttentionShape {
    #[must_use]
    pub fn model_dim(&self) -> usize {
        self.n_heads * self.head_dim
    }
}

/// Full (non-causal) scaled dot-product attention over a whole sequence.
///
/// Shapes (heads packed along the feature axis):
/// - `q`, `k`, `v`: `[seq_len, n_heads * head_dim]`
///
/// Returns: `[seq_len, n_heads * head_dim]`.
pub fn attention_full(q: &[f32], k: &[f32], v: &[f32], shape: AttentionShape) -> Vec<f32> {
    let AttentionShape {
        n_heads,
        head_dim,
        seq_len,
    } = shape;
    let dim = shape.model_dim();

    debug_assert_eq!(q.len(), seq_len * dim);
    debug_assert_eq!(k.len(), seq_len * dim);
    debug_assert_eq!(v.len(), seq_len * dim);

    let mut out = vec![0.0f32; seq_len * dim];
    let mut scores = vec![0.0f32; seq_len];
    let scale = 1.0f32 / (head_dim as f32).sqrt();

    for h in 0..n_heads {
        let off = h * head_dim;
        for t in 0..seq_len {
            let qh = &q[t * dim + off..t * dim + off + head_dim];

            for (s, score) in scores.iter_mut().enumerate() {
                let kh = &k[s * dim + off..s * dim + off + head_dim];
                let mut dot = 0.0f32;
                for i in 0..head_dim {
                    dot += qh[i] * kh[i];
                }
                *score = dot * scale;
            }

            softmax_inplace(&mut scores);

            let out_h = &mut out[t * dim + off..t * dim + off + head_dim];
            for (s, &a) in scores.iter().enumerate() {
                let vh = &v[s * dim + off..s * dim + off + head_dim];
                for i in 0..head_dim {
                    out_h[i] += a * vh[i];
                }
            }
        }
    }

    out
}
