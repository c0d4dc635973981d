//! Core math kernels for inference.

#[inline]
pub fn relu_inplace(x: &mut [f32]) {
    for v in x {
        if *v < 0.0 {
            *v = 0.0;
        }
    }
}

/// LayerNorm over the last axis of row-major `[n_rows, dim]` data.
pub fn layer_norm_rows(
    output: &mut [f32],
    input: &[f32],
    weight: &[f32],
    bias: &[f32],
    dim: usize,
    eps: f32,
) {
    debug_assert!(dim > 0);
    debug_assert_eq!(input.len(), output.len());
    debug_assert_eq!(weight.len(), dim);
    debug_assert_eq!(bias.len(), dim);
    debug_assert_eq!(input.len() % dim, 0);

    for (in_row, out_row) in input.chunks_exact(dim).zip(output.chunks_exact_mut(dim)) {
        let mean = in_row.iter().sum::<f32>() / dim as f32;
        let mut var = 0.0f32;
        for &v in in_row {
            let d = v - mean;
            var += d * d;
        }
        let inv_std = 1.0 / (var / dim as f32 + eps).sqrt();
        for i in 0..dim {
            out_row[i] = (in_row[i] - mean) * inv_std * weight[i] + bias[i];
        }
    }
}

pub fn softmax_inplace(x: &mut [f32]) {
    if x.is_empty() {
        return;
    }
    let mut max_v = x[0];
    for &v in &x[1..] {
        if v > max_v {
            max_v = v;
        }
    }

    let mut sum = 0.0f32;
    for v in x.iter_mut() {
        *v = (*v - max_v).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in x {
            *v /= sum;
        }
    }
}

/// Index of the largest value. Ties go to the lowest index.
#[must_use]
pub fn argmax(x: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in x.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Mean over rows of row-major `[n_rows, dim]` data.
#[must_use]
pub fn mean_rows(input: &[f32], n_rows: usize, dim: usize) -> Vec<f32> {
    debug_assert_eq!(input.len(), n_rows * dim);
    let mut out = vec![0.0f32; dim];
    if n_rows == 0 {
        return out;
    }
    for row in input.chunks_exact(dim) {
        for (o, &v) in out.iter_mut().zip(row) {
            *o += v;
        }
    }
    let inv = 1.0 / n_rows as f32;
    for o in &mut out {
        *o *= inv;
    }
    out
}
