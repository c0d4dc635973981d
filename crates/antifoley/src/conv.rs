//! 2D convolution stack kernels.
//!
//! Feature maps are channel-major `[channels, height, width]` stored as
//! `x[(c * height + y) * width + x]`, i.e. NCHW with a batch of one. Height is
//! the mel axis, width is time.

/// Zero-padded ("same") 2D convolution with stride 1 and an odd square kernel.
///
/// Weights are `[channels_out, channels_in, kernel, kernel]` contiguous.
#[allow(clippy::too_many_arguments)]
pub fn conv2d_same(
    output: &mut [f32],
    input: &[f32],
    weight: &[f32],
    bias: Option<&[f32]>,
    channels_in: usize,
    channels_out: usize,
    height: usize,
    width: usize,
    kernel: usize,
) {
    debug_assert_eq!(kernel % 2, 1);
    debug_assert_eq!(input.len(), channels_in * height * width);
    debug_assert_eq!(output.len(), channels_out * height * width);
    debug_assert_eq!(weight.len(), channels_out * channels_in * kernel * kernel);

    let plane = height * width;
    let pad = (kernel / 2) as isize;

    for oc in 0..channels_out {
        let out_plane = &mut output[oc * plane..(oc + 1) * plane];
        out_plane.fill(bias.map_or(0.0, |b| b[oc]));

        for ic in 0..channels_in {
            let in_plane = &input[ic * plane..(ic + 1) * plane];
            let w_base = (oc * channels_in + ic) * kernel * kernel;

            for ky in 0..kernel {
                let dy = ky as isize - pad;
                let y0 = (-dy).max(0) as usize;
                let y1 = (height as isize - dy).min(height as isize).max(0) as usize;

                for kx in 0..kernel {
                    let wv = weight[w_base + ky * kernel + kx];
                    if wv == 0.0 {
                        continue;
                    }
                    let dx = kx as isize - pad;
                    let x0 = (-dx).max(0) as usize;
                    let x1 = (width as isize - dx).min(width as isize).max(0) as usize;

                    for y in y0..y1 {
                        let sy = (y as isize + dy) as usize;
                        let src = &in_plane[sy * width..(sy + 1) * width];
                        let dst = &mut out_plane[y * width..(y + 1) * width];
                        for x in x0..x1 {
                            dst[x] += wv * src[(x as isize + dx) as usize];
                        }
                    }
                }
            }
        }
    }
}

/// Inference-mode batch normalization with running statistics, in place.
pub fn batch_norm2d_inplace(
    x: &mut [f32],
    channels: usize,
    gamma: &[f32],
    beta: &[f32],
    running_mean: &[f32],
    running_var: &[f32],
    eps: f32,
) {
    debug_assert_eq!(x.len() % channels, 0);
    let plane = x.len() / channels;
    for c in 0..channels {
        let scale = gamma[c] / (running_var[c] + eps).sqrt();
        let shift = beta[c] - running_mean[c] * scale;
        for v in &mut x[c * plane..(c + 1) * plane] {
            *v = *v * scale + shift;
        }
    }
}

/// Non-overlapping max pooling (kernel = stride = `k`), flooring odd edges.
///
/// Returns `(output, out_height, out_width)`.
pub fn max_pool2d(
    input: &[f32],
    channels: usize,
    height: usize,
    width: usize,
    k: usize,
) -> (Vec<f32>, usize, usize) {
    debug_assert_eq!(input.len(), channels * height * width);
    let oh = height / k;
    let ow = width / k;
    let mut out = vec![f32::NEG_INFINITY; channels * oh * ow];

    for c in 0..channels {
        let in_plane = &input[c * height * width..(c + 1) * height * width];
        let out_plane = &mut out[c * oh * ow..(c + 1) * oh * ow];
        for oy in 0..oh {
            for ox in 0..ow {
                let mut m = f32::NEG_INFINITY;
                for py in 0..k {
                    let row = &in_plane[(oy * k + py) * width..];
                    for px in 0..k {
                        m = m.max(row[ox * k + px]);
                    }
                }
                out_plane[oy * ow + ox] = m;
            }
        }
    }
    (out, oh, ow)
}

/// Adaptive average pooling to a fixed `[out_h, out_w]` grid.
///
/// Bin `i` covers `floor(i*in/out) .. ceil((i+1)*in/out)`, so bins may overlap
/// when the input is not a multiple of the output.
pub fn adaptive_avg_pool2d(
    input: &[f32],
    channels: usize,
    height: usize,
    width: usize,
    out_h: usize,
    out_w: usize,
) -> Vec<f32> {
    debug_assert_eq!(input.len(), channels * height * width);
    let bin = |i: usize, n_in: usize, n_out: usize| -> (usize, usize) {
        let start = i * n_in / n_out;
        let end = ((i + 1) * n_in).div_ceil(n_out);
        (start, end)
    };

    let mut out = vec![0.0f32; channels * out_h * out_w];
    for c in 0..channels {
        let in_plane = &input[c * height * width..(c + 1) * height * width];
        for oy in 0..out_h {
            let (y0, y1) = bin(oy, height, out_h);
            for ox in 0..out_w {
                let (x0, x1) = bin(ox, width, out_w);
                let mut sum = 0.0f32;
                for y in y0..y1 {
                    for x in x0..x1 {
                        sum += in_plane[y * width + x];
                    }
                }
                let count = ((y1 - y0) * (x1 - x0)).max(1);
                out[(c * out_h + oy) * out_w + ox] = sum / count as f32;
            }
        }
    }
    out
}

/// Average over the height (frequency) axis and lay the result out as a
/// time-major sequence: `[C, H, W]` → `[W, C]`.
#[must_use]
pub fn mean_height_to_sequence(
    input: &[f32],
    channels: usize,
    height: usize,
    width: usize,
) -> Vec<f32> {
    debug_assert_eq!(input.len(), channels * height * width);
    let mut seq = vec![0.0f32; width * channels];
    let inv = 1.0 / height as f32;
    for c in 0..channels {
        for x in 0..width {
            let mut sum = 0.0f32;
            for y in 0..height {
                sum += input[(c * height + y) * width + x];
            }
            seq[x * channels + c] = sum * inv;
        }
    }
    seq
}
