//! Pure-Rust scalar kernel for ternary I2_S operations.
//!
//! Works on all platforms and serves as the reference implementation: every
//! SIMD backend must match these results bit-for-bit.

use super::{BLOCK_PACKED_BYTES, BlockParams, QK_I2_S, TernaryKernel, packed_bytes, row_stride};
use crate::hw::CpuFeatures;

/// Scalar reference kernel — no SIMD intrinsics, lowest priority.
#[derive(Debug, Clone, Copy)]
pub struct ScalarKernel;

impl TernaryKernel for ScalarKernel {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn priority(&self) -> u8 {
        0
    }

    fn required_features(&self) -> CpuFeatures {
        CpuFeatures::NONE
    }

    fn block_params(&self) -> BlockParams {
        BlockParams {
            row_block: 1,
            col_block: QK_I2_S,
            parallel: 1,
            qk_i2_s: QK_I2_S,
        }
    }

    fn vec_dot_i2_i8(&self, n: usize, out: &mut [f32], x: &[u8], y: &[i8], nrc: usize) {
        debug_assert_eq!(n % QK_I2_S, 0);
        debug_assert!(y.len() >= n);
        debug_assert!(out.len() >= nrc);
        let nb = n / QK_I2_S;
        let stride = row_stride(n);
        debug_assert!(x.len() >= nrc * stride);

        for (row, slot) in out.iter_mut().enumerate().take(nrc) {
            let x_row = &x[row * stride..];
            let mut sum: i32 = 0;

            for block in 0..nb {
                let packed = &x_row[block * BLOCK_PACKED_BYTES..(block + 1) * BLOCK_PACKED_BYTES];
                let yi = &y[block * QK_I2_S..(block + 1) * QK_I2_S];

                // Raw unsigned code × signed activation; the SIMD backends
                // use the same accumulator so results stay bit-identical.
                for (j, &act) in yi.iter().enumerate() {
                    let group_idx = j / 32;
                    let group_pos = j % 32;
                    let raw = (packed[group_pos] >> (6 - 2 * group_idx)) & 0x03;
                    sum += raw as i32 * act as i32;
                }
            }

            *slot = sum as f32;
        }
    }

    fn quantize_i2(&self, src: &[f32], dst: &mut [u8], nrow: usize, n_per_row: usize) -> usize {
        debug_assert_eq!(n_per_row % QK_I2_S, 0);
        debug_assert!(src.len() >= nrow * n_per_row);
        let stride = row_stride(n_per_row);
        debug_assert!(dst.len() >= nrow * stride);
        let nb = n_per_row / QK_I2_S;

        for row in 0..nrow {
            let w_row = &src[row * n_per_row..(row + 1) * n_per_row];
            let out = &mut dst[row * stride..(row + 1) * stride];
            out.fill(0);

            for block in 0..nb {
                let ws = &w_row[block * QK_I2_S..(block + 1) * QK_I2_S];
                let scale = ws.iter().fold(0.0f32, |m, &w| m.max(w.abs()));

                for (j, &w) in ws.iter().enumerate() {
                    let code: u8 = if w.abs() < 1e-6 {
                        1 // zero weight
                    } else if w > 0.0 {
                        2
                    } else {
                        0
                    };
                    let group_idx = j / 32;
                    let group_pos = j % 32;
                    out[block * BLOCK_PACKED_BYTES + group_pos] |= code << (6 - 2 * group_idx);
                }

                let scale_off = packed_bytes(n_per_row) + block * 4;
                out[scale_off..scale_off + 4].copy_from_slice(&scale.to_le_bytes());
            }
        }

        nrow * stride
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_dot_all_zero_codes() {
        // Raw code 1 everywhere (ternary zero): sum = Σ 1·y[j].
        let n = QK_I2_S;
        let weights = vec![0.0f32; n];
        let mut packed = vec![0u8; row_stride(n)];
        ScalarKernel.quantize_i2(&weights, &mut packed, 1, n);

        let y = vec![3i8; n];
        let mut out = [0.0f32];
        ScalarKernel.vec_dot_i2_i8(n, &mut out, &packed, &y, 1);
        assert_eq!(out[0], (n as i32 * 3) as f32);
    }

    #[test]
    fn vec_dot_signed_weights() {
        // First weight +1 (raw 2), second −1 (raw 0), rest 0 (raw 1).
        let n = QK_I2_S;
        let mut weights = vec![0.0f32; n];
        weights[0] = 0.5;
        weights[1] = -0.5;
        let mut packed = vec![0u8; row_stride(n)];
        ScalarKernel.quantize_i2(&weights, &mut packed, 1, n);

        let mut y = vec![0i8; n];
        y[0] = 10;
        y[1] = 20;
        y[2] = 30;
        let mut out = [0.0f32];
        ScalarKernel.vec_dot_i2_i8(n, &mut out, &packed, &y, 1);
        // raw: 2·10 + 0·20 + 1·30 = 50.
        assert_eq!(out[0], 50.0);
    }

    #[test]
    fn quantize_writes_block_scale() {
        let n = QK_I2_S;
        let mut weights = vec![0.0f32; n];
        weights[5] = -0.75;
        weights[17] = 0.25;
        let mut packed = vec![0u8; row_stride(n)];
        let written = ScalarKernel.quantize_i2(&weights, &mut packed, 1, n);
        assert_eq!(written, row_stride(n));

        let scale_off = packed_bytes(n);
        let scale = f32::from_le_bytes(packed[scale_off..scale_off + 4].try_into().unwrap());
        assert_eq!(scale, 0.75);
    }

    #[test]
    fn gemm_matches_column_gemv() {
        let (n, nr, nc) = (QK_I2_S, 2usize, 2usize);
        let mut seedless = 0.1f32;
        let weights: Vec<f32> = (0..n * nr)
            .map(|i| {
                seedless = -seedless;
                if i % 3 == 0 { 0.0 } else { seedless }
            })
            .collect();
        let mut packed = vec![0u8; nr * row_stride(n)];
        ScalarKernel.quantize_i2(&weights, &mut packed, nr, n);

        let y: Vec<i8> = (0..n * nc).map(|i| (i % 13) as i8 - 6).collect();
        let mut out = vec![0.0f32; nr * nc];
        ScalarKernel.gemm_i2_i8(n, &mut out, &packed, &y, nr, nc);

        for c in 0..nc {
            let mut col = vec![0.0f32; nr];
            ScalarKernel.gemv_i2_i8(n, &mut col, &packed, &y[c * n..(c + 1) * n], nr);
            for r in 0..nr {
                assert_eq!(out[r * nc + c], col[r]);
            }
        }
    }
}
