//! NEON (128-bit) kernel for ternary I2_S × int8 operations on aarch64.
//!
//! A packed block is two 16-byte vectors; each 2-bit weight group is
//! extracted with shift/mask and accumulated via widening multiply-adds.
//! All arithmetic is exact integer, so results are bit-identical to the
//! scalar reference.

use super::{BlockParams, QK_I2_S, TernaryKernel, scalar::ScalarKernel};
use crate::hw::CpuFeatures;

/// NEON-accelerated ternary kernel.
#[derive(Debug, Clone, Copy)]
pub struct NeonKernel;

#[cfg(target_arch = "aarch64")]
impl TernaryKernel for NeonKernel {
    fn name(&self) -> &'static str {
        "neon"
    }

    fn priority(&self) -> u8 {
        40
    }

    fn required_features(&self) -> CpuFeatures {
        CpuFeatures::NEON
    }

    fn block_params(&self) -> BlockParams {
        BlockParams {
            row_block: 1,
            col_block: QK_I2_S,
            parallel: 16,
            qk_i2_s: QK_I2_S,
        }
    }

    fn vec_dot_i2_i8(&self, n: usize, out: &mut [f32], x: &[u8], y: &[i8], nrc: usize) {
        debug_assert_eq!(n % QK_I2_S, 0);
        // Safety: NEON is architecturally guaranteed on aarch64.
        unsafe { self.vec_dot_neon(n, out, x, y, nrc) }
    }

    fn quantize_i2(&self, src: &[f32], dst: &mut [u8], nrow: usize, n_per_row: usize) -> usize {
        ScalarKernel.quantize_i2(src, dst, nrow, n_per_row)
    }
}

#[cfg(target_arch = "aarch64")]
impl NeonKernel {
    unsafe fn vec_dot_neon(&self, n: usize, out: &mut [f32], x: &[u8], y: &[i8], nrc: usize) {
        use std::arch::aarch64::*;

        // Widening multiply-accumulate: 16 unsigned codes × 16 signed
        // activations into four i32 lanes.
        #[inline]
        unsafe fn mla_16(acc: int32x4_t, codes: uint8x16_t, acts: int8x16_t) -> int32x4_t {
            unsafe {
                let c_lo = vreinterpretq_s16_u16(vmovl_u8(vget_low_u8(codes)));
                let c_hi = vreinterpretq_s16_u16(vmovl_u8(vget_high_u8(codes)));
                let a_lo = vmovl_s8(vget_low_s8(acts));
                let a_hi = vmovl_s8(vget_high_s8(acts));
                let mut acc = vmlal_s16(acc, vget_low_s16(c_lo), vget_low_s16(a_lo));
                acc = vmlal_s16(acc, vget_high_s16(c_lo), vget_high_s16(a_lo));
                acc = vmlal_s16(acc, vget_low_s16(c_hi), vget_low_s16(a_hi));
                acc = vmlal_s16(acc, vget_high_s16(c_hi), vget_high_s16(a_hi));
                acc
            }
        }

        let nb = n / QK_I2_S;
        let stride = super::row_stride(n);
        debug_assert!(x.len() >= nrc * stride);
        debug_assert!(y.len() >= n);

        for (row, slot) in out.iter_mut().enumerate().take(nrc) {
            let x_row = x[row * stride..].as_ptr();

            let sum = unsafe {
                let mask = vdupq_n_u8(0x03);
                let mut acc = vdupq_n_s32(0);

                for block in 0..nb {
                    let p_lo = vld1q_u8(x_row.add(block * 32));
                    let p_hi = vld1q_u8(x_row.add(block * 32 + 16));
                    let y_base = y.as_ptr().add(block * QK_I2_S);

                    // Group g of a packed byte holds weight bits 6−2g..7−2g;
                    // its 32 activations live at offset g·32 within the block.
                    let g0_lo = vandq_u8(vshrq_n_u8::<6>(p_lo), mask);
                    let g0_hi = vandq_u8(vshrq_n_u8::<6>(p_hi), mask);
                    let g1_lo = vandq_u8(vshrq_n_u8::<4>(p_lo), mask);
                    let g1_hi = vandq_u8(vshrq_n_u8::<4>(p_hi), mask);
                    let g2_lo = vandq_u8(vshrq_n_u8::<2>(p_lo), mask);
                    let g2_hi = vandq_u8(vshrq_n_u8::<2>(p_hi), mask);
                    let g3_lo = vandq_u8(p_lo, mask);
                    let g3_hi = vandq_u8(p_hi, mask);

                    acc = mla_16(acc, g0_lo, vld1q_s8(y_base));
                    acc = mla_16(acc, g0_hi, vld1q_s8(y_base.add(16)));
                    acc = mla_16(acc, g1_lo, vld1q_s8(y_base.add(32)));
                    acc = mla_16(acc, g1_hi, vld1q_s8(y_base.add(48)));
                    acc = mla_16(acc, g2_lo, vld1q_s8(y_base.add(64)));
                    acc = mla_16(acc, g2_hi, vld1q_s8(y_base.add(80)));
                    acc = mla_16(acc, g3_lo, vld1q_s8(y_base.add(96)));
                    acc = mla_16(acc, g3_hi, vld1q_s8(y_base.add(112)));
                }

                vaddvq_s32(acc)
            };

            *slot = sum as f32;
        }
    }
}

// Provide a stub for non-aarch64 targets so the backend table compiles.
#[cfg(not(target_arch = "aarch64"))]
impl TernaryKernel for NeonKernel {
    fn name(&self) -> &'static str {
        "neon"
    }
    fn priority(&self) -> u8 {
        40
    }
    fn required_features(&self) -> CpuFeatures {
        CpuFeatures::NEON
    }
    fn block_params(&self) -> BlockParams {
        ScalarKernel.block_params()
    }
    fn vec_dot_i2_i8(&self, n: usize, out: &mut [f32], x: &[u8], y: &[i8], nrc: usize) {
        ScalarKernel.vec_dot_i2_i8(n, out, x, y, nrc);
    }
    fn quantize_i2(&self, src: &[f32], dst: &mut [u8], nrow: usize, n_per_row: usize) -> usize {
        ScalarKernel.quantize_i2(src, dst, nrow, n_per_row)
    }
}
