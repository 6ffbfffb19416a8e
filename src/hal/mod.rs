//! Hardware abstraction layer: runtime-dispatched kernels for ternary-weight
//! (I2_S) × int8 matrix operations.
//!
//! This module provides a `TernaryKernel` trait with CPU-specific
//! implementations. At startup, [`select_backend`] walks the backend table in
//! descending priority and activates the first backend whose required CPU
//! features are present, falling through on init failure. The scalar backend
//! has priority 0 and no feature requirements, so selection always terminates.
//!
//! # Supported backends
//!
//! - **Scalar**: Pure-Rust reference — works everywhere, and defines the
//!   bit-exact result every SIMD backend must reproduce
//! - **AVX2**: 256-bit SIMD for x86_64
//! - **NEON**: 128-bit SIMD for aarch64
//!
//! # I2_S weight layout
//!
//! Weights are ternary ({−1, 0, +1}) stored as raw 2-bit codes {0, 1, 2} in
//! blocks of [`QK_I2_S`] = 128. Within a block, 128 codes pack into 32 bytes:
//! weight `j` lives in byte `j % 32`, bit field `6 − 2·(j/32) ..= 7 − 2·(j/32)`.
//! A row of `n` weights is `n/128` packed 32-byte groups followed by `n/128`
//! little-endian f32 block scales, so [`row_stride`] is `(n/128) · 36` bytes.

pub mod avx2;
pub mod neon;
pub mod scalar;

use std::sync::Mutex;

use crate::error::HalError;
use crate::hw::CpuFeatures;

/// Quantization block size: 128 ternary weights per scale.
pub const QK_I2_S: usize = 128;

/// Packed bytes per block (4 weights per byte).
pub const BLOCK_PACKED_BYTES: usize = QK_I2_S / 4;

/// Bytes per block including its f32 scale.
pub const BLOCK_STRIDE: usize = BLOCK_PACKED_BYTES + 4;

/// Bytes per packed row of `n` weights (packed region plus scale region).
///
/// `n` must be a multiple of [`QK_I2_S`].
pub fn row_stride(n: usize) -> usize {
    (n / QK_I2_S) * BLOCK_STRIDE
}

/// Bytes of the packed region of a row (scales excluded).
pub fn packed_bytes(n: usize) -> usize {
    (n / QK_I2_S) * BLOCK_PACKED_BYTES
}

/// Pack 128 raw 2-bit codes (values in {0, 1, 2}) into 32 bytes.
pub fn pack_block(codes: &[u8]) -> [u8; BLOCK_PACKED_BYTES] {
    debug_assert_eq!(codes.len(), QK_I2_S);
    let mut packed = [0u8; BLOCK_PACKED_BYTES];
    for (j, &code) in codes.iter().enumerate() {
        let group_idx = j / 32;
        let group_pos = j % 32;
        packed[group_pos] |= code << (6 - 2 * group_idx);
    }
    packed
}

/// Unpack 32 bytes into 128 raw 2-bit codes.
pub fn unpack_block(packed: &[u8]) -> [u8; QK_I2_S] {
    debug_assert_eq!(packed.len(), BLOCK_PACKED_BYTES);
    let mut codes = [0u8; QK_I2_S];
    for (j, code) in codes.iter_mut().enumerate() {
        let group_idx = j / 32;
        let group_pos = j % 32;
        *code = (packed[group_pos] >> (6 - 2 * group_idx)) & 0x03;
    }
    codes
}

/// Block-geometry parameters a backend advertises to its callers.
#[derive(Debug, Clone, Copy)]
pub struct BlockParams {
    /// Weight rows processed per kernel invocation.
    pub row_block: usize,
    /// Columns processed per inner step.
    pub col_block: usize,
    /// Internal parallelism width.
    pub parallel: usize,
    /// Quantization block size (always [`QK_I2_S`] today).
    pub qk_i2_s: usize,
}

/// A kernel backend for ternary × int8 operations.
///
/// The scalar backend is the reference: for every valid input with `n`
/// divisible by 128, every other backend must produce bit-identical results.
/// Accumulation is `i32` over the *raw* unsigned 2-bit code times the signed
/// activation; mapping back to ternary space is the caller's concern.
pub trait TernaryKernel: Send + Sync {
    /// Backend display name.
    fn name(&self) -> &'static str;

    /// Selection priority; higher wins. The scalar reference is 0.
    fn priority(&self) -> u8;

    /// CPU features this backend needs to run.
    fn required_features(&self) -> CpuFeatures;

    /// Advertised block geometry.
    fn block_params(&self) -> BlockParams;

    /// One-time setup after selection. Falls through to the next backend on error.
    fn init(&self) -> Result<(), HalError> {
        Ok(())
    }

    /// Teardown before a backend switch or process shutdown.
    fn shutdown(&self) {}

    /// Dot products of `nrc` packed I2_S rows against one int8 activation
    /// vector of length `n`.
    ///
    /// `x` holds `nrc` rows of [`row_stride`]`(n)` bytes each; `out` receives
    /// one f32 (the raw i32 accumulator) per row.
    fn vec_dot_i2_i8(&self, n: usize, out: &mut [f32], x: &[u8], y: &[i8], nrc: usize);

    /// Quantize f32 weights into packed I2_S rows. Returns bytes written,
    /// `nrow · row_stride(n_per_row)`.
    ///
    /// Per block: `scale = max |w|`; weights below `1e-6` in magnitude encode
    /// as raw 1 (ternary 0), positive as raw 2 (+1), negative as raw 0 (−1).
    fn quantize_i2(&self, src: &[f32], dst: &mut [u8], nrow: usize, n_per_row: usize) -> usize;

    /// Matrix-vector multiply: `nr` packed rows × one activation vector.
    fn gemv_i2_i8(&self, n: usize, out: &mut [f32], x: &[u8], y: &[i8], nr: usize) {
        self.vec_dot_i2_i8(n, out, x, y, nr);
    }

    /// Matrix-matrix multiply: `nr` packed rows × `nc` activation columns.
    ///
    /// `y` holds `nc` contiguous activation vectors of length `n`; `out` is
    /// row-major `nr × nc`.
    fn gemm_i2_i8(&self, n: usize, out: &mut [f32], x: &[u8], y: &[i8], nr: usize, nc: usize) {
        let stride = row_stride(n);
        let mut col = vec![0.0f32; nr];
        for c in 0..nc {
            let yc = &y[c * n..(c + 1) * n];
            self.vec_dot_i2_i8(n, &mut col, &x[..nr * stride], yc, nr);
            for r in 0..nr {
                out[r * nc + c] = col[r];
            }
        }
    }
}

/// The statically registered backend table, in descending priority order.
pub fn backend_table() -> &'static [&'static dyn TernaryKernel] {
    static TABLE: [&(dyn TernaryKernel); 3] = [
        &avx2::Avx2Kernel,
        &neon::NeonKernel,
        &scalar::ScalarKernel,
    ];
    &TABLE
}

/// The process-wide active backend. Only one backend is active at a time;
/// switching tears the previous one down first.
static ACTIVE: Mutex<Option<&'static dyn TernaryKernel>> = Mutex::new(None);

/// Select and activate the highest-priority backend usable with `features`.
///
/// Walks the table in descending priority, skipping backends whose required
/// features are missing, and calls `init` on each candidate; an init failure
/// logs a warning and falls through to the next entry. Fatal only if every
/// backend (including the scalar reference) fails.
pub fn select_backend(features: CpuFeatures) -> Result<&'static dyn TernaryKernel, HalError> {
    let mut active = ACTIVE.lock().expect("backend table lock poisoned");
    if let Some(prev) = active.take() {
        prev.shutdown();
    }
    for &backend in backend_table() {
        if !features.contains(backend.required_features()) {
            continue;
        }
        match backend.init() {
            Ok(()) => {
                tracing::info!(backend = backend.name(), %features, "kernel backend selected");
                *active = Some(backend);
                return Ok(backend);
            }
            Err(e) => {
                tracing::warn!(backend = backend.name(), error = %e, "backend init failed, falling through");
            }
        }
    }
    Err(HalError::BackendUnavailable {
        features: features.to_string(),
    })
}

/// The currently active backend, if any.
pub fn active_backend() -> Option<&'static dyn TernaryKernel> {
    *ACTIVE.lock().expect("backend table lock poisoned")
}

/// Tear down the active backend. Called on process shutdown.
pub fn shutdown_backend() {
    let mut active = ACTIVE.lock().expect("backend table lock poisoned");
    if let Some(prev) = active.take() {
        prev.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random generator for kernel inputs.
    fn lcg(seed: &mut u64) -> u64 {
        *seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        *seed >> 33
    }

    fn random_weights(n: usize, seed: &mut u64) -> Vec<f32> {
        (0..n)
            .map(|_| {
                let r = lcg(seed) % 1000;
                (r as f32 / 500.0) - 1.0
            })
            .collect()
    }

    fn random_activations(n: usize, seed: &mut u64) -> Vec<i8> {
        (0..n).map(|_| (lcg(seed) % 256) as u8 as i8).collect()
    }

    #[test]
    fn table_is_sorted_by_descending_priority() {
        let table = backend_table();
        for pair in table.windows(2) {
            assert!(pair[0].priority() >= pair[1].priority());
        }
        // The last entry is the scalar terminator.
        let last = table[table.len() - 1];
        assert_eq!(last.priority(), 0);
        assert!(last.required_features().is_empty());
    }

    #[test]
    fn selection_with_no_features_yields_scalar() {
        let backend = select_backend(CpuFeatures::NONE).unwrap();
        assert_eq!(backend.name(), "scalar");
        assert!(active_backend().is_some());
        shutdown_backend();
        assert!(active_backend().is_none());
    }

    #[test]
    fn pack_unpack_round_trip() {
        let mut seed = 7u64;
        let codes: Vec<u8> = (0..QK_I2_S).map(|_| (lcg(&mut seed) % 3) as u8).collect();
        let packed = pack_block(&codes);
        let unpacked = unpack_block(&packed);
        assert_eq!(&unpacked[..], &codes[..]);
        // pack(unpack(x)) == x for valid packings.
        let repacked = pack_block(&unpacked);
        assert_eq!(repacked, packed);
    }

    #[test]
    fn row_stride_matches_layout() {
        assert_eq!(row_stride(128), 36);
        assert_eq!(row_stride(256), 72);
        assert_eq!(packed_bytes(256), 64);
    }

    /// Run the full conformance suite against any backend, comparing with the
    /// scalar reference bit-for-bit.
    pub fn kernel_conformance(kernel: &dyn TernaryKernel) {
        let reference = &scalar::ScalarKernel;
        let mut seed = 42u64;
        for &(n, nrc) in &[(128usize, 1usize), (256, 3), (512, 4), (1024, 2)] {
            let weights = random_weights(n * nrc, &mut seed);
            let mut packed = vec![0u8; nrc * row_stride(n)];
            let written = reference.quantize_i2(&weights, &mut packed, nrc, n);
            assert_eq!(written, nrc * row_stride(n));

            let y = random_activations(n, &mut seed);
            let mut out_ref = vec![0.0f32; nrc];
            let mut out_simd = vec![0.0f32; nrc];
            reference.vec_dot_i2_i8(n, &mut out_ref, &packed, &y, nrc);
            kernel.vec_dot_i2_i8(n, &mut out_simd, &packed, &y, nrc);
            for (r, (&a, &b)) in out_ref.iter().zip(out_simd.iter()).enumerate() {
                assert_eq!(
                    a.to_bits(),
                    b.to_bits(),
                    "row {r} of {} differs from scalar (n={n}): {a} vs {b}",
                    kernel.name()
                );
            }

            // gemv must agree with vec_dot.
            let mut out_gemv = vec![0.0f32; nrc];
            kernel.gemv_i2_i8(n, &mut out_gemv, &packed, &y, nrc);
            assert_eq!(out_gemv, out_ref);
        }

        // gemm against per-column reference.
        let (n, nr, nc) = (256usize, 3usize, 2usize);
        let weights = random_weights(n * nr, &mut seed);
        let mut packed = vec![0u8; nr * row_stride(n)];
        reference.quantize_i2(&weights, &mut packed, nr, n);
        let y: Vec<i8> = random_activations(n * nc, &mut seed);
        let mut out = vec![0.0f32; nr * nc];
        kernel.gemm_i2_i8(n, &mut out, &packed, &y, nr, nc);
        for c in 0..nc {
            let mut col = vec![0.0f32; nr];
            reference.vec_dot_i2_i8(n, &mut col, &packed, &y[c * n..(c + 1) * n], nr);
            for r in 0..nr {
                assert_eq!(out[r * nc + c].to_bits(), col[r].to_bits());
            }
        }
    }

    #[test]
    fn scalar_conformance() {
        kernel_conformance(&scalar::ScalarKernel);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn avx2_conformance() {
        if is_x86_feature_detected!("avx2") {
            kernel_conformance(&avx2::Avx2Kernel);
        }
    }

    #[cfg(target_arch = "aarch64")]
    #[test]
    fn neon_conformance() {
        kernel_conformance(&neon::NeonKernel);
    }

    #[test]
    fn quantize_is_a_fixed_point() {
        let mut seed = 9u64;
        let n = 256;
        let weights = random_weights(n, &mut seed);
        let reference = &scalar::ScalarKernel;

        let mut packed = vec![0u8; row_stride(n)];
        reference.quantize_i2(&weights, &mut packed, 1, n);

        // Dequantize: (raw − 1) · block scale.
        let nb = n / QK_I2_S;
        let mut dequant = Vec::with_capacity(n);
        for block in 0..nb {
            let codes = unpack_block(&packed[block * 32..block * 32 + 32]);
            let scale_off = packed_bytes(n) + block * 4;
            let scale = f32::from_le_bytes(packed[scale_off..scale_off + 4].try_into().unwrap());
            for code in codes {
                dequant.push((code as f32 - 1.0) * scale);
            }
        }

        let mut repacked = vec![0u8; row_stride(n)];
        reference.quantize_i2(&dequant, &mut repacked, 1, n);
        assert_eq!(repacked, packed);
    }
}
