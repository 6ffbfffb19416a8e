//! Hardware probe: CPU, memory, and SIMD-feature detection.
//!
//! `detect()` is pure — it queries the platform every time and caches nothing.
//! The CLI persists the result to `hw_profile.json` so installers and support
//! tooling can inspect what was seen last.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Flat bitset of CPU SIMD features.
///
/// Bit positions are part of the persisted `hw_profile.json` format and of
/// the HAL backend table; they never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CpuFeatures(pub u32);

impl CpuFeatures {
    pub const NONE: CpuFeatures = CpuFeatures(0);
    pub const SSE3: CpuFeatures = CpuFeatures(1 << 0);
    pub const SSSE3: CpuFeatures = CpuFeatures(1 << 1);
    pub const AVX: CpuFeatures = CpuFeatures(1 << 2);
    pub const AVX2: CpuFeatures = CpuFeatures(1 << 3);
    pub const AVX_VNNI: CpuFeatures = CpuFeatures(1 << 4);
    pub const AVX512F: CpuFeatures = CpuFeatures(1 << 5);
    pub const NEON: CpuFeatures = CpuFeatures(1 << 8);

    /// Whether every feature in `required` is present in `self`.
    pub fn contains(self, required: CpuFeatures) -> bool {
        self.0 & required.0 == required.0
    }

    /// Union of two feature sets.
    pub fn with(self, other: CpuFeatures) -> CpuFeatures {
        CpuFeatures(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for CpuFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const NAMES: [(CpuFeatures, &str); 7] = [
            (CpuFeatures::SSE3, "sse3"),
            (CpuFeatures::SSSE3, "ssse3"),
            (CpuFeatures::AVX, "avx"),
            (CpuFeatures::AVX2, "avx2"),
            (CpuFeatures::AVX_VNNI, "avx-vnni"),
            (CpuFeatures::AVX512F, "avx512f"),
            (CpuFeatures::NEON, "neon"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, "+")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}

/// Everything the runtime knows about the machine it is on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareInfo {
    /// CPU display name, `"Unknown CPU"` when the platform reports nothing.
    pub cpu_name: String,
    /// Compile-time architecture tag.
    pub arch: String,
    pub physical_cores: usize,
    pub logical_cores: usize,
    pub ram_total_mb: i64,
    pub ram_available_mb: i64,
    /// `max(256, ram_available_mb - 500)` — the largest model footprint the
    /// registry will consider.
    pub model_budget_mb: i64,
    /// GPU display name, empty when none was detected.
    pub gpu_name: String,
    pub gpu_vram_mb: i64,
    pub features: CpuFeatures,
}

/// Physical-core estimate: above 8 logical cores assume SMT/hybrid and take
/// 60%; at or below 8, logical == physical.
///
/// Known to be coarse on AMD SMT and Apple hybrid parts; a per-vendor
/// topology query would replace this.
pub fn physical_from_logical(logical: usize) -> usize {
    if logical > 8 {
        (logical as f64 * 0.6) as usize
    } else {
        logical
    }
}

/// Model budget: available RAM minus a 500 MB safety margin, floored at 256 MB.
pub fn model_budget(ram_available_mb: i64) -> i64 {
    (ram_available_mb - 500).max(256)
}

/// Detect the current machine. Pure: no caching, no global state.
pub fn detect() -> HardwareInfo {
    let cpu_name = detect_cpu_name();
    let arch = detect_arch().to_string();
    let logical_cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let physical_cores = physical_from_logical(logical_cores);
    let (ram_total_mb, ram_available_mb) = detect_ram();
    let features = detect_features();

    let info = HardwareInfo {
        cpu_name,
        arch,
        physical_cores,
        logical_cores,
        ram_total_mb,
        ram_available_mb,
        model_budget_mb: model_budget(ram_available_mb),
        gpu_name: String::new(),
        gpu_vram_mb: 0,
        features,
    };
    tracing::debug!(
        arch = %info.arch,
        logical = info.logical_cores,
        ram_available_mb = info.ram_available_mb,
        features = %info.features,
        "hardware detected"
    );
    info
}

impl HardwareInfo {
    /// Persist the profile as JSON (the `hw_profile.json` format).
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    /// Load a previously persisted profile.
    pub fn load(path: &Path) -> std::io::Result<HardwareInfo> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(std::io::Error::other)
    }
}

fn detect_arch() -> &'static str {
    if cfg!(target_arch = "x86_64") {
        "x86_64"
    } else if cfg!(target_arch = "aarch64") {
        "aarch64"
    } else if cfg!(target_arch = "riscv64") {
        "riscv64"
    } else if cfg!(target_arch = "arm") {
        "arm32"
    } else if cfg!(target_arch = "wasm32") {
        "wasm"
    } else {
        "unknown"
    }
}

/// Pull the value after `key:` from a `/proc`-style key/value text file.
#[cfg(target_os = "linux")]
fn read_proc_value(path: &str, key: &str) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    for line in text.lines() {
        if line.starts_with(key) {
            if let Some((_, value)) = line.split_once(':') {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

fn detect_cpu_name() -> String {
    #[cfg(target_os = "linux")]
    {
        // "model name" on x86, "Hardware" on many ARM SoCs.
        if let Some(name) = read_proc_value("/proc/cpuinfo", "model name") {
            return name;
        }
        if let Some(name) = read_proc_value("/proc/cpuinfo", "Hardware") {
            return name;
        }
    }
    "Unknown CPU".to_string()
}

/// Returns `(total_mb, available_mb)`.
fn detect_ram() -> (i64, i64) {
    #[cfg(target_os = "linux")]
    {
        let kb = |key: &str| -> i64 {
            read_proc_value("/proc/meminfo", key)
                .and_then(|v| {
                    v.split_whitespace()
                        .next()
                        .and_then(|n| n.parse::<i64>().ok())
                })
                .unwrap_or(0)
        };
        let total_mb = kb("MemTotal") / 1024;
        let mut available_mb = kb("MemAvailable") / 1024;
        if available_mb <= 0 {
            available_mb = (kb("MemFree") + kb("Buffers") + kb("Cached")) / 1024;
        }
        if total_mb > 0 {
            if available_mb <= 0 {
                available_mb = total_mb * 60 / 100;
            }
            return (total_mb, available_mb);
        }
    }
    // Nothing reported: assume a small 2 GB machine.
    (2048, 2048 * 60 / 100)
}

#[cfg(target_arch = "x86_64")]
fn detect_features() -> CpuFeatures {
    use std::arch::x86_64::{__cpuid, __cpuid_count};

    let mut features = CpuFeatures::NONE;
    // Safety: cpuid is available on every x86_64 CPU.
    let leaf1 = unsafe { __cpuid(1) };
    if leaf1.ecx & (1 << 0) != 0 {
        features = features.with(CpuFeatures::SSE3);
    }
    if leaf1.ecx & (1 << 9) != 0 {
        features = features.with(CpuFeatures::SSSE3);
    }
    if leaf1.ecx & (1 << 28) != 0 {
        features = features.with(CpuFeatures::AVX);
    }
    let leaf7 = unsafe { __cpuid_count(7, 0) };
    if leaf7.ebx & (1 << 5) != 0 {
        features = features.with(CpuFeatures::AVX2);
    }
    if leaf7.ebx & (1 << 16) != 0 {
        features = features.with(CpuFeatures::AVX512F);
    }
    let leaf7_1 = unsafe { __cpuid_count(7, 1) };
    if leaf7_1.eax & (1 << 4) != 0 {
        features = features.with(CpuFeatures::AVX_VNNI);
    }
    features
}

#[cfg(target_arch = "aarch64")]
fn detect_features() -> CpuFeatures {
    // NEON is architecturally mandatory on aarch64.
    CpuFeatures::NEON
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn detect_features() -> CpuFeatures {
    CpuFeatures::NONE
}
