//! Model registry: scan a directory for GGUF models, estimate resource cost,
//! and score each candidate against the detected hardware.
//!
//! Scoring isolates the hard RAM constraint (±1000) from quality bonuses so
//! an over-budget model can never be promoted past one that fits, and biases
//! selection toward models leaving headroom for the KV cache.

use std::path::{Path, PathBuf};

use crate::error::RegistryError;
use crate::gguf::{GgufInfo, QuantKind};
use crate::hw::HardwareInfo;

/// Maximum entries returned by a scan.
pub const MAX_SCAN_MODELS: usize = 128;

/// A scanned model candidate. Created by [`scan`], immutable thereafter.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub path: PathBuf,
    /// Basename without the `.gguf` extension.
    pub name: String,
    pub file_size_mb: i64,
    /// `file_size · 1.3 + 100` — weights plus context/KV-cache overhead.
    pub est_ram_mb: i64,
    /// Parameter estimate derived from file size and the quant encoding.
    pub est_params: i64,
    pub quant: QuantKind,
    pub fits_in_ram: bool,
    pub score: f32,
}

impl ModelEntry {
    /// Build an entry from file stats and score it against the hardware.
    pub fn from_stats(
        path: PathBuf,
        file_size_mb: i64,
        quant: QuantKind,
        hw: &HardwareInfo,
    ) -> ModelEntry {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let est_ram_mb = estimate_ram_mb(file_size_mb);
        let est_params = estimate_params(file_size_mb, quant);
        let mut entry = ModelEntry {
            path,
            name,
            file_size_mb,
            est_ram_mb,
            est_params,
            quant,
            fits_in_ram: est_ram_mb <= hw.model_budget_mb,
            score: 0.0,
        };
        entry.score = score_model(&entry, hw);
        entry
    }
}

/// RAM estimate: file size plus ~30% overhead plus 100 MB for context.
pub fn estimate_ram_mb(file_size_mb: i64) -> i64 {
    file_size_mb + file_size_mb * 30 / 100 + 100
}

/// Parameter estimate from file size at the encoding's storage cost.
pub fn estimate_params(file_size_mb: i64, quant: QuantKind) -> i64 {
    // Unknown encodings fall back to the ternary constant: the scanner's
    // target corpus is I2_S models, and the name-hint already caught most.
    let centi = match quant {
        QuantKind::Unknown => QuantKind::I2S.bytes_per_param_centi(),
        q => q.bytes_per_param_centi(),
    };
    file_size_mb * 1024 * 1024 / centi * 100
}

/// Score a model against the hardware. Negative means hard-disqualified.
pub fn score_model(entry: &ModelEntry, hw: &HardwareInfo) -> f32 {
    // Hard constraint: must fit in the model budget.
    if entry.est_ram_mb > hw.model_budget_mb {
        return -1.0;
    }

    let mut score = 1000.0f32;

    // Quality tier: more parameters, smarter model.
    let params_b = entry.est_params / 1_000_000_000;
    score += if params_b >= 8 {
        100.0
    } else if params_b >= 4 {
        80.0
    } else if params_b >= 2 {
        60.0
    } else if params_b >= 1 {
        30.0
    } else {
        10.0
    };

    // Speed headroom: smaller models leave room for the KV cache.
    let headroom =
        (hw.model_budget_mb - entry.est_ram_mb) as f32 / hw.model_budget_mb as f32;
    score += headroom * 50.0;

    // Ternary models run on the fast I2_S kernels.
    if ["i2_s", "I2_S", "1.58", "bitnet", "BitNet"]
        .iter()
        .any(|tag| entry.name.contains(tag))
    {
        score += 25.0;
    }

    // Instruct/chat tunes follow tool-calling prompts better.
    if ["nstruct", "chat", "Chat"]
        .iter()
        .any(|tag| entry.name.contains(tag))
    {
        score += 15.0;
    }

    score
}

/// Scan a directory tree for `*.gguf` files and return scored entries,
/// best first. Symlinks are not followed; dot entries are skipped; the
/// result is capped at [`MAX_SCAN_MODELS`].
pub fn scan(dir: &Path, hw: &HardwareInfo) -> Result<Vec<ModelEntry>, RegistryError> {
    if !dir.is_dir() {
        return Err(RegistryError::DirNotFound {
            path: dir.display().to_string(),
        });
    }

    let mut entries = Vec::new();
    scan_recursive(dir, hw, &mut entries);
    if entries.len() >= MAX_SCAN_MODELS {
        tracing::warn!(
            dir = %dir.display(),
            cap = MAX_SCAN_MODELS,
            "model scan hit the entry cap; remaining files ignored"
        );
    }

    // Stable sort keeps scan order among equal scores, which makes
    // selection ties deterministic.
    entries.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(entries)
}

fn scan_recursive(dir: &Path, hw: &HardwareInfo, entries: &mut Vec<ModelEntry>) {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
            return;
        }
    };

    for item in read_dir.flatten() {
        if entries.len() >= MAX_SCAN_MODELS {
            return;
        }
        let path = item.path();
        let file_name = item.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }
        let meta = match std::fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if meta.file_type().is_symlink() {
            continue;
        }
        if meta.is_dir() {
            scan_recursive(&path, hw, entries);
        } else if meta.is_file()
            && path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"))
        {
            let file_size_mb = (meta.len() / (1024 * 1024)) as i64;
            // Metadata refinement is best-effort: an unreadable or
            // pre-v3 header falls back to the name-hint classifier.
            let quant = match GgufInfo::read(&path) {
                Ok(info) if info.quant != QuantKind::Unknown => info.quant,
                _ => QuantKind::from_name_hint(&file_name.to_string_lossy()),
            };
            entries.push(ModelEntry::from_stats(path, file_size_mb, quant, hw));
        }
    }
}

/// The best candidate: first entry with a positive score that fits in RAM.
/// Assumes the slice is sorted best-first (as returned by [`scan`]).
pub fn select_best(entries: &[ModelEntry]) -> Option<&ModelEntry> {
    entries.iter().find(|e| e.fits_in_ram && e.score > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::CpuFeatures;

    fn hw_with_budget(budget_mb: i64) -> HardwareInfo {
        HardwareInfo {
            cpu_name: "test".into(),
            arch: "x86_64".into(),
            physical_cores: 4,
            logical_cores: 4,
            ram_total_mb: budget_mb + 1000,
            ram_available_mb: budget_mb + 500,
            model_budget_mb: budget_mb,
            gpu_name: String::new(),
            gpu_vram_mb: 0,
            features: CpuFeatures::NONE,
        }
    }

    fn entry(name: &str, size_mb: i64, hw: &HardwareInfo) -> ModelEntry {
        ModelEntry::from_stats(
            PathBuf::from(format!("/models/{name}.gguf")),
            size_mb,
            QuantKind::I2S,
            hw,
        )
    }

    #[test]
    fn ram_estimate_adds_overhead() {
        assert_eq!(estimate_ram_mb(2500), 3350);
        assert_eq!(estimate_ram_mb(0), 100);
    }

    #[test]
    fn param_estimate_tracks_encoding() {
        // 2500 MB of ternary weights is roughly a 7.5B model.
        let params = estimate_params(2500, QuantKind::I2S);
        assert!((7..8).contains(&(params / 1_000_000_000)), "{params}");
        // The same bytes in f16 is under 2B parameters.
        assert!(estimate_params(2500, QuantKind::F16) < 2_000_000_000);
    }

    #[test]
    fn larger_model_wins_when_both_fit() {
        let hw = hw_with_budget(5120);
        let small = entry("falcon3-7b-instruct-1.58bit-i2_s", 2500, &hw);
        let large = entry("falcon3-10b-instruct-1.58bit-i2_s", 3500, &hw);
        assert!(small.fits_in_ram && large.fits_in_ram);
        // Quality tier 100 outweighs the 7B's tier 80 plus headroom edge.
        assert!(large.score > small.score);

        let mut sorted = vec![small.clone(), large.clone()];
        sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        let best = select_best(&sorted).unwrap();
        assert_eq!(best.name, large.name);
    }

    #[test]
    fn oom_candidate_is_hard_disqualified() {
        let hw = hw_with_budget(4000);
        let small = entry("falcon3-7b-instruct-1.58bit-i2_s", 2500, &hw);
        let large = entry("falcon3-10b-instruct-1.58bit-i2_s", 3500, &hw);
        assert_eq!(large.score, -1.0);
        assert!(!large.fits_in_ram);
        assert!(small.score > 0.0);

        let sorted = vec![small.clone(), large];
        let best = select_best(&sorted).unwrap();
        assert_eq!(best.name, small.name);
    }

    #[test]
    fn scoring_is_monotonic_in_headroom() {
        // Same tier, same name: the smaller footprint must score >= larger.
        let hw = hw_with_budget(8000);
        let a = entry("model-a", 2000, &hw);
        let b = entry("model-a", 2400, &hw);
        assert!(a.score >= b.score);
    }

    #[test]
    fn name_bonuses_stack() {
        let hw = hw_with_budget(8000);
        let plain = entry("plainmodel", 1000, &hw);
        let ternary = entry("plainmodel-i2_s", 1000, &hw);
        let instruct = entry("plainmodel-i2_s-instruct", 1000, &hw);
        assert_eq!(ternary.score - plain.score, 25.0);
        assert_eq!(instruct.score - ternary.score, 15.0);
    }

    #[test]
    fn scan_finds_gguf_files_and_skips_others() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tiny-i2_s.gguf"), b"stub").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"no").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/nested-chat.gguf"), b"stub").unwrap();
        std::fs::write(dir.path().join(".hidden.gguf"), b"stub").unwrap();

        let hw = hw_with_budget(4096);
        let entries = scan(dir.path(), &hw).unwrap();
        let mut names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["nested-chat", "tiny-i2_s"]);
        for e in &entries {
            assert!(e.fits_in_ram);
            assert!(e.score > 0.0);
        }
    }

    #[test]
    fn scan_missing_dir_is_an_error() {
        let hw = hw_with_budget(4096);
        let err = scan(Path::new("/nonexistent/models"), &hw).unwrap_err();
        assert!(matches!(err, RegistryError::DirNotFound { .. }));
    }
}
