//! GGUF metadata reader.
//!
//! Validates the header (magic, version ≥ 3) and walks the metadata KV
//! section, extracting `general.architecture`, `general.name`, and the
//! file-type enum; every other key is skipped. Tensor data is never touched —
//! the registry only needs enough metadata to refine its resource estimates.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::GgufError;

/// GGUF magic: "GGUF" read as a little-endian u32.
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// Minimum supported header version.
pub const MIN_GGUF_VERSION: u32 = 3;

/// Upper bound on metadata strings and array lengths; anything larger is
/// treated as corruption rather than allocated.
const MAX_SANE_LEN: u64 = 16 * 1024 * 1024;

/// Quantization encoding of a model file, as far as the registry cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantKind {
    /// Ternary 2-bit (BitNet-style I2_S).
    I2S,
    F16,
    F32,
    /// 4-bit family (Q4_0 / Q4_1 / Q4_K).
    Q4,
    /// 8-bit (Q8_0).
    Q8,
    /// Recognized header but unmapped encoding.
    Other(u32),
    /// No file-type metadata present.
    Unknown,
}

impl QuantKind {
    /// Map the `general.file_type` enum. The I2_S values come from the
    /// BitNet fork's extension of the llama file-type table.
    pub fn from_file_type(ftype: u32) -> QuantKind {
        match ftype {
            0 => QuantKind::F32,
            1 => QuantKind::F16,
            2 | 3 => QuantKind::Q4,
            7 => QuantKind::Q8,
            36 | 37 => QuantKind::I2S,
            other => QuantKind::Other(other),
        }
    }

    /// Fallback classification from the model name when metadata is absent.
    pub fn from_name_hint(name: &str) -> QuantKind {
        let lower = name.to_lowercase();
        if lower.contains("i2_s") || lower.contains("1.58") || lower.contains("bitnet") {
            QuantKind::I2S
        } else {
            QuantKind::Unknown
        }
    }

    /// Storage cost in hundredths of a byte per parameter. I2_S is ~2 bits
    /// plus metadata overhead; unknown encodings assume 1 byte/param.
    pub fn bytes_per_param_centi(self) -> i64 {
        match self {
            QuantKind::I2S => 35,
            QuantKind::F16 => 200,
            QuantKind::F32 => 400,
            QuantKind::Q4 => 60,
            QuantKind::Q8 => 110,
            QuantKind::Other(_) | QuantKind::Unknown => 100,
        }
    }
}

/// Metadata extracted from a GGUF header.
#[derive(Debug, Clone)]
pub struct GgufInfo {
    pub version: u32,
    pub n_tensors: u64,
    /// `general.architecture`, e.g. `"llama"` or `"bitnet-25"`.
    pub architecture: Option<String>,
    /// `general.name` display string.
    pub name: Option<String>,
    /// Raw `general.file_type` enum value, when present.
    pub file_type: Option<u32>,
    pub quant: QuantKind,
}

impl GgufInfo {
    /// Read and validate the metadata section of a GGUF file.
    pub fn read(path: &Path) -> Result<GgufInfo, GgufError> {
        let file = File::open(path).map_err(|e| GgufError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let mut r = BufReader::new(file);

        let magic = read_u32(&mut r)?;
        if magic != GGUF_MAGIC {
            if magic.swap_bytes() == GGUF_MAGIC {
                return Err(GgufError::BigEndian);
            }
            return Err(GgufError::BadMagic { magic });
        }
        let version = read_u32(&mut r)?;
        if version < MIN_GGUF_VERSION {
            return Err(GgufError::UnsupportedVersion { version });
        }
        let n_tensors = read_u64(&mut r)?;
        let n_kv = read_u64(&mut r)?;
        if n_kv > MAX_SANE_LEN {
            return Err(GgufError::Metadata {
                message: format!("implausible kv count {n_kv}"),
            });
        }

        let mut info = GgufInfo {
            version,
            n_tensors,
            architecture: None,
            name: None,
            file_type: None,
            quant: QuantKind::Unknown,
        };

        for _ in 0..n_kv {
            let key = read_string(&mut r)?;
            let vtype = read_u32(&mut r)?;
            match key.as_str() {
                "general.architecture" if vtype == TYPE_STRING => {
                    info.architecture = Some(read_string(&mut r)?);
                }
                "general.name" if vtype == TYPE_STRING => {
                    info.name = Some(read_string(&mut r)?);
                }
                "general.file_type" if vtype == TYPE_U32 => {
                    let ftype = read_u32(&mut r)?;
                    info.file_type = Some(ftype);
                    info.quant = QuantKind::from_file_type(ftype);
                }
                _ => skip_value(&mut r, vtype)?,
            }
        }

        tracing::debug!(
            path = %path.display(),
            arch = info.architecture.as_deref().unwrap_or("?"),
            quant = ?info.quant,
            "gguf metadata read"
        );
        Ok(info)
    }
}

// GGUF metadata value-type tags.
const TYPE_U8: u32 = 0;
const TYPE_I8: u32 = 1;
const TYPE_U16: u32 = 2;
const TYPE_I16: u32 = 3;
const TYPE_U32: u32 = 4;
const TYPE_I32: u32 = 5;
const TYPE_F32: u32 = 6;
const TYPE_BOOL: u32 = 7;
const TYPE_STRING: u32 = 8;
const TYPE_ARRAY: u32 = 9;
const TYPE_U64: u32 = 10;
const TYPE_I64: u32 = 11;
const TYPE_F64: u32 = 12;

fn io_err(e: std::io::Error) -> GgufError {
    GgufError::Metadata {
        message: format!("truncated header: {e}"),
    }
}

fn read_u32(r: &mut impl Read) -> Result<u32, GgufError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(io_err)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> Result<u64, GgufError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(io_err)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_string(r: &mut impl Read) -> Result<String, GgufError> {
    let len = read_u64(r)?;
    if len > MAX_SANE_LEN {
        return Err(GgufError::Metadata {
            message: format!("implausible string length {len}"),
        });
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).map_err(io_err)?;
    String::from_utf8(buf).map_err(|e| GgufError::Metadata {
        message: format!("non-UTF8 metadata string: {e}"),
    })
}

fn skip_bytes(r: &mut impl Read, n: u64) -> Result<(), GgufError> {
    let mut remaining = n;
    let mut buf = [0u8; 512];
    while remaining > 0 {
        let chunk = remaining.min(buf.len() as u64) as usize;
        r.read_exact(&mut buf[..chunk]).map_err(io_err)?;
        remaining -= chunk as u64;
    }
    Ok(())
}

fn skip_value(r: &mut impl Read, vtype: u32) -> Result<(), GgufError> {
    match vtype {
        TYPE_U8 | TYPE_I8 | TYPE_BOOL => skip_bytes(r, 1),
        TYPE_U16 | TYPE_I16 => skip_bytes(r, 2),
        TYPE_U32 | TYPE_I32 | TYPE_F32 => skip_bytes(r, 4),
        TYPE_U64 | TYPE_I64 | TYPE_F64 => skip_bytes(r, 8),
        TYPE_STRING => {
            read_string(r)?;
            Ok(())
        }
        TYPE_ARRAY => {
            let elem_type = read_u32(r)?;
            let count = read_u64(r)?;
            if count > MAX_SANE_LEN {
                return Err(GgufError::Metadata {
                    message: format!("implausible array length {count}"),
                });
            }
            for _ in 0..count {
                skip_value(r, elem_type)?;
            }
            Ok(())
        }
        other => Err(GgufError::Metadata {
            message: format!("unknown value type {other}"),
        }),
    }
}
