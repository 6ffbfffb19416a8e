//! XDG-compliant path resolution for the NeuronOS install directory.
//!
//! All persisted state lives under one root: the models directory scanned by
//! the registry, the embedded memory store, the cached hardware profile, and
//! the (core-opaque) MCP server list.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(neuronos::paths::no_home),
        help("Set the HOME environment variable or ensure a valid user profile exists.")
    )]
    NoHome,

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(neuronos::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// The NeuronOS install-directory layout.
#[derive(Debug, Clone)]
pub struct InstallPaths {
    /// `$NEURONOS_HOME`, or `$XDG_DATA_HOME/neuronos` (fallback `~/.local/share/neuronos`).
    pub root: PathBuf,
    /// `root/models/` — the directory scanned for GGUF files.
    pub models_dir: PathBuf,
    /// `root/memory.db` — the embedded store for all three memory tiers.
    pub memory_db: PathBuf,
    /// `root/hw_profile.json` — the last detected hardware profile.
    pub hw_profile: PathBuf,
    /// `root/mcp.json` — external MCP server list (opaque to the core).
    pub mcp_config: PathBuf,
    /// `root/scratch/` — the only directory agent tools may write into.
    pub scratch_dir: PathBuf,
}

impl InstallPaths {
    /// Resolve the install directory from the environment with standard fallbacks.
    pub fn resolve() -> PathResult<Self> {
        let root = match std::env::var("NEURONOS_HOME") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                let data_home = std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .or_else(|_| {
                        std::env::var("HOME")
                            .map(|h| PathBuf::from(h).join(".local/share"))
                            .map_err(|_| PathError::NoHome)
                    })?;
                data_home.join("neuronos")
            }
        };
        Ok(Self::at(root))
    }

    /// Build the layout rooted at an explicit directory.
    pub fn at(root: PathBuf) -> Self {
        Self {
            models_dir: root.join("models"),
            memory_db: root.join("memory.db"),
            hw_profile: root.join("hw_profile.json"),
            mcp_config: root.join("mcp.json"),
            scratch_dir: root.join("scratch"),
            root,
        }
    }

    /// Create all base directories. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        for dir in [&self.root, &self.models_dir, &self.scratch_dir] {
            std::fs::create_dir_all(dir).map_err(|e| PathError::CreateDir {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_derives_from_root() {
        let paths = InstallPaths::at(PathBuf::from("/data/neuronos"));
        assert_eq!(paths.models_dir, PathBuf::from("/data/neuronos/models"));
        assert_eq!(paths.memory_db, PathBuf::from("/data/neuronos/memory.db"));
        assert_eq!(
            paths.hw_profile,
            PathBuf::from("/data/neuronos/hw_profile.json")
        );
        assert_eq!(paths.scratch_dir, PathBuf::from("/data/neuronos/scratch"));
    }

    #[test]
    fn resolve_produces_neuronos_suffix() {
        let paths = InstallPaths::resolve().unwrap();
        assert!(
            paths.root.to_string_lossy().contains("neuronos"),
            "root should contain 'neuronos': {}",
            paths.root.display()
        );
    }
}
