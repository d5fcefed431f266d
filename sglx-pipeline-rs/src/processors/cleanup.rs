//! Removal of pass-one intermediate folders.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

use super::commands::intermediate_folder;
use crate::core::run_spec::RunSpec;

/// Errors that can occur during cleanup.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for cleanup operations.
pub type Result<T> = std::result::Result<T, CleanupError>;

/// Deletes the per-run CatGT output once the supercat output exists.
#[derive(Debug, Clone)]
pub struct CleanupManager {
    dest: PathBuf,
    prefix: String,
}

impl CleanupManager {
    pub fn new(dest: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dest: dest.into(),
            prefix: prefix.into(),
        }
    }

    /// Folders to delete: one per gate from the first to the last gate of each run.
    pub fn targets(&self, specs: &[RunSpec]) -> Vec<PathBuf> {
        specs
            .iter()
            .flat_map(|spec| {
                (spec.first_gate()..=spec.last_gate())
                    .map(move |gate| self.dest.join(intermediate_folder(&self.prefix, &spec.name, gate)))
            })
            .collect()
    }

    /// Remove every target recursively.
    ///
    /// # Returns
    /// The removed folders, in run order. Stops at the first folder that
    /// cannot be removed, including one that does not exist.
    pub fn run(&self, specs: &[RunSpec]) -> Result<Vec<PathBuf>> {
        let targets = self.targets(specs);
        info!("Deleting {} intermediate folders", targets.len());

        for path in &targets {
            info!("  - {}", path.display());
            remove_folder(path)?;
        }

        Ok(targets)
    }
}

fn remove_folder(path: &Path) -> Result<()> {
    fs::remove_dir_all(path).map_err(|e| CleanupError::Remove {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run_spec::StreamRange;
    use std::fs::File;
    use tempfile::TempDir;

    fn spec(name: &str, gates: Vec<u32>) -> RunSpec {
        RunSpec {
            name: name.to_string(),
            gates,
            streams: StreamRange::from_count(1),
            regions: vec!["cortex".to_string()],
            created: Vec::new(),
        }
    }

    fn create_intermediate(dest: &Path, folder: &str) -> PathBuf {
        let path = dest.join(folder);
        fs::create_dir_all(path.join(format!("{}_imec0", folder))).unwrap();
        File::create(path.join(format!("{}_imec0", folder)).join("data.ap.bin")).unwrap();
        path
    }

    #[test]
    fn test_targets_span_gate_range() {
        let manager = CleanupManager::new("/out", "catgt");
        let targets = manager.targets(&[spec("a", vec![0]), spec("b", vec![3, 1])]);

        assert_eq!(
            targets,
            vec![
                PathBuf::from("/out/catgt_a_g0"),
                PathBuf::from("/out/catgt_b_g1"),
                PathBuf::from("/out/catgt_b_g2"),
                PathBuf::from("/out/catgt_b_g3"),
            ]
        );
    }

    #[test]
    fn test_run_removes_intermediates() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();
        let first = create_intermediate(dest, "catgt_pre_g0");
        let second = create_intermediate(dest, "catgt_post_g0");
        let supercat = create_intermediate(dest, "supercat_pre_g0");

        let manager = CleanupManager::new(dest, "catgt");
        let removed = manager.run(&[spec("pre", vec![0]), spec("post", vec![0])]).unwrap();

        assert_eq!(removed, vec![first.clone(), second.clone()]);
        assert!(!first.exists());
        assert!(!second.exists());
        assert!(supercat.exists());
    }

    #[test]
    fn test_missing_folder_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();
        create_intermediate(dest, "catgt_run_g0");

        let manager = CleanupManager::new(dest, "catgt");
        let err = manager.run(&[spec("run", vec![0, 1])]).unwrap_err();

        let CleanupError::Remove { path, .. } = err;
        assert_eq!(path, dest.join("catgt_run_g1"));
        assert!(!dest.join("catgt_run_g0").exists());
    }
}
