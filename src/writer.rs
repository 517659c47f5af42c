// 💾 Writer - one JSON artifact per year, published atomically
//
// Artifact shape:
//   {"year":2021,"data":{"M1":{"A":{"avg":..,"median":..,"count":..},"F":{..}}}}
// BTreeMaps give lexicographic district and type-code order, so identical
// input produces byte-identical files.

use crate::aggregator::FinalizedStat;
use crate::error::{PipelineError, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

// ============================================================================
// OUTPUT TYPES
// ============================================================================

/// type code ("D", "S", "T", "F" or "A") → stats
pub type DistrictStats = BTreeMap<String, FinalizedStat>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearOutput {
    pub year: i32,
    pub data: BTreeMap<String, DistrictStats>,
}

impl YearOutput {
    /// A year with no groups; still a valid artifact
    pub fn empty(year: i32) -> Self {
        YearOutput {
            year,
            data: BTreeMap::new(),
        }
    }

    pub fn district_count(&self) -> usize {
        self.data.len()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// What was published for one year
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactReceipt {
    pub year: i32,
    pub path: PathBuf,
    pub bytes: usize,
    pub districts: usize,
    /// SHA-256 of the published bytes, lowercase hex
    pub sha256: String,
}

// ============================================================================
// ARTIFACT WRITER
// ============================================================================

pub struct ArtifactWriter {
    output_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        ArtifactWriter {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// <output_dir>/<year>.json
    pub fn artifact_path(&self, year: i32) -> PathBuf {
        self.output_dir.join(format!("{}.json", year))
    }

    /// Serialize and publish one year's artifact
    ///
    /// Bytes go to a temporary file in the output directory first and are
    /// renamed into place only once fully written; on failure the temporary
    /// file is removed and any previous artifact stays untouched.
    pub fn write(&self, output: &YearOutput) -> Result<ArtifactReceipt> {
        let path = self.artifact_path(output.year);
        let bytes = output.to_bytes()?;

        self.publish(&path, &bytes)
            .map_err(|source| PipelineError::WriteFailure {
                year: output.year,
                path: path.clone(),
                source,
            })?;

        let sha256 = format!("{:x}", Sha256::digest(&bytes));

        info!(
            "Wrote {} ({} districts, {} bytes)",
            path.display(),
            output.district_count(),
            bytes.len()
        );

        Ok(ArtifactReceipt {
            year: output.year,
            path,
            bytes: bytes.len(),
            districts: output.district_count(),
            sha256,
        })
    }

    fn publish(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        fs::create_dir_all(&self.output_dir)?;

        let mut tmp = NamedTempFile::new_in(&self.output_dir)?;
        debug!("Staging {} at {}", path.display(), tmp.path().display());

        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;

        Ok(())
    }
}

/// Read back a published artifact
pub fn read_artifact(path: &Path) -> Result<YearOutput> {
    let content = fs::read(path)?;
    Ok(serde_json::from_slice(&content)?)
}

// ============================================================================
// TESTS
// ============================================================================
