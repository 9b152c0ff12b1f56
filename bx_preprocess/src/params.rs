//! Tunable parameters of the counting and correction passes.

use anyhow::{bail, Context, Result};
use bx_barcode::corrector::BARCODE_CONFIDENCE_THRESHOLD;
use bx_barcode::BC_LEN;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PreprocessParams {
    /// Bases of read 1 following the barcode that are dropped from the output.
    pub barcode_trim: usize,
    /// Minimum number of bases left in each read of a pair after removing the barcode
    /// and the trimmed bases.
    pub min_read_length: usize,
    /// GEM group appended to the corrected barcode in the BX tag.
    pub gem_group: u16,
    /// A barcode is corrected if the posterior of the best candidate exceeds this.
    pub confidence_threshold: f64,
    /// Number of reads (or read pairs) processed in parallel at a time.
    pub chunk_size: usize,
    /// Number of independently locked shards used while counting.
    pub n_shards: usize,
}

const DEFAULT_PARAMETERS: PreprocessParams = PreprocessParams {
    barcode_trim: 7,
    min_read_length: 15,
    gem_group: 1,
    confidence_threshold: BARCODE_CONFIDENCE_THRESHOLD,
    chunk_size: 100_000,
    n_shards: 256,
};

impl Default for PreprocessParams {
    fn default() -> Self {
        DEFAULT_PARAMETERS
    }
}

impl PreprocessParams {
    /// Load parameters from a TOML file. Missing keys take their default value.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("While reading parameters: {}", path.display()))?;
        Self::from_toml_str(&s).with_context(|| path.display().to_string())
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let params: PreprocessParams = toml::from_str(s)?;
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<()> {
        if !(self.confidence_threshold > 0.0 && self.confidence_threshold < 1.0) {
            bail!(
                "confidence_threshold must be strictly between 0 and 1, got {}",
                self.confidence_threshold
            );
        }
        if self.chunk_size == 0 {
            bail!("chunk_size must be positive");
        }
        if self.n_shards == 0 {
            bail!("n_shards must be positive");
        }
        Ok(())
    }

    /// Shortest read 1 that still holds a barcode, the trimmed bases and a usable insert.
    pub fn min_read1_length(&self) -> usize {
        BC_LEN + self.barcode_trim + self.min_read_length
    }
}
