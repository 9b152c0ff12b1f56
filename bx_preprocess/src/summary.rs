//! Run statistics of the two passes, written as JSON.

use anyhow::{Context, Result};
use bx_barcode::BarcodeCorrection;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct CountSummary {
    pub whitelist_size: usize,
    pub total_reads: u64,
    /// Reads shorter than a barcode or with a non-ACGT base in the barcode.
    pub skipped_reads: u64,
    pub whitelisted_reads: u64,
    pub unfound_reads: u64,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct CorrectSummary {
    pub total_pairs: u64,
    /// Pairs with a read too short to keep, or with mismatched sequence and quality lengths.
    pub skipped_pairs: u64,
    pub exact_barcodes: u64,
    pub corrected_barcodes: u64,
    pub uncorrectable_barcodes: u64,
}

impl CorrectSummary {
    pub fn observe(&mut self, correction: BarcodeCorrection) {
        match correction {
            BarcodeCorrection::Exact(_) => self.exact_barcodes += 1,
            BarcodeCorrection::Corrected(_) => self.corrected_barcodes += 1,
            BarcodeCorrection::Uncorrectable => self.uncorrectable_barcodes += 1,
        }
    }

    /// Fraction of written pairs that carry a whitelisted barcode.
    pub fn valid_barcode_fraction(&self) -> f64 {
        let written = self.exact_barcodes + self.corrected_barcodes + self.uncorrectable_barcodes;
        if written == 0 {
            return 0.0;
        }
        (self.exact_barcodes + self.corrected_barcodes) as f64 / written as f64
    }
}

pub fn write_summary_json<T: Serialize>(path: &Path, summary: &T) -> Result<()> {
    let f = File::create(path)
        .with_context(|| format!("While creating summary: {}", path.display()))?;
    let mut w = BufWriter::new(f);
    serde_json::to_writer_pretty(&mut w, summary)?;
    writeln!(w)?;
    w.flush()
        .with_context(|| format!("While writing summary: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bx_barcode::PackedBarcode;

    #[test]
    fn test_observe() {
        let bc = PackedBarcode::from_code(7);
        let mut summary = CorrectSummary::default();
        assert_eq!(summary.valid_barcode_fraction(), 0.0);
        summary.observe(BarcodeCorrection::Exact(bc));
        summary.observe(BarcodeCorrection::Exact(bc));
        summary.observe(BarcodeCorrection::Corrected(bc));
        summary.observe(BarcodeCorrection::Uncorrectable);
        assert_eq!(summary.exact_barcodes, 2);
        assert_eq!(summary.corrected_barcodes, 1);
        assert_eq!(summary.uncorrectable_barcodes, 1);
        assert_eq!(summary.valid_barcode_fraction(), 0.75);
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let summary = CountSummary {
            whitelist_size: 3,
            total_reads: 10,
            skipped_reads: 1,
            whitelisted_reads: 8,
            unfound_reads: 1,
        };
        write_summary_json(&path, &summary).unwrap();
        let read: CountSummary =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read, summary);
    }
}
