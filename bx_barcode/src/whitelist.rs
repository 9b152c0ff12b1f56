//!
//! Load a barcode whitelist into a `BarcodeDictionary`.
//!
//! The whitelist has one barcode per line. Any line containing a `#` is a comment and is
//! skipped in its entirety, as are blank lines. Every other line must be exactly `BC_LEN`
//! A/C/G/T bases (either case).
//!
use crate::codec::PackedBarcode;
use crate::dictionary::BarcodeDictionary;
use crate::io_utils::open_with_gz;
use crate::BC_LEN;
use anyhow::{Context, Result};
use log::info;
use std::io::BufRead;
use std::path::Path;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum WhitelistError {
    #[error(
        "invalid whitelist barcode '{barcode}' on line {line}: expected exactly {BC_LEN} \
         characters from A, C, G and T"
    )]
    InvalidBarcode { line: usize, barcode: String },
}

const COMMENT_CHAR: char = '#';

/// Parse whitelist barcodes from a reader, failing on the first malformed line.
pub fn read_whitelist<R: BufRead>(reader: R) -> Result<Vec<PackedBarcode>> {
    let mut barcodes = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.contains(COMMENT_CHAR) {
            continue;
        }
        let seq = line.trim_end();
        if seq.is_empty() {
            continue;
        }
        let upper = seq.to_ascii_uppercase();
        let barcode = PackedBarcode::try_encode(upper.as_bytes()).ok_or_else(|| {
            WhitelistError::InvalidBarcode {
                line: i + 1,
                barcode: seq.to_string(),
            }
        })?;
        barcodes.push(barcode);
    }
    Ok(barcodes)
}

/// Parse the (possibly gzipped) whitelist file at `path`.
pub fn load_whitelist(path: &Path) -> Result<Vec<PackedBarcode>> {
    read_whitelist(open_with_gz(path)?)
        .with_context(|| format!("While reading barcode whitelist: {}", path.display()))
}

impl BarcodeDictionary {
    /// Build a dictionary with zero counts from the whitelist file at `path`.
    pub fn from_whitelist(path: &Path) -> Result<Self> {
        let barcodes = load_whitelist(path)?;
        let n_lines = barcodes.len();
        let dict = BarcodeDictionary::build(barcodes);
        info!(
            "Loaded {} whitelist barcodes ({} duplicates) from {}",
            dict.len(),
            n_lines - dict.len(),
            path.display()
        );
        Ok(dict)
    }
}
