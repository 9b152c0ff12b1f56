//! Crate for dealing with 16 base read barcodes.
//!
//! Contains tools for loading barcode whitelists into a compact index, counting observed
//! barcodes, persisting those counts, and correcting sequencing errors in barcodes using
//! the counts as priors.

pub mod codec;
pub mod corrector;
pub mod dictionary;
pub mod format;
pub mod io_utils;
pub mod whitelist;

pub use codec::PackedBarcode;
pub use corrector::{BarcodeCorrection, BarcodeCorrector, CorrectBarcode, Posterior};
pub use dictionary::{BarcodeDictionary, BarcodeEntry, ShardedCounter};
pub use format::DictionaryFileError;
pub use whitelist::WhitelistError;

/// The barcode length. Barcodes occupy the first `BC_LEN` bases of read 1.
pub const BC_LEN: usize = 16;
