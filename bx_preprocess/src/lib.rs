//! Two pass barcode preprocessing of paired FASTQs.
//!
//! The counting pass tallies whitelist barcodes over read 1 files and writes a barcode
//! dictionary. The correction pass loads that dictionary, corrects the barcode of every
//! read pair and writes tagged, barcode-stripped FASTQs.

pub mod correct;
pub mod count;
pub mod fastq;
pub mod params;
pub mod summary;

pub use correct::{BarcodeTag, CorrectBarcodes};
pub use count::CountBarcodes;
pub use params::PreprocessParams;
pub use summary::{CorrectSummary, CountSummary};
