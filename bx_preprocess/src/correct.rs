//! Correction pass: tag read pairs with their corrected barcode and strip the barcode from
//! read 1.
//!
//! Each kept pair is written as
//! ```text
//! @{id}\tBX:Z:{barcode}-{gem_group}\tCX:Z:{1|0}
//! ```
//! where `barcode` is the whitelist barcode if one was assigned (`CX:Z:1`) and the upper
//! cased observed barcode otherwise (`CX:Z:0`). Read 1 loses its first
//! `BC_LEN + barcode_trim` bases and read 2 is written whole.

use crate::fastq::{is_well_formed, FastqChunks};
use crate::params::PreprocessParams;
use crate::summary::CorrectSummary;
use anyhow::{Context, Result};
use bio::io::fastq;
use bx_barcode::io_utils::{create_with_gz, OutputFile};
use bx_barcode::{BarcodeCorrection, BarcodeCorrector, BarcodeDictionary, Posterior, BC_LEN};
use log::{info, warn};
use rayon::prelude::*;
use std::io::{self, Write};
use std::path::Path;

pub struct CorrectBarcodes<'a> {
    pub counts: &'a Path,
    pub read1: &'a Path,
    pub read2: &'a Path,
    pub out_read1: &'a Path,
    pub out_read2: &'a Path,
}

/// The barcode tags of a kept read pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BarcodeTag {
    pub barcode: [u8; BC_LEN],
    pub correction: BarcodeCorrection,
}

impl BarcodeTag {
    fn write_header<W: Write>(&self, w: &mut W, id: &str, gem_group: u16) -> io::Result<()> {
        write!(w, "@{id}\tBX:Z:")?;
        w.write_all(&self.barcode)?;
        writeln!(
            w,
            "-{gem_group}\tCX:Z:{}",
            u8::from(self.correction.is_valid())
        )
    }
}

/// Correct the barcode of a read pair, or None if the pair is too short to keep.
pub fn tag_read_pair(
    corrector: &BarcodeCorrector,
    params: &PreprocessParams,
    r1: &fastq::Record,
    r2: &fastq::Record,
) -> Option<BarcodeTag> {
    if !is_well_formed(r1) || !is_well_formed(r2) {
        return None;
    }
    if r1.seq().len() < params.min_read1_length() || r2.seq().len() < params.min_read_length {
        return None;
    }
    let correction = corrector.correct_barcode(&r1.seq()[..BC_LEN], &r1.qual()[..BC_LEN]);
    let barcode = match correction.barcode() {
        Some(bc) => bc.decode(),
        None => {
            let mut raw = [0u8; BC_LEN];
            raw.copy_from_slice(&r1.seq()[..BC_LEN]);
            raw.make_ascii_uppercase();
            raw
        }
    };
    Some(BarcodeTag {
        barcode,
        correction,
    })
}

fn write_record<W: Write>(
    w: &mut W,
    tag: &BarcodeTag,
    gem_group: u16,
    rec: &fastq::Record,
    skip: usize,
) -> io::Result<()> {
    tag.write_header(w, rec.id(), gem_group)?;
    w.write_all(&rec.seq()[skip..])?;
    w.write_all(b"\n+\n")?;
    w.write_all(&rec.qual()[skip..])?;
    w.write_all(b"\n")
}

impl CorrectBarcodes<'_> {
    /// All inputs are opened and both outputs created before the counts are loaded.
    pub fn run(&self, params: &PreprocessParams) -> Result<CorrectSummary> {
        let mut read1 = FastqChunks::open(self.read1)?;
        let mut read2 = FastqChunks::open(self.read2)?;
        let mut out1 = create_with_gz(self.out_read1)?;
        let mut out2 = create_with_gz(self.out_read2)?;

        let dict = BarcodeDictionary::read_from_path(self.counts)?;
        info!(
            "Loaded {} barcodes with {} total observations from {}",
            dict.len(),
            dict.total_count(),
            self.counts.display()
        );
        let corrector = BarcodeCorrector::new(dict, Posterior::new(params.confidence_threshold));

        let summary = correct_pairs(
            &corrector,
            params,
            &mut read1,
            &mut read2,
            &mut out1,
            &mut out2,
        )
        .with_context(|| {
            format!(
                "While writing corrected reads: {} and {}",
                self.out_read1.display(),
                self.out_read2.display()
            )
        })?;
        finish(out1, self.out_read1)?;
        finish(out2, self.out_read2)?;

        info!(
            "Wrote {} read pairs, {:.2}% with a valid barcode; skipped {} short pairs",
            summary.total_pairs - summary.skipped_pairs,
            100.0 * summary.valid_barcode_fraction(),
            summary.skipped_pairs
        );
        Ok(summary)
    }
}

fn finish(out: OutputFile, path: &Path) -> Result<()> {
    out.finish()
        .with_context(|| format!("While writing file: {}", path.display()))
}

/// Process pairs chunk by chunk until either input runs out. Corrections within a chunk
/// run in parallel and are written in input order.
pub fn correct_pairs<W: Write>(
    corrector: &BarcodeCorrector,
    params: &PreprocessParams,
    read1: &mut FastqChunks,
    read2: &mut FastqChunks,
    out1: &mut W,
    out2: &mut W,
) -> Result<CorrectSummary> {
    let mut summary = CorrectSummary::default();
    let r1_skip = BC_LEN + params.barcode_trim;
    loop {
        let chunk1 = read1.next_chunk(params.chunk_size)?;
        let chunk2 = read2.next_chunk(params.chunk_size)?;
        if chunk1.len() != chunk2.len() {
            let (short, long) = if chunk1.len() < chunk2.len() {
                (read1.path(), read2.path())
            } else {
                (read2.path(), read1.path())
            };
            warn!(
                "{} has fewer records than {}; ignoring the unpaired remainder",
                short.display(),
                long.display()
            );
        }
        let n_pairs = chunk1.len().min(chunk2.len());
        if n_pairs == 0 {
            break;
        }

        let tags: Vec<Option<BarcodeTag>> = chunk1[..n_pairs]
            .par_iter()
            .zip(&chunk2[..n_pairs])
            .map(|(r1, r2)| tag_read_pair(corrector, params, r1, r2))
            .collect();

        for ((r1, r2), tag) in chunk1.iter().zip(&chunk2).zip(&tags) {
            summary.total_pairs += 1;
            let Some(tag) = tag else {
                summary.skipped_pairs += 1;
                continue;
            };
            summary.observe(tag.correction);
            write_record(out1, tag, params.gem_group, r1, r1_skip)?;
            write_record(out2, tag, params.gem_group, r2, 0)?;
        }

        if n_pairs < params.chunk_size || chunk1.len() != chunk2.len() {
            break;
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bx_barcode::PackedBarcode;
    use pretty_assertions::assert_eq;

    const WHITELISTED: &[u8; 16] = b"AAAACCCCGGGGTTTT";

    fn corrector() -> BarcodeCorrector {
        let mut dict = BarcodeDictionary::build([PackedBarcode::encode(WHITELISTED)]);
        dict.add_counts(&[5], 0);
        BarcodeCorrector::new(dict, Posterior::default())
    }

    fn record(id: &str, seq: &[u8]) -> fastq::Record {
        fastq::Record::with_attrs(id, None, seq, &vec![b'I'; seq.len()])
    }

    fn read1(barcode: &[u8]) -> Vec<u8> {
        let mut seq = barcode.to_vec();
        seq.extend_from_slice(b"TTTTTTT");
        seq.extend_from_slice(b"ACGTACGTACGTACGTACGT");
        seq
    }

    #[test]
    fn test_tag_read_pair() {
        let corrector = corrector();
        let params = PreprocessParams::default();
        let r2 = record("r", b"GATTACAGATTACAGATTACA");

        let tag = tag_read_pair(&corrector, &params, &record("r", &read1(WHITELISTED)), &r2);
        assert_eq!(
            tag,
            Some(BarcodeTag {
                barcode: *WHITELISTED,
                correction: BarcodeCorrection::Exact(PackedBarcode::encode(WHITELISTED)),
            })
        );

        let tag =
            tag_read_pair(&corrector, &params, &record("r", &read1(b"AAAACCCCGGGGTTTA")), &r2)
                .unwrap();
        assert_eq!(tag.barcode, *WHITELISTED);
        assert!(matches!(tag.correction, BarcodeCorrection::Corrected(_)));

        let tag =
            tag_read_pair(&corrector, &params, &record("r", &read1(b"gggggggggggggggg")), &r2)
                .unwrap();
        assert_eq!(&tag.barcode, b"GGGGGGGGGGGGGGGG");
        assert_eq!(tag.correction, BarcodeCorrection::Uncorrectable);
    }

    #[test]
    fn test_short_pairs_are_skipped() {
        let corrector = corrector();
        let params = PreprocessParams::default();
        let r1 = record("r", &read1(WHITELISTED));
        let r2 = record("r", &[b'A'; 15]);
        assert!(tag_read_pair(&corrector, &params, &r1, &r2).is_some());

        let short_r2 = record("r", &[b'A'; 14]);
        assert!(tag_read_pair(&corrector, &params, &r1, &short_r2).is_none());

        let short_r1 = record("r", &read1(WHITELISTED)[..37]);
        assert!(tag_read_pair(&corrector, &params, &short_r1, &r2).is_none());

        let bad_qual = fastq::Record::with_attrs("r", None, &read1(WHITELISTED), b"II");
        assert!(tag_read_pair(&corrector, &params, &bad_qual, &r2).is_none());
    }

    #[test]
    fn test_write_record() {
        let tag = BarcodeTag {
            barcode: *WHITELISTED,
            correction: BarcodeCorrection::Uncorrectable,
        };
        let mut out = Vec::new();
        write_record(&mut out, &tag, 3, &record("frag/1", b"ACGTAC"), 2).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "@frag/1\tBX:Z:AAAACCCCGGGGTTTT-3\tCX:Z:0\nGTAC\n+\nIIII\n"
        );
    }
}
