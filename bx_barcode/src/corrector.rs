//!
//! Corrects sequencing errors in barcodes, considering up to two substitutions.
//!
use crate::codec::{is_acgt, PackedBarcode, BASE_OPTS};
use crate::dictionary::BarcodeDictionary;
use crate::BC_LEN;
use serde::{Deserialize, Serialize};

/// Offset of the Illumina (Phred+33) quality encoding.
pub const ILLUMINA_QUAL_OFFSET: u8 = 33;
/// Qualities above this are treated as this when estimating error probabilities.
const MAX_EDIT_QV: f64 = 33.0;
/// Floor on the quality of each base altered in a two-substitution candidate.
const MIN_DOUBLE_EDIT_QV: f64 = 3.0;

pub const BARCODE_CONFIDENCE_THRESHOLD: f64 = 0.975;

/// The outcome of checking a raw barcode against the whitelist.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BarcodeCorrection {
    /// The barcode is whitelisted as observed.
    Exact(PackedBarcode),
    /// The barcode was corrected onto this whitelist barcode.
    Corrected(PackedBarcode),
    /// No whitelist barcode could be assigned with enough confidence.
    Uncorrectable,
}

impl BarcodeCorrection {
    pub fn is_valid(self) -> bool {
        !matches!(self, BarcodeCorrection::Uncorrectable)
    }

    pub fn barcode(self) -> Option<PackedBarcode> {
        match self {
            BarcodeCorrection::Exact(bc) | BarcodeCorrection::Corrected(bc) => Some(bc),
            BarcodeCorrection::Uncorrectable => None,
        }
    }
}

/// Probability that a base with Phred quality `qv` is a sequencing error.
#[inline]
pub fn error_probability(qv: f64) -> f64 {
    10_f64.powf(-qv / 10.0)
}

/// Implement barcode correction against a whitelist dictionary whose priors are computed.
pub struct BarcodeCorrector {
    dict: BarcodeDictionary,
    strategy: Box<dyn CorrectBarcode + Send + Sync>,
}

impl BarcodeCorrector {
    /// Take ownership of a dictionary holding the counts of a counting pass and compute
    /// its priors. The dictionary is read-only from here on.
    pub fn new<S>(mut dict: BarcodeDictionary, strategy: S) -> Self
    where
        S: CorrectBarcode + Send + Sync + 'static,
    {
        dict.compute_priors();
        BarcodeCorrector {
            dict,
            strategy: Box::new(strategy),
        }
    }

    /// Check `barcode` against the whitelist, correcting it if possible.
    /// `qual` holds the Phred+33 qualities of the barcode bases.
    pub fn correct_barcode(&self, barcode: &[u8], qual: &[u8]) -> BarcodeCorrection {
        self.strategy.correct_barcode(&self.dict, barcode, qual)
    }
}

pub trait CorrectBarcode {
    fn correct_barcode(
        &self,
        dict: &BarcodeDictionary,
        barcode: &[u8],
        qual: &[u8],
    ) -> BarcodeCorrection;
}

/// Compute a posterior distribution over whitelist barcodes given:
/// # A prior distribution over whitelist barcodes, from the dictionary counts
/// # The likelihood of the observed sequence given a whitelist barcode, from the
///   sequencer reported quality values at the substituted positions.
///
/// If the observed barcode is not whitelisted, candidates are its whitelisted single
/// substitutions. If it is whitelisted, candidates are the barcode itself, weighted by its
/// prior alone, and its whitelisted double substitutions, so a much more abundant
/// neighbour can still claim a whitelisted read. The best candidate is accepted if its
/// posterior probability exceeds `bc_confidence_threshold`.
pub struct Posterior {
    bc_confidence_threshold: f64,
}

impl Posterior {
    pub fn new(bc_confidence_threshold: f64) -> Self {
        Posterior {
            bc_confidence_threshold,
        }
    }
}

impl Default for Posterior {
    fn default() -> Self {
        Posterior::new(BARCODE_CONFIDENCE_THRESHOLD)
    }
}

impl CorrectBarcode for Posterior {
    fn correct_barcode(
        &self,
        dict: &BarcodeDictionary,
        barcode: &[u8],
        qual: &[u8],
    ) -> BarcodeCorrection {
        let (Some(barcode), Some(qual)) = (barcode.get(..BC_LEN), qual.get(..BC_LEN)) else {
            return BarcodeCorrection::Uncorrectable;
        };
        let mut a = [0u8; BC_LEN];
        a.copy_from_slice(barcode);
        a.make_ascii_uppercase();
        let mut qvs = [0u8; BC_LEN];
        for (qv, &q) in qvs.iter_mut().zip(qual) {
            *qv = q.saturating_sub(ILLUMINA_QUAL_OFFSET);
        }

        let n_ambiguous = a.iter().filter(|&&b| !is_acgt(b)).count();
        let exact = if n_ambiguous == 0 {
            let bc = PackedBarcode::encode(&a);
            dict.lookup(bc).map(|entry| (bc, entry.prior))
        } else {
            None
        };

        let mut candidates: Vec<(f64, PackedBarcode)> = Vec::new();
        match exact {
            None if n_ambiguous > 1 => return BarcodeCorrection::Uncorrectable,
            None => {
                for pos in 0..BC_LEN {
                    let existing = a[pos];
                    if n_ambiguous > 0 && is_acgt(existing) {
                        continue;
                    }
                    let prob_edit = error_probability(f64::from(qvs[pos]).min(MAX_EDIT_QV));
                    for val in BASE_OPTS {
                        if val == existing {
                            continue;
                        }
                        a[pos] = val;
                        let trial_bc = PackedBarcode::encode(&a);
                        if let Some(entry) = dict.lookup(trial_bc) {
                            candidates.push((entry.prior * prob_edit, trial_bc));
                        }
                    }
                    a[pos] = existing;
                }
            }
            Some((bc, prior)) => {
                candidates.push((prior, bc));
                let double_edit_prob = |pos: usize| {
                    let qv = (f64::from(qvs[pos]) - 1.0).max(MIN_DOUBLE_EDIT_QV);
                    error_probability(qv.min(MAX_EDIT_QV))
                };
                for pos1 in 0..BC_LEN {
                    let existing1 = a[pos1];
                    for val1 in BASE_OPTS.into_iter().filter(|&v| v != existing1) {
                        a[pos1] = val1;
                        for pos2 in pos1 + 1..BC_LEN {
                            let existing2 = a[pos2];
                            let prob_edit = double_edit_prob(pos1) * double_edit_prob(pos2);
                            for val2 in BASE_OPTS.into_iter().filter(|&v| v != existing2) {
                                a[pos2] = val2;
                                let trial_bc = PackedBarcode::encode(&a);
                                if let Some(entry) = dict.lookup(trial_bc) {
                                    candidates.push((entry.prior * prob_edit, trial_bc));
                                }
                            }
                            a[pos2] = existing2;
                        }
                    }
                    a[pos1] = existing1;
                }
            }
        }

        let Some(&(best_prob, best_bc)) = candidates
            .iter()
            .reduce(|best, cand| if cand.0 > best.0 { cand } else { best })
        else {
            return BarcodeCorrection::Uncorrectable;
        };
        let total: f64 = candidates.iter().map(|&(p, _)| p).sum();

        if best_prob / total > self.bc_confidence_threshold {
            match exact {
                Some((bc, _)) if bc == best_bc => BarcodeCorrection::Exact(best_bc),
                _ => BarcodeCorrection::Corrected(best_bc),
            }
        } else {
            BarcodeCorrection::Uncorrectable
        }
    }
}
