//! Counting pass: tally whitelist barcode observations over read 1 FASTQs and persist them.

use crate::fastq::FastqChunks;
use crate::params::PreprocessParams;
use crate::summary::CountSummary;
use anyhow::{Context, Result};
use bx_barcode::{BarcodeDictionary, ShardedCounter};
use log::{info, warn};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct CountBarcodes<'a> {
    pub whitelist: &'a Path,
    pub reads: &'a [PathBuf],
    pub output: &'a Path,
}

impl CountBarcodes<'_> {
    /// Count into a fresh dictionary built from the whitelist and write it to `output`.
    /// All inputs are opened and the output created before any read is processed.
    pub fn run(&self, params: &PreprocessParams) -> Result<CountSummary> {
        let dict = BarcodeDictionary::from_whitelist(self.whitelist)?;
        let inputs = self
            .reads
            .iter()
            .map(|path| FastqChunks::open(path))
            .collect::<Result<Vec<_>>>()?;
        let writer = BufWriter::new(File::create(self.output).with_context(|| {
            format!("While creating file: {}", self.output.display())
        })?);

        match self.count_and_write(dict, inputs, writer, params) {
            Ok(summary) => {
                info!(
                    "Counted {} whitelisted and {} unfound barcodes in {} reads; wrote {}",
                    summary.whitelisted_reads,
                    summary.unfound_reads,
                    summary.total_reads,
                    self.output.display()
                );
                Ok(summary)
            }
            Err(err) => {
                // A partial dictionary file must not outlive a failed run.
                if let Err(e) = std::fs::remove_file(self.output) {
                    warn!("Could not remove {}: {e}", self.output.display());
                }
                Err(err)
            }
        }
    }

    fn count_and_write(
        &self,
        mut dict: BarcodeDictionary,
        inputs: Vec<FastqChunks>,
        mut writer: BufWriter<File>,
        params: &PreprocessParams,
    ) -> Result<CountSummary> {
        let mut summary = count_into(&mut dict, inputs, params)?;
        summary.whitelist_size = dict.len();
        dict.serialize_into(&mut writer)
            .and_then(|()| writer.flush())
            .with_context(|| {
                format!("While writing barcode dictionary: {}", self.output.display())
            })?;
        Ok(summary)
    }
}

/// Add the barcode observations of every read in `inputs` to `dict`.
pub fn count_into(
    dict: &mut BarcodeDictionary,
    inputs: Vec<FastqChunks>,
    params: &PreprocessParams,
) -> Result<CountSummary> {
    let mut summary = CountSummary::default();
    let counter = ShardedCounter::new(dict, params.n_shards);
    for mut input in inputs {
        info!("Counting barcodes in {}", input.path().display());
        loop {
            let chunk = input.next_chunk(params.chunk_size)?;
            if chunk.is_empty() {
                break;
            }
            let skipped = chunk
                .par_iter()
                .filter(|rec| counter.observe_read(rec.seq()).is_none())
                .count();
            summary.total_reads += chunk.len() as u64;
            summary.skipped_reads += skipped as u64;
        }
    }
    let (counts, unfound) = counter.finish();
    let whitelisted_before = dict.total_count();
    let unfound_before = dict.unfound();
    dict.add_counts(&counts, unfound);
    summary.whitelisted_reads = dict.total_count() - whitelisted_before;
    summary.unfound_reads = dict.unfound() - unfound_before;
    Ok(summary)
}
