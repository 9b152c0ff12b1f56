//! Chunked reading of plain or gzipped FASTQ files.

use anyhow::{Context, Result};
use bio::io::fastq;
use bx_barcode::io_utils::open_with_gz;
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// A FASTQ file opened for reading, remembering its path for error messages.
pub struct FastqChunks {
    path: PathBuf,
    records: fastq::Records<Box<dyn BufRead + Send>>,
}

impl FastqChunks {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = fastq::Reader::from_bufread(open_with_gz(path)?);
        Ok(FastqChunks {
            path: path.to_path_buf(),
            records: reader.records(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read up to `n` records. An empty chunk means the file is exhausted.
    pub fn next_chunk(&mut self, n: usize) -> Result<Vec<fastq::Record>> {
        let mut chunk = Vec::with_capacity(n.min(1 << 16));
        for rec in self.records.by_ref().take(n) {
            chunk.push(
                rec.with_context(|| format!("While reading FASTQ: {}", self.path.display()))?,
            );
        }
        Ok(chunk)
    }
}

/// True if the record carries one quality per base.
pub(crate) fn is_well_formed(rec: &fastq::Record) -> bool {
    rec.seq().len() == rec.qual().len()
}
