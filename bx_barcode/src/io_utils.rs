use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const GZ_BUF_SIZE: usize = 1 << 20;

fn is_gz(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Open a (possibly gzipped) file into a BufReader.
pub fn open_with_gz(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let f = File::open(path)
        .with_context(|| format!("While opening file for reading: {}", path.display()))?;
    if is_gz(path) {
        Ok(Box::new(BufReader::with_capacity(
            GZ_BUF_SIZE,
            MultiGzDecoder::new(f),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(32 * 1024, f)))
    }
}

/// A plain or gzip compressed output file. Call `finish` to flush and complete the
/// gzip stream; errors on drop are ignored.
pub enum OutputFile {
    Plain(BufWriter<File>),
    Gz(GzEncoder<BufWriter<File>>),
}

impl OutputFile {
    pub fn finish(self) -> io::Result<()> {
        match self {
            OutputFile::Plain(mut w) => w.flush(),
            OutputFile::Gz(w) => w.finish()?.flush(),
        }
    }
}

impl Write for OutputFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputFile::Plain(w) => w.write(buf),
            OutputFile::Gz(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputFile::Plain(w) => w.flush(),
            OutputFile::Gz(w) => w.flush(),
        }
    }
}

/// Create a file for writing, gzip compressed if the path ends in `.gz`.
pub fn create_with_gz(path: &Path) -> Result<OutputFile> {
    let f = File::create(path)
        .with_context(|| format!("While creating file: {}", path.display()))?;
    let w = BufWriter::with_capacity(GZ_BUF_SIZE, f);
    if is_gz(path) {
        Ok(OutputFile::Gz(GzEncoder::new(w, Compression::default())))
    } else {
        Ok(OutputFile::Plain(w))
    }
}
