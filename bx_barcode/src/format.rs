//! Reading/Writing the barcode dictionary file, which carries the per-barcode counts of a
//! counting pass over to a correction pass.
//!
//! All integers are little endian. The file format is as follows
//! ```text
//!
//! +-----------+-----------+
//! | Magic     | Version   |
//! | "BXWL"    | [4 bytes] |
//! +-----------+-----------+
//!
//! +--------------------------------------+
//! | Jump table, 2^24 entries             |
//! | [4 bytes each]                       |
//! +--------------------------------------+
//!
//! +-------------------------+
//! | Number of entries(k)    |
//! |       [8 bytes]         |
//! +-------------------------+
//!
//! +------------+------------+
//! | Code 0     | Count 0    |
//! | [4 bytes]  | [4 bytes]  |
//! +------------+------------+
//! ...
//! +------------+------------+
//! | Code k-1   | Count k-1  |
//! | [4 bytes]  | [4 bytes]  |
//! +------------+------------+
//! ```
//! Priors are not stored and must be recomputed after loading.

use crate::codec::PackedBarcode;
use crate::dictionary::{build_jump_table, BarcodeDictionary, BarcodeEntry, JUMP_TABLE_SIZE};
use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const DICTIONARY_MAGIC: [u8; 4] = *b"BXWL";
pub const DICTIONARY_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum DictionaryFileError {
    #[error("not a barcode dictionary file (found magic bytes {found:?})")]
    BadMagic { found: [u8; 4] },

    #[error("unsupported barcode dictionary version {found}, expected {DICTIONARY_VERSION}")]
    UnsupportedVersion { found: u32 },

    #[error("barcode dictionary file is truncated while reading the {section}")]
    Truncated { section: &'static str },

    #[error("barcode dictionary entries are not strictly ascending at entry {index}")]
    UnsortedEntries { index: usize },

    #[error("barcode dictionary jump table is inconsistent with its entries at bucket {bucket}")]
    JumpTableMismatch { bucket: usize },

    #[error("barcode dictionary declares {size} entries, which the jump table cannot address")]
    TooManyEntries { size: u64 },

    #[error("unexpected trailing data after the last barcode dictionary entry")]
    TrailingData,

    #[error(transparent)]
    Io(io::Error),
}

/// Tag an `UnexpectedEof` with the section being read.
fn truncated(section: &'static str) -> impl FnOnce(io::Error) -> DictionaryFileError {
    move |e| match e.kind() {
        io::ErrorKind::UnexpectedEof => DictionaryFileError::Truncated { section },
        _ => DictionaryFileError::Io(e),
    }
}

impl BarcodeDictionary {
    /// Write the dictionary, including its counts, to `writer`.
    pub fn serialize_into<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&DICTIONARY_MAGIC)?;
        writer.write_u32::<LittleEndian>(DICTIONARY_VERSION)?;
        for &j in self.jump_table() {
            writer.write_u32::<LittleEndian>(j)?;
        }
        writer.write_u64::<LittleEndian>(self.len() as u64)?;
        for entry in self.entries() {
            writer.write_u32::<LittleEndian>(entry.barcode.code())?;
            writer.write_u32::<LittleEndian>(entry.count)?;
        }
        Ok(())
    }

    /// Read a dictionary written by `serialize_into`. Priors are left unset and the
    /// unfound counter starts at zero.
    pub fn deserialize_from<R: Read>(reader: &mut R) -> Result<Self, DictionaryFileError> {
        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(truncated("header"))?;
        if magic != DICTIONARY_MAGIC {
            return Err(DictionaryFileError::BadMagic { found: magic });
        }
        let version = reader
            .read_u32::<LittleEndian>()
            .map_err(truncated("header"))?;
        if version != DICTIONARY_VERSION {
            return Err(DictionaryFileError::UnsupportedVersion { found: version });
        }

        let mut jump = vec![0u32; JUMP_TABLE_SIZE];
        reader
            .read_u32_into::<LittleEndian>(&mut jump)
            .map_err(truncated("jump table"))?;

        let size = reader
            .read_u64::<LittleEndian>()
            .map_err(truncated("entry count"))?;
        if size > u64::from(u32::MAX) {
            return Err(DictionaryFileError::TooManyEntries { size });
        }

        // A corrupt size must not force a huge up-front allocation.
        let mut entries = Vec::with_capacity((size as usize).min(1 << 20));
        for index in 0..size as usize {
            let code = reader
                .read_u32::<LittleEndian>()
                .map_err(truncated("entries"))?;
            let count = reader
                .read_u32::<LittleEndian>()
                .map_err(truncated("entries"))?;
            let barcode = PackedBarcode::from_code(code);
            if let Some(prev) = entries.last().map(|e: &BarcodeEntry| e.barcode) {
                if prev >= barcode {
                    return Err(DictionaryFileError::UnsortedEntries { index });
                }
            }
            entries.push(BarcodeEntry {
                barcode,
                count,
                prior: 0.0,
            });
        }

        let mut rest = [0u8; 1];
        match reader.read(&mut rest) {
            Ok(0) => {}
            Ok(_) => return Err(DictionaryFileError::TrailingData),
            Err(e) => return Err(DictionaryFileError::Io(e)),
        }

        let expected = build_jump_table(&entries);
        if let Some(bucket) = expected.iter().zip(&jump).position(|(a, b)| a != b) {
            return Err(DictionaryFileError::JumpTableMismatch { bucket });
        }
        Ok(BarcodeDictionary::from_parts(expected, entries))
    }

    /// Serialize the dictionary to a file at `path`.
    pub fn write_to_path(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(
            File::create(path)
                .with_context(|| format!("While creating file: {}", path.display()))?,
        );
        self.serialize_into(&mut writer)
            .and_then(|()| writer.flush())
            .with_context(|| format!("While writing barcode dictionary: {}", path.display()))?;
        Ok(())
    }

    /// Load a dictionary serialized with `write_to_path`.
    pub fn read_from_path(path: &Path) -> Result<Self> {
        let mut reader =
            BufReader::new(File::open(path).with_context(|| {
                format!("While opening file for reading: {}", path.display())
            })?);
        Self::deserialize_from(&mut reader)
            .with_context(|| format!("While reading barcode dictionary: {}", path.display()))
    }
}
