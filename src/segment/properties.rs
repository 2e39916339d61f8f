//! `segment.properties`: the segment's durable root.
//!
//! The file names the live base generation, the registered overflow files
//! in replay order, and a few counters. It is rewritten whole through a
//! temp file and a rename, so a reader sees either the old or the new
//! version. Anything in the segment directory it does not reference is an
//! orphan.
//!
//! ```text
//! [version u32][generation u64][key_count u64][delta_files Vec<u64>]
//! [next_delta_no u64][flushes u64][compactions u64][crc32 u32]
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use crc32fast::Hasher as Crc32;
use tracing::{debug, warn};

use super::SegmentError;
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::fsutil;

pub const PROPERTIES_FILENAME: &str = "segment.properties";
const PROPERTIES_VERSION: u32 = 1;

pub fn run_file(generation: u64) -> String {
    format!("v{generation:06}.run")
}

pub fn sparse_file(generation: u64) -> String {
    format!("v{generation:06}.sparse")
}

pub fn bloom_file(generation: u64) -> String {
    format!("v{generation:06}.bloom")
}

pub fn delta_file(number: u64) -> String {
    format!("delta-{number:06}.run")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentProperties {
    /// Live base generation; 0 means no base run has been written yet.
    pub generation: u64,
    /// Keys in the live base run.
    pub key_count: u64,
    /// Registered overflow file numbers, oldest first.
    pub delta_files: Vec<u64>,
    pub next_delta_no: u64,
    pub flushes: u64,
    pub compactions: u64,
}

impl Encode for SegmentProperties {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        PROPERTIES_VERSION.encode_to(buf)?;
        self.generation.encode_to(buf)?;
        self.key_count.encode_to(buf)?;
        encoding::encode_vec(&self.delta_files, buf)?;
        self.next_delta_no.encode_to(buf)?;
        self.flushes.encode_to(buf)?;
        self.compactions.encode_to(buf)
    }
}

impl Decode for SegmentProperties {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (version, mut offset) = u32::decode_from(buf)?;
        if version != PROPERTIES_VERSION {
            return Err(EncodingError::InvalidTag {
                tag: version,
                type_name: "SegmentProperties version",
            });
        }
        let (generation, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (key_count, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (delta_files, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
        offset += n;
        let (next_delta_no, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (flushes, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (compactions, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                generation,
                key_count,
                delta_files,
                next_delta_no,
                flushes,
                compactions,
            },
            offset,
        ))
    }
}

impl SegmentProperties {
    /// Reads the properties in `dir`; `None` for a fresh segment.
    pub fn load(dir: &Path) -> Result<Option<Self>, SegmentError> {
        let path = dir.join(PROPERTIES_FILENAME);
        let buf = match fs::read(&path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let corruption = |reason: String| {
            warn!(path = %path.display(), %reason, "segment properties corrupted");
            SegmentError::Corruption {
                path: path.clone(),
                reason,
            }
        };

        let (props, used) =
            Self::decode_from(&buf).map_err(|e| corruption(e.to_string()))?;
        let (stored, _) = u32::decode_from(&buf[used..]).map_err(|e| corruption(e.to_string()))?;
        let mut hasher = Crc32::new();
        hasher.update(&buf[..used]);
        let computed = hasher.finalize();
        if stored != computed {
            return Err(corruption(format!(
                "checksum mismatch (stored 0x{stored:08X}, computed 0x{computed:08X})"
            )));
        }
        Ok(Some(props))
    }

    /// Atomically replaces the properties file in `dir`.
    pub fn store(&self, dir: &Path) -> Result<(), SegmentError> {
        let mut buf = encoding::encode_to_vec(self)?;
        let mut hasher = Crc32::new();
        hasher.update(&buf);
        hasher.finalize().encode_to(&mut buf)?;
        fsutil::write_atomic(&dir.join(PROPERTIES_FILENAME), &buf)?;
        debug!(
            dir = %dir.display(),
            generation = self.generation,
            delta_files = self.delta_files.len(),
            "segment properties stored"
        );
        Ok(())
    }

    /// File names the segment directory must keep.
    pub fn referenced_files(&self) -> BTreeSet<String> {
        let mut files = BTreeSet::from([PROPERTIES_FILENAME.to_string()]);
        if self.generation > 0 {
            files.insert(run_file(self.generation));
            files.insert(sparse_file(self.generation));
            files.insert(bloom_file(self.generation));
        }
        files.extend(self.delta_files.iter().map(|n| delta_file(*n)));
        files
    }
}
