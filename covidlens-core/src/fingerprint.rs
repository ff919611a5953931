//! Content fingerprints for run inputs, outputs and configuration.
//!
//! Two runs over the same input bytes with the same configuration produce
//! the same hashes, so a manifest identifies exactly what was analyzed.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::data::DataError;
use crate::domain::{DatasetHash, MergedTable};
use crate::export::write_merged_csv;

/// Hash of one input file, taken from the bytes a loader parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHash {
    pub path: PathBuf,
    pub blake3: DatasetHash,
}

/// Reader that feeds every byte it hands out into a BLAKE3 hasher.
pub struct HashingReader<R> {
    inner: R,
    hasher: blake3::Hasher,
}

impl HashingReader<File> {
    pub fn open(path: &Path, source_name: &str) -> Result<Self, DataError> {
        let file = File::open(path)
            .map_err(|e| DataError::unavailable(source_name, format!("{}: {e}", path.display())))?;
        Ok(Self::new(file))
    }
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
        }
    }

    /// Hash of the whole stream. Bytes the caller left unread are drained first.
    pub fn finish(mut self, source_name: &str) -> Result<DatasetHash, DataError> {
        io::copy(&mut self, &mut io::sink()).map_err(|e| DataError::unavailable(source_name, e.to_string()))?;
        Ok(DatasetHash::from_hasher(&self.hasher))
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// BLAKE3 of a file's bytes, streamed.
pub fn hash_file(path: &Path) -> Result<DatasetHash, DataError> {
    let source_name = path.display().to_string();
    HashingReader::open(path, &source_name)?.finish(&source_name)
}

/// Hash of the table's exported CSV form; equals `hash_file` of the exported file.
pub fn hash_table(table: &MergedTable) -> DatasetHash {
    let mut hasher = blake3::Hasher::new();
    // Writing into a hasher cannot fail.
    let _ = write_merged_csv(table, &mut hasher);
    DatasetHash::from_hasher(&hasher)
}

/// Hash of a value's canonical JSON form.
///
/// Struct fields serialize in declaration order and maps should be `BTreeMap`,
/// so the JSON and its hash are deterministic.
pub fn hash_json<T: Serialize>(value: &T) -> Result<DatasetHash, serde_json::Error> {
    Ok(DatasetHash::from_bytes(&serde_json::to_vec(value)?))
}
