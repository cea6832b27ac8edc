//! On-disk layout shared by every backend.
//!
//! A saved search is a directory holding:
//! - `config.json`: the configuration record plus entry count (human-readable)
//! - `index.bin`: `[bincode payload][magic "SDX1"][crc32: u32 BE]`
//!
//! A saved store is a directory holding `store.json`.
//! Files are written to a temp sibling and renamed into place.

use crate::config::ConfigRecord;
use crate::error::{Result, SimilarityError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const INDEX_FILE: &str = "index.bin";
pub const CONFIG_FILE: &str = "config.json";
pub const STORE_FILE: &str = "store.json";

/// Magic bytes written before the CRC32 footer.
const INDEX_CRC_MAGIC: &[u8; 4] = b"SDX1";
const FOOTER_LEN: usize = 8;

/// Human-readable description of a saved search, written beside the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub config: ConfigRecord,
    pub count: usize,
}

/// Encode data to bincode bytes.
pub fn to_bincode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| SimilarityError::Serialization(e.to_string()))
}

/// Decode data from bincode bytes.
pub fn from_bincode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| SimilarityError::Serialization(e.to_string()))
}

/// Encode data to pretty JSON bytes.
pub fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| SimilarityError::Serialization(e.to_string()))
}

/// Decode data from JSON bytes.
pub fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| SimilarityError::Serialization(e.to_string()))
}

/// Write `bytes` to `path` through a temp file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes).map_err(|e| SimilarityError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| SimilarityError::io(path, e))
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| SimilarityError::io(path, e))
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| SimilarityError::io(dir, e))
}

/// Save a search payload and its manifest under `dir`.
pub fn save_index<T: Serialize>(dir: &Path, manifest: &Manifest, payload: &T) -> Result<()> {
    create_dir(dir)?;

    let bytes = to_bincode(payload)?;
    let crc = crc32fast::hash(&bytes);
    let mut output = Vec::with_capacity(bytes.len() + FOOTER_LEN);
    output.extend_from_slice(&bytes);
    output.extend_from_slice(INDEX_CRC_MAGIC);
    output.extend_from_slice(&crc.to_be_bytes());

    write_atomic(&dir.join(INDEX_FILE), &output)?;
    write_atomic(&dir.join(CONFIG_FILE), &to_json(manifest)?)?;

    tracing::debug!(
        "Wrote {} ({} bytes, CRC32={:#010x})",
        dir.join(INDEX_FILE).display(),
        bytes.len(),
        crc
    );
    Ok(())
}

/// Read the manifest of a saved search.
pub fn read_manifest(dir: &Path) -> Result<Manifest> {
    from_json(&read(&dir.join(CONFIG_FILE))?)
}

/// Load and verify a search payload saved with [`save_index`].
pub fn load_index<T: DeserializeOwned>(dir: &Path) -> Result<(Manifest, T)> {
    let manifest = read_manifest(dir)?;
    let path = dir.join(INDEX_FILE);
    let data = read(&path)?;

    if data.len() < FOOTER_LEN || &data[data.len() - FOOTER_LEN..data.len() - 4] != INDEX_CRC_MAGIC
    {
        return Err(SimilarityError::Corrupted {
            path,
            reason: "missing checksum footer".to_string(),
        });
    }

    let (payload, footer) = data.split_at(data.len() - FOOTER_LEN);
    let stored_crc = u32::from_be_bytes([footer[4], footer[5], footer[6], footer[7]]);
    let actual_crc = crc32fast::hash(payload);
    if stored_crc != actual_crc {
        return Err(SimilarityError::Corrupted {
            path,
            reason: format!(
                "CRC32 mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, actual_crc
            ),
        });
    }

    Ok((manifest, from_bincode(payload)?))
}

/// Save a store snapshot as JSON under `dir`.
pub fn save_store<T: Serialize>(dir: &Path, snapshot: &T) -> Result<()> {
    create_dir(dir)?;
    write_atomic(&dir.join(STORE_FILE), &to_json(snapshot)?)
}

/// Load a store snapshot saved with [`save_store`].
pub fn load_store<T: DeserializeOwned>(dir: &Path) -> Result<T> {
    from_json(&read(&dir.join(STORE_FILE))?)
}
