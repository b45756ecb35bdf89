//! On-disk representation of the store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Location, Result, StoreError};

/// Serialized form of the whole table.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    files: BTreeMap<String, Location>,
}

/// Read the table from `path`.
///
/// An empty file is an empty table.
pub fn load(path: &Path) -> Result<BTreeMap<String, Location>> {
    let content = std::fs::read_to_string(path).map_err(|source| persistence(path, source))?;
    let parsed: StoreFile = toml::from_str(&content).map_err(|e| StoreError::Format {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;
    Ok(parsed.files)
}

/// Write the table to `path`.
///
/// The content goes to a sibling temporary file first and is then renamed
/// over `path`, so readers never observe a half-written table.
pub fn save(path: &Path, files: &BTreeMap<String, Location>) -> Result<()> {
    let content = encode(files).map_err(|detail| StoreError::Format {
        path: path.display().to_string(),
        detail,
    })?;

    let tmp = temp_path(path);
    std::fs::write(&tmp, content).map_err(|source| persistence(&tmp, source))?;
    std::fs::rename(&tmp, path).map_err(|source| persistence(path, source))?;
    Ok(())
}

fn encode(files: &BTreeMap<String, Location>) -> std::result::Result<String, String> {
    let doc = StoreFile {
        files: files.clone(),
    };
    toml::to_string(&doc).map_err(|e| e.to_string())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn persistence(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Persistence {
        path: path.display().to_string(),
        source,
    }
}
