//! Dataset mirror: one `.npy` file per enrolled name for external inspection.
//!
//! Writes here are best-effort. Callers log failures and carry on; the
//! gallery stays authoritative.

use crate::types::Embedding;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const NPY_VERSION: [u8; 2] = [1, 0];
const NPY_ALIGN: usize = 64;
const MIRROR_EXT: &str = "npy";

pub struct DatasetMirror {
    dir: PathBuf,
}

impl DatasetMirror {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Artifact path for `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{MIRROR_EXT}", sanitize_file_stem(name)))
    }

    /// Write `embedding` as `<name>.npy`, replacing an earlier artifact.
    pub fn write(&self, name: &str, embedding: &Embedding) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(name);
        fs::write(&path, encode_npy(&embedding.values))?;
        Ok(path)
    }

    /// Remove the artifact for `name`. Returns whether a file was removed.
    pub fn remove(&self, name: &str) -> io::Result<bool> {
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete every `.npy` artifact in the directory.
    ///
    /// Files that cannot be removed are skipped. Returns the number removed.
    pub fn purge(&self) -> io::Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == MIRROR_EXT) {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "could not remove mirror file")
                    }
                }
            }
        }
        Ok(removed)
    }
}

/// Map a name to a safe file stem: path separators, control characters and
/// leading dots become `_`.
fn sanitize_file_stem(name: &str) -> String {
    let mut stem: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if stem.starts_with('.') {
        stem.replace_range(..1, "_");
    }
    if stem.is_empty() {
        stem.push('_');
    }
    stem
}

/// Serialize a 1-D `f32` array in NumPy `.npy` v1.0 format.
fn encode_npy(values: &[f32]) -> Vec<u8> {
    let dict = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({},), }}",
        values.len()
    );
    // magic + version + u16 header length
    let preamble = NPY_MAGIC.len() + NPY_VERSION.len() + 2;
    let unpadded = preamble + dict.len() + 1;
    let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    let header_len = dict.len() + padding + 1;

    let mut out = Vec::with_capacity(preamble + header_len + values.len() * 4);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&NPY_VERSION);
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat(b' ').take(padding));
    out.push(b'\n');
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}
