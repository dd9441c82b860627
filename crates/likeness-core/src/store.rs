//! Persistent face table.
//!
//! The gallery treats the store as the source of truth across restarts. Rows
//! are `(name, embedding)` pairs kept in insertion order; embeddings are
//! serialized as little-endian `f32` blobs.

use crate::extractor::EMBEDDING_DIM;
use crate::types::Embedding;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS faces (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    name      TEXT NOT NULL,
    embedding BLOB NOT NULL
)";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt embedding for '{name}': {reason}")]
    CorruptEmbedding { name: String, reason: String },
}

/// A decoded row of the face table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFace {
    pub name: String,
    pub embedding: Embedding,
}

/// Row storage backing an identity gallery.
///
/// Implementations must keep committed writes durable, enumerate every row
/// in a stable order and support delete-by-name.
pub trait FaceStore {
    fn insert(&mut self, name: &str, embedding: &Embedding) -> Result<(), StoreError>;
    fn select_all(&self) -> Result<Vec<StoredFace>, StoreError>;
    /// Delete every row with exactly this name, returning the number removed.
    fn delete_by_name(&mut self, name: &str) -> Result<usize, StoreError>;
    fn delete_all(&mut self) -> Result<usize, StoreError>;
}

/// SQLite-backed face table.
pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create the store at the given path, creating parent
    /// directories and the table on first use.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::debug!(path = %path.display(), "face store opened");

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a transient store that lives only as long as this handle.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn, path: None })
    }

    /// Backing file, `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl FaceStore for SqliteStore {
    fn insert(&mut self, name: &str, embedding: &Embedding) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO faces (name, embedding) VALUES (?1, ?2)",
            params![name, encode_embedding(embedding)],
        )?;
        Ok(())
    }

    fn select_all(&self) -> Result<Vec<StoredFace>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, embedding FROM faces ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(name, blob)| {
                let embedding = decode_embedding(&blob).map_err(|reason| {
                    StoreError::CorruptEmbedding {
                        name: name.clone(),
                        reason,
                    }
                })?;
                Ok(StoredFace { name, embedding })
            })
            .collect()
    }

    fn delete_by_name(&mut self, name: &str) -> Result<usize, StoreError> {
        Ok(self
            .conn
            .execute("DELETE FROM faces WHERE name = ?1", params![name])?)
    }

    fn delete_all(&mut self) -> Result<usize, StoreError> {
        Ok(self.conn.execute("DELETE FROM faces", [])?)
    }
}

fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(embedding.values.as_slice()));
    for &value in &embedding.values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(blob: &[u8]) -> Result<Embedding, String> {
    let expected_len = EMBEDDING_DIM * std::mem::size_of::<f32>();
    if blob.len() != expected_len {
        return Err(format!(
            "invalid embedding byte length: expected {expected_len}, got {}",
            blob.len()
        ));
    }

    let mut values = Vec::with_capacity(EMBEDDING_DIM);
    for chunk in blob.chunks_exact(4) {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if !value.is_finite() {
            return Err("embedding contains non-finite values".to_string());
        }
        values.push(value);
    }
    Ok(Embedding::new(values))
}
