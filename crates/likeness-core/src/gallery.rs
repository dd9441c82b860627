//! Identity gallery: named reference embeddings cached from a [`FaceStore`].
//!
//! Names and embeddings live in two parallel sequences; index `i` of one
//! always pairs with index `i` of the other. Every mutation writes the store
//! first and only touches memory once the write succeeded, so a failed store
//! operation leaves the in-memory view as it was.

use crate::extractor::EMBEDDING_DIM;
use crate::store::{FaceStore, StoreError};
use crate::types::Embedding;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("identity name must not be empty")]
    EmptyName,
    #[error("embedding has {actual} values, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding value {value} at index {index} is outside [0, 1]")]
    InvalidEmbedding { index: usize, value: f32 },
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// In-memory view of the enrolled identities, written through to `S`.
pub struct Gallery<S: FaceStore> {
    store: S,
    names: Vec<String>,
    embeddings: Vec<Embedding>,
}

impl<S: FaceStore> Gallery<S> {
    /// Build the gallery from every row in the store.
    pub fn load(store: S) -> Result<Self, GalleryError> {
        let mut gallery = Self {
            store,
            names: Vec::new(),
            embeddings: Vec::new(),
        };
        gallery.rebuild_from_store()?;
        Ok(gallery)
    }

    /// Replace the in-memory state with a fresh read of the store.
    ///
    /// On failure the previous state is kept.
    pub fn rebuild_from_store(&mut self) -> Result<(), GalleryError> {
        let rows = self.store.select_all()?;

        let mut names = Vec::with_capacity(rows.len());
        let mut embeddings = Vec::with_capacity(rows.len());
        for row in rows {
            if row.embedding.len() != EMBEDDING_DIM {
                return Err(StoreError::CorruptEmbedding {
                    reason: format!(
                        "expected {EMBEDDING_DIM} values, got {}",
                        row.embedding.len()
                    ),
                    name: row.name,
                }
                .into());
            }
            names.push(row.name);
            embeddings.push(row.embedding);
        }

        self.names = names;
        self.embeddings = embeddings;
        tracing::info!(records = self.names.len(), "gallery loaded");
        Ok(())
    }

    /// Enroll one more reference embedding under `name`.
    ///
    /// The name is trimmed; repeated names are kept as additional records.
    pub fn add(&mut self, name: &str, embedding: Embedding) -> Result<(), GalleryError> {
        let name = validate_name(name)?;
        if embedding.len() != EMBEDDING_DIM {
            return Err(GalleryError::DimensionMismatch {
                expected: EMBEDDING_DIM,
                actual: embedding.len(),
            });
        }
        // NaN fails the range check as well.
        if let Some((index, &value)) = embedding
            .values
            .iter()
            .enumerate()
            .find(|(_, v)| !(0.0..=1.0).contains(*v))
        {
            return Err(GalleryError::InvalidEmbedding { index, value });
        }

        self.store.insert(name, &embedding)?;
        self.names.push(name.to_string());
        self.embeddings.push(embedding);

        tracing::info!(name, records = self.names.len(), "identity added");
        Ok(())
    }

    /// Remove every record named `name`, trimmed the same way `add` trims.
    ///
    /// Returns the number of records removed; an absent name is a no-op.
    pub fn remove_by_name(&mut self, name: &str) -> Result<usize, GalleryError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(0);
        }
        let deleted = self.store.delete_by_name(name)?;

        let before = self.names.len();
        // `retain` visits elements in order, so `paired` stays in step with it.
        let mut paired = self.names.iter();
        self.embeddings
            .retain(|_| paired.next().is_some_and(|n| n != name));
        self.names.retain(|n| n != name);
        let removed = before - self.names.len();

        if removed != deleted {
            tracing::warn!(
                name,
                removed,
                deleted,
                "gallery and store disagreed on record count"
            );
        }
        if removed == 0 {
            tracing::debug!(name, "remove: no such identity");
        } else {
            tracing::info!(name, removed, "identity removed");
        }
        Ok(removed)
    }

    /// Delete every record from the store and from memory.
    pub fn clear(&mut self) -> Result<(), GalleryError> {
        let deleted = self.store.delete_all()?;
        self.names.clear();
        self.embeddings.clear();
        tracing::info!(deleted, "gallery cleared");
        Ok(())
    }

    /// Identity names in gallery order, duplicates included.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterate `(name, embedding)` records in gallery order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Embedding)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.embeddings.iter())
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

/// Trim `name` and reject it if nothing remains.
pub(crate) fn validate_name(name: &str) -> Result<&str, GalleryError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err(GalleryError::EmptyName)
    } else {
        Ok(trimmed)
    }
}
