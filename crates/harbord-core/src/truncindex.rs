//! Prefix index over container identifiers.
//!
//! Resolves short-ID prefixes to full identifiers. Identifiers are kept in
//! an ordered set, so every identifier starting with a prefix lies in one
//! contiguous range beginning at the prefix itself.

use std::collections::BTreeSet;
use std::ops::Bound;

use parking_lot::Mutex;

/// Errors raised by the prefix index.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    /// Empty identifier or prefix.
    #[error("prefix can't be empty")]
    EmptyPrefix,

    /// Identifiers may not contain spaces.
    #[error("illegal character ' ' in id {0:?}")]
    IllegalChar(String),

    /// The identifier is already indexed.
    #[error("id already exists: {0}")]
    Duplicate(String),

    /// Nothing starts with the prefix.
    #[error("no such id: {0}")]
    NotFound(String),

    /// More than one identifier starts with the prefix.
    #[error("multiple ids match prefix {0}")]
    Ambiguous(String),
}

/// Thread-safe prefix index.
#[derive(Debug, Default)]
pub struct TruncIndex {
    ids: Mutex<BTreeSet<String>>,
}

impl TruncIndex {
    /// Creates an index over `ids`.
    ///
    /// # Errors
    /// Returns the first [`TruncIndex::add`] error.
    pub fn new<I, S>(ids: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let index = Self::default();
        for id in ids {
            index.add(id)?;
        }
        Ok(index)
    }

    /// Adds an identifier.
    ///
    /// # Errors
    /// Fails for empty identifiers, identifiers containing spaces, and
    /// identifiers that are already present.
    pub fn add(&self, id: impl Into<String>) -> Result<(), IndexError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IndexError::EmptyPrefix);
        }
        if id.contains(' ') {
            return Err(IndexError::IllegalChar(id));
        }
        let mut ids = self.ids.lock();
        if ids.contains(&id) {
            return Err(IndexError::Duplicate(id));
        }
        ids.insert(id);
        Ok(())
    }

    /// Removes an identifier.
    ///
    /// # Errors
    /// Returns [`IndexError::NotFound`] if the identifier is not indexed.
    pub fn delete(&self, id: &str) -> Result<(), IndexError> {
        if id.is_empty() {
            return Err(IndexError::EmptyPrefix);
        }
        if self.ids.lock().remove(id) {
            Ok(())
        } else {
            Err(IndexError::NotFound(id.to_string()))
        }
    }

    /// Resolves `prefix` to the single identifier starting with it.
    ///
    /// # Errors
    /// - [`IndexError::EmptyPrefix`] for an empty prefix.
    /// - [`IndexError::NotFound`] if nothing matches.
    /// - [`IndexError::Ambiguous`] if more than one identifier matches.
    pub fn get(&self, prefix: &str) -> Result<String, IndexError> {
        if prefix.is_empty() {
            return Err(IndexError::EmptyPrefix);
        }
        let ids = self.ids.lock();
        let mut matches = ids
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|id| id.starts_with(prefix));

        let first = matches
            .next()
            .ok_or_else(|| IndexError::NotFound(prefix.to_string()))?;
        if matches.next().is_some() {
            return Err(IndexError::Ambiguous(prefix.to_string()));
        }
        Ok(first.clone())
    }

    /// Returns a snapshot of every indexed identifier in sorted order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.ids.lock().iter().cloned().collect()
    }

    /// Number of indexed identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    /// Returns true if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}
