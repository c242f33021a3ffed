//! Ordered, key-unique tag sets.

use std::fmt;

use crate::intern::{intern, StrRef};

/// A single key/value tag. Both sides are interned handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    /// Tag key.
    pub key: StrRef,
    /// Tag value.
    pub value: StrRef,
}

/// A small set of tags, kept sorted by key and deduplicated by key.
///
/// Adding a key that is already present overwrites the value in place, so the
/// invariant `tags[i].key < tags[j].key` for `i < j` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    entries: Vec<Tag>,
}

impl Tags {
    /// An empty tag set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tag set from string pairs, interning as it goes.
    #[must_use]
    pub fn of(pairs: &[(&str, &str)]) -> Self {
        let mut tags = Self::new();
        for (k, v) in pairs {
            tags.add(intern(k), intern(v));
        }
        tags
    }

    /// Insert or overwrite a tag, preserving key order.
    pub fn add(&mut self, key: StrRef, value: StrRef) {
        match self.entries.binary_search_by(|t| t.key.cmp(&key)) {
            Ok(i) => self.entries[i].value = value,
            Err(i) => self.entries.insert(i, Tag { key, value }),
        }
    }

    /// Insert every tag from `source` into this set.
    pub fn add_all(&mut self, source: &Tags) {
        for tag in source.iter() {
            self.add(tag.key, tag.value);
        }
    }

    /// Whether a tag with this key is present.
    #[must_use]
    pub fn has(&self, key: StrRef) -> bool {
        // binary search may land on a neighbor; the key must match too
        self.entries
            .binary_search_by(|t| t.key.cmp(&key))
            .map_or(false, |i| self.entries[i].key == key)
    }

    /// Value for `key`, if present.
    #[must_use]
    pub fn at(&self, key: StrRef) -> Option<StrRef> {
        self.entries
            .binary_search_by(|t| t.key.cmp(&key))
            .ok()
            .map(|i| self.entries[i].value)
    }

    /// Remove the tag with this key, if present. Returns whether anything was
    /// removed.
    pub fn remove(&mut self, key: StrRef) -> bool {
        match self.entries.binary_search_by(|t| t.key.cmp(&key)) {
            Ok(i) => {
                self.entries.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    /// Number of tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the tags in key order.
    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.entries.iter()
    }

    /// Order-free hash of the set: per-pair identity hashes folded with XOR.
    #[must_use]
    pub fn hash(&self) -> u64 {
        self.entries.iter().fold(0u64, |h, t| {
            h ^ (t.key.identity_hash().rotate_left(1) ^ t.value.identity_hash())
        })
    }
}

impl<'a> IntoIterator for &'a Tags {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, tag) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}->{}", tag.key, tag.value)?;
        }
        write!(f, "}}")
    }
}
