//! Metric identifiers.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::intern::{intern, refs, StrRef};
use crate::tags::Tags;

/// A metric identifier: a name plus an ordered tag set.
///
/// The hash is computed lazily from the interned handles and memoized, since
/// ids are hashed once per registry lookup but constructed on every parsed
/// line.
pub struct Id {
    name: StrRef,
    tags: Tags,
    hash: AtomicU64,
}

impl Id {
    /// Create an id from an interned name and tags.
    #[must_use]
    pub fn new(name: StrRef, tags: Tags) -> Self {
        Self {
            name,
            tags,
            hash: AtomicU64::new(0),
        }
    }

    /// Create an id, interning the name.
    #[must_use]
    pub fn of(name: &str, tags: Tags) -> Self {
        Self::new(intern(name), tags)
    }

    /// The metric name.
    #[must_use]
    pub fn name(&self) -> StrRef {
        self.name
    }

    /// The tag set.
    #[must_use]
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// A copy of this id with one more tag.
    #[must_use]
    pub fn with_tag(&self, key: StrRef, value: StrRef) -> Id {
        let mut tags = self.tags.clone();
        tags.add(key, value);
        Id::new(self.name, tags)
    }

    /// A copy of this id with every tag from `extra` added.
    #[must_use]
    pub fn with_tags(&self, extra: &Tags) -> Id {
        let mut tags = self.tags.clone();
        tags.add_all(extra);
        Id::new(self.name, tags)
    }

    /// A copy of this id with `statistic=<stat>`.
    #[must_use]
    pub fn with_stat(&self, stat: StrRef) -> Id {
        self.with_tag(refs().statistic, stat)
    }

    /// A copy of this id with `statistic=<stat>`, unless a statistic tag is
    /// already set.
    #[must_use]
    pub fn with_default_stat(&self, stat: StrRef) -> Id {
        if self.tags.has(refs().statistic) {
            self.clone()
        } else {
            self.with_stat(stat)
        }
    }

    pub(crate) fn compute_hash(&self) -> u64 {
        // 0 doubles as the not-yet-computed sentinel; racing writers all
        // store the same value
        let cached = self.hash.load(Ordering::Relaxed);
        if cached != 0 {
            return cached;
        }
        let mut h = self.tags.hash() ^ self.name.identity_hash();
        if h == 0 {
            h = 1;
        }
        self.hash.store(h, Ordering::Relaxed);
        h
    }
}

impl Clone for Id {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tags: self.tags.clone(),
            hash: AtomicU64::new(self.hash.load(Ordering::Relaxed)),
        }
    }
}

impl PartialEq for Id {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.tags == other.tags
    }
}

impl Eq for Id {}

impl Hash for Id {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.compute_hash());
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({}, {})", self.name, self.tags)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::Id;
    use crate::intern::{intern, refs};
    use crate::tags::Tags;

    #[test]
    fn equality_is_componentwise() {
        let a = Id::of("m", Tags::of(&[("k", "v")]));
        let b = Id::of("m", Tags::of(&[("k", "v")]));
        let c = Id::of("m", Tags::of(&[("k", "other")]));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.compute_hash(), b.compute_hash());
    }

    #[test]
    fn canonicalized_names_compare_equal() {
        let a = Id::of("foo@bar", Tags::new());
        let b = Id::of("foo_bar", Tags::new());
        assert_eq!(a, b);
    }

    #[test]
    fn with_tag_does_not_mutate() {
        let a = Id::of("m", Tags::new());
        let b = a.with_tag(intern("k"), intern("v"));
        assert!(a.tags().is_empty());
        assert_eq!(b.tags().len(), 1);
        assert_eq!(b.name(), a.name());
    }

    #[test]
    fn with_stat_sets_statistic() {
        let id = Id::of("m", Tags::new()).with_stat(refs().count);
        assert_eq!(id.tags().at(refs().statistic), Some(refs().count));
    }

    #[test]
    fn with_default_stat_respects_existing() {
        let id = Id::of("m", Tags::of(&[("statistic", "percentile")]));
        let kept = id.with_default_stat(refs().count);
        assert_eq!(kept.tags().at(refs().statistic), Some(refs().percentile));

        let fresh = Id::of("m", Tags::new()).with_default_stat(refs().count);
        assert_eq!(fresh.tags().at(refs().statistic), Some(refs().count));
    }

    #[test]
    fn usable_as_map_key() {
        let mut map = std::collections::HashMap::new();
        map.insert(Id::of("m", Tags::of(&[("k", "v")])), 1);
        assert_eq!(map.get(&Id::of("m", Tags::of(&[("k", "v")]))), Some(&1));
        assert_eq!(map.get(&Id::of("m", Tags::new())), None);
    }
}
