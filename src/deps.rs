//! Ordered container with three bands (early, middle, late) and insert-after anchors.
//!
//! Used for configuration steps and application wrappers. Resolution is stable:
//! early entries (insertion order), then middle entries, then late entries, where
//! every entry declared `After::Key(k)` follows `k` directly (after `k`'s own
//! followers that were added before it).

use crate::error::RegistrationError;
use std::collections::HashMap;

/// Placement of an entry in a [`DependencyList`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum After {
    /// Middle band, registration order preserved.
    Middle,
    /// Early band: runs first.
    Early,
    /// Late band: runs last.
    Late,
    /// Immediately after the entry registered under this key.
    Key(String),
}

impl Default for After {
    fn default() -> Self {
        After::Middle
    }
}

impl From<bool> for After {
    fn from(late: bool) -> Self {
        if late {
            After::Late
        } else {
            After::Early
        }
    }
}

impl From<Option<bool>> for After {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => After::Middle,
            Some(late) => late.into(),
        }
    }
}

impl From<&str> for After {
    fn from(key: &str) -> Self {
        After::Key(key.to_string())
    }
}

impl From<String> for After {
    fn from(key: String) -> Self {
        After::Key(key)
    }
}

struct Entry<T> {
    key: String,
    after: After,
    item: T,
}

pub struct DependencyList<T> {
    entries: Vec<Entry<T>>,
    ordered: Vec<usize>,
}

impl<T> Default for DependencyList<T> {
    fn default() -> Self {
        DependencyList {
            entries: Vec::new(),
            ordered: Vec::new(),
        }
    }
}

impl<T> DependencyList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `item` under `key`. Fails on a duplicate key or an anchor that was never registered.
    pub fn add(&mut self, key: impl Into<String>, item: T, after: impl Into<After>) -> Result<(), RegistrationError> {
        let key = key.into();
        let after = after.into();
        if self.position(&key).is_some() {
            return Err(RegistrationError::DuplicateKey(key));
        }
        if let After::Key(anchor) = &after {
            if self.position(anchor).is_none() {
                return Err(RegistrationError::UnknownAnchor {
                    key,
                    anchor: anchor.clone(),
                });
            }
        }
        self.entries.push(Entry { key, after, item });
        self.resolve();
        Ok(())
    }

    /// Substitute the item stored under `key`, keeping its position and its followers.
    pub fn replace(&mut self, key: &str, item: T) -> Result<T, RegistrationError> {
        let idx = self
            .position(key)
            .ok_or_else(|| RegistrationError::UnknownKey(key.to_string()))?;
        Ok(std::mem::replace(&mut self.entries[idx].item, item))
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.position(key).map(|idx| &self.entries[idx].item)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        self.position(key).map(move |idx| &mut self.entries[idx].item)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in resolved order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&str, &T)> + '_ {
        self.ordered.iter().map(move |&idx| {
            let entry = &self.entries[idx];
            (entry.key.as_str(), &entry.item)
        })
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        self.iter().map(|(_, item)| item)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.iter().map(|(key, _)| key).collect()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }

    fn resolve(&mut self) {
        let mut followers: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, entry) in self.entries.iter().enumerate() {
            if let After::Key(anchor) = &entry.after {
                followers.entry(anchor.as_str()).or_default().push(idx);
            }
        }

        let mut ordered = Vec::with_capacity(self.entries.len());
        for band in [After::Early, After::Middle, After::Late] {
            for (idx, entry) in self.entries.iter().enumerate() {
                if entry.after == band {
                    visit(idx, &self.entries, &followers, &mut ordered);
                }
            }
        }
        self.ordered = ordered;
    }
}

fn visit<T>(idx: usize, entries: &[Entry<T>], followers: &HashMap<&str, Vec<usize>>, out: &mut Vec<usize>) {
    out.push(idx);
    if let Some(children) = followers.get(entries[idx].key.as_str()) {
        for &child in children {
            visit(child, entries, followers, out);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for DependencyList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
