//! Local copy of the selections offered in the panel's dropdowns.

use std::collections::HashSet;

use shared::domain::{SelectionId, SelectionRef};

/// Ordered, duplicate-free list of selections as last seen from the
/// selection manager. Always replaced wholesale; never patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionStore {
    entries: Vec<SelectionRef>,
}

impl SelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store keeping the first occurrence of each id.
    pub fn from_entries(entries: impl IntoIterator<Item = SelectionRef>) -> Self {
        let mut seen = HashSet::new();
        let entries = entries
            .into_iter()
            .filter(|entry| seen.insert(entry.id.clone()))
            .collect();
        Self { entries }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn replace(&mut self, other: SelectionStore) {
        self.entries = other.entries;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &SelectionId) -> bool {
        self.entries.iter().any(|entry| &entry.id == id)
    }

    pub fn get(&self, id: &SelectionId) -> Option<&SelectionRef> {
        self.entries.iter().find(|entry| &entry.id == id)
    }

    pub fn display_name(&self, id: &SelectionId) -> Option<&str> {
        self.get(id).map(|entry| entry.display_name.as_str())
    }

    pub fn ids(&self) -> impl Iterator<Item = &SelectionId> {
        self.entries.iter().map(|entry| &entry.id)
    }

    pub fn entries(&self) -> &[SelectionRef] {
        &self.entries
    }
}
