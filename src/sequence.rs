//! Ordered sequences of items keyed by an index value, plus the browser
//! registry that keeps output sequences replayable alongside their input.

use std::collections::HashSet;

use crate::error::{Error, Result};

/// How index values of a sequence are interpreted when sorting or
/// displaying. Values themselves are stored as strings either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexType {
    #[default]
    Numeric,
    Text,
}

/// An ordered list of items, each tagged with an index value (for a time
/// sequence, the acquisition timepoint).
#[derive(Debug, Clone)]
pub struct Sequence<T> {
    name: String,
    index_name: String,
    index_unit: String,
    index_type: IndexType,
    items: Vec<(String, T)>,
}

impl<T> Sequence<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index_name: "time".to_string(),
            index_unit: "s".to_string(),
            index_type: IndexType::default(),
            items: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn set_index_name(&mut self, name: impl Into<String>) {
        self.index_name = name.into();
    }

    pub fn index_unit(&self) -> &str {
        &self.index_unit
    }

    pub fn set_index_unit(&mut self, unit: impl Into<String>) {
        self.index_unit = unit.into();
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn set_index_type(&mut self, index_type: IndexType) {
        self.index_type = index_type;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append an item at the end of the sequence.
    pub fn push(&mut self, index_value: impl Into<String>, item: T) {
        self.items.push((index_value.into(), item));
    }

    /// Store an item under an index value, replacing an existing entry with
    /// the same value or appending when none exists.
    pub fn set_at_value(&mut self, index_value: &str, item: T) {
        match self.items.iter_mut().find(|(v, _)| v == index_value) {
            Some(slot) => slot.1 = item,
            None => self.items.push((index_value.to_string(), item)),
        }
    }

    pub fn get(&self, index_value: &str) -> Option<&T> {
        self.items
            .iter()
            .find(|(v, _)| v == index_value)
            .map(|(_, item)| item)
    }

    pub fn get_mut(&mut self, index_value: &str) -> Option<&mut T> {
        self.items
            .iter_mut()
            .find(|(v, _)| v == index_value)
            .map(|(_, item)| item)
    }

    pub fn nth_index_value(&self, item: usize) -> Option<&str> {
        self.items.get(item).map(|(v, _)| v.as_str())
    }

    pub fn nth_item(&self, item: usize) -> Option<&T> {
        self.items.get(item).map(|(_, item)| item)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.items.iter().map(|(v, item)| (v.as_str(), item))
    }

    /// Drop all items and take over index metadata (name, unit, type) from
    /// another sequence, typically the input a result sequence mirrors.
    pub fn clear_retaining_metadata_from<U>(&mut self, source: &Sequence<U>) {
        self.items.clear();
        self.index_name = source.index_name.clone();
        self.index_unit = source.index_unit.clone();
        self.index_type = source.index_type;
    }
}

impl<T: Clone> Sequence<T> {
    /// Owned copy of the n-th item, for handing to a registration call that
    /// must not hold a borrow of the sequence across frames.
    pub fn materialize(&self, item: usize) -> Result<T> {
        self.items
            .get(item)
            .map(|(_, item)| item.clone())
            .ok_or(Error::ItemOutOfRange {
                item,
                count: self.items.len(),
            })
    }
}

/// A replay cursor over one or more synchronized sequences.
#[derive(Debug, Clone)]
pub struct Browser {
    name: String,
    synchronized: HashSet<String>,
    overwrite_proxy_name: HashSet<String>,
}

impl Browser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            synchronized: HashSet::new(),
            overwrite_proxy_name: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a sequence to the set this browser replays.
    pub fn synchronize(&mut self, sequence_name: &str) {
        self.synchronized.insert(sequence_name.to_string());
    }

    pub fn is_synchronized(&self, sequence_name: &str) -> bool {
        self.synchronized.contains(sequence_name)
    }

    /// Let the browser rename a sequence's proxy node as replay advances.
    pub fn set_overwrite_proxy_name(&mut self, sequence_name: &str, enabled: bool) {
        if enabled {
            self.overwrite_proxy_name.insert(sequence_name.to_string());
        } else {
            self.overwrite_proxy_name.remove(sequence_name);
        }
    }

    pub fn overwrites_proxy_name(&self, sequence_name: &str) -> bool {
        self.overwrite_proxy_name.contains(sequence_name)
    }
}

/// All browsers known to the session, queried to find which one replays a
/// given input sequence.
#[derive(Debug, Clone, Default)]
pub struct BrowserRegistry {
    browsers: Vec<Browser>,
}

impl BrowserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, browser: Browser) {
        self.browsers.push(browser);
    }

    /// First browser that replays the named sequence, if any.
    pub fn find_browser_for(&mut self, sequence_name: &str) -> Option<&mut Browser> {
        self.browsers
            .iter_mut()
            .find(|b| b.is_synchronized(sequence_name))
    }

    pub fn browser(&self, name: &str) -> Option<&Browser> {
        self.browsers.iter().find(|b| b.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_at_value_replaces_existing_entry() {
        let mut seq = Sequence::new("times");
        seq.push("0", 10);
        seq.push("1", 20);
        seq.set_at_value("1", 25);
        seq.set_at_value("2", 30);
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.get("1"), Some(&25));
        assert_eq!(seq.nth_index_value(2), Some("2"));
    }

    #[test]
    fn materialize_rejects_out_of_range_item() {
        let mut seq = Sequence::new("times");
        seq.push("0", 1);
        assert_eq!(seq.materialize(0).unwrap(), 1);
        assert!(matches!(
            seq.materialize(3),
            Err(Error::ItemOutOfRange { item: 3, count: 1 })
        ));
    }

    #[test]
    fn clear_retains_metadata_from_source() {
        let mut input: Sequence<i32> = Sequence::new("input");
        input.set_index_name("phase");
        input.set_index_unit("%");
        input.set_index_type(IndexType::Text);
        let mut output: Sequence<i32> = Sequence::new("output");
        output.push("stale", 99);
        output.clear_retaining_metadata_from(&input);
        assert!(output.is_empty());
        assert_eq!(output.index_name(), "phase");
        assert_eq!(output.index_unit(), "%");
        assert_eq!(output.index_type(), IndexType::Text);
    }

    #[test]
    fn registry_finds_browser_by_synchronized_sequence() {
        let mut registry = BrowserRegistry::new();
        let mut browser = Browser::new("replay");
        browser.synchronize("input");
        registry.add(browser);
        assert!(registry.find_browser_for("input").is_some());
        assert!(registry.find_browser_for("other").is_none());
    }
}
