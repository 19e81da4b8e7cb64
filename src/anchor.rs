//! The anchor table: names for addresses, and pointers waiting for names.

use std::collections::btree_map;
use std::collections::hash_map::Entry;
use std::collections::BTreeMap;
use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::run::SortedSpan;

lazy_static! {
  static ref COPY_SUFFIX: Regex = Regex::new(r"^(.*)_copy(\d*)$").unwrap();
}

/// A table of anchor names.
///
/// Names are unique in both directions: no address has two names, and no name
/// belongs to two addresses. Names compare case-insensitively, but keep the
/// case they were declared with.
///
/// Alongside the names, the table remembers *unmapped pointers*: pointers that
/// were written by name before anything had that name, and *matched words*:
/// integers that mirror a table's length.
#[derive(Clone, Debug, Default)]
pub struct AnchorTable {
  address_for_name: HashMap<String, usize>,
  name_for_address: BTreeMap<usize, String>,

  unmapped_for_name: HashMap<String, SortedSpan>,
  unmapped_for_source: BTreeMap<usize, String>,

  matched_words: HashMap<String, SortedSpan>,
  word_for_address: BTreeMap<usize, String>,
}

fn key(name: &str) -> String {
  name.to_lowercase()
}

impl AnchorTable {
  /// Creates a new, empty `AnchorTable`.
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the address named `name`, if any.
  pub fn address_of(&self, name: &str) -> Option<usize> {
    self.address_for_name.get(&key(name)).copied()
  }

  /// Returns the name of `addr`, if any.
  pub fn name_at(&self, addr: usize) -> Option<&str> {
    self.name_for_address.get(&addr).map(String::as_str)
  }

  /// Iterates over every `(address, name)` pair, in address order.
  pub fn names(&self) -> btree_map::Iter<'_, usize, String> {
    self.name_for_address.iter()
  }

  /// Attempts to name `addr` as `name`.
  ///
  /// If either the name or the address is already taken, nothing changes,
  /// and the address that currently has `name` (or `addr`, if only the
  /// address was taken) is returned instead.
  pub fn define(&mut self, addr: usize, name: &str) -> Result<(), usize> {
    if self.name_for_address.contains_key(&addr) {
      return Err(addr);
    }
    match self.address_for_name.entry(key(name)) {
      Entry::Vacant(e) => {
        e.insert(addr);
        self.name_for_address.insert(addr, name.to_string());
        Ok(())
      }
      Entry::Occupied(e) => Err(*e.get()),
    }
  }

  /// Removes the name at `addr`, returning it.
  pub fn remove_at(&mut self, addr: usize) -> Option<String> {
    let name = self.name_for_address.remove(&addr)?;
    self.address_for_name.remove(&key(&name));
    Some(name)
  }

  /// Picks a name for `addr` that is as close to `name` as possible without
  /// colliding with any other address's name.
  ///
  /// Collisions are resolved by adding `_copy`, then counting up: `_copy2`,
  /// `_copy3`, and so on. Returns the new name and whether it changed.
  ///
  /// ```
  /// # use hexmeta::anchor::AnchorTable;
  /// let mut table = AnchorTable::new();
  /// table.define(0x10, "foo").unwrap();
  /// assert_eq!(table.uniquify(0x10, "foo"), ("foo".to_string(), false));
  /// assert_eq!(table.uniquify(0x20, "foo"), ("foo_copy".to_string(), true));
  /// ```
  pub fn uniquify(&self, addr: usize, name: &str) -> (String, bool) {
    let mut name = name.to_string();
    let mut changed = false;
    loop {
      match self.address_of(&name) {
        Some(a) if a != addr => changed = true,
        _ => return (name, changed),
      }

      name = match COPY_SUFFIX.captures(&name) {
        Some(caps) => {
          let base = &caps[1];
          match caps[2].parse::<u32>() {
            Ok(n) => format!("{}_copy{}", base, n + 1),
            Err(_) => format!("{}_copy2", base),
          }
        }
        None => format!("{}_copy", name),
      };
    }
  }

  /// Returns the name an unmapped pointer at `source` is waiting for.
  pub fn unmapped_name(&self, source: usize) -> Option<&str> {
    self.unmapped_for_source.get(&source).map(String::as_str)
  }

  /// Iterates over every unmapped pointer, as `(source, name)` pairs.
  pub fn unmapped(&self) -> btree_map::Iter<'_, usize, String> {
    self.unmapped_for_source.iter()
  }

  /// Records that the pointer at `source` is waiting for `name`. Any name it
  /// was waiting for before is forgotten.
  pub fn add_unmapped(&mut self, source: usize, name: &str) {
    self.remove_unmapped(source);
    self
      .unmapped_for_name
      .entry(key(name))
      .or_default()
      .insert(source);
    self.unmapped_for_source.insert(source, name.to_string());
  }

  /// Forgets the unmapped pointer at `source`, returning the name it was
  /// waiting for.
  pub fn remove_unmapped(&mut self, source: usize) -> Option<String> {
    let name = self.unmapped_for_source.remove(&source)?;
    let k = key(&name);
    if let Some(span) = self.unmapped_for_name.get_mut(&k) {
      span.remove(source);
      if span.is_empty() {
        self.unmapped_for_name.remove(&k);
      }
    }
    Some(name)
  }

  /// Returns every unmapped pointer waiting for `name`, or for an element of
  /// the table called `name` (such as `name/3`), as `(source, full name)`
  /// pairs.
  pub fn unmapped_for(&self, name: &str) -> Vec<(usize, String)> {
    let k = key(name);
    let prefix = format!("{}/", k);
    let mut waiting = self
      .unmapped_for_name
      .iter()
      .filter(|(n, _)| **n == k || n.starts_with(&prefix))
      .flat_map(|(_, span)| span.iter())
      .filter_map(|s| Some((s, self.unmapped_for_source.get(&s)?.clone())))
      .collect::<Vec<_>>();
    waiting.sort();
    waiting
  }

  /// Records that the word at `addr` mirrors the length of `table`.
  pub fn add_matched_word(&mut self, addr: usize, table: &str) {
    self.remove_matched_word(addr);
    self
      .matched_words
      .entry(key(table))
      .or_default()
      .insert(addr);
    self.word_for_address.insert(addr, table.to_string());
  }

  /// Forgets the matched word at `addr`, returning the table it mirrored.
  pub fn remove_matched_word(&mut self, addr: usize) -> Option<String> {
    let table = self.word_for_address.remove(&addr)?;
    let k = key(&table);
    if let Some(span) = self.matched_words.get_mut(&k) {
      span.remove(addr);
      if span.is_empty() {
        self.matched_words.remove(&k);
      }
    }
    Some(table)
  }

  /// Returns the addresses of every word mirroring `table`.
  pub fn matched_words(&self, table: &str) -> SortedSpan {
    self
      .matched_words
      .get(&key(table))
      .cloned()
      .unwrap_or_default()
  }

  /// Returns the table the word at `addr` mirrors, if it is a matched word.
  pub fn word_at(&self, addr: usize) -> Option<&str> {
    self.word_for_address.get(&addr).map(String::as_str)
  }

  /// Iterates over every matched word, as `(address, table)` pairs.
  pub fn words(&self) -> btree_map::Iter<'_, usize, String> {
    self.word_for_address.iter()
  }

  /// Returns every name that starts with `partial`, ignoring case.
  pub fn complete(&self, partial: &str) -> Vec<String> {
    let partial = key(partial);
    let mut names = self
      .name_for_address
      .values()
      .filter(|n| key(n).starts_with(&partial))
      .cloned()
      .collect::<Vec<_>>();
    names.sort();
    names
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn define_and_remove() {
    let mut table = AnchorTable::new();
    assert_eq!(table.define(0x100, "Items"), Ok(()));
    assert_eq!(table.address_of("items"), Some(0x100));
    assert_eq!(table.name_at(0x100), Some("Items"));
    assert_eq!(table.define(0x200, "ITEMS"), Err(0x100));
    assert_eq!(table.define(0x100, "other"), Err(0x100));

    assert_eq!(table.remove_at(0x100), Some("Items".to_string()));
    assert_eq!(table.address_of("items"), None);
    assert_eq!(table.define(0x200, "items"), Ok(()));
  }

  #[test]
  fn copies() {
    let mut table = AnchorTable::new();
    table.define(0x10, "foo").unwrap();
    let (name, changed) = table.uniquify(0x20, "foo");
    assert_eq!((name.as_str(), changed), ("foo_copy", true));
    table.define(0x20, &name).unwrap();
    assert_eq!(table.uniquify(0x30, "foo").0, "foo_copy2");
    table.define(0x30, "foo_copy2").unwrap();
    assert_eq!(table.uniquify(0x40, "foo").0, "foo_copy3");
    assert_eq!(table.uniquify(0x40, "foo_copy").0, "foo_copy3");
    assert_eq!(table.uniquify(0x20, "foo_copy"), ("foo_copy".to_string(), false));
  }

  #[test]
  fn unmapped() {
    let mut table = AnchorTable::new();
    table.add_unmapped(0x40, "later");
    table.add_unmapped(0x44, "Later");
    table.add_unmapped(0x48, "later/2");
    table.add_unmapped(0x4c, "laterish");
    assert_eq!(table.unmapped_name(0x44), Some("Later"));

    assert_eq!(
      table.unmapped_for("LATER"),
      vec![
        (0x40, "later".to_string()),
        (0x44, "Later".to_string()),
        (0x48, "later/2".to_string())
      ]
    );

    assert_eq!(table.remove_unmapped(0x40), Some("later".to_string()));
    assert_eq!(table.unmapped_for("later").len(), 2);
    table.add_unmapped(0x44, "elsewhere");
    assert_eq!(table.unmapped_for("later").len(), 1);
  }

  #[test]
  fn words() {
    let mut table = AnchorTable::new();
    table.add_matched_word(0x10, "items");
    table.add_matched_word(0x20, "Items");
    assert_eq!(table.matched_words("ITEMS").iter().collect::<Vec<_>>(), vec![0x10, 0x20]);
    assert_eq!(table.remove_matched_word(0x10), Some("items".to_string()));
    assert_eq!(table.matched_words("items").len(), 1);
    assert!(table.remove_matched_word(0x10).is_none());
  }
}
