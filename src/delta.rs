//! Reversible change records.
//!
//! Every mutating model operation records what it did into a [`Delta`]. A
//! delta only keeps the net effect of a sequence of changes: writing a byte
//! and then writing the original value back leaves no trace, and neither does
//! replacing a run with an identical one. This is what makes writing the same
//! anchor twice a no-op the second time.
//!
//! [`Delta`]: struct.Delta.html

use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::run::Run;
use crate::run::RunKey;

/// Net additions and removals of some keyed value.
///
/// A key may appear in both maps, which means its value was replaced: the
/// removed value is the original, the added one is the replacement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Changes<K, V> {
  removed: BTreeMap<K, V>,
  added: BTreeMap<K, V>,
}

impl<K: Ord, V> Default for Changes<K, V> {
  fn default() -> Self {
    Self {
      removed: BTreeMap::new(),
      added: BTreeMap::new(),
    }
  }
}

impl<K: Ord + Copy, V: Clone + PartialEq> Changes<K, V> {
  /// Records that `value` was added at `key`.
  pub fn add(&mut self, key: K, value: V) {
    if self.removed.get(&key) == Some(&value) {
      self.removed.remove(&key);
      self.added.remove(&key);
      return;
    }
    self.added.insert(key, value);
  }

  /// Records that `value` was removed from `key`.
  pub fn remove(&mut self, key: K, value: V) {
    if self.added.remove(&key).is_some() {
      return;
    }
    self.removed.entry(key).or_insert(value);
  }

  /// Iterates over the values removed, by key.
  pub fn removed(&self) -> btree_map::Iter<'_, K, V> {
    self.removed.iter()
  }

  /// Iterates over the values added, by key.
  pub fn added(&self) -> btree_map::Iter<'_, K, V> {
    self.added.iter()
  }

  /// Returns whether nothing changed.
  pub fn is_empty(&self) -> bool {
    self.removed.is_empty() && self.added.is_empty()
  }

  fn absorb(&mut self, other: Changes<K, V>) {
    for (key, value) in other.removed {
      self.remove(key, value);
    }
    for (key, value) in other.added {
      self.add(key, value);
    }
  }
}

/// A record of changes to a model, which can be undone and redone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delta {
  data: BTreeMap<usize, (u8, u8)>,
  len: Option<(usize, usize)>,
  runs: Changes<RunKey, Run>,
  names: Changes<usize, String>,
  unmapped: Changes<usize, String>,
  words: Changes<usize, String>,
}

impl Delta {
  /// Creates an empty `Delta`.
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns whether this delta records no changes at all.
  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
      && self.len.is_none()
      && self.runs.is_empty()
      && self.names.is_empty()
      && self.unmapped.is_empty()
      && self.words.is_empty()
  }

  /// Records that the byte at `addr` changed from `old` to `new`.
  pub fn change_data(&mut self, addr: usize, old: u8, new: u8) {
    match self.data.entry(addr) {
      btree_map::Entry::Occupied(mut e) => {
        if e.get().0 == new {
          e.remove();
        } else {
          e.get_mut().1 = new;
        }
      }
      btree_map::Entry::Vacant(e) => {
        if old != new {
          e.insert((old, new));
        }
      }
    }
  }

  /// Records that the data's length changed from `old` to `new`.
  pub fn change_len(&mut self, old: usize, new: usize) {
    let original = self.len.map_or(old, |(o, _)| o);
    self.len = if original == new {
      None
    } else {
      Some((original, new))
    };
  }

  /// Records that `run` was added.
  pub fn add_run(&mut self, run: Run) {
    self.runs.add(run.key(), run);
  }

  /// Records that `run` was removed.
  pub fn remove_run(&mut self, run: Run) {
    self.runs.remove(run.key(), run);
  }

  /// Records that `addr` was named `name`.
  pub fn add_name(&mut self, addr: usize, name: &str) {
    self.names.add(addr, name.to_string());
  }

  /// Records that `addr` lost the name `name`.
  pub fn remove_name(&mut self, addr: usize, name: &str) {
    self.names.remove(addr, name.to_string());
  }

  /// Records that the pointer at `source` started waiting for `name`.
  pub fn add_unmapped(&mut self, source: usize, name: &str) {
    self.unmapped.add(source, name.to_string());
  }

  /// Records that the pointer at `source` stopped waiting for `name`.
  pub fn remove_unmapped(&mut self, source: usize, name: &str) {
    self.unmapped.remove(source, name.to_string());
  }

  /// Records that the word at `addr` started following `table`.
  pub fn add_word(&mut self, addr: usize, table: &str) {
    self.words.add(addr, table.to_string());
  }

  /// Records that the word at `addr` stopped following `table`.
  pub fn remove_word(&mut self, addr: usize, table: &str) {
    self.words.remove(addr, table.to_string());
  }

  /// Folds the changes in `later`, which happened after the ones in `self`,
  /// into `self`.
  pub fn absorb(&mut self, later: Delta) {
    for (addr, (old, new)) in later.data {
      self.change_data(addr, old, new);
    }
    if let Some((old, new)) = later.len {
      self.change_len(old, new);
    }
    self.runs.absorb(later.runs);
    self.names.absorb(later.names);
    self.unmapped.absorb(later.unmapped);
    self.words.absorb(later.words);
  }

  /// Iterates over every changed byte, as `(address, (old, new))`.
  pub fn data(&self) -> btree_map::Iter<'_, usize, (u8, u8)> {
    self.data.iter()
  }

  /// Returns the old and new data lengths, if the length changed.
  pub fn len_change(&self) -> Option<(usize, usize)> {
    self.len
  }

  /// Returns the run changes.
  pub fn runs(&self) -> &Changes<RunKey, Run> {
    &self.runs
  }

  /// Returns the anchor name changes.
  pub fn names(&self) -> &Changes<usize, String> {
    &self.names
  }

  /// Returns the unmapped pointer changes.
  pub fn unmapped(&self) -> &Changes<usize, String> {
    &self.unmapped
  }

  /// Returns the matched word changes.
  pub fn words(&self) -> &Changes<usize, String> {
    &self.words
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::run::RunKind;

  #[test]
  fn data_nets_out() {
    let mut delta = Delta::new();
    delta.change_data(4, 0x10, 0x20);
    delta.change_data(4, 0x20, 0x30);
    assert_eq!(delta.data().collect::<Vec<_>>(), vec![(&4, &(0x10, 0x30))]);
    delta.change_data(4, 0x30, 0x10);
    assert!(delta.is_empty());
    delta.change_data(5, 0xff, 0xff);
    assert!(delta.is_empty());
  }

  #[test]
  fn runs_net_out() {
    let a = Run::pointer(0x10);
    let b = Run::new(0x10, RunKind::Pcs { len: 4 });

    let mut delta = Delta::new();
    delta.remove_run(a.clone());
    delta.add_run(b.clone());
    assert_eq!(delta.runs().removed().count(), 1);
    assert_eq!(delta.runs().added().count(), 1);

    delta.remove_run(b);
    delta.add_run(a.clone());
    assert!(delta.is_empty());

    delta.add_run(a.clone());
    delta.remove_run(a);
    assert!(delta.is_empty());
  }

  #[test]
  fn absorb() {
    let mut first = Delta::new();
    first.change_len(0x100, 0x200);
    first.add_name(0x40, "foo");
    first.change_data(0x150, 0xff, 0x01);

    let mut second = Delta::new();
    second.remove_name(0x40, "foo");
    second.change_data(0x150, 0x01, 0xff);
    second.change_len(0x200, 0x100);
    first.absorb(second);
    assert!(first.is_empty());

    let mut first = Delta::new();
    first.add_unmapped(0x20, "later");
    let mut second = Delta::new();
    second.add_word(0x30, "items");
    first.absorb(second);
    assert_eq!(first.unmapped().added().count(), 1);
    assert_eq!(first.words().added().count(), 1);
    assert!(first.len_change().is_none());
  }
}
