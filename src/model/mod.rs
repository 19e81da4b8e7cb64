//! The model: ROM data, its runs, and their names, kept consistent with each
//! other.
//!
//! A [`Model`] owns the raw bytes, the [`RunIndex`] describing them, and the
//! [`AnchorTable`] naming them. Every public mutating operation takes a
//! [`Delta`] to record its changes into, and is atomic: if it fails, the model
//! is left exactly as it was and nothing is recorded.
//!
//! The operations themselves are spread over this module's children:
//! - `bootstrap` builds a model from bare data or from saved metadata.
//! - `write` declares anchors and writes pointers and values.
//! - `propagate` keeps sources, words, and dependent tables in sync after a
//!   run is written.
//! - `clear` removes formats.
//! - `relocate` finds free space and moves runs.
//! - `search` scans for pointers and text.
//! - `copy` turns data into anchor text and back.
//! - `verify` checks the structural invariants.
//!
//! [`Model`]: struct.Model.html
//! [`RunIndex`]: ../index/struct.RunIndex.html
//! [`AnchorTable`]: ../anchor/struct.AnchorTable.html
//! [`Delta`]: ../delta/struct.Delta.html

use std::collections::BTreeMap;

use crate::anchor::AnchorTable;
use crate::delta::Delta;
use crate::error::Error;
use crate::format::Lookup;
use crate::index::RunIndex;
use crate::int::encode_pointer;
use crate::int::Int;
use crate::int::Width;
use crate::meta::Metadata;
use crate::meta::StoredAnchor;
use crate::pcs;
use crate::rom::Rom;
use crate::run::segment::OptionSource;
use crate::run::LengthSource;
use crate::run::Run;
use crate::run::RunKey;
use crate::run::SegmentKind;

mod bootstrap;
mod clear;
mod copy;
mod propagate;
mod relocate;
mod search;
mod verify;
mod write;

#[cfg(test)]
mod test;

/// How deep element names are looked for through tables that take their
/// length from other tables.
const MAX_NAME_DEPTH: usize = 8;

/// Options for tuning a `Model`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Options {
  /// Pointers to addresses before this one are ignored while bootstrapping.
  ///
  /// Defaults to 0.
  pub earliest_allowed_anchor: usize,
  /// Where to start looking for free space when a run must move.
  ///
  /// Defaults to `0x100`.
  pub free_space_start: usize,
  /// How much free space to leave after a moved run, so that it can grow a
  /// little later without moving again.
  ///
  /// Defaults to `0x140` bytes.
  pub free_space_margin: usize,
  /// How far past an obstacle to skip while looking for free space.
  ///
  /// Defaults to `0x10` bytes.
  pub free_space_spacer: usize,
  /// The size of the chunks that pointer searches split the data into.
  ///
  /// Defaults to `0x10000` bytes.
  pub search_chunk: usize,
}

impl Default for Options {
  fn default() -> Self {
    Self {
      earliest_allowed_anchor: 0,
      free_space_start: 0x100,
      free_space_margin: 0x140,
      free_space_spacer: 0x10,
      search_chunk: 0x10000,
    }
  }
}

/// A ROM, along with everything known about its layout.
#[derive(Clone, Debug)]
pub struct Model {
  rom: Rom,
  runs: RunIndex,
  anchors: AnchorTable,
  lists: BTreeMap<String, Vec<String>>,
  options: Options,
  /// The tables whose dependents are currently being resized, innermost
  /// last.
  resizing: Vec<String>,
}

impl Model {
  /// Returns the underlying data.
  pub fn rom(&self) -> &Rom {
    &self.rom
  }

  /// Returns the run index.
  pub fn runs(&self) -> &RunIndex {
    &self.runs
  }

  /// Returns the anchor table.
  pub fn anchors(&self) -> &AnchorTable {
    &self.anchors
  }

  /// Returns the options this model was created with.
  pub fn config(&self) -> &Options {
    &self.options
  }

  /// Returns the run containing `addr`, or the null run.
  pub fn run_at(&self, addr: usize) -> &Run {
    self.runs.lookup(addr)
  }

  /// Returns the name of the anchor at `addr`.
  pub fn anchor_name_at(&self, addr: usize) -> Option<&str> {
    self.anchors.name_at(addr)
  }

  /// Returns the address of the anchor called `name`.
  ///
  /// `name` may pick out an element of a table, as either `table/3` or
  /// `table/ElementName`.
  pub fn address_for_anchor(&self, name: &str) -> Option<usize> {
    let mut parts = name.trim().splitn(2, '/');
    let base = parts.next()?;
    let addr = self.anchors.address_of(base)?;
    let element = match parts.next() {
      Some(element) => element.trim(),
      None => return Some(addr),
    };

    let table = self.runs.get(addr)?.as_table()?;
    let index = match element.parse::<usize>() {
      Ok(index) => index,
      Err(_) => self
        .element_names(base)
        .iter()
        .position(|n| n.eq_ignore_ascii_case(element))?,
    };
    if index >= table.count {
      return None;
    }
    Some(addr + index * table.stride())
  }

  /// Returns the name of the place `dest` points to, as it should be shown
  /// for the pointer at `source`.
  ///
  /// This is the anchor name at `dest` if there is one; otherwise the name
  /// an unmapped pointer at `source` waits for; otherwise `null` for the null
  /// pointer; otherwise `table/index` for an element of a named table. If
  /// none of those apply, the result is empty.
  pub fn resolve_address(&self, source: Option<usize>, dest: Option<usize>) -> String {
    if let Some(name) = dest.and_then(|d| self.anchors.name_at(d)) {
      return name.to_string();
    }
    if let Some(name) = source.and_then(|s| self.anchors.unmapped_name(s)) {
      return name.to_string();
    }
    let dest = match dest {
      Some(dest) => dest,
      None => return "null".to_string(),
    };

    let run = self.runs.lookup(dest);
    if let (Some(table), Some(name)) = (run.as_table(), self.anchors.name_at(run.start)) {
      if let Some(index) = table.element_at(dest - run.start) {
        return format!("{}/{}", name, index);
      }
    }
    String::new()
  }

  /// Looks up `name` on behalf of a pointer at `source`.
  ///
  /// If no such anchor exists, the pointer is recorded as waiting for `name`
  /// and `None` is returned, which should be written as the null pointer.
  fn resolve_name(
    &mut self,
    delta: &mut Delta,
    source: Option<usize>,
    name: &str,
  ) -> Option<usize> {
    let name = name.trim();
    if let Some(addr) = self.address_for_anchor(name) {
      return Some(addr);
    }
    if let Some(source) = source {
      if !name.is_empty() && !name.eq_ignore_ascii_case("null") {
        self.put_unmapped(delta, source, name);
      }
    }
    None
  }

  /// Returns the first run at or after `addr` that could carry an anchor.
  pub fn next_anchor(&self, addr: usize) -> &Run {
    self.runs.next_anchor(addr)
  }

  /// Returns whether `addr` is just past the last element of a table.
  pub fn is_at_end_of_table(&self, addr: usize) -> bool {
    self.runs.is_at_end_of_table(addr)
  }

  /// Defines the list of options called `name`.
  pub fn set_list(&mut self, name: impl Into<String>, options: Vec<String>) {
    self.lists.insert(name.into(), options);
  }

  /// Returns the options called `name`.
  ///
  /// These come from the list of that name if there is one; failing that,
  /// from the element names of the table of that name; failing that, they
  /// are just the table's element indices.
  pub fn options(&self, name: &str) -> Vec<String> {
    if let Some(list) = self.lists.get(name) {
      return list.clone();
    }
    let names = self.element_names(name);
    if !names.is_empty() {
      return names;
    }
    match self.table_count(name) {
      Some(count) => (0..count).map(|i| i.to_string()).collect(),
      None => Vec::new(),
    }
  }

  /// Returns the names of the elements of the table called `table`.
  ///
  /// A table whose first field is text is named by that text. Otherwise, a
  /// table whose length comes from another table borrows that table's names.
  pub fn element_names(&self, table: &str) -> Vec<String> {
    self.element_names_at_depth(table, 0)
  }

  fn element_names_at_depth(&self, name: &str, depth: usize) -> Vec<String> {
    let run = match self.anchors.address_of(name).and_then(|a| self.runs.get(a)) {
      Some(run) => run,
      None => return Vec::new(),
    };
    let table = match run.as_table() {
      Some(table) => table,
      None => return Vec::new(),
    };

    if let Some(first) = table.segments.first() {
      if first.kind == SegmentKind::Pcs {
        let stride = table.stride();
        return (0..table.count)
          .map(|i| {
            let at = run.start + i * stride;
            let bytes = self.rom.bytes().get(at..at + first.len).unwrap_or(&[]);
            pcs::decode(bytes)
          })
          .collect();
      }
    }
    match &table.length {
      LengthSource::Anchor { name: parent, .. } if depth < MAX_NAME_DEPTH => {
        self.element_names_at_depth(parent, depth + 1)
      }
      _ => Vec::new(),
    }
  }

  /// Returns every anchor name starting with `partial`, ignoring case.
  ///
  /// If `partial` contains a `/`, the part before it names a table, and the
  /// part after it is completed against that table's element names.
  pub fn complete_anchor_name(&self, partial: &str) -> Vec<String> {
    let i = match partial.find('/') {
      Some(i) => i,
      None => return self.anchors.complete(partial),
    };
    let child = partial[i + 1..].to_lowercase();
    let base = match self
      .anchors
      .address_of(&partial[..i])
      .and_then(|a| self.anchors.name_at(a))
    {
      Some(base) => base,
      None => return Vec::new(),
    };
    self
      .element_names(base)
      .into_iter()
      .filter(|n| n.to_lowercase().starts_with(&child))
      .map(|n| format!("{}/{}", base, n))
      .collect()
  }

  /// Gathers everything that can't be recovered from the data alone.
  pub fn export_metadata(&self) -> Metadata {
    let anchors = self
      .anchors
      .names()
      .map(|(&address, name)| StoredAnchor {
        name: name.clone(),
        address,
        format: self
          .runs
          .get(address)
          .map(Run::format_string)
          .unwrap_or_default(),
      })
      .collect::<Vec<_>>();
    let meta = Metadata {
      anchors,
      unmapped: self
        .anchors
        .unmapped()
        .map(|(&s, n)| (s, n.clone()))
        .collect(),
      matched_words: self
        .anchors
        .words()
        .map(|(&a, t)| (a, t.clone()))
        .collect(),
      lists: self.lists.clone(),
    };
    tracing::info!(
      anchors = meta.anchors.len(),
      unmapped = meta.unmapped.len(),
      words = meta.matched_words.len(),
      "exported metadata"
    );
    meta
  }

  /// Undoes the changes recorded in `delta`, which must be the most recent
  /// changes made to this model.
  pub fn revert(&mut self, delta: &Delta) {
    for (&addr, &(old, _)) in delta.data() {
      self.rom.set(addr, old);
    }

    for (&key, _) in delta.runs().added() {
      self.runs.remove_key(key);
    }
    for (_, run) in delta.runs().removed() {
      if let Err(e) = self.runs.insert(run.clone()) {
        tracing::warn!("could not restore run: {}", e);
      }
    }

    for (&addr, _) in delta.words().added() {
      self.anchors.remove_matched_word(addr);
    }
    for (&addr, table) in delta.words().removed() {
      self.anchors.add_matched_word(addr, table);
    }

    for (&source, _) in delta.unmapped().added() {
      self.anchors.remove_unmapped(source);
    }
    for (&source, name) in delta.unmapped().removed() {
      self.anchors.add_unmapped(source, name);
    }

    for (&addr, _) in delta.names().added() {
      self.anchors.remove_at(addr);
    }
    for (&addr, name) in delta.names().removed() {
      if self.anchors.define(addr, name).is_err() {
        tracing::warn!("could not restore name `{}` at {:06X}", name, addr);
      }
    }

    if let Some((old, _)) = delta.len_change() {
      self.rom.resize(old);
    }
    self.resizing.clear();
  }

  /// Replays the changes recorded in `delta`, which must have been reverted
  /// just before.
  pub fn reapply(&mut self, delta: &Delta) {
    if let Some((_, new)) = delta.len_change() {
      self.rom.resize(new);
    }

    for (&addr, _) in delta.names().removed() {
      self.anchors.remove_at(addr);
    }
    for (&addr, name) in delta.names().added() {
      if self.anchors.define(addr, name).is_err() {
        tracing::warn!("could not restore name `{}` at {:06X}", name, addr);
      }
    }

    for (&source, _) in delta.unmapped().removed() {
      self.anchors.remove_unmapped(source);
    }
    for (&source, name) in delta.unmapped().added() {
      self.anchors.add_unmapped(source, name);
    }

    for (&addr, _) in delta.words().removed() {
      self.anchors.remove_matched_word(addr);
    }
    for (&addr, table) in delta.words().added() {
      self.anchors.add_matched_word(addr, table);
    }

    for (&key, _) in delta.runs().removed() {
      self.runs.remove_key(key);
    }
    for (_, run) in delta.runs().added() {
      if let Err(e) = self.runs.insert(run.clone()) {
        tracing::warn!("could not restore run: {}", e);
      }
    }

    for (&addr, &(_, new)) in delta.data() {
      self.rom.set(addr, new);
    }
  }

  /// Runs `op` so that it either succeeds completely, with its changes
  /// folded into `delta`, or fails having changed nothing at all.
  fn atomically<T>(
    &mut self,
    delta: &mut Delta,
    op: impl FnOnce(&mut Self, &mut Delta) -> Result<T, Error>,
  ) -> Result<T, Error> {
    let mut local = Delta::new();
    let result = op(self, &mut local);
    self.resizing.clear();
    match result {
      Ok(value) => {
        delta.absorb(local);
        Ok(value)
      }
      Err(e) => {
        tracing::debug!("rolling back: {}", e);
        self.revert(&local);
        Err(e)
      }
    }
  }

  fn check_bounds(&self, addr: usize, len: usize) -> Result<(), Error> {
    match addr.checked_add(len) {
      Some(end) if end <= self.rom.len() => Ok(()),
      _ => Err(Error::OutOfBounds {
        addr: addr.saturating_add(len),
        len: self.rom.len(),
      }),
    }
  }

  fn set_byte(&mut self, delta: &mut Delta, addr: usize, byte: u8) -> Result<(), Error> {
    match self.rom.set(addr, byte) {
      Some(old) => {
        delta.change_data(addr, old, byte);
        Ok(())
      }
      None => Err(Error::OutOfBounds {
        addr,
        len: self.rom.len(),
      }),
    }
  }

  fn write_bytes(&mut self, delta: &mut Delta, addr: usize, bytes: &[u8]) -> Result<(), Error> {
    self.check_bounds(addr, bytes.len())?;
    for (i, &byte) in bytes.iter().enumerate() {
      self.set_byte(delta, addr + i, byte)?;
    }
    Ok(())
  }

  fn fill(&mut self, delta: &mut Delta, start: usize, end: usize, byte: u8) -> Result<(), Error> {
    for addr in start..end {
      self.set_byte(delta, addr, byte)?;
    }
    Ok(())
  }

  fn write_int(
    &mut self,
    delta: &mut Delta,
    addr: usize,
    width: Width,
    value: u32,
  ) -> Result<(), Error> {
    let bytes = Int::new(value, width).le_bytes().collect::<Vec<_>>();
    self.write_bytes(delta, addr, &bytes)
  }

  fn write_raw_pointer(
    &mut self,
    delta: &mut Delta,
    source: usize,
    dest: Option<usize>,
  ) -> Result<(), Error> {
    self.write_int(delta, source, Width::I32, encode_pointer(dest))
  }

  fn resize_rom(&mut self, delta: &mut Delta, len: usize) {
    let old = self.rom.len();
    tracing::debug!(old, new = len, "resizing data");
    self.rom.resize(len);
    delta.change_len(old, len);
  }

  fn put_run(&mut self, delta: &mut Delta, run: Run) -> Result<(), Error> {
    let added = run.clone();
    if let Some(old) = self.runs.insert(run)? {
      delta.remove_run(old);
    }
    delta.add_run(added);
    Ok(())
  }

  fn take_run(&mut self, delta: &mut Delta, key: RunKey) -> Option<Run> {
    let run = self.runs.remove_key(key)?;
    delta.remove_run(run.clone());
    Some(run)
  }

  fn put_name(&mut self, delta: &mut Delta, addr: usize, name: &str) -> Result<(), Error> {
    self
      .anchors
      .define(addr, name)
      .map_err(|existing| Error::Conflict {
        start: addr,
        len: 0,
        existing,
      })?;
    delta.add_name(addr, name);
    Ok(())
  }

  fn take_name(&mut self, delta: &mut Delta, addr: usize) -> Option<String> {
    let name = self.anchors.remove_at(addr)?;
    delta.remove_name(addr, &name);
    Some(name)
  }

  fn put_unmapped(&mut self, delta: &mut Delta, source: usize, name: &str) {
    self.take_unmapped(delta, source);
    self.anchors.add_unmapped(source, name);
    delta.add_unmapped(source, name);
  }

  fn take_unmapped(&mut self, delta: &mut Delta, source: usize) -> Option<String> {
    let name = self.anchors.remove_unmapped(source)?;
    delta.remove_unmapped(source, &name);
    Some(name)
  }

  fn put_word(&mut self, delta: &mut Delta, addr: usize, table: &str) {
    if self.anchors.word_at(addr) == Some(table) {
      return;
    }
    self.take_word(delta, addr);
    self.anchors.add_matched_word(addr, table);
    delta.add_word(addr, table);
  }

  fn take_word(&mut self, delta: &mut Delta, addr: usize) -> Option<String> {
    let table = self.anchors.remove_matched_word(addr)?;
    delta.remove_word(addr, &table);
    Some(table)
  }
}

impl Lookup for Model {
  fn data(&self) -> &[u8] {
    self.rom.bytes()
  }

  fn table_count(&self, name: &str) -> Option<usize> {
    let addr = self.anchors.address_of(name)?;
    Some(self.runs.get(addr)?.as_table()?.count)
  }
}

impl OptionSource for Model {
  fn options(&self, source: &str) -> Vec<String> {
    Model::options(self, source)
  }
}
