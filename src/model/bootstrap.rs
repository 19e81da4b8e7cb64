//! Building a model, either by guessing at bare data or from saved metadata.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::anchor::AnchorTable;
use crate::delta::Delta;
use crate::format::parse_format;
use crate::format::split_name_and_format;
use crate::format::Format;
use crate::index::RunIndex;
use crate::int::decode_pointer;
use crate::meta::Metadata;
use crate::meta::StoredAnchor;
use crate::pcs;
use crate::rom::Rom;
use crate::run::LengthSource;
use crate::run::Run;
use crate::run::RunKind;
use crate::run::SegmentKind;
use crate::run::SortedSpan;

use super::Model;
use super::Options;

/// Returns the names of the tables that `anchor`'s layout depends on.
fn dependencies(anchor: &StoredAnchor) -> Vec<String> {
  let (_, format) = split_name_and_format(&anchor.text());
  let table = match parse_format(&format) {
    Ok(Format::Table(table)) => table,
    _ => return Vec::new(),
  };
  let mut names = Vec::new();
  if let LengthSource::Anchor { name, .. } = &table.length {
    names.push(name.to_lowercase());
  }
  for segment in &table.segments {
    if let SegmentKind::BitArray { source } = &segment.kind {
      names.push(source.to_lowercase());
    }
  }
  names
}

/// Orders `anchors` so that each table comes after the tables its length
/// and layout depend on, wherever that is possible.
fn dependency_order(anchors: &[StoredAnchor]) -> Vec<&StoredAnchor> {
  let mut pending = anchors
    .iter()
    .map(|a| (a, dependencies(a)))
    .collect::<Vec<_>>();
  let mut waiting = pending
    .iter()
    .map(|(a, _)| a.name.to_lowercase())
    .collect::<BTreeSet<_>>();

  let mut ordered = Vec::with_capacity(anchors.len());
  loop {
    let (ready, blocked): (Vec<_>, Vec<_>) = pending
      .into_iter()
      .partition(|(a, deps)| deps.iter().all(|d| *d == a.name.to_lowercase() || !waiting.contains(d)));
    if ready.is_empty() {
      ordered.extend(blocked.into_iter().map(|(a, _)| a));
      return ordered;
    }
    for (anchor, _) in ready {
      waiting.remove(&anchor.name.to_lowercase());
      ordered.push(anchor);
    }
    pending = blocked;
  }
}

impl Model {
  /// Creates a model of `data`, guessing at its pointers and text.
  pub fn new(data: Vec<u8>) -> Self {
    Self::with_options(data, None, Options::default())
  }

  /// Creates a model of `data` from saved metadata. Nothing is guessed.
  pub fn load(data: Vec<u8>, metadata: &Metadata) -> Self {
    Self::with_options(data, Some(metadata), Options::default())
  }

  /// Creates a model of `data`, loading `metadata` if there is any and
  /// guessing otherwise.
  pub fn with_options(data: Vec<u8>, metadata: Option<&Metadata>, options: Options) -> Self {
    let mut model = Self {
      rom: Rom::new(data),
      runs: RunIndex::new(),
      anchors: AnchorTable::new(),
      lists: BTreeMap::new(),
      options,
      resizing: Vec::new(),
    };
    match metadata {
      Some(metadata) => model.apply_metadata(metadata),
      None => model.bootstrap(),
    }
    model
  }

  /// Finds every aligned word that looks like a pointer, as
  /// `(source, destination)` pairs sorted by source.
  ///
  /// A pointer must point to an aligned address in the data, no earlier
  /// than `earliest_allowed_anchor`, and not at four bytes of `0xff`.
  fn discover_pointers(&self) -> Vec<(usize, usize)> {
    let data = self.rom.bytes();
    let earliest = self.options.earliest_allowed_anchor;
    let chunk = (self.options.search_chunk.max(4) + 3) & !3;
    let found = Mutex::new(Vec::new());

    (0..(data.len() + chunk - 1) / chunk).into_par_iter().for_each(|i| {
      let start = i * chunk;
      let end = (start + chunk).min(data.len());
      let mut local = Vec::new();
      for source in (start..end).step_by(4) {
        let bytes = match data.get(source..source + 4) {
          Some(bytes) => bytes,
          None => break,
        };
        let value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let dest = match decode_pointer(value) {
          Some(dest) if dest % 4 == 0 && dest >= earliest => dest,
          _ => continue,
        };
        match data.get(dest..dest + 4) {
          Some(target) if target != [0xff; 4] => local.push((source, dest)),
          _ => {}
        }
      }
      if !local.is_empty() {
        found.lock().extend(local);
      }
    });

    let mut found = found.into_inner();
    found.sort_unstable();
    found
  }

  /// Guesses at the structure of bare data: every likely pointer becomes a
  /// pointer run, every destination an untyped run, and every destination
  /// that holds text a text run.
  fn bootstrap(&mut self) {
    let pointers = self.discover_pointers();
    let mut sources = BTreeMap::<usize, SortedSpan>::new();
    for &(source, dest) in &pointers {
      sources.entry(dest).or_default().insert(source);
    }

    let mut runs = BTreeMap::new();
    for &(source, _) in &pointers {
      runs.insert(source, Run::pointer(source));
    }
    for (&dest, span) in &sources {
      let run = runs.remove(&dest).unwrap_or_else(|| Run::no_info(dest));
      runs.insert(dest, run.merge_anchor(span));
    }
    for (_, run) in runs {
      let start = run.start;
      if let Err(e) = self.runs.insert(run) {
        debug!(start, "dropping guessed run: {}", e);
      }
    }

    let destinations = sources.keys().copied().collect::<Vec<_>>();
    let texts = self.classify_text(&destinations);
    let mut scratch = Delta::new();
    let mut strings = 0;
    for (addr, len) in texts {
      let run = match self.runs.get(addr) {
        Some(run) if run.is_no_info() => Run {
          kind: RunKind::Pcs { len },
          ..run.clone()
        },
        _ => continue,
      };
      match self.observe_run_written(&mut scratch, run) {
        Ok(()) => strings += 1,
        Err(e) => debug!(addr, "not text: {}", e),
      }
    }
    info!(
      pointers = pointers.len(),
      destinations = destinations.len(),
      strings,
      "bootstrapped"
    );
  }

  /// Picks out the addresses in `addrs` that hold text which fits before the
  /// next known run, returning each with its length.
  fn classify_text(&self, addrs: &[usize]) -> Vec<(usize, usize)> {
    let found = Mutex::new(Vec::new());
    addrs.par_iter().for_each(|&addr| {
      let len = match pcs::read_len(self.rom.bytes(), addr, false) {
        Some(len) if len > 1 => len,
        _ => return,
      };
      let next = self.runs.next_run(addr + 1);
      if next.is_null() || next.start >= addr + len {
        found.lock().push((addr, len));
      }
    });
    let mut found = found.into_inner();
    found.sort_unstable();
    found
  }

  /// Loads saved metadata into a model that has nothing in it yet.
  ///
  /// Anything that no longer fits the data is skipped with a warning.
  fn apply_metadata(&mut self, metadata: &Metadata) {
    self.lists = metadata.lists.clone();

    let mut scratch = Delta::new();
    let mut anchors = 0;
    for anchor in dependency_order(&metadata.anchors) {
      let text = anchor.text();
      let result = self.atomically(&mut scratch, |model, delta| {
        model.apply_anchor(delta, anchor.address, &text, true)
      });
      match result {
        Ok(None) => anchors += 1,
        Ok(Some(warning)) => {
          warn!("anchor at {:06X}: {}", anchor.address, warning);
          anchors += 1;
        }
        Err(e) => warn!("skipping anchor `{}` at {:06X}: {}", text, anchor.address, e),
      }
    }

    for (&source, name) in &metadata.unmapped {
      if self.rom.read_pointer(source).is_some() {
        warn!("skipping unmapped pointer at {:06X}: not null", source);
        continue;
      }
      if self.runs.lookup(source).is_null() {
        if let Err(e) = self.runs.insert(Run::pointer(source)) {
          warn!("skipping unmapped pointer at {:06X}: {}", source, e);
          continue;
        }
      }
      self.anchors.add_unmapped(source, name);
    }

    let mut words = 0;
    for (&addr, table) in &metadata.matched_words {
      let word = Run::new(
        addr,
        RunKind::Word {
          table: table.clone(),
        },
      );
      let result = self.atomically(&mut scratch, |model, delta| {
        model.check_bounds(addr, 4)?;
        model.observe_run_written(delta, word)
      });
      match result {
        Ok(()) => words += 1,
        Err(e) => warn!("skipping matched word at {:06X}: {}", addr, e),
      }
    }

    info!(
      anchors,
      unmapped = self.anchors.unmapped().count(),
      words,
      lists = self.lists.len(),
      "loaded metadata"
    );
  }
}
