//! Scanning the data for pointers and text.
//!
//! Both scans fan out over the data in parallel without touching the model,
//! then merge their findings under a lock. Only after that are the findings
//! checked against the run index and written, one at a time.

use std::collections::HashSet;
use std::ops::Range;

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::debug;
use tracing::info;

use crate::delta::Delta;
use crate::int::decode_pointer;
use crate::pcs;
use crate::run::Run;
use crate::run::RunKind;
use crate::run::SortedSpan;

use super::Model;

impl Model {
  /// Finds every four bytes in the data that look like a pointer to one of
  /// `targets`, as `(source, destination)` pairs sorted by source.
  ///
  /// This only reads the data; nothing is checked against the run index.
  pub fn find_pointers_to(&self, targets: &[usize]) -> Vec<(usize, usize)> {
    let targets = targets.iter().copied().collect::<HashSet<_>>();
    let data = self.rom.bytes();
    let chunk = self.options.search_chunk.max(4);
    let last = data.len().saturating_sub(3);
    let found = Mutex::new(Vec::new());

    (0..(last + chunk - 1) / chunk).into_par_iter().for_each(|i| {
      let start = i * chunk;
      let end = (start + chunk).min(last);
      let mut local = Vec::new();
      for source in start..end {
        if data[source + 3] != 0x08 && data[source + 3] != 0x09 {
          continue;
        }
        let value = u32::from_le_bytes([
          data[source],
          data[source + 1],
          data[source + 2],
          data[source + 3],
        ]);
        if let Some(dest) = decode_pointer(value) {
          if targets.contains(&dest) {
            local.push((source, dest));
          }
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

  /// Finds pointers to `targets` and makes each believable one into a
  /// pointer run. Candidates inside `exclude` are skipped.
  ///
  /// The destinations are not told about their new sources; that is up to
  /// the caller.
  pub(super) fn search_for_pointers_to_anchor(
    &mut self,
    delta: &mut Delta,
    targets: &[usize],
    exclude: Range<usize>,
  ) -> Vec<(usize, usize)> {
    let candidates = self.find_pointers_to(targets);
    let mut accepted = Vec::new();
    let mut last_end = 0;
    for (source, dest) in candidates {
      if source < last_end || exclude.contains(&source) || exclude.contains(&(source + 3)) {
        continue;
      }
      if self.is_valid_pointer_result(delta, source) {
        accepted.push((source, dest));
        last_end = source + 4;
      }
    }
    accepted
  }

  /// Decides whether a pointer found by searching is believable, given what
  /// is already known about its surroundings, and formats it as a pointer if
  /// so.
  fn is_valid_pointer_result(&mut self, delta: &mut Delta, source: usize) -> bool {
    if let Some(run) = self.runs.get_sized(source).cloned() {
      return match &run.kind {
        RunKind::Pointer => true,
        RunKind::Table(table) => table.segments.first().map_or(false, |s| s.is_pointer()),
        RunKind::NoInfo => {
          let pointer = Run::pointer(source).merge_anchor(&run.sources);
          self.put_run(delta, pointer).is_ok()
        }
        _ => false,
      };
    }

    let container = self.runs.lookup(source);
    if !container.is_null() {
      return container.as_table().is_some() && container.has_pointer_at(source);
    }
    self.put_run(delta, Run::pointer(source)).is_ok()
  }

  /// Looks for text at each of `addrs`. Each one that holds text and has
  /// pointers to it becomes a text run.
  ///
  /// Returns the number of text runs added.
  pub fn consider_results_as_text_runs(&mut self, delta: &mut Delta, addrs: &[usize]) -> usize {
    let candidates = Mutex::new(Vec::new());
    let model = &*self;
    addrs.par_iter().for_each(|&addr| {
      let next = model.runs.next_run(addr);
      if next.start < addr || (next.start == addr && !next.is_no_info()) {
        return;
      }
      let len = match pcs::read_len(model.rom.bytes(), addr, true) {
        Some(len) if len > 1 => len,
        _ => return,
      };
      let after = model.runs.next_run(addr + 1);
      if !after.is_null() && after.start < addr + len {
        return;
      }
      candidates.lock().push((addr, len));
    });
    let mut candidates = candidates.into_inner();
    candidates.sort_unstable();

    let mut added = 0;
    for (addr, len) in candidates {
      let result = self.atomically(delta, |model, delta| {
        let existing = model.runs.get(addr).map(|r| r.sources.clone());
        let mut sources = existing.unwrap_or_else(SortedSpan::new);
        let found = model.search_for_pointers_to_anchor(delta, &[addr], addr..addr + len);
        for (source, _) in &found {
          sources.insert(*source);
        }
        if sources.is_empty() {
          return Ok(false);
        }
        let run = Run {
          start: addr,
          sources,
          kind: RunKind::Pcs { len },
        };
        model.observe_anchor_written(delta, "", run)?;
        Ok(true)
      });
      match result {
        Ok(true) => added += 1,
        Ok(false) => {}
        Err(e) => debug!(addr, "not text: {}", e),
      }
    }
    info!(candidates = addrs.len(), added, "text search complete");
    added
  }
}
