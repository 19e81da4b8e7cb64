//! The run index: every known run, sorted by address.

use crate::error::Error;
use crate::run::Run;
use crate::run::RunKey;
use crate::run::RunKind;
use crate::run::NULL_RUN;

/// A sorted, non-overlapping collection of runs.
///
/// Runs are keyed by their start address; lookups are binary searches. The
/// one exception to "one run per address" is a zero-length run, such as an
/// empty table, which marks a place where data may be appended. A bare
/// pointer or matched word may start at the same address; the zero-length
/// run comes first.
#[derive(Clone, Debug, Default)]
pub struct RunIndex {
  runs: Vec<Run>,
}

impl RunIndex {
  /// Creates an empty `RunIndex`.
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the number of runs.
  pub fn len(&self) -> usize {
    self.runs.len()
  }

  /// Returns whether there are no runs.
  pub fn is_empty(&self) -> bool {
    self.runs.is_empty()
  }

  /// Iterates over every run, in address order.
  pub fn iter(&self) -> impl Iterator<Item = &Run> + '_ {
    self.runs.iter()
  }

  /// Iterates over the runs that start at or after `addr`.
  pub fn iter_from(&self, addr: usize) -> impl Iterator<Item = &Run> + '_ {
    let i = match self.search(addr) {
      Ok(i) | Err(i) => i,
    };
    self.runs[i..].iter()
  }

  /// Binary searches for the first run starting at `addr`. On failure,
  /// returns where such a run would go.
  pub fn search(&self, addr: usize) -> Result<usize, usize> {
    let i = self.runs.partition_point(|r| r.start < addr);
    match self.runs.get(i) {
      Some(run) if run.start == addr => Ok(i),
      _ => Err(i),
    }
  }

  /// Returns the run at position `i` in address order.
  pub fn at(&self, i: usize) -> &Run {
    self.runs.get(i).unwrap_or(&NULL_RUN)
  }

  /// Returns the run starting exactly at `addr`. If a zero-length run starts
  /// there, that is the one returned, since it carries the anchor.
  pub fn get(&self, addr: usize) -> Option<&Run> {
    self.search(addr).ok().map(|i| &self.runs[i])
  }

  /// Returns the run with the given key.
  pub fn get_key(&self, key: RunKey) -> Option<&Run> {
    let i = self.runs.binary_search_by_key(&key, Run::key).ok()?;
    Some(&self.runs[i])
  }

  /// Returns the run that occupies bytes starting at `addr`.
  pub fn get_sized(&self, addr: usize) -> Option<&Run> {
    self.get_key((addr, true))
  }

  /// Returns the run containing `addr`, or the null run. Zero-length runs
  /// contain nothing.
  pub fn lookup(&self, addr: usize) -> &Run {
    let i = self.runs.partition_point(|r| r.start <= addr);
    match i.checked_sub(1).map(|i| &self.runs[i]) {
      Some(run) if run.contains(addr) => run,
      _ => &NULL_RUN,
    }
  }

  /// Returns the run containing `addr` or, failing that, the first run at or
  /// after it. Returns the null run if there is neither.
  pub fn next_run(&self, addr: usize) -> &Run {
    match self.search(addr) {
      Ok(i) => &self.runs[i],
      Err(i) if i > 0 && self.runs[i - 1].contains(addr) => &self.runs[i - 1],
      Err(i) => self.at(i),
    }
  }

  /// Returns the first run at or after `addr` that could carry an anchor.
  pub fn next_anchor(&self, addr: usize) -> &Run {
    self
      .iter_from(addr)
      .find(|r| r.is_anchor())
      .unwrap_or(&NULL_RUN)
  }

  /// Returns whether `addr` is just past the last element of a table.
  pub fn is_at_end_of_table(&self, addr: usize) -> bool {
    match self.search(addr) {
      Ok(i) | Err(i) if i > 0 => match &self.runs[i - 1].kind {
        RunKind::Table(table) => {
          let run = &self.runs[i - 1];
          run.start + table.stride() * table.count == addr
        }
        _ => false,
      },
      _ => false,
    }
  }

  /// Finds the position of the run that `run` would replace (`Ok`), or where
  /// it would be inserted (`Err`).
  ///
  /// A run replaces whatever starts at the same address, except that a
  /// zero-length run and a run that may follow one are kept side by side.
  fn place(&self, run: &Run) -> Result<usize, usize> {
    let i = self.runs.partition_point(|r| r.start < run.start);
    let starts_here = |j: usize| self.runs.get(j).filter(|r| r.start == run.start);
    let marker = starts_here(i).filter(|r| r.is_empty()).map(|_| i);
    let after = marker.map_or(i, |m| m + 1);
    let sized = starts_here(after).filter(|r| !r.is_empty()).map(|_| after);

    match (run.is_empty(), marker, sized) {
      (true, Some(m), _) => Ok(m),
      (true, None, Some(s)) if self.runs[s].may_follow_marker() => Err(s),
      (true, None, Some(s)) => Ok(s),
      (false, _, Some(s)) if run.may_follow_marker() => Ok(s),
      (false, Some(m), None) if run.may_follow_marker() => Err(m + 1),
      (false, Some(m), _) => Ok(m),
      (false, None, Some(s)) => Ok(s),
      (_, None, None) => Err(i),
    }
  }

  /// Returns the run that inserting `run` would replace, if any.
  pub fn replaced_by(&self, run: &Run) -> Option<&Run> {
    self.place(run).ok().map(|i| &self.runs[i])
  }

  /// Checks whether `run` fits between its neighbors, ignoring the run it
  /// would replace.
  pub fn check_fit(&self, run: &Run) -> Result<(), Error> {
    let conflict = |existing: &Run| Error::Conflict {
      start: run.start,
      len: run.len(),
      existing: existing.start,
    };

    let (prev, next) = match self.place(run) {
      Ok(i) => (i.checked_sub(1), i + 1),
      Err(i) => (i.checked_sub(1), i),
    };
    if let Some(prev) = prev.map(|i| &self.runs[i]) {
      if prev.end() > run.start {
        return Err(conflict(prev));
      }
    }
    if let Some(next) = self.runs.get(next) {
      if run.end() > next.start {
        return Err(conflict(next));
      }
    }
    Ok(())
  }

  /// Inserts `run`, replacing the run it lines up with, if any.
  ///
  /// Fails with a `Conflict` if `run` overlaps any other run; in that case,
  /// nothing changes. On success, returns the replaced run, if any.
  pub fn insert(&mut self, run: Run) -> Result<Option<Run>, Error> {
    self.check_fit(&run)?;
    tracing::debug!(start = run.start, len = run.len(), "insert run");
    match self.place(&run) {
      Ok(i) => Ok(Some(std::mem::replace(&mut self.runs[i], run))),
      Err(i) => {
        self.runs.insert(i, run);
        Ok(None)
      }
    }
  }

  /// Removes the first run starting at `addr`, returning it.
  pub fn remove(&mut self, addr: usize) -> Option<Run> {
    let i = self.search(addr).ok()?;
    tracing::debug!(start = addr, "remove run");
    Some(self.runs.remove(i))
  }

  /// Inserts `run` without checking that it fits, for building broken
  /// indexes in tests.
  #[cfg(test)]
  pub(crate) fn insert_unchecked(&mut self, run: Run) {
    let i = self.runs.partition_point(|r| r.key() < run.key());
    self.runs.insert(i, run);
  }

  /// Removes the run with the given key, returning it.
  pub fn remove_key(&mut self, key: RunKey) -> Option<Run> {
    let i = self.runs.binary_search_by_key(&key, Run::key).ok()?;
    tracing::debug!(start = key.0, "remove run");
    Some(self.runs.remove(i))
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::run::LengthSource;
  use crate::run::Segment;
  use crate::run::SegmentKind;
  use crate::run::Table;

  fn index() -> RunIndex {
    let mut index = RunIndex::new();
    index.insert(Run::pointer(0x10)).unwrap();
    index.insert(Run::new(0x20, RunKind::Pcs { len: 8 })).unwrap();
    index.insert(Run::no_info(0x30)).unwrap();
    index
  }

  #[test]
  fn lookups() {
    let index = index();
    assert_eq!(index.lookup(0x12).start, 0x10);
    assert!(index.lookup(0x14).is_null());
    assert_eq!(index.next_run(0x14).start, 0x20);
    assert_eq!(index.next_run(0x27).start, 0x20);
    assert!(index.next_run(0x31).is_null());
    assert_eq!(index.get(0x20).map(|r| r.len()), Some(8));
    assert!(index.get(0x21).is_none());

    // Bare pointers are not anchors.
    assert_eq!(index.next_anchor(0).start, 0x20);
  }

  #[test]
  fn conflicts() {
    let mut index = index();
    let err = index.insert(Run::pointer(0x1e)).unwrap_err();
    assert_eq!(
      err,
      Error::Conflict {
        start: 0x1e,
        len: 4,
        existing: 0x20
      }
    );
    assert!(index.insert(Run::pointer(0x12)).is_err());
    assert_eq!(index.len(), 3);

    // Same start replaces.
    let old = index.insert(Run::new(0x20, RunKind::Pcs { len: 4 })).unwrap();
    assert_eq!(old.map(|r| r.len()), Some(8));
    assert!(index.insert(Run::pointer(0x24)).is_ok());
    assert!(index.insert(Run::new(0x20, RunKind::Pcs { len: 8 })).is_err());

    assert!(index.remove(0x24).is_some());
    assert!(index.remove(0x24).is_none());
  }

  #[test]
  fn end_of_table() {
    let mut index = RunIndex::new();
    let table = Table::new(
      vec![Segment::new("a", 2, SegmentKind::Integer)],
      3,
      LengthSource::Terminator(vec![0xff, 0xff]),
    );
    index.insert(Run::new(0x40, RunKind::Table(table))).unwrap();
    assert!(index.is_at_end_of_table(0x46));
    assert!(!index.is_at_end_of_table(0x44));
    assert!(!index.is_at_end_of_table(0x40));
  }

  #[test]
  fn markers() {
    let mut index = RunIndex::new();
    let empty = Table::new(
      vec![Segment::new("v", 1, SegmentKind::Integer)],
      0,
      LengthSource::Fixed(0),
    );
    let marker = Run::new(0x40, RunKind::Table(empty));
    assert!(marker.is_empty());
    assert_eq!(index.insert(marker.clone()).unwrap(), None);
    assert_eq!(index.insert(Run::pointer(0x40)).unwrap(), None);
    assert_eq!(index.len(), 2);

    assert_eq!(index.get(0x40), Some(&marker));
    assert!(index.get_sized(0x40).unwrap().is_pointer());
    assert!(index.lookup(0x40).is_pointer());
    assert!(index.lookup(0x44).is_null());
    assert_eq!(index.replaced_by(&Run::pointer(0x40)).map(Run::key), Some((0x40, true)));

    // Only bare pointers and words may share a start with a marker.
    assert!(index.insert(Run::no_info(0x40)).is_err());
    assert!(index.insert(Run::pointer(0x40).with_source(0x80)).is_err());
    assert_eq!(index.len(), 2);

    assert!(index.remove_key((0x40, false)).is_some());
    assert!(index.get(0x40).unwrap().is_pointer());
    assert_eq!(index.insert(marker).unwrap(), None);
    assert!(index.get(0x40).unwrap().is_empty());
  }
}
