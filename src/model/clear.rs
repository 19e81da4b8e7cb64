//! Removing formats.
//!
//! Clearing a range forgets what the runs inside it are, while keeping track
//! of what points into it. Named runs leave their pointers waiting for the
//! name to come back. Unnamed runs at the start of the range stay behind as
//! untyped runs if anything points to them. Unnamed runs further in are
//! assumed to have been misidentified, along with their pointers.

use crate::delta::Delta;
use crate::error::Error;
use crate::run::Run;
use crate::run::RunKey;
use crate::run::RunKind;

use super::Model;

impl Model {
  /// Removes the formats of every run overlapping `len` bytes at `start`,
  /// leaving the data alone.
  pub fn clear_format(&mut self, delta: &mut Delta, start: usize, len: usize) -> Result<(), Error> {
    self.atomically(delta, |model, delta| {
      model.check_bounds(start, len)?;
      model.clear_marker(delta, start)?;
      model.clear_range(delta, start, len, false)
    })
  }

  /// Removes the formats of every run overlapping `len` bytes at `start`,
  /// and erases the data under them (and the rest of the range) to `0xff`.
  pub fn clear_format_and_data(
    &mut self,
    delta: &mut Delta,
    start: usize,
    len: usize,
  ) -> Result<(), Error> {
    self.atomically(delta, |model, delta| {
      model.check_bounds(start, len)?;
      model.clear_marker(delta, start)?;
      model.clear_range(delta, start, len, true)
    })
  }

  /// Clears the zero-length run at `addr`, if there is one.
  fn clear_marker(&mut self, delta: &mut Delta, addr: usize) -> Result<(), Error> {
    match self.runs.get_key((addr, false)).cloned() {
      Some(run) => {
        self.clear_table_pointers(delta, &run)?;
        self.clear_anchor_format(delta, addr, run.key())
      }
      None => Ok(()),
    }
  }

  /// Clears every run overlapping `len` bytes at `start`. A zero-length run
  /// at `start` itself overlaps nothing, and stays.
  pub(super) fn clear_range(
    &mut self,
    delta: &mut Delta,
    start: usize,
    len: usize,
    also_data: bool,
  ) -> Result<(), Error> {
    let end = start.saturating_add(len);
    let mut at = start;
    while at < end {
      let mut run = self.runs.next_run(at).clone();
      if run.is_empty() && run.start == start {
        run = match self.runs.get_sized(start) {
          Some(sized) => sized.clone(),
          None => self.runs.next_run(start + 1).clone(),
        };
      }
      if also_data {
        let gap_end = run.start.min(end);
        if gap_end > at {
          self.fill(delta, at, gap_end, 0xff)?;
        }
      }
      if run.is_null() || run.start >= end {
        break;
      }

      match &run.kind {
        RunKind::Pointer => self.clear_pointer_format(delta, run.start)?,
        RunKind::Table(_) => self.clear_table_pointers(delta, &run)?,
        RunKind::Word { .. } => {
          self.take_word(delta, run.start);
        }
        _ => {}
      }
      self.clear_anchor_format(delta, start, run.key())?;
      if also_data {
        self.fill(delta, run.start, run.end(), 0xff)?;
      }
      at = match self.runs.get_key(run.key()) {
        Some(_) if run.is_empty() => run.start + 1,
        None if run.is_empty() => run.start,
        _ => run.end().max(at + 1),
      };
    }
    Ok(())
  }

  /// Unregisters every pointer stored in the table `run` from whatever it
  /// points to.
  pub(super) fn clear_table_pointers(&mut self, delta: &mut Delta, run: &Run) -> Result<(), Error> {
    let sources = run
      .pointer_fields()
      .into_iter()
      .map(|(source, _)| source)
      .collect::<Vec<_>>();
    for source in sources {
      self.clear_pointer_format(delta, source)?;
    }
    Ok(())
  }

  /// Unregisters the pointer at `source` from whatever it points to.
  ///
  /// If that leaves the destination with no pointers and no name, it is
  /// forgotten. A null pointer waiting for a name stops waiting.
  pub(super) fn clear_pointer_format(&mut self, delta: &mut Delta, source: usize) -> Result<(), Error> {
    let dest = match self.rom.read_pointer(source) {
      Some(dest) if dest < self.rom.len() => dest,
      _ => {
        self.take_unmapped(delta, source);
        return Ok(());
      }
    };

    if let Some(run) = self.runs.get(dest).cloned() {
      if !run.sources.contains(source) {
        return Ok(());
      }
      let run = run.remove_source(source);
      let orphan = run.sources.is_empty() && !run.is_pointer();
      if orphan && self.anchors.name_at(dest).is_none() {
        self.take_run(delta, run.key());
        return Ok(());
      }
      return self.put_run(delta, run);
    }

    let mut container = self.runs.lookup(dest).clone();
    let found = match &mut container.kind {
      RunKind::Table(table) => table.remove_inner_source(source),
      _ => false,
    };
    if found {
      self.put_run(delta, container)?;
    }
    Ok(())
  }

  /// Removes the format of the run with `key`, as part of clearing a range
  /// beginning at `range_start`.
  fn clear_anchor_format(
    &mut self,
    delta: &mut Delta,
    range_start: usize,
    key: RunKey,
  ) -> Result<(), Error> {
    let run = match self.runs.get_key(key).cloned() {
      Some(run) => run,
      None => return Ok(()),
    };
    let addr = run.start;

    // A pointer or word behind a zero-length run; the anchor isn't its own.
    if self.runs.get(addr).map(Run::key) != Some(key) {
      self.take_run(delta, key);
      return Ok(());
    }

    if let Some(name) = self.anchors.name_at(addr).map(String::from) {
      for source in run.sources.iter() {
        self.write_raw_pointer(delta, source, None)?;
        self.put_unmapped(delta, source, &name);
      }
      if let Some(table) = run.as_table() {
        for (index, source) in table.inner_pointers() {
          self.write_raw_pointer(delta, source, None)?;
          self.put_unmapped(delta, source, &format!("{}/{}", name, index));
        }
      }
      self.take_name(delta, addr);
      self.take_run(delta, key);
      return Ok(());
    }

    if let Some(table) = run.as_table() {
      for (_, source) in table.inner_pointers() {
        self.forget_pointer(delta, source)?;
      }
    }

    // An untyped run would collide with whatever shares the address.
    if run.is_empty() && self.runs.get_sized(addr).is_some() {
      for source in run.sources.iter() {
        self.forget_pointer(delta, source)?;
      }
      self.take_run(delta, key);
      return Ok(());
    }

    let keep = Run {
      kind: RunKind::NoInfo,
      ..run.clone()
    };
    if addr != range_start {
      let from_table = run
        .sources
        .iter()
        .any(|s| self.runs.lookup(s).as_table().is_some());
      if from_table {
        return self.put_run(delta, keep);
      }

      for source in run.sources.iter() {
        match self.runs.get_sized(source).cloned() {
          Some(pointer) if pointer.is_pointer() && pointer.sources.is_empty() => {
            self.take_run(delta, pointer.key());
          }
          Some(pointer) if pointer.is_pointer() => {
            self.put_run(
              delta,
              Run {
                kind: RunKind::NoInfo,
                ..pointer
              },
            )?;
          }
          _ => {}
        }
      }
      self.take_run(delta, key);
      return Ok(());
    }

    if run.sources.is_empty() {
      self.take_run(delta, key);
      Ok(())
    } else {
      self.put_run(delta, keep)
    }
  }
}
