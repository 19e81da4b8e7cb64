//! Finding free space, and moving runs that have outgrown their place.

use tracing::debug;

use crate::delta::Delta;
use crate::error::Error;
use crate::run::Run;
use crate::run::RunKind;

use super::Model;

/// Rounds `addr` up to a multiple of four.
fn align(addr: usize) -> usize {
  (addr + 3) & !3
}

impl Model {
  /// Makes sure the run at `addr` has room for `min_len` bytes, moving it
  /// somewhere else if it can't grow in place.
  ///
  /// Returns the run's address afterwards.
  pub fn ensure_capacity(
    &mut self,
    delta: &mut Delta,
    addr: usize,
    min_len: usize,
  ) -> Result<usize, Error> {
    self.atomically(delta, |model, delta| {
      let run = model.runs.get(addr).cloned().ok_or(Error::OutOfBounds {
        addr,
        len: model.rom.len(),
      })?;
      Ok(model.relocate_for_expansion(delta, run, min_len)?.start)
    })
  }

  /// Returns `run` unchanged if it can grow to `min_len` bytes where it is;
  /// otherwise, moves it to free space (growing the data if there is none)
  /// and returns it at its new address.
  pub(super) fn relocate_for_expansion(
    &mut self,
    delta: &mut Delta,
    run: Run,
    min_len: usize,
  ) -> Result<Run, Error> {
    if min_len <= run.len() || self.can_safely_use(run.end(), run.start + min_len) {
      return Ok(run);
    }

    let start = self.options.free_space_start;
    let to = match self.find_free_space(start, min_len) {
      Some(to) => to,
      None => {
        let to = align(self.rom.len());
        self.resize_rom(delta, to + min_len);
        to
      }
    };
    debug!(from = run.start, to, len = min_len, "relocating run");
    self.move_run(delta, run, to)
  }

  /// Finds a four-byte aligned stretch of at least `min_len` unused bytes,
  /// plus some margin, at or after `start`.
  ///
  /// Unused bytes are `0xff` and belong to no run.
  pub fn find_free_space(&self, start: usize, min_len: usize) -> Option<usize> {
    let needed = min_len + self.options.free_space_margin;
    let spacer = self.options.free_space_spacer;
    let data = self.rom.bytes();

    let mut at = align(start);
    while at + needed <= data.len() {
      let run = self.runs.next_run(at);
      if !run.is_null() && run.start < at + needed {
        at = align(run.end().max(at) + spacer).max(at + 4);
        continue;
      }
      if let Some(i) = data[at..at + needed].iter().rposition(|&b| b != 0xff) {
        at = align(at + i + 1 + spacer);
        continue;
      }
      return Some(at);
    }
    None
  }

  /// Checks that nothing uses `start..end`: no run starts inside it, and its
  /// bytes are all `0xff` or `0x00`.
  pub(super) fn can_safely_use(&self, start: usize, end: usize) -> bool {
    if end > self.rom.len() {
      return false;
    }
    let blocker = self
      .runs
      .iter_from(start)
      .find(|r| !(r.start == start && r.is_empty()));
    if let Some(run) = blocker {
      if run.start < end {
        return false;
      }
    }
    if self.runs.lookup(start).start < start {
      return false;
    }
    self.rom.is_free(start, end)
  }

  /// Moves `run` to `to`: copies its bytes, erases the old ones, points its
  /// sources at the new address, and carries its name and anything its
  /// pointers were registered with.
  pub(super) fn move_run(&mut self, delta: &mut Delta, run: Run, to: usize) -> Result<Run, Error> {
    let from = run.start;
    let len = run.len();
    self.check_bounds(to, len)?;

    for source in run.sources.iter() {
      self.write_raw_pointer(delta, source, Some(to))?;
    }
    if let Some(table) = run.as_table() {
      let stride = table.stride();
      for (index, source) in table.inner_pointers() {
        self.write_raw_pointer(delta, source, Some(to + index * stride))?;
      }
    }

    let bytes = self.rom.bytes()[from..from + len].to_vec();
    self.fill(delta, from, from + len, 0xff)?;
    self.write_bytes(delta, to, &bytes)?;

    self.take_run(delta, run.key());
    let moved = run.duplicate(to);
    self.put_run(delta, moved.clone())?;

    if let Some(name) = self.take_name(delta, from) {
      self.put_name(delta, to, &name)?;
    }
    if let RunKind::Word { table } = &run.kind {
      self.take_word(delta, from);
      self.put_word(delta, to, table);
    }

    let old_fields = run.pointer_fields().into_iter().map(|(a, _)| a);
    let new_fields = moved.pointer_fields().into_iter().map(|(a, _)| a);
    for (old, new) in old_fields.zip(new_fields).collect::<Vec<_>>() {
      if let Some(name) = self.take_unmapped(delta, old) {
        self.put_unmapped(delta, new, &name);
      }
      if let Some(dest) = self.rom.read_pointer(new) {
        self.rekey_source(delta, dest, old, new)?;
      }
    }
    Ok(moved)
  }

  /// Tells whatever is at `dest` that its pointer at `old` now lives at
  /// `new`.
  fn rekey_source(&mut self, delta: &mut Delta, dest: usize, old: usize, new: usize) -> Result<(), Error> {
    if let Some(run) = self.runs.get(dest).cloned() {
      if run.sources.contains(old) {
        self.put_run(delta, run.remove_source(old).with_source(new))?;
      }
      return Ok(());
    }

    let mut container = self.runs.lookup(dest).clone();
    let start = container.start;
    if let RunKind::Table(table) = &mut container.kind {
      if table.remove_inner_source(old) {
        if let Some(index) = table.element_at(dest - start) {
          table.add_inner_source(index, new);
        }
        return self.put_run(delta, container);
      }
    }
    Ok(())
  }
}
