//! Keeping sources, matched words, and dependent tables in sync after a run
//! is written.

use tracing::debug;

use crate::delta::Delta;
use crate::error::Error;
use crate::format::build_run;
use crate::format::parse_format;
use crate::int::Width;
use crate::run::LengthSource;
use crate::run::Run;
use crate::run::RunKind;
use crate::run::Segment;
use crate::run::SegmentKind;

use super::Model;

/// Returns whether two kinds describe the same format. Pointers into table
/// elements don't count.
fn same_format(a: &RunKind, b: &RunKind) -> bool {
  match (a, b) {
    (RunKind::Table(a), RunKind::Table(b)) => {
      a.segments == b.segments && a.count == b.count && a.length == b.length
    }
    _ => a == b,
  }
}

impl Model {
  /// Puts `run` into the index, merging it with any run already at its start,
  /// and brings everything that depends on it up to date.
  ///
  /// Writing an untyped run over a typed one keeps the typed one, with the
  /// sources of both.
  pub(super) fn observe_run_written(&mut self, delta: &mut Delta, run: Run) -> Result<(), Error> {
    let start = run.start;
    let name = self.anchors.name_at(start).map(String::from);
    if let (Some(name), Some(table)) = (&name, run.as_table()) {
      let count = table.count;
      self.update_matched_words(delta, name, count)?;
    }

    let mut run = run;
    if let Some(existing) = self.runs.replaced_by(&run).cloned() {
      if run.is_no_info() {
        run = existing.merge_anchor(&run.sources);
      } else {
        run = run.merge_anchor(&existing.sources);
        if !same_format(&existing.kind, &run.kind) {
          self.runs.check_fit(&run)?;
          self.drop_outgoing(delta, &existing)?;
        }
        self.carry_inner_sources(delta, &existing, &mut run)?;
      }
    }
    self.put_run(delta, run.clone())?;

    match &run.kind {
      RunKind::Pointer => self.add_pointer_to_anchor(delta, None, start)?,
      RunKind::Table(_) => {
        let fields = run
          .pointer_fields()
          .into_iter()
          .map(|(source, segment)| (source, segment.cloned()))
          .collect::<Vec<_>>();
        for (source, segment) in fields {
          self.add_pointer_to_anchor(delta, segment.as_ref(), source)?;
        }
        if let Some(name) = &name {
          self.update_dependent_table_lengths(delta, name)?;
        }
      }
      RunKind::Word { table } => {
        if let Some(count) = self.table_count_of(table) {
          if self.rom.read_word(start) != Some(count as u32) {
            self.write_int(delta, start, Width::I32, count as u32)?;
          }
        }
        self.put_word(delta, start, table);
      }
      _ => {}
    }

    let scaffolding = self
      .runs
      .get(start)
      .filter(|r| r.is_no_info() && r.sources.is_empty())
      .map(Run::key);
    if let (Some(key), None) = (scaffolding, &name) {
      self.take_run(delta, key);
    }
    Ok(())
  }

  fn table_count_of(&self, name: &str) -> Option<usize> {
    crate::format::Lookup::table_count(self, name)
  }

  /// Undoes what `existing` did to the rest of the model, ahead of it being
  /// replaced with something else.
  fn drop_outgoing(&mut self, delta: &mut Delta, existing: &Run) -> Result<(), Error> {
    match &existing.kind {
      RunKind::Pointer => self.clear_pointer_format(delta, existing.start),
      RunKind::Table(_) => self.clear_table_pointers(delta, existing),
      RunKind::Word { .. } => {
        self.take_word(delta, existing.start);
        Ok(())
      }
      _ => Ok(()),
    }
  }

  /// Moves the pointers into `existing`'s elements over to `run`, as long as
  /// they still land on one of its element boundaries. Those that don't are
  /// forgotten.
  fn carry_inner_sources(
    &mut self,
    delta: &mut Delta,
    existing: &Run,
    run: &mut Run,
  ) -> Result<(), Error> {
    let mut sources = Vec::new();
    if let Some(table) = existing.as_table() {
      sources.extend(table.inner_pointers().map(|(_, s)| s));
    }
    if let RunKind::Table(table) = &mut run.kind {
      sources.extend(table.inner_pointers().map(|(_, s)| s));
      table.inner_sources.clear();
    }
    sources.sort_unstable();
    sources.dedup();

    for source in sources {
      let dest = self.rom.read_pointer(source);
      let placed = match (&mut run.kind, dest) {
        (RunKind::Table(table), Some(dest)) if dest > run.start => {
          match table.element_at(dest - run.start) {
            Some(index) if table.supports_inner_pointers() => {
              table.add_inner_source(index, source);
              true
            }
            _ => false,
          }
        }
        _ => false,
      };
      if !placed {
        debug!(source, "pointer no longer lands on an element");
        self.forget_pointer(delta, source)?;
      }
    }
    Ok(())
  }

  /// Stops treating the pointer at `source` as pointing anywhere. A pointer
  /// run loses its format; a pointer field in a table is nulled.
  pub(super) fn forget_pointer(&mut self, delta: &mut Delta, source: usize) -> Result<(), Error> {
    match self.runs.get_sized(source).cloned() {
      Some(run) if run.is_pointer() => {
        if run.sources.is_empty() {
          self.take_run(delta, run.key());
          Ok(())
        } else {
          self.put_run(
            delta,
            Run {
              kind: RunKind::NoInfo,
              ..run
            },
          )
        }
      }
      _ => self.write_raw_pointer(delta, source, None),
    }
  }

  /// Registers the pointer at `source` with whatever it points to.
  ///
  /// If nothing is there yet, an untyped run is created, and typed with the
  /// inner format of `segment` when it has one. Pointers to element
  /// boundaries of tables are remembered by the table. Pointers into the
  /// middle of anything else are a `Conflict`.
  pub(super) fn add_pointer_to_anchor(
    &mut self,
    delta: &mut Delta,
    segment: Option<&Segment>,
    source: usize,
  ) -> Result<(), Error> {
    let dest = match self.rom.read_pointer(source) {
      Some(dest) if dest < self.rom.len() => dest,
      _ => return Ok(()),
    };
    let inner = segment
      .and_then(Segment::inner_format)
      .unwrap_or("")
      .to_string();

    if let Some(existing) = self.runs.get(dest).cloned() {
      let run = existing.with_source(source);
      if run.is_no_info() && !inner.is_empty() {
        let typed = self.retype(delta, run, &inner)?;
        if !typed.is_no_info() {
          return self.observe_run_written(delta, typed);
        }
        return self.put_run(delta, typed);
      }
      return self.put_run(delta, run);
    }

    let container = self.runs.lookup(dest).clone();
    if !container.is_null() {
      let mut container = container;
      let start = container.start;
      if let RunKind::Table(table) = &mut container.kind {
        if table.supports_inner_pointers() {
          if let Some(index) = table.element_at(dest - start) {
            table.add_inner_source(index, source);
            return self.put_run(delta, container);
          }
        }
      }
      return Err(Error::Conflict {
        start: dest,
        len: 1,
        existing: start,
      });
    }

    let run = Run::no_info(dest).with_source(source);
    if inner.is_empty() {
      return self.put_run(delta, run);
    }
    let typed = self.retype(delta, run, &inner)?;
    if typed.is_no_info() {
      self.put_run(delta, typed)
    } else {
      self.observe_run_written(delta, typed)
    }
  }

  /// Tries to give the untyped `run` the format `inner`. Runs that start
  /// inside the typed run's span are cleared to make room.
  ///
  /// If the data doesn't fit the format, `run` is returned unchanged.
  fn retype(&mut self, delta: &mut Delta, run: Run, inner: &str) -> Result<Run, Error> {
    let format = match parse_format(inner) {
      Ok(format) => format,
      Err(_) => return Ok(run),
    };
    let typed = match build_run(&format, inner, run.start, &run.sources, &*self) {
      Ok(typed) => typed,
      Err(e) => {
        debug!(start = run.start, "could not apply `{}`: {}", inner, e);
        return Ok(run);
      }
    };
    if typed.len() > 1 {
      self.clear_range(delta, run.start + 1, typed.len() - 1, false)?;
    }
    Ok(typed)
  }

  /// Sets every word matching the length of `table` to `count`.
  fn update_matched_words(
    &mut self,
    delta: &mut Delta,
    table: &str,
    count: usize,
  ) -> Result<(), Error> {
    for addr in self.anchors.matched_words(table).iter() {
      if self.rom.read_word(addr) != Some(count as u32) {
        debug!(addr, table, count, "updating matched word");
        self.write_int(delta, addr, Width::I32, count as u32)?;
      }
    }
    Ok(())
  }

  /// Resizes every table whose length, or bit-array width, follows the table
  /// called `name`.
  fn update_dependent_table_lengths(&mut self, delta: &mut Delta, name: &str) -> Result<(), Error> {
    let count = match self.table_count_of(name) {
      Some(count) => count,
      None => return Ok(()),
    };
    let dependents = self
      .runs
      .iter()
      .filter(|r| r.as_table().map_or(false, |t| t.depends_on(name)))
      .map(|r| r.start)
      .collect::<Vec<_>>();
    if dependents.is_empty() {
      return Ok(());
    }

    self.resizing.push(name.to_string());
    let result = self.resize_dependents(delta, name, count, &dependents);
    self.resizing.pop();
    result
  }

  fn resize_dependents(
    &mut self,
    delta: &mut Delta,
    name: &str,
    count: usize,
    dependents: &[usize],
  ) -> Result<(), Error> {
    for &start in dependents {
      let mut run = match self.runs.get(start) {
        Some(run) if run.as_table().is_some() => run.clone(),
        _ => continue,
      };

      let table = run.as_table().cloned().ok_or(Error::NotATable(start))?;
      if let LengthSource::Anchor { name: source, offset } = &table.length {
        let target = (count as i64 + offset).max(0) as usize;
        if source.eq_ignore_ascii_case(name) && target != table.count {
          self.check_cycle(start)?;
          debug!(start, from = table.count, to = target, "resizing dependent table");
          let len = table.stride() * target + table.terminator().len();
          run = self.relocate_for_expansion(delta, run, len)?;
          run = self.resize_table(delta, run, target)?;
          self.observe_run_written(delta, run.clone())?;
          run = self.runs.get(run.start).cloned().unwrap_or(run);
        }
      }

      let width = (count + 7) / 8;
      let segments = run.as_table().map(|t| t.segments.clone()).unwrap_or_default();
      for (index, segment) in segments.iter().enumerate() {
        let follows = match &segment.kind {
          SegmentKind::BitArray { source } => source.eq_ignore_ascii_case(name),
          _ => false,
        };
        if !follows || segment.len == width {
          continue;
        }

        self.check_cycle(run.start)?;
        let table = run.as_table().cloned().ok_or(Error::NotATable(run.start))?;
        debug!(start = run.start, from = segment.len, to = width, "resizing bit array");
        let stride = table.stride() - segment.len + width;
        let len = stride * table.count + table.terminator().len();
        run = self.relocate_for_expansion(delta, run, len)?;
        run = self.regrow_segment(delta, run, index, width)?;
        self.observe_run_written(delta, run.clone())?;
        run = self.runs.get(run.start).cloned().unwrap_or(run);
      }
    }
    Ok(())
  }

  /// Fails if the table at `start` is already having its dependents resized
  /// further up the chain.
  fn check_cycle(&self, start: usize) -> Result<(), Error> {
    match self.anchors.name_at(start) {
      Some(name) if self.resizing.iter().any(|n| n.eq_ignore_ascii_case(name)) => {
        Err(Error::CyclicDependency {
          table: name.to_string(),
        })
      }
      _ => Ok(()),
    }
  }

  /// Changes the table `run` to hold `count` elements, writing the bytes for
  /// any new elements as copies of the last one and the terminator after
  /// them. There must already be room.
  ///
  /// Returns the resized run; putting it in place is up to the caller.
  pub(super) fn resize_table(
    &mut self,
    delta: &mut Delta,
    run: Run,
    count: usize,
  ) -> Result<Run, Error> {
    let table = run.as_table().cloned().ok_or(Error::NotATable(run.start))?;
    let stride = table.stride();
    let terminator = table.terminator().to_vec();
    let old_end = run.start + stride * table.count;
    let new_end = run.start + stride * count;
    self.check_bounds(new_end, terminator.len())?;

    if count < table.count {
      for i in count..table.count {
        for (offset, _) in table.pointer_segments() {
          self.clear_pointer_format(delta, run.start + i * stride + offset)?;
        }
      }
      let name = self.anchors.name_at(run.start).map(String::from);
      let lost = table
        .inner_pointers()
        .filter(|&(i, _)| i >= count)
        .collect::<Vec<_>>();
      for (index, source) in lost {
        match &name {
          Some(name) => {
            self.write_raw_pointer(delta, source, None)?;
            self.put_unmapped(delta, source, &format!("{}/{}", name, index));
          }
          None => self.forget_pointer(delta, source)?,
        }
      }
      self.fill(delta, new_end, old_end + terminator.len(), 0xff)?;
    } else {
      let template = match table.count {
        0 => vec![0; stride],
        _ => self
          .rom
          .bytes()
          .get(old_end - stride..old_end)
          .map(<[u8]>::to_vec)
          .unwrap_or_else(|| vec![0; stride]),
      };
      for i in table.count..count {
        self.write_bytes(delta, run.start + i * stride, &template)?;
      }
    }
    self.write_bytes(delta, new_end, &terminator)?;

    let mut table = table.with_count(count);
    if let LengthSource::Fixed(_) = table.length {
      table.length = LengthSource::Fixed(count);
    }
    Ok(Run {
      kind: RunKind::Table(table),
      ..run
    })
  }

  /// Changes the width of segment `index` of the table `run`, moving every
  /// element's bytes to match. There must already be room.
  ///
  /// Returns the changed run; putting it in place is up to the caller.
  fn regrow_segment(
    &mut self,
    delta: &mut Delta,
    run: Run,
    index: usize,
    width: usize,
  ) -> Result<Run, Error> {
    let table = run.as_table().cloned().ok_or(Error::NotATable(run.start))?;
    self.clear_table_pointers(delta, &run)?;

    let old_len = table.stride() * table.count;
    let bytes = self
      .rom
      .bytes()
      .get(run.start..run.start + old_len)
      .map(<[u8]>::to_vec)
      .ok_or(Error::OutOfBounds {
        addr: run.start + old_len,
        len: self.rom.len(),
      })?;
    let mut relaid = table.relayout(&bytes, index, width);
    relaid.extend_from_slice(table.terminator());
    self.write_bytes(delta, run.start, &relaid)?;
    let old_total = old_len + table.terminator().len();
    if relaid.len() < old_total {
      self.fill(delta, run.start + relaid.len(), run.start + old_total, 0xff)?;
    }

    let mut grown = table.clone();
    grown.segments[index].len = width;
    let stride = grown.stride();
    for (i, source) in table.inner_pointers() {
      self.write_raw_pointer(delta, source, Some(run.start + i * stride))?;
    }
    Ok(Run {
      kind: RunKind::Table(grown),
      ..run
    })
  }
}
