//! Declaring anchors, and writing pointers and values.

use tracing::debug;
use tracing::warn;

use crate::delta::Delta;
use crate::error::Error;
use crate::error::Warning;
use crate::format::build_run;
use crate::format::parse_format;
use crate::format::split_name_and_format;
use crate::format::Format;
use crate::int::Width;
use crate::run::LengthSource;
use crate::run::Run;
use crate::run::RunKind;
use crate::run::SegmentKind;

use super::Model;

impl Model {
  /// Declares an anchor at `addr` from anchor text, such as
  /// `^items[name""14 price:]40`.
  ///
  /// The name may be left out if something already points to `addr`. If the
  /// name is taken, a new one is made up and a warning says so.
  ///
  /// Everything that depends on the new run is brought up to date: pointers
  /// waiting for this name are filled in, pointers inside a new table are
  /// followed, and tables whose length follows this one are resized.
  pub fn write_anchor(
    &mut self,
    delta: &mut Delta,
    addr: usize,
    text: &str,
  ) -> Result<Option<Warning>, Error> {
    self.atomically(delta, |model, delta| {
      model.apply_anchor(delta, addr, text, false)
    })
  }

  /// Validates and applies anchor text. With `allow_overwrite`, the new run
  /// may spill over later anchors, which are cleared.
  pub(super) fn apply_anchor(
    &mut self,
    delta: &mut Delta,
    addr: usize,
    text: &str,
    allow_overwrite: bool,
  ) -> Result<Option<Warning>, Error> {
    self.check_bounds(addr, 1)?;
    let (mut name, format_text) = split_name_and_format(text);
    if name.eq_ignore_ascii_case("null") {
      return Err(Error::ReservedName);
    }
    let format = parse_format(&format_text)?;

    if name.is_empty() {
      if let Some(existing) = self.anchors.name_at(addr) {
        name = existing.to_string();
      }
    }
    let existing = self.runs.get(addr).cloned();
    if name.is_empty() {
      match &existing {
        None => return Err(Error::UnnamedAnchor),
        Some(run) if run.sources.is_empty() && format != Format::None => {
          return Err(Error::UnnamedAnchor)
        }
        _ => {}
      }
    }

    let sources = existing.map(|r| r.sources).unwrap_or_default();
    let run = build_run(&format, &format_text, addr, &sources, &*self)?;
    if !allow_overwrite {
      let next = self.runs.next_anchor(addr + 1);
      if !next.is_null() && next.start < run.end() {
        return Err(Error::OverlapsAnchor { next: next.start });
      }
    }

    let mut warning = None;
    if !name.is_empty() {
      let (unique, changed) = self.anchors.uniquify(addr, &name);
      if changed {
        warn!("anchor `{}` renamed to `{}`", name, unique);
        warning = Some(Warning::NameCollision {
          requested: name,
          assigned: unique.clone(),
        });
      }
      name = unique;
    }

    self.observe_anchor_written(delta, &name, run)?;
    Ok(warning)
  }

  /// Puts `run` in place under `name`, which may be empty to leave the
  /// anchor's name alone.
  pub(super) fn observe_anchor_written(
    &mut self,
    delta: &mut Delta,
    name: &str,
    run: Run,
  ) -> Result<(), Error> {
    let addr = run.start;
    let existing = self.runs.get(addr).cloned();
    match &existing {
      None => self.clear_range(delta, addr, run.len().max(1), false)?,
      Some(old) if !run.is_no_info() && old.end() < run.end() => {
        self.clear_range(delta, old.end(), run.end() - old.end(), false)?
      }
      _ => {}
    }

    if !name.is_empty() && self.anchors.name_at(addr) != Some(name) {
      self.take_name(delta, addr);
      self.put_name(delta, addr, name)?;
    }

    let mut run = run;
    let mut resolved = 0;
    let waiting = if name.is_empty() {
      Vec::new()
    } else {
      self.anchors.unmapped_for(name)
    };
    for (source, full) in waiting {
      let index = match full.find('/') {
        None => 0,
        Some(i) => match self.element_index(&run, &full[i + 1..]) {
          Some(index) => index,
          None => continue,
        },
      };
      let stride = run.as_table().map_or(0, |t| t.stride());
      self.take_unmapped(delta, source);
      self.write_raw_pointer(delta, source, Some(addr + index * stride))?;
      if index == 0 {
        run.sources.insert(source);
      } else if let RunKind::Table(table) = &mut run.kind {
        table.add_inner_source(index, source);
      }
      resolved += 1;
    }

    let seek = existing.map_or(true, |old| old.is_pointer() && old.sources.is_empty());
    if resolved == 0 && seek && !name.is_empty() {
      let mut targets = vec![addr];
      if let Some(table) = run.as_table().filter(|t| t.supports_inner_pointers()) {
        let stride = table.stride();
        targets.extend((1..table.count).map(|i| addr + i * stride));
      }
      let found = self.search_for_pointers_to_anchor(delta, &targets, run.start..run.end());
      debug!(addr, found = found.len(), "searched for pointers to new anchor");
      for (source, dest) in found {
        if dest == addr {
          run.sources.insert(source);
        } else if let RunKind::Table(table) = &mut run.kind {
          let index = (dest - addr) / table.stride();
          table.add_inner_source(index, source);
        }
      }
    }

    self.observe_run_written(delta, run)
  }

  /// Finds the element of `run` that `child` names, either by index or by
  /// element name.
  fn element_index(&self, run: &Run, child: &str) -> Option<usize> {
    let table = run.as_table()?;
    let index = match child.trim().parse::<usize>() {
      Ok(index) => index,
      Err(_) => {
        let first = table.segments.first()?;
        let names = match (&first.kind, &table.length) {
          (SegmentKind::Pcs, _) => {
            let stride = table.stride();
            let len = first.len;
            (0..table.count)
              .map(|i| {
                let at = run.start + i * stride;
                crate::pcs::decode(self.rom.bytes().get(at..at + len).unwrap_or(&[]))
              })
              .collect()
          }
          (_, LengthSource::Anchor { name, .. }) => self.element_names(name),
          _ => Vec::new(),
        };
        names.iter().position(|n| n.eq_ignore_ascii_case(child.trim()))?
      }
    };
    if index < table.count {
      Some(index)
    } else {
      None
    }
  }

  /// Writes a pointer to `dest` at `source`, which becomes a pointer if it
  /// wasn't one already. Inside a table, `source` must be a pointer field.
  pub fn write_pointer(
    &mut self,
    delta: &mut Delta,
    source: usize,
    dest: Option<usize>,
  ) -> Result<(), Error> {
    self.atomically(delta, |model, delta| {
      if let Some(dest) = dest {
        model.check_bounds(dest, 1)?;
      }
      model.prepare_pointer(delta, source)?;
      model.finish_pointer(delta, source, dest)
    })
  }

  /// Writes a pointer to the anchor called `name` at `source`.
  ///
  /// If there is no such anchor yet, a null pointer is written and remembered
  /// as waiting for `name`; declaring the anchor later fills it in.
  pub fn write_pointer_to(
    &mut self,
    delta: &mut Delta,
    source: usize,
    name: &str,
  ) -> Result<(), Error> {
    self.atomically(delta, |model, delta| {
      model.prepare_pointer(delta, source)?;
      let dest = model.resolve_name(delta, Some(source), name);
      model.finish_pointer(delta, source, dest)
    })
  }

  /// Points the pointer field at `source`, which must be inside a table, to
  /// `dest`.
  pub fn update_table_pointer(
    &mut self,
    delta: &mut Delta,
    source: usize,
    dest: Option<usize>,
  ) -> Result<(), Error> {
    let container = self.runs.lookup(source);
    if container.as_table().is_none() {
      return Err(Error::NotATable(source));
    }
    self.write_pointer(delta, source, dest)
  }

  /// Removes whatever format is in the way of a pointer at `source`.
  pub(super) fn prepare_pointer(&mut self, delta: &mut Delta, source: usize) -> Result<(), Error> {
    self.check_bounds(source, 4)?;
    let container = self.runs.lookup(source).clone();
    if container.as_table().is_some() {
      if !container.has_pointer_at(source) {
        return Err(Error::Conflict {
          start: source,
          len: 4,
          existing: container.start,
        });
      }
      return self.clear_pointer_format(delta, source);
    }
    if container.start == source && container.is_pointer() {
      return self.clear_pointer_format(delta, source);
    }
    self.clear_range(delta, source, 4, false)
  }

  /// Writes the pointer value at `source` and hooks it up to its
  /// destination.
  pub(super) fn finish_pointer(
    &mut self,
    delta: &mut Delta,
    source: usize,
    dest: Option<usize>,
  ) -> Result<(), Error> {
    self.write_raw_pointer(delta, source, dest)?;
    let container = self.runs.lookup(source).clone();
    if let Some(table) = container.as_table() {
      let segment = table
        .field_at(source - container.start)
        .map(|f| f.segment.clone());
      return self.add_pointer_to_anchor(delta, segment.as_ref(), source);
    }
    self.observe_run_written(delta, Run::pointer(source))
  }

  /// Writes a plain integer at `addr`.
  ///
  /// Pointers and matched words can't be overwritten this way; use
  /// `write_pointer()` or resize the table instead.
  pub fn write_value(
    &mut self,
    delta: &mut Delta,
    addr: usize,
    width: Width,
    value: u32,
  ) -> Result<(), Error> {
    self.atomically(delta, |model, delta| {
      model.check_bounds(addr, width.len())?;
      for at in addr..addr + width.len() {
        let run = model.runs.lookup(at);
        let protected = match &run.kind {
          RunKind::Pointer | RunKind::Word { .. } => true,
          RunKind::Table(table) => table
            .field_at(at - run.start)
            .map_or(false, |f| f.segment.is_pointer()),
          _ => false,
        };
        if protected {
          return Err(Error::Conflict {
            start: addr,
            len: width.len(),
            existing: run.start,
          });
        }
      }
      model.write_int(delta, addr, width, value)
    })
  }

  /// Adds `extra` elements to the end of the table at `addr`, each a copy of
  /// the last one. The table moves if it can't grow in place.
  ///
  /// Returns the table's address afterwards.
  pub fn append_elements(
    &mut self,
    delta: &mut Delta,
    addr: usize,
    extra: usize,
  ) -> Result<usize, Error> {
    let count = match self.runs.get(addr).and_then(Run::as_table) {
      Some(table) => table.count + extra,
      None => return Err(Error::NotATable(addr)),
    };
    self.set_table_count(delta, addr, count)
  }

  /// Changes the number of elements in the table at `addr`.
  ///
  /// Tables whose length comes from another table can't be resized directly.
  /// Returns the table's address afterwards.
  pub fn set_table_count(
    &mut self,
    delta: &mut Delta,
    addr: usize,
    count: usize,
  ) -> Result<usize, Error> {
    self.atomically(delta, |model, delta| {
      let run = model.runs.get(addr).cloned().ok_or(Error::NotATable(addr))?;
      let table = run.as_table().ok_or(Error::NotATable(addr))?;
      if let LengthSource::Anchor { .. } = table.length {
        return Err(Error::bad_format(
          &table.length.format_string(),
          "length comes from another table",
        ));
      }
      if table.count == count {
        return Ok(addr);
      }

      let len = table.stride() * count + table.terminator().len();
      let run = model.relocate_for_expansion(delta, run, len)?;
      let run = model.resize_table(delta, run, count)?;
      let start = run.start;
      model.observe_run_written(delta, run)?;
      Ok(start)
    })
  }
}
