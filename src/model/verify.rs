//! The structural invariants, checked the slow way.

use crate::error::Errors;
use crate::error::Violation;
use crate::format::Lookup;

use super::Model;

impl Model {
  /// Checks every structural invariant of the model, collecting every
  /// violation found.
  ///
  /// This walks every run and every pointer, so it is meant for tests and
  /// for diagnosing damaged metadata, not for calling after each edit.
  pub fn verify_invariants(&self) -> Result<(), Errors<Violation>> {
    let mut errors = Errors::new();
    self.verify_order(&mut errors);
    self.verify_sources(&mut errors);
    self.verify_pointers(&mut errors);
    self.verify_names(&mut errors);
    self.verify_words(&mut errors);
    errors.into_result()
  }

  fn verify_order(&self, errors: &mut Errors<Violation>) {
    let runs = self.runs.iter().collect::<Vec<_>>();
    for pair in runs.windows(2) {
      let (first, second) = (pair[0], pair[1]);
      let shared = first.start == second.start && first.is_empty() && second.may_follow_marker();
      if (first.start >= second.start && !shared) || first.end() > second.start {
        errors.push(Violation::Overlap {
          first: first.start,
          second: second.start,
        });
      }
    }
  }

  fn verify_sources(&self, errors: &mut Errors<Violation>) {
    for run in self.runs.iter() {
      for source in run.sources.iter() {
        if self.rom.read_pointer(source) != Some(run.start) {
          errors.push(Violation::SourceMismatch {
            run: run.start,
            source,
          });
        }
      }

      if let Some(table) = run.as_table() {
        let stride = table.stride();
        for (index, source) in table.inner_pointers() {
          let expected = run.start + index * stride;
          if index == 0 || index >= table.count || self.rom.read_pointer(source) != Some(expected) {
            errors.push(Violation::InnerSourceMismatch {
              table: run.start,
              index,
              source,
            });
          }
        }
      }
    }
  }

  /// Checks that every pointer the model knows about is known to its
  /// destination.
  fn verify_pointers(&self, errors: &mut Errors<Violation>) {
    for run in self.runs.iter() {
      for (source, _) in run.pointer_fields() {
        let dest = match self.rom.read_pointer(source) {
          Some(dest) if dest < self.rom.len() => dest,
          _ => continue,
        };
        if !self.is_known_source(source, dest) {
          errors.push(Violation::MissingSource {
            source,
            destination: dest,
          });
        }
      }
    }
  }

  fn is_known_source(&self, source: usize, dest: usize) -> bool {
    if let Some(run) = self.runs.get(dest) {
      return run.sources.contains(source);
    }
    let container = self.runs.lookup(dest);
    match container.as_table() {
      Some(table) => table
        .element_at(dest - container.start)
        .and_then(|index| table.inner_sources.get(&index))
        .map_or(false, |sources| sources.contains(source)),
      None => false,
    }
  }

  fn verify_names(&self, errors: &mut Errors<Violation>) {
    for (&addr, name) in self.anchors.names() {
      let consistent = self.anchors.address_of(name) == Some(addr) && self.runs.get(addr).is_some();
      if !consistent {
        errors.push(Violation::NameMismatch {
          name: name.clone(),
          addr,
        });
      }
    }
  }

  fn verify_words(&self, errors: &mut Errors<Violation>) {
    for (&addr, table) in self.anchors.words() {
      let holds = match self.table_count(table) {
        Some(count) => self.rom.read_word(addr) == Some(count as u32),
        None => true,
      };
      if !holds {
        errors.push(Violation::WordMismatch {
          addr,
          table: table.clone(),
        });
      }
    }
  }
}
