//! Error types and error printing facilities.
//!
//! Fallible model operations return [`Error`]. Operations that succeed with a
//! caveat return a [`Warning`] alongside their result. Structural problems found
//! by an explicit consistency pass are [`Violation`]s, which are collected into
//! an [`Errors`] and printed with the [`Diagnostic`] trait.
//!
//! [`Error`]: enum.Error.html
//! [`Warning`]: enum.Warning.html
//! [`Violation`]: enum.Violation.html
//! [`Errors`]: struct.Errors.html
//! [`Diagnostic`]: trait.Diagnostic.html

use std::fmt;
use std::io;

/// An error produced while editing a model.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum Error {
  /// The name `null` cannot be used for an anchor.
  #[error("anchor name `null` is reserved")]
  ReservedName,
  /// An anchor with nothing pointing at it must have a name.
  #[error("an anchor with no pointers to it must have a name")]
  UnnamedAnchor,
  /// The new anchor's run would spill into the next anchor.
  #[error("anchor would overlap the anchor at {next:06X}")]
  OverlapsAnchor {
    /// The address of the anchor that would be overlapped.
    next: usize,
  },
  /// A format string could not be understood.
  #[error("could not parse format `{format}`: {reason}")]
  BadFormat {
    /// The offending format.
    format: String,
    /// What went wrong.
    reason: String,
  },
  /// A text format was requested at an address with no text.
  #[error("no text found at {0:06X}")]
  NoString(usize),
  /// A run was written over another run it doesn't line up with.
  #[error("run at {start:06X} (length {len}) conflicts with run at {existing:06X}")]
  Conflict {
    /// Where the new run starts.
    start: usize,
    /// The new run's length.
    len: usize,
    /// Where the run in the way starts.
    existing: usize,
  },
  /// An address was outside of the data.
  #[error("address {addr:06X} is out of bounds for data of length {len:06X}")]
  OutOfBounds {
    /// The bad address.
    addr: usize,
    /// The length of the data.
    len: usize,
  },
  /// Table lengths depend on each other in a loop that never settles.
  #[error("table `{table}` depends on its own length")]
  CyclicDependency {
    /// The table where the loop was noticed.
    table: String,
  },
  /// A table operation was requested on something that isn't a table.
  #[error("no table starts at {0:06X}")]
  NotATable(usize),
  /// Persisted metadata could not be read.
  #[error("bad metadata: {0}")]
  BadMetadata(String),
}

impl Error {
  /// Returns whether this error was found while validating a request, before
  /// anything was changed.
  pub fn is_validation(&self) -> bool {
    matches!(
      self,
      Self::ReservedName
        | Self::UnnamedAnchor
        | Self::OverlapsAnchor { .. }
        | Self::BadFormat { .. }
        | Self::NoString(_)
    )
  }

  pub(crate) fn bad_format(format: &str, reason: impl fmt::Display) -> Self {
    Self::BadFormat {
      format: format.to_string(),
      reason: reason.to_string(),
    }
  }
}

impl From<json5::Error> for Error {
  fn from(e: json5::Error) -> Self {
    Self::BadMetadata(e.to_string())
  }
}

/// A non-fatal message produced by an operation that went through anyway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Warning {
  /// The requested anchor name was taken, so another one was used.
  NameCollision {
    /// The name that was asked for.
    requested: String,
    /// The name that was actually assigned.
    assigned: String,
  },
}

impl fmt::Display for Warning {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Self::NameCollision {
        requested,
        assigned,
      } => write!(
        f,
        "name `{}` is already in use; renamed to `{}`",
        requested, assigned
      ),
    }
  }
}

/// A broken structural invariant, found by `Model::verify_invariants()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
  /// Two runs overlap.
  Overlap {
    /// The first run.
    first: usize,
    /// The run it runs into.
    second: usize,
  },
  /// A run lists a source that does not point at it.
  SourceMismatch {
    /// The run.
    run: usize,
    /// The source address.
    source: usize,
  },
  /// A pointer points at a run that doesn't list it as a source.
  MissingSource {
    /// The pointer.
    source: usize,
    /// Where it points.
    destination: usize,
  },
  /// A table lists a pointer into one of its elements that points elsewhere.
  InnerSourceMismatch {
    /// The table.
    table: usize,
    /// The element index.
    index: usize,
    /// The source address.
    source: usize,
  },
  /// A name and its address disagree.
  NameMismatch {
    /// The name in question.
    name: String,
    /// The address it is registered at.
    addr: usize,
  },
  /// A matched word doesn't hold its table's length.
  WordMismatch {
    /// The word's address.
    addr: usize,
    /// The table it follows.
    table: String,
  },
}

impl fmt::Display for Violation {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Self::Overlap { first, second } => {
        write!(f, "run at {:06X} overlaps run at {:06X}", first, second)
      }
      Self::SourceMismatch { run, source } => write!(
        f,
        "run at {:06X} lists source {:06X}, which points elsewhere",
        run, source
      ),
      Self::MissingSource {
        source,
        destination,
      } => write!(
        f,
        "pointer at {:06X} is not listed by its destination {:06X}",
        source, destination
      ),
      Self::InnerSourceMismatch {
        table,
        index,
        source,
      } => write!(
        f,
        "pointer at {:06X} does not point to element {} of table {:06X}",
        source, index, table
      ),
      Self::NameMismatch { name, addr } => {
        write!(f, "name `{}` is out of sync at {:06X}", name, addr)
      }
      Self::WordMismatch { addr, table } => write!(
        f,
        "word at {:06X} does not match the length of `{}`",
        addr, table
      ),
    }
  }
}

impl Diagnostic for Violation {
  fn cause(&self) -> Cause<'_> {
    match self {
      Self::Overlap { first, .. } => Cause::Address(*first),
      Self::SourceMismatch { source, .. } => Cause::Address(*source),
      Self::MissingSource { source, .. } => Cause::Address(*source),
      Self::InnerSourceMismatch { source, .. } => Cause::Address(*source),
      Self::NameMismatch { name, .. } => Cause::Anchor(name),
      Self::WordMismatch { addr, .. } => Cause::Address(*addr),
    }
  }

  fn action(&self) -> Option<Action> {
    Some(Action::Verifying)
  }
}

impl Diagnostic for Error {
  fn cause(&self) -> Cause<'_> {
    match self {
      Self::OverlapsAnchor { next } => Cause::Address(*next),
      Self::NoString(addr) | Self::NotATable(addr) => Cause::Address(*addr),
      Self::Conflict { start, .. } => Cause::Address(*start),
      Self::OutOfBounds { addr, .. } => Cause::Address(*addr),
      Self::CyclicDependency { table } => Cause::Anchor(table),
      _ => Cause::Unknown,
    }
  }

  fn action(&self) -> Option<Action> {
    match self {
      Self::BadMetadata(_) => Some(Action::Loading),
      _ => Some(Action::Writing),
    }
  }
}

/// An error which can be described as a diagnostic.
///
/// Types that implement `Diagnostic` must also implement
/// [`std::fmt::Display`]. For the user-displayed error to look right, this
/// implementation should only be one line long.
///
/// [`std::fmt::Display`]: https://doc.rust-lang.org/std/fmt/trait.Display.html
pub trait Diagnostic: fmt::Debug + fmt::Display {
  /// Returns a `Cause` describing the input that resulted in the error.
  fn cause(&self) -> Cause<'_>;
  /// Returns an action this error is associated with, if any at all.
  fn action(&self) -> Option<Action>;
}

/// A collection of errors that may built up over the course of an action.
///
/// The type parameter `E` should be a type implementing [`Diagnostic`].
///
/// [`Diagnostic`]: trait.Diagnostic.html
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Errors<E>(Vec<E>);

impl<E> Errors<E> {
  /// Creates an empty `Errors`.
  pub fn new() -> Self {
    Errors(Vec::new())
  }

  /// Returns true if this `Errors` hasn't had any errors added yet.
  pub fn is_ok(&self) -> bool {
    self.0.is_empty()
  }

  /// Returns the number of errors collected.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Returns an iterator over the collected errors.
  pub fn iter(&self) -> impl Iterator<Item = &E> + '_ {
    self.0.iter()
  }

  /// Adds a new error to this `Errors`.
  pub fn push(&mut self, error: E) {
    self.0.push(error);
  }

  /// Extends this `Errors` by consuming another `Errors`.
  pub fn extend(&mut self, mut errors: Errors<E>) {
    self.0.reserve(errors.0.len());
    for e in errors.0.drain(..) {
      self.push(e);
    }
  }

  /// Converts this collection into a `Result`, which is `Ok` only if nothing
  /// was collected.
  pub fn into_result(self) -> Result<(), Self> {
    if self.is_ok() {
      Ok(())
    } else {
      Err(self)
    }
  }
}

impl<E> Default for Errors<E> {
  fn default() -> Self {
    Self::new()
  }
}

impl<E: Diagnostic> Errors<E> {
  /// Dumps this collection of errors as user-displayable text into `sink`.
  ///
  /// Returns `Ok(true)` if anything was written.
  pub fn dump_to(&self, mut sink: impl io::Write) -> io::Result<bool> {
    if self.0.is_empty() {
      return Ok(false);
    }

    for (i, error) in self.0.iter().enumerate() {
      writeln!(sink, "error: {}", error)?;
      let action = error.action();
      match error.cause() {
        Cause::Address(addr) => match action {
          Some(action) => {
            writeln!(sink, "  while {} at {:06X}", action.describe(), addr)?
          }
          None => writeln!(sink, "  at {:06X}", addr)?,
        },
        Cause::Anchor(name) => match action {
          Some(action) => {
            writeln!(sink, "  while {} `{}`", action.describe(), name)?
          }
          None => writeln!(sink, "  at `{}`", name)?,
        },
        Cause::Unknown => {
          if let Some(action) = action {
            writeln!(sink, "  while {}", action.describe())?;
          }
        }
      }

      if i != self.0.len() - 1 {
        writeln!(sink)?;
      }
    }

    Ok(true)
  }

  /// Calls `dump_to()` on `stderr`, exiting the process with the given
  /// `exit_code` if any errors are present.
  pub fn dump_and_die(self, code: i32) {
    // Writing to stderr is fairly unlikely to fail, so panicking is a fine
    // response here.
    if self.dump_to(io::stderr()).unwrap() {
      eprintln!();
      eprintln!("error: there were {} errors", self.0.len());
      std::process::exit(code)
    }
  }
}

/// The place where an error occured, to varrying degrees of specificity.
pub enum Cause<'a> {
  /// An address within the data.
  Address(usize),
  /// A named anchor.
  Anchor(&'a str),
  /// Nowhere in particular.
  Unknown,
}

/// An action that hexmeta performs, which an error may be associated with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
  /// Loading persisted metadata.
  Loading,
  /// Writing formats or data into the model.
  Writing,
  /// Checking the model's structural invariants.
  Verifying,
}

impl Action {
  fn describe(self) -> &'static str {
    match self {
      Self::Loading => "loading",
      Self::Writing => "writing",
      Self::Verifying => "verifying",
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn validation_errors() {
    assert!(Error::ReservedName.is_validation());
    assert!(Error::bad_format("[", "eof").is_validation());
    assert!(!Error::Conflict {
      start: 0,
      len: 4,
      existing: 2
    }
    .is_validation());
  }

  #[test]
  fn dump() {
    let mut errors = Errors::new();
    assert!(errors.is_ok());
    errors.push(Violation::Overlap {
      first: 0x10,
      second: 0x12,
    });
    errors.push(Violation::NameMismatch {
      name: "foo".to_string(),
      addr: 0x20,
    });

    let mut out = Vec::new();
    assert!(errors.dump_to(&mut out).unwrap());
    let text = String::from_utf8(out).unwrap();
    assert_eq!(
      text,
      "error: run at 000010 overlaps run at 000012\n  \
       while verifying at 000010\n\n\
       error: name `foo` is out of sync at 000020\n  \
       while verifying `foo`\n"
    );
  }
}
