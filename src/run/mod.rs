//! Runs: typed, contiguous ranges of bytes.
//!
//! A [`Run`] records what a stretch of data is (a pointer, some text, a table,
//! a compressed stream) along with the addresses of every pointer that points
//! at its start. Runs are plain values; the [`RunIndex`] owns them, keyed by
//! address, and the model replaces them wholesale whenever they change.
//!
//! [`Run`]: struct.Run.html
//! [`RunIndex`]: ../index/struct.RunIndex.html

use std::iter::FromIterator;

pub mod segment;
pub mod stream;
pub mod table;

pub use segment::Segment;
pub use segment::SegmentKind;
pub use stream::Stream;
pub use stream::StreamKind;
pub use table::LengthSource;
pub use table::Table;

/// A sorted set of addresses, with no duplicates.
///
/// This is what a run uses to remember which pointers point to it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SortedSpan(Vec<usize>);

impl SortedSpan {
  /// Creates an empty `SortedSpan`.
  pub const fn new() -> Self {
    Self(Vec::new())
  }

  /// Inserts `addr`, returning whether it was newly added.
  pub fn insert(&mut self, addr: usize) -> bool {
    match self.0.binary_search(&addr) {
      Ok(_) => false,
      Err(i) => {
        self.0.insert(i, addr);
        true
      }
    }
  }

  /// Removes `addr`, returning whether it was present.
  pub fn remove(&mut self, addr: usize) -> bool {
    match self.0.binary_search(&addr) {
      Ok(i) => {
        self.0.remove(i);
        true
      }
      Err(_) => false,
    }
  }

  /// Returns whether `addr` is in this set.
  pub fn contains(&self, addr: usize) -> bool {
    self.0.binary_search(&addr).is_ok()
  }

  /// Returns the number of addresses in this set.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Returns whether this set is empty.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Iterates over the addresses in this set, in ascending order.
  pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
    self.0.iter().copied()
  }

  /// Returns the union of `self` and `other`.
  pub fn union(&self, other: &SortedSpan) -> SortedSpan {
    self.iter().chain(other.iter()).collect()
  }
}

impl FromIterator<usize> for SortedSpan {
  fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
    let mut addrs = iter.into_iter().collect::<Vec<_>>();
    addrs.sort_unstable();
    addrs.dedup();
    Self(addrs)
  }
}

/// Operations every kind of run content supports.
pub trait RunFormat {
  /// Returns the number of bytes this content occupies.
  fn byte_len(&self) -> usize;

  /// Returns the format string that, written after an anchor name, describes
  /// this content.
  fn format_string(&self) -> String;
}

/// The kind of data a run holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunKind {
  /// Something is here, but we don't know what. Usually, this is the
  /// destination of a pointer.
  NoInfo,
  /// A four-byte pointer.
  Pointer,
  /// Game text, including its terminator.
  Pcs {
    /// The length of the text in bytes.
    len: usize,
  },
  /// Plain ASCII text of a fixed length.
  Ascii {
    /// The length of the text in bytes.
    len: usize,
  },
  /// A four-byte integer that always holds the length of a table.
  Word {
    /// The name of the table.
    table: String,
  },
  /// A table of fixed-size elements.
  Table(Table),
  /// A variable-length stream.
  Stream(Stream),
}

impl RunFormat for RunKind {
  fn byte_len(&self) -> usize {
    match self {
      Self::NoInfo => 1,
      Self::Pointer | Self::Word { .. } => 4,
      Self::Pcs { len } | Self::Ascii { len } => *len,
      Self::Table(table) => table.byte_len(),
      Self::Stream(stream) => stream.byte_len(),
    }
  }

  fn format_string(&self) -> String {
    match self {
      Self::NoInfo | Self::Pointer | Self::Word { .. } => String::new(),
      Self::Pcs { .. } => "\"\"".to_string(),
      Self::Ascii { len } => format!("`asc`{}", len),
      Self::Table(table) => table.format_string(),
      Self::Stream(stream) => stream.format_string(),
    }
  }
}

/// A typed run of bytes, along with every pointer to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Run {
  /// Where the run starts.
  pub start: usize,
  /// The addresses of every pointer to `start`.
  pub sources: SortedSpan,
  /// What the run holds.
  pub kind: RunKind,
}

/// Identifies a run within an index: where it starts, and whether it occupies
/// any bytes. A zero-length run sorts before the run that starts where it
/// does.
pub type RunKey = (usize, bool);

/// The run returned by lookups that find nothing.
pub static NULL_RUN: Run = Run {
  start: usize::MAX,
  sources: SortedSpan::new(),
  kind: RunKind::NoInfo,
};

impl Run {
  /// Creates a new run with no sources.
  pub fn new(start: usize, kind: RunKind) -> Self {
    Self {
      start,
      sources: SortedSpan::new(),
      kind,
    }
  }

  /// Creates a new `NoInfo` run.
  pub fn no_info(start: usize) -> Self {
    Self::new(start, RunKind::NoInfo)
  }

  /// Creates a new `Pointer` run.
  pub fn pointer(start: usize) -> Self {
    Self::new(start, RunKind::Pointer)
  }

  /// Returns the number of bytes this run occupies.
  #[inline]
  pub fn len(&self) -> usize {
    self.kind.byte_len()
  }

  /// Returns whether this run occupies no bytes at all.
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Returns the key this run is indexed under.
  pub fn key(&self) -> RunKey {
    (self.start, !self.is_empty())
  }

  /// Returns whether this run may start at the same address as a zero-length
  /// run. Only bare pointers and matched words, which can't carry an anchor
  /// of their own, may.
  pub fn may_follow_marker(&self) -> bool {
    matches!(self.kind, RunKind::Pointer | RunKind::Word { .. }) && self.sources.is_empty()
  }

  /// Returns the first address past the end of this run.
  #[inline]
  pub fn end(&self) -> usize {
    self.start.saturating_add(self.len())
  }

  /// Returns whether `addr` falls inside this run.
  #[inline]
  pub fn contains(&self, addr: usize) -> bool {
    self.start <= addr && addr < self.end()
  }

  /// Returns whether this is the null run.
  #[inline]
  pub fn is_null(&self) -> bool {
    self.start == usize::MAX
  }

  /// Returns whether this run is an untyped placeholder.
  #[inline]
  pub fn is_no_info(&self) -> bool {
    matches!(self.kind, RunKind::NoInfo)
  }

  /// Returns whether this run is a pointer.
  #[inline]
  pub fn is_pointer(&self) -> bool {
    matches!(self.kind, RunKind::Pointer)
  }

  /// Returns whether this run can carry an anchor. Every run can, except for
  /// pointers that nothing points to.
  pub fn is_anchor(&self) -> bool {
    !self.is_pointer() || !self.sources.is_empty()
  }

  /// Returns this run's table, if it is one.
  pub fn as_table(&self) -> Option<&Table> {
    match &self.kind {
      RunKind::Table(table) => Some(table),
      _ => None,
    }
  }

  /// Returns the format string for this run.
  pub fn format_string(&self) -> String {
    self.kind.format_string()
  }

  /// Adds `sources` to this run's sources.
  pub fn merge_anchor(mut self, sources: &SortedSpan) -> Self {
    if !sources.is_empty() {
      self.sources = self.sources.union(sources);
    }
    self
  }

  /// Adds a single source to this run.
  pub fn with_source(mut self, source: usize) -> Self {
    self.sources.insert(source);
    self
  }

  /// Removes a source from this run.
  pub fn remove_source(mut self, source: usize) -> Self {
    self.sources.remove(source);
    self
  }

  /// Copies this run to a new address, keeping its sources.
  pub fn duplicate(&self, start: usize) -> Self {
    Self {
      start,
      sources: self.sources.clone(),
      kind: self.kind.clone(),
    }
  }

  /// Returns the address of every pointer stored within this run, along with
  /// the table segment it belongs to, if any.
  pub fn pointer_fields(&self) -> Vec<(usize, Option<&Segment>)> {
    match &self.kind {
      RunKind::Pointer => vec![(self.start, None)],
      RunKind::Table(table) => {
        let stride = table.stride();
        let mut fields = Vec::new();
        for i in 0..table.count {
          for (offset, segment) in table.pointer_segments() {
            fields.push((self.start + i * stride + offset, Some(segment)));
          }
        }
        fields
      }
      _ => Vec::new(),
    }
  }

  /// Returns whether `addr` is the start of a pointer stored within this run.
  pub fn has_pointer_at(&self, addr: usize) -> bool {
    match &self.kind {
      RunKind::Pointer => addr == self.start,
      RunKind::Table(table) if self.contains(addr) => {
        match table.field_at(addr - self.start) {
          Some(field) => field.offset == 0 && field.segment.is_pointer(),
          None => false,
        }
      }
      _ => false,
    }
  }
}
