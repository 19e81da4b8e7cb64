//! Tables: runs made of a repeated, fixed-size element.

use std::collections::BTreeMap;

use crate::run::RunFormat;
use crate::run::Segment;
use crate::run::SortedSpan;

/// Where a table gets its element count from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LengthSource {
  /// A fixed number of elements.
  Fixed(usize),
  /// The element count of another table, plus an offset.
  Anchor {
    /// The other table's name.
    name: String,
    /// Added to the other table's count.
    offset: i64,
  },
  /// As many elements as come before a terminator.
  Terminator(Vec<u8>),
}

impl LengthSource {
  /// Returns the text that ends a table format with this length source.
  pub fn format_string(&self) -> String {
    match self {
      Self::Fixed(n) => n.to_string(),
      Self::Anchor { name, offset } if *offset > 0 => {
        format!("{}+{}", name, offset)
      }
      Self::Anchor { name, offset } if *offset < 0 => {
        format!("{}{}", name, offset)
      }
      Self::Anchor { name, .. } => name.clone(),
      Self::Terminator(bytes) => {
        let hex = bytes.iter().map(|b| format!("{:02X}", b)).collect::<String>();
        format!("!{}", hex)
      }
    }
  }
}

/// A table of `count` elements, each laid out as `segments`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Table {
  /// The fields of each element.
  pub segments: Vec<Segment>,
  /// The number of elements.
  pub count: usize,
  /// Where `count` comes from.
  pub length: LengthSource,
  /// Pointers to elements other than the first, keyed by element index.
  pub inner_sources: BTreeMap<usize, SortedSpan>,
}

/// A reference to one field of one table element.
#[derive(Copy, Clone, Debug)]
pub struct FieldRef<'a> {
  /// The element index.
  pub element: usize,
  /// The segment index.
  pub index: usize,
  /// The segment.
  pub segment: &'a Segment,
  /// Where the field starts, relative to the table's start.
  pub start: usize,
  /// How far into the field the queried byte is.
  pub offset: usize,
}

impl Table {
  /// Creates a new table.
  pub fn new(segments: Vec<Segment>, count: usize, length: LengthSource) -> Self {
    Self {
      segments,
      count,
      length,
      inner_sources: BTreeMap::new(),
    }
  }

  /// Returns the size of one element, in bytes.
  pub fn stride(&self) -> usize {
    self.segments.iter().map(|s| s.len).sum()
  }

  /// Returns the table's terminator, which is empty unless the table is
  /// terminator-delimited.
  pub fn terminator(&self) -> &[u8] {
    match &self.length {
      LengthSource::Terminator(bytes) => bytes,
      _ => &[],
    }
  }

  /// Returns the byte offset of segment `index` within an element.
  pub fn segment_offset(&self, index: usize) -> usize {
    self.segments[..index].iter().map(|s| s.len).sum()
  }

  /// Iterates over the pointer segments of an element, along with their byte
  /// offsets within it.
  pub fn pointer_segments(&self) -> impl Iterator<Item = (usize, &Segment)> {
    let mut offset = 0;
    self.segments.iter().filter_map(move |s| {
      let this = offset;
      offset += s.len;
      if s.is_pointer() {
        Some((this, s))
      } else {
        None
      }
    })
  }

  /// Returns whether pointers may point to elements after the first. Tables
  /// that start with a pointer don't allow this, since such pointers could
  /// not be told apart from pointers to pointers.
  pub fn supports_inner_pointers(&self) -> bool {
    self.stride() > 0 && self.segments.first().map_or(false, |s| !s.is_pointer())
  }

  /// Returns the element that starts `rel` bytes into the table, if there is
  /// one.
  pub fn element_at(&self, rel: usize) -> Option<usize> {
    let stride = self.stride();
    if stride == 0 || rel % stride != 0 || rel / stride >= self.count {
      return None;
    }
    Some(rel / stride)
  }

  /// Finds the field containing the byte `rel` bytes into the table.
  pub fn field_at(&self, rel: usize) -> Option<FieldRef<'_>> {
    let stride = self.stride();
    if stride == 0 || rel >= stride * self.count {
      return None;
    }
    let element = rel / stride;
    let mut within = rel % stride;
    let mut start = element * stride;
    for (index, segment) in self.segments.iter().enumerate() {
      if within < segment.len {
        return Some(FieldRef {
          element,
          index,
          segment,
          start,
          offset: within,
        });
      }
      within -= segment.len;
      start += segment.len;
    }
    None
  }

  /// Returns the index of the segment called `name`.
  pub fn segment_named(&self, name: &str) -> Option<usize> {
    self.segments.iter().position(|s| s.name == name)
  }

  /// Returns whether this table's length or layout depends on the table
  /// called `name`.
  pub fn depends_on(&self, name: &str) -> bool {
    let by_length = match &self.length {
      LengthSource::Anchor { name: n, .. } => n.eq_ignore_ascii_case(name),
      _ => false,
    };
    by_length || self.segments.iter().any(|s| s.depends_on(name))
  }

  /// Counts the elements before the terminator in `data`, starting at `start`.
  ///
  /// Returns `None` if no terminator is found before the end of the data.
  pub fn count_until(
    data: &[u8],
    start: usize,
    stride: usize,
    terminator: &[u8],
  ) -> Option<usize> {
    if stride == 0 || terminator.is_empty() {
      return None;
    }
    let mut count = 0;
    loop {
      let at = start + count * stride;
      let bytes = data.get(at..at + terminator.len())?;
      if bytes == terminator {
        return Some(count);
      }
      count += 1;
    }
  }

  /// Returns a copy of this table with a new element count. Pointers into
  /// elements that no longer exist are forgotten.
  pub fn with_count(&self, count: usize) -> Self {
    let mut table = self.clone();
    table.count = count;
    table.inner_sources.retain(|&i, _| i < count);
    table
  }

  /// Records a pointer to element `index`.
  pub fn add_inner_source(&mut self, index: usize, source: usize) {
    self.inner_sources.entry(index).or_default().insert(source);
  }

  /// Forgets a pointer into an element, returning whether it was known.
  pub fn remove_inner_source(&mut self, source: usize) -> bool {
    let mut found = None;
    for (&index, sources) in self.inner_sources.iter_mut() {
      if sources.remove(source) {
        found = Some((index, sources.is_empty()));
        break;
      }
    }
    match found {
      Some((index, true)) => {
        self.inner_sources.remove(&index);
        true
      }
      Some(_) => true,
      None => false,
    }
  }

  /// Lays out `bytes`, which hold this table's elements, as if segment
  /// `index` were `width` bytes wide instead. Bytes that no longer fit are
  /// dropped and new ones are zero.
  pub fn relayout(&self, bytes: &[u8], index: usize, width: usize) -> Vec<u8> {
    let stride = self.stride();
    let before = self.segment_offset(index);
    let old = self.segments[index].len;
    let mut out = Vec::with_capacity(self.count * (stride - old + width));
    for element in bytes.chunks(stride).take(self.count) {
      if element.len() < stride {
        break;
      }
      out.extend_from_slice(&element[..before]);
      let field = element[before..before + old].iter().copied();
      out.extend(field.chain(std::iter::repeat(0)).take(width));
      out.extend_from_slice(&element[before + old..]);
    }
    out
  }

  /// Iterates over every pointer into an element, with its element index.
  pub fn inner_pointers(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
    self
      .inner_sources
      .iter()
      .flat_map(|(&i, span)| span.iter().map(move |s| (i, s)))
  }
}

impl RunFormat for Table {
  fn byte_len(&self) -> usize {
    self.stride() * self.count + self.terminator().len()
  }

  fn format_string(&self) -> String {
    let segments = self
      .segments
      .iter()
      .map(Segment::format_string)
      .collect::<Vec<_>>()
      .join(" ");
    format!("[{}]{}", segments, self.length.format_string())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::run::SegmentKind;

  fn table() -> Table {
    Table::new(
      vec![
        Segment::new("name", 4, SegmentKind::Pcs),
        Segment::new("value", 2, SegmentKind::Integer),
        Segment::new("ptr", 4, SegmentKind::Pointer { inner: String::new() }),
      ],
      3,
      LengthSource::Fixed(3),
    )
  }

  #[test]
  fn layout() {
    let t = table();
    assert_eq!(t.stride(), 10);
    assert_eq!(t.byte_len(), 30);
    assert_eq!(t.segment_offset(2), 6);
    assert_eq!(t.pointer_segments().map(|(o, _)| o).collect::<Vec<_>>(), vec![6]);
    assert!(t.supports_inner_pointers());
    assert_eq!(t.element_at(20), Some(2));
    assert_eq!(t.element_at(21), None);
    assert_eq!(t.element_at(30), None);

    let field = t.field_at(17).unwrap();
    assert_eq!((field.element, field.index, field.start, field.offset), (1, 2, 16, 1));
    assert!(t.field_at(30).is_none());
    assert_eq!(t.format_string(), "[name\"\"4 value: ptr<>]3");
  }

  #[test]
  fn terminators() {
    let data = [0, 1, 2, 3, 0xff];
    assert_eq!(Table::count_until(&data, 0, 1, &[0xff]), Some(4));
    assert_eq!(Table::count_until(&data, 0, 1, &[0xee]), None);
    let t = Table::new(
      vec![Segment::new("value", 1, SegmentKind::Integer)],
      4,
      LengthSource::Terminator(vec![0xff]),
    );
    assert_eq!(t.byte_len(), 5);
    assert_eq!(t.format_string(), "[value.]!FF");
  }

  #[test]
  fn inner_sources() {
    let mut t = table();
    t.add_inner_source(1, 0x100);
    t.add_inner_source(2, 0x104);
    assert_eq!(t.inner_pointers().collect::<Vec<_>>(), vec![(1, 0x100), (2, 0x104)]);

    let shrunk = t.with_count(2);
    assert_eq!(shrunk.inner_pointers().collect::<Vec<_>>(), vec![(1, 0x100)]);

    assert!(t.remove_inner_source(0x100));
    assert!(!t.remove_inner_source(0x100));
    assert!(!t.inner_sources.contains_key(&1));
  }

  #[test]
  fn relayout() {
    let t = Table::new(
      vec![
        Segment::new("a", 1, SegmentKind::Integer),
        Segment::new("bits", 1, SegmentKind::BitArray { source: "x".into() }),
        Segment::new("b", 1, SegmentKind::Integer),
      ],
      2,
      LengthSource::Fixed(2),
    );
    let bytes = [1, 0xaa, 2, 3, 0xbb, 4];
    assert_eq!(t.relayout(&bytes, 1, 2), vec![1, 0xaa, 0, 2, 3, 0xbb, 0, 4]);
    assert_eq!(t.relayout(&bytes, 1, 0), vec![1, 2, 3, 4]);
  }
}
