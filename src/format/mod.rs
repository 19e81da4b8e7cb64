//! Anchor text and formats.
//!
//! An anchor is declared with text like `^items[name""14 price:]40`: a caret,
//! a name, and a format. This module splits that text apart, recognizes the
//! format, and builds the run the format describes at a given address.

use crate::error::Error;
use crate::pcs;
use crate::run::LengthSource;
use crate::run::Run;
use crate::run::RunKind;
use crate::run::SegmentKind;
use crate::run::SortedSpan;
use crate::run::Stream;
use crate::run::StreamKind;
use crate::run::Table;

mod parse;

pub use parse::parse_table;
pub use parse::TableFormat;

/// The character that starts anchor text.
pub const ANCHOR_START: char = '^';

/// A recognized format, before it has been placed anywhere.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Format {
  /// No format at all; just a name.
  None,
  /// Game text.
  Pcs,
  /// ASCII text of a fixed length.
  Ascii(usize),
  /// A stream.
  Stream(StreamKind),
  /// A table.
  Table(TableFormat),
}

/// What building a run needs to know about the model it goes into.
pub trait Lookup {
  /// The raw data.
  fn data(&self) -> &[u8];
  /// The element count of the table called `name`, if there is one.
  fn table_count(&self, name: &str) -> Option<usize>;
}

/// Splits anchor text into a name and a format.
///
/// The name ends at the first `[`, `"`, or `` ` ``.
///
/// ```
/// # use hexmeta::format::split_name_and_format;
/// assert_eq!(split_name_and_format("^bob\"\""), ("bob".into(), "\"\"".into()));
/// assert_eq!(split_name_and_format("items[a.]4"), ("items".into(), "[a.]4".into()));
/// assert_eq!(split_name_and_format("^moves`plm`"), ("moves".into(), "`plm`".into()));
/// assert_eq!(split_name_and_format("^ plain "), ("plain".into(), "".into()));
/// ```
pub fn split_name_and_format(text: &str) -> (String, String) {
  let text = text.trim();
  let text = text.strip_prefix(ANCHOR_START).unwrap_or(text);
  let split = text
    .find(|c| c == '[' || c == '"' || c == '`')
    .unwrap_or_else(|| text.len());
  (text[..split].trim().to_string(), text[split..].trim().to_string())
}

/// Recognizes a format string.
pub fn parse_format(format: &str) -> Result<Format, Error> {
  let format = format.trim();
  if format.is_empty() {
    return Ok(Format::None);
  }
  if format == "\"\"" {
    return Ok(Format::Pcs);
  }
  if let Some(len) = format.strip_prefix("`asc`") {
    return len
      .parse()
      .map(Format::Ascii)
      .map_err(|e| Error::bad_format(format, e));
  }
  if format.starts_with('`') {
    return StreamKind::parse(format)
      .map(Format::Stream)
      .ok_or_else(|| Error::bad_format(format, "unknown stream"));
  }
  if format.starts_with('[') {
    return parse_table(format).map(Format::Table);
  }
  Err(Error::bad_format(format, "unrecognized format"))
}

/// Builds the run that `format` describes at `addr`.
///
/// `sources` are the pointers to `addr`, which become the new run's sources.
pub fn build_run(
  format: &Format,
  text: &str,
  addr: usize,
  sources: &SortedSpan,
  lookup: &dyn Lookup,
) -> Result<Run, Error> {
  let data = lookup.data();
  let kind = match format {
    Format::None => RunKind::NoInfo,
    Format::Pcs => {
      let len = pcs::read_len(data, addr, true).ok_or(Error::NoString(addr))?;
      RunKind::Pcs { len }
    }
    Format::Ascii(len) => RunKind::Ascii { len: *len },
    Format::Stream(kind) => {
      let stream = Stream::read(kind.clone(), data, addr, sources)
        .ok_or_else(|| Error::bad_format(text, "data does not match format"))?;
      RunKind::Stream(stream)
    }
    Format::Table(format) => RunKind::Table(build_table(format, text, addr, lookup)?),
  };

  let run = Run {
    start: addr,
    sources: sources.clone(),
    kind,
  };
  if run.end() > data.len() {
    return Err(Error::OutOfBounds {
      addr: run.end(),
      len: data.len(),
    });
  }
  Ok(run)
}

/// Places a table format at `addr`, working out its bit-array widths and its
/// element count.
pub fn build_table(
  format: &TableFormat,
  text: &str,
  addr: usize,
  lookup: &dyn Lookup,
) -> Result<Table, Error> {
  let mut segments = format.segments.clone();
  for segment in &mut segments {
    if let SegmentKind::BitArray { source } = &segment.kind {
      let count = lookup.table_count(source).unwrap_or(0);
      segment.len = (count + 7) / 8;
    }
  }

  let mut table = Table::new(segments, 0, format.length.clone());
  let stride = table.stride();
  if stride == 0 {
    return Err(Error::bad_format(text, "elements have no size"));
  }

  table.count = match &format.length {
    LengthSource::Fixed(n) => *n,
    LengthSource::Anchor { name, offset } => {
      let count = lookup.table_count(name).unwrap_or(0) as i64 + offset;
      count.max(0) as usize
    }
    LengthSource::Terminator(bytes) => {
      Table::count_until(lookup.data(), addr, stride, bytes)
        .ok_or_else(|| Error::bad_format(text, "no terminator found"))?
    }
  };
  Ok(table)
}

#[cfg(test)]
mod test {
  use super::*;

  struct Data(Vec<u8>);

  impl Lookup for Data {
    fn data(&self) -> &[u8] {
      &self.0
    }
    fn table_count(&self, name: &str) -> Option<usize> {
      match name {
        "moves" => Some(20),
        _ => None,
      }
    }
  }

  #[test]
  fn formats() {
    assert_eq!(parse_format("").unwrap(), Format::None);
    assert_eq!(parse_format("\"\"").unwrap(), Format::Pcs);
    assert_eq!(parse_format("`asc`4").unwrap(), Format::Ascii(4));
    assert_eq!(
      parse_format("`egg`").unwrap(),
      Format::Stream(StreamKind::EggMoves)
    );
    assert!(parse_format("`asc`x").is_err());
    assert!(parse_format("`zzz`").is_err());
    assert!(parse_format("junk").is_err());
  }

  #[test]
  fn build_tables() {
    let data = Data(vec![0, 1, 2, 3, 0xff, 0xcc]);
    let format = parse_format("[value.]!FF").unwrap();
    let run = build_run(&format, "[value.]!FF", 0, &SortedSpan::new(), &data).unwrap();
    let table = run.as_table().unwrap();
    assert_eq!(table.count, 4);
    assert_eq!(run.len(), 5);

    let format = parse_format("[flags|b[]moves x.]moves-18").unwrap();
    let run = build_run(&format, "", 0, &SortedSpan::new(), &data).unwrap();
    let table = run.as_table().unwrap();
    assert_eq!(table.segments[0].len, 3);
    assert_eq!(table.count, 2);
    assert_eq!(run.len(), 8);
    assert!(build_run(&format, "", 1, &SortedSpan::new(), &data).is_err());
  }

  #[test]
  fn build_text() {
    let data = Data(vec![0xbb, 0xbc, 0xff, 0x10, 0xff]);
    let run = build_run(&Format::Pcs, "\"\"", 0, &SortedSpan::new(), &data).unwrap();
    assert_eq!(run.kind, RunKind::Pcs { len: 3 });
    let err = build_run(&Format::Pcs, "\"\"", 3, &SortedSpan::new(), &data);
    assert_eq!(err, Err(Error::NoString(3)));
  }
}
