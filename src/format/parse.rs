//! The table format parser.

use std::collections::BTreeMap;

use pest::error::Error as PestError;
use pest::error::ErrorVariant;
use pest::error::InputLocation;
use pest::iterators::Pair;
use pest_derive::Parser;

use crate::error::Error;
use crate::int::Width;
use crate::run::segment::TupleField;
use crate::run::LengthSource;
use crate::run::Segment;
use crate::run::SegmentKind;

#[derive(Parser)]
#[grammar = "format/grammar.pest"]
struct PegParser;

/// A table format, before it has been placed anywhere.
///
/// Bit-array segments have a length of zero here: their width depends on
/// another table, and is filled in once the format is placed in a model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableFormat {
  /// The element layout.
  pub segments: Vec<Segment>,
  /// Where the element count comes from.
  pub length: LengthSource,
}

fn peg_error(format: &str, e: PestError<Rule>) -> Error {
  let pos = match e.location {
    InputLocation::Pos(p) => p,
    InputLocation::Span((p, _)) => p,
  };
  let reason = match e.variant {
    ErrorVariant::ParsingError { positives, .. } => {
      format!("expected {:?} at column {}", positives, pos + 1)
    }
    ErrorVariant::CustomError { message } => message,
  };
  Error::bad_format(format, reason)
}

/// Parses a table format, such as `[name""11 value:]!FFFF`.
pub fn parse_table(format: &str) -> Result<TableFormat, Error> {
  use pest::Parser;
  let mut pairs = PegParser::parse(Rule::Table, format)
    .map_err(|e| peg_error(format, e))?;

  let mut segments = Vec::new();
  let mut length = None;
  for pair in pairs.next().unwrap().into_inner() {
    match pair.as_rule() {
      Rule::Segment => segments.push(segment(format, pair)?),
      Rule::Fixed => {
        let n = number(format, pair.as_str())?;
        length = Some(LengthSource::Fixed(n));
      }
      Rule::Terminator => {
        let digits = pair.into_inner().next().unwrap().as_str();
        if digits.len() % 2 != 0 {
          return Err(Error::bad_format(format, "odd number of terminator digits"));
        }
        let bytes = (0..digits.len())
          .step_by(2)
          .map(|i| u8::from_str_radix(&digits[i..i + 2], 16))
          .collect::<Result<Vec<_>, _>>()
          .map_err(|e| Error::bad_format(format, e))?;
        length = Some(LengthSource::Terminator(bytes));
      }
      Rule::AnchorCount => {
        let mut inner = pair.into_inner();
        let name = inner.next().unwrap().as_str().to_string();
        let offset = match inner.next() {
          Some(offset) => offset
            .as_str()
            .parse::<i64>()
            .map_err(|e| Error::bad_format(format, e))?,
          None => 0,
        };
        length = Some(LengthSource::Anchor { name, offset });
      }
      _ => {}
    }
  }

  if segments.is_empty() {
    return Err(Error::bad_format(format, "tables need at least one segment"));
  }
  let length = length.ok_or_else(|| Error::bad_format(format, "missing length"))?;
  Ok(TableFormat { segments, length })
}

fn number(format: &str, text: &str) -> Result<usize, Error> {
  text.parse().map_err(|e| Error::bad_format(format, e))
}

fn segment(format: &str, pair: Pair<Rule>) -> Result<Segment, Error> {
  let mut inner = pair.into_inner();
  let name = inner.next().unwrap().as_str().to_string();
  let kind = inner.next().unwrap();
  match kind.as_rule() {
    Rule::Text => {
      let len = number(format, kind.into_inner().next().unwrap().as_str())?;
      if len == 0 {
        return Err(Error::bad_format(format, "text fields need a length"));
      }
      Ok(Segment::new(name, len, SegmentKind::Pcs))
    }
    Rule::Pointer => {
      let inner = kind.into_inner().next().unwrap().as_str().to_string();
      Ok(Segment::new(name, 4, SegmentKind::Pointer { inner }))
    }
    Rule::BitArray => {
      let source = kind.into_inner().next().unwrap().as_str().to_string();
      Ok(Segment::new(name, 0, SegmentKind::BitArray { source }))
    }
    Rule::Int => {
      let mut parts = kind.into_inner();
      let width = Width::from_marker(parts.next().unwrap().as_str()).unwrap();
      let kind = match parts.next() {
        None => SegmentKind::Integer,
        Some(suffix) => suffix_kind(format, width, suffix)?,
      };
      Ok(Segment::new(name, width.len(), kind))
    }
    _ => unreachable!(),
  }
}

fn suffix_kind(
  format: &str,
  width: Width,
  suffix: Pair<Rule>,
) -> Result<SegmentKind, Error> {
  match suffix.as_rule() {
    Rule::Hex => Ok(SegmentKind::Hex),
    Rule::Enum => {
      let mut inner = suffix.into_inner();
      let source = inner.next().unwrap().as_str().to_string();
      let offset = match inner.next() {
        Some(n) => number(format, n.as_str())? as i64,
        None => 0,
      };
      Ok(SegmentKind::Enum { source, offset })
    }
    Rule::Tuple => {
      let mut fields = Vec::new();
      for field in suffix.into_inner() {
        let mut inner = field.into_inner();
        let name = inner.next().unwrap().as_str().to_string();
        let bits = inner
          .next()
          .unwrap()
          .as_str()
          .chars()
          .map(|c| if c == ':' { 2 } else { 1 })
          .sum();
        let source = inner.next().map(|s| s.as_str().to_string());
        fields.push(TupleField {
          name,
          bits,
          source: source.unwrap_or_default(),
        });
      }
      let total = fields.iter().map(|f| f.bits).sum::<u32>();
      if total > width.bits() {
        return Err(Error::bad_format(format, "tuple too long to fit in field"));
      }
      Ok(SegmentKind::Tuple(fields))
    }
    Rule::Record => {
      let mut inner = suffix.into_inner();
      let field = inner.next().unwrap().as_str().to_string();
      let mut cases = BTreeMap::new();
      for case in inner {
        let mut kv = case.into_inner();
        let key = number(format, kv.next().unwrap().as_str())? as i64;
        let value = kv.next().unwrap().as_str().to_string();
        cases.insert(key, value);
      }
      Ok(SegmentKind::Record { field, cases })
    }
    _ => unreachable!(),
  }
}
