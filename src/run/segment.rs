//! Element segments: the typed fields that make up a table element.

use std::collections::BTreeMap;

use crate::int::Int;
use crate::int::Width;
use crate::pcs;

/// A source of named options, used to render enum-like fields as text.
pub trait OptionSource {
  /// Returns the options named by `source`, in value order.
  fn options(&self, source: &str) -> Vec<String>;
}

impl OptionSource for BTreeMap<String, Vec<String>> {
  fn options(&self, source: &str) -> Vec<String> {
    self.get(source).cloned().unwrap_or_default()
  }
}

/// One field within a table element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
  /// The field's name.
  pub name: String,
  /// The field's width in bytes.
  pub len: usize,
  /// How the field's bytes are interpreted.
  pub kind: SegmentKind,
}

/// The ways a segment's bytes can be interpreted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SegmentKind {
  /// A little-endian integer, shown in decimal.
  Integer,
  /// A little-endian integer, shown in hexadecimal.
  Hex,
  /// Fixed-width game text.
  Pcs,
  /// A pointer, optionally describing what it points to.
  Pointer {
    /// The format of the pointer's destination; may be empty.
    inner: String,
  },
  /// One bit per element of another table.
  BitArray {
    /// The table whose elements the bits stand for.
    source: String,
  },
  /// An integer naming one of a list of options.
  Enum {
    /// Where the options come from.
    source: String,
    /// Added to an option's index to get the stored value.
    offset: i64,
  },
  /// An integer split into bit fields.
  Tuple(Vec<TupleField>),
  /// An integer whose meaning depends on another field of the same element.
  Record {
    /// The name of the field that decides.
    field: String,
    /// For each value of that field, the options this field names.
    cases: BTreeMap<i64, String>,
  },
}

/// One bit field within a tuple segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TupleField {
  /// The field's name. Unnamed fields are padding.
  pub name: String,
  /// The number of bits in the field.
  pub bits: u32,
  /// The options the field names, if any.
  pub source: String,
}

impl TupleField {
  fn read(&self, value: u32, bit_offset: u32) -> u32 {
    (value >> bit_offset) & ((1 << self.bits) - 1)
  }

  fn write(&self, value: u32, bit_offset: u32, field: u32) -> u32 {
    let mask = ((1 << self.bits) - 1) << bit_offset;
    (value & !mask) | ((field << bit_offset) & mask)
  }

  fn format_string(&self) -> String {
    let mut marker = ":".repeat(self.bits as usize / 2);
    if self.bits % 2 == 1 {
      marker.push('.');
    }
    format!("{}{}{}", self.name, marker, self.source)
  }
}

impl Segment {
  /// Creates a new segment.
  pub fn new(name: impl Into<String>, len: usize, kind: SegmentKind) -> Self {
    Self {
      name: name.into(),
      len,
      kind,
    }
  }

  /// Returns whether this segment is a pointer.
  pub fn is_pointer(&self) -> bool {
    matches!(self.kind, SegmentKind::Pointer { .. })
  }

  /// Returns the inner format of a pointer segment.
  pub fn inner_format(&self) -> Option<&str> {
    match &self.kind {
      SegmentKind::Pointer { inner } => Some(inner),
      _ => None,
    }
  }

  /// Returns whether this segment's text or size depends on the table or
  /// list called `name`.
  pub fn depends_on(&self, name: &str) -> bool {
    let eq = |s: &str| s.eq_ignore_ascii_case(name);
    match &self.kind {
      SegmentKind::BitArray { source } | SegmentKind::Enum { source, .. } => {
        eq(source)
      }
      SegmentKind::Tuple(fields) => fields.iter().any(|f| eq(&f.source)),
      SegmentKind::Record { cases, .. } => cases.values().any(|s| eq(s)),
      _ => false,
    }
  }

  fn width_marker(&self) -> &'static str {
    Width::from_len(self.len).map(Width::marker).unwrap_or("")
  }

  /// Returns the text that declares this segment inside a table format.
  pub fn format_string(&self) -> String {
    let marker = self.width_marker();
    match &self.kind {
      SegmentKind::Integer => format!("{}{}", self.name, marker),
      SegmentKind::Hex => format!("{}{}|h", self.name, marker),
      SegmentKind::Pcs => format!("{}\"\"{}", self.name, self.len),
      SegmentKind::Pointer { inner } => format!("{}<{}>", self.name, inner),
      SegmentKind::BitArray { source } => {
        format!("{}|b[]{}", self.name, source)
      }
      SegmentKind::Enum { source, offset } if *offset != 0 => {
        format!("{}{}{}+{}", self.name, marker, source, offset)
      }
      SegmentKind::Enum { source, .. } => {
        format!("{}{}{}", self.name, marker, source)
      }
      SegmentKind::Tuple(fields) => {
        let fields = fields
          .iter()
          .map(|f| format!("|{}", f.format_string()))
          .collect::<String>();
        format!("{}{}|t{}", self.name, marker, fields)
      }
      SegmentKind::Record { field, cases } => {
        let cases = cases
          .iter()
          .map(|(k, v)| format!("{}={}", k, v))
          .collect::<Vec<_>>()
          .join("|");
        format!("{}{}|s={}({})", self.name, marker, field, cases)
      }
    }
  }

  fn read_int(&self, bytes: &[u8]) -> u32 {
    Width::from_len(self.len)
      .and_then(|w| Int::read_le(bytes, w))
      .map(Int::to_u32)
      .unwrap_or(0)
  }

  fn int_bytes(&self, value: u32) -> Option<Vec<u8>> {
    let width = Width::from_len(self.len)?;
    Some(Int::new(value, width).le_bytes().collect())
  }

  /// Renders this segment's `bytes` as text.
  ///
  /// Pointers render as a bare hex address; naming destinations is up to the
  /// caller, which knows about anchors.
  pub fn render(&self, bytes: &[u8], options: &dyn OptionSource) -> String {
    match &self.kind {
      SegmentKind::Integer | SegmentKind::Record { .. } => {
        self.read_int(bytes).to_string()
      }
      SegmentKind::Hex => {
        format!("{:0width$X}", self.read_int(bytes), width = self.len * 2)
      }
      SegmentKind::Pcs => format!("\"{}\"", pcs::decode(bytes)),
      SegmentKind::Pointer { .. } => {
        let value = self.read_int(bytes);
        match crate::int::decode_pointer(value) {
          Some(addr) => format!("<{:06X}>", addr),
          None => "<null>".to_string(),
        }
      }
      SegmentKind::BitArray { .. } => {
        bytes.iter().map(|b| format!("{:02X}", b)).collect()
      }
      SegmentKind::Enum { source, offset } => {
        let value = self.read_int(bytes) as i64 - offset;
        render_option(&options.options(source), value)
      }
      SegmentKind::Tuple(fields) => {
        let value = self.read_int(bytes);
        let mut parts = Vec::new();
        let mut bit_offset = 0;
        for field in fields {
          let x = field.read(value, bit_offset);
          bit_offset += field.bits;
          if field.name.is_empty() {
            continue;
          }
          if !field.source.is_empty() {
            parts.push(render_option(&options.options(&field.source), x as i64));
          } else if field.bits == 1 {
            parts.push((x == 1).to_string());
          } else {
            parts.push(x.to_string());
          }
        }
        format!("({})", parts.join(" "))
      }
    }
  }

  /// Parses `text` into the bytes of this segment. `current` holds the
  /// segment's existing bytes, which bit fields are merged into.
  ///
  /// Returns `None` if the text doesn't make sense for this segment. Pointers
  /// are not handled here.
  pub fn parse(
    &self,
    text: &str,
    current: &[u8],
    options: &dyn OptionSource,
  ) -> Option<Vec<u8>> {
    let text = text.trim();
    match &self.kind {
      SegmentKind::Integer | SegmentKind::Record { .. } => {
        self.int_bytes(parse_int(text)?)
      }
      SegmentKind::Hex => {
        let digits = text.trim_start_matches("0x");
        self.int_bytes(u32::from_str_radix(digits, 16).ok()?)
      }
      SegmentKind::Pcs => {
        let text = strip_quotes(text);
        let mut bytes = pcs::encode(text);
        bytes.truncate(self.len);
        if !bytes.contains(&pcs::TERMINATOR) {
          if let Some(last) = bytes.last_mut() {
            *last = pcs::TERMINATOR;
          }
        }
        bytes.resize(self.len, 0x00);
        Some(bytes)
      }
      SegmentKind::Pointer { .. } => None,
      SegmentKind::BitArray { .. } => {
        let digits = text.trim_start_matches('-');
        if digits.len() != self.len * 2 {
          return None;
        }
        (0..self.len)
          .map(|i| u8::from_str_radix(digits.get(i * 2..i * 2 + 2)?, 16).ok())
          .collect()
      }
      SegmentKind::Enum { source, offset } => {
        let index = match_option(text, &options.options(source))?;
        let value = index as i64 + offset;
        if value < 0 {
          return None;
        }
        self.int_bytes(value as u32)
      }
      SegmentKind::Tuple(fields) => {
        let inner = text.trim_start_matches('(').trim_end_matches(')');
        let parts = split_quoted(inner);
        let visible = fields.iter().filter(|f| !f.name.is_empty()).count();
        if parts.len() != visible {
          return None;
        }

        let mut value = self.read_int(current);
        let mut bit_offset = 0;
        let mut parts = parts.iter();
        for field in fields {
          if !field.name.is_empty() {
            let part = parts.next()?;
            let x = if !field.source.is_empty() {
              match_option(part, &options.options(&field.source))? as u32
            } else if field.bits == 1 {
              match part.as_str() {
                "true" => 1,
                "false" => 0,
                other => parse_int(other)?,
              }
            } else {
              parse_int(part)?
            };
            value = field.write(value, bit_offset, x);
          }
          bit_offset += field.bits;
        }
        self.int_bytes(value)
      }
    }
  }
}

/// Parses a decimal or `0x`-prefixed hexadecimal integer.
pub fn parse_int(text: &str) -> Option<u32> {
  match text.strip_prefix("0x") {
    Some(hex) => u32::from_str_radix(hex, 16).ok(),
    None => text.parse().ok(),
  }
}

fn strip_quotes(text: &str) -> &str {
  let text = text.strip_prefix('"').unwrap_or(text);
  text.strip_suffix('"').unwrap_or(text)
}

/// Splits `text` on spaces, keeping quoted runs together.
pub fn split_quoted(text: &str) -> Vec<String> {
  let mut parts = Vec::new();
  let mut current = String::new();
  let mut quoted = false;
  for c in text.chars() {
    match c {
      '"' => {
        quoted = !quoted;
        current.push(c);
      }
      ' ' if !quoted => {
        if !current.is_empty() {
          parts.push(std::mem::take(&mut current));
        }
      }
      _ => current.push(c),
    }
  }
  if !current.is_empty() {
    parts.push(current);
  }
  parts
}

/// Renders option `value` from `options`.
///
/// Out-of-range values render as numbers. When an option's text appears more
/// than once, later copies are disambiguated as `text~2`, `text~3`, and so on.
/// Text with spaces is quoted.
pub fn render_option(options: &[String], value: i64) -> String {
  if value < 0 || value as usize >= options.len() {
    return value.to_string();
  }
  let index = value as usize;
  let text = strip_quotes(&options[index]);
  let copies = 1 + options[..index]
    .iter()
    .filter(|o| strip_quotes(o) == text)
    .count();

  let mut text = text.to_string();
  if copies > 1 {
    text = format!("{}~{}", text, copies);
  }
  if text.contains(' ') {
    text = format!("\"{}\"", text);
  }
  text
}

/// Finds the option `text` names, returning its index.
///
/// Numbers are taken as indices. Otherwise, options are compared
/// case-insensitively, with `~n` picking the `n`th match; if nothing matches
/// exactly, an option containing the letters of `text` in order will do.
pub fn match_option(text: &str, options: &[String]) -> Option<usize> {
  let text = strip_quotes(text.trim());
  if let Ok(value) = text.parse::<usize>() {
    return Some(value);
  }
  if text.is_empty() {
    return None;
  }

  let (text, desired) = match text.rfind('~') {
    Some(i) => (&text[..i], text[i + 1..].parse::<usize>().ok()?),
    None => (text, 1),
  };
  let text = text.to_lowercase();

  let mut exact = 0;
  let mut partial = Vec::new();
  for (i, option) in options.iter().enumerate() {
    let option = strip_quotes(option).to_lowercase();
    if option == text {
      exact += 1;
      if exact == desired {
        return Some(i);
      }
    }
    if matches_partial(&option, &text) {
      partial.push(i);
    }
  }

  if exact == 0 {
    return partial.get(desired - 1).copied();
  }
  None
}

/// Checks whether the letters and digits of `partial` appear in `full`, in
/// order.
fn matches_partial(full: &str, partial: &str) -> bool {
  let mut full = full.chars();
  partial
    .chars()
    .filter(|c| c.is_alphanumeric())
    .all(|c| full.any(|f| f == c))
}
