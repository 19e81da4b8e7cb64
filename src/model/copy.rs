//! Turning data into anchor text and back.
//!
//! Copied text is a sequence of whitespace-separated tokens:
//! - `^name format` declares an anchor at the current address.
//! - `<name>`, `<0001A4>`, and `<null>` are pointers.
//! - `::table` is a word holding the length of `table`.
//! - `"text"` is game text, including its terminator.
//! - `1F` is a single byte.
//!
//! Inside a table, each token is one field, written the way the field renders,
//! and each element ends with a comma.

use tracing::debug;

use crate::delta::Delta;
use crate::error::Error;
use crate::error::Warning;
use crate::format::parse_format;
use crate::format::split_name_and_format;
use crate::format::Format;
use crate::pcs;
use crate::run::Run;
use crate::run::RunKind;

use super::Model;

/// Where the four-character game code lives in a ROM header.
const GAME_CODE: usize = 0xac;

/// A pasted token.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Token {
  text: String,
  /// Whether a comma after this token closed a table element.
  closes_element: bool,
}

/// Splits pasted text into tokens. Quoted text and bracketed groups stay
/// together; trailing commas are dropped.
fn tokenize(text: &str) -> Vec<Token> {
  let mut tokens = Vec::new();
  let mut current = String::new();
  let mut quoted = false;
  let mut depth = 0usize;
  for c in text.chars() {
    match c {
      '"' => quoted = !quoted,
      '[' | '(' | '<' if !quoted => depth += 1,
      ']' | ')' | '>' if !quoted => depth = depth.saturating_sub(1),
      c if c.is_whitespace() && !quoted && depth == 0 => {
        push_token(&mut tokens, &mut current);
        continue;
      }
      _ => {}
    }
    current.push(c);
  }
  push_token(&mut tokens, &mut current);
  tokens
}

fn push_token(tokens: &mut Vec<Token>, current: &mut String) {
  let text = current.trim_end_matches(',');
  if !text.is_empty() {
    tokens.push(Token {
      text: text.to_string(),
      closes_element: text.len() < current.len(),
    });
  }
  current.clear();
}

/// Parses a token made of exactly one hex byte.
fn parse_byte(token: &str) -> Option<u8> {
  if token.len() != 2 {
    return None;
  }
  u8::from_str_radix(token, 16).ok()
}

impl Model {
  /// Renders `len` bytes at `start` as text that `paste()` understands.
  ///
  /// A range that starts partway into a run starts at the beginning of that
  /// run instead (or of that element, in a table). Runs that end past the
  /// range are copied in full.
  ///
  /// Unnamed runs with pointers to them are given default names, so that the
  /// copied text can declare them; this is why copying takes a `Delta`.
  pub fn copy_region(&mut self, delta: &mut Delta, start: usize, len: usize) -> Result<String, Error> {
    self.atomically(delta, |model, delta| {
      model.check_bounds(start, len)?;
      model.copy_tokens(delta, start, start + len)
    })
  }

  fn copy_tokens(&mut self, delta: &mut Delta, start: usize, end: usize) -> Result<String, Error> {
    let mut at = start;
    let container = self.runs.lookup(start).clone();
    if !container.is_null() && container.start < start {
      at = match container.as_table() {
        Some(table) => {
          let stride = table.stride();
          container.start + (start - container.start) / stride * stride
        }
        None => container.start,
      };
    }

    let mut tokens = Vec::new();
    while at < end {
      let mut run = self.runs.next_run(at).clone();
      if run.is_null() || run.start >= end {
        self.copy_bytes(&mut tokens, at, end);
        break;
      }
      if run.start > at {
        self.copy_bytes(&mut tokens, at, run.start);
        at = run.start;
        continue;
      }

      if run.start == at {
        if let Some(anchor) = self.anchor_token(delta, &run)? {
          tokens.push(anchor);
        }
        if run.is_empty() {
          match self.runs.get_sized(at) {
            Some(sized) => run = sized.clone(),
            None => {
              self.copy_bytes(&mut tokens, at, at + 1);
              at += 1;
              continue;
            }
          }
        }
      }
      at = match &run.kind {
        RunKind::Pointer => {
          let dest = self.rom.read_pointer(at);
          tokens.push(self.pointer_token(at, dest));
          run.end()
        }
        RunKind::NoInfo => {
          self.copy_bytes(&mut tokens, at, at + 1);
          at + 1
        }
        RunKind::Pcs { len } => {
          let bytes = &self.rom.bytes()[at..at + len];
          tokens.push(format!("\"{}\"", pcs::decode(bytes)));
          run.end()
        }
        RunKind::Word { table } => {
          tokens.push(format!("::{}", table));
          run.end()
        }
        RunKind::Ascii { .. } | RunKind::Stream(_) => {
          self.copy_bytes(&mut tokens, at, run.end());
          run.end()
        }
        RunKind::Table(_) => self.copy_table(&mut tokens, &run, at, end),
      };
    }
    Ok(tokens.join(" "))
  }

  fn copy_bytes(&self, tokens: &mut Vec<String>, start: usize, end: usize) {
    let bytes = &self.rom.bytes()[start..end];
    tokens.extend(bytes.iter().map(|b| format!("{:02X}", b)));
  }

  /// Renders the elements of the table `run` from `at` on, up to the first
  /// element boundary at or past `end`. Returns where copying continues.
  fn copy_table(&self, tokens: &mut Vec<String>, run: &Run, at: usize, end: usize) -> usize {
    let table = match run.as_table() {
      Some(table) => table,
      None => return run.end(),
    };
    let stride = table.stride();
    let elements_end = run.start + stride * table.count;

    let mut at = at;
    while at < end && at < elements_end {
      let mut fields = Vec::new();
      let mut field_start = at;
      for segment in &table.segments {
        let text = if segment.is_pointer() {
          let dest = self.rom.read_pointer(field_start);
          self.pointer_token(field_start, dest)
        } else {
          let bytes = &self.rom.bytes()[field_start..field_start + segment.len];
          segment.render(bytes, self)
        };
        fields.push(text);
        field_start += segment.len;
      }
      tokens.push(format!("{},", fields.join(" ")));
      at += stride;
    }
    if at >= elements_end {
      run.end()
    } else {
      at
    }
  }

  /// Renders the anchor that starts `run`, if it needs one, naming the run if
  /// it has no name yet.
  fn anchor_token(&mut self, delta: &mut Delta, run: &Run) -> Result<Option<String>, Error> {
    let typed = !matches!(
      run.kind,
      RunKind::NoInfo | RunKind::Pointer | RunKind::Word { .. }
    );
    let existing = self.anchors.name_at(run.start).map(String::from);
    let name = match existing {
      Some(name) => name,
      None if typed || !run.sources.is_empty() => {
        let (name, _) = self.anchors.uniquify(run.start, &self.default_name(run));
        debug!(addr = run.start, "naming copied anchor `{}`", name);
        self.put_name(delta, run.start, &name)?;
        name
      }
      None => return Ok(None),
    };
    Ok(Some(format!("^{}{}", name, run.format_string())))
  }

  /// Makes up a name for `run`: `misc.`, then the first few words of its
  /// text if it is text, then the game code, then its address.
  fn default_name(&self, run: &Run) -> String {
    let sample = match run.kind {
      RunKind::Pcs { len } => {
        let text = pcs::decode(&self.rom.bytes()[run.start..run.start + len]);
        text
          .split_whitespace()
          .take(3)
          .map(|w| w.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>())
          .collect::<String>()
      }
      _ => String::new(),
    };
    let code = self
      .rom
      .bytes()
      .get(GAME_CODE..GAME_CODE + 4)
      .filter(|b| b.iter().all(u8::is_ascii_alphanumeric))
      .map(|b| b.iter().map(|&c| c as char).collect::<String>())
      .unwrap_or_default();
    format!("misc.{}{}{:06X}", sample, code, run.start)
  }

  /// Renders the pointer at `source`, which points to `dest`.
  fn pointer_token(&self, source: usize, dest: Option<usize>) -> String {
    let name = self.resolve_address(Some(source), dest);
    match dest {
      _ if !name.is_empty() => format!("<{}>", name),
      Some(dest) => format!("<{:06X}>", dest),
      None => "<null>".to_string(),
    }
  }

  /// Writes text produced by `copy_region()` at `addr`.
  ///
  /// Tables are declared as soon as their anchors are seen, so that the
  /// fields after them can be written. Everything else is declared once all
  /// the data is in place. Pointers to names that don't exist yet wait for
  /// them.
  pub fn paste(&mut self, delta: &mut Delta, addr: usize, text: &str) -> Result<Vec<Warning>, Error> {
    let tokens = tokenize(text);
    self.atomically(delta, |model, delta| {
      model.check_bounds(addr, 0)?;
      let mut warnings = Vec::new();
      let mut deferred = Vec::new();
      let mut at = addr;

      for (i, token) in tokens.iter().enumerate() {
        at = model.continue_terminated_table(delta, at, &tokens[i..])?;
        let token = token.text.as_str();
        if token.starts_with('^') {
          let (_, format) = split_name_and_format(token);
          if let Format::Table(_) = parse_format(&format)? {
            warnings.extend(model.apply_anchor(delta, at, token, true)?);
          } else {
            deferred.push((at, token.to_string()));
          }
          continue;
        }
        at = model.paste_token(delta, at, token)?;
      }

      for (at, token) in deferred {
        warnings.extend(model.apply_anchor(delta, at, &token, true)?);
      }
      Ok(warnings)
    })
  }

  /// Writes a single token at `at`, returning where the next one goes.
  fn paste_token(&mut self, delta: &mut Delta, at: usize, token: &str) -> Result<usize, Error> {
    let container = self.runs.lookup(at).clone();
    if let Some(table) = container.as_table() {
      if let Some(field) = table.field_at(at - container.start) {
        if field.offset != 0 {
          return Err(Error::bad_format(token, "not at the start of a field"));
        }
        let segment = field.segment.clone();
        if segment.is_pointer() {
          self.paste_pointer(delta, at, token)?;
        } else {
          let current = self.rom.bytes()[at..at + segment.len].to_vec();
          let bytes = segment
            .parse(token, &current, &*self)
            .ok_or_else(|| Error::bad_format(token, format!("not a value for `{}`", segment.name)))?;
          self.write_bytes(delta, at, &bytes)?;
        }

        let next = at + segment.len;
        let elements_end = container.start + table.stride() * table.count;
        if next == elements_end && table.terminator().is_empty() {
          return Ok(container.end());
        }
        return Ok(next);
      }
    }

    if token.starts_with('<') && token.ends_with('>') {
      self.paste_pointer(delta, at, token)?;
      return Ok(at + 4);
    }

    if let Some(table) = token.strip_prefix("::") {
      self.check_bounds(at, 4)?;
      self.clear_range(delta, at, 4, false)?;
      self.observe_run_written(
        delta,
        Run::new(
          at,
          RunKind::Word {
            table: table.to_string(),
          },
        ),
      )?;
      return Ok(at + 4);
    }

    if token.starts_with('"') {
      let text = token.trim_start_matches('"').trim_end_matches('"');
      let bytes = pcs::encode(text);
      self.check_bounds(at, bytes.len())?;
      self.write_bytes(delta, at, &bytes)?;
      if let Some(run) = self.runs.get(at).cloned() {
        if let RunKind::Pcs { len } = run.kind {
          if len != bytes.len() {
            let resized = Run {
              kind: RunKind::Pcs { len: bytes.len() },
              ..run
            };
            self.observe_anchor_written(delta, "", resized)?;
          }
        }
      }
      return Ok(at + bytes.len());
    }

    if let Some(byte) = parse_byte(token) {
      self.check_bounds(at, 1)?;
      let protected = matches!(container.kind, RunKind::Pointer | RunKind::Word { .. });
      if !container.is_null() && protected {
        self.clear_range(delta, at, 1, false)?;
      }
      self.set_byte(delta, at, byte)?;
      return Ok(at + 1);
    }

    Err(Error::bad_format(token, "unrecognized token"))
  }

  /// Handles pasting at the end of the elements of a table that ends with a
  /// terminator. If the tokens `ahead` make up a whole element, the table
  /// grows by one element in place to hold it; otherwise pasting carries on
  /// past the terminator.
  ///
  /// Returns where the next token goes.
  fn continue_terminated_table(
    &mut self,
    delta: &mut Delta,
    at: usize,
    ahead: &[Token],
  ) -> Result<usize, Error> {
    let run = self.runs.lookup(at).clone();
    let (stride, count, fields) = match run.as_table() {
      Some(table) if !table.terminator().is_empty() => {
        (table.stride(), table.count, table.segments.len())
      }
      _ => return Ok(at),
    };
    if at != run.start + stride * count {
      return Ok(at);
    }

    let element = ahead.len() >= fields
      && ahead[..fields].iter().enumerate().all(|(i, token)| {
        !token.text.starts_with('^') && token.closes_element == (i + 1 == fields)
      });
    if !element {
      return Ok(run.end());
    }

    if !self.can_safely_use(run.end(), run.end() + stride) {
      let next = self.runs.next_run(run.end());
      return Err(Error::Conflict {
        start: at,
        len: stride,
        existing: if next.is_null() { run.start } else { next.start },
      });
    }
    let grown = self.resize_table(delta, run, count + 1)?;
    self.observe_run_written(delta, grown)?;
    Ok(at)
  }

  /// Writes the pointer token `token` at `source`.
  fn paste_pointer(&mut self, delta: &mut Delta, source: usize, token: &str) -> Result<(), Error> {
    let target = token.trim_start_matches('<').trim_end_matches('>').trim();
    self.prepare_pointer(delta, source)?;
    let dest = if target.eq_ignore_ascii_case("null") || target.is_empty() {
      None
    } else if self.address_for_anchor(target).is_some() {
      self.address_for_anchor(target)
    } else if let Ok(dest) = usize::from_str_radix(target, 16) {
      self.check_bounds(dest, 1)?;
      Some(dest)
    } else {
      self.resolve_name(delta, Some(source), target)
    };
    self.finish_pointer(delta, source, dest)
  }
}
