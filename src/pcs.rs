//! The game's text encoding.
//!
//! Gen 3 games store text in a proprietary single-byte character set, usually
//! called "PCS". Strings end with a `0xff` terminator. A handful of bytes are
//! control codes; those, and any byte without a printable character, are
//! rendered as escapes (`\n`, `\l`, `\p`, or `\XX`).

use std::collections::HashMap;

use lazy_static::lazy_static;

/// The byte that ends every string.
pub const TERMINATOR: u8 = 0xff;

/// Strings longer than this are assumed to be garbage.
pub const MAX_LEN: usize = 1000;

const NEWLINE: u8 = 0xfe;
const SCROLL: u8 = 0xfa;
const PARAGRAPH: u8 = 0xfb;

lazy_static! {
  static ref CHARS: [Option<char>; 256] = {
    let mut chars = [None; 256];
    chars[0x00] = Some(' ');
    chars[0x1b] = Some('é');
    for (i, c) in ('0'..='9').enumerate() {
      chars[0xa1 + i] = Some(c);
    }
    let punctuation = [
      (0xab, '!'),
      (0xac, '?'),
      (0xad, '.'),
      (0xae, '-'),
      (0xb0, '…'),
      (0xb1, '“'),
      (0xb2, '”'),
      (0xb3, '‘'),
      (0xb4, '\''),
      (0xb5, '♂'),
      (0xb6, '♀'),
      (0xb8, ','),
      (0xba, '/'),
      (0xf0, ':'),
    ];
    for &(byte, c) in punctuation.iter() {
      chars[byte] = Some(c);
    }
    for (i, c) in ('A'..='Z').enumerate() {
      chars[0xbb + i] = Some(c);
    }
    for (i, c) in ('a'..='z').enumerate() {
      chars[0xd5 + i] = Some(c);
    }
    chars
  };
  static ref BYTES: HashMap<char, u8> = CHARS
    .iter()
    .enumerate()
    .filter_map(|(i, c)| c.map(|c| (c, i as u8)))
    .collect();
}

/// Returns whether `byte` may appear inside a string.
#[inline]
fn is_text(byte: u8) -> bool {
  CHARS[byte as usize].is_some() || matches!(byte, NEWLINE | SCROLL | PARAGRAPH)
}

/// Scans for a string starting at `start`, returning its length, including
/// the terminator.
///
/// Returns `None` if the bytes at `start` don't look like text: a byte without
/// a character, no terminator within `MAX_LEN` bytes, or (unless
/// `allow_repeats` is set) the same character four times in a row, which is
/// far more likely to be padding than prose.
///
/// ```
/// # use hexmeta::pcs::read_len;
/// assert_eq!(read_len(&[0xc2, 0xbf, 0xff], 0, false), Some(3));
/// assert_eq!(read_len(&[0xc2, 0x10, 0xff], 0, false), None);
/// ```
pub fn read_len(data: &[u8], start: usize, allow_repeats: bool) -> Option<usize> {
  let data = data.get(start..)?;
  let mut run = 0;
  for (i, &byte) in data.iter().enumerate().take(MAX_LEN) {
    if byte == TERMINATOR {
      return Some(i + 1);
    }
    if !is_text(byte) {
      return None;
    }
    if i > 0 && data[i - 1] == byte {
      run += 1;
      if run >= 3 && !allow_repeats {
        return None;
      }
    } else {
      run = 0;
    }
  }
  None
}

/// Decodes the string in `bytes`, stopping at the first terminator.
pub fn decode(bytes: &[u8]) -> String {
  let mut text = String::new();
  for &byte in bytes.iter().take_while(|&&b| b != TERMINATOR) {
    match (byte, CHARS[byte as usize]) {
      (NEWLINE, _) => text.push_str("\\n"),
      (SCROLL, _) => text.push_str("\\l"),
      (PARAGRAPH, _) => text.push_str("\\p"),
      (_, Some(c)) => text.push(c),
      (_, None) => text.push_str(&format!("\\{:02X}", byte)),
    }
  }
  text
}

/// Encodes `text` as game text, appending a terminator.
///
/// Characters that have no encoding are dropped. Escapes produced by
/// `decode()` are understood.
pub fn encode(text: &str) -> Vec<u8> {
  let mut bytes = Vec::with_capacity(text.len() + 1);
  let mut chars = text.chars().peekable();
  while let Some(c) = chars.next() {
    if c != '\\' {
      if let Some(&b) = BYTES.get(&c) {
        bytes.push(b);
      }
      continue;
    }

    match chars.next() {
      Some('n') => bytes.push(NEWLINE),
      Some('l') => bytes.push(SCROLL),
      Some('p') => bytes.push(PARAGRAPH),
      Some(hi) if hi.is_ascii_hexdigit() => {
        let lo = chars.next_if(|c| c.is_ascii_hexdigit());
        let digits = match lo {
          Some(lo) => format!("{}{}", hi, lo),
          None => hi.to_string(),
        };
        if let Ok(b) = u8::from_str_radix(&digits, 16) {
          bytes.push(b);
        }
      }
      Some(other) => {
        if let Some(&b) = BYTES.get(&other) {
          bytes.push(b);
        }
      }
      None => {}
    }
  }
  bytes.push(TERMINATOR);
  bytes
}
