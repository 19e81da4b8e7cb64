//! Integer and pointer types used by hexmeta.
//!
//! Game data is made up of little-endian integers one to four bytes wide, plus
//! 32-bit pointers into the cartridge's address space. This module provides
//! types for handling those integer widths and pointer encodings cleanly.

use std::fmt;
use std::fmt::Display;

/// The address at which the cartridge is mapped into the GBA's address space.
///
/// A pointer to ROM offset `n` is stored as the value `ROM_BASE + n`.
pub const ROM_BASE: u32 = 0x0800_0000;

/// The highest bank byte a pointer into ROM may carry. ROMs larger than 16
/// mebibytes spill over into bank `0x09`.
const LAST_ROM_BANK: u32 = 0x09;

/// Decodes a stored pointer value into a ROM offset.
///
/// Returns `None` for the null pointer and for any value that does not point
/// into ROM.
///
/// ```
/// # use hexmeta::int::decode_pointer;
/// assert_eq!(decode_pointer(0x0800_0100), Some(0x100));
/// assert_eq!(decode_pointer(0x0900_0000), Some(0x0100_0000));
/// assert_eq!(decode_pointer(0), None);
/// assert_eq!(decode_pointer(0x0200_0000), None);
/// ```
#[inline]
pub fn decode_pointer(value: u32) -> Option<usize> {
  let bank = value >> 24;
  if bank < ROM_BASE >> 24 || bank > LAST_ROM_BANK {
    return None;
  }
  Some((value - ROM_BASE) as usize)
}

/// Encodes a ROM offset as a stored pointer value. `None` encodes as the null
/// pointer.
#[inline]
pub fn encode_pointer(destination: Option<usize>) -> u32 {
  match destination {
    Some(addr) => ROM_BASE.wrapping_add(addr as u32),
    None => 0,
  }
}

/// A little-endian integer of some `Width`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Int {
  value: u32,
  width: Width,
}

impl Int {
  /// Creates a new `Int` with the given bits and the given width inside it.
  ///
  /// This function will truncate any extraneous bits in `val`.
  #[inline]
  pub fn new(val: u32, width: Width) -> Self {
    Self {
      value: val & width.mask(),
      width,
    }
  }

  /// Tries to create a new `Int` with the smallest possible width.
  #[inline]
  pub fn best_fit(val: u32) -> Self {
    Self::new(val, Width::smallest_for(val))
  }

  /// Reads an `Int` of the given width out of `bytes`, which must be at least
  /// `width.len()` bytes long.
  pub fn read_le(bytes: &[u8], width: Width) -> Option<Self> {
    let bytes = bytes.get(..width.len())?;
    let value = bytes
      .iter()
      .rev()
      .fold(0u32, |acc, &b| (acc << 8) | b as u32);
    Some(Self { value, width })
  }

  /// Gets the width of this `Int`.
  #[inline]
  pub fn width(self) -> Width {
    self.width
  }

  /// Zero-extends the value in this `Int` to a `u32`.
  #[inline]
  pub fn to_u32(self) -> u32 {
    self.value
  }

  /// Returns an iterator over this `Int`'s bytes, in little-endian order.
  pub fn le_bytes(self) -> impl Iterator<Item = u8> {
    let bytes = self.value.to_le_bytes();
    (0..self.width.len()).map(move |i| bytes[i])
  }
}

macro_rules! impl_fmt_int {
  ($($trait:ident),*) => {
    $(impl fmt::$trait for Int {
      fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::$trait::fmt(&self.to_u32(), f)
      }
    })*
  }
}
impl_fmt_int!(Display, Binary, Octal, LowerHex, UpperHex);

/// An integer width: a one, two, three, or four-byte field.
///
/// This enum is ordered: smaller integer types compare smaller than bigger
/// integer types.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Width {
  /// A single byte.
  I8,
  /// A two-byte half-word.
  I16,
  /// A three-byte field.
  I24,
  /// A four-byte word.
  I32,
}

impl Width {
  /// Returns the width with the given byte length, if there is one.
  ///
  /// ```
  /// # use hexmeta::int::Width;
  /// assert_eq!(Width::from_len(2), Some(Width::I16));
  /// assert_eq!(Width::from_len(5), None);
  /// ```
  #[inline]
  pub fn from_len(len: usize) -> Option<Self> {
    match len {
      1 => Some(Self::I8),
      2 => Some(Self::I16),
      3 => Some(Self::I24),
      4 => Some(Self::I32),
      _ => None,
    }
  }

  /// Parses the punctuation used by table formats to describe a field width:
  /// `.` is one byte, `:` two, `:.` three, and `::` four.
  ///
  /// ```
  /// # use hexmeta::int::Width;
  /// assert_eq!(Width::from_marker(":."), Some(Width::I24));
  /// assert_eq!(Width::from_marker("..."), None);
  /// ```
  #[inline]
  pub fn from_marker(s: &str) -> Option<Self> {
    match s {
      "." => Some(Self::I8),
      ":" => Some(Self::I16),
      ":." => Some(Self::I24),
      "::" => Some(Self::I32),
      _ => None,
    }
  }

  /// Returns the table-format marker for this width; the inverse of
  /// `from_marker()`.
  #[inline]
  pub fn marker(self) -> &'static str {
    match self {
      Self::I8 => ".",
      Self::I16 => ":",
      Self::I24 => ":.",
      Self::I32 => "::",
    }
  }

  /// Returns the number of bytes a value of this width occupies.
  #[inline]
  pub fn len(self) -> usize {
    match self {
      Self::I8 => 1,
      Self::I16 => 2,
      Self::I24 => 3,
      Self::I32 => 4,
    }
  }

  /// Returns the number of bits a value of this width contains.
  #[inline]
  pub fn bits(self) -> u32 {
    self.len() as u32 * 8
  }

  /// Returns the mask for this type.
  ///
  /// A type's mask can be used to extract the bottom `bits()` bits from an
  /// integer.
  #[inline]
  pub fn mask(self) -> u32 {
    match self {
      Self::I8 => 0xff,
      Self::I16 => 0xffff,
      Self::I24 => 0xff_ffff,
      Self::I32 => 0xffff_ffff,
    }
  }

  /// Checks that the integer `val` can fit into this `Width` without losing
  /// any significant bits.
  ///
  /// ```
  /// # use hexmeta::int::Width;
  /// assert!(Width::I8.in_range(255));
  /// assert!(!Width::I8.in_range(256));
  /// assert!(Width::I32.in_range(u32::MAX));
  /// ```
  pub fn in_range(self, val: u32) -> bool {
    val & !self.mask() == 0
  }

  /// Returns the smallest `Width` that fits `val`.
  pub fn smallest_for(val: u32) -> Self {
    [Self::I8, Self::I16, Self::I24]
      .iter()
      .copied()
      .find(|i| i.in_range(val))
      .unwrap_or(Self::I32)
  }
}

impl Display for Width {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "i{}", self.bits())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn pointer_encoding() {
    assert_eq!(encode_pointer(Some(0x1234)), 0x0800_1234);
    assert_eq!(encode_pointer(None), 0);
    assert_eq!(decode_pointer(0x0800_1234), Some(0x1234));
    assert_eq!(decode_pointer(0x0a00_0000), None);
    assert_eq!(decode_pointer(0x07ff_ffff), None);
  }

  #[test]
  fn int_bytes() {
    let int = Int::read_le(&[0x34, 0x12, 0xff], Width::I16).unwrap();
    assert_eq!(int.to_u32(), 0x1234);
    assert_eq!(int.le_bytes().collect::<Vec<_>>(), vec![0x34, 0x12]);
    assert_eq!(Int::best_fit(0x1_0000).width(), Width::I24);
    assert_eq!(Int::new(0x1ff, Width::I8).to_u32(), 0xff);
    assert!(Int::read_le(&[0x00], Width::I16).is_none());
  }

  #[test]
  fn markers() {
    for width in [Width::I8, Width::I16, Width::I24, Width::I32].iter() {
      assert_eq!(Width::from_marker(width.marker()), Some(*width));
      assert_eq!(Width::from_len(width.len()), Some(*width));
    }
  }
}
