//! Types and functions for manipulating GBA ROM binaries.
//!
//! A GBA cartridge is mapped contiguously at `0x08000000`, so unlike other
//! consoles there is no bank mapping to speak of: a `Rom` is a flat, growable
//! byte buffer with little-endian accessors for the integers and pointers the
//! rest of the crate reads out of it.

use std::io;

use crate::int::decode_pointer;
use crate::int::Int;
use crate::int::Width;

/// A flat GBA ROM image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rom {
  bytes: Vec<u8>,
}

impl Rom {
  /// Creates a new `Rom` wrapping the given raw bytes.
  pub fn new(bytes: Vec<u8>) -> Self {
    Self { bytes }
  }

  /// Creates a new `Rom` of length `len` with the given value of `byte` in
  /// each slot.
  pub fn filled_with(byte: u8, len: usize) -> Self {
    Self {
      bytes: vec![byte; len],
    }
  }

  /// Returns the number of bytes in this ROM.
  #[inline]
  pub fn len(&self) -> usize {
    self.bytes.len()
  }

  /// Returns whether this ROM contains no bytes at all.
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }

  /// Returns the raw ROM bytes.
  #[inline]
  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }

  /// Gets the byte at `addr`, if it's in bounds.
  #[inline]
  pub fn get(&self, addr: usize) -> Option<u8> {
    self.bytes.get(addr).copied()
  }

  /// Reads a little-endian integer of the given width at `addr`.
  pub fn read(&self, addr: usize, width: Width) -> Option<u32> {
    let bytes = self.bytes.get(addr..)?;
    Int::read_le(bytes, width).map(Int::to_u32)
  }

  /// Reads the raw four-byte value at `addr`.
  pub fn read_word(&self, addr: usize) -> Option<u32> {
    self.read(addr, Width::I32)
  }

  /// Reads the pointer stored at `addr`, returning the ROM offset it points
  /// to.
  ///
  /// Returns `None` if the value at `addr` is not a pointer into ROM, or if
  /// `addr` is out of bounds.
  pub fn read_pointer(&self, addr: usize) -> Option<usize> {
    self.read_word(addr).and_then(decode_pointer)
  }

  /// Sets the byte at `addr`, returning the byte that was there before.
  ///
  /// Returns `None`, and does nothing, if `addr` is out of bounds.
  pub(crate) fn set(&mut self, addr: usize, byte: u8) -> Option<u8> {
    let slot = self.bytes.get_mut(addr)?;
    Some(std::mem::replace(slot, byte))
  }

  /// Resizes this ROM to `len` bytes. New space is filled with `0xff`, the
  /// value of erased flash.
  pub(crate) fn resize(&mut self, len: usize) {
    self.bytes.resize(len, 0xff);
  }

  /// Checks whether every byte in `start..end` is unused: that is, either
  /// `0xff` or `0x00`.
  pub fn is_free(&self, start: usize, end: usize) -> bool {
    match self.bytes.get(start..end) {
      Some(bytes) => bytes.iter().all(|&b| b == 0xff || b == 0x00),
      None => false,
    }
  }

  /// Dumps the (interesting) contents of this ROM to the given `Write`.
  ///
  /// Rows consisting entirely of erased flash are skipped.
  pub fn dump(&self, mut w: impl io::Write) -> io::Result<()> {
    let mut ascii_str = String::new();
    let iter = self
      .bytes
      .chunks(32)
      .enumerate()
      .filter(|(_, c)| c.iter().any(|&byte| byte != 0xff));
    for (addr, chunk) in iter {
      write!(w, "{:06x}:", addr * 32)?;

      ascii_str.clear();
      for &byte in chunk {
        write!(w, " {:02x}", byte)?;

        if 0x20 <= byte && byte <= 0x7e {
          ascii_str.push(byte as char);
        } else {
          ascii_str.push('.');
        }
      }
      writeln!(w, "  |{}|", ascii_str)?;
    }
    Ok(())
  }

  /// Consumes this `Rom`, returning the raw ROM bytes.
  pub fn into_bytes(self) -> Vec<u8> {
    self.bytes
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn reads() {
    let rom = Rom::new(vec![0x10, 0x00, 0x00, 0x08, 0xaa, 0xbb]);
    assert_eq!(rom.read_pointer(0), Some(0x10));
    assert_eq!(rom.read(4, Width::I16), Some(0xbbaa));
    assert_eq!(rom.read(5, Width::I16), None);
    assert_eq!(rom.read_pointer(2), None);
  }

  #[test]
  fn free_space() {
    let mut rom = Rom::filled_with(0xff, 8);
    assert!(rom.is_free(0, 8));
    assert!(!rom.is_free(0, 9));
    rom.set(3, 0x00);
    assert!(rom.is_free(0, 8));
    rom.set(3, 0x12);
    assert!(!rom.is_free(2, 4));
    assert!(rom.is_free(4, 8));
  }

  #[test]
  fn dump_skips_blank_rows() {
    let mut rom = Rom::filled_with(0xff, 64);
    rom.set(33, b'A');
    let mut out = Vec::new();
    rom.dump(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("000020: ff 41"));
    assert_eq!(text.lines().count(), 1);
  }
}
