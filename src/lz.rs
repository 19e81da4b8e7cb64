//! LZ77 compressed data, as decoded by the GBA BIOS.
//!
//! hexmeta never decompresses anything; it only needs to know how many bytes
//! a compressed stream occupies so that the stream can be tracked as a run.
//!
//! A stream starts with a four-byte header: the byte `0x10` followed by the
//! 24-bit decompressed length. Then come groups of eight tokens, each preceded
//! by a flag byte whose bits (most significant first) say whether the token is
//! a literal byte or a two-byte back-reference.

/// The first byte of every LZ77 stream.
pub const HEADER: u8 = 0x10;

/// Returns the decompressed length declared by the stream at `start`.
pub fn decompressed_len(data: &[u8], start: usize) -> Option<usize> {
  let header = data.get(start..start + 4)?;
  if header[0] != HEADER {
    return None;
  }
  Some(header[1] as usize | (header[2] as usize) << 8 | (header[3] as usize) << 16)
}

/// Walks the stream at `start`, returning the number of compressed bytes it
/// occupies.
///
/// Returns `None` if the data is not a valid stream: a bad header, an empty
/// payload, a back-reference to before the start of the output, or running off
/// the end of `data`.
///
/// ```
/// # use hexmeta::lz::compressed_len;
/// // Four literal bytes.
/// let data = [0x10, 0x04, 0x00, 0x00, 0x00, 1, 2, 3, 4];
/// assert_eq!(compressed_len(&data, 0), Some(9));
/// ```
pub fn compressed_len(data: &[u8], start: usize) -> Option<usize> {
  let total = decompressed_len(data, start)?;
  if total == 0 {
    return None;
  }

  let mut cursor = start + 4;
  let mut written = 0;
  while written < total {
    let flags = *data.get(cursor)?;
    cursor += 1;
    for bit in (0..8).rev() {
      if written >= total {
        break;
      }
      if flags & (1 << bit) == 0 {
        data.get(cursor)?;
        cursor += 1;
        written += 1;
        continue;
      }

      let hi = *data.get(cursor)? as usize;
      let lo = *data.get(cursor + 1)? as usize;
      cursor += 2;
      let len = (hi >> 4) + 3;
      let disp = ((hi & 0xf) << 8 | lo) + 1;
      if disp > written {
        return None;
      }
      written += len;
    }
  }

  Some(cursor - start)
}
