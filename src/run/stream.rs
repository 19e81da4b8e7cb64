//! Streams: variable-length data whose size is found by reading it.

use crate::lz;
use crate::run::RunFormat;
use crate::run::SortedSpan;

/// Every level-up move list ends with this half-word.
const PLM_END: [u8; 2] = [0xff, 0xff];

/// Egg move lists mark each species with a value at or above this.
pub const EGG_SPECIES_MARKER: u16 = 20000;

/// A trainer's team count lives this far before the trainer's team pointer.
const TEAM_COUNT_OFFSET: usize = 4;
/// A trainer's team layout lives this far before the trainer's team pointer.
const TEAM_KIND_OFFSET: usize = 36;

/// The different kinds of stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamKind {
  /// A list of level-up moves: half-words packing a 9-bit move and a 7-bit
  /// level, ending in `FFFF`.
  LevelUpMoves,
  /// The egg move table: half-words ending in `FFFF`.
  EggMoves,
  /// A trainer's team, sized by the trainer that points to it.
  TrainerTeam,
  /// LZ77-compressed graphics.
  Lz {
    /// What the graphics are.
    kind: LzKind,
    /// Dimensions and other details, kept as written.
    args: String,
  },
}

/// The kinds of compressed graphics.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LzKind {
  /// A sprite, `lzs`.
  Sprite,
  /// A tileset, `lzt`.
  Tileset,
  /// A tilemap, `lzm`.
  Tilemap,
  /// A palette, `lzp`.
  Palette,
}

impl LzKind {
  fn prefix(self) -> &'static str {
    match self {
      Self::Sprite => "lzs",
      Self::Tileset => "lzt",
      Self::Tilemap => "lzm",
      Self::Palette => "lzp",
    }
  }
}

/// A stream run's contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stream {
  /// What the stream is.
  pub kind: StreamKind,
  /// How many bytes it occupies.
  pub len: usize,
}

impl StreamKind {
  /// Parses a stream keyword, such as `` `plm` ``.
  ///
  /// ```
  /// # use hexmeta::run::StreamKind;
  /// assert_eq!(StreamKind::parse("`plm`"), Some(StreamKind::LevelUpMoves));
  /// assert!(StreamKind::parse("`lzs4x8x8`").is_some());
  /// assert_eq!(StreamKind::parse("`xyz`"), None);
  /// ```
  pub fn parse(format: &str) -> Option<Self> {
    let keyword = format.strip_prefix('`')?.strip_suffix('`')?;
    let kind = match keyword {
      "plm" => Self::LevelUpMoves,
      "egg" => Self::EggMoves,
      "tpt" => Self::TrainerTeam,
      _ => {
        let kind = match keyword.get(..3)? {
          "lzs" => LzKind::Sprite,
          "lzt" => LzKind::Tileset,
          "lzm" => LzKind::Tilemap,
          "lzp" => LzKind::Palette,
          _ => return None,
        };
        Self::Lz {
          kind,
          args: keyword[3..].to_string(),
        }
      }
    };
    Some(kind)
  }

  fn keyword(&self) -> String {
    match self {
      Self::LevelUpMoves => "plm".to_string(),
      Self::EggMoves => "egg".to_string(),
      Self::TrainerTeam => "tpt".to_string(),
      Self::Lz { kind, args } => format!("{}{}", kind.prefix(), args),
    }
  }
}

impl Stream {
  /// Reads a stream of the given kind out of `data` at `start`.
  ///
  /// `sources` are the pointers to the stream; trainer teams need them to
  /// find their size. Returns `None` if the data doesn't hold a stream of this
  /// kind.
  pub fn read(
    kind: StreamKind,
    data: &[u8],
    start: usize,
    sources: &SortedSpan,
  ) -> Option<Self> {
    let len = match &kind {
      StreamKind::LevelUpMoves | StreamKind::EggMoves => {
        half_words_until_end(data, start)?
      }
      StreamKind::TrainerTeam => team_len(data, sources),
      StreamKind::Lz { .. } => lz::compressed_len(data, start)?,
    };
    if start + len > data.len() {
      return None;
    }
    Some(Self { kind, len })
  }
}

fn half_words_until_end(data: &[u8], start: usize) -> Option<usize> {
  let mut at = start;
  loop {
    if data.get(at..at + 2)? == PLM_END {
      return Some(at + 2 - start);
    }
    at += 2;
  }
}

/// A team is a list of eight-byte entries, or sixteen-byte entries when the
/// trainer gives their team custom moves.
fn team_len(data: &[u8], sources: &SortedSpan) -> usize {
  let source = sources.iter().find(|&s| s >= TEAM_KIND_OFFSET);
  let (count, kind) = match source {
    Some(s) => (
      data.get(s - TEAM_COUNT_OFFSET).copied().unwrap_or(1),
      data.get(s - TEAM_KIND_OFFSET).copied().unwrap_or(0),
    ),
    None => (1, 0),
  };
  let entry = if kind & 1 == 1 { 16 } else { 8 };
  count.max(1) as usize * entry
}

impl RunFormat for Stream {
  fn byte_len(&self) -> usize {
    self.len
  }

  fn format_string(&self) -> String {
    format!("`{}`", self.kind.keyword())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn move_lists() {
    let data = [0x21, 0x02, 0x2d, 0x04, 0xff, 0xff, 0x00];
    let stream = Stream::read(StreamKind::LevelUpMoves, &data, 0, &SortedSpan::new()).unwrap();
    assert_eq!(stream.len, 6);
    assert_eq!(stream.format_string(), "`plm`");
    assert!(Stream::read(StreamKind::EggMoves, &data[..4], 0, &SortedSpan::new()).is_none());
  }

  #[test]
  fn trainer_teams() {
    let mut data = vec![0u8; 64];
    // Trainer at 0: custom moves, three team members, team pointer at 36.
    data[0] = 1;
    data[32] = 3;
    let sources = vec![36].into_iter().collect::<SortedSpan>();
    let stream = Stream::read(StreamKind::TrainerTeam, &data, 40, &sources);
    assert!(stream.is_none());

    data.resize(64 + 48, 0);
    let stream = Stream::read(StreamKind::TrainerTeam, &data, 40, &sources).unwrap();
    assert_eq!(stream.len, 48);
  }

  #[test]
  fn lz_keywords() {
    let kind = StreamKind::parse("`lzm4x32x32|tiles`").unwrap();
    assert_eq!(
      kind,
      StreamKind::Lz {
        kind: LzKind::Tilemap,
        args: "4x32x32|tiles".to_string()
      }
    );
    let data = [0x10, 0x02, 0x00, 0x00, 0x00, 0xaa, 0xbb];
    let stream = Stream::read(kind, &data, 0, &SortedSpan::new()).unwrap();
    assert_eq!(stream.format_string(), "`lzm4x32x32|tiles`");
    assert_eq!(stream.len, 7);
  }
}
