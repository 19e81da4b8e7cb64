//! Persisted metadata.
//!
//! Everything a model knows that can't be recovered by looking at the data
//! alone: which addresses have names and formats, which pointers are waiting
//! for names that don't exist yet, which words follow table lengths, and any
//! named lists of options. Metadata is stored as JSON5.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;

/// The persisted metadata for a ROM.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Metadata {
  /// Every named anchor, in address order.
  #[serde(default)]
  pub anchors: Vec<StoredAnchor>,
  /// Pointers waiting for a name, as `[source, name]` pairs.
  #[serde(default)]
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  #[serde(with = "kv_pairs")]
  pub unmapped: BTreeMap<usize, String>,
  /// Words that follow a table's length, as `[address, table]` pairs.
  #[serde(default)]
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  #[serde(with = "kv_pairs")]
  pub matched_words: BTreeMap<usize, String>,
  /// Named lists of options, used by enum fields.
  #[serde(default)]
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub lists: BTreeMap<String, Vec<String>>,
}

/// A named anchor, along with the format of the run it names.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoredAnchor {
  /// The anchor's name.
  pub name: String,
  /// The anchor's address.
  pub address: usize,
  /// The anchor's format, which may be empty.
  #[serde(default)]
  #[serde(skip_serializing_if = "String::is_empty")]
  pub format: String,
}

impl StoredAnchor {
  /// Returns the anchor text that declares this anchor, such as `^items[a.]4`.
  pub fn text(&self) -> String {
    format!("^{}{}", self.name, self.format)
  }
}

impl Metadata {
  /// Parses metadata out of JSON5 text.
  pub fn from_json5(text: &str) -> Result<Self, Error> {
    Ok(json5::from_str(text)?)
  }

  /// Serializes this metadata as JSON5 text.
  pub fn to_json5(&self) -> Result<String, Error> {
    Ok(json5::to_string(self)?)
  }

  /// Returns whether there is no metadata at all.
  pub fn is_empty(&self) -> bool {
    self.anchors.is_empty()
      && self.unmapped.is_empty()
      && self.matched_words.is_empty()
      && self.lists.is_empty()
  }
}

/// Serde serializer/deserializer for (de)serializing a map as a sequence of
/// key-value pairs.
mod kv_pairs {
  use std::fmt;
  use std::marker::PhantomData;

  use serde::de;
  use serde::Deserialize;
  use serde::Deserializer;
  use serde::Serialize;
  use serde::Serializer;

  pub fn serialize<K, V, Map, S>(map: Map, ser: S) -> Result<S::Ok, S::Error>
  where
    K: Serialize,
    V: Serialize,
    Map: IntoIterator<Item = (K, V)>,
    S: Serializer,
  {
    ser.collect_seq(map)
  }

  pub fn deserialize<'de, K, V, Map, D>(de: D) -> Result<Map, D::Error>
  where
    K: Deserialize<'de>,
    V: Deserialize<'de>,
    Map: Default + Extend<(K, V)>,
    D: Deserializer<'de>,
  {
    struct PairVisitor<K, V, Map>(PhantomData<(K, V, Map)>);
    impl<'de, K, V, Map> de::Visitor<'de> for PairVisitor<K, V, Map>
    where
      K: Deserialize<'de>,
      V: Deserialize<'de>,
      Map: Default + Extend<(K, V)>,
    {
      type Value = Map;

      fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a sequence of address-name pairs")
      }

      fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
      where
        A: de::SeqAccess<'de>,
      {
        let mut map = Map::default();
        while let Some((k, v)) = seq.next_element()? {
          map.extend(Some((k, v)));
        }
        Ok(map)
      }
    }

    de.deserialize_seq(PairVisitor(PhantomData))
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use indoc::indoc;

  #[test]
  fn parse() {
    let meta = Metadata::from_json5(indoc! {r#"
      {
        // Items are the first table.
        anchors: [
          { name: "items", address: 256, format: "[name\"\"4 price:]8" },
          { name: "blob", address: 512 },
        ],
        unmapped: [[64, "later"]],
        matched_words: [[768, "items"]],
        lists: { types: ["Normal", "Fire"] },
      }
    "#})
    .unwrap();

    assert_eq!(meta.anchors.len(), 2);
    assert_eq!(meta.anchors[0].text(), "^items[name\"\"4 price:]8");
    assert_eq!(meta.anchors[1].format, "");
    assert_eq!(meta.unmapped.get(&64).map(String::as_str), Some("later"));
    assert_eq!(meta.matched_words.get(&768).map(String::as_str), Some("items"));
    assert_eq!(meta.lists["types"], vec!["Normal", "Fire"]);
  }

  #[test]
  fn round_trip() {
    let mut meta = Metadata::default();
    assert!(meta.is_empty());
    meta.anchors.push(StoredAnchor {
      name: "text".to_string(),
      address: 0x40,
      format: "\"\"".to_string(),
    });
    meta.unmapped.insert(0x80, "elsewhere".to_string());

    let text = meta.to_json5().unwrap();
    assert_eq!(Metadata::from_json5(&text).unwrap(), meta);
  }

  #[test]
  fn bad_metadata() {
    let err = Metadata::from_json5("{ anchors: 5 }").unwrap_err();
    assert!(matches!(err, Error::BadMetadata(_)));
  }
}
