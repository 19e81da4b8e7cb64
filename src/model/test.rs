//! Behaviour tests for whole models.

use indoc::indoc;

use crate::delta::Delta;
use crate::error::Error;
use crate::error::Violation;
use crate::error::Warning;
use crate::int::encode_pointer;
use crate::int::Width;
use crate::meta::Metadata;
use crate::pcs;
use crate::run::Run;
use crate::run::RunKind;

use super::Model;
use super::Options;

macro_rules! assert_consistent {
  ($model:expr) => {
    if let Err(errors) = $model.verify_invariants() {
      let mut out = Vec::new();
      errors.dump_to(&mut out).unwrap();
      panic!("{}", String::from_utf8_lossy(&out));
    }
  };
}

const ITEMS: &str = "^items[name\"\"4 text<\"\">]2";

fn blank(len: usize) -> Vec<u8> {
  vec![0xff; len]
}

fn put(data: &mut [u8], addr: usize, bytes: &[u8]) {
  data[addr..addr + bytes.len()].copy_from_slice(bytes);
}

fn pointer(dest: usize) -> [u8; 4] {
  encode_pointer(Some(dest)).to_le_bytes()
}

fn field(text: &str, len: usize) -> Vec<u8> {
  let mut bytes = pcs::encode(text);
  bytes.resize(len, 0);
  bytes
}

/// A model that knows nothing about `data`.
fn empty(data: Vec<u8>) -> Model {
  Model::with_options(data, Some(&Metadata::default()), Options::default())
}

/// Two items, each with a name and a pointer to some text.
fn items() -> Model {
  let mut data = blank(0x400);
  put(&mut data, 0x00, &field("AB", 4));
  put(&mut data, 0x04, &pointer(0x80));
  put(&mut data, 0x08, &field("CD", 4));
  put(&mut data, 0x0c, &pointer(0x90));
  put(&mut data, 0x80, &pcs::encode("Hello"));
  put(&mut data, 0x90, &pcs::encode("World"));

  let mut model = empty(data);
  let mut delta = Delta::new();
  assert_eq!(model.write_anchor(&mut delta, 0, ITEMS).unwrap(), None);
  model
}

#[test]
fn terminated_table() {
  let mut data = blank(0x400);
  put(&mut data, 0, &[0x00, 0x01, 0x02, 0x03, 0xff]);
  let mut model = empty(data);
  let mut delta = Delta::new();

  model.write_anchor(&mut delta, 0, "^values[value.]!FF").unwrap();
  let run = model.runs().get(0).unwrap();
  assert_eq!(run.as_table().unwrap().count, 4);
  assert_eq!(run.len(), 5);
  assert_consistent!(model);

  assert_eq!(model.set_table_count(&mut delta, 0, 2).unwrap(), 0);
  assert_eq!(&model.rom().bytes()[..5], &[0x00, 0x01, 0xff, 0xff, 0xff]);
  assert_eq!(model.runs().get(0).unwrap().len(), 3);

  assert_eq!(model.set_table_count(&mut delta, 0, 6).unwrap(), 0);
  assert_eq!(
    &model.rom().bytes()[..8],
    &[0x00, 0x01, 0x01, 0x01, 0x01, 0x01, 0xff, 0xff]
  );
  assert_eq!(model.runs().get(0).unwrap().as_table().unwrap().count, 6);
  assert_consistent!(model);

  model.write_value(&mut delta, 3, Width::I8, 0xff).unwrap();
  model.write_anchor(&mut delta, 0, "^values[value.]!FF").unwrap();
  assert_eq!(model.runs().get(0).unwrap().as_table().unwrap().count, 3);
  assert_consistent!(model);
}

#[test]
fn unnamed_anchors() {
  let mut model = empty(blank(0x100));

  let mut delta = Delta::new();
  assert!(matches!(
    model.write_anchor(&mut delta, 0x10, ""),
    Err(Error::UnnamedAnchor)
  ));
  assert!(matches!(
    model.write_anchor(&mut delta, 0x10, "^\"\""),
    Err(Error::UnnamedAnchor)
  ));
  assert!(matches!(
    model.write_anchor(&mut delta, 0x10, "^null"),
    Err(Error::ReservedName)
  ));
  assert!(delta.is_empty());

  assert_eq!(model.write_anchor(&mut delta, 0x10, "^bob").unwrap(), None);
  assert_eq!(model.anchor_name_at(0x10), Some("bob"));
  assert_eq!(model.address_for_anchor("BOB"), Some(0x10));
  assert!(!delta.is_empty());
  assert_consistent!(model);
}

#[test]
fn dependent_length() {
  let mut data = blank(0x400);
  put(&mut data, 0x00, &[1, 2, 3]);
  put(&mut data, 0x10, &[10, 11, 20, 21, 30, 31]);
  let mut model = empty(data);
  let mut delta = Delta::new();

  model.write_anchor(&mut delta, 0x00, "^t2[v.]3").unwrap();
  model.write_anchor(&mut delta, 0x16, "^blocker").unwrap();
  model.write_anchor(&mut delta, 0x10, "^t1[a. b.]t2").unwrap();
  assert_eq!(model.runs().get(0x10).unwrap().as_table().unwrap().count, 3);
  assert_consistent!(model);

  let before = model.clone();
  let mut append = Delta::new();
  assert_eq!(model.append_elements(&mut append, 0, 1).unwrap(), 0);
  assert_eq!(model.runs().get(0).unwrap().as_table().unwrap().count, 4);
  assert_eq!(model.rom().bytes()[3], 3);

  // t1 can't grow past `blocker`, so it moves.
  assert_eq!(model.address_for_anchor("t1"), Some(0x100));
  let t1 = model.runs().get(0x100).unwrap();
  assert_eq!(t1.as_table().unwrap().count, 4);
  assert_eq!(
    &model.rom().bytes()[0x100..0x108],
    &[10, 11, 20, 21, 30, 31, 30, 31]
  );
  assert!(model.rom().bytes()[0x10..0x16].iter().all(|&b| b == 0xff));
  assert_consistent!(model);

  model.revert(&append);
  assert_eq!(model.rom().bytes(), before.rom().bytes());
  assert_eq!(model.address_for_anchor("t1"), Some(0x10));
  assert_eq!(model.runs().get(0x10), before.runs().get(0x10));
  assert!(model.runs().get(0x100).is_none());
  assert_consistent!(model);

  model.reapply(&append);
  assert_eq!(model.address_for_anchor("t1"), Some(0x100));
  assert_eq!(model.runs().get(0x100).unwrap().as_table().unwrap().count, 4);
  assert_consistent!(model);
}

#[test]
fn name_collisions() {
  let mut model = empty(blank(0x100));
  let mut delta = Delta::new();

  assert_eq!(model.write_anchor(&mut delta, 0x10, "^foo").unwrap(), None);
  assert_eq!(
    model.write_anchor(&mut delta, 0x20, "^foo").unwrap(),
    Some(Warning::NameCollision {
      requested: "foo".to_string(),
      assigned: "foo_copy".to_string(),
    })
  );
  assert_eq!(
    model.write_anchor(&mut delta, 0x30, "^foo").unwrap(),
    Some(Warning::NameCollision {
      requested: "foo".to_string(),
      assigned: "foo_copy2".to_string(),
    })
  );
  assert_eq!(model.anchor_name_at(0x30), Some("foo_copy2"));
  assert_consistent!(model);
}

#[test]
fn forward_references() {
  let mut data = blank(0x100);
  put(&mut data, 0x80, &pcs::encode("Hi"));
  let mut model = empty(data);
  let mut delta = Delta::new();

  model.write_pointer_to(&mut delta, 0x20, "later").unwrap();
  assert_eq!(model.rom().read_word(0x20), Some(0));
  assert_eq!(model.anchors().unmapped_name(0x20), Some("later"));
  assert_eq!(model.resolve_address(Some(0x20), None), "later");
  assert_consistent!(model);

  model.write_anchor(&mut delta, 0x80, "^later\"\"").unwrap();
  assert_eq!(model.rom().read_pointer(0x20), Some(0x80));
  assert_eq!(model.anchors().unmapped_name(0x20), None);
  let run = model.runs().get(0x80).unwrap();
  assert_eq!(run.kind, RunKind::Pcs { len: 3 });
  assert!(run.sources.contains(0x20));
  assert_consistent!(model);
}

#[test]
fn pointers_in_tables() {
  let model = items();
  let hello = model.runs().get(0x80).unwrap();
  assert_eq!(hello.kind, RunKind::Pcs { len: 6 });
  assert_eq!(hello.sources.iter().collect::<Vec<_>>(), vec![0x04]);
  assert!(model.runs().get(0x90).unwrap().sources.contains(0x0c));

  assert_eq!(model.element_names("items"), vec!["AB", "CD"]);
  assert_eq!(model.address_for_anchor("items/cd"), Some(0x08));
  assert_eq!(model.address_for_anchor("items/1"), Some(0x08));
  assert_eq!(model.address_for_anchor("items/2"), None);
  assert_eq!(model.resolve_address(None, Some(0x08)), "items/1");
  assert_eq!(model.complete_anchor_name("IT"), vec!["items"]);
  assert_eq!(model.complete_anchor_name("items/c"), vec!["items/CD"]);
  assert_consistent!(model);
}

#[test]
fn rewriting_an_anchor_changes_nothing() {
  let mut model = items();
  let mut delta = Delta::new();
  assert_eq!(model.write_anchor(&mut delta, 0, ITEMS).unwrap(), None);
  assert!(delta.is_empty());
}

#[test]
fn retargeting_table_pointers() {
  let mut model = items();
  let mut delta = Delta::new();

  model.update_table_pointer(&mut delta, 0x04, Some(0x90)).unwrap();
  assert!(model.runs().get(0x80).is_none());
  let world = model.runs().get(0x90).unwrap();
  assert_eq!(world.sources.iter().collect::<Vec<_>>(), vec![0x04, 0x0c]);
  assert_consistent!(model);

  assert!(matches!(
    model.update_table_pointer(&mut delta, 0x40, Some(0x90)),
    Err(Error::NotATable(0x40))
  ));
  assert!(matches!(
    model.write_pointer(&mut delta, 0x02, Some(0x90)),
    Err(Error::Conflict { .. })
  ));
  assert!(matches!(
    model.write_value(&mut delta, 0x05, Width::I16, 0),
    Err(Error::Conflict { .. })
  ));
  assert_consistent!(model);
}

#[test]
fn copy_then_paste() {
  let mut model = items();
  let mut delta = Delta::new();
  model.write_pointer(&mut delta, 0x40, Some(0x90)).unwrap();

  let text = model.copy_region(&mut delta, 0, 0x10).unwrap();
  assert_eq!(text, "^items[name\"\"4 text<\"\">]2 \"AB\" <000080>, \"CD\" <000090>,");

  let text = model.copy_region(&mut delta, 0, 0xa0).unwrap();
  assert!(text.contains("^misc.Hello000080\"\" \"Hello\""));
  assert!(text.contains("^misc.World000090\"\" \"World\""));
  assert_eq!(model.anchor_name_at(0x80), Some("misc.Hello000080"));
  assert_consistent!(model);

  let bytes = model.rom().bytes().to_vec();
  let runs = model.runs().iter().cloned().collect::<Vec<_>>();
  let names = model
    .anchors()
    .names()
    .map(|(&a, n)| (a, n.clone()))
    .collect::<Vec<_>>();

  model.clear_format_and_data(&mut delta, 0, 0xa0).unwrap();
  assert!(model.runs().is_empty());
  assert!(model.rom().bytes()[..0xa0].iter().all(|&b| b == 0xff));
  assert_consistent!(model);

  let warnings = model.paste(&mut delta, 0, &text).unwrap();
  assert!(warnings.is_empty());
  assert_eq!(model.rom().bytes(), &bytes[..]);
  assert_eq!(model.runs().iter().cloned().collect::<Vec<_>>(), runs);
  assert_eq!(
    model
      .anchors()
      .names()
      .map(|(&a, n)| (a, n.clone()))
      .collect::<Vec<_>>(),
    names
  );
  assert_consistent!(model);
}

#[test]
fn paste_grows_terminated_table() {
  let mut data = blank(0x100);
  put(&mut data, 0, &[0x00, 0x01, 0x02, 0x03, 0xff]);
  let mut model = empty(data);
  let mut delta = Delta::new();
  model.write_anchor(&mut delta, 0, "^values[value.]!FF").unwrap();

  let text = model.copy_region(&mut delta, 0, 5).unwrap();
  assert_eq!(text, "^values[value.]!FF 0, 1, 2, 3,");
  model.clear_format_and_data(&mut delta, 0, 5).unwrap();
  assert!(model.runs().is_empty());

  assert!(model.paste(&mut delta, 0, &text).unwrap().is_empty());
  assert_eq!(&model.rom().bytes()[..6], &[0x00, 0x01, 0x02, 0x03, 0xff, 0xff]);
  assert_eq!(model.runs().get(0).unwrap().as_table().unwrap().count, 4);
  assert_consistent!(model);

  // Fewer elements than the table holds leave the rest alone.
  model.paste(&mut delta, 0, "7, 8,").unwrap();
  assert_eq!(&model.rom().bytes()[..5], &[0x07, 0x08, 0x02, 0x03, 0xff]);
  assert_eq!(model.runs().get(0).unwrap().as_table().unwrap().count, 4);

  // Bytes that aren't an element land past the terminator.
  let mut paste = Delta::new();
  model.paste(&mut paste, 0, "0, 1, 2, 3, 4, 05 06").unwrap();
  assert_eq!(
    &model.rom().bytes()[..8],
    &[0x00, 0x01, 0x02, 0x03, 0x04, 0xff, 0x05, 0x06]
  );
  assert_eq!(model.runs().get(0).unwrap().as_table().unwrap().count, 5);
  assert_consistent!(model);

  model.revert(&paste);
  assert_eq!(&model.rom().bytes()[..8], &[0x07, 0x08, 0x02, 0x03, 0xff, 0xff, 0xff, 0xff]);
  assert_eq!(model.runs().get(0).unwrap().as_table().unwrap().count, 4);
  assert_consistent!(model);
}

#[test]
fn paste_into_full_terminated_table() {
  let mut data = blank(0x100);
  put(&mut data, 0, &[0x01, 0xff]);
  let mut model = empty(data);
  let mut delta = Delta::new();
  model.write_anchor(&mut delta, 0, "^values[value.]!FF").unwrap();
  model.write_anchor(&mut delta, 2, "^next").unwrap();

  let mut paste = Delta::new();
  assert!(matches!(
    model.paste(&mut paste, 0, "1, 2,"),
    Err(Error::Conflict { .. })
  ));
  assert!(paste.is_empty());
  assert_eq!(model.runs().get(0).unwrap().as_table().unwrap().count, 1);
  assert_consistent!(model);
}

#[test]
fn empty_table_then_pointer() {
  let mut model = empty(blank(0x100));
  let mut delta = Delta::new();
  model.write_anchor(&mut delta, 0x10, "^empty[v.]0").unwrap();
  assert!(model.runs().get(0x10).unwrap().is_empty());

  model.write_pointer(&mut delta, 0x10, None).unwrap();
  assert_eq!(model.runs().get(0x10).unwrap().as_table().unwrap().count, 0);
  assert!(model.runs().get_sized(0x10).unwrap().is_pointer());
  assert!(model.runs().lookup(0x12).is_pointer());
  assert_eq!(model.anchor_name_at(0x10), Some("empty"));
  assert_eq!(model.rom().read_word(0x10), Some(0));
  assert_consistent!(model);

  model.write_pointer_to(&mut delta, 0x40, "empty").unwrap();
  assert!(model.runs().get(0x10).unwrap().sources.contains(0x40));
  assert_consistent!(model);

  let text = model.copy_region(&mut delta, 0x10, 4).unwrap();
  assert!(text.starts_with("^empty[v.]0 "));
  assert!(text.ends_with("<null>"));

  let mut clear = Delta::new();
  model.clear_format(&mut clear, 0x10, 4).unwrap();
  assert!(model.runs().get(0x10).is_none());
  assert_eq!(model.anchor_name_at(0x10), None);
  assert_eq!(model.anchors().unmapped_name(0x40), Some("empty"));
  assert_consistent!(model);

  model.revert(&clear);
  assert!(model.runs().get(0x10).unwrap().is_empty());
  assert!(model.runs().get_sized(0x10).unwrap().is_pointer());
  assert_eq!(model.anchor_name_at(0x10), Some("empty"));
  assert_eq!(model.rom().read_pointer(0x40), Some(0x10));
  assert_consistent!(model);
}

#[test]
fn bit_array_width() {
  let mut data = blank(0x400);
  put(&mut data, 0x00, &[1, 2, 3, 4, 5, 6, 7, 8]);
  put(&mut data, 0x10, &[0xaa, 1, 0xbb, 2]);
  let mut model = empty(data);
  let mut delta = Delta::new();
  model.write_anchor(&mut delta, 0x00, "^t2[v.]8").unwrap();
  model.write_anchor(&mut delta, 0x10, "^flags[f|b[]t2 x.]2").unwrap();
  assert_eq!(model.runs().get(0x10).unwrap().as_table().unwrap().stride(), 2);
  assert_consistent!(model);

  let before = model.clone();
  let mut append = Delta::new();
  assert_eq!(model.append_elements(&mut append, 0, 1).unwrap(), 0);
  assert_eq!(model.rom().bytes()[8], 8);
  let flags = model.runs().get(0x10).unwrap().as_table().unwrap();
  assert_eq!((flags.stride(), flags.count), (3, 2));
  assert_eq!(
    &model.rom().bytes()[0x10..0x16],
    &[0xaa, 0x00, 0x01, 0xbb, 0x00, 0x02]
  );
  assert_consistent!(model);

  model.revert(&append);
  assert_eq!(model.rom().bytes(), before.rom().bytes());
  assert_eq!(model.runs().get(0x10), before.runs().get(0x10));
  assert_consistent!(model);

  model.reapply(&append);
  assert_eq!(model.runs().get(0x10).unwrap().as_table().unwrap().stride(), 3);
  assert_consistent!(model);
}

#[test]
fn bit_array_width_moves_table() {
  let mut data = blank(0x400);
  put(&mut data, 0x00, &[1, 2, 3, 4, 5, 6, 7, 8]);
  put(&mut data, 0x10, &[0xaa, 1, 0xbb, 2]);
  let mut model = empty(data);
  let mut delta = Delta::new();
  model.write_anchor(&mut delta, 0x00, "^t2[v.]8").unwrap();
  model.write_anchor(&mut delta, 0x14, "^blocker").unwrap();
  model.write_anchor(&mut delta, 0x10, "^flags[f|b[]t2 x.]2").unwrap();
  assert_consistent!(model);

  let before = model.clone();
  let mut append = Delta::new();
  model.append_elements(&mut append, 0, 1).unwrap();

  // flags can't widen past `blocker`, so it moves.
  assert_eq!(model.address_for_anchor("flags"), Some(0x100));
  let flags = model.runs().get(0x100).unwrap().as_table().unwrap();
  assert_eq!((flags.stride(), flags.count), (3, 2));
  assert_eq!(
    &model.rom().bytes()[0x100..0x106],
    &[0xaa, 0x00, 0x01, 0xbb, 0x00, 0x02]
  );
  assert!(model.rom().bytes()[0x10..0x14].iter().all(|&b| b == 0xff));
  assert_eq!(model.address_for_anchor("blocker"), Some(0x14));
  assert_consistent!(model);

  model.revert(&append);
  assert_eq!(model.rom().bytes(), before.rom().bytes());
  assert_eq!(model.address_for_anchor("flags"), Some(0x10));
  assert!(model.runs().get(0x100).is_none());
  assert_consistent!(model);

  model.reapply(&append);
  assert_eq!(model.address_for_anchor("flags"), Some(0x100));
  assert_consistent!(model);
}

/// Asserts that `model` fails verification with `expected` among the
/// reported violations.
fn assert_violation(model: &Model, expected: Violation) {
  let errors = model.verify_invariants().unwrap_err();
  assert!(
    errors.iter().any(|v| *v == expected),
    "expected {:?}, got {:?}",
    expected,
    errors.iter().collect::<Vec<_>>()
  );
}

#[test]
fn corruption_is_reported() {
  let mut model = items();
  model.rom.set(0x04, 0x81);
  assert_violation(&model, Violation::SourceMismatch { run: 0x80, source: 0x04 });
  assert_violation(
    &model,
    Violation::MissingSource {
      source: 0x04,
      destination: 0x81,
    },
  );

  let mut model = items();
  let text = model.runs.get(0x90).cloned().unwrap().remove_source(0x0c);
  model.runs.insert(text).unwrap();
  assert_violation(
    &model,
    Violation::MissingSource {
      source: 0x0c,
      destination: 0x90,
    },
  );

  let mut model = items();
  model.runs.insert_unchecked(Run::pointer(0x82));
  assert_violation(&model, Violation::Overlap { first: 0x80, second: 0x82 });

  let mut model = items();
  let mut table = model.runs.get(0).cloned().unwrap();
  if let RunKind::Table(t) = &mut table.kind {
    t.add_inner_source(1, 0x200);
  }
  model.runs.insert(table).unwrap();
  assert_violation(
    &model,
    Violation::InnerSourceMismatch {
      table: 0,
      index: 1,
      source: 0x200,
    },
  );

  let mut model = items();
  model.anchors.define(0x200, "ghost").unwrap();
  assert_violation(
    &model,
    Violation::NameMismatch {
      name: "ghost".to_string(),
      addr: 0x200,
    },
  );

  let mut model = items();
  model.anchors.add_matched_word(0x200, "items");
  assert_violation(
    &model,
    Violation::WordMismatch {
      addr: 0x200,
      table: "items".to_string(),
    },
  );

  // None of the corruption above is in a clean model.
  assert_consistent!(items());
}

#[test]
fn paste_bad_token() {
  let mut model = empty(blank(0x100));
  let mut delta = Delta::new();
  assert!(matches!(
    model.paste(&mut delta, 0x10, "01 02 what"),
    Err(Error::BadFormat { .. })
  ));
  assert!(delta.is_empty());
  assert_eq!(model.rom().bytes()[0x10], 0xff);
}

#[test]
fn clearing_named_runs() {
  let mut data = blank(0x100);
  put(&mut data, 0x80, &pcs::encode("Hi"));
  let mut model = empty(data);
  let mut delta = Delta::new();
  model.write_anchor(&mut delta, 0x80, "^greeting\"\"").unwrap();
  model.write_pointer_to(&mut delta, 0x40, "greeting").unwrap();
  assert_eq!(model.rom().read_pointer(0x40), Some(0x80));

  model.clear_format(&mut delta, 0x80, 1).unwrap();
  assert!(model.runs().get(0x80).is_none());
  assert_eq!(model.rom().read_pointer(0x40), None);
  assert_eq!(model.anchors().unmapped_name(0x40), Some("greeting"));
  assert!(model.runs().get(0x40).unwrap().is_pointer());
  assert_consistent!(model);

  model.write_anchor(&mut delta, 0x80, "^greeting\"\"").unwrap();
  assert_eq!(model.rom().read_pointer(0x40), Some(0x80));
  assert_consistent!(model);
}

#[test]
fn clearing_unnamed_runs() {
  let mut data = blank(0x100);
  put(&mut data, 0x90, &pcs::encode("Hi"));
  let mut model = empty(data);
  let mut delta = Delta::new();
  model.write_pointer(&mut delta, 0x40, Some(0x90)).unwrap();
  model.write_anchor(&mut delta, 0x90, "^\"\"").unwrap();
  assert_eq!(model.runs().get(0x90).unwrap().kind, RunKind::Pcs { len: 3 });

  // At the start of the range, a run with pointers to it stays behind.
  model.clear_format(&mut delta, 0x90, 1).unwrap();
  let run = model.runs().get(0x90).unwrap();
  assert!(run.is_no_info());
  assert!(run.sources.contains(0x40));
  assert_consistent!(model);

  // Further in, it goes, along with its pointers.
  model.clear_format(&mut delta, 0x88, 0x10).unwrap();
  assert!(model.runs().is_empty());
  assert_eq!(model.rom().read_pointer(0x40), Some(0x90));
  assert_consistent!(model);
}

#[test]
fn pointers_to_elements() {
  let mut data = blank(0x100);
  for (i, name) in ["AB", "CD", "EF"].iter().enumerate() {
    put(&mut data, i * 5, &field(name, 4));
    data[i * 5 + 4] = i as u8;
  }
  let mut model = empty(data);
  let mut delta = Delta::new();
  model.write_anchor(&mut delta, 0, "^kinds[name\"\"4 v.]3").unwrap();

  model.write_pointer_to(&mut delta, 0x40, "kinds/2").unwrap();
  model.write_pointer_to(&mut delta, 0x44, "kinds/CD").unwrap();
  assert_eq!(model.rom().read_pointer(0x40), Some(10));
  assert_eq!(model.rom().read_pointer(0x44), Some(5));
  assert_eq!(model.resolve_address(Some(0x40), Some(10)), "kinds/2");
  let table = model.runs().get(0).unwrap().as_table().unwrap();
  assert!(table.inner_sources[&2].contains(0x40));
  assert_consistent!(model);

  model.clear_format(&mut delta, 0, 1).unwrap();
  assert_eq!(model.rom().read_pointer(0x40), None);
  assert_eq!(model.anchors().unmapped_name(0x40), Some("kinds/2"));
  assert_consistent!(model);

  model.write_anchor(&mut delta, 0, "^kinds[name\"\"4 v.]3").unwrap();
  assert_eq!(model.rom().read_pointer(0x40), Some(10));
  assert_eq!(model.rom().read_pointer(0x44), Some(5));
  assert_consistent!(model);
}

#[test]
fn nested_formats() {
  let mut data = blank(0x100);
  put(&mut data, 0x00, &pointer(0x80));
  put(&mut data, 0x80, &[1, 2, 3, 4]);
  let mut model = empty(data);
  let mut delta = Delta::new();

  model.write_anchor(&mut delta, 0, "^list[p<[m. n.]2>]1").unwrap();
  let inner = model.runs().get(0x80).unwrap();
  assert_eq!(inner.format_string(), "[m. n.]2");
  assert_eq!(inner.as_table().unwrap().count, 2);
  assert!(inner.sources.contains(0));
  assert_consistent!(model);
}

#[test]
fn cyclic_lengths() {
  let mut model = empty(blank(0x100));
  let mut delta = Delta::new();
  model.write_anchor(&mut delta, 0x10, "^a[x.]b+1").unwrap();
  assert_eq!(model.runs().get(0x10).unwrap().as_table().unwrap().count, 1);

  let mut cycle = Delta::new();
  let err = model.write_anchor(&mut cycle, 0x20, "^b[x.]a").unwrap_err();
  assert!(matches!(err, Error::CyclicDependency { .. }));
  assert!(cycle.is_empty());
  assert_eq!(model.address_for_anchor("b"), None);
  assert_eq!(model.runs().get(0x10).unwrap().as_table().unwrap().count, 1);
  assert_consistent!(model);
}

#[test]
fn bootstrap() {
  let mut data = blank(0x200);
  put(&mut data, 0x10, &pointer(0x80));
  put(&mut data, 0x14, &pointer(0x80));
  put(&mut data, 0x20, &pointer(0x100));
  put(&mut data, 0x24, &pointer(0x180));
  put(&mut data, 0x28, &pointer(0x81));
  put(&mut data, 0x2c, &pointer(0x10000));
  put(&mut data, 0x80, &pcs::encode("Hello"));
  put(&mut data, 0x100, &[1, 2, 3, 4]);
  let model = Model::new(data);

  assert!(model.runs().get(0x10).unwrap().is_pointer());
  assert!(model.runs().get(0x14).unwrap().is_pointer());
  let hello = model.runs().get(0x80).unwrap();
  assert_eq!(hello.kind, RunKind::Pcs { len: 6 });
  assert_eq!(hello.sources.iter().collect::<Vec<_>>(), vec![0x10, 0x14]);
  let other = model.runs().get(0x100).unwrap();
  assert!(other.is_no_info());
  assert!(other.sources.contains(0x20));

  for addr in &[0x24, 0x28, 0x2c, 0x180] {
    assert!(model.runs().get(*addr).is_none());
  }
  assert!(model.anchors().names().next().is_none());
  assert_consistent!(model);
}

#[test]
fn searching() {
  let mut data = blank(0x100);
  put(&mut data, 0x10, &pointer(0x80));
  put(&mut data, 0x31, &pointer(0x80));
  put(&mut data, 0x80, &pcs::encode("Hello"));
  let mut model = empty(data);

  assert_eq!(model.find_pointers_to(&[0x80]), vec![(0x10, 0x80), (0x31, 0x80)]);
  assert!(model.find_pointers_to(&[0x90]).is_empty());

  let mut delta = Delta::new();
  assert_eq!(model.consider_results_as_text_runs(&mut delta, &[0x80, 0x90]), 1);
  let hello = model.runs().get(0x80).unwrap();
  assert_eq!(hello.kind, RunKind::Pcs { len: 6 });
  assert_eq!(hello.sources.iter().collect::<Vec<_>>(), vec![0x10, 0x31]);
  assert!(model.runs().get(0x31).unwrap().is_pointer());
  assert_consistent!(model);
}

#[test]
fn free_space() {
  let mut data = blank(0x400);
  put(&mut data, 0x120, &[0]);
  let mut model = empty(data);
  let mut delta = Delta::new();
  model.write_anchor(&mut delta, 0x300, "^stuff").unwrap();

  // Past the stray byte, but not over `stuff`.
  assert_eq!(model.find_free_space(0x100, 0x10), Some(0x134));
  assert_eq!(model.find_free_space(0x140, 0x100), None);
}

#[test]
fn metadata() {
  let meta = Metadata::from_json5(indoc! {r#"
    {
      anchors: [
        { name: "kinds", address: 0, format: "[name\"\"4 v.]3" },
      ],
      unmapped: [[64, "later"]],
      matched_words: [[32, "kinds"]],
      lists: { colors: ["red", "blue"] },
    }
  "#})
  .unwrap();

  let mut data = blank(0x100);
  for (i, name) in ["AB", "CD", "EF"].iter().enumerate() {
    put(&mut data, i * 5, &field(name, 4));
    data[i * 5 + 4] = i as u8;
  }
  let mut model = Model::load(data, &meta);
  assert_eq!(model.rom().read_word(0x20), Some(3));
  assert!(model.runs().get(0x40).unwrap().is_pointer());
  assert_eq!(model.options("colors"), vec!["red", "blue"]);
  assert_eq!(model.options("kinds"), vec!["AB", "CD", "EF"]);
  assert_eq!(model.export_metadata(), meta);
  assert_consistent!(model);

  let mut delta = Delta::new();
  model.set_table_count(&mut delta, 0, 4).unwrap();
  assert_eq!(model.rom().read_word(0x20), Some(4));
  assert_consistent!(model);

  let mut delta = Delta::new();
  model.write_anchor(&mut delta, 0x60, "^later").unwrap();
  assert_eq!(model.rom().read_pointer(0x40), Some(0x60));
  assert_consistent!(model);
}

#[test]
fn bad_metadata_is_skipped() {
  let meta = Metadata::from_json5(indoc! {r#"
    {
      anchors: [
        { name: "text", address: 16, format: "\"\"" },
        { name: "fine", address: 32 },
      ],
    }
  "#})
  .unwrap();
  let model = Model::load(blank(0x10), &meta);
  assert!(model.runs().is_empty());

  let mut data = blank(0x100);
  put(&mut data, 0x10, &[0x01, 0x02]);
  let model = Model::load(data, &meta);
  assert_eq!(model.address_for_anchor("text"), None);
  assert_eq!(model.address_for_anchor("fine"), Some(32));
  assert_consistent!(model);
}
