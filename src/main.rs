//! hexmeta, a tool for annotating and checking the layout of GBA ROM images.

#![deny(unsafe_code)]

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::process;

use structopt::StructOpt;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use hexmeta::delta::Delta;
use hexmeta::meta::Metadata;
use hexmeta::model::Model;
use hexmeta::model::Options;

#[derive(StructOpt, Debug)]
#[structopt(name = "hexmeta", about = "Annotates the layout of a GBA ROM image.")]
struct Opts {
  /// The ROM image to load.
  #[structopt(parse(from_os_str))]
  rom: PathBuf,

  /// JSON5 metadata describing the ROM. Without it, the ROM's pointers and
  /// text are guessed at.
  #[structopt(short, long, parse(from_os_str))]
  metadata: Option<PathBuf>,

  /// Writes the resulting metadata here, as JSON5.
  #[structopt(short, long, parse(from_os_str))]
  export: Option<PathBuf>,

  /// Writes the resulting ROM image here.
  #[structopt(short, long, parse(from_os_str))]
  output: Option<PathBuf>,

  /// Declares an anchor, as `ADDR=TEXT` with a hex address; for example,
  /// `3c0=^names[name""11]44`. May be repeated.
  #[structopt(short, long = "anchor", number_of_values = 1, parse(try_from_str = parse_anchor))]
  anchors: Vec<(usize, String)>,

  /// Prints the text form of a region, as `ADDR:LEN` in hex.
  #[structopt(short, long, parse(try_from_str = parse_region))]
  copy: Option<(usize, usize)>,

  /// Lists every run, then dumps the non-empty parts of the ROM.
  #[structopt(short, long)]
  dump: bool,

  /// Checks that every pointer and anchor agree, failing if not.
  #[structopt(long)]
  verify: bool,

  /// Pointers to addresses before this one are ignored when guessing.
  #[structopt(long, default_value = "0", parse(try_from_str = parse_hex))]
  earliest_anchor: usize,

  /// Where to start looking for space for runs that must move.
  #[structopt(long, default_value = "100", parse(try_from_str = parse_hex))]
  free_space_start: usize,

  /// How much room to leave after a moved run.
  #[structopt(long, default_value = "140", parse(try_from_str = parse_hex))]
  free_space_margin: usize,

  /// Logs more; may be repeated. `RUST_LOG` takes precedence.
  #[structopt(short, long, parse(from_occurrences))]
  verbose: u8,
}

impl Opts {
  fn options(&self) -> Options {
    Options {
      earliest_allowed_anchor: self.earliest_anchor,
      free_space_start: self.free_space_start,
      free_space_margin: self.free_space_margin,
      ..Options::default()
    }
  }
}

fn parse_hex(s: &str) -> Result<usize, String> {
  let digits = s.trim_start_matches("0x").trim_start_matches("0X");
  usize::from_str_radix(digits, 16).map_err(|e| format!("bad address `{}`: {}", s, e))
}

fn parse_anchor(s: &str) -> Result<(usize, String), String> {
  match s.find('=') {
    Some(i) => Ok((parse_hex(&s[..i])?, s[i + 1..].to_string())),
    None => Err(format!("expected ADDR=TEXT, got `{}`", s)),
  }
}

fn parse_region(s: &str) -> Result<(usize, usize), String> {
  match s.find(':') {
    Some(i) => Ok((parse_hex(&s[..i])?, parse_hex(&s[i + 1..])?)),
    None => Err(format!("expected ADDR:LEN, got `{}`", s)),
  }
}

/// Prints `error` and exits.
fn die(context: impl fmt::Display, error: impl fmt::Display) -> ! {
  eprintln!("error: {}: {}", context, error);
  process::exit(1)
}

fn read(path: &Path) -> Vec<u8> {
  fs::read(path).unwrap_or_else(|e| die(path.display(), e))
}

fn write(path: &Path, bytes: &[u8]) {
  if let Err(e) = fs::write(path, bytes) {
    die(path.display(), e)
  }
}

fn init_logging(verbose: u8) {
  let level = match verbose {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();
}

fn print_runs(model: &Model) {
  for run in model.runs().iter() {
    let name = model.anchor_name_at(run.start).unwrap_or("");
    println!(
      "{:06X} {:>6X} {:>3} ^{}{}",
      run.start,
      run.len(),
      run.sources.iter().count(),
      name,
      run.format_string()
    );
  }
}

fn main() {
  let opts = Opts::from_args();
  init_logging(opts.verbose);

  let data = read(&opts.rom);
  let metadata = opts.metadata.as_ref().map(|path| {
    let text = fs::read_to_string(path).unwrap_or_else(|e| die(path.display(), e));
    Metadata::from_json5(&text).unwrap_or_else(|e| die(path.display(), e))
  });
  let mut model = Model::with_options(data, metadata.as_ref(), opts.options());

  let mut delta = Delta::new();
  for (addr, text) in &opts.anchors {
    match model.write_anchor(&mut delta, *addr, text) {
      Ok(Some(warning)) => warn!("{}", warning),
      Ok(None) => {}
      Err(e) => die(format_args!("anchor `{}` at {:06X}", text, addr), e),
    }
  }
  if !opts.anchors.is_empty() {
    info!(anchors = opts.anchors.len(), "applied anchors");
  }

  if let Some((start, len)) = opts.copy {
    match model.copy_region(&mut delta, start, len) {
      Ok(text) => println!("{}", text),
      Err(e) => die(format_args!("copying {:06X}:{:X}", start, len), e),
    }
  }

  if opts.dump {
    print_runs(&model);
    println!();
    if let Err(e) = model.rom().dump(io::stdout()) {
      die("dumping", e)
    }
  }

  if opts.verify {
    if let Err(errors) = model.verify_invariants() {
      errors.dump_and_die(2);
    }
    info!("verified");
  }

  if let Some(path) = &opts.export {
    let text = model
      .export_metadata()
      .to_json5()
      .unwrap_or_else(|e| die("exporting metadata", e));
    write(path, text.as_bytes());
  }
  if let Some(path) = &opts.output {
    write(path, model.rom().bytes());
  }
}
