//! hexmeta, a structured overlay over GBA ROM images.
//!
//! A [`Model`] tracks which parts of a ROM are pointers, text, tables, and
//! compressed streams, names interesting addresses, and keeps every pointer
//! and every anchor's list of sources consistent as the data is edited.
//!
//! [`Model`]: model/struct.Model.html

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod anchor;
pub mod delta;
pub mod error;
pub mod format;
pub mod index;
pub mod int;
pub mod lz;
pub mod meta;
pub mod model;
pub mod pcs;
pub mod rom;
pub mod run;
