//! `jabcode-rs` encodes and decodes JAB Code polychrome 2D barcodes.
//!
//! The codec itself lives in [`jabcode_core`]; this crate re-exports it
//! and ships the command line front-end.

pub use jabcode_core::*;
