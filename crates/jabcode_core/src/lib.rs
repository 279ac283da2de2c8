//! JAB Code core codec.
//!
//! JAB Code (Just Another Bar Code) is a polychrome two-dimensional matrix
//! symbology. This crate encodes a byte payload into a rasterized
//! color-module bitmap and recovers the payload from a captured image of
//! such a code, including multi-symbol (docked) layouts, 4 to 256 color
//! palettes and configurable LDPC error correction.
//!
//! # Example
//!
//! ```
//! use jabcode_core::{Encoder, EncodeSettings, DecodeMode, decode};
//!
//! let mut encoder = Encoder::new(EncodeSettings::default());
//! let bitmap = encoder.generate(b"Hello").unwrap();
//! let decoded = decode(&bitmap, DecodeMode::Normal).unwrap();
//! assert_eq!(decoded.payload, b"Hello");
//! ```

pub mod bitmap;
pub mod color;
pub mod error;
pub mod geometry;
pub mod ldpc;

mod decoder;
mod detector;
mod encoder;
mod interleave;
mod mask;
mod pseudo_random;
mod tables;

pub use bitmap::Bitmap;
pub use detector::{Decoded, DecodeMode, decode};
pub use encoder::{EncodeSettings, Encoder};
pub use error::{DecodeError, DecodeStatus, EncodeError};
pub use geometry::Vector2;
pub use interleave::{deinterleave, interleave};
pub use mask::{demask_symbol, mask_value};
pub use tables::{
	DEFAULT_COLOR_NUMBER, DEFAULT_ECC_LEVEL, DEFAULT_MODULE_SIZE, MAX_COLOR_NUMBER,
	MAX_SYMBOL_NUMBER, version_to_size,
};
