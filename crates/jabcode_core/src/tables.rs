//! Shared constant tables.
//!
//! Encoder and decoder must agree bit for bit on mode alphabets, switch
//! codewords, symbol placement and alignment pattern layout, so every
//! symmetric table lives here and is consumed by both sides.

use crate::geometry::Vector2;

/// Largest number of symbols in one code.
pub const MAX_SYMBOL_NUMBER: usize = 61;
/// Largest supported palette.
pub const MAX_COLOR_NUMBER: usize = 256;
/// Number of text encoding modes (byte mode excluded).
pub const ENCODING_MODES: usize = 6;
/// Number of mask patterns.
pub const MASK_PATTERN_NUMBER: usize = 8;

/// Default palette size.
pub const DEFAULT_COLOR_NUMBER: usize = 8;
/// Default symbol count.
pub const DEFAULT_SYMBOL_NUMBER: usize = 1;
/// Default module edge length in pixels.
pub const DEFAULT_MODULE_SIZE: usize = 12;
/// Default error correction level.
pub const DEFAULT_ECC_LEVEL: usize = 3;
/// Default mask pattern reference.
pub const DEFAULT_MASKING_REFERENCE: u8 = 7;
/// Default color mode `Nc` (8 colors).
pub const DEFAULT_MODULE_COLOR_MODE: u8 = 2;

/// Distance of a finder pattern center from the symbol border in modules.
pub const DISTANCE_TO_BORDER: i32 = 4;

/// Module count per side for a side version.
pub fn version_to_size(version: i32) -> i32 {
	version * 4 + 17
}

/// Side version for a module count per side.
pub fn size_to_version(size: i32) -> i32 {
	(size - 17) / 4
}

/// Bit width of one character in each mode
/// (Upper, Lower, Numeric, Punct, Mixed, Alphanumeric, Byte).
pub const CHARACTER_SIZE: [u32; 7] = [5, 5, 4, 4, 5, 6, 8];

/// How a byte maps into one encoding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharEncoding {
	/// Not representable in this mode.
	None,
	/// Plain codeword.
	Value(u8),
	/// Two input bytes compress into one codeword when the next byte
	/// matches `lookahead`; otherwise `solo` applies if present.
	Pair {
		/// Codeword of the compressed pair.
		value: u8,
		/// Required following byte.
		lookahead: u8,
		/// Codeword of the character alone, if representable.
		solo: Option<u8>,
	},
}

/// Codeword of `byte` in mode 0..=5.
pub fn encoding_value(mode: usize, byte: u8) -> CharEncoding {
	use CharEncoding::{None, Pair, Value};
	match mode {
		// upper case letters
		0 => match byte {
			32 => Value(0),
			65..=90 => Value(byte - 64),
			_ => None,
		},
		// lower case letters
		1 => match byte {
			32 => Value(0),
			97..=122 => Value(byte - 96),
			_ => None,
		},
		// digits
		2 => match byte {
			32 => Value(0),
			48..=57 => Value(byte - 47),
			44 => Value(11),
			46 => Value(12),
			_ => None,
		},
		// punctuation
		3 => match byte {
			33 => Value(0),
			34 => Value(1),
			36 => Value(2),
			37 => Value(3),
			38 => Value(4),
			39 => Value(5),
			40 => Value(6),
			41 => Value(7),
			44 => Value(8),
			45 => Value(9),
			46 => Value(10),
			47 => Value(11),
			58 => Value(12),
			59 => Value(13),
			63 => Value(14),
			64 => Value(15),
			_ => None,
		},
		// mixed
		4 => match byte {
			35 => Value(0),
			42 => Value(1),
			43 => Value(2),
			60 => Value(3),
			61 => Value(4),
			62 => Value(5),
			91 => Value(6),
			92 => Value(7),
			93 => Value(8),
			94 => Value(9),
			95 => Value(10),
			96 => Value(11),
			123 => Value(12),
			124 => Value(13),
			125 => Value(14),
			126 => Value(15),
			9 => Value(16),
			10 => Value(17),
			13 => Pair {
				value: 19,
				lookahead: 10,
				solo: Some(18),
			},
			44 => Pair {
				value: 20,
				lookahead: 32,
				solo: Option::None,
			},
			46 => Pair {
				value: 21,
				lookahead: 32,
				solo: Option::None,
			},
			58 => Pair {
				value: 22,
				lookahead: 32,
				solo: Option::None,
			},
			164 => Value(23),
			167 => Value(24),
			196 => Value(25),
			214 => Value(26),
			220 => Value(27),
			223 => Value(28),
			228 => Value(29),
			246 => Value(30),
			252 => Value(31),
			_ => None,
		},
		// alphanumeric
		5 => match byte {
			32 => Value(0),
			48..=57 => Value(byte - 47),
			65..=90 => Value(byte - 54),
			97..=122 => Value(byte - 60),
			_ => None,
		},
		_ => None,
	}
}

/// Bytes decoded from Upper mode codewords 0..=26.
pub const DECODING_TABLE_UPPER: [u8; 27] = [
	32, 65, 66, 67, 68, 69, 70, 71, 72, 73, 74, 75, 76, 77, 78, 79, 80, 81, 82, 83, 84, 85, 86,
	87, 88, 89, 90,
];
/// Bytes decoded from Lower mode codewords 0..=26.
pub const DECODING_TABLE_LOWER: [u8; 27] = [
	32, 97, 98, 99, 100, 101, 102, 103, 104, 105, 106, 107, 108, 109, 110, 111, 112, 113, 114,
	115, 116, 117, 118, 119, 120, 121, 122,
];
/// Bytes decoded from Numeric mode codewords 0..=12.
pub const DECODING_TABLE_NUMERIC: [u8; 13] = [32, 48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 44, 46];
/// Bytes decoded from Punctuation mode codewords 0..=15.
pub const DECODING_TABLE_PUNCT: [u8; 16] =
	[33, 34, 36, 37, 38, 39, 40, 41, 44, 45, 46, 47, 58, 59, 63, 64];
/// Bytes decoded from Mixed mode codewords 0..=31; 19..=22 expand to pairs.
pub const DECODING_TABLE_MIXED: [u8; 32] = [
	35, 42, 43, 60, 61, 62, 91, 92, 93, 94, 95, 96, 123, 124, 125, 126, 9, 10, 13, 0, 0, 0, 0,
	164, 167, 196, 214, 220, 223, 228, 246, 252,
];
/// Bytes decoded from Alphanumeric mode codewords 0..=62.
pub const DECODING_TABLE_ALPHANUMERIC: [u8; 63] = [
	32, 48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 65, 66, 67, 68, 69, 70, 71, 72, 73, 74, 75, 76,
	77, 78, 79, 80, 81, 82, 83, 84, 85, 86, 87, 88, 89, 90, 97, 98, 99, 100, 101, 102, 103, 104,
	105, 106, 107, 108, 109, 110, 111, 112, 113, 114, 115, 116, 117, 118, 119, 120, 121, 122,
];

const X: Option<u32> = None;

/// Bit cost of switching between the 14 mode states.
///
/// States 0..=6 are latched modes, 7..=13 the shift variants that revert
/// after one character. `None` marks an impossible transition.
pub const LATCH_SHIFT_TO: [[Option<u32>; 14]; 14] = [
	[Some(0), Some(5), Some(5), X, X, Some(5), X, X, X, X, Some(5), Some(7), X, Some(11)],
	[Some(7), Some(0), Some(5), X, X, Some(5), X, Some(5), X, X, Some(5), Some(7), X, Some(11)],
	[Some(4), Some(6), Some(0), X, X, Some(9), X, Some(6), X, X, Some(4), Some(6), X, Some(10)],
	[X, X, X, X, X, X, X, Some(0), Some(0), Some(0), X, X, Some(0), X],
	[X, X, X, X, X, X, X, Some(0), Some(0), Some(0), X, X, Some(0), X],
	[Some(8), Some(13), Some(13), X, X, Some(0), X, X, X, X, Some(8), Some(8), X, Some(12)],
	[X, X, X, X, X, X, Some(0), Some(0), Some(0), Some(0), X, X, Some(0), Some(0)],
	[Some(0), Some(5), Some(5), X, X, Some(5), X, X, X, X, Some(5), Some(7), X, Some(11)],
	[Some(7), Some(0), Some(5), X, X, Some(5), X, Some(5), X, X, Some(5), Some(7), X, Some(11)],
	[Some(4), Some(6), Some(0), X, X, Some(9), X, Some(6), X, X, Some(4), Some(6), X, Some(10)],
	[X, X, X, X, X, X, X, Some(0), Some(0), Some(0), X, X, Some(0), X],
	[X, X, X, X, X, X, X, Some(0), Some(0), Some(0), X, X, Some(0), X],
	[Some(8), Some(13), Some(13), X, X, Some(0), X, X, X, X, Some(8), Some(8), X, Some(12)],
	[X, X, X, X, X, X, Some(0), Some(0), Some(0), Some(0), X, X, Some(0), Some(0)],
];

/// Switch codewords from each latched mode; columns 0..=13 match
/// [`LATCH_SHIFT_TO`], 14 and 15 are the reserved ECI and FNC1 words.
pub const MODE_SWITCH: [[Option<u32>; 16]; 7] = [
	[
		X,
		Some(28),
		Some(29),
		X,
		X,
		Some(30),
		X,
		X,
		X,
		X,
		Some(27),
		Some(125),
		X,
		Some(124),
		Some(126),
		X,
	],
	[
		Some(126),
		X,
		Some(29),
		X,
		X,
		Some(30),
		X,
		Some(28),
		X,
		Some(127),
		Some(27),
		Some(125),
		X,
		Some(124),
		X,
		Some(127),
	],
	[
		Some(14),
		Some(63),
		X,
		X,
		X,
		Some(478),
		X,
		Some(62),
		X,
		X,
		Some(13),
		Some(61),
		X,
		Some(60),
		X,
		X,
	],
	[X; 16],
	[X; 16],
	[
		Some(255),
		Some(8188),
		Some(8189),
		X,
		X,
		X,
		X,
		X,
		X,
		X,
		Some(254),
		Some(253),
		X,
		Some(252),
		X,
		X,
	],
	[X; 16],
];

/// LDPC `(wc, wr)` for each error correction level 0..=10.
pub const ECC_LEVEL_TO_WCWR: [(i32, i32); 11] = [
	(4, 9),
	(3, 8),
	(3, 7),
	(4, 9),
	(3, 6),
	(4, 7),
	(4, 6),
	(3, 4),
	(4, 5),
	(5, 6),
	(6, 7),
];

/// Decoding order of cascaded symbols over the virtual placement grid.
pub const SYMBOL_POSITIONS: [Vector2; MAX_SYMBOL_NUMBER] = [
	Vector2::new(0, 0),
	Vector2::new(0, -1),
	Vector2::new(0, 1),
	Vector2::new(-1, 0),
	Vector2::new(1, 0),
	Vector2::new(0, -2),
	Vector2::new(-1, -1),
	Vector2::new(1, -1),
	Vector2::new(0, 2),
	Vector2::new(-1, 1),
	Vector2::new(1, 1),
	Vector2::new(-2, 0),
	Vector2::new(2, 0),
	Vector2::new(0, -3),
	Vector2::new(-1, -2),
	Vector2::new(1, -2),
	Vector2::new(-2, -1),
	Vector2::new(2, -1),
	Vector2::new(0, 3),
	Vector2::new(-1, 2),
	Vector2::new(1, 2),
	Vector2::new(-2, 1),
	Vector2::new(2, 1),
	Vector2::new(-3, 0),
	Vector2::new(3, 0),
	Vector2::new(0, -4),
	Vector2::new(-1, -3),
	Vector2::new(1, -3),
	Vector2::new(-2, -2),
	Vector2::new(2, -2),
	Vector2::new(-3, -1),
	Vector2::new(3, -1),
	Vector2::new(0, 4),
	Vector2::new(-1, 3),
	Vector2::new(1, 3),
	Vector2::new(-2, 2),
	Vector2::new(2, 2),
	Vector2::new(-3, 1),
	Vector2::new(3, 1),
	Vector2::new(-4, 0),
	Vector2::new(4, 0),
	Vector2::new(0, -5),
	Vector2::new(-1, -4),
	Vector2::new(1, -4),
	Vector2::new(-2, -3),
	Vector2::new(2, -3),
	Vector2::new(-3, -2),
	Vector2::new(3, -2),
	Vector2::new(-4, -1),
	Vector2::new(4, -1),
	Vector2::new(0, 5),
	Vector2::new(-1, 4),
	Vector2::new(1, 4),
	Vector2::new(-2, 3),
	Vector2::new(2, 3),
	Vector2::new(-3, 2),
	Vector2::new(3, 2),
	Vector2::new(-4, 1),
	Vector2::new(4, 1),
	Vector2::new(-5, 0),
	Vector2::new(5, 0),
];

/// Number of alignment patterns per side for side versions 1..=32.
pub const AP_NUM: [usize; 32] = [
	2, 2, 2, 2, 2, 3, 3, 3, 4, 4, 4, 4, 4, 4, 5, 5, 5, 5, 5, 6, 6, 6, 6, 6, 6, 7, 7, 7, 7, 7, 8,
	8,
];

/// 1-based alignment pattern center positions per side version.
///
/// Corners sit at module 4 and `4·v + 14`; interior centers are an even
/// spread snapped to positions ≡ 2 (mod 3), which keeps the first one in
/// the 14..=26 window the first-AP probe expects.
pub const AP_POS: [&[i32]; 32] = [
	&[4, 18],
	&[4, 22],
	&[4, 26],
	&[4, 30],
	&[4, 34],
	&[4, 20, 38],
	&[4, 23, 42],
	&[4, 26, 46],
	&[4, 20, 35, 50],
	&[4, 20, 38, 54],
	&[4, 23, 41, 58],
	&[4, 23, 44, 62],
	&[4, 26, 44, 66],
	&[4, 26, 47, 70],
	&[4, 23, 38, 56, 74],
	&[4, 23, 41, 59, 78],
	&[4, 23, 44, 62, 82],
	&[4, 23, 44, 65, 86],
	&[4, 26, 47, 68, 90],
	&[4, 23, 41, 59, 77, 94],
	&[4, 23, 41, 59, 80, 98],
	&[4, 23, 44, 62, 83, 102],
	&[4, 23, 44, 65, 86, 106],
	&[4, 26, 47, 68, 89, 110],
	&[4, 26, 47, 71, 92, 114],
	&[4, 23, 41, 62, 80, 98, 118],
	&[4, 23, 44, 62, 83, 101, 122],
	&[4, 23, 44, 65, 86, 107, 126],
	&[4, 26, 47, 68, 89, 110, 130],
	&[4, 26, 47, 68, 92, 113, 134],
	&[4, 23, 41, 62, 80, 101, 119, 138],
	&[4, 23, 44, 62, 83, 104, 122, 142],
];

/// Snake origin of master metadata placement.
pub const MASTER_METADATA_X: i32 = 6;
/// Snake origin of master metadata placement.
pub const MASTER_METADATA_Y: i32 = 1;
/// Encoded length of master metadata Part I.
pub const MASTER_METADATA_PART1_LENGTH: usize = 6;
/// Encoded length of master metadata Part II.
pub const MASTER_METADATA_PART2_LENGTH: usize = 38;
/// Number of modules carrying master metadata Part I.
pub const MASTER_METADATA_PART1_MODULE_NUMBER: usize = 4;

/// The positions of the first 32 color palette modules in a slave symbol.
pub const SLAVE_PALETTE_POSITION: [Vector2; 32] = [
	Vector2::new(4, 5),
	Vector2::new(4, 6),
	Vector2::new(4, 7),
	Vector2::new(4, 8),
	Vector2::new(4, 9),
	Vector2::new(4, 10),
	Vector2::new(4, 11),
	Vector2::new(4, 12),
	Vector2::new(5, 12),
	Vector2::new(5, 11),
	Vector2::new(5, 10),
	Vector2::new(5, 9),
	Vector2::new(5, 8),
	Vector2::new(5, 7),
	Vector2::new(5, 6),
	Vector2::new(5, 5),
	Vector2::new(6, 5),
	Vector2::new(6, 6),
	Vector2::new(6, 7),
	Vector2::new(6, 8),
	Vector2::new(6, 9),
	Vector2::new(6, 10),
	Vector2::new(6, 11),
	Vector2::new(6, 12),
	Vector2::new(7, 12),
	Vector2::new(7, 11),
	Vector2::new(7, 10),
	Vector2::new(7, 9),
	Vector2::new(7, 8),
	Vector2::new(7, 7),
	Vector2::new(7, 6),
	Vector2::new(7, 5),
];

/// Cursor walking the snake-like master metadata traversal.
///
/// Starts at `(MASTER_METADATA_X, MASTER_METADATA_Y)`; every group of
/// four steps reflects across the symbol and at steps 44, 96 and 156 the
/// traversal transposes.
#[derive(Debug, Clone, Copy)]
pub struct MetadataCursor {
	/// Module column of the current position.
	pub x: i32,
	/// Module row of the current position.
	pub y: i32,
	count: i32,
}

impl Default for MetadataCursor {
	fn default() -> Self {
		Self::new()
	}
}

impl MetadataCursor {
	/// Creates a cursor at the snake origin.
	pub fn new() -> Self {
		Self {
			x: MASTER_METADATA_X,
			y: MASTER_METADATA_Y,
			count: 0,
		}
	}

	/// Moves to the next metadata module of a `width` x `height` symbol.
	pub fn advance(&mut self, height: i32, width: i32) {
		self.count += 1;
		let c = self.count;
		match c % 4 {
			0 | 2 => self.y = height - 1 - self.y,
			_ => self.x = width - 1 - self.x,
		}
		if c % 4 == 0 {
			// the last descent is open-ended so large palettes keep
			// walking towards the symbol middle
			if c <= 20 || (44..=68).contains(&c) || (96..=124).contains(&c) || c >= 156 {
				self.y += 1;
			} else if (c > 20 && c < 44) || (c > 68 && c < 96) || (c > 124 && c < 156) {
				self.x -= 1;
			}
		}
		if c == 44 || c == 96 || c == 156 {
			std::mem::swap(&mut self.x, &mut self.y);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn version_size_roundtrip() {
		for v in 1..=32 {
			let size = version_to_size(v);
			assert_eq!(size, 4 * v + 17);
			assert_eq!(size_to_version(size), v);
		}
	}

	#[test]
	fn ap_layout_is_consistent() {
		for v in 1..=32usize {
			let pos = AP_POS[v - 1];
			assert_eq!(pos.len(), AP_NUM[v - 1]);
			assert_eq!(pos[0], 4);
			assert_eq!(*pos.last().unwrap(), 4 * v as i32 + 14);
			for w in pos.windows(2) {
				assert!(w[1] > w[0]);
			}
			if v >= 6 {
				assert!((14..=26).contains(&pos[1]), "version {v}");
				assert_eq!(pos[1] % 3, 2, "version {v}");
			}
		}
	}

	#[test]
	fn encoding_value_matches_decoding_tables() {
		for (value, &byte) in DECODING_TABLE_UPPER.iter().enumerate() {
			assert_eq!(encoding_value(0, byte), CharEncoding::Value(value as u8));
		}
		for (value, &byte) in DECODING_TABLE_ALPHANUMERIC.iter().enumerate() {
			assert_eq!(encoding_value(5, byte), CharEncoding::Value(value as u8));
		}
		for (value, &byte) in DECODING_TABLE_MIXED.iter().enumerate() {
			if (19..=22).contains(&value) || value == 18 {
				continue;
			}
			assert_eq!(encoding_value(4, byte), CharEncoding::Value(value as u8), "byte {byte}");
		}
		// lookahead pairs
		assert_eq!(
			encoding_value(4, 44),
			CharEncoding::Pair {
				value: 20,
				lookahead: 32,
				solo: None
			}
		);
		assert_eq!(
			encoding_value(4, 13),
			CharEncoding::Pair {
				value: 19,
				lookahead: 10,
				solo: Some(18)
			}
		);
	}

	#[test]
	fn metadata_snake_stays_in_bounds_and_never_repeats() {
		let width = version_to_size(2);
		let height = version_to_size(2);
		let mut cursor = MetadataCursor::new();
		let mut seen = std::collections::HashSet::new();
		for count in 1..=180 {
			assert!(
				seen.insert((cursor.x, cursor.y)),
				"module ({},{}) visited twice at step {count}",
				cursor.x,
				cursor.y
			);
			assert!(
				cursor.x >= 0 && cursor.x < width && cursor.y >= 0 && cursor.y < height,
				"({},{}) out of bounds",
				cursor.x,
				cursor.y
			);
			cursor.advance(height, width);
		}
	}

	#[test]
	fn wcwr_levels_are_valid_codes() {
		for &(wc, wr) in &ECC_LEVEL_TO_WCWR {
			assert!(wc < wr);
			assert!((3..=10).contains(&wc));
			assert!((4..=10).contains(&wr));
		}
	}
}
