//! Module colors and color palettes.
//!
//! A symbol carries an ordered palette of `2^(Nc+1)` RGB colors. The first
//! eight are the canonical corner colors of the RGB cube; larger palettes
//! subdivide the cube channel by channel. Symbols with more than 64 colors
//! only embed a 64-color subset and the receiver rebuilds the rest by
//! linear interpolation.

/// Number of color palettes per symbol, one per corner.
pub const COLOR_PALETTE_NUMBER: usize = 4;

/// The canonical 8-color palette in RGB order:
/// black, blue, green, cyan, red, magenta, yellow, white.
pub const DEFAULT_PALETTE: [[u8; 3]; 8] = [
	[0, 0, 0],
	[0, 0, 255],
	[0, 255, 0],
	[0, 255, 255],
	[255, 0, 0],
	[255, 0, 255],
	[255, 255, 0],
	[255, 255, 255],
];

/// Finder pattern core color index in the canonical palette.
pub const FP0_CORE_COLOR: u8 = 0;
/// Finder pattern core color index in the canonical palette.
pub const FP1_CORE_COLOR: u8 = 0;
/// Finder pattern core color index in the canonical palette.
pub const FP2_CORE_COLOR: u8 = 6;
/// Finder pattern core color index in the canonical palette.
pub const FP3_CORE_COLOR: u8 = 3;

/// Alignment pattern core color index in the canonical palette.
pub const AP_CORE_COLOR: u8 = 3;
/// Core color of interior alignment patterns.
pub const APX_CORE_COLOR: u8 = 6;

/// Finder pattern core color index for every color mode `Nc` 0..=7.
pub const FP0_CORE_COLOR_INDEX: [u8; 8] = [0, 0, FP0_CORE_COLOR, 0, 0, 0, 0, 0];
/// See [`FP0_CORE_COLOR_INDEX`].
pub const FP1_CORE_COLOR_INDEX: [u8; 8] = [0, 0, FP1_CORE_COLOR, 0, 0, 0, 0, 0];
/// See [`FP0_CORE_COLOR_INDEX`].
pub const FP2_CORE_COLOR_INDEX: [u8; 8] = [0, 2, FP2_CORE_COLOR, 14, 30, 60, 124, 252];
/// See [`FP0_CORE_COLOR_INDEX`].
pub const FP3_CORE_COLOR_INDEX: [u8; 8] = [0, 3, FP3_CORE_COLOR, 3, 7, 15, 15, 31];
/// Alignment pattern ring color index for every color mode.
pub const APN_CORE_COLOR_INDEX: [u8; 8] = [0, 3, AP_CORE_COLOR, 3, 7, 15, 15, 31];
/// Interior alignment pattern core color index for every color mode.
pub const APX_CORE_COLOR_INDEX: [u8; 8] = [0, 2, APX_CORE_COLOR, 14, 30, 60, 124, 252];

/// Placement order of palette colors in the four master corner palettes.
///
/// Row `p` lists, for corner palette `p`, which palette index is stored at
/// the n-th palette slot. The first two entries per corner are carried by
/// the finder pattern itself.
pub const MASTER_PALETTE_PLACEMENT_INDEX: [[u8; 8]; 4] = [
	[0, 3, 5, 6, 1, 2, 4, 7],
	[0, 6, 5, 3, 1, 2, 4, 7],
	[6, 0, 5, 3, 1, 2, 4, 7],
	[3, 0, 5, 6, 1, 2, 4, 7],
];

/// Placement order of palette colors in slave symbols.
pub const SLAVE_PALETTE_PLACEMENT_INDEX: [u8; 8] = [3, 6, 5, 0, 1, 2, 4, 7];

/// Color pairs encoding the three Nc bits of master metadata Part I.
///
/// Values are canonical palette indices restricted to
/// {0 = black, 3 = cyan, 6 = yellow}.
pub const NC_COLOR_ENCODE_TABLE: [[u8; 2]; 8] = [
	[0, 0],
	[0, 3],
	[0, 6],
	[3, 0],
	[3, 3],
	[3, 6],
	[6, 0],
	[6, 3],
];

/// Looks up the Nc bits encoded by a pair of module colors.
pub fn nc_color_decode(module1: u8, module2: u8) -> Option<u8> {
	NC_COLOR_ENCODE_TABLE
		.iter()
		.position(|&[a, b]| a == module1 && b == module2)
		.map(|i| i as u8)
}

/// Builds the default palette for `color_number` colors as a flat RGB list.
pub fn default_palette(color_number: usize) -> Vec<u8> {
	let mut palette = vec![0u8; color_number * 3];
	match color_number {
		4 => {
			// black, magenta, yellow, cyan
			palette[0..3].copy_from_slice(&DEFAULT_PALETTE[FP0_CORE_COLOR as usize]);
			palette[3..6].copy_from_slice(&DEFAULT_PALETTE[5]);
			palette[6..9].copy_from_slice(&DEFAULT_PALETTE[FP2_CORE_COLOR as usize]);
			palette[9..12].copy_from_slice(&DEFAULT_PALETTE[FP3_CORE_COLOR as usize]);
		}
		8 => {
			for (i, rgb) in DEFAULT_PALETTE.iter().enumerate() {
				palette[i * 3..i * 3 + 3].copy_from_slice(rgb);
			}
		}
		_ => generate_palette(color_number, &mut palette),
	}
	palette
}

/// Fills `palette` with an evenly subdivided RGB cube for 16..=256 colors.
fn generate_palette(color_number: usize, palette: &mut [u8]) {
	let (vr, vg, vb): (usize, usize, usize) = match color_number {
		16 => (4, 2, 2),
		32 => (4, 4, 2),
		64 => (4, 4, 4),
		128 => (8, 4, 4),
		256 => (8, 8, 4),
		_ => return,
	};

	let step = |v: usize| -> f32 {
		if v - 1 == 3 {
			85.0
		} else {
			256.0 / (v - 1) as f32
		}
	};
	let (dr, dg, db) = (step(vr), step(vg), step(vb));

	let mut index = 0;
	for i in 0..vr {
		let r = ((dr * i as f32) as i32).min(255) as u8;
		for j in 0..vg {
			let g = ((dg * j as f32) as i32).min(255) as u8;
			for k in 0..vb {
				let b = ((db * k as f32) as i32).min(255) as u8;
				palette[index] = r;
				palette[index + 1] = g;
				palette[index + 2] = b;
				index += 3;
			}
		}
	}
}

/// Returns which palette entries are physically embedded in the symbol.
///
/// Up to 64 colors every entry is embedded; 128- and 256-color palettes
/// embed a fixed 64-color subset and the rest is interpolated on read.
pub fn embedded_palette_index(color_number: usize) -> Vec<u8> {
	let index_size = color_number.min(64);
	let mut index: Vec<u8> = (0..index_size as u8).collect();
	if color_number == 128 {
		for (i, slot) in index.iter_mut().enumerate() {
			let block = i / 16;
			let offset = i % 16;
			*slot = ([0u8, 32, 80, 112][block]) + offset as u8;
		}
	} else if color_number == 256 {
		const BASES: [u8; 16] = [
			0, 8, 20, 28, 64, 72, 84, 92, 160, 168, 180, 188, 224, 232, 244, 252,
		];
		for (i, slot) in index.iter_mut().enumerate() {
			*slot = BASES[i / 4] + (i % 4) as u8;
		}
	}
	index
}

/// Copies a 16-color sub-block into a 32-color block and interpolates the
/// missing entries. Offsets are byte offsets into the flat palette.
fn interpolate_block_16_to_32(palette: &mut [u8], dst: usize, src: usize) {
	palette.copy_within(src + 36..src + 48, dst + 84);
	palette.copy_within(src + 24..src + 36, dst + 60);
	palette.copy_within(src + 12..src + 24, dst + 24);
	palette.copy_within(src..src + 12, dst);
	for j in 0..12 {
		let sum = u32::from(palette[dst + j]) + u32::from(palette[dst + 24 + j]);
		palette[dst + 12 + j] = (sum / 2) as u8;
	}
	for j in 0..12 {
		let sum = u32::from(palette[dst + 24 + j]) * 2 + u32::from(palette[dst + 60 + j]);
		palette[dst + 36 + j] = (sum / 3) as u8;
		let sum = u32::from(palette[dst + j]) + u32::from(palette[dst + 60 + j]) * 2;
		palette[dst + 48 + j] = (sum / 3) as u8;
	}
	for j in 0..12 {
		let sum = u32::from(palette[dst + 60 + j]) + u32::from(palette[dst + 84 + j]);
		palette[dst + 72 + j] = (sum / 2) as u8;
	}
}

/// Expands the embedded 64-color subset of every corner palette into the
/// full 128- or 256-color palette by linear interpolation.
pub fn interpolate_palette(palette: &mut [u8], color_number: usize) {
	for p in 0..COLOR_PALETTE_NUMBER {
		let offset = color_number * 3 * p;
		if color_number == 128 {
			palette.copy_within(offset + 144..offset + 192, offset + 336);
			palette.copy_within(offset + 96..offset + 144, offset + 240);
			palette.copy_within(offset + 48..offset + 96, offset + 96);
			for j in 0..48 {
				let sum = u32::from(palette[offset + j]) + u32::from(palette[offset + 96 + j]);
				palette[offset + 48 + j] = (sum / 2) as u8;
			}
			for j in 0..48 {
				let sum =
					u32::from(palette[offset + 96 + j]) * 2 + u32::from(palette[offset + 240 + j]);
				palette[offset + 144 + j] = (sum / 3) as u8;
				let sum =
					u32::from(palette[offset + 96 + j]) + u32::from(palette[offset + 240 + j]) * 2;
				palette[offset + 192 + j] = (sum / 3) as u8;
			}
			for j in 0..48 {
				let sum =
					u32::from(palette[offset + 240 + j]) + u32::from(palette[offset + 336 + j]);
				palette[offset + 288 + j] = (sum / 2) as u8;
			}
		} else if color_number == 256 {
			interpolate_block_16_to_32(palette, offset + 672, offset + 144);
			interpolate_block_16_to_32(palette, offset + 480, offset + 96);
			interpolate_block_16_to_32(palette, offset + 192, offset + 48);
			interpolate_block_16_to_32(palette, offset, offset);
			for j in 0..96 {
				let sum = u32::from(palette[offset + j]) + u32::from(palette[offset + 192 + j]);
				palette[offset + 96 + j] = (sum / 2) as u8;
			}
			for j in 0..96 {
				let sum =
					u32::from(palette[offset + 192 + j]) * 2 + u32::from(palette[offset + 480 + j]);
				palette[offset + 288 + j] = (sum / 3) as u8;
				let sum =
					u32::from(palette[offset + 192 + j]) + u32::from(palette[offset + 480 + j]) * 2;
				palette[offset + 384 + j] = (sum / 3) as u8;
			}
			for j in 0..96 {
				let sum =
					u32::from(palette[offset + 480 + j]) + u32::from(palette[offset + 672 + j]);
				palette[offset + 576 + j] = (sum / 2) as u8;
			}
		} else {
			return;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_palette_small_modes() {
		let p4 = default_palette(4);
		assert_eq!(&p4[0..3], &[0, 0, 0]);
		assert_eq!(&p4[3..6], &[255, 0, 255]);
		assert_eq!(&p4[6..9], &[255, 255, 0]);
		assert_eq!(&p4[9..12], &[0, 255, 255]);

		let p8 = default_palette(8);
		assert_eq!(&p8[0..3], &[0, 0, 0]);
		assert_eq!(&p8[21..24], &[255, 255, 255]);
	}

	#[test]
	fn generated_palettes_span_the_cube() {
		for n in [16usize, 32, 64, 128, 256] {
			let p = default_palette(n);
			assert_eq!(p.len(), n * 3);
			assert_eq!(&p[0..3], &[0, 0, 0]);
			assert_eq!(&p[p.len() - 3..], &[255, 255, 255]);
		}
	}

	#[test]
	fn embedded_index_identity_up_to_64() {
		for n in [4usize, 8, 16, 32, 64] {
			let idx = embedded_palette_index(n);
			assert_eq!(idx.len(), n.min(64));
			assert!(idx.iter().enumerate().all(|(i, &v)| v as usize == i));
		}
		assert_eq!(embedded_palette_index(128).len(), 64);
		assert_eq!(embedded_palette_index(256).len(), 64);
	}

	#[test]
	fn interpolation_restores_embedded_anchors() {
		// The reader packs the 64 embedded colors into the first slots of
		// each corner palette; interpolation must move every embedded color
		// back to its full-palette index.
		let full = default_palette(256);
		let index = embedded_palette_index(256);
		let mut palette = vec![0u8; 256 * 3 * COLOR_PALETTE_NUMBER];
		for p in 0..COLOR_PALETTE_NUMBER {
			let base = 256 * 3 * p;
			for (slot, &color) in index.iter().enumerate() {
				let c = color as usize;
				palette[base + slot * 3..base + slot * 3 + 3]
					.copy_from_slice(&full[c * 3..c * 3 + 3]);
			}
		}
		interpolate_palette(&mut palette, 256);
		for p in 0..COLOR_PALETTE_NUMBER {
			let base = 256 * 3 * p;
			for &c in &index {
				let c = c as usize;
				assert_eq!(
					&palette[base + c * 3..base + c * 3 + 3],
					&full[c * 3..c * 3 + 3],
					"anchor {c} in palette {p}"
				);
			}
		}
	}
}
