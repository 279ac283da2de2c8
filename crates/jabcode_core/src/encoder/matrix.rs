//! Module matrix construction.
//!
//! Places finder patterns, alignment patterns, color palette modules,
//! metadata and finally the interleaved data into a symbol's module
//! matrix, and rasterizes finished symbols into the output bitmap.

use crate::bitmap::Bitmap;
use crate::color::{
	APN_CORE_COLOR_INDEX, APX_CORE_COLOR_INDEX, FP0_CORE_COLOR_INDEX, FP1_CORE_COLOR_INDEX,
	FP2_CORE_COLOR_INDEX, FP3_CORE_COLOR_INDEX, MASTER_PALETTE_PLACEMENT_INDEX,
	NC_COLOR_ENCODE_TABLE, SLAVE_PALETTE_PLACEMENT_INDEX, embedded_palette_index,
};
use crate::geometry::Vector2;
use crate::tables::{
	AP_NUM, AP_POS, DISTANCE_TO_BORDER, MASTER_METADATA_PART1_LENGTH, MetadataCursor,
	SLAVE_PALETTE_POSITION, SYMBOL_POSITIONS, size_to_version,
};

use super::Symbol;

/// Palette slot placed at palette module `i` of master corner `corner`.
///
/// The corner tables enumerate the first eight slots; larger palettes
/// continue with the identity.
pub(crate) fn master_placement_index(corner: usize, i: usize) -> usize {
	if i < 8 {
		MASTER_PALETTE_PLACEMENT_INDEX[corner][i] as usize
	} else {
		i
	}
}

/// Palette slot placed at palette module `i` of a slave symbol.
pub(crate) fn slave_placement_index(i: usize) -> usize {
	if i < 8 {
		SLAVE_PALETTE_PLACEMENT_INDEX[i] as usize
	} else {
		i
	}
}

/// Number of bits carried by one module.
pub(crate) fn bits_per_module(color_number: usize) -> usize {
	color_number.trailing_zeros() as usize
}

fn set_module(symbol: &mut Symbol, x: i32, y: i32, color: u8) {
	let width = symbol.side_size.x;
	let index = (y * width + x) as usize;
	symbol.matrix[index] = color;
	symbol.data_map[index] = false;
}

/// Places the alignment patterns of a symbol.
fn place_alignment_patterns(symbol: &mut Symbol, color_number: usize) {
	let nc = bits_per_module(color_number) - 1;
	let apx_core = APX_CORE_COLOR_INDEX[nc];
	let apx_peri = APN_CORE_COLOR_INDEX[nc];
	let ver_x = (size_to_version(symbol.side_size.x) - 1) as usize;
	let ver_y = (size_to_version(symbol.side_size.y) - 1) as usize;
	let number_x = AP_NUM[ver_x];
	let number_y = AP_NUM[ver_y];

	for x in 0..number_x {
		let mut left = x % 2 != 1;
		for y in 0..number_y {
			let x_offset = AP_POS[ver_x][x] - 1;
			let y_offset = AP_POS[ver_y][y] - 1;
			let corner = (x == 0 && y == 0)
				|| (x == 0 && y == number_y - 1)
				|| (x == number_x - 1 && y == 0)
				|| (x == number_x - 1 && y == number_y - 1);
			if !corner {
				// the diagonal pair alternates sides to avoid forming a
				// regular grid
				let diagonals: [(i32, i32); 2] = if left {
					[(-1, -1), (1, 1)]
				} else {
					[(1, -1), (-1, 1)]
				};
				for (dx, dy) in [(0, -1), (-1, 0), (1, 0), (0, 1)] {
					set_module(symbol, x_offset + dx, y_offset + dy, apx_peri);
				}
				for (dx, dy) in diagonals {
					set_module(symbol, x_offset + dx, y_offset + dy, apx_peri);
				}
				set_module(symbol, x_offset, y_offset, apx_core);
			}
			left = !left;
		}
	}
}

/// Places the three-ring finder patterns of a master symbol.
fn place_finder_patterns(symbol: &mut Symbol, color_number: usize) {
	let nc = bits_per_module(color_number) - 1;
	let width = symbol.side_size.x;
	let height = symbol.side_size.y;
	let d = DISTANCE_TO_BORDER;

	for k in 0..3i32 {
		let (fp0, fp1, fp2, fp3) = if k % 2 == 1 {
			(
				FP3_CORE_COLOR_INDEX[nc],
				FP2_CORE_COLOR_INDEX[nc],
				FP1_CORE_COLOR_INDEX[nc],
				FP0_CORE_COLOR_INDEX[nc],
			)
		} else {
			(
				FP0_CORE_COLOR_INDEX[nc],
				FP1_CORE_COLOR_INDEX[nc],
				FP2_CORE_COLOR_INDEX[nc],
				FP3_CORE_COLOR_INDEX[nc],
			)
		};
		for i in 0..=k {
			for j in 0..=k {
				if i == k || j == k {
					// upper left
					set_module(symbol, d - j - 1, d - (i + 1), fp0);
					set_module(symbol, d + j - 1, d + (i - 1), fp0);
					// upper right
					set_module(symbol, width - (d - 1) - j - 1, d - (i + 1), fp1);
					set_module(symbol, width - (d - 1) + j - 1, d + (i - 1), fp1);
					// lower right
					set_module(symbol, width - (d - 1) - j - 1, height - d + i, fp2);
					set_module(symbol, width - (d - 1) + j - 1, height - d - i, fp2);
					// lower left
					set_module(symbol, d - j - 1, height - d + i, fp3);
					set_module(symbol, d + j - 1, height - d - i, fp3);
				}
			}
		}
	}
}

/// Places the two-ring corner alignment patterns of a slave symbol.
fn place_slave_corner_patterns(symbol: &mut Symbol, color_number: usize) {
	let nc = bits_per_module(color_number) - 1;
	let width = symbol.side_size.x;
	let height = symbol.side_size.y;
	let d = DISTANCE_TO_BORDER;

	for k in 0..2i32 {
		let color = if k % 2 == 1 {
			APX_CORE_COLOR_INDEX[nc]
		} else {
			APN_CORE_COLOR_INDEX[nc]
		};
		for i in 0..=k {
			for j in 0..=k {
				if i == k || j == k {
					set_module(symbol, d - j - 1, d - (i + 1), color);
					set_module(symbol, d + j - 1, d + (i - 1), color);
					set_module(symbol, width - (d - 1) - j - 1, d - (i + 1), color);
					set_module(symbol, width - (d - 1) + j - 1, d + (i - 1), color);
					set_module(symbol, width - (d - 1) - j - 1, height - d + i, color);
					set_module(symbol, width - (d - 1) + j - 1, height - d - i, color);
					set_module(symbol, d - j - 1, height - d + i, color);
					set_module(symbol, d + j - 1, height - d - i, color);
				}
			}
		}
	}
}

/// Builds the module matrix of one symbol from its LDPC-encoded data.
pub(crate) fn create_matrix(
	symbol: &mut Symbol,
	color_number: usize,
	default_mode: bool,
	ecc_data: &[u8],
) {
	let width = symbol.side_size.x;
	let height = symbol.side_size.y;
	symbol.matrix = vec![0; (width * height) as usize];
	symbol.data_map = vec![true; (width * height) as usize];

	place_alignment_patterns(symbol, color_number);
	if symbol.index == 0 {
		place_finder_patterns(symbol, color_number);
	} else {
		place_slave_corner_patterns(symbol, color_number);
	}

	let nb_of_bits_per_mod = bits_per_module(color_number);
	let palette_index = embedded_palette_index(color_number);

	if symbol.index == 0 {
		// metadata and color palette walk the snake together
		let mut cursor = MetadataCursor::new();
		let mut metadata_index = 0usize;

		// metadata Part I
		if !default_mode {
			while metadata_index + 2 < symbol.metadata.len()
				&& metadata_index < MASTER_METADATA_PART1_LENGTH
			{
				let val = ((symbol.metadata[metadata_index] << 2)
					+ (symbol.metadata[metadata_index + 1] << 1)
					+ symbol.metadata[metadata_index + 2]) as usize;
				for i in 0..2 {
					let color = NC_COLOR_ENCODE_TABLE[val][i] as usize % color_number;
					set_module(symbol, cursor.x, cursor.y, color as u8);
					cursor.advance(height, width);
				}
				metadata_index += 3;
			}
		}

		// color palette, skipping the two colors held by the finder cores
		for i in 2..color_number.min(64) {
			for corner in 0..4 {
				let slot = master_placement_index(corner, i) % color_number;
				set_module(symbol, cursor.x, cursor.y, palette_index[slot]);
				cursor.advance(height, width);
			}
		}

		// metadata Part II
		if !default_mode {
			while metadata_index < symbol.metadata.len() {
				let mut color_index = 0usize;
				for j in 0..nb_of_bits_per_mod {
					if metadata_index < symbol.metadata.len() {
						color_index += (symbol.metadata[metadata_index] as usize)
							<< (nb_of_bits_per_mod - 1 - j);
						metadata_index += 1;
					} else {
						break;
					}
				}
				set_module(symbol, cursor.x, cursor.y, color_index as u8);
				cursor.advance(height, width);
			}
		}
	} else {
		// slave symbols carry their palette at fixed corner positions
		for i in 2..color_number.min(64).min(SLAVE_PALETTE_POSITION.len() + 2) {
			let slot = slave_placement_index(i) % color_number;
			let color = palette_index[slot];
			let pos = SLAVE_PALETTE_POSITION[i - 2];
			// left
			set_module(symbol, pos.x, pos.y, color);
			// top
			set_module(symbol, width - 1 - pos.y, pos.x, color);
			// right
			set_module(symbol, width - 1 - pos.x, height - 1 - pos.y, color);
			// bottom
			set_module(symbol, pos.y, height - 1 - pos.x, color);
		}
	}

	// data placement in column-major order, padded with alternating bits
	let mut written = 0usize;
	let mut padding = 0u8;
	for start in 0..width as usize {
		let mut i = start;
		while i < (width * height) as usize {
			if symbol.data_map[i] {
				let mut color_index = 0usize;
				for j in 0..nb_of_bits_per_mod {
					let bit = if written < ecc_data.len() {
						ecc_data[written]
					} else {
						let bit = padding;
						padding ^= 1;
						bit
					};
					color_index += (bit as usize) << (nb_of_bits_per_mod - 1 - j);
					written += 1;
				}
				symbol.matrix[i] = color_index as u8;
			}
			i += width as usize;
		}
	}
}

/// Geometry of the whole code in modules and pixels.
#[derive(Debug)]
pub(crate) struct CodeParams {
	/// Module edge length in pixels.
	pub dimension: i32,
	/// Code size in modules.
	pub code_size: Vector2,
	pub min_x: i32,
	pub min_y: i32,
	pub row_height: Vec<i32>,
	pub col_width: Vec<i32>,
}

/// Computes the layout of all symbols on the placement grid.
pub(crate) fn code_params(
	symbols: &[Symbol],
	positions: &[i32],
	module_size: usize,
	master_width: usize,
	master_height: usize,
) -> CodeParams {
	let dimension = if master_width != 0 || master_height != 0 {
		let dim_x = master_width as i32 / symbols[0].side_size.x;
		let dim_y = master_height as i32 / symbols[0].side_size.y;
		dim_x.max(dim_y).max(1)
	} else {
		module_size as i32
	};

	let mut min_x = 0;
	let mut min_y = 0;
	let mut max_x = 0;
	let mut max_y = 0;
	for &pos in positions {
		let p = SYMBOL_POSITIONS[pos as usize];
		min_x = min_x.min(p.x);
		min_y = min_y.min(p.y);
		max_x = max_x.max(p.x);
		max_y = max_y.max(p.y);
	}

	let rows = (max_y - min_y + 1) as usize;
	let cols = (max_x - min_x + 1) as usize;
	let mut row_height = vec![0i32; rows];
	let mut col_width = vec![0i32; cols];
	let mut code_size = Vector2::new(0, 0);
	for x in min_x..=max_x {
		for (i, &pos) in positions.iter().enumerate() {
			if SYMBOL_POSITIONS[pos as usize].x == x {
				col_width[(x - min_x) as usize] = symbols[i].side_size.x;
				code_size.x += symbols[i].side_size.x;
				break;
			}
		}
	}
	for y in min_y..=max_y {
		for (i, &pos) in positions.iter().enumerate() {
			if SYMBOL_POSITIONS[pos as usize].y == y {
				row_height[(y - min_y) as usize] = symbols[i].side_size.y;
				code_size.y += symbols[i].side_size.y;
				break;
			}
		}
	}

	CodeParams {
		dimension,
		code_size,
		min_x,
		min_y,
		row_height,
		col_width,
	}
}

/// Pixel offset of a symbol on the code canvas, in modules.
pub(crate) fn symbol_origin(cp: &CodeParams, position: i32) -> (i32, i32) {
	let p = SYMBOL_POSITIONS[position as usize];
	let col = (p.x - cp.min_x) as usize;
	let row = (p.y - cp.min_y) as usize;
	let start_x: i32 = cp.col_width[..col].iter().sum();
	let start_y: i32 = cp.row_height[..row].iter().sum();
	(start_x, start_y)
}

/// Rasterizes all symbol matrices into an RGBA bitmap.
pub(crate) fn create_bitmap(
	symbols: &[Symbol],
	positions: &[i32],
	palette: &[u8],
	cp: &CodeParams,
) -> Bitmap {
	let width = (cp.dimension * cp.code_size.x) as usize;
	let height = (cp.dimension * cp.code_size.y) as usize;
	let mut bitmap = Bitmap::new(width, height);

	for (k, symbol) in symbols.iter().enumerate() {
		let (start_x, start_y) = symbol_origin(cp, positions[k]);
		let symbol_width = symbol.side_size.x;
		let symbol_height = symbol.side_size.y;
		for x in start_x..start_x + symbol_width {
			for y in start_y..start_y + symbol_height {
				let p_index =
					symbol.matrix[((y - start_y) * symbol_width + (x - start_x)) as usize] as usize;
				let rgb = &palette[p_index * 3..p_index * 3 + 3];
				for i in (y * cp.dimension)..(y * cp.dimension + cp.dimension) {
					for j in (x * cp.dimension)..(x * cp.dimension + cp.dimension) {
						bitmap.set_rgba(j as usize, i as usize, [rgb[0], rgb[1], rgb[2], 255]);
					}
				}
			}
		}
	}
	bitmap
}
