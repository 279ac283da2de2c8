//! Symbol decoding.
//!
//! Reads the per-corner color palettes out of a sampled symbol matrix,
//! classifies every data module against them, undoes masking and
//! interleaving, LDPC-decodes the payload and parses the metadata footer.

pub(crate) mod bits;

use rand::rngs::SmallRng;

use crate::bitmap::Bitmap;
use crate::color::{COLOR_PALETTE_NUMBER, interpolate_palette, nc_color_decode};
use crate::encoder::matrix::{master_placement_index, slave_placement_index};
use crate::geometry::{Point, Vector2};
use crate::interleave::deinterleave;
use crate::ldpc;
use crate::mask::demask_symbol;
use crate::tables::{
	AP_NUM, AP_POS, DEFAULT_ECC_LEVEL, DEFAULT_MASKING_REFERENCE, DEFAULT_MODULE_COLOR_MODE,
	DISTANCE_TO_BORDER, ECC_LEVEL_TO_WCWR, MASTER_METADATA_PART1_LENGTH,
	MASTER_METADATA_PART1_MODULE_NUMBER, MASTER_METADATA_PART2_LENGTH, MetadataCursor,
	SLAVE_PALETTE_POSITION, size_to_version, version_to_size,
};

/// Why a symbol failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SymbolFailure {
	/// LDPC or size validation failed; re-sampling may still succeed.
	Retry,
	/// Metadata is inconsistent; no point in retrying.
	Abort,
}

/// Parsed symbol metadata.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SymbolMetadata {
	pub nc: u8,
	pub mask_type: u8,
	pub docked_position: u8,
	pub side_version: Vector2,
	/// `(x, y)` carry `(wc, wr)`.
	pub ecl: Vector2,
	pub default_mode: bool,
}

impl Default for SymbolMetadata {
	fn default() -> Self {
		Self {
			nc: 0,
			mask_type: 0,
			docked_position: 0,
			side_version: Vector2::default(),
			ecl: Vector2::default(),
			default_mode: false,
		}
	}
}

impl SymbolMetadata {
	pub fn color_number(&self) -> usize {
		1usize << (self.nc + 1)
	}

	pub fn bits_per_module(&self) -> usize {
		(self.nc + 1) as usize
	}
}

/// One detected symbol being decoded.
#[derive(Debug, Clone, Default)]
pub(crate) struct DecodedSymbol {
	pub index: usize,
	pub host_index: usize,
	/// Side of this symbol that faces its host.
	pub host_position: usize,
	pub side_size: Vector2,
	pub module_size: f32,
	pub pattern_positions: [Point; 4],
	pub metadata: SymbolMetadata,
	pub slave_metadata: [SymbolMetadata; 4],
	/// Four corner palettes, `color_number * 3` bytes each.
	pub palette: Vec<u8>,
	/// Decoded net payload bits.
	pub data: Vec<u8>,
}

/// Stores the RGB value of one palette module.
fn write_color_palette(
	matrix: &Bitmap,
	symbol: &mut DecodedSymbol,
	p_index: usize,
	color_index: usize,
	x: i32,
	y: i32,
) {
	let color_number = symbol.metadata.color_number();
	let palette_offset = color_number * 3 * p_index;
	let rgb = matrix.rgb_at(x as usize, y as usize);
	symbol.palette[palette_offset + color_index * 3..palette_offset + color_index * 3 + 3]
		.copy_from_slice(&rgb);
}

/// The two palette modules inside the corner pattern `p_index`.
fn color_palette_pos_in_fp(p_index: usize, width: i32, height: i32) -> (Vector2, Vector2) {
	let d = DISTANCE_TO_BORDER;
	match p_index {
		0 => (Vector2::new(d - 1, d - 1), Vector2::new(d, d - 1)),
		1 => (Vector2::new(width - d, d - 1), Vector2::new(width - d - 1, d - 1)),
		2 => (
			Vector2::new(width - d, height - d),
			Vector2::new(width - d - 1, height - d),
		),
		_ => (Vector2::new(d - 1, height - d), Vector2::new(d, height - d)),
	}
}

/// Reads the four corner palettes of a master symbol along the metadata
/// snake.
fn read_color_palette_in_master(
	matrix: &Bitmap,
	symbol: &mut DecodedSymbol,
	data_map: &mut [bool],
	cursor: &mut MetadataCursor,
) {
	let color_number = symbol.metadata.color_number();
	symbol.palette = vec![0; color_number * 3 * COLOR_PALETTE_NUMBER];
	let width = matrix.width() as i32;
	let height = matrix.height() as i32;

	// the first two colors sit inside the finder patterns
	for p_index in 0..COLOR_PALETTE_NUMBER {
		let (p1, p2) = color_palette_pos_in_fp(p_index, width, height);
		let color_index = master_placement_index(p_index, 0) % color_number;
		write_color_palette(matrix, symbol, p_index, color_index, p1.x, p1.y);
		let color_index = master_placement_index(p_index, 1) % color_number;
		write_color_palette(matrix, symbol, p_index, color_index, p2.x, p2.y);
	}

	// the rest follows the snake through the dedicated palette modules
	for color_counter in 2..color_number.min(64) {
		for p_index in 0..COLOR_PALETTE_NUMBER {
			let color_index = master_placement_index(p_index, color_counter) % color_number;
			write_color_palette(matrix, symbol, p_index, color_index, cursor.x, cursor.y);
			data_map[(cursor.y * width + cursor.x) as usize] = true;
			cursor.advance(height, width);
		}
	}

	// beyond 8 colors the finder rings still show the canonical cyan and
	// yellow, which no longer equal palette entries 3 and 6; take those
	// slots from the corner that read them out of dedicated modules
	if color_number > 8 {
		let block = color_number * 3;
		for (bad, good) in [(0usize, 1usize), (3, 2)] {
			let (bad, good) = (bad * block + 9, good * block + 9);
			let value: [u8; 3] = symbol.palette[good..good + 3].try_into().unwrap_or([0; 3]);
			symbol.palette[bad..bad + 3].copy_from_slice(&value);
		}
		for (bad, good) in [(1usize, 0usize), (2, 3)] {
			let (bad, good) = (bad * block + 18, good * block + 18);
			let value: [u8; 3] = symbol.palette[good..good + 3].try_into().unwrap_or([0; 3]);
			symbol.palette[bad..bad + 3].copy_from_slice(&value);
		}
	}

	if color_number > 64 {
		interpolate_palette(&mut symbol.palette, color_number);
	}
}

/// Reads the four corner palettes of a slave symbol.
fn read_color_palette_in_slave(matrix: &Bitmap, symbol: &mut DecodedSymbol, data_map: &mut [bool]) {
	let color_number = symbol.metadata.color_number();
	symbol.palette = vec![0; color_number * 3 * COLOR_PALETTE_NUMBER];
	let width = matrix.width() as i32;
	let height = matrix.height() as i32;

	for p_index in 0..COLOR_PALETTE_NUMBER {
		let (p1, p2) = color_palette_pos_in_fp(p_index, width, height);
		let color_index = slave_placement_index(0) % color_number;
		write_color_palette(matrix, symbol, p_index, color_index, p1.x, p1.y);
		let color_index = slave_placement_index(1) % color_number;
		write_color_palette(matrix, symbol, p_index, color_index, p2.x, p2.y);
	}

	for color_counter in 2..color_number.min(64).min(SLAVE_PALETTE_POSITION.len() + 2) {
		let color_index = slave_placement_index(color_counter) % color_number;
		let pos = SLAVE_PALETTE_POSITION[color_counter - 2];
		let positions = [
			Vector2::new(pos.x, pos.y),
			Vector2::new(width - 1 - pos.y, pos.x),
			Vector2::new(width - 1 - pos.x, height - 1 - pos.y),
			Vector2::new(pos.y, height - 1 - pos.x),
		];
		for (p_index, p) in positions.iter().enumerate() {
			write_color_palette(matrix, symbol, p_index, color_index, p.x, p.y);
			data_map[(p.y * width + p.x) as usize] = true;
		}
	}

	if color_number > 64 {
		interpolate_palette(&mut symbol.palette, color_number);
	}
}

/// Index of the corner palette closest to `(x, y)`.
fn nearest_palette(width: i32, height: i32, x: i32, y: i32) -> usize {
	let d = DISTANCE_TO_BORDER;
	let anchors = [
		Vector2::new(d - 1 + 3, d - 1),
		Vector2::new(width - d - 3, d - 1),
		Vector2::new(width - d - 3, height - d),
		Vector2::new(d - 1 + 3, height - d),
	];
	let mut min = f32::MAX;
	let mut p_index = 0;
	for (i, a) in anchors.iter().enumerate() {
		let dist = Point::new(x as f32, y as f32).distance_to(Point::new(a.x as f32, a.y as f32));
		if dist < min {
			min = dist;
			p_index = i;
		}
	}
	p_index
}

/// Normalized palette entries: RGB over the channel maximum plus
/// luminance, four values per color.
fn normalize_color_palette(symbol: &DecodedSymbol, color_number: usize) -> Vec<f32> {
	let mut norm = vec![0f32; color_number * 4 * COLOR_PALETTE_NUMBER];
	for i in 0..color_number * COLOR_PALETTE_NUMBER {
		let r = symbol.palette[i * 3];
		let g = symbol.palette[i * 3 + 1];
		let b = symbol.palette[i * 3 + 2];
		let max = f32::from(r.max(g).max(b)).max(1.0);
		norm[i * 4] = f32::from(r) / max;
		norm[i * 4 + 1] = f32::from(g) / max;
		norm[i * 4 + 2] = f32::from(b) / max;
		norm[i * 4 + 3] = (f32::from(r) + f32::from(g) + f32::from(b)) / 3.0 / 255.0;
	}
	norm
}

/// Per-channel black cutoff thresholds of one corner palette.
fn palette_threshold(palette: &[u8], color_number: usize) -> [f32; 3] {
	match color_number {
		4 => {
			let cpr0 = palette[0].max(palette[3]);
			let cpr1 = palette[6].min(palette[9]);
			let cpg0 = palette[1].max(palette[7]);
			let cpg1 = palette[4].min(palette[10]);
			let cpb0 = palette[8].max(palette[11]);
			let cpb1 = palette[2].min(palette[5]);
			[
				(u32::from(cpr0) + u32::from(cpr1)) as f32 / 2.0,
				(u32::from(cpg0) + u32::from(cpg1)) as f32 / 2.0,
				(u32::from(cpb0) + u32::from(cpb1)) as f32 / 2.0,
			]
		}
		8 => {
			let cpr0 = palette[0].max(palette[3]).max(palette[6]).max(palette[9]);
			let cpr1 = palette[12].min(palette[15]).min(palette[18]).min(palette[21]);
			let cpg0 = palette[1].max(palette[4]).max(palette[13]).max(palette[16]);
			let cpg1 = palette[7].min(palette[10]).min(palette[19]).min(palette[22]);
			let cpb0 = palette[2].max(palette[8]).max(palette[14]).max(palette[20]);
			let cpb1 = palette[5].min(palette[11]).min(palette[17]).min(palette[23]);
			[
				(u32::from(cpr0) + u32::from(cpr1)) as f32 / 2.0,
				(u32::from(cpg0) + u32::from(cpg1)) as f32 / 2.0,
				(u32::from(cpb0) + u32::from(cpb1)) as f32 / 2.0,
			]
		}
		// larger palettes rely on normalized matching alone
		_ => [0.0; 3],
	}
}

/// Hard-decision classification of the module at `(x, y)`.
fn decode_module_hd(
	matrix: &Bitmap,
	palette: Option<&[u8]>,
	color_number: usize,
	norm_palette: &[f32],
	pal_ths: &[[f32; 3]; COLOR_PALETTE_NUMBER],
	x: i32,
	y: i32,
) -> u8 {
	let p_index = nearest_palette(matrix.width() as i32, matrix.height() as i32, x, y);
	let rgb = matrix.rgb_at(x as usize, y as usize);

	// black cutoff
	if f32::from(rgb[0]) < pal_ths[p_index][0]
		&& f32::from(rgb[1]) < pal_ths[p_index][1]
		&& f32::from(rgb[2]) < pal_ths[p_index][2]
	{
		return 0;
	}

	let Some(palette) = palette else {
		// no palette: classify as black or white
		let bright = rgb.iter().filter(|&&c| c > 100).count();
		return u8::from(bright > 1);
	};

	let rgb_max = f32::from(rgb[0].max(rgb[1]).max(rgb[2])).max(1.0);
	let r = f32::from(rgb[0]) / rgb_max;
	let g = f32::from(rgb[1]) / rgb_max;
	let b = f32::from(rgb[2]) / rgb_max;
	// the luminance component separates palette colors that only differ
	// by a scale factor
	let l = (f32::from(rgb[0]) + f32::from(rgb[1]) + f32::from(rgb[2])) / 3.0 / 255.0;

	let mut min1 = f32::MAX;
	let mut min2 = f32::MAX;
	let mut index1 = 0usize;
	let mut index2 = 0usize;
	for i in 0..color_number {
		let base = color_number * 4 * p_index + i * 4;
		let pr = norm_palette[base];
		let pg = norm_palette[base + 1];
		let pb = norm_palette[base + 2];
		let pl = norm_palette[base + 3];
		let diff = (pr - r) * (pr - r)
			+ (pg - g) * (pg - g)
			+ (pb - b) * (pb - b)
			+ (pl - l) * (pl - l);
		if diff < min1 {
			min2 = min1;
			index2 = index1;
			min1 = diff;
			index1 = i;
		} else if diff < min2 {
			min2 = diff;
			index2 = i;
		}
	}
	let _ = (min2, index2);

	// black and white both normalize to (1, 1, 1): separate them by
	// comparing the raw channel sum against the palette midpoint
	if color_number == 8 && (index1 == 0 || index1 == 7) {
		let rgb_sum: u32 = rgb.iter().map(|&c| u32::from(c)).sum();
		let base = color_number * 3 * p_index;
		let p0_sum: u32 = palette[base..base + 3].iter().map(|&c| u32::from(c)).sum();
		let p7_sum: u32 =
			palette[base + 21..base + 24].iter().map(|&c| u32::from(c)).sum();
		index1 = if rgb_sum < (p0_sum + p7_sum) / 2 {
			0
		} else {
			7
		};
	}
	index1 as u8
}

/// Classifies a metadata Part I module into {black, cyan, yellow}.
fn decode_module_nc(rgb: [u8; 3]) -> u8 {
	let ths_black = 80u8;
	let ths_std = 0.08f64;
	if rgb[0] < ths_black && rgb[1] < ths_black && rgb[2] < ths_black {
		return 0;
	}
	let (_, var) = crate::detector::binarizer::ave_var(&rgb);
	let (index_min, index_mid, index_max) = crate::detector::binarizer::min_mid_max(&rgb);
	let std = var.sqrt() / f64::from(rgb[index_max].max(1));
	if std > ths_std {
		let mut bit = [0u8; 3];
		bit[index_max] = 1;
		bit[index_min] = 0;
		let r1 = f64::from(rgb[index_mid]) / f64::from(rgb[index_min].max(1));
		let r2 = f64::from(rgb[index_max]) / f64::from(rgb[index_mid].max(1));
		bit[index_mid] = u8::from(r1 > r2);
		(bit[0] << 2) + (bit[1] << 1) + bit[2]
	} else {
		// colorless but not black: white
		7
	}
}

/// Decodes the three Nc bits carried by a pair of module colors.
fn decode_nc_module_color(module1: u8, module2: u8) -> Option<u8> {
	nc_color_decode(module1, module2)
}

/// Decodes master metadata Part I; `Err(Abort)` triggers the default-mode
/// fallback, `Err(Retry)` gives up on the symbol.
fn decode_master_metadata_part1(
	matrix: &Bitmap,
	symbol: &mut DecodedSymbol,
	data_map: &mut [bool],
	cursor: &mut MetadataCursor,
	rng: &mut SmallRng,
) -> Result<(), SymbolFailure> {
	let width = matrix.width() as i32;
	let height = matrix.height() as i32;
	let mut module_color = [0u8; MASTER_METADATA_PART1_MODULE_NUMBER];

	for slot in module_color.iter_mut() {
		let rgb = matrix.rgb_at(cursor.x as usize, cursor.y as usize);
		let color = decode_module_nc(rgb);
		if color != 0 && color != 3 && color != 6 {
			log::debug!("invalid module color in master metadata Part I");
			return Err(SymbolFailure::Abort);
		}
		*slot = color;
		data_map[(cursor.y * width + cursor.x) as usize] = true;
		cursor.advance(height, width);
	}

	let first = decode_nc_module_color(module_color[0], module_color[1])
		.ok_or(SymbolFailure::Abort)?;
	let second = decode_nc_module_color(module_color[2], module_color[3])
		.ok_or(SymbolFailure::Abort)?;

	let mut part1 = [0u8; MASTER_METADATA_PART1_LENGTH];
	for (n, bits) in [first, second].into_iter().enumerate() {
		for i in 0..3 {
			part1[n * 3 + i] = (bits >> (2 - i)) & 1;
		}
	}

	let wc = if MASTER_METADATA_PART1_LENGTH > 36 {
		4
	} else {
		3
	};
	if ldpc::decode_hd(&mut part1, MASTER_METADATA_PART1_LENGTH, wc, 0, rng).is_none() {
		log::debug!("LDPC decoding of master metadata Part I failed");
		return Err(SymbolFailure::Retry);
	}
	symbol.metadata.nc = (part1[0] << 2) + (part1[1] << 1) + part1[2];
	Ok(())
}

/// Decodes master metadata Part II.
fn decode_master_metadata_part2(
	matrix: &Bitmap,
	symbol: &mut DecodedSymbol,
	data_map: &mut [bool],
	norm_palette: &[f32],
	pal_ths: &[[f32; 3]; COLOR_PALETTE_NUMBER],
	cursor: &mut MetadataCursor,
	rng: &mut SmallRng,
) -> Result<(), SymbolFailure> {
	let width = matrix.width() as i32;
	let height = matrix.height() as i32;
	let color_number = symbol.metadata.color_number();
	let bits_per_module = symbol.metadata.bits_per_module();

	let mut part2 = [0u8; MASTER_METADATA_PART2_LENGTH];
	let mut part2_bit_count = 0usize;
	while part2_bit_count < MASTER_METADATA_PART2_LENGTH {
		let bits = decode_module_hd(
			matrix,
			Some(&symbol.palette),
			color_number,
			norm_palette,
			pal_ths,
			cursor.x,
			cursor.y,
		);
		for i in 0..bits_per_module {
			if part2_bit_count < MASTER_METADATA_PART2_LENGTH {
				part2[part2_bit_count] = (bits >> (bits_per_module - 1 - i)) & 1;
				part2_bit_count += 1;
			} else {
				break;
			}
		}
		data_map[(cursor.y * width + cursor.x) as usize] = true;
		cursor.advance(height, width);
	}

	let wc = if MASTER_METADATA_PART2_LENGTH > 36 {
		4
	} else {
		3
	};
	if ldpc::decode_hd(&mut part2, MASTER_METADATA_PART2_LENGTH, wc, 0, rng).is_none() {
		// unreadable Part II usually means Part I was misread on a
		// default-mode symbol; fall back rather than give up
		log::debug!("LDPC decoding of master metadata Part II failed");
		return Err(SymbolFailure::Abort);
	}

	// V: 5 bits per axis
	let mut vx = 0i32;
	for i in 0..5 {
		vx += i32::from(part2[i]) << (4 - i);
	}
	let mut vy = 0i32;
	for i in 0..5 {
		vy += i32::from(part2[5 + i]) << (4 - i);
	}
	symbol.metadata.side_version = Vector2::new(vx + 1, vy + 1);

	// E: wc and wr
	let mut e1 = 0i32;
	for i in 0..3 {
		e1 += i32::from(part2[10 + i]) << (2 - i);
	}
	let mut e2 = 0i32;
	for i in 0..3 {
		e2 += i32::from(part2[13 + i]) << (2 - i);
	}
	symbol.metadata.ecl = Vector2::new(e1 + 3, e2 + 4);

	// MSK
	symbol.metadata.mask_type = (part2[16] << 2) + (part2[17] << 1) + part2[18];
	symbol.metadata.docked_position = 0;

	// the sampled matrix must match the declared side version
	symbol.side_size = Vector2::new(
		version_to_size(symbol.metadata.side_version.x),
		version_to_size(symbol.metadata.side_version.y),
	);
	if matrix.width() as i32 != symbol.side_size.x || matrix.height() as i32 != symbol.side_size.y
	{
		log::debug!("master symbol matrix size does not match the metadata");
		return Err(SymbolFailure::Retry);
	}
	if symbol.metadata.ecl.x >= symbol.metadata.ecl.y {
		log::debug!("invalid error correction parameter in master metadata");
		return Err(SymbolFailure::Abort);
	}
	Ok(())
}

/// Marks finder and alignment pattern modules as reserved.
fn fill_data_map(data_map: &mut [bool], width: i32, height: i32, is_master: bool) {
	let ver_x = (size_to_version(width) - 1) as usize;
	let ver_y = (size_to_version(height) - 1) as usize;
	let number_x = AP_NUM[ver_x];
	let number_y = AP_NUM[ver_y];
	let mut mark = |x: i32, y: i32| {
		data_map[(y * width + x) as usize] = true;
	};

	for i in 0..number_y {
		for j in 0..number_x {
			let x = AP_POS[ver_x][j] - 1;
			let y = AP_POS[ver_y][i] - 1;
			// the cross
			mark(x, y);
			mark(x - 1, y);
			mark(x + 1, y);
			mark(x, y - 1);
			mark(x, y + 1);

			if i == 0 && (j == 0 || j == number_x - 1) {
				// finder pattern 0 and 1 corners
				mark(x - 1, y - 1);
				mark(x + 1, y + 1);
				if is_master {
					mark(x - 2, y - 2);
					mark(x - 1, y - 2);
					mark(x, y - 2);
					mark(x - 2, y - 1);
					mark(x - 2, y);
					mark(x + 2, y + 2);
					mark(x + 1, y + 2);
					mark(x, y + 2);
					mark(x + 2, y + 1);
					mark(x + 2, y);
				}
			} else if i == number_y - 1 && (j == 0 || j == number_x - 1) {
				// finder pattern 2 and 3 corners
				mark(x + 1, y - 1);
				mark(x - 1, y + 1);
				if is_master {
					mark(x + 2, y - 2);
					mark(x + 1, y - 2);
					mark(x, y - 2);
					mark(x + 2, y - 1);
					mark(x + 2, y);
					mark(x - 2, y + 2);
					mark(x - 1, y + 2);
					mark(x, y + 2);
					mark(x - 2, y + 1);
					mark(x - 2, y);
				}
			} else if (i % 2) == (j % 2) {
				mark(x - 1, y - 1);
				mark(x + 1, y + 1);
			} else {
				mark(x + 1, y - 1);
				mark(x - 1, y + 1);
			}
		}
	}
}

/// Loads the implicit metadata of a default-mode master symbol.
fn load_default_master_metadata(matrix: &Bitmap, symbol: &mut DecodedSymbol) {
	log::debug!("falling back to default master metadata");
	let (wc, wr) = ECC_LEVEL_TO_WCWR[DEFAULT_ECC_LEVEL];
	symbol.metadata.default_mode = true;
	symbol.metadata.nc = DEFAULT_MODULE_COLOR_MODE;
	symbol.metadata.ecl = Vector2::new(wc, wr);
	symbol.metadata.mask_type = DEFAULT_MASKING_REFERENCE;
	symbol.metadata.docked_position = 0;
	symbol.metadata.side_version = Vector2::new(
		size_to_version(matrix.width() as i32),
		size_to_version(matrix.height() as i32),
	);
}

/// Reads every data module value in column-major order.
fn read_raw_module_data(
	matrix: &Bitmap,
	symbol: &DecodedSymbol,
	data_map: &[bool],
	norm_palette: &[f32],
	pal_ths: &[[f32; 3]; COLOR_PALETTE_NUMBER],
) -> Vec<u8> {
	let color_number = symbol.metadata.color_number();
	let width = matrix.width() as i32;
	let height = matrix.height() as i32;
	let mut data = Vec::with_capacity((width * height) as usize);
	for j in 0..width {
		for i in 0..height {
			if !data_map[(i * width + j) as usize] {
				data.push(decode_module_hd(
					matrix,
					Some(&symbol.palette),
					color_number,
					norm_palette,
					pal_ths,
					j,
					i,
				));
			}
		}
	}
	data
}

/// Expands module values into one bit per byte.
fn raw_module_data_to_bits(raw: &[u8], bits_per_module: usize) -> Vec<u8> {
	let mut bits = Vec::with_capacity(raw.len() * bits_per_module);
	for &value in raw {
		for j in (0..bits_per_module).rev() {
			bits.push((value >> j) & 1);
		}
	}
	bits
}

/// Parses the metadata of one docked slave from the host's payload tail.
///
/// Returns the number of consumed bits.
fn decode_slave_metadata(
	symbol: &mut DecodedSymbol,
	docked_position: usize,
	data: &[u8],
	offset: i64,
) -> Option<usize> {
	let host = symbol.metadata;
	let slave = &mut symbol.slave_metadata[docked_position];
	slave.nc = host.nc;
	slave.mask_type = host.mask_type;
	slave.docked_position = 0;

	let mut index = offset;
	let read = |data: &[u8], index: &mut i64| -> Option<u8> {
		if *index < 0 {
			return None;
		}
		let bit = *data.get(*index as usize)?;
		*index -= 1;
		Some(bit)
	};

	let ss = read(data, &mut index)?;
	if ss == 0 {
		slave.side_version = host.side_version;
	}
	let se = read(data, &mut index)?;
	if se == 0 {
		slave.ecl = host.ecl;
	}

	if ss == 1 {
		let mut v = 0i32;
		for i in 0..5 {
			v += i32::from(read(data, &mut index)?) << (4 - i);
		}
		let side_version = v + 1;
		if docked_position == 2 || docked_position == 3 {
			slave.side_version = Vector2::new(side_version, host.side_version.y);
		} else {
			slave.side_version = Vector2::new(host.side_version.x, side_version);
		}
	}
	if se == 1 {
		let mut e1 = 0i32;
		for i in 0..3 {
			e1 += i32::from(read(data, &mut index)?) << (2 - i);
		}
		let mut e2 = 0i32;
		for i in 0..3 {
			e2 += i32::from(read(data, &mut index)?) << (2 - i);
		}
		slave.ecl = Vector2::new(e1 + 3, e2 + 4);
		if slave.ecl.x >= slave.ecl.y {
			log::debug!("invalid error correction parameter in slave metadata");
			return None;
		}
	}
	Some((offset - index) as usize)
}

/// Decodes the data content of a sampled symbol matrix.
fn decode_symbol(
	matrix: &Bitmap,
	symbol: &mut DecodedSymbol,
	mut data_map: Vec<bool>,
	norm_palette: &[f32],
	pal_ths: &[[f32; 3]; COLOR_PALETTE_NUMBER],
	is_slave: bool,
	rng: &mut SmallRng,
) -> Result<(), SymbolFailure> {
	let width = matrix.width() as i32;
	let height = matrix.height() as i32;
	fill_data_map(&mut data_map, width, height, !is_slave);

	let mut raw_module_data =
		read_raw_module_data(matrix, symbol, &data_map, norm_palette, pal_ths);

	demask_symbol(
		&mut raw_module_data,
		&data_map,
		symbol.side_size,
		symbol.metadata.mask_type,
		symbol.metadata.color_number(),
	);

	let mut raw_data = raw_module_data_to_bits(&raw_module_data, symbol.metadata.bits_per_module());

	let wc = symbol.metadata.ecl.x;
	let wr = symbol.metadata.ecl.y;
	let pg = (raw_data.len() / wr as usize) * wr as usize;
	let pn = pg * (wr - wc) as usize / wr as usize;

	// drop the padding bits and deinterleave
	raw_data.truncate(pg);
	deinterleave(&mut raw_data);

	if ldpc::decode_hd(&mut raw_data, pg, wc, wr, rng) != Some(pn) {
		log::debug!("LDPC decoding of symbol {} data failed", symbol.index);
		return Err(SymbolFailure::Retry);
	}

	// scan backwards for the metadata flag bit
	let mut metadata_offset = pn as i64 - 1;
	while metadata_offset >= 0 && raw_data[metadata_offset as usize] == 0 {
		metadata_offset -= 1;
	}
	if metadata_offset < 0 {
		return Err(SymbolFailure::Retry);
	}
	// skip the flag
	metadata_offset -= 1;

	// docked positions
	symbol.metadata.docked_position = 0;
	for i in 0..4 {
		if is_slave && i == symbol.host_position {
			continue;
		}
		if metadata_offset < 0 {
			return Err(SymbolFailure::Retry);
		}
		symbol.metadata.docked_position +=
			raw_data[metadata_offset as usize] << (3 - i);
		metadata_offset -= 1;
	}

	// metadata of the docked slaves
	for i in 0..4 {
		if symbol.metadata.docked_position & (0x08 >> i) != 0 {
			let read = decode_slave_metadata(symbol, i, &raw_data, metadata_offset)
				.ok_or(SymbolFailure::Abort)?;
			metadata_offset -= read as i64;
		}
	}

	let net_data_length = (metadata_offset + 1) as usize;
	raw_data.truncate(net_data_length);
	symbol.data = raw_data;
	Ok(())
}

/// Decodes a sampled master symbol matrix.
pub(crate) fn decode_master(
	matrix: &Bitmap,
	symbol: &mut DecodedSymbol,
	rng: &mut SmallRng,
) -> Result<(), SymbolFailure> {
	let width = matrix.width() as i32;
	let height = matrix.height() as i32;

	// first pass trusts the embedded metadata; a second pass assumes the
	// default configuration when the metadata turns out unreadable
	for use_default in [false, true] {
		let mut data_map = vec![false; (width * height) as usize];
		let mut cursor = MetadataCursor::new();

		let mut part1_ok = false;
		if use_default {
			load_default_master_metadata(matrix, symbol);
		} else {
			match decode_master_metadata_part1(matrix, symbol, &mut data_map, &mut cursor, rng) {
				Ok(()) => part1_ok = true,
				Err(SymbolFailure::Retry) => return Err(SymbolFailure::Retry),
				// unreadable Part I: restart assuming the default mode
				Err(SymbolFailure::Abort) => continue,
			}
		}

		read_color_palette_in_master(matrix, symbol, &mut data_map, &mut cursor);

		let color_number = symbol.metadata.color_number();
		let norm_palette = normalize_color_palette(symbol, color_number);
		let mut pal_ths = [[0f32; 3]; COLOR_PALETTE_NUMBER];
		for (i, ths) in pal_ths.iter_mut().enumerate() {
			*ths = palette_threshold(
				&symbol.palette[color_number * 3 * i..color_number * 3 * (i + 1)],
				color_number,
			);
		}

		if part1_ok {
			match decode_master_metadata_part2(
				matrix,
				symbol,
				&mut data_map,
				&norm_palette,
				&pal_ths,
				&mut cursor,
				rng,
			) {
				Ok(()) => {}
				Err(SymbolFailure::Retry) => return Err(SymbolFailure::Retry),
				// a garbled Part II after a suspicious Part I usually
				// means the symbol never carried metadata at all
				Err(SymbolFailure::Abort) => continue,
			}
		}

		return decode_symbol(matrix, symbol, data_map, &norm_palette, &pal_ths, false, rng);
	}
	Err(SymbolFailure::Abort)
}

/// Decodes a sampled slave symbol matrix.
pub(crate) fn decode_slave(
	matrix: &Bitmap,
	symbol: &mut DecodedSymbol,
	rng: &mut SmallRng,
) -> Result<(), SymbolFailure> {
	let width = matrix.width() as i32;
	let height = matrix.height() as i32;
	let mut data_map = vec![false; (width * height) as usize];

	read_color_palette_in_slave(matrix, symbol, &mut data_map);

	let color_number = symbol.metadata.color_number();
	let norm_palette = normalize_color_palette(symbol, color_number);
	let mut pal_ths = [[0f32; 3]; COLOR_PALETTE_NUMBER];
	for (i, ths) in pal_ths.iter_mut().enumerate() {
		*ths = palette_threshold(
			&symbol.palette[color_number * 3 * i..color_number * 3 * (i + 1)],
			color_number,
		);
	}

	decode_symbol(matrix, symbol, data_map, &norm_palette, &pal_ths, true, rng)
}
