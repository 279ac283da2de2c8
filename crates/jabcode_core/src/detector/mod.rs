//! Code detection.
//!
//! Locates the four colored finder patterns of the master symbol on the
//! binarized channels, estimates the symbol geometry, samples the module
//! grid through a perspective transform and hands the result to the
//! decoder. Docked slave symbols are found recursively from their host's
//! metadata.

pub(crate) mod binarizer;
pub(crate) mod sample;
pub(crate) mod transform;

use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::bitmap::Bitmap;
use crate::color::{DEFAULT_PALETTE, AP_CORE_COLOR, APX_CORE_COLOR, FP0_CORE_COLOR, FP2_CORE_COLOR, FP3_CORE_COLOR};
use crate::decoder::{DecodedSymbol, SymbolFailure, decode_master, decode_slave};
use crate::error::{DecodeError, DecodeStatus};
use crate::geometry::{Point, Vector2};
use crate::tables::{AP_NUM, AP_POS, DISTANCE_TO_BORDER, MAX_SYMBOL_NUMBER, version_to_size};

use binarizer::{balance_rgb, binarize_rgb};
use sample::sample_symbol;
use transform::{perspective_transform, symbol_transform};

const MAX_FINDER_PATTERNS: usize = 200;

/// Finder pattern types; the corner assignment is fixed.
const FP0: usize = 0;
const FP1: usize = 1;
const FP2: usize = 2;
const FP3: usize = 3;
/// Interior alignment pattern type.
const APX: usize = 4;

/// Decoding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
	/// Fail unless every symbol decodes.
	Normal,
	/// Return the decodable prefix when some symbols fail.
	Compatible,
}

/// Decoder output.
#[derive(Debug, Clone)]
pub struct Decoded {
	/// The recovered payload bytes.
	pub payload: Vec<u8>,
	/// Whether every symbol contributed.
	pub status: DecodeStatus,
}

/// A finder or alignment pattern candidate.
#[derive(Debug, Clone, Copy, Default)]
struct Pattern {
	kind: usize,
	module_size: f32,
	center: Point,
	found_count: i32,
	direction: i32,
}

/// Validates the 1:1:1:1:1 layer proportion of a five-state scanline.
fn check_pattern_cross(state_count: &[i32; 5]) -> Option<f32> {
	let inside: i32 = state_count[1..4].iter().sum();
	if state_count[1] == 0 || state_count[2] == 0 || state_count[3] == 0 {
		return None;
	}
	let layer_size = inside as f32 / 3.0;
	let tolerance = layer_size / 2.0;
	let ok = (layer_size - state_count[1] as f32).abs() < tolerance
		&& (layer_size - state_count[2] as f32).abs() < tolerance
		&& (layer_size - state_count[3] as f32).abs() < tolerance
		&& state_count[0] as f32 > 0.5 * tolerance
		&& state_count[4] as f32 > 0.5 * tolerance
		&& ((state_count[1] - state_count[3]) as f32).abs() < tolerance;
	ok.then_some(layer_size)
}

fn check_module_size2(size1: f32, size2: f32) -> bool {
	let mean = (size1 + size2) / 2.0;
	let tolerance = mean / 2.5;
	(mean - size1).abs() < tolerance && (mean - size2).abs() < tolerance
}

/// Finds the next five-run cross candidate on a horizontal scanline.
fn seek_pattern_horizontal(
	row: &[u8],
	startx: &mut i32,
	endx: &mut i32,
	centerx: &mut f32,
	module_size: &mut f32,
	skip: &mut i32,
) -> bool {
	let state_number = 5usize;
	let mut cur_state = 0usize;
	let mut state_count = [0i32; 5];

	let min = *startx;
	let max = *endx;
	for j in min..max {
		if j == min {
			state_count[cur_state] += 1;
			*startx = j;
			continue;
		}
		if row[j as usize] == row[(j - 1) as usize] {
			state_count[cur_state] += 1;
		}
		if row[j as usize] != row[(j - 1) as usize] || j == max - 1 {
			if cur_state < state_number - 1 {
				if state_count[cur_state] < 3 {
					if cur_state == 0 {
						state_count[cur_state] = 1;
						*startx = j;
					} else {
						// merge the short run into the previous state
						state_count[cur_state - 1] += state_count[cur_state];
						state_count[cur_state] = 0;
						cur_state -= 1;
						state_count[cur_state] += 1;
					}
				} else {
					cur_state += 1;
					state_count[cur_state] += 1;
				}
			} else {
				if state_count[cur_state] < 3 {
					state_count[cur_state - 1] += state_count[cur_state];
					state_count[cur_state] = 0;
					cur_state -= 1;
					state_count[cur_state] += 1;
					continue;
				}
				if let Some(size) = check_pattern_cross(&state_count) {
					*endx = j + 1;
					*skip = state_count[0];
					let end = if j == max - 1 && row[j as usize] == row[(j - 1) as usize] {
						j + 1
					} else {
						j
					};
					*centerx = (end - state_count[4] - state_count[3]) as f32
						- state_count[2] as f32 / 2.0;
					*module_size = size;
					return true;
				}
				// shift the state window and keep scanning
				*startx += state_count[0];
				for k in 0..state_number - 1 {
					state_count[k] = state_count[k + 1];
				}
				state_count[state_number - 1] = 1;
				cur_state = state_number - 1;
			}
		}
	}
	*endx = max;
	false
}

/// Finds the next five-run cross candidate on a vertical scanline.
fn seek_pattern_vertical(
	ch: &Bitmap,
	col: i32,
	starty: &mut i32,
	endy: &mut i32,
	centery: &mut f32,
	module_size: &mut f32,
	skip: &mut i32,
) -> bool {
	let state_number = 5usize;
	let mut cur_state = 0usize;
	let mut state_count = [0i32; 5];

	let min = *starty;
	let max = *endy;
	for p in min..max {
		if p == min {
			state_count[cur_state] += 1;
			*starty = p;
			continue;
		}
		let prev = ch.gray_at(col as usize, (p - 1) as usize);
		let curr = ch.gray_at(col as usize, p as usize);
		if curr == prev {
			state_count[cur_state] += 1;
		}
		if curr != prev || p == max - 1 {
			if cur_state < state_number - 1 {
				if state_count[cur_state] < 3 {
					if cur_state == 0 {
						state_count[cur_state] = 1;
						*starty = p;
					} else {
						state_count[cur_state - 1] += state_count[cur_state];
						state_count[cur_state] = 0;
						cur_state -= 1;
						state_count[cur_state] += 1;
					}
				} else {
					cur_state += 1;
					state_count[cur_state] += 1;
				}
			} else {
				if state_count[cur_state] < 3 {
					state_count[cur_state - 1] += state_count[cur_state];
					state_count[cur_state] = 0;
					cur_state -= 1;
					state_count[cur_state] += 1;
					continue;
				}
				if let Some(size) = check_pattern_cross(&state_count) {
					*endy = p + 1;
					*skip = state_count[0];
					let end = if p == max - 1 && curr == prev {
						p + 1
					} else {
						p
					};
					*centery = (end - state_count[4] - state_count[3]) as f32
						- state_count[2] as f32 / 2.0;
					*module_size = size;
					return true;
				}
				*starty += state_count[0];
				for k in 0..state_number - 1 {
					state_count[k] = state_count[k + 1];
				}
				state_count[state_number - 1] = 1;
				cur_state = state_number - 1;
			}
		}
	}
	*endy = max;
	false
}

/// Walks a five-state window outward from the center along one direction.
///
/// Returns the covered distance, or `None` when the window never
/// completes.
fn walk_states(
	sample: impl Fn(i32) -> Option<u8>,
	state_count: &mut [i32; 5],
	descending: bool,
) -> Option<i32> {
	let state_middle = 2usize;
	let mut state_index = 0usize;
	let mut i = 1i32;
	loop {
		let (Some(curr), Some(prev)) = (sample(i), sample(i - 1)) else {
			break;
		};
		let slot = if descending {
			state_middle - state_index
		} else {
			state_middle + state_index
		};
		if curr == prev {
			state_count[slot] += 1;
		} else if state_index > 0 && state_count[slot] < 3 {
			let merge = if descending {
				state_middle - (state_index - 1)
			} else {
				state_middle + (state_index - 1)
			};
			state_count[merge] += state_count[slot];
			state_count[slot] = 0;
			state_index -= 1;
			let back = if descending {
				state_middle - state_index
			} else {
				state_middle + state_index
			};
			state_count[back] += 1;
		} else {
			state_index += 1;
			if state_index > state_middle {
				break;
			}
			let slot = if descending {
				state_middle - state_index
			} else {
				state_middle + state_index
			};
			state_count[slot] += 1;
		}
		i += 1;
	}
	if state_index < state_middle {
		None
	} else {
		Some(i)
	}
}

/// Cross checks a candidate vertically; returns the refined center y.
fn cross_check_pattern_vertical(
	ch: &Bitmap,
	module_size_max: f32,
	centerx: f32,
	centery: &mut f32,
	module_size: &mut f32,
) -> bool {
	let centerx_int = centerx as i32;
	let centery_int = *centery as i32;
	let mut state_count = [0i32; 5];
	state_count[1] += 1;

	let up = walk_states(
		|i| {
			let y = centery_int - i;
			(y >= 0 && centerx_int >= 0 && (centerx_int as usize) < ch.width())
				.then(|| ch.gray_at(centerx_int as usize, y as usize))
		},
		&mut state_count,
		true,
	);
	if up.is_none() {
		return false;
	}
	let down = walk_states(
		|i| {
			let y = centery_int + i;
			((y as usize) < ch.height()).then(|| ch.gray_at(centerx_int as usize, y as usize))
		},
		&mut state_count,
		false,
	);
	let Some(i) = down else {
		return false;
	};

	if let Some(size) = check_pattern_cross(&state_count) {
		if size <= module_size_max {
			*module_size = size;
			*centery = (centery_int + i - state_count[4] - state_count[3]) as f32
				- state_count[2] as f32 / 2.0;
			return true;
		}
	}
	false
}

/// Cross checks a candidate horizontally; returns the refined center x.
fn cross_check_pattern_horizontal(
	ch: &Bitmap,
	module_size_max: f32,
	centerx: &mut f32,
	centery: f32,
	module_size: &mut f32,
) -> bool {
	let startx = *centerx as i32;
	let row_y = centery as i32;
	if row_y < 0 || row_y as usize >= ch.height() {
		return false;
	}
	let mut state_count = [0i32; 5];
	state_count[2] += 1;

	let left = walk_states(
		|i| {
			let x = startx - i;
			(x >= 0).then(|| ch.gray_at(x as usize, row_y as usize))
		},
		&mut state_count,
		true,
	);
	if left.is_none() {
		return false;
	}
	let right = walk_states(
		|i| {
			let x = startx + i;
			((x as usize) < ch.width()).then(|| ch.gray_at(x as usize, row_y as usize))
		},
		&mut state_count,
		false,
	);
	let Some(i) = right else {
		return false;
	};

	if let Some(size) = check_pattern_cross(&state_count) {
		if size <= module_size_max {
			*module_size = size;
			*centerx = (startx + i - state_count[4] - state_count[3]) as f32
				- state_count[2] as f32 / 2.0;
			return true;
		}
	}
	false
}

/// Cross checks a candidate along its diagonals.
///
/// Returns the number of confirmed diagonal scanlines and updates the
/// direction: +1 or -1 for a single diagonal, 2 when both validate.
fn cross_check_pattern_diagonal(
	ch: &Bitmap,
	kind: usize,
	module_size_max: f32,
	centerx: &mut f32,
	centery: &mut f32,
	module_size: &mut f32,
	dir: &mut i32,
	both_dir: bool,
) -> i32 {
	let mut offset_x;
	let offset_y = -1i32;
	let fix_dir = *dir != 0;
	if fix_dir {
		if *dir > 0 {
			offset_x = -1;
			*dir = 1;
		} else {
			offset_x = 1;
			*dir = -1;
		}
	} else if kind == FP0 || kind == FP1 {
		offset_x = -1;
		*dir = 1;
	} else {
		offset_x = 1;
		*dir = -1;
	}

	let mut confirmed = 0;
	let mut try_count = 0;
	let mut tmp_module_size = 0f32;
	loop {
		let mut flag = false;
		try_count += 1;

		let startx = *centerx as i32;
		let starty = *centery as i32;
		let mut state_count = [0i32; 5];
		state_count[2] += 1;

		let forward = walk_states(
			|i| {
				let x = startx + i * offset_x;
				let y = starty + i * offset_y;
				(x >= 0 && y >= 0 && (x as usize) < ch.width() && (y as usize) < ch.height())
					.then(|| ch.gray_at(x as usize, y as usize))
			},
			&mut state_count,
			true,
		);
		if forward.is_none() {
			if try_count == 1 {
				flag = true;
				offset_x = -offset_x;
				*dir = -*dir;
			} else {
				return confirmed;
			}
		}

		let mut i_end = 0i32;
		if !flag {
			let backward = walk_states(
				|i| {
					let x = startx - i * offset_x;
					let y = starty - i * offset_y;
					(x >= 0 && y >= 0 && (x as usize) < ch.width() && (y as usize) < ch.height())
						.then(|| ch.gray_at(x as usize, y as usize))
				},
				&mut state_count,
				false,
			);
			match backward {
				Some(i) => i_end = i,
				None => {
					if try_count == 1 {
						flag = true;
						offset_x = -offset_x;
						*dir = -*dir;
					} else {
						return confirmed;
					}
				}
			}
		}

		if !flag {
			match check_pattern_cross(&state_count) {
				Some(size) if size <= module_size_max => {
					if tmp_module_size > 0.0 {
						*module_size = (size + tmp_module_size) / 2.0;
					} else {
						*module_size = size;
						tmp_module_size = size;
					}
					*centerx = (startx + i_end - state_count[4] - state_count[3]) as f32
						- state_count[2] as f32 / 2.0;
					*centery = (starty + i_end - state_count[4] - state_count[3]) as f32
						- state_count[2] as f32 / 2.0;
					confirmed += 1;
					if !both_dir || try_count == 2 || fix_dir {
						if confirmed == 2 {
							*dir = 2;
						}
						return confirmed;
					}
				}
				_ => {
					offset_x = -offset_x;
					*dir = -*dir;
				}
			}
		}

		if try_count >= 2 || fix_dir {
			return confirmed;
		}
	}
}

/// Checks that a stroke of `module_number` modules around the center is
/// `color` in the given channel; `dir` 0 horizontal, 1 vertical, 2
/// diagonal.
fn cross_check_color(
	ch: &Bitmap,
	color: u8,
	module_size: i32,
	module_number: i32,
	centerx: i32,
	centery: i32,
	dir: i32,
) -> bool {
	let tolerance = 3i32;
	match dir {
		0 => {
			let length = module_size * (module_number - 1);
			let startx = (centerx - length / 2).max(0);
			let mut unmatch = 0;
			if centery < 0 || centery as usize >= ch.height() {
				return false;
			}
			for j in startx..(startx + length).min(ch.width() as i32) {
				if ch.gray_at(j as usize, centery as usize) != color {
					unmatch += 1;
				} else if unmatch <= tolerance {
					unmatch = 0;
				}
				if unmatch > tolerance {
					return false;
				}
			}
			true
		}
		1 => {
			let length = module_size * (module_number - 1);
			let starty = (centery - length / 2).max(0);
			let mut unmatch = 0;
			if centerx < 0 || centerx as usize >= ch.width() {
				return false;
			}
			for i in starty..(starty + length).min(ch.height() as i32) {
				if ch.gray_at(centerx as usize, i as usize) != color {
					unmatch += 1;
				} else if unmatch <= tolerance {
					unmatch = 0;
				}
				if unmatch > tolerance {
					return false;
				}
			}
			true
		}
		2 => {
			let offset = (module_size as f32 * (module_number as f32 / (2.0 * 1.41421))) as i32;
			let length = offset * 2;

			// one diagonal
			let mut unmatch = 0;
			let startx = (centerx - offset).max(0);
			let starty = (centery - offset).max(0);
			let mut i = 0;
			while i < length && starty + i < ch.height() as i32 {
				if startx + i >= ch.width() as i32 {
					break;
				}
				if ch.gray_at((startx + i) as usize, (starty + i) as usize) != color {
					unmatch += 1;
				} else if unmatch <= tolerance {
					unmatch = 0;
				}
				if unmatch > tolerance {
					break;
				}
				i += 1;
			}
			if unmatch < tolerance {
				return true;
			}

			// the other diagonal
			unmatch = 0;
			let startx = (centerx - offset).max(0);
			let starty = (centery + offset).min(ch.height() as i32 - 1);
			let mut i = 0;
			while i < length && starty - i >= 0 {
				if startx + i >= ch.width() as i32 {
					break;
				}
				if ch.gray_at((startx + i) as usize, (starty - i) as usize) != color {
					unmatch += 1;
				} else if unmatch <= tolerance {
					unmatch = 0;
				}
				if unmatch > tolerance {
					return false;
				}
				i += 1;
			}
			true
		}
		_ => false,
	}
}

/// Cross checks a candidate in one channel across all directions.
fn cross_check_pattern_ch(
	ch: &Bitmap,
	kind: usize,
	h_v: i32,
	module_size_max: f32,
	module_size: &mut f32,
	centerx: &mut f32,
	centery: &mut f32,
	dir: &mut i32,
	dcc: &mut i32,
) -> bool {
	let mut module_size_v = 0f32;
	let mut module_size_h = 0f32;
	let mut module_size_d = 0f32;

	if h_v == 0 {
		let vcc =
			cross_check_pattern_vertical(ch, module_size_max, *centerx, centery, &mut module_size_v);
		if vcc
			&& !cross_check_pattern_horizontal(
				ch,
				module_size_max,
				centerx,
				*centery,
				&mut module_size_h,
			) {
			return false;
		}
		*dcc = cross_check_pattern_diagonal(
			ch,
			kind,
			module_size_max,
			centerx,
			centery,
			&mut module_size_d,
			dir,
			!vcc,
		);
		if vcc && *dcc > 0 {
			*module_size = (module_size_v + module_size_h + module_size_d) / 3.0;
			return true;
		} else if *dcc == 2 {
			if !cross_check_pattern_horizontal(
				ch,
				module_size_max,
				centerx,
				*centery,
				&mut module_size_h,
			) {
				return false;
			}
			*module_size = (module_size_h + module_size_d * 2.0) / 3.0;
			return true;
		}
	} else {
		let hcc =
			cross_check_pattern_horizontal(ch, module_size_max, centerx, *centery, &mut module_size_h);
		if hcc
			&& !cross_check_pattern_vertical(
				ch,
				module_size_max,
				*centerx,
				centery,
				&mut module_size_v,
			) {
			return false;
		}
		*dcc = cross_check_pattern_diagonal(
			ch,
			kind,
			module_size_max,
			centerx,
			centery,
			&mut module_size_d,
			dir,
			!hcc,
		);
		if hcc && *dcc > 0 {
			*module_size = (module_size_v + module_size_h + module_size_d) / 3.0;
			return true;
		} else if *dcc == 2 {
			if !cross_check_pattern_vertical(
				ch,
				module_size_max,
				*centerx,
				centery,
				&mut module_size_v,
			) {
				return false;
			}
			*module_size = (module_size_v + module_size_d * 2.0) / 3.0;
			return true;
		}
	}
	false
}

/// Full cross check of a finder pattern candidate over the channels.
fn cross_check_pattern(ch: &[Bitmap; 3], fp: &mut Pattern, h_v: i32) -> bool {
	let module_size_max = fp.module_size * 2.0;

	// green channel always participates
	let mut module_size_g = 0f32;
	let mut centerx_g = fp.center.x;
	let mut centery_g = fp.center.y;
	let mut dir_g = 0i32;
	let mut dcc_g = 0i32;
	if !cross_check_pattern_ch(
		&ch[1],
		fp.kind,
		h_v,
		module_size_max,
		&mut module_size_g,
		&mut centerx_g,
		&mut centery_g,
		&mut dir_g,
		&mut dcc_g,
	) {
		return false;
	}

	if fp.kind == FP1 || fp.kind == FP2 {
		let mut module_size_r = 0f32;
		let mut centerx_r = fp.center.x;
		let mut centery_r = fp.center.y;
		let mut dir_r = 0i32;
		let mut dcc_r = 0i32;
		if !cross_check_pattern_ch(
			&ch[0],
			fp.kind,
			h_v,
			module_size_max,
			&mut module_size_r,
			&mut centerx_r,
			&mut centery_r,
			&mut dir_r,
			&mut dcc_r,
		) {
			return false;
		}
		if !check_module_size2(module_size_r, module_size_g) {
			return false;
		}
		fp.module_size = (module_size_r + module_size_g) / 2.0;
		fp.center.x = (centerx_r + centerx_g) / 2.0;
		fp.center.y = (centery_r + centery_g) / 2.0;

		let core_blue = DEFAULT_PALETTE[FP2_CORE_COLOR as usize][2];
		for d in 0..3 {
			if !cross_check_color(
				&ch[2],
				core_blue,
				fp.module_size as i32,
				5,
				fp.center.x as i32,
				fp.center.y as i32,
				d,
			) {
				return false;
			}
		}
		fp.direction = if dcc_r == 2 || dcc_g == 2 {
			2
		} else if dir_r + dir_g > 0 {
			1
		} else {
			-1
		};
	}

	if fp.kind == FP0 || fp.kind == FP3 {
		let mut module_size_b = 0f32;
		let mut centerx_b = fp.center.x;
		let mut centery_b = fp.center.y;
		let mut dir_b = 0i32;
		let mut dcc_b = 0i32;
		if !cross_check_pattern_ch(
			&ch[2],
			fp.kind,
			h_v,
			module_size_max,
			&mut module_size_b,
			&mut centerx_b,
			&mut centery_b,
			&mut dir_b,
			&mut dcc_b,
		) {
			return false;
		}
		if !check_module_size2(module_size_g, module_size_b) {
			return false;
		}
		fp.module_size = (module_size_g + module_size_b) / 2.0;
		fp.center.x = (centerx_g + centerx_b) / 2.0;
		fp.center.y = (centery_g + centery_b) / 2.0;

		let core_red = DEFAULT_PALETTE[FP3_CORE_COLOR as usize][0];
		for d in 0..3 {
			if !cross_check_color(
				&ch[0],
				core_red,
				fp.module_size as i32,
				5,
				fp.center.x as i32,
				fp.center.y as i32,
				d,
			) {
				return false;
			}
		}
		fp.direction = if dcc_g == 2 || dcc_b == 2 {
			2
		} else if dir_g + dir_b > 0 {
			1
		} else {
			-1
		};
	}

	true
}

/// Coalesces a found pattern into the candidate list by running average.
fn save_pattern(fp: &Pattern, list: &mut Vec<Pattern>, type_count: Option<&mut [i32; 4]>) -> i32 {
	for (i, existing) in list.iter_mut().enumerate() {
		if existing.found_count > 0
			&& (fp.center.x - existing.center.x).abs() <= fp.module_size
			&& (fp.center.y - existing.center.y).abs() <= fp.module_size
			&& ((fp.module_size - existing.module_size).abs() <= existing.module_size
				|| (fp.module_size - existing.module_size).abs() <= 1.0)
			&& fp.kind == existing.kind
		{
			let count = existing.found_count as f32;
			existing.center.x = (count * existing.center.x + fp.center.x) / (count + 1.0);
			existing.center.y = (count * existing.center.y + fp.center.y) / (count + 1.0);
			existing.module_size = (count * existing.module_size + fp.module_size) / (count + 1.0);
			existing.found_count += 1;
			existing.direction += fp.direction;
			return i as i32;
		}
	}
	list.push(*fp);
	if let Some(counts) = type_count {
		counts[fp.kind] += 1;
	}
	-1
}

/// Picks the most frequently seen pattern out of a per-type class.
fn best_pattern(fps: &mut [Pattern]) -> Pattern {
	let mut counter = 0;
	let mut total_module_size = 0f32;
	for fp in fps.iter() {
		if fp.found_count > 0 {
			counter += 1;
			total_module_size += fp.module_size;
		}
	}
	let mean = total_module_size / counter as f32;

	let mut max_found = 0;
	let mut min_diff = 100f32;
	let mut best = 0usize;
	for (i, fp) in fps.iter().enumerate() {
		if fp.found_count > 0 {
			if fp.found_count > max_found {
				max_found = fp.found_count;
				best = i;
				min_diff = (fp.module_size - mean).abs();
			} else if fp.found_count == max_found && (fp.module_size - mean).abs() < min_diff {
				best = i;
				min_diff = (fp.module_size - mean).abs();
			}
		}
	}
	let fp = fps[best];
	fps[best].found_count = 0;
	fp
}

/// Reduces the candidate list to at most one pattern per type.
///
/// Returns the four corner patterns and the number of missing types.
fn select_best_patterns(candidates: &[Pattern]) -> ([Pattern; 4], usize) {
	let mut classes: [Vec<Pattern>; 4] = Default::default();
	for fp in candidates {
		// a module must be at least 3 pixels to be trusted
		if fp.found_count < 3 {
			continue;
		}
		classes[fp.kind].push(*fp);
	}

	let mut fps = [Pattern::default(); 4];
	for (kind, class) in classes.iter_mut().enumerate() {
		if class.len() > 1 {
			fps[kind] = best_pattern(class);
		} else if class.len() == 1 {
			fps[kind] = class[0];
		}
	}

	// drop patterns found far less often than the best one
	let max_found = fps.iter().map(|fp| fp.found_count).max().unwrap_or(0);
	for fp in &mut fps {
		if fp.found_count > 0 && (fp.found_count as f32) < 0.5 * max_found as f32 {
			log::warn!(
				"discarding low-confidence finder pattern {} (found {} of {})",
				fp.kind,
				fp.found_count,
				max_found
			);
			*fp = Pattern::default();
		}
	}

	let missing = fps.iter().filter(|fp| fp.found_count == 0).count();
	(fps, missing)
}

/// Classifies a pair of channel crossings into a finder pattern type.
fn classify_candidate(
	type_r: u8,
	type_g: u8,
	type_b: u8,
	pattern1: bool,
) -> Option<usize> {
	let matches = |kind: usize| {
		let core = DEFAULT_PALETTE[match kind {
			FP0 => FP0_CORE_COLOR,
			FP1 => crate::color::FP1_CORE_COLOR,
			FP2 => FP2_CORE_COLOR,
			_ => FP3_CORE_COLOR,
		} as usize];
		type_r == core[0] && type_g == core[1] && type_b == core[2]
	};
	if pattern1 {
		if matches(FP0) {
			Some(FP0)
		} else if matches(FP3) {
			Some(FP3)
		} else {
			None
		}
	} else if matches(FP1) {
		Some(FP1)
	} else if matches(FP2) {
		Some(FP2)
	} else {
		None
	}
}

/// Scans rows of the binarized channels for finder pattern candidates.
fn scan_pattern_horizontal(
	ch: &[Bitmap; 3],
	min_module_size: i32,
	candidates: &mut Vec<Pattern>,
	type_count: &mut [i32; 4],
) {
	let width = ch[0].width() as i32;
	let height = ch[0].height() as i32;
	let mut done = false;

	let mut i = 0i32;
	while i < height && !done {
		let row_r = &ch[0].pixels()[(i as usize * width as usize)..((i + 1) as usize * width as usize)];
		let row_g = &ch[1].pixels()[(i as usize * width as usize)..((i + 1) as usize * width as usize)];
		let row_b = &ch[2].pixels()[(i as usize * width as usize)..((i + 1) as usize * width as usize)];

		let mut startx = 0i32;
		let mut endx = width;
		let mut skip = 0i32;
		loop {
			startx += skip;
			endx = width;
			let mut centerx_g = 0f32;
			let mut module_size_g = 0f32;
			if seek_pattern_horizontal(
				row_g,
				&mut startx,
				&mut endx,
				&mut centerx_g,
				&mut module_size_g,
				&mut skip,
			) {
				let type_g = if row_g[centerx_g as usize] > 0 {
					255
				} else {
					0
				};

				let mut centerx_r = centerx_g;
				let mut centerx_b = centerx_g;
				let mut module_size_r = 0f32;
				let mut module_size_b = 0f32;
				let mut pattern1_found = false;
				let mut pattern2_found = false;
				let mut type_r = 0u8;
				let mut type_b = 0u8;

				// FP0/FP3 carry the cross in the blue channel
				if cross_check_pattern_horizontal(
					&ch[2],
					module_size_g * 2.0,
					&mut centerx_b,
					i as f32,
					&mut module_size_b,
				) {
					type_b = if row_b[centerx_b as usize] > 0 {
						255
					} else {
						0
					};
					module_size_r = module_size_g;
					let core_red = DEFAULT_PALETTE[FP3_CORE_COLOR as usize][0];
					if cross_check_color(
						&ch[0],
						core_red,
						module_size_r as i32,
						5,
						centerx_r as i32,
						i,
						0,
					) {
						type_r = 0;
						pattern1_found = true;
					}
				}
				// FP1/FP2 carry the cross in the red channel
				else if cross_check_pattern_horizontal(
					&ch[0],
					module_size_g * 2.0,
					&mut centerx_r,
					i as f32,
					&mut module_size_r,
				) {
					type_r = if row_r[centerx_r as usize] > 0 {
						255
					} else {
						0
					};
					module_size_b = module_size_g;
					let core_blue = DEFAULT_PALETTE[FP2_CORE_COLOR as usize][2];
					if cross_check_color(
						&ch[2],
						core_blue,
						module_size_b as i32,
						5,
						centerx_b as i32,
						i,
						0,
					) {
						type_b = 0;
						pattern2_found = true;
					}
				}

				if pattern1_found || pattern2_found {
					let mut fp = Pattern {
						center: Point::new(0.0, i as f32),
						found_count: 1,
						..Pattern::default()
					};
					let valid = if pattern1_found {
						if !check_module_size2(module_size_g, module_size_b) {
							continue;
						}
						fp.center.x = (centerx_g + centerx_b) / 2.0;
						fp.module_size = (module_size_g + module_size_b) / 2.0;
						classify_candidate(type_r, type_g, type_b, true)
					} else {
						if !check_module_size2(module_size_r, module_size_g) {
							continue;
						}
						fp.center.x = (centerx_r + centerx_g) / 2.0;
						fp.module_size = (module_size_r + module_size_g) / 2.0;
						classify_candidate(type_r, type_g, type_b, false)
					};
					let Some(kind) = valid else {
						continue;
					};
					fp.kind = kind;
					if cross_check_pattern(ch, &mut fp, 0) {
						save_pattern(&fp, candidates, Some(&mut *type_count));
						if candidates.len() >= MAX_FINDER_PATTERNS - 1 {
							done = true;
							break;
						}
					}
				}
			}
			if !(startx < width && endx < width) {
				break;
			}
		}
		i += min_module_size;
	}
}

/// Rescans column-wise when only a top or bottom pair was found.
fn scan_pattern_vertical(
	ch: &[Bitmap; 3],
	min_module_size: i32,
	candidates: &mut Vec<Pattern>,
	type_count: &mut [i32; 4],
) {
	let width = ch[0].width() as i32;
	let height = ch[0].height() as i32;
	let mut done = false;

	let mut j = 0i32;
	while j < width && !done {
		let mut starty = 0i32;
		let mut endy = height;
		let mut skip = 0i32;
		loop {
			starty += skip;
			endy = height;
			let mut centery_g = 0f32;
			let mut module_size_g = 0f32;
			if seek_pattern_vertical(
				&ch[1],
				j,
				&mut starty,
				&mut endy,
				&mut centery_g,
				&mut module_size_g,
				&mut skip,
			) {
				let type_g = if ch[1].gray_at(j as usize, centery_g as usize) > 0 {
					255
				} else {
					0
				};

				let mut centery_r = centery_g;
				let mut centery_b = centery_g;
				let mut module_size_r = 0f32;
				let mut module_size_b = 0f32;
				let mut pattern1_found = false;
				let mut pattern2_found = false;
				let mut type_r = 0u8;
				let mut type_b = 0u8;

				if cross_check_pattern_vertical(
					&ch[2],
					module_size_g * 2.0,
					j as f32,
					&mut centery_b,
					&mut module_size_b,
				) {
					type_b = if ch[2].gray_at(j as usize, centery_b as usize) > 0 {
						255
					} else {
						0
					};
					module_size_r = module_size_g;
					let core_red = DEFAULT_PALETTE[FP3_CORE_COLOR as usize][0];
					if cross_check_color(
						&ch[0],
						core_red,
						module_size_r as i32,
						5,
						j,
						centery_r as i32,
						1,
					) {
						type_r = 0;
						pattern1_found = true;
					}
				} else if cross_check_pattern_vertical(
					&ch[0],
					module_size_g * 2.0,
					j as f32,
					&mut centery_r,
					&mut module_size_r,
				) {
					type_r = if ch[0].gray_at(j as usize, centery_r as usize) > 0 {
						255
					} else {
						0
					};
					module_size_b = module_size_g;
					let core_blue = DEFAULT_PALETTE[FP2_CORE_COLOR as usize][2];
					if cross_check_color(
						&ch[2],
						core_blue,
						module_size_b as i32,
						5,
						j,
						centery_b as i32,
						1,
					) {
						type_b = 0;
						pattern2_found = true;
					}
				}

				if pattern1_found || pattern2_found {
					let mut fp = Pattern {
						center: Point::new(j as f32, 0.0),
						found_count: 1,
						..Pattern::default()
					};
					let valid = if pattern1_found {
						if !check_module_size2(module_size_g, module_size_b) {
							continue;
						}
						fp.center.y = (centery_g + centery_b) / 2.0;
						fp.module_size = (module_size_g + module_size_b) / 2.0;
						classify_candidate(type_r, type_g, type_b, true)
					} else {
						if !check_module_size2(module_size_r, module_size_g) {
							continue;
						}
						fp.center.y = (centery_r + centery_g) / 2.0;
						fp.module_size = (module_size_r + module_size_g) / 2.0;
						classify_candidate(type_r, type_g, type_b, false)
					};
					let Some(kind) = valid else {
						continue;
					};
					fp.kind = kind;
					if cross_check_pattern(ch, &mut fp, 1) {
						save_pattern(&fp, candidates, Some(&mut *type_count));
						if candidates.len() >= MAX_FINDER_PATTERNS - 1 {
							done = true;
							break;
						}
					}
				}
			}
			if !(starty < height && endy < height) {
				break;
			}
		}
		j += min_module_size;
	}
}

/// Searches a quantized local window for one missing finder pattern.
fn seek_missing_finder_pattern(bitmap: &Bitmap, fps: &mut [Pattern; 4], miss_index: usize) {
	let radius = fps[miss_index].module_size * 5.0;
	let start_x = (fps[miss_index].center.x - radius).max(0.0) as usize;
	let start_y = (fps[miss_index].center.y - radius).max(0.0) as usize;
	let end_x = ((fps[miss_index].center.x + radius) as usize).min(bitmap.width() - 1);
	let end_y = ((fps[miss_index].center.y + radius) as usize).min(bitmap.height() - 1);
	let area_width = end_x - start_x;
	let area_height = end_y - start_y;
	if area_width == 0 || area_height == 0 {
		return;
	}

	// quantize the window into black, cyan and yellow by average value
	let mut pixel_sum = [0f32; 3];
	for i in start_y..end_y {
		for j in start_x..end_x {
			let rgb = bitmap.rgb_at(j, i);
			for c in 0..3 {
				pixel_sum[c] += f32::from(rgb[c]);
			}
		}
	}
	let count = (area_width * area_height) as f32;
	let pixel_ave = [pixel_sum[0] / count, pixel_sum[1] / count, pixel_sum[2] / count];

	let mut rgb: [Bitmap; 3] = [
		Bitmap::new_gray(area_width, area_height),
		Bitmap::new_gray(area_width, area_height),
		Bitmap::new_gray(area_width, area_height),
	];
	for (y, i) in (start_y..end_y).enumerate() {
		for (x, j) in (start_x..end_x).enumerate() {
			let p = bitmap.rgb_at(j, i);
			if f32::from(p[0]) < pixel_ave[0]
				&& f32::from(p[1]) < pixel_ave[1]
				&& f32::from(p[2]) < pixel_ave[2]
			{
				// black
			} else if p[0] < p[2] {
				// cyan side
				rgb[1].set_gray(x, y, 255);
				rgb[2].set_gray(x, y, 255);
			} else {
				// yellow side
				rgb[0].set_gray(x, y, 255);
				rgb[1].set_gray(x, y, 255);
			}
		}
	}

	// rerun the scanline detector in the window for this type only
	let mut candidates: Vec<Pattern> = Vec::new();
	let mut type_count = [0i32; 4];
	scan_pattern_horizontal(&rgb, 1, &mut candidates, &mut type_count);

	let mut best: Option<Pattern> = None;
	for fp in candidates {
		if fp.kind == miss_index
			&& best.map_or(true, |b| fp.found_count > b.found_count)
		{
			best = Some(fp);
		}
	}
	if let Some(mut fp) = best {
		fp.center.x += start_x as f32;
		fp.center.y += start_y as f32;
		fps[miss_index] = fp;
	}
}

/// Finds the four finder patterns of the master symbol.
fn find_master_symbol(bitmap: &Bitmap, ch: &[Bitmap; 3]) -> ([Pattern; 4], bool) {
	// intensive detection scans every row
	let min_module_size = 1i32;

	let mut candidates: Vec<Pattern> = Vec::new();
	let mut type_count = [0i32; 4];
	scan_pattern_horizontal(ch, min_module_size, &mut candidates, &mut type_count);

	// rescan vertically when only a top or bottom pair was found
	if (type_count[0] != 0 && type_count[1] != 0 && type_count[2] == 0 && type_count[3] == 0)
		|| (type_count[0] == 0 && type_count[1] == 0 && type_count[2] != 0 && type_count[3] != 0)
	{
		scan_pattern_vertical(ch, min_module_size, &mut candidates, &mut type_count);
	}

	for fp in &mut candidates {
		fp.direction = if fp.direction >= 0 {
			1
		} else {
			-1
		};
	}

	let (mut fps, missing) = select_best_patterns(&candidates);
	if missing > 1 {
		log::debug!("too few finder patterns found");
		return (fps, false);
	}

	if missing == 1 {
		// estimate the missing pattern from the other three
		let miss = fps.iter().position(|fp| fp.found_count == 0).unwrap_or(0);
		let est = |a: usize, b: usize, c: usize, d: usize, anchor: usize| {
			// proportionality in module size along the opposite edge
			let ave_ab = (fps[a].module_size + fps[b].module_size) / 2.0;
			let ave_cd = (fps[c].module_size + fps[d].module_size) / 2.0;
			Point::new(
				(fps[a].center.x - fps[b].center.x) / ave_ab * ave_cd + fps[anchor].center.x,
				(fps[a].center.y - fps[b].center.y) / ave_ab * ave_cd + fps[anchor].center.y,
			)
		};
		let (center, direction, size) = match miss {
			0 => (
				est(3, 2, 1, 3, 1),
				-fps[1].direction,
				(fps[1].module_size + fps[2].module_size + fps[3].module_size) / 3.0,
			),
			1 => (
				est(2, 3, 0, 2, 0),
				-fps[0].direction,
				(fps[0].module_size + fps[2].module_size + fps[3].module_size) / 3.0,
			),
			2 => (
				est(1, 0, 1, 3, 3),
				fps[3].direction,
				(fps[0].module_size + fps[1].module_size + fps[3].module_size) / 3.0,
			),
			_ => (
				est(0, 1, 0, 2, 2),
				fps[2].direction,
				(fps[0].module_size + fps[1].module_size + fps[2].module_size) / 3.0,
			),
		};
		fps[miss] = Pattern {
			kind: miss,
			center,
			module_size: size,
			found_count: 1,
			direction,
		};
		if center.x < 0.0
			|| center.x > ch[0].width() as f32 - 1.0
			|| center.y < 0.0
			|| center.y > ch[0].height() as f32 - 1.0
		{
			log::debug!("estimated finder pattern {miss} lies outside the image");
			fps[miss].found_count = 0;
			return (fps, false);
		}
		// confirm the estimate by a local search
		seek_missing_finder_pattern(bitmap, &mut fps, miss);
	}
	(fps, true)
}

/// Modules between two pattern centers, corrected for the scan angle.
fn module_number_between(fp1: &Pattern, fp2: &Pattern) -> i32 {
	let dist = fp1.center.distance_to(fp2.center);
	let cos_theta = (fp2.center.x - fp1.center.x)
		.abs()
		.max((fp2.center.y - fp1.center.y).abs())
		/ dist;
	let mean = (fp1.module_size + fp2.module_size) * cos_theta / 2.0;
	(dist / mean + 0.5) as i32
}

/// Nearest valid side size; the flag grades the confidence.
fn nearest_side_size(size: i32) -> (i32, i32) {
	let mut size = size;
	let mut flag = 1;
	match size & 0x03 {
		0 => size += 1,
		2 => size -= 1,
		3 => {
			// residue 3 is ambiguous, guess the next version
			size += 2;
			flag = 0;
		}
		_ => {}
	}
	if !(21..=145).contains(&size) {
		(-1, -1)
	} else {
		(size, flag)
	}
}

fn choose_side_size(size1: i32, flag1: i32, size2: i32, flag2: i32) -> i32 {
	if flag1 == -1 && flag2 == -1 {
		-1
	} else if flag1 == flag2 {
		size1.max(size2)
	} else if flag1 > flag2 {
		size1
	} else {
		size2
	}
}

/// Master symbol side sizes from the four finder patterns.
fn calculate_side_size(fps: &[Pattern; 4]) -> Vector2 {
	let (size_x_top, flag_top) = nearest_side_size(module_number_between(&fps[0], &fps[1]) + 7);
	let (size_x_bottom, flag_bottom) =
		nearest_side_size(module_number_between(&fps[3], &fps[2]) + 7);
	let (size_y_left, flag_left) = nearest_side_size(module_number_between(&fps[0], &fps[3]) + 7);
	let (size_y_right, flag_right) = nearest_side_size(module_number_between(&fps[1], &fps[2]) + 7);
	Vector2::new(
		choose_side_size(size_x_top, flag_top, size_x_bottom, flag_bottom),
		choose_side_size(size_y_left, flag_left, size_y_right, flag_right),
	)
}

/// Walks a three-state window outward along one direction.
fn walk_states_ap(
	sample: impl Fn(i32) -> Option<u8>,
	state_count: &mut [i32; 3],
	descending: bool,
) -> Option<i32> {
	let middle = 1usize;
	let mut state_index = 0usize;
	let mut i = 1i32;
	loop {
		let (Some(curr), Some(prev)) = (sample(i), sample(i - 1)) else {
			break;
		};
		let slot = if descending {
			middle - state_index
		} else {
			middle + state_index
		};
		if curr == prev {
			state_count[slot] += 1;
		} else if state_index > 0 && state_count[slot] < 3 {
			let merge = if descending {
				middle - (state_index - 1)
			} else {
				middle + (state_index - 1)
			};
			state_count[merge] += state_count[slot];
			state_count[slot] = 0;
			state_index -= 1;
			let back = if descending {
				middle - state_index
			} else {
				middle + state_index
			};
			state_count[back] += 1;
		} else {
			state_index += 1;
			if state_index > middle {
				break;
			}
			let slot = if descending {
				middle - state_index
			} else {
				middle + state_index
			};
			state_count[slot] += 1;
		}
		i += 1;
	}
	if state_index < middle {
		None
	} else {
		Some(i)
	}
}

/// Diagonal cross check of an alignment pattern candidate.
fn cross_check_pattern_diagonal_ap(
	ch: &Bitmap,
	ap_type: usize,
	module_size_max: i32,
	center: Point,
	dir: &mut i32,
) -> f32 {
	let mut offset_x;
	let offset_y = -1i32;
	let fix_dir = *dir != 0;
	if fix_dir {
		if *dir > 0 {
			offset_x = -1;
			*dir = 1;
		} else {
			offset_x = 1;
			*dir = -1;
		}
	} else if ap_type == 0 || ap_type == 1 {
		offset_x = -1;
		*dir = 1;
	} else {
		offset_x = 1;
		*dir = -1;
	}

	let mut try_count = 0;
	loop {
		let mut flag = false;
		try_count += 1;

		let startx = center.x as i32;
		let starty = center.y as i32;
		let mut state_count = [0i32; 3];
		state_count[1] += 1;

		let forward = walk_states_ap(
			|i| {
				let x = startx + i * offset_x;
				let y = starty + i * offset_y;
				(x >= 0 && y >= 0 && (x as usize) < ch.width() && (y as usize) < ch.height())
					.then(|| ch.gray_at(x as usize, y as usize))
			},
			&mut state_count,
			true,
		);
		if forward.is_none() {
			if try_count == 1 {
				flag = true;
				offset_x = -offset_x;
				*dir = -*dir;
			} else {
				return -1.0;
			}
		}

		let mut i_end = 0i32;
		if !flag {
			let backward = walk_states_ap(
				|i| {
					let x = startx - i * offset_x;
					let y = starty - i * offset_y;
					(x >= 0 && y >= 0 && (x as usize) < ch.width() && (y as usize) < ch.height())
						.then(|| ch.gray_at(x as usize, y as usize))
				},
				&mut state_count,
				false,
			);
			match backward {
				Some(i) => i_end = i,
				None => {
					if try_count == 1 {
						flag = true;
						offset_x = -offset_x;
						*dir = -*dir;
					} else {
						return -1.0;
					}
				}
			}
		}

		if !flag {
			if state_count[1] < module_size_max
				&& state_count[0] * 2 > state_count[1]
				&& state_count[2] * 2 > state_count[1]
			{
				return (starty + i_end - state_count[2]) as f32 - state_count[1] as f32 / 2.0;
			}
			offset_x = -offset_x;
			*dir = -*dir;
		}
		if try_count >= 2 || fix_dir {
			return -1.0;
		}
	}
}

/// Vertical cross check of an alignment pattern candidate.
fn cross_check_pattern_vertical_ap(
	ch: &Bitmap,
	center: Point,
	module_size_max: i32,
	module_size: &mut f32,
) -> f32 {
	let centerx = center.x as i32;
	let centery = center.y as i32;
	if centerx < 0 || centerx as usize >= ch.width() {
		return -1.0;
	}
	let mut state_count = [0i32; 3];
	state_count[1] += 1;

	if walk_states_ap(
		|i| {
			let y = centery - i;
			(y >= 0).then(|| ch.gray_at(centerx as usize, y as usize))
		},
		&mut state_count,
		true,
	)
	.is_none()
	{
		return -1.0;
	}
	let Some(i) = walk_states_ap(
		|i| {
			let y = centery + i;
			((y as usize) < ch.height()).then(|| ch.gray_at(centerx as usize, y as usize))
		},
		&mut state_count,
		false,
	) else {
		return -1.0;
	};

	if state_count[1] < module_size_max
		&& state_count[0] * 2 > state_count[1]
		&& state_count[2] * 2 > state_count[1]
	{
		*module_size = state_count[1] as f32;
		(centery + i - state_count[2]) as f32 - state_count[1] as f32 / 2.0
	} else {
		-1.0
	}
}

/// Horizontal cross check of an alignment pattern candidate on one row.
fn cross_check_pattern_horizontal_ap(
	ch: &Bitmap,
	channel_core_color: u8,
	y: i32,
	startx: i32,
	endx: i32,
	centerx: i32,
	module_size_max: f32,
	module_size: &mut f32,
) -> f32 {
	if y < 0 || y as usize >= ch.height() || centerx < 0 || centerx as usize >= ch.width() {
		return -1.0;
	}
	if ch.gray_at(centerx as usize, y as usize) != channel_core_color {
		return -1.0;
	}

	let mut state_count = [0i32; 3];
	state_count[1] += 1;

	if walk_states_ap(
		|i| {
			let x = centerx - i;
			(x >= startx).then(|| ch.gray_at(x as usize, y as usize))
		},
		&mut state_count,
		true,
	)
	.is_none()
	{
		return -1.0;
	}
	let Some(i) = walk_states_ap(
		|i| {
			let x = centerx + i;
			(x <= endx && (x as usize) < ch.width()).then(|| ch.gray_at(x as usize, y as usize))
		},
		&mut state_count,
		false,
	) else {
		return -1.0;
	};

	if (state_count[1] as f32) < module_size_max
		&& state_count[0] * 2 > state_count[1]
		&& state_count[2] * 2 > state_count[1]
	{
		*module_size = state_count[1] as f32;
		(centerx + i - state_count[2]) as f32 - state_count[1] as f32 / 2.0
	} else {
		-1.0
	}
}

/// Core color of an alignment pattern type in one RGB channel.
fn ap_core_color_channel(ap_type: usize, channel: usize) -> u8 {
	let color = if ap_type == APX {
		APX_CORE_COLOR
	} else {
		AP_CORE_COLOR
	};
	DEFAULT_PALETTE[color as usize][channel]
}

/// Full cross check of an alignment pattern candidate.
fn cross_check_pattern_ap(
	ch: &[Bitmap; 3],
	y: i32,
	minx: i32,
	maxx: i32,
	cur_x: i32,
	ap_type: usize,
	max_module_size: f32,
) -> Option<(f32, f32, f32, i32)> {
	let mut module_size_h = [0f32; 3];
	let mut module_size_v = [0f32; 3];

	// red and blue channels horizontally
	let cx_r = cross_check_pattern_horizontal_ap(
		&ch[0],
		ap_core_color_channel(ap_type, 0),
		y,
		minx,
		maxx,
		cur_x,
		max_module_size,
		&mut module_size_h[0],
	);
	if cx_r < 0.0 {
		return None;
	}
	let cx_b = cross_check_pattern_horizontal_ap(
		&ch[2],
		ap_core_color_channel(ap_type, 2),
		y,
		minx,
		maxx,
		cx_r as i32,
		max_module_size,
		&mut module_size_h[2],
	);
	if cx_b < 0.0 {
		return None;
	}

	let mut center = Point::new((cx_r + cx_b) / 2.0, y as f32);
	let mut module_size = (module_size_h[0] + module_size_h[2]) / 2.0;

	// green channel along the row
	let core_green = ap_core_color_channel(ap_type, 1);
	if !cross_check_color(&ch[1], core_green, module_size as i32, 3, center.x as i32, center.y as i32, 0)
	{
		return None;
	}

	// red channel vertically, then again horizontally on the new row
	let cy_r = cross_check_pattern_vertical_ap(&ch[0], center, max_module_size as i32, &mut module_size_v[0]);
	if cy_r < 0.0 {
		return None;
	}
	let cx_r = cross_check_pattern_horizontal_ap(
		&ch[0],
		ap_core_color_channel(ap_type, 0),
		cy_r as i32,
		minx,
		maxx,
		center.x as i32,
		max_module_size,
		&mut module_size_h[0],
	);
	if cx_r < 0.0 {
		return None;
	}

	// blue channel vertically, then again horizontally
	let cy_b = cross_check_pattern_vertical_ap(&ch[2], center, max_module_size as i32, &mut module_size_v[2]);
	if cy_b < 0.0 {
		return None;
	}
	let cx_b = cross_check_pattern_horizontal_ap(
		&ch[2],
		ap_core_color_channel(ap_type, 2),
		cy_b as i32,
		minx,
		maxx,
		center.x as i32,
		max_module_size,
		&mut module_size_h[2],
	);
	if cx_b < 0.0 {
		return None;
	}

	module_size = (module_size_h[0] + module_size_h[2] + module_size_v[0] + module_size_v[2]) / 4.0;
	center.x = (cx_r + cx_b) / 2.0;
	center.y = (cy_r + cy_b) / 2.0;

	if !cross_check_color(&ch[1], core_green, module_size as i32, 3, center.x as i32, center.y as i32, 1)
	{
		return None;
	}

	// diagonals
	let mut dir_r = 0i32;
	if cross_check_pattern_diagonal_ap(&ch[0], ap_type, (module_size * 2.0) as i32, center, &mut dir_r)
		< 0.0
	{
		return None;
	}
	let mut dir_b = 0i32;
	if cross_check_pattern_diagonal_ap(&ch[2], ap_type, (module_size * 2.0) as i32, center, &mut dir_b)
		< 0.0
	{
		return None;
	}
	if !cross_check_color(&ch[1], core_green, module_size as i32, 3, center.x as i32, center.y as i32, 2)
	{
		return None;
	}
	let dir = if dir_r + dir_b > 0 {
		1
	} else {
		-1
	};
	Some((center.x, center.y, module_size, dir))
}

/// Searches for an alignment pattern around `(x, y)`, widening the radius
/// up to four times.
fn find_alignment_pattern(ch: &[Bitmap; 3], x: f32, y: f32, module_size: f32, ap_type: usize) -> Pattern {
	let mut ap = Pattern {
		kind: ap_type,
		found_count: 0,
		..Pattern::default()
	};
	let core_color_r = ap_core_color_channel(ap_type, 0);

	let mut radius = (4.0 * module_size) as i32;
	let radius_max = 4 * radius;
	while radius < radius_max {
		let mut aps: Vec<Pattern> = Vec::new();

		let startx = (x as i32 - radius).max(0);
		let starty = (y as i32 - radius).max(0);
		let endx = (x as i32 + radius).min(ch[0].width() as i32 - 1);
		let endy = (y as i32 + radius).min(ch[0].height() as i32 - 1);
		if (endx - startx) as f32 >= 3.0 * module_size && (endy - starty) as f32 >= 3.0 * module_size
		{
			for k in starty..endy {
				// search outward from the middle
				let kk = k - starty;
				let i = y as i32
					+ if kk & 1 == 0 {
						(kk + 1) / 2
					} else {
						-((kk + 1) / 2)
					};
				if i < starty || i > endy {
					continue;
				}

				let mut found: Option<(f32, f32, f32, i32)> = None;
				let mut dir = -1i32;
				let mut left_tmpx = (x as i32).clamp(startx, endx);
				let mut right_tmpx = left_tmpx;
				while (left_tmpx > startx || right_tmpx < endx) && found.is_none() {
					if dir < 0 {
						// sweep left to the next core-colored run
						while left_tmpx > startx
							&& ch[0].gray_at(left_tmpx as usize, i as usize) != core_color_r
						{
							left_tmpx -= 1;
						}
						if left_tmpx <= startx {
							dir = -dir;
							continue;
						}
						found = cross_check_pattern_ap(
							ch,
							i,
							startx,
							endx,
							left_tmpx,
							ap_type,
							module_size * 2.0,
						);
						while left_tmpx > startx
							&& ch[0].gray_at(left_tmpx as usize, i as usize) == core_color_r
						{
							left_tmpx -= 1;
						}
						dir = -dir;
					} else {
						// sweep right to the next core-colored run
						while right_tmpx < endx
							&& ch[0].gray_at(right_tmpx as usize, i as usize) == core_color_r
						{
							right_tmpx += 1;
						}
						while right_tmpx < endx
							&& ch[0].gray_at(right_tmpx as usize, i as usize) != core_color_r
						{
							right_tmpx += 1;
						}
						if right_tmpx >= endx {
							dir = -dir;
							continue;
						}
						found = cross_check_pattern_ap(
							ch,
							i,
							startx,
							endx,
							right_tmpx,
							ap_type,
							module_size * 2.0,
						);
						while right_tmpx < endx
							&& ch[0].gray_at(right_tmpx as usize, i as usize) == core_color_r
						{
							right_tmpx += 1;
						}
						dir = -dir;
					}
				}

				let Some((cx, cy, size, ap_dir)) = found else {
					continue;
				};
				ap.center = Point::new(cx, cy);
				ap.module_size = size;
				ap.direction = ap_dir;
				ap.kind = ap_type;
				ap.found_count = 1;
				let index = save_pattern(&ap, &mut aps, None);
				if index >= 0 {
					// found twice at the same spot, done
					return aps[index as usize];
				}
			}
		}
		radius <<= 1;
	}
	ap.kind = usize::MAX;
	ap.found_count = 0;
	ap
}

/// Nearest valid position of the first alignment pattern.
fn first_ap_pos(pos: i32) -> i32 {
	let mut pos = pos;
	match pos % 3 {
		0 => pos -= 1,
		1 => pos += 1,
		_ => {}
	}
	if !(14..=26).contains(&pos) {
		-1
	} else {
		pos
	}
}

/// Probes for the first alignment pattern between two finder patterns.
fn detect_first_ap(ch: &[Bitmap; 3], side_version: i32, fp1: &Pattern, fp2: &Pattern) -> i32 {
	let alpha = (fp2.center.y - fp1.center.y).atan2(fp2.center.x - fp1.center.x);

	let mut next_version = side_version;
	let mut dir = 1i32;
	let mut up = 0i32;
	let mut down = 0i32;
	loop {
		if (6..=32).contains(&next_version) {
			let pos = AP_POS[next_version as usize - 1];
			let distance = fp1.module_size * (pos[1] - pos[0]) as f32;
			let x = fp1.center.x + distance * alpha.cos();
			let y = fp1.center.y + distance * alpha.sin();
			let ap = find_alignment_pattern(ch, x, y, fp1.module_size, APX);
			if ap.found_count > 0 {
				let pos = first_ap_pos(4 + module_number_between(fp1, &ap));
				if pos > 0 {
					return pos;
				}
			}
		}

		dir = -dir;
		if dir == -1 {
			up += 1;
			next_version = side_version - up;
			if !(6..=32).contains(&next_version) {
				dir = -dir;
				up -= 1;
				down += 1;
				next_version = side_version + down;
			}
		} else {
			down += 1;
			next_version = side_version + down;
			if !(6..=32).contains(&next_version) {
				dir = -dir;
				down -= 1;
				up += 1;
				next_version = side_version - up;
			}
		}
		if up + down >= 5 {
			return 0;
		}
	}
}

/// Confirms a side version by the measured first-AP position.
fn confirm_side_version(side_version: i32, first_ap: i32) -> i32 {
	if first_ap <= 0 {
		return 0;
	}
	let mut v = side_version;
	let mut k = 1i32;
	let mut sign = -1i32;
	while (6..=32).contains(&v) {
		if first_ap == AP_POS[v as usize - 1][1] {
			return v;
		}
		v = side_version + sign * k;
		if sign > 0 {
			k += 1;
		}
		sign = -sign;
	}
	0
}

/// Confirms both side versions of a default-mode symbol by its alignment
/// patterns.
fn confirm_symbol_size(ch: &[Bitmap; 3], fps: &[Pattern; 4], symbol: &mut DecodedSymbol) -> bool {
	// side version x: the line between FP0 and FP1, then FP3 and FP2
	let mut first = detect_first_ap(ch, symbol.metadata.side_version.x, &fps[0], &fps[1]);
	let mut side_version_x = confirm_side_version(symbol.metadata.side_version.x, first);
	if side_version_x == 0 {
		first = detect_first_ap(ch, symbol.metadata.side_version.x, &fps[3], &fps[2]);
		side_version_x = confirm_side_version(symbol.metadata.side_version.x, first);
		if side_version_x == 0 {
			log::debug!("confirming side version x failed");
			return false;
		}
	}
	symbol.metadata.side_version.x = side_version_x;
	symbol.side_size.x = version_to_size(side_version_x);

	// side version y: the line between FP0 and FP3, then FP1 and FP2
	let mut first = detect_first_ap(ch, symbol.metadata.side_version.y, &fps[0], &fps[3]);
	let mut side_version_y = confirm_side_version(symbol.metadata.side_version.y, first);
	if side_version_y == 0 {
		first = detect_first_ap(ch, symbol.metadata.side_version.y, &fps[1], &fps[2]);
		side_version_y = confirm_side_version(symbol.metadata.side_version.y, first);
		if side_version_y == 0 {
			log::debug!("confirming side version y failed");
			return false;
		}
	}
	symbol.metadata.side_version.y = side_version_y;
	symbol.side_size.y = version_to_size(side_version_y);
	true
}

/// Samples a symbol block-wise over its alignment pattern grid.
fn sample_symbol_by_alignment_pattern(
	bitmap: &Bitmap,
	ch: &[Bitmap; 3],
	symbol: &mut DecodedSymbol,
	fps: &[Pattern; 4],
) -> Option<Bitmap> {
	if symbol.metadata.side_version.x < 6 && symbol.metadata.side_version.y < 6 {
		log::debug!("no alignment pattern available for resampling");
		return None;
	}

	// a default-mode symbol's size must first be confirmed
	if symbol.metadata.default_mode && !confirm_symbol_size(ch, fps, symbol) {
		log::debug!("the symbol size can not be recognized");
		return None;
	}

	let ver_x = (symbol.metadata.side_version.x - 1) as usize;
	let ver_y = (symbol.metadata.side_version.y - 1) as usize;
	let number_x = AP_NUM[ver_x];
	let number_y = AP_NUM[ver_y];

	// detect or extrapolate all alignment patterns
	let mut aps: Vec<Pattern> = vec![Pattern::default(); number_x * number_y];
	for i in 0..number_y {
		for j in 0..number_x {
			let index = i * number_x + j;
			if i == 0 && j == 0 {
				aps[index] = fps[0];
			} else if i == 0 && j == number_x - 1 {
				aps[index] = fps[1];
			} else if i == number_y - 1 && j == number_x - 1 {
				aps[index] = fps[2];
			} else if i == number_y - 1 && j == 0 {
				aps[index] = fps[3];
			} else {
				let estimate = if i == 0 {
					// along the top edge, towards FP1
					let from = aps[j - 1];
					let alpha = (fps[1].center.y - from.center.y)
						.atan2(fps[1].center.x - from.center.x);
					let distance =
						from.module_size * (AP_POS[ver_x][j] - AP_POS[ver_x][j - 1]) as f32;
					Pattern {
						center: Point::new(
							from.center.x + distance * alpha.cos(),
							from.center.y + distance * alpha.sin(),
						),
						module_size: from.module_size,
						..Pattern::default()
					}
				} else if j == 0 {
					// along the left edge, towards FP3
					let from = aps[(i - 1) * number_x];
					let alpha = (fps[3].center.y - from.center.y)
						.atan2(fps[3].center.x - from.center.x);
					let distance =
						from.module_size * (AP_POS[ver_y][i] - AP_POS[ver_y][i - 1]) as f32;
					Pattern {
						center: Point::new(
							from.center.x + distance * alpha.cos(),
							from.center.y + distance * alpha.sin(),
						),
						module_size: from.module_size,
						..Pattern::default()
					}
				} else {
					// interior, extrapolated from the three neighbors
					let ap0 = aps[(i - 1) * number_x + (j - 1)];
					let ap1 = aps[(i - 1) * number_x + j];
					let ap3 = aps[i * number_x + (j - 1)];
					let ave01 = (ap0.module_size + ap1.module_size) / 2.0;
					let ave13 = (ap1.module_size + ap3.module_size) / 2.0;
					Pattern {
						center: Point::new(
							(ap1.center.x - ap0.center.x) / ave01 * ave13 + ap3.center.x,
							(ap1.center.y - ap0.center.y) / ave01 * ave13 + ap3.center.y,
						),
						module_size: ave13,
						..Pattern::default()
					}
				};
				let found = find_alignment_pattern(
					ch,
					estimate.center.x,
					estimate.center.y,
					estimate.module_size,
					APX,
				);
				aps[index] = if found.found_count == 0 {
					log::debug!("alignment pattern ({i},{j}) not found, using the estimate");
					estimate
				} else {
					found
				};
			}
		}
	}

	// minimal sampling rectangle per grid cell
	let mut rects: Vec<(Vector2, Vector2)> = Vec::new();
	for i in 0..number_y - 1 {
		for j in 0..number_x - 1 {
			let mut tl = Vector2::new(0, 0);
			let mut br = Vector2::new(0, 0);
			let mut searching = true;
			let mut delta = 0i32;
			while delta <= (number_x as i32 - 2 + number_y as i32 - 2) && searching {
				let mut dy = 0i32;
				while dy <= delta.min(number_y as i32 - 2) && searching {
					let dx = (delta - dy).min(number_x as i32 - 2);
					let mut dy1 = 0i32;
					while dy1 <= dy && searching {
						let dy2 = dy - dy1;
						let mut dx1 = 0i32;
						while dx1 <= dx && searching {
							let dx2 = dx - dx1;
							tl.x = (j as i32 - dx1).max(0);
							tl.y = (i as i32 - dy1).max(0);
							br.x = (j as i32 + 1 + dx2).min(number_x as i32 - 1);
							br.y = (i as i32 + 1 + dy2).min(number_y as i32 - 1);
							if aps[(tl.y as usize) * number_x + tl.x as usize].found_count > 0
								&& aps[(tl.y as usize) * number_x + br.x as usize].found_count > 0
								&& aps[(br.y as usize) * number_x + tl.x as usize].found_count > 0
								&& aps[(br.y as usize) * number_x + br.x as usize].found_count > 0
							{
								searching = false;
							}
							dx1 += 1;
						}
						dy1 += 1;
					}
					dy += 1;
				}
				delta += 1;
			}
			if !rects.contains(&(tl, br)) {
				rects.push((tl, br));
			}
		}
	}
	// sample the biggest rectangles first
	rects.sort_by_key(|(tl, br)| -((br.x - tl.x) * (br.y - tl.y)));

	let width = symbol.side_size.x;
	let height = symbol.side_size.y;
	let mut matrix = Bitmap::new(width as usize, height as usize);

	for (tl, br) in rects {
		let mut blk_size = Vector2::new(
			AP_POS[ver_x][br.x as usize] - AP_POS[ver_x][tl.x as usize] + 1,
			AP_POS[ver_y][br.y as usize] - AP_POS[ver_y][tl.y as usize] + 1,
		);
		let mut p0 = Point::new(0.5, 0.5);
		let mut p1 = Point::new(blk_size.x as f32 - 0.5, 0.5);
		let mut p2 = Point::new(blk_size.x as f32 - 0.5, blk_size.y as f32 - 0.5);
		let mut p3 = Point::new(0.5, blk_size.y as f32 - 0.5);
		// border rectangles extend into the quiet zone
		if tl.y == 0 {
			blk_size.y += DISTANCE_TO_BORDER - 1;
			p0.y = 3.5;
			p1.y = 3.5;
			p2.y = blk_size.y as f32 - 0.5;
			p3.y = blk_size.y as f32 - 0.5;
		}
		if br.y == number_y as i32 - 1 {
			blk_size.y += DISTANCE_TO_BORDER - 1;
			p2.y = blk_size.y as f32 - 3.5;
			p3.y = blk_size.y as f32 - 3.5;
		}
		if tl.x == 0 {
			blk_size.x += DISTANCE_TO_BORDER - 1;
			p0.x = 3.5;
			p1.x = blk_size.x as f32 - 0.5;
			p2.x = blk_size.x as f32 - 0.5;
			p3.x = 3.5;
		}
		if br.x == number_x as i32 - 1 {
			blk_size.x += DISTANCE_TO_BORDER - 1;
			p1.x = blk_size.x as f32 - 3.5;
			p2.x = blk_size.x as f32 - 3.5;
		}

		let pt = perspective_transform(
			p0,
			p1,
			p2,
			p3,
			aps[(tl.y as usize) * number_x + tl.x as usize].center,
			aps[(tl.y as usize) * number_x + br.x as usize].center,
			aps[(br.y as usize) * number_x + br.x as usize].center,
			aps[(br.y as usize) * number_x + tl.x as usize].center,
		);
		let block = sample_symbol(bitmap, &pt, blk_size)?;

		// copy the block into the full matrix
		let start_x = if tl.x == 0 {
			0
		} else {
			AP_POS[ver_x][tl.x as usize] - 1
		};
		let start_y = if tl.y == 0 {
			0
		} else {
			AP_POS[ver_y][tl.y as usize] - 1
		};
		for y in 0..blk_size.y {
			let mtx_y = start_y + y;
			if mtx_y >= height {
				break;
			}
			for x in 0..blk_size.x {
				let mtx_x = start_x + x;
				if mtx_x >= width {
					break;
				}
				let rgb = block.rgb_at(x as usize, y as usize);
				let alpha = block.channel_at(x as usize, y as usize, 3);
				matrix.set_rgba(mtx_x as usize, mtx_y as usize, [rgb[0], rgb[1], rgb[2], alpha]);
			}
		}
	}
	Some(matrix)
}

/// Average pixel value around the found finder patterns.
fn average_pixel_value(bitmap: &Bitmap, fps: &[Pattern; 4]) -> [f32; 3] {
	let mut rgb_sum = [0f32; 3];
	let mut rgb_count = [0u32; 3];
	for fp in fps {
		if fp.found_count <= 0 {
			continue;
		}
		let radius = fp.module_size * 4.0;
		let start_x = (fp.center.x - radius).max(0.0) as usize;
		let start_y = (fp.center.y - radius).max(0.0) as usize;
		let end_x = ((fp.center.x + radius) as usize).min(bitmap.width() - 1);
		let end_y = ((fp.center.y + radius) as usize).min(bitmap.height() - 1);
		if end_x <= start_x || end_y <= start_y {
			continue;
		}
		let mut sum = [0f32; 3];
		for y in start_y..end_y {
			for x in start_x..end_x {
				let p = bitmap.rgb_at(x, y);
				for c in 0..3 {
					sum[c] += f32::from(p[c]);
				}
			}
		}
		let count = ((end_x - start_x) * (end_y - start_y)) as f32;
		for c in 0..3 {
			let ave = sum[c] / count;
			if ave > 0.0 {
				rgb_sum[c] += ave;
				rgb_count[c] += 1;
			}
		}
	}
	let mut rgb_ave = [0f32; 3];
	for c in 0..3 {
		if rgb_count[c] > 0 {
			rgb_ave[c] = rgb_sum[c] / rgb_count[c] as f32;
		}
	}
	rgb_ave
}

/// Detects and decodes the master symbol.
fn detect_master(
	bitmap: &Bitmap,
	ch: &mut [Bitmap; 3],
	master: &mut DecodedSymbol,
	rng: &mut SmallRng,
) -> bool {
	let (mut fps, mut ok) = find_master_symbol(bitmap, ch);
	if !ok {
		// re-binarize with thresholds from the found pattern neighborhoods
		log::debug!("retrying detection with a local binarization");
		let rgb_ave = average_pixel_value(bitmap, &fps);
		*ch = binarize_rgb(bitmap, Some(rgb_ave));
		(fps, ok) = find_master_symbol(bitmap, ch);
		if !ok {
			return false;
		}
	}

	let side_size = calculate_side_size(&fps);
	if side_size.x == -1 || side_size.y == -1 {
		log::debug!("calculating side size failed");
		return false;
	}

	// first try sampling with the finder patterns only
	let pt = symbol_transform(
		fps[0].center,
		fps[1].center,
		fps[2].center,
		fps[3].center,
		side_size,
	);

	master.index = 0;
	master.host_index = 0;
	master.side_size = side_size;
	master.module_size =
		(fps[0].module_size + fps[1].module_size + fps[2].module_size + fps[3].module_size) / 4.0;
	for (i, fp) in fps.iter().enumerate() {
		master.pattern_positions[i] = fp.center;
	}

	let decode_result = match sample_symbol(bitmap, &pt, side_size) {
		Some(matrix) => decode_master(&matrix, master, rng),
		None => {
			log::debug!("sampling master symbol failed");
			Err(SymbolFailure::Retry)
		}
	};

	match decode_result {
		Ok(()) => true,
		Err(SymbolFailure::Abort) => false,
		Err(SymbolFailure::Retry) => {
			// resample over the alignment pattern grid
			log::debug!("retrying master symbol with alignment pattern sampling");
			master.side_size = Vector2::new(
				version_to_size(master.metadata.side_version.x),
				version_to_size(master.metadata.side_version.y),
			);
			let Some(matrix) = sample_symbol_by_alignment_pattern(bitmap, ch, master, &fps) else {
				return false;
			};
			decode_master(&matrix, master, rng).is_ok()
		}
	}
}

/// Locates a docked slave symbol and derives its transform.
fn find_slave_symbol(
	bitmap: &Bitmap,
	ch: &[Bitmap; 3],
	host: &DecodedSymbol,
	slave: &mut DecodedSymbol,
	docked_position: usize,
) -> bool {
	slave.side_size = Vector2::new(
		version_to_size(slave.metadata.side_version.x),
		version_to_size(slave.metadata.side_version.y),
	);

	// edge vectors of the host pattern quadrilateral
	let dist01 = (
		host.pattern_positions[1].x - host.pattern_positions[0].x,
		host.pattern_positions[1].y - host.pattern_positions[0].y,
	);
	let dist32 = (
		host.pattern_positions[2].x - host.pattern_positions[3].x,
		host.pattern_positions[2].y - host.pattern_positions[3].y,
	);
	let dist03 = (
		host.pattern_positions[3].x - host.pattern_positions[0].x,
		host.pattern_positions[3].y - host.pattern_positions[0].y,
	);
	let dist12 = (
		host.pattern_positions[2].x - host.pattern_positions[1].x,
		host.pattern_positions[2].y - host.pattern_positions[1].y,
	);

	let (alpha1, alpha2, sign, docked_side_size, undocked_side_size, ap1, ap2, ap3, ap4, hp1, hp2);
	match docked_position {
		3 => {
			// slave to the east
			alpha1 = dist01.1.atan2(dist01.0);
			alpha2 = dist32.1.atan2(dist32.0);
			sign = 1.0f32;
			docked_side_size = slave.side_size.y;
			undocked_side_size = slave.side_size.x;
			(ap1, ap2, ap3, ap4) = (0, 3, 1, 2);
			(hp1, hp2) = (FP1, FP2);
			slave.host_position = 2;
		}
		2 => {
			// slave to the west
			alpha1 = dist32.1.atan2(dist32.0);
			alpha2 = dist01.1.atan2(dist01.0);
			sign = -1.0;
			docked_side_size = slave.side_size.y;
			undocked_side_size = slave.side_size.x;
			(ap1, ap2, ap3, ap4) = (2, 1, 3, 0);
			(hp1, hp2) = (FP3, FP0);
			slave.host_position = 3;
		}
		1 => {
			// slave to the south
			alpha1 = dist12.1.atan2(dist12.0);
			alpha2 = dist03.1.atan2(dist03.0);
			sign = 1.0;
			docked_side_size = slave.side_size.x;
			undocked_side_size = slave.side_size.y;
			(ap1, ap2, ap3, ap4) = (1, 0, 2, 3);
			(hp1, hp2) = (FP2, FP3);
			slave.host_position = 0;
		}
		_ => {
			// slave to the north
			alpha1 = dist03.1.atan2(dist03.0);
			alpha2 = dist12.1.atan2(dist12.0);
			sign = -1.0;
			docked_side_size = slave.side_size.x;
			undocked_side_size = slave.side_size.y;
			(ap1, ap2, ap3, ap4) = (3, 2, 0, 1);
			(hp1, hp2) = (FP0, FP1);
			slave.host_position = 1;
		}
	}

	let mut aps = [Pattern::default(); 4];

	// the first two APs sit seven modules across the docked edge
	let estimate1 = Point::new(
		host.pattern_positions[hp1].x + sign * 7.0 * host.module_size * alpha1.cos(),
		host.pattern_positions[hp1].y + sign * 7.0 * host.module_size * alpha1.sin(),
	);
	aps[ap1] = find_alignment_pattern(ch, estimate1.x, estimate1.y, host.module_size, ap1);
	if aps[ap1].found_count == 0 {
		log::debug!("first alignment pattern of slave {} not found", slave.index);
		return false;
	}
	let estimate2 = Point::new(
		host.pattern_positions[hp2].x + sign * 7.0 * host.module_size * alpha2.cos(),
		host.pattern_positions[hp2].y + sign * 7.0 * host.module_size * alpha2.sin(),
	);
	aps[ap2] = find_alignment_pattern(ch, estimate2.x, estimate2.y, host.module_size, ap2);
	if aps[ap2].found_count == 0 {
		log::debug!("second alignment pattern of slave {} not found", slave.index);
		return false;
	}

	slave.module_size =
		aps[ap1].center.distance_to(aps[ap2].center) / (docked_side_size - 7) as f32;

	// the two far APs follow the perpendicular axis
	let estimate3 = Point::new(
		aps[ap1].center.x + sign * (undocked_side_size - 7) as f32 * slave.module_size * alpha1.cos(),
		aps[ap1].center.y + sign * (undocked_side_size - 7) as f32 * slave.module_size * alpha1.sin(),
	);
	aps[ap3] = find_alignment_pattern(ch, estimate3.x, estimate3.y, slave.module_size, ap3);
	let estimate4 = Point::new(
		aps[ap2].center.x + sign * (undocked_side_size - 7) as f32 * slave.module_size * alpha2.cos(),
		aps[ap2].center.y + sign * (undocked_side_size - 7) as f32 * slave.module_size * alpha2.sin(),
	);
	aps[ap4] = find_alignment_pattern(ch, estimate4.x, estimate4.y, slave.module_size, ap4);

	if aps[ap3].found_count == 0 && aps[ap4].found_count == 0 {
		return false;
	}
	// with three APs the fourth follows by proportionality
	if aps[ap3].found_count == 0 {
		let ave24 = (aps[ap2].module_size + aps[ap4].module_size) / 2.0;
		let ave14 = (aps[ap1].module_size + aps[ap4].module_size) / 2.0;
		aps[ap3] = Pattern {
			kind: ap3,
			center: Point::new(
				(aps[ap4].center.x - aps[ap2].center.x) / ave24 * ave14 + aps[ap1].center.x,
				(aps[ap4].center.y - aps[ap2].center.y) / ave24 * ave14 + aps[ap1].center.y,
			),
			module_size: (aps[ap1].module_size + aps[ap2].module_size + aps[ap4].module_size) / 3.0,
			found_count: 1,
			direction: 0,
		};
		if aps[ap3].center.x > bitmap.width() as f32 - 1.0
			|| aps[ap3].center.y > bitmap.height() as f32 - 1.0
		{
			return false;
		}
	}
	if aps[ap4].found_count == 0 {
		let ave13 = (aps[ap1].module_size + aps[ap3].module_size) / 2.0;
		let ave23 = (aps[ap2].module_size + aps[ap3].module_size) / 2.0;
		aps[ap4] = Pattern {
			kind: ap4,
			center: Point::new(
				(aps[ap3].center.x - aps[ap1].center.x) / ave13 * ave23 + aps[ap2].center.x,
				(aps[ap3].center.y - aps[ap1].center.y) / ave13 * ave23 + aps[ap2].center.y,
			),
			module_size: (aps[ap1].module_size + aps[ap1].module_size + aps[ap3].module_size) / 3.0,
			found_count: 1,
			direction: 0,
		};
		if aps[ap4].center.x > bitmap.width() as f32 - 1.0
			|| aps[ap4].center.y > bitmap.height() as f32 - 1.0
		{
			return false;
		}
	}

	for (i, ap) in aps.iter().enumerate() {
		slave.pattern_positions[i] = ap.center;
	}
	slave.module_size = (aps[0].module_size + aps[1].module_size + aps[2].module_size
		+ aps[3].module_size)
		/ 4.0;
	true
}

/// Detects a slave symbol and samples its module matrix.
fn detect_slave(
	bitmap: &Bitmap,
	ch: &[Bitmap; 3],
	host: &DecodedSymbol,
	slave: &mut DecodedSymbol,
	docked_position: usize,
) -> Option<Bitmap> {
	if docked_position > 3 {
		log::debug!("wrong docking position {docked_position}");
		return None;
	}
	if !find_slave_symbol(bitmap, ch, host, slave, docked_position) {
		log::debug!("slave symbol {} not found", slave.index);
		return None;
	}
	let pt = symbol_transform(
		slave.pattern_positions[0],
		slave.pattern_positions[1],
		slave.pattern_positions[2],
		slave.pattern_positions[3],
		slave.side_size,
	);
	sample_symbol(bitmap, &pt, slave.side_size)
}

/// Decodes all docked slaves of one host symbol.
fn decode_docked_slaves(
	bitmap: &Bitmap,
	ch: &[Bitmap; 3],
	symbols: &mut Vec<DecodedSymbol>,
	host_index: usize,
	rng: &mut SmallRng,
) -> bool {
	let docked = symbols[host_index].metadata.docked_position;
	for j in 0..4usize {
		if docked & (0x08 >> j) == 0 || symbols.len() >= MAX_SYMBOL_NUMBER {
			continue;
		}
		let mut slave = DecodedSymbol {
			index: symbols.len(),
			host_index,
			metadata: symbols[host_index].slave_metadata[j],
			..DecodedSymbol::default()
		};
		let host = symbols[host_index].clone();
		let Some(matrix) = detect_slave(bitmap, ch, &host, &mut slave, j) else {
			log::debug!("detecting slave symbol {} failed", slave.index);
			return false;
		};
		if decode_slave(&matrix, &mut slave, rng).is_ok() {
			symbols.push(slave);
		} else {
			return false;
		}
	}
	true
}

/// Decodes a JAB Code from a bitmap.
pub fn decode(bitmap: &Bitmap, mode: DecodeMode) -> Result<Decoded, DecodeError> {
	let mut rng = SmallRng::from_os_rng();

	// balance and quantize the image
	let mut balanced = bitmap.clone();
	balance_rgb(&mut balanced);
	let mut ch = binarize_rgb(&balanced, None);

	let mut symbols: Vec<DecodedSymbol> = Vec::new();
	let mut master = DecodedSymbol::default();
	let detected = detect_master(&balanced, &mut ch, &mut master, &mut rng);
	let master_module_size = master.module_size;
	if detected {
		symbols.push(master);
	}

	// decode docked slave symbols recursively
	let mut all_slaves_ok = true;
	if !symbols.is_empty() {
		let mut i = 0usize;
		while i < symbols.len() && symbols.len() < MAX_SYMBOL_NUMBER {
			if !decode_docked_slaves(&balanced, &ch, &mut symbols, i, &mut rng) {
				all_slaves_ok = false;
				break;
			}
			i += 1;
		}
	}

	if symbols.is_empty() || (mode == DecodeMode::Normal && !all_slaves_ok) {
		return if master_module_size > 0.0 {
			Err(DecodeError::NotDecodable {
				reason: "symbol data could not be recovered",
			})
		} else {
			Err(DecodeError::NotDetectable {
				reason: "no master symbol found",
			})
		};
	}
	let status = if all_slaves_ok {
		DecodeStatus::Full
	} else {
		DecodeStatus::Partial
	};

	// concatenate the payload bits of all decoded symbols
	let mut decoded_bits = Vec::new();
	for symbol in &symbols {
		decoded_bits.extend_from_slice(&symbol.data);
	}
	let payload = crate::decoder::bits::decode_data(&decoded_bits).ok_or(
		DecodeError::NotDecodable {
			reason: "interpreting the payload bit stream failed",
		},
	)?;

	Ok(Decoded {
		payload,
		status,
	})
}
