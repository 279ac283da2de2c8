//! Data module masking.
//!
//! One of eight XOR masks is applied to every data-bearing module. Masks
//! are scored against three penalty rules and the cheapest one wins; the
//! same formulas undo the mask on the decoder side.

use crate::color::{FP0_CORE_COLOR, FP1_CORE_COLOR, FP2_CORE_COLOR, FP3_CORE_COLOR};
use crate::encoder::Symbol;
use crate::encoder::matrix::{CodeParams, symbol_origin};
use crate::geometry::Vector2;
use crate::tables::MASK_PATTERN_NUMBER;

const W1: i32 = 100;
const W2: i32 = 3;
const W3: i32 = 3;

/// XOR value of mask `mask_type` at module `(x, y)`.
pub fn mask_value(mask_type: u8, x: i32, y: i32, color_number: usize) -> u8 {
	let n = color_number as i32;
	let v = match mask_type {
		0 => (x + y) % n,
		1 => x % n,
		2 => y % n,
		3 => (x / 2 + y / 3) % n,
		4 => (x / 3 + y / 2) % n,
		5 => ((x + y) / 2 + (x + y) / 3) % n,
		6 => ((x * x * y) % 7 + (2 * x * x + 2 * y) % 19) % n,
		7 => ((x * y * y) % 5 + (2 * x + y * y) % 13) % n,
		_ => 0,
	};
	v as u8
}

/// Finder-pattern-like cross detection (rule 1).
fn apply_rule1(matrix: &[i32], width: usize, height: usize, color_number: usize) -> i32 {
	let pairs: [(i32, i32); 4] = if color_number == 4 {
		[(0, 3), (1, 2), (2, 1), (3, 0)]
	} else {
		[
			(FP0_CORE_COLOR as i32, 7 - FP0_CORE_COLOR as i32),
			(FP1_CORE_COLOR as i32, 7 - FP1_CORE_COLOR as i32),
			(FP2_CORE_COLOR as i32, 7 - FP2_CORE_COLOR as i32),
			(FP3_CORE_COLOR as i32, 7 - FP3_CORE_COLOR as i32),
		]
	};

	let mut score = 0;
	for i in 2..height.saturating_sub(2) {
		for j in 2..width.saturating_sub(2) {
			let at = |dx: i32, dy: i32| {
				matrix[(i as i32 + dy) as usize * width + (j as i32 + dx) as usize]
			};
			for &(c1, c2) in &pairs {
				if at(-2, 0) == c1
					&& at(-1, 0) == c2
					&& at(0, 0) == c1
					&& at(1, 0) == c2
					&& at(2, 0) == c1
					&& at(0, -2) == c1
					&& at(0, -1) == c2
					&& at(0, 1) == c2
					&& at(0, 2) == c1
				{
					score += 1;
					break;
				}
			}
		}
	}
	W1 * score
}

/// 2x2 blocks of one color (rule 2).
fn apply_rule2(matrix: &[i32], width: usize, height: usize) -> i32 {
	let mut score = 0;
	for i in 0..height - 1 {
		for j in 0..width - 1 {
			let m = matrix[i * width + j];
			if m != -1
				&& matrix[i * width + j + 1] == m
				&& matrix[(i + 1) * width + j] == m
				&& matrix[(i + 1) * width + j + 1] == m
			{
				score += 1;
			}
		}
	}
	W2 * score
}

/// Runs of five or more same-colored modules (rule 3).
fn apply_rule3(matrix: &[i32], width: usize, height: usize) -> i32 {
	let mut score = 0;
	for k in 0..2 {
		let (maxi, maxj) = if k == 0 {
			(height, width)
		} else {
			(width, height)
		};
		for i in 0..maxi {
			let mut same_color_count = 0;
			let mut pre_color = -1;
			for j in 0..maxj {
				let cur_color = if k == 0 {
					matrix[i * width + j]
				} else {
					matrix[j * width + i]
				};
				if cur_color != -1 {
					if cur_color == pre_color {
						same_color_count += 1;
					} else {
						if same_color_count >= 5 {
							score += W3 + (same_color_count - 5);
						}
						same_color_count = 1;
						pre_color = cur_color;
					}
				} else {
					if same_color_count >= 5 {
						score += W3 + (same_color_count - 5);
					}
					same_color_count = 0;
					pre_color = -1;
				}
			}
			if same_color_count >= 5 {
				score += W3 + (same_color_count - 5);
			}
		}
	}
	score
}

fn evaluate_mask(matrix: &[i32], width: usize, height: usize, color_number: usize) -> i32 {
	apply_rule1(matrix, width, height, color_number)
		+ apply_rule2(matrix, width, height)
		+ apply_rule3(matrix, width, height)
}

/// Applies `mask_type` to the data modules of every symbol.
///
/// With a scoring canvas the masked module values are written there
/// instead of mutating the symbols.
pub(crate) fn mask_symbols(
	symbols: &mut [Symbol],
	positions: &[i32],
	color_number: usize,
	mask_type: u8,
	canvas: Option<(&mut [i32], &CodeParams)>,
) {
	let mut canvas = canvas;
	for (k, symbol) in symbols.iter_mut().enumerate() {
		let (start_x, start_y) = match &canvas {
			Some((_, cp)) => symbol_origin(cp, positions[k]),
			None => (0, 0),
		};
		let width = symbol.side_size.x;
		let height = symbol.side_size.y;
		for y in 0..height {
			for x in 0..width {
				let cell = (y * width + x) as usize;
				let index = symbol.matrix[cell];
				if symbol.data_map[cell] {
					let masked_value = index ^ mask_value(mask_type, x, y, color_number);
					match &mut canvas {
						Some((buffer, cp)) => {
							buffer[((y + start_y) * cp.code_size.x + (x + start_x)) as usize] =
								i32::from(masked_value);
						}
						None => symbol.matrix[cell] = masked_value,
					}
				} else if let Some((buffer, cp)) = &mut canvas {
					buffer[((y + start_y) * cp.code_size.x + (x + start_x)) as usize] =
						i32::from(index);
				}
			}
		}
	}
}

/// Scores all eight masks and applies the cheapest one permanently.
pub(crate) fn mask_code(
	symbols: &mut [Symbol],
	positions: &[i32],
	color_number: usize,
	cp: &CodeParams,
) -> u8 {
	let mut mask_type = 0u8;
	let mut min_penalty = i32::MAX;
	let mut canvas = vec![-1i32; (cp.code_size.x * cp.code_size.y) as usize];

	for t in 0..MASK_PATTERN_NUMBER as u8 {
		canvas.fill(-1);
		mask_symbols(symbols, positions, color_number, t, Some((&mut canvas, cp)));
		let penalty = evaluate_mask(
			&canvas,
			cp.code_size.x as usize,
			cp.code_size.y as usize,
			color_number,
		);
		if penalty < min_penalty {
			mask_type = t;
			min_penalty = penalty;
		}
	}

	mask_symbols(symbols, positions, color_number, mask_type, None);
	mask_type
}

/// Undoes the mask on decoded module values.
///
/// `data` holds one module value per data module in column-major reading
/// order; `data_map` marks non-data modules with `true`.
pub fn demask_symbol(
	data: &mut [u8],
	data_map: &[bool],
	symbol_size: Vector2,
	mask_type: u8,
	color_number: usize,
) {
	let width = symbol_size.x;
	let height = symbol_size.y;
	let mut count = 0usize;
	for x in 0..width {
		for y in 0..height {
			if !data_map[(y * width + x) as usize] {
				if count >= data.len() {
					return;
				}
				data[count] ^= mask_value(mask_type, x, y, color_number);
				count += 1;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn masks_are_self_inverse_on_modules() {
		for t in 0..8u8 {
			for n in [4usize, 8, 16, 256] {
				for (x, y) in [(0, 0), (3, 7), (20, 11), (144, 144)] {
					let v = mask_value(t, x, y, n);
					assert!((v as usize) < n);
					let module = 5u8 % n as u8;
					assert_eq!(module ^ v ^ v, module);
				}
			}
		}
	}

	#[test]
	fn rule2_counts_blocks() {
		// a 3x3 field of one color has four 2x2 blocks
		let matrix = vec![2i32; 9];
		assert_eq!(apply_rule2(&matrix, 3, 3), 4 * W2);
	}

	#[test]
	fn rule3_counts_runs_with_excess() {
		// one row of 7 equal modules: W3 + 2, twice (row + columns none)
		let mut matrix = vec![-1i32; 7 * 2];
		for j in 0..7 {
			matrix[j] = 3;
		}
		assert_eq!(apply_rule3(&matrix, 7, 2), W3 + 2);
	}

	#[test]
	fn rule1_detects_finder_like_cross() {
		// paint a black/white alternating cross in a 5x5 window
		let mut matrix = vec![2i32; 25];
		let (c1, c2) = (0i32, 7i32);
		for (d, c) in [(0i32, c1), (1, c2), (2, c1)] {
			matrix[(2 + d) as usize * 5 + 2] = c;
			matrix[(2 - d) as usize * 5 + 2] = c;
			matrix[2 * 5 + (2 + d) as usize] = c;
			matrix[2 * 5 + (2 - d) as usize] = c;
		}
		assert_eq!(apply_rule1(&matrix, 5, 5, 8), W1);
	}
}
