//! Adaptive encoding mode analysis.
//!
//! A dynamic program walks the input once and tracks, for every byte
//! position, the cheapest bit cost of ending in each of 14 mode states:
//! seven latched modes and seven shift variants that revert after one
//! character. Shift states propagate their cost back to the latched mode
//! they were invoked from; byte runs stay in the shifted byte state and
//! account for their length headers separately. The result is the mode
//! state per character plus the exact bit length of the encoding.

use crate::error::EncodeError;
use crate::tables::{CHARACTER_SIZE, CharEncoding, LATCH_SHIFT_TO, encoding_value};

const STATES: usize = 14;
const INVALID: usize = usize::MAX;

type Cost = Option<u32>;

fn add(a: Cost, b: Cost) -> Cost {
	Some(a?.checked_add(b?)?)
}

fn add3(a: Cost, b: Cost, c: Cost) -> Cost {
	add(add(a, b), c)
}

/// `a >= b` with `None` treated as unreachable (infinite).
fn ge(a: Cost, b: Cost) -> bool {
	match (a, b) {
		(None, _) => true,
		(Some(_), None) => false,
		(Some(a), Some(b)) => a >= b,
	}
}

/// `a > b` with `None` treated as unreachable (infinite).
fn gt(a: Cost, b: Cost) -> bool {
	match (a, b) {
		(None, None) => false,
		(None, Some(_)) => true,
		(Some(_), None) => false,
		(Some(a), Some(b)) => a > b,
	}
}

/// Result of the mode analysis.
#[derive(Debug)]
pub struct ModeSequence {
	/// Mode state per consumed character; index 0 is the initial mode.
	pub modes: Vec<usize>,
	/// Exact length of the encoded bit stream.
	pub encoded_length: usize,
}

/// Emission cost of `byte` in mode `j`, plus whether the two-byte
/// compression consumes the following byte.
fn emission(byte: u8, next: Option<u8>, j: usize) -> (Cost, bool) {
	match encoding_value(j, byte) {
		CharEncoding::Value(_) => (Some(CHARACTER_SIZE[j]), false),
		CharEncoding::Pair {
			lookahead,
			solo,
			..
		} => {
			if next == Some(lookahead) {
				(Some(CHARACTER_SIZE[j]), true)
			} else if solo.is_some() {
				(Some(CHARACTER_SIZE[j]), false)
			} else {
				(None, false)
			}
		}
		CharEncoding::None => (None, false),
	}
}

/// Chooses the cheapest mode state per character.
pub fn analyze(input: &[u8]) -> Result<ModeSequence, EncodeError> {
	let length = input.len();
	let mut curr_seq_len: Vec<Cost> = vec![None; (length + 2) * STATES];
	let mut prev_mode: Vec<usize> = vec![INVALID; (2 * length + 2) * STATES];
	let mut switch_mode: Vec<usize> = vec![INVALID; 2 * STATES];
	let mut temp_switch_mode: Vec<usize> = vec![INVALID; 2 * STATES];

	// encoding starts in upper case mode
	curr_seq_len[0] = Some(0);

	let mut curr_seq_counter = 0usize;
	let mut is_shift = false;
	let mut nb_char = 0usize;
	let mut end_of_loop = length;
	let mut jp_to_nxt_char;
	let mut confirm;
	let mut prev_mode_index = 0usize;

	let mut i = 0usize;
	while i < end_of_loop {
		let byte = input[nb_char];
		let next = input.get(nb_char + 1).copied();
		curr_seq_counter += 1;
		jp_to_nxt_char = false;
		confirm = false;

		// per-mode emission cost for this character
		for j in 0..6 {
			let (cost, jump) = emission(byte, next, j);
			curr_seq_len[(i + 1) * STATES + j] = cost;
			curr_seq_len[(i + 1) * STATES + j + 7] = cost;
			if jump {
				jp_to_nxt_char = true;
			}
		}
		// any byte is encodable in byte mode
		curr_seq_len[(i + 1) * STATES + 6] = Some(CHARACTER_SIZE[6]);
		curr_seq_len[(i + 1) * STATES + 13] = Some(CHARACTER_SIZE[6]);

		is_shift = false;
		for j in 0..STATES {
			let own = curr_seq_len[(i + 1) * STATES + j];
			let mut len = add3(own, curr_seq_len[i * STATES + j], LATCH_SHIFT_TO[j][j]);
			prev_mode[curr_seq_counter * STATES + j] = j;
			for k in 0..STATES - 1 {
				let cand = add3(own, curr_seq_len[i * STATES + k], LATCH_SHIFT_TO[k][j]);
				if ge(len, cand) {
					len = cand;
					if temp_switch_mode[2 * k] == k {
						prev_mode[curr_seq_counter * STATES + j] = temp_switch_mode[2 * k + 1];
					} else {
						prev_mode[curr_seq_counter * STATES + j] = k;
					}
				}
			}
			curr_seq_len[(i + 1) * STATES + j] = len;

			// shift states hand their result back to the latched mode the
			// shift was invoked from
			if j > 6 {
				let pm = prev_mode[curr_seq_counter * STATES + j];
				let pm_cost = if pm == INVALID {
					None
				} else {
					curr_seq_len[(i + 1) * STATES + pm]
				};
				let improves = gt(pm_cost, len)
					|| (jp_to_nxt_char
						&& pm != INVALID
						&& gt(add(pm_cost, Some(CHARACTER_SIZE[pm % 7])), len));
				if improves && j != 13 && pm != INVALID {
					// unwind shift chains to the underlying latched mode
					let mut index = pm;
					let mut back = 1usize;
					while index != INVALID && index > 6 && curr_seq_counter >= back {
						index = prev_mode[(curr_seq_counter - back) * STATES + index];
						back += 1;
					}
					if index <= 6 {
						curr_seq_len[(i + 1) * STATES + index] = len;
						prev_mode[(curr_seq_counter + 1) * STATES + index] = j;
						switch_mode[2 * index] = index;
						switch_mode[2 * index + 1] = j;
						is_shift = true;
						if jp_to_nxt_char && j == 11 {
							confirm = true;
							prev_mode_index = index;
						}
					}
				} else if improves && j == 13 && pm != INVALID {
					curr_seq_len[(i + 1) * STATES + pm] = len;
					prev_mode[(curr_seq_counter + 1) * STATES + pm] = j;
					switch_mode[2 * pm] = pm;
					switch_mode[2 * pm + 1] = j;
					is_shift = true;
				}
				if j != 13 {
					curr_seq_len[(i + 1) * STATES + j] = None;
				}
			}
		}

		temp_switch_mode.copy_from_slice(&switch_mode);
		switch_mode.fill(INVALID);

		if jp_to_nxt_char && confirm {
			for j in 0..STATES {
				if j != prev_mode_index {
					curr_seq_len[(i + 1) * STATES + j] = None;
				}
			}
			nb_char += 1;
			end_of_loop -= 1;
		}
		nb_char += 1;
		i += 1;
	}

	// pick the cheapest final state
	let steps = curr_seq_counter;
	let mut encoded_length: Cost = None;
	let mut current_mode = 0usize;
	for j in 0..STATES {
		let cost = curr_seq_len[steps * STATES + j];
		if gt(encoded_length, cost) {
			encoded_length = cost;
			current_mode = j;
		}
	}
	let mut encoded_length = encoded_length.ok_or(EncodeError::UnencodableCharacter {
		offset: 0,
	})? as usize;
	if current_mode > 6 {
		is_shift = true;
	}
	if is_shift && temp_switch_mode[2 * current_mode + 1] < STATES {
		current_mode = temp_switch_mode[2 * current_mode + 1];
	}

	// walk the predecessors back to the start and account for byte run
	// headers longer than 15 characters
	let mut modes = vec![0usize; steps + 1];
	modes[steps] = current_mode;
	let mut run = 0usize;
	for i in (1..=steps).rev() {
		if modes[i] == 13 || modes[i] == 6 {
			run += 1;
		} else {
			encoded_length += byte_run_extra(run, modes[i]);
			run = 0;
		}
		if i - 1 != 0 {
			let pm = prev_mode[i * STATES + modes[i]];
			if pm == INVALID {
				return Err(EncodeError::UnencodableCharacter {
					offset: i,
				});
			}
			modes[i - 1] = pm;
		} else {
			modes[0] = 0;
			if run > 15 {
				encoded_length += 13;
				encoded_length += byte_run_overflow_extra(run, 0);
			}
		}
	}

	Ok(ModeSequence {
		modes,
		encoded_length,
	})
}

/// Extra header bits for a byte run ending before mode state `after`.
fn byte_run_extra(run: usize, after: usize) -> usize {
	if run > 15 {
		13 + byte_run_overflow_extra(run, after)
	} else {
		0
	}
}

/// Extra bits when a byte run exceeds the 13-bit length extension and the
/// encoder must re-enter byte mode from the surrounding mode.
fn byte_run_overflow_extra(run: usize, around: usize) -> usize {
	if run <= 8207 {
		// 8207 = 2^13 + 15
		return 0;
	}
	let modeswitch = match around {
		0 | 1 | 7 | 8 => 11,
		2 | 9 => 10,
		5 | 12 => 12,
		_ => 11,
	};
	let reentries = run / 8207;
	let residual = run % 8207;
	let mut extra = reentries * modeswitch;
	if residual < 16 {
		extra += (reentries - 1) * 13;
	} else {
		extra += reentries * 13;
	}
	if residual == 0 {
		extra -= modeswitch;
	}
	extra
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn upper_case_stays_in_initial_mode() {
		let seq = analyze(b"HELLO").unwrap();
		assert_eq!(seq.modes, vec![0, 0, 0, 0, 0, 0]);
		assert_eq!(seq.encoded_length, 25);
	}

	#[test]
	fn latch_to_lower_case() {
		// 'H' upper (5) + latch to lower (5) + "ello" (4 x 5)
		let seq = analyze(b"Hello").unwrap();
		assert_eq!(seq.encoded_length, 30);
		assert_eq!(seq.modes[1], 0);
		assert!(seq.modes[2..].iter().all(|&m| m == 1));
	}

	#[test]
	fn digits_latch_to_numeric() {
		// latch upper->numeric costs 5, digits cost 4 each
		let seq = analyze(b"2345678").unwrap();
		assert_eq!(seq.encoded_length, 5 + 7 * 4);
		assert!(seq.modes[1..].iter().all(|&m| m == 2));
	}

	#[test]
	fn bytes_use_shifted_byte_mode() {
		let seq = analyze(&[0xE2, 0x82, 0xAC]).unwrap();
		// switch 11 (incl. 4-bit count) + 3 x 8
		assert_eq!(seq.encoded_length, 11 + 24);
		assert!(seq.modes[1..].iter().all(|&m| m == 13));
	}

	#[test]
	fn punctuation_uses_shift() {
		// 'A' (5) + shift to punct (5) + '.' (4) + 'B' (5)
		let seq = analyze(b"A.B").unwrap();
		assert_eq!(seq.encoded_length, 19);
		assert_eq!(seq.modes[2], 10);
	}

	#[test]
	fn comma_space_compresses_to_one_codeword() {
		// 'a' path: upper->lower latch; then shift-mixed pair ", " as one
		// 5-bit codeword, then 'b' back in lower mode
		let seq = analyze(b"a, b").unwrap();
		// 5 (latch) + 5 (a) + 7 (shift mixed) + 5 (pair) + 5 (b)
		assert_eq!(seq.encoded_length, 27);
		// the pair consumed two input bytes with one sequence step
		assert_eq!(seq.modes.len(), 4);
	}

	#[test]
	fn long_byte_run_adds_length_extension() {
		let data = vec![0xE2u8; 30];
		let seq = analyze(&data).unwrap();
		// switch 11 + 13-bit extension + 30 x 8
		assert_eq!(seq.encoded_length, 11 + 13 + 240);
	}

	#[test]
	fn empty_input_is_rejected_upstream() {
		// analyze itself tolerates empty input; the encoder rejects it
		let seq = analyze(b"").unwrap();
		assert_eq!(seq.modes.len(), 1);
	}
}
