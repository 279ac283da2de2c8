//! Bit stream interpretation.
//!
//! Replays the mode state machine over the decoded payload bits: a running
//! `(mode, previous mode)` pair consults the per-mode alphabets, shift
//! modes revert after one character, and reserved codewords switch modes
//! or expand to two-byte sequences.

use crate::tables::{
	CHARACTER_SIZE, DECODING_TABLE_ALPHANUMERIC, DECODING_TABLE_LOWER, DECODING_TABLE_MIXED,
	DECODING_TABLE_NUMERIC, DECODING_TABLE_PUNCT, DECODING_TABLE_UPPER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
	None,
	Upper,
	Lower,
	Numeric,
	Punct,
	Mixed,
	Alphanumeric,
	Byte,
	Eci,
	Fnc1,
}

/// Reads up to `length` bits MSB first; returns the value and bit count.
fn read_value(bits: &[u8], start: usize, length: usize) -> (u32, usize) {
	let mut value = 0u32;
	let mut read = 0usize;
	for i in start..(start + length).min(bits.len()) {
		value += u32::from(bits[i]) << (length - 1 - (i - start));
		read += 1;
	}
	(value, read)
}

/// Decodes the payload bit stream into bytes.
///
/// Returns `None` when the stream breaks off inside a codeword that must
/// be complete (byte counts and byte data).
pub fn decode_data(bits: &[u8]) -> Option<Vec<u8>> {
	let mut decoded: Vec<u8> = Vec::with_capacity(bits.len() / 4);
	let mut mode = Mode::Upper;
	let mut pre_mode = Mode::None;
	let mut index = 0usize;

	while index < bits.len() {
		let mut stop = false;
		let mut value = 0u32;
		if mode != Mode::Byte {
			let size = character_size(mode) as usize;
			let (v, n) = read_value(bits, index, size);
			if n < size {
				break;
			}
			value = v;
			index += size;
		}

		match mode {
			Mode::Upper => {
				if value <= 26 {
					decoded.push(DECODING_TABLE_UPPER[value as usize]);
					if pre_mode != Mode::None {
						mode = pre_mode;
						pre_mode = Mode::None;
					}
				} else {
					match value {
						27 => {
							pre_mode = Mode::Upper;
							mode = Mode::Punct;
						}
						28 => {
							mode = Mode::Lower;
							pre_mode = Mode::None;
						}
						29 => {
							mode = Mode::Numeric;
							pre_mode = Mode::None;
						}
						30 => {
							mode = Mode::Alphanumeric;
							pre_mode = Mode::None;
						}
						31 => {
							let (v, n) = read_value(bits, index, 2);
							if n < 2 {
								stop = true;
							} else {
								index += 2;
								match v {
									0 => {
										mode = Mode::Byte;
										pre_mode = Mode::Upper;
									}
									1 => {
										mode = Mode::Mixed;
										pre_mode = Mode::Upper;
									}
									2 => {
										mode = Mode::Eci;
										pre_mode = Mode::None;
									}
									// end of message
									_ => stop = true,
								}
							}
						}
						_ => return None,
					}
				}
			}
			Mode::Lower => {
				if value <= 26 {
					decoded.push(DECODING_TABLE_LOWER[value as usize]);
					if pre_mode != Mode::None {
						mode = pre_mode;
						pre_mode = Mode::None;
					}
				} else {
					match value {
						27 => {
							pre_mode = Mode::Lower;
							mode = Mode::Punct;
						}
						28 => {
							pre_mode = Mode::Lower;
							mode = Mode::Upper;
						}
						29 => {
							mode = Mode::Numeric;
							pre_mode = Mode::None;
						}
						30 => {
							mode = Mode::Alphanumeric;
							pre_mode = Mode::None;
						}
						31 => {
							let (v, n) = read_value(bits, index, 2);
							if n < 2 {
								stop = true;
							} else {
								index += 2;
								match v {
									0 => {
										mode = Mode::Byte;
										pre_mode = Mode::Lower;
									}
									1 => {
										mode = Mode::Mixed;
										pre_mode = Mode::Lower;
									}
									2 => {
										mode = Mode::Upper;
										pre_mode = Mode::None;
									}
									_ => {
										mode = Mode::Fnc1;
										pre_mode = Mode::None;
									}
								}
							}
						}
						_ => return None,
					}
				}
			}
			Mode::Numeric => {
				if value <= 12 {
					decoded.push(DECODING_TABLE_NUMERIC[value as usize]);
					if pre_mode != Mode::None {
						mode = pre_mode;
						pre_mode = Mode::None;
					}
				} else {
					match value {
						13 => {
							pre_mode = Mode::Numeric;
							mode = Mode::Punct;
						}
						14 => {
							mode = Mode::Upper;
							pre_mode = Mode::None;
						}
						15 => {
							let (v, n) = read_value(bits, index, 2);
							if n < 2 {
								stop = true;
							} else {
								index += 2;
								match v {
									0 => {
										mode = Mode::Byte;
										pre_mode = Mode::Numeric;
									}
									1 => {
										mode = Mode::Mixed;
										pre_mode = Mode::Numeric;
									}
									2 => {
										mode = Mode::Upper;
										pre_mode = Mode::Numeric;
									}
									_ => {
										mode = Mode::Lower;
										pre_mode = Mode::None;
									}
								}
							}
						}
						_ => return None,
					}
				}
			}
			Mode::Punct => {
				if value <= 15 {
					decoded.push(DECODING_TABLE_PUNCT[value as usize]);
					mode = pre_mode;
					pre_mode = Mode::None;
				} else {
					return None;
				}
			}
			Mode::Mixed => {
				if value <= 31 {
					match value {
						19 => {
							decoded.push(13);
							decoded.push(10);
						}
						20 => {
							decoded.push(44);
							decoded.push(32);
						}
						21 => {
							decoded.push(46);
							decoded.push(32);
						}
						22 => {
							decoded.push(58);
							decoded.push(32);
						}
						_ => decoded.push(DECODING_TABLE_MIXED[value as usize]),
					}
					mode = pre_mode;
					pre_mode = Mode::None;
				} else {
					return None;
				}
			}
			Mode::Alphanumeric => {
				if value <= 62 {
					decoded.push(DECODING_TABLE_ALPHANUMERIC[value as usize]);
					if pre_mode != Mode::None {
						mode = pre_mode;
						pre_mode = Mode::None;
					}
				} else if value == 63 {
					let (v, n) = read_value(bits, index, 2);
					if n < 2 {
						stop = true;
					} else {
						index += 2;
						match v {
							0 => {
								mode = Mode::Byte;
								pre_mode = Mode::Alphanumeric;
							}
							1 => {
								mode = Mode::Mixed;
								pre_mode = Mode::Alphanumeric;
							}
							2 => {
								mode = Mode::Punct;
								pre_mode = Mode::Alphanumeric;
							}
							_ => {
								mode = Mode::Upper;
								pre_mode = Mode::None;
							}
						}
					}
				} else {
					return None;
				}
			}
			Mode::Byte => {
				let (count, n) = read_value(bits, index, 4);
				if n < 4 {
					return None;
				}
				index += 4;
				let mut byte_length = count as usize;
				if count == 0 {
					let (ext, n) = read_value(bits, index, 13);
					if n < 13 {
						return None;
					}
					index += 13;
					// the number of encoded bytes is the extension + 16
					byte_length = ext as usize + 15 + 1;
				}
				for _ in 0..byte_length {
					let (v, n) = read_value(bits, index, 8);
					if n < 8 {
						return None;
					}
					index += 8;
					decoded.push(v as u8);
				}
				mode = pre_mode;
				pre_mode = Mode::None;
			}
			Mode::Eci | Mode::Fnc1 => {
				// reserved mode switches carry no payload semantics here
				break;
			}
			Mode::None => break,
		}
		if stop {
			break;
		}
	}
	Some(decoded)
}

fn character_size(mode: Mode) -> u32 {
	match mode {
		Mode::Upper => CHARACTER_SIZE[0],
		Mode::Lower => CHARACTER_SIZE[1],
		Mode::Numeric => CHARACTER_SIZE[2],
		Mode::Punct => CHARACTER_SIZE[3],
		Mode::Mixed => CHARACTER_SIZE[4],
		Mode::Alphanumeric => CHARACTER_SIZE[5],
		_ => CHARACTER_SIZE[6],
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::encoder::analyzer::analyze;
	use crate::encoder::bits::encode_data;

	fn roundtrip(input: &[u8]) -> Vec<u8> {
		let seq = analyze(input).unwrap();
		let bits = encode_data(input, &seq).unwrap();
		decode_data(&bits).unwrap()
	}

	#[test]
	fn text_alphabets_roundtrip() {
		for case in [
			&b"HELLO"[..],
			b"Hello",
			b"hello world",
			b"abc123",
			b"0123456789",
			b"UPPER lower 42!",
			b"name@example.com",
			b"A.B?C!",
		] {
			assert_eq!(roundtrip(case), case, "case {case:?}");
		}
	}

	#[test]
	fn byte_mode_roundtrip() {
		let utf8 = "€".as_bytes();
		assert_eq!(roundtrip(utf8), utf8);
		let blob: Vec<u8> = (0u16..256).map(|v| v as u8).collect();
		assert_eq!(roundtrip(&blob), blob);
	}

	#[test]
	fn mixed_pairs_roundtrip() {
		for case in [&b"a, b"[..], b"end. start", b"key: value", b"line\r\nnext"] {
			assert_eq!(roundtrip(case), case, "case {case:?}");
		}
	}

	#[test]
	fn long_byte_run_roundtrip() {
		let blob = vec![0xA5u8; 100];
		assert_eq!(roundtrip(&blob), blob);
	}

	#[test]
	fn trailing_zero_bits_decode_as_nothing_harmful() {
		let seq = analyze(b"HI").unwrap();
		let bits = encode_data(b"HI", &seq).unwrap();
		// the payload slice handed to the decoder ends exactly at the
		// message end, so nothing follows; a truncated tail must not panic
		let decoded = decode_data(&bits[..bits.len() - 2]).unwrap();
		assert_eq!(decoded, b"H");
	}
}
