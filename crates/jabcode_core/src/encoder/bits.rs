//! Bit stream emission for an analyzed mode sequence.
//!
//! Follows the mode states chosen by the analyzer and writes switch
//! codewords, character codewords and byte run headers. The output buffer
//! holds one bit per byte, sized exactly by the analyzer.

use crate::error::EncodeError;
use crate::tables::{CHARACTER_SIZE, CharEncoding, LATCH_SHIFT_TO, MODE_SWITCH, encoding_value};

use super::analyzer::ModeSequence;

/// Writes `length` bits of `value` MSB first at `position`.
fn write_bits(
	out: &mut [u8],
	position: usize,
	value: u32,
	length: u32,
	offset: usize,
) -> Result<usize, EncodeError> {
	let length = length as usize;
	if position + length > out.len() {
		return Err(EncodeError::UnencodableCharacter {
			offset,
		});
	}
	for j in 0..length {
		out[position + length - 1 - j] = ((value >> j) & 1) as u8;
	}
	Ok(position + length)
}

/// Emits the encoded bit stream for `data` along the analyzed sequence.
pub fn encode_data(data: &[u8], sequence: &ModeSequence) -> Result<Vec<u8>, EncodeError> {
	let mut modes = sequence.modes.clone();
	let mut encoded = vec![0u8; sequence.encoded_length];

	let mut counter = 0usize;
	let mut shift_back = false;
	let mut position = 0usize;
	let mut current_index = 0usize;
	let mut end_of_loop = data.len();
	let mut byte_offset = 0usize;
	let mut byte_counter = 0usize;
	let mut factor = 1usize;

	let mut i = 0usize;
	while i < end_of_loop {
		let byte = data[current_index];
		let err = EncodeError::UnencodableCharacter {
			offset: current_index,
		};

		// mode switch
		if modes[counter] != modes[counter + 1] {
			let mut length = LATCH_SHIFT_TO[modes[counter]][modes[counter + 1]].ok_or(
				EncodeError::UnencodableCharacter {
					offset: current_index,
				},
			)?;
			if modes[counter + 1] == 6 || modes[counter + 1] == 13 {
				// the byte switch codeword excludes the 4-bit count header
				length -= 4;
			}
			let word = MODE_SWITCH
				.get(modes[counter])
				.and_then(|row| row[modes[counter + 1]])
				.ok_or(err)?;
			position = write_bits(&mut encoded, position, word, length, current_index)?;
			if modes[counter + 1] > 6 {
				shift_back = true;
			}
		}

		if modes[counter + 1] % 7 != 6 {
			// text modes
			let mode = modes[counter + 1] % 7;
			match encoding_value(mode, byte) {
				CharEncoding::Value(value) => {
					position = write_bits(
						&mut encoded,
						position,
						u32::from(value),
						CHARACTER_SIZE[mode],
						current_index,
					)?;
					counter += 1;
				}
				CharEncoding::Pair {
					value,
					lookahead,
					solo,
				} => {
					let next = data.get(current_index + 1).copied();
					let codeword = if next == Some(lookahead) {
						end_of_loop -= 1;
						current_index += 1;
						value
					} else {
						solo.ok_or(EncodeError::UnencodableCharacter {
							offset: current_index,
						})?
					};
					position = write_bits(
						&mut encoded,
						position,
						u32::from(codeword),
						CHARACTER_SIZE[mode],
						current_index,
					)?;
					counter += 1;
				}
				CharEncoding::None => {
					return Err(EncodeError::UnencodableCharacter {
						offset: current_index,
					});
				}
			}
		} else {
			// byte mode
			if modes[counter] != modes[counter + 1] {
				// run length header at the start of the run
				byte_counter = 0;
				let mut l = counter + 1;
				while l < modes.len() && (modes[l] == 6 || modes[l] == 13) {
					byte_counter += 1;
					l += 1;
				}
				let head = if byte_counter > 15 {
					0
				} else {
					byte_counter as u32
				};
				position = write_bits(&mut encoded, position, head, 4, current_index)?;
				if byte_counter > 15 {
					let ext = if byte_counter <= 8207 {
						(byte_counter - 15 - 1) as u32
					} else {
						8191
					};
					position = write_bits(&mut encoded, position, ext, 13, current_index)?;
				}
				byte_offset = byte_counter;
			}
			if byte_offset - byte_counter == factor * 8207 {
				// the run exceeded 2^13 + 15 bytes: re-enter byte mode
				let around = modes[counter - (byte_offset - byte_counter)];
				match around {
					0 | 1 | 7 | 8 => {
						position = write_bits(&mut encoded, position, 124, 7, current_index)?;
					}
					2 | 9 => {
						position = write_bits(&mut encoded, position, 60, 5, current_index)?;
					}
					5 | 12 => {
						position = write_bits(&mut encoded, position, 252, 8, current_index)?;
					}
					_ => {}
				}
				let head = if byte_counter > 15 {
					0
				} else {
					byte_counter as u32
				};
				position = write_bits(&mut encoded, position, head, 4, current_index)?;
				if byte_counter > 15 {
					let ext = if byte_counter <= 8207 {
						(byte_counter - 15 - 1) as u32
					} else {
						8191
					};
					position = write_bits(&mut encoded, position, ext, 13, current_index)?;
				}
				factor += 1;
			}
			position =
				write_bits(&mut encoded, position, u32::from(byte), CHARACTER_SIZE[6], current_index)?;
			counter += 1;
			byte_counter -= 1;
		}

		// shift states revert after one character
		if shift_back && byte_counter == 0 {
			modes[counter] = if byte_offset == 0 {
				modes[counter - 1]
			} else {
				modes[counter - byte_offset]
			};
			shift_back = false;
			byte_offset = 0;
		}

		current_index += 1;
		i += 1;
	}
	Ok(encoded)
}

#[cfg(test)]
mod tests {
	use super::super::analyzer::analyze;
	use super::*;

	fn bits_to_string(bits: &[u8]) -> String {
		bits.iter().map(|&b| char::from(b'0' + b)).collect()
	}

	#[test]
	fn upper_case_emits_plain_codewords() {
		let seq = analyze(b"AB").unwrap();
		let bits = encode_data(b"AB", &seq).unwrap();
		// A = 1, B = 2, 5 bits each
		assert_eq!(bits_to_string(&bits), "0000100010");
	}

	#[test]
	fn latch_word_precedes_lower_case() {
		let seq = analyze(b"Ha").unwrap();
		let bits = encode_data(b"Ha", &seq).unwrap();
		// H = 8, latch to lower = 28, a = 1
		assert_eq!(bits_to_string(&bits), "010001110000001");
	}

	#[test]
	fn byte_mode_header_counts_run() {
		let data = [0xE2u8, 0x82, 0xAC];
		let seq = analyze(&data).unwrap();
		let bits = encode_data(&data, &seq).unwrap();
		assert_eq!(bits.len(), seq.encoded_length);
		// switch word 124 in 7 bits, count 3 in 4 bits, then the bytes
		assert_eq!(&bits_to_string(&bits)[..11], "11111000011");
		assert_eq!(&bits_to_string(&bits)[11..19], "11100010");
	}

	#[test]
	fn long_byte_run_uses_length_extension() {
		let data = vec![0x01u8; 20];
		let seq = analyze(&data).unwrap();
		let bits = encode_data(&data, &seq).unwrap();
		assert_eq!(bits.len(), seq.encoded_length);
		// count field is 0, then 13-bit extension holding 20-16
		assert_eq!(&bits_to_string(&bits)[7..11], "0000");
		assert_eq!(&bits_to_string(&bits)[11..24], "0000000000100");
	}

	#[test]
	fn pair_compression_consumes_two_bytes() {
		let input = b"a, b";
		let seq = analyze(input).unwrap();
		let bits = encode_data(input, &seq).unwrap();
		assert_eq!(bits.len(), seq.encoded_length);
		assert_eq!(bits.len(), 27);
	}

	#[test]
	fn emitted_length_always_matches_analysis() {
		let cases: [&[u8]; 6] = [
			b"JAB",
			b"Hello World",
			b"abc123",
			b"A.B,C: D",
			&[0u8, 255, 128, 7],
			b"The quick brown fox jumps over 13 lazy dogs.",
		];
		for data in cases {
			let seq = analyze(data).unwrap();
			let bits = encode_data(data, &seq).unwrap();
			assert_eq!(bits.len(), seq.encoded_length, "case {data:?}");
			assert!(bits.iter().all(|&b| b <= 1));
		}
	}
}
