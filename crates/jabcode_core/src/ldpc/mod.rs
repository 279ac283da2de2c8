//! LDPC error correction.
//!
//! Message data uses a Gallager-style regular `(wc, wr)` code: the parity
//! check matrix tiles consecutive runs of `wr` ones and derives the
//! remaining row blocks by a seeded column permutation. Metadata uses a
//! denser irregular code with rows filled by the same seeded shuffle.
//! Codewords longer than [`MAX_BLOCK_BITS`] are split into equal
//! sub-blocks, each encoded with its own smaller matrix.
//!
//! Decoding offers an iterative bit-flipping hard decision pass and a
//! belief-propagation soft decision pass, both capped at 25 iterations.

mod bit_matrix;

pub use bit_matrix::BitMatrix;

use rand::Rng;

use crate::pseudo_random::Lcg64;

/// Seed of the metadata parity matrix shuffle.
pub const LDPC_METADATA_SEED: u64 = 38545;
/// Seed of the message parity matrix shuffle.
pub const LDPC_MESSAGE_SEED: u64 = 785465;

/// Sub-block threshold in bits.
pub const MAX_BLOCK_BITS: usize = 2700;

const MAX_ITERATIONS: usize = 25;

/// Number of parity check rows for a codeword of `capacity` bits.
fn check_count(wc: i32, wr: i32, capacity: usize) -> usize {
	if wr < 4 {
		capacity / 2
	} else {
		capacity / wr as usize * wc as usize
	}
}

/// Builds the regular parity check matrix for message data.
fn create_matrix_a(wc: i32, wr: i32, capacity: usize) -> BitMatrix {
	let wc = wc as usize;
	let wr = wr as usize;
	let nb_pcb = check_count(wc as i32, wr as i32, capacity);
	let mut matrix = BitMatrix::new(nb_pcb, capacity);

	// first block: consecutive runs of wr ones
	for i in 0..capacity / wr {
		for j in 0..wr {
			matrix.set(i, i * wr + j, true);
		}
	}

	// remaining blocks: column permutations of the first block
	let mut permutation: Vec<usize> = (0..capacity).collect();
	let mut rng = Lcg64::new(LDPC_MESSAGE_SEED);
	for i in 1..wc {
		let off_index = i * (capacity / wr);
		for j in 0..capacity {
			let pos = rng.next_index(capacity - j);
			for k in 0..capacity / wr {
				matrix.set(off_index + k, j, matrix.get(k, permutation[pos]));
			}
			permutation.swap(capacity - 1 - j, pos);
		}
	}
	matrix
}

/// Builds the irregular parity check matrix for metadata.
fn create_metadata_matrix_a(wc: i32, capacity: usize) -> BitMatrix {
	let nb_pcb = capacity / 2;
	let mut matrix = BitMatrix::new(nb_pcb, capacity);
	let mut permutation: Vec<usize> = (0..capacity).collect();
	let mut rng = Lcg64::new(LDPC_METADATA_SEED);

	let nb_once = ((capacity * nb_pcb) as f32 / wc as f32 + 3.0) as usize / nb_pcb;
	for i in 0..nb_pcb {
		for j in 0..nb_once {
			let pos = rng.next_index(capacity - j);
			matrix.set(i, permutation[pos], true);
			permutation.swap(capacity - 1 - j, pos);
		}
	}
	matrix
}

/// Builds the parity check matrix for the given code parameters.
fn create_parity_matrix(wc: i32, wr: i32, capacity: usize) -> BitMatrix {
	if wr > 0 {
		create_matrix_a(wc, wr, capacity)
	} else {
		create_metadata_matrix_a(wc, capacity)
	}
}

/// Column-permuting Gauss-Jordan elimination over GF(2).
///
/// Reduces `matrix` towards `[I | C]`, recording column swaps and zero
/// rows. On the encoder side the reduced matrix replaces the input; on
/// the decoder side the unreduced rows are only re-arranged and
/// column-swapped so syndrome checks line up with the encoder layout.
/// Returns the matrix rank.
fn gauss_jordan(matrix: &mut BitMatrix, capacity: usize, encode: bool) -> usize {
	let nb_pcb = matrix.rows();
	let mut reduced = matrix.clone();

	let mut column_arrangement = vec![0usize; capacity];
	let mut processed_column = vec![false; capacity];
	let mut zero_lines_nb = vec![0usize; nb_pcb];
	let mut swap_col = vec![0usize; 2 * capacity];

	let mut loop_count = 0usize;
	let mut zero_lines = 0usize;

	for i in 0..nb_pcb {
		let pivot_column = (0..capacity).find(|&j| reduced.get(i, j));
		if let Some(pivot) = pivot_column {
			processed_column[pivot] = true;
			column_arrangement[pivot] = i;
			if pivot >= nb_pcb {
				swap_col[2 * loop_count] = pivot;
				loop_count += 1;
			}
			for j in 0..nb_pcb {
				if j != i && reduced.get(j, pivot) {
					reduced.row_xor(j, i);
				}
			}
		} else {
			zero_lines_nb[zero_lines] = i;
			zero_lines += 1;
		}
	}

	let matrix_rank = nb_pcb - zero_lines;

	let mut loop2 = 0usize;
	for i in matrix_rank..nb_pcb {
		if column_arrangement[i] > 0 {
			for j in 0..nb_pcb {
				if !processed_column[j] {
					column_arrangement[j] = column_arrangement[i];
					processed_column[j] = true;
					processed_column[i] = false;
					swap_col[2 * loop_count] = i;
					swap_col[2 * loop_count + 1] = j;
					column_arrangement[i] = j;
					loop_count += 1;
					loop2 += 1;
					break;
				}
			}
		}
	}

	let mut loop1 = 0usize;
	for kl in 0..nb_pcb {
		if !processed_column[kl] && loop1 < loop_count - loop2 {
			column_arrangement[kl] = column_arrangement[swap_col[2 * loop1]];
			processed_column[kl] = true;
			swap_col[2 * loop1 + 1] = kl;
			loop1 += 1;
		}
	}

	loop1 = 0;
	for kl in 0..nb_pcb {
		if !processed_column[kl] {
			column_arrangement[kl] = zero_lines_nb[loop1];
			loop1 += 1;
		}
	}

	// rearrange rows and apply the recorded column swaps
	let source = if encode { &reduced } else { &*matrix };
	let mut rearranged = BitMatrix::new(nb_pcb, capacity);
	for i in 0..nb_pcb {
		rearranged.copy_row_from(i, source, column_arrangement[i]);
	}
	for i in 0..loop_count {
		rearranged.swap_cols(swap_col[2 * i], swap_col[2 * i + 1]);
	}
	*matrix = rearranged;

	matrix_rank
}

/// Builds the generator matrix `G = [Cᵀ; I]` from the reduced matrix.
fn create_generator_matrix(matrix_a: &BitMatrix, capacity: usize, pn: usize) -> BitMatrix {
	let mut generator = BitMatrix::new(capacity, pn);
	// identity part for the message bits
	for i in 0..pn {
		generator.set(capacity - pn + i, i, true);
	}
	// Cᵀ part from the reduced parity matrix
	let m = capacity - pn;
	for row in 0..m {
		for col in 0..pn {
			generator.set(row, col, matrix_a.get(row, m + col));
		}
	}
	generator
}

/// Splits a gross length into sub-block parameters `(count, pg_sub, pn_sub)`.
fn sub_block_split(pg: usize, pn: usize, wc: i32, wr: i32) -> (usize, usize, usize) {
	let mut nb_sub_blocks = 1;
	for i in 1..10000 {
		if pg / i < MAX_BLOCK_BITS {
			nb_sub_blocks = i;
			break;
		}
	}
	if wr > 3 {
		let wr = wr as usize;
		let wc = wc as usize;
		let pg_sub = ((pg / nb_sub_blocks) / wr) * wr;
		let pn_sub = pg_sub * (wr - wc) / wr;
		(pg / pg_sub, pg_sub, pn_sub)
	} else {
		(1, pg, pn)
	}
}

/// Encodes one sub-block with a freshly derived generator matrix.
fn encode_sub_block(message: &[u8], wc: i32, wr: i32, pg_sub: usize, out: &mut [u8]) {
	let mut matrix = create_parity_matrix(wc, wr, pg_sub);
	let matrix_rank = gauss_jordan(&mut matrix, pg_sub, true);
	let generator = create_generator_matrix(&matrix, pg_sub, pg_sub - matrix_rank);
	for (i, slot) in out.iter_mut().enumerate().take(pg_sub) {
		*slot = generator.row_dot(i, message);
	}
}

/// LDPC-encodes one-bit-per-byte data.
///
/// For message data `wr > 0` selects the regular code; metadata passes a
/// non-positive `wr` and uses the dense metadata code at rate 1/2. The
/// returned buffer holds exactly `Pg` bits.
pub fn encode(data: &[u8], wc: i32, wr: i32) -> Vec<u8> {
	let pn = data.len();
	let pg = if wr > 0 {
		let wr = wr as usize;
		let wc = wc as usize;
		let gross = (pn * wr).div_ceil(wr - wc);
		gross.div_ceil(wr) * wr
	} else {
		pn * 2
	};

	let (nb_sub_blocks, pg_sub, pn_sub) = sub_block_split(pg, pn, wc, wr);
	let mut encoding_iterations = nb_sub_blocks;
	if pn_sub * nb_sub_blocks < pn {
		encoding_iterations -= 1;
	}

	let mut encoded = vec![0u8; pg];
	if encoding_iterations > 0 {
		let mut matrix = create_parity_matrix(wc, wr, pg_sub);
		let matrix_rank = gauss_jordan(&mut matrix, pg_sub, true);
		let generator = create_generator_matrix(&matrix, pg_sub, pg_sub - matrix_rank);
		for iter in 0..encoding_iterations {
			let message = &data[iter * pn_sub..(iter + 1) * pn_sub];
			for i in 0..pg_sub {
				encoded[iter * pg_sub + i] = generator.row_dot(i, message);
			}
		}
	}
	if encoding_iterations != nb_sub_blocks {
		let start = encoding_iterations * pn_sub;
		let last_index = encoding_iterations * pg_sub;
		let tail_pg = pg - last_index;
		let mut tail = vec![0u8; tail_pg];
		encode_sub_block(&data[start..], wc, wr, tail_pg, &mut tail);
		encoded[last_index..].copy_from_slice(&tail);
	}
	encoded
}

/// Iterative bit-flipping decoder for one sub-block.
///
/// Returns whether every check is satisfied after the final iteration.
fn decode_message_hd(
	data: &mut [u8],
	matrix: &BitMatrix,
	length: usize,
	height: usize,
	start_pos: usize,
	rng: &mut impl Rng,
) -> bool {
	let mut max_val = vec![0i32; length];
	let mut prev_index: Vec<usize> = Vec::new();

	for kl in 0..MAX_ITERATIONS {
		for j in 0..height {
			if matrix.row_dot(j, &data[start_pos..start_pos + length]) == 1 {
				for k in 0..length {
					if matrix.get(j, k) {
						max_val[k] += 1;
					}
				}
			}
		}

		// collect the columns involved in the most failed checks,
		// excluding the ones flipped in the previous iteration
		let mut max = 0i32;
		let mut equal_max: Vec<usize> = Vec::new();
		for j in 0..length {
			let is_used = prev_index.contains(&(start_pos + j));
			if max_val[j] >= max && !is_used {
				if max_val[j] != max {
					equal_max.clear();
				}
				max = max_val[j];
				equal_max.push(j);
			}
			max_val[j] = 0;
		}

		let mut is_correct = true;
		if max > 0 {
			is_correct = false;
			if length < 36 {
				// short codes flip one random candidate to avoid cycling
				let pick = equal_max[rng.random_range(0..equal_max.len())];
				data[start_pos + pick] ^= 1;
				prev_index = vec![start_pos + pick];
			} else {
				for &j in &equal_max {
					data[start_pos + j] ^= 1;
				}
				prev_index = equal_max.iter().map(|&j| start_pos + j).collect();
			}
		}

		if is_correct || kl + 1 == MAX_ITERATIONS {
			return is_correct;
		}
	}
	false
}

/// Checks the syndrome of one sub-block.
fn syndrome_ok(matrix: &BitMatrix, matrix_rank: usize, block: &[u8]) -> bool {
	(0..matrix_rank).all(|i| matrix.row_dot(i, block) == 0)
}

/// Normalizes the decoder-side code parameters.
///
/// Metadata blocks arrive with `wr <= 3`; their effective column weight
/// depends on the block length alone.
fn decoder_params(length: usize, wc: i32, wr: i32) -> (usize, usize, i32) {
	if wr > 3 {
		let pg = (length / wr as usize) * wr as usize;
		let pn = pg * (wr - wc) as usize / wr as usize;
		(pg, pn, wc)
	} else {
		let pn = length / 2;
		let wc = if pn > 36 {
			3
		} else {
			2
		};
		(length, pn, wc)
	}
}

/// Hard-decision LDPC decoding in place.
///
/// On success the first `Pn` bytes of `data` hold the message bits and
/// the message length is returned.
pub fn decode_hd(
	data: &mut [u8],
	length: usize,
	wc: i32,
	wr: i32,
	rng: &mut impl Rng,
) -> Option<usize> {
	let (pg, pn, wc) = decoder_params(length, wc, wr);
	let (nb_sub_blocks, pg_sub, pn_sub) = sub_block_split(pg, pn, wc, wr);
	let mut decoding_iterations = nb_sub_blocks;
	if pn_sub * nb_sub_blocks < pn {
		decoding_iterations -= 1;
	}

	let mut matrix = create_parity_matrix(wc, wr, pg_sub);
	let matrix_rank = gauss_jordan(&mut matrix, pg_sub, false);

	let old_pg_sub = pg_sub;
	let old_pn_sub = pn_sub;
	for iter in 0..nb_sub_blocks {
		let is_tail = decoding_iterations != nb_sub_blocks && iter == decoding_iterations;
		let block_pg = if is_tail {
			pg - decoding_iterations * old_pg_sub
		} else {
			pg_sub
		};
		let block_pn = if is_tail {
			block_pg * (wr - wc) as usize / wr as usize
		} else {
			pn_sub
		};
		let mut tail_matrix = None;
		let block_rank = if is_tail {
			let mut m = create_parity_matrix(wc, wr, block_pg);
			let rank = gauss_jordan(&mut m, block_pg, false);
			tail_matrix = Some(m);
			rank
		} else {
			matrix_rank
		};
		let block_matrix = tail_matrix.as_ref().unwrap_or(&matrix);

		let start_pos = iter * old_pg_sub;
		if !syndrome_ok(block_matrix, block_rank, &data[start_pos..start_pos + block_pg]) {
			decode_message_hd(data, block_matrix, block_pg, block_rank, start_pos, rng);
			if !syndrome_ok(block_matrix, block_rank, &data[start_pos..start_pos + block_pg]) {
				log::debug!("too many errors in message, LDPC decoding failed");
				return None;
			}
		}

		// move the message part to the front, dropping the parity bits
		for i in 0..block_pn {
			data[iter * old_pn_sub + i] = data[start_pos + block_rank + i];
		}
	}
	Some(pn)
}

/// Belief-propagation decoder for one sub-block.
fn decode_message_bp(
	enc: &mut [f32],
	matrix: &BitMatrix,
	length: usize,
	checkbits: usize,
	height: usize,
	start_pos: usize,
	dec: &mut [u8],
) -> bool {
	let mut lambda = vec![0f64; length];
	let mut old_nu_row = vec![0f64; height];
	let mut nu = vec![0f64; length * height];

	// the padded tail positions are known zeros
	for i in (length - (height - checkbits)..length).rev() {
		enc[start_pos + i] = 1.0;
		dec[start_pos + i] = 0;
	}

	// empirical variance of the reliability values
	let mean: f64 = (0..length).map(|i| f64::from(enc[start_pos + i])).sum::<f64>() / length as f64;
	let var: f64 = (0..length)
		.map(|i| {
			let d = f64::from(enc[start_pos + i]) - mean;
			d * d
		})
		.sum::<f64>()
		/ (length - 1) as f64;

	for i in 0..length {
		if dec[start_pos + i] != 0 {
			enc[start_pos + i] = -enc[start_pos + i];
		}
		lambda[i] = 2.0 * f64::from(enc[start_pos + i]) / var;
	}

	let mut index = vec![0usize; length];
	for kl in 0..MAX_ITERATIONS {
		// check node update: tanh-product rule
		for j in 0..height {
			let mut product = 1.0f64;
			let mut count = 0usize;
			for i in 0..length {
				if matrix.get(j, i) {
					if kl == 0 {
						product *= (lambda[i] * 0.5).tanh();
					} else {
						product *= (nu[j * length + i] * 0.5).tanh();
					}
					index[count] = i;
					count += 1;
				}
			}
			for &i in index.iter().take(count) {
				let t = if kl > 0 {
					(nu[j * length + i] * 0.5).tanh()
				} else {
					(lambda[i] * 0.5).tanh()
				};
				let (num, denum) = if t != 0.0 {
					(1.0 + product / t, 1.0 - product / t)
				} else {
					(1.0 + product, 1.0 - product)
				};
				nu[j * length + i] = if num == 0.0 {
					-1.0
				} else if denum == 0.0 {
					1.0
				} else {
					(num / denum).ln()
				};
			}
		}

		// variable node update
		for i in 0..length {
			let mut sum = 0.0f64;
			for k in 0..height {
				sum += nu[k * length + i];
				old_nu_row[k] = nu[k * length + i];
			}
			for k in 0..height {
				if matrix.get(k, i) {
					nu[k * length + i] = lambda[i] + (sum - old_nu_row[k]);
				}
			}
			lambda[i] = 2.0 * f64::from(enc[start_pos + i]) / var + sum;
			dec[start_pos + i] = u8::from(lambda[i] < 0.0);
		}

		// tentative decision against all checks
		let is_correct =
			(0..height).all(|i| matrix.row_dot(i, &dec[start_pos..start_pos + length]) == 0);
		if is_correct || kl + 1 == MAX_ITERATIONS {
			return is_correct;
		}
	}
	false
}

/// Soft-decision LDPC decoding.
///
/// `enc` carries a reliability value per bit position, `dec` the tentative
/// hard decisions. On success the first `Pn` bytes of `dec` hold the
/// message bits and the message length is returned.
pub fn decode_sd(enc: &mut [f32], length: usize, wc: i32, wr: i32, dec: &mut [u8]) -> Option<usize> {
	let (pg, pn, wc) = decoder_params(length, wc, wr);
	let (nb_sub_blocks, pg_sub, pn_sub) = sub_block_split(pg, pn, wc, wr);
	let mut decoding_iterations = nb_sub_blocks;
	if pn_sub * nb_sub_blocks < pn {
		decoding_iterations -= 1;
	}

	let mut matrix = create_parity_matrix(wc, wr, pg_sub);
	let matrix_rank = gauss_jordan(&mut matrix, pg_sub, false);

	let old_pg_sub = pg_sub;
	let old_pn_sub = pn_sub;
	for iter in 0..nb_sub_blocks {
		let is_tail = decoding_iterations != nb_sub_blocks && iter == decoding_iterations;
		let block_pg = if is_tail {
			pg - decoding_iterations * old_pg_sub
		} else {
			pg_sub
		};
		let block_pn = if is_tail {
			block_pg * (wr - wc) as usize / wr as usize
		} else {
			pn_sub
		};
		let mut tail_matrix = None;
		let block_rank = if is_tail {
			let mut m = create_parity_matrix(wc, wr, block_pg);
			let rank = gauss_jordan(&mut m, block_pg, false);
			tail_matrix = Some(m);
			rank
		} else {
			matrix_rank
		};
		let block_matrix = tail_matrix.as_ref().unwrap_or(&matrix);

		let start_pos = iter * old_pg_sub;
		if !syndrome_ok(block_matrix, block_rank, &dec[start_pos..start_pos + block_pg]) {
			let height = check_count(wc, wr, block_pg);
			decode_message_bp(enc, block_matrix, block_pg, block_rank, height, start_pos, dec);
			if !syndrome_ok(block_matrix, block_rank, &dec[start_pos..start_pos + block_pg]) {
				return None;
			}
		}

		for i in 0..block_pn {
			dec[iter * old_pn_sub + i] = dec[start_pos + block_rank + i];
		}
	}
	Some(pn)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::SmallRng;

	fn bits(len: usize, seed: u64) -> Vec<u8> {
		let mut rng = Lcg64::new(seed);
		(0..len).map(|_| (rng.next_u32() & 1) as u8).collect()
	}

	#[test]
	fn encode_length_matches_code_rate() {
		let data = bits(100, 1);
		let encoded = encode(&data, 4, 7);
		// Pg is the gross length rounded up to a multiple of wr
		assert_eq!(encoded.len() % 7, 0);
		assert!(encoded.len() >= 100 * 7 / 3);
	}

	#[test]
	fn clean_roundtrip_over_wcwr_pairs() {
		let mut rng = SmallRng::seed_from_u64(7);
		for &(wc, wr) in &[(3i32, 4i32), (4, 7), (3, 8), (4, 9), (5, 6), (6, 7)] {
			for len in [30usize, 100, 331] {
				let data = bits(len, (wc * 100 + wr) as u64 + len as u64);
				let mut encoded = encode(&data, wc, wr);
				let pg = encoded.len();
				let pn = decode_hd(&mut encoded, pg, wc, wr, &mut rng)
					.unwrap_or_else(|| panic!("decode failed for ({wc},{wr}) len {len}"));
				assert!(pn >= len, "({wc},{wr}) len {len}: pn {pn}");
				assert_eq!(&encoded[..len], &data[..], "({wc},{wr}) len {len}");
			}
		}
	}

	#[test]
	fn hd_corrects_flipped_bits() {
		let mut rng = SmallRng::seed_from_u64(99);
		let data = bits(200, 3);
		let clean = encode(&data, 4, 6);
		for flip in [3usize, 57, 200, 301] {
			let mut noisy = clean.clone();
			let noisy_len = noisy.len();
			noisy[flip % noisy_len] ^= 1;
			let pn = decode_hd(&mut noisy, clean.len(), 4, 6, &mut rng);
			assert_eq!(pn, Some(200));
			assert_eq!(&noisy[..200], &data[..]);
		}
	}

	#[test]
	fn metadata_code_roundtrip() {
		let mut rng = SmallRng::seed_from_u64(5);
		// master metadata Part I (net 3 bits) and Part II (net 19 bits)
		for net in [3usize, 19] {
			let data = bits(net, net as u64);
			let mut encoded = encode(&data, 2, -1);
			assert_eq!(encoded.len(), net * 2);
			let wc = if encoded.len() > 36 {
				4
			} else {
				3
			};
			let pn = decode_hd(&mut encoded, net * 2, wc, 0, &mut rng);
			assert_eq!(pn, Some(net));
			assert_eq!(&encoded[..net], &data[..]);
		}
	}

	#[test]
	fn long_codeword_splits_into_sub_blocks() {
		let mut rng = SmallRng::seed_from_u64(11);
		let data = bits(3000, 17);
		let mut encoded = encode(&data, 3, 7);
		let pg = encoded.len();
		assert!(pg > MAX_BLOCK_BITS);
		let pn = decode_hd(&mut encoded, pg, 3, 7, &mut rng).expect("decode failed");
		assert!(pn >= 3000);
		assert_eq!(&encoded[..3000], &data[..]);
	}

	#[test]
	fn soft_decision_recovers_an_unreliable_flip() {
		let data = bits(120, 23);
		let encoded = encode(&data, 4, 7);
		let pg = encoded.len();
		// reliabilities with some spread so the empirical variance is sane
		let mut enc: Vec<f32> = (0..pg).map(|i| 0.6 + 0.4 * ((i % 7) as f32 / 7.0)).collect();
		let mut dec = encoded.clone();
		// one wrong tentative decision, flagged as barely reliable
		dec[31] ^= 1;
		enc[31] = 0.05;
		let pn = decode_sd(&mut enc, pg, 4, 7, &mut dec).expect("soft decode failed");
		assert!(pn >= 120);
		assert_eq!(&dec[..120], &data[..]);
	}
}
