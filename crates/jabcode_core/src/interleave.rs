//! Deterministic bit interleaving.
//!
//! The encoded bit stream is permuted by a Fisher–Yates shuffle driven by
//! the fixed interleave seed, so bursts of damaged modules spread evenly
//! over the LDPC codeword. The decoder rebuilds the permutation with the
//! same generator and scatters the values back.

use crate::pseudo_random::Lcg64;

/// Seed of the interleaving permutation.
pub const INTERLEAVE_SEED: u64 = 226759;

/// In-place interleaving of one-bit-per-byte data.
pub fn interleave(data: &mut [u8]) {
	let mut rng = Lcg64::new(INTERLEAVE_SEED);
	let len = data.len();
	for i in 0..len {
		let pos = rng.next_index(len - i);
		data.swap(len - 1 - i, pos);
	}
}

/// In-place deinterleaving, the inverse of [`interleave`].
pub fn deinterleave(data: &mut [u8]) {
	let len = data.len();
	let mut index: Vec<usize> = (0..len).collect();

	// replay the permutation on an index array
	let mut rng = Lcg64::new(INTERLEAVE_SEED);
	for i in 0..len {
		let pos = rng.next_index(len - i);
		index.swap(len - 1 - i, pos);
	}

	// scatter the values back to their original positions
	let tmp = data.to_vec();
	for (i, &idx) in index.iter().enumerate() {
		data[idx] = tmp[i];
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn interleave_is_a_permutation() {
		for len in [1usize, 2, 7, 64, 313, 1024] {
			let mut data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
			let mut counts_before = [0u32; 256];
			for &b in &data {
				counts_before[b as usize] += 1;
			}
			interleave(&mut data);
			let mut counts_after = [0u32; 256];
			for &b in &data {
				counts_after[b as usize] += 1;
			}
			assert_eq!(counts_before, counts_after);
		}
	}

	#[test]
	fn deinterleave_inverts_interleave() {
		for len in [1usize, 5, 38, 100, 999] {
			let original: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
			let mut data = original.clone();
			interleave(&mut data);
			if len > 2 {
				assert_ne!(data, original);
			}
			deinterleave(&mut data);
			assert_eq!(data, original);
		}
	}
}
