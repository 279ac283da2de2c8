//! Benchmark helper utilities for `jabcode-rs`.
//!
//! Provides deterministic synthetic payloads so benchmark runs are
//! comparable across machines and revisions.

/// Generates a deterministic pseudo random payload of `len` bytes.
pub fn synthetic_payload(len: usize) -> Vec<u8> {
	let mut state = 0x2545_F491_4F6C_DD1Du64;
	(0..len)
		.map(|_| {
			state ^= state << 13;
			state ^= state >> 7;
			state ^= state << 17;
			(state >> 32) as u8
		})
		.collect()
}

/// Generates readable mixed-mode text of roughly `len` bytes.
pub fn synthetic_text(len: usize) -> Vec<u8> {
	let sentence = b"The 39 quick brown foxes jump over 7 lazy dogs, again and again. ";
	sentence.iter().copied().cycle().take(len).collect()
}

/// Common payload sizes.
pub mod sizes {
	/// A short tag, fits a version-1 symbol.
	pub const SHORT: usize = 16;
	/// A typical URL-sized payload.
	pub const MEDIUM: usize = 128;
	/// A large payload crossing the LDPC sub-block threshold.
	pub const LARGE: usize = 1024;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn payload_is_deterministic() {
		assert_eq!(synthetic_payload(64), synthetic_payload(64));
		assert_eq!(synthetic_payload(64).len(), 64);
	}

	#[test]
	fn text_is_ascii() {
		assert!(synthetic_text(200).iter().all(u8::is_ascii));
	}
}
