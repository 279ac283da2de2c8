//! Error types for encoding and decoding.

use thiserror::Error;

/// Errors raised while building a code from a payload.
#[derive(Debug, Error)]
pub enum EncodeError {
	/// Empty payload.
	#[error("No input data specified")]
	EmptyInput,

	/// A symbol version is outside 1..=32.
	#[error("Incorrect symbol version for symbol {index}")]
	InvalidVersion {
		/// Index of the offending symbol.
		index: usize,
	},

	/// A symbol position is outside the placement grid.
	#[error("Incorrect symbol position for symbol {index}")]
	InvalidPosition {
		/// Index of the offending symbol.
		index: usize,
	},

	/// No symbol was placed at the master position 0.
	#[error("Master symbol missing")]
	MasterMissing,

	/// The same grid position was specified twice.
	#[error("Duplicate symbol position")]
	DuplicatePosition,

	/// A slave symbol does not touch any host.
	#[error("Slave symbol at position {position} has no host")]
	UndockedSymbol {
		/// Placement grid position of the slave.
		position: i32,
	},

	/// Docked symbols disagree on the shared side version.
	#[error(
		"Slave symbol at position {slave_position} has a different side version than its host at position {host_position}"
	)]
	DockedSideMismatch {
		/// Placement grid position of the slave.
		slave_position: i32,
		/// Placement grid position of the host.
		host_position: i32,
	},

	/// The payload exceeds the capacity of the configured symbols.
	#[error("Message does not fit into the specified code")]
	DataTooLong,

	/// A character cannot be represented in any encoding mode transition.
	#[error("Encoding data failed at byte offset {offset}")]
	UnencodableCharacter {
		/// Offset of the byte that could not be encoded.
		offset: usize,
	},
}

/// Errors raised while reading a code from a bitmap.
#[derive(Debug, Error)]
pub enum DecodeError {
	/// Fewer than three finder patterns were located.
	#[error("Code not detectable: {reason}")]
	NotDetectable {
		/// What the detector was missing.
		reason: &'static str,
	},

	/// The code was located but its content could not be recovered.
	#[error("Code not decodable: {reason}")]
	NotDecodable {
		/// Which stage failed.
		reason: &'static str,
	},
}

/// Result of a decode run in compatible mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
	/// Every symbol was decoded.
	Full,
	/// Some symbols failed; the payload covers the decodable prefix.
	Partial,
}
