//! Symbol planning and code generation.
//!
//! The encoder analyzes the payload, sizes and docks symbols, splits the
//! payload proportionally to each symbol's net capacity, protects every
//! part with LDPC, interleaves, builds the module matrices and finally
//! masks and rasterizes the whole code.

pub(crate) mod analyzer;
pub(crate) mod bits;
pub(crate) mod matrix;

use serde::{Deserialize, Serialize};

use crate::bitmap::Bitmap;
use crate::color::default_palette;
use crate::error::EncodeError;
use crate::geometry::Vector2;
use crate::interleave::interleave;
use crate::ldpc;
use crate::mask::{mask_code, mask_symbols};
use crate::tables::{
	DEFAULT_COLOR_NUMBER, DEFAULT_ECC_LEVEL, DEFAULT_MASKING_REFERENCE, DEFAULT_MODULE_SIZE,
	DEFAULT_SYMBOL_NUMBER, ECC_LEVEL_TO_WCWR, MASTER_METADATA_PART1_LENGTH,
	MASTER_METADATA_PART1_MODULE_NUMBER, MASTER_METADATA_PART2_LENGTH, MAX_SYMBOL_NUMBER,
	SYMBOL_POSITIONS, AP_NUM, version_to_size,
};

use matrix::bits_per_module;

/// Encoder configuration.
///
/// Unset symbol versions (0, 0) on a single-symbol code let the planner
/// pick the smallest fitting version. Error correction level 0 means the
/// default level for the master and the host's level for slaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeSettings {
	/// Palette size, one of 4, 8, 16, 32, 64, 128, 256.
	pub color_number: usize,
	/// Number of symbols, 1..=61.
	pub symbol_number: usize,
	/// Pixels per module edge.
	pub module_size: usize,
	/// Target master symbol width in pixels; overrides `module_size`.
	pub master_symbol_width: usize,
	/// Target master symbol height in pixels; overrides `module_size`.
	pub master_symbol_height: usize,
	/// Position of each symbol on the placement grid, 0..=60.
	pub symbol_positions: Vec<i32>,
	/// Side version of each symbol.
	pub symbol_versions: Vec<Vector2>,
	/// Error correction level of each symbol, 0..=10.
	pub symbol_ecc_levels: Vec<u8>,
}

impl Default for EncodeSettings {
	fn default() -> Self {
		Self {
			color_number: DEFAULT_COLOR_NUMBER,
			symbol_number: DEFAULT_SYMBOL_NUMBER,
			module_size: DEFAULT_MODULE_SIZE,
			master_symbol_width: 0,
			master_symbol_height: 0,
			symbol_positions: Vec::new(),
			symbol_versions: Vec::new(),
			symbol_ecc_levels: Vec::new(),
		}
	}
}

// Vector2 travels through settings files
impl Serialize for Vector2 {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		(self.x, self.y).serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for Vector2 {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let (x, y) = <(i32, i32)>::deserialize(deserializer)?;
		Ok(Vector2::new(x, y))
	}
}

/// One symbol being built.
#[derive(Debug, Default, Clone)]
pub(crate) struct Symbol {
	pub index: usize,
	pub side_size: Vector2,
	/// Host symbol index; -1 before docking.
	pub host: i32,
	/// Slave indices per side (top, bottom, left, right); -1 marks the
	/// side facing the host.
	pub slaves: [i32; 4],
	pub wcwr: (i32, i32),
	/// Net payload bits handed to the LDPC encoder.
	pub data: Vec<u8>,
	/// Metadata bits (encoded for the master, net for slaves).
	pub metadata: Vec<u8>,
	pub matrix: Vec<u8>,
	/// `true` marks a data-bearing module.
	pub data_map: Vec<bool>,
}

/// JAB Code encoder.
#[derive(Debug)]
pub struct Encoder {
	color_number: usize,
	symbol_number: usize,
	module_size: usize,
	master_symbol_width: usize,
	master_symbol_height: usize,
	palette: Vec<u8>,
	symbol_positions: Vec<i32>,
	symbol_versions: Vec<Vector2>,
	symbol_ecc_levels: Vec<u8>,
	symbols: Vec<Symbol>,
}

impl Encoder {
	/// Creates an encoder; out-of-domain settings fall back to their
	/// defaults with a warning.
	pub fn new(settings: EncodeSettings) -> Self {
		let mut color_number = settings.color_number;
		if !matches!(color_number, 4 | 8 | 16 | 32 | 64 | 128 | 256) {
			log::warn!("unsupported color number {color_number}, falling back to default");
			color_number = DEFAULT_COLOR_NUMBER;
		}
		let mut symbol_number = settings.symbol_number;
		if symbol_number < 1 || symbol_number > MAX_SYMBOL_NUMBER {
			log::warn!("unsupported symbol number {symbol_number}, falling back to default");
			symbol_number = DEFAULT_SYMBOL_NUMBER;
		}

		let mut symbol_positions = settings.symbol_positions;
		symbol_positions.resize(symbol_number, 0);
		let mut symbol_versions = settings.symbol_versions;
		symbol_versions.resize(symbol_number, Vector2::default());
		let mut symbol_ecc_levels = settings.symbol_ecc_levels;
		symbol_ecc_levels.resize(symbol_number, 0);
		for level in &mut symbol_ecc_levels {
			if *level > 10 {
				log::warn!("unsupported ecc level {level}, falling back to default");
				*level = 0;
			}
		}

		Self {
			color_number,
			symbol_number,
			module_size: settings.module_size.max(1),
			master_symbol_width: settings.master_symbol_width,
			master_symbol_height: settings.master_symbol_height,
			palette: default_palette(color_number),
			symbol_positions,
			symbol_versions,
			symbol_ecc_levels,
			symbols: Vec::new(),
		}
	}

	/// Whether the master symbol is encoded without metadata.
	fn is_default_mode(&self) -> bool {
		self.color_number == 8
			&& (self.symbol_ecc_levels[0] == 0
				|| self.symbol_ecc_levels[0] == DEFAULT_ECC_LEVEL as u8)
	}

	/// Encoded metadata length of the master symbol.
	fn master_metadata_length(&self) -> usize {
		if self.is_default_mode() {
			0
		} else {
			MASTER_METADATA_PART1_LENGTH + MASTER_METADATA_PART2_LENGTH
		}
	}

	/// Error correction level with inheritance resolved: 0 means the
	/// host's level for slaves and the default level for the master.
	fn effective_ecc_level(&self, index: usize) -> usize {
		let mut index = index;
		loop {
			let level = self.symbol_ecc_levels[index];
			if level != 0 {
				return level as usize;
			}
			if index == 0 {
				return DEFAULT_ECC_LEVEL;
			}
			index = self.symbols[index].host as usize;
		}
	}

	/// Data capacity of a symbol in bits.
	fn symbol_capacity(&self, index: usize) -> usize {
		let nb_modules_fp = if index == 0 {
			4 * 17
		} else {
			4 * 7
		};
		// slaves embed at most 32 extra palette colors
		let nb_modules_palette = if index == 0 {
			(self.color_number.min(64) - 2) * 4
		} else {
			(self.color_number.min(34) - 2) * 4
		};
		let side_x = version_to_size(self.symbol_versions[index].x);
		let side_y = version_to_size(self.symbol_versions[index].y);
		let aps_x = AP_NUM[self.symbol_versions[index].x as usize - 1];
		let aps_y = AP_NUM[self.symbol_versions[index].y as usize - 1];
		let nb_modules_ap = (aps_x * aps_y - 4) * 7;
		let bpm = bits_per_module(self.color_number);
		let mut nb_modules_metadata = 0;
		if index == 0 {
			let nb_metadata_bits = self.master_metadata_length();
			if nb_metadata_bits > 0 {
				nb_modules_metadata =
					(nb_metadata_bits - MASTER_METADATA_PART1_LENGTH).div_ceil(bpm)
						+ MASTER_METADATA_PART1_MODULE_NUMBER;
			}
		}
		((side_x * side_y) as usize - nb_modules_fp - nb_modules_ap - nb_modules_palette
			- nb_modules_metadata)
			* bpm
	}

	fn net_capacity(capacity: usize, wcwr: (i32, i32)) -> usize {
		let (wc, wr) = (wcwr.0 as usize, wcwr.1 as usize);
		(capacity / wr) * wr - (capacity / wr) * wc
	}

	/// Validates positions and versions, moves the master to the front and
	/// assigns docked symbols to their hosts.
	fn init_symbols(&mut self) -> Result<(), EncodeError> {
		if self.symbol_number > 1 {
			for i in 0..self.symbol_number {
				let v = self.symbol_versions[i];
				if v.x < 1 || v.x > 32 || v.y < 1 || v.y > 32 {
					return Err(EncodeError::InvalidVersion {
						index: i,
					});
				}
				if self.symbol_positions[i] < 0
					|| self.symbol_positions[i] >= MAX_SYMBOL_NUMBER as i32
				{
					return Err(EncodeError::InvalidPosition {
						index: i,
					});
				}
			}
		} else {
			let v = self.symbol_versions[0];
			if v.x < 0 || v.x > 32 || v.y < 0 || v.y > 32 {
				return Err(EncodeError::InvalidVersion {
					index: 0,
				});
			}
		}

		// move the master symbol to the front
		if self.symbol_number > 1 && self.symbol_positions[0] != 0 {
			if let Some(master) = self.symbol_positions.iter().position(|&p| p == 0) {
				self.symbol_positions.swap(0, master);
				self.symbol_versions.swap(0, master);
				self.symbol_ecc_levels.swap(0, master);
			} else {
				return Err(EncodeError::MasterMissing);
			}
		}
		if self.symbol_number == 1 {
			self.symbol_positions[0] = 0;
		}

		for i in 0..self.symbol_number {
			for j in i + 1..self.symbol_number {
				if self.symbol_positions[i] == self.symbol_positions[j] {
					return Err(EncodeError::DuplicatePosition);
				}
			}
		}

		self.symbols = vec![Symbol::default(); self.symbol_number];
		self.assign_docked_symbols()?;
		self.check_docked_symbol_size()?;
		for i in 0..self.symbol_number {
			self.symbols[i].index = i;
			self.symbols[i].side_size = Vector2::new(
				version_to_size(self.symbol_versions[i].x),
				version_to_size(self.symbol_versions[i].y),
			);
		}

		// the extended metadata snake of large palettes needs room
		if self.color_number >= 64 {
			let v = self.symbol_versions[0];
			let explicit = v.x > 0 && v.y > 0;
			if explicit && (v.x < 10 || v.y < 10) {
				return Err(EncodeError::InvalidVersion {
					index: 0,
				});
			}
		}
		Ok(())
	}

	fn swap_symbols(&mut self, a: usize, b: usize) {
		self.symbol_positions.swap(a, b);
		self.symbol_versions.swap(a, b);
		self.symbol_ecc_levels.swap(a, b);
		self.symbols.swap(a, b);
	}

	/// Walks hosts in four directions and records slave/host adjacency.
	fn assign_docked_symbols(&mut self) -> Result<(), EncodeError> {
		for symbol in &mut self.symbols {
			symbol.host = -1;
			symbol.slaves = [0; 4];
		}
		self.symbols[0].host = 0;

		let mut assigned = 1usize;
		for i in 0..self.symbol_number.saturating_sub(1) {
			for side in 0..4 {
				for k in i + 1..self.symbol_number {
					if assigned >= self.symbol_number {
						break;
					}
					if self.symbols[k].host != -1 {
						continue;
					}
					let hpos = SYMBOL_POSITIONS[self.symbol_positions[i] as usize];
					let spos = SYMBOL_POSITIONS[self.symbol_positions[k] as usize];
					let found = match side {
						// top
						0 => hpos.x == spos.x && hpos.y - 1 == spos.y,
						// bottom
						1 => hpos.x == spos.x && hpos.y + 1 == spos.y,
						// left
						2 => hpos.y == spos.y && hpos.x - 1 == spos.x,
						// right
						_ => hpos.y == spos.y && hpos.x + 1 == spos.x,
					};
					if found {
						self.symbols[i].slaves[side] = assigned as i32;
						let opposite = match side {
							0 => 1,
							1 => 0,
							2 => 3,
							_ => 2,
						};
						self.symbols[k].slaves[opposite] = -1;
						self.swap_symbols(k, assigned);
						self.symbols[assigned].host = i as i32;
						assigned += 1;
					}
				}
			}
		}

		for i in 1..self.symbol_number {
			if self.symbols[i].host == -1 {
				return Err(EncodeError::UndockedSymbol {
					position: self.symbol_positions[i],
				});
			}
		}
		Ok(())
	}

	/// Docked sides must share their side version with the host.
	fn check_docked_symbol_size(&self) -> Result<(), EncodeError> {
		for i in 0..self.symbol_number {
			for side in 0..4 {
				let slave = self.symbols[i].slaves[side];
				if slave > 0 {
					let slave = slave as usize;
					let hpos = self.symbol_positions[i];
					let spos = self.symbol_positions[slave];
					let hgrid = SYMBOL_POSITIONS[hpos as usize];
					let sgrid = SYMBOL_POSITIONS[spos as usize];
					let mismatch = (hgrid.x == sgrid.x
						&& self.symbol_versions[i].x != self.symbol_versions[slave].x)
						|| (hgrid.y == sgrid.y
							&& self.symbol_versions[i].y != self.symbol_versions[slave].y);
					if mismatch {
						return Err(EncodeError::DockedSideMismatch {
							slave_position: spos,
							host_position: hpos,
						});
					}
				}
			}
		}
		Ok(())
	}

	/// Picks the smallest square master version that fits the payload.
	fn set_master_symbol_version(&mut self, encoded_length: usize) -> Result<(), EncodeError> {
		let payload_length = encoded_length + 5;
		if self.symbol_ecc_levels[0] == 0 {
			self.symbol_ecc_levels[0] = DEFAULT_ECC_LEVEL as u8;
		}
		self.symbols[0].wcwr = ECC_LEVEL_TO_WCWR[self.symbol_ecc_levels[0] as usize];

		let min_version = if self.color_number >= 64 {
			// keep the extended metadata snake collision free
			10
		} else {
			1
		};
		let mut capacity = 0;
		let mut found = false;
		for version in min_version..=32 {
			self.symbol_versions[0] = Vector2::new(version, version);
			capacity = self.symbol_capacity(0);
			if Self::net_capacity(capacity, self.symbols[0].wcwr) >= payload_length {
				found = true;
				break;
			}
		}
		if !found {
			// see whether a lower ECC level would have fit
			for level in (1..self.symbol_ecc_levels[0] as usize).rev() {
				if Self::net_capacity(capacity, ECC_LEVEL_TO_WCWR[level]) >= payload_length {
					log::info!("message would fit at ECC level {level} or lower");
					break;
				}
			}
			return Err(EncodeError::DataTooLong);
		}
		self.symbols[0].side_size = Vector2::new(
			version_to_size(self.symbol_versions[0].x),
			version_to_size(self.symbol_versions[0].y),
		);
		Ok(())
	}

	/// Builds the net metadata bits of every slave symbol.
	fn set_slave_metadata(&mut self) {
		for i in 1..self.symbol_number {
			let host = self.symbols[i].host as usize;
			let mut metadata = Vec::new();
			// Part I: SS and SE
			let (ss, variable_v) =
				if self.symbol_versions[i].x != self.symbol_versions[host].x {
					(1u8, Some(self.symbol_versions[i].x - 1))
				} else if self.symbol_versions[i].y != self.symbol_versions[host].y {
					(1, Some(self.symbol_versions[i].y - 1))
				} else {
					(0, None)
				};
			let se_differs = self.symbol_ecc_levels[i] != 0
				&& self.symbol_ecc_levels[i] != self.symbol_ecc_levels[host];
			metadata.push(ss);
			metadata.push(u8::from(se_differs));
			// Part II: V and E
			if let Some(v) = variable_v {
				push_bits(&mut metadata, v as u32, 5);
			}
			if se_differs {
				let (wc, wr) = ECC_LEVEL_TO_WCWR[self.symbol_ecc_levels[i] as usize];
				push_bits(&mut metadata, (wc - 3) as u32, 3);
				push_bits(&mut metadata, (wr - 4) as u32, 3);
			}
			self.symbols[i].metadata = metadata;
		}
	}

	/// Appends the E field to a slave's metadata and flags SE.
	fn add_e_to_slave_metadata(&mut self, slave: usize) {
		self.symbols[slave].metadata[1] = 1;
		let (wc, wr) = self.symbols[slave].wcwr;
		let mut metadata = std::mem::take(&mut self.symbols[slave].metadata);
		push_bits(&mut metadata, (wc - 3) as u32, 3);
		push_bits(&mut metadata, (wr - 4) as u32, 3);
		self.symbols[slave].metadata = metadata;
	}

	/// Rewrites the E field of a slave's metadata from its final `(wc, wr)`.
	fn update_slave_metadata_e(&mut self, slave: usize) {
		let (wc, wr) = self.symbols[slave].wcwr;
		let metadata = &mut self.symbols[slave].metadata;
		let start = if metadata[0] == 1 {
			7
		} else {
			2
		};
		let mut bits = Vec::new();
		push_bits(&mut bits, (wc - 3) as u32, 3);
		push_bits(&mut bits, (wr - 4) as u32, 3);
		metadata[start..start + 6].copy_from_slice(&bits);
	}

	/// Splits the payload over the symbols and serializes each symbol's
	/// net bit buffer including the metadata footer.
	fn fit_data_into_symbols(&mut self, encoded_data: &[u8]) -> Result<(), EncodeError> {
		let n = self.symbol_number;
		let mut capacity = vec![0usize; n];
		let mut net_capacity = vec![0usize; n];
		let mut total_net_capacity = 0usize;
		for i in 0..n {
			capacity[i] = self.symbol_capacity(i);
			self.symbols[i].wcwr = ECC_LEVEL_TO_WCWR[self.effective_ecc_level(i)];
			net_capacity[i] = Self::net_capacity(capacity[i], self.symbols[i].wcwr);
			total_net_capacity += net_capacity[i];
		}

		// proportional payload split, residue to the last symbol
		let mut s_data_length = vec![0usize; n];
		let mut assigned = 0usize;
		for i in 0..n {
			s_data_length[i] = if i == n - 1 {
				encoded_data.len() - assigned
			} else {
				(net_capacity[i] as f32 / total_net_capacity as f32 * encoded_data.len() as f32)
					as usize
			};
			assigned += s_data_length[i];
		}

		// resolve payload lengths, slave ECC upgrades and code rates before
		// any payload buffer is serialized
		let mut s_payload_length = vec![0usize; n];
		let mut pn_length = vec![0usize; n];
		for i in 0..n {
			let mut payload = s_data_length[i] + 1;
			payload += if i == 0 {
				4
			} else {
				3
			};
			for side in 0..4 {
				let slave = self.symbols[i].slaves[side];
				if slave > 0 {
					payload += self.symbols[slave as usize].metadata.len();
				}
			}
			if payload > net_capacity[i] {
				return Err(EncodeError::DataTooLong);
			}

			// spend free capacity on explicit slave ECC fields
			let mut side = 0;
			while net_capacity[i] - payload >= 6 && side < 4 {
				let slave = self.symbols[i].slaves[side];
				if slave > 0 && self.symbols[slave as usize].metadata[1] == 0 {
					self.add_e_to_slave_metadata(slave as usize);
					payload += 6;
				}
				side += 1;
			}
			s_payload_length[i] = payload;

			// optimal code rate when the symbol declares its own ECC
			if i == 0 {
				if !self.is_default_mode() {
					let wcwr = optimal_ecc(capacity[i], payload, self.symbols[i].wcwr);
					self.symbols[i].wcwr = wcwr;
					pn_length[i] = Self::net_capacity(capacity[i], wcwr);
				} else {
					pn_length[i] = net_capacity[i];
				}
			} else if self.symbols[i].metadata[1] == 1 {
				let wcwr = optimal_ecc(capacity[i], payload, self.symbols[i].wcwr);
				self.symbols[i].wcwr = wcwr;
				pn_length[i] = Self::net_capacity(capacity[i], wcwr);
				self.update_slave_metadata_e(i);
			} else {
				// without an explicit E field the receiver assumes the
				// host's final code rate
				let host = self.symbols[i].host as usize;
				let host_wcwr = self.symbols[host].wcwr;
				self.symbols[i].wcwr = host_wcwr;
				pn_length[i] = Self::net_capacity(capacity[i], host_wcwr);
				if pn_length[i] < payload {
					return Err(EncodeError::DataTooLong);
				}
			}
		}

		// serialize the net payload of every symbol
		let mut offset = 0usize;
		for i in 0..n {
			let mut buffer = vec![0u8; pn_length[i]];
			buffer[..s_data_length[i]]
				.copy_from_slice(&encoded_data[offset..offset + s_data_length[i]]);
			offset += s_data_length[i];

			let mut set_pos = s_payload_length[i] - 1;
			// flag bit
			buffer[set_pos] = 1;
			// host metadata S: one bit per docked side, skipping the side
			// facing the own host
			for side in 0..4 {
				let slave = self.symbols[i].slaves[side];
				if slave >= 0 {
					set_pos -= 1;
					buffer[set_pos] = u8::from(slave > 0);
				}
			}
			// docked slave metadata
			for side in 0..4 {
				let slave = self.symbols[i].slaves[side];
				if slave > 0 {
					for m in 0..self.symbols[slave as usize].metadata.len() {
						set_pos -= 1;
						buffer[set_pos] = self.symbols[slave as usize].metadata[m];
					}
				}
			}
			self.symbols[i].data = buffer;
		}
		Ok(())
	}

	/// Encodes master metadata Parts I and II.
	fn encode_master_metadata(&mut self) {
		let nc = (bits_per_module(self.color_number) - 1) as u32;
		let v = (((self.symbol_versions[0].x - 1) << 5) + (self.symbol_versions[0].y - 1)) as u32;
		let e1 = (self.symbols[0].wcwr.0 - 3) as u32;
		let e2 = (self.symbols[0].wcwr.1 - 4) as u32;

		let mut part1 = Vec::new();
		push_bits(&mut part1, nc, MASTER_METADATA_PART1_LENGTH / 2);
		let mut part2 = Vec::new();
		push_bits(&mut part2, v, 10);
		push_bits(&mut part2, e1, 3);
		push_bits(&mut part2, e2, 3);
		push_bits(&mut part2, u32::from(DEFAULT_MASKING_REFERENCE), 3);

		let mut metadata = ldpc::encode(&part1, 2, -1);
		metadata.extend(ldpc::encode(&part2, 2, -1));
		self.symbols[0].metadata = metadata;
	}

	/// Re-encodes Part II with the chosen mask reference.
	fn update_master_metadata_part2(&mut self, mask_ref: u8) {
		let v = (((self.symbol_versions[0].x - 1) << 5) + (self.symbol_versions[0].y - 1)) as u32;
		let e1 = (self.symbols[0].wcwr.0 - 3) as u32;
		let e2 = (self.symbols[0].wcwr.1 - 4) as u32;

		let mut part2 = Vec::new();
		push_bits(&mut part2, v, 10);
		push_bits(&mut part2, e1, 3);
		push_bits(&mut part2, e2, 3);
		push_bits(&mut part2, u32::from(mask_ref), 3);

		let encoded = ldpc::encode(&part2, 2, -1);
		self.symbols[0].metadata[MASTER_METADATA_PART1_LENGTH..].copy_from_slice(&encoded);
	}

	/// Rewrites the Part II modules of the already built master matrix.
	fn place_master_metadata_part2(&mut self) {
		use crate::tables::MetadataCursor;

		let bpm = bits_per_module(self.color_number);
		let width = self.symbols[0].side_size.x;
		let height = self.symbols[0].side_size.y;

		// skip Part I and the color palette
		let mut cursor = MetadataCursor::new();
		let color_palette_size = self.color_number.min(64) - 2;
		let module_offset = MASTER_METADATA_PART1_MODULE_NUMBER + color_palette_size * 4;
		for _ in 0..module_offset {
			cursor.advance(height, width);
		}

		let part2_end = MASTER_METADATA_PART1_LENGTH + MASTER_METADATA_PART2_LENGTH;
		let mut metadata_index = MASTER_METADATA_PART1_LENGTH;
		while metadata_index < part2_end {
			let cell = (cursor.y * width + cursor.x) as usize;
			let mut color_index = self.symbols[0].matrix[cell];
			for j in 0..bpm {
				if metadata_index < part2_end {
					let mask = 1u8 << (bpm - 1 - j);
					if self.symbols[0].metadata[metadata_index] == 0 {
						color_index &= !mask;
					} else {
						color_index |= mask;
					}
					metadata_index += 1;
				}
			}
			self.symbols[0].matrix[cell] = color_index;
			cursor.advance(height, width);
		}
	}

	/// Encodes `data` into a rasterized code bitmap.
	pub fn generate(&mut self, data: &[u8]) -> Result<Bitmap, EncodeError> {
		if data.is_empty() {
			return Err(EncodeError::EmptyInput);
		}

		self.init_symbols()?;

		let sequence = analyzer::analyze(data)?;
		let encoded_data = bits::encode_data(data, &sequence)?;

		if self.symbol_number == 1
			&& (self.symbol_versions[0].x == 0 || self.symbol_versions[0].y == 0)
		{
			self.set_master_symbol_version(encoded_data.len())?;
		}
		self.set_slave_metadata();
		self.fit_data_into_symbols(&encoded_data)?;

		let default_mode = self.is_default_mode();
		if !default_mode {
			self.encode_master_metadata();
		}

		for i in 0..self.symbol_number {
			let mut ecc_encoded = ldpc::encode(&self.symbols[i].data, self.symbols[i].wcwr.0, self.symbols[i].wcwr.1);
			interleave(&mut ecc_encoded);
			let mut symbol = std::mem::take(&mut self.symbols[i]);
			matrix::create_matrix(&mut symbol, self.color_number, default_mode, &ecc_encoded);
			self.symbols[i] = symbol;
		}

		let cp = matrix::code_params(
			&self.symbols,
			&self.symbol_positions,
			self.module_size,
			self.master_symbol_width,
			self.master_symbol_height,
		);
		if default_mode {
			mask_symbols(
				&mut self.symbols,
				&self.symbol_positions,
				self.color_number,
				DEFAULT_MASKING_REFERENCE,
				None,
			);
		} else {
			let mask_ref = mask_code(
				&mut self.symbols,
				&self.symbol_positions,
				self.color_number,
				&cp,
			);
			if mask_ref != DEFAULT_MASKING_REFERENCE {
				self.update_master_metadata_part2(mask_ref);
				self.place_master_metadata_part2();
			}
		}

		Ok(matrix::create_bitmap(&self.symbols, &self.symbol_positions, &self.palette, &cp))
	}

	/// The palette used for rasterization.
	pub fn palette(&self) -> &[u8] {
		&self.palette
	}
}

/// Appends `length` bits of `value` MSB first as one bit per byte.
fn push_bits(out: &mut Vec<u8>, value: u32, length: usize) {
	for j in (0..length).rev() {
		out.push(((value >> j) & 1) as u8);
	}
}

/// Picks the densest `(wc, wr)` whose net capacity still fits the payload.
fn optimal_ecc(capacity: usize, net_data_length: usize, fallback: (i32, i32)) -> (i32, i32) {
	let mut best = fallback;
	let mut min = capacity as i64;
	for k in 3i64..=8 {
		for j in k + 1..=9 {
			let cap = capacity as i64;
			let dist = (cap / j) * j - (cap / j) * k - net_data_length as i64;
			if dist < min && dist >= 0 {
				best = (k as i32, j as i32);
				min = dist;
			}
		}
	}
	best
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_settings_are_default_mode() {
		let enc = Encoder::new(EncodeSettings::default());
		assert!(enc.is_default_mode());
		assert_eq!(enc.color_number, 8);
	}

	#[test]
	fn invalid_color_number_falls_back() {
		let enc = Encoder::new(EncodeSettings {
			color_number: 12,
			..EncodeSettings::default()
		});
		assert_eq!(enc.color_number, 8);
	}

	#[test]
	fn hello_with_defaults_selects_version_one() {
		let mut enc = Encoder::new(EncodeSettings::default());
		let bitmap = enc.generate(b"Hello").unwrap();
		// side 21 modules x 12 pixels
		assert_eq!(bitmap.width(), 21 * 12);
		assert_eq!(bitmap.height(), 21 * 12);
		assert_eq!(enc.symbol_versions[0], Vector2::new(1, 1));
	}

	#[test]
	fn capacity_matches_data_map() {
		let mut enc = Encoder::new(EncodeSettings {
			symbol_versions: vec![Vector2::new(2, 2)],
			symbol_ecc_levels: vec![5],
			..EncodeSettings::default()
		});
		enc.generate(b"capacity check").unwrap();
		let data_modules = enc.symbols[0].data_map.iter().filter(|&&d| d).count();
		let bpm = bits_per_module(enc.color_number);
		assert_eq!(enc.symbol_capacity(0), data_modules * bpm);
	}

	#[test]
	fn wc_stays_below_wr_after_planning() {
		for level in 0..=10u8 {
			let mut enc = Encoder::new(EncodeSettings {
				symbol_ecc_levels: vec![level],
				..EncodeSettings::default()
			});
			enc.generate(b"level probe").unwrap();
			let (wc, wr) = enc.symbols[0].wcwr;
			assert!(wc < wr, "level {level}");
		}
	}

	#[test]
	fn undocked_slave_is_rejected() {
		let mut enc = Encoder::new(EncodeSettings {
			symbol_number: 2,
			symbol_positions: vec![0, 12],
			symbol_versions: vec![Vector2::new(2, 2), Vector2::new(2, 2)],
			..EncodeSettings::default()
		});
		assert!(matches!(
			enc.generate(b"orphan"),
			Err(EncodeError::UndockedSymbol { .. })
		));
	}

	#[test]
	fn docked_version_mismatch_is_rejected() {
		// position 3 is left of the master, so the y versions must match
		let mut enc = Encoder::new(EncodeSettings {
			symbol_number: 2,
			symbol_positions: vec![0, 3],
			symbol_versions: vec![Vector2::new(3, 2), Vector2::new(3, 3)],
			..EncodeSettings::default()
		});
		assert!(matches!(
			enc.generate(b"mismatch"),
			Err(EncodeError::DockedSideMismatch { .. })
		));
	}

	#[test]
	fn three_symbol_code_builds() {
		let mut enc = Encoder::new(EncodeSettings {
			symbol_number: 3,
			symbol_positions: vec![0, 3, 2],
			symbol_versions: vec![
				Vector2::new(3, 2),
				Vector2::new(4, 2),
				Vector2::new(3, 2),
			],
			..EncodeSettings::default()
		});
		let payload = vec![b'x'; 500];
		let bitmap = enc.generate(&payload).unwrap();
		// master 29x25, left slave 33x25, bottom slave 29x25
		assert_eq!(bitmap.width(), (33 + 29) * 12);
		assert!(bitmap.height() >= 25 * 12);
	}

	#[test]
	fn payload_too_large_is_rejected() {
		let mut enc = Encoder::new(EncodeSettings {
			symbol_versions: vec![Vector2::new(1, 1)],
			symbol_ecc_levels: vec![9],
			..EncodeSettings::default()
		});
		let payload = vec![b'Q'; 300];
		assert!(matches!(enc.generate(&payload), Err(EncodeError::DataTooLong)));
	}
}
